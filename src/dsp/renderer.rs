//! WAV renderer — renders a song offline to planar f32 or a WAV byte buffer.

use crate::config::SynthConfig;
use crate::dsp::engine::Synth;
use crate::error::SynthError;
use crate::song::Song;

/// Samples handed to the synth per call, like a real-time host would.
const BLOCK_SIZE: usize = 4096;

/// Render `seconds` of `song` from bar 0 to planar stereo f32.
pub fn render_stereo(
    song: Song,
    config: SynthConfig,
    seconds: f64,
) -> Result<(Vec<f32>, Vec<f32>), SynthError> {
    let sample_rate = config.sample_rate;
    let total = (seconds.max(0.0) * sample_rate).round() as usize;
    let mut synth = Synth::new(song, config)?;
    synth.warm_up();
    synth.play();

    let mut left = vec![0.0f32; total];
    let mut right = vec![0.0f32; total];
    let mut offset = 0;
    while offset < total {
        let block = BLOCK_SIZE.min(total - offset);
        let end = offset + block;
        // Tails keep rendering after the song ends.
        let playing = synth.is_playing();
        synth.synthesize(&mut left[offset..end], &mut right[offset..end], block, playing)?;
        offset = end;
    }
    Ok((left, right))
}

/// Render `seconds` of `song` to a WAV file as bytes (16-bit stereo PCM).
pub fn render_wav(song: Song, config: SynthConfig, seconds: f64) -> Result<Vec<u8>, SynthError> {
    let sample_rate = config.sample_rate.round() as u32;
    let (left, right) = render_stereo(song, config, seconds)?;
    let pcm: Vec<i16> = left
        .iter()
        .zip(&right)
        .flat_map(|(&l, &r)| [to_i16(l), to_i16(r)])
        .collect();
    Ok(encode_wav(&pcm, sample_rate, 2))
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode interleaved i16 PCM samples to a WAV byte buffer.
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::{Channel, Instrument, Note, Pattern};

    fn arpeggio_song() -> Song {
        let mut channel = Channel::pitch(Instrument::default());
        channel.patterns.push(Pattern::with_notes(vec![
            Note::new(60, 0, 4, 3),
            Note::new(64, 4, 8, 3),
            Note::new(67, 8, 12, 3),
            Note::new(72, 12, 16, 3),
        ]));
        channel.bars = vec![1];
        Song {
            channels: vec![channel],
            ..Default::default()
        }
    }

    #[test]
    fn wav_header_valid() {
        let wav = render_wav(arpeggio_song(), SynthConfig::default(), 0.1).unwrap();

        // Check RIFF header
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        // Check sample rate
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 44100);

        // Check channels
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 2);
    }

    #[test]
    fn wav_size_correct() {
        let wav = render_wav(Song::default(), SynthConfig::default(), 0.5).unwrap();

        // 0.5s = 22050 samples * 2 channels * 2 bytes = 88200 data bytes
        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 88200);
        assert_eq!(wav.len(), 44 + 88200);
    }

    #[test]
    fn rendered_song_is_not_silent() {
        let config = SynthConfig::with_sample_rate(22050.0); // lower rate for faster test
        let wav = render_wav(arpeggio_song(), config, 2.0).unwrap();
        let has_nonzero = wav[44..]
            .chunks_exact(2)
            .any(|b| i16::from_le_bytes([b[0], b[1]]) != 0);
        assert!(has_nonzero, "Rendered WAV should contain non-silent audio");
    }

    #[test]
    fn stereo_render_matches_duration_and_rejects_bad_rate() {
        let (left, right) = render_stereo(Song::default(), SynthConfig::default(), 0.25).unwrap();
        assert_eq!(left.len(), 11025);
        assert_eq!(right.len(), 11025);

        let err = render_stereo(Song::default(), SynthConfig::with_sample_rate(0.0), 1.0);
        assert!(matches!(err, Err(SynthError::InvalidSampleRate(_))));
    }
}
