//! Pitched noise: a seeded table played at a pitch-relative rate through a
//! one-pole smoother whose cutoff tracks the pitch.

use crate::dsp::oscillator::{Wavetable, frequency_from_pitch, noise_spec};
use crate::dsp::tone::Tone;
use crate::song::NoiseWave;

/// Table samples per second at the wave's base pitch.
const NOISE_TABLE_RATE: f64 = 44100.0;

pub fn render(table: &Wavetable, wave: NoiseWave, tone: &mut Tone, buffer: &mut [f64]) {
    let spec = noise_spec(wave);
    let raw = table.raw();
    let len = raw.len() as f64;
    let mask = raw.len() - 1;
    let steps_per_cycle = NOISE_TABLE_RATE / frequency_from_pitch(spec.base_pitch);

    // `phases[0]` holds a table position rather than a cycle fraction.
    let mut position = tone.phases[0];
    let mut delta = tone.phase_deltas[0];
    let scale = tone.phase_delta_scales[0];
    let mut sample = tone.noise_sample;
    let mut expression = tone.expression;

    for out in buffer.iter_mut() {
        let smoothing = (delta * spec.pitch_filter_mult).min(1.0);
        let target = raw[position as usize & mask];
        sample += (target - sample) * smoothing;

        position += delta * steps_per_cycle;
        if position >= len {
            position -= len;
        }
        delta *= scale;

        *out += tone.note_filter.process(sample) * expression;
        expression += tone.expression_delta;
    }

    tone.phases[0] = position;
    tone.phase_deltas[0] = delta;
    tone.noise_sample = sample;
    tone.expression = expression;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::oscillator::WaveTables;

    fn energy(pitch: f64) -> f64 {
        let tables = WaveTables::new(3);
        let mut tone = Tone::new();
        tone.phase_deltas[0] = frequency_from_pitch(pitch) / 44100.0;
        tone.expression = 1.0;
        let mut buffer = vec![0.0; 8192];
        render(tables.noise(NoiseWave::White), NoiseWave::White, &mut tone, &mut buffer);
        // Energy of the first difference: a high-frequency measure.
        buffer.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f64>()
    }

    #[test]
    fn higher_pitch_is_brighter() {
        assert!(energy(84.0) > energy(36.0) * 2.0);
    }

    #[test]
    fn noise_is_bounded_and_finite() {
        let tables = WaveTables::new(3);
        for wave in [NoiseWave::Retro, NoiseWave::Clang, NoiseWave::Buzz, NoiseWave::Pink] {
            let mut tone = Tone::new();
            tone.phase_deltas[0] = 0.05;
            tone.expression = 1.0;
            let mut buffer = vec![0.0; 4096];
            render(tables.noise(wave), wave, &mut tone, &mut buffer);
            assert!(buffer.iter().all(|v| v.is_finite() && v.abs() < 4.0), "{wave:?}");
        }
    }
}
