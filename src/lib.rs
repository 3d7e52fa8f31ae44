pub mod config;
pub mod dsp;
pub mod error;
pub mod song;

use crate::config::SynthConfig;
use crate::song::Song;
use wasm_bindgen::prelude::*;

pub use crate::dsp::engine::Synth;
pub use crate::error::SynthError;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the tickwave-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Parse a song from JSON; missing fields take their defaults.
pub fn parse_song(json: &str) -> Result<Song, SynthError> {
    Ok(serde_json::from_str(json)?)
}

/// WASM-exposed: render `seconds` of a JSON song to a WAV byte array.
#[wasm_bindgen]
pub fn render_song_wav(json: &str, sample_rate: u32, seconds: f64) -> Result<Vec<u8>, JsValue> {
    let song = parse_song(json).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let config = SynthConfig::with_sample_rate(sample_rate as f64);
    dsp::renderer::render_wav(song, config, seconds).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: render `seconds` of a song object to interleaved stereo f32.
/// Returns the raw audio buffer for AudioWorklet playback.
#[wasm_bindgen]
pub fn render_song_samples(js_song: JsValue, sample_rate: u32, seconds: f64) -> Result<Vec<f32>, JsValue> {
    let song: Song =
        serde_wasm_bindgen::from_value(js_song).map_err(|e| JsValue::from_str(&format!("{e}")))?;
    let config = SynthConfig::with_sample_rate(sample_rate as f64);
    let (left, right) = dsp::renderer::render_stereo(song, config, seconds)
        .map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(left.iter().zip(&right).flat_map(|(&l, &r)| [l, r]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn song_json_fills_defaults() {
        let song = parse_song(
            r#"{
                "tempo": 150,
                "channels": [{
                    "kind": "pitch",
                    "patterns": [{ "notes": [{ "pitches": [60], "start": 0, "end": 4 }] }],
                    "bars": [1]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(song.tempo, 150.0);
        assert_eq!(song.parts_per_beat, 4);
        assert_eq!(song.channels[0].instruments.len(), 1);
        assert_eq!(song.channels[0].patterns[0].notes[0].pitches, vec![60]);
    }

    #[test]
    fn bad_json_is_a_config_error() {
        assert!(matches!(parse_song("{ tempo: "), Err(SynthError::Config(_))));
    }

    #[test]
    fn version_matches_manifest() {
        assert_eq!(core_version(), env!("CARGO_PKG_VERSION"));
    }
}
