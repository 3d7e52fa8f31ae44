//! Engine configuration and the fixed constants shared by the song model and DSP.

use serde::{Deserialize, Serialize};

use crate::error::SynthError;

// ── Timing ──────────────────────────────────────────────────

/// Ticks per part. Parameters are recomputed at every tick boundary.
pub const TICKS_PER_PART: u32 = 2;
/// Ticks a slide transition takes to glide from the previous pitch.
pub const SLIDE_TICKS: f64 = 3.0;
/// Parts between the starts of successive strummed chord voices.
pub const STRUM_PARTS: u32 = 1;
/// Echo delay setting step, in ticks.
pub const ECHO_DELAY_STEP_TICKS: f64 = 4.0;
/// Largest echo delay setting.
pub const ECHO_DELAY_MAX: u32 = 24;
/// Arpeggio steps per tick at an arpeggio speed of 1.
pub const ARPEGGIO_STEPS_PER_TICK: f64 = 0.25;
/// Period of the vibrato LFO at a vibrato speed of 1.
pub const VIBRATO_PERIOD_SECONDS: f64 = 0.14;
/// Slowest tempo a song or tempo modulation can reach, in BPM.
pub const TEMPO_MIN: f64 = 30.0;
pub const TEMPO_MAX: f64 = 500.0;

// ── Notes & chords ──────────────────────────────────────────

pub const NOTE_SIZE_MAX: u32 = 3;
pub const MAX_CHORD_SIZE: usize = 9;
pub const MAX_PITCH: i32 = 120;

// ── Filters & envelopes ─────────────────────────────────────

pub const MAX_FILTER_POINTS: usize = 8;
pub const FILTER_FREQ_REFERENCE_HZ: f64 = 8000.0;
pub const FILTER_FREQ_REFERENCE_SETTING: f64 = 28.0;
pub const FILTER_FREQ_STEP: f64 = 0.25;
pub const FILTER_FREQ_MAX_SETTING: f64 = 33.0;
pub const FILTER_GAIN_CENTER: f64 = 7.0;
pub const FILTER_GAIN_STEP: f64 = 0.5;
pub const FILTER_GAIN_MAX_SETTING: f64 = 14.0;
pub const FILTER_MIN_HZ: f64 = 10.0;
pub const MAX_ENVELOPES: usize = 12;

// ── Synthesis ───────────────────────────────────────────────

pub const MAX_FM_OPERATORS: usize = 4;
pub const FM_AMPLITUDE_MAX: f64 = 15.0;
pub const SUPERSAW_VOICES: usize = 7;
pub const HARMONICS_CONTROL_POINTS: usize = 28;
pub const HARMONICS_MAX: u8 = 7;
pub const HARMONICS_WAVE_LENGTH: usize = 2048;
pub const NOISE_WAVE_LENGTH: usize = 1 << 15;
pub const SINE_WAVE_LENGTH: usize = 256;
/// Volume setting range, centred on zero; the bottom of the range mutes.
pub const VOLUME_RANGE: f64 = 50.0;
pub const VOLUME_LOG_SCALE: f64 = 1.0 / 7.0;

// ── Effects ─────────────────────────────────────────────────

pub const PAN_MAX: f64 = 100.0;
pub const PAN_DELAY_SECONDS_MAX: f64 = 0.001;
pub const CHORUS_DELAY_RANGE_SECONDS: f64 = 0.0034;
pub const CHORUS_DELAY_OFFSETS: [[f64; 3]; 2] = [[1.51, 2.10, 3.35], [1.47, 2.15, 3.25]];
pub const CHORUS_PHASE_OFFSETS: [[f64; 3]; 2] = [[0.0, 2.1, 4.2], [3.2, 5.3, 1.0]];
pub const CHORUS_PERIOD_SECONDS: f64 = 2.0;
pub const CHORUS_MAX_DELAY_SECONDS: f64 = 0.02;
pub const REVERB_DELAY_BUFFER_SIZE: usize = 16384;
pub const REVERB_SHELF_HZ: f64 = 8000.0;
pub const REVERB_SHELF_GAIN: f64 = 0.5;
pub const ECHO_SHELF_HZ: f64 = 4000.0;
pub const ECHO_SHELF_GAIN: f64 = 0.5;
pub const GRANULAR_MAX_GRAIN_SECONDS: f64 = 0.5;
pub const GRANULAR_MAX_RANGE_SECONDS: f64 = 1.0;
pub const DEFAULT_MAX_GRAINS: usize = 256;
/// A delay tail this much quieter than its input is treated as inaudible.
pub const ATTENUATION_THRESHOLD: f64 = 1.0 / 256.0;

// ── Modulation ──────────────────────────────────────────────

pub const MOD_SLOTS: usize = 6;

// ── Numerical safety ────────────────────────────────────────

/// Below this magnitude filter and delay-line state snaps to zero.
pub const EPSILON: f64 = 1.0e-24;
/// Above this magnitude filter state is treated as blown up.
pub const FILTER_STATE_LIMIT: f64 = 100.0;

/// Engine-level configuration, independent of any song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthConfig {
    /// Output sample rate in Hz.
    pub sample_rate: f64,
    /// Active plus released tones a channel may hold before releases are hurried.
    pub max_tones_per_channel: usize,
    /// Grain pool size for the granular effect.
    pub max_grains: usize,
    /// Tone bodies preallocated by `warm_up`.
    pub warm_up_tone_count: usize,
    /// Seed for the granular and noise generators, so renders are reproducible.
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_rate: 44100.0,
            max_tones_per_channel: 16,
            max_grains: DEFAULT_MAX_GRAINS,
            warm_up_tone_count: 64,
            seed: 0x5EED,
        }
    }
}

impl SynthConfig {
    pub fn with_sample_rate(sample_rate: f64) -> Self {
        SynthConfig {
            sample_rate,
            ..Default::default()
        }
    }

    /// Parse a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, SynthError> {
        let config: SynthConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SynthError> {
        if !self.sample_rate.is_finite() || self.sample_rate < 8000.0 {
            return Err(SynthError::InvalidSampleRate(self.sample_rate));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SynthConfig::from_json(r#"{"sampleRate": 48000}"#).unwrap();
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.max_grains, DEFAULT_MAX_GRAINS);
    }

    #[test]
    fn rejects_silly_sample_rate() {
        let err = SynthConfig::from_json(r#"{"sampleRate": 10}"#).unwrap_err();
        assert!(matches!(err, SynthError::InvalidSampleRate(_)));
    }

    #[test]
    fn delay_buffers_are_powers_of_two() {
        assert!(REVERB_DELAY_BUFFER_SIZE.is_power_of_two());
        assert!(NOISE_WAVE_LENGTH.is_power_of_two());
        assert!(HARMONICS_WAVE_LENGTH.is_power_of_two());
        assert!(SINE_WAVE_LENGTH.is_power_of_two());
    }
}
