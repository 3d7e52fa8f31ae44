//! Wavetables and band-limiting helpers shared by the synthesis kernels.
//!
//! Chip and harmonics waves are stored as their running integral. Kernels
//! sample the integral at the start and end of each output sample and take
//! the difference, which averages the wave over the sample period and
//! suppresses most aliasing without oversampling.

use std::collections::hash_map::DefaultHasher;
use std::f64::consts::PI;
use std::hash::{Hash, Hasher};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{
    HARMONICS_CONTROL_POINTS, HARMONICS_MAX, HARMONICS_WAVE_LENGTH, NOISE_WAVE_LENGTH,
    SINE_WAVE_LENGTH, VOLUME_LOG_SCALE, VOLUME_RANGE,
};
use crate::song::{ChipWave, NoiseWave};

/// Frequency in Hz of a (possibly fractional) MIDI-style pitch.
pub fn frequency_from_pitch(pitch: f64) -> f64 {
    440.0 * 2.0_f64.powf((pitch - 69.0) / 12.0)
}

/// Linear gain for an instrument volume setting. The bottom of the range mutes.
pub fn volume_multiplier(volume: f64) -> f64 {
    if volume <= -VOLUME_RANGE / 2.0 {
        0.0
    } else {
        2.0_f64.powf(volume * VOLUME_LOG_SCALE)
    }
}

/// PolyBLEP (Polynomial Band-Limited Step) anti-aliasing correction.
///
/// `t` is the phase [0, 1), `dt` is the phase increment per sample.
/// Returns a correction value to subtract from the naive waveform
/// at discontinuities.
#[inline]
pub fn poly_blep(t: f64, dt: f64) -> f64 {
    if t < dt {
        // Just after the discontinuity
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        // Just before the next discontinuity
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

// ── Wavetable ───────────────────────────────────────────────

/// A single-cycle wave plus its running integral.
#[derive(Debug, Clone, PartialEq)]
pub struct Wavetable {
    raw: Vec<f64>,
    /// `raw.len() + 1` entries; `integral[i]` is the sum of `raw[..i]`.
    integral: Vec<f64>,
}

impl Wavetable {
    /// Build from one cycle. The DC offset is removed first so the integral
    /// returns to zero at the end of the cycle.
    pub fn from_raw(mut raw: Vec<f64>) -> Self {
        if raw.is_empty() {
            raw.push(0.0);
        }
        let mean = raw.iter().sum::<f64>() / raw.len() as f64;
        for v in &mut raw {
            *v -= mean;
        }
        let mut integral = Vec::with_capacity(raw.len() + 1);
        let mut sum = 0.0;
        integral.push(0.0);
        for &v in &raw {
            sum += v;
            integral.push(sum);
        }
        Wavetable { raw, integral }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn raw(&self) -> &[f64] {
        &self.raw
    }

    /// Integral at `phase` cycles, `0 <= phase < 1`, in units of raw samples.
    #[inline]
    pub fn integral_at(&self, phase: f64) -> f64 {
        let pos = phase * self.raw.len() as f64;
        let i = (pos as usize).min(self.raw.len() - 1);
        let frac = pos - i as f64;
        self.integral[i] + (self.integral[i + 1] - self.integral[i]) * frac
    }

    /// Average of the wave between two phases `delta` cycles apart, given the
    /// integral at the earlier one.
    #[inline]
    pub fn differentiate(&self, prev_integral: f64, next_integral: f64, delta: f64) -> f64 {
        let span = delta * self.raw.len() as f64;
        if span > 0.0 {
            (next_integral - prev_integral) / span
        } else {
            0.0
        }
    }

    /// Raw sample with linear interpolation, for delay-line seeding.
    pub fn sample_raw(&self, phase: f64) -> f64 {
        let n = self.raw.len();
        let pos = phase.rem_euclid(1.0) * n as f64;
        let i = (pos as usize).min(n - 1);
        let frac = pos - i as f64;
        self.raw[i] + (self.raw[(i + 1) % n] - self.raw[i]) * frac
    }
}

// ── Chip waves ──────────────────────────────────────────────

/// Loudness compensation so every chip wave sits at a similar level.
pub fn chip_wave_expression(wave: ChipWave) -> f64 {
    match wave {
        ChipWave::Rounded => 0.94,
        ChipWave::Triangle => 1.0,
        ChipWave::Square => 0.5,
        ChipWave::Pulse4 => 0.5,
        ChipWave::Pulse8 => 0.5,
        ChipWave::Sawtooth => 0.65,
        ChipWave::DoubleSaw => 0.5,
        ChipWave::DoublePulse => 0.4,
        ChipWave::Spiky => 0.4,
    }
}

const CHIP_WAVES: [ChipWave; 9] = [
    ChipWave::Rounded,
    ChipWave::Triangle,
    ChipWave::Square,
    ChipWave::Pulse4,
    ChipWave::Pulse8,
    ChipWave::Sawtooth,
    ChipWave::DoubleSaw,
    ChipWave::DoublePulse,
    ChipWave::Spiky,
];

fn chip_wave_raw(wave: ChipWave) -> Vec<f64> {
    match wave {
        ChipWave::Rounded => (0..32)
            .map(|i| {
                let s = (2.0 * PI * (i as f64 + 0.5) / 32.0).sin();
                s.signum() * s.abs().sqrt()
            })
            .collect(),
        ChipWave::Triangle => (0..32)
            .map(|i| {
                let t = (i as f64 + 0.5) / 32.0;
                if t < 0.5 { 4.0 * t - 1.0 } else { 3.0 - 4.0 * t }
            })
            .collect(),
        ChipWave::Square => vec![1.0, -1.0],
        ChipWave::Pulse4 => vec![1.0, -1.0, -1.0, -1.0],
        ChipWave::Pulse8 => vec![1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0],
        ChipWave::Sawtooth => (0..32).map(|i| 1.0 - 2.0 * i as f64 / 31.0).collect(),
        ChipWave::DoubleSaw => (0..32)
            .map(|i| 1.0 - 2.0 * (i % 16) as f64 / 15.0 * if i < 16 { 1.0 } else { 0.5 })
            .collect(),
        ChipWave::DoublePulse => vec![1.0, 1.0, 1.0, 1.0, -1.0, -1.0, 1.0, -1.0],
        ChipWave::Spiky => vec![1.0, -1.0, 1.0, -1.0, 1.0, 0.0],
    }
}

// ── Harmonics ───────────────────────────────────────────────

/// Additive wave from per-harmonic control values (`0..=HARMONICS_MAX`),
/// normalized to a peak of 1.
pub fn harmonics_wave(controls: &[u8]) -> Wavetable {
    let n = HARMONICS_WAVE_LENGTH;
    let mut raw = vec![0.0; n];
    for (h, &control) in controls.iter().take(HARMONICS_CONTROL_POINTS).enumerate() {
        if control == 0 {
            continue;
        }
        let harmonic = (h + 1) as f64;
        let amplitude = 2.0_f64.powf(control.min(HARMONICS_MAX) as f64 - HARMONICS_MAX as f64 + 1.0)
            * (1.0 / harmonic).sqrt();
        for (i, v) in raw.iter_mut().enumerate() {
            *v += amplitude * (2.0 * PI * harmonic * i as f64 / n as f64).sin();
        }
    }
    let peak = raw.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    if peak > 0.0 {
        for v in &mut raw {
            *v /= peak;
        }
    }
    Wavetable::from_raw(raw)
}

/// Cache key for a harmonics control vector.
pub fn harmonics_hash(controls: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    controls.hash(&mut hasher);
    hasher.finish()
}

// ── Noise ───────────────────────────────────────────────────

/// Playback parameters for a noise table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseSpec {
    pub expression: f64,
    /// Pitch at which the table plays back one sample per output sample at 44.1 kHz.
    pub base_pitch: f64,
    /// Scales the one-pole smoothing cutoff relative to the playback rate.
    pub pitch_filter_mult: f64,
}

pub fn noise_spec(wave: NoiseWave) -> NoiseSpec {
    let (expression, base_pitch, pitch_filter_mult) = match wave {
        NoiseWave::Retro => (0.25, 69.0, 1024.0),
        NoiseWave::White => (1.0, 69.0, 8.0),
        NoiseWave::Clang => (0.4, 69.0, 1024.0),
        NoiseWave::Buzz => (0.3, 69.0, 1024.0),
        NoiseWave::Pink => (1.0, 69.0, 8.0),
    };
    NoiseSpec {
        expression,
        base_pitch,
        pitch_filter_mult,
    }
}

const NOISE_WAVES: [NoiseWave; 5] = [
    NoiseWave::Retro,
    NoiseWave::White,
    NoiseWave::Clang,
    NoiseWave::Buzz,
    NoiseWave::Pink,
];

/// Linear-feedback shift register noise; `taps` is XORed in when the low bit is set.
fn lfsr_noise(taps: Option<u32>) -> Vec<f64> {
    let mut register: u32 = 1;
    let mut wave = Vec::with_capacity(NOISE_WAVE_LENGTH);
    for _ in 0..NOISE_WAVE_LENGTH {
        wave.push(((register & 1) * 2) as f64 - 1.0);
        let mut next = register >> 1;
        match taps {
            None => {
                if ((register + next) & 1) == 1 {
                    next += 1 << 14;
                }
            }
            Some(taps) => {
                if register & 1 == 1 {
                    next ^= taps;
                }
            }
        }
        register = next;
    }
    wave
}

fn noise_raw(wave: NoiseWave, rng: &mut SmallRng) -> Vec<f64> {
    match wave {
        NoiseWave::Retro => lfsr_noise(None),
        NoiseWave::Clang => lfsr_noise(Some((1 << 14) | (1 << 1))),
        NoiseWave::Buzz => lfsr_noise(Some((1 << 10) | (1 << 2) | (1 << 1))),
        NoiseWave::White => (0..NOISE_WAVE_LENGTH)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect(),
        NoiseWave::Pink => {
            // Voss-McCartney: octave rows updated at halving rates.
            const ROWS: usize = 12;
            let mut rows = [0.0_f64; ROWS];
            for row in &mut rows {
                *row = rng.gen_range(-1.0..1.0);
            }
            let mut wave = Vec::with_capacity(NOISE_WAVE_LENGTH);
            for i in 0..NOISE_WAVE_LENGTH {
                let row = (i.trailing_zeros() as usize).min(ROWS - 1);
                rows[row] = rng.gen_range(-1.0..1.0);
                wave.push(rows.iter().sum::<f64>() / ROWS as f64 * 3.0);
            }
            wave
        }
    }
}

// ── Table set ───────────────────────────────────────────────

/// Every fixed table the kernels read. Built once per synth.
#[derive(Debug, Clone)]
pub struct WaveTables {
    chip: Vec<Wavetable>,
    noise: Vec<Wavetable>,
    /// `SINE_WAVE_LENGTH + 1` samples so interpolation never wraps.
    sine: Vec<f64>,
}

impl WaveTables {
    pub fn new(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let chip = CHIP_WAVES
            .iter()
            .map(|&w| Wavetable::from_raw(chip_wave_raw(w)))
            .collect();
        // Noise plays sample by sample rather than through its integral, but
        // centring still helps.
        let noise = NOISE_WAVES
            .iter()
            .map(|&w| Wavetable::from_raw(noise_raw(w, &mut rng)))
            .collect();
        let sine = (0..=SINE_WAVE_LENGTH)
            .map(|i| (2.0 * PI * i as f64 / SINE_WAVE_LENGTH as f64).sin())
            .collect();
        WaveTables { chip, noise, sine }
    }

    pub fn chip(&self, wave: ChipWave) -> &Wavetable {
        let index = CHIP_WAVES.iter().position(|&w| w == wave).unwrap_or(0);
        &self.chip[index]
    }

    pub fn noise(&self, wave: NoiseWave) -> &Wavetable {
        let index = NOISE_WAVES.iter().position(|&w| w == wave).unwrap_or(0);
        &self.noise[index]
    }

    /// Sine of `phase` cycles, any real phase.
    #[inline]
    pub fn sine(&self, phase: f64) -> f64 {
        let pos = phase.rem_euclid(1.0) * SINE_WAVE_LENGTH as f64;
        let i = (pos as usize).min(SINE_WAVE_LENGTH - 1);
        let frac = pos - i as f64;
        self.sine[i] + (self.sine[i + 1] - self.sine[i]) * frac
    }
}
