//! Bitcrusher: sample-and-hold downsampling plus quantization, with
//! out-of-range samples folded back instead of clipped.

use crate::dsp::filter::sanitize_state;
use crate::dsp::ramp::{Ramp, ScaleRamp};

/// Hold rate at frequency setting 0.
const BASE_HZ: f64 = 44100.0;
/// Octaves of hold rate per frequency step.
const OCTAVE_STEP: f64 = 0.5;
/// Quantization levels per unit at setting 0 are `2^QUANTIZATION_BITS`.
const QUANTIZATION_BITS: f64 = 8.0;
pub const QUANTIZATION_MAX: f64 = 7.0;

/// Hold phase advance per output sample for a frequency setting.
pub fn hold_phase_delta(freq_setting: f64, sample_rate: f64) -> f64 {
    (BASE_HZ * 2.0_f64.powf(-freq_setting.max(0.0) * OCTAVE_STEP) / sample_rate).min(1.0)
}

/// Quantization step count per unit and fold level for a quantization setting.
pub fn quantization(setting: f64) -> (f64, f64) {
    let q = setting.clamp(0.0, QUANTIZATION_MAX);
    let scale = 2.0_f64.powf(QUANTIZATION_BITS - q);
    let fold_level = 1.5_f64.powf(QUANTIZATION_MAX - q);
    (scale, fold_level)
}

/// Triangle fold into `-level..=level`.
#[inline]
fn fold(x: f64, level: f64) -> f64 {
    let period = 4.0 * level;
    let shifted = (x + level).rem_euclid(period);
    if shifted < 2.0 * level {
        shifted - level
    } else {
        3.0 * level - shifted
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Side {
    prev_input: f64,
    held: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bitcrusher {
    phase: f64,
    left: Side,
    right: Side,
}

impl Bitcrusher {
    /// `freq` and `quantization` are settings at the run start and end.
    pub fn process(
        &mut self,
        left: &mut [f64],
        right: &mut [f64],
        freq: (f64, f64),
        quantization_setting: (f64, f64),
        sample_rate: f64,
    ) {
        let n = left.len();
        let mut phase_delta = ScaleRamp::between(
            hold_phase_delta(freq.0, sample_rate),
            hold_phase_delta(freq.1, sample_rate),
            n,
        );
        let (scale0, fold0) = quantization(quantization_setting.0);
        let (scale1, fold1) = quantization(quantization_setting.1);
        let mut scale = ScaleRamp::between(scale0, scale1, n);
        let mut fold_level = Ramp::between(fold0, fold1, n);

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let delta = phase_delta.next();
            let scale = scale.next();
            let fold_level = fold_level.next();
            self.phase += delta;
            if self.phase >= 1.0 {
                self.phase -= self.phase.floor();
                // How far back inside this sample the hold point fell.
                let ratio = if delta > 0.0 { self.phase / delta } else { 0.0 };
                for (side, x) in [(&mut self.left, *l), (&mut self.right, *r)] {
                    let at_hold = x + (side.prev_input - x) * ratio;
                    side.held = (fold(at_hold, fold_level) * scale).round() / scale;
                }
            }
            self.left.prev_input = *l;
            self.right.prev_input = *r;
            *l = self.left.held;
            *r = self.right.held;
        }
        for side in [&mut self.left, &mut self.right] {
            side.prev_input = sanitize_state(side.prev_input);
            side.held = sanitize_state(side.held);
        }
    }

    pub fn reset(&mut self) {
        *self = Bitcrusher::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_reflects_at_the_level() {
        assert_eq!(fold(0.5, 1.0), 0.5);
        assert!((fold(1.25, 1.0) - 0.75).abs() < 1e-12);
        assert!((fold(-1.5, 1.0) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn low_rate_holds_samples() {
        let mut crusher = Bitcrusher::default();
        let mut left: Vec<f64> = (0..64).map(|i| i as f64 / 64.0).collect();
        let mut right = left.clone();
        // Setting 4 holds for four samples at 44.1 kHz.
        crusher.process(&mut left, &mut right, (4.0, 4.0), (0.0, 0.0), 44100.0);
        let distinct = left.windows(2).filter(|w| w[0] != w[1]).count();
        assert!((14..=17).contains(&distinct), "{distinct} changes");
    }

    #[test]
    fn coarse_quantization_snaps_to_steps() {
        let mut crusher = Bitcrusher::default();
        let mut left: Vec<f64> = (0..100).map(|i| (i as f64 * 0.1).sin() * 0.9).collect();
        let mut right = left.clone();
        crusher.process(&mut left, &mut right, (0.0, 0.0), (7.0, 7.0), 44100.0);
        let (scale, _) = quantization(7.0);
        for v in left {
            assert!(((v * scale).round() - v * scale).abs() < 1e-9);
        }
    }
}
