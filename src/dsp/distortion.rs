//! Soft-clipping distortion, oversampled three times.
//!
//! Two extra points between consecutive input samples come from first-order
//! fractional-delay all-pass interpolators. All three points are clipped and
//! averaged back down, which keeps the clipper's harmonics from folding back
//! as hard as a plain per-sample clip would.

use crate::dsp::filter::sanitize_state;
use crate::dsp::ramp::Ramp;

/// All-pass coefficient for a delay of `d` samples, `(1 - d) / (1 + d)`.
const fn all_pass_g(numerator: f64, denominator: f64) -> f64 {
    (denominator - numerator) / (denominator + numerator)
}

const TWO_THIRDS_G: f64 = all_pass_g(2.0, 3.0);
const ONE_THIRD_G: f64 = all_pass_g(1.0, 3.0);

/// Clipper softness for a distortion amount in `0..=1`: 1 is transparent,
/// small values clip hard.
pub fn softness(amount: f64) -> f64 {
    let amount = amount.clamp(0.0, 1.0);
    let curve = 1.0 - 0.895 * (20.0_f64.powf(amount) - 1.0) / 19.0;
    curve * curve
}

/// `x / ((1 - k)|x| + k)`: linear at `k = 1`, saturating towards
/// `±1 / (1 - k)` otherwise. Scaled by `sqrt(k)` to tame the small-signal gain.
#[inline]
fn clip(x: f64, k: f64) -> f64 {
    x / ((1.0 - k) * x.abs() + k) * k.sqrt()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Side {
    prev_input: f64,
    two_thirds_y1: f64,
    one_third_y1: f64,
}

impl Side {
    #[inline]
    fn process(&mut self, x: f64, k: f64) -> f64 {
        let early = TWO_THIRDS_G * x + self.prev_input - TWO_THIRDS_G * self.two_thirds_y1;
        let late = ONE_THIRD_G * x + self.prev_input - ONE_THIRD_G * self.one_third_y1;
        self.two_thirds_y1 = early;
        self.one_third_y1 = late;
        self.prev_input = x;
        (clip(early, k) + clip(late, k) + clip(x, k)) / 3.0
    }

    fn sanitize(&mut self) {
        self.prev_input = sanitize_state(self.prev_input);
        self.two_thirds_y1 = sanitize_state(self.two_thirds_y1);
        self.one_third_y1 = sanitize_state(self.one_third_y1);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distortion {
    left: Side,
    right: Side,
}

impl Distortion {
    pub fn process(&mut self, left: &mut [f64], right: &mut [f64], amount: (f64, f64)) {
        let mut k = Ramp::between(softness(amount.0), softness(amount.1), left.len());
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let kv = k.next();
            *l = self.left.process(*l, kv);
            *r = self.right.process(*r, kv);
        }
        self.left.sanitize();
        self.right.sanitize();
    }

    pub fn reset(&mut self) {
        *self = Distortion::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn no_distortion_is_nearly_transparent_at_low_frequency() {
        assert_relative_eq!(softness(0.0), 1.0);
        let mut d = Distortion::default();
        let input: Vec<f64> = (0..4000).map(|i| 0.5 * (i as f64 * 0.002).sin()).collect();
        let mut left = input.clone();
        let mut right = input.clone();
        d.process(&mut left, &mut right, (0.0, 0.0));
        // Averaging the three points delays the signal by a third of a sample.
        for i in 100..4000 {
            let expected = 0.5 * ((i as f64 - 1.0 / 3.0) * 0.002).sin();
            assert!((left[i] - expected).abs() < 1e-3, "sample {i}: {} vs {expected}", left[i]);
        }
    }

    #[test]
    fn heavy_distortion_is_bounded() {
        let k = softness(1.0);
        assert!(k < 0.02);
        let mut d = Distortion::default();
        let mut left: Vec<f64> = (0..1000).map(|i| 50.0 * (i as f64 * 0.1).sin()).collect();
        let mut right = left.clone();
        d.process(&mut left, &mut right, (1.0, 1.0));
        let bound = k.sqrt() / (1.0 - k) + 1e-9;
        assert!(left.iter().all(|v| v.abs() <= bound), "peak above {bound}");
    }
}
