//! Stereo EQ: one filter cascade per side, used per instrument and for the
//! song-level EQ on the master bus.

use crate::dsp::filter::{FilterCascade, PointScale};
use crate::song::FilterSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EqFilter {
    left: FilterCascade,
    right: FilterCascade,
}

impl EqFilter {
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Load a run. `freq_mult` scales every point's frequency setting at the
    /// run start and end.
    pub fn load(
        &mut self,
        sample_rate: f64,
        start: &FilterSettings,
        end: &FilterSettings,
        run_length: usize,
        freq_mult: (f64, f64),
    ) {
        let scale = |_| {
            (
                PointScale {
                    freq: freq_mult.0,
                    gain: 1.0,
                },
                PointScale {
                    freq: freq_mult.1,
                    gain: 1.0,
                },
            )
        };
        self.left.load(sample_rate, start, end, run_length, scale);
        self.right.load(sample_rate, start, end, run_length, scale);
    }

    pub fn process(&mut self, left: &mut [f64], right: &mut [f64]) {
        if self.left.is_empty() {
            return;
        }
        for l in left.iter_mut() {
            *l = self.left.process(*l);
        }
        for r in right.iter_mut() {
            *r = self.right.process(*r);
        }
        self.left.sanitize();
        self.right.sanitize();
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::filter::point_coefficients;
    use crate::song::{FilterControlPoint, FilterKind};

    #[test]
    fn impulse_response_matches_the_biquad() {
        let point = FilterControlPoint::new(FilterKind::LowPass, 20.0, 7.0);
        let settings = FilterSettings::single(point);
        let sr = 44100.0;
        let mut eq = EqFilter::default();
        eq.load(sr, &settings, &settings, 4096, (1.0, 1.0));

        let mut left = vec![0.0; 4096];
        let mut right = vec![0.0; 4096];
        left[0] = 1.0;
        right[0] = 1.0;
        eq.process(&mut left, &mut right);

        // Direct Form I by hand.
        let c = point_coefficients(&point, sr, 1.0, 1.0);
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        for (i, &got) in left.iter().enumerate() {
            let x = if i == 0 { 1.0 } else { 0.0 };
            let y = c.b[0] * x + c.b[1] * x1 + c.b[2] * x2 - c.a[1] * y1 - c.a[2] * y2;
            x2 = x1;
            x1 = x;
            y2 = y1;
            y1 = y;
            assert!((got - y).abs() < 1e-12, "sample {i}: {got} vs {y}");
        }
        assert_eq!(left, right);
        assert!(left[4000..].iter().all(|v| v.abs() < 1e-9), "response must settle");
    }

    #[test]
    fn empty_settings_pass_through() {
        let mut eq = EqFilter::default();
        let empty = FilterSettings::default();
        eq.load(44100.0, &empty, &empty, 4, (1.0, 1.0));
        let mut left = [0.1, 0.2, 0.3, 0.4];
        let mut right = left;
        eq.process(&mut left, &mut right);
        assert_eq!(left, [0.1, 0.2, 0.3, 0.4]);
    }
}
