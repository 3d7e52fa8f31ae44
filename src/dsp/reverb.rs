//! Reverb effect — four-tap feedback delay network.
//!
//! One delay line holds four interleaved loops, read at fixed offsets from
//! the head. The four taps are mixed through a Hadamard matrix, shelved to
//! darken each pass, and written back at the other taps' positions.

use std::f64::consts::PI;

use crate::config::{ATTENUATION_THRESHOLD, REVERB_DELAY_BUFFER_SIZE, REVERB_SHELF_GAIN, REVERB_SHELF_HZ};
use crate::dsp::delay_line::DelayLine;
use crate::dsp::filter::{DynamicBiquad, FilterCoefficients};
use crate::dsp::ramp::Ramp;

// Tap offsets (at 44100 Hz); mutually prime-ish so the loops don't align.
const TAP_OFFSETS: [usize; 3] = [3041, 6426, 10907];

/// Feedback multiplier for a reverb amount in `0..=1`.
pub fn reverb_feedback(amount: f64) -> f64 {
    amount.clamp(0.0, 1.0).powf(0.667) * 0.425
}

/// Samples until the network falls below the audibility threshold. Each
/// pass through the matrix scales energy by `2 * feedback`.
pub fn reverb_tail_samples(amount: f64) -> f64 {
    let gain = 2.0 * reverb_feedback(amount);
    let pass = REVERB_DELAY_BUFFER_SIZE as f64 / 4.0;
    if gain <= 0.0 {
        return pass;
    }
    (ATTENUATION_THRESHOLD.ln() / gain.ln() + 1.0) * pass
}

#[derive(Debug, Clone, Default)]
pub struct Reverb {
    line: DelayLine,
    shelves: [DynamicBiquad; 4],
}

impl Reverb {
    pub fn allocate(&mut self) {
        self.line.ensure_capacity(REVERB_DELAY_BUFFER_SIZE);
    }

    pub fn delay_samples(&self) -> usize {
        self.line.len()
    }

    /// `amount` is the reverb setting at the run start and end; `input_mult`
    /// scales what enters the network.
    pub fn process(
        &mut self,
        left: &mut [f64],
        right: &mut [f64],
        amount: (f64, f64),
        input_mult: (f64, f64),
        sample_rate: f64,
    ) {
        if self.line.is_empty() {
            return;
        }
        let n = left.len();
        let corner = (2.0 * PI * REVERB_SHELF_HZ / sample_rate).min(PI * 0.9);
        let shelf = FilterCoefficients::high_shelf_1st_order(corner, REVERB_SHELF_GAIN);
        for s in &mut self.shelves {
            s.load_coefficients(&shelf);
        }
        let mut feedback = Ramp::between(reverb_feedback(amount.0), reverb_feedback(amount.1), n);
        let mut input_mult = Ramp::between(input_mult.0, input_mult.1, n);

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let head = self.line.position();
            let positions = [
                head,
                head.wrapping_add(TAP_OFFSETS[0]),
                head.wrapping_add(TAP_OFFSETS[1]),
                head.wrapping_add(TAP_OFFSETS[2]),
            ];
            let [s0, s1, s2, s3] = positions.map(|p| self.line.at(p));

            let mult = input_mult.next();
            let t0 = -(s0 + *l * mult) + s1;
            let t1 = -(s0 + *r * mult) - s1;
            let t2 = -s2 + s3;
            let t3 = -s2 - s3;
            let fb = feedback.next();
            let mixed = [(t0 + t2) * fb, (t1 + t3) * fb, (t0 - t2) * fb, (t1 - t3) * fb];

            // Each loop writes one tap ahead, so the network recirculates.
            self.line.set(positions[1], self.shelves[0].process(mixed[0]));
            self.line.set(positions[2], self.shelves[1].process(mixed[1]));
            self.line.set(positions[3], self.shelves[2].process(mixed[2]));
            self.line.set(positions[0], self.shelves[3].process(mixed[3]));
            self.line.advance();

            *l += s1 + s2 + s3;
            *r += s0 + s2 - s3;
        }

        self.line.sanitize();
        for s in &mut self.shelves {
            s.sanitize();
        }
    }

    pub fn clear(&mut self) {
        self.line.clear();
        for s in &mut self.shelves {
            s.reset_output();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_tail(amount: f64, samples: usize) -> Vec<f64> {
        let mut reverb = Reverb::default();
        reverb.allocate();
        let mut left = vec![0.0; samples];
        let mut right = vec![0.0; samples];
        left[0] = 1.0;
        right[0] = 1.0;
        for (l, r) in left.chunks_mut(512).zip(right.chunks_mut(512)) {
            reverb.process(l, r, (amount, amount), (1.0, 1.0), 44100.0);
        }
        left
    }

    #[test]
    fn dry_when_amount_is_zero() {
        let tail = impulse_tail(0.0, 20000);
        assert_eq!(tail[0], 1.0);
        assert!(tail[1..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn produces_a_decaying_tail() {
        let tail = impulse_tail(0.5, 44100 * 3);
        let early: f64 = tail[1..44100].iter().map(|v| v.abs()).sum();
        let late: f64 = tail[44100 * 2..].iter().map(|v| v.abs()).sum();
        assert!(early > 0.01, "no reverb tail: {early}");
        assert!(late < early * 0.1, "tail must decay: early {early}, late {late}");
    }

    #[test]
    fn feedback_keeps_the_network_stable() {
        assert!(2.0 * reverb_feedback(1.0) < 1.0);
        let tail = impulse_tail(1.0, 44100 * 4);
        assert!(tail.iter().all(|v| v.is_finite() && v.abs() < 10.0));
    }
}
