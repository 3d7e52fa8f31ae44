//! Panning: equal-power gains plus a sub-millisecond delay on the far side.
//!
//! Panning is the first effect in the chain, so it is also where the mono
//! instrument signal becomes stereo.

use std::f64::consts::{FRAC_PI_2, SQRT_2};

use crate::config::PAN_DELAY_SECONDS_MAX;
use crate::dsp::delay_line::DelayLine;
use crate::dsp::ramp::Ramp;

#[derive(Debug, Clone, Default)]
pub struct Panning {
    line: DelayLine,
}

/// Left/right gains for a pan position in `0..=1`. Both are 1 at centre.
pub fn pan_gains(pan: f64) -> (f64, f64) {
    let angle = pan.clamp(0.0, 1.0) * FRAC_PI_2;
    (angle.cos() * SQRT_2, angle.sin() * SQRT_2)
}

/// Left/right delays in samples. The side away from the pan lags.
pub fn pan_delays(pan: f64, pan_delay: f64, sample_rate: f64) -> (f64, f64) {
    let max = PAN_DELAY_SECONDS_MAX * sample_rate * pan_delay.clamp(0.0, 1.0);
    let offset = (pan.clamp(0.0, 1.0) - 0.5) * 2.0;
    (offset.max(0.0) * max, (-offset).max(0.0) * max)
}

impl Panning {
    pub fn allocate(&mut self, sample_rate: f64) {
        self.line
            .ensure_capacity((PAN_DELAY_SECONDS_MAX * sample_rate).ceil() as usize + 4);
    }

    pub fn delay_samples(&self) -> usize {
        self.line.len()
    }

    /// Spread `input` into `left` and `right`, overwriting them.
    pub fn process(
        &mut self,
        input: &[f64],
        left: &mut [f64],
        right: &mut [f64],
        pan: (f64, f64),
        pan_delay: (f64, f64),
        sample_rate: f64,
    ) {
        let n = input.len();
        let (gl0, gr0) = pan_gains(pan.0);
        let (gl1, gr1) = pan_gains(pan.1);
        let (dl0, dr0) = pan_delays(pan.0, pan_delay.0, sample_rate);
        let (dl1, dr1) = pan_delays(pan.1, pan_delay.1, sample_rate);
        let mut gain_l = Ramp::between(gl0, gl1, n);
        let mut gain_r = Ramp::between(gr0, gr1, n);
        if self.line.is_empty() {
            // Not allocated yet: gains only.
            for ((&x, l), r) in input.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
                *l = x * gain_l.next();
                *r = x * gain_r.next();
            }
            return;
        }
        let mut delay_l = Ramp::between(dl0, dl1, n);
        let mut delay_r = Ramp::between(dr0, dr1, n);

        for ((&x, l), r) in input.iter().zip(left.iter_mut()).zip(right.iter_mut()) {
            self.line.write(x);
            *l = self.line.read_fractional(1.0 + delay_l.next()) * gain_l.next();
            *r = self.line.read_fractional(1.0 + delay_r.next()) * gain_r.next();
        }
        self.line.sanitize();
    }

    pub fn clear(&mut self) {
        self.line.clear();
    }
}
