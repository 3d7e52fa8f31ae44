//! Echo effect — tempo-synced stereo feedback delay with a high shelf in the
//! feedback path and optional ping-pong between the sides.

use std::f64::consts::PI;

use crate::config::{
    ATTENUATION_THRESHOLD, ECHO_DELAY_MAX, ECHO_DELAY_STEP_TICKS, ECHO_SHELF_GAIN, ECHO_SHELF_HZ,
};
use crate::dsp::delay_line::DelayLine;
use crate::dsp::filter::{DynamicBiquad, FilterCoefficients};
use crate::dsp::ramp::Ramp;

/// Feedback is capped below 1 so a tail always dies.
const MAX_FEEDBACK: f64 = 0.99;

/// Delay in samples for a delay setting at the current tempo.
pub fn echo_delay_samples(echo_delay: u32, samples_per_tick: f64) -> f64 {
    (echo_delay.min(ECHO_DELAY_MAX) + 1) as f64 * ECHO_DELAY_STEP_TICKS * samples_per_tick
}

/// Samples until a repeat falls below the audibility threshold.
pub fn echo_tail_samples(sustain: f64, delay_samples: f64) -> f64 {
    let feedback = sustain.clamp(0.0, MAX_FEEDBACK);
    if feedback <= 0.0 {
        return delay_samples;
    }
    let repeats = ATTENUATION_THRESHOLD.ln() / feedback.ln();
    (repeats + 1.0) * delay_samples
}

#[derive(Debug, Clone, Default)]
pub struct Echo {
    lines: [DelayLine; 2],
    shelves: [DynamicBiquad; 2],
    /// Delay the last run ended on; 0 before the first run.
    delay: f64,
}

/// Per-run echo controls, each at the run start and end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoRun {
    pub sustain: (f64, f64),
    pub ping_pong: (f64, f64),
    /// Scales what enters the delay line; fades to 0 while flushing.
    pub input_mult: (f64, f64),
    pub delay_samples: f64,
    pub sample_rate: f64,
}

impl Echo {
    /// Grow the lines to hold `max_delay_samples`. Existing echoes keep their
    /// timing.
    pub fn allocate(&mut self, max_delay_samples: f64) {
        let len = max_delay_samples.ceil() as usize + 2;
        for line in &mut self.lines {
            line.ensure_capacity(len);
        }
    }

    pub fn delay_samples(&self) -> usize {
        self.lines[0].len()
    }

    pub fn process(&mut self, left: &mut [f64], right: &mut [f64], run: &EchoRun) {
        if self.lines[0].is_empty() {
            return;
        }
        let n = left.len();
        let limit = (self.lines[0].len() - 2) as f64;
        let target = run.delay_samples.clamp(1.0, limit);
        let start = if self.delay > 0.0 { self.delay.min(limit) } else { target };
        let mut delay = Ramp::between(start, target, n);
        self.delay = target;

        let corner = (2.0 * PI * ECHO_SHELF_HZ / run.sample_rate).min(PI * 0.9);
        let shelf = FilterCoefficients::high_shelf_1st_order(corner, ECHO_SHELF_GAIN);
        for s in &mut self.shelves {
            s.load_coefficients(&shelf);
        }

        let clamp = |v: f64| v.clamp(0.0, MAX_FEEDBACK);
        let mut feedback = Ramp::between(clamp(run.sustain.0), clamp(run.sustain.1), n);
        let mut ping_pong = Ramp::between(run.ping_pong.0, run.ping_pong.1, n);
        let mut input_mult = Ramp::between(run.input_mult.0, run.input_mult.1, n);

        let [line_l, line_r] = &mut self.lines;
        let [shelf_l, shelf_r] = &mut self.shelves;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let d = delay.next();
            let tap_l = line_l.read_fractional(d);
            let tap_r = line_r.read_fractional(d);
            let fb = feedback.next();
            let pp = ping_pong.next().clamp(0.0, 1.0);
            let into_l = shelf_l.process(tap_l + (tap_r - tap_l) * pp) * fb;
            let into_r = shelf_r.process(tap_r + (tap_l - tap_r) * pp) * fb;

            let mult = input_mult.next();
            line_l.write(*l * mult + into_l);
            line_r.write(*r * mult + into_r);
            *l += into_l;
            *r += into_r;
        }

        for line in &mut self.lines {
            line.sanitize();
        }
        for s in &mut self.shelves {
            s.sanitize();
        }
    }

    pub fn clear(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
        for s in &mut self.shelves {
            s.reset_output();
        }
        self.delay = 0.0;
    }
}
