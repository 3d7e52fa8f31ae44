//! Chorus effect — three LFO-swept taps per side on a short delay line.
//!
//! Tap delays are evaluated at the start and end of each run and ramped
//! linearly between, so consecutive runs meet at the same read positions.

use std::f64::consts::PI;

use crate::config::{
    CHORUS_DELAY_OFFSETS, CHORUS_DELAY_RANGE_SECONDS, CHORUS_MAX_DELAY_SECONDS, CHORUS_PERIOD_SECONDS,
    CHORUS_PHASE_OFFSETS,
};
use crate::dsp::delay_line::DelayLine;
use crate::dsp::ramp::Ramp;

const TAPS: usize = 3;
/// Level of each delayed voice relative to the dry signal.
const VOICE_MULT: f64 = 0.577_350_269_189_625_8; // 1/sqrt(3)

#[derive(Debug, Clone, Default)]
pub struct Chorus {
    lines: [DelayLine; 2],
    /// LFO position in seconds, wrapped to the period.
    lfo_seconds: f64,
}

/// Delay in samples of every tap at an LFO position.
fn tap_delays(lfo_seconds: f64, sample_rate: f64) -> [[f64; TAPS]; 2] {
    let angle = 2.0 * PI * lfo_seconds / CHORUS_PERIOD_SECONDS;
    let mut delays = [[0.0; TAPS]; 2];
    for side in 0..2 {
        for tap in 0..TAPS {
            let swing = 0.5 * (angle + CHORUS_PHASE_OFFSETS[side][tap]).sin();
            delays[side][tap] =
                (CHORUS_DELAY_OFFSETS[side][tap] + swing) * CHORUS_DELAY_RANGE_SECONDS * sample_rate;
        }
    }
    delays
}

impl Chorus {
    pub fn allocate(&mut self, sample_rate: f64) {
        let len = (CHORUS_MAX_DELAY_SECONDS * sample_rate).ceil() as usize + 2;
        for line in &mut self.lines {
            line.ensure_capacity(len);
        }
    }

    pub fn delay_samples(&self) -> usize {
        self.lines[0].len()
    }

    /// Process a run in place. `mix` is the wet amount at the run start and end.
    pub fn process(&mut self, left: &mut [f64], right: &mut [f64], mix: (f64, f64), sample_rate: f64) {
        if self.lines[0].is_empty() {
            return;
        }
        let n = left.len();
        let run_seconds = n as f64 / sample_rate;
        let start = tap_delays(self.lfo_seconds, sample_rate);
        let end = tap_delays(self.lfo_seconds + run_seconds, sample_rate);
        let mut taps = [[Ramp::default(); TAPS]; 2];
        for side in 0..2 {
            for tap in 0..TAPS {
                taps[side][tap] = Ramp::between(start[side][tap], end[side][tap], n);
            }
        }
        let mut mix = Ramp::between(mix.0, mix.1, n);
        let combined = 1.0 / (1.0 + TAPS as f64 * VOICE_MULT * VOICE_MULT).sqrt();

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let m = mix.next();
            for (side, sample) in [l, r].into_iter().enumerate() {
                let line = &mut self.lines[side];
                line.write(*sample);
                let [t0, t1, t2] = &mut taps[side];
                let voices = line.read_fractional(t0.next()) - line.read_fractional(t1.next())
                    + line.read_fractional(t2.next());
                let wet = combined * (*sample + VOICE_MULT * voices);
                *sample += (wet - *sample) * m;
            }
        }

        self.lfo_seconds = (self.lfo_seconds + run_seconds) % CHORUS_PERIOD_SECONDS;
        for line in &mut self.lines {
            line.sanitize();
        }
    }

    pub fn clear(&mut self) {
        for line in &mut self.lines {
            line.clear();
        }
        self.lfo_seconds = 0.0;
    }
}
