//! Ring modulation against a fixed-frequency carrier.
//!
//! Toggling the effect fades its mix over a few milliseconds instead of
//! switching, so the chain keeps running it until the fade reaches zero.

use std::f64::consts::PI;

use crate::dsp::kernel::wrap_phase;
use crate::dsp::ramp::Ramp;
use crate::song::{RingModSettings, RingModWave};

const FADE_SECONDS: f64 = 0.005;

#[inline]
fn carrier(wave: RingModWave, phase: f64) -> f64 {
    match wave {
        RingModWave::Sine => (2.0 * PI * phase).sin(),
        RingModWave::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        RingModWave::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        RingModWave::Sawtooth => 2.0 * phase - 1.0,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RingMod {
    phase: f64,
    /// `0..=1`, how far the effect is faded in.
    fade: f64,
}

impl RingMod {
    /// Whether the effect still has to run: on, or fading out.
    pub fn is_audible(&self, enabled: bool) -> bool {
        enabled || self.fade > 0.0
    }

    pub fn process(
        &mut self,
        left: &mut [f64],
        right: &mut [f64],
        settings: &RingModSettings,
        mix: (f64, f64),
        enabled: bool,
        sample_rate: f64,
    ) {
        let n = left.len();
        let fade_step = 1.0 / (FADE_SECONDS * sample_rate).max(1.0);
        let fade_target = if enabled { 1.0 } else { 0.0 };
        let phase_delta = settings.hz.max(0.0) / sample_rate;
        let mut mix = Ramp::between(mix.0, mix.1, n);

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if self.fade < fade_target {
                self.fade = (self.fade + fade_step).min(1.0);
            } else if self.fade > fade_target {
                self.fade = (self.fade - fade_step).max(0.0);
            }
            let m = mix.next().clamp(0.0, 1.0) * self.fade;
            let c = carrier(settings.wave, self.phase);
            self.phase = wrap_phase(self.phase + phase_delta);
            *l += (*l * c - *l) * m;
            *r += (*r * c - *r) * m;
        }
    }

    pub fn reset(&mut self) {
        *self = RingMod::default();
    }
}
