//! Per-run parameter ramps.
//!
//! Every continuously varying parameter is sampled at the start and the end of
//! a run and then stepped once per sample, so the value at the end of one run
//! equals the value at the start of the next and nothing clicks.

/// Linear ramp: `value` after `n` steps is `start + delta * n`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Ramp {
    pub value: f64,
    pub delta: f64,
}

impl Ramp {
    /// Ramp from `start` to `end` over `samples` steps.
    pub fn between(start: f64, end: f64, samples: usize) -> Self {
        let delta = if samples > 0 {
            (end - start) / samples as f64
        } else {
            0.0
        };
        Ramp {
            value: start,
            delta,
        }
    }

    /// Current value, then advance one step.
    #[inline]
    pub fn next(&mut self) -> f64 {
        let v = self.value;
        self.value += self.delta;
        v
    }

    #[inline]
    pub fn advance(&mut self) {
        self.value += self.delta;
    }
}

/// Exponential ramp: `value` after `n` steps is `start * scale^n`.
///
/// Used for frequencies and other quantities perceived logarithmically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleRamp {
    pub value: f64,
    pub scale: f64,
}

impl Default for ScaleRamp {
    fn default() -> Self {
        ScaleRamp {
            value: 0.0,
            scale: 1.0,
        }
    }
}

impl ScaleRamp {
    /// Ramp from `start` to `end` over `samples` steps. Falls back to a
    /// constant when either end is not positive, since the ratio is undefined.
    pub fn between(start: f64, end: f64, samples: usize) -> Self {
        let scale = if samples > 0 && start > 0.0 && end > 0.0 {
            (end / start).powf(1.0 / samples as f64)
        } else {
            1.0
        };
        ScaleRamp {
            value: start,
            scale,
        }
    }

    #[inline]
    pub fn next(&mut self) -> f64 {
        let v = self.value;
        self.value *= self.scale;
        v
    }
}

/// Position of a run inside its tick, as the ratios `0..=1` that envelopes
/// and settings interpolate with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunRatios {
    pub start: f64,
    pub end: f64,
}

impl RunRatios {
    /// `countdown` is the samples left in the tick before this run,
    /// `run_length` the samples this run will render.
    pub fn from_countdown(countdown: f64, run_length: usize, samples_per_tick: f64) -> Self {
        if samples_per_tick <= 0.0 {
            return RunRatios {
                start: 0.0,
                end: 1.0,
            };
        }
        let start = (1.0 - countdown / samples_per_tick).clamp(0.0, 1.0);
        let end = (1.0 - (countdown - run_length as f64) / samples_per_tick).clamp(0.0, 1.0);
        RunRatios { start, end }
    }

    /// Interpolate a per-tick start/end pair to this run.
    #[inline]
    pub fn lerp(&self, tick_start: f64, tick_end: f64) -> (f64, f64) {
        (
            tick_start + (tick_end - tick_start) * self.start,
            tick_start + (tick_end - tick_start) * self.end,
        )
    }
}
