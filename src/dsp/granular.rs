//! Granular texture: a cloud of short grains read back from a rolling
//! stereo delay buffer.
//!
//! Grains live in a fixed array and are tracked by a count, so spawning and
//! retiring them never allocates. Each grain reads at a fixed delay behind
//! the write head and fades with its own envelope, evaluated incrementally.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::{DEFAULT_MAX_GRAINS, GRANULAR_MAX_GRAIN_SECONDS, GRANULAR_MAX_RANGE_SECONDS};
use crate::dsp::delay_line::DelayLine;
use crate::dsp::ramp::Ramp;
use crate::song::{GrainEnvelope, GranularSettings};

/// Upper bound on grains spawned per tick; the actual count is
/// `ceil(r1 * r2 * SPAWN_SCALE)` for two uniform randoms.
const SPAWN_SCALE: f64 = 10.0;
const WET_GAIN: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grain {
    /// Samples behind the write head.
    pub delay: usize,
    pub age: usize,
    pub max_age: usize,
    envelope: GrainEnvelope,
    /// Parabolic: value, first difference, second difference.
    /// Raised cosine: cosine now, cosine one step back, recurrence factor.
    state: [f64; 3],
}

impl Default for Grain {
    fn default() -> Self {
        Grain {
            delay: 0,
            age: 0,
            max_age: 0,
            envelope: GrainEnvelope::Parabolic,
            state: [0.0; 3],
        }
    }
}

impl Grain {
    pub fn new(delay: usize, max_age: usize, envelope: GrainEnvelope) -> Self {
        let length = max_age.max(1) as f64;
        let state = match envelope {
            // 4/T² · t(T - t): zero at both ends, 1 in the middle.
            GrainEnvelope::Parabolic => {
                let k = 4.0 / (length * length);
                [0.0, k * (length - 1.0), -2.0 * k]
            }
            GrainEnvelope::RaisedCosineBell => {
                let w = 2.0 * std::f64::consts::PI / length;
                [1.0, w.cos(), 2.0 * w.cos()]
            }
        };
        Grain {
            delay,
            age: 0,
            max_age,
            envelope,
            state,
        }
    }

    /// Envelope value for the current age, then step to the next.
    #[inline]
    pub fn next_amplitude(&mut self) -> f64 {
        self.age += 1;
        match self.envelope {
            GrainEnvelope::Parabolic => {
                let [value, velocity, acceleration] = self.state;
                self.state = [value + velocity, velocity + acceleration, acceleration];
                value
            }
            GrainEnvelope::RaisedCosineBell => {
                let [cos_now, cos_prev, factor] = self.state;
                self.state = [factor * cos_now - cos_prev, cos_now, factor];
                0.5 - 0.5 * cos_now
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.age >= self.max_age
    }
}

#[derive(Debug, Clone)]
pub struct Granular {
    line_l: DelayLine,
    line_r: DelayLine,
    grains: Vec<Grain>,
    grains_in_use: usize,
    rng: SmallRng,
}

impl Granular {
    pub fn new(seed: u64, max_grains: usize) -> Self {
        Granular {
            line_l: DelayLine::new(),
            line_r: DelayLine::new(),
            grains: vec![Grain::default(); max_grains.max(1)],
            grains_in_use: 0,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    pub fn allocate(&mut self, sample_rate: f64) {
        let len = ((GRANULAR_MAX_GRAIN_SECONDS + GRANULAR_MAX_RANGE_SECONDS) * sample_rate).ceil();
        self.line_l.ensure_capacity(len as usize + 2);
        self.line_r.ensure_capacity(len as usize + 2);
    }

    pub fn delay_samples(&self) -> usize {
        self.line_l.len()
    }

    pub fn grains_in_use(&self) -> usize {
        self.grains_in_use
    }

    /// Spawn this tick's grains. The doubled random biases towards few grains.
    pub fn spawn(&mut self, settings: &GranularSettings, sample_rate: f64) {
        if self.line_l.is_empty() {
            return;
        }
        let r1: f64 = self.rng.gen_range(0.0..1.0);
        let r2: f64 = self.rng.gen_range(0.0..1.0);
        let count = (r1 * r2 * SPAWN_SCALE).ceil() as usize;

        let max_grain = GRANULAR_MAX_GRAIN_SECONDS * sample_rate;
        let max_range = GRANULAR_MAX_RANGE_SECONDS * sample_rate;
        let min_seconds = settings.grain_min_seconds.max(0.0);
        let max_seconds = settings.grain_max_seconds.max(min_seconds);
        for _ in 0..count {
            if self.grains_in_use >= self.grains.len() {
                break;
            }
            let seconds = min_seconds + (max_seconds - min_seconds) * self.rng.gen_range(0.0..1.0);
            let length = (seconds * sample_rate).clamp(1.0, max_grain);
            let range = (settings.range_seconds.max(0.0) * sample_rate).min(max_range)
                * self.rng.gen_range(0.0..1.0);
            let delay = (length + range).ceil() as usize;
            self.grains[self.grains_in_use] = Grain::new(delay, length as usize, settings.envelope);
            self.grains_in_use += 1;
        }
    }

    /// Blend the grain cloud into `left`/`right` by `mix`.
    pub fn process(&mut self, left: &mut [f64], right: &mut [f64], mix: (f64, f64)) {
        if self.line_l.is_empty() {
            return;
        }
        let mut mix = Ramp::between(mix.0, mix.1, left.len());
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            self.line_l.write(*l);
            self.line_r.write(*r);

            let mut wet_l = 0.0;
            let mut wet_r = 0.0;
            let mut i = 0;
            while i < self.grains_in_use {
                let grain = &mut self.grains[i];
                let amplitude = grain.next_amplitude() * WET_GAIN;
                wet_l += self.line_l.read(grain.delay) * amplitude;
                wet_r += self.line_r.read(grain.delay) * amplitude;
                if grain.is_done() {
                    self.grains_in_use -= 1;
                    self.grains[i] = self.grains[self.grains_in_use];
                } else {
                    i += 1;
                }
            }

            let m = mix.next();
            *l += (wet_l - *l) * m;
            *r += (wet_r - *r) * m;
        }
        self.line_l.sanitize();
        self.line_r.sanitize();
    }

    pub fn clear(&mut self) {
        self.line_l.clear();
        self.line_r.clear();
        self.grains_in_use = 0;
    }
}

impl Default for Granular {
    fn default() -> Self {
        Granular::new(0, DEFAULT_MAX_GRAINS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_mix_is_dry() {
        let mut granular = Granular::new(7, 64);
        granular.allocate(44100.0);
        let settings = GranularSettings::default();
        let input: Vec<f64> = (0..2000).map(|i| (i as f64 * 0.05).sin()).collect();
        let mut left = input.clone();
        let mut right = input.clone();
        for _ in 0..5 {
            granular.spawn(&settings, 44100.0);
        }
        granular.process(&mut left, &mut right, (0.0, 0.0));
        assert_eq!(left, input);
        assert_eq!(right, input);
    }

    #[test]
    fn grains_retire_and_pool_never_overflows() {
        let mut granular = Granular::new(1, 8);
        granular.allocate(44100.0);
        let settings = GranularSettings {
            grain_min_seconds: 0.001,
            grain_max_seconds: 0.002,
            ..Default::default()
        };
        for _ in 0..50 {
            granular.spawn(&settings, 44100.0);
        }
        assert!(granular.grains_in_use() <= 8);
        let mut left = vec![1.0; 200];
        let mut right = vec![1.0; 200];
        granular.process(&mut left, &mut right, (1.0, 1.0));
        assert_eq!(granular.grains_in_use(), 0, "grains of at most 88 samples must be gone");
    }

    #[test]
    fn envelopes_start_at_zero_and_peak_at_one() {
        for envelope in [GrainEnvelope::Parabolic, GrainEnvelope::RaisedCosineBell] {
            let mut grain = Grain::new(10, 100, envelope);
            let values: Vec<f64> = (0..100).map(|_| grain.next_amplitude()).collect();
            assert_relative_eq!(values[0], 0.0, epsilon = 1e-12);
            assert_relative_eq!(values[50], 1.0, epsilon = 1e-9);
            assert!(values.iter().all(|&v| v > -1e-9 && v < 1.0 + 1e-9), "{envelope:?}");
            assert!(grain.is_done());
        }
    }

    #[test]
    fn spawn_counts_follow_the_biased_distribution() {
        let mut granular = Granular::new(99, 100_000);
        granular.allocate(44100.0);
        let settings = GranularSettings::default();
        let ticks = 4000;
        for _ in 0..ticks {
            granular.spawn(&settings, 44100.0);
        }
        // E[ceil(10·r1·r2)] is a little over 3.
        let mean = granular.grains_in_use() as f64 / ticks as f64;
        assert!((2.8..3.5).contains(&mean), "mean grains per tick {mean}");
    }
}
