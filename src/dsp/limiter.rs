//! Limiter — master-bus envelope follower with a three-segment gain curve.
//!
//! Tracks a running `limit` level from the stereo peak, rising quickly and
//! falling slowly, and divides the signal down once that level passes the
//! compression threshold.

use crate::song::LimiterSettings;

/// Gain for a tracked level.
///
/// Unity below the compression threshold. Between the thresholds the level
/// maps to `threshold + (limit - threshold) * ratio`. Above the limit
/// threshold output is pinned at the curve's peak.
#[inline]
pub fn limiter_gain(limit: f64, settings: &LimiterSettings) -> f64 {
    let compression = settings.compression_threshold.max(1e-9);
    let limit_at = settings.limit_threshold.max(compression);
    if limit <= compression {
        return 1.0;
    }
    let ratio = settings.compression_ratio.max(0.0);
    if limit < limit_at {
        (compression + (limit - compression) * ratio) / limit
    } else {
        let peak = compression + (limit_at - compression) * ratio;
        peak / limit
    }
}

#[derive(Debug, Clone)]
pub struct Limiter {
    settings: LimiterSettings,
    sample_rate: f64,
    /// Per-sample approach coefficients.
    rise: f64,
    decay: f64,
    limit: f64,
}

impl Limiter {
    pub fn new(settings: &LimiterSettings, sample_rate: f64) -> Self {
        let mut limiter = Limiter {
            settings: *settings,
            sample_rate,
            rise: 0.0,
            decay: 0.0,
            limit: 0.0,
        };
        limiter.configure(settings, sample_rate);
        limiter
    }

    /// Pick up new settings; the tracked level carries over.
    pub fn configure(&mut self, settings: &LimiterSettings, sample_rate: f64) {
        if self.settings == *settings && self.sample_rate == sample_rate && self.rise > 0.0 {
            return;
        }
        self.settings = *settings;
        self.sample_rate = sample_rate;
        self.rise = 1.0 - 0.5_f64.powf(settings.rise.max(0.0) / sample_rate);
        self.decay = 1.0 - 0.5_f64.powf(settings.decay.max(0.0) / sample_rate);
    }

    /// The tracked level.
    pub fn limit(&self) -> f64 {
        self.limit
    }

    /// Limit a stereo block in place, applying the master gain.
    pub fn process(&mut self, left: &mut [f64], right: &mut [f64]) {
        let master = self.settings.master_gain;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let peak = l.abs().max(r.abs());
            // The fall speeds up with the level so loud transients recover.
            let rate = if self.limit < peak {
                self.rise
            } else {
                self.decay * (1.0 + self.limit)
            };
            self.limit += (peak - self.limit) * rate.min(1.0);
            if !self.limit.is_finite() {
                self.limit = 0.0;
            }
            let gain = limiter_gain(self.limit, &self.settings) * master;
            *l *= gain;
            *r *= gain;
        }
    }

    pub fn reset(&mut self) {
        self.limit = 0.0;
    }
}
