//! Biquad filters with per-sample coefficient gradients.
//!
//! Coefficients are computed at the start and end of every run and the
//! filter walks between them sample by sample, so sweeping cutoffs stay
//! smooth. Formulas follow the Audio EQ Cookbook (Robert Bristow-Johnson),
//! normalized so `a[0] == 1`.

use std::f64::consts::PI;

use crate::config::{
    EPSILON, FILTER_FREQ_REFERENCE_HZ, FILTER_FREQ_REFERENCE_SETTING, FILTER_FREQ_STEP,
    FILTER_GAIN_CENTER, FILTER_GAIN_STEP, FILTER_MIN_HZ, FILTER_STATE_LIMIT, MAX_FILTER_POINTS,
};
use crate::song::{FilterControlPoint, FilterKind, FilterSettings};

/// Normalized IIR coefficients of order 1 or 2. Unused taps stay zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCoefficients {
    pub a: [f64; 3],
    pub b: [f64; 3],
    pub order: usize,
}

impl Default for FilterCoefficients {
    fn default() -> Self {
        FilterCoefficients::identity()
    }
}

impl FilterCoefficients {
    pub fn identity() -> Self {
        FilterCoefficients {
            a: [1.0, 0.0, 0.0],
            b: [1.0, 0.0, 0.0],
            order: 0,
        }
    }

    /// `q` doubles as the resonance gain at the corner.
    pub fn low_pass_2nd_order_butterworth(corner_radians: f64, q: f64) -> Self {
        let alpha = corner_radians.sin() / (2.0 * q);
        let cos = corner_radians.cos();
        let a0 = 1.0 + alpha;
        FilterCoefficients {
            a: [1.0, -2.0 * cos / a0, (1.0 - alpha) / a0],
            b: [(1.0 - cos) / (2.0 * a0), (1.0 - cos) / a0, (1.0 - cos) / (2.0 * a0)],
            order: 2,
        }
    }

    pub fn high_pass_2nd_order_butterworth(corner_radians: f64, q: f64) -> Self {
        let alpha = corner_radians.sin() / (2.0 * q);
        let cos = corner_radians.cos();
        let a0 = 1.0 + alpha;
        FilterCoefficients {
            a: [1.0, -2.0 * cos / a0, (1.0 - alpha) / a0],
            b: [(1.0 + cos) / (2.0 * a0), -(1.0 + cos) / a0, (1.0 + cos) / (2.0 * a0)],
            order: 2,
        }
    }

    /// Bell boost or cut of `linear_gain` at the corner. Bandwidth narrows as
    /// the gain moves away from unity.
    pub fn peak_2nd_order(corner_radians: f64, linear_gain: f64, bandwidth_scale: f64) -> Self {
        let sqrt_gain = linear_gain.sqrt();
        let bandwidth = bandwidth_scale * corner_radians
            / if sqrt_gain >= 1.0 { sqrt_gain } else { 1.0 / sqrt_gain };
        let alpha = (bandwidth * 0.5).tan();
        let cos = corner_radians.cos();
        let a0 = 1.0 + alpha / sqrt_gain;
        FilterCoefficients {
            a: [1.0, -2.0 * cos / a0, (1.0 - alpha / sqrt_gain) / a0],
            b: [
                (1.0 + alpha * sqrt_gain) / a0,
                -2.0 * cos / a0,
                (1.0 - alpha * sqrt_gain) / a0,
            ],
            order: 2,
        }
    }

    /// Unity at DC, `shelf_linear_gain` towards Nyquist.
    pub fn high_shelf_1st_order(corner_radians: f64, shelf_linear_gain: f64) -> Self {
        let tan = (corner_radians * 0.5).tan();
        let sqrt_gain = shelf_linear_gain.sqrt();
        let g = (tan * sqrt_gain - 1.0) / (tan * sqrt_gain + 1.0);
        FilterCoefficients {
            a: [1.0, g, 0.0],
            b: [
                (1.0 + g + shelf_linear_gain * (1.0 - g)) * 0.5,
                (1.0 + g - shelf_linear_gain * (1.0 - g)) * 0.5,
                0.0,
            ],
            order: 1,
        }
    }

    /// All-pass whose low-frequency phase delay is `delay` samples (0..=1).
    pub fn all_pass_1st_order_fractional_delay(delay: f64) -> Self {
        let g = (1.0 - delay) / (1.0 + delay);
        FilterCoefficients {
            a: [1.0, g, 0.0],
            b: [g, 1.0, 0.0],
            order: 1,
        }
    }

    /// All-pass whose phase crosses -90° at the corner.
    pub fn all_pass_1st_order_invert_phase_above(corner_radians: f64) -> Self {
        let g = (corner_radians.sin() - 1.0) / corner_radians.cos();
        FilterCoefficients {
            a: [1.0, g, 0.0],
            b: [g, 1.0, 0.0],
            order: 1,
        }
    }

    /// One-pole low-pass, `y += (x - y) * (1 - decay)` in coefficient form.
    pub fn low_pass_1st_order_simplified(corner_radians: f64) -> Self {
        let g = 2.0 * (corner_radians * 0.5).sin();
        let decay = (1.0 - g.min(1.0)).max(0.0);
        FilterCoefficients {
            a: [1.0, -decay, 0.0],
            b: [1.0 - decay, 0.0, 0.0],
            order: 1,
        }
    }
}

// ── Frequency response ──────────────────────────────────────

/// Complex response `H(e^{jω})` of a coefficient set at one frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyResponse {
    pub real: f64,
    pub imag: f64,
}

impl FrequencyResponse {
    pub fn analyze(coefficients: &FilterCoefficients, radians: f64) -> Self {
        let (mut num_re, mut num_im, mut den_re, mut den_im) = (0.0, 0.0, 0.0, 0.0);
        for k in 0..3 {
            let (sin, cos) = (-(k as f64) * radians).sin_cos();
            num_re += coefficients.b[k] * cos;
            num_im += coefficients.b[k] * sin;
            den_re += coefficients.a[k] * cos;
            den_im += coefficients.a[k] * sin;
        }
        let denom = den_re * den_re + den_im * den_im;
        FrequencyResponse {
            real: (num_re * den_re + num_im * den_im) / denom,
            imag: (num_im * den_re - num_re * den_im) / denom,
        }
    }

    pub fn magnitude(&self) -> f64 {
        self.real.hypot(self.imag)
    }

    /// Phase in radians.
    pub fn angle(&self) -> f64 {
        self.imag.atan2(self.real)
    }
}

// ── Control point conversion ────────────────────────────────

/// Cutoff frequency in Hz for a frequency setting.
pub fn filter_hz(freq_setting: f64) -> f64 {
    FILTER_FREQ_REFERENCE_HZ
        * 2.0_f64.powf((freq_setting - FILTER_FREQ_REFERENCE_SETTING) * FILTER_FREQ_STEP)
}

/// Linear gain for a control point, with `gain_mult` interpolating the
/// exponent from the kind's neutral value. Low/high-pass use their gain as Q,
/// so their neutral is the Butterworth `2^-0.5`.
pub fn filter_linear_gain(point: &FilterControlPoint, gain_mult: f64) -> f64 {
    let power = (point.gain - FILTER_GAIN_CENTER) * FILTER_GAIN_STEP;
    let neutral = match point.kind {
        FilterKind::Peak => 0.0,
        FilterKind::LowPass | FilterKind::HighPass => -0.5,
    };
    2.0_f64.powf(neutral + (power - neutral) * gain_mult)
}

/// Coefficients for a control point with envelope/mod scaling applied.
/// `freq_mult` scales the frequency setting, so 0 lands on the lowest setting
/// rather than on DC.
pub fn point_coefficients(
    point: &FilterControlPoint,
    sample_rate: f64,
    freq_mult: f64,
    gain_mult: f64,
) -> FilterCoefficients {
    let max_hz = sample_rate * 0.5 * 0.95;
    let hz = filter_hz(point.freq * freq_mult).clamp(FILTER_MIN_HZ, max_hz);
    let corner = 2.0 * PI * hz / sample_rate;
    let gain = filter_linear_gain(point, gain_mult);
    match point.kind {
        FilterKind::LowPass => FilterCoefficients::low_pass_2nd_order_butterworth(corner, gain),
        FilterKind::HighPass => FilterCoefficients::high_pass_2nd_order_butterworth(corner, gain),
        FilterKind::Peak => FilterCoefficients::peak_2nd_order(corner, gain, 1.0),
    }
}

// ── Dynamic biquad ──────────────────────────────────────────

/// Direct Form I biquad whose coefficients move towards a target every sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DynamicBiquad {
    a1: f64,
    a2: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1_delta: f64,
    a2_delta: f64,
    b0_delta: f64,
    b1_delta: f64,
    b2_delta: f64,
    /// `b*` step by multiplication instead of addition.
    multiplicative: bool,

    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl DynamicBiquad {
    pub fn new() -> Self {
        DynamicBiquad {
            b0: 1.0,
            b0_delta: 0.0,
            ..Default::default()
        }
    }

    /// Load `start` now and arrive at `end` after `1 / delta_rate` samples.
    ///
    /// With `use_multiplicative_input` the feed-forward coefficients scale
    /// geometrically, which tracks low/high-pass sweeps better; it only applies
    /// when every `b` keeps its sign between start and end.
    pub fn load_coefficients_with_gradient(
        &mut self,
        start: &FilterCoefficients,
        end: &FilterCoefficients,
        delta_rate: f64,
        use_multiplicative_input: bool,
    ) {
        self.a1 = start.a[1];
        self.a2 = start.a[2];
        self.b0 = start.b[0];
        self.b1 = start.b[1];
        self.b2 = start.b[2];
        self.a1_delta = (end.a[1] - start.a[1]) * delta_rate;
        self.a2_delta = (end.a[2] - start.a[2]) * delta_rate;

        let same_sign = (0..3).all(|k| {
            let (s, e) = (start.b[k], end.b[k]);
            (s > 0.0 && e > 0.0) || (s < 0.0 && e < 0.0) || (s == 0.0 && e == 0.0)
        });
        self.multiplicative = use_multiplicative_input && same_sign;
        if self.multiplicative {
            let ratio = |s: f64, e: f64| if s == 0.0 { 1.0 } else { (e / s).powf(delta_rate) };
            self.b0_delta = ratio(start.b[0], end.b[0]);
            self.b1_delta = ratio(start.b[1], end.b[1]);
            self.b2_delta = ratio(start.b[2], end.b[2]);
        } else {
            self.b0_delta = (end.b[0] - start.b[0]) * delta_rate;
            self.b1_delta = (end.b[1] - start.b[1]) * delta_rate;
            self.b2_delta = (end.b[2] - start.b[2]) * delta_rate;
        }
    }

    pub fn load_coefficients(&mut self, coefficients: &FilterCoefficients) {
        self.load_coefficients_with_gradient(coefficients, coefficients, 0.0, false);
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        self.a1 += self.a1_delta;
        self.a2 += self.a2_delta;
        if self.multiplicative {
            self.b0 *= self.b0_delta;
            self.b1 *= self.b1_delta;
            self.b2 *= self.b2_delta;
        } else {
            self.b0 += self.b0_delta;
            self.b1 += self.b1_delta;
            self.b2 += self.b2_delta;
        }
        y
    }

    /// Repair blown-up or denormal state.
    pub fn sanitize(&mut self) {
        self.x1 = sanitize_state(self.x1);
        self.x2 = sanitize_state(self.x2);
        self.y1 = sanitize_state(self.y1);
        self.y2 = sanitize_state(self.y2);
    }

    pub fn reset_output(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }

    /// Coefficients as they stand after the samples processed so far.
    pub fn current_coefficients(&self) -> FilterCoefficients {
        FilterCoefficients {
            a: [1.0, self.a1, self.a2],
            b: [self.b0, self.b1, self.b2],
            order: 2,
        }
    }
}

#[inline]
pub fn sanitize_state(value: f64) -> f64 {
    if !value.is_finite() || value.abs() > FILTER_STATE_LIMIT || value.abs() < EPSILON {
        0.0
    } else {
        value
    }
}

// ── Cascade ─────────────────────────────────────────────────

/// Envelope and mod scaling for one control point at one end of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointScale {
    pub freq: f64,
    pub gain: f64,
}

impl Default for PointScale {
    fn default() -> Self {
        PointScale {
            freq: 1.0,
            gain: 1.0,
        }
    }
}

/// Up to `MAX_FILTER_POINTS` biquads applied in series. Fixed storage so
/// resetting a cascade never frees memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterCascade {
    filters: [DynamicBiquad; MAX_FILTER_POINTS],
    count: usize,
}

impl Default for FilterCascade {
    fn default() -> Self {
        FilterCascade {
            filters: [DynamicBiquad::new(); MAX_FILTER_POINTS],
            count: 0,
        }
    }
}

impl FilterCascade {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Load gradients for every control point. `start` and `end` may differ
    /// when a mod channel moves the filter; points missing from `start`
    /// begin at their `end` value. `scale(i)` gives each point's start and
    /// end scaling.
    pub fn load(
        &mut self,
        sample_rate: f64,
        start: &FilterSettings,
        end: &FilterSettings,
        run_length: usize,
        scale: impl Fn(usize) -> (PointScale, PointScale),
    ) {
        let count = end.points.len().min(MAX_FILTER_POINTS);
        for i in self.count..count {
            self.filters[i].reset_output();
        }
        self.count = count;
        let delta_rate = if run_length > 0 {
            1.0 / run_length as f64
        } else {
            0.0
        };
        for i in 0..count {
            let end_point = &end.points[i];
            let start_point = start.points.get(i).unwrap_or(end_point);
            let (start_scale, end_scale) = scale(i);
            let start_coefficients =
                point_coefficients(start_point, sample_rate, start_scale.freq, start_scale.gain);
            let end_coefficients =
                point_coefficients(end_point, sample_rate, end_scale.freq, end_scale.gain);
            let multiplicative = matches!(end_point.kind, FilterKind::LowPass | FilterKind::HighPass)
                && start_point.kind == end_point.kind;
            self.filters[i].load_coefficients_with_gradient(
                &start_coefficients,
                &end_coefficients,
                delta_rate,
                multiplicative,
            );
        }
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let mut y = x;
        for f in &mut self.filters[..self.count] {
            y = f.process(y);
        }
        y
    }

    pub fn sanitize(&mut self) {
        for f in &mut self.filters[..self.count] {
            f.sanitize();
        }
    }

    pub fn reset(&mut self) {
        for f in &mut self.filters {
            *f = DynamicBiquad::new();
        }
        self.count = 0;
    }
}
