//! Picked string: a delay-line loop (Karplus-Strong family).
//!
//! The loop is seeded with one period of the instrument's harmonics wave.
//! Inside the loop a fractional-delay all-pass tunes between whole samples,
//! a phase-inverting all-pass adds dispersion and a high shelf sets how fast
//! the string dulls and decays. The delay length is shortened by the phase
//! delay those filters add at the fundamental so the loop stays in tune.

use std::f64::consts::PI;

use crate::dsp::delay_line::DelayLine;
use crate::dsp::filter::{DynamicBiquad, FilterCoefficients, FrequencyResponse, sanitize_state};
use crate::dsp::oscillator::Wavetable;
use crate::dsp::tone::Tone;

/// Dispersion all-pass corner, in multiples of the fundamental.
const DISPERSION_FREQ_MULT: f64 = 4.0;
const SHELF_HZ: f64 = 4000.0;
/// A jump of more than this many octaves between runs re-plucks the string.
const RESEED_OCTAVES: f64 = 0.02;
const MIN_DELAY_LENGTH: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PickedString {
    pub delay_line: DelayLine,
    pub delay_length: f64,
    pub delay_length_delta: f64,
    /// Delay length the previous run ended on; 0 before the first run.
    pub prev_delay_length: f64,
    dispersion: DynamicBiquad,
    shelf: DynamicBiquad,
    fraction_x1: f64,
    fraction_y1: f64,
}

/// Per-run inputs for one string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StringRun {
    pub sample_rate: f64,
    /// Cycles per sample at the run start and end.
    pub phase_delta_start: f64,
    pub phase_delta_end: f64,
    /// `0..=1` at the run start and end.
    pub sustain_start: f64,
    pub sustain_end: f64,
    pub run_length: usize,
}

/// Whether a change of loop length is a new pluck rather than a glide.
pub fn needs_reseed(prev_length: f64, next_length: f64) -> bool {
    prev_length <= 0.0 || (next_length / prev_length).log2().abs() > RESEED_OCTAVES
}

struct LoopDesign {
    dispersion: FilterCoefficients,
    shelf: FilterCoefficients,
    length: f64,
}

fn design_loop(sample_rate: f64, phase_delta: f64, sustain: f64) -> LoopDesign {
    let phase_delta = phase_delta.max(1.0e-6);
    let fundamental = 2.0 * PI * phase_delta;
    let corner = (fundamental * DISPERSION_FREQ_MULT).clamp(0.01, PI * 0.9);
    let dispersion = FilterCoefficients::all_pass_1st_order_invert_phase_above(corner);

    let sustain = sustain.clamp(0.0, 1.0);
    // Decay to -60 dB takes 0.1 s at no sustain, 10 s at full sustain.
    let t60 = 0.1 * 100.0_f64.powf(sustain);
    let period_seconds = 1.0 / (phase_delta * sample_rate);
    let loop_gain = 0.001_f64.powf(period_seconds / t60);
    let brightness = 0.25 + 0.7 * sustain;
    let shelf_corner = (2.0 * PI * SHELF_HZ / sample_rate).min(PI * 0.9);
    let mut shelf = FilterCoefficients::high_shelf_1st_order(shelf_corner, brightness);
    shelf.b[0] *= loop_gain;
    shelf.b[1] *= loop_gain;

    let phase_delay = |c: &FilterCoefficients| {
        -FrequencyResponse::analyze(c, fundamental).angle() / fundamental
    };
    let length = (1.0 / phase_delta - phase_delay(&dispersion) - phase_delay(&shelf))
        .max(MIN_DELAY_LENGTH);
    LoopDesign {
        dispersion,
        shelf,
        length,
    }
}

impl PickedString {
    /// Clear for reuse, keeping the delay line's allocation.
    pub fn reset(&mut self) {
        let mut line = std::mem::take(&mut self.delay_line);
        line.reset();
        *self = PickedString {
            delay_line: line,
            ..Default::default()
        };
    }

    /// Prepare a run: retune the loop, grow the line, and pluck if needed.
    pub fn update(&mut self, wave: &Wavetable, run: &StringRun) {
        let start = design_loop(run.sample_rate, run.phase_delta_start, run.sustain_start);
        let end = design_loop(run.sample_rate, run.phase_delta_end, run.sustain_end);

        let longest = start.length.max(end.length);
        self.delay_line.ensure_capacity(longest.ceil() as usize + 4);

        if needs_reseed(self.prev_delay_length, start.length) {
            self.seed(wave, start.length);
        }

        let rate = if run.run_length > 0 {
            1.0 / run.run_length as f64
        } else {
            0.0
        };
        self.dispersion
            .load_coefficients_with_gradient(&start.dispersion, &end.dispersion, rate, false);
        self.shelf
            .load_coefficients_with_gradient(&start.shelf, &end.shelf, rate, false);
        self.delay_length = start.length;
        self.delay_length_delta = (end.length - start.length) * rate;
        self.prev_delay_length = end.length;
    }

    /// Crossfade one period of `wave` into the loop with a cubic window: the
    /// part read first keeps the old content, the part read last is all new.
    fn seed(&mut self, wave: &Wavetable, length: f64) {
        let count = (length.ceil() as usize + 2).min(self.delay_line.len());
        let head = self.delay_line.position();
        for i in 1..=count {
            let x = (i as f64 / length).min(1.0);
            let fresh = wave.sample_raw(1.0 - x);
            let w = 1.0 - x;
            let window = w * w * (3.0 - 2.0 * w);
            let index = head.wrapping_sub(i);
            let old = self.delay_line.at(index);
            self.delay_line.set(index, old + (fresh - old) * window);
        }
    }

    #[inline]
    fn next(&mut self) -> f64 {
        let whole = (self.delay_length - 0.5).floor().max(1.0);
        let fraction = self.delay_length - whole;
        let g = (1.0 - fraction) / (1.0 + fraction);

        let x = self.delay_line.read(whole as usize);
        let y = g * x + self.fraction_x1 - g * self.fraction_y1;
        self.fraction_x1 = x;
        self.fraction_y1 = y;

        let looped = self.shelf.process(self.dispersion.process(y));
        self.delay_line.write(looped);
        self.delay_length += self.delay_length_delta;
        y
    }

    fn sanitize(&mut self) {
        self.delay_line.sanitize();
        self.dispersion.sanitize();
        self.shelf.sanitize();
        self.fraction_x1 = sanitize_state(self.fraction_x1);
        self.fraction_y1 = sanitize_state(self.fraction_y1);
    }
}

pub fn render(tone: &mut Tone, buffer: &mut [f64]) {
    let two_voices = tone.unison_voices > 1;
    let sign = tone.unison_sign;
    let mut expression = tone.expression;
    let expression_delta = tone.expression_delta;
    let Tone {
        picked_strings,
        note_filter,
        ..
    } = tone;
    let [first, second] = picked_strings;
    if first.delay_line.is_empty() {
        return;
    }

    for out in buffer.iter_mut() {
        let mut wave = first.next();
        if two_voices && !second.delay_line.is_empty() {
            wave += sign * second.next();
        }
        *out += note_filter.process(wave) * expression;
        expression += expression_delta;
    }

    first.sanitize();
    if two_voices {
        second.sanitize();
    }
    tone.expression = expression;
}
