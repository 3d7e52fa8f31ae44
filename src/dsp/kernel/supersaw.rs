//! Supersaw: a stack of detuned PolyBLEP saws.
//!
//! Voice 0 is the centre voice at full level; the others sit at the
//! dynamism level. Shape mixes in a half-cycle shifted copy, turning each saw
//! towards a square.

use crate::dsp::kernel::pulse_width::blep_saw;
use crate::dsp::kernel::wrap_phase;
use crate::dsp::tone::Tone;

/// Detune of each voice in units of the spread setting, semitones at full spread.
pub const SUPERSAW_DETUNES: [f64; crate::config::SUPERSAW_VOICES] =
    [0.0, -0.12, 0.12, -0.35, 0.35, -0.6, 0.6];

/// Golden-ratio phase offsets so a fresh stack does not start in unison.
fn spread_phases<const VOICES: usize>(tone: &mut Tone) {
    for v in 0..VOICES {
        tone.phases[v] = wrap_phase(v as f64 * 0.618_033_988_75);
    }
}

pub fn render<const VOICES: usize>(tone: &mut Tone, buffer: &mut [f64]) {
    if tone.fresh {
        spread_phases::<VOICES>(tone);
    }
    let mut phases = [0.0; VOICES];
    let mut deltas = [0.0; VOICES];
    let mut scales = [1.0; VOICES];
    phases.copy_from_slice(&tone.phases[..VOICES]);
    deltas.copy_from_slice(&tone.phase_deltas[..VOICES]);
    scales.copy_from_slice(&tone.phase_delta_scales[..VOICES]);

    let mut dynamism = tone.supersaw_dynamism;
    let mut shape = tone.supersaw_shape;
    let mut expression = tone.expression;

    for out in buffer.iter_mut() {
        let mut saw = 0.0;
        let mut shifted = 0.0;
        for v in 0..VOICES {
            let level = if v == 0 { 1.0 } else { dynamism };
            saw += level * blep_saw(phases[v], deltas[v]);
            shifted += level * blep_saw(wrap_phase(phases[v] + 0.5), deltas[v]);
            phases[v] = wrap_phase(phases[v] + deltas[v]);
            deltas[v] *= scales[v];
        }
        let wave = saw - shape * shifted;

        *out += tone.note_filter.process(wave) * expression;
        expression += tone.expression_delta;
        dynamism += tone.supersaw_dynamism_delta;
        shape += tone.supersaw_shape_delta;
    }

    tone.phases[..VOICES].copy_from_slice(&phases);
    tone.phase_deltas[..VOICES].copy_from_slice(&deltas);
    tone.supersaw_dynamism = dynamism;
    tone.supersaw_shape = shape;
    tone.expression = expression;
}
