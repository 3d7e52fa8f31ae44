//! Phase-modulation FM with up to four sine operators.
//!
//! The operator count is a const generic so the per-sample loops unroll;
//! [`render_dyn`] picks the instantiation. Modulators always have a higher
//! index than the operators they modulate, so evaluating from the last
//! operator down sees every modulator's output for the current sample.

use crate::config::MAX_FM_OPERATORS;
use crate::dsp::kernel::wrap_phase;
use crate::dsp::oscillator::WaveTables;
use crate::dsp::tone::Tone;
use crate::song::{FmAlgorithm, FmFeedback};

type Routing = [&'static [usize]; 4];

const ONE_FROM_ALL: Routing = [&[1, 2, 3], &[], &[], &[]];
const ONE_FROM_TWO_AND_CHAIN: Routing = [&[1, 2], &[], &[3], &[]];
const CHAIN_THEN_PAIR: Routing = [&[1], &[2, 3], &[], &[]];
const TWO_PAIRS: Routing = [&[2], &[3], &[], &[]];
const STACK: Routing = [&[1], &[2], &[3], &[]];
const THREE_FROM_FOUR: Routing = [&[3], &[3], &[3], &[]];
const ADDITIVE: Routing = [&[], &[], &[], &[]];

/// Operators modulating each operator, and how many leading operators are carriers.
pub fn algorithm_routing(algorithm: FmAlgorithm) -> (&'static Routing, usize) {
    match algorithm {
        FmAlgorithm::OneFromAll => (&ONE_FROM_ALL, 1),
        FmAlgorithm::OneFromTwoAndChain => (&ONE_FROM_TWO_AND_CHAIN, 1),
        FmAlgorithm::ChainThenPair => (&CHAIN_THEN_PAIR, 1),
        FmAlgorithm::TwoPairs => (&TWO_PAIRS, 2),
        FmAlgorithm::Stack => (&STACK, 1),
        FmAlgorithm::ThreeFromFour => (&THREE_FROM_FOUR, 3),
        FmAlgorithm::Additive => (&ADDITIVE, 4),
    }
}

/// `(from, to)` pairs fed back from the previous sample.
pub fn feedback_routing(feedback: FmFeedback) -> &'static [(usize, usize)] {
    match feedback {
        FmFeedback::OneSelf => &[(0, 0)],
        FmFeedback::TwoSelf => &[(1, 1)],
        FmFeedback::ThreeSelf => &[(2, 2)],
        FmFeedback::FourSelf => &[(3, 3)],
        FmFeedback::OneAndTwoSelf => &[(0, 0), (1, 1)],
        FmFeedback::AllSelf => &[(0, 0), (1, 1), (2, 2), (3, 3)],
        FmFeedback::TwoToOne => &[(1, 0)],
        FmFeedback::Ring => &[(3, 2), (2, 1), (1, 0), (0, 3)],
    }
}

/// Dispatch on a runtime operator count.
///
/// # Panics
/// When `operators` is outside `1..=MAX_FM_OPERATORS`; callers clamp first.
pub fn render_dyn(
    operators: usize,
    algorithm: FmAlgorithm,
    feedback: FmFeedback,
    tables: &WaveTables,
    tone: &mut Tone,
    buffer: &mut [f64],
) {
    match operators {
        1 => render::<1>(algorithm, feedback, tables, tone, buffer),
        2 => render::<2>(algorithm, feedback, tables, tone, buffer),
        3 => render::<3>(algorithm, feedback, tables, tone, buffer),
        4 => render::<4>(algorithm, feedback, tables, tone, buffer),
        n => panic!("no FM kernel for {n} operators (supported 1..={MAX_FM_OPERATORS})"),
    }
}

pub fn render<const OPS: usize>(
    algorithm: FmAlgorithm,
    feedback: FmFeedback,
    tables: &WaveTables,
    tone: &mut Tone,
    buffer: &mut [f64],
) {
    let (modulators, carriers) = algorithm_routing(algorithm);
    let feedback_pairs = feedback_routing(feedback);

    let mut phases = [0.0; OPS];
    let mut deltas = [0.0; OPS];
    let mut scales = [1.0; OPS];
    let mut amplitudes = [0.0; OPS];
    let mut amplitude_deltas = [0.0; OPS];
    let mut outputs = [0.0; OPS];
    phases.copy_from_slice(&tone.phases[..OPS]);
    deltas.copy_from_slice(&tone.phase_deltas[..OPS]);
    scales.copy_from_slice(&tone.phase_delta_scales[..OPS]);
    amplitudes.copy_from_slice(&tone.operator_expressions[..OPS]);
    amplitude_deltas.copy_from_slice(&tone.operator_expression_deltas[..OPS]);
    outputs.copy_from_slice(&tone.operator_outputs[..OPS]);

    let mut feedback_mult = tone.feedback_mult;
    let mut expression = tone.expression;

    for out in buffer.iter_mut() {
        let previous = outputs;
        for op in (0..OPS).rev() {
            let mut modulation = 0.0;
            for &m in modulators[op] {
                if m < OPS {
                    modulation += outputs[m];
                }
            }
            for &(from, to) in feedback_pairs {
                if to == op && from < OPS {
                    modulation += previous[from] * feedback_mult;
                }
            }
            outputs[op] = tables.sine(phases[op] + modulation) * amplitudes[op];
        }

        let mut wave = 0.0;
        for op in 0..carriers.min(OPS) {
            wave += outputs[op];
        }

        for op in 0..OPS {
            phases[op] = wrap_phase(phases[op] + deltas[op]);
            deltas[op] *= scales[op];
            amplitudes[op] += amplitude_deltas[op];
        }
        feedback_mult += tone.feedback_delta;

        *out += tone.note_filter.process(wave) * expression;
        expression += tone.expression_delta;
    }

    tone.phases[..OPS].copy_from_slice(&phases);
    tone.phase_deltas[..OPS].copy_from_slice(&deltas);
    tone.operator_expressions[..OPS].copy_from_slice(&amplitudes);
    tone.operator_outputs[..OPS].copy_from_slice(&outputs);
    tone.feedback_mult = feedback_mult;
    tone.expression = expression;
}
