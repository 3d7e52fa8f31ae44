//! Waveform kernels, one per instrument kind.
//!
//! Each kernel renders a run of one tone, adding into the instrument buffer,
//! and leaves the tone's phases, expression and filter state where the next
//! run continues from. Parameters arrive pre-ramped on the tone.

pub mod chip;
pub mod fm;
pub mod noise;
pub mod picked_string;
pub mod pulse_width;
pub mod supersaw;

use crate::config::{MAX_FM_OPERATORS, SUPERSAW_VOICES};
use crate::dsp::oscillator::{WaveTables, Wavetable};
use crate::dsp::tone::Tone;
use crate::song::InstrumentKind;

/// Shared read-only inputs for kernels.
#[derive(Debug, Clone, Copy)]
pub struct KernelContext<'a> {
    pub tables: &'a WaveTables,
    /// The instrument's harmonics wave, for harmonics and picked-string kinds.
    pub harmonics: Option<&'a Wavetable>,
}

/// Render `buffer.len()` samples of `tone` into `buffer`.
pub fn render_tone(kind: &InstrumentKind, ctx: &KernelContext<'_>, tone: &mut Tone, buffer: &mut [f64]) {
    match kind {
        InstrumentKind::Chip { wave } => chip::render(ctx.tables.chip(*wave), tone, buffer),
        InstrumentKind::Harmonics { .. } => {
            if let Some(wave) = ctx.harmonics {
                chip::render(wave, tone, buffer);
            }
        }
        InstrumentKind::Fm {
            algorithm,
            operators,
            feedback,
            ..
        } => {
            let count = operators.len().min(MAX_FM_OPERATORS);
            if count > 0 {
                fm::render_dyn(count, *algorithm, *feedback, ctx.tables, tone, buffer);
            }
        }
        InstrumentKind::Noise { wave } => noise::render(ctx.tables.noise(*wave), *wave, tone, buffer),
        InstrumentKind::PickedString { .. } => picked_string::render(tone, buffer),
        InstrumentKind::Supersaw { .. } => supersaw::render::<SUPERSAW_VOICES>(tone, buffer),
        InstrumentKind::PulseWidth { .. } => pulse_width::render(tone, buffer),
    }
    tone.fresh = false;
}

/// Wrap a phase in cycles back into `0..1`.
#[inline]
pub(crate) fn wrap_phase(phase: f64) -> f64 {
    phase - phase.floor()
}
