//! Tone — one sounding voice, pooled and reused.
//!
//! A tone holds everything a kernel needs to continue a waveform exactly
//! where the previous run left off. Tones live in a [`TonePool`]; the
//! scheduler refers to them by generation-checked [`ToneId`] keys so a stale
//! id can never reach a recycled body.

use slotmap::{SlotMap, new_key_type};

use crate::config::{MAX_CHORD_SIZE, MAX_FM_OPERATORS, SUPERSAW_VOICES};
use crate::dsp::filter::FilterCascade;
use crate::dsp::kernel::picked_string::PickedString;

new_key_type! {
    /// Key of a tone in the pool.
    pub struct ToneId;
}

/// Phase slots per tone: enough for the widest kernel (the supersaw).
pub const MAX_VOICE_PHASES: usize = SUPERSAW_VOICES;
/// Unison voices per tone.
pub const MAX_UNISON_VOICES: usize = 2;

/// Where a note lives in the song. Indices only; resolved on every use so a
/// song edited between calls cannot leave dangling references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteHandle {
    pub bar: usize,
    pub pattern: usize,
    pub note: usize,
}

/// Glide state of a tone that slid into its current note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneSlide {
    /// Pitch the tone was sounding when the slide began.
    pub from_pitch: f64,
    /// Pin size the previous note ended on.
    pub from_size: f64,
    /// Age of the previous note, in ticks, when the slide began.
    pub from_ticks: f64,
    /// Ticks since the slide began.
    pub ticks: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tone {
    pub instrument: usize,
    pub pitches: [i32; MAX_CHORD_SIZE],
    pub pitch_count: usize,
    /// Size of the chord this tone belongs to; drives chord expression.
    pub chord_size: usize,
    /// Which pitch of `pitches` this tone plays, except for arpeggios.
    pub chord_index: usize,

    pub note: Option<NoteHandle>,
    pub prev_note: Option<NoteHandle>,
    /// Start of the note in ticks from the start of its bar.
    pub note_start_tick: f64,
    /// Ticks of age at the start of the current tick.
    pub ticks_since_start: f64,
    pub released: bool,
    pub ticks_since_released: f64,
    /// Overrides the instrument's fade-out length, for cut-offs.
    pub forced_fade_ticks: Option<f64>,
    pub live: bool,
    pub slide: Option<ToneSlide>,
    /// Pitch interval and pin size the tone held when it was released.
    pub release_interval: f64,
    pub release_size: f64,

    /// Set until a kernel has rendered the tone once; kernels that spread
    /// their voice phases do it then.
    pub fresh: bool,
    /// Phases in cycles, `0..1`.
    pub phases: [f64; MAX_VOICE_PHASES],
    pub phase_deltas: [f64; MAX_VOICE_PHASES],
    pub phase_delta_scales: [f64; MAX_VOICE_PHASES],
    pub expression: f64,
    pub expression_delta: f64,
    pub unison_voices: usize,
    pub unison_sign: f64,
    /// Sounding pitch at the end of the last run.
    pub last_pitch: f64,

    pub operator_expressions: [f64; MAX_FM_OPERATORS],
    pub operator_expression_deltas: [f64; MAX_FM_OPERATORS],
    pub operator_outputs: [f64; MAX_FM_OPERATORS],
    pub feedback_mult: f64,
    pub feedback_delta: f64,

    pub pulse_width: f64,
    pub pulse_width_delta: f64,
    pub supersaw_dynamism: f64,
    pub supersaw_dynamism_delta: f64,
    pub supersaw_shape: f64,
    pub supersaw_shape_delta: f64,

    pub noise_sample: f64,
    pub picked_strings: [PickedString; MAX_UNISON_VOICES],
    pub note_filter: FilterCascade,
}

impl Default for Tone {
    fn default() -> Self {
        Self::new()
    }
}

impl Tone {
    pub fn new() -> Self {
        Tone {
            instrument: 0,
            pitches: [0; MAX_CHORD_SIZE],
            pitch_count: 0,
            chord_size: 1,
            chord_index: 0,
            note: None,
            prev_note: None,
            note_start_tick: 0.0,
            ticks_since_start: 0.0,
            released: false,
            ticks_since_released: 0.0,
            forced_fade_ticks: None,
            live: false,
            slide: None,
            release_interval: 0.0,
            release_size: 0.0,
            fresh: true,
            phases: [0.0; MAX_VOICE_PHASES],
            phase_deltas: [0.0; MAX_VOICE_PHASES],
            phase_delta_scales: [1.0; MAX_VOICE_PHASES],
            expression: 0.0,
            expression_delta: 0.0,
            unison_voices: 1,
            unison_sign: 1.0,
            last_pitch: 0.0,
            operator_expressions: [0.0; MAX_FM_OPERATORS],
            operator_expression_deltas: [0.0; MAX_FM_OPERATORS],
            operator_outputs: [0.0; MAX_FM_OPERATORS],
            feedback_mult: 0.0,
            feedback_delta: 0.0,
            pulse_width: 0.0,
            pulse_width_delta: 0.0,
            supersaw_dynamism: 0.0,
            supersaw_dynamism_delta: 0.0,
            supersaw_shape: 0.0,
            supersaw_shape_delta: 0.0,
            noise_sample: 0.0,
            picked_strings: Default::default(),
            note_filter: FilterCascade::default(),
        }
    }

    /// Return to the freshly-constructed state. String delay lines keep their
    /// allocations so reuse does not allocate.
    pub fn reset(&mut self) {
        let mut strings = std::mem::take(&mut self.picked_strings);
        for s in &mut strings {
            s.reset();
        }
        *self = Tone::new();
        self.picked_strings = strings;
    }

    pub fn set_pitches(&mut self, pitches: &[i32]) {
        self.pitch_count = pitches.len().min(MAX_CHORD_SIZE);
        self.pitches[..self.pitch_count].copy_from_slice(&pitches[..self.pitch_count]);
    }

    pub fn pitches(&self) -> &[i32] {
        &self.pitches[..self.pitch_count]
    }

    /// Pitch this tone plays from its chord, ignoring arpeggios and pins.
    pub fn base_pitch(&self) -> i32 {
        self.pitches()
            .get(self.chord_index)
            .or_else(|| self.pitches().first())
            .copied()
            .unwrap_or(0)
    }

    /// Mark released. `fade_ticks` forces a shorter fade than the instrument's.
    pub fn release(&mut self, fade_ticks: Option<f64>) {
        if !self.released {
            self.released = true;
            self.ticks_since_released = 0.0;
        }
        if let Some(ticks) = fade_ticks {
            self.forced_fade_ticks = Some(self.forced_fade_ticks.map_or(ticks, |t| t.min(ticks)));
        }
    }
}

// ── Pool ────────────────────────────────────────────────────

/// Arena of live tones plus a stack of reset bodies ready for reuse.
#[derive(Debug, Default)]
pub struct TonePool {
    tones: SlotMap<ToneId, Tone>,
    spare: Vec<Tone>,
    /// Tones handed out since the pool was created.
    allocations: usize,
}

impl TonePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preallocate `count` tone bodies and arena slots.
    pub fn warm_up(&mut self, count: usize) {
        let live = self.tones.len();
        if count > live {
            self.tones.reserve(count - live);
        }
        self.spare.reserve(count);
        while self.spare.len() + live < count {
            self.spare.push(Tone::new());
        }
    }

    /// A tone in the freshly-constructed state.
    pub fn allocate(&mut self) -> ToneId {
        let tone = self.spare.pop().unwrap_or_default();
        self.allocations += 1;
        self.tones.insert(tone)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    /// Return a tone to the spare stack. Stale ids are ignored.
    pub fn free(&mut self, id: ToneId) {
        if let Some(mut tone) = self.tones.remove(id) {
            tone.reset();
            self.spare.push(tone);
        }
    }

    pub fn get(&self, id: ToneId) -> Option<&Tone> {
        self.tones.get(id)
    }

    pub fn get_mut(&mut self, id: ToneId) -> Option<&mut Tone> {
        self.tones.get_mut(id)
    }

    /// Tones currently in use.
    pub fn len(&self) -> usize {
        self.tones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tones.is_empty()
    }

    pub fn spare_count(&self) -> usize {
        self.spare.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_tone_comes_back_clean() {
        let mut pool = TonePool::new();
        let id = pool.allocate();
        {
            let tone = pool.get_mut(id).unwrap();
            tone.set_pitches(&[60, 64, 67]);
            tone.phases[0] = 0.7;
            tone.expression = 0.3;
            tone.release(Some(1.0));
            tone.picked_strings[0].delay_line.ensure_capacity(512);
            tone.picked_strings[0].delay_line.write(0.5);
        }
        pool.free(id);
        assert!(pool.get(id).is_none(), "stale id must not resolve");

        let again = pool.allocate();
        assert_eq!(pool.get(again).unwrap(), &Tone::new());
    }

    #[test]
    fn reset_twice_is_same_as_once() {
        let mut tone = Tone::new();
        tone.set_pitches(&[50]);
        tone.ticks_since_start = 12.0;
        tone.reset();
        let once = tone.clone();
        tone.reset();
        assert_eq!(tone, once);
        assert_eq!(tone, Tone::new());
    }

    #[test]
    fn warm_up_fills_spares() {
        let mut pool = TonePool::new();
        pool.warm_up(8);
        assert_eq!(pool.spare_count(), 8);
        let id = pool.allocate();
        assert_eq!(pool.spare_count(), 7);
        pool.free(id);
        assert_eq!(pool.spare_count(), 8);
        pool.free(id);
        assert_eq!(pool.spare_count(), 8, "double free is ignored");
    }

    #[test]
    fn forced_fade_only_shortens() {
        let mut tone = Tone::new();
        tone.release(Some(3.0));
        tone.release(Some(1.0));
        tone.release(Some(2.0));
        assert_eq!(tone.forced_fade_ticks, Some(1.0));
        assert!(tone.released);
    }

    #[test]
    fn pitches_truncate_to_chord_limit() {
        let mut tone = Tone::new();
        let many: Vec<i32> = (0..20).collect();
        tone.set_pitches(&many);
        assert_eq!(tone.pitches().len(), MAX_CHORD_SIZE);
    }
}
