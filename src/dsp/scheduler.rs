//! Tone scheduler — at every tick boundary, brings each instrument's tone
//! lists in line with the song: starts tones for new notes, carries tones
//! across seamless transitions, strums chords in, releases what ended and
//! frees tones whose fade-out is over.

use tracing::debug;

use crate::config::{SLIDE_TICKS, STRUM_PARTS, TICKS_PER_PART};
use crate::dsp::instrument_state::InstrumentState;
use crate::dsp::tone::{NoteHandle, ToneId, ToneSlide, TonePool};
use crate::dsp::tone_params::resolve_note;
use crate::song::{Channel, ChannelKind, Chord, Instrument, Note, Song, Transition};

/// Runtime state of one channel.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub instruments: Vec<InstrumentState>,
    /// Mod channels: one tone per sounding mod note pitch.
    pub mod_tones: Vec<ToneId>,
    /// Note the mod tones belong to.
    pub mod_note: Option<NoteHandle>,
}

impl ChannelState {
    pub fn new(channel: &Channel, seed: u64, max_grains: usize) -> Self {
        ChannelState {
            instruments: (0..channel.instruments.len())
                .map(|i| InstrumentState::new(seed.wrapping_add(i as u64), max_grains))
                .collect(),
            mod_tones: Vec::new(),
            mod_note: None,
        }
    }

    /// Match the instrument count after the song changed. Tones of dropped
    /// instruments go back to the pool.
    pub fn sync(&mut self, channel: &Channel, seed: u64, max_grains: usize, pool: &mut TonePool) {
        let count = channel.instruments.len();
        while self.instruments.len() < count {
            let index = self.instruments.len() as u64;
            self.instruments
                .push(InstrumentState::new(seed.wrapping_add(index), max_grains));
        }
        for state in self.instruments.drain(count..) {
            for id in state.tone_ids() {
                pool.free(id);
            }
        }
    }

    pub fn tone_count(&self) -> usize {
        self.instruments.iter().map(InstrumentState::tone_count).sum::<usize>() + self.mod_tones.len()
    }

    /// Release every pattern tone, e.g. before a jump. Live tones keep playing.
    pub fn release_all(&mut self, pool: &mut TonePool) {
        for state in &mut self.instruments {
            release_active(state, pool, None);
            state.current_note = None;
        }
        for id in self.mod_tones.drain(..) {
            pool.free(id);
        }
        self.mod_note = None;
    }

    /// Free every tone at once and deactivate every instrument.
    pub fn reset(&mut self, pool: &mut TonePool) {
        for state in &mut self.instruments {
            for id in state.active.drain(..).chain(state.released.drain(..)).chain(state.live.drain(..)) {
                pool.free(id);
            }
            state.current_note = None;
            state.deactivate();
        }
        for id in self.mod_tones.drain(..) {
            pool.free(id);
        }
        self.mod_note = None;
    }
}

/// What the scheduler sees of the transport for one tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub song: &'a Song,
    pub bar: usize,
    pub bar_tick: u32,
    /// Patterns are only read while playing.
    pub playing: bool,
    /// Held live pitches as `(channel, pitch)`.
    pub live_pitches: &'a [(usize, i32)],
    pub channel_index: usize,
    pub max_tones: usize,
}

// ── Note lookup ─────────────────────────────────────────────

/// The note sounding at `bar_tick` for `instrument`, if any.
pub fn note_at(
    channel: &Channel,
    bar: usize,
    bar_tick: u32,
    instrument: Option<usize>,
) -> Option<(NoteHandle, &Note)> {
    let (pattern_index, pattern) = channel.pattern_at(bar)?;
    if let Some(i) = instrument {
        if !pattern.instruments.contains(&i) {
            return None;
        }
    }
    pattern
        .notes
        .iter()
        .enumerate()
        .find(|(_, n)| n.start * TICKS_PER_PART <= bar_tick && bar_tick < n.end * TICKS_PER_PART)
        .map(|(note_index, note)| {
            (
                NoteHandle {
                    bar,
                    pattern: pattern_index,
                    note: note_index,
                },
                note,
            )
        })
}

/// The note that ends exactly where `note` starts. Across a bar line only a
/// note flagged `continues_last_pattern` looks back, and only into a pattern
/// the instrument plays.
pub fn previous_note(
    song: &Song,
    channel: &Channel,
    handle: NoteHandle,
    note: &Note,
    instrument: usize,
) -> Option<(NoteHandle, bool)> {
    if note.start > 0 {
        let pattern = channel.patterns.get(handle.pattern)?;
        return pattern
            .notes
            .iter()
            .position(|n| n.end == note.start)
            .map(|i| (NoteHandle { note: i, ..handle }, false));
    }
    if !note.continues_last_pattern || handle.bar == 0 {
        return None;
    }
    let bar = handle.bar - 1;
    let (pattern_index, pattern) = channel.pattern_at(bar)?;
    if !pattern.instruments.contains(&instrument) {
        return None;
    }
    pattern
        .notes
        .iter()
        .position(|n| n.end == song.parts_per_bar())
        .map(|i| {
            (
                NoteHandle {
                    bar,
                    pattern: pattern_index,
                    note: i,
                },
                true,
            )
        })
}

// ── Tone list helpers ───────────────────────────────────────

fn release_active(state: &mut InstrumentState, pool: &mut TonePool, fade_ticks: Option<f64>) {
    for id in state.active.drain(..) {
        if let Some(tone) = pool.get_mut(id) {
            tone.release(fade_ticks);
            state.released.push(id);
        }
    }
}

fn start_tone(
    pool: &mut TonePool,
    instrument_index: usize,
    handle: NoteHandle,
    prev: Option<NoteHandle>,
    note: &Note,
    chord_index: usize,
) -> ToneId {
    let id = pool.allocate();
    if let Some(tone) = pool.get_mut(id) {
        tone.instrument = instrument_index;
        tone.set_pitches(&note.pitches);
        tone.chord_size = note.pitches.len();
        tone.chord_index = chord_index;
        tone.note = Some(handle);
        tone.prev_note = prev;
        tone.note_start_tick = (note.start * TICKS_PER_PART) as f64;
    }
    id
}

/// Point a carried tone at its new note.
fn retarget(
    pool: &mut TonePool,
    id: ToneId,
    handle: NoteHandle,
    prev: NoteHandle,
    note: &Note,
    chord_index: usize,
    slide_from_size: Option<f64>,
) {
    let Some(tone) = pool.get_mut(id) else {
        return;
    };
    if let Some(from_size) = slide_from_size {
        tone.slide = Some(ToneSlide {
            from_pitch: tone.last_pitch,
            from_size,
            from_ticks: tone.ticks_since_start,
            ticks: 0.0,
        });
        tone.ticks_since_start = 0.0;
    } else {
        tone.slide = None;
    }
    tone.set_pitches(&note.pitches);
    tone.chord_size = note.pitches.len();
    tone.chord_index = chord_index;
    tone.note = Some(handle);
    tone.prev_note = Some(prev);
    tone.note_start_tick = (note.start * TICKS_PER_PART) as f64;
}

/// Tones a chord should have by now: all at once, one for arpeggios, or one
/// more every `STRUM_PARTS` parts for strums.
fn desired_tone_count(instrument: &Instrument, note: &Note, bar_tick: u32, max_tones: usize) -> usize {
    let count = match instrument.chord {
        Chord::Arpeggio => 1,
        Chord::Simultaneous => note.pitches.len(),
        Chord::Strum => {
            let elapsed_parts = (bar_tick / TICKS_PER_PART).saturating_sub(note.start);
            note.pitches
                .len()
                .min((elapsed_parts / STRUM_PARTS.max(1)) as usize + 1)
        }
    };
    count.min(max_tones.max(1))
}

// ── Per-tick scheduling ─────────────────────────────────────

/// Bring one channel's tones in line with the song at the start of a tick.
pub fn schedule_tick(
    state: &mut ChannelState,
    channel: &Channel,
    ctx: &TickContext<'_>,
    pool: &mut TonePool,
) {
    if channel.kind == ChannelKind::Mod {
        schedule_mods(state, channel, ctx, pool);
        return;
    }
    for (index, instrument) in channel.instruments.iter().enumerate() {
        let Some(inst_state) = state.instruments.get_mut(index) else {
            continue;
        };
        let found = if ctx.playing && !channel.muted {
            note_at(channel, ctx.bar, ctx.bar_tick, Some(index))
        } else {
            None
        };
        match found {
            None => {
                if inst_state.current_note.is_some() || !inst_state.active.is_empty() {
                    release_active(inst_state, pool, None);
                    inst_state.current_note = None;
                }
            }
            Some((handle, note)) => {
                if inst_state.current_note != Some(handle) {
                    change_note(inst_state, index, instrument, channel, ctx, pool, handle, note);
                }
                // Strums (and chords the cap trimmed) fill in lazily.
                if !instrument.chord.single_tone() {
                    let desired = desired_tone_count(instrument, note, ctx.bar_tick, ctx.max_tones);
                    while inst_state.active.len() < desired {
                        let chord_index = inst_state.active.len();
                        let id = start_tone(pool, index, handle, None, note, chord_index);
                        inst_state.active.push(id);
                    }
                }
            }
        }
    }
    schedule_live(state, channel, ctx, pool);
    enforce_capacity(state, pool, ctx.max_tones, ctx.channel_index);
}

#[allow(clippy::too_many_arguments)]
fn change_note(
    state: &mut InstrumentState,
    index: usize,
    instrument: &Instrument,
    channel: &Channel,
    ctx: &TickContext<'_>,
    pool: &mut TonePool,
    handle: NoteHandle,
    note: &Note,
) {
    let previous = previous_note(ctx.song, channel, handle, note, index)
        .filter(|(prev, _)| state.current_note == Some(*prev))
        .and_then(|(prev, cross_bar)| Some((prev, resolve_note(channel, prev)?, cross_bar)));

    let seamless = previous.and_then(|(prev, old, cross_bar)| {
        let tie = cross_bar && old.pitches == note.pitches;
        (instrument.transition.is_seamless() || tie).then_some((prev, old, tie))
    });

    state.current_note = Some(handle);
    let Some((prev, old, tie)) = seamless else {
        let fade = (instrument.transition == Transition::Interrupt).then_some(1.0);
        release_active(state, pool, fade);
        let count = desired_tone_count(instrument, note, ctx.bar_tick, ctx.max_tones);
        for chord_index in 0..count {
            let id = start_tone(pool, index, handle, None, note, chord_index);
            state.active.push(id);
        }
        return;
    };

    let slide_from = (instrument.transition.slides() && !tie).then(|| old.last_size());
    if instrument.chord.single_tone() {
        let (kept, rest): (Option<ToneId>, Vec<ToneId>) = {
            let mut carried = state.active.drain(..);
            (carried.next(), carried.collect())
        };
        for id in rest {
            if let Some(tone) = pool.get_mut(id) {
                tone.release(None);
                state.released.push(id);
            }
        }
        let id = kept.unwrap_or_else(|| start_tone(pool, index, handle, Some(prev), note, 0));
        retarget(pool, id, handle, prev, note, 0, slide_from);
        state.active.push(id);
        return;
    }

    // Pitches the old tones end on, matched against the new chord in order.
    let shift = if tie { 0 } else { old.last_interval() };
    state.scratch.clear();
    state.scratch.append(&mut state.active);
    let count = desired_tone_count(instrument, note, ctx.bar_tick, ctx.max_tones);
    for (chord_index, &pitch) in note.pitches.iter().enumerate().take(count) {
        let ending_pitch = |id: &ToneId| pool.get(*id).map(|t| t.base_pitch() + shift);
        let matched = if slide_from.is_some() {
            state
                .scratch
                .iter()
                .enumerate()
                .filter_map(|(i, id)| ending_pitch(id).map(|p| (i, (p - pitch).abs())))
                .min_by_key(|&(_, distance)| distance)
                .map(|(i, _)| i)
        } else {
            state
                .scratch
                .iter()
                .position(|id| ending_pitch(id) == Some(pitch))
        };
        let id = match matched {
            Some(i) => {
                let id = state.scratch.remove(i);
                retarget(pool, id, handle, prev, note, chord_index, slide_from);
                id
            }
            None => start_tone(pool, index, handle, Some(prev), note, chord_index),
        };
        state.active.push(id);
    }
    for id in state.scratch.drain(..) {
        if let Some(tone) = pool.get_mut(id) {
            tone.release(None);
            state.released.push(id);
        }
    }
}

/// Live tones play on the channel's first instrument.
fn schedule_live(state: &mut ChannelState, channel: &Channel, ctx: &TickContext<'_>, pool: &mut TonePool) {
    let Some(inst_state) = state.instruments.first_mut() else {
        return;
    };
    let held = || {
        ctx.live_pitches
            .iter()
            .filter(|(c, _)| *c == ctx.channel_index)
            .map(|&(_, p)| p)
    };
    let mut i = 0;
    while i < inst_state.live.len() {
        let id = inst_state.live[i];
        let still_held = pool
            .get(id)
            .is_some_and(|t| !channel.muted && held().any(|p| p == t.base_pitch()));
        if still_held {
            i += 1;
            continue;
        }
        inst_state.live.swap_remove(i);
        if let Some(tone) = pool.get_mut(id) {
            tone.release(None);
            inst_state.released.push(id);
        }
    }
    if channel.muted {
        return;
    }
    for pitch in held() {
        let playing = inst_state
            .live
            .iter()
            .any(|&id| pool.get(id).is_some_and(|t| t.base_pitch() == pitch));
        if !playing {
            let id = pool.allocate();
            if let Some(tone) = pool.get_mut(id) {
                tone.live = true;
                tone.set_pitches(&[pitch]);
            }
            inst_state.live.push(id);
        }
    }
}

/// Hurry the oldest released tones along when the channel holds too many.
fn enforce_capacity(state: &mut ChannelState, pool: &mut TonePool, max_tones: usize, channel: usize) {
    let total = state.tone_count();
    if total <= max_tones {
        return;
    }
    let mut excess = total - max_tones;
    for inst_state in &mut state.instruments {
        for &id in &inst_state.released {
            if excess == 0 {
                break;
            }
            if let Some(tone) = pool.get_mut(id) {
                if tone.forced_fade_ticks.is_none_or(|t| t > 1.0) {
                    tone.release(Some(1.0));
                }
            }
            excess -= 1;
        }
    }
    debug!(channel, total, max_tones, "tone cap reached, hurrying releases");
}

fn schedule_mods(state: &mut ChannelState, channel: &Channel, ctx: &TickContext<'_>, pool: &mut TonePool) {
    let found = if ctx.playing && !channel.muted {
        note_at(channel, ctx.bar, ctx.bar_tick, None)
    } else {
        None
    };
    let handle = found.map(|(h, _)| h);
    if handle == state.mod_note {
        return;
    }
    for id in state.mod_tones.drain(..) {
        pool.free(id);
    }
    state.mod_note = handle;
    if let Some((handle, note)) = found {
        for &pitch in &note.pitches {
            let id = pool.allocate();
            if let Some(tone) = pool.get_mut(id) {
                tone.set_pitches(&[pitch]);
                tone.note = Some(handle);
            }
            state.mod_tones.push(id);
        }
    }
}

/// Age every tone by one tick and free released tones that finished fading.
pub fn end_tick(state: &mut ChannelState, channel: &Channel, pool: &mut TonePool) {
    for id in state.mod_tones.iter().copied() {
        if let Some(tone) = pool.get_mut(id) {
            tone.ticks_since_start += 1.0;
        }
    }
    for (index, inst_state) in state.instruments.iter_mut().enumerate() {
        let fade_out = channel
            .instruments
            .get(index)
            .map_or(0.0, |i| i.fade_out_ticks);
        for id in inst_state.tone_ids() {
            let Some(tone) = pool.get_mut(id) else {
                continue;
            };
            tone.ticks_since_start += 1.0;
            if tone.released {
                tone.ticks_since_released += 1.0;
            }
            if let Some(slide) = &mut tone.slide {
                slide.ticks += 1.0;
            }
            if tone.slide.is_some_and(|s| s.ticks >= SLIDE_TICKS) {
                tone.slide = None;
            }
        }
        inst_state.released.retain(|&id| {
            let done = pool.get(id).is_none_or(|t| {
                t.ticks_since_released >= t.forced_fade_ticks.unwrap_or(fade_out)
            });
            if done {
                pool.free(id);
            }
            !done
        });
    }
}
