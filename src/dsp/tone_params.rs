//! Per-run tone parameters.
//!
//! Turns a tone's note position, envelopes, pitch modifiers and fades into
//! the start values and per-sample deltas its kernel reads: phase deltas and
//! their scales, expression, FM operator levels, pulse width, supersaw shape,
//! picked-string loop design and the note filter gradient.

use std::f64::consts::PI;

use crate::config::{
    FM_AMPLITUDE_MAX, MAX_FM_OPERATORS, NOTE_SIZE_MAX, SLIDE_TICKS, SUPERSAW_VOICES, TICKS_PER_PART,
};
use crate::dsp::envelope::{EnvelopeClock, EnvelopeComputer, NoteTiming, SlideTiming};
use crate::dsp::filter::PointScale;
use crate::dsp::instrument_state::ModOverrides;
use crate::dsp::kernel::picked_string::StringRun;
use crate::dsp::kernel::supersaw::SUPERSAW_DETUNES;
use crate::dsp::oscillator::{
    Wavetable, chip_wave_expression, frequency_from_pitch, noise_spec, volume_multiplier,
};
use crate::dsp::ramp::ScaleRamp;
use crate::dsp::tone::{MAX_UNISON_VOICES, NoteHandle, Tone};
use crate::song::{
    Channel, ChannelKind, EnvelopeTarget, Instrument, InstrumentKind, ModSetting, Note, Song,
    VibratoKind,
};

/// Everything shared by the tones of one instrument for one run.
#[derive(Debug, Clone, Copy)]
pub struct ToneRun<'a> {
    pub song: &'a Song,
    pub channel: &'a Channel,
    pub instrument: &'a Instrument,
    pub clock: EnvelopeClock,
    /// Mod overrides interpolated to this run.
    pub overrides: &'a ModOverrides,
    pub sample_rate: f64,
    pub run_length: usize,
    pub bar: usize,
    /// Ticks from the bar start to the start of the current tick.
    pub bar_tick: f64,
    /// Arpeggio position in steps, at the tick start.
    pub arpeggio_time: f64,
    /// The instrument's harmonics wave, for harmonics and picked strings.
    pub harmonics: Option<&'a Wavetable>,
}

/// Resolve a handle against the channel; `None` if the song changed under it.
pub fn resolve_note(channel: &Channel, handle: NoteHandle) -> Option<&Note> {
    channel.patterns.get(handle.pattern)?.notes.get(handle.note)
}

/// Parts since `note` started, at `ratio` through the current tick.
fn note_part(run: &ToneRun<'_>, handle: NoteHandle, note: &Note, ratio: f64) -> f64 {
    let bars_after = run.bar as f64 - handle.bar as f64;
    (run.bar_tick + ratio) / TICKS_PER_PART as f64
        + bars_after * run.song.parts_per_bar() as f64
        - note.start as f64
}

/// Raw pin value of a mod tone at the tick start and end.
pub fn mod_tone_values(
    song: &Song,
    channel: &Channel,
    tone: &Tone,
    bar: usize,
    bar_tick: f64,
) -> Option<(f64, f64)> {
    let handle = tone.note?;
    let note = resolve_note(channel, handle)?;
    let bars_after = bar as f64 - handle.bar as f64;
    let part = |ratio: f64| {
        (bar_tick + ratio) / TICKS_PER_PART as f64 + bars_after * song.parts_per_bar() as f64
            - note.start as f64
    };
    Some((note.pin_value_at(part(0.0)).1, note.pin_value_at(part(1.0)).1))
}

/// Vibrato LFO in `-1..=1` at `phase` cycles.
pub fn vibrato_lfo(kind: VibratoKind, phase: f64) -> f64 {
    let angle = 2.0 * PI * phase;
    match kind {
        VibratoKind::Normal => angle.sin(),
        // Incommensurate partials never quite repeat.
        VibratoKind::Shaky => {
            (angle.sin() + 0.7 * (angle * 1.618).sin() + 0.5 * (angle * 2.718).sin()) / 2.2
        }
    }
}

/// Pitch index into the chord for an arpeggio at `arpeggio_time` steps.
pub fn arpeggio_index(pitch_count: usize, arpeggio_time: f64, fast_two_note: bool) -> usize {
    let speed = if fast_two_note && pitch_count == 2 {
        2.0
    } else {
        1.0
    };
    let step = (arpeggio_time * speed).max(0.0).floor() as usize;
    match pitch_count {
        0 | 1 => 0,
        2 => step % 2,
        3 => [0, 1, 2, 1][step % 4],
        n => step % n,
    }
}

fn kernel_expression(kind: &InstrumentKind, supersaw_dynamism: f64) -> f64 {
    match kind {
        InstrumentKind::Chip { wave } => chip_wave_expression(*wave),
        InstrumentKind::Harmonics { .. } => 0.5,
        InstrumentKind::Fm { .. } => 0.4,
        InstrumentKind::Noise { wave } => noise_spec(*wave).expression,
        InstrumentKind::PickedString { .. } => 0.5,
        InstrumentKind::Supersaw { .. } => 0.5 / (1.0 + supersaw_dynamism * 6.0).sqrt(),
        InstrumentKind::PulseWidth { .. } => 0.5,
    }
}

fn supports_unison(kind: &InstrumentKind) -> bool {
    matches!(
        kind,
        InstrumentKind::Chip { .. }
            | InstrumentKind::Harmonics { .. }
            | InstrumentKind::PickedString { .. }
            | InstrumentKind::PulseWidth { .. }
    )
}

/// Load phase delta `index` for a glide from `start` to `end` Hz.
fn load_phase_delta(tone: &mut Tone, index: usize, start: f64, end: f64, run: &ToneRun<'_>) -> (f64, f64) {
    let start = start / run.sample_rate;
    let end = end / run.sample_rate;
    tone.phase_deltas[index] = start;
    tone.phase_delta_scales[index] = ScaleRamp::between(start, end, run.run_length).scale;
    (start, end)
}

/// Compute `tone`'s parameters for the run described by `run`.
pub fn compute_tone(run: &ToneRun<'_>, envelopes: &mut EnvelopeComputer, tone: &mut Tone) {
    let instrument = run.instrument;
    let ratios = run.clock.ratios;
    let n = run.run_length.max(1) as f64;
    let max_size = NOTE_SIZE_MAX as f64;

    // Pin interval and size at the run start and end.
    let pins = if tone.released {
        None
    } else {
        tone.note.and_then(|handle| {
            let note = resolve_note(run.channel, handle)?;
            Some((
                note.pin_value_at(note_part(run, handle, note, ratios.start)),
                note.pin_value_at(note_part(run, handle, note, ratios.end)),
            ))
        })
    };
    let ((interval_start, size_start), (interval_end, size_end)) = match pins {
        Some(values) => values,
        None if !tone.released => ((0.0, max_size), (0.0, max_size)),
        None => {
            let held = (tone.release_interval, tone.release_size);
            (held, held)
        }
    };
    if !tone.released {
        tone.release_interval = interval_end;
        tone.release_size = size_end;
    }

    let base = if instrument.chord.single_tone() && tone.pitch_count > 1 {
        let index = arpeggio_index(
            tone.pitch_count,
            run.arpeggio_time,
            instrument.fast_two_note_arpeggio,
        );
        tone.pitches()[index]
    } else {
        tone.base_pitch()
    };
    let transpose = if run.channel.kind == ChannelKind::Pitch {
        run.song.key + run.channel.octave * 12
    } else {
        0
    };
    let note_pitch = (base + transpose) as f64;

    let timing = NoteTiming {
        tick_time: tone.ticks_since_start,
        size_start,
        size_end,
        pitch: note_pitch + interval_start,
    };
    let slide = tone.slide.map(|s| SlideTiming {
        previous: NoteTiming {
            tick_time: s.from_ticks + s.ticks,
            size_start: s.from_size,
            size_end: s.from_size,
            pitch: s.from_pitch,
        },
        slide_ticks: s.ticks,
    });
    envelopes.compute_envelopes(instrument, &run.clock, &timing, slide.as_ref());
    let env = |target: EnvelopeTarget| (envelopes.start(target), envelopes.end(target));

    // ── Pitch ───────────────────────────────────────────────
    let shift = env(EnvelopeTarget::PitchShift);
    let detune = env(EnvelopeTarget::Detune);
    let vibrato_depth = env(EnvelopeTarget::VibratoDepth);
    let vibrato = &instrument.vibrato;
    let pitch_at = |ratio: f64, interval: f64, shift: f64, detune: f64, depth: f64| {
        let mut pitch = note_pitch
            + interval
            + instrument.pitch_shift * shift
            + instrument.detune / 100.0 * detune;
        if vibrato.depth != 0.0 {
            let fade_in = (tone.ticks_since_start + ratio - vibrato.delay_ticks).clamp(0.0, 1.0);
            let lfo = vibrato_lfo(vibrato.kind, run.clock.lfo_time + ratio * run.clock.lfo_step);
            pitch += vibrato.depth * depth * fade_in * lfo;
        }
        if let Some(s) = tone.slide {
            let t = ((s.ticks + ratio) / SLIDE_TICKS).clamp(0.0, 1.0);
            pitch = s.from_pitch + (pitch - s.from_pitch) * t;
        }
        pitch
    };
    let pitch_start = pitch_at(ratios.start, interval_start, shift.0, detune.0, vibrato_depth.0);
    let pitch_end = pitch_at(ratios.end, interval_end, shift.1, detune.1, vibrato_depth.1);
    tone.last_pitch = pitch_end;

    let unison = instrument.unison.settings();
    let unison_env = env(EnvelopeTarget::Unison);
    let unison_voices = if supports_unison(&instrument.kind) {
        unison.voices.min(MAX_UNISON_VOICES)
    } else {
        1
    };
    tone.unison_voices = unison_voices;
    tone.unison_sign = unison.sign;

    // ── Kind-specific parameters ────────────────────────────
    let mut supersaw_dynamism = 0.0;
    match &instrument.kind {
        InstrumentKind::Fm {
            operators,
            feedback_amplitude,
            ..
        } => {
            let base_start = frequency_from_pitch(pitch_start);
            let base_end = frequency_from_pitch(pitch_end);
            for (i, op) in operators.iter().take(MAX_FM_OPERATORS).enumerate() {
                load_phase_delta(
                    tone,
                    i,
                    base_start * op.frequency_ratio,
                    base_end * op.frequency_ratio,
                    run,
                );
                let (a, b) = env(EnvelopeTarget::OperatorAmplitude(i));
                let level = op.amplitude.clamp(0.0, FM_AMPLITUDE_MAX) / FM_AMPLITUDE_MAX;
                tone.operator_expressions[i] = level * a;
                tone.operator_expression_deltas[i] = (level * b - level * a) / n;
            }
            let (a, b) = env(EnvelopeTarget::FeedbackAmplitude);
            let level = feedback_amplitude.clamp(0.0, FM_AMPLITUDE_MAX) / FM_AMPLITUDE_MAX;
            tone.feedback_mult = level * a;
            tone.feedback_delta = (level * b - level * a) / n;
        }
        InstrumentKind::Supersaw {
            dynamism,
            spread,
            shape,
        } => {
            let (spread_a, spread_b) = env(EnvelopeTarget::SupersawSpread);
            for (v, detune) in SUPERSAW_DETUNES.iter().enumerate().take(SUPERSAW_VOICES) {
                load_phase_delta(
                    tone,
                    v,
                    frequency_from_pitch(pitch_start + detune * spread * spread_a),
                    frequency_from_pitch(pitch_end + detune * spread * spread_b),
                    run,
                );
            }
            let (a, b) = env(EnvelopeTarget::SupersawDynamism);
            let dyn_start = (dynamism * a).clamp(0.0, 1.0);
            let dyn_end = (dynamism * b).clamp(0.0, 1.0);
            supersaw_dynamism = dyn_start;
            tone.supersaw_dynamism = dyn_start;
            tone.supersaw_dynamism_delta = (dyn_end - dyn_start) / n;
            let (a, b) = env(EnvelopeTarget::SupersawShape);
            let shape_start = (shape * a).clamp(0.0, 1.0);
            tone.supersaw_shape = shape_start;
            tone.supersaw_shape_delta = ((shape * b).clamp(0.0, 1.0) - shape_start) / n;
        }
        InstrumentKind::Noise { .. } => {
            load_phase_delta(
                tone,
                0,
                frequency_from_pitch(pitch_start),
                frequency_from_pitch(pitch_end),
                run,
            );
        }
        kind => {
            let mut deltas = [(0.0, 0.0); MAX_UNISON_VOICES];
            for (v, delta) in deltas.iter_mut().enumerate().take(unison_voices.max(1)) {
                let side = if v == 0 { 1.0 } else { -1.0 };
                let offset = |e: f64| (unison.offset + side * unison.spread) * e;
                *delta = load_phase_delta(
                    tone,
                    v,
                    frequency_from_pitch(pitch_start + offset(unison_env.0)),
                    frequency_from_pitch(pitch_end + offset(unison_env.1)),
                    run,
                );
            }
            match kind {
                InstrumentKind::PulseWidth { pulse_width } => {
                    let (a, b) = env(EnvelopeTarget::PulseWidth);
                    let start = (pulse_width * a).clamp(0.0, 0.5);
                    tone.pulse_width = start;
                    tone.pulse_width_delta = ((pulse_width * b).clamp(0.0, 0.5) - start) / n;
                }
                InstrumentKind::PickedString { sustain, .. } => {
                    if let Some(wave) = run.harmonics {
                        let (a, b) = env(EnvelopeTarget::StringSustain);
                        for (v, &(start, end)) in deltas.iter().enumerate().take(unison_voices) {
                            tone.picked_strings[v].update(
                                wave,
                                &StringRun {
                                    sample_rate: run.sample_rate,
                                    phase_delta_start: start,
                                    phase_delta_end: end,
                                    sustain_start: sustain * a,
                                    sustain_end: sustain * b,
                                    run_length: run.run_length,
                                },
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ── Expression ──────────────────────────────────────────
    let volume = |at_end: bool| {
        volume_multiplier(
            run.overrides
                .value(ModSetting::InstrumentVolume, at_end)
                .unwrap_or(instrument.volume),
        )
    };
    let chord = if instrument.chord.single_tone() {
        1.0
    } else {
        1.0 / ((tone.chord_size.max(1) - 1) as f64 * 0.25 + 1.0)
    };
    let unison_expression = if unison_voices > 1 || supports_unison(&instrument.kind) {
        unison.expression
    } else {
        1.0
    };
    let fixed = chord
        * kernel_expression(&instrument.kind, supersaw_dynamism)
        * unison_expression;
    let size_curve = |size: f64| (size / max_size).max(0.0).powf(1.5);
    let seconds_per_tick = run.clock.seconds_per_tick;
    let fade_in = |ratio: f64| {
        if instrument.fade_in_seconds > 0.0 {
            ((tone.ticks_since_start + ratio) * seconds_per_tick / instrument.fade_in_seconds)
                .clamp(0.0, 1.0)
        } else {
            1.0
        }
    };
    let fade_ticks = tone.forced_fade_ticks.unwrap_or(instrument.fade_out_ticks);
    let fade_out = |ratio: f64| {
        if !tone.released {
            1.0
        } else if fade_ticks <= 0.0 {
            0.0
        } else {
            (1.0 - (tone.ticks_since_released + ratio) / fade_ticks).max(0.0)
        }
    };
    let note_volume = env(EnvelopeTarget::NoteVolume);
    let expression_start = volume(false)
        * fixed
        * size_curve(size_start)
        * note_volume.0
        * fade_in(ratios.start)
        * fade_out(ratios.start);
    let expression_end = volume(true)
        * fixed
        * size_curve(size_end)
        * note_volume.1
        * fade_in(ratios.end)
        * fade_out(ratios.end);
    tone.expression = expression_start;
    tone.expression_delta = (expression_end - expression_start) / n;

    // ── Note filter ─────────────────────────────────────────
    let filter_start = instrument
        .tmp_note_filter_start
        .as_ref()
        .unwrap_or(&instrument.note_filter);
    let filter_end = instrument
        .tmp_note_filter_end
        .as_ref()
        .unwrap_or(&instrument.note_filter);
    let all_freqs = env(EnvelopeTarget::NoteFilterAllFreqs);
    tone.note_filter.load(
        run.sample_rate,
        filter_start,
        filter_end,
        run.run_length,
        |i| {
            let freq = env(EnvelopeTarget::NoteFilterFreq(i));
            let gain = env(EnvelopeTarget::NoteFilterGain(i));
            (
                PointScale {
                    freq: all_freqs.0 * freq.0,
                    gain: gain.0,
                },
                PointScale {
                    freq: all_freqs.1 * freq.1,
                    gain: gain.1,
                },
            )
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::ramp::RunRatios;
    use crate::song::{Chord, FilterControlPoint, FilterKind, FilterSettings, NotePin, Pattern};
    use approx::assert_relative_eq;

    const SR: f64 = 44100.0;

    fn song_with(instrument: Instrument, note: Note) -> Song {
        let mut channel = Channel::pitch(instrument);
        channel.patterns.push(Pattern::with_notes(vec![note]));
        channel.bars = vec![1];
        Song {
            channels: vec![channel],
            ..Default::default()
        }
    }

    fn clock() -> EnvelopeClock {
        EnvelopeClock {
            seconds_per_tick: 2756.25 / SR,
            beats_per_tick: 0.125,
            envelope_speed: 1.0,
            envelope_time: 0.0,
            lfo_time: 0.0,
            lfo_step: 0.0,
            modulated_start: 1.0,
            modulated_end: 1.0,
            ratios: RunRatios {
                start: 0.0,
                end: 1.0,
            },
        }
    }

    fn run<'a>(song: &'a Song, overrides: &'a ModOverrides, bar_tick: f64) -> ToneRun<'a> {
        let channel = &song.channels[0];
        ToneRun {
            song,
            channel,
            instrument: &channel.instruments[0],
            clock: clock(),
            overrides,
            sample_rate: SR,
            run_length: 2756,
            bar: 0,
            bar_tick,
            arpeggio_time: 0.0,
            harmonics: None,
        }
    }

    fn note_tone(pitches: &[i32]) -> Tone {
        let mut tone = Tone::new();
        tone.set_pitches(pitches);
        tone.chord_size = pitches.len();
        tone.note = Some(NoteHandle {
            bar: 0,
            pattern: 0,
            note: 0,
        });
        tone
    }

    #[test]
    fn steady_pitch_has_flat_delta() {
        let song = song_with(Instrument::default(), Note::new(69, 0, 8, 3));
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut tone = note_tone(&[69]);
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut tone);
        assert_relative_eq!(tone.phase_deltas[0], 440.0 / SR, epsilon = 1e-12);
        assert_relative_eq!(tone.phase_delta_scales[0], 1.0);
        // Square wave 0.5, single unison voice 1.4, full size.
        assert_relative_eq!(tone.expression, 0.7, epsilon = 1e-12);
        assert_eq!(tone.expression_delta, 0.0);
    }

    #[test]
    fn bigger_chords_are_quieter_per_tone() {
        let song = song_with(Instrument::default(), Note::chord(vec![60, 64, 67], 0, 8, 3));
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut single = note_tone(&[60]);
        let mut triad = note_tone(&[60, 64, 67]);
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut single);
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut triad);
        assert_relative_eq!(triad.expression, single.expression / 1.5, epsilon = 1e-12);
    }

    #[test]
    fn pins_shape_pitch_and_size() {
        let mut note = Note::new(60, 0, 4, 3);
        note.pins = vec![
            NotePin {
                interval: 0,
                time: 0,
                size: 3,
            },
            NotePin {
                interval: 12,
                time: 4,
                size: 0,
            },
        ];
        let song = song_with(Instrument::default(), note);
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut tone = note_tone(&[60]);
        // Second tick of the note: half a part in, interval 1.5 → 3.
        compute_tone(&run(&song, &overrides, 1.0), &mut envelopes, &mut tone);
        assert!(tone.phase_delta_scales[0] > 1.0, "pitch rises");
        assert!(tone.expression_delta < 0.0, "size falls");
        assert_relative_eq!(tone.last_pitch, 63.0, epsilon = 1e-9);
    }

    #[test]
    fn released_tone_fades_to_silence() {
        let song = song_with(Instrument::default(), Note::new(60, 0, 8, 3));
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut tone = note_tone(&[60]);
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut tone);
        let held = tone.expression;

        tone.release(None);
        tone.ticks_since_released = 5.0;
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut tone);
        // Default fade is six ticks: the last tick runs 1/6 to 0.
        assert_relative_eq!(tone.expression, held / 6.0, epsilon = 1e-12);
        let end = tone.expression + tone.expression_delta * 2756.0;
        assert!(end.abs() < 1e-12, "ends silent: {end}");

        tone.release(Some(0.0));
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut tone);
        assert_eq!(tone.expression, 0.0, "a zero fade is silent at once");
    }

    #[test]
    fn slide_glides_from_previous_pitch() {
        let mut instrument = Instrument::default();
        instrument.transition = crate::song::Transition::Slide;
        let song = song_with(instrument, Note::new(72, 0, 8, 3));
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut tone = note_tone(&[72]);
        tone.slide = Some(crate::dsp::tone::ToneSlide {
            from_pitch: 60.0,
            from_size: 3.0,
            from_ticks: 8.0,
            ticks: 0.0,
        });
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut tone);
        assert_relative_eq!(tone.phase_deltas[0], frequency_from_pitch(60.0) / SR, epsilon = 1e-12);
        assert_relative_eq!(tone.last_pitch, 64.0, epsilon = 1e-9);
    }

    #[test]
    fn arpeggio_walks_the_chord() {
        let order: Vec<usize> = (0..8).map(|i| arpeggio_index(3, i as f64, false)).collect();
        assert_eq!(order, [0, 1, 2, 1, 0, 1, 2, 1]);
        assert_eq!(arpeggio_index(2, 0.5, true), 1, "fast two-note steps twice as often");
        assert_eq!(arpeggio_index(5, 7.0, false), 2);

        let mut instrument = Instrument::default();
        instrument.chord = Chord::Arpeggio;
        let song = song_with(instrument, Note::chord(vec![60, 64, 67], 0, 8, 3));
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut tone = note_tone(&[60, 64, 67]);
        let mut r = run(&song, &overrides, 0.0);
        r.arpeggio_time = 2.0;
        compute_tone(&r, &mut envelopes, &mut tone);
        assert_relative_eq!(tone.last_pitch, 67.0);
    }

    #[test]
    fn note_filter_follows_mod_snapshot() {
        let mut instrument = Instrument::default();
        instrument.note_filter =
            FilterSettings::single(FilterControlPoint::new(FilterKind::LowPass, 20.0, 7.0));
        let mut snapshot = instrument.note_filter.clone();
        snapshot.points[0].freq = 10.0;
        instrument.tmp_note_filter_start = Some(snapshot.clone());
        instrument.tmp_note_filter_end = Some(snapshot);
        let song = song_with(instrument, Note::new(60, 0, 8, 3));
        let overrides = ModOverrides::default();
        let mut envelopes = EnvelopeComputer::default();
        let mut tone = note_tone(&[60]);
        compute_tone(&run(&song, &overrides, 0.0), &mut envelopes, &mut tone);
        assert_eq!(tone.note_filter.len(), 1);
    }

    #[test]
    fn mod_tone_reads_pin_sizes() {
        let mut note = Note::new(0, 0, 4, 0);
        note.pins[0].size = 0;
        note.pins[1].size = 80;
        let song = song_with(Instrument::default(), note);
        let tone = note_tone(&[0]);
        let (start, end) = mod_tone_values(&song, &song.channels[0], &tone, 0, 2.0).unwrap();
        // Tick 2 is part 1 of 4: 20 then 30.
        assert_relative_eq!(start, 20.0);
        assert_relative_eq!(end, 30.0);
    }
}
