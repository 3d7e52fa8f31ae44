//! Instrument State — per-instrument runtime: tone lists, effect delay lines,
//! mod overrides, timers and the awake/flushing/deactivated state machine.

use tracing::debug;

use crate::config::{ARPEGGIO_STEPS_PER_TICK, TICKS_PER_PART, VIBRATO_PERIOD_SECONDS};
use crate::dsp::effects::{EffectChain, EffectRun, EffectValues};
use crate::dsp::envelope::{EnvelopeClock, EnvelopeComputer, NoteTiming};
use crate::dsp::kernel::{KernelContext, render_tone};
use crate::dsp::mixer::Mixer;
use crate::dsp::oscillator::{WaveTables, Wavetable, harmonics_hash, harmonics_wave};
use crate::dsp::ramp::RunRatios;
use crate::dsp::tone::{NoteHandle, ToneId, TonePool};
use crate::dsp::tone_params::{ToneRun, compute_tone};
use crate::song::{Channel, Instrument, InstrumentKind, INSTRUMENT_MOD_SLOTS, ModSetting, Song};

// ── Mod overrides ───────────────────────────────────────────

/// Instrument settings currently driven by mod channels, as setting values at
/// the tick (or run) start and end. Cleared and refilled every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModOverrides {
    slots: [Option<(f64, f64)>; INSTRUMENT_MOD_SLOTS],
}

impl ModOverrides {
    /// Filter point settings have no slot and are ignored here.
    pub fn set(&mut self, setting: ModSetting, start: f64, end: f64) {
        if let Some(slot) = setting.instrument_slot() {
            self.slots[slot] = Some((start, end));
        }
    }

    pub fn value(&self, setting: ModSetting, at_end: bool) -> Option<f64> {
        let (start, end) = self.slots[setting.instrument_slot()?]?;
        Some(if at_end { end } else { start })
    }

    /// The overrides interpolated to one run of the tick.
    pub fn for_run(&self, ratios: RunRatios) -> Self {
        let mut run = *self;
        for slot in run.slots.iter_mut().flatten() {
            *slot = ratios.lerp(slot.0, slot.1);
        }
        run
    }

    pub fn clear(&mut self) {
        self.slots = [None; INSTRUMENT_MOD_SLOTS];
    }
}

// ── Activity ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activity {
    /// Tones are sounding.
    Awake,
    /// No tones left; delay lines are draining. `elapsed` counts samples.
    Flushing { elapsed: f64 },
    /// Effect state zeroed; nothing is rendered until a tone arrives.
    Deactivated,
}

/// Everything one instrument needs to render one run.
#[derive(Debug, Clone, Copy)]
pub struct InstrumentRun<'a> {
    pub song: &'a Song,
    pub channel: &'a Channel,
    pub instrument: &'a Instrument,
    pub tables: &'a WaveTables,
    pub sample_rate: f64,
    pub samples_per_tick: f64,
    pub run_length: usize,
    pub ratios: RunRatios,
    pub bar: usize,
    pub bar_tick: u32,
    /// Song reverb multiplier at the run start and end.
    pub song_reverb: (f64, f64),
    /// First run of a tick.
    pub tick_start: bool,
}

#[derive(Debug, Clone)]
pub struct InstrumentState {
    pub active: Vec<ToneId>,
    pub released: Vec<ToneId>,
    pub live: Vec<ToneId>,
    /// Note the active tones belong to.
    pub current_note: Option<NoteHandle>,
    pub effects: EffectChain,
    /// Instrument-level envelopes, for the effects.
    pub envelopes: EnvelopeComputer,
    tone_envelopes: EnvelopeComputer,
    pub overrides: ModOverrides,
    /// Which filter snapshots a mod wrote this tick: (EQ, note).
    pub filter_mods: (bool, bool),
    pub activity: Activity,
    /// Envelope beats, speed applied.
    pub envelope_time: f64,
    /// Arpeggio steps.
    pub arpeggio_time: f64,
    /// Vibrato LFO cycles.
    pub vibrato_time: f64,
    /// Ticks since the instrument last woke.
    pub ticks_awake: f64,
    harmonics: Option<(u64, Wavetable)>,
    /// Scratch for the scheduler's tone matching.
    pub(crate) scratch: Vec<ToneId>,
    mono: Vec<f64>,
    left: Vec<f64>,
    right: Vec<f64>,
}

fn harmonics_controls(kind: &InstrumentKind) -> Option<&[u8]> {
    match kind {
        InstrumentKind::Harmonics { harmonics } | InstrumentKind::PickedString { harmonics, .. } => {
            Some(harmonics)
        }
        _ => None,
    }
}

fn beats_per_tick(song: &Song) -> f64 {
    1.0 / (song.parts_per_beat.max(1) * TICKS_PER_PART) as f64
}

impl InstrumentState {
    pub fn new(seed: u64, max_grains: usize) -> Self {
        InstrumentState {
            active: Vec::new(),
            released: Vec::new(),
            live: Vec::new(),
            current_note: None,
            effects: EffectChain::new(seed, max_grains),
            envelopes: EnvelopeComputer::default(),
            tone_envelopes: EnvelopeComputer::default(),
            overrides: ModOverrides::default(),
            filter_mods: (false, false),
            activity: Activity::Deactivated,
            envelope_time: 0.0,
            arpeggio_time: 0.0,
            vibrato_time: 0.0,
            ticks_awake: 0.0,
            harmonics: None,
            scratch: Vec::new(),
            mono: Vec::new(),
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    pub fn tone_count(&self) -> usize {
        self.active.len() + self.released.len() + self.live.len()
    }

    /// Active, released and live tones, in that order.
    pub fn tone_ids(&self) -> impl Iterator<Item = ToneId> + '_ {
        self.active
            .iter()
            .chain(&self.released)
            .chain(&self.live)
            .copied()
    }

    /// Pre-size scratch buffers, tone lists and every delay line.
    pub fn warm_up(&mut self, sample_rate: f64, max_samples_per_tick: f64, max_tones: usize) {
        let samples = max_samples_per_tick.ceil() as usize + 1;
        self.mono.reserve(samples);
        self.left.reserve(samples);
        self.right.reserve(samples);
        self.active.reserve(max_tones);
        self.released.reserve(max_tones);
        self.live.reserve(max_tones);
        self.scratch.reserve(max_tones);
        self.effects.allocate_all(sample_rate, max_samples_per_tick);
    }

    /// Zero all effect state and timers. Tone lists are left to the scheduler.
    pub fn deactivate(&mut self) {
        self.effects.reset();
        self.activity = Activity::Deactivated;
        self.envelope_time = 0.0;
        self.arpeggio_time = 0.0;
        self.vibrato_time = 0.0;
        self.ticks_awake = 0.0;
    }

    fn envelope_speed(&self, instrument: &Instrument) -> f64 {
        self.overrides
            .value(ModSetting::EnvelopeSpeed, false)
            .unwrap_or(instrument.envelope_speed)
    }

    fn vibrato_step(instrument: &Instrument, seconds_per_tick: f64) -> f64 {
        seconds_per_tick * instrument.vibrato.speed / VIBRATO_PERIOD_SECONDS
    }

    /// Move the timers past the tick that just ended.
    pub fn advance_tick(&mut self, song: &Song, instrument: &Instrument, seconds_per_tick: f64) {
        if self.activity == Activity::Deactivated {
            return;
        }
        self.envelope_time += beats_per_tick(song) * self.envelope_speed(instrument);
        let arpeggio_speed = self
            .overrides
            .value(ModSetting::ArpeggioSpeed, false)
            .unwrap_or(instrument.arpeggio_speed);
        self.arpeggio_time += arpeggio_speed * ARPEGGIO_STEPS_PER_TICK;
        self.vibrato_time += Self::vibrato_step(instrument, seconds_per_tick);
        self.ticks_awake += 1.0;
    }

    /// Render every tone for one run, run the effects chain and add the result
    /// to the mixer. Deactivated instruments without tones cost nothing.
    pub fn render_run(&mut self, run: &InstrumentRun<'_>, pool: &mut TonePool, mixer: &mut Mixer) {
        let has_tones = self.tone_count() > 0;
        match (self.activity, has_tones) {
            (Activity::Deactivated, false) => return,
            (_, true) => {
                if self.activity == Activity::Deactivated {
                    debug!("instrument woke");
                }
                self.activity = Activity::Awake;
            }
            (Activity::Awake, false) => self.activity = Activity::Flushing { elapsed: 0.0 },
            (Activity::Flushing { .. }, false) => {}
        }

        let instrument = run.instrument;
        let n = run.run_length;
        let seconds_per_tick = run.samples_per_tick / run.sample_rate;

        if let Some(controls) = harmonics_controls(&instrument.kind) {
            let hash = harmonics_hash(controls);
            if self.harmonics.as_ref().map(|(h, _)| *h) != Some(hash) {
                self.harmonics = Some((hash, harmonics_wave(controls)));
            }
        }

        let overrides = self.overrides.for_run(run.ratios);
        let clock = EnvelopeClock {
            seconds_per_tick,
            beats_per_tick: beats_per_tick(run.song),
            envelope_speed: self.envelope_speed(instrument),
            envelope_time: self.envelope_time,
            lfo_time: self.vibrato_time,
            lfo_step: Self::vibrato_step(instrument, seconds_per_tick),
            modulated_start: overrides.value(ModSetting::EnvelopeAmount, false).unwrap_or(1.0),
            modulated_end: overrides.value(ModSetting::EnvelopeAmount, true).unwrap_or(1.0),
            ratios: run.ratios,
        };

        let InstrumentState {
            active,
            released,
            live,
            effects,
            envelopes,
            tone_envelopes,
            activity,
            arpeggio_time,
            ticks_awake,
            harmonics,
            mono,
            left,
            right,
            ..
        } = self;

        envelopes.compute_envelopes(
            instrument,
            &clock,
            &NoteTiming {
                tick_time: *ticks_awake,
                size_start: crate::config::NOTE_SIZE_MAX as f64,
                size_end: crate::config::NOTE_SIZE_MAX as f64,
                pitch: 0.0,
            },
            None,
        );

        mono.clear();
        mono.resize(n, 0.0);
        left.resize(n, 0.0);
        right.resize(n, 0.0);

        let harmonics = harmonics.as_ref().map(|(_, wave)| wave);
        let tone_run = ToneRun {
            song: run.song,
            channel: run.channel,
            instrument,
            clock,
            overrides: &overrides,
            sample_rate: run.sample_rate,
            run_length: n,
            bar: run.bar,
            bar_tick: run.bar_tick as f64,
            arpeggio_time: *arpeggio_time,
            harmonics,
        };
        let ctx = KernelContext {
            tables: run.tables,
            harmonics,
        };
        for &id in active.iter().chain(released.iter()).chain(live.iter()) {
            if let Some(tone) = pool.get_mut(id) {
                compute_tone(&tone_run, tone_envelopes, tone);
                render_tone(&instrument.kind, &ctx, tone, mono);
                tone.note_filter.sanitize();
            }
        }

        let start = EffectValues::resolve(instrument, envelopes, &overrides, run.song_reverb.0, false);
        let end = EffectValues::resolve(instrument, envelopes, &overrides, run.song_reverb.1, true);
        let input_mult = match *activity {
            Activity::Flushing { elapsed } => {
                let tail = EffectChain::tail_samples(instrument, &end, run.sample_rate, run.samples_per_tick);
                if tail > 0.0 {
                    (
                        (1.0 - elapsed / tail).max(0.0),
                        (1.0 - (elapsed + n as f64) / tail).max(0.0),
                    )
                } else {
                    (0.0, 0.0)
                }
            }
            _ => (1.0, 1.0),
        };
        effects.process(
            mono,
            left,
            right,
            &EffectRun {
                instrument,
                start,
                end,
                eq_start: instrument
                    .tmp_eq_filter_start
                    .as_ref()
                    .unwrap_or(&instrument.eq_filter),
                eq_end: instrument
                    .tmp_eq_filter_end
                    .as_ref()
                    .unwrap_or(&instrument.eq_filter),
                sample_rate: run.sample_rate,
                samples_per_tick: run.samples_per_tick,
                tick_start: run.tick_start,
                input_mult,
            },
        );
        mixer.add(left, right);

        if let Activity::Flushing { elapsed } = *activity {
            let elapsed = elapsed + n as f64;
            let tail = EffectChain::tail_samples(instrument, &end, run.sample_rate, run.samples_per_tick);
            if elapsed >= tail + effects.longest_delay() as f64 {
                debug!(elapsed, "instrument flushed, deactivating");
                self.deactivate();
            } else {
                *activity = Activity::Flushing { elapsed };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::tone::Tone;
    use crate::song::{Note, Pattern};
    use approx::assert_relative_eq;

    const SR: f64 = 44100.0;
    const SPT: f64 = 2756.25;

    fn song() -> Song {
        let mut channel = Channel::pitch(Instrument::default());
        channel.patterns.push(Pattern::with_notes(vec![Note::new(69, 0, 8, 3)]));
        channel.bars = vec![1];
        Song {
            channels: vec![channel],
            ..Default::default()
        }
    }

    fn run<'a>(song: &'a Song, tables: &'a WaveTables, n: usize) -> InstrumentRun<'a> {
        let channel = &song.channels[0];
        InstrumentRun {
            song,
            channel,
            instrument: &channel.instruments[0],
            tables,
            sample_rate: SR,
            samples_per_tick: SPT,
            run_length: n,
            ratios: RunRatios::from_countdown(SPT, n, SPT),
            bar: 0,
            bar_tick: 0,
            song_reverb: (1.0, 1.0),
            tick_start: true,
        }
    }

    fn output(mixer: &mut Mixer, song: &Song, n: usize) -> Vec<f32> {
        let mut l = vec![0.0f32; n];
        let mut r = vec![0.0f32; n];
        mixer.output(song, (1.0, 1.0), SR, &mut l, &mut r);
        l
    }

    #[test]
    fn overrides_interpolate_per_run() {
        let mut overrides = ModOverrides::default();
        overrides.set(ModSetting::Reverb, 0.0, 1.0);
        overrides.set(ModSetting::NoteFilterFreq(0), 3.0, 3.0);
        let half = overrides.for_run(RunRatios {
            start: 0.5,
            end: 1.0,
        });
        assert_relative_eq!(half.value(ModSetting::Reverb, false).unwrap(), 0.5);
        assert_relative_eq!(half.value(ModSetting::Reverb, true).unwrap(), 1.0);
        assert!(half.value(ModSetting::Pan, false).is_none());
        assert!(half.value(ModSetting::NoteFilterFreq(0), false).is_none());
        overrides.clear();
        assert!(overrides.value(ModSetting::Reverb, true).is_none());
    }

    #[test]
    fn sounding_tone_reaches_the_mixer() {
        let song = song();
        let tables = WaveTables::new(1);
        let mut pool = TonePool::new();
        let mut mixer = Mixer::new(&song, SR);
        let mut state = InstrumentState::new(1, 16);

        let id = pool.allocate();
        {
            let tone: &mut Tone = pool.get_mut(id).unwrap();
            tone.set_pitches(&[69]);
            tone.note = Some(NoteHandle {
                bar: 0,
                pattern: 0,
                note: 0,
            });
        }
        state.active.push(id);

        mixer.clear(512);
        state.render_run(&run(&song, &tables, 512), &mut pool, &mut mixer);
        let out = output(&mut mixer, &song, 512);
        assert_eq!(state.activity, Activity::Awake);
        let peak = out.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(peak > 0.5, "peak {peak}");
        assert!(!pool.get(id).unwrap().fresh);
    }

    #[test]
    fn silent_instrument_stays_asleep() {
        let song = song();
        let tables = WaveTables::new(1);
        let mut pool = TonePool::new();
        let mut mixer = Mixer::new(&song, SR);
        let mut state = InstrumentState::new(1, 16);
        mixer.clear(64);
        state.render_run(&run(&song, &tables, 64), &mut pool, &mut mixer);
        assert_eq!(state.activity, Activity::Deactivated);
    }

    #[test]
    fn reverb_tail_flushes_then_deactivates() {
        let mut song = song();
        song.channels[0].instruments[0].effects.reverb = true;
        let tables = WaveTables::new(1);
        let mut pool = TonePool::new();
        let mut mixer = Mixer::new(&song, SR);
        let mut state = InstrumentState::new(1, 16);
        state.activity = Activity::Awake;
        state.effects.allocate_necessary_buffers(&song.channels[0].instruments[0], SR, SPT);

        let mut runs = 0;
        while state.activity != Activity::Deactivated {
            mixer.clear(1024);
            state.render_run(&run(&song, &tables, 1024), &mut pool, &mut mixer);
            runs += 1;
            assert!(runs < 10_000, "never deactivated");
            if runs == 1 {
                assert!(matches!(state.activity, Activity::Flushing { .. }));
            }
        }
        assert!(runs > 1, "reverb needs time to drain");
        assert_eq!(state.envelope_time, 0.0);
    }

    #[test]
    fn timers_follow_speed_settings() {
        let song = song();
        let mut instrument = Instrument::default();
        instrument.arpeggio_speed = 2.0;
        let mut state = InstrumentState::new(1, 16);
        state.advance_tick(&song, &instrument, SPT / SR);
        assert_eq!(state.arpeggio_time, 0.0, "asleep instruments keep still");

        state.activity = Activity::Awake;
        state.advance_tick(&song, &instrument, SPT / SR);
        assert_relative_eq!(state.arpeggio_time, 2.0 * ARPEGGIO_STEPS_PER_TICK);
        assert_relative_eq!(state.envelope_time, 0.125);

        state.overrides.set(ModSetting::ArpeggioSpeed, 4.0, 4.0);
        state.advance_tick(&song, &instrument, SPT / SR);
        assert_relative_eq!(state.arpeggio_time, 6.0 * ARPEGGIO_STEPS_PER_TICK);
    }
}
