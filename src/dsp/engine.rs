//! Synthesis driver — owns the song, the tone pool and every piece of
//! runtime state, and renders the song into caller-provided stereo buffers.
//!
//! Rendering walks the song tick by tick. At each tick boundary the scheduler
//! updates tone lists, mod channels are evaluated and samples-per-tick is
//! fixed; the tick is then rendered in one or more runs (a run stops early at
//! the end of the caller's buffer and the rest of the tick continues on the
//! next call). Parameters ramp linearly across every run so splits are
//! seamless.

use tracing::{debug, trace};

use crate::config::{MOD_SLOTS, SynthConfig, TEMPO_MIN};
use crate::dsp::cursor::{PlaybackCursor, samples_per_tick};
use crate::dsp::instrument_state::InstrumentRun;
use crate::dsp::mixer::Mixer;
use crate::dsp::oscillator::WaveTables;
use crate::dsp::ramp::RunRatios;
use crate::dsp::scheduler::{ChannelState, TickContext, end_tick, schedule_tick};
use crate::dsp::tone::TonePool;
use crate::dsp::tone_params::mod_tone_values;
use crate::error::SynthError;
use crate::song::{ChannelKind, FilterSettings, ModSetting, Modulator, Song};

/// Song-level settings currently driven by mod channels, at the tick start and end.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SongMods {
    tempo: Option<(f64, f64)>,
    volume: Option<(f64, f64)>,
    reverb: Option<(f64, f64)>,
}

/// Seed for one channel's instruments, derived from the synth seed.
fn channel_seed(seed: u64, channel: usize) -> u64 {
    seed.wrapping_add((channel as u64) << 8)
}

/// Refresh a mod snapshot of `base` and return it for editing.
fn filter_snapshot<'a>(
    slot: &'a mut Option<FilterSettings>,
    base: &FilterSettings,
    fresh: bool,
) -> &'a mut FilterSettings {
    let snapshot = slot.get_or_insert_with(FilterSettings::default);
    if fresh {
        snapshot.copy_from(base);
    }
    snapshot
}

#[derive(Debug)]
pub struct Synth {
    config: SynthConfig,
    song: Song,
    tables: WaveTables,
    pool: TonePool,
    channels: Vec<ChannelState>,
    mixer: Mixer,
    cursor: PlaybackCursor,
    playing: bool,
    /// Held live pitches as `(channel, pitch)`.
    live_pitches: Vec<(usize, i32)>,
    song_mods: SongMods,
    mod_scratch: Vec<(Modulator, f64, f64)>,
}

impl Synth {
    pub fn new(mut song: Song, config: SynthConfig) -> Result<Self, SynthError> {
        config.validate()?;
        song.validate();
        let mixer = Mixer::new(&song, config.sample_rate);
        let mut synth = Synth {
            tables: WaveTables::new(config.seed),
            pool: TonePool::new(),
            channels: Vec::new(),
            mixer,
            cursor: PlaybackCursor::default(),
            playing: false,
            live_pitches: Vec::new(),
            song_mods: SongMods::default(),
            mod_scratch: Vec::new(),
            config,
            song,
        };
        synth.sync_channels();
        Ok(synth)
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    /// Match channel and instrument state to the song's topology.
    fn sync_channels(&mut self) {
        let count = self.song.channels.len();
        if self.channels.len() > count {
            for mut state in self.channels.drain(count..) {
                state.reset(&mut self.pool);
            }
        }
        while self.channels.len() < count {
            let index = self.channels.len();
            let seed = channel_seed(self.config.seed, index);
            self.channels.push(ChannelState::new(
                &self.song.channels[index],
                seed,
                self.config.max_grains,
            ));
        }
        for (index, (state, channel)) in self
            .channels
            .iter_mut()
            .zip(&self.song.channels)
            .enumerate()
        {
            if state.instruments.len() != channel.instruments.len() {
                let seed = channel_seed(self.config.seed, index);
                state.sync(channel, seed, self.config.max_grains, &mut self.pool);
            }
        }
    }

    // ── Song ────────────────────────────────────────────────

    /// Replace the song. Every tone is dropped and playback returns to bar 0.
    pub fn set_song(&mut self, mut song: Song) {
        song.validate();
        for state in &mut self.channels {
            state.reset(&mut self.pool);
        }
        self.channels.clear();
        self.mixer = Mixer::new(&song, self.config.sample_rate);
        self.song = song;
        self.cursor.go_to_bar(0);
        self.sync_channels();
        debug!(
            channels = self.song.channels.len(),
            bars = self.song.bar_count,
            "song loaded"
        );
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    /// Edit the song in place. Topology changes are picked up on the next
    /// `synthesize`; call `Song::validate` after changing modulators.
    pub fn song_mut(&mut self) -> &mut Song {
        &mut self.song
    }

    // ── Transport ───────────────────────────────────────────

    pub fn play(&mut self) {
        if self.cursor.ended {
            self.snap_to_start();
        }
        self.playing = true;
        debug!(bar = self.cursor.bar, "play");
    }

    /// Stop advancing. Pattern tones are released and ring out.
    pub fn pause(&mut self) {
        self.playing = false;
        self.release_pattern_tones();
        debug!(bar = self.cursor.bar, "pause");
    }

    /// Pause and drop all runtime state: tones, effect tails and the limiter.
    pub fn stop(&mut self) {
        self.playing = false;
        for state in &mut self.channels {
            state.reset(&mut self.pool);
        }
        self.mixer.reset();
        self.cursor.go_to_bar(0);
        debug!("stop");
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn go_to_bar(&mut self, bar: usize) -> Result<(), SynthError> {
        let bar_count = self.song.bar_count.max(1);
        if bar >= bar_count {
            return Err(SynthError::BarOutOfRange { bar, bar_count });
        }
        self.release_pattern_tones();
        self.cursor.go_to_bar(bar);
        debug!(bar, "go to bar");
        Ok(())
    }

    pub fn skip_bar(&mut self) {
        let bar = (self.cursor.bar + 1) % self.song.bar_count.max(1);
        self.release_pattern_tones();
        self.cursor.go_to_bar(bar);
        debug!(bar, "skip bar");
    }

    pub fn go_to_previous_bar(&mut self) {
        self.release_pattern_tones();
        self.cursor.previous_bar(&self.song);
        debug!(bar = self.cursor.bar, "previous bar");
    }

    pub fn snap_to_start(&mut self) {
        self.release_pattern_tones();
        self.cursor.go_to_bar(0);
    }

    /// Loop passes before playing past the loop; negative loops forever.
    pub fn set_loop_repeat_count(&mut self, count: i32) {
        self.cursor.loop_repeat_count = count;
    }

    fn release_pattern_tones(&mut self) {
        for state in &mut self.channels {
            state.release_all(&mut self.pool);
        }
    }

    // ── Live input ──────────────────────────────────────────

    fn check_channel(&self, channel: usize) -> Result<(), SynthError> {
        let channel_count = self.song.channels.len();
        match self.song.channels.get(channel) {
            Some(c) if c.kind != ChannelKind::Mod => Ok(()),
            _ => Err(SynthError::ChannelOutOfRange {
                channel,
                channel_count,
            }),
        }
    }

    /// Hold `pitch` on `channel` until `live_note_off`. Takes effect at the
    /// next tick boundary.
    pub fn live_note_on(&mut self, channel: usize, pitch: i32) -> Result<(), SynthError> {
        self.check_channel(channel)?;
        if !self.live_pitches.contains(&(channel, pitch)) {
            self.live_pitches.push((channel, pitch));
        }
        Ok(())
    }

    pub fn live_note_off(&mut self, channel: usize, pitch: i32) -> Result<(), SynthError> {
        self.check_channel(channel)?;
        self.live_pitches.retain(|&held| held != (channel, pitch));
        Ok(())
    }

    pub fn live_notes_off(&mut self) {
        self.live_pitches.clear();
    }

    // ── Warm-up ─────────────────────────────────────────────

    /// Pre-size the tone pool, every delay line and scratch buffer for the
    /// slowest reachable tempo, so steady-state rendering does not allocate.
    pub fn warm_up(&mut self) {
        self.sync_channels();
        let sample_rate = self.config.sample_rate;
        let max_samples_per_tick = samples_per_tick(&self.song, TEMPO_MIN, sample_rate);
        self.pool.warm_up(self.config.warm_up_tone_count);
        for state in &mut self.channels {
            for instrument in &mut state.instruments {
                instrument.warm_up(
                    sample_rate,
                    max_samples_per_tick,
                    self.config.max_tones_per_channel,
                );
            }
        }
        self.mixer.reserve(max_samples_per_tick.ceil() as usize + 1);
        self.live_pitches.reserve(16);
        self.mod_scratch.reserve(MOD_SLOTS * self.song.channels.len());
        debug!(
            max_samples_per_tick,
            tones = self.config.warm_up_tone_count,
            "warmed up"
        );
    }

    // ── Rendering ───────────────────────────────────────────

    /// Render `sample_count` samples into `left` and `right`. Patterns are
    /// read and the cursor advances only while `playing`; live notes and
    /// effect tails sound either way.
    pub fn synthesize(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        sample_count: usize,
        playing: bool,
    ) -> Result<(), SynthError> {
        if left.len() < sample_count || right.len() < sample_count {
            return Err(SynthError::BufferTooShort {
                requested: sample_count,
                left: left.len(),
                right: right.len(),
            });
        }
        self.sync_channels();

        let mut written = 0;
        while written < sample_count {
            let advancing = playing && !self.cursor.ended;
            let tick_start = self.cursor.tick_done();
            if tick_start {
                self.begin_tick(advancing);
            }
            // The song may have changed between calls, mid-tick.
            self.allocate_buffers();
            let remaining = sample_count - written;
            let run_length = (self.cursor.tick_countdown.ceil() as usize).clamp(1, remaining);
            let end = written + run_length;
            self.render_run(run_length, tick_start, &mut left[written..end], &mut right[written..end]);
            self.cursor.tick_countdown -= run_length as f64;
            written = end;
            if self.cursor.tick_done() {
                self.end_tick(advancing);
            }
        }
        Ok(())
    }

    fn begin_tick(&mut self, playing: bool) {
        let song = &self.song;
        let pool = &mut self.pool;
        for (index, (channel, state)) in song.channels.iter().zip(&mut self.channels).enumerate() {
            let ctx = TickContext {
                song,
                bar: self.cursor.bar,
                bar_tick: self.cursor.bar_tick(),
                playing,
                live_pitches: &self.live_pitches,
                channel_index: index,
                max_tones: self.config.max_tones_per_channel,
            };
            schedule_tick(state, channel, &ctx, pool);
        }

        self.apply_mods();

        let sample_rate = self.config.sample_rate;
        let tempo = self.song_mods.tempo.map_or(self.song.tempo, |(start, _)| start);
        let spt = samples_per_tick(&self.song, tempo, sample_rate);
        self.cursor.samples_per_tick = spt;
        self.cursor.tick_countdown += spt;
    }

    /// Size delay lines for the enabled effects. Cheap when nothing grows.
    fn allocate_buffers(&mut self) {
        let sample_rate = self.config.sample_rate;
        let spt = self.cursor.samples_per_tick;
        for (channel, state) in self.song.channels.iter().zip(self.channels.iter_mut()) {
            for (instrument, inst_state) in channel.instruments.iter().zip(state.instruments.iter_mut()) {
                inst_state
                    .effects
                    .allocate_necessary_buffers(instrument, sample_rate, spt);
            }
        }
    }

    /// Turn sounding mod notes into overrides and filter snapshots.
    fn apply_mods(&mut self) {
        self.song_mods = SongMods::default();
        for state in &mut self.channels {
            for instrument in &mut state.instruments {
                instrument.overrides.clear();
                instrument.filter_mods = (false, false);
            }
        }

        let bar = self.cursor.bar;
        let bar_tick = self.cursor.bar_tick() as f64;
        self.mod_scratch.clear();
        for (channel, state) in self.song.channels.iter().zip(&self.channels) {
            if channel.kind != ChannelKind::Mod {
                continue;
            }
            for &id in &state.mod_tones {
                let Some(tone) = self.pool.get(id) else {
                    continue;
                };
                let Some(modulator) = usize::try_from(tone.base_pitch())
                    .ok()
                    .and_then(|slot| channel.modulators.get(slot))
                    .filter(|m| !m.invalid)
                else {
                    continue;
                };
                if let Some((start, end)) = mod_tone_values(&self.song, channel, tone, bar, bar_tick) {
                    self.mod_scratch.push((*modulator, start, end));
                }
            }
        }

        for &(modulator, start, end) in &self.mod_scratch {
            let setting = modulator.setting;
            let value = (setting.to_setting(start), setting.to_setting(end));
            match setting {
                ModSetting::Tempo => self.song_mods.tempo = Some(value),
                ModSetting::SongVolume => self.song_mods.volume = Some(value),
                ModSetting::SongReverb => self.song_mods.reverb = Some(value),
                _ => {
                    let Some(instrument) = self
                        .song
                        .channels
                        .get_mut(modulator.channel)
                        .and_then(|c| c.instruments.get_mut(modulator.instrument))
                    else {
                        continue;
                    };
                    let Some(state) = self
                        .channels
                        .get_mut(modulator.channel)
                        .and_then(|c| c.instruments.get_mut(modulator.instrument))
                    else {
                        continue;
                    };
                    match setting {
                        ModSetting::EqFilterFreq(point) => {
                            let fresh = !state.filter_mods.0;
                            state.filter_mods.0 = true;
                            let base = &instrument.eq_filter;
                            for (slot, freq) in [
                                (&mut instrument.tmp_eq_filter_start, value.0),
                                (&mut instrument.tmp_eq_filter_end, value.1),
                            ] {
                                if let Some(p) = filter_snapshot(slot, base, fresh).points.get_mut(point) {
                                    p.freq = freq;
                                }
                            }
                        }
                        ModSetting::NoteFilterFreq(point) => {
                            let fresh = !state.filter_mods.1;
                            state.filter_mods.1 = true;
                            let base = &instrument.note_filter;
                            for (slot, freq) in [
                                (&mut instrument.tmp_note_filter_start, value.0),
                                (&mut instrument.tmp_note_filter_end, value.1),
                            ] {
                                if let Some(p) = filter_snapshot(slot, base, fresh).points.get_mut(point) {
                                    p.freq = freq;
                                }
                            }
                        }
                        other => state.overrides.set(other, value.0, value.1),
                    }
                }
            }
        }

        // Snapshots nobody wrote this tick fall back to the settings.
        for (channel, state) in self.song.channels.iter_mut().zip(&self.channels) {
            for (instrument, inst_state) in channel.instruments.iter_mut().zip(&state.instruments) {
                if !inst_state.filter_mods.0 {
                    instrument.tmp_eq_filter_start = None;
                    instrument.tmp_eq_filter_end = None;
                }
                if !inst_state.filter_mods.1 {
                    instrument.tmp_note_filter_start = None;
                    instrument.tmp_note_filter_end = None;
                }
            }
        }
    }

    fn render_run(&mut self, run_length: usize, tick_start: bool, left: &mut [f32], right: &mut [f32]) {
        let song = &self.song;
        let cursor = &self.cursor;
        let sample_rate = self.config.sample_rate;
        let spt = cursor.samples_per_tick;
        let ratios = RunRatios::from_countdown(cursor.tick_countdown, run_length, spt);
        let lerp = |m: Option<(f64, f64)>, base: f64| m.map_or((base, base), |(s, e)| ratios.lerp(s, e));
        let song_reverb = lerp(self.song_mods.reverb, 1.0);
        let volume = lerp(self.song_mods.volume, song.volume);
        let mixer = &mut self.mixer;

        mixer.clear(run_length);
        for (channel, state) in song.channels.iter().zip(&mut self.channels) {
            if channel.kind == ChannelKind::Mod {
                continue;
            }
            for (instrument, inst_state) in channel.instruments.iter().zip(state.instruments.iter_mut()) {
                let run = InstrumentRun {
                    song,
                    channel,
                    instrument,
                    tables: &self.tables,
                    sample_rate,
                    samples_per_tick: spt,
                    run_length,
                    ratios,
                    bar: cursor.bar,
                    bar_tick: cursor.bar_tick(),
                    song_reverb,
                    tick_start,
                };
                inst_state.render_run(&run, &mut self.pool, mixer);
            }
        }
        mixer.output(song, volume, sample_rate, left, right);
    }

    fn end_tick(&mut self, playing: bool) {
        let seconds_per_tick = self.cursor.samples_per_tick / self.config.sample_rate;
        for (channel, state) in self.song.channels.iter().zip(self.channels.iter_mut()) {
            end_tick(state, channel, &mut self.pool);
            for (instrument, inst_state) in channel.instruments.iter().zip(state.instruments.iter_mut()) {
                inst_state.advance_tick(&self.song, instrument, seconds_per_tick);
            }
        }
        if !playing {
            return;
        }
        if self.cursor.advance_tick(&self.song) {
            trace!(bar = self.cursor.bar, "bar");
        }
        if self.cursor.ended {
            self.playing = false;
            debug!("reached the end of the song");
        }
    }

    // ── Inspection ──────────────────────────────────────────

    /// Tones handed out by the pool since the synth was created.
    pub fn allocation_count(&self) -> usize {
        self.pool.allocation_count()
    }

    /// Tones currently sounding or fading, mod tones included.
    pub fn tone_count(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::oscillator::frequency_from_pitch;
    use crate::song::{
        Channel, FilterControlPoint, FilterKind, Instrument, Note, Pattern, Transition,
    };

    const SR: f64 = 44100.0;

    fn one_bar_song(instrument: Instrument, notes: Vec<Note>) -> Song {
        let mut channel = Channel::pitch(instrument);
        channel.patterns.push(Pattern::with_notes(notes));
        channel.bars = vec![1];
        Song {
            channels: vec![channel],
            ..Default::default()
        }
    }

    fn render(synth: &mut Synth, samples: usize) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0f32; samples];
        let mut right = vec![0.0f32; samples];
        synth.synthesize(&mut left, &mut right, samples, true).unwrap();
        (left, right)
    }

    /// Average period in samples from interpolated upward zero crossings.
    fn measured_period(samples: &[f32]) -> f64 {
        let mut crossings = Vec::new();
        for i in 1..samples.len() {
            let (a, b) = (samples[i - 1] as f64, samples[i] as f64);
            if a < 0.0 && b >= 0.0 {
                crossings.push(i as f64 - 1.0 + a / (a - b));
            }
        }
        let first = crossings[0];
        let last = crossings[crossings.len() - 1];
        (last - first) / (crossings.len() - 1) as f64
    }

    #[test]
    fn square_wave_has_pitch_period_and_level() {
        let song = one_bar_song(Instrument::default(), vec![Note::new(60, 0, 16, 3)]);
        let mut synth = Synth::new(song, SynthConfig::with_sample_rate(SR)).unwrap();
        synth.warm_up();
        synth.play();
        // Render in uneven chunks so runs split ticks.
        let mut out = Vec::new();
        for chunk in [1000, 333, 4096, 2571] {
            out.extend(render(&mut synth, chunk).0);
        }
        let steady = &out[1000..];
        let expected = SR / frequency_from_pitch(60.0);
        let period = measured_period(steady);
        assert!(
            ((period - expected) / expected).abs() < 0.001,
            "period {period}, expected {expected}"
        );
        let peak = steady.iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!((0.6..0.85).contains(&peak), "peak {peak}");
    }

    #[test]
    fn continue_shares_one_tone() {
        let notes = vec![Note::new(60, 0, 8, 3), Note::new(60, 8, 16, 3)];
        for (transition, expected) in [(Transition::Continue, 1), (Transition::Normal, 2)] {
            let instrument = Instrument {
                transition,
                ..Default::default()
            };
            let mut synth =
                Synth::new(one_bar_song(instrument, notes.clone()), SynthConfig::default()).unwrap();
            synth.play();
            render(&mut synth, 44100);
            assert_eq!(synth.allocation_count(), expected, "{transition:?}");
        }
    }

    #[test]
    fn seamless_boundary_keeps_phase_and_retrigger_restarts() {
        // Part 8 starts exactly one second in at 120 BPM.
        let boundary = 44100;
        let split = vec![Note::new(60, 0, 8, 3), Note::new(60, 8, 16, 3)];
        let render_with = |transition, notes: Vec<Note>| {
            let instrument = Instrument {
                transition,
                ..Default::default()
            };
            let mut synth = Synth::new(one_bar_song(instrument, notes), SynthConfig::default()).unwrap();
            synth.play();
            render(&mut synth, boundary + 64).0
        };
        let held = render_with(Transition::Normal, vec![Note::new(60, 0, 16, 3)]);
        let continued = render_with(Transition::Continue, split.clone());
        let retriggered = render_with(Transition::Normal, split);

        for i in boundary - 2..boundary + 64 {
            assert!(
                (continued[i] - held[i]).abs() < 1e-6,
                "sample {i}: continued {} held {}",
                continued[i],
                held[i]
            );
        }
        assert!(held[boundary].abs() > 0.5, "held {}", held[boundary]);
        assert!(
            retriggered[boundary].abs() < 1e-6,
            "retriggered tone starts from zero, got {}",
            retriggered[boundary]
        );
        assert!((retriggered[boundary - 1] - held[boundary - 1]).abs() < 1e-6);
    }

    #[test]
    fn effect_enabled_mid_tick_renders() {
        let song = one_bar_song(Instrument::default(), vec![Note::new(60, 0, 16, 3)]);
        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.play();
        render(&mut synth, 1000);
        let effects = &mut synth.song_mut().channels[0].instruments[0].effects;
        effects.panning = true;
        effects.echo = true;
        let (left, right) = render(&mut synth, 1000);
        assert!(left.iter().chain(&right).all(|s| s.is_finite()));
        assert!(left.iter().any(|s| s.abs() > 0.1), "still sounding");
    }

    #[test]
    fn short_buffer_is_rejected_untouched() {
        let mut synth = Synth::new(Song::default(), SynthConfig::default()).unwrap();
        let mut left = vec![9.0f32; 64];
        let mut right = vec![9.0f32; 32];
        let err = synth.synthesize(&mut left, &mut right, 64, true).unwrap_err();
        assert!(matches!(err, SynthError::BufferTooShort { requested: 64, left: 64, right: 32 }));
        assert!(left.iter().all(|&s| s == 9.0));
    }

    #[test]
    fn loud_chord_stays_in_range() {
        let instrument = Instrument {
            volume: 20.0,
            ..Default::default()
        };
        let song = one_bar_song(instrument, vec![Note::chord(vec![48, 55, 60, 64, 67], 0, 16, 3)]);
        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.play();
        let (left, _) = render(&mut synth, 22050);
        let peak = left[4410..].iter().fold(0.0f32, |a, s| a.max(s.abs()));
        assert!(peak <= 1.05, "peak {peak}");
    }

    #[test]
    fn song_end_stops_playback() {
        let song = one_bar_song(Instrument::default(), vec![Note::new(60, 0, 4, 3)]);
        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.set_loop_repeat_count(0);
        synth.play();
        // One bar at 120 BPM is two seconds.
        render(&mut synth, 44100 * 3);
        assert!(!synth.is_playing());
        assert!(synth.cursor().ended);
        synth.play();
        assert_eq!(synth.cursor().bar, 0);
        assert!(!synth.cursor().ended);
    }

    #[test]
    fn transport_checks_ranges() {
        let mut synth = Synth::new(Song::default(), SynthConfig::default()).unwrap();
        assert!(matches!(
            synth.go_to_bar(3),
            Err(SynthError::BarOutOfRange { bar: 3, bar_count: 1 })
        ));
        assert!(matches!(
            synth.live_note_on(0, 60),
            Err(SynthError::ChannelOutOfRange { channel: 0, channel_count: 0 })
        ));
    }

    #[test]
    fn live_notes_sound_while_paused() {
        let song = one_bar_song(Instrument::default(), vec![]);
        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.live_note_on(0, 69).unwrap();
        let mut left = vec![0.0f32; 4096];
        let mut right = vec![0.0f32; 4096];
        synth.synthesize(&mut left, &mut right, 4096, false).unwrap();
        assert!(left.iter().any(|s| s.abs() > 0.1));
        assert_eq!(synth.cursor().bar_tick(), 0, "paused cursor holds still");

        synth.live_notes_off();
        for _ in 0..20 {
            synth.synthesize(&mut left, &mut right, 4096, false).unwrap();
        }
        assert_eq!(synth.tone_count(), 0, "released live tones are freed");
    }

    #[test]
    fn song_volume_mod_mutes() {
        let mut song = one_bar_song(Instrument::default(), vec![Note::new(60, 0, 16, 3)]);
        let mut mods = Channel::modulation(vec![Modulator::new(0, 0, ModSetting::SongVolume)]);
        mods.patterns.push(Pattern::with_notes(vec![Note::new(0, 0, 16, 0)]));
        mods.bars = vec![1];
        song.channels.push(mods);
        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.play();
        let (left, right) = render(&mut synth, 8192);
        assert!(left.iter().chain(&right).all(|&s| s == 0.0));
    }

    #[test]
    fn note_filter_mod_writes_snapshots() {
        let mut instrument = Instrument::default();
        instrument.note_filter =
            FilterSettings::single(FilterControlPoint::new(FilterKind::LowPass, 30.0, 7.0));
        let mut song = one_bar_song(instrument, vec![Note::new(60, 0, 16, 3)]);
        let mut mods = Channel::modulation(vec![Modulator::new(0, 0, ModSetting::NoteFilterFreq(0))]);
        let mut sweep = Note::new(0, 0, 8, 0);
        sweep.pins[1].size = 20;
        mods.patterns.push(Pattern::with_notes(vec![sweep]));
        mods.bars = vec![1];
        song.channels.push(mods);

        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.play();
        render(&mut synth, 4096);
        let instrument = &synth.song().channels[0].instruments[0];
        let start = instrument.tmp_note_filter_start.as_ref().unwrap();
        assert!(start.points[0].freq < 20.0, "swept below the end value");
        assert_eq!(instrument.note_filter.points[0].freq, 30.0, "settings untouched");

        // Half a bar later the mod note has ended.
        render(&mut synth, 44100 + 4096);
        assert!(synth.song().channels[0].instruments[0].tmp_note_filter_start.is_none());
    }

    #[test]
    fn pause_releases_and_jumps_reposition() {
        let song = Song {
            bar_count: 4,
            loop_length: 4,
            ..one_bar_song(Instrument::default(), vec![Note::new(60, 0, 16, 3)])
        };
        let mut synth = Synth::new(song, SynthConfig::default()).unwrap();
        synth.play();
        render(&mut synth, 4096);
        assert_eq!(synth.tone_count(), 1);
        synth.pause();
        assert!(!synth.is_playing());
        synth.skip_bar();
        assert_eq!(synth.cursor().bar, 1);
        synth.go_to_previous_bar();
        synth.go_to_previous_bar();
        assert_eq!(synth.cursor().bar, 3, "wraps to the last bar");
        synth.stop();
        assert_eq!(synth.tone_count(), 0);
    }
}
