//! Playback position: bar, part and tick, plus the sample countdown to the
//! next tick boundary. Owned by the synth; nothing else moves it.

use crate::config::{TEMPO_MAX, TEMPO_MIN, TICKS_PER_PART};
use crate::song::Song;

/// Samples per tick at `tempo` BPM.
pub fn samples_per_tick(song: &Song, tempo: f64, sample_rate: f64) -> f64 {
    let tempo = tempo.clamp(TEMPO_MIN, TEMPO_MAX);
    let ticks_per_beat = (song.parts_per_beat.max(1) * TICKS_PER_PART) as f64;
    sample_rate * 60.0 / (tempo * ticks_per_beat)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackCursor {
    pub bar: usize,
    /// Part within the bar.
    pub part: u32,
    /// Tick within the part.
    pub tick: u32,
    /// Samples left before the current tick ends. At or below zero a new
    /// tick starts; the fractional remainder carries into it.
    pub tick_countdown: f64,
    /// Samples per tick fixed at the start of the current tick.
    pub samples_per_tick: f64,
    /// Loop passes left; negative loops forever, 0 plays through to the end.
    pub loop_repeat_count: i32,
    /// Set when playback ran off the end of the song.
    pub ended: bool,
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        PlaybackCursor {
            bar: 0,
            part: 0,
            tick: 0,
            tick_countdown: 0.0,
            samples_per_tick: 0.0,
            loop_repeat_count: -1,
            ended: false,
        }
    }
}

impl PlaybackCursor {
    /// Ticks since the start of the bar.
    pub fn bar_tick(&self) -> u32 {
        self.part * TICKS_PER_PART + self.tick
    }

    /// Whether the current tick has been fully rendered.
    pub fn tick_done(&self) -> bool {
        self.tick_countdown <= 0.0
    }

    /// Move to the start of `bar`, discarding the partial tick.
    pub fn go_to_bar(&mut self, bar: usize) {
        self.bar = bar;
        self.part = 0;
        self.tick = 0;
        self.tick_countdown = 0.0;
        self.ended = false;
    }

    /// Step to the next tick. Returns true when a new bar began.
    pub fn advance_tick(&mut self, song: &Song) -> bool {
        self.tick += 1;
        if self.tick < TICKS_PER_PART {
            return false;
        }
        self.tick = 0;
        self.part += 1;
        if self.part < song.parts_per_bar().max(1) {
            return false;
        }
        self.part = 0;
        self.next_bar(song);
        true
    }

    /// Advance to the next bar, following the loop.
    pub fn next_bar(&mut self, song: &Song) {
        self.bar += 1;
        if self.loop_repeat_count != 0 && self.bar == song.loop_end() {
            self.bar = song.loop_start;
            if self.loop_repeat_count > 0 {
                self.loop_repeat_count -= 1;
            }
        }
        if self.bar >= song.bar_count.max(1) {
            self.bar = 0;
            self.ended = true;
        }
    }

    /// Back one bar, wrapping to the last bar from the first.
    pub fn previous_bar(&mut self, song: &Song) {
        let bar = if self.bar == 0 {
            song.bar_count.max(1) - 1
        } else {
            self.bar - 1
        };
        self.go_to_bar(bar);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(bars: usize, loop_start: usize, loop_length: usize) -> Song {
        Song {
            bar_count: bars,
            loop_start,
            loop_length,
            ..Default::default()
        }
    }

    #[test]
    fn ticks_roll_into_parts_and_bars() {
        let song = song(4, 0, 4);
        let mut cursor = PlaybackCursor::default();
        let ticks_per_bar = song.parts_per_bar() * TICKS_PER_PART;
        for _ in 0..ticks_per_bar - 1 {
            assert!(!cursor.advance_tick(&song));
        }
        assert_eq!(cursor.bar_tick(), ticks_per_bar - 1);
        assert!(cursor.advance_tick(&song));
        assert_eq!((cursor.bar, cursor.part, cursor.tick), (1, 0, 0));
    }

    #[test]
    fn loop_repeats_then_plays_out() {
        let song = song(4, 1, 2);
        let mut cursor = PlaybackCursor {
            loop_repeat_count: 1,
            bar: 2,
            ..Default::default()
        };
        cursor.next_bar(&song);
        assert_eq!(cursor.bar, 1, "looped back");
        assert_eq!(cursor.loop_repeat_count, 0);
        cursor.next_bar(&song);
        cursor.next_bar(&song);
        assert_eq!(cursor.bar, 3, "played past the loop");
        cursor.next_bar(&song);
        assert!(cursor.ended);
    }

    #[test]
    fn infinite_loop_never_ends() {
        let song = song(2, 0, 2);
        let mut cursor = PlaybackCursor::default();
        for _ in 0..100 {
            cursor.next_bar(&song);
        }
        assert!(!cursor.ended);
    }

    #[test]
    fn tempo_sets_tick_length() {
        let song = Song::default();
        // 120 BPM, four parts a beat, two ticks a part.
        assert!((samples_per_tick(&song, 120.0, 44100.0) - 2756.25).abs() < 1e-9);
        assert!(samples_per_tick(&song, 1.0, 44100.0) == samples_per_tick(&song, TEMPO_MIN, 44100.0));
    }
}
