//! Envelope computer.
//!
//! Evaluates every envelope of an instrument at the start and end of a run
//! and multiplies the results into one slot per synthesis target. Slots
//! without an envelope stay at 1.0.

use std::f64::consts::PI;

use crate::config::{MAX_FILTER_POINTS, MAX_FM_OPERATORS, NOTE_SIZE_MAX, SLIDE_TICKS};
use crate::dsp::ramp::RunRatios;
use crate::song::{EnvelopeCurve, EnvelopeTarget, Instrument};

/// Ages past this are treated as this; keeps `powf` and friends well-behaved.
const MAX_AGE_SECONDS: f64 = 3600.0;

const FILTER_FREQ_BASE: usize = 2;
const FILTER_GAIN_BASE: usize = FILTER_FREQ_BASE + MAX_FILTER_POINTS;
const OPERATOR_BASE: usize = FILTER_GAIN_BASE + MAX_FILTER_POINTS + 2;

/// Number of envelope slots.
pub const ENVELOPE_SLOTS: usize = OPERATOR_BASE + MAX_FM_OPERATORS + 18;

/// Slot index for a target, `None` when an index is out of range.
pub fn target_slot(target: EnvelopeTarget) -> Option<usize> {
    let slot = match target {
        EnvelopeTarget::NoteVolume => 0,
        EnvelopeTarget::NoteFilterAllFreqs => 1,
        EnvelopeTarget::NoteFilterFreq(i) if i < MAX_FILTER_POINTS => FILTER_FREQ_BASE + i,
        EnvelopeTarget::NoteFilterGain(i) if i < MAX_FILTER_POINTS => FILTER_GAIN_BASE + i,
        EnvelopeTarget::PulseWidth => FILTER_GAIN_BASE + MAX_FILTER_POINTS,
        EnvelopeTarget::Unison => FILTER_GAIN_BASE + MAX_FILTER_POINTS + 1,
        EnvelopeTarget::OperatorAmplitude(i) if i < MAX_FM_OPERATORS => OPERATOR_BASE + i,
        EnvelopeTarget::NoteFilterFreq(_)
        | EnvelopeTarget::NoteFilterGain(_)
        | EnvelopeTarget::OperatorAmplitude(_) => return None,
        other => {
            let after = OPERATOR_BASE + MAX_FM_OPERATORS;
            after
                + match other {
                    EnvelopeTarget::FeedbackAmplitude => 0,
                    EnvelopeTarget::PitchShift => 1,
                    EnvelopeTarget::Detune => 2,
                    EnvelopeTarget::VibratoDepth => 3,
                    EnvelopeTarget::StringSustain => 4,
                    EnvelopeTarget::SupersawDynamism => 5,
                    EnvelopeTarget::SupersawSpread => 6,
                    EnvelopeTarget::SupersawShape => 7,
                    EnvelopeTarget::Distortion => 8,
                    EnvelopeTarget::BitcrusherQuantization => 9,
                    EnvelopeTarget::BitcrusherFrequency => 10,
                    EnvelopeTarget::Chorus => 11,
                    EnvelopeTarget::Echo => 12,
                    EnvelopeTarget::Reverb => 13,
                    EnvelopeTarget::Granular => 14,
                    EnvelopeTarget::RingModulation => 15,
                    EnvelopeTarget::Panning => 16,
                    _ => 17, // EqFilterAllFreqs
                }
        }
    };
    Some(slot)
}

/// Instrument-wide timing for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeClock {
    pub seconds_per_tick: f64,
    pub beats_per_tick: f64,
    /// Envelope speed after modulation.
    pub envelope_speed: f64,
    /// Instrument envelope time accumulator (beats, speed applied) at the tick start.
    pub envelope_time: f64,
    /// Vibrato LFO phase, in cycles, at the tick start and its per-tick advance.
    pub lfo_time: f64,
    pub lfo_step: f64,
    /// Value of a modulated envelope at the run start and end.
    pub modulated_start: f64,
    pub modulated_end: f64,
    pub ratios: RunRatios,
}

impl EnvelopeClock {
    fn envelope_time_at(&self, ratio: f64) -> f64 {
        self.envelope_time + ratio * self.envelope_speed * self.beats_per_tick
    }
}

/// Where a note (or the note a slide came from) stands during a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteTiming {
    /// Ticks since the tone's note started, at the tick start.
    pub tick_time: f64,
    /// Pin size at the run start and end, `0..=NOTE_SIZE_MAX`.
    pub size_start: f64,
    pub size_end: f64,
    /// Tone pitch, for pitch-tracking envelopes.
    pub pitch: f64,
}

/// Previous-note timing for a tone that is still sliding into its note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideTiming {
    pub previous: NoteTiming,
    /// Ticks since the slide began, at the tick start.
    pub slide_ticks: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeComputer {
    pub starts: [f64; ENVELOPE_SLOTS],
    pub ends: [f64; ENVELOPE_SLOTS],
}

impl Default for EnvelopeComputer {
    fn default() -> Self {
        EnvelopeComputer {
            starts: [1.0; ENVELOPE_SLOTS],
            ends: [1.0; ENVELOPE_SLOTS],
        }
    }
}

impl EnvelopeComputer {
    pub fn reset(&mut self) {
        self.starts.fill(1.0);
        self.ends.fill(1.0);
    }

    pub fn start(&self, target: EnvelopeTarget) -> f64 {
        target_slot(target).map_or(1.0, |s| self.starts[s])
    }

    pub fn end(&self, target: EnvelopeTarget) -> f64 {
        target_slot(target).map_or(1.0, |s| self.ends[s])
    }

    /// Fill `starts`/`ends` for one tone's run. Instrument-level effects use
    /// this too with a neutral `NoteTiming`.
    pub fn compute_envelopes(
        &mut self,
        instrument: &Instrument,
        clock: &EnvelopeClock,
        note: &NoteTiming,
        slide: Option<&SlideTiming>,
    ) {
        self.reset();
        for envelope in instrument.envelopes.iter().filter(|e| !e.invalid) {
            let Some(slot) = target_slot(envelope.target) else {
                continue;
            };
            let mut start = curve_value(envelope.curve, clock, note, false);
            let mut end = curve_value(envelope.curve, clock, note, true);

            if let Some(slide) = slide {
                let from_start = curve_value(envelope.curve, clock, &slide.previous, false);
                let from_end = curve_value(envelope.curve, clock, &slide.previous, true);
                let ratio_start = ((slide.slide_ticks + clock.ratios.start) / SLIDE_TICKS).min(1.0);
                let ratio_end = ((slide.slide_ticks + clock.ratios.end) / SLIDE_TICKS).min(1.0);
                start = from_start + (start - from_start) * ratio_start;
                end = from_end + (end - from_end) * ratio_end;
            }

            self.starts[slot] *= start;
            self.ends[slot] *= end;
        }
    }
}

/// Curve value at the run start (`at_end == false`) or end.
fn curve_value(curve: EnvelopeCurve, clock: &EnvelopeClock, note: &NoteTiming, at_end: bool) -> f64 {
    let ratio = if at_end {
        clock.ratios.end
    } else {
        clock.ratios.start
    };
    let ticks = note.tick_time + ratio;
    let seconds =
        (ticks * clock.seconds_per_tick * clock.envelope_speed).clamp(0.0, MAX_AGE_SECONDS);
    let beats = clock.envelope_time_at(ratio);

    match curve {
        EnvelopeCurve::None => 1.0,
        EnvelopeCurve::NoteSize => {
            let size = if at_end { note.size_end } else { note.size_start };
            (size / NOTE_SIZE_MAX as f64).max(0.0).powf(1.5)
        }
        EnvelopeCurve::Punch => (2.0 - 10.0 * seconds).max(1.0),
        EnvelopeCurve::Flare { speed } => {
            let attack = 0.25 / speed.max(1e-9).sqrt();
            if seconds < attack {
                seconds / attack
            } else {
                1.0 / (1.0 + (seconds - attack) * speed)
            }
        }
        EnvelopeCurve::Twang { speed } => 1.0 / (1.0 + seconds * speed),
        EnvelopeCurve::Swell { speed } => 1.0 - 1.0 / (1.0 + seconds * speed),
        EnvelopeCurve::Tremolo { speed } => 0.5 - 0.5 * (2.0 * PI * beats * speed).cos(),
        EnvelopeCurve::Tremolo2 { speed } => 0.75 - 0.25 * (2.0 * PI * beats * speed).cos(),
        EnvelopeCurve::Decay { speed } => 2.0_f64.powf(-speed * seconds),
        EnvelopeCurve::Lfo => {
            let phase = clock.lfo_time + ratio * clock.lfo_step;
            0.5 + 0.5 * (2.0 * PI * phase).sin()
        }
        EnvelopeCurve::Pitch { lower, upper } => {
            if upper <= lower {
                if note.pitch >= lower as f64 { 1.0 } else { 0.0 }
            } else {
                ((note.pitch - lower as f64) / (upper - lower) as f64).clamp(0.0, 1.0)
            }
        }
        EnvelopeCurve::Modulated => {
            if at_end {
                clock.modulated_end
            } else {
                clock.modulated_start
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::EnvelopeSettings;
    use approx::assert_relative_eq;

    fn clock(ratios: RunRatios) -> EnvelopeClock {
        EnvelopeClock {
            seconds_per_tick: 0.0625,
            beats_per_tick: 0.125,
            envelope_speed: 1.0,
            envelope_time: 0.0,
            lfo_time: 0.0,
            lfo_step: 0.1,
            modulated_start: 1.0,
            modulated_end: 1.0,
            ratios,
        }
    }

    fn note(tick_time: f64) -> NoteTiming {
        NoteTiming {
            tick_time,
            size_start: 3.0,
            size_end: 3.0,
            pitch: 60.0,
        }
    }

    fn full_tick() -> RunRatios {
        RunRatios {
            start: 0.0,
            end: 1.0,
        }
    }

    fn with_envelope(target: EnvelopeTarget, curve: EnvelopeCurve) -> Instrument {
        let mut instrument = Instrument::default();
        instrument.envelopes.push(EnvelopeSettings::new(target, curve));
        instrument
    }

    #[test]
    fn untouched_slots_are_one() {
        let mut computer = EnvelopeComputer::default();
        computer.compute_envelopes(&Instrument::default(), &clock(full_tick()), &note(3.0), None);
        assert!(computer.starts.iter().chain(computer.ends.iter()).all(|&v| v == 1.0));
    }

    #[test]
    fn twang_decays_with_age() {
        let instrument = with_envelope(EnvelopeTarget::NoteVolume, EnvelopeCurve::Twang { speed: 4.0 });
        let mut computer = EnvelopeComputer::default();
        computer.compute_envelopes(&instrument, &clock(full_tick()), &note(0.0), None);
        assert_relative_eq!(computer.start(EnvelopeTarget::NoteVolume), 1.0);
        // One tick is 0.0625 s: 1 / (1 + 0.25).
        assert_relative_eq!(computer.end(EnvelopeTarget::NoteVolume), 0.8);
    }

    #[test]
    fn split_run_values_meet() {
        let instrument =
            with_envelope(EnvelopeTarget::Chorus, EnvelopeCurve::Tremolo { speed: 2.0 });
        let first = RunRatios::from_countdown(100.0, 37, 100.0);
        let second = RunRatios::from_countdown(63.0, 63, 100.0);
        let mut a = EnvelopeComputer::default();
        let mut b = EnvelopeComputer::default();
        a.compute_envelopes(&instrument, &clock(first), &note(5.0), None);
        b.compute_envelopes(&instrument, &clock(second), &note(5.0), None);
        assert_relative_eq!(a.end(EnvelopeTarget::Chorus), b.start(EnvelopeTarget::Chorus));
    }

    #[test]
    fn invalid_and_out_of_range_envelopes_are_skipped() {
        let mut instrument =
            with_envelope(EnvelopeTarget::NoteVolume, EnvelopeCurve::Decay { speed: 10.0 });
        instrument.envelopes[0].invalid = true;
        instrument.envelopes.push(EnvelopeSettings::new(
            EnvelopeTarget::NoteFilterFreq(99),
            EnvelopeCurve::Punch,
        ));
        let mut computer = EnvelopeComputer::default();
        computer.compute_envelopes(&instrument, &clock(full_tick()), &note(40.0), None);
        assert!(computer.starts.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn huge_ages_stay_finite() {
        let instrument = with_envelope(EnvelopeTarget::NoteVolume, EnvelopeCurve::Flare { speed: 0.0 });
        let mut computer = EnvelopeComputer::default();
        computer.compute_envelopes(&instrument, &clock(full_tick()), &note(1.0e300), None);
        assert!(computer.end(EnvelopeTarget::NoteVolume).is_finite());
        computer.compute_envelopes(&instrument, &clock(full_tick()), &note(-50.0), None);
        assert_relative_eq!(computer.start(EnvelopeTarget::NoteVolume), 0.0);
    }

    #[test]
    fn slide_blends_from_previous_note() {
        let instrument =
            with_envelope(EnvelopeTarget::NoteVolume, EnvelopeCurve::Pitch { lower: 60, upper: 72 });
        let slide = SlideTiming {
            previous: NoteTiming {
                pitch: 72.0,
                ..note(8.0)
            },
            slide_ticks: 0.0,
        };
        let mut computer = EnvelopeComputer::default();
        computer.compute_envelopes(&instrument, &clock(full_tick()), &note(0.0), Some(&slide));
        assert_relative_eq!(computer.start(EnvelopeTarget::NoteVolume), 1.0);
        assert_relative_eq!(computer.end(EnvelopeTarget::NoteVolume), 1.0 - 1.0 / SLIDE_TICKS);
    }

    #[test]
    fn every_target_has_a_distinct_slot() {
        let mut seen = std::collections::HashSet::new();
        let targets = [
            EnvelopeTarget::NoteVolume,
            EnvelopeTarget::NoteFilterAllFreqs,
            EnvelopeTarget::NoteFilterFreq(7),
            EnvelopeTarget::NoteFilterGain(7),
            EnvelopeTarget::PulseWidth,
            EnvelopeTarget::Unison,
            EnvelopeTarget::OperatorAmplitude(3),
            EnvelopeTarget::FeedbackAmplitude,
            EnvelopeTarget::SupersawShape,
            EnvelopeTarget::EqFilterAllFreqs,
        ];
        for t in targets {
            let slot = target_slot(t).unwrap();
            assert!(slot < ENVELOPE_SLOTS, "{t:?} slot {slot}");
            assert!(seen.insert(slot), "{t:?} collides");
        }
    }
}
