//! Per-instrument effects chain.
//!
//! Fixed order: panning, EQ, granular, distortion, bitcrusher, chorus, echo,
//! reverb, ring modulation. Panning is where the signal turns stereo; with
//! panning off the mono signal is copied to both sides.

use crate::config::{CHORUS_MAX_DELAY_SECONDS, ECHO_DELAY_MAX, GRANULAR_MAX_GRAIN_SECONDS,
    GRANULAR_MAX_RANGE_SECONDS, PAN_DELAY_SECONDS_MAX, PAN_MAX};
use crate::dsp::bitcrusher::{Bitcrusher, QUANTIZATION_MAX};
use crate::dsp::chorus::Chorus;
use crate::dsp::distortion::Distortion;
use crate::dsp::echo::{Echo, EchoRun, echo_delay_samples, echo_tail_samples};
use crate::dsp::envelope::EnvelopeComputer;
use crate::dsp::eq::EqFilter;
use crate::dsp::granular::Granular;
use crate::dsp::instrument_state::ModOverrides;
use crate::dsp::panning::Panning;
use crate::dsp::reverb::{Reverb, reverb_tail_samples};
use crate::dsp::ring_mod::RingMod;
use crate::song::{EnvelopeTarget, FilterSettings, Instrument, ModSetting};

/// Bitcrusher frequency settings run `0..=BITCRUSHER_FREQ_MAX`.
const BITCRUSHER_FREQ_MAX: f64 = 13.0;

/// Effect controls at one instant, in effect units (`0..=1` unless noted).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectValues {
    pub pan: f64,
    pub pan_delay: f64,
    pub eq_freq_mult: f64,
    pub granular_mix: f64,
    pub distortion: f64,
    /// Bitcrusher settings, in setting units.
    pub bitcrusher_freq: f64,
    pub bitcrusher_quantization: f64,
    pub chorus: f64,
    pub echo_sustain: f64,
    pub echo_ping_pong: f64,
    pub reverb: f64,
    pub ring_mod_mix: f64,
}

impl EffectValues {
    /// Instrument settings with mod overrides and instrument-level envelopes
    /// applied, at the run start or end. `song_reverb` scales the reverb.
    pub fn resolve(
        instrument: &Instrument,
        envelopes: &EnvelopeComputer,
        overrides: &ModOverrides,
        song_reverb: f64,
        at_end: bool,
    ) -> Self {
        let env = |target| {
            if at_end {
                envelopes.end(target)
            } else {
                envelopes.start(target)
            }
        };
        let setting = |s: ModSetting, base: f64| overrides.value(s, at_end).unwrap_or(base);

        let pan = setting(ModSetting::Pan, instrument.pan) / PAN_MAX;
        let crush_freq = instrument.bitcrusher_freq.clamp(0.0, BITCRUSHER_FREQ_MAX);
        EffectValues {
            pan: (0.5 + (pan - 0.5) * env(EnvelopeTarget::Panning)).clamp(0.0, 1.0),
            pan_delay: instrument.pan_delay,
            eq_freq_mult: env(EnvelopeTarget::EqFilterAllFreqs),
            granular_mix: setting(ModSetting::GranularMix, instrument.granular.mix)
                * env(EnvelopeTarget::Granular),
            distortion: setting(ModSetting::Distortion, instrument.distortion)
                * env(EnvelopeTarget::Distortion),
            // Envelopes pull the crusher towards full rate and resolution.
            bitcrusher_freq: BITCRUSHER_FREQ_MAX
                - (BITCRUSHER_FREQ_MAX - crush_freq) * env(EnvelopeTarget::BitcrusherFrequency),
            bitcrusher_quantization: (setting(
                ModSetting::BitcrusherQuantization,
                instrument.bitcrusher_quantization,
            ) * env(EnvelopeTarget::BitcrusherQuantization))
            .clamp(0.0, QUANTIZATION_MAX),
            chorus: setting(ModSetting::Chorus, instrument.chorus) * env(EnvelopeTarget::Chorus),
            echo_sustain: setting(ModSetting::EchoSustain, instrument.echo_sustain)
                * env(EnvelopeTarget::Echo),
            echo_ping_pong: instrument.echo_ping_pong,
            reverb: setting(ModSetting::Reverb, instrument.reverb)
                * env(EnvelopeTarget::Reverb)
                * song_reverb,
            ring_mod_mix: setting(ModSetting::RingModMix, instrument.ring_mod.mix)
                * env(EnvelopeTarget::RingModulation),
        }
    }
}

/// Everything one run of the chain needs besides the audio.
#[derive(Debug, Clone, Copy)]
pub struct EffectRun<'a> {
    pub instrument: &'a Instrument,
    pub start: EffectValues,
    pub end: EffectValues,
    pub eq_start: &'a FilterSettings,
    pub eq_end: &'a FilterSettings,
    pub sample_rate: f64,
    pub samples_per_tick: f64,
    /// First run of a tick; granular spawns its grains here.
    pub tick_start: bool,
    /// Scales what enters the feedback delays; fades to 0 while flushing.
    pub input_mult: (f64, f64),
}

#[derive(Debug, Clone)]
pub struct EffectChain {
    panning: Panning,
    eq: EqFilter,
    granular: Granular,
    distortion: Distortion,
    bitcrusher: Bitcrusher,
    chorus: Chorus,
    echo: Echo,
    reverb: Reverb,
    ring_mod: RingMod,
}

impl EffectChain {
    pub fn new(seed: u64, max_grains: usize) -> Self {
        EffectChain {
            panning: Panning::default(),
            eq: EqFilter::default(),
            granular: Granular::new(seed, max_grains),
            distortion: Distortion::default(),
            bitcrusher: Bitcrusher::default(),
            chorus: Chorus::default(),
            echo: Echo::default(),
            reverb: Reverb::default(),
            ring_mod: RingMod::default(),
        }
    }

    /// Size the delay lines for the instrument's enabled effects. Cheap when
    /// nothing needs to grow.
    pub fn allocate_necessary_buffers(
        &mut self,
        instrument: &Instrument,
        sample_rate: f64,
        samples_per_tick: f64,
    ) {
        let fx = &instrument.effects;
        if fx.panning {
            self.panning.allocate(sample_rate);
        }
        if fx.granular {
            self.granular.allocate(sample_rate);
        }
        if fx.chorus {
            self.chorus.allocate(sample_rate);
        }
        if fx.echo {
            self.echo
                .allocate(echo_delay_samples(instrument.echo_delay, samples_per_tick));
        }
        if fx.reverb {
            self.reverb.allocate();
        }
    }

    /// Size every delay line for the longest delays reachable at
    /// `max_samples_per_tick`, whether or not the effect is on yet.
    pub fn allocate_all(&mut self, sample_rate: f64, max_samples_per_tick: f64) {
        self.panning.allocate(sample_rate);
        self.granular.allocate(sample_rate);
        self.chorus.allocate(sample_rate);
        self.echo
            .allocate(echo_delay_samples(ECHO_DELAY_MAX, max_samples_per_tick));
        self.reverb.allocate();
    }

    /// Sum of the enabled delay effects' decay times, in samples.
    pub fn tail_samples(
        instrument: &Instrument,
        values: &EffectValues,
        sample_rate: f64,
        samples_per_tick: f64,
    ) -> f64 {
        let fx = &instrument.effects;
        let mut total = 0.0;
        if fx.panning {
            total += PAN_DELAY_SECONDS_MAX * sample_rate;
        }
        if fx.granular {
            total += (GRANULAR_MAX_GRAIN_SECONDS + GRANULAR_MAX_RANGE_SECONDS) * sample_rate;
        }
        if fx.chorus {
            total += CHORUS_MAX_DELAY_SECONDS * sample_rate;
        }
        if fx.echo {
            let delay = echo_delay_samples(instrument.echo_delay, samples_per_tick);
            total += echo_tail_samples(values.echo_sustain, delay);
        }
        if fx.reverb {
            total += reverb_tail_samples(values.reverb);
        }
        total
    }

    /// Longest delay line held, in samples.
    pub fn longest_delay(&self) -> usize {
        [
            self.panning.delay_samples(),
            self.granular.delay_samples(),
            self.chorus.delay_samples(),
            self.echo.delay_samples(),
            self.reverb.delay_samples(),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    /// Run the chain on `mono`, overwriting `left` and `right`.
    pub fn process(&mut self, mono: &[f64], left: &mut [f64], right: &mut [f64], run: &EffectRun<'_>) {
        let fx = &run.instrument.effects;
        let (s, e) = (&run.start, &run.end);
        let n = mono.len();
        let left = &mut left[..n];
        let right = &mut right[..n];

        if fx.panning {
            self.panning.process(
                mono,
                left,
                right,
                (s.pan, e.pan),
                (s.pan_delay, e.pan_delay),
                run.sample_rate,
            );
        } else {
            left.copy_from_slice(mono);
            right.copy_from_slice(mono);
        }

        if fx.eq_filter {
            self.eq.load(
                run.sample_rate,
                run.eq_start,
                run.eq_end,
                n,
                (s.eq_freq_mult, e.eq_freq_mult),
            );
            self.eq.process(left, right);
        }

        if fx.granular {
            if run.tick_start && (s.granular_mix > 0.0 || e.granular_mix > 0.0) {
                self.granular.spawn(&run.instrument.granular, run.sample_rate);
            }
            self.granular
                .process(left, right, (s.granular_mix, e.granular_mix));
        }

        if fx.distortion {
            self.distortion.process(left, right, (s.distortion, e.distortion));
        }

        if fx.bitcrusher {
            self.bitcrusher.process(
                left,
                right,
                (s.bitcrusher_freq, e.bitcrusher_freq),
                (s.bitcrusher_quantization, e.bitcrusher_quantization),
                run.sample_rate,
            );
        }

        if fx.chorus {
            self.chorus.process(left, right, (s.chorus, e.chorus), run.sample_rate);
        }

        if fx.echo {
            self.echo.process(
                left,
                right,
                &EchoRun {
                    sustain: (s.echo_sustain, e.echo_sustain),
                    ping_pong: (s.echo_ping_pong, e.echo_ping_pong),
                    input_mult: run.input_mult,
                    delay_samples: echo_delay_samples(run.instrument.echo_delay, run.samples_per_tick),
                    sample_rate: run.sample_rate,
                },
            );
        }

        if fx.reverb {
            self.reverb
                .process(left, right, (s.reverb, e.reverb), run.input_mult, run.sample_rate);
        }

        if self.ring_mod.is_audible(fx.ring_modulation) {
            self.ring_mod.process(
                left,
                right,
                &run.instrument.ring_mod,
                (s.ring_mod_mix, e.ring_mod_mix),
                fx.ring_modulation,
                run.sample_rate,
            );
        }
    }

    /// Zero every effect's state. Delay lines keep their allocations.
    pub fn reset(&mut self) {
        self.panning.clear();
        self.eq.reset();
        self.granular.clear();
        self.distortion.reset();
        self.bitcrusher.reset();
        self.chorus.clear();
        self.echo.clear();
        self.reverb.clear();
        self.ring_mod.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::EffectToggles;

    fn run<'a>(instrument: &'a Instrument, values: EffectValues) -> EffectRun<'a> {
        EffectRun {
            instrument,
            start: values,
            end: values,
            eq_start: &instrument.eq_filter,
            eq_end: &instrument.eq_filter,
            sample_rate: 44100.0,
            samples_per_tick: 2756.25,
            tick_start: true,
            input_mult: (1.0, 1.0),
        }
    }

    fn values(instrument: &Instrument) -> EffectValues {
        EffectValues::resolve(
            instrument,
            &EnvelopeComputer::default(),
            &ModOverrides::default(),
            1.0,
            false,
        )
    }

    #[test]
    fn no_effects_copies_mono_to_both_sides() {
        let instrument = Instrument::default();
        let mut chain = EffectChain::new(1, 16);
        let mono = [0.1, -0.2, 0.3];
        let mut left = [9.0; 3];
        let mut right = [9.0; 3];
        chain.process(&mono, &mut left, &mut right, &run(&instrument, values(&instrument)));
        assert_eq!(left, mono);
        assert_eq!(right, mono);
    }

    #[test]
    fn granular_at_zero_mix_leaves_the_signal_alone() {
        let mut instrument = Instrument::default();
        instrument.effects = EffectToggles {
            granular: true,
            ..Default::default()
        };
        instrument.granular.mix = 0.0;
        let mut chain = EffectChain::new(5, 64);
        chain.allocate_necessary_buffers(&instrument, 44100.0, 2756.25);
        let mono: Vec<f64> = (0..3000).map(|i| (i as f64 * 0.01).sin()).collect();
        let mut left = vec![0.0; 3000];
        let mut right = vec![0.0; 3000];
        chain.process(&mono, &mut left, &mut right, &run(&instrument, values(&instrument)));
        assert_eq!(left, mono);
        assert_eq!(right, mono);
    }

    #[test]
    fn allocation_is_idempotent() {
        let mut instrument = Instrument::default();
        instrument.effects.echo = true;
        instrument.effects.reverb = true;
        let mut chain = EffectChain::new(0, 4);
        chain.allocate_necessary_buffers(&instrument, 44100.0, 2756.25);
        let longest = chain.longest_delay();
        chain.allocate_necessary_buffers(&instrument, 44100.0, 2756.25);
        assert_eq!(chain.longest_delay(), longest);
        // A slower tempo grows the echo line.
        chain.allocate_necessary_buffers(&instrument, 44100.0, 2756.25 * 4.0);
        assert!(chain.longest_delay() > longest);
    }

    #[test]
    fn tails_add_up_over_enabled_effects() {
        let mut instrument = Instrument::default();
        let v = values(&instrument);
        assert_eq!(EffectChain::tail_samples(&instrument, &v, 44100.0, 2756.25), 0.0);
        instrument.effects.chorus = true;
        let chorus_only = EffectChain::tail_samples(&instrument, &v, 44100.0, 2756.25);
        instrument.effects.echo = true;
        assert!(EffectChain::tail_samples(&instrument, &v, 44100.0, 2756.25) > chorus_only);
    }
}
