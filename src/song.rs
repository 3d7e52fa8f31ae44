use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{
    FILTER_FREQ_MAX_SETTING, FILTER_GAIN_CENTER, MAX_FILTER_POINTS, MOD_SLOTS, NOTE_SIZE_MAX,
};
use crate::error::SynthError;

// ── Notes & Patterns ────────────────────────────────────────

/// A control point on a note's pitch/size curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NotePin {
    /// Pitch offset in semitones from the note's pitches.
    pub interval: i32,
    /// Parts since the note start.
    pub time: u32,
    /// Loudness, `0..=NOTE_SIZE_MAX` for pitch notes, the raw value for mod notes.
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub pitches: Vec<i32>,
    /// Start in parts from the bar start.
    pub start: u32,
    /// End (exclusive) in parts from the bar start.
    pub end: u32,
    /// Without pins the note holds its pitch at full size.
    #[serde(default)]
    pub pins: Vec<NotePin>,
    /// The note picks up where a note ending at the previous bar's end left off.
    #[serde(default)]
    pub continues_last_pattern: bool,
}

impl Note {
    pub fn new(pitch: i32, start: u32, end: u32, size: u32) -> Self {
        Self::chord(vec![pitch], start, end, size)
    }

    pub fn chord(pitches: Vec<i32>, start: u32, end: u32, size: u32) -> Self {
        let end = end.max(start + 1);
        Note {
            pitches,
            start,
            end,
            pins: vec![
                NotePin {
                    interval: 0,
                    time: 0,
                    size,
                },
                NotePin {
                    interval: 0,
                    time: end - start,
                    size,
                },
            ],
            continues_last_pattern: false,
        }
    }

    pub fn length(&self) -> u32 {
        self.end - self.start
    }

    /// Interval of the last pin; where the pitch curve ends up.
    pub fn last_interval(&self) -> i32 {
        self.pins.last().map_or(0, |p| p.interval)
    }

    pub fn last_size(&self) -> f64 {
        self.pins.last().map_or(NOTE_SIZE_MAX as f64, |p| p.size as f64)
    }

    /// Interval and size linearly interpolated between pins at `time` parts
    /// after the note start. Times outside the pins clamp to the end pins.
    pub fn pin_value_at(&self, time: f64) -> (f64, f64) {
        let Some(first) = self.pins.first() else {
            return (0.0, NOTE_SIZE_MAX as f64);
        };
        if time <= first.time as f64 {
            return (first.interval as f64, first.size as f64);
        }
        for pair in self.pins.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if time < b.time as f64 {
                let span = (b.time - a.time).max(1) as f64;
                let ratio = (time - a.time as f64) / span;
                let interval = a.interval as f64 + (b.interval - a.interval) as f64 * ratio;
                let size = a.size as f64 + (b.size as f64 - a.size as f64) * ratio;
                return (interval, size);
            }
        }
        let last = self.pins[self.pins.len() - 1];
        (last.interval as f64, last.size as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pattern {
    /// Notes sorted by start time and non-overlapping.
    pub notes: Vec<Note>,
    /// Which of the channel's instruments play this pattern.
    pub instruments: Vec<usize>,
}

impl Default for Pattern {
    fn default() -> Self {
        Pattern {
            notes: Vec::new(),
            instruments: vec![0],
        }
    }
}

impl Pattern {
    pub fn with_notes(notes: Vec<Note>) -> Self {
        Pattern {
            notes,
            ..Default::default()
        }
    }
}

// ── Filters ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterKind {
    LowPass,
    HighPass,
    Peak,
}

/// One biquad stage of a filter, in setting units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterControlPoint {
    pub kind: FilterKind,
    /// Frequency setting, `0..=FILTER_FREQ_MAX_SETTING`, quarter-octave steps.
    pub freq: f64,
    /// Gain setting, `0..=FILTER_GAIN_MAX_SETTING`, half-octave steps around the centre.
    pub gain: f64,
}

impl FilterControlPoint {
    pub fn new(kind: FilterKind, freq: f64, gain: f64) -> Self {
        FilterControlPoint {
            kind,
            freq: freq.clamp(0.0, FILTER_FREQ_MAX_SETTING),
            gain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub points: Vec<FilterControlPoint>,
}

impl FilterSettings {
    pub fn single(point: FilterControlPoint) -> Self {
        FilterSettings {
            points: vec![point],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy another settings object into this one, reusing its allocation.
    pub fn copy_from(&mut self, other: &FilterSettings) {
        self.points.clear();
        self.points.extend_from_slice(&other.points);
    }
}

// ── Envelopes ───────────────────────────────────────────────

/// The synthesis parameter an envelope scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeTarget {
    NoteVolume,
    NoteFilterAllFreqs,
    NoteFilterFreq(usize),
    NoteFilterGain(usize),
    PulseWidth,
    Unison,
    OperatorAmplitude(usize),
    FeedbackAmplitude,
    PitchShift,
    Detune,
    VibratoDepth,
    StringSustain,
    SupersawDynamism,
    SupersawSpread,
    SupersawShape,
    Distortion,
    BitcrusherQuantization,
    BitcrusherFrequency,
    Chorus,
    Echo,
    Reverb,
    Granular,
    RingModulation,
    Panning,
    EqFilterAllFreqs,
}

/// Shape of an envelope curve. Speeds are in curve-specific units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EnvelopeCurve {
    None,
    NoteSize,
    Punch,
    Flare { speed: f64 },
    Twang { speed: f64 },
    Swell { speed: f64 },
    Tremolo { speed: f64 },
    Tremolo2 { speed: f64 },
    Decay { speed: f64 },
    /// Follows the vibrato LFO of the instrument, mapped to `0..=1`.
    Lfo,
    /// Maps the tone's pitch from `lower..=upper` to `0..=1`.
    Pitch { lower: i32, upper: i32 },
    /// Driven by a mod channel's envelope amount for the instrument.
    Modulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeSettings {
    pub target: EnvelopeTarget,
    pub curve: EnvelopeCurve,
    /// Set by `Song::validate` when the target does not exist.
    #[serde(skip)]
    pub invalid: bool,
}

impl EnvelopeSettings {
    pub fn new(target: EnvelopeTarget, curve: EnvelopeCurve) -> Self {
        EnvelopeSettings {
            target,
            curve,
            invalid: false,
        }
    }
}

// ── Instrument Settings ─────────────────────────────────────

/// What happens between consecutive notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    /// Each note retriggers; the old tone fades out normally.
    #[default]
    Normal,
    /// Each note retriggers and cuts the old tone within a tick.
    Interrupt,
    /// Adjacent notes share tones where pitches match.
    Continue,
    /// Adjacent notes share tones and glide between pitches.
    Slide,
}

impl Transition {
    pub fn is_seamless(self) -> bool {
        matches!(self, Transition::Continue | Transition::Slide)
    }

    pub fn slides(self) -> bool {
        self == Transition::Slide
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Chord {
    #[default]
    Simultaneous,
    Strum,
    Arpeggio,
}

impl Chord {
    pub fn single_tone(self) -> bool {
        self == Chord::Arpeggio
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Unison {
    #[default]
    None,
    Shimmer,
    Hum,
    HonkyTonk,
    Dissonant,
    Fifth,
    Octave,
    Bowed,
    Piano,
}

/// Resolved unison voicing: semitone spread/offset between the two voices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnisonSettings {
    pub voices: usize,
    pub spread: f64,
    pub offset: f64,
    pub expression: f64,
    pub sign: f64,
}

impl Unison {
    pub fn settings(self) -> UnisonSettings {
        let (voices, spread, offset, expression, sign) = match self {
            Unison::None => (1, 0.0, 0.0, 1.4, 1.0),
            Unison::Shimmer => (2, 0.018, 0.0, 1.0, 1.0),
            Unison::Hum => (2, 0.045, 0.0, 1.0, 1.0),
            Unison::HonkyTonk => (2, 0.09, 0.0, 1.0, 1.0),
            Unison::Dissonant => (2, 0.25, 0.0, 0.9, 1.0),
            Unison::Fifth => (2, 3.5, 3.5, 0.9, 1.0),
            Unison::Octave => (2, 6.0, 6.0, 0.8, 1.0),
            Unison::Bowed => (2, 0.02, 0.0, 1.0, -1.0),
            Unison::Piano => (2, 0.01, 0.0, 1.0, 0.7),
        };
        UnisonSettings {
            voices,
            spread,
            offset,
            expression,
            sign,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VibratoKind {
    #[default]
    Normal,
    Shaky,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Vibrato {
    /// Peak pitch deviation in semitones.
    pub depth: f64,
    /// Multiplier on the base LFO rate.
    pub speed: f64,
    /// Ticks of note age before vibrato fades in.
    pub delay_ticks: f64,
    pub kind: VibratoKind,
}

impl Default for Vibrato {
    fn default() -> Self {
        Vibrato {
            depth: 0.0,
            speed: 1.0,
            delay_ticks: 0.0,
            kind: VibratoKind::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChipWave {
    Rounded,
    Triangle,
    #[default]
    Square,
    Pulse4,
    Pulse8,
    Sawtooth,
    DoubleSaw,
    DoublePulse,
    Spiky,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NoiseWave {
    #[default]
    Retro,
    White,
    Clang,
    Buzz,
    Pink,
}

/// Operator routing. Operators are numbered from 0; the first
/// `carrier_count` operators are heard, the rest only modulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FmAlgorithm {
    /// 1←(2 3 4)
    #[default]
    OneFromAll,
    /// 1←(2 3←4)
    OneFromTwoAndChain,
    /// 1←2←(3 4)
    ChainThenPair,
    /// 1←3 2←4
    TwoPairs,
    /// 1←2←3←4
    Stack,
    /// (1 2 3)←4
    ThreeFromFour,
    /// 1 2 3 4
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FmFeedback {
    #[default]
    OneSelf,
    TwoSelf,
    ThreeSelf,
    FourSelf,
    OneAndTwoSelf,
    AllSelf,
    /// Operator 2 feeds back into operator 1.
    TwoToOne,
    /// 4→3→2→1 ring.
    Ring,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmOperator {
    pub frequency_ratio: f64,
    /// `0..=FM_AMPLITUDE_MAX`.
    pub amplitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InstrumentKind {
    Chip {
        wave: ChipWave,
    },
    Harmonics {
        harmonics: Vec<u8>,
    },
    Fm {
        algorithm: FmAlgorithm,
        operators: Vec<FmOperator>,
        feedback: FmFeedback,
        /// `0..=FM_AMPLITUDE_MAX`.
        #[serde(rename = "feedbackAmplitude")]
        feedback_amplitude: f64,
    },
    Noise {
        wave: NoiseWave,
    },
    PickedString {
        harmonics: Vec<u8>,
        /// `0..=1`, how long the string rings.
        sustain: f64,
    },
    Supersaw {
        dynamism: f64,
        spread: f64,
        shape: f64,
    },
    PulseWidth {
        /// Duty cycle, `0..=0.5`.
        #[serde(rename = "pulseWidth")]
        pulse_width: f64,
    },
}

impl Default for InstrumentKind {
    fn default() -> Self {
        InstrumentKind::Chip {
            wave: ChipWave::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EffectToggles {
    pub panning: bool,
    pub eq_filter: bool,
    pub granular: bool,
    pub distortion: bool,
    pub bitcrusher: bool,
    pub chorus: bool,
    pub echo: bool,
    pub reverb: bool,
    pub ring_modulation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GrainEnvelope {
    #[default]
    Parabolic,
    RaisedCosineBell,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GranularSettings {
    /// Wet amount, `0..=1`.
    pub mix: f64,
    pub grain_min_seconds: f64,
    pub grain_max_seconds: f64,
    /// How far behind the write head grains may start.
    pub range_seconds: f64,
    pub envelope: GrainEnvelope,
}

impl Default for GranularSettings {
    fn default() -> Self {
        GranularSettings {
            mix: 1.0,
            grain_min_seconds: 0.02,
            grain_max_seconds: 0.1,
            range_seconds: 0.3,
            envelope: GrainEnvelope::Parabolic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RingModWave {
    #[default]
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RingModSettings {
    pub mix: f64,
    pub hz: f64,
    pub wave: RingModWave,
}

impl Default for RingModSettings {
    fn default() -> Self {
        RingModSettings {
            mix: 0.5,
            hz: 440.0,
            wave: RingModWave::Sine,
        }
    }
}

// ── Instrument ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Instrument {
    pub kind: InstrumentKind,
    /// `-VOLUME_RANGE/2..=VOLUME_RANGE/2`; the bottom mutes.
    pub volume: f64,
    pub transition: Transition,
    pub chord: Chord,
    /// Arpeggio steps per tick, relative to the default rate.
    pub arpeggio_speed: f64,
    pub fast_two_note_arpeggio: bool,
    pub unison: Unison,
    pub vibrato: Vibrato,
    pub fade_in_seconds: f64,
    pub fade_out_ticks: f64,
    /// Semitones.
    pub pitch_shift: f64,
    /// Cents.
    pub detune: f64,
    pub note_filter: FilterSettings,
    pub envelopes: Vec<EnvelopeSettings>,
    /// Scales how fast envelope and LFO time passes.
    pub envelope_speed: f64,
    pub effects: EffectToggles,
    /// `0..=PAN_MAX`, centred at half.
    pub pan: f64,
    /// `0..=1` of `PAN_DELAY_SECONDS_MAX`.
    pub pan_delay: f64,
    pub eq_filter: FilterSettings,
    /// `0..=1`.
    pub distortion: f64,
    /// `0..=13`, higher is a lower sample-and-hold rate.
    pub bitcrusher_freq: f64,
    /// `0..=7`, higher is coarser.
    pub bitcrusher_quantization: f64,
    pub chorus: f64,
    /// Echo feedback, `0..=1`.
    pub echo_sustain: f64,
    /// Echo delay in steps of `ECHO_DELAY_STEP_TICKS` ticks.
    pub echo_delay: u32,
    /// `0..=1`, how much each repeat swaps sides.
    pub echo_ping_pong: f64,
    pub reverb: f64,
    pub granular: GranularSettings,
    pub ring_mod: RingModSettings,

    #[serde(skip)]
    pub tmp_eq_filter_start: Option<FilterSettings>,
    #[serde(skip)]
    pub tmp_eq_filter_end: Option<FilterSettings>,
    #[serde(skip)]
    pub tmp_note_filter_start: Option<FilterSettings>,
    #[serde(skip)]
    pub tmp_note_filter_end: Option<FilterSettings>,
}

impl Default for Instrument {
    fn default() -> Self {
        Instrument {
            kind: InstrumentKind::default(),
            volume: 0.0,
            transition: Transition::Normal,
            chord: Chord::Simultaneous,
            arpeggio_speed: 1.0,
            fast_two_note_arpeggio: false,
            unison: Unison::None,
            vibrato: Vibrato::default(),
            fade_in_seconds: 0.0,
            fade_out_ticks: 6.0,
            pitch_shift: 0.0,
            detune: 0.0,
            note_filter: FilterSettings::default(),
            envelopes: Vec::new(),
            envelope_speed: 1.0,
            effects: EffectToggles::default(),
            pan: PAN_CENTER,
            pan_delay: 0.5,
            eq_filter: FilterSettings::default(),
            distortion: 0.5,
            bitcrusher_freq: 6.0,
            bitcrusher_quantization: 3.0,
            chorus: 0.5,
            echo_sustain: 0.5,
            echo_delay: 1,
            echo_ping_pong: 0.0,
            reverb: 0.3,
            granular: GranularSettings::default(),
            ring_mod: RingModSettings::default(),
            tmp_eq_filter_start: None,
            tmp_eq_filter_end: None,
            tmp_note_filter_start: None,
            tmp_note_filter_end: None,
        }
    }
}

const PAN_CENTER: f64 = crate::config::PAN_MAX / 2.0;

impl Instrument {
    pub fn new(kind: InstrumentKind) -> Self {
        Instrument {
            kind,
            ..Default::default()
        }
    }

    pub fn is_noise(&self) -> bool {
        matches!(self.kind, InstrumentKind::Noise { .. })
    }

    pub fn fm_operator_count(&self) -> usize {
        match &self.kind {
            InstrumentKind::Fm { operators, .. } => operators.len(),
            _ => 0,
        }
    }

    /// Mark envelopes whose targets do not exist on this instrument.
    fn validate_envelopes(&mut self, channel: usize, instrument: usize) -> Vec<SynthError> {
        let note_points = self.note_filter.points.len();
        let operators = self.fm_operator_count();
        let kind = self.kind.clone();
        let mut errors = Vec::new();
        for (index, envelope) in self.envelopes.iter_mut().enumerate() {
            let reason = match envelope.target {
                EnvelopeTarget::NoteFilterFreq(i) | EnvelopeTarget::NoteFilterGain(i)
                    if i >= note_points =>
                {
                    Some(format!("note filter has no control point {i}"))
                }
                EnvelopeTarget::OperatorAmplitude(i) if i >= operators => {
                    Some(format!("instrument has no FM operator {i}"))
                }
                EnvelopeTarget::FeedbackAmplitude if operators == 0 => {
                    Some("feedback needs an FM instrument".to_string())
                }
                EnvelopeTarget::PulseWidth
                    if !matches!(kind, InstrumentKind::PulseWidth { .. }) =>
                {
                    Some("pulse width needs a pulse width instrument".to_string())
                }
                EnvelopeTarget::StringSustain
                    if !matches!(kind, InstrumentKind::PickedString { .. }) =>
                {
                    Some("sustain needs a picked string instrument".to_string())
                }
                EnvelopeTarget::SupersawDynamism
                | EnvelopeTarget::SupersawSpread
                | EnvelopeTarget::SupersawShape
                    if !matches!(kind, InstrumentKind::Supersaw { .. }) =>
                {
                    Some("needs a supersaw instrument".to_string())
                }
                _ => None,
            };
            envelope.invalid = reason.is_some();
            if let Some(reason) = reason {
                errors.push(SynthError::InvalidEnvelope {
                    channel,
                    instrument,
                    envelope: index,
                    reason,
                });
            }
        }
        errors
    }
}

// ── Modulation ──────────────────────────────────────────────

/// A setting a mod channel can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModSetting {
    SongVolume,
    Tempo,
    SongReverb,
    InstrumentVolume,
    Pan,
    Reverb,
    Distortion,
    Chorus,
    EchoSustain,
    BitcrusherQuantization,
    GranularMix,
    RingModMix,
    ArpeggioSpeed,
    EnvelopeSpeed,
    EnvelopeAmount,
    EqFilterFreq(usize),
    NoteFilterFreq(usize),
}

/// Instrument-level settings that live in an `InstrumentState` override slot.
pub const INSTRUMENT_MOD_SLOTS: usize = 12;

impl ModSetting {
    /// Largest mod note value for this setting.
    pub fn max_value(self) -> f64 {
        match self {
            ModSetting::SongVolume | ModSetting::SongReverb => 200.0,
            ModSetting::Tempo => 470.0,
            ModSetting::InstrumentVolume => crate::config::VOLUME_RANGE,
            ModSetting::Pan
            | ModSetting::Reverb
            | ModSetting::Distortion
            | ModSetting::Chorus
            | ModSetting::EchoSustain
            | ModSetting::GranularMix
            | ModSetting::RingModMix
            | ModSetting::EnvelopeAmount => 100.0,
            ModSetting::BitcrusherQuantization => 7.0,
            ModSetting::ArpeggioSpeed | ModSetting::EnvelopeSpeed => 64.0,
            ModSetting::EqFilterFreq(_) | ModSetting::NoteFilterFreq(_) => FILTER_FREQ_MAX_SETTING,
        }
    }

    /// Convert a mod note value into the setting's own units.
    pub fn to_setting(self, value: f64) -> f64 {
        let value = value.clamp(0.0, self.max_value());
        match self {
            ModSetting::SongVolume | ModSetting::SongReverb => value / 100.0,
            ModSetting::Tempo => value + 30.0,
            ModSetting::InstrumentVolume => value - crate::config::VOLUME_RANGE / 2.0,
            ModSetting::Pan => value,
            ModSetting::Reverb
            | ModSetting::Distortion
            | ModSetting::Chorus
            | ModSetting::EchoSustain
            | ModSetting::GranularMix
            | ModSetting::RingModMix
            | ModSetting::EnvelopeAmount => value / 100.0,
            ModSetting::BitcrusherQuantization => value,
            ModSetting::ArpeggioSpeed => value / 4.0,
            ModSetting::EnvelopeSpeed => value / 8.0,
            ModSetting::EqFilterFreq(_) | ModSetting::NoteFilterFreq(_) => value,
        }
    }

    pub fn is_song_level(self) -> bool {
        matches!(
            self,
            ModSetting::SongVolume | ModSetting::Tempo | ModSetting::SongReverb
        )
    }

    /// Override slot for instrument-level settings other than filter points.
    pub fn instrument_slot(self) -> Option<usize> {
        match self {
            ModSetting::InstrumentVolume => Some(0),
            ModSetting::Pan => Some(1),
            ModSetting::Reverb => Some(2),
            ModSetting::Distortion => Some(3),
            ModSetting::Chorus => Some(4),
            ModSetting::EchoSustain => Some(5),
            ModSetting::BitcrusherQuantization => Some(6),
            ModSetting::GranularMix => Some(7),
            ModSetting::RingModMix => Some(8),
            ModSetting::ArpeggioSpeed => Some(9),
            ModSetting::EnvelopeSpeed => Some(10),
            ModSetting::EnvelopeAmount => Some(11),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modulator {
    pub channel: usize,
    pub instrument: usize,
    pub setting: ModSetting,
    /// Set by `Song::validate`; invalid modulators are ignored while rendering.
    #[serde(skip)]
    pub invalid: bool,
}

impl Modulator {
    pub fn new(channel: usize, instrument: usize, setting: ModSetting) -> Self {
        Modulator {
            channel,
            instrument,
            setting,
            invalid: false,
        }
    }
}

// ── Channels & Song ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Pitch,
    Noise,
    Mod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub kind: ChannelKind,
    pub octave: i32,
    pub muted: bool,
    pub instruments: Vec<Instrument>,
    pub patterns: Vec<Pattern>,
    /// Per bar, a 1-based index into `patterns`; 0 leaves the bar empty.
    pub bars: Vec<usize>,
    /// Mod channels only; a mod note's pitch picks the slot.
    pub modulators: Vec<Modulator>,
}

impl Default for Channel {
    fn default() -> Self {
        Channel {
            kind: ChannelKind::Pitch,
            octave: 0,
            muted: false,
            instruments: vec![Instrument::default()],
            patterns: Vec::new(),
            bars: Vec::new(),
            modulators: Vec::new(),
        }
    }
}

impl Channel {
    pub fn pitch(instrument: Instrument) -> Self {
        Channel {
            instruments: vec![instrument],
            ..Default::default()
        }
    }

    pub fn modulation(modulators: Vec<Modulator>) -> Self {
        Channel {
            kind: ChannelKind::Mod,
            instruments: vec![Instrument::default()],
            modulators,
            ..Default::default()
        }
    }

    /// The pattern placed in `bar`, with its index.
    pub fn pattern_at(&self, bar: usize) -> Option<(usize, &Pattern)> {
        let index = *self.bars.get(bar)?;
        if index == 0 {
            return None;
        }
        self.patterns.get(index - 1).map(|p| (index - 1, p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimiterSettings {
    /// Half-lives per second while the level rises.
    pub rise: f64,
    /// Half-lives per second while the level falls.
    pub decay: f64,
    /// Below this tracked level the limiter leaves the signal alone.
    pub compression_threshold: f64,
    /// Above this tracked level output is pinned to the curve's peak.
    pub limit_threshold: f64,
    /// Slope of the middle band, 1 is unity.
    pub compression_ratio: f64,
    pub master_gain: f64,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        LimiterSettings {
            rise: 4000.0,
            decay: 4.0,
            compression_threshold: 1.0,
            limit_threshold: 1.0,
            compression_ratio: 1.0,
            master_gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Song {
    /// Beats per minute.
    pub tempo: f64,
    pub beats_per_bar: u32,
    pub parts_per_beat: u32,
    /// Semitones added to every pitch.
    pub key: i32,
    pub bar_count: usize,
    pub loop_start: usize,
    pub loop_length: usize,
    /// Output gain applied before the limiter.
    pub volume: f64,
    pub eq_filter: FilterSettings,
    pub limiter: LimiterSettings,
    pub channels: Vec<Channel>,
}

impl Default for Song {
    fn default() -> Self {
        Song {
            tempo: 120.0,
            beats_per_bar: 4,
            parts_per_beat: 4,
            key: 0,
            bar_count: 1,
            loop_start: 0,
            loop_length: 1,
            volume: 1.0,
            eq_filter: FilterSettings::default(),
            limiter: LimiterSettings::default(),
            channels: Vec::new(),
        }
    }
}

impl Song {
    pub fn parts_per_bar(&self) -> u32 {
        self.beats_per_bar * self.parts_per_beat
    }

    /// Index of the last bar inside the loop, exclusive.
    pub fn loop_end(&self) -> usize {
        (self.loop_start + self.loop_length.max(1)).min(self.bar_count.max(1))
    }

    /// Check every modulator and envelope, marking the bad ones invalid so the
    /// render loop can skip them without re-checking. Returns what was found.
    pub fn validate(&mut self) -> Vec<SynthError> {
        let mut errors = Vec::new();

        for (channel_index, channel) in self.channels.iter_mut().enumerate() {
            for (instrument_index, instrument) in channel.instruments.iter_mut().enumerate() {
                errors.extend(instrument.validate_envelopes(channel_index, instrument_index));
            }
        }

        let findings: Vec<(usize, usize, Option<String>)> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ChannelKind::Mod)
            .flat_map(|(channel_index, channel)| {
                channel
                    .modulators
                    .iter()
                    .enumerate()
                    .map(move |(slot, m)| (channel_index, slot, *m))
            })
            .map(|(channel_index, slot, m)| (channel_index, slot, self.modulator_problem(&m, slot)))
            .collect();

        for (channel_index, slot, problem) in findings {
            let modulator = &mut self.channels[channel_index].modulators[slot];
            modulator.invalid = problem.is_some();
            if let Some(reason) = problem {
                errors.push(SynthError::InvalidModulator {
                    channel: channel_index,
                    slot,
                    reason,
                });
            }
        }

        for e in &errors {
            warn!("{e}");
        }
        errors
    }

    fn modulator_problem(&self, m: &Modulator, slot: usize) -> Option<String> {
        if slot >= MOD_SLOTS {
            return Some(format!("only {MOD_SLOTS} slots are available"));
        }
        if m.setting.is_song_level() {
            return None;
        }
        let Some(channel) = self.channels.get(m.channel) else {
            return Some(format!("channel {} does not exist", m.channel));
        };
        if channel.kind == ChannelKind::Mod {
            return Some("cannot target a mod channel".to_string());
        }
        let Some(instrument) = channel.instruments.get(m.instrument) else {
            return Some(format!("instrument {} does not exist", m.instrument));
        };
        let fx = &instrument.effects;
        match m.setting {
            ModSetting::EqFilterFreq(i) if i >= instrument.eq_filter.points.len() => {
                Some(format!("EQ filter has no control point {i}"))
            }
            ModSetting::EqFilterFreq(_) if !fx.eq_filter => Some("EQ filter is off".to_string()),
            ModSetting::NoteFilterFreq(i) if i >= instrument.note_filter.points.len() => {
                Some(format!("note filter has no control point {i}"))
            }
            ModSetting::EqFilterFreq(i) | ModSetting::NoteFilterFreq(i) if i >= MAX_FILTER_POINTS => {
                Some(format!("control point {i} exceeds the filter limit"))
            }
            ModSetting::Pan if !fx.panning => Some("panning is off".to_string()),
            ModSetting::Reverb if !fx.reverb => Some("reverb is off".to_string()),
            ModSetting::Distortion if !fx.distortion => Some("distortion is off".to_string()),
            ModSetting::Chorus if !fx.chorus => Some("chorus is off".to_string()),
            ModSetting::EchoSustain if !fx.echo => Some("echo is off".to_string()),
            ModSetting::BitcrusherQuantization if !fx.bitcrusher => {
                Some("bitcrusher is off".to_string())
            }
            ModSetting::GranularMix if !fx.granular => Some("granular is off".to_string()),
            ModSetting::RingModMix if !fx.ring_modulation => {
                Some("ring modulation is off".to_string())
            }
            _ => None,
        }
    }
}

/// A filter point's gain setting that leaves the signal unchanged for a peak.
pub const NEUTRAL_FILTER_GAIN: f64 = FILTER_GAIN_CENTER;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pins_interpolate_and_clamp() {
        let mut note = Note::new(60, 0, 8, 3);
        note.pins = vec![
            NotePin {
                interval: 0,
                time: 0,
                size: 3,
            },
            NotePin {
                interval: 4,
                time: 8,
                size: 1,
            },
        ];
        let (interval, size) = note.pin_value_at(4.0);
        assert!((interval - 2.0).abs() < 1e-12);
        assert!((size - 2.0).abs() < 1e-12);
        assert_eq!(note.pin_value_at(-3.0), (0.0, 3.0));
        assert_eq!(note.pin_value_at(100.0), (4.0, 1.0));
        assert_eq!(note.last_interval(), 4);
    }

    #[test]
    fn empty_bar_has_no_pattern() {
        let mut channel = Channel::default();
        channel.patterns.push(Pattern::with_notes(vec![Note::new(60, 0, 4, 3)]));
        channel.bars = vec![1, 0];
        assert!(channel.pattern_at(0).is_some());
        assert!(channel.pattern_at(1).is_none());
        assert!(channel.pattern_at(5).is_none());
    }

    #[test]
    fn validate_marks_missing_filter_point() {
        let mut song = Song::default();
        let mut instrument = Instrument::default();
        instrument.effects.eq_filter = true;
        instrument.envelopes.push(EnvelopeSettings::new(
            EnvelopeTarget::NoteFilterFreq(2),
            EnvelopeCurve::Twang { speed: 1.0 },
        ));
        song.channels.push(Channel::pitch(instrument));
        song.channels.push(Channel::modulation(vec![
            Modulator::new(0, 0, ModSetting::EqFilterFreq(0)),
            Modulator::new(0, 0, ModSetting::InstrumentVolume),
            Modulator::new(7, 0, ModSetting::Pan),
        ]));

        let errors = song.validate();
        assert_eq!(errors.len(), 3, "got {errors:?}");
        assert!(song.channels[0].instruments[0].envelopes[0].invalid);
        let mods = &song.channels[1].modulators;
        assert!(mods[0].invalid, "EQ has no points");
        assert!(!mods[1].invalid);
        assert!(mods[2].invalid, "channel 7 does not exist");
    }

    #[test]
    fn song_serde_fills_defaults() {
        let song: Song = serde_json::from_str(
            r#"{"tempo": 90, "channels": [{"instruments": [{"kind": {"type": "noise", "wave": "white"}}]}]}"#,
        )
        .unwrap();
        assert_eq!(song.tempo, 90.0);
        assert_eq!(song.parts_per_beat, 4);
        assert!(song.channels[0].instruments[0].is_noise());
        assert_eq!(song.channels[0].instruments[0].fade_out_ticks, 6.0);
    }

    #[test]
    fn mod_values_map_to_setting_units() {
        assert_eq!(ModSetting::Tempo.to_setting(90.0), 120.0);
        assert_eq!(ModSetting::InstrumentVolume.to_setting(25.0), 0.0);
        assert_eq!(ModSetting::Reverb.to_setting(500.0), 1.0);
    }
}
