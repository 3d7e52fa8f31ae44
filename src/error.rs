use std::fmt;

#[derive(Debug)]
pub enum SynthError {
    /// The caller's output slices cannot hold the requested sample count.
    BufferTooShort {
        requested: usize,
        left: usize,
        right: usize,
    },
    InvalidSampleRate(f64),
    ChannelOutOfRange { channel: usize, channel_count: usize },
    BarOutOfRange { bar: usize, bar_count: usize },
    /// A modulator points at a target that does not exist or cannot be modulated.
    InvalidModulator {
        channel: usize,
        slot: usize,
        reason: String,
    },
    /// An envelope targets a filter control point or operator that is missing.
    InvalidEnvelope {
        channel: usize,
        instrument: usize,
        envelope: usize,
        reason: String,
    },
    Config(serde_json::Error),
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::BufferTooShort {
                requested,
                left,
                right,
            } => write!(
                f,
                "Output buffers too short: requested {requested} samples, left holds {left}, right holds {right}"
            ),
            SynthError::InvalidSampleRate(rate) => write!(f, "Invalid sample rate {rate}"),
            SynthError::ChannelOutOfRange {
                channel,
                channel_count,
            } => write!(f, "Channel {channel} out of range (song has {channel_count})"),
            SynthError::BarOutOfRange { bar, bar_count } => {
                write!(f, "Bar {bar} out of range (song has {bar_count})")
            }
            SynthError::InvalidModulator {
                channel,
                slot,
                reason,
            } => write!(f, "Modulator {slot} on channel {channel} is invalid: {reason}"),
            SynthError::InvalidEnvelope {
                channel,
                instrument,
                envelope,
                reason,
            } => write!(
                f,
                "Envelope {envelope} of instrument {instrument} on channel {channel} is invalid: {reason}"
            ),
            SynthError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for SynthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynthError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SynthError {
    fn from(e: serde_json::Error) -> Self {
        SynthError::Config(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_error_message_names_sizes() {
        let e = SynthError::BufferTooShort {
            requested: 128,
            left: 64,
            right: 128,
        };
        let msg = format!("{e}");
        assert!(msg.contains("128") && msg.contains("64"), "got {msg}");
    }

    #[test]
    fn json_error_converts() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let e: SynthError = err.into();
        assert!(matches!(e, SynthError::Config(_)));
        assert!(std::error::Error::source(&e).is_some());
    }
}
