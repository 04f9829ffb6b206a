use std::fmt;

use chrono::{DateTime, Utc};

/// Errors raised by the channel hub and the playback clock
#[derive(Debug)]
pub enum RealtimeError {
    /// The active channel list could not be fetched or decoded
    ChannelList(String),
    /// A stream connection failed to open or broke mid-stream
    Transport(String),
    /// A push payload could not be decoded
    Payload(String),
    /// Seek target lies outside the playback bounds
    SeekOutOfRange {
        target: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// Playback speed must be a positive finite multiplier
    InvalidSpeed(f64),
    /// Start bound would lie after the end bound
    InvalidBounds {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    InvalidTimezone(String),
    InvalidTimeOfDay(String),
    /// Unix seconds outside the representable range
    InvalidTimestamp(i64),
    Config(String),
    /// The background ticker thread is gone
    TickerStopped,
}

impl RealtimeError {
    pub fn error_name(&self) -> &'static str {
        match self {
            RealtimeError::ChannelList(_) => "ChannelList",
            RealtimeError::Transport(_) => "Transport",
            RealtimeError::Payload(_) => "Payload",
            RealtimeError::SeekOutOfRange { .. } => "SeekOutOfRange",
            RealtimeError::InvalidSpeed(_) => "InvalidSpeed",
            RealtimeError::InvalidBounds { .. } => "InvalidBounds",
            RealtimeError::InvalidTimezone(_) => "InvalidTimezone",
            RealtimeError::InvalidTimeOfDay(_) => "InvalidTimeOfDay",
            RealtimeError::InvalidTimestamp(_) => "InvalidTimestamp",
            RealtimeError::Config(_) => "Config",
            RealtimeError::TickerStopped => "TickerStopped",
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RealtimeError::ChannelList(_) | RealtimeError::Transport(_)
        )
    }
}

impl fmt::Display for RealtimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealtimeError::ChannelList(msg)
            | RealtimeError::Transport(msg)
            | RealtimeError::Payload(msg)
            | RealtimeError::Config(msg) => write!(f, "{}: {}", self.error_name(), msg),
            RealtimeError::SeekOutOfRange { target, start, end } => write!(
                f,
                "{}: {} is outside [{}, {}]",
                self.error_name(),
                target.to_rfc3339(),
                start.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()),
                end.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into()),
            ),
            RealtimeError::InvalidSpeed(speed) => {
                write!(f, "{}: {} is not a positive finite multiplier", self.error_name(), speed)
            }
            RealtimeError::InvalidBounds { start, end } => write!(
                f,
                "{}: start {} is after end {}",
                self.error_name(),
                start.to_rfc3339(),
                end.to_rfc3339()
            ),
            RealtimeError::InvalidTimezone(tz) => {
                write!(f, "{}: unknown timezone '{}'", self.error_name(), tz)
            }
            RealtimeError::InvalidTimeOfDay(s) => {
                write!(f, "{}: cannot parse '{}' as HH[:MM[:SS]]", self.error_name(), s)
            }
            RealtimeError::InvalidTimestamp(secs) => {
                write!(f, "{}: {} is not a valid unix time", self.error_name(), secs)
            }
            RealtimeError::TickerStopped => write!(f, "{}: ticker thread has exited", self.error_name()),
        }
    }
}

impl std::error::Error for RealtimeError {}

impl From<reqwest::Error> for RealtimeError {
    fn from(err: reqwest::Error) -> Self {
        RealtimeError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        RealtimeError::Payload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retriable() {
        assert!(RealtimeError::ChannelList("timeout".into()).is_retriable());
        assert!(RealtimeError::Transport("reset".into()).is_retriable());
        assert!(!RealtimeError::InvalidSpeed(0.0).is_retriable());
        assert!(!RealtimeError::TickerStopped.is_retriable());
    }

    #[test]
    fn display_names_the_error() {
        let err = RealtimeError::InvalidSpeed(-1.0);
        assert_eq!(err.to_string(), "InvalidSpeed: -1 is not a positive finite multiplier");

        let err: RealtimeError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.error_name(), "Payload");
    }
}
