use std::time::Duration;

use serde::Deserialize;

use crate::errors::{RealtimeError, Result};

/// Configuration for the channel hub and its heartbeat monitor
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Scheme and authority every path below is resolved against
    pub base_url: String,
    /// Endpoint returning the JSON array of active channel names
    pub channels_path: String,
    /// Stream endpoint, queried with `?channel=<name>`
    pub stream_path: String,
    /// Reserved channel carrying heartbeat events
    pub heartbeat_channel: String,
    pub heartbeat_event: String,
    /// Maximum gap since the last heartbeat before the link counts as down (seconds)
    pub liveness_window_secs: f64,
    /// Interval between liveness checks (seconds), must exceed the window
    pub check_interval_secs: f64,
    /// Timeout on the active channel fetch (seconds)
    pub fetch_timeout_secs: f64,
    /// Delay before reopening a dropped stream unless the server sent `retry:` (milliseconds)
    pub reconnect_delay_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            channels_path: "/xgds_core/sseActiveChannels".to_string(),
            stream_path: "/sse/stream".to_string(),
            heartbeat_channel: "sse".to_string(),
            heartbeat_event: "heartbeat".to_string(),
            liveness_window_secs: 10.0,
            check_interval_secs: 11.0,
            fetch_timeout_secs: 10.0,
            reconnect_delay_ms: 3000,
        }
    }
}

impl HubConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON settings blob; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RealtimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        positive_secs("liveness window", self.liveness_window_secs)?;
        positive_secs("check interval", self.check_interval_secs)?;
        positive_secs("fetch timeout", self.fetch_timeout_secs)?;
        // a poll shorter than the window could miss a heartbeat that was never due
        if self.check_interval_secs <= self.liveness_window_secs {
            return Err(RealtimeError::Config(format!(
                "check interval {}s must exceed liveness window {}s",
                self.check_interval_secs, self.liveness_window_secs
            )));
        }
        Ok(())
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs_f64(self.liveness_window_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fetch_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn channels_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.channels_path)
    }

    pub fn stream_url(&self, channel: &str) -> String {
        let encoded =
            percent_encoding::utf8_percent_encode(channel, percent_encoding::NON_ALPHANUMERIC);
        format!(
            "{}{}?channel={}",
            self.base_url.trim_end_matches('/'),
            self.stream_path,
            encoded
        )
    }
}

fn positive_secs(name: &str, secs: f64) -> Result<()> {
    match Duration::try_from_secs_f64(secs) {
        Ok(duration) if !duration.is_zero() => Ok(()),
        _ => Err(RealtimeError::Config(format!(
            "{} must be a positive number of seconds, got {}",
            name, secs
        ))),
    }
}

/// Configuration for the playback clock and its ticker
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Wall-clock interval between ticks (milliseconds)
    pub tick_interval_ms: u64,
    pub initial_speed: f64,
    /// IANA zone used only for labels
    pub display_timezone: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            initial_speed: 1.0,
            display_timezone: "Etc/UTC".to_string(),
        }
    }
}

impl PlaybackConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RealtimeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(RealtimeError::Config("tick interval must be non-zero".into()));
        }
        if !(self.initial_speed.is_finite() && self.initial_speed > 0.0) {
            return Err(RealtimeError::InvalidSpeed(self.initial_speed));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
