use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::errors::{RealtimeError, Result};
use crate::utils::time_utils::parse_iso;

/// Link state as seen through the heartbeat channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Liveness {
    Connected,
    Disconnected,
}

/// Stats for heartbeat monitoring
#[derive(Clone, Debug, Default)]
pub struct HeartbeatStats {
    /// Heartbeats accepted
    pub heartbeats: u64,
    /// Heartbeat payloads that failed to decode
    pub malformed: u64,
    /// Liveness checks run
    pub checks: u64,
    /// Transitions from connected to disconnected
    pub disconnects: u64,
}

#[derive(Debug, Deserialize)]
struct HeartbeatPayload {
    timestamp: String,
}

#[derive(Debug, Default)]
struct HeartbeatState {
    last_heartbeat: Option<Instant>,
    server_timestamp: Option<DateTime<Utc>>,
}

/// Client-side heartbeat liveness tracker.
///
/// Only `record_*` and `check*` write state. The derived status is published
/// on a `watch` channel; having no observers is fine.
pub struct LivenessMonitor {
    window: Duration,
    state: RwLock<HeartbeatState>,
    status: watch::Sender<Liveness>,
    heartbeats: AtomicU64,
    malformed: AtomicU64,
    checks: AtomicU64,
    disconnects: AtomicU64,
}

impl LivenessMonitor {
    pub fn new(window: Duration) -> Self {
        let (status, _) = watch::channel(Liveness::Disconnected);
        Self {
            window,
            state: RwLock::new(HeartbeatState::default()),
            status,
            heartbeats: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            checks: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Handle a heartbeat event body `{"timestamp": "<ISO>", ...}`.
    ///
    /// A malformed body is counted and rejected without touching state.
    pub fn record_heartbeat(&self, payload: &str) -> Result<DateTime<Utc>> {
        let parsed = serde_json::from_str::<HeartbeatPayload>(payload)
            .map_err(RealtimeError::from)
            .and_then(|p| {
                parse_iso(&p.timestamp).ok_or_else(|| {
                    RealtimeError::Payload(format!("bad heartbeat timestamp '{}'", p.timestamp))
                })
            });

        match parsed {
            Ok(server_time) => {
                self.record_heartbeat_at(Instant::now(), server_time);
                Ok(server_time)
            }
            Err(err) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    pub fn record_heartbeat_at(&self, now: Instant, server_time: DateTime<Utc>) {
        {
            let mut state = self.state.write();
            state.last_heartbeat = Some(now);
            state.server_timestamp = Some(server_time);
        }
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
        if self.publish(Liveness::Connected) {
            log::info!("heartbeat received, link is up");
        }
    }

    pub fn check(&self) -> Liveness {
        self.check_at(Instant::now())
    }

    /// Run one liveness check as of `now`.
    pub fn check_at(&self, now: Instant) -> Liveness {
        self.checks.fetch_add(1, Ordering::Relaxed);
        let fresh = self
            .state
            .read()
            .last_heartbeat
            .map(|last| now.saturating_duration_since(last) <= self.window)
            .unwrap_or(false);

        let status = if fresh {
            Liveness::Connected
        } else {
            Liveness::Disconnected
        };
        if self.publish(status) && status == Liveness::Disconnected {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "no heartbeat within {:?}, link is down",
                self.window
            );
        }
        status
    }

    /// Returns whether the published status changed.
    fn publish(&self, status: Liveness) -> bool {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        })
    }

    pub fn status(&self) -> Liveness {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == Liveness::Connected
    }

    pub fn watch(&self) -> watch::Receiver<Liveness> {
        self.status.subscribe()
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.state.read().last_heartbeat
    }

    /// Server time carried by the most recent heartbeat.
    pub fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.read().server_timestamp
    }

    pub fn stats(&self) -> HeartbeatStats {
        HeartbeatStats {
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            checks: self.checks.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BEAT: &str = r#"{"count": 3, "timestamp": "2024-01-01T00:00:00+00:00"}"#;

    #[tokio::test(start_paused = true)]
    async fn fresh_heartbeat_keeps_link_up() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10));
        assert_eq!(monitor.check(), Liveness::Disconnected);

        monitor.record_heartbeat(BEAT).unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(monitor.check(), Liveness::Connected);
        assert!(monitor.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heartbeat_reports_disconnected() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10));
        let mut status = monitor.watch();

        monitor.record_heartbeat(BEAT).unwrap();
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), Liveness::Connected);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(monitor.check(), Liveness::Disconnected);
        assert_eq!(*status.borrow_and_update(), Liveness::Disconnected);

        // a second stale check is not a new disconnect
        monitor.check();
        assert_eq!(monitor.stats().disconnects, 1);
        assert_eq!(monitor.stats().checks, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_changes_nothing() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10));
        assert!(monitor.record_heartbeat("{not json").is_err());
        assert!(monitor.record_heartbeat(r#"{"timestamp": "yesterday"}"#).is_err());
        assert!(monitor.last_heartbeat().is_none());
        assert_eq!(monitor.status(), Liveness::Disconnected);
        assert_eq!(monitor.stats().malformed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn records_server_time() {
        let monitor = LivenessMonitor::new(Duration::from_secs(10));
        let server = monitor.record_heartbeat(BEAT).unwrap();
        assert_eq!(monitor.server_timestamp(), Some(server));
        assert_eq!(server.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
