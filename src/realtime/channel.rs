use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;

use crate::config::HubConfig;
use crate::errors::{RealtimeError, Result};
use crate::realtime::heartbeat::{HeartbeatStats, Liveness, LivenessMonitor};
use crate::realtime::sse::{SseDecoder, SseEvent};
use crate::realtime::transport::EventTransport;

/// Subscriber key the hub's own heartbeat handler registers under
pub const HEARTBEAT_SUBSCRIBER: &str = "heartbeatConnectedCallback";

/// Callback invoked on the channel's connection task for each matching event
pub type EventCallback = Arc<dyn Fn(&SseEvent) + Send + Sync>;

/// Which channels a subscribe/unsubscribe call applies to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelSelection {
    /// Every channel the server reports as active
    Active,
    Only(Vec<String>),
}

impl ChannelSelection {
    pub fn only<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ChannelSelection::Only(channels.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for ChannelSelection {
    fn from(channel: &str) -> Self {
        ChannelSelection::Only(vec![channel.to_string()])
    }
}

impl From<String> for ChannelSelection {
    fn from(channel: String) -> Self {
        ChannelSelection::Only(vec![channel])
    }
}

impl From<Vec<String>> for ChannelSelection {
    fn from(channels: Vec<String>) -> Self {
        ChannelSelection::Only(channels)
    }
}

impl From<&[&str]> for ChannelSelection {
    fn from(channels: &[&str]) -> Self {
        ChannelSelection::only(channels.iter().copied())
    }
}

/// Dedup key of one live registration
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub event_type: String,
    pub channel: String,
    pub subscriber: String,
}

impl SubscriptionKey {
    pub fn new(event_type: &str, channel: &str, subscriber: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            channel: channel.to_string(),
            subscriber: subscriber.to_string(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.event_type, self.channel, self.subscriber)
    }
}

/// Statistics for a single channel connection
#[derive(Clone, Debug)]
pub struct ChannelStats {
    /// Channel name
    pub name: String,
    /// Registrations across all event types
    pub listener_count: usize,
    /// Event types with at least one listener
    pub event_types: Vec<String>,
    /// Events decoded on this channel
    pub total_events: u64,
}

struct ListenerEntry {
    subscriber: String,
    callback: EventCallback,
}

type ListenerTable = HashMap<String, SmallVec<[ListenerEntry; 2]>>;

/// One live stream shared by every subscription on a channel
struct ChannelConnection {
    listeners: Arc<RwLock<ListenerTable>>,
    total_events: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Drop for ChannelConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct HubInner {
    config: HubConfig,
    transport: Arc<dyn EventTransport>,
    connections: DashMap<String, ChannelConnection>,
    subscriptions: DashSet<SubscriptionKey>,
    active_channels: OnceCell<Vec<String>>,
    liveness: Arc<LivenessMonitor>,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    connections_opened: AtomicU64,
}

impl Drop for HubInner {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat_task.lock().take() {
            task.abort();
        }
    }
}

/// Multiplexes logical channels over one push stream per channel.
///
/// Cloning yields another handle to the same hub. Every method that may
/// open a connection must run inside a tokio runtime.
#[derive(Clone)]
pub struct ChannelHub {
    inner: Arc<HubInner>,
}

impl ChannelHub {
    pub fn new<T: EventTransport>(config: HubConfig, transport: T) -> Result<Self> {
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: HubConfig, transport: Arc<dyn EventTransport>) -> Result<Self> {
        config.validate()?;
        let liveness = Arc::new(LivenessMonitor::new(config.liveness_window()));
        Ok(Self {
            inner: Arc::new(HubInner {
                config,
                transport,
                connections: DashMap::new(),
                subscriptions: DashSet::new(),
                active_channels: OnceCell::new(),
                liveness,
                heartbeat_task: Mutex::new(None),
                connections_opened: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// The server's active channel list, fetched once and cached.
    ///
    /// A failed fetch is not cached; the error is retriable.
    pub async fn active_channels(&self) -> Result<Vec<String>> {
        let transport = self.inner.transport.clone();
        let timeout = self.inner.config.fetch_timeout();
        let channels = self
            .inner
            .active_channels
            .get_or_try_init(|| async move {
                log::debug!("fetching active channel list");
                match tokio::time::timeout(timeout, transport.fetch_channels()).await {
                    Ok(result) => result,
                    Err(_) => Err(RealtimeError::ChannelList(format!(
                        "no response within {:?}",
                        timeout
                    ))),
                }
            })
            .await
            .map_err(|err| {
                log::warn!("active channel fetch failed: {}", err);
                err
            })?;
        Ok(channels.clone())
    }

    async fn resolve(&self, selection: ChannelSelection) -> Result<Vec<String>> {
        match selection {
            ChannelSelection::Active => self.active_channels().await,
            ChannelSelection::Only(channels) => Ok(channels),
        }
    }

    /// Register `callback` for `event_type` on each selected channel.
    ///
    /// A tuple that is already registered is left alone. Returns the number
    /// of new registrations.
    pub async fn subscribe<F>(
        &self,
        event_type: &str,
        callback: F,
        subscriber: &str,
        channels: impl Into<ChannelSelection>,
    ) -> Result<usize>
    where
        F: Fn(&SseEvent) + Send + Sync + 'static,
    {
        let channels = self.resolve(channels.into()).await?;
        let callback: EventCallback = Arc::new(callback);
        let mut added = 0;

        for channel in channels {
            let key = SubscriptionKey::new(event_type, &channel, subscriber);
            if !self.inner.subscriptions.insert(key.clone()) {
                log::debug!("already subscribed: {}", key);
                continue;
            }

            let connection = self
                .inner
                .connections
                .entry(channel.clone())
                .or_insert_with(|| self.open_connection(&channel));
            connection
                .listeners
                .write()
                .entry(event_type.to_string())
                .or_default()
                .push(ListenerEntry {
                    subscriber: subscriber.to_string(),
                    callback: callback.clone(),
                });
            log::debug!("subscribed {}", key);
            added += 1;
        }

        Ok(added)
    }

    /// Detach the listener registered under each `(event_type, channel, subscriber)`.
    ///
    /// A channel's connection closes only once its last listener is gone.
    /// Returns the number of registrations removed.
    pub async fn unsubscribe(
        &self,
        event_type: &str,
        channels: impl Into<ChannelSelection>,
        subscriber: &str,
    ) -> Result<usize> {
        let channels = self.resolve(channels.into()).await?;
        let mut removed = 0;

        for channel in channels {
            let key = SubscriptionKey::new(event_type, &channel, subscriber);
            if self.inner.subscriptions.remove(&key).is_none() {
                continue;
            }
            removed += 1;

            let now_idle = match self.inner.connections.get(&channel) {
                Some(connection) => {
                    let mut listeners = connection.listeners.write();
                    if let Some(entries) = listeners.get_mut(event_type) {
                        entries.retain(|entry| entry.subscriber != subscriber);
                        if entries.is_empty() {
                            listeners.remove(event_type);
                        }
                    }
                    listeners.is_empty()
                }
                None => false,
            };
            log::debug!("unsubscribed {}", key);

            if now_idle {
                let closed = self
                    .inner
                    .connections
                    .remove_if(&channel, |_, connection| connection.listeners.read().is_empty());
                if closed.is_some() {
                    log::info!("closed idle connection to channel '{}'", channel);
                }
            }
        }

        Ok(removed)
    }

    fn open_connection(&self, channel: &str) -> ChannelConnection {
        let listeners: Arc<RwLock<ListenerTable>> = Arc::default();
        let total_events = Arc::new(AtomicU64::new(0));
        self.inner.connections_opened.fetch_add(1, Ordering::Relaxed);
        log::info!("opening stream for channel '{}'", channel);

        let task = tokio::spawn(run_connection(
            channel.to_string(),
            self.inner.transport.clone(),
            listeners.clone(),
            total_events.clone(),
            self.inner.config.reconnect_delay(),
        ));

        ChannelConnection {
            listeners,
            total_events,
            task,
        }
    }

    /// Subscribe to heartbeats on the reserved channel and arm the periodic
    /// liveness check. Calling it again does nothing.
    pub async fn start_heartbeat(&self) -> Result<()> {
        let monitor = self.inner.liveness.clone();
        let config = &self.inner.config;
        self.subscribe(
            &config.heartbeat_event,
            move |event: &SseEvent| {
                if let Err(err) = monitor.record_heartbeat(&event.data) {
                    log::warn!("discarding heartbeat: {}", err);
                }
            },
            HEARTBEAT_SUBSCRIBER,
            config.heartbeat_channel.as_str(),
        )
        .await?;

        let mut task = self.inner.heartbeat_task.lock();
        if task.is_none() {
            let monitor = self.inner.liveness.clone();
            let period = config.check_interval();
            *task = Some(tokio::spawn(async move {
                let start = tokio::time::Instant::now() + period;
                let mut interval = tokio::time::interval_at(start, period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    monitor.check();
                }
            }));
        }
        Ok(())
    }

    pub fn liveness(&self) -> Liveness {
        self.inner.liveness.status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.liveness.is_connected()
    }

    pub fn watch_liveness(&self) -> watch::Receiver<Liveness> {
        self.inner.liveness.watch()
    }

    pub fn liveness_monitor(&self) -> &LivenessMonitor {
        &self.inner.liveness
    }

    pub fn heartbeat_stats(&self) -> HeartbeatStats {
        self.inner.liveness.stats()
    }

    pub fn is_subscribed(&self, event_type: &str, channel: &str, subscriber: &str) -> bool {
        self.inner
            .subscriptions
            .contains(&SubscriptionKey::new(event_type, channel, subscriber))
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Connections opened over the hub's lifetime, including closed ones.
    pub fn connections_opened(&self) -> u64 {
        self.inner.connections_opened.load(Ordering::Relaxed)
    }

    /// Channels with a live connection
    pub fn channels(&self) -> Vec<String> {
        self.inner.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn channel_stats(&self, channel: &str) -> Option<ChannelStats> {
        self.inner.connections.get(channel).map(|connection| {
            let listeners = connection.listeners.read();
            let mut event_types: Vec<String> = listeners.keys().cloned().collect();
            event_types.sort();
            ChannelStats {
                name: channel.to_string(),
                listener_count: listeners.values().map(|entries| entries.len()).sum(),
                event_types,
                total_events: connection.total_events.load(Ordering::Relaxed),
            }
        })
    }
}

/// Connection task: read, decode, dispatch; reopen after `retry` when the
/// stream ends. Runs until aborted by its `ChannelConnection`.
async fn run_connection(
    channel: String,
    transport: Arc<dyn EventTransport>,
    listeners: Arc<RwLock<ListenerTable>>,
    total_events: Arc<AtomicU64>,
    default_retry: Duration,
) {
    let mut retry = default_retry;
    let mut last_event_id: Option<String> = None;

    loop {
        match transport.open(&channel, last_event_id.clone()).await {
            Ok(mut stream) => {
                let mut decoder = SseDecoder::new();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(bytes) => {
                            for event in decoder.feed(&bytes) {
                                total_events.fetch_add(1, Ordering::Relaxed);
                                dispatch(&listeners, &event);
                            }
                        }
                        Err(err) => {
                            log::warn!("stream for channel '{}' broke: {}", channel, err);
                            break;
                        }
                    }
                }
                if let Some(ms) = decoder.retry() {
                    retry = Duration::from_millis(ms);
                }
                if let Some(id) = decoder.last_event_id() {
                    last_event_id = Some(id.to_string());
                }
                log::info!("stream for channel '{}' ended, reopening in {:?}", channel, retry);
            }
            Err(err) => {
                log::warn!("cannot open channel '{}': {}, retrying in {:?}", channel, err, retry);
            }
        }
        tokio::time::sleep(retry).await;
    }
}

fn dispatch(listeners: &RwLock<ListenerTable>, event: &SseEvent) {
    // callbacks may subscribe or unsubscribe, so none runs under the lock
    let callbacks: SmallVec<[EventCallback; 4]> = match listeners.read().get(event.event_type()) {
        Some(entries) => entries.iter().map(|entry| entry.callback.clone()).collect(),
        None => return,
    };
    for callback in callbacks {
        callback(event);
    }
}
