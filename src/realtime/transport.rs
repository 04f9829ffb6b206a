use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::config::HubConfig;
use crate::errors::{RealtimeError, Result};
use crate::realtime::sse::SseEvent;

/// Raw `text/event-stream` body chunks of one channel connection
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// The network side of the hub: channel discovery and stream opening.
pub trait EventTransport: Send + Sync + 'static {
    /// Fetch the names of every active channel.
    fn fetch_channels(&self) -> BoxFuture<'static, Result<Vec<String>>>;

    /// Open the push stream for `channel`, resuming after `last_event_id` when given.
    fn open(&self, channel: &str, last_event_id: Option<String>)
        -> BoxFuture<'static, Result<ByteStream>>;
}

/// HTTP transport backed by `reqwest`
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<HubConfig>,
}

impl HttpTransport {
    pub fn new(config: HubConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: HubConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
        }
    }
}

impl EventTransport for HttpTransport {
    fn fetch_channels(&self) -> BoxFuture<'static, Result<Vec<String>>> {
        let request = self
            .client
            .get(self.config.channels_url())
            .header(ACCEPT, "application/json")
            .timeout(self.config.fetch_timeout());

        async move {
            let channels = request
                .send()
                .await
                .and_then(|resp| resp.error_for_status())
                .map_err(|e| RealtimeError::ChannelList(e.to_string()))?
                .json::<Vec<String>>()
                .await
                .map_err(|e| RealtimeError::ChannelList(e.to_string()))?;
            Ok(channels)
        }
        .boxed()
    }

    fn open(
        &self,
        channel: &str,
        last_event_id: Option<String>,
    ) -> BoxFuture<'static, Result<ByteStream>> {
        let mut request = self
            .client
            .get(self.config.stream_url(channel))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header("Last-Event-ID", id);
        }

        async move {
            let resp = request.send().await?.error_for_status()?;
            let stream = resp
                .bytes_stream()
                .map(|chunk| chunk.map_err(RealtimeError::from))
                .boxed();
            Ok(stream)
        }
        .boxed()
    }
}

#[derive(Default)]
struct MemoryState {
    channels: Option<std::result::Result<Vec<String>, String>>,
    open_streams: HashMap<String, Vec<mpsc::UnboundedSender<Result<Bytes>>>>,
    /// Frames pushed while a channel had no open stream
    backlog: HashMap<String, Vec<Bytes>>,
    opens: HashMap<String, u64>,
    resume_ids: Vec<(String, Option<String>)>,
}

/// In-process transport for tests and offline tools.
///
/// Frames pushed before a stream is open are held back and delivered when it
/// opens, so tests do not race the hub's connection tasks.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    fetches: Arc<AtomicU64>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channels<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let transport = Self::new();
        transport.set_channels(channels);
        transport
    }

    pub fn set_channels<I, S>(&self, channels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.lock().channels = Some(Ok(channels.into_iter().map(Into::into).collect()));
    }

    /// Make channel discovery fail with `reason` until channels are set again.
    pub fn fail_channels(&self, reason: impl Into<String>) {
        self.state.lock().channels = Some(Err(reason.into()));
    }

    /// Push one event on `channel`; returns how many open streams received it.
    pub fn push(&self, channel: &str, event: &SseEvent) -> usize {
        self.push_raw(channel, Bytes::from(event.format()))
    }

    pub fn push_raw(&self, channel: &str, frame: Bytes) -> usize {
        let mut state = self.state.lock();
        let delivered = match state.open_streams.get_mut(channel) {
            Some(senders) => {
                senders.retain(|tx| !tx.is_closed());
                senders
                    .iter()
                    .filter(|tx| tx.send(Ok(frame.clone())).is_ok())
                    .count()
            }
            None => 0,
        };
        if delivered == 0 {
            state.backlog.entry(channel.to_string()).or_default().push(frame);
        }
        delivered
    }

    /// End every open stream on `channel`, as a server restart would.
    pub fn drop_streams(&self, channel: &str) {
        self.state.lock().open_streams.remove(channel);
    }

    pub fn open_count(&self, channel: &str) -> u64 {
        self.state.lock().opens.get(channel).copied().unwrap_or(0)
    }

    /// Streams on `channel` whose receiving side is still alive.
    pub fn live_streams(&self, channel: &str) -> usize {
        self.state
            .lock()
            .open_streams
            .get(channel)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// `Last-Event-ID` values presented on each open, in order.
    pub fn resume_ids(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().resume_ids.clone()
    }
}

impl EventTransport for MemoryTransport {
    fn fetch_channels(&self) -> BoxFuture<'static, Result<Vec<String>>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let result = match self.state.lock().channels.clone() {
            Some(Ok(channels)) => Ok(channels),
            Some(Err(reason)) => Err(RealtimeError::ChannelList(reason)),
            None => Err(RealtimeError::ChannelList("no channel list configured".into())),
        };
        futures_util::future::ready(result).boxed()
    }

    fn open(
        &self,
        channel: &str,
        last_event_id: Option<String>,
    ) -> BoxFuture<'static, Result<ByteStream>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        *state.opens.entry(channel.to_string()).or_default() += 1;
        state.resume_ids.push((channel.to_string(), last_event_id));
        for frame in state.backlog.remove(channel).unwrap_or_default() {
            let _ = tx.send(Ok(frame));
        }
        state.open_streams.entry(channel.to_string()).or_default().push(tx);

        let stream: ByteStream = UnboundedReceiverStream::new(rx).boxed();
        futures_util::future::ready(Ok(stream)).boxed()
    }
}
