//! Live SSE channel infrastructure
//!
//! Provides the SSE wire codec, the transport seam, heartbeat liveness
//! tracking, and the hub that multiplexes subscriptions over one stream
//! per channel.

pub mod channel;
pub mod heartbeat;
pub mod sse;
pub mod transport;

// Re-export main types for convenience
pub use channel::{ChannelHub, ChannelSelection, ChannelStats, EventCallback, SubscriptionKey};
pub use heartbeat::{HeartbeatStats, Liveness, LivenessMonitor};
pub use sse::{parse_channel, SseDecoder, SseEvent};
pub use transport::{ByteStream, EventTransport, HttpTransport, MemoryTransport};
