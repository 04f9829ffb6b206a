//! Live event channels and synchronized playback time for xGDS clients.
//!
//! [`realtime::ChannelHub`] multiplexes subscriptions over one SSE stream per
//! channel and tracks server liveness from heartbeats.
//! [`playback::PlaybackClock`] owns the shared, speed-scaled playback time
//! that sliders and players follow.

pub mod config;
pub mod errors;
pub mod logging;
pub mod playback;
pub mod realtime;
pub mod utils;

pub use config::{HubConfig, PlaybackConfig};
pub use errors::{RealtimeError, Result};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use playback::{PlaybackClock, PlaybackListener, PlaybackState, ScrubControl, SliderListener, SliderView};
pub use realtime::{ChannelHub, ChannelSelection, EventTransport, HttpTransport, Liveness, MemoryTransport, SseEvent};
