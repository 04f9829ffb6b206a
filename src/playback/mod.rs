//! Shared playback clock
//!
//! One authoritative simulated time, advanced by a background ticker
//! thread and fanned out to listeners in registration order.

pub mod clock;
pub mod listener;
pub mod slider;
pub mod ticker;

pub use clock::{ClockHook, PlaybackClock, PlaybackState, TimeProvider};
pub use listener::{FnListener, ListenerId, ListenerRegistry, PlaybackListener};
pub use slider::{ScrubControl, SliderListener, SliderView};
pub use ticker::{Tick, Ticker, TickerCommand, TickerState};
