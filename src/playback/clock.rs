use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::PlaybackConfig;
use crate::errors::{RealtimeError, Result};
use crate::playback::listener::{ListenerId, ListenerRegistry, PlaybackListener};
use crate::playback::ticker::{Tick, Ticker, TickerCommand};
use crate::utils::time_utils::{parse_time_of_day, DisplayZone};

/// Zero-argument source for a playback bound
pub type TimeProvider = Box<dyn Fn() -> Option<DateTime<Utc>>>;

/// Play/stop notification carrying the clock time at the transition
pub type ClockHook = Box<dyn FnMut(DateTime<Utc>)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// Paused at the current time
    Stopped,
    Playing,
}

/// The single authoritative playback time.
///
/// Time advances only through ticks from the background [`Ticker`]; every
/// widget is a listener and never extrapolates on its own. Ticks measured
/// before the clock's latest seek, pause or resume are dropped. All methods
/// are meant to be called from one consumer thread.
pub struct PlaybackClock {
    current_time: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    playback_speed: f64,
    state: PlaybackState,
    listeners: ListenerRegistry,
    play_hooks: Vec<ClockHook>,
    stop_hooks: Vec<ClockHook>,
    start_provider: TimeProvider,
    end_provider: TimeProvider,
    display_zone: DisplayZone,
    ticker: Ticker,
    /// Epoch of the last command sent; older ticks are stale
    epoch: u64,
}

impl PlaybackClock {
    /// Build the clock from bound providers, stopped at the start bound (or now).
    pub fn new<S, E>(config: &PlaybackConfig, start_provider: S, end_provider: E) -> Result<Self>
    where
        S: Fn() -> Option<DateTime<Utc>> + 'static,
        E: Fn() -> Option<DateTime<Utc>> + 'static,
    {
        config.validate()?;
        let display_zone = DisplayZone::parse(&config.display_timezone)?;

        let start_time = start_provider();
        let end_time = end_provider();
        if let (Some(start), Some(end)) = (start_time, end_time) {
            if start > end {
                return Err(RealtimeError::InvalidBounds { start, end });
            }
        }
        let current_time = clamp(start_time.unwrap_or_else(Utc::now), start_time, end_time);

        let ticker = Ticker::spawn(current_time, config.tick_interval())?;
        let mut epoch = 0;
        send_counted(&ticker, &mut epoch, TickerCommand::SetSpeed(config.initial_speed))?;
        send_counted(&ticker, &mut epoch, TickerCommand::SetTime(current_time))?;
        log::debug!("playback clock ready at {}", current_time.to_rfc3339());

        Ok(Self {
            current_time,
            start_time,
            end_time,
            playback_speed: config.initial_speed,
            state: PlaybackState::Stopped,
            listeners: ListenerRegistry::new(),
            play_hooks: Vec::new(),
            stop_hooks: Vec::new(),
            start_provider: Box::new(start_provider),
            end_provider: Box::new(end_provider),
            display_zone,
            ticker,
            epoch,
        })
    }

    /// Clock with fixed bounds.
    pub fn with_bounds(
        config: &PlaybackConfig,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        Self::new(config, move || start, move || end)
    }

    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn playback_speed(&self) -> f64 {
        self.playback_speed
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    pub fn display_zone(&self) -> DisplayZone {
        self.display_zone
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn command(&mut self, command: TickerCommand) {
        if let Err(err) = send_counted(&self.ticker, &mut self.epoch, command) {
            log::error!("dropping {:?}: {}", command, err);
        }
    }

    /// Register a listener; it starts right away if the clock is playing.
    pub fn add_listener<L>(&mut self, listener: L) -> ListenerId
    where
        L: PlaybackListener + 'static,
    {
        let mut listener: Box<dyn PlaybackListener> = Box::new(listener);
        listener.initialize();
        if self.is_playing() {
            listener.start(self.current_time);
        }
        self.listeners.add(listener)
    }

    /// Pause and unregister a listener, handing it back.
    pub fn remove_listener(&mut self, id: ListenerId) -> Option<Box<dyn PlaybackListener>> {
        let mut listener = self.listeners.remove(id)?;
        listener.pause();
        Some(listener)
    }

    pub fn on_play<F>(&mut self, hook: F)
    where
        F: FnMut(DateTime<Utc>) + 'static,
    {
        self.play_hooks.push(Box::new(hook));
    }

    pub fn on_stop<F>(&mut self, hook: F)
    where
        F: FnMut(DateTime<Utc>) + 'static,
    {
        self.stop_hooks.push(Box::new(hook));
    }

    pub fn play(&mut self) {
        if self.is_playing() {
            return;
        }
        self.state = PlaybackState::Playing;
        let now = self.current_time;
        self.listeners.start_all(now);
        self.command(TickerCommand::SetPaused(false));
        self.command(TickerCommand::Resume);
        for hook in self.play_hooks.iter_mut() {
            hook(now);
        }
        log::debug!("play at {} x{}", now.to_rfc3339(), self.playback_speed);
    }

    pub fn pause(&mut self) {
        if !self.is_playing() {
            return;
        }
        self.command(TickerCommand::SetPaused(true));
        // the ticker re-anchors on its own reckoning, which may be ahead of ours
        self.command(TickerCommand::SetTime(self.current_time));
        self.state = PlaybackState::Stopped;
        self.listeners.pause_all();
        let now = self.current_time;
        for hook in self.stop_hooks.iter_mut() {
            hook(now);
        }
        log::debug!("paused at {}", now.to_rfc3339());
    }

    /// Apply one tick from the ticker.
    ///
    /// Reaching the end bound pauses instead of updating, so no listener
    /// ever sees a time past the end. Ticks still in flight after a pause
    /// are discarded.
    pub fn tick(&mut self, time: DateTime<Utc>) {
        if !self.is_playing() {
            log::trace!("discarding tick {} while stopped", time.to_rfc3339());
            return;
        }
        if let Some(end) = self.end_time {
            if time >= end {
                self.current_time = end;
                log::info!("reached end of range {}", end.to_rfc3339());
                self.pause();
                return;
            }
        }
        self.current_time = time;
        self.listeners.update_all(time);
    }

    /// Apply a tick from the ticker unless it predates the latest command.
    pub fn apply_tick(&mut self, tick: Tick) -> bool {
        if tick.epoch != self.epoch {
            log::trace!(
                "dropping stale tick {} (epoch {} < {})",
                tick.time.to_rfc3339(),
                tick.epoch,
                self.epoch
            );
            return false;
        }
        self.tick(tick.time);
        true
    }

    /// Apply every tick already delivered; returns how many were current.
    pub fn poll_ticks(&mut self) -> usize {
        let pending: Vec<Tick> = self.ticker.ticks().try_iter().collect();
        let mut applied = 0;
        for tick in pending {
            if self.apply_tick(tick) {
                applied += 1;
            }
        }
        applied
    }

    /// Block up to `timeout` for a current tick, then apply it and anything
    /// queued behind it. Stale ticks do not end the wait.
    pub fn wait_tick(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.ticker.ticks().recv_timeout(wait) {
                Ok(tick) => {
                    if self.apply_tick(tick) {
                        return 1 + self.poll_ticks();
                    }
                }
                Err(_) => return 0,
            }
        }
    }

    /// Jump to `target`, playing or not.
    pub fn seek(&mut self, target: DateTime<Utc>) -> Result<()> {
        let before = self.start_time.is_some_and(|start| target < start);
        let after = self.end_time.is_some_and(|end| target > end);
        if before || after {
            let err = RealtimeError::SeekOutOfRange {
                target,
                start: self.start_time,
                end: self.end_time,
            };
            log::warn!("invalid seek: {}", err);
            return Err(err);
        }

        self.current_time = target;
        self.command(TickerCommand::SetTime(target));
        self.listeners.update_all(target);
        Ok(())
    }

    /// Seek to a wall-clock time such as `19:00` or `#19:00:00`, on the day of
    /// the end bound (or of the current time when unbounded) in the display zone.
    pub fn seek_time_of_day(&mut self, entry: &str) -> Result<()> {
        let time_of_day = parse_time_of_day(entry)?;
        let reference = self.end_time.unwrap_or(self.current_time);
        let target = self
            .display_zone
            .on_same_day(reference, time_of_day)
            .ok_or_else(|| RealtimeError::InvalidTimeOfDay(entry.to_string()))?;
        self.seek(target)
    }

    pub fn set_playback_speed(&mut self, speed: f64) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(RealtimeError::InvalidSpeed(speed));
        }
        self.playback_speed = speed;
        self.command(TickerCommand::SetSpeed(speed));
        Ok(())
    }

    pub fn update_start_time(&mut self, start: DateTime<Utc>) -> Result<()> {
        self.apply_bounds(Some(start), self.end_time)
    }

    pub fn update_end_time(&mut self, end: DateTime<Utc>) -> Result<()> {
        self.apply_bounds(self.start_time, Some(end))
    }

    /// Re-read both bound providers.
    pub fn refresh_bounds(&mut self) -> Result<()> {
        let start = (self.start_provider)();
        let end = (self.end_provider)();
        self.apply_bounds(start, end)
    }

    fn apply_bounds(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(RealtimeError::InvalidBounds { start, end });
            }
        }
        self.start_time = start;
        self.end_time = end;

        let previous = self.current_time;
        let clamped = clamp(previous, start, end);
        if clamped == previous {
            return Ok(());
        }

        self.current_time = clamped;
        self.command(TickerCommand::SetTime(clamped));
        let past_end = end.is_some_and(|end| previous > end);
        if past_end && self.is_playing() {
            self.pause();
        } else {
            self.listeners.update_all(clamped);
        }
        Ok(())
    }
}

fn send_counted(ticker: &Ticker, epoch: &mut u64, command: TickerCommand) -> Result<()> {
    if command.starts_epoch() {
        *epoch += 1;
    }
    ticker.send(command)
}

fn clamp(
    time: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let time = match start {
        Some(start) if time < start => start,
        _ => time,
    };
    match end {
        Some(end) if time > end => end,
        _ => time,
    }
}
