//! Background ticker thread owning wall-clock measurement.
//!
//! The clock talks to it only through [`TickerCommand`] messages and reads
//! simulated time back from its tick channel. Every re-anchoring command
//! starts a new epoch; ticks carry the epoch they were measured in so the
//! clock can drop those that predate its latest command.

use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::errors::{RealtimeError, Result};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickerCommand {
    SetTime(DateTime<Utc>),
    SetSpeed(f64),
    SetPaused(bool),
    /// Start advancing (unless paused)
    Resume,
    Shutdown,
}

impl TickerCommand {
    /// Whether ticks measured before this command are stale once it lands.
    pub fn starts_epoch(&self) -> bool {
        matches!(
            self,
            TickerCommand::SetTime(_) | TickerCommand::SetPaused(_) | TickerCommand::Resume
        )
    }
}

/// One simulated time sample
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub epoch: u64,
    pub time: DateTime<Utc>,
}

/// Anchored simulated time: `anchor_sim + (now - anchor_real) * speed`.
///
/// Re-anchoring on every command keeps a late wake-up from losing time.
#[derive(Clone, Debug)]
pub struct TickerState {
    anchor_sim: DateTime<Utc>,
    anchor_real: Instant,
    speed: f64,
    paused: bool,
    running: bool,
    epoch: u64,
}

impl TickerState {
    pub fn new(start: DateTime<Utc>, now: Instant) -> Self {
        Self {
            anchor_sim: start,
            anchor_real: now,
            speed: 1.0,
            paused: true,
            running: false,
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn tick(&self, now: Instant) -> Tick {
        Tick {
            epoch: self.epoch,
            time: self.sim_time(now),
        }
    }

    pub fn is_advancing(&self) -> bool {
        self.running && !self.paused
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Simulated time as of the wall-clock instant `now`.
    pub fn sim_time(&self, now: Instant) -> DateTime<Utc> {
        if !self.is_advancing() {
            return self.anchor_sim;
        }
        let elapsed = now.saturating_duration_since(self.anchor_real);
        let micros = (elapsed.as_secs_f64() * self.speed * 1_000_000.0).round() as i64;
        self.anchor_sim + TimeDelta::microseconds(micros)
    }

    fn rebase(&mut self, now: Instant) {
        self.anchor_sim = self.sim_time(now);
        self.anchor_real = now;
    }

    pub fn apply(&mut self, command: TickerCommand, now: Instant) {
        if command.starts_epoch() {
            self.epoch += 1;
        }
        match command {
            TickerCommand::SetTime(time) => {
                self.anchor_sim = time;
                self.anchor_real = now;
            }
            TickerCommand::SetSpeed(speed) => {
                self.rebase(now);
                self.speed = speed;
            }
            TickerCommand::SetPaused(paused) => {
                self.rebase(now);
                self.paused = paused;
                if paused {
                    self.running = false;
                }
            }
            TickerCommand::Resume => {
                self.rebase(now);
                self.running = true;
            }
            TickerCommand::Shutdown => {}
        }
    }
}

/// Handle to the ticker thread; dropping it stops and joins the thread.
pub struct Ticker {
    commands: Sender<TickerCommand>,
    ticks: Receiver<Tick>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    pub fn spawn(start: DateTime<Utc>, interval: Duration) -> Result<Self> {
        let (commands, command_rx) = unbounded();
        let (tick_tx, ticks) = unbounded();
        let state = TickerState::new(start, Instant::now());

        let thread = thread::Builder::new()
            .name("xgds-playback-ticker".into())
            .spawn(move || ticker_loop(state, command_rx, tick_tx, interval))
            .map_err(|_| RealtimeError::TickerStopped)?;

        Ok(Self {
            commands,
            ticks,
            thread: Some(thread),
        })
    }

    pub fn send(&self, command: TickerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RealtimeError::TickerStopped)
    }

    pub fn ticks(&self) -> &Receiver<Tick> {
        &self.ticks
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        let _ = self.commands.send(TickerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn ticker_loop(
    mut state: TickerState,
    commands: Receiver<TickerCommand>,
    ticks: Sender<Tick>,
    interval: Duration,
) {
    log::debug!("ticker started, interval {:?}", interval);
    let mut next_tick = Instant::now() + interval;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match commands.recv_timeout(wait) {
            Ok(TickerCommand::Shutdown) => break,
            Ok(command) => {
                let was_advancing = state.is_advancing();
                let now = Instant::now();
                state.apply(command, now);
                if !was_advancing && state.is_advancing() {
                    next_tick = now + interval;
                }
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        next_tick += interval;
        if next_tick <= now {
            next_tick = now + interval;
        }
        if state.is_advancing() && ticks.send(state.tick(now)).is_err() {
            break;
        }
    }

    log::debug!("ticker stopped");
}
