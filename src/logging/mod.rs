//! Off-thread logging backend for the `log` facade.
//!
//! Records are pushed onto a bounded queue and written to stderr by a
//! dedicated consumer thread, so logging never blocks the hub's connection
//! tasks or the clock's consumer loop.

use crossbeam_channel::{bounded, Receiver, Sender};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Log Level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Off = 5,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Off => "OFF",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Info,
        }
    }

    fn color_code(&self) -> &'static str {
        match self {
            Self::Trace => "\x1b[90m",   // gray
            Self::Debug => "\x1b[36m",   // cyan
            Self::Info => "\x1b[32m",    // green
            Self::Warn => "\x1b[33m",    // yellow
            Self::Error => "\x1b[31m",   // red
            Self::Off => "",
        }
    }

    fn to_filter(self) -> log::LevelFilter {
        match self {
            Self::Trace => log::LevelFilter::Trace,
            Self::Debug => log::LevelFilter::Debug,
            Self::Info => log::LevelFilter::Info,
            Self::Warn => log::LevelFilter::Warn,
            Self::Error => log::LevelFilter::Error,
            Self::Off => log::LevelFilter::Off,
        }
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Self::Trace,
            log::Level::Debug => Self::Debug,
            log::Level::Info => Self::Info,
            log::Level::Warn => Self::Warn,
            log::Level::Error => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Log Entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: f64,
    pub level: LogLevel,
    pub message: String,
    pub target: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            level,
            message: message.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Format the log entry as a colored string for terminal output.
    fn format_colored(&self) -> String {
        let reset = "\x1b[0m";
        let dim = "\x1b[2m";
        let color = self.level.color_code();

        let ts = format_timestamp(self.timestamp);
        let target = self
            .target
            .as_deref()
            .map(|t| format!(" {dim}{t}{reset}"))
            .unwrap_or_default();

        format!(
            "{dim}{ts}{reset} {color}{:<5}{reset}{target} {}",
            self.level.as_str(),
            self.message,
        )
    }
}

fn format_timestamp(ts: f64) -> String {
    use chrono::{DateTime, TimeZone, Utc};
    let secs = ts as i64;
    let micros = ((ts - secs as f64) * 1_000_000.0) as u32;
    let dt: DateTime<Utc> = Utc.timestamp_opt(secs, micros * 1_000).single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

// ---------------------------------------------------------------------------
// Log Config
// ---------------------------------------------------------------------------

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to output.
    pub level: LogLevel,
    /// Queue capacity.
    pub queue_size: usize,
    /// Only targets starting with one of these prefixes are written; empty keeps all.
    pub targets: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            queue_size: 10_000,
            targets: vec![],
        }
    }
}

impl LogConfig {
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Self::default()
        }
    }

    pub fn accepts_target(&self, target: &str) -> bool {
        self.targets.is_empty() || self.targets.iter().any(|t| target.starts_with(t.as_str()))
    }

    pub fn accepts(&self, level: LogLevel, target: Option<&str>) -> bool {
        level >= self.level && target.map_or(true, |t| self.accepts_target(t))
    }
}

// ---------------------------------------------------------------------------
// Log Queue (global singleton, re-initializable)
// ---------------------------------------------------------------------------

static LOG_QUEUE: RwLock<Option<LogQueueInner>> = RwLock::new(None);

struct LogQueueInner {
    sender: Sender<LogEntry>,
    config: Arc<RwLock<LogConfig>>,
    running: Arc<AtomicBool>,
}

pub struct LogQueue;

impl LogQueue {
    /// Initialize (or re-initialize) the global log queue.
    pub fn init(config: LogConfig) {
        Self::shutdown();

        let queue_size = config.queue_size.max(1);
        let (sender, receiver) = bounded::<LogEntry>(queue_size);
        let running = Arc::new(AtomicBool::new(true));
        let level = config.level;
        let cfg = Arc::new(RwLock::new(config));

        *LOG_QUEUE.write() = Some(LogQueueInner {
            sender,
            config: cfg.clone(),
            running: running.clone(),
        });
        log::set_max_level(level.to_filter());

        let spawned = std::thread::Builder::new()
            .name("xgds-logger".into())
            .spawn(move || {
                log_consumer(receiver, cfg, running);
            });
        if spawned.is_err() {
            // without a consumer the queue would only fill up
            *LOG_QUEUE.write() = None;
        }
    }

    /// Update log config at runtime.
    pub fn update_config(config: LogConfig) {
        let guard = LOG_QUEUE.read();
        if let Some(ref inner) = *guard {
            log::set_max_level(config.level.to_filter());
            *inner.config.write() = config;
        }
    }

    /// Shut down the log queue, flushing remaining entries.
    pub fn shutdown() {
        let guard = LOG_QUEUE.read();
        if let Some(ref inner) = *guard {
            inner.running.store(false, Ordering::SeqCst);
        }
        drop(guard);
        *LOG_QUEUE.write() = None;
    }

    /// Whether a record would be queued, checked without copying the config.
    pub fn accepts(level: LogLevel, target: Option<&str>) -> bool {
        let guard = LOG_QUEUE.read();
        match *guard {
            Some(ref inner) => inner.config.read().accepts(level, target),
            None => false,
        }
    }

    /// Get a copy of the current log config.
    pub fn config() -> Option<LogConfig> {
        let guard = LOG_QUEUE.read();
        guard.as_ref().map(|inner| inner.config.read().clone())
    }
}

/// Send a log entry to the queue (non-blocking, drops if full).
#[inline]
pub fn log_entry(entry: LogEntry) {
    let guard = LOG_QUEUE.read();
    if let Some(ref inner) = *guard {
        if !inner.config.read().accepts(entry.level, entry.target.as_deref()) {
            return;
        }
        let _ = inner.sender.try_send(entry);
    }
}

/// Consumer thread: drains the queue and writes to stderr.
fn log_consumer(
    receiver: Receiver<LogEntry>,
    config: Arc<RwLock<LogConfig>>,
    running: Arc<AtomicBool>,
) {
    use std::io::Write;

    let stderr = std::io::stderr();

    while running.load(Ordering::SeqCst) {
        match receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(entry) => {
                let cfg = config.read();
                if entry.level >= cfg.level {
                    let line = entry.format_colored();
                    let mut handle = stderr.lock();
                    let _ = writeln!(handle, "{}", line);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Flush remaining entries
    for entry in receiver.try_iter() {
        let cfg = config.read();
        if entry.level >= cfg.level {
            eprintln!("{}", entry.format_colored());
        }
    }
}

// ---------------------------------------------------------------------------
// `log` facade bridge
// ---------------------------------------------------------------------------

struct QueueLogger;

impl log::Log for QueueLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogQueue::accepts(metadata.level().into(), Some(metadata.target()))
    }

    fn log(&self, record: &log::Record<'_>) {
        log_entry(
            LogEntry::new(record.level().into(), record.args().to_string())
                .with_target(record.target()),
        );
    }

    fn flush(&self) {}
}

static LOGGER: OnceCell<QueueLogger> = OnceCell::new();

/// Install the queue as the `log` backend and start its consumer.
///
/// Safe to call more than once: later calls only replace the config. If a
/// different `log` backend is already installed, records keep going there.
pub fn init_logging(config: LogConfig) {
    let logger = LOGGER.get_or_init(|| QueueLogger);
    let _ = log::set_logger(logger);
    if LogQueue::config().is_some() {
        LogQueue::update_config(config);
    } else {
        LogQueue::init(config);
    }
}
