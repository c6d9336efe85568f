//! In-memory ring buffer of recent application log lines.
//!
//! The ring is fed by [`LogRingLayer`], a `tracing-subscriber` layer installed next to the usual
//! formatting layer. Readers ask for the newest `count` lines at or above a severity, which is how
//! the panel exposes its own logs without touching the filesystem.

use std::{
    collections::VecDeque,
    fmt::{self, Write},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use chrono::{DateTime, Local};
use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, Layer};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default number of lines retained by a [`LogRing`].
pub const DEFAULT_LOG_RING_CAPACITY: usize = 10_000;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A bounded, shareable buffer of log lines. Oldest lines are evicted first.
///
/// Clones share both the lines and the capacity.
#[derive(Debug, Clone)]
pub struct LogRing {
    inner: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: Arc<AtomicUsize>,
}

/// A single captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// When the event was recorded.
    pub time: DateTime<Local>,

    /// The event severity.
    pub level: Level,

    /// The rendered message followed by any structured fields.
    pub message: String,
}

/// A `tracing` layer that copies every event into a [`LogRing`].
#[derive(Debug, Clone)]
pub struct LogRingLayer {
    ring: LogRing,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LogRing {
    /// Creates a ring that keeps at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: Arc::new(AtomicUsize::new(capacity)),
        }
    }

    /// The maximum number of retained lines.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Changes the maximum number of retained lines, dropping the oldest ones that no longer fit.
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        let Ok(mut lines) = self.inner.lock() else {
            return;
        };

        self.capacity.store(capacity, Ordering::Relaxed);
        let excess = lines.len().saturating_sub(capacity);
        lines.drain(..excess);
    }

    /// Returns a layer that feeds this ring.
    pub fn layer(&self) -> LogRingLayer {
        LogRingLayer { ring: self.clone() }
    }

    /// Appends a line, evicting the oldest one when full.
    pub fn push(&self, line: LogLine) {
        let Ok(mut lines) = self.inner.lock() else {
            return;
        };

        while lines.len() >= self.capacity() {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Returns up to `count` of the newest lines whose severity is at least `level`, oldest first.
    pub fn lines(&self, count: usize, level: Level) -> Vec<String> {
        let Ok(lines) = self.inner.lock() else {
            return Vec::new();
        };

        // `tracing` orders ERROR < WARN < INFO, so "at least as severe" is `<=`.
        let mut selected: Vec<String> = lines
            .iter()
            .rev()
            .filter(|line| line.level <= level)
            .take(count)
            .map(LogLine::render)
            .collect();
        selected.reverse();
        selected
    }

    /// Number of retained lines.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|lines| lines.len()).unwrap_or(0)
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogLine {
    /// Creates a line stamped with the current local time.
    pub fn now(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: Local::now(),
            level,
            message: message.into(),
        }
    }

    /// Renders the line as `YYYY/MM/DD HH:MM:SS LEVEL - message`.
    pub fn render(&self) -> String {
        format!(
            "{} {} - {}",
            self.time.format("%Y/%m/%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a severity name as used by the panel and by `journalctl -p`.
///
/// Accepts the syslog names (`err`, `warning`, `notice`, ...) as well as the `tracing` ones.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "emerg" | "alert" | "crit" | "err" | "error" | "0" | "1" | "2" | "3" => Some(Level::ERROR),
        "warning" | "warn" | "4" => Some(Level::WARN),
        "notice" | "info" | "5" | "6" => Some(Level::INFO),
        "debug" | "7" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_RING_CAPACITY)
    }
}

impl<S> Layer<S> for LogRingLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let message = if visitor.fields.is_empty() {
            visitor.message
        } else if visitor.message.is_empty() {
            visitor.fields.trim_start().to_string()
        } else {
            format!("{}{}", visitor.message, visitor.fields)
        };

        self.ring.push(LogLine::now(*event.metadata().level(), message));
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    #[test]
    fn test_log_ring_evicts_oldest() {
        let ring = LogRing::new(2);
        ring.push(LogLine::now(Level::INFO, "one"));
        ring.push(LogLine::now(Level::INFO, "two"));
        ring.push(LogLine::now(Level::INFO, "three"));

        let lines = ring.lines(10, Level::DEBUG);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("- two"));
        assert!(lines[1].ends_with("- three"));
    }

    #[test]
    fn test_log_ring_set_capacity_keeps_newest() {
        let ring = LogRing::new(8);
        let shared = ring.clone();
        for message in ["one", "two", "three", "four"] {
            ring.push(LogLine::now(Level::INFO, message));
        }

        shared.set_capacity(2);
        assert_eq!(ring.capacity(), 2);

        let lines = ring.lines(10, Level::DEBUG);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("- three"));
        assert!(lines[1].ends_with("- four"));

        ring.push(LogLine::now(Level::INFO, "five"));
        assert_eq!(ring.len(), 2);
        assert!(ring.lines(1, Level::DEBUG)[0].ends_with("- five"));
    }

    #[test]
    fn test_log_ring_filters_by_severity_and_count() {
        let ring = LogRing::new(16);
        ring.push(LogLine::now(Level::DEBUG, "noise"));
        ring.push(LogLine::now(Level::WARN, "disk almost full"));
        ring.push(LogLine::now(Level::ERROR, "engine crashed"));
        ring.push(LogLine::now(Level::INFO, "engine started"));

        let warnings = ring.lines(10, Level::WARN);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("WARN - disk almost full"));
        assert!(warnings[1].contains("ERROR - engine crashed"));

        let newest = ring.lines(1, Level::DEBUG);
        assert_eq!(newest.len(), 1);
        assert!(newest[0].ends_with("- engine started"));
    }

    #[test]
    fn test_log_ring_layer_captures_events() {
        let ring = LogRing::new(8);
        let subscriber = tracing_subscriber::registry().with(ring.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(probe = "cpu", "probe failed");
            tracing::info!("plain message");
        });

        let lines = ring.lines(8, Level::TRACE);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN - probe failed probe=cpu"));
        assert!(lines[1].contains("INFO - plain message"));
    }

    #[test]
    fn test_parse_level_accepts_syslog_names() {
        assert_eq!(parse_level("err"), Some(Level::ERROR));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("notice"), Some(Level::INFO));
        assert_eq!(parse_level("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level("verbose"), None);
    }
}
