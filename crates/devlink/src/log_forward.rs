//! Streams the application's own tracing events to the controller.
//!
//! [`LogForwarder`] is a `tracing_subscriber` layer. It turns each event at
//! or above its level into a [`LogRecord`] and pushes it into an unbounded
//! channel; [`RemoteApp::forward_logs`](crate::RemoteApp::forward_logs)
//! drains the channel into the connection. Events from devlink's own crates
//! are skipped so that sending a record never produces another record.

use std::fmt::{self, Write as _};

use devlink_protocol::{LogLevel, LogRecord};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Default cap on forwarded message length, in characters.
pub const DEFAULT_MAX_LOG_LENGTH: usize = 1024;

const OWN_TARGETS: [&str; 4] = [
    "devlink",
    "devlink_protocol",
    "devlink_dispatch",
    "devlink_transport",
];

/// Tracing layer that forwards events as [`LogRecord`]s.
#[derive(Debug, Clone)]
pub struct LogForwarder {
    tx: mpsc::UnboundedSender<LogRecord>,
    max_level: Level,
    max_length: usize,
}

impl LogForwarder {
    /// Creates the layer and the receiving end of its records.
    pub fn new(max_level: Level, max_length: usize) -> (Self, mpsc::UnboundedReceiver<LogRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                max_level,
                max_length,
            },
            rx,
        )
    }

    fn is_own(target: &str) -> bool {
        OWN_TARGETS.iter().any(|own| {
            target
                .strip_prefix(own)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
        })
    }
}

impl<S: Subscriber> Layer<S> for LogForwarder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > self.max_level || Self::is_own(meta.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            level: log_level(meta.level()),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
            text: truncate(visitor.finish(), self.max_length),
            stack: match (meta.file(), meta.line()) {
                (Some(file), Some(line)) => format!("{} ({file}:{line})", meta.target()),
                _ => meta.target().to_string(),
            },
        };
        // A closed receiver means nobody forwards logs any more.
        let _ = self.tx.send(record);
    }
}

fn log_level(level: &Level) -> LogLevel {
    match *level {
        Level::ERROR => LogLevel::Error,
        Level::WARN => LogLevel::Warning,
        _ => LogLevel::Log,
    }
}

/// Keeps at most `max` characters of `text`.
fn truncate(mut text: String, max: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max) {
        text.truncate(cut);
    }
    text
}

/// Collects the `message` field followed by `key=value` pairs.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    fn capture(max_level: Level, max_length: usize, emit: impl FnOnce()) -> Vec<LogRecord> {
        let (layer, mut rx) = LogForwarder::new(max_level, max_length);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, emit);
        let mut records = Vec::new();
        while let Ok(record) = rx.try_recv() {
            records.push(record);
        }
        records
    }

    #[test]
    fn test_events_become_records() {
        let records = capture(Level::INFO, DEFAULT_MAX_LOG_LENGTH, || {
            tracing::warn!(target: "game", score = 3, "low health");
            tracing::error!(target: "game", "crashed");
        });
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Warning);
        assert_eq!(records[0].text, "low health score=3");
        assert!(records[0].stack.starts_with("game"));
        assert_eq!(records[0].timestamp.len(), "hh:mm:ss".len());
        assert_eq!(records[1].level, LogLevel::Error);
    }

    #[test]
    fn test_level_filter() {
        let records = capture(Level::INFO, DEFAULT_MAX_LOG_LENGTH, || {
            tracing::debug!(target: "game", "noise");
            tracing::info!(target: "game", "signal");
        });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Log);
    }

    #[test]
    fn test_own_events_are_skipped() {
        let records = capture(Level::TRACE, DEFAULT_MAX_LOG_LENGTH, || {
            tracing::info!(target: "devlink::connection", "sending");
            tracing::info!(target: "devlink_protocol", "encoded");
            tracing::info!(target: "devlinked_game", "kept");
        });
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].text, "kept");
    }

    #[test]
    fn test_long_text_is_truncated_by_characters() {
        let records = capture(Level::INFO, 4, || {
            tracing::info!(target: "game", "héllo wörld");
        });
        assert_eq!(records[0].text, "héll");
    }

    #[test]
    fn test_truncate_keeps_short_text() {
        assert_eq!(truncate("abc".into(), 10), "abc");
        assert_eq!(truncate("abc".into(), 3), "abc");
        assert_eq!(truncate("abcd".into(), 0), "");
    }
}
