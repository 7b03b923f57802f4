//! Traffic log sink — append-only record of raw frames in both directions.
//!
//! Each line is tagged with direction, a date/time header, and the connection
//! identifier: `"[ IN][dd/mm][hh:mm] (id) rawFrame"`. Logging is best-effort;
//! a failed write warns through `tracing` and never reaches protocol code.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use parking_lot::Mutex;
use tracing::warn;

use wslink_core::ConnectionId;

/// Pluggable callback sink: receives one formatted line per frame.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Where traffic lines go.
#[derive(Clone, Default)]
pub enum LogTarget {
    /// No traffic logging at all.
    #[default]
    Disabled,
    /// Append to a file, creating it if absent.
    File(PathBuf),
    /// Hand each line to a callback.
    Sink(LogSink),
}

impl std::fmt::Debug for LogTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("LogTarget::Disabled"),
            Self::File(path) => write!(f, "LogTarget::File({})", path.display()),
            Self::Sink(_) => f.write_str("LogTarget::Sink(..)"),
        }
    }
}

enum SinkKind {
    File(Mutex<File>),
    Callback(LogSink),
}

/// An active traffic log.
pub struct TrafficLog {
    sink: SinkKind,
}

impl TrafficLog {
    /// Open the configured target. Returns `None` when logging is disabled or
    /// the file target cannot be opened (the failure is warned, not fatal).
    #[must_use]
    pub fn open(target: LogTarget) -> Option<Arc<Self>> {
        match target {
            LogTarget::Disabled => None,
            LogTarget::Sink(sink) => Some(Arc::new(Self {
                sink: SinkKind::Callback(sink),
            })),
            LogTarget::File(path) => {
                if !path.exists() {
                    if let Err(e) = std::fs::write(&path, "Log created\n") {
                        warn!(path = %path.display(), error = %e, "failed to create traffic log");
                        return None;
                    }
                }
                match OpenOptions::new().append(true).open(&path) {
                    Ok(file) => Some(Arc::new(Self {
                        sink: SinkKind::File(Mutex::new(file)),
                    })),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "failed to open traffic log");
                        None
                    }
                }
            }
        }
    }

    /// Record an inbound frame.
    pub fn log_inbound(&self, id: &ConnectionId, frame: &str) {
        self.write("[ IN]", id, frame);
    }

    /// Record an outbound frame.
    pub fn log_outbound(&self, id: &ConnectionId, frame: &str) {
        self.write("[OUT]", id, frame);
    }

    fn write(&self, direction: &str, id: &ConnectionId, frame: &str) {
        let header = Local::now().format("[%d/%m][%H:%M]");
        let line = format!("{direction}{header} ({id}) {frame}");
        match &self.sink {
            SinkKind::Callback(sink) => sink(&line),
            SinkKind::File(file) => {
                if let Err(e) = writeln!(file.lock(), "{line}") {
                    warn!(error = %e, "traffic log write failed");
                }
            }
        }
    }
}
