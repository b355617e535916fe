//! Append-only audit log.
//!
//! Request handlers call [`AuditLog::log`], which never fails and never blocks.
//! Entries travel over a channel to a single writer running on the blocking
//! pool, so appends are serialized and lines cannot interleave.
//!
//! Line format: `"<SEVERITY>: <message> (<YYYY-MM-DD HH:MM:SS>)\n"`. Line
//! breaks inside a message are flattened so one entry is always one line.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Queue depth at which a `audit_queue_high_water` warning is emitted, and
/// every further multiple of it.
pub const QUEUE_HIGH_WATER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("INFO"),
            Severity::Warn => f.write_str("WARN"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: single_line(message.into()),
            timestamp: Local::now(),
        }
    }

    /// Render as one newline-terminated line.
    pub fn render(&self) -> String {
        format!(
            "{}: {} ({})\n",
            self.severity,
            self.message,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Replace CR and LF so message text cannot start a new audit line.
fn single_line(message: String) -> String {
    if message.contains(['\r', '\n']) {
        message.replace(['\r', '\n'], " ")
    } else {
        message
    }
}

/// Destination for rendered audit lines.
pub trait LogSink: Send + 'static {
    fn append(&mut self, line: &str) -> io::Result<()>;
}

/// Appends to a file opened in append mode.
pub struct FileSink {
    file: File,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl LogSink for FileSink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }
}

/// Collects lines in memory. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        let mut lines = self
            .lines
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink poisoned"))?;
        lines.push(line.to_string());
        Ok(())
    }
}

/// Handle for submitting audit entries. Cheap to clone.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::UnboundedSender<LogEntry>,
    pending: Arc<AtomicUsize>,
}

/// Owns the writer task. Call [`AuditWriter::finish`] after every
/// [`AuditLog`] clone has been dropped to flush pending entries.
pub struct AuditWriter {
    handle: JoinHandle<()>,
}

impl AuditLog {
    /// Start the writer task for `sink`. Must be called inside a Tokio runtime.
    ///
    /// The queue is unbounded so that `log` never blocks or drops an entry,
    /// including for rejected unauthenticated requests. A stalled sink therefore
    /// grows memory; the depth is tracked and a warning is emitted every
    /// [`QUEUE_HIGH_WATER`] pending entries.
    pub fn spawn<S: LogSink>(sink: S) -> (Self, AuditWriter) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogEntry>();
        let pending = Arc::new(AtomicUsize::new(0));
        let writer_pending = pending.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let mut sink = sink;
            while let Some(entry) = rx.blocking_recv() {
                if let Err(e) = sink.append(&entry.render()) {
                    error!(error = %e, severity = %entry.severity, "audit_write_failed");
                }
                writer_pending.fetch_sub(1, Ordering::AcqRel);
            }
        });

        (Self { tx, pending }, AuditWriter { handle })
    }

    /// Entries queued or being written.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Record an entry. Failures are reported on the tracing channel only.
    pub fn log(&self, severity: Severity, message: impl Into<String>) {
        let entry = LogEntry::new(severity, message);

        match entry.severity {
            Severity::Info => info!(audit = %entry.message, "audit_entry"),
            Severity::Warn => warn!(audit = %entry.message, "audit_entry"),
            Severity::Error => error!(audit = %entry.message, "audit_entry"),
        }

        let depth = self.pending.fetch_add(1, Ordering::AcqRel) + 1;
        if depth % QUEUE_HIGH_WATER == 0 {
            warn!(pending = depth, "audit_queue_high_water");
        }

        if self.tx.send(entry).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            error!("audit_writer_closed");
        }
    }
}

impl AuditWriter {
    /// Wait for the writer to drain its queue and exit.
    pub async fn finish(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "audit_writer_join_failed");
        }
    }
}
