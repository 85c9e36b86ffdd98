//! The append-only text log (spec.md §6: `{title}.log`, each line
//! prefixed `[Mon/DD/YYYY HH:MM:SS]`). Kept alongside `tracing`, not
//! instead of it: `tracing` carries structured, filterable diagnostics
//! for operators running the server under a subscriber; this sink
//! reproduces the literal on-disk format the original tooling (and any
//! operator scripts tailing `{title}.log`) expects.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;

/// Guarded by the *log lock* (spec.md §5), last in the fixed lock
/// acquisition order.
pub struct LogSink {
    file: File,
}

impl LogSink {
    pub fn open(dir: &Path, title: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{title}.log"));
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogSink { file })
    }

    /// Appends one timestamped line. Also emitted through `tracing` at
    /// the call site — this only owns the on-disk text mirror.
    pub fn append(&mut self, message: &str) -> std::io::Result<()> {
        let timestamp = Local::now().format("%b/%d/%Y %H:%M:%S");
        writeln!(self.file, "[{timestamp}] {message}")?;
        self.file.flush()
    }
}
