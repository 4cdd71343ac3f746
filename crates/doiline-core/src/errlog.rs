//! Timestamped error log keyed by DOI.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;

/// Append-only failure log shared by workers and retry lanes.
///
/// One line per failure: `[YYYY-MM-DD HH:MM:SS] DOI: <doi> - <message>`.
pub struct ErrorLog {
    file: Mutex<File>,
}

impl ErrorLog {
    /// Open the log for appending, creating it if missing.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Record one failure. Log-file write errors are downgraded to a
    /// warning; the sink row is the authoritative record.
    pub fn record(&self, doi: &str, message: &str) {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = self.file.lock().expect("error log lock poisoned");
        if let Err(e) = writeln!(file, "[{stamp}] DOI: {doi} - {message}") {
            log::warn!("error log write failed: {e}");
        }
    }
}
