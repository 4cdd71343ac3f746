//! CSV result sinks.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Append-only CSV writer safe for concurrent workers.
///
/// The header (input columns plus derived columns) is written once at
/// open; every record must have the same width.
pub struct CsvSink {
    writer: Mutex<csv::Writer<BufWriter<File>>>,
}

impl CsvSink {
    pub fn create(path: &Path, columns: &[String]) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(columns).map_err(io::Error::other)?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    /// Append one record and flush it; rows written before a
    /// cancellation must survive on disk.
    pub fn write(&self, record: &[String]) {
        let mut writer = self.writer.lock().expect("sink lock poisoned");
        if let Err(e) = writer.write_record(record) {
            log::error!("sink write failed: {e}");
            return;
        }
        if let Err(e) = writer.flush() {
            log::error!("sink flush failed: {e}");
        }
    }
}

/// The two terminal sinks of a run, with identical schemas.
pub struct ResultSinks {
    pub succeeded: CsvSink,
    pub failed: CsvSink,
}

impl ResultSinks {
    pub fn create(succeeded: &Path, failed: &Path, columns: &[String]) -> io::Result<Self> {
        Ok(Self {
            succeeded: CsvSink::create(succeeded, columns)?,
            failed: CsvSink::create(failed, columns)?,
        })
    }
}

/// Check whether existing output files may be overwritten.
///
/// With `force` the check passes silently; otherwise an interactive y/n
/// prompt lists the files that already exist.
pub fn confirm_overwrite(paths: &[&Path], force: bool) -> bool {
    if force {
        return true;
    }
    let existing: Vec<String> = paths
        .iter()
        .filter(|p| p.exists())
        .map(|p| p.display().to_string())
        .collect();
    if existing.is_empty() {
        return true;
    }
    eprintln!(
        "Warning: the following output file(s) already exist: {}",
        existing.join(", ")
    );
    eprint!("Overwrite? (y/n): ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("y")
}
