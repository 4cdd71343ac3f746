//! Logging setup with progress-bar integration.

use std::io::Write;

use indicatif::MultiProgress;

/// Logger that routes records through `MultiProgress::suspend` so log
/// lines do not tear active progress bars. Only used in TTY mode, so the
/// level label is always colored.
pub struct ProgressLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl log::Log for ProgressLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            log::Level::Error => "\x1b[31m",
            log::Level::Warn => "\x1b[33m",
            log::Level::Info => "\x1b[32m",
            log::Level::Debug => "\x1b[36m",
            log::Level::Trace => "\x1b[35m",
        };
        let line = format!("[{color}{:<5}\x1b[0m] {}", record.level(), record.args());
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize the global logger.
///
/// TTY mode (`multi` present) routes through the progress context;
/// non-TTY gets plain uncolored lines for log aggregation. Safe to call
/// more than once; later calls are no-ops.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let default_level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let env = env_logger::Env::default().default_filter_or(default_level);

    match multi {
        Some(multi) => {
            let inner = env_logger::Builder::from_env(env).build();
            let max_level = inner.filter();
            let logger = ProgressLogger {
                inner,
                multi: multi.clone(),
            };
            if log::set_boxed_logger(Box::new(logger)).is_ok() {
                log::set_max_level(max_level);
            }
        }
        None => {
            let _ = env_logger::Builder::from_env(env)
                .format(|buf, record| writeln!(buf, "[{:<5}] {}", record.level(), record.args()))
                .try_init();
        }
    }
}
