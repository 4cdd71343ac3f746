//! doiline - DOI enrichment pipelines
//!
//! Enriches DOI lists against Crossref (funding metadata) and doi.org
//! (registration agencies) under rate and concurrency limits, with
//! delayed retries and graceful cancellation.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

mod cmd;
mod config;

use config::Config;
use doiline_core::CancelFlag;

#[derive(Parser)]
#[command(name = "doiline")]
#[command(about = "Enrich DOI lists from Crossref and doi.org")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress info logs (only warnings and errors)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Config file path (default: ./doiline.toml or ~/.config/doiline/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch Crossref funding metadata for a DOI list
    Funding(cmd::funding::FundingCmd),
    /// Resolve registration agencies for a DOI list
    Ra(cmd::ra::RaCmd),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(doiline_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug — progress bars show activity
    //   non-TTY: info unless --debug         — logs are the only indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = cli.quiet || (is_tty && !cli.debug);
    doiline_core::init_logging(quiet, cli.debug, multi);

    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };

    let cancel = CancelFlag::new();
    register_signal_handlers(&cancel);

    match cli.command {
        Command::Funding(args) => cmd::funding::run(args, &config, &progress, cancel),
        Command::Ra(args) => cmd::ra::run(args, &config, &progress, cancel),
        Command::Config => {
            cmd::show_config(&config);
            ExitCode::SUCCESS
        }
    }
}

fn register_signal_handlers(cancel: &CancelFlag) {
    // First signal: request graceful cancellation; in-flight requests
    // finish and partial results stay flushed.
    // Second signal: force exit with the conventional interrupt code.
    // SAFETY: the handler only touches an AtomicBool and process::exit,
    // both async-signal-safe.
    for signal in [signal_hook::consts::SIGTERM, signal_hook::consts::SIGINT] {
        let cancel = cancel.clone();
        unsafe {
            signal_hook::low_level::register(signal, move || {
                if cancel.set() {
                    std::process::exit(130);
                }
            })
            .expect("failed to register signal handler");
        }
    }
}
