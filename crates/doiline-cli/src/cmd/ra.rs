//! Ra subcommand - registration agency resolution

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use doiline_core::{CancelFlag, SharedProgress};
use doiline_ra::RaArgs;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RaCmd {
    /// Input CSV file containing DOIs
    #[arg(short, long)]
    pub input: PathBuf,

    /// Column name containing DOIs
    #[arg(short, long, default_value = "doi")]
    pub column: String,

    /// Output CSV file for results
    #[arg(short, long, default_value = "ra_results.csv")]
    pub results: PathBuf,

    /// Output CSV file for failed entries
    #[arg(short, long, default_value = "ra_failed.csv")]
    pub failed_output: PathBuf,

    /// File to log errors
    #[arg(short, long, default_value = "ra_errors.log")]
    pub log_file: PathBuf,

    /// Placeholder value for null/empty fields
    #[arg(short, long, default_value = "NULL")]
    pub null_value: String,

    /// Number of worker threads for parallel processing
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum concurrent in-flight requests
    #[arg(long)]
    pub max_in_flight: Option<usize>,

    /// Calls-per-second ceiling
    #[arg(long)]
    pub calls_per_second: Option<usize>,

    /// Maximum number of retries for transient failures
    #[arg(short = 'm', long)]
    pub max_retries: Option<u32>,

    /// Delay between retries in seconds
    #[arg(short = 'y', long)]
    pub retry_delay: Option<u64>,

    /// Process only the first N rows (for dry runs)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Overwrite existing output files without prompting
    #[arg(long)]
    pub force_overwrite: bool,
}

pub fn run(cmd: RaCmd, config: &Config, progress: &SharedProgress, cancel: CancelFlag) -> ExitCode {
    let args = RaArgs {
        input: cmd.input,
        column: cmd.column,
        results: cmd.results,
        failed_output: cmd.failed_output,
        log_file: cmd.log_file,
        base_url: config.ra.base_url.clone(),
        null_value: cmd.null_value,
        workers: cmd
            .workers
            .unwrap_or(config.workers.default)
            .min(config.workers.max),
        max_in_flight: cmd.max_in_flight.unwrap_or(config.limits.max_in_flight),
        calls_per_second: cmd
            .calls_per_second
            .unwrap_or(config.limits.calls_per_second),
        max_retries: cmd.max_retries.unwrap_or(config.limits.max_retries),
        retry_delay_secs: cmd.retry_delay.unwrap_or(config.limits.retry_delay_secs),
        limit: cmd.limit,
        force_overwrite: cmd.force_overwrite,
    };

    let run_config = doiline_ra::Config::from(args);
    match doiline_ra::run(&run_config, progress, cancel) {
        Ok(summary) => super::finish(&summary, progress),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
