//! Funding subcommand - Crossref funding metadata enrichment

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;

use doiline_core::{CancelFlag, SharedProgress};
use doiline_crossref::FundingArgs;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct FundingCmd {
    /// Input CSV file (requires doi and funder_code columns)
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for archived JSON payloads
    #[arg(short, long, default_value = "crossref_data")]
    pub output_dir: PathBuf,

    /// Output CSV file for results
    #[arg(short, long, default_value = "funding_analysis.csv")]
    pub results: PathBuf,

    /// Output CSV file for failed entries
    #[arg(short, long, default_value = "failed_entries.csv")]
    pub failed_output: PathBuf,

    /// File to log errors
    #[arg(short, long, default_value = "crossref_errors.log")]
    pub log_file: PathBuf,

    /// Funder configuration JSON (funder_doi + name_variations)
    #[arg(short = 'c', long)]
    pub funder_config: PathBuf,

    /// members.json file for publisher names
    #[arg(short = 'p', long)]
    pub members_file: Option<PathBuf>,

    /// Directory of archived JSON files to use instead of querying the API
    #[arg(short, long)]
    pub json_dir: Option<PathBuf>,

    /// Crossref Metadata Plus API token
    #[arg(short, long)]
    pub token: Option<String>,

    /// User agent for requests
    #[arg(short, long)]
    pub user_agent: Option<String>,

    /// Placeholder value for null/empty fields
    #[arg(short, long, default_value = "NULL")]
    pub null_value: String,

    /// Number of worker threads for parallel processing
    #[arg(short, long)]
    pub workers: Option<usize>,

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

pub fn run(
    cmd: FundingCmd,
    config: &Config,
    progress: &SharedProgress,
    cancel: CancelFlag,
) -> ExitCode {
    let args = FundingArgs {
        input: cmd.input,
        output_dir: cmd.output_dir,
        results: cmd.results,
        failed_output: cmd.failed_output,
        log_file: cmd.log_file,
        funder_config: cmd.funder_config,
        members_file: cmd.members_file,
        json_dir: cmd.json_dir,
        api_url: config.crossref.api_url.clone(),
        user_agent: cmd
            .user_agent
            .unwrap_or_else(|| config.crossref.user_agent.clone()),
        token: cmd.token.or_else(|| config.crossref.token.clone()),
        null_value: cmd.null_value,
        workers: cmd
            .workers
            .unwrap_or(config.workers.default)
            .min(config.workers.max),
        max_retries: cmd.max_retries.unwrap_or(config.limits.max_retries),
        retry_delay_secs: cmd.retry_delay.unwrap_or(config.limits.retry_delay_secs),
        limit: cmd.limit,
        force_overwrite: cmd.force_overwrite,
    };

    let run_config = match doiline_crossref::Config::try_from(args) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };

    match doiline_crossref::run(&run_config, progress, cancel) {
        Ok(summary) => super::finish(&summary, progress),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
