//! Registration agency pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use doiline_core::orchestrator::OrchestratorConfig;

/// CLI-facing arguments for the ra command.
#[derive(Debug)]
pub struct RaArgs {
    pub input: PathBuf,
    /// Input column holding the (free-text) DOI.
    pub column: String,
    pub results: PathBuf,
    pub failed_output: PathBuf,
    pub log_file: PathBuf,
    pub base_url: String,
    pub null_value: String,
    pub workers: usize,
    pub max_in_flight: usize,
    pub calls_per_second: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub limit: Option<usize>,
    pub force_overwrite: bool,
}

/// Runtime configuration for the ra pipeline.
#[derive(Debug)]
pub struct Config {
    pub input: PathBuf,
    pub column: String,
    pub results: PathBuf,
    pub failed_output: PathBuf,
    pub log_file: PathBuf,
    pub base_url: String,
    pub null_value: String,
    pub limit: Option<usize>,
    pub force_overwrite: bool,
    pub orchestration: OrchestratorConfig,
}

impl From<RaArgs> for Config {
    fn from(args: RaArgs) -> Self {
        let orchestration = OrchestratorConfig {
            workers: args.workers.max(1),
            retry_lanes: (args.workers / 2).max(1),
            max_in_flight: args.max_in_flight.max(1),
            calls_per_second: args.calls_per_second.max(1),
            max_retries: args.max_retries,
            retry_delay: Duration::from_secs(args.retry_delay_secs),
            ..OrchestratorConfig::default()
        };
        Self {
            input: args.input,
            column: args.column,
            results: args.results,
            failed_output: args.failed_output,
            log_file: args.log_file,
            base_url: args.base_url,
            null_value: args.null_value,
            limit: args.limit,
            force_overwrite: args.force_overwrite,
            orchestration,
        }
    }
}
