//! Funding pipeline configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use doiline_core::orchestrator::OrchestratorConfig;

/// CLI-facing arguments for the funding command (plain struct, no clap
/// derive; the binary crate owns flag parsing).
#[derive(Debug)]
pub struct FundingArgs {
    pub input: PathBuf,
    /// Directory for archived JSON payloads.
    pub output_dir: PathBuf,
    pub results: PathBuf,
    pub failed_output: PathBuf,
    pub log_file: PathBuf,
    pub funder_config: PathBuf,
    pub members_file: Option<PathBuf>,
    /// Read archived payloads from here instead of querying the API.
    pub json_dir: Option<PathBuf>,
    pub api_url: String,
    pub user_agent: String,
    pub token: Option<String>,
    pub null_value: String,
    pub workers: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub limit: Option<usize>,
    pub force_overwrite: bool,
}

/// Target funder: its registry DOI plus accepted name spellings.
#[derive(Debug, Clone, Deserialize)]
pub struct FunderConfig {
    pub funder_doi: String,
    pub name_variations: Vec<String>,
}

/// Runtime configuration for the funding pipeline.
#[derive(Debug)]
pub struct Config {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub results: PathBuf,
    pub failed_output: PathBuf,
    pub log_file: PathBuf,
    pub funder: FunderConfig,
    pub member_map: Option<FxHashMap<String, String>>,
    pub json_dir: Option<PathBuf>,
    pub api_url: String,
    pub user_agent: String,
    pub token: Option<String>,
    pub null_value: String,
    pub limit: Option<usize>,
    pub force_overwrite: bool,
    pub orchestration: OrchestratorConfig,
}

impl TryFrom<FundingArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: FundingArgs) -> Result<Self, Self::Error> {
        let funder = load_funder_config(&args.funder_config)?;
        let member_map = match &args.members_file {
            Some(path) => match load_member_map(path) {
                Ok(map) => Some(map),
                Err(e) => {
                    log::warn!("failed to load members file {}: {e:#}", path.display());
                    None
                }
            },
            None => None,
        };

        let authenticated = args.token.is_some();
        // anonymous callers get one slot and the long polite delay; the
        // Metadata Plus pool tolerates more
        let max_in_flight = if authenticated { 3 } else { 1 };
        let mut orchestration = OrchestratorConfig {
            workers: if authenticated { args.workers.max(1) } else { 1 },
            retry_lanes: (args.workers / 2).max(1),
            max_in_flight,
            calls_per_second: max_in_flight,
            max_retries: args.max_retries,
            retry_delay: Duration::from_secs(if authenticated {
                5
            } else {
                args.retry_delay_secs
            }),
            ..OrchestratorConfig::default()
        };
        if args.json_dir.is_some() {
            // no remote to protect when replaying archived payloads
            orchestration.workers = args.workers.max(1);
            orchestration.max_in_flight = args.workers.max(1);
            orchestration.calls_per_second = 1000;
            orchestration.retry_lanes = 1;
        }

        Ok(Self {
            input: args.input,
            output_dir: args.output_dir,
            results: args.results,
            failed_output: args.failed_output,
            log_file: args.log_file,
            funder,
            member_map,
            json_dir: args.json_dir,
            api_url: args.api_url,
            user_agent: args.user_agent,
            token: args.token,
            null_value: args.null_value,
            limit: args.limit,
            force_overwrite: args.force_overwrite,
            orchestration,
        })
    }
}

/// Load and validate the funder configuration file.
pub fn load_funder_config(path: &Path) -> anyhow::Result<FunderConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read funder config {}", path.display()))?;
    let funder: FunderConfig = serde_json::from_str(&content)
        .with_context(|| format!("invalid funder config {}", path.display()))?;
    anyhow::ensure!(
        !funder.funder_doi.is_empty(),
        "funder config {} has an empty funder_doi",
        path.display()
    );
    Ok(funder)
}

/// Crossref member id → publisher name, from a members.json dump.
/// Entries without both fields are skipped, matching the dump's looseness.
pub fn load_member_map(path: &Path) -> anyhow::Result<FxHashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read members file {}", path.display()))?;
    let members: Vec<Value> = serde_json::from_str(&content)
        .with_context(|| format!("invalid members file {}", path.display()))?;
    Ok(members
        .iter()
        .filter_map(|m| {
            let name = m.get("name")?.as_str()?.to_string();
            let id = match m.get("id")? {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((id, name))
        })
        .collect())
}
