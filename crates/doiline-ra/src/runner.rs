//! Main execution logic for the ra pipeline.

use anyhow::Context;

use doiline_core::orchestrator::{Orchestrator, RunSummary, WorkItem};
use doiline_core::{
    confirm_overwrite, extract_doi, CancelFlag, Deliver, ErrorLog, ResultSinks, SharedProgress,
};

use crate::config::Config;
use crate::resolver::{RaDelivery, RaFetcher, DERIVED_COLUMNS};

/// Run the ra pipeline to completion (or cancellation) and return the
/// accounting. Errors returned here are configuration errors.
pub fn run(config: &Config, progress: &SharedProgress, cancel: CancelFlag) -> anyhow::Result<RunSummary> {
    let mut reader = csv::Reader::from_path(&config.input)
        .with_context(|| format!("cannot read input {}", config.input.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("input has no header row")?
        .iter()
        .map(String::from)
        .collect();
    let doi_idx = headers
        .iter()
        .position(|h| *h == config.column)
        .with_context(|| format!("column '{}' not found in input", config.column))?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.context("malformed input row")?;
        rows.push(record.iter().map(String::from).collect());
    }
    if let Some(limit) = config.limit {
        if rows.len() > limit {
            log::info!("limiting run to the first {limit} of {} rows", rows.len());
            rows.truncate(limit);
        }
    }

    anyhow::ensure!(
        confirm_overwrite(
            &[config.results.as_path(), config.failed_output.as_path()],
            config.force_overwrite,
        ),
        "refusing to overwrite existing outputs"
    );

    let mut columns = headers.clone();
    columns.extend(DERIVED_COLUMNS.iter().map(|c| c.to_string()));
    let sinks = ResultSinks::create(&config.results, &config.failed_output, &columns)
        .context("cannot create result sinks")?;
    let errors = ErrorLog::open(&config.log_file)
        .with_context(|| format!("cannot open error log {}", config.log_file.display()))?;

    let delivery = RaDelivery {
        sinks: &sinks,
        errors: &errors,
        null_value: &config.null_value,
    };

    let mut items = Vec::new();
    let mut invalid = 0usize;
    for (seq, fields) in rows.into_iter().enumerate() {
        let raw = fields.get(doi_idx).map(String::as_str).unwrap_or_default();
        match extract_doi(raw) {
            Some(doi) => {
                let doi = doi.to_string();
                items.push(WorkItem { seq, doi, fields });
            }
            None => {
                let item = WorkItem {
                    seq,
                    doi: raw.to_string(),
                    fields,
                };
                delivery.deliver_error(&item, "could not extract a DOI from the input value");
                invalid += 1;
            }
        }
    }

    let fetcher = RaFetcher::new(&config.base_url);
    let o = &config.orchestration;
    log::info!(
        "ra run starting: {} rows ({invalid} without a DOI), workers={}, {}/s ceiling",
        items.len(),
        o.workers,
        o.calls_per_second
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(o.workers.max(1))
        .build()
        .context("failed to create worker pool")?;

    let bar = progress.run_bar(items.len() as u64, "ra");
    let orchestrator = Orchestrator::new(o.clone(), &fetcher, &delivery, cancel);
    let mut summary = pool.install(|| orchestrator.run(items, &bar));

    summary.total += invalid;
    summary.processed += invalid;
    summary.failed += invalid;
    summary.log();
    Ok(summary)
}
