//! Main execution logic for the funding pipeline.

use anyhow::Context;

use doiline_core::orchestrator::{Orchestrator, RunSummary, WorkItem};
use doiline_core::{
    confirm_overwrite, extract_doi, CancelFlag, Deliver, ErrorLog, Fetch, ResultSinks,
    SharedProgress,
};

use crate::api::{CrossrefFetcher, LocalJsonFetcher};
use crate::config::Config;
use crate::delivery::FundingDelivery;
use crate::funding::DERIVED_COLUMNS;

/// Run the funding pipeline to completion (or cancellation) and return
/// the accounting. Errors returned here are configuration errors; every
/// per-row failure ends up in the failed sink instead.
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
        .position(|h| h == "doi")
        .context("input is missing the required 'doi' column")?;
    let funder_code_idx = headers
        .iter()
        .position(|h| h == "funder_code")
        .context("input is missing the required 'funder_code' column")?;

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
    if config.json_dir.is_none() {
        std::fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("cannot create output directory {}", config.output_dir.display())
        })?;
    }

    let mut columns = headers.clone();
    columns.extend(DERIVED_COLUMNS.iter().map(|c| c.to_string()));
    let sinks = ResultSinks::create(&config.results, &config.failed_output, &columns)
        .context("cannot create result sinks")?;
    let errors = ErrorLog::open(&config.log_file)
        .with_context(|| format!("cannot open error log {}", config.log_file.display()))?;

    let delivery = FundingDelivery {
        sinks: &sinks,
        errors: &errors,
        funder: &config.funder,
        member_map: config.member_map.as_ref(),
        null_value: &config.null_value,
        archive_dir: config
            .json_dir
            .is_none()
            .then_some(config.output_dir.as_path()),
        funder_code_idx,
    };

    // normalize identifiers; rows without one are immediate terminal
    // failures (retrying cannot fix the input)
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

    let fetcher: Box<dyn Fetch> = match &config.json_dir {
        Some(dir) => {
            log::info!("reading payloads from local JSON directory {}", dir.display());
            Box::new(LocalJsonFetcher::new(dir.clone()))
        }
        None => Box::new(CrossrefFetcher::new(
            &config.api_url,
            &config.user_agent,
            config.token.clone(),
        )),
    };

    let o = &config.orchestration;
    log::info!(
        "funding run starting: {} rows ({invalid} without a DOI), workers={}, in-flight={}, retries={} every {:.0}s",
        items.len(),
        o.workers,
        o.max_in_flight,
        o.max_retries,
        o.retry_delay.as_secs_f64()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(o.workers.max(1))
        .build()
        .context("failed to create worker pool")?;

    let bar = progress.run_bar(items.len() as u64, "funding");
    let orchestrator = Orchestrator::new(o.clone(), fetcher.as_ref(), &delivery, cancel);
    let mut summary = pool.install(|| orchestrator.run(items, &bar));

    summary.total += invalid;
    summary.processed += invalid;
    summary.failed += invalid;
    summary.log();
    Ok(summary)
}
