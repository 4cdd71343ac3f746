//! Subcommand dispatch and shared summary rendering.

use std::process::ExitCode;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};

use doiline_core::orchestrator::RunSummary;
use doiline_core::SharedProgress;

use crate::config::Config;

pub mod funding;
pub mod ra;

/// Render the summary and map it to the process exit code: 0 for full
/// success and for cancelled runs with flushed partial results, 2 when
/// the run completed with failed rows.
pub fn finish(summary: &RunSummary, progress: &SharedProgress) -> ExitCode {
    if progress.is_tty() {
        print_summary(summary);
    }
    if summary.cancelled {
        ExitCode::SUCCESS
    } else if summary.failed > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_summary(summary: &RunSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Run").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table.add_row(vec![
        "Rows".to_string(),
        format!("{}/{}", summary.processed, summary.total),
    ]);
    table.add_row(vec!["Succeeded".to_string(), summary.succeeded.to_string()]);
    table.add_row(vec!["Failed".to_string(), summary.failed.to_string()]);
    table.add_row(vec![
        "Cache hits".to_string(),
        summary.cache_hits.to_string(),
    ]);
    table.add_row(vec!["Skipped".to_string(), summary.skipped.to_string()]);
    table.add_row(vec![
        "Time".to_string(),
        format!("{:.1}s", summary.elapsed.as_secs_f64()),
    ]);
    if summary.cancelled {
        table.add_row(vec!["Cancelled".to_string(), "yes".to_string()]);
    }
    eprintln!("\n{table}");
}

/// The `config` subcommand: show effective settings.
pub fn show_config(config: &Config) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Setting").fg(Color::Cyan),
            Cell::new("Value").fg(Color::Cyan),
        ]);
    table.add_row(vec!["Crossref API", &config.crossref.api_url]);
    table.add_row(vec!["User agent", &config.crossref.user_agent]);
    table.add_row(vec![
        "Plus token",
        if config.crossref.token.is_some() {
            "configured"
        } else {
            "not set"
        },
    ]);
    table.add_row(vec!["RA endpoint", &config.ra.base_url]);
    table.add_row(vec![
        "Rate ceiling",
        &format!("{}/s", config.limits.calls_per_second),
    ]);
    table.add_row(vec![
        "In-flight limit",
        &config.limits.max_in_flight.to_string(),
    ]);
    table.add_row(vec!["Max retries", &config.limits.max_retries.to_string()]);
    table.add_row(vec![
        "Retry delay",
        &format!("{}s", config.limits.retry_delay_secs),
    ]);
    table.add_row(vec![
        "Workers",
        &format!("{} (max: {})", config.workers.default, config.workers.max),
    ]);
    eprintln!("\n{table}");
}
