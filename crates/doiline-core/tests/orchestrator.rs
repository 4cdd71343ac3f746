//! End-to-end orchestrator behavior with scripted fetchers.
//!
//! These tests drive the full attempt state machine (gate, rate limiter,
//! retry lanes, dedup ledger) without any network access.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use serde_json::{json, Value};

use doiline_core::orchestrator::{
    Deliver, Delivery, Orchestrator, OrchestratorConfig, RunSummary, WorkItem,
};
use doiline_core::{CancelFlag, Fetch, FetchError};

/// Scripted fetcher: per-DOI list of failures to serve before success,
/// with per-DOI call counts, call timestamps, and a live-concurrency
/// probe.
struct ScriptedFetcher {
    /// doi → (calls so far, failures before success, fatal?)
    script: Mutex<std::collections::HashMap<String, (u32, u32, bool)>>,
    stamps: Mutex<Vec<Instant>>,
    live: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    /// optional flag set after `cancel_after` calls
    cancel: Option<(CancelFlag, usize)>,
}

impl ScriptedFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            script: Mutex::new(std::collections::HashMap::new()),
            stamps: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
            cancel: None,
        }
    }

    fn fail_times(self, doi: &str, failures: u32) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(doi.to_string(), (0, failures, false));
        self
    }

    fn fatal(self, doi: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(doi.to_string(), (0, 0, true));
        self
    }

    fn cancel_after(mut self, flag: CancelFlag, calls: usize) -> Self {
        self.cancel = Some((flag, calls));
        self
    }

    fn calls_for(&self, doi: &str) -> u32 {
        self.script.lock().unwrap().get(doi).map_or(0, |e| e.0)
    }

    fn total_calls(&self) -> usize {
        self.stamps.lock().unwrap().len()
    }

    fn distinct_dois_called(&self) -> usize {
        self.script
            .lock()
            .unwrap()
            .values()
            .filter(|(calls, _, _)| *calls > 0)
            .count()
    }

    fn gaps_for_window(&self, window: Duration) -> usize {
        let stamps = self.stamps.lock().unwrap();
        let mut worst = 0;
        for (i, t) in stamps.iter().enumerate() {
            let in_window = stamps[..=i]
                .iter()
                .filter(|s| t.duration_since(**s) < window)
                .count();
            worst = worst.max(in_window);
        }
        worst
    }
}

impl Fetch for ScriptedFetcher {
    fn fetch(&self, doi: &str) -> Result<Value, FetchError> {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        self.stamps.lock().unwrap().push(Instant::now());

        if let Some((flag, after)) = &self.cancel {
            if self.total_calls() >= *after {
                flag.set();
            }
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let result = {
            let mut script = self.script.lock().unwrap();
            let entry = script.entry(doi.to_string()).or_insert((0, 0, false));
            entry.0 += 1;
            let (calls, failures, fatal) = *entry;
            if fatal {
                Err(FetchError::Fatal {
                    status: Some(404),
                    message: "not found".to_string(),
                })
            } else if calls <= failures {
                Err(FetchError::Transient {
                    status: Some(503),
                    message: "unavailable".to_string(),
                })
            } else {
                Ok(json!({ "message": { "DOI": doi } }))
            }
        };

        self.live.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Records every sink row in memory.
#[derive(Default)]
struct VecSinks {
    succeeded: Mutex<Vec<(usize, String)>>,
    failed: Mutex<Vec<(usize, String, String)>>,
    /// when set, payloads without a "message" member are non-cacheable
    strict: bool,
}

impl Deliver for VecSinks {
    fn deliver(&self, item: &WorkItem, payload: &Value) -> Delivery {
        let cacheable = !self.strict || payload.get("message").is_some();
        self.succeeded
            .lock()
            .unwrap()
            .push((item.seq, item.doi.clone()));
        Delivery::Success { cacheable }
    }

    fn deliver_error(&self, item: &WorkItem, message: &str) {
        self.failed
            .lock()
            .unwrap()
            .push((item.seq, item.doi.clone(), message.to_string()));
    }
}

fn items(dois: &[&str]) -> Vec<WorkItem> {
    dois.iter()
        .enumerate()
        .map(|(seq, doi)| WorkItem {
            seq,
            doi: doi.to_string(),
            fields: vec![doi.to_string()],
        })
        .collect()
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 4,
        retry_lanes: 2,
        max_in_flight: 4,
        calls_per_second: 1000,
        max_retries: 2,
        retry_delay: Duration::from_millis(20),
        drain_timeout: Duration::from_secs(20),
    }
}

fn run(
    config: OrchestratorConfig,
    fetcher: &ScriptedFetcher,
    sinks: &VecSinks,
    rows: Vec<WorkItem>,
    cancel: CancelFlag,
) -> RunSummary {
    let orchestrator = Orchestrator::new(config, fetcher, sinks, cancel);
    orchestrator.run(rows, &ProgressBar::hidden())
}

#[test]
fn every_row_lands_in_the_success_sink_exactly_once() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO);
    let sinks = VecSinks::default();
    let dois: Vec<String> = (0..20).map(|i| format!("10.1000/x{i}")).collect();
    let rows = items(&dois.iter().map(String::as_str).collect::<Vec<_>>());

    let summary = run(fast_config(), &fetcher, &sinks, rows, CancelFlag::new());

    assert_eq!(summary.processed, 20);
    assert_eq!(summary.succeeded, 20);
    assert_eq!(summary.failed, 0);
    assert_eq!(fetcher.total_calls(), 20);

    let mut seqs: Vec<usize> = sinks
        .succeeded
        .lock()
        .unwrap()
        .iter()
        .map(|(seq, _)| *seq)
        .collect();
    seqs.sort_unstable();
    assert_eq!(seqs, (0..20).collect::<Vec<_>>());
    assert!(sinks.failed.lock().unwrap().is_empty());
}

#[test]
fn duplicate_rows_share_one_external_call() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(10));
    let sinks = VecSinks::default();
    let rows = items(&["10.1/a"; 5]);

    let summary = run(fast_config(), &fetcher, &sinks, rows, CancelFlag::new());

    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.cache_hits, 4);
    assert_eq!(fetcher.calls_for("10.1/a"), 1);
    assert_eq!(sinks.succeeded.lock().unwrap().len(), 5);
}

#[test]
fn forever_failing_row_exhausts_the_retry_budget() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO).fail_times("10.1/bad", u32::MAX);
    let sinks = VecSinks::default();
    let config = OrchestratorConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(50),
        ..fast_config()
    };

    let summary = run(config, &fetcher, &sinks, items(&["10.1/bad"]), CancelFlag::new());

    // max_retries + 1 total attempts, then exactly one failed row
    assert_eq!(fetcher.calls_for("10.1/bad"), 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 0);
    let failed = sinks.failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].2.contains("failed after 3 attempts"));

    // each retry waited at least the configured delay
    let stamps = fetcher.stamps.lock().unwrap();
    for pair in stamps.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(50));
    }
}

#[test]
fn transient_failures_below_the_budget_leave_no_trace() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO).fail_times("10.1/flaky", 2);
    let sinks = VecSinks::default();
    let config = OrchestratorConfig {
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        ..fast_config()
    };

    let summary = run(config, &fetcher, &sinks, items(&["10.1/flaky"]), CancelFlag::new());

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(fetcher.calls_for("10.1/flaky"), 3);
    assert!(sinks.failed.lock().unwrap().is_empty());
}

#[test]
fn fatal_errors_are_never_retried() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO).fatal("10.1/gone");
    let sinks = VecSinks::default();

    let summary = run(fast_config(), &fetcher, &sinks, items(&["10.1/gone"]), CancelFlag::new());

    assert_eq!(fetcher.calls_for("10.1/gone"), 1);
    assert_eq!(summary.failed, 1);
    let failed = sinks.failed.lock().unwrap();
    assert!(failed[0].2.contains("404"));
}

#[test]
fn cancellation_skips_pending_work_but_records_in_flight_rows() {
    let cancel = CancelFlag::new();
    let fetcher =
        ScriptedFetcher::new(Duration::from_millis(30)).cancel_after(cancel.clone(), 3);
    let sinks = VecSinks::default();
    let dois: Vec<String> = (0..12).map(|i| format!("10.2000/c{i}")).collect();
    let rows = items(&dois.iter().map(String::as_str).collect::<Vec<_>>());
    let config = OrchestratorConfig {
        workers: 2,
        max_in_flight: 2,
        ..fast_config()
    };

    let started = Instant::now();
    let summary = run(config, &fetcher, &sinks, rows, cancel);

    assert!(summary.cancelled);
    assert!(started.elapsed() < Duration::from_secs(10), "run must not hang");
    // every row is either recorded or skipped, never both
    assert_eq!(summary.processed + summary.skipped, 12);
    assert!(summary.skipped >= 1);
    let rows_written = sinks.succeeded.lock().unwrap().len() + sinks.failed.lock().unwrap().len();
    assert_eq!(rows_written, summary.processed);
}

#[test]
fn in_flight_calls_never_exceed_gate_capacity() {
    let fetcher = ScriptedFetcher::new(Duration::from_millis(20));
    let sinks = VecSinks::default();
    let dois: Vec<String> = (0..16).map(|i| format!("10.3000/g{i}")).collect();
    let rows = items(&dois.iter().map(String::as_str).collect::<Vec<_>>());
    let config = OrchestratorConfig {
        workers: 8,
        max_in_flight: 2,
        ..fast_config()
    };

    run(config, &fetcher, &sinks, rows, CancelFlag::new());

    assert!(
        fetcher.peak.load(Ordering::SeqCst) <= 2,
        "peak concurrency {} exceeded the gate",
        fetcher.peak.load(Ordering::SeqCst)
    );
}

#[test]
fn rate_ceiling_holds_over_any_trailing_window() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO);
    let sinks = VecSinks::default();
    let dois: Vec<String> = (0..25).map(|i| format!("10.4000/r{i}")).collect();
    let rows = items(&dois.iter().map(String::as_str).collect::<Vec<_>>());
    let config = OrchestratorConfig {
        workers: 8,
        max_in_flight: 8,
        calls_per_second: 10,
        ..fast_config()
    };

    run(config, &fetcher, &sinks, rows, CancelFlag::new());

    assert_eq!(fetcher.total_calls(), 25);
    // stamps are taken just after the limiter records its slot, so allow
    // a little scheduling slack in the measured window
    assert!(fetcher.gaps_for_window(Duration::from_millis(950)) <= 10);
}

#[test]
fn mixed_batch_matches_the_reference_example() {
    // input [a, a, b]; a succeeds, b fails twice then succeeds
    let fetcher = ScriptedFetcher::new(Duration::ZERO).fail_times("10.1/b", 2);
    let sinks = VecSinks::default();
    let config = OrchestratorConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        ..fast_config()
    };

    let summary = run(
        config,
        &fetcher,
        &sinks,
        items(&["10.1/a", "10.1/a", "10.1/b"]),
        CancelFlag::new(),
    );

    assert_eq!(sinks.succeeded.lock().unwrap().len(), 3);
    assert!(sinks.failed.lock().unwrap().is_empty());
    assert_eq!(fetcher.distinct_dois_called(), 2);
    assert_eq!(fetcher.calls_for("10.1/a"), 1);
    assert_eq!(fetcher.calls_for("10.1/b"), 3);
    assert_eq!(summary.succeeded, 3);
}

#[test]
fn non_cacheable_payloads_are_not_replayed_for_later_rows() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO);
    let sinks = VecSinks {
        strict: true,
        ..VecSinks::default()
    };
    // strict mode marks these payloads non-cacheable
    fetcher
        .script
        .lock()
        .unwrap()
        .insert("10.1/odd".to_string(), (0, 0, false));

    struct OddFetcher(ScriptedFetcher);
    impl Fetch for OddFetcher {
        fn fetch(&self, doi: &str) -> Result<Value, FetchError> {
            self.0.fetch(doi)?;
            Ok(json!({ "unexpected": true }))
        }
    }
    let odd = OddFetcher(fetcher);

    // one worker serializes the two rows, so the second row misses the
    // cache and refetches
    let config = OrchestratorConfig {
        workers: 1,
        ..fast_config()
    };
    let summary = run2(&odd, &sinks, items(&["10.1/odd", "10.1/odd"]), config);

    assert_eq!(summary.succeeded, 2);
    assert_eq!(odd.0.calls_for("10.1/odd"), 2);
    assert_eq!(summary.cache_hits, 0);
}

fn run2(
    fetcher: &dyn Fetch,
    sinks: &VecSinks,
    rows: Vec<WorkItem>,
    config: OrchestratorConfig,
) -> RunSummary {
    let orchestrator = Orchestrator::new(config, fetcher, sinks, CancelFlag::new());
    orchestrator.run(rows, &ProgressBar::hidden())
}

#[test]
fn failed_identifier_outcome_is_replayed_for_duplicates() {
    let fetcher = ScriptedFetcher::new(Duration::ZERO).fatal("10.1/gone");
    let sinks = VecSinks::default();
    let config = OrchestratorConfig {
        workers: 1,
        ..fast_config()
    };

    let summary = run(
        config,
        &fetcher,
        &sinks,
        items(&["10.1/gone", "10.1/gone"]),
        CancelFlag::new(),
    );

    assert_eq!(fetcher.calls_for("10.1/gone"), 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(sinks.failed.lock().unwrap().len(), 2);
}
