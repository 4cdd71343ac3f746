//! Attempt state machine tying the gate, rate limiter, and retry lanes
//! together.
//!
//! Per row: PENDING → IN_FLIGHT → {SUCCEEDED | RETRY_SCHEDULED |
//! PERMANENTLY_FAILED | SKIPPED}, where RETRY_SCHEDULED → IN_FLIGHT
//! repeats until a terminal state. Two independent dedup layers:
//!
//! - the per-row ledger guarantees at most one sink row per input row;
//! - the per-identifier map guarantees at most one external call per DOI
//!   at a time: the first row leads, concurrent duplicates queue behind
//!   it as followers, and later duplicates replay the recorded outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use crate::cancel::CancelFlag;
use crate::dispatch::DispatchQueue;
use crate::fetch::Fetch;
use crate::gate::ConcurrencyGate;
use crate::rate::RateLimiter;
use crate::retry::{RetryLanes, RetryTask};

/// One input row: original CSV values plus the normalized DOI.
#[derive(Debug)]
pub struct WorkItem {
    /// Input row index; the per-row terminal dedup key.
    pub seq: usize,
    pub doi: String,
    pub fields: Vec<String>,
}

/// What the delivery layer did with a fetched payload.
#[derive(Debug, Clone, Copy)]
pub enum Delivery {
    /// Row written to the success sink. `cacheable` marks a well-formed
    /// payload that can be replayed for later rows with the same DOI.
    Success { cacheable: bool },
    /// Row written to the failed sink (payload unusable).
    Failed,
}

/// Writes sink rows. Implementations own the output schema and absorb
/// their own internal faults; the orchestrator never looks inside
/// payloads.
pub trait Deliver: Send + Sync {
    /// Turn a payload into exactly one sink row for `item`.
    fn deliver(&self, item: &WorkItem, payload: &Value) -> Delivery;

    /// Write the failed-sink row for a terminal error.
    fn deliver_error(&self, item: &WorkItem, message: &str);
}

/// Tuning knobs for one run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// First-attempt worker threads.
    pub workers: usize,
    /// Dedicated retry lanes (one worker each).
    pub retry_lanes: usize,
    /// Concurrent in-flight request ceiling (gate capacity), typically
    /// smaller than `workers`.
    pub max_in_flight: usize,
    /// Calls allowed per trailing one-second window.
    pub calls_per_second: usize,
    /// Transient failures retried per row before the failed sink.
    pub max_retries: u32,
    /// Fixed delay before each retry.
    pub retry_delay: Duration,
    /// How long the final drain waits for stragglers before giving up.
    pub drain_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            retry_lanes: 1,
            max_in_flight: 1,
            calls_per_second: 1,
            max_retries: 3,
            retry_delay: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(600),
        }
    }
}

/// Accounting counters, all monotonically non-decreasing, one lock.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    /// Rows with a terminal sink row (succeeded + failed).
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Rows settled from a recorded outcome instead of an external call.
    pub cache_hits: usize,
    /// Rows abandoned by cancellation before their attempt started.
    pub skipped: usize,
}

/// Final accounting for a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub skipped: usize,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn log(&self) {
        log::info!(
            "processed {}/{} rows: {} succeeded, {} failed, {} cache hits, {} skipped [{:.1}s]",
            self.processed,
            self.total,
            self.succeeded,
            self.failed,
            self.cache_hits,
            self.skipped,
            self.elapsed.as_secs_f64()
        );
        if self.cancelled {
            log::warn!("run was cancelled; partial results were flushed");
        }
    }
}

/// Recorded outcome (or in-progress state) for one identifier.
enum IdState {
    /// First row for this DOI is mid-attempt; later rows wait here.
    InFlight { followers: Vec<Arc<WorkItem>> },
    /// Reusable successful payload — the cache.
    Cached(Arc<Value>),
    /// Permanent failure; duplicate rows fail identically, no refetch.
    Failed(Arc<str>),
}

enum IdClaim {
    /// This row owns the external call.
    Lead,
    /// Registered behind the in-flight leader; it will settle this row.
    Follower,
    Cached(Arc<Value>),
    Failed(Arc<str>),
}

/// Owns all mutable state of one run. Constructed once per run and
/// borrowed by workers and lane threads; nothing here is process-global.
pub struct Orchestrator<'a> {
    config: OrchestratorConfig,
    fetcher: &'a dyn Fetch,
    delivery: &'a dyn Deliver,
    cancel: CancelFlag,
    gate: ConcurrencyGate,
    rate: RateLimiter,
    lanes: RetryLanes<Arc<WorkItem>>,
    ids: Mutex<FxHashMap<String, IdState>>,
    ledger: Mutex<FxHashSet<usize>>,
    counters: Mutex<Counters>,
    /// External calls actually issued (for summaries and tests).
    calls: AtomicUsize,
}

const GATE_POLL: Duration = Duration::from_millis(500);
const LANE_POLL: Duration = Duration::from_millis(200);
const DRAIN_POLL: Duration = Duration::from_millis(200);

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: OrchestratorConfig,
        fetcher: &'a dyn Fetch,
        delivery: &'a dyn Deliver,
        cancel: CancelFlag,
    ) -> Self {
        let gate = ConcurrencyGate::new(config.max_in_flight);
        let rate = RateLimiter::per_second(config.calls_per_second);
        let lanes = RetryLanes::new(config.retry_lanes);
        Self {
            config,
            fetcher,
            delivery,
            cancel,
            gate,
            rate,
            lanes,
            ids: Mutex::new(FxHashMap::default()),
            ledger: Mutex::new(FxHashSet::default()),
            counters: Mutex::new(Counters::default()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn counters(&self) -> Counters {
        self.counters.lock().expect("counter lock poisoned").clone()
    }

    /// External calls issued so far.
    pub fn calls_issued(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Process every row to a terminal state and return the accounting.
    ///
    /// First attempts run on the ambient rayon pool; one dedicated thread
    /// per retry lane runs alongside until the drain completes.
    pub fn run(&self, rows: Vec<WorkItem>, bar: &ProgressBar) -> RunSummary {
        let started = Instant::now();
        let items: Vec<Arc<WorkItem>> = rows.into_iter().map(Arc::new).collect();
        let total = items.len();
        let queue = DispatchQueue::new(items);

        std::thread::scope(|scope| {
            for lane in 0..self.lanes.lane_count() {
                scope.spawn(move || self.lane_worker(lane));
            }

            rayon::scope(|s| {
                for _ in 0..self.config.workers.max(1) {
                    s.spawn(|_| {
                        while let Some(item) = queue.next() {
                            self.attempt(item, 1);
                            self.tick(bar);
                        }
                    });
                }
            });

            self.drain(total, bar);
            self.lanes.stop();
        });

        bar.finish_and_clear();
        let c = self.counters();
        RunSummary {
            total,
            processed: c.processed,
            succeeded: c.succeeded,
            failed: c.failed,
            cache_hits: c.cache_hits,
            skipped: c.skipped,
            elapsed: started.elapsed(),
            cancelled: self.cancel.is_set(),
        }
    }

    /// Drive one attempt for `item`. `attempt` is 1 for first attempts
    /// and increments per retry.
    fn attempt(&self, item: &Arc<WorkItem>, attempt: u32) {
        // already terminal (late duplicate of a settled row)
        if self.is_claimed(item.seq) {
            return;
        }

        // identifier dedup; retries already lead their identifier
        if attempt == 1 {
            match self.claim_identifier(item) {
                IdClaim::Lead => {}
                IdClaim::Follower => return,
                IdClaim::Cached(payload) => {
                    self.settle_payload(item, &payload, true);
                    return;
                }
                IdClaim::Failed(message) => {
                    self.settle_failure(item, &message, true);
                    return;
                }
            }
        }

        // cancellation: work that has not started is skipped, no sink row
        if self.cancel.is_set() {
            self.settle_skipped(item);
            return;
        }

        // in-flight slot, re-checking cancellation while queued
        let guard = loop {
            match self.gate.acquire_timeout(GATE_POLL) {
                Some(guard) => break guard,
                None if self.cancel.is_set() => {
                    self.settle_skipped(item);
                    return;
                }
                None => {}
            }
        };

        // global rate ceiling, then the external call
        self.rate.wait();
        self.calls.fetch_add(1, Ordering::Relaxed);
        let result = self.fetcher.fetch(&item.doi);
        // the slot is freed exactly once, before any sink or queue work
        drop(guard);

        match result {
            Ok(payload) => {
                log::debug!("{}: fetched (attempt {attempt})", item.doi);
                let payload = Arc::new(payload);
                let delivery = self
                    .settle_payload(item, &payload, false)
                    .unwrap_or(Delivery::Success { cacheable: false });
                self.resolve_identifier(item, &payload, delivery);
            }
            Err(e) if e.is_retryable() && attempt <= self.config.max_retries => {
                let due = Instant::now() + self.config.retry_delay;
                let lane = self.lanes.schedule(RetryTask {
                    item: item.clone(),
                    attempt: attempt + 1,
                    due,
                });
                log::info!(
                    "{}: attempt {attempt} failed ({e}); retry {attempt}/{} on lane {lane} in {:.0}s",
                    item.doi,
                    self.config.max_retries,
                    self.config.retry_delay.as_secs_f64()
                );
            }
            Err(e) => {
                let message = if e.is_retryable() {
                    format!("failed after {attempt} attempts: {e}")
                } else {
                    e.to_string()
                };
                log::warn!("{}: permanent failure: {message}", item.doi);
                self.settle_failure(item, &message, false);
                self.fail_identifier(item, &message);
            }
        }
    }

    /// One dedicated worker per lane: pop, wait out the delay, re-attempt.
    fn lane_worker(&self, lane: usize) {
        loop {
            let Some(task) = self.lanes.pop(lane, LANE_POLL) else {
                if self.lanes.is_stopped() {
                    return;
                }
                continue;
            };
            if self.cancel.is_set() || self.lanes.is_stopped() {
                // queued retries never started; they are skipped work
                self.settle_skipped(&task.item);
                continue;
            }
            self.wait_until_due(task.due);
            if self.cancel.is_set() {
                self.settle_skipped(&task.item);
                continue;
            }
            self.attempt(&task.item, task.attempt);
        }
    }

    /// Sleep in short slices so cancellation stays observable.
    fn wait_until_due(&self, due: Instant) {
        const SLICE: Duration = Duration::from_millis(200);
        while !self.cancel.is_set() {
            let left = due.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            std::thread::sleep(left.min(SLICE));
        }
    }

    /// Poll until every row is accounted for, the drain times out, or
    /// cancellation has emptied the lanes.
    fn drain(&self, total: usize, bar: &ProgressBar) {
        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            let c = self.counters();
            if c.processed + c.skipped >= total {
                break;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "drain timeout: {} of {total} rows unaccounted",
                    total - c.processed - c.skipped
                );
                break;
            }
            self.tick(bar);
            std::thread::sleep(DRAIN_POLL);
        }
    }

    fn tick(&self, bar: &ProgressBar) {
        let c = self.counters();
        bar.set_position((c.processed + c.skipped) as u64);
        bar.set_message(format!(
            "ok {}  err {}  retrying {}",
            c.succeeded,
            c.failed,
            self.lanes.queued()
        ));
    }

    // === ledger and identifier map ===

    fn is_claimed(&self, seq: usize) -> bool {
        self.ledger
            .lock()
            .expect("ledger lock poisoned")
            .contains(&seq)
    }

    /// Claim the row's terminal state. Check-then-commit under one lock:
    /// at most one caller wins, and only the winner writes a sink row.
    fn claim_row(&self, seq: usize) -> bool {
        self.ledger.lock().expect("ledger lock poisoned").insert(seq)
    }

    fn claim_identifier(&self, item: &Arc<WorkItem>) -> IdClaim {
        let mut ids = self.ids.lock().expect("identifier map lock poisoned");
        match ids.get_mut(&item.doi) {
            None => {
                ids.insert(
                    item.doi.clone(),
                    IdState::InFlight {
                        followers: Vec::new(),
                    },
                );
                IdClaim::Lead
            }
            Some(IdState::InFlight { followers }) => {
                followers.push(item.clone());
                IdClaim::Follower
            }
            Some(IdState::Cached(payload)) => IdClaim::Cached(payload.clone()),
            Some(IdState::Failed(message)) => IdClaim::Failed(message.clone()),
        }
    }

    /// Publish the leader's success and settle any rows that queued
    /// behind the external call. A non-cacheable payload still settles
    /// current followers but leaves no entry: a later duplicate redoes
    /// the call.
    fn resolve_identifier(&self, item: &Arc<WorkItem>, payload: &Arc<Value>, delivery: Delivery) {
        let followers = {
            let mut ids = self.ids.lock().expect("identifier map lock poisoned");
            match ids.remove(&item.doi) {
                Some(IdState::InFlight { followers }) => {
                    if matches!(delivery, Delivery::Success { cacheable: true }) {
                        ids.insert(item.doi.clone(), IdState::Cached(payload.clone()));
                    }
                    followers
                }
                _ => Vec::new(),
            }
        };
        for follower in followers {
            self.settle_payload(&follower, payload, true);
        }
    }

    /// Publish the leader's permanent failure and fail its followers.
    fn fail_identifier(&self, item: &Arc<WorkItem>, message: &str) {
        let followers = {
            let mut ids = self.ids.lock().expect("identifier map lock poisoned");
            match ids.remove(&item.doi) {
                Some(IdState::InFlight { followers }) => {
                    ids.insert(item.doi.clone(), IdState::Failed(Arc::from(message)));
                    followers
                }
                _ => Vec::new(),
            }
        };
        for follower in followers {
            self.settle_failure(&follower, message, true);
        }
    }

    /// Drop the identifier claim of a skipped leader and count it plus
    /// any followers as skipped; none of them gets a sink row.
    fn settle_skipped(&self, item: &Arc<WorkItem>) {
        let followers = {
            let mut ids = self.ids.lock().expect("identifier map lock poisoned");
            match ids.remove(&item.doi) {
                Some(IdState::InFlight { followers }) => followers,
                Some(other) => {
                    ids.insert(item.doi.clone(), other);
                    Vec::new()
                }
                None => Vec::new(),
            }
        };
        let mut c = self.counters.lock().expect("counter lock poisoned");
        c.skipped += 1 + followers.len();
    }

    // === terminal writes ===

    /// Deliver a payload as this row's terminal outcome. Returns what the
    /// delivery layer did, or `None` if the row was already settled.
    fn settle_payload(
        &self,
        item: &WorkItem,
        payload: &Value,
        from_cache: bool,
    ) -> Option<Delivery> {
        if !self.claim_row(item.seq) {
            return None;
        }
        let delivery = self.delivery.deliver(item, payload);
        let mut c = self.counters.lock().expect("counter lock poisoned");
        c.processed += 1;
        if from_cache {
            c.cache_hits += 1;
        }
        match delivery {
            Delivery::Success { .. } => c.succeeded += 1,
            Delivery::Failed => c.failed += 1,
        }
        Some(delivery)
    }

    /// Write this row's terminal failure.
    fn settle_failure(&self, item: &WorkItem, message: &str, from_cache: bool) {
        if !self.claim_row(item.seq) {
            return;
        }
        self.delivery.deliver_error(item, message);
        let mut c = self.counters.lock().expect("counter lock poisoned");
        c.processed += 1;
        if from_cache {
            c.cache_hits += 1;
        }
        c.failed += 1;
    }
}
