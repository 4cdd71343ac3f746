//! Doiline Core - Shared orchestration for DOI enrichment pipelines
//!
//! This crate provides the reusable machinery for querying external DOI
//! services in bulk: the rate limiter and in-flight gate, the delayed
//! retry lanes, the attempt state machine with exactly-once accounting,
//! and the CSV result sinks.

pub mod cancel;
pub mod dispatch;
pub mod doi;
pub mod errlog;
pub mod fetch;
pub mod gate;
pub mod http;
pub mod logging;
pub mod orchestrator;
pub mod progress;
pub mod rate;
pub mod retry;
pub mod sink;

// Re-exports for convenience
pub use cancel::CancelFlag;
pub use doi::extract_doi;
pub use errlog::ErrorLog;
pub use fetch::{Fetch, FetchError};
pub use gate::ConcurrencyGate;
pub use http::{SHARED_RUNTIME, http_client};
pub use logging::{ProgressLogger, init_logging};
pub use orchestrator::{
    Deliver, Delivery, Orchestrator, OrchestratorConfig, RunSummary, WorkItem,
};
pub use progress::{ProgressContext, SharedProgress};
pub use rate::RateLimiter;
pub use sink::{CsvSink, ResultSinks, confirm_overwrite};
