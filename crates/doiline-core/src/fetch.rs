//! Fetcher seam and failure taxonomy.

use serde_json::Value;

/// One external lookup for a DOI.
///
/// An `Ok` payload is a terminal result even when it represents an
/// application-level "not found"; the delivery layer decides what the
/// payload means. A `FetchError` is a failed lookup and is retried only
/// when transient.
pub trait Fetch: Send + Sync {
    fn fetch(&self, doi: &str) -> Result<Value, FetchError>;
}

/// Failure from a single fetch attempt.
#[derive(Debug)]
pub enum FetchError {
    /// Timeout, connection failure, 429, or 5xx. Worth retrying.
    Transient {
        status: Option<u16>,
        message: String,
    },
    /// Anything retrying cannot change: other 4xx, unreadable or
    /// unparseable local file, non-JSON body.
    Fatal {
        status: Option<u16>,
        message: String,
    },
}

impl FetchError {
    /// Classify a reqwest error. Transport errors carry no status and are
    /// assumed transient; 429 and 5xx are transient; other statuses are
    /// final.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        let message = format!("Request failed: {e}");
        match status {
            None | Some(429) | Some(500..=599) => Self::Transient { status, message },
            Some(_) => Self::Fatal { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (status, message) = match self {
            Self::Transient { status, message } | Self::Fatal { status, message } => {
                (status, message)
            }
        };
        match status {
            Some(s) => write!(f, "HTTP {s}: {message}"),
            None => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for FetchError {}
