//! Blocking JSON requests over a shared async client.
//!
//! reqwest's async client with a small dedicated runtime, wrapped in a
//! sync call for use from worker threads.

use std::sync::LazyLock;
use std::time::Duration;

use serde_json::Value;

use crate::fetch::FetchError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Whole-request ceiling; a stalled response surfaces as a retryable
/// timeout instead of hanging a worker.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .pool_max_idle_per_host(8)
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// GET a JSON document, blocking the calling thread.
///
/// Transport and status errors go through the retryable/fatal taxonomy;
/// a 2xx body that is not JSON is fatal (retrying cannot fix the shape).
pub fn get_json(url: &str, headers: &[(&str, &str)]) -> Result<Value, FetchError> {
    SHARED_RUNTIME.handle().block_on(async {
        let mut request = SHARED_CLIENT.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::from_reqwest(&e))?;
        response.json::<Value>().await.map_err(|e| FetchError::Fatal {
            status: None,
            message: format!("invalid JSON body: {e}"),
        })
    })
}

/// Percent-encode a DOI for use as a URL path segment. Slashes stay
/// literal (DOI suffixes may contain them and the APIs accept that).
pub fn encode_doi(doi: &str) -> String {
    let mut out = String::with_capacity(doi.len());
    for b in doi.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
