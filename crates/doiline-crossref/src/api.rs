//! Crossref works lookups, over HTTP or from an archive directory.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;

use doiline_core::http::{encode_doi, get_json};
use doiline_core::{Fetch, FetchError};

/// Live `api.crossref.org/works` fetcher.
pub struct CrossrefFetcher {
    api_url: String,
    user_agent: String,
    token: Option<String>,
}

impl CrossrefFetcher {
    pub fn new(api_url: &str, user_agent: &str, token: Option<String>) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            token,
        }
    }
}

impl Fetch for CrossrefFetcher {
    fn fetch(&self, doi: &str) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.api_url, encode_doi(doi));
        let mut headers = vec![("User-Agent", self.user_agent.as_str())];
        if let Some(token) = self.token.as_deref() {
            headers.push(("Crossref-Plus-API-Token", token));
        }
        get_json(&url, &headers)
    }
}

/// Replace path separators so a DOI maps to one flat filename.
pub fn safe_filename(doi: &str) -> String {
    format!("{}.json", doi.replace('/', "_"))
}

/// Save a fetched payload next to the run's other archives.
pub fn archive_payload(dir: &Path, doi: &str, payload: &Value) -> io::Result<()> {
    let pretty = serde_json::to_string_pretty(payload).map_err(io::Error::other)?;
    std::fs::write(dir.join(safe_filename(doi)), pretty)
}

/// Reads previously archived payloads instead of the network.
///
/// All errors are fatal: retrying a missing or corrupt file cannot
/// succeed.
pub struct LocalJsonFetcher {
    dir: PathBuf,
}

impl LocalJsonFetcher {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Fetch for LocalJsonFetcher {
    fn fetch(&self, doi: &str) -> Result<Value, FetchError> {
        let path = self.dir.join(safe_filename(doi));
        let content = std::fs::read_to_string(&path).map_err(|e| FetchError::Fatal {
            status: None,
            message: format!("JSON file not found: {}: {e}", path.display()),
        })?;
        serde_json::from_str(&content).map_err(|e| FetchError::Fatal {
            status: None,
            message: format!("Error reading JSON file {}: {e}", path.display()),
        })
    }
}
