//! Registration agency resolution via doi.org.

use serde_json::Value;

use doiline_core::http::{encode_doi, get_json};
use doiline_core::orchestrator::{Deliver, Delivery, WorkItem};
use doiline_core::{ErrorLog, Fetch, FetchError, ResultSinks};

/// Columns appended to the input columns in both sinks, in order.
pub const DERIVED_COLUMNS: [&str; 3] = ["agency", "status", "error"];

/// `https://doi.org/ra/{doi}` fetcher.
pub struct RaFetcher {
    base_url: String,
}

impl RaFetcher {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Fetch for RaFetcher {
    fn fetch(&self, doi: &str) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base_url, encode_doi(doi));
        get_json(&url, &[("Accept", "application/json")])
    }
}

/// The agency name from a doi.org response: `[{"DOI": ..., "RA": ...}]`.
/// Responses without one (e.g. `[{"status": "DOI does not exist"}]`) mean
/// the DOI is not registered anywhere.
pub fn agency_of(payload: &Value) -> Option<&str> {
    payload.get(0)?.get("RA")?.as_str()
}

/// Writes one `agency,status` row per input row.
pub struct RaDelivery<'a> {
    pub sinks: &'a ResultSinks,
    pub errors: &'a ErrorLog,
    pub null_value: &'a str,
}

impl Deliver for RaDelivery<'_> {
    fn deliver(&self, item: &WorkItem, payload: &Value) -> Delivery {
        let (agency, status) = match agency_of(payload) {
            Some(agency) => (agency.to_string(), "valid"),
            None => ("invalid".to_string(), "invalid"),
        };
        let mut row = item.fields.clone();
        row.push(agency);
        row.push(status.to_string());
        row.push(self.null_value.to_string());
        self.sinks.succeeded.write(&row);
        Delivery::Success {
            cacheable: payload.is_array(),
        }
    }

    fn deliver_error(&self, item: &WorkItem, message: &str) {
        self.errors.record(&item.doi, message);
        let mut row = item.fields.clone();
        row.push("error".to_string());
        row.push("invalid".to_string());
        row.push(message.to_string());
        self.sinks.failed.write(&row);
    }
}
