//! Builds and writes funding result rows.

use std::path::Path;

use rustc_hash::FxHashMap;
use serde_json::Value;

use doiline_core::orchestrator::{Deliver, Delivery, WorkItem};
use doiline_core::{ErrorLog, ResultSinks};

use crate::api::archive_payload;
use crate::config::FunderConfig;
use crate::funding::{
    code_in_awards, extract_created_year, extract_funders, extract_publisher_member,
    has_funder_doi, join_or_null, name_in_funders,
};

/// Turns Crossref payloads into sink rows: the input columns followed by
/// [`DERIVED_COLUMNS`](crate::funding::DERIVED_COLUMNS).
pub struct FundingDelivery<'a> {
    pub sinks: &'a ResultSinks,
    pub errors: &'a ErrorLog,
    pub funder: &'a FunderConfig,
    pub member_map: Option<&'a FxHashMap<String, String>>,
    pub null_value: &'a str,
    /// `Some` = archive fetched payloads here (HTTP mode only).
    pub archive_dir: Option<&'a Path>,
    /// Position of the funder_code column in the input.
    pub funder_code_idx: usize,
}

impl FundingDelivery<'_> {
    fn build_row(&self, item: &WorkItem, payload: &Value) -> Vec<String> {
        let null = self.null_value;
        let (publisher, member) = extract_publisher_member(payload, self.member_map);
        let funders = extract_funders(payload);
        let funder_code = item
            .fields
            .get(self.funder_code_idx)
            .map(String::as_str)
            .unwrap_or_default();

        let or_null = |s: String| if s.is_empty() { null.to_string() } else { s };

        let mut row = item.fields.clone();
        row.push(or_null(publisher));
        row.push(or_null(member));
        row.push(join_or_null(&funders.names, null));
        row.push(join_or_null(&funders.award_ids, null));
        row.push(join_or_null(&funders.funder_dois, null));
        row.push(join_or_null(&funders.doi_asserted_by, null));
        row.push(has_funder_doi(&funders.funder_dois, &self.funder.funder_doi).to_string());
        row.push(code_in_awards(funder_code, &funders.award_ids).to_string());
        row.push(name_in_funders(&funders.names, &self.funder.name_variations).to_string());
        row.push(extract_created_year(payload).map_or_else(|| null.to_string(), |y| y.to_string()));
        row.push(null.to_string());
        row
    }

    fn error_row(&self, item: &WorkItem, message: &str) -> Vec<String> {
        let null = self.null_value;
        let mut row = item.fields.clone();
        row.push("ERROR".to_string()); // publisher
        row.push("ERROR".to_string()); // member
        for _ in 0..4 {
            row.push(null.to_string());
        }
        row.push(false.to_string());
        row.push(false.to_string());
        row.push(false.to_string());
        row.push(null.to_string()); // created_year
        row.push(message.to_string());
        row
    }
}

impl Deliver for FundingDelivery<'_> {
    fn deliver(&self, item: &WorkItem, payload: &Value) -> Delivery {
        if let Some(dir) = self.archive_dir {
            if let Err(e) = archive_payload(dir, &item.doi, payload) {
                // the run promises one archived JSON file per fetched DOI
                let message = format!("cannot archive payload: {e}");
                self.errors.record(&item.doi, &message);
                self.sinks.failed.write(&self.error_row(item, &message));
                return Delivery::Failed;
            }
        }
        let well_formed = payload.get("message").is_some();
        if !well_formed {
            log::debug!("{}: payload has no message member", item.doi);
        }
        self.sinks.succeeded.write(&self.build_row(item, payload));
        Delivery::Success {
            cacheable: well_formed,
        }
    }

    fn deliver_error(&self, item: &WorkItem, message: &str) {
        self.errors.record(&item.doi, message);
        self.sinks.failed.write(&self.error_row(item, message));
    }
}
