//! DOI normalization.
//!
//! Input columns hold free text: bare DOIs, `https://doi.org/...` URLs,
//! `doi:` prefixes, values with trailing punctuation from spreadsheet
//! exports. The extraction pulls the first well-formed DOI out of the
//! value; rows where nothing matches are terminal failures upstream.

use std::sync::LazyLock;

use regex::Regex;

// Prefix `10.`, a 4+ digit registrant (dot-separated sub-codes allowed),
// then a suffix of non-space characters excluding markup delimiters.
static DOI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"10\.\d{4,}(?:\.\d+)*/[^\s"&'<>]+"#).expect("invalid DOI pattern")
});

/// Extract the first DOI from a free-text value.
pub fn extract_doi(raw: &str) -> Option<&str> {
    DOI_PATTERN.find(raw).map(|m| m.as_str())
}
