//! Funder extraction and matching over Crossref work records.

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

/// Columns appended to the input columns in both sinks, in order.
pub const DERIVED_COLUMNS: [&str; 11] = [
    "publisher",
    "member",
    "funder_names",
    "award_ids",
    "funder_dois",
    "doi_asserted_by",
    "has_funder_doi",
    "code_in_awards",
    "name_in_funders",
    "created_year",
    "error",
];

/// Lowercase and strip everything but letters, digits, and underscores.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| c.is_whitespace() || "-_.,;:()[]{}".contains(c))
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Fuzzy containment used for award codes and funder names: normalized
/// equality, word-boundary containment, or at least 75% of the needle's
/// tokens appearing in the haystack.
pub fn is_discrete_match(needle: &str, haystack: &str) -> bool {
    if needle.is_empty() || haystack.is_empty() {
        return false;
    }
    if normalize(needle) == normalize(haystack) {
        return true;
    }
    let pattern = format!(r"\b{}\b", regex::escape(&needle.to_lowercase()));
    if let Ok(re) = Regex::new(&pattern) {
        if re.is_match(&haystack.to_lowercase()) {
            return true;
        }
    }
    let needle_tokens: FxHashSet<String> = tokenize(needle).into_iter().collect();
    if needle_tokens.is_empty() {
        return false;
    }
    let haystack_tokens: FxHashSet<String> = tokenize(haystack).into_iter().collect();
    let matching = needle_tokens.intersection(&haystack_tokens).count();
    matching as f64 / needle_tokens.len() as f64 >= 0.75
}

/// Does the row's funder code appear among the asserted award ids?
pub fn code_in_awards(code: &str, award_ids: &[String]) -> bool {
    if code.is_empty() {
        return false;
    }
    award_ids.iter().any(|award| is_discrete_match(code, award))
}

/// Does any configured name variation match an asserted funder name?
pub fn name_in_funders(names: &[String], variations: &[String]) -> bool {
    names.iter().any(|name| {
        variations
            .iter()
            .any(|v| v.to_lowercase() == name.to_lowercase() || is_discrete_match(v, name))
    })
}

pub fn has_funder_doi(funder_dois: &[String], target: &str) -> bool {
    funder_dois.iter().any(|d| d == target)
}

/// Funder assertions pulled from one work record. Per-funder lists stay
/// index-aligned (names[i] asserted funder_dois[i]); awards are flattened
/// because Crossref nests several per funder.
#[derive(Debug, Default, PartialEq)]
pub struct FunderInfo {
    pub names: Vec<String>,
    pub award_ids: Vec<String>,
    pub funder_dois: Vec<String>,
    pub doi_asserted_by: Vec<String>,
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub fn extract_funders(payload: &Value) -> FunderInfo {
    let mut info = FunderInfo::default();
    let Some(funders) = payload.pointer("/message/funder").and_then(Value::as_array) else {
        return info;
    };
    for funder in funders {
        info.names.push(str_field(funder, "name"));
        if let Some(awards) = funder.get("award").and_then(Value::as_array) {
            info.award_ids
                .extend(awards.iter().filter_map(Value::as_str).map(String::from));
        }
        info.funder_dois.push(str_field(funder, "DOI"));
        info.doi_asserted_by
            .push(str_field(funder, "doi-asserted-by"));
    }
    info
}

pub fn extract_created_year(payload: &Value) -> Option<i64> {
    payload
        .pointer("/message/created/date-parts/0/0")
        .and_then(Value::as_i64)
}

/// Publisher and member id; the member id is remapped to a publisher name
/// through members.json when a mapping is available.
pub fn extract_publisher_member(
    payload: &Value,
    member_map: Option<&FxHashMap<String, String>>,
) -> (String, String) {
    let Some(message) = payload.get("message") else {
        return (String::new(), String::new());
    };
    let mut publisher = str_field(message, "publisher");
    let member = match message.get("member") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if let Some(name) = member_map.and_then(|m| m.get(&member)) {
        publisher = name.clone();
    }
    (publisher, member)
}

/// Join list values with `;`, substituting the placeholder for empty
/// lists and empty elements.
pub fn join_or_null(items: &[String], null_value: &str) -> String {
    if items.is_empty() {
        return null_value.to_string();
    }
    items
        .iter()
        .map(|i| if i.is_empty() { null_value } else { i.as_str() })
        .collect::<Vec<_>>()
        .join(";")
}
