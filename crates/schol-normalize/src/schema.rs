//! Record schema conformance, callable independently of normalization.
//!
//! Violations of the record invariants are errors; legal but weak records
//! (no country, past deadline, placeholder eligibility) only produce warnings.

use chrono::NaiveDate;
use schol_core::{
    Deadline, Degree, ScholarshipRecord, ValidationReport, ELIGIBILITY_PLACEHOLDER,
    MAX_ELIGIBILITY_CHARS,
};
use serde_json::{Map, Value as JsonValue};
use url::Url;

use crate::validate::ID_HEX_LEN;

const REQUIRED_STRINGS: &[&str] = &["id", "name", "eligibility", "link", "source"];

#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Findings {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn into_report(self) -> ValidationReport {
        ValidationReport {
            is_valid: self.errors.is_empty(),
            errors: self.errors,
            warnings: self.warnings,
        }
    }
}

/// Check an arbitrary JSON value against the record schema.
pub fn validate_value(value: &JsonValue, today: NaiveDate) -> ValidationReport {
    let mut findings = Findings::default();
    let Some(map) = value.as_object() else {
        findings.error("record must be a JSON object");
        return findings.into_report();
    };

    for key in REQUIRED_STRINGS {
        match map.get(*key) {
            None | Some(JsonValue::Null) => findings.error(format!("`{key}` is required")),
            Some(JsonValue::String(s)) if s.trim().is_empty() => {
                findings.error(format!("`{key}` must not be blank"))
            }
            Some(JsonValue::String(_)) => {}
            Some(_) => findings.error(format!("`{key}` must be a string")),
        }
    }

    check_id(map, &mut findings);
    check_degree(map, &mut findings);
    check_eligibility(map, &mut findings);
    check_deadline(map, today, &mut findings);
    check_link(map, &mut findings);

    match map.get("isFullyFunded") {
        Some(JsonValue::Bool(_)) => {}
        None => findings.error("`isFullyFunded` is required"),
        Some(_) => findings.error("`isFullyFunded` must be a boolean"),
    }
    match map.get("country") {
        Some(JsonValue::String(s)) if !s.trim().is_empty() => {}
        None | Some(JsonValue::Null) | Some(JsonValue::String(_)) => {
            findings.warn("`country` is not set")
        }
        Some(_) => findings.error("`country` must be a string or null"),
    }
    for key in ["amount", "provider"] {
        if !matches!(map.get(key), None | Some(JsonValue::Null) | Some(JsonValue::String(_))) {
            findings.error(format!("`{key}` must be a string or null"));
        }
    }
    for key in ["fitScore", "matchScore"] {
        if !matches!(map.get(key), None | Some(JsonValue::Null) | Some(JsonValue::Number(_))) {
            findings.error(format!("`{key}` must be a number or null"));
        }
    }

    findings.into_report()
}

pub fn validate_record(record: &ScholarshipRecord, today: NaiveDate) -> ValidationReport {
    match serde_json::to_value(record) {
        Ok(value) => validate_value(&value, today),
        Err(err) => ValidationReport {
            is_valid: false,
            errors: vec![format!("record could not be serialized: {err}")],
            warnings: Vec::new(),
        },
    }
}

fn check_id(map: &Map<String, JsonValue>, findings: &mut Findings) {
    if let Some(id) = map.get("id").and_then(JsonValue::as_str) {
        if id.len() != ID_HEX_LEN || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            findings.warn(format!("`id` is not a {ID_HEX_LEN}-character hex digest"));
        }
    }
}

fn check_degree(map: &Map<String, JsonValue>, findings: &mut Findings) {
    match map.get("degree") {
        Some(JsonValue::String(s)) if Degree::ALL.iter().any(|d| d.as_str() == s) => {}
        Some(other) => findings.error(format!(
            "`degree` must be one of Bachelor, Master, PhD, Any (got {other})"
        )),
        None => findings.error("`degree` is required"),
    }
}

fn check_eligibility(map: &Map<String, JsonValue>, findings: &mut Findings) {
    let Some(text) = map.get("eligibility").and_then(JsonValue::as_str) else {
        return;
    };
    let len = text.chars().count();
    if len > MAX_ELIGIBILITY_CHARS {
        findings.error(format!(
            "`eligibility` is {len} characters, limit is {MAX_ELIGIBILITY_CHARS}"
        ));
    }
    if text == ELIGIBILITY_PLACEHOLDER {
        findings.warn("`eligibility` is the placeholder text");
    }
}

fn check_deadline(map: &Map<String, JsonValue>, today: NaiveDate, findings: &mut Findings) {
    match map.get("deadline") {
        None | Some(JsonValue::Null) => findings.warn("`deadline` is not set"),
        Some(JsonValue::String(raw)) => match raw.parse::<Deadline>() {
            Ok(Deadline::Date(date)) if date < today => {
                findings.warn(format!("`deadline` {date} has already passed"))
            }
            Ok(_) => {}
            Err(err) => findings.error(format!("`deadline`: {err}")),
        },
        Some(_) => findings.error("`deadline` must be a string or null"),
    }
}

fn check_link(map: &Map<String, JsonValue>, findings: &mut Findings) {
    let Some(link) = map.get("link").and_then(JsonValue::as_str) else {
        return;
    };
    match Url::parse(link) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
        _ => findings.error(format!("`link` {link:?} is not an absolute http(s) URL")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn good() -> JsonValue {
        json!({
            "id": "0123456789abcdef",
            "name": "Fulbright Foreign Student Program",
            "country": "United States",
            "degree": "Master",
            "eligibility": "Graduate students, young professionals and artists from abroad.",
            "deadline": "2027-02-01",
            "link": "https://foreign.fulbrightonline.org/",
            "source": "foreign.fulbrightonline.org",
            "isFullyFunded": true,
            "amount": null,
            "provider": "U.S. Department of State"
        })
    }

    #[test]
    fn conforming_record_is_valid_without_warnings() {
        let report = validate_value(&good(), today());
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn invariant_breaks_are_errors() {
        let mut value = good();
        value["degree"] = json!("Doctorate");
        value["deadline"] = json!("next spring");
        value["link"] = json!("/relative/path");
        value["eligibility"] = json!("x".repeat(MAX_ELIGIBILITY_CHARS + 1));
        value["isFullyFunded"] = json!("yes");
        value.as_object_mut().unwrap().remove("name");

        let report = validate_value(&value, today());
        assert!(!report.is_valid);
        for needle in ["degree", "deadline", "link", "eligibility", "isFullyFunded", "name"] {
            assert!(
                report.errors.iter().any(|e| e.contains(needle)),
                "no error mentions {needle}: {:?}",
                report.errors
            );
        }
    }

    #[test]
    fn weak_records_only_warn() {
        let mut value = good();
        value["country"] = json!(null);
        value["deadline"] = json!("2025-01-31");
        value["eligibility"] = json!(ELIGIBILITY_PLACEHOLDER);
        value["id"] = json!("not-a-digest");

        let report = validate_value(&value, today());
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.warnings.len(), 4, "{:?}", report.warnings);
    }

    #[test]
    fn varies_deadline_is_accepted() {
        let mut value = good();
        value["deadline"] = json!("varies");
        assert!(validate_value(&value, today()).warnings.is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        let report = validate_value(&json!(["a"]), today());
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
    }

    #[test]
    fn typed_record_round_trips_through_the_checker() {
        let record: ScholarshipRecord = serde_json::from_value(good()).unwrap();
        assert!(validate_record(&record, today()).is_valid);
    }
}
