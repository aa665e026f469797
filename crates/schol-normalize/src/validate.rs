//! Total field coercions. None of these fail; malformed input degrades to a
//! safe default.

use chrono::NaiveDate;
use schol_core::{Deadline, Degree, DEADLINE_DATE_FORMAT, ELIGIBILITY_PLACEHOLDER, MAX_ELIGIBILITY_CHARS};
use sha2::{Digest, Sha256};
use url::Url;

use crate::dates::DateResolver;
use crate::text::collapse_whitespace;

pub const ID_HEX_LEN: usize = 16;

const ELLIPSIS: &str = "...";

pub fn validate_degree(raw: Option<&str>) -> Degree {
    let Some(raw) = raw else {
        return Degree::Any;
    };
    let raw = raw.trim();
    Degree::ALL
        .into_iter()
        .find(|degree| degree.as_str().eq_ignore_ascii_case(raw))
        .unwrap_or(Degree::Any)
}

/// Bounds eligibility text to [`MAX_ELIGIBILITY_CHARS`], cutting on the last
/// whitespace before the limit.
pub fn truncate_eligibility(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return ELIGIBILITY_PLACEHOLDER.to_string();
    };
    let text = collapse_whitespace(raw);
    if text.is_empty() {
        return ELIGIBILITY_PLACEHOLDER.to_string();
    }
    if text.chars().count() <= MAX_ELIGIBILITY_CHARS {
        return text;
    }

    let limit = MAX_ELIGIBILITY_CHARS - ELLIPSIS.len();
    let head: String = text.chars().take(limit).collect();
    // A boundary exactly at the limit keeps the whole last word.
    let cut = if text.chars().nth(limit).is_some_and(char::is_whitespace) {
        Some(head.len())
    } else {
        head.rfind(char::is_whitespace)
    };
    match cut {
        Some(idx) if idx > 0 => format!("{}{ELLIPSIS}", head[..idx].trim_end()),
        _ => ELIGIBILITY_PLACEHOLDER.to_string(),
    }
}

fn is_web_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}

/// Absolute http(s) link, resolving relative links against `origin_url` and
/// falling back to `origin_url` itself.
pub fn validate_link(raw: Option<&str>, origin_url: &str) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return origin_url.to_string();
    };
    if let Ok(absolute) = Url::parse(raw) {
        if is_web_url(&absolute) {
            return absolute.to_string();
        }
    }
    if let Ok(joined) = Url::parse(origin_url).and_then(|base| base.join(raw)) {
        if is_web_url(&joined) {
            return joined.to_string();
        }
    }
    origin_url.to_string()
}

/// Content-addressed record id: hex prefix of SHA-256 over the origin key.
pub fn generate_id(origin_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin_key.trim().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(ID_HEX_LEN);
    digest
}

pub fn validate_deadline(raw: Option<&str>, resolver: &DateResolver) -> Option<Deadline> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let lower = raw.to_lowercase();
    if lower.contains("varies") || lower.contains("rolling") {
        return Some(Deadline::Varies);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, DEADLINE_DATE_FORMAT) {
        return Some(Deadline::Date(date));
    }
    Some(resolver.resolve(raw))
}

pub fn normalize_country(raw: Option<&str>) -> Option<String> {
    let country = collapse_whitespace(raw?);
    if country.is_empty() || country.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(country)
    }
}
