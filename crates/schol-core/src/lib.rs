//! Core domain model for scholarship ingestion, normalization and dedup.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const CRATE_NAME: &str = "schol-core";

/// Hard cap on the plain-text payload handed to normalization.
pub const MAX_EXTRACTED_TEXT_CHARS: usize = 10_000;

/// Upper bound on `ScholarshipRecord::eligibility`, in characters.
pub const MAX_ELIGIBILITY_CHARS: usize = 220;

pub const ELIGIBILITY_PLACEHOLDER: &str = "See the official website for eligibility details.";

pub const DEADLINE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Unprocessed input handed to the pipeline by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInput {
    Page {
        url: String,
        #[serde(rename = "rawHTML")]
        raw_html: String,
    },
    FreeText {
        #[serde(rename = "freeText")]
        free_text: String,
    },
}

/// Bounded plain text produced by the text extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedText {
    pub url: Option<String>,
    pub source_domain: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Degree {
    Bachelor,
    Master,
    PhD,
    Any,
}

impl Degree {
    pub const ALL: [Degree; 4] = [Degree::Bachelor, Degree::Master, Degree::PhD, Degree::Any];

    pub fn as_str(self) -> &'static str {
        match self {
            Degree::Bachelor => "Bachelor",
            Degree::Master => "Master",
            Degree::PhD => "PhD",
            Degree::Any => "Any",
        }
    }
}

impl fmt::Display for Degree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized deadline: either a calendar date or the literal `"varies"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Deadline {
    Date(NaiveDate),
    Varies,
}

impl Deadline {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Deadline::Date(d) => Some(*d),
            Deadline::Varies => None,
        }
    }
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::Date(d) => write!(f, "{}", d.format(DEADLINE_DATE_FORMAT)),
            Deadline::Varies => f.write_str("varies"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid deadline {0:?}: expected YYYY-MM-DD or \"varies\"")]
pub struct ParseDeadlineError(pub String);

impl FromStr for Deadline {
    type Err = ParseDeadlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("varies") {
            return Ok(Deadline::Varies);
        }
        NaiveDate::parse_from_str(trimmed, DEADLINE_DATE_FORMAT)
            .map(Deadline::Date)
            .map_err(|_| ParseDeadlineError(s.to_string()))
    }
}

impl Serialize for Deadline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Deadline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Canonical scholarship entry emitted by normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScholarshipRecord {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
    pub degree: Degree,
    pub eligibility: String,
    pub deadline: Option<Deadline>,
    pub link: String,
    pub source: String,
    pub is_fully_funded: bool,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_score: Option<f64>,
}

impl ScholarshipRecord {
    /// Number of optional descriptive fields carrying a value.
    pub fn completeness(&self) -> usize {
        [
            self.country.is_some(),
            self.deadline.is_some(),
            self.amount.is_some(),
            self.provider.is_some(),
            self.degree != Degree::Any,
            self.eligibility != ELIGIBILITY_PLACEHOLDER,
        ]
        .into_iter()
        .filter(|populated| *populated)
        .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineResult {
    pub deadline: Deadline,
}

/// Which extraction strategy produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    Ai,
    Fallback,
}

/// Single-item result of scrape + normalize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scholarship: Option<ScholarshipRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ExtractionStrategy>,
}

impl ScrapeOutcome {
    pub fn succeeded(record: ScholarshipRecord, strategy: ExtractionStrategy) -> Self {
        Self {
            success: true,
            scholarship: Some(record),
            error: None,
            strategy: Some(strategy),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            scholarship: None,
            error: Some(error.into()),
            strategy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchError {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
}

impl BatchSummary {
    pub fn from_counts(total: usize, successful: usize) -> Self {
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        };
        Self {
            total,
            successful,
            failed: total.saturating_sub(successful),
            success_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<ScholarshipRecord>,
    pub errors: Vec<BatchError>,
    pub summary: BatchSummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupMethod {
    Ai,
    Rules,
    #[default]
    Hybrid,
}

impl fmt::Display for DedupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DedupMethod::Ai => "ai",
            DedupMethod::Rules => "rules",
            DedupMethod::Hybrid => "hybrid",
        })
    }
}

impl FromStr for DedupMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai" => Ok(DedupMethod::Ai),
            "rules" => Ok(DedupMethod::Rules),
            "hybrid" => Ok(DedupMethod::Hybrid),
            other => Err(format!("unknown dedup method {other:?} (expected ai, rules or hybrid)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairScore {
    pub a_id: String,
    pub b_id: String,
    pub score: f64,
}

/// Records judged equivalent within one dedup call; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub survivor_id: String,
    pub member_ids: Vec<String>,
    pub scores: Vec<PairScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupMetadata {
    pub method: DedupMethod,
    pub deduplication_rate: f64,
    pub confidence: f64,
    #[serde(rename = "processingTime")]
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupReport {
    pub deduplicated: Vec<ScholarshipRecord>,
    pub original_count: usize,
    pub deduplicated_count: usize,
    pub duplicates_removed: usize,
    pub groups: Vec<DuplicateGroup>,
    pub metadata: DedupMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
