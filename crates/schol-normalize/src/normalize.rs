//! Structured normalization: extracted text in, validated record out.
//!
//! Extractors are tried in order; the first one that yields a candidate wins.
//! [`FallbackExtractor`] always runs last and cannot fail.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use schol_core::{ExtractedText, ExtractionStrategy, ScholarshipRecord};
use schol_llm::{parse_json_object, LanguageModel, LlmError};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dates::DateResolver;
use crate::text::{collapse_whitespace, source_domain};
use crate::validate::{
    generate_id, normalize_country, truncate_eligibility, validate_deadline, validate_degree,
    validate_link,
};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You extract scholarship details from web page text. \
Reply with a single JSON object and nothing else, using exactly these keys: \
name (string), country (string or null), degree (one of \"Bachelor\", \"Master\", \"PhD\", \"Any\"), \
eligibility (string, at most 220 characters), deadline (\"YYYY-MM-DD\", \"varies\" or null), \
link (string URL or null), amount (string or null), provider (string or null), isFullyFunded (boolean). \
Never invent URLs or amounts. Unknown fields are null. Respect the schema.";

const UNTITLED: &str = "Untitled scholarship";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Model(#[from] LlmError),
    #[error("malformed model answer: {0}")]
    MalformedJson(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

/// Loosely typed fields as an extractor found them, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateFields {
    pub name: Option<String>,
    pub country: Option<String>,
    pub degree: Option<String>,
    pub eligibility: Option<String>,
    pub deadline: Option<String>,
    pub link: Option<String>,
    pub amount: Option<String>,
    pub provider: Option<String>,
    pub is_fully_funded: Option<bool>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    fn strategy(&self) -> ExtractionStrategy;

    async fn extract(&self, page: &ExtractedText) -> Result<CandidateFields, ExtractError>;
}

fn json_str(map: &Map<String, JsonValue>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(JsonValue::as_str)
        .map(collapse_whitespace)
        .filter(|s| !s.is_empty())
}

fn json_amount(map: &Map<String, JsonValue>, key: &str) -> Option<String> {
    match map.get(key)? {
        JsonValue::Number(n) => Some(n.to_string()),
        _ => json_str(map, key),
    }
}

fn json_flag(map: &Map<String, JsonValue>, key: &str) -> Option<bool> {
    match map.get(key)? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::String(s) => Some(matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes")),
        _ => None,
    }
}

/// Read a model answer into candidate fields. `name` is the only required key.
pub fn candidate_from_json(raw: &str) -> Result<CandidateFields, ExtractError> {
    let map = parse_json_object(raw).map_err(|err| match err {
        LlmError::MalformedJson(msg) => ExtractError::MalformedJson(msg),
        other => ExtractError::Model(other),
    })?;
    let name = json_str(&map, "name")
        .ok_or_else(|| ExtractError::SchemaViolation("missing or blank `name`".into()))?;
    Ok(CandidateFields {
        name: Some(name),
        country: json_str(&map, "country"),
        degree: json_str(&map, "degree"),
        eligibility: json_str(&map, "eligibility"),
        deadline: json_str(&map, "deadline"),
        link: json_str(&map, "link"),
        amount: json_amount(&map, "amount"),
        provider: json_str(&map, "provider"),
        is_fully_funded: json_flag(&map, "isFullyFunded"),
    })
}

pub struct LlmExtractor {
    model: Arc<dyn LanguageModel>,
}

impl LlmExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::Ai
    }

    async fn extract(&self, page: &ExtractedText) -> Result<CandidateFields, ExtractError> {
        let prompt = format!(
            "Source URL: {}\nPage title: {}\n\nPage text:\n{}",
            page.url.as_deref().unwrap_or("unknown"),
            page.title.as_deref().unwrap_or("unknown"),
            page.text
        );
        let answer = self.model.complete(EXTRACTION_SYSTEM_PROMPT, &prompt).await?;
        candidate_from_json(&answer)
    }
}

/// Title, meta description and origin only. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackExtractor;

impl FallbackExtractor {
    pub fn candidate(&self, page: &ExtractedText) -> CandidateFields {
        let name = page
            .title
            .clone()
            .or_else(|| page.source_domain.clone())
            .unwrap_or_else(|| UNTITLED.to_string());
        CandidateFields {
            name: Some(name),
            eligibility: page.description.clone(),
            link: page.url.clone(),
            is_fully_funded: Some(false),
            ..CandidateFields::default()
        }
    }
}

#[async_trait]
impl Extractor for FallbackExtractor {
    fn strategy(&self) -> ExtractionStrategy {
        ExtractionStrategy::Fallback
    }

    async fn extract(&self, page: &ExtractedText) -> Result<CandidateFields, ExtractError> {
        Ok(self.candidate(page))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOutcome {
    pub record: ScholarshipRecord,
    pub strategy: ExtractionStrategy,
}

pub struct Normalizer {
    extractors: Vec<Box<dyn Extractor>>,
    fallback: FallbackExtractor,
    today: Option<NaiveDate>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    /// Normalizer with only the deterministic fallback.
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
            fallback: FallbackExtractor,
            today: None,
        }
    }

    pub fn with_model(self, model: Arc<dyn LanguageModel>) -> Self {
        self.with_extractor(Box::new(LlmExtractor::new(model)))
    }

    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Pin "today" for deadline resolution instead of the wall clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn resolver(&self) -> DateResolver {
        self.today.map_or_else(DateResolver::current, DateResolver::new)
    }

    pub async fn normalize(&self, page: &ExtractedText, origin_url: &str) -> NormalizeOutcome {
        for extractor in &self.extractors {
            match extractor.extract(page).await {
                Ok(candidate) => {
                    debug!(strategy = ?extractor.strategy(), origin_url, "extractor produced candidate");
                    return NormalizeOutcome {
                        record: self.finalize(candidate, page, origin_url),
                        strategy: extractor.strategy(),
                    };
                }
                Err(err) => {
                    warn!(strategy = ?extractor.strategy(), origin_url, error = %err, "extractor failed, falling through");
                }
            }
        }
        NormalizeOutcome {
            record: self.finalize(self.fallback.candidate(page), page, origin_url),
            strategy: ExtractionStrategy::Fallback,
        }
    }

    /// Run candidate fields through every field validator.
    pub fn finalize(
        &self,
        candidate: CandidateFields,
        page: &ExtractedText,
        origin_url: &str,
    ) -> ScholarshipRecord {
        let resolver = self.resolver();
        let source = page
            .source_domain
            .clone()
            .or_else(|| source_domain(origin_url))
            .unwrap_or_else(|| origin_url.to_string());
        let name = candidate
            .name
            .as_deref()
            .map(collapse_whitespace)
            .filter(|s| !s.is_empty())
            .or_else(|| self.fallback.candidate(page).name)
            .unwrap_or_else(|| UNTITLED.to_string());
        let non_blank = |value: Option<String>| {
            value
                .map(|v| collapse_whitespace(&v))
                .filter(|v| !v.is_empty())
        };

        ScholarshipRecord {
            id: generate_id(origin_url),
            name,
            country: normalize_country(candidate.country.as_deref()),
            degree: validate_degree(candidate.degree.as_deref()),
            eligibility: truncate_eligibility(candidate.eligibility.as_deref()),
            deadline: validate_deadline(candidate.deadline.as_deref(), &resolver),
            link: validate_link(candidate.link.as_deref(), origin_url),
            source,
            is_fully_funded: candidate.is_fully_funded.unwrap_or(false),
            amount: non_blank(candidate.amount),
            provider: non_blank(candidate.provider),
            fit_score: None,
            match_score: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use schol_core::{Deadline, Degree, ELIGIBILITY_PLACEHOLDER, MAX_ELIGIBILITY_CHARS};
    use schol_llm::testing::ScriptedModel;

    const ORIGIN: &str = "https://www.chevening.org/scholarships/";

    fn page() -> ExtractedText {
        ExtractedText {
            url: Some(ORIGIN.to_string()),
            source_domain: Some("www.chevening.org".into()),
            title: Some("Chevening Scholarships".into()),
            description: None,
            text: "Chevening Scholarships fund a one-year Master's degree in the UK.".into(),
            fetched_at: DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 24).unwrap()
    }

    #[tokio::test]
    async fn ai_candidate_is_validated() {
        let answer = r#"```json
{"name": " Chevening  Scholarship ", "country": "United Kingdom", "degree": "master",
 "eligibility": "Citizens of Chevening-eligible countries with two years of work experience.",
 "deadline": "November 4, 2026", "link": "/apply", "amount": 18000, "provider": "FCDO",
 "isFullyFunded": true}
```"#;
        let model = Arc::new(ScriptedModel::repeating(answer));
        let normalizer = Normalizer::new().with_model(model.clone()).with_today(today());

        let outcome = normalizer.normalize(&page(), ORIGIN).await;
        assert_eq!(outcome.strategy, ExtractionStrategy::Ai);
        let record = outcome.record;
        assert_eq!(record.name, "Chevening Scholarship");
        assert_eq!(record.degree, Degree::Master);
        assert_eq!(record.deadline, Some(Deadline::Date(NaiveDate::from_ymd_opt(2026, 11, 4).unwrap())));
        assert_eq!(record.link, "https://www.chevening.org/apply");
        assert_eq!(record.amount.as_deref(), Some("18000"));
        assert_eq!(record.source, "www.chevening.org");
        assert!(record.is_fully_funded);
        assert_eq!(record.id, generate_id(ORIGIN));
        assert_eq!(model.calls(), 1);
        assert!(model.prompts()[0].contains(ORIGIN));
    }

    #[tokio::test]
    async fn malformed_ai_answer_falls_back() {
        let model = Arc::new(ScriptedModel::repeating("Sorry, I cannot help with that."));
        let normalizer = Normalizer::new().with_model(model).with_today(today());

        let outcome = normalizer.normalize(&page(), ORIGIN).await;
        assert_eq!(outcome.strategy, ExtractionStrategy::Fallback);
        let record = outcome.record;
        assert_eq!(record.name, "Chevening Scholarships");
        assert_eq!(record.link, ORIGIN);
        assert_eq!(record.degree, Degree::Any);
        assert_eq!(record.eligibility, ELIGIBILITY_PLACEHOLDER);
        assert_eq!(record.deadline, None);
        assert!(!record.is_fully_funded);
    }

    #[tokio::test]
    async fn schema_violation_and_model_error_fall_back() {
        for model in [
            ScriptedModel::repeating(r#"{"country": "UK"}"#),
            ScriptedModel::repeating(r#"["not", "an", "object"]"#),
            ScriptedModel::failing("timeout"),
        ] {
            let normalizer = Normalizer::new().with_model(Arc::new(model));
            let outcome = normalizer.normalize(&page(), ORIGIN).await;
            assert_eq!(outcome.strategy, ExtractionStrategy::Fallback);
        }
    }

    #[tokio::test]
    async fn hallucinated_shapes_are_coerced() {
        let long = "Eligible applicants ".repeat(30);
        let answer = serde_json::json!({
            "name": "Global Excellence Award",
            "degree": "Postdoc",
            "eligibility": ["not", "a", "string"],
            "deadline": "rolling basis",
            "link": "javascript:apply()",
            "isFullyFunded": "yes",
            "provider": long,
        })
        .to_string();
        let normalizer = Normalizer::new()
            .with_model(Arc::new(ScriptedModel::repeating(answer)))
            .with_today(today());

        let record = normalizer.normalize(&page(), ORIGIN).await.record;
        assert_eq!(record.degree, Degree::Any);
        assert_eq!(record.eligibility, ELIGIBILITY_PLACEHOLDER);
        assert_eq!(record.deadline, Some(Deadline::Varies));
        assert_eq!(record.link, ORIGIN);
        assert!(record.is_fully_funded);
        assert!(record.eligibility.chars().count() <= MAX_ELIGIBILITY_CHARS);
    }

    #[tokio::test]
    async fn fallback_only_normalizer_uses_domain_without_title() {
        let mut untitled = page();
        untitled.title = None;
        untitled.description = Some("Fully funded one-year Master's study in the UK.".into());
        let outcome = Normalizer::new().normalize(&untitled, ORIGIN).await;
        assert_eq!(outcome.strategy, ExtractionStrategy::Fallback);
        assert_eq!(outcome.record.name, "www.chevening.org");
        assert_eq!(
            outcome.record.eligibility,
            "Fully funded one-year Master's study in the UK."
        );
    }

    #[test]
    fn candidate_errors_are_classified() {
        assert!(matches!(candidate_from_json("nope"), Err(ExtractError::MalformedJson(_))));
        assert!(matches!(
            candidate_from_json(r#"{"name": "   "}"#),
            Err(ExtractError::SchemaViolation(_))
        ));
    }
}
