//! Pipeline entry points: single and batch scrape+normalize, deadline parsing,
//! deduplication and schema validation.

pub mod config;
pub mod dedup;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use schol_core::{
    BatchError, BatchResult, BatchSummary, Deadline, DeadlineResult, DedupMethod, DedupReport,
    RawInput, ScholarshipRecord, ScrapeOutcome, ValidationReport,
};
use schol_fetch::PageSource;
use schol_llm::{parse_json_object, LanguageModel, LlmError};
use schol_normalize::{extract_text, validate_value, DateResolver, NormalizeOutcome, Normalizer};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use config::{LlmConfig, PipelineConfig};
pub use dedup::{similarity, DedupConfig, DedupEngine, DuplicateClassifier, LlmClassifier, RuleClassifier};

pub const CRATE_NAME: &str = "schol-pipeline";

const DEADLINE_SYSTEM_PROMPT: &str = "You read scholarship deadline text and return the \
application deadline. Reply with a single JSON object {\"deadline\": \"YYYY-MM-DD\"} for a fixed \
date, or {\"deadline\": \"varies\"} for rolling, ongoing or unspecified deadlines. \
Prefer the closest upcoming date. Never invent a date.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("url must not be empty")]
    EmptyUrl,
    #[error("free text has no origin url and cannot become a record")]
    MissingOrigin,
}

pub struct Pipeline {
    pages: Arc<dyn PageSource>,
    model: Option<Arc<dyn LanguageModel>>,
    normalizer: Normalizer,
    dedup: DedupEngine,
    default_concurrency: usize,
    chunk_delay: Duration,
    today: Option<NaiveDate>,
}

impl Pipeline {
    pub fn new(
        pages: Arc<dyn PageSource>,
        model: Option<Arc<dyn LanguageModel>>,
        config: &PipelineConfig,
    ) -> Self {
        let normalizer = match &model {
            Some(model) => Normalizer::new().with_model(model.clone()),
            None => Normalizer::new(),
        };
        Self {
            pages,
            dedup: DedupEngine::new(config.dedup).with_model(model.clone()),
            model,
            normalizer,
            default_concurrency: config.batch_concurrency.max(1),
            chunk_delay: config.chunk_delay(),
            today: None,
        }
    }

    /// Live HTTP fetcher plus the configured model, if any.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let fetcher = config.build_fetcher()?;
        let model = config.build_model()?;
        Ok(Self::new(Arc::new(fetcher), model, config))
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.normalizer = self.normalizer.with_today(today);
        self.today = Some(today);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn default_concurrency(&self) -> usize {
        self.default_concurrency
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    fn resolver(&self) -> DateResolver {
        self.today.map_or_else(DateResolver::current, DateResolver::new)
    }

    /// Normalize HTML the caller already holds; `url` is the origin.
    pub async fn normalize_page(&self, url: &str, html: &str) -> NormalizeOutcome {
        let text = extract_text(html, url, Utc::now());
        self.normalizer.normalize(&text, url).await
    }

    /// Normalize input the caller already holds, without fetching.
    pub async fn normalize_input(&self, input: &RawInput) -> Result<NormalizeOutcome, PipelineError> {
        match input {
            RawInput::Page { url, raw_html } => {
                let url = url.trim();
                if url.is_empty() {
                    return Err(PipelineError::EmptyUrl);
                }
                Ok(self.normalize_page(url, raw_html).await)
            }
            RawInput::FreeText { .. } => Err(PipelineError::MissingOrigin),
        }
    }

    async fn process(&self, url: &str) -> Result<NormalizeOutcome, String> {
        let page = self
            .pages
            .fetch_page(url)
            .await
            .map_err(|err| err.to_string())?;
        let text = extract_text(&page.body, url, page.fetched_at);
        Ok(self.normalizer.normalize(&text, url).await)
    }

    /// Fetch failures come back as `success: false`; only an empty URL is an error.
    pub async fn scrape_and_normalize(&self, url: &str) -> Result<ScrapeOutcome, PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PipelineError::EmptyUrl);
        }
        let span = info_span!("scrape", url);
        let outcome = match self.process(url).instrument(span).await {
            Ok(done) => ScrapeOutcome::succeeded(done.record, done.strategy),
            Err(error) => {
                warn!(url, %error, "scrape failed");
                ScrapeOutcome::failed(error)
            }
        };
        Ok(outcome)
    }

    /// Chunks of `concurrency` URLs run concurrently with a barrier per chunk
    /// and the configured pause between chunks. Results and errors keep input
    /// order.
    pub async fn batch_scrape_and_normalize(
        &self,
        urls: &[String],
        concurrency: usize,
    ) -> Result<BatchResult, PipelineError> {
        if concurrency == 0 {
            return Err(PipelineError::InvalidConcurrency);
        }
        let run_id = Uuid::new_v4();
        let span = info_span!("batch", %run_id, total = urls.len(), concurrency);

        async {
            let mut results = Vec::new();
            let mut errors = Vec::new();
            let chunk_count = urls.len().div_ceil(concurrency);

            for (chunk_idx, chunk) in urls.chunks(concurrency).enumerate() {
                let outcomes = join_all(chunk.iter().map(|url| {
                    let span = info_span!("scrape", %run_id, url = %url);
                    async move { (url, self.process(url.trim()).await) }.instrument(span)
                }))
                .await;

                for (url, outcome) in outcomes {
                    match outcome {
                        Ok(done) => results.push(done.record),
                        Err(error) => {
                            warn!(url = %url, %error, "batch item failed");
                            errors.push(BatchError {
                                url: url.clone(),
                                error,
                            });
                        }
                    }
                }

                if chunk_idx + 1 < chunk_count && !self.chunk_delay.is_zero() {
                    tokio::time::sleep(self.chunk_delay).await;
                }
            }

            let summary = BatchSummary::from_counts(urls.len(), results.len());
            info!(
                successful = summary.successful,
                failed = summary.failed,
                "batch finished"
            );
            Ok(BatchResult {
                results,
                errors,
                summary,
            })
        }
        .instrument(span)
        .await
    }

    async fn ask_model_for_deadline(
        &self,
        model: &dyn LanguageModel,
        text: &str,
    ) -> Result<Deadline, LlmError> {
        let answer = model.complete(DEADLINE_SYSTEM_PROMPT, text).await?;
        let raw = parse_json_object(&answer)?
            .get("deadline")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LlmError::MalformedJson("missing string `deadline`".into()))?;
        raw.parse::<Deadline>()
            .map_err(|err| LlmError::MalformedJson(err.to_string()))
    }

    /// AI answer when it is a real date or `varies`; otherwise the rule-based resolver.
    pub async fn parse_deadline(&self, text: &str) -> DeadlineResult {
        if text.trim().is_empty() {
            return DeadlineResult {
                deadline: Deadline::Varies,
            };
        }
        if let Some(model) = &self.model {
            match self.ask_model_for_deadline(model.as_ref(), text).await {
                Ok(deadline) => return DeadlineResult { deadline },
                Err(err) => warn!(error = %err, "deadline model failed, using rule-based resolver"),
            }
        }
        self.resolver().parse_deadline(text)
    }

    pub async fn deduplicate(
        &self,
        records: Vec<ScholarshipRecord>,
        method: DedupMethod,
        threshold: Option<f64>,
    ) -> DedupReport {
        let report = self.dedup.deduplicate(records, method, threshold).await;
        info!(
            %method,
            original = report.original_count,
            removed = report.duplicates_removed,
            "deduplication finished"
        );
        report
    }

    pub fn validate(&self, record: &serde_json::Value) -> ValidationReport {
        validate_value(record, self.resolver().today())
    }
}
