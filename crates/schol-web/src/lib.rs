//! Axum JSON service over the scholarship pipeline.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use schol_core::{DedupMethod, RawInput, ScholarshipRecord, ScrapeOutcome};
use schol_pipeline::Pipeline;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "schol-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    url: String,
    #[serde(default, rename = "rawHTML")]
    raw_html: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    urls: Vec<String>,
    #[serde(default)]
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DeadlineRequest {
    #[serde(alias = "freeText")]
    text: String,
}

#[derive(Debug, Deserialize)]
struct DedupRequest {
    records: Vec<ScholarshipRecord>,
    #[serde(default)]
    method: DedupMethod,
    #[serde(default)]
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    record: serde_json::Value,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/scrape", post(scrape_handler))
        .route("/batch", post(batch_handler))
        .route("/deadline", post(deadline_handler))
        .route("/deduplicate", post(dedup_handler))
        .route("/validate", post(validate_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(pipeline: Pipeline, port: u16) -> anyhow::Result<()> {
    let state = AppState::new(pipeline);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "aiEnabled": state.pipeline.has_model(),
    }))
    .into_response()
}

async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ScrapeRequest>,
) -> Response {
    if let Some(raw_html) = req.raw_html {
        let input = RawInput::Page {
            url: req.url,
            raw_html,
        };
        return match state.pipeline.normalize_input(&input).await {
            Ok(done) => Json(ScrapeOutcome::succeeded(done.record, done.strategy)).into_response(),
            Err(err) => bad_request(err),
        };
    }
    match state.pipeline.scrape_and_normalize(&req.url).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => bad_request(err),
    }
}

async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BatchRequest>,
) -> Response {
    let concurrency = req
        .concurrency
        .unwrap_or_else(|| state.pipeline.default_concurrency());
    match state
        .pipeline
        .batch_scrape_and_normalize(&req.urls, concurrency)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(err) => bad_request(err),
    }
}

async fn deadline_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeadlineRequest>,
) -> Response {
    Json(state.pipeline.parse_deadline(&req.text).await).into_response()
}

async fn dedup_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DedupRequest>,
) -> Response {
    if let Some(threshold) = req.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return bad_request("threshold must be between 0 and 1");
        }
    }
    let report = state
        .pipeline
        .deduplicate(req.records, req.method, req.threshold)
        .await;
    Json(report).into_response()
}

async fn validate_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> Response {
    Json(state.pipeline.validate(&req.record)).into_response()
}

fn bad_request(err: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::NaiveDate;
    use http_body_util::BodyExt;
    use schol_fetch::StaticPageSource;
    use schol_llm::testing::ScriptedModel;
    use schol_pipeline::PipelineConfig;
    use tower::ServiceExt;

    const PAGE_URL: &str = "https://www.daad.de/en/scholarship/";

    fn test_app(model: Option<Arc<dyn schol_llm::LanguageModel>>) -> Router {
        let pages = StaticPageSource::new().with_page(
            PAGE_URL,
            "<html><head><title>DAAD Study Scholarship</title></head><body>Funding</body></html>",
        );
        let config = PipelineConfig {
            chunk_delay_ms: 0,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::new(Arc::new(pages), model, &config)
            .with_today(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        app(AppState::new(pipeline))
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn handler_smoke_health() {
        let resp = test_app(None)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE].to_str().unwrap(), "application/json");
    }

    #[tokio::test]
    async fn scrape_returns_record_or_structured_failure() {
        let (status, body) = post_json(test_app(None), "/scrape", json!({ "url": PAGE_URL })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["strategy"], json!("fallback"));
        assert_eq!(body["scholarship"]["name"], json!("DAAD Study Scholarship"));

        let (status, body) =
            post_json(test_app(None), "/scrape", json!({ "url": "https://missing.example/" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].is_string());

        let (status, _) = post_json(test_app(None), "/scrape", json!({ "url": " " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn scrape_accepts_caller_supplied_html() {
        let (status, body) = post_json(
            test_app(None),
            "/scrape",
            json!({
                "url": "https://www.chevening.org/",
                "rawHTML": "<html><head><title>Chevening</title></head><body></body></html>"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scholarship"]["source"], json!("www.chevening.org"));

        let (status, body) = post_json(
            test_app(None),
            "/scrape",
            json!({ "url": "", "rawHTML": "<html><body>Funding</body></html>" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("url must not be empty"));
    }

    #[tokio::test]
    async fn batch_rejects_zero_concurrency() {
        let (status, body) =
            post_json(test_app(None), "/batch", json!({ "urls": [PAGE_URL], "concurrency": 0 })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("concurrency"));

        let (status, body) = post_json(
            test_app(None),
            "/batch",
            json!({ "urls": [PAGE_URL, "https://missing.example/"] }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["total"], json!(2));
        assert_eq!(body["summary"]["successRate"], json!(0.5));
        assert_eq!(body["errors"][0]["url"], json!("https://missing.example/"));
    }

    #[tokio::test]
    async fn deadline_uses_model_answer() {
        let model = Arc::new(ScriptedModel::repeating(r#"{"deadline": "varies"}"#));
        let (status, body) = post_json(
            test_app(Some(model)),
            "/deadline",
            json!({ "text": "Deadline: 15 October 2026" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "deadline": "varies" }));

        let (status, body) = post_json(
            test_app(None),
            "/deadline",
            json!({ "freeText": "Deadline: 15 October 2026" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "deadline": "2026-10-15" }));
    }

    #[tokio::test]
    async fn deduplicate_reports_counts() {
        let record = |id: &str, name: &str| {
            json!({
                "id": id, "name": name, "country": "United Kingdom", "degree": "Master",
                "eligibility": "Two years of work experience.", "deadline": "2026-11-04",
                "link": "https://www.chevening.org/", "source": "www.chevening.org",
                "isFullyFunded": true
            })
        };
        let (status, body) = post_json(
            test_app(None),
            "/deduplicate",
            json!({
                "records": [record("a", "Chevening Scholarship"), record("b", "Chevening Scholarship UK 2025")],
                "method": "rules"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deduplicatedCount"], json!(1));
        assert_eq!(body["duplicatesRemoved"], json!(1));
        assert_eq!(body["metadata"]["method"], json!("rules"));
        assert!(body["metadata"]["processingTime"].is_u64());

        let (status, _) = post_json(
            test_app(None),
            "/deduplicate",
            json!({ "records": [], "threshold": 1.5 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn validate_reports_errors() {
        let (status, body) = post_json(
            test_app(None),
            "/validate",
            json!({ "record": { "name": "Incomplete", "degree": "Doctorate" } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isValid"], json!(false));
        assert!(!body["errors"].as_array().unwrap().is_empty());
    }
}
