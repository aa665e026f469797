use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use schol_fetch::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use schol_llm::{LanguageModel, OpenAiChat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dedup::DedupConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: OpenAiChat::DEFAULT_MODEL.to_string(),
            base_url: OpenAiChat::DEFAULT_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: usize,
    pub batch_concurrency: usize,
    pub chunk_delay_ms: u64,
    pub web_port: u16,
    pub dedup: DedupConfig,
    pub llm: LlmConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            user_agent: "schol-bot/0.1".to_string(),
            max_retries: 2,
            batch_concurrency: 3,
            chunk_delay_ms: 2_000,
            web_port: 8000,
            dedup: DedupConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` yields; unparsable values are ignored.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parsed(&lookup, "SCHOL_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = v;
        }
        if let Some(v) = lookup("SCHOL_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            config.user_agent = v;
        }
        if let Some(v) = parsed(&lookup, "SCHOL_HTTP_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "SCHOL_BATCH_CONCURRENCY") {
            config.batch_concurrency = v;
        }
        if let Some(v) = parsed(&lookup, "SCHOL_CHUNK_DELAY_MS") {
            config.chunk_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "SCHOL_WEB_PORT") {
            config.web_port = v;
        }
        if let Some(v) = parsed(&lookup, "SCHOL_DEDUP_THRESHOLD") {
            config.dedup.duplicate_threshold = v;
        }
        config.llm.api_key = lookup("OPENAI_API_KEY").filter(|v| !v.trim().is_empty());
        if let Some(v) = lookup("SCHOL_LLM_MODEL").filter(|v| !v.trim().is_empty()) {
            config.llm.model = v;
        }
        if let Some(v) = lookup("SCHOL_LLM_BASE_URL").filter(|v| !v.trim().is_empty()) {
            config.llm.base_url = v;
        }
        config
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Keeps secrets out of config files: a missing key is taken from the environment.
    pub fn with_env_api_key(mut self) -> Self {
        if self.llm.api_key.is_none() {
            self.llm.api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty());
        }
        self
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.max_retries,
                ..BackoffPolicy::default()
            },
        }
    }

    pub fn build_fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::new(self.http_client_config())
    }

    /// `None` when no API key is configured; AI paths then go straight to
    /// their deterministic fallbacks.
    pub fn build_model(&self) -> Result<Option<Arc<dyn LanguageModel>>> {
        let Some(api_key) = &self.llm.api_key else {
            info!("no language model configured, using rule-based strategies only");
            return Ok(None);
        };
        let chat = OpenAiChat::new(api_key.clone())
            .context("configuring language model")?
            .with_model(self.llm.model.clone())
            .with_base_url(self.llm.base_url.clone());
        let model: Arc<dyn LanguageModel> = Arc::new(chat);
        Ok(Some(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.batch_concurrency, 3);
        assert_eq!(config.chunk_delay(), Duration::from_secs(2));
        assert_eq!(config.dedup.duplicate_threshold, 0.5);
        assert!(config.llm.api_key.is_none());
    }

    #[test]
    fn vars_override_defaults_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SCHOL_BATCH_CONCURRENCY", "8"),
            ("SCHOL_CHUNK_DELAY_MS", "not-a-number"),
            ("SCHOL_DEDUP_THRESHOLD", "0.65"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SCHOL_LLM_MODEL", "gpt-4.1-mini"),
        ]);
        let config = PipelineConfig::from_vars(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.batch_concurrency, 8);
        assert_eq!(config.chunk_delay_ms, 2_000);
        assert_eq!(config.dedup.duplicate_threshold, 0.65);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.llm.model, "gpt-4.1-mini");
        assert!(config.build_model().unwrap().is_some());
    }

    #[test]
    fn yaml_file_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schol.yaml");
        fs::write(
            &path,
            "batch_concurrency: 5\nchunk_delay_ms: 0\ndedup:\n  duplicate_threshold: 0.7\n",
        )
        .unwrap();

        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.batch_concurrency, 5);
        assert_eq!(config.chunk_delay_ms, 0);
        assert_eq!(config.dedup.duplicate_threshold, 0.7);
        assert_eq!(config.dedup.ambiguous_ceiling, DedupConfig::default().ambiguous_ceiling);
        assert_eq!(config.user_agent, "schol-bot/0.1");
    }

    #[test]
    fn unreadable_yaml_is_an_error_with_context() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::from_yaml_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }

    #[test]
    fn no_api_key_means_no_model() {
        assert!(PipelineConfig::default().build_model().unwrap().is_none());
    }
}
