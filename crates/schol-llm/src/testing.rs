//! Deterministic [`LanguageModel`] for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{LanguageModel, LlmError};

/// Replays queued answers in order, then repeats the configured default.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    queue: Mutex<VecDeque<Result<String, String>>>,
    default: Option<Result<String, String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call with the same text.
    pub fn repeating(answer: impl Into<String>) -> Self {
        Self {
            default: Some(Ok(answer.into())),
            ..Self::default()
        }
    }

    /// Fail every call, as an unreachable provider would.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            default: Some(Err(message.into())),
            ..Self::default()
        }
    }

    pub fn then_answer(self, answer: impl Into<String>) -> Self {
        self.push(Ok(answer.into()));
        self
    }

    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.push(Err(message.into()));
        self
    }

    fn push(&self, entry: Result<String, String>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(entry);
        }
    }

    /// User prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, LlmError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(user.to_string());
        }
        let next = self
            .queue
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .or_else(|| self.default.clone());
        match next {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(LlmError::Other(message)),
            None => Err(LlmError::Other("scripted model has no answer left".into())),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
