//! Language-model client seam
//!
//! The engine treats the model as opaque text in, text out. Provider
//! adapters live outside this crate and implement [`ModelClient`].
//! `MockModelClient` returns scripted responses for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Task tags passed to the model client so adapters can route or meter calls
pub mod task_tag {
    pub const ENTITY_EXTRACTION: &str = "entity_extraction";
    pub const REACT_DECISION: &str = "react_decision";
    pub const REACT_REFLECTION: &str = "react_reflection";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Errors from model client operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid model config: {0}")]
    Config(String),
    #[error("model not available: {0}")]
    Unavailable(String),
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

impl ModelError {
    /// Config errors never succeed on retry
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Providers that run without an API key
const KEYLESS_PROVIDERS: &[&str] = &["ollama", "local", "mock"];

/// Model selection and credentials for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Check credentials and parameters before any call is made
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.provider.trim().is_empty() {
            return Err(ModelError::Config("provider is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(ModelError::Config("model is empty".to_string()));
        }
        let keyless = KEYLESS_PROVIDERS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(self.provider.trim()));
        let has_key = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !keyless && !has_key {
            return Err(ModelError::Config(format!(
                "provider '{}' requires an api key",
                self.provider
            )));
        }
        if let Some(url) = &self.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ModelError::Config(format!("base url '{}' is not http(s)", url)));
            }
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ModelError::Config(format!("temperature {} outside [0, 2]", t)));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(ModelError::Config("max_tokens must be positive".to_string()));
        }
        Ok(())
    }
}

/// Text-in/text-out model client.
///
/// Streaming adapters collect the stream before returning.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        task_tag: &str,
        config: &ModelConfig,
    ) -> Result<String, ModelError>;
}

/// One call observed by [`MockModelClient`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub task_tag: String,
    pub messages: Vec<ChatMessage>,
}

/// Mock client: scripted responses per task tag, consumed in order.
///
/// When a tag's script runs out the default response is used; with no
/// default the call fails as unavailable.
#[derive(Default)]
pub struct MockModelClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<String, ModelError>>>>,
    default_response: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockModelClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a task tag
    pub fn with_response(self, task_tag: impl Into<String>, response: impl Into<String>) -> Self {
        self.push(task_tag.into(), Ok(response.into()));
        self
    }

    /// Queue a failure for a task tag
    pub fn with_failure(self, task_tag: impl Into<String>, error: ModelError) -> Self {
        self.push(task_tag.into(), Err(error));
        self
    }

    /// Response used for any tag without a queued entry
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    fn push(&self, tag: String, entry: Result<String, ModelError>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.entry(tag).or_default().push_back(entry);
        }
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_for(&self, task_tag: &str) -> usize {
        self.calls().iter().filter(|c| c.task_tag == task_tag).count()
    }
}

#[async_trait]
impl ModelClient for MockModelClient {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        task_tag: &str,
        config: &ModelConfig,
    ) -> Result<String, ModelError> {
        config.validate()?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                task_tag: task_tag.to_string(),
                messages: messages.to_vec(),
            });
        }

        let scripted = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(task_tag).and_then(|q| q.pop_front()));

        match scripted {
            Some(entry) => entry,
            None => self.default_response.clone().ok_or_else(|| {
                ModelError::Unavailable(format!("no mock response for task '{}'", task_tag))
            }),
        }
    }
}
