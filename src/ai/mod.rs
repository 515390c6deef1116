//! AI backends behind one structured-output contract.
//!
//! Every backend receives the same prompt (see [`crate::prompts`]), asks its
//! service for JSON through the provider's native structured-output switch,
//! and must hand back exactly `{ "markdown_content": string, "warnings":
//! [string] }`. Anything else is [`ConvertError::AiContractViolation`]. There
//! is no retry: one call, one outcome.
//!
//! Backends are chosen by name through a [`BackendRegistry`], so call sites
//! never switch on provider names themselves.

pub mod gemini;
pub mod openai;

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use crate::error::ConvertError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// The structured payload every backend must produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredConversion {
    pub markdown_content: String,
    pub warnings: Vec<String>,
}

impl StructuredConversion {
    /// Strictly parse a backend's raw JSON text.
    ///
    /// Both fields are required, unknown fields are rejected, `warnings` may
    /// not be null, and `markdown_content` must not be blank.
    pub fn from_response(provider: &str, raw: &str) -> Result<Self, ConvertError> {
        let violation = |detail: String| {
            let preview: String = raw.chars().take(500).collect();
            warn!("{provider}: response does not match the contract ({detail}); response text: {preview}");
            ConvertError::AiContractViolation {
                provider: provider.to_string(),
                detail,
            }
        };

        // The derived Deserialize also accepts a two-element array.
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| violation(e.to_string()))?;
        if !value.is_object() {
            return Err(violation(format!(
                "expected a JSON object, got {}",
                json_type(&value)
            )));
        }
        let parsed: StructuredConversion =
            serde_json::from_value(value).map_err(|e| violation(e.to_string()))?;
        if parsed.markdown_content.trim().is_empty() {
            return Err(violation("markdown_content is empty".into()));
        }
        Ok(parsed)
    }
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// A generative backend producing [`StructuredConversion`]s.
#[async_trait]
pub trait AiBackend: Send + Sync {
    /// Registry name, e.g. `gemini`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Convert raw extracted text. `file_type_hint` is the upper-cased source
    /// suffix, e.g. `.PDF`.
    async fn generate_structured_markdown(
        &self,
        text: &str,
        subject: &str,
        file_type_hint: &str,
    ) -> Result<StructuredConversion, ConvertError>;
}

/// Everything needed to initialise a backend for one call.
#[derive(Clone)]
pub struct BackendSettings {
    pub model: String,
    pub api_key: String,
    /// Overrides the provider's public endpoint (proxies, tests).
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl BackendSettings {
    /// Reject a blank model or credential before any network traffic.
    pub(crate) fn validate(&self, provider: &str) -> Result<(), ConvertError> {
        if self.api_key.trim().is_empty() {
            return Err(ConvertError::ProviderNotConfigured {
                provider: provider.to_string(),
                hint: "API key must be provided".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConvertError::ProviderNotConfigured {
                provider: provider.to_string(),
                hint: "model name must be provided".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn http_client(&self, provider: &str) -> Result<reqwest::Client, ConvertError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConvertError::AiRequestFailed {
                provider: provider.to_string(),
                detail: format!("cannot build HTTP client: {e}"),
            })
    }
}

impl fmt::Debug for BackendSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSettings")
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Constructor registered under a provider name.
pub type BackendFactory =
    Arc<dyn Fn(BackendSettings) -> Result<Box<dyn AiBackend>, ConvertError> + Send + Sync>;

/// Name-keyed backend factory.
#[derive(Clone)]
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// A registry with no backends.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// `gemini` and `openai`.
    pub fn with_defaults() -> Self {
        Self::empty()
            .with(gemini::PROVIDER, |s| Ok(Box::new(GeminiBackend::new(s)?) as Box<dyn AiBackend>))
            .with(openai::PROVIDER, |s| Ok(Box::new(OpenAiBackend::new(s)?) as Box<dyn AiBackend>))
    }

    /// Register (or replace) a backend. Names are case-insensitive.
    pub fn with<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(BackendSettings) -> Result<Box<dyn AiBackend>, ConvertError> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.trim().to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Initialise the backend registered under `name`.
    pub fn create(&self, name: &str, settings: BackendSettings) -> Result<Box<dyn AiBackend>, ConvertError> {
        let key = name.trim().to_ascii_lowercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| ConvertError::UnsupportedProvider {
                provider: name.to_string(),
            })?;
        factory(settings)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}
