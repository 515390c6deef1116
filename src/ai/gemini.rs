//! Google Gemini backend (`generateContent` REST endpoint).

use super::{AiBackend, BackendSettings, StructuredConversion};
use crate::error::ConvertError;
use crate::prompts;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

pub const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini with `responseMimeType: application/json` and a response schema.
pub struct GeminiBackend {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, ConvertError> {
        settings.validate(PROVIDER)?;
        let client = settings.http_client(PROVIDER)?;
        let base_url = settings
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        info!("Gemini backend initialised for model '{}'", settings.model);
        Ok(Self {
            client,
            model: settings.model,
            api_key: settings.api_key,
            base_url,
        })
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "markdown_content": { "type": "STRING" },
                        "warnings": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["markdown_content", "warnings"]
                }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl AiBackend for GeminiBackend {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_structured_markdown(
        &self,
        text: &str,
        subject: &str,
        file_type_hint: &str,
    ) -> Result<StructuredConversion, ConvertError> {
        let failed = |detail: String| ConvertError::AiRequestFailed {
            provider: PROVIDER.to_string(),
            detail,
        };

        let prompt = prompts::render_prompt(subject, file_type_hint, text);
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        info!("Sending request to Gemini model '{}'", self.model);
        debug!("Gemini prompt: {} chars", prompt.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(&prompt))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {}", body.trim())));
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable response envelope: {e}")))?;

        if body.candidates.is_empty() {
            let feedback = body
                .prompt_feedback
                .map(|f| f.to_string())
                .unwrap_or_else(|| "none".into());
            return Err(failed(format!("returned no candidates. Feedback: {feedback}")));
        }

        let raw: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        debug!("Gemini response: {} chars", raw.len());

        StructuredConversion::from_response(PROVIDER, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> GeminiBackend {
        GeminiBackend::new(BackendSettings {
            model: "gemini-1.5-flash-latest".into(),
            api_key: "g-key".into(),
            base_url: Some(server.uri()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn reply_with(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }]
        }))
    }

    #[tokio::test]
    async fn requests_json_and_parses_contract() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash-latest:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(reply_with(
                r##"{"markdown_content": "# Notes", "warnings": ["table simplified"]}"##,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let out = backend(&server)
            .generate_structured_markdown("raw", "Physics", ".PDF")
            .await
            .unwrap();
        assert_eq!(out.markdown_content, "# Notes");
        assert_eq!(out.warnings, ["table simplified"]);
    }

    #[tokio::test]
    async fn prompt_carries_context() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply_with(r##"{"markdown_content": "x", "warnings": []}"##))
            .mount(&server)
            .await;

        backend(&server)
            .generate_structured_markdown("E equals m c squared", "Physics", ".DOCX")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("Subject: \"Physics\""));
        assert!(prompt.contains("Original File Type: \".DOCX\""));
        assert!(prompt.contains("E equals m c squared"));
    }

    #[tokio::test]
    async fn malformed_json_is_contract_violation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply_with("Sure! Here is your markdown: # Title"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::AiContractViolation { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn no_candidates_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::AiRequestFailed { .. }));
        assert!(err.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn http_error_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::AiRequestFailed { .. }));
        assert!(err.to_string().contains("403"));
    }
}
