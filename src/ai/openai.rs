//! OpenAI backend (chat completions with a strict `json_schema` response format).

use super::{AiBackend, BackendSettings, StructuredConversion};
use crate::error::ConvertError;
use crate::prompts;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

pub const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const SCHEMA_NAME: &str = "structured_markdown";

pub struct OpenAiBackend {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(settings: BackendSettings) -> Result<Self, ConvertError> {
        settings.validate(PROVIDER)?;
        let client = settings.http_client(PROVIDER)?;
        let base_url = settings
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        info!("OpenAI backend initialised for model '{}'", settings.model);
        Ok(Self {
            client,
            model: settings.model,
            api_key: settings.api_key,
            base_url,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    response_format: Value,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

fn response_format() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": SCHEMA_NAME,
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "markdown_content": { "type": "string" },
                    "warnings": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["markdown_content", "warnings"],
                "additionalProperties": false
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

#[async_trait]
impl AiBackend for OpenAiBackend {
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
        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: prompts::SYSTEM_MESSAGE,
                },
                Message {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: response_format(),
        };
        info!("Sending request to OpenAI model '{}'", self.model);
        debug!("OpenAI prompt: {} chars", prompt.len());

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {}", body.trim())));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable response envelope: {e}")))?;

        let message = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| failed("returned no choices".into()))?;

        if let Some(refusal) = message.refusal {
            return Err(ConvertError::AiContractViolation {
                provider: PROVIDER.to_string(),
                detail: format!("model refused: {refusal}"),
            });
        }

        let raw = message.content.unwrap_or_default();
        debug!("OpenAI response: {} chars", raw.len());
        StructuredConversion::from_response(PROVIDER, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend(server: &MockServer) -> OpenAiBackend {
        OpenAiBackend::new(BackendSettings {
            model: "gpt-4o".into(),
            api_key: "sk-test".into(),
            base_url: Some(server.uri()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn reply_with(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        }))
    }

    #[tokio::test]
    async fn sends_strict_schema_and_system_turn() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "response_format": {
                    "type": "json_schema",
                    "json_schema": { "strict": true }
                }
            })))
            .respond_with(reply_with(r##"{"markdown_content": "# Title", "warnings": []}"##))
            .expect(1)
            .mount(&server)
            .await;

        let out = backend(&server)
            .generate_structured_markdown("raw", "General", ".DOCX")
            .await
            .unwrap();
        assert_eq!(out.markdown_content, "# Title");
        assert!(out.warnings.is_empty());

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], prompts::SYSTEM_MESSAGE);
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn unknown_field_is_contract_violation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply_with(
                r##"{"markdown_content": "x", "warnings": [], "confidence": 0.9}"##,
            ))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::AiContractViolation { .. }));
    }

    #[tokio::test]
    async fn refusal_is_contract_violation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": null, "refusal": "I can't help with that." } }]
            })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::AiContractViolation { .. }));
    }

    #[tokio::test]
    async fn empty_choices_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::AiRequestFailed { .. }));
    }

    #[tokio::test]
    async fn server_error_is_request_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream overloaded"))
            .mount(&server)
            .await;

        let err = backend(&server)
            .generate_structured_markdown("raw", "General", ".PDF")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream overloaded"));
    }
}
