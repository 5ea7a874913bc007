use async_trait::async_trait;
use serde_json::json;

use crate::{ChatRequest, ChatResponse, FinishReason, ProviderAdapter, Role, Usage};
use textkg_types::KgError;

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

/// Chat completions adapter for OpenAI-compatible endpoints.
#[derive(Debug)]
pub struct OpenAiAdapter {
    api_key: String,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            default_model: "gpt-4o".to_string(),
        }
    }

    pub fn from_env() -> Result<Self, KgError> {
        let key = std::env::var("OPENAI_API_KEY").map_err(|_| KgError::AuthError {
            provider: "openai".into(),
        })?;
        Ok(Self::new(key))
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    fn build_request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({ "role": role, "content": msg.content })
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(ref schema) = request.response_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "strict": true,
                    "schema": schema,
                },
            });
        }

        body
    }

    fn parse_response(&self, body: serde_json::Value) -> Result<ChatResponse, KgError> {
        let id = body["id"].as_str().unwrap_or("").to_string();
        let model = body["model"].as_str().unwrap_or("").to_string();

        let choice = &body["choices"][0];
        let text = choice["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        let finish_reason = match choice["finish_reason"].as_str() {
            Some("length") => FinishReason::MaxTokens,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::EndTurn,
        };

        let usage_obj = &body["usage"];
        let input_tokens = usage_obj["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = usage_obj["completion_tokens"].as_u64().unwrap_or(0);

        Ok(ChatResponse {
            id,
            text,
            model,
            usage: Usage {
                input_tokens,
                output_tokens,
                total_tokens: input_tokens + output_tokens,
            },
            finish_reason,
        })
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(status: reqwest::StatusCode, body: &str) -> KgError {
    let status_u16 = status.as_u16();
    match status_u16 {
        429 => {
            let retry_ms = serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"]["retry_after"].as_f64())
                .map(|s| (s * 1000.0) as u64)
                .unwrap_or(1000);
            KgError::RateLimited {
                provider: "openai".into(),
                retry_after_ms: retry_ms,
            }
        }
        401 => KgError::AuthError {
            provider: "openai".into(),
        },
        500 | 502 | 503 => KgError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => KgError::ProviderError {
            provider: "openai".into(),
            status: status_u16,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, KgError> {
        let body = self.build_request_body(request);

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| KgError::ProviderError {
                provider: "openai".into(),
                status: 0,
                message: e.to_string(),
                retryable: true,
            })?;

        let status = resp.status();
        let response_body = resp.text().await.map_err(|e| KgError::ProviderError {
            provider: "openai".into(),
            status: 0,
            message: e.to_string(),
            retryable: true,
        })?;

        if !status.is_success() {
            return Err(map_error(status, &response_body));
        }

        let json: serde_json::Value =
            serde_json::from_str(&response_body).map_err(|e| KgError::ProviderError {
                provider: "openai".into(),
                status: status.as_u16(),
                message: format!("Failed to parse response JSON: {e}"),
                retryable: false,
            })?;

        self.parse_response(json)
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn supports_structured_output(&self) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn make_request() -> ChatRequest {
        ChatRequest::new(
            "gpt-4o",
            vec![Message::system("You extract entities."), Message::user("text")],
        )
    }

    #[test]
    fn build_body_basic() {
        let adapter = OpenAiAdapter::new("sk-test".into());
        let body = adapter.build_request_body(&make_request());

        assert_eq!(body["model"], "gpt-4o");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn build_body_with_structured_output() {
        let adapter = OpenAiAdapter::new("sk-test".into());
        let req = make_request().with_response_schema(json!({
            "type": "object",
            "properties": {"selected_class": {"type": "string"}},
        }));
        let body = adapter.build_request_body(&req);

        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["type"],
            "object"
        );
    }

    #[test]
    fn build_body_with_temperature_and_max_tokens() {
        let adapter = OpenAiAdapter::new("sk-test".into());
        let mut req = make_request().with_temperature(0.5);
        req.max_tokens = Some(2048);
        let body = adapter.build_request_body(&req);

        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 2048);
    }

    #[test]
    fn parse_response_extracts_text_and_usage() {
        let adapter = OpenAiAdapter::new("sk-test".into());
        let body = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{
                "message": {"role": "assistant", "content": "<summary>\nhello\n</summary>"},
                "finish_reason": "stop",
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 34},
        });

        let resp = adapter.parse_response(body).unwrap();
        assert_eq!(resp.id, "chatcmpl-1");
        assert_eq!(resp.text, "<summary>\nhello\n</summary>");
        assert_eq!(resp.usage.input_tokens, 12);
        assert_eq!(resp.usage.output_tokens, 34);
        assert_eq!(resp.usage.total_tokens, 46);
        assert_eq!(resp.finish_reason, FinishReason::EndTurn);
    }

    #[test]
    fn parse_response_maps_length_finish_reason() {
        let adapter = OpenAiAdapter::new("sk-test".into());
        let body = json!({
            "id": "chatcmpl-2",
            "model": "gpt-4o",
            "choices": [{
                "message": {"content": "truncated"},
                "finish_reason": "length",
            }],
            "usage": {},
        });
        let resp = adapter.parse_response(body).unwrap();
        assert_eq!(resp.finish_reason, FinishReason::MaxTokens);
    }

    #[test]
    fn map_error_rate_limited() {
        let err = map_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"retry_after": 2.5}}"#,
        );
        match err {
            KgError::RateLimited {
                provider,
                retry_after_ms,
            } => {
                assert_eq!(provider, "openai");
                assert_eq!(retry_after_ms, 2500);
            }
            other => panic!("expected RateLimited, got: {other:?}"),
        }
    }

    #[test]
    fn map_error_auth() {
        let err = map_error(reqwest::StatusCode::UNAUTHORIZED, "{}");
        assert!(matches!(err, KgError::AuthError { .. }));
    }

    #[test]
    fn map_error_server_errors_retryable() {
        for code in [500u16, 502, 503] {
            let status = reqwest::StatusCode::from_u16(code).unwrap();
            let err = map_error(status, r#"{"error": {"message": "oops"}}"#);
            assert!(err.is_retryable(), "status {code} should be retryable");
        }
    }

    #[test]
    fn map_error_bad_request_not_retryable() {
        let err = map_error(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "bad schema"}}"#,
        );
        match err {
            KgError::ProviderError {
                status, retryable, ..
            } => {
                assert_eq!(status, 400);
                assert!(!retryable);
            }
            other => panic!("expected ProviderError, got: {other:?}"),
        }
    }

    #[test]
    fn extract_error_message_falls_back_to_body() {
        assert_eq!(
            extract_error_message(r#"{"error": {"message": "quota exceeded"}}"#),
            "quota exceeded"
        );
        assert_eq!(extract_error_message("plain text"), "plain text");
    }
}
