//! OpenRouter chat-completions backend.
//!
//! One OpenAI-compatible endpoint serves every model in the registry, so the
//! backend id is passed straight through as the `model` field.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};
use unisyn_config::{resolve_api_base, resolve_api_key, OpenRouterConfig};

use super::{ChatMessage, InvokeParams, ModelBackend};
use crate::error::InvokeError;

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

pub struct OpenRouterBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    referer: String,
    title: String,
    extra_headers: HashMap<String, String>,
}

impl OpenRouterBackend {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self, InvokeError> {
        Self::from_config_with(&OpenRouterConfig::default(), endpoint.into(), api_key)
    }

    /// Build from config, resolving key and endpoint from the environment when unset.
    pub fn from_config(cfg: &OpenRouterConfig) -> Result<Self, InvokeError> {
        Self::from_config_with(cfg, resolve_api_base(cfg), resolve_api_key(cfg))
    }

    fn from_config_with(
        cfg: &OpenRouterConfig,
        endpoint: String,
        api_key: Option<String>,
    ) -> Result<Self, InvokeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            referer: cfg.referer.clone(),
            title: cfg.title.clone(),
            extra_headers: cfg.extra_headers.clone().unwrap_or_default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl ModelBackend for OpenRouterBackend {
    async fn complete(
        &self,
        backend_id: &str,
        messages: &[ChatMessage],
        params: InvokeParams,
    ) -> Result<String, InvokeError> {
        let body = CompletionRequest {
            model: backend_id,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let mut req = self
            .client
            .post(&self.endpoint)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        for (name, value) in &self.extra_headers {
            req = req.header(name.as_str(), value.as_str());
        }

        debug!(
            "POST {} model={backend_id} messages={}",
            self.endpoint,
            messages.len()
        );
        let resp = req.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!("OpenRouter call for {backend_id} failed ({status}): {body}");
            return Err(InvokeError::Backend {
                status_code: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| InvokeError::MalformedResponse(e.to_string()))?;
        data.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| {
                InvokeError::MalformedResponse("no choices[0].message.content in response".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("Be nice."), ChatMessage::user("Hello")]
    }

    #[tokio::test]
    async fn test_success_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header("x-title", "UnisynAI Backend"))
            .and(body_partial_json(serde_json::json!({
                "model": "openai/gpt-4o-mini",
                "max_tokens": 200,
                "messages": [
                    {"role": "system", "content": "Be nice."},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Hi there!"}}]
            })))
            .mount(&server)
            .await;

        let backend = OpenRouterBackend::new(
            format!("{}/v1/chat/completions", server.uri()),
            Some("sk-test".into()),
        )
        .unwrap();
        let text = backend
            .complete("openai/gpt-4o-mini", &messages(), InvokeParams::default())
            .await
            .unwrap();
        assert_eq!(text, "Hi there!");
    }

    #[tokio::test]
    async fn test_non_success_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402).set_body_string("insufficient credits"))
            .mount(&server)
            .await;

        let backend = OpenRouterBackend::new(server.uri(), None).unwrap();
        let err = backend
            .complete("x-ai/grok-4", &messages(), InvokeParams::default())
            .await
            .unwrap_err();
        match err {
            InvokeError::Backend { status_code, body } => {
                assert_eq!(status_code, 402);
                assert_eq!(body, "insufficient credits");
            }
            other => panic!("expected backend error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let backend = OpenRouterBackend::new(server.uri(), None).unwrap();
        let err = backend
            .complete("x-ai/grok-4", &messages(), InvokeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let backend = OpenRouterBackend::new("http://127.0.0.1:9/v1", None).unwrap();
        let err = backend
            .complete("x-ai/grok-4", &messages(), InvokeParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_extra_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-extra", "yes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let cfg = OpenRouterConfig {
            api_key: Some("k".into()),
            api_base: Some(server.uri()),
            extra_headers: Some(HashMap::from([("X-Extra".to_string(), "yes".to_string())])),
            ..Default::default()
        };
        let backend = OpenRouterBackend::from_config(&cfg).unwrap();
        assert_eq!(backend.endpoint(), server.uri());
        assert!(backend.has_api_key());
        let text = backend
            .complete("m", &messages(), InvokeParams::default())
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }
}
