pub mod parser;

use async_trait::async_trait;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Chat completion and embedding capability.
///
/// `config` accepts `temperature`, `max_tokens` and `json` (request a JSON object).
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], config: &Value) -> Result<String, LlmError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OpenAIClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl LLMProvider for OpenAIClient {
    async fn generate(&self, messages: &[ChatMessage], config: &Value) -> Result<String, LlmError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": config.get("temperature").and_then(Value::as_f64).unwrap_or(0.3),
        });
        if let Some(max_tokens) = config.get("max_tokens").and_then(Value::as_u64) {
            body["max_tokens"] = json!(max_tokens);
        }
        if config.get("json").and_then(Value::as_bool).unwrap_or(false) {
            body["response_format"] = json!({"type": "json_object"});
        }

        debug!("[LLM] chat completion with {} messages", messages.len());
        let result = self.post("chat/completions", body).await?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Malformed("missing choices[0].message.content".to_string()))?;
        trace!("[LLM] raw completion: {}", content);
        Ok(content.to_string())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let result = self
            .post(
                "embeddings",
                json!({
                    "model": self.embedding_model,
                    "input": text,
                }),
            )
            .await?;
        let values = result["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| LlmError::Malformed("missing data[0].embedding".to_string()))?;
        values
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| LlmError::Malformed("non-numeric embedding value".to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_for(server: &mockito::ServerGuard) -> LlmConfig {
        LlmConfig {
            api_key: "test-key".to_string(),
            base_url: server.url(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_generate_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"answer\":\"ok\"}"}}]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new(&config_for(&server)).expect("client");
        let content = client
            .generate(&[ChatMessage::user("hi")], &json!({"json": true}))
            .await
            .expect("completion");
        assert_eq!(content, r#"{"answer":"ok"}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_surfaces_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let client = OpenAIClient::new(&config_for(&server)).expect("client");
        let err = client
            .generate(&[ChatMessage::user("hi")], &json!({}))
            .await
            .expect_err("should fail");
        assert!(matches!(err, LlmError::Status { status: 429, .. }));
    }

    #[tokio::test]
    async fn test_embed_parses_vector() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"embedding":[0.5,-0.25,1.0]}]}"#)
            .create_async()
            .await;

        let client = OpenAIClient::new(&config_for(&server)).expect("client");
        let embedding = client.embed("роутер").await.expect("embedding");
        assert_eq!(embedding, vec![0.5, -0.25, 1.0]);
    }
}
