use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{DeskZoomError, DeskZoomResult};
use crate::llm::provider::{sanitize_messages, LlmProvider};
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, timeout: Duration) -> DeskZoomResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            id,
            api_base,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: &[ChatMessage], cfg: &CallConfig) -> DeskZoomResult<LlmResponse> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": messages,
            "stream": false,
            "temperature": cfg.temperature,
        });
        if cfg.json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            json_mode = cfg.json_mode,
            "sending LLM request"
        );
        tracing::trace!(
            messages = %sanitize_messages(messages),
            "request messages (sanitized, base64 omitted)"
        );

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(DeskZoomError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }
}

/// Extract the first choice's content from a chat-completions response body.
fn parse_completion(json: &serde_json::Value) -> DeskZoomResult<LlmResponse> {
    let Some(content) = json["choices"][0]["message"]["content"].as_str() else {
        return Err(DeskZoomError::LlmProvider(format!(
            "response carried no message content: {}",
            json.get("error").unwrap_or(&serde_json::Value::Null)
        )));
    };
    let model = json["model"].as_str().map(str::to_string);

    tracing::info!(
        content_len = content.len(),
        model = model.as_deref().unwrap_or("?"),
        "LLM JSON response received"
    );

    Ok(LlmResponse {
        content: content.to_string(),
        model,
    })
}
