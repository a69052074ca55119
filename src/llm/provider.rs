use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::DeskZoomResult;
use crate::llm::types::{CallConfig, ChatMessage, Conversation, LlmResponse};

/// Unified LLM provider trait. All providers implement this trait.
/// New providers only need to implement this trait and register in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider's identifier (matches config.toml key).
    fn name(&self) -> &str;

    /// Single non-streaming chat completion.
    async fn chat(&self, messages: &[ChatMessage], cfg: &CallConfig) -> DeskZoomResult<LlmResponse>;
}

/// Which part of the agent is asking. Each role may map to its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayRole {
    System,
    Action,
    Zoom,
}

impl GatewayRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayRole::System => "system",
            GatewayRole::Action => "action",
            GatewayRole::Zoom => "zoom",
        }
    }
}

/// JSON schema a structured reply must follow.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseSchema {
    pub fn of<T: schemars::JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        Self {
            name: T::schema_name(),
            schema: serde_json::to_value(root).unwrap_or_default(),
        }
    }

    /// Compact JSON rendering for embedding in prompts.
    pub fn to_prompt_string(&self) -> String {
        self.schema.to_string()
    }
}

/// Audit record of one model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    pub id: String,
    pub role: GatewayRole,
    pub model: String,
    /// Request messages with image payloads replaced by a placeholder.
    pub messages: serde_json::Value,
    pub response: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// What a gateway hands back for one request.
#[derive(Debug, Clone)]
pub struct ModelReply {
    /// The assistant message, ready to append to a conversation.
    pub message: ChatMessage,
    /// Structured payload when a schema was expected and the output held a JSON object.
    pub parsed: Option<serde_json::Value>,
    pub prompt: PromptRecord,
    pub model: String,
}

impl ModelReply {
    /// Deserialize the structured payload, `None` if absent or not of shape `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Option<T> {
        self.parsed
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn text(&self) -> String {
        self.message.text_content()
    }
}

/// Abstraction over a vision-capable model invocation service.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn request(
        &self,
        role: GatewayRole,
        conversation: &Conversation,
        expect: Option<&ResponseSchema>,
    ) -> DeskZoomResult<ModelReply>;
}

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// Pull a JSON object out of model output.
///
/// Accepts a bare object, a fenced ```json block, or the first complete
/// `{…}` object inside surrounding prose. Returns `None` for anything else.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return Some(v);
    }
    if let Some(caps) = fenced_block().and_then(|re| re.captures(trimmed)) {
        if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    match serde_json::Deserializer::from_str(&trimmed[start..])
        .into_iter::<serde_json::Value>()
        .next()
    {
        Some(Ok(v @ serde_json::Value::Object(_))) => Some(v),
        _ => None,
    }
}

/// Replace image payloads in a serialized message list with a placeholder.
pub fn sanitize_messages(messages: &[ChatMessage]) -> serde_json::Value {
    let mut value = serde_json::to_value(messages).unwrap_or_default();
    if let Some(msgs) = value.as_array_mut() {
        for msg in msgs {
            // content can be string or array of parts; we only touch the array case.
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    value
}
