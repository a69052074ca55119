use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ChatMessage {
    pub fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(text.into()),
        }
    }

    /// Text followed by images, each given as a data URI.
    pub fn with_images(role: impl Into<String>, text: impl Into<String>, images: Vec<String>) -> Self {
        if images.is_empty() {
            return Self::text(role, text);
        }
        let mut parts = vec![ContentPart::Text { text: text.into() }];
        parts.extend(
            images
                .into_iter()
                .map(|url| ContentPart::ImageUrl { image_url: ImageUrl { url } }),
        );
        Self {
            role: role.into(),
            content: MessageContent::Parts(parts),
        }
    }

    /// Concatenated text parts.
    pub fn text_content(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn images(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }

    pub fn strip_images(&mut self) {
        if let MessageContent::Parts(_) = self.content {
            self.content = MessageContent::Text(self.text_content());
        }
    }
}

/// Ordered dialogue with the model gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn post(&mut self, role: &str, text: impl Into<String>, images: Vec<String>) {
        self.push(ChatMessage::with_images(role, text, images));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().map(|m| m.images().len()).sum()
    }

    /// Copy of this conversation in which only the newest message keeps its
    /// images. Bounds the request payload as the history grows.
    pub fn working_copy(&self) -> Self {
        let mut copy = self.clone();
        if let Some((_, older)) = copy.messages.split_last_mut() {
            older.iter_mut().for_each(ChatMessage::strip_images);
        }
        copy
    }
}

/// Provider-level settings for one call, resolved from a role.
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
    pub json_mode: bool,
}

/// Raw provider output.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    /// Model id echoed by the endpoint, if any.
    pub model: Option<String>,
}
