use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeskZoomError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Perception error: {0}")]
    Perception(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Unsupported device '{device}': missing {missing}")]
    UnsupportedDevice { device: String, missing: String },

    #[error("Image dimensions differ: base {base:?}, overlay {overlay:?}")]
    DimensionMismatch { base: (u32, u32), overlay: (u32, u32) },

    #[error("Could not ground '{description}' within {depth} zoom levels")]
    GroundingNotFound { description: String, depth: u32 },

    #[error("Malformed model reply: {0}")]
    MalformedReply(String),

    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Invalid parameters for '{action}': {reason}")]
    InvalidParameters { action: String, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Task cancelled")]
    Cancelled,
}

impl DeskZoomError {
    /// Whether a failed step may be attempted again.
    ///
    /// Model hiccups, device faults and grounding misses are transient; a
    /// hallucinated action name or a misconfigured agent is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            DeskZoomError::UnknownAction(_)
                | DeskZoomError::UnsupportedDevice { .. }
                | DeskZoomError::Config(_)
                | DeskZoomError::Cancelled
        )
    }
}

impl serde::Serialize for DeskZoomError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type DeskZoomResult<T> = Result<T, DeskZoomError>;
