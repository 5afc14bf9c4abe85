use thiserror::Error;

/// Failures raised while opening or reading a token stream.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether the failure originated from the generation service itself,
    /// as opposed to a local fault such as missing configuration.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, LlmError::Config(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            LlmError::Transport(format!("request timed out: {e}"))
        } else {
            LlmError::Transport(e.to_string())
        }
    }
}
