use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque playable reference returned by a synthesis service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudioReference(pub String);

impl AudioReference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AudioReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one submitted synthesis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TakeHandle(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TakeStatus {
    Pending,
    Ready(AudioReference),
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("take {take_id} failed with status {status}")]
    TakeFailed { take_id: String, status: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Remote text-to-speech collaborator.
///
/// Implementations must be safe to share across concurrent synthesis
/// tasks; each call is independent.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Submit text for synthesis without waiting for it to finish.
    async fn submit(&self, text: &str) -> Result<TakeHandle, SynthesisError>;

    /// Check whether a submitted take is ready.
    async fn poll(&self, handle: &TakeHandle) -> Result<TakeStatus, SynthesisError>;

    /// Best reference currently available for a take, whether or not it
    /// has finished processing.
    async fn current_reference(&self, handle: &TakeHandle) -> Result<AudioReference, SynthesisError>;
}
