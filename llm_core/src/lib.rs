//! Token stream source for move commentary.
//!
//! A [`GenerationRequest`] describes one chess move. [`TokenSource`]
//! implementations turn it into a lazy stream of text fragments; the
//! production implementation is [`OpenAiClient`], which talks to any
//! OpenAI-compatible chat completions endpoint with `stream: true`.
mod client;
mod error;
mod prompt;
mod source;
#[cfg(any(test, feature = "test-utils"))]
mod scripted;

use serde::{Deserialize, Serialize};

pub use client::{LlmConfig, LlmProvider, OpenAiClient};
pub use error::LlmError;
pub use prompt::commentary_prompt;
pub use source::{TokenSource, TokenStream};
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{ScriptStep, ScriptedSource};

/// Who made the move being commented on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    Human,
    Computer,
}

impl std::fmt::Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Player::Human => f.write_str("human"),
            Player::Computer => f.write_str("computer"),
        }
    }
}

/// One commentary request. Immutable once built; owned by a single
/// pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub move_notation: String,
    pub player: Player,
    /// Board position in FEN. Treated as opaque text.
    pub fen: String,
    pub move_history: Vec<String>,
}

impl GenerationRequest {
    pub fn new(move_notation: impl Into<String>, player: Player, fen: impl Into<String>) -> Self {
        Self {
            move_notation: move_notation.into(),
            player,
            fen: fen.into(),
            move_history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<String>) -> Self {
        self.move_history = history;
        self
    }
}
