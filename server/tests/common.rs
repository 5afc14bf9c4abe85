//! Common utilities for integration tests

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use commentary_core::{CommentaryPipeline, PipelineConfig};
use commentary_server::{config::ServerConfig, router, AppState};
use llm_core::ScriptedSource;
use tts_core::{AudioReference, SynthesisError, SynthesisService, TakeHandle, TakeStatus};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

/// Ready immediately with a URL derived from the sentence text.
pub struct InstantSynthesis;

#[async_trait]
impl SynthesisService for InstantSynthesis {
    async fn submit(&self, text: &str) -> Result<TakeHandle, SynthesisError> {
        Ok(TakeHandle(text.split_whitespace().collect::<Vec<_>>().join("-")))
    }

    async fn poll(&self, handle: &TakeHandle) -> Result<TakeStatus, SynthesisError> {
        Ok(TakeStatus::Ready(AudioReference(format!("https://audio.test/{}.wav", handle.0))))
    }

    async fn current_reference(&self, handle: &TakeHandle) -> Result<AudioReference, SynthesisError> {
        Ok(AudioReference(format!("https://audio.test/{}.wav", handle.0)))
    }
}

pub fn create_test_state(
    source: ScriptedSource,
    synthesis: Option<Arc<dyn SynthesisService>>,
) -> AppState {
    let config = ServerConfig::default();
    let pipeline_config = PipelineConfig {
        read_timeout: std::time::Duration::from_secs(2),
        ..config.pipeline_config()
    };
    let pipeline = CommentaryPipeline::new(Arc::new(source), synthesis, pipeline_config);
    AppState::new(pipeline, config)
}

/// Create a test app instance
pub fn create_test_app(source: ScriptedSource) -> Router {
    router(create_test_state(source, None))
}

pub fn move_body(mv: &str) -> String {
    serde_json::json!({
        "fen": START_FEN,
        "move": mv,
        "player": "human",
        "moveHistory": ["e4"]
    })
    .to_string()
}
