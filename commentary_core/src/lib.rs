//! Streaming commentary pipeline.
//!
//! Token source → [`SentenceSegmenter`] → concurrent
//! [`SynthesisDispatcher`] units → event merger ([`CommentaryPipeline`]) →
//! one ordered stream of [`CommentaryEvent`]s per request.
pub mod dispatcher;
pub mod events;
pub mod pipeline;
pub mod segmenter;

pub use dispatcher::{SynthesisDispatcher, SynthesisPolicy, SynthesisResult};
pub use events::{CommentaryEvent, Disconnected};
pub use pipeline::{
    CommentaryPipeline, CommentaryRun, Outcome, PipelineConfig, PipelineReport, PipelineState,
    DEFAULT_FALLBACK_COMMENTARY,
};
pub use segmenter::{segment_all, Sentence, SentenceSegmenter};
