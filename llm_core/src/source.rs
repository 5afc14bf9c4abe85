use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::{GenerationRequest, LlmError};

/// Lazy sequence of text fragments for one request, in arrival order.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Anything that can turn a request into a stream of generated text.
///
/// The stream ends naturally when generation is exhausted. Errors may be
/// returned from `open` or yielded mid-stream.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn open(&self, request: &GenerationRequest) -> Result<TokenStream, LlmError>;
}
