//! Deterministic [`TokenSource`] for tests.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;

use crate::{GenerationRequest, LlmError, TokenSource, TokenStream};

/// One step of a scripted generation.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Fragment(String),
    Fail(LlmError),
    Delay(Duration),
    /// Never yields again.
    Hang,
}

/// Replays the same script on every `open`. If `open_error` is set the
/// stream is never produced.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
    open_error: Option<LlmError>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps, open_error: None }
    }

    pub fn fragments<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(fragments.into_iter().map(|f| ScriptStep::Fragment(f.into())).collect())
    }

    pub fn failing_open(error: LlmError) -> Self {
        Self { steps: Vec::new(), open_error: Some(error) }
    }
}

#[async_trait]
impl TokenSource for ScriptedSource {
    async fn open(&self, _request: &GenerationRequest) -> Result<TokenStream, LlmError> {
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }
        let steps = self.steps.clone();
        Ok(Box::pin(stream! {
            for step in steps {
                match step {
                    ScriptStep::Fragment(text) => yield Ok(text),
                    ScriptStep::Fail(err) => {
                        yield Err(err);
                        break;
                    }
                    ScriptStep::Delay(d) => tokio::time::sleep(d).await,
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        }))
    }
}
