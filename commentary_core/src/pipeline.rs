//! Event merger: the per-request coordinator.
//!
//! One task per request reads fragments from the token source, runs the
//! segmenter inline, emits each sentence as soon as it is cut and hands it
//! to the synthesis dispatcher. Audio results are merged into the same
//! outbound channel as they finish. The run moves through
//! `Streaming -> Draining -> Done` and always ends with exactly one
//! terminal event, unless the client went away first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use llm_core::{GenerationRequest, LlmError, TokenSource};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout_at;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use tts_core::SynthesisService;

use crate::dispatcher::{SynthesisDispatcher, SynthesisPolicy, SynthesisResult};
use crate::events::{CommentaryEvent, Disconnected, EventSink};
use crate::segmenter::{Sentence, SentenceSegmenter};

pub const DEFAULT_FALLBACK_COMMENTARY: &str =
    "That move left me speechless, which is honestly the nicest thing I can say about it.";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hard deadline for the whole token stream, including opening it.
    pub read_timeout: Duration,
    pub synthesis: SynthesisPolicy,
    /// Sent in place of generated commentary when generation fails before
    /// producing anything.
    pub fallback_text: String,
    pub channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            synthesis: SynthesisPolicy::default(),
            fallback_text: DEFAULT_FALLBACK_COMMENTARY.to_string(),
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Streaming,
    Draining,
    Done,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Generation produced nothing; the fallback commentary was sent.
    FellBack,
    Failed,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub outcome: Outcome,
    pub sentences: usize,
    pub audio_ready: usize,
    pub audio_absent: usize,
    pub elapsed: Duration,
}

/// A started run: the outbound events plus the coordinating task.
///
/// Dropping `events` counts as a client disconnect and cancels the run.
pub struct CommentaryRun {
    pub events: ReceiverStream<CommentaryEvent>,
    pub task: JoinHandle<PipelineReport>,
}

impl CommentaryRun {
    /// Wait for the run to finish and return every event it produced.
    pub async fn collect(self) -> Result<(Vec<CommentaryEvent>, PipelineReport), JoinError> {
        let events: Vec<CommentaryEvent> = self.events.collect().await;
        let report = self.task.await?;
        Ok((events, report))
    }
}

/// Shared, request-independent wiring. Cheap to clone; each
/// [`start`](Self::start) owns its own buffers and tasks.
#[derive(Clone)]
pub struct CommentaryPipeline {
    source: Arc<dyn TokenSource>,
    synthesis: Option<Arc<dyn SynthesisService>>,
    config: Arc<PipelineConfig>,
}

impl CommentaryPipeline {
    pub fn new(
        source: Arc<dyn TokenSource>,
        synthesis: Option<Arc<dyn SynthesisService>>,
        config: PipelineConfig,
    ) -> Self {
        Self { source, synthesis, config: Arc::new(config) }
    }

    pub fn synthesis_enabled(&self) -> bool {
        self.synthesis.is_some()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Spawn the coordinator for one request.
    pub fn start(&self, request: GenerationRequest) -> CommentaryRun {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let pipeline = self.clone();
        let task = tokio::spawn(async move { pipeline.run(request, EventSink::new(tx)).await });
        CommentaryRun { events: ReceiverStream::new(rx), task }
    }

    async fn run(self, request: GenerationRequest, sink: EventSink) -> PipelineReport {
        let started = Instant::now();
        let dispatcher = SynthesisDispatcher::new(self.synthesis.clone(), self.config.synthesis);
        let mut merger = Merger::new(&self.config, sink, dispatcher);

        let outcome = match merger.drive(self.source.as_ref(), &request).await {
            Ok(outcome) => outcome,
            Err(Disconnected) => {
                info!(sentences = merger.emitted.len(), "client disconnected, cancelling commentary");
                Outcome::Disconnected
            }
        };
        if outcome != Outcome::Disconnected && !merger.sink.is_terminated() {
            error!("commentary run ended without a terminal event");
        }
        // every exit path joins or cancels outstanding synthesis
        merger.dispatcher.shutdown().await;
        merger.transition(PipelineState::Done);

        let report = PipelineReport {
            outcome,
            sentences: merger.sentences,
            audio_ready: merger.audio_ready,
            audio_absent: merger.audio_absent,
            elapsed: started.elapsed(),
        };
        info!(
            outcome = ?report.outcome,
            sentences = report.sentences,
            audio_ready = report.audio_ready,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "commentary finished"
        );
        report
    }
}

struct Merger<'a> {
    config: &'a PipelineConfig,
    sink: EventSink,
    state: PipelineState,
    segmenter: SentenceSegmenter,
    dispatcher: SynthesisDispatcher,
    /// Texts of sentences already sent to the client.
    emitted: Vec<String>,
    /// Any non-whitespace text arrived from the source.
    received_content: bool,
    sentences: usize,
    audio_ready: usize,
    audio_absent: usize,
}

impl<'a> Merger<'a> {
    fn new(config: &'a PipelineConfig, sink: EventSink, dispatcher: SynthesisDispatcher) -> Self {
        Self {
            config,
            sink,
            state: PipelineState::Streaming,
            segmenter: SentenceSegmenter::new(),
            dispatcher,
            emitted: Vec::new(),
            received_content: false,
            sentences: 0,
            audio_ready: 0,
            audio_absent: 0,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    async fn drive(
        &mut self,
        source: &dyn TokenSource,
        request: &GenerationRequest,
    ) -> Result<Outcome, Disconnected> {
        let deadline = tokio::time::Instant::now() + self.config.read_timeout;

        let opened = tokio::select! {
            biased;
            _ = self.sink.closed() => return Err(Disconnected),
            opened = timeout_at(deadline, source.open(request)) => opened,
        };
        let mut tokens = match opened {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => return self.fail(e).await,
            Err(_) => return self.fail(LlmError::Timeout(self.config.read_timeout)).await,
        };

        loop {
            tokio::select! {
                biased;
                _ = self.sink.closed() => return Err(Disconnected),
                Some(result) = self.dispatcher.next_result(), if self.dispatcher.outstanding() > 0 => {
                    self.on_synthesis(result).await?;
                }
                next = timeout_at(deadline, tokens.next()) => match next {
                    Ok(Some(Ok(fragment))) => self.on_fragment(&fragment).await?,
                    Ok(Some(Err(e))) => return self.fail(e).await,
                    Ok(None) => break,
                    Err(_) => return self.fail(LlmError::Timeout(self.config.read_timeout)).await,
                },
            }
        }

        self.drain().await
    }

    async fn on_fragment(&mut self, fragment: &str) -> Result<(), Disconnected> {
        if !fragment.trim().is_empty() {
            self.received_content = true;
        }
        for sentence in self.segmenter.push(fragment) {
            self.on_sentence(sentence).await?;
        }
        Ok(())
    }

    /// Text goes out first; synthesis is started afterwards and never
    /// delays the sentence event.
    async fn on_sentence(&mut self, sentence: Sentence) -> Result<(), Disconnected> {
        debug!(index = sentence.index, "sentence ready");
        self.sink
            .emit(CommentaryEvent::Sentence {
                index: sentence.index,
                text: sentence.text.clone(),
            })
            .await?;
        self.sentences += 1;
        self.dispatcher.dispatch(&sentence);
        self.emitted.push(sentence.text);
        Ok(())
    }

    async fn on_synthesis(&mut self, result: SynthesisResult) -> Result<(), Disconnected> {
        match result.audio {
            Some(audio) => {
                self.audio_ready += 1;
                self.sink
                    .emit(CommentaryEvent::Audio {
                        index: result.index,
                        audio_url: audio.0,
                    })
                    .await
            }
            None => {
                self.audio_absent += 1;
                if let Some(err) = result.error {
                    debug!(index = result.index, error = %err, "no audio for sentence");
                }
                Ok(())
            }
        }
    }

    async fn drain(&mut self) -> Result<Outcome, Disconnected> {
        self.transition(PipelineState::Draining);
        if let Some(sentence) = self.segmenter.finish() {
            self.on_sentence(sentence).await?;
        }

        if self.emitted.is_empty() {
            warn!("generation ended without any text, using fallback commentary");
            return self.fall_back().await;
        }

        while self.dispatcher.outstanding() > 0 {
            tokio::select! {
                biased;
                _ = self.sink.closed() => return Err(Disconnected),
                result = self.dispatcher.next_result() => match result {
                    Some(result) => self.on_synthesis(result).await?,
                    None => break,
                },
            }
        }

        let full_text = self.emitted.join(" ");
        self.sink.emit(CommentaryEvent::Complete { full_text }).await?;
        Ok(Outcome::Completed)
    }

    async fn fail(&mut self, error: LlmError) -> Result<Outcome, Disconnected> {
        // audio is advisory and nothing may follow the terminal event
        self.dispatcher.shutdown().await;

        if error.is_upstream() && !self.received_content {
            warn!(error = %error, "generation failed before any content, using fallback commentary");
            return self.fall_back().await;
        }

        error!(error = %error, sentences = self.emitted.len(), "commentary generation failed");
        self.sink
            .emit(CommentaryEvent::Error {
                message: format!("Commentary generation failed: {error}"),
                partial_text: self.emitted.join(" "),
            })
            .await?;
        Ok(Outcome::Failed)
    }

    async fn fall_back(&mut self) -> Result<Outcome, Disconnected> {
        let text = self.config.fallback_text.clone();
        self.sink
            .emit(CommentaryEvent::Sentence {
                index: self.segmenter.emitted(),
                text: text.clone(),
            })
            .await?;
        self.sentences += 1;
        self.sink.emit(CommentaryEvent::Complete { full_text: text }).await?;
        Ok(Outcome::FellBack)
    }
}
