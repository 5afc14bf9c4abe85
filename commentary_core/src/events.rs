use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// One outbound record of a commentary stream.
///
/// `Sentence` events arrive in index order. `Audio` events are advisory,
/// may arrive out of order and are matched to their sentence by index.
/// Exactly one `Complete` or `Error` ends the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommentaryEvent {
    Sentence { index: usize, text: String },
    Audio { index: usize, audio_url: String },
    Complete { full_text: String },
    Error { message: String, partial_text: String },
}

impl CommentaryEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommentaryEvent::Complete { .. } | CommentaryEvent::Error { .. })
    }

    /// SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            CommentaryEvent::Sentence { .. } => "sentence",
            CommentaryEvent::Audio { .. } => "audio",
            CommentaryEvent::Complete { .. } => "complete",
            CommentaryEvent::Error { .. } => "error",
        }
    }
}

/// The receiving side went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Sending half of a commentary stream that refuses to emit anything
/// after the terminal event.
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: mpsc::Sender<CommentaryEvent>,
    terminated: bool,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::Sender<CommentaryEvent>) -> Self {
        Self { tx, terminated: false }
    }

    pub(crate) async fn emit(&mut self, event: CommentaryEvent) -> Result<(), Disconnected> {
        if self.terminated {
            debug!(kind = event.kind(), "dropping event after stream termination");
            return Ok(());
        }
        self.terminated = event.is_terminal();
        self.tx.send(event).await.map_err(|_| Disconnected)
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Resolves once the receiver has been dropped.
    pub(crate) async fn closed(&self) {
        self.tx.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = CommentaryEvent::Sentence { index: 0, text: "Nice move.".into() };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "sentence", "index": 0, "text": "Nice move."})
        );

        let event = CommentaryEvent::Complete { full_text: "Nice move.".into() };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "complete", "full_text": "Nice move."})
        );
    }

    #[tokio::test]
    async fn test_sink_ignores_events_after_terminal() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut sink = EventSink::new(tx);

        sink.emit(CommentaryEvent::Complete { full_text: "x".into() }).await.unwrap();
        sink.emit(CommentaryEvent::Sentence { index: 1, text: "late".into() }).await.unwrap();
        sink.emit(CommentaryEvent::Error { message: "late".into(), partial_text: String::new() })
            .await
            .unwrap();
        assert!(sink.is_terminated());
        drop(sink);

        assert_eq!(rx.recv().await, Some(CommentaryEvent::Complete { full_text: "x".into() }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_sink_reports_disconnect() {
        let (tx, rx) = mpsc::channel(8);
        let mut sink = EventSink::new(tx);
        drop(rx);
        sink.closed().await;
        let result = sink.emit(CommentaryEvent::Sentence { index: 0, text: "x".into() }).await;
        assert_eq!(result, Err(Disconnected));
    }
}
