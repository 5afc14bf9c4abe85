use std::convert::Infallible;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::Utc;
use commentary_core::{CommentaryEvent, CommentaryRun};
use futures_util::stream::Stream;
use llm_core::{GenerationRequest, Player};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::metrics::{DetailedMetricsResponse, EndpointMetricsResponse, SystemMetrics};
use crate::validation::validate_move_request;
use crate::AppState;

const SERVICE_NAME: &str = "Roasted Chessnuts";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub fen: String,
    #[serde(rename = "move")]
    pub move_notation: String,
    pub player: Player,
    #[serde(default)]
    pub move_history: Vec<String>,
}

impl MoveRequest {
    fn validate(&self) -> Result<(), ApiError> {
        validate_move_request(&self.fen, &self.move_notation, &self.move_history)
    }

    fn into_generation_request(self) -> GenerationRequest {
        GenerationRequest::new(self.move_notation, self.player, self.fen).with_history(self.move_history)
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    pub text: String,
    pub audio_url: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveResponse {
    pub commentary: String,
    /// Audio for the first sentence, if any.
    pub audio_url: Option<String>,
    pub segments: Vec<Segment>,
}

impl MoveResponse {
    /// Fold a finished event stream into one response.
    pub fn from_events(events: Vec<CommentaryEvent>) -> Result<Self, ApiError> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut commentary = None;

        for event in events {
            match event {
                CommentaryEvent::Sentence { index, text } => {
                    segments.push(Segment { index, text, audio_url: None })
                }
                CommentaryEvent::Audio { index, audio_url } => {
                    match segments.iter_mut().find(|s| s.index == index) {
                        Some(segment) => segment.audio_url = Some(audio_url),
                        None => debug!(index, "audio for unknown sentence"),
                    }
                }
                CommentaryEvent::Complete { full_text } => commentary = Some(full_text),
                CommentaryEvent::Error { message, .. } => return Err(ApiError::Upstream(message)),
            }
        }

        let commentary = commentary
            .ok_or_else(|| ApiError::InternalError("commentary stream ended without a result".into()))?;
        segments.sort_by_key(|s| s.index);
        let audio_url = segments.first().and_then(|s| s.audio_url.clone());
        Ok(Self { commentary, audio_url, segments })
    }
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": SERVICE_NAME }))
}

/// Runs the pipeline to completion and answers with the whole commentary.
pub async fn move_commentary(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<MoveResponse>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let endpoint = &state.metrics.move_endpoint;

    if let Err(e) = req.validate() {
        endpoint.record_error();
        return Err(e);
    }
    info!(mv = %req.move_notation, player = %req.player, "move commentary requested");

    let (events, report) = state.pipeline.start(req.into_generation_request()).collect().await?;
    state.metrics.commentary.record(&report);

    let response = MoveResponse::from_events(events);
    endpoint.record_request(started.elapsed().as_millis() as u64);
    if response.is_err() {
        endpoint.record_error();
    }
    response.map(Json)
}

/// Streams commentary events as Server-Sent Events, one record per event.
pub async fn move_commentary_stream(
    State(state): State<AppState>,
    Json(req): Json<MoveRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>, ApiError> {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = req.validate() {
        state.metrics.stream_endpoint.record_error();
        return Err(e);
    }
    info!(mv = %req.move_notation, player = %req.player, "streaming move commentary");

    let CommentaryRun { events, task } = state.pipeline.start(req.into_generation_request());

    let metrics = state.metrics.clone();
    tokio::spawn(async move {
        match task.await {
            Ok(report) => {
                metrics.stream_endpoint.record_request(report.elapsed.as_millis() as u64);
                if report.outcome == commentary_core::Outcome::Failed {
                    metrics.stream_endpoint.record_error();
                }
                metrics.commentary.record(&report);
            }
            Err(e) => {
                warn!("commentary task failed: {}", e);
                metrics.stream_endpoint.record_error();
            }
        }
    });

    let stream = events.filter_map(|event| match serde_json::to_string(&event) {
        Ok(json) => Some(Ok(Event::default().event(event.kind()).data(json))),
        Err(e) => {
            warn!("Failed to serialize commentary event: {}", e);
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping")))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    let request_count = state.request_count.load(Ordering::Relaxed);
    let system = SystemMetrics::collect(request_count, state.metrics.uptime_seconds());

    Json(DetailedMetricsResponse {
        timestamp: Utc::now(),
        system,
        endpoints: EndpointMetricsResponse {
            move_endpoint: state.metrics.move_endpoint.stats(),
            move_stream: state.metrics.stream_endpoint.stats(),
        },
        commentary: state.metrics.commentary.snapshot(),
    })
}
