//! HTTP surface for move commentary.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod validation;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use commentary_core::CommentaryPipeline;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::metrics::AppMetrics;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: CommentaryPipeline,
    pub metrics: Arc<AppMetrics>,
    pub request_count: Arc<AtomicU64>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(pipeline: CommentaryPipeline, config: ServerConfig) -> Self {
        Self {
            pipeline,
            metrics: Arc::new(AppMetrics::new()),
            request_count: Arc::new(AtomicU64::new(0)),
            config,
        }
    }
}

/// Request ID middleware for tracing
pub async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let header = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = header.clone() {
        request.headers_mut().insert("x-request-id", value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Origin allowed when `CORS_ALLOWED_ORIGINS` is unset: the local frontend.
pub const DEV_ALLOWED_ORIGIN: &str = "http://localhost:3000";

pub fn cors_layer(allowed_origins: Option<&[String]>) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        if allowed_origins.is_some() {
            warn!("CORS_ALLOWED_ORIGINS has no valid origins, allowing {} only", DEV_ALLOWED_ORIGIN);
        } else {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing {} only (development mode)", DEV_ALLOWED_ORIGIN);
        }
        origins.push(HeaderValue::from_static(DEV_ALLOWED_ORIGIN));
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false)
}

/// Application routes. Transport layers (rate limit, timeout, CORS) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let commentary_api = Router::new()
        .route("/move", post(handlers::move_commentary))
        .route("/move/stream", post(handlers::move_commentary_stream));

    Router::new()
        .route("/health", get(handlers::health_check))
        // metrics should be protected in production
        .route("/metrics", get(handlers::metrics_endpoint))
        .nest("/api", commentary_api)
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}
