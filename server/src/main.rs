use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::response::IntoResponse;
use commentary_core::CommentaryPipeline;
use llm_core::{LlmConfig, OpenAiClient, TokenSource};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tts_core::{DaisysClient, SynthesisConfig, SynthesisService};

use commentary_server::config::ServerConfig;
use commentary_server::{cors_layer, router, AppState};

/// Move requests are small; histories are capped at 1024 entries.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting commentary server...");

    let config = ServerConfig::from_env();

    let llm_config = LlmConfig::from_env();
    info!(provider = ?llm_config.provider, model = %llm_config.model, base_url = %llm_config.base_url, "LLM configured");
    let source: Arc<dyn TokenSource> = Arc::new(OpenAiClient::new(llm_config).context("invalid LLM configuration")?);

    let synthesis: Option<Arc<dyn SynthesisService>> = match SynthesisConfig::from_env() {
        Some(synthesis_config) => {
            let client = DaisysClient::new(synthesis_config).context("failed to create synthesis client")?;
            Some(Arc::new(client))
        }
        None => {
            warn!("DAISYS_EMAIL, DAISYS_PASSWORD or DAISYS_VOICE_ID not set, speech synthesis disabled");
            None
        }
    };

    let pipeline = CommentaryPipeline::new(source, synthesis, config.pipeline_config());
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, llm_timeout={}s, synthesis={}",
        config.port,
        config.rate_limit_per_minute,
        config.llm_timeout_secs,
        pipeline.synthesis_enabled()
    );

    let cors = cors_layer(config.cors_allowed_origins.as_deref());

    // Global key: all clients share one limit, which also behaves behind proxies
    let replenish_ms = 60_000 / u64::from(config.rate_limit_per_minute.max(1));
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(replenish_ms.max(1))
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("invalid rate limit configuration")?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .map_response(IntoResponse::into_response)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .into_inner();

    let port = config.port;
    let app = router(AppState::new(pipeline, config)).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
