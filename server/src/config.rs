// Server and pipeline settings read from the environment

use std::time::Duration;

use commentary_core::{PipelineConfig, SynthesisPolicy, DEFAULT_FALLBACK_COMMENTARY};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Overall deadline for reading the token stream.
    pub llm_timeout_secs: u64,
    pub synthesis_timeout_ms: u64,
    pub synthesis_poll_ms: u64,
    pub fallback_commentary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            cors_allowed_origins: None,
            llm_timeout_secs: 10,
            synthesis_timeout_ms: 2000,
            synthesis_poll_ms: 250,
            fallback_commentary: DEFAULT_FALLBACK_COMMENTARY.to_string(),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        let fallback_commentary = std::env::var("FALLBACK_COMMENTARY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.fallback_commentary);

        Self {
            port: env_or("PORT", defaults.port),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins,
            llm_timeout_secs: env_or("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            synthesis_timeout_ms: env_or("SYNTHESIS_TIMEOUT_MS", defaults.synthesis_timeout_ms),
            synthesis_poll_ms: env_or("SYNTHESIS_POLL_MS", defaults.synthesis_poll_ms),
            fallback_commentary,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            read_timeout: self.llm_timeout(),
            synthesis: SynthesisPolicy {
                timeout: Duration::from_millis(self.synthesis_timeout_ms),
                // a zero period would make the readiness ticker panic
                poll_interval: Duration::from_millis(self.synthesis_poll_ms.max(1)),
                ..SynthesisPolicy::default()
            },
            fallback_text: self.fallback_commentary.clone(),
            ..PipelineConfig::default()
        }
    }
}
