use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{commentary_prompt, GenerationRequest, LlmError, TokenSource, TokenStream};

/// Which OpenAI-compatible backend to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAI => "gpt-3.5-turbo",
            LlmProvider::Ollama => "llama2",
        }
    }
}

/// Connection and sampling parameters for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u16,
    pub temperature: f32,
    pub connect_timeout: Duration,
}

impl LlmConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            base_url: provider.default_base_url().to_string(),
            model: provider.default_model().to_string(),
            api_key: None,
            max_tokens: 100,
            temperature: 0.8,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Read `LLM_PROVIDER`, `LLM_MODEL`, `LLM_BASE_URL`, `OPENAI_API_KEY`,
    /// `LLM_MAX_TOKENS` and `LLM_TEMPERATURE`.
    pub fn from_env() -> Self {
        let provider = match std::env::var("LLM_PROVIDER").as_deref() {
            Ok("ollama") => LlmProvider::Ollama,
            _ => LlmProvider::OpenAI,
        };
        let mut config = Self::new(provider);

        if let Ok(model) = std::env::var("LLM_MODEL") {
            config.model = model;
        }
        if let Ok(url) = std::env::var("LLM_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url.trim().trim_end_matches('/').to_string();
            }
        }
        config.api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(max_tokens) = std::env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()) {
            config.max_tokens = max_tokens;
        }
        if let Some(temperature) = std::env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()) {
            config.temperature = temperature;
        }
        config
    }
}

/// Structure for the OpenAI Chat API request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u16,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// One `data:` payload of a streamed chat completion
#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

pub struct OpenAiClient {
    config: LlmConfig,
    client: Client,
}

impl OpenAiClient {
    /// Create a new client. OpenAI requires an API key; Ollama does not.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.provider == LlmProvider::OpenAI && config.api_key.is_none() {
            return Err(LlmError::Config("OPENAI_API_KEY must be set for the openai provider".into()));
        }
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    /// Send a prompt and stream back the content deltas.
    pub async fn stream_chat(&self, prompt: &str) -> Result<TokenStream, LlmError> {
        let req_body = ChatRequest {
            model: &self.config.model,
            messages: vec![Message { role: "user", content: prompt }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream: true,
        };

        let mut request = self.client.post(self.endpoint()).json(&req_body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Rejected { status: status.as_u16(), body });
        }
        debug!(model = %self.config.model, "chat completion stream opened");

        let mut bytes = response.bytes_stream();
        let stream: TokenStream = Box::pin(try_stream! {
            let mut decoder = SseDecoder::default();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(LlmError::from)?;
                for payload in decoder.push(&chunk) {
                    match parse_payload(&payload)? {
                        Payload::Done => break 'read,
                        Payload::Delta(text) => yield text,
                        Payload::Empty => {}
                    }
                }
            }
        });
        Ok(stream)
    }
}

#[async_trait]
impl TokenSource for OpenAiClient {
    async fn open(&self, request: &GenerationRequest) -> Result<TokenStream, LlmError> {
        info!(
            model = %self.config.model,
            mv = %request.move_notation,
            player = %request.player,
            "requesting commentary"
        );
        let prompt = commentary_prompt(request);
        self.stream_chat(&prompt).await
    }
}

/// Splits an SSE byte stream into `data:` payloads. Bytes are buffered
/// until a full line is available so multi-byte characters split across
/// network chunks decode correctly.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            // blank separators and `:` comments carry nothing
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim().to_string());
            }
        }
        payloads
    }
}

#[derive(Debug, PartialEq)]
enum Payload {
    Delta(String),
    Empty,
    Done,
}

fn parse_payload(data: &str) -> Result<Payload, LlmError> {
    if data == "[DONE]" {
        return Ok(Payload::Done);
    }
    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| LlmError::MalformedChunk(format!("{e}: {data}")))?;
    if let Some(err) = chunk.error {
        return Err(LlmError::Rejected { status: 200, body: err.to_string() });
    }
    let text = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty());
    Ok(text.map(Payload::Delta).unwrap_or(Payload::Empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_reassembles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let payloads = decoder.push(b"tent\":\"Hi\"}}]}\n\ndata: [DONE]\n\n");
        assert_eq!(
            payloads,
            vec![r#"{"choices":[{"delta":{"content":"Hi"}}]}"#.to_string(), "[DONE]".to_string()]
        );
    }

    #[test]
    fn test_decoder_handles_multibyte_split() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"Très\"}}]}\n".as_bytes();
        // split inside the two-byte 'è'
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        assert!(decoder.push(&line[..split]).is_empty());
        let payloads = decoder.push(&line[split..]);
        assert_eq!(parse_payload(&payloads[0]).unwrap(), Payload::Delta("Très".into()));
    }

    #[test]
    fn test_decoder_skips_comments() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b": keep-alive\n\n").is_empty());
    }

    #[test]
    fn test_parse_payload_variants() {
        assert_eq!(parse_payload("[DONE]").unwrap(), Payload::Done);
        assert_eq!(
            parse_payload(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            Payload::Empty
        );
        assert_eq!(
            parse_payload(r#"{"choices":[{"delta":{"content":"Nice"}}]}"#).unwrap(),
            Payload::Delta("Nice".into())
        );
        assert!(matches!(parse_payload("{not json"), Err(LlmError::MalformedChunk(_))));
        assert!(matches!(
            parse_payload(r#"{"error":{"message":"overloaded"}}"#),
            Err(LlmError::Rejected { .. })
        ));
    }

    #[test]
    fn test_openai_requires_api_key() {
        let config = LlmConfig::new(LlmProvider::OpenAI);
        assert!(matches!(OpenAiClient::new(config), Err(LlmError::Config(_))));

        let config = LlmConfig::new(LlmProvider::Ollama);
        let client = OpenAiClient::new(config).unwrap();
        assert_eq!(client.model(), "llama2");
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }
}
