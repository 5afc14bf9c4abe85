use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, redirect, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{AudioReference, SynthesisConfig, SynthesisError, SynthesisService, TakeHandle, TakeStatus};

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Serialize)]
struct GenerateTakeRequest<'a> {
    voice_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct TakeResponse {
    take_id: String,
    status: String,
}

/// Progress of a take as reported by the service.
#[derive(Debug, PartialEq, Eq)]
enum TakeState {
    InProgress,
    Ready,
    Failed,
}

fn take_state(status: &str) -> TakeState {
    match status.to_ascii_lowercase().as_str() {
        "ready" => TakeState::Ready,
        "error" | "timeout" => TakeState::Failed,
        // waiting, started, progress_25 ... progress_75
        _ => TakeState::InProgress,
    }
}

/// Client for the Daisys Speak take API.
///
/// Logs in lazily and caches the access token; a `401` clears the token
/// and the request is retried once after logging in again.
pub struct DaisysClient {
    config: SynthesisConfig,
    client: Client,
    token: RwLock<Option<String>>,
}

impl DaisysClient {
    pub fn new(config: SynthesisConfig) -> Result<Self, SynthesisError> {
        // redirects are read, not followed: the wav endpoint redirects to the
        // playable signed URL we hand out
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()?;
        info!(voice_id = %config.voice_id, "Daisys synthesis client created");
        Ok(Self {
            config,
            client,
            token: RwLock::new(None),
        })
    }

    fn takes_url(&self) -> String {
        format!("{}/takes", self.config.base_url)
    }

    fn take_url(&self, take_id: &str) -> String {
        format!("{}/takes/{}", self.config.base_url, take_id)
    }

    fn wav_url(&self, take_id: &str) -> String {
        format!("{}/takes/{}/wav", self.config.base_url, take_id)
    }

    async fn login(&self) -> Result<String, SynthesisError> {
        let response = self
            .client
            .post(format!("{}/login", self.config.auth_url))
            .json(&LoginRequest {
                email: &self.config.email,
                password: &self.config.password,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Auth(format!("login returned {status}: {body}")));
        }
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::InvalidResponse(format!("login response: {e}")))?;
        debug!("Daisys login succeeded");
        Ok(login.access_token)
    }

    async fn access_token(&self) -> Result<String, SynthesisError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        let mut guard = self.token.write().await;
        // another task may have logged in while we waited for the lock
        if let Some(token) = guard.clone() {
            return Ok(token);
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    /// Forget `rejected` unless another task has already replaced it.
    async fn invalidate_token(&self, rejected: &str) {
        let mut guard = self.token.write().await;
        if guard.as_deref() == Some(rejected) {
            *guard = None;
        }
    }

    async fn send_authorized<F>(&self, build: F) -> Result<Response, SynthesisError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let token = self.access_token().await?;
        let response = build(&self.client).bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Daisys token rejected, logging in again");
        self.invalidate_token(&token).await;
        let token = self.access_token().await?;
        Ok(build(&self.client).bearer_auth(&token).send().await?)
    }

    async fn take_json(response: Response) -> Result<TakeResponse, SynthesisError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Rejected { status: status.as_u16(), body });
        }
        response
            .json()
            .await
            .map_err(|e| SynthesisError::InvalidResponse(format!("take response: {e}")))
    }
}

#[async_trait]
impl SynthesisService for DaisysClient {
    async fn submit(&self, text: &str) -> Result<TakeHandle, SynthesisError> {
        let url = format!("{}/generate", self.takes_url());
        let body = GenerateTakeRequest {
            voice_id: &self.config.voice_id,
            text,
        };
        let response = self.send_authorized(|c| c.post(&url).json(&body)).await?;
        let take = Self::take_json(response).await?;
        debug!(take_id = %take.take_id, status = %take.status, "take submitted");
        Ok(TakeHandle(take.take_id))
    }

    async fn poll(&self, handle: &TakeHandle) -> Result<TakeStatus, SynthesisError> {
        let url = self.take_url(&handle.0);
        let response = self.send_authorized(|c| c.get(&url)).await?;
        let take = Self::take_json(response).await?;

        match take_state(&take.status) {
            TakeState::InProgress => Ok(TakeStatus::Pending),
            TakeState::Ready => self.current_reference(handle).await.map(TakeStatus::Ready),
            TakeState::Failed => Err(SynthesisError::TakeFailed {
                take_id: take.take_id,
                status: take.status,
            }),
        }
    }

    /// Only the signed redirect target of `/wav` is playable. A plain 2xx
    /// means no such link exists yet.
    async fn current_reference(&self, handle: &TakeHandle) -> Result<AudioReference, SynthesisError> {
        let url = self.wav_url(&handle.0);
        let response = self.send_authorized(|c| c.get(&url)).await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| SynthesisError::InvalidResponse("redirect without location".into()))?;
            return Ok(AudioReference(location.to_string()));
        }
        if status.is_success() {
            // the API URL itself needs our bearer token, so it is not playable
            return Err(SynthesisError::InvalidResponse(format!(
                "take {} has no playable audio link yet",
                handle.0
            )));
        }
        let body = response.text().await.unwrap_or_default();
        Err(SynthesisError::Rejected { status: status.as_u16(), body })
    }
}
