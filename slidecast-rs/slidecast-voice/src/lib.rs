//! Client for a FakeYou-style text-to-speech service.
//!
//! Synthesis is a job: submit the text, poll the job until it settles, then
//! download the finished WAV from the CDN.

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use slidecast_utils::{Transient, UpstreamError, retry_after_from_headers};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const VOICE_SERVICE: &str = "voice synthesis";
pub const MODEL_TOKEN_PREFIX: &str = "TM:";

#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("narration text is empty")]
    EmptyText,
    #[error("unknown speaker `{0}`; run with --list-voices to see the available voices")]
    UnknownSpeaker(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl Transient for VoiceError {
    fn is_transient(&self) -> bool {
        matches!(self, VoiceError::Upstream(error) if error.is_retryable())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            VoiceError::Upstream(error) => error.retry_after(),
            _ => None,
        }
    }

    fn give_up(self, attempts: u32) -> Self {
        match self {
            VoiceError::Upstream(error) => VoiceError::Upstream(error.give_up(attempts)),
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoiceClientOptions {
    pub base_url: String,
    pub cdn_url: String,
    pub api_token: Option<String>,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub request_timeout: Duration,
}

/// One voice offered by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Voice {
    pub model_token: String,
    pub title: String,
}

#[derive(Debug, Deserialize)]
struct VoiceListResponse {
    #[serde(default)]
    models: Vec<Voice>,
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    tts_model_token: &'a str,
    uuid_idempotency_token: String,
    inference_text: &'a str,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    success: bool,
    inference_job_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobResponse {
    state: JobState,
}

#[derive(Debug, Deserialize)]
struct JobState {
    status: JobStatus,
    maybe_public_bucket_wav_audio_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Started,
    AttemptFailed,
    CompleteSuccess,
    CompleteFailure,
    Dead,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone)]
pub struct VoiceClient {
    http: Client,
    options: VoiceClientOptions,
}

impl VoiceClient {
    pub fn new(options: VoiceClientOptions) -> Result<Self, VoiceError> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(VoiceError::Client)?;
        Ok(Self { http, options })
    }

    pub async fn list_voices(&self) -> Result<Vec<Voice>, UpstreamError> {
        let url = self.api_url("tts/list");
        let body = self.send(self.http.get(&url)).await?;
        let list: VoiceListResponse = decode(&body)?;
        Ok(list.models)
    }

    /// Map a voice title (case-insensitive) or a raw model token to a model token.
    pub async fn resolve_speaker(&self, speaker: &str) -> Result<String, VoiceError> {
        let speaker = speaker.trim();
        if speaker.starts_with(MODEL_TOKEN_PREFIX) {
            return Ok(speaker.to_string());
        }

        let voices = self.list_voices().await?;
        find_voice(&voices, speaker)
            .map(|voice| voice.model_token.clone())
            .ok_or_else(|| VoiceError::UnknownSpeaker(speaker.to_string()))
    }

    /// Synthesize `text` with the voice `model_token` and return the WAV bytes.
    pub async fn synthesize(&self, text: &str, model_token: &str) -> Result<Vec<u8>, UpstreamError> {
        let job_token = self.submit(text, model_token).await?;
        let audio_path = self.wait_for_job(&job_token).await?;
        let url = format!(
            "{}/{}",
            self.options.cdn_url.trim_end_matches('/'),
            audio_path.trim_start_matches('/')
        );
        debug!(%url, "downloading narration audio");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|error| UpstreamError::from_transport(VOICE_SERVICE, &error))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(VOICE_SERVICE, status.as_u16(), None, &body));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|error| UpstreamError::from_transport(VOICE_SERVICE, &error))?;
        Ok(bytes.to_vec())
    }

    async fn submit(&self, text: &str, model_token: &str) -> Result<String, UpstreamError> {
        if text.trim().is_empty() {
            return Err(UpstreamError::fatal(VOICE_SERVICE, VoiceError::EmptyText.to_string()));
        }

        let request = InferenceRequest {
            tts_model_token: model_token,
            uuid_idempotency_token: Uuid::new_v4().to_string(),
            inference_text: text,
        };
        let url = self.api_url("tts/inference");
        let body = self.send(self.http.post(&url).json(&request)).await?;
        let response: InferenceResponse = decode(&body)?;

        match response.inference_job_token {
            Some(token) if response.success => {
                debug!(job = %token, "submitted narration job");
                Ok(token)
            }
            _ => Err(UpstreamError::fatal(
                VOICE_SERVICE,
                format!("inference request was not accepted: {body}"),
            )),
        }
    }

    async fn wait_for_job(&self, job_token: &str) -> Result<String, UpstreamError> {
        let url = self.api_url(&format!("tts/job/{job_token}"));

        for poll in 1..=self.options.max_polls.max(1) {
            let body = self.send(self.http.get(&url)).await?;
            let job: JobResponse = decode(&body)?;

            match job.state.status {
                JobStatus::CompleteSuccess => {
                    info!(job = %job_token, polls = poll, "narration job finished");
                    return job.state.maybe_public_bucket_wav_audio_path.ok_or_else(|| {
                        UpstreamError::fatal(VOICE_SERVICE, "finished job has no audio path")
                    });
                }
                JobStatus::CompleteFailure | JobStatus::Dead => {
                    return Err(UpstreamError::fatal(
                        VOICE_SERVICE,
                        format!("job {job_token} ended with status {:?}", job.state.status),
                    ));
                }
                status => {
                    debug!(job = %job_token, ?status, poll, "narration job still running");
                    tokio::time::sleep(self.options.poll_interval).await;
                }
            }
        }

        Err(UpstreamError::retryable(
            VOICE_SERVICE,
            format!(
                "job {job_token} did not finish after {} polls",
                self.options.max_polls
            ),
        ))
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, UpstreamError> {
        let request = match self.options.api_token.as_deref() {
            Some(token) if !token.trim().is_empty() => request.header("Authorization", token.trim()),
            _ => request,
        };

        let response = request
            .send()
            .await
            .map_err(|error| UpstreamError::from_transport(VOICE_SERVICE, &error))?;
        let status = response.status();
        let retry_after = retry_after_from_headers(response.headers());
        let body = response
            .text()
            .await
            .map_err(|error| UpstreamError::from_transport(VOICE_SERVICE, &error))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(UpstreamError::from_status(
                VOICE_SERVICE,
                status.as_u16(),
                retry_after,
                &body,
            ))
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.options.base_url.trim_end_matches('/'), path)
    }
}

pub fn find_voice<'a>(voices: &'a [Voice], title: &str) -> Option<&'a Voice> {
    let wanted = title.trim();
    voices
        .iter()
        .find(|voice| voice.title.trim().eq_ignore_ascii_case(wanted))
}

fn decode<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, UpstreamError> {
    serde_json::from_str(body)
        .map_err(|error| UpstreamError::fatal(VOICE_SERVICE, format!("undecodable response: {error}")))
}

#[cfg(test)]
mod tests;
