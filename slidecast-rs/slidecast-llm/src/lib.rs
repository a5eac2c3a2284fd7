use reqwest::Client;
use serde::{Deserialize, Serialize};
use slidecast_utils::{
    MAX_SLIDES, Slide, Transient, UpstreamError, retry_after_from_headers, trimmed_or_none,
};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

mod script;

pub use script::{FormatError, parse_completion, parse_slides};

pub const CHAT_SERVICE: &str = "language model";
pub const IMAGE_SERVICE: &str = "image generation";

const SYSTEM_PROMPT: &str = r#"You write slide presentations that will be turned into a narrated video.
Tell the topic as a story, one idea per slide.
Answer with JSON only: an array of slide objects, without comments or extra text.
Every slide object has these string keys:
  "title": a short heading shown on the slide,
  "body": one to three short sentences shown under the heading,
  "narration": what the narrator says while the slide is on screen,
  "image": a description of a background picture for the slide.

Example for a talk about a new phone:
[
  {"title": "Meet the new phone", "body": "Launching this summer.", "narration": "Hello. Today we talk about the new phone.", "image": "A phone on a desk against a black background"},
  {"title": "Thank you", "body": "Questions welcome.", "narration": "Thank you for watching.", "image": "A thank you message on a white background"}
]"#;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("topic is empty")]
    EmptyTopic,
    #[error("slide count {requested} is outside the supported range 1..={max}")]
    InvalidSlideCount { requested: usize, max: usize },
    #[error("language model name is empty")]
    EmptyModel,
    #[error("OpenAI API key is missing")]
    MissingApiKey,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// What the user asked for, besides the topic itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOptions {
    pub model: String,
    pub slide_count: usize,
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub n: u32,
    pub size: String,
    pub response_format: &'static str,
}

impl ImageRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            n: 1,
            size: size.into(),
            response_format: "b64_json",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

/// Build the chat completion request asking for a slide script about `topic`.
///
/// # Errors
///
/// Fails locally, before anything is sent, when the topic or model name is
/// blank or the slide count cannot be represented in two-digit file names.
pub fn compose_request(topic: &str, options: &ScriptOptions) -> Result<ChatRequest, LlmError> {
    let topic = trimmed_or_none(Some(topic)).ok_or(LlmError::EmptyTopic)?;
    let model = trimmed_or_none(Some(&options.model)).ok_or(LlmError::EmptyModel)?;
    if options.slide_count == 0 || options.slide_count > MAX_SLIDES {
        return Err(LlmError::InvalidSlideCount {
            requested: options.slide_count,
            max: MAX_SLIDES,
        });
    }

    let mut instructions = format!(
        "Create exactly {} slides about the following topic.",
        options.slide_count
    );
    if let Some(style) = trimmed_or_none(options.style.as_deref()) {
        instructions.push_str(&format!(" Presentation style: {style}."));
    }

    Ok(ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage::new("system", SYSTEM_PROMPT),
            ChatMessage::new("user", format!("{instructions}\n\n{topic}")),
        ],
    })
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        matches!(self, LlmError::Upstream(error) if error.is_retryable())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::Upstream(error) => error.retry_after(),
            _ => None,
        }
    }

    fn give_up(self, attempts: u32) -> Self {
        match self {
            LlmError::Upstream(error) => LlmError::Upstream(error.give_up(attempts)),
            other => other,
        }
    }
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Client for an OpenAI-compatible chat completions and image generation API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(LlmError::Client)?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.trim().to_string(),
        })
    }

    /// Send one chat completion request. Transient failures are reported, not retried.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let url = endpoint_url(&self.base_url, "chat/completions");
        debug!(%url, model = %request.model, "requesting slide script");
        let body = self.post_json(CHAT_SERVICE, &url, request).await?;
        let response = serde_json::from_str(&body).map_err(FormatError::Envelope)?;
        Ok(response)
    }

    /// Request a script and decode it into slides.
    pub async fn draft_slides(&self, request: &ChatRequest) -> Result<Vec<Slide>, LlmError> {
        let response = self.complete(request).await?;
        Ok(parse_completion(&response)?)
    }

    /// Generate one image and return it base64 encoded.
    pub async fn generate_image(&self, request: &ImageRequest) -> Result<String, UpstreamError> {
        let url = endpoint_url(&self.base_url, "images/generations");
        debug!(%url, model = %request.model, "requesting slide image");
        let body = self.post_json(IMAGE_SERVICE, &url, request).await?;
        let response: ImageResponse = serde_json::from_str(&body).map_err(|error| {
            UpstreamError::fatal(IMAGE_SERVICE, format!("undecodable response: {error}"))
        })?;

        response
            .data
            .into_iter()
            .find_map(|datum| datum.b64_json)
            .filter(|encoded| !encoded.trim().is_empty())
            .ok_or_else(|| UpstreamError::fatal(IMAGE_SERVICE, "response contained no image data"))
    }

    async fn post_json<B>(&self, service: &'static str, url: &str, body: &B) -> Result<String, UpstreamError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|error| UpstreamError::from_transport(service, &error))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(
                service,
                status.as_u16(),
                retry_after,
                &body,
            ));
        }

        response
            .text()
            .await
            .map_err(|error| UpstreamError::from_transport(service, &error))
    }
}
