use async_trait::async_trait;
use slidecast_llm::{ChatRequest, ImageRequest, LlmError, OpenAiClient};
use slidecast_media::{
    EncodeError, EncodeJob, FfmpegEncoder, ImageSaveError, RenderError, SaveImageOptions,
    TextCardRenderer, save_base64_image,
};
use slidecast_utils::{Slide, Transient, UpstreamError};
use slidecast_voice::VoiceClient;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Drafts the slide script for a composed request.
#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn draft(&self, request: &ChatRequest) -> Result<Vec<Slide>, LlmError>;
}

/// Turns narration text into WAV bytes.
#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, text: &str) -> Result<Vec<u8>, UpstreamError>;
}

/// Writes one slide image to `destination`.
#[async_trait]
pub trait SlideRenderer: Send + Sync {
    async fn render(&self, slide: &Slide, destination: &Path) -> Result<(), SlideRenderError>;
}

#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError>;
}

#[derive(Debug, Error)]
pub enum SlideRenderError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Card(#[from] RenderError),
    #[error(transparent)]
    Save(#[from] ImageSaveError),
}

impl Transient for SlideRenderError {
    fn is_transient(&self) -> bool {
        matches!(self, SlideRenderError::Upstream(error) if error.is_retryable())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SlideRenderError::Upstream(error) => error.retry_after(),
            _ => None,
        }
    }

    fn give_up(self, attempts: u32) -> Self {
        match self {
            SlideRenderError::Upstream(error) => SlideRenderError::Upstream(error.give_up(attempts)),
            other => other,
        }
    }
}

#[async_trait]
impl ScriptWriter for OpenAiClient {
    async fn draft(&self, request: &ChatRequest) -> Result<Vec<Slide>, LlmError> {
        self.draft_slides(request).await
    }
}

/// A voice client bound to one resolved speaker.
#[derive(Debug, Clone)]
pub struct VoiceNarrator {
    client: VoiceClient,
    model_token: String,
}

impl VoiceNarrator {
    pub fn new(client: VoiceClient, model_token: impl Into<String>) -> Self {
        Self {
            client,
            model_token: model_token.into(),
        }
    }
}

#[async_trait]
impl Narrator for VoiceNarrator {
    async fn narrate(&self, text: &str) -> Result<Vec<u8>, UpstreamError> {
        self.client.synthesize(text, &self.model_token).await
    }
}

#[async_trait]
impl SlideRenderer for TextCardRenderer {
    async fn render(&self, slide: &Slide, destination: &Path) -> Result<(), SlideRenderError> {
        TextCardRenderer::render(self, slide, destination).await?;
        Ok(())
    }
}

/// Asks the image generation endpoint for a picture of each slide.
#[derive(Debug, Clone)]
pub struct GeneratedImageRenderer {
    client: OpenAiClient,
    model: String,
    size: String,
}

impl GeneratedImageRenderer {
    pub fn new(client: OpenAiClient, model: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            size: size.into(),
        }
    }
}

#[async_trait]
impl SlideRenderer for GeneratedImageRenderer {
    async fn render(&self, slide: &Slide, destination: &Path) -> Result<(), SlideRenderError> {
        let request = ImageRequest::new(&self.model, slide.image_description(), &self.size);
        let encoded = self.client.generate_image(&request).await?;

        let output_dir = destination.parent().unwrap_or(Path::new("."));
        let file_stem = destination
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("slide_{:02}", slide.index));
        save_base64_image(
            &encoded,
            SaveImageOptions {
                file_stem: &file_stem,
                output_dir,
            },
        )?;
        Ok(())
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError> {
        FfmpegEncoder::encode(self, job).await
    }
}
