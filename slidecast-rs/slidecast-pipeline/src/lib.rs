//! Runs one topic through script drafting, per-slide synthesis, subtitle
//! timing and final assembly.

use futures::{StreamExt, TryStreamExt, stream};
use slidecast_llm::{LlmError, ScriptOptions, compose_request};
use slidecast_media::{
    AudioError, EncodeError, EncodeJob, ImageSaveError, RenderError, Segment, frame_aligned,
    wav_duration_from_bytes,
};
use slidecast_subtitle::{SubtitleError, build_cues, write_webvtt};
use slidecast_utils::{
    Artifact, ArtifactKind, PRESENTATION_FILE_NAME, PROMPT_FILE_NAME, RetryPolicy,
    SUBTITLE_FILE_NAME, Slide, UpstreamError, VIDEO_FILE_NAME, with_retry,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

mod run;
mod stages;

pub use run::{RunDir, allocate_run_dir};
pub use stages::{
    GeneratedImageRenderer, Narrator, ScriptWriter, SlideRenderError, SlideRenderer,
    VideoEncoder, VoiceNarrator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Composing,
    /// The language model request itself, before its answer is decoded.
    Drafting,
    Parsing,
    Synthesis,
    SubtitleBuilding,
    Assembling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Composing => "composing",
            Stage::Drafting => "drafting",
            Stage::Parsing => "parsing",
            Stage::Synthesis => "synthesis",
            Stage::SubtitleBuilding => "subtitle building",
            Stage::Assembling => "assembling",
        };
        f.write_str(name)
    }
}

/// Coarse failure class, one per process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Upstream,
    Format,
    Encoding,
    Io,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Render(#[from] SlideRenderError),
    #[error(transparent)]
    Subtitle(#[from] SubtitleError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("failed to serialize the slide script: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("slide {index} has no {kind:?} artifact")]
    MissingArtifact { index: usize, kind: ArtifactKind },
    #[error("slide {index}: {source}")]
    Slide {
        index: usize,
        #[source]
        source: Box<StageError>,
    },
}

impl StageError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StageError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Llm(LlmError::Upstream(_)) => ErrorKind::Upstream,
            StageError::Llm(LlmError::Format(_)) => ErrorKind::Format,
            StageError::Llm(_) => ErrorKind::Config,
            StageError::Upstream(_) => ErrorKind::Upstream,
            StageError::Audio(_) => ErrorKind::Format,
            StageError::Render(SlideRenderError::Upstream(_)) => ErrorKind::Upstream,
            StageError::Render(SlideRenderError::Card(RenderError::Io { .. })) => ErrorKind::Io,
            StageError::Render(SlideRenderError::Card(_)) => ErrorKind::Encoding,
            StageError::Render(SlideRenderError::Save(ImageSaveError::Io { .. })) => ErrorKind::Io,
            StageError::Render(SlideRenderError::Save(_)) => ErrorKind::Format,
            StageError::Subtitle(SubtitleError::Io { .. }) => ErrorKind::Io,
            StageError::Subtitle(_) => ErrorKind::Format,
            StageError::Encode(_) | StageError::MissingArtifact { .. } => ErrorKind::Encoding,
            StageError::Serialize(_) | StageError::Io { .. } => ErrorKind::Io,
            StageError::Slide { source, .. } => source.kind(),
        }
    }
}

/// A failed run: where it stopped and, once allocated, which directory holds
/// the partial artifacts.
#[derive(Debug, Error)]
#[error("{stage} failed{}: {source}", describe_run(.run))]
pub struct PipelineError {
    pub stage: Stage,
    pub run: Option<RunDir>,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

fn describe_run(run: &Option<RunDir>) -> String {
    match run {
        Some(run) => format!(" for {run}"),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub output_root: PathBuf,
    pub script: ScriptOptions,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// What one slide produced, in the form the encoder consumes. `duration` is
/// the narration length rounded up to whole video frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideArtifacts {
    pub slide_index: usize,
    pub image: PathBuf,
    pub audio: PathBuf,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: RunDir,
    pub slides: Vec<Slide>,
    pub artifacts: Vec<Artifact>,
    pub subtitles: PathBuf,
    pub video: PathBuf,
    pub total_duration: Duration,
}

pub struct Pipeline {
    writer: Box<dyn ScriptWriter>,
    narrator: Box<dyn Narrator>,
    renderer: Box<dyn SlideRenderer>,
    encoder: Box<dyn VideoEncoder>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        writer: Box<dyn ScriptWriter>,
        narrator: Box<dyn Narrator>,
        renderer: Box<dyn SlideRenderer>,
        encoder: Box<dyn VideoEncoder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            writer,
            narrator,
            renderer,
            encoder,
            settings,
        }
    }

    pub async fn execute(&self, topic: &str) -> Result<RunReport, PipelineError> {
        let request = compose_request(topic, &self.settings.script).map_err(|error| PipelineError {
            stage: Stage::Composing,
            run: None,
            source: error.into(),
        })?;

        let run = allocate_run_dir(&self.settings.output_root).map_err(|source| PipelineError {
            stage: Stage::Composing,
            run: None,
            source: StageError::io(
                format!(
                    "failed to create a run directory under {}",
                    self.settings.output_root.display()
                ),
                source,
            ),
        })?;
        info!(run_id = run.id, dir = %run.path.display(), "allocated run directory");

        let fail = |stage: Stage| {
            let run = run.clone();
            move |source: StageError| PipelineError {
                stage,
                run: Some(run),
                source,
            }
        };

        write_file(&run.join(PROMPT_FILE_NAME), topic.trim()).map_err(fail(Stage::Composing))?;

        info!(model = %request.model, "drafting slide script");
        let slides = with_retry(&self.settings.retry, "slide script", || {
            self.writer.draft(&request)
        })
        .await
        .map_err(|error| {
            let stage = match &error {
                LlmError::Format(_) => Stage::Parsing,
                _ => Stage::Drafting,
            };
            fail(stage)(error.into())
        })?;

        if slides.len() != self.settings.script.slide_count {
            warn!(
                requested = self.settings.script.slide_count,
                received = slides.len(),
                "language model returned a different number of slides"
            );
        }
        let script = serde_json::to_string_pretty(&slides)
            .map_err(|error| fail(Stage::Parsing)(error.into()))?;
        write_file(&run.join(PRESENTATION_FILE_NAME), &script).map_err(fail(Stage::Parsing))?;

        let concurrency = self.settings.concurrency.max(1);
        info!(slides = slides.len(), concurrency, "synthesizing slides");
        let mut produced: Vec<SlideArtifacts> = stream::iter(slides.iter())
            .map(|slide| self.produce_slide(slide, &run.path))
            .buffer_unordered(concurrency)
            .try_collect()
            .await
            .map_err(fail(Stage::Synthesis))?;
        produced.sort_by_key(|artifacts| artifacts.slide_index);
        check_complete(&slides, &produced).map_err(fail(Stage::Synthesis))?;

        let durations: Vec<Duration> = produced.iter().map(|slide| slide.duration).collect();
        let subtitles = run.join(SUBTITLE_FILE_NAME);
        let cues = build_cues(&slides, &durations)
            .and_then(|cues| write_webvtt(&subtitles, &cues).map(|()| cues))
            .map_err(|error| fail(Stage::SubtitleBuilding)(error.into()))?;
        debug!(cues = cues.len(), path = %subtitles.display(), "wrote subtitles");

        let job = EncodeJob {
            segments: produced
                .iter()
                .map(|slide| Segment {
                    image: slide.image.clone(),
                    audio: slide.audio.clone(),
                    duration: slide.duration,
                })
                .collect(),
            subtitles: subtitles.clone(),
            output: run.join(VIDEO_FILE_NAME),
            width: self.settings.frame_width,
            height: self.settings.frame_height,
        };
        let video = self
            .encoder
            .encode(&job)
            .await
            .map_err(|error| fail(Stage::Assembling)(error.into()))?;

        let total_duration: Duration = durations.iter().sum();
        info!(
            run_id = run.id,
            video = %video.display(),
            seconds = total_duration.as_secs_f64(),
            "run complete"
        );

        let artifacts = produced
            .iter()
            .flat_map(|slide| {
                [
                    Artifact::in_dir(&run.path, slide.slide_index, ArtifactKind::Image),
                    Artifact::in_dir(&run.path, slide.slide_index, ArtifactKind::Audio),
                ]
            })
            .collect();

        Ok(RunReport {
            run,
            slides,
            artifacts,
            subtitles,
            video,
            total_duration,
        })
    }

    /// Narrate and render one slide. Both calls run concurrently; either
    /// failing fails the slide.
    async fn produce_slide(&self, slide: &Slide, run_dir: &Path) -> Result<SlideArtifacts, StageError> {
        let audio = Artifact::in_dir(run_dir, slide.index, ArtifactKind::Audio);
        let image = Artifact::in_dir(run_dir, slide.index, ArtifactKind::Image);
        let retry = &self.settings.retry;

        let narration = async {
            let bytes = with_retry(retry, "narration", || self.narrator.narrate(&slide.narration)).await?;
            let spoken = wav_duration_from_bytes(&bytes, &audio.path.to_string_lossy())?;
            tokio::fs::write(&audio.path, &bytes)
                .await
                .map_err(|source| {
                    StageError::io(format!("failed to write {}", audio.path.display()), source)
                })?;
            // Subtitles and the encoder share this frame-aligned length.
            Ok::<_, StageError>(frame_aligned(spoken))
        };
        let rendering = async {
            with_retry(retry, "slide image", || self.renderer.render(slide, &image.path)).await?;
            Ok::<_, StageError>(())
        };

        let (duration, ()) = tokio::try_join!(narration, rendering).map_err(|source| StageError::Slide {
            index: slide.index,
            source: Box::new(source),
        })?;

        debug!(
            slide = slide.index,
            duration_ms = duration.as_millis() as u64,
            "slide ready"
        );
        Ok(SlideArtifacts {
            slide_index: slide.index,
            image: image.path,
            audio: audio.path,
            duration,
        })
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), StageError> {
    std::fs::write(path, contents)
        .map_err(|source| StageError::io(format!("failed to write {}", path.display()), source))
}

/// Every slide must have both of its artifacts on disk before assembly.
fn check_complete(slides: &[Slide], produced: &[SlideArtifacts]) -> Result<(), StageError> {
    for slide in slides {
        let Some(artifacts) = produced
            .iter()
            .find(|artifacts| artifacts.slide_index == slide.index)
        else {
            return Err(StageError::MissingArtifact {
                index: slide.index,
                kind: ArtifactKind::Audio,
            });
        };
        if !artifacts.audio.is_file() {
            return Err(StageError::MissingArtifact {
                index: slide.index,
                kind: ArtifactKind::Audio,
            });
        }
        if !artifacts.image.is_file() {
            return Err(StageError::MissingArtifact {
                index: slide.index,
                kind: ArtifactKind::Image,
            });
        }
    }
    Ok(())
}
