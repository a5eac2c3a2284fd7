use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::process::{ToolError, run_tool};

pub const FRAME_RATE: u32 = 25;
const AUDIO_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("nothing to encode: the job has no segments")]
    EmptyJob,
    #[error("encoder input {0} does not exist")]
    MissingInput(PathBuf),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// One slide on the timeline: its still image shown for the length of its narration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub image: PathBuf,
    pub audio: PathBuf,
    pub duration: Duration,
}

/// Round `duration` up to a whole number of video frames.
///
/// A looped still only covers whole frames, so slide lengths and cue lengths
/// must both use this value for captions to stay on their slides.
pub fn frame_aligned(duration: Duration) -> Duration {
    let frame_nanos = 1_000_000_000u128 / u128::from(FRAME_RATE);
    let frames = duration.as_nanos().div_ceil(frame_nanos);
    let nanos = frames * frame_nanos;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Everything the encoder needs, segments already in presentation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    pub segments: Vec<Segment>,
    pub subtitles: PathBuf,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl EncodeJob {
    fn inputs(&self) -> impl Iterator<Item = &Path> {
        self.segments
            .iter()
            .flat_map(|segment| [segment.image.as_path(), segment.audio.as_path()])
            .chain(std::iter::once(self.subtitles.as_path()))
    }
}

/// Muxes slide stills, narration and a soft subtitle track into one MP4 with ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn encode(&self, job: &EncodeJob) -> Result<PathBuf, EncodeError> {
        if job.segments.is_empty() {
            return Err(EncodeError::EmptyJob);
        }
        if let Some(missing) = job.inputs().find(|path| !path.is_file()) {
            return Err(EncodeError::MissingInput(missing.to_path_buf()));
        }

        let args = encode_args(job);
        info!(
            segments = job.segments.len(),
            output = %job.output.display(),
            "encoding video"
        );

        run_tool(&self.program, &args, Path::new("."), &job.output).await?;
        Ok(job.output.clone())
    }
}

/// ffmpeg arguments for `job`.
///
/// Inputs are listed explicitly in segment order: image and audio of segment
/// `i` are inputs `2i` and `2i + 1`, the subtitle file comes last.
pub fn encode_args(job: &EncodeJob) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y"]
        .into_iter()
        .map(String::from)
        .collect();

    for segment in &job.segments {
        args.extend([
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            FRAME_RATE.to_string(),
            "-t".to_string(),
            seconds_arg(segment.duration),
            "-i".to_string(),
            path_arg(&segment.image),
            "-i".to_string(),
            path_arg(&segment.audio),
        ]);
    }

    let subtitle_map = format!("{}:s", job.segments.len() * 2);
    args.extend(["-i".to_string(), path_arg(&job.subtitles)]);
    args.extend(["-filter_complex".to_string(), filter_graph(job)]);
    args.extend(
        [
            "-map",
            "[outv]",
            "-map",
            "[outa]",
            "-map",
            subtitle_map.as_str(),
            "-c:v",
            "libx264",
            "-tune",
            "stillimage",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            "192k",
            "-c:s",
            "mov_text",
            "-movflags",
            "+faststart",
        ]
        .into_iter()
        .map(String::from),
    );
    args.push(path_arg(&job.output));
    args
}

fn filter_graph(job: &EncodeJob) -> String {
    let (width, height) = (job.width, job.height);
    let mut chains = Vec::with_capacity(job.segments.len() * 2 + 1);
    let mut concat_inputs = String::new();

    // Both streams of a segment are cut to exactly its duration, so concat
    // never pads one to the other's length.
    for (index, segment) in job.segments.iter().enumerate() {
        let video_input = index * 2;
        let audio_input = video_input + 1;
        let length = seconds_arg(segment.duration);
        chains.push(format!(
            "[{video_input}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={FRAME_RATE},format=yuv420p,\
             trim=duration={length},setpts=PTS-STARTPTS[v{index}]"
        ));
        chains.push(format!(
            "[{audio_input}:a]aresample={AUDIO_SAMPLE_RATE},aformat=channel_layouts=stereo,\
             apad,atrim=duration={length},asetpts=PTS-STARTPTS[a{index}]"
        ));
        concat_inputs.push_str(&format!("[v{index}][a{index}]"));
    }

    chains.push(format!(
        "{concat_inputs}concat=n={}:v=1:a=1[outv][outa]",
        job.segments.len()
    ));
    chains.join(";")
}

fn seconds_arg(duration: Duration) -> String {
    format!("{:.3}", duration.as_secs_f64())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
