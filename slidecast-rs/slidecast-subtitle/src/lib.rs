use slidecast_utils::Slide;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("got {durations} audio durations for {slides} slides")]
    LengthMismatch { slides: usize, durations: usize },
    #[error("slide {index} has no audio duration")]
    ZeroDuration { index: usize },
    #[error("failed to write subtitles to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One timed caption. Times are milliseconds from the start of the video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub slide_index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Lay the slides' narration end to end, each cue lasting as long as its audio.
///
/// Offsets are accumulated in whole milliseconds so one cue ends exactly where
/// the next one starts.
pub fn build_cues(slides: &[Slide], durations: &[Duration]) -> Result<Vec<Cue>, SubtitleError> {
    if slides.len() != durations.len() {
        return Err(SubtitleError::LengthMismatch {
            slides: slides.len(),
            durations: durations.len(),
        });
    }

    let mut cues = Vec::with_capacity(slides.len());
    let mut offset_ms = 0u64;

    for (slide, duration) in slides.iter().zip(durations) {
        let length_ms = duration.as_millis() as u64;
        if length_ms == 0 {
            return Err(SubtitleError::ZeroDuration { index: slide.index });
        }

        cues.push(Cue {
            slide_index: slide.index,
            start_ms: offset_ms,
            end_ms: offset_ms + length_ms,
            text: caption_text(&slide.narration),
        });
        offset_ms += length_ms;
    }

    Ok(cues)
}

pub fn render_webvtt(cues: &[Cue]) -> String {
    let mut output = String::from("WEBVTT\n");
    for cue in cues {
        let _ = write!(
            output,
            "\n{}\n{} --> {}\n{}\n",
            cue.slide_index + 1,
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms),
            cue.text
        );
    }
    output
}

pub fn write_webvtt(path: &Path, cues: &[Cue]) -> Result<(), SubtitleError> {
    fs::write(path, render_webvtt(cues)).map_err(|source| SubtitleError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// `HH:MM:SS.mmm`
pub fn format_timestamp(total_ms: u64) -> String {
    let ms = total_ms % 1_000;
    let total_secs = total_ms / 1_000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3_600;
    format!("{hours:02}:{mins:02}:{secs:02}.{ms:03}")
}

// "-->" and blank lines would end the cue early.
fn caption_text(narration: &str) -> String {
    narration
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .replace("-->", "->")
}

#[cfg(test)]
mod tests;
