use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod retry;

pub use retry::{RetryPolicy, Transient, UpstreamError, retry_after_from_headers, with_retry};

/// Upper bound on slides per run; file names carry a two-digit index.
pub const MAX_SLIDES: usize = 100;
pub const PROMPT_FILE_NAME: &str = "prompt.txt";
pub const PRESENTATION_FILE_NAME: &str = "presentation.json";
pub const SUBTITLE_FILE_NAME: &str = "subtitles.vtt";
pub const VIDEO_FILE_NAME: &str = "video.mp4";

/// One unit of presentation content, in the order the language model wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    pub index: usize,
    pub title: String,
    pub body: String,
    pub narration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
}

impl Slide {
    /// Description handed to an image generator for this slide.
    pub fn image_description(&self) -> String {
        match trimmed_or_none(self.image_prompt.as_deref()) {
            Some(prompt) => prompt.to_string(),
            None => format!("{}. {}", self.title.trim(), self.body.trim()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Image,
    Audio,
}

impl ArtifactKind {
    fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Image => "slide",
            ArtifactKind::Audio => "audio",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Image => "png",
            ArtifactKind::Audio => "wav",
        }
    }
}

/// A per-slide file inside a run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub slide_index: usize,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl Artifact {
    pub fn in_dir(run_dir: &Path, slide_index: usize, kind: ArtifactKind) -> Self {
        Self {
            slide_index,
            kind,
            path: run_dir.join(artifact_file_name(kind, slide_index)),
        }
    }
}

/// File name for a slide artifact, zero-padded so lexical and slide order agree.
pub fn artifact_file_name(kind: ArtifactKind, slide_index: usize) -> String {
    debug_assert!(slide_index < MAX_SLIDES);
    format!("{}_{:02}.{}", kind.prefix(), slide_index, kind.extension())
}

pub fn trimmed_or_none(input: Option<&str>) -> Option<&str> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

/// Greedy word wrap on character counts. Words longer than `width` get a line of their own.
pub fn wrap_text(input: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();

    for paragraph in input.lines() {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let needed = if current.is_empty() {
                word.chars().count()
            } else {
                current.chars().count() + 1 + word.chars().count()
            };

            if needed > width && !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_are_zero_padded() {
        assert_eq!(artifact_file_name(ArtifactKind::Image, 0), "slide_00.png");
        assert_eq!(artifact_file_name(ArtifactKind::Audio, 7), "audio_07.wav");
        assert_eq!(artifact_file_name(ArtifactKind::Image, 99), "slide_99.png");
    }

    #[test]
    fn lexical_order_matches_slide_order_up_to_max_slides() {
        for count in 1..=MAX_SLIDES {
            for kind in [ArtifactKind::Image, ArtifactKind::Audio] {
                let names: Vec<String> =
                    (0..count).map(|index| artifact_file_name(kind, index)).collect();
                let mut sorted = names.clone();
                sorted.sort();
                assert_eq!(sorted, names, "{kind:?} names for {count} slides");
            }
        }
    }

    #[test]
    fn artifact_in_dir_joins_run_directory() {
        let artifact = Artifact::in_dir(Path::new("/tmp/run/3"), 4, ArtifactKind::Audio);
        assert_eq!(artifact.path, PathBuf::from("/tmp/run/3/audio_04.wav"));
        assert_eq!(artifact.slide_index, 4);
    }

    #[test]
    fn image_description_falls_back_to_title_and_body() {
        let mut slide = Slide {
            index: 0,
            title: "Founding".to_string(),
            body: "Romulus and Remus".to_string(),
            narration: "Rome was founded...".to_string(),
            image_prompt: Some("   ".to_string()),
        };
        assert_eq!(slide.image_description(), "Founding. Romulus and Remus");

        slide.image_prompt = Some("A she-wolf under a fig tree".to_string());
        assert_eq!(slide.image_description(), "A she-wolf under a fig tree");
    }

    #[test]
    fn wrap_text_respects_width() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 10);
        assert_eq!(lines, vec!["the quick", "brown fox", "jumps over", "the lazy", "dog"]);
        assert!(lines.iter().all(|line| line.chars().count() <= 10));
    }

    #[test]
    fn wrap_text_keeps_paragraph_breaks_and_long_words() {
        let lines = wrap_text("short\nextraordinarily long", 8);
        assert_eq!(lines, vec!["short", "extraordinarily", "long"]);
    }

    #[test]
    fn trimmed_or_none_discards_blank_input() {
        assert_eq!(trimmed_or_none(Some("  x ")), Some("x"));
        assert_eq!(trimmed_or_none(Some("   ")), None);
        assert_eq!(trimmed_or_none(None), None);
    }
}
