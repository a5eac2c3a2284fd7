use slidecast_utils::{Slide, wrap_text};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::process::{ToolError, escape_filter_value, run_tool};

pub const TEXT_DIR_NAME: &str = "text";
// Average glyph width relative to font size, used to pick a wrap column.
const GLYPH_WIDTH_RATIO: f32 = 0.55;
const MARGIN_RATIO: f32 = 0.85;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("slide image destination {0} has no parent directory")]
    InvalidDestination(PathBuf),
    #[error("failed to write slide text to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Tool(#[from] ToolError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStyle {
    pub width: u32,
    pub height: u32,
    pub background: String,
    pub foreground: String,
    pub title_font_size: u32,
    pub body_font_size: u32,
    pub font_file: Option<String>,
}

impl Default for CardStyle {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            background: "0x1e1e2e".to_string(),
            foreground: "white".to_string(),
            title_font_size: 56,
            body_font_size: 34,
            font_file: None,
        }
    }
}

impl CardStyle {
    fn wrap_columns(&self, font_size: u32) -> usize {
        let usable = self.width as f32 * MARGIN_RATIO;
        (usable / (font_size.max(1) as f32 * GLYPH_WIDTH_RATIO)).floor().max(1.0) as usize
    }
}

/// Draws a slide's title and body onto a plain card with ffmpeg's `drawtext`.
///
/// Identical slides and styles always produce the same command line.
#[derive(Debug, Clone)]
pub struct TextCardRenderer {
    program: String,
    style: CardStyle,
}

impl TextCardRenderer {
    pub fn new(program: impl Into<String>, style: CardStyle) -> Self {
        Self {
            program: program.into(),
            style,
        }
    }

    pub async fn render(&self, slide: &Slide, destination: &Path) -> Result<(), RenderError> {
        let (run_dir, file_name) = split_destination(destination)?;
        let text_dir = run_dir.join(TEXT_DIR_NAME);
        fs::create_dir_all(&text_dir).map_err(|source| RenderError::Io {
            path: text_dir.clone(),
            source,
        })?;

        let title_file = format!("{TEXT_DIR_NAME}/slide_{:02}_title.txt", slide.index);
        let body_file = format!("{TEXT_DIR_NAME}/slide_{:02}_body.txt", slide.index);
        write_text(
            &run_dir.join(&title_file),
            &wrap_text(&slide.title, self.style.wrap_columns(self.style.title_font_size)).join("\n"),
        )?;
        write_text(
            &run_dir.join(&body_file),
            &wrap_text(&slide.body, self.style.wrap_columns(self.style.body_font_size)).join("\n"),
        )?;

        let args = self.card_args(&title_file, &body_file, &file_name);
        debug!(slide = slide.index, output = %destination.display(), "rendering text card");
        run_tool(&self.program, &args, run_dir, Path::new(&file_name)).await?;
        Ok(())
    }

    /// ffmpeg arguments; paths are relative to the run directory.
    pub fn card_args(&self, title_file: &str, body_file: &str, output: &str) -> Vec<String> {
        let style = &self.style;
        let font = style
            .font_file
            .as_deref()
            .map(|font| format!(":fontfile={}", escape_filter_value(font)))
            .unwrap_or_default();
        let color = escape_filter_value(&style.foreground);

        let title = format!(
            "drawtext=textfile={title_file}{font}:expansion=none:fontcolor={color}:fontsize={}:x=(w-text_w)/2:y=h/6",
            style.title_font_size
        );
        let body = format!(
            "drawtext=textfile={body_file}{font}:expansion=none:fontcolor={color}:fontsize={}:line_spacing={}:x=(w-text_w)/2:y=h/3",
            style.body_font_size,
            style.body_font_size / 3
        );

        vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=c={}:s={}x{}",
                escape_filter_value(&style.background),
                style.width,
                style.height
            ),
            "-vf".to_string(),
            format!("{title},{body}"),
            "-frames:v".to_string(),
            "1".to_string(),
            output.to_string(),
        ]
    }
}

fn split_destination(destination: &Path) -> Result<(&Path, String), RenderError> {
    let parent = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| RenderError::InvalidDestination(destination.to_path_buf()))?;
    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| RenderError::InvalidDestination(destination.to_path_buf()))?;
    Ok((parent, file_name))
}

fn write_text(path: &Path, text: &str) -> Result<(), RenderError> {
    fs::write(path, text).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })
}
