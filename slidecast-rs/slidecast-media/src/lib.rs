use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod audio;
mod encode;
mod process;
mod render;

pub use audio::{AudioError, wav_duration, wav_duration_from_bytes};
pub use encode::{
    EncodeError, EncodeJob, FRAME_RATE, FfmpegEncoder, Segment, encode_args, frame_aligned,
};
pub use process::ToolError;
pub use render::{CardStyle, RenderError, TextCardRenderer};

// The image endpoint is asked for PNG, the format slide artifacts use.
const IMAGE_EXTENSION: &str = "png";

#[derive(Debug, Error)]
pub enum ImageSaveError {
    #[error("image payload is empty")]
    EmptyPayload,
    #[error("failed to decode image bytes")]
    Decode(#[from] base64::DecodeError),
    #[error("failed to write image to {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct SaveImageOptions<'a> {
    pub file_stem: &'a str,
    pub output_dir: &'a Path,
}

/// Decode a base64 PNG and write it as `<output_dir>/<file_stem>.png`.
pub fn save_base64_image(
    encoded: &str,
    options: SaveImageOptions<'_>,
) -> Result<PathBuf, ImageSaveError> {
    if encoded.trim().is_empty() {
        return Err(ImageSaveError::EmptyPayload);
    }

    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(ImageSaveError::Decode)?;

    fs::create_dir_all(options.output_dir).map_err(|source| ImageSaveError::Io {
        path: options.output_dir.to_path_buf(),
        source,
    })?;

    let path = options
        .output_dir
        .join(format!("{}.{IMAGE_EXTENSION}", options.file_stem));

    fs::write(&path, &bytes).map_err(|source| ImageSaveError::Io {
        path: path.clone(),
        source,
    })?;

    Ok(path)
}
