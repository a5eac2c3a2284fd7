use hound::WavReader;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("{path} is not a readable WAV file: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
    #[error("{path} declares a sample rate of zero")]
    ZeroSampleRate { path: PathBuf },
}

/// Play length of a WAV file, from its header.
pub fn wav_duration(path: &Path) -> Result<Duration, AudioError> {
    let reader = WavReader::open(path).map_err(|source| AudioError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    duration_of(reader, path)
}

/// Same as [`wav_duration`] for audio still in memory; `label` names it in errors.
pub fn wav_duration_from_bytes(bytes: &[u8], label: &str) -> Result<Duration, AudioError> {
    let path = Path::new(label);
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|source| AudioError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    duration_of(reader, path)
}

fn duration_of<R: std::io::Read>(reader: WavReader<R>, path: &Path) -> Result<Duration, AudioError> {
    let sample_rate = u64::from(reader.spec().sample_rate);
    if sample_rate == 0 {
        return Err(AudioError::ZeroSampleRate {
            path: path.to_path_buf(),
        });
    }

    let frames = u64::from(reader.duration());
    Ok(Duration::from_nanos(frames * 1_000_000_000 / sample_rate))
}
