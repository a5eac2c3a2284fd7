use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_DIR_NAME: &str = ".slidecast";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const FALLBACK_OUTPUT_DIR: &str = "videos";
pub const DEFAULT_SLIDE_COUNT: usize = 5;
pub const DEFAULT_CONCURRENCY: usize = 2;

pub const DEFAULT_LLM_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_API_KEY_ENV_VAR: &str = "OPENAI_API_KEY";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";

pub const DEFAULT_SPEAKER: &str = "Morgan Freeman";
pub const DEFAULT_VOICE_BASE_URL: &str = "https://api.fakeyou.com";
pub const DEFAULT_VOICE_CDN_URL: &str = "https://storage.googleapis.com/vocodes-public";
pub const DEFAULT_VOICE_API_KEY_ENV_VAR: &str = "FAKEYOU_API_TOKEN";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine configuration directory")]
    ConfigDirUnavailable,
    #[error("failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    /// Title and body drawn onto a plain card by the media encoder.
    #[default]
    Text,
    /// Background picture requested from the image generation endpoint.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: String,
    pub slide_count: usize,
    pub concurrency: usize,
    pub renderer: RendererKind,
    pub llm: LlmSettings,
    pub voice: VoiceSettings,
    pub render: RenderSettings,
    pub retry: RetrySettings,
    pub encoder: EncoderSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            slide_count: DEFAULT_SLIDE_COUNT,
            concurrency: DEFAULT_CONCURRENCY,
            renderer: RendererKind::default(),
            llm: LlmSettings::default(),
            voice: VoiceSettings::default(),
            render: RenderSettings::default(),
            retry: RetrySettings::default(),
            encoder: EncoderSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    pub api_key_env_var: String,
    pub image_model: String,
    pub image_size: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key_env_var: DEFAULT_LLM_API_KEY_ENV_VAR.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            image_size: DEFAULT_IMAGE_SIZE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl LlmSettings {
    pub fn api_key_from_env(&self) -> Option<String> {
        non_empty_env(&self.api_key_env_var)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Voice title as listed by the service, or a raw `TM:` model token.
    pub speaker: String,
    pub base_url: String,
    pub cdn_url: String,
    pub api_key_env_var: String,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub request_timeout_secs: u64,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            speaker: DEFAULT_SPEAKER.to_string(),
            base_url: DEFAULT_VOICE_BASE_URL.to_string(),
            cdn_url: DEFAULT_VOICE_CDN_URL.to_string(),
            api_key_env_var: DEFAULT_VOICE_API_KEY_ENV_VAR.to_string(),
            poll_interval_ms: 1_500,
            max_polls: 120,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl VoiceSettings {
    pub fn api_token_from_env(&self) -> Option<String> {
        non_empty_env(&self.api_key_env_var)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub background: String,
    pub foreground: String,
    pub title_font_size: u32,
    pub body_font_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_file: Option<String>,
}

impl Default for RenderSettings {
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub program: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }
}

/// Loads the Slidecast configuration from disk, creating a default file if absent.
///
/// Keys missing from an existing file are filled with defaults and written back.
pub fn load_or_init() -> Result<LoadOutcome, ConfigError> {
    let path = config_file_path()?;
    load_or_init_at(&path)
}

pub fn load_or_init_at(path: &Path) -> Result<LoadOutcome, ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        // Rewriting drops the user's comments, so only do it to add keys.
        let present: toml::Table = toml::from_str(&contents)?;
        if let toml::Value::Table(complete) = toml::Value::try_from(&config)? {
            if lacks_keys(&present, &complete) {
                save(&config, path)?;
            }
        }
        Ok(LoadOutcome {
            config,
            path: path.to_path_buf(),
            created: false,
        })
    } else {
        let config = Config::default();
        save(&config, path)?;
        Ok(LoadOutcome {
            config,
            path: path.to_path_buf(),
            created: true,
        })
    }
}

fn lacks_keys(present: &toml::Table, complete: &toml::Table) -> bool {
    complete
        .iter()
        .any(|(key, expected)| match (present.get(key), expected) {
            (None, _) => true,
            (Some(toml::Value::Table(inner)), toml::Value::Table(expected)) => {
                lacks_keys(inner, expected)
            }
            _ => false,
        })
}

/// Persist the given configuration to disk at the provided path.
pub fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    ensure_parent_exists(path)?;
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized)?;
    Ok(())
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub config: Config,
    pub path: PathBuf,
    pub created: bool,
}

fn ensure_parent_exists(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn config_dir() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(CONFIG_DIR_NAME))
}

fn config_file_path() -> Result<PathBuf, ConfigError> {
    config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::ConfigDirUnavailable)
}

fn default_output_dir() -> String {
    config_dir()
        .map(|dir| dir.join(FALLBACK_OUTPUT_DIR).to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_OUTPUT_DIR.to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    if name.trim().is_empty() {
        return None;
    }
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
