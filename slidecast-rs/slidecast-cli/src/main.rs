use clap::{Parser, ValueEnum};
use slidecast_config::{Config, RenderSettings, RendererKind, load_or_init, save};
use slidecast_llm::{LlmError, OpenAiClient, ScriptOptions, compose_request};
use slidecast_media::{CardStyle, FfmpegEncoder, TextCardRenderer};
use slidecast_pipeline::{
    ErrorKind, GeneratedImageRenderer, Pipeline, PipelineError, PipelineSettings, SlideRenderer,
    VoiceNarrator,
};
use slidecast_utils::{RetryPolicy, UpstreamError, trimmed_or_none, with_retry};
use slidecast_voice::{VoiceClient, VoiceClientOptions, VoiceError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Upper bound for configured retry delays.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

const OPENAI_KEY_WARNING: &str = "OpenAI API key is not set. Pass --openai-api-key or export the variable named by llm.api_key_env_var.";

/// Slidecast CLI entry point.
///
/// Asks a language model for a slide script about the topic, narrates and
/// draws every slide, then stitches the result into one subtitled video.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "slidecast",
    author,
    version,
    about = "Turn a topic into a narrated slide video.",
    long_about = None
)]
struct Cli {
    /// Topic of the presentation. Read from stdin when omitted.
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,
    /// Number of slides to ask for.
    #[arg(long, value_name = "COUNT")]
    slides: Option<usize>,
    /// Language model used to draft the script.
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
    /// Optional presentation style, e.g. "for children".
    #[arg(long, value_name = "STYLE")]
    style: Option<String>,
    /// Voice title or model token used for narration.
    #[arg(long, value_name = "SPEAKER")]
    speaker: Option<String>,
    /// Directory that receives one numbered folder per run.
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// How many slides are synthesized at the same time.
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,
    /// How slide images are produced.
    #[arg(long, value_enum, value_name = "RENDERER")]
    renderer: Option<RendererArg>,
    #[arg(long, value_name = "KEY")]
    openai_api_key: Option<String>,
    #[arg(long, value_name = "TOKEN")]
    voice_api_token: Option<String>,
    /// Print the available narration voices and exit.
    #[arg(long)]
    list_voices: bool,
    /// Persist the default speaker in the Slidecast config file.
    #[arg(long, value_name = "SPEAKER")]
    set_default_speaker: Option<String>,
    /// Log debug detail to stderr.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RendererArg {
    Text,
    Generated,
}

impl From<RendererArg> for RendererKind {
    fn from(value: RendererArg) -> Self {
        match value {
            RendererArg::Text => RendererKind::Text,
            RendererArg::Generated => RendererKind::Generated,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read the topic from stdin: {0}")]
    Stdin(#[source] std::io::Error),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Voice(#[from] VoiceError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl CliError {
    fn kind(&self) -> ErrorKind {
        match self {
            CliError::Stdin(_) => ErrorKind::Io,
            CliError::Llm(LlmError::Upstream(_)) => ErrorKind::Upstream,
            CliError::Llm(LlmError::Format(_)) => ErrorKind::Format,
            CliError::Llm(_) => ErrorKind::Config,
            CliError::Voice(VoiceError::Upstream(_)) | CliError::Upstream(_) => {
                ErrorKind::Upstream
            }
            CliError::Voice(_) => ErrorKind::Config,
            CliError::Pipeline(error) => error.kind(),
        }
    }

    fn exit_code(&self) -> u8 {
        exit_code(self.kind())
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Io => 1,
        ErrorKind::Config => 2,
        ErrorKind::Upstream => 3,
        ErrorKind::Format => 4,
        ErrorKind::Encoding => 5,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let context = run(&cli);

    for message in &context.infos {
        info!("{message}");
    }

    for warning in &context.warnings {
        warn!("{warning}");
    }

    match execute(&cli, &context).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::from(error.exit_code())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(cli: &Cli, context: &RunContext) -> Result<(), CliError> {
    let settings = &context.settings;

    if cli.list_voices {
        for line in voice_listing(settings).await? {
            println!("{line}");
        }
        return Ok(());
    }

    if cli.set_default_speaker.is_some() && cli.topic.is_none() {
        return Ok(());
    }

    let topic = match cli.topic.clone() {
        Some(topic) => topic,
        None => read_topic_from_stdin().await?,
    };
    // Reject a bad topic or slide count before the speaker lookup goes remote.
    compose_request(&topic, &settings.script)?;

    let llm = OpenAiClient::new(
        settings.openai_api_key.as_deref().unwrap_or_default(),
        &settings.config.llm.base_url,
        settings.config.llm.request_timeout(),
    )?;
    let voice = VoiceClient::new(voice_options(settings))?;

    let model_token = with_retry(&settings.retry, "speaker lookup", || {
        voice.resolve_speaker(&settings.speaker)
    })
    .await?;
    debug!(speaker = %settings.speaker, %model_token, "resolved narration voice");

    let renderer: Box<dyn SlideRenderer> = match settings.renderer {
        RendererKind::Text => Box::new(TextCardRenderer::new(
            &settings.config.encoder.program,
            card_style(&settings.config.render),
        )),
        RendererKind::Generated => Box::new(GeneratedImageRenderer::new(
            llm.clone(),
            &settings.config.llm.image_model,
            &settings.config.llm.image_size,
        )),
    };

    let pipeline = Pipeline::new(
        Box::new(llm),
        Box::new(VoiceNarrator::new(voice, model_token)),
        renderer,
        Box::new(FfmpegEncoder::new(&settings.config.encoder.program)),
        PipelineSettings {
            output_root: settings.output_root.clone(),
            script: settings.script.clone(),
            concurrency: settings.concurrency,
            retry: settings.retry,
            frame_width: settings.config.render.width,
            frame_height: settings.config.render.height,
        },
    );

    let report = pipeline.execute(&topic).await?;
    info!(
        run_id = report.run.id,
        slides = report.slides.len(),
        "saved presentation to {}",
        report.run.path.display()
    );
    println!("{}", report.video.display());
    Ok(())
}

/// One `title<TAB>model token` line per narration voice.
async fn voice_listing(settings: &Settings) -> Result<Vec<String>, CliError> {
    let voice = VoiceClient::new(voice_options(settings))?;
    let voices = with_retry(&settings.retry, "voice list", || voice.list_voices()).await?;
    Ok(voices
        .into_iter()
        .map(|entry| format!("{}\t{}", entry.title, entry.model_token))
        .collect())
}

async fn read_topic_from_stdin() -> Result<String, CliError> {
    info!("reading the topic from stdin");
    let mut topic = String::new();
    tokio::io::stdin()
        .read_to_string(&mut topic)
        .await
        .map_err(CliError::Stdin)?;
    Ok(topic)
}

fn voice_options(settings: &Settings) -> VoiceClientOptions {
    let voice = &settings.config.voice;
    VoiceClientOptions {
        base_url: voice.base_url.clone(),
        cdn_url: voice.cdn_url.clone(),
        api_token: settings.voice_api_token.clone(),
        poll_interval: voice.poll_interval(),
        max_polls: voice.max_polls,
        request_timeout: voice.request_timeout(),
    }
}

fn card_style(render: &RenderSettings) -> CardStyle {
    CardStyle {
        width: render.width,
        height: render.height,
        background: render.background.clone(),
        foreground: render.foreground.clone(),
        title_font_size: render.title_font_size,
        body_font_size: render.body_font_size,
        font_file: render.font_file.clone(),
    }
}

/// Effective settings for one invocation: flags over environment over file.
#[derive(Debug, Clone)]
struct Settings {
    output_root: PathBuf,
    script: ScriptOptions,
    concurrency: usize,
    renderer: RendererKind,
    speaker: String,
    openai_api_key: Option<String>,
    voice_api_token: Option<String>,
    retry: RetryPolicy,
    config: Config,
}

#[derive(Debug)]
struct RunContext {
    settings: Settings,
    infos: Vec<String>,
    warnings: Vec<String>,
}

fn run(cli: &Cli) -> RunContext {
    let mut infos = Vec::new();
    let mut warnings = Vec::new();

    let config = match load_or_init() {
        Ok(outcome) => {
            if outcome.created {
                infos.push(format!(
                    "Created Slidecast configuration at {}",
                    outcome.path.display()
                ));
            }

            let mut config = outcome.config;

            if let Some(speaker) = trimmed_or_none(cli.set_default_speaker.as_deref()) {
                config.voice.speaker = speaker.to_string();
                match save(&config, &outcome.path) {
                    Ok(()) => infos.push(format!(
                        "Updated default speaker to `{speaker}` in {}",
                        outcome.path.display()
                    )),
                    Err(error) => warnings.push(format!(
                        "Failed to update the default speaker ({error})."
                    )),
                }
            }

            config
        }
        Err(error) => {
            warnings.push(format!(
                "Failed to load Slidecast configuration ({error}). Falling back to defaults."
            ));

            if cli.set_default_speaker.is_some() {
                warnings.push(
                    "Cannot update the default speaker because the configuration could not be loaded."
                        .to_string(),
                );
            }

            Config::default()
        }
    };

    let settings = resolve_settings(cli, config);
    let needs_openai = !cli.list_voices && !(cli.set_default_speaker.is_some() && cli.topic.is_none());
    if needs_openai && settings.openai_api_key.is_none() {
        warnings.push(OPENAI_KEY_WARNING.to_string());
    }

    RunContext {
        settings,
        infos,
        warnings,
    }
}

fn resolve_settings(cli: &Cli, config: Config) -> Settings {
    let model = trimmed_or_none(cli.model.as_deref())
        .unwrap_or(&config.llm.model)
        .to_string();
    let speaker = trimmed_or_none(cli.speaker.as_deref())
        .unwrap_or(&config.voice.speaker)
        .to_string();
    let output_root = cli
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.output_dir));

    let openai_api_key = trimmed_or_none(cli.openai_api_key.as_deref())
        .map(str::to_string)
        .or_else(|| config.llm.api_key_from_env());
    let voice_api_token = trimmed_or_none(cli.voice_api_token.as_deref())
        .map(str::to_string)
        .or_else(|| config.voice.api_token_from_env());

    let max_delay = Duration::from_millis(config.retry.max_delay_ms).min(MAX_RETRY_DELAY);
    let retry = RetryPolicy {
        max_attempts: config.retry.max_attempts.max(1),
        base_delay: Duration::from_millis(config.retry.base_delay_ms).min(max_delay),
        max_delay,
        jitter: true,
    };

    Settings {
        output_root,
        script: ScriptOptions {
            model,
            slide_count: cli.slides.unwrap_or(config.slide_count),
            style: trimmed_or_none(cli.style.as_deref()).map(str::to_string),
        },
        concurrency: cli.concurrency.unwrap_or(config.concurrency).max(1),
        renderer: cli.renderer.map(RendererKind::from).unwrap_or(config.renderer),
        speaker,
        openai_api_key,
        voice_api_token,
        retry,
        config,
    }
}
