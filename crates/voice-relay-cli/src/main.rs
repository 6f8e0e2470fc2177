use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use voice_relay_core::config::{Config, ServerConfig};
use voice_relay_gateway::{AppState, Capabilities};
use voice_relay_media::{AudioStream, AudioUpload};
use voice_relay_pipeline::{InferencePipeline, PipelineRequest};

mod logging;

#[derive(Parser)]
#[command(
    name = "voice-relay",
    about = "Voice assistant backend: speech-to-text, completion, and text-to-speech behind one endpoint",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (default: 8000)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Validate configuration and report detected capabilities
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run one recording through the full pipeline
    Infer {
        /// Recorded audio file
        #[arg(long)]
        audio: PathBuf,

        /// Audio content type (guessed from the file extension if omitted)
        #[arg(long)]
        mime: Option<String>,

        /// Prior conversation, as returned in the X-Conversation header
        #[arg(long)]
        conversation: Option<String>,

        /// Where to write the synthesized reply
        #[arg(long, default_value = "reply.mp3")]
        out: PathBuf,
    },

    /// Synthesize text with the TTS chain
    Speak {
        #[arg(long)]
        text: String,

        #[arg(long, default_value = "speech.mp3")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (secrets redacted)
    Show,
    /// Get a specific config value by dotted path
    Get { key: String },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, bind } => {
            if port.is_some() || bind.is_some() {
                let server = config.server.get_or_insert_with(ServerConfig::default);
                if let Some(port) = port {
                    server.port = port;
                }
                if bind.is_some() {
                    server.bind = bind;
                }
            }
            ensure_valid(&config)?;
            info!(config = %config_path.display(), "Starting Voice Relay");

            let state = AppState::from_config(config);
            #[cfg(feature = "metrics")]
            let state = state.with_metrics(
                voice_relay_gateway::metrics::install_prometheus_recorder()
                    .context("failed to install Prometheus recorder")?,
            );
            voice_relay_gateway::start_server(state).await?;
        }
        Commands::Check => {
            println!("Voice Relay v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());

            let (warnings, errors) = config.validate();
            for w in &warnings {
                println!("  warning: {w}");
            }
            for e in &errors {
                println!("  error:   {e}");
            }
            if warnings.is_empty() && errors.is_empty() {
                println!("  configuration OK");
            }

            let pipeline = InferencePipeline::from_config(&config);
            let caps = Capabilities::detect(&pipeline);
            println!("{}", serde_json::to_string_pretty(&caps)?);

            if !errors.is_empty() {
                bail!("{} configuration error(s)", errors.len());
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let mut value = serde_json::to_value(&config)?;
                redact_secrets(&mut value);
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(serde_json::Value::String(s)) if is_secret_key(&key) && !s.is_empty() => {
                    println!("\"***\"");
                }
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("config key not found: {key}"),
            },
            ConfigAction::Init { force } => {
                if config_path.exists() && !force {
                    bail!(
                        "{} already exists (use --force to overwrite)",
                        config_path.display()
                    );
                }
                Config::default().save(&config_path)?;
                println!("Wrote default config to {}", config_path.display());
            }
        },
        Commands::Infer {
            audio,
            mime,
            conversation,
            out,
        } => {
            let bytes = tokio::fs::read(&audio)
                .await
                .with_context(|| format!("failed to read {}", audio.display()))?;
            let mime = mime.unwrap_or_else(|| mime_for_path(&audio).to_string());
            let file_name = audio
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "recording".to_string());
            let upload = AudioUpload::new(bytes, mime).with_file_name(file_name);

            let pipeline = InferencePipeline::from_config(&config);
            let response = pipeline
                .process(PipelineRequest {
                    audio: upload,
                    conversation,
                })
                .await?;
            let meta = &response.metadata;

            println!("Transcript:   {}", meta.transcript);
            println!("Reply:        {}", meta.reply);
            for (name, report) in [("STT", &meta.stt), ("AI", &meta.ai), ("TTS", &meta.tts)] {
                println!(
                    "{name:<4} {:>8.3}s  {} (fallback level {})",
                    report.elapsed.as_secs_f64(),
                    report.provider,
                    report.fallback_level
                );
            }
            println!("Conversation: {}", meta.encoded_history);

            let written = write_audio(response.audio, &out).await?;
            println!("Wrote {written} bytes to {}", out.display());
        }
        Commands::Speak { text, out } => {
            let pipeline = InferencePipeline::from_config(&config);
            let outcome = pipeline.speak(&text).await?;
            info!(provider = %outcome.report.provider, "Synthesized");
            let written = write_audio(outcome.value, &out).await?;
            println!("Wrote {written} bytes to {}", out.display());
        }
    }

    Ok(())
}

fn ensure_valid(config: &Config) -> anyhow::Result<()> {
    let (warnings, errors) = config.validate();
    for w in &warnings {
        warn!("{w}");
    }
    for e in &errors {
        error!("{e}");
    }
    if !errors.is_empty() {
        bail!(
            "refusing to start with {} configuration error(s); run `voice-relay check`",
            errors.len()
        );
    }
    Ok(())
}

/// Stream audio to `path`, returning the byte count.
async fn write_audio(mut audio: AudioStream, path: &Path) -> anyhow::Result<usize> {
    let mut file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut written = 0;
    while let Some(chunk) = audio.next().await {
        let chunk = chunk.context("audio stream failed")?;
        file.write_all(&chunk).await?;
        written += chunk.len();
    }
    file.flush().await?;
    Ok(written)
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        _ => "audio/webm",
    }
}

fn is_secret_key(key: &str) -> bool {
    let last = key.rsplit('.').next().unwrap_or(key);
    last == "api_key" || last == "project_id"
}

/// Replace non-empty secret values with a placeholder, recursively.
fn redact_secrets(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                match v {
                    serde_json::Value::String(s) if is_secret_key(key) && !s.is_empty() => {
                        *s = "***".to_string();
                    }
                    other => redact_secrets(other),
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}
