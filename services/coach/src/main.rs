mod config;
mod prompt_loader;

use crate::config::Config;
use anyhow::{Context, Result, bail};
use clap::Parser;
use coach_core::media::{FfmpegConfig, FfmpegDecoder};
use coach_core::pipeline::{PipelineState, SessionPipeline};
use coach_core::session::SessionInput;
use coach_core::synthesizer::{ChatCompletionsModel, FeedbackSynthesizer, ModelConfig};
use futures::StreamExt;
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Analyze a recorded teaching session and print a coaching report.
#[derive(Parser)]
#[command(name = "coach-service", version)]
struct Cli {
    /// The session recording (any container ffmpeg can read)
    recording: PathBuf,
    /// What the session teaches
    #[arg(long)]
    topic: Option<String>,
    /// Language for translated feedback
    #[arg(long)]
    language: Option<String>,
    /// Transcript file; defaults to a .txt/.srt/.vtt next to the recording
    #[arg(long)]
    transcript: Option<PathBuf>,
    /// Print the report as JSON instead of markdown
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Starting coach service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    // --- 4. Load Prompts ---
    let template = prompt_loader::load_feedback_template(&config.prompts_dir)
        .context("Failed to load feedback prompt")?;

    // --- 5. Initialize Collaborators ---
    if config.api_key.is_none() {
        tracing::warn!(
            "No FEEDBACK_API_KEY or GEMINI_API_KEY set; reports will not include coach feedback."
        );
    }
    let model_config = ModelConfig::default()
        .with_credential(config.api_key.as_ref().map(|key| key.expose_secret()))
        .with_endpoint(&config.endpoint)
        .with_model(&config.chat_model);
    let synthesizer = FeedbackSynthesizer::new(Arc::new(ChatCompletionsModel::new(model_config)))
        .with_template(template)
        .with_timeout(config.feedback_timeout);
    let decoder = FfmpegDecoder::new(FfmpegConfig {
        ffmpeg: config.ffmpeg_path.clone(),
        ffprobe: config.ffprobe_path.clone(),
    });
    let pipeline = SessionPipeline::new(Arc::new(decoder), synthesizer);

    // --- 6. Run the Session ---
    let mut input = SessionInput::new(args.recording);
    if let Some(topic) = args.topic {
        input = input.with_topic(topic);
    }
    if let Some(language) = args.language {
        input = input.with_language(language);
    }
    if let Some(transcript) = args.transcript {
        input = input.with_transcript(transcript);
    }

    let mut run = pipeline.run_session(input);
    tracing::info!("Started session {}", run.session_id());

    while let Some(state) = run.next().await {
        eprintln!("[{:>3}%] {}", state.progress_percent(), state.label());
        match state {
            PipelineState::Complete(report) => {
                if args.json {
                    let json = serde_json::to_string_pretty(&report)
                        .context("Failed to serialize report")?;
                    println!("{json}");
                } else {
                    println!("{}", report.view());
                }
                return Ok(());
            }
            PipelineState::Failed { kind, message } => bail!("Session failed ({kind}): {message}"),
            _ => {}
        }
    }

    bail!("Session ended without a result")
}
