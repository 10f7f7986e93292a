//! Terminal harness: runs the session engine with stdin standing in for
//! speech recognition and stdout for playback.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use talkloop_backend::HttpChatBackend;
use talkloop_core::config::{Config, load_or_create_profile_id};
use talkloop_engine::{
    AudioRecorderPort, CaptureEvent, EnginePorts, LevelSourcePort, SessionController,
    SpeechCapturePort, SpeechPlaybackPort,
};

#[derive(Parser)]
#[command(name = "talkloop", about = "Voice conversation session harness", version)]
struct Cli {
    /// Config file path (defaults to the platform data directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one conversation session in the terminal
    Run {
        /// Backend base URL override
        #[arg(long)]
        backend: Option<String>,
    },
    /// Print the resolved configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&path)?;

    match cli.command.unwrap_or(Command::Run { backend: None }) {
        Command::Run { backend } => run_session(config, backend).await,
        Command::Config => show_config(&config),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_session(config: Config, backend_override: Option<String>) -> Result<()> {
    let profile_id = load_or_create_profile_id(&talkloop_core::config::data_dir())?;
    let base_url = backend_override.unwrap_or_else(|| config.backend_base_url());
    let api_key = config.backend.as_ref().and_then(|b| b.resolve_api_key());
    info!(%base_url, %profile_id, "Connecting to chat backend");
    let backend = Arc::new(HttpChatBackend::new(base_url, api_key));

    let ports = EnginePorts {
        capture: Arc::new(ConsoleCapture::new()),
        playback: Arc::new(ConsolePlayback),
        recorder: Arc::new(NullRecorder),
        level_source: Arc::new(NullLevels),
    };
    let mut controller = SessionController::new(ports, backend, &config, profile_id);

    let handle = controller.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    println!("Type a reply and press Enter. An empty line counts as silence; Ctrl-C ends the session.");
    let summary = controller.start_session().await?;
    println!(
        "Session {} ended ({}): {} turns in {}s",
        summary.session_id,
        summary.end_reason.as_str(),
        summary.turn_count,
        summary.elapsed_sec
    );
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    println!();
    println!("resolved timing:   {:?}", config.timing());
    println!("resolved capture:  {:?}", config.capture_tuning());
    println!("resolved playback: {:?}", config.playback_tuning());
    println!("backend base url:  {}", config.backend_base_url());
    Ok(())
}

/// Stdin stands in for the recognition engine: each engine run reads one
/// line. A non-empty line is a final result, an empty line is no-speech.
struct ConsoleCapture {
    lines: Arc<Mutex<Lines<BufReader<Stdin>>>>,
}

impl ConsoleCapture {
    fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
        }
    }
}

#[async_trait]
impl SpeechCapturePort for ConsoleCapture {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<CaptureEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let lines = self.lines.clone();
        tokio::spawn(async move {
            let mut lines = lines.lock().await;
            let event = match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim().to_string();
                    if trimmed.is_empty() {
                        CaptureEvent::NoSpeech
                    } else {
                        CaptureEvent::Final(trimmed)
                    }
                }
                Ok(None) => CaptureEvent::Ended,
                Err(err) => CaptureEvent::Error(err.to_string()),
            };
            if tx.send(event).is_ok() {
                // Hold the stream open until the engine is done with this
                // run, so the commit deadline can fire.
                tx.closed().await;
            }
        });
        Ok(rx)
    }

    async fn stop(&self) {}
}

/// Prints the reply and sleeps roughly as long as speaking it would take.
struct ConsolePlayback;

#[async_trait]
impl SpeechPlaybackPort for ConsolePlayback {
    async fn speak(&self, text: &str) -> Result<()> {
        println!("assistant> {text}");
        let ms = (text.chars().count() as u64 * 40).clamp(600, 4_000);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    async fn cancel(&self) {}
}

/// The terminal has no microphone stream; the session simply records
/// nothing and skips the upload.
struct NullRecorder;

#[async_trait]
impl AudioRecorderPort for NullRecorder {
    async fn start(&self, _timeslice_ms: u64) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok(rx)
    }

    async fn stop(&self) {}
    async fn pause(&self) {}
    async fn resume(&self) {}

    fn mime_type(&self) -> &str {
        "audio/webm"
    }
}

struct NullLevels;

impl LevelSourcePort for NullLevels {
    fn waveform(&self) -> Option<Vec<f32>> {
        None
    }
}
