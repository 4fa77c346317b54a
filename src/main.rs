use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eldermama_voice::{
    create_router, live_sink, AppState, AppStore, AudioBackendFactory, AudioSink, AudioSource,
    Config, JsonStorage, SessionUpdate, Speaker, TemplateAssistant, VoiceSession, VoiceState,
    WavDirSink, WsTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "eldermama-voice")]
#[command(about = "Voice session manager for the Eldermama companion")]
struct Cli {
    /// Config file path without extension
    #[arg(short, long, default_value = "config/eldermama")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API with a live voice session
    Serve {
        /// Save reply clips as WAV files here instead of playing them
        #[arg(long)]
        replies_dir: Option<PathBuf>,
    },
    /// Send one recorded utterance and save the spoken reply
    Turn {
        /// WAV file to send as the user's utterance
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for reply clips
        #[arg(short, long, default_value = "replies")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Eldermama Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Voice endpoint: {}", cfg.voice.endpoint_url);

    match cli.command {
        Command::Serve { replies_dir } => serve(cfg, replies_dir).await,
        Command::Turn { input, output_dir } => turn(cfg, input, output_dir).await,
    }
}

fn spawn_session(cfg: &Config, source: AudioSource, sink: Box<dyn AudioSink>) -> VoiceSession {
    let session_config = cfg.session_config();
    let backends = Arc::new(AudioBackendFactory::new(source, cfg.audio.backend_config()));
    let transport = Box::new(WsTransport::new(
        session_config.endpoint_url.clone(),
        session_config.connect_timeout,
    ));
    VoiceSession::spawn(session_config, backends, transport, sink)
}

async fn serve(cfg: Config, replies_dir: Option<PathBuf>) -> Result<()> {
    let storage = JsonStorage::open(&cfg.storage.data_dir)
        .with_context(|| format!("Failed to open data dir {}", cfg.storage.data_dir.display()))?;
    let store = AppStore::open(storage);

    let sink: Box<dyn AudioSink> = match replies_dir {
        Some(dir) => Box::new(WavDirSink::new(dir, "reply")?),
        None => live_sink().await,
    };
    let session = Arc::new(spawn_session(&cfg, cfg.audio.source(), sink));

    let state = AppState::new(Arc::clone(&session), store, Arc::new(TemplateAssistant::new()));
    let sync = state.spawn_store_sync();
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    session.shutdown().await;
    sync.abort();
    Ok(())
}

async fn turn(cfg: Config, input: PathBuf, output_dir: PathBuf) -> Result<()> {
    let sink = WavDirSink::new(&output_dir, "reply")?;
    let source = AudioSource::File(input.to_string_lossy().into_owned());
    let session = spawn_session(&cfg, source, Box::new(sink));
    let mut updates = session.subscribe();

    session.start().await?;

    let mut failed = None;
    let mut left_idle = false;
    loop {
        match updates.recv().await {
            Ok(SessionUpdate::Message(message)) => match message.sender {
                Speaker::User => info!("You: {}", message.text),
                Speaker::Ai => info!("Companion: {}", message.text),
            },
            Ok(SessionUpdate::Tags(tags)) => {
                let labels: Vec<&str> = tags.iter().map(|t| t.label.as_str()).collect();
                info!("Interests mentioned: {}", labels.join(", "));
            }
            Ok(SessionUpdate::Error(e)) => {
                warn!("{}", e);
                failed = Some(e);
            }
            Ok(SessionUpdate::State(VoiceState::Idle)) if left_idle => break,
            Ok(SessionUpdate::State(_)) => left_idle = true,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    session.shutdown().await;

    match failed {
        Some(e) => Err(e).context("Voice turn failed"),
        None => {
            info!("Reply saved under {}", output_dir.display());
            Ok(())
        }
    }
}
