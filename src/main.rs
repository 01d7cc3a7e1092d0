use std::io::Write;

use anyhow::{Context, Result};
use clap::Parser;
use parlez::{
    visualizer::CANVAS_SIZE, AppConfig, ChatSession, InteractionMode, ProficiencyLevel, Renderer,
    SessionManager, Settings, TerminalSurface,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parlez", version)]
#[command(about = "Practise French conversation by text or voice")]
struct Args {
    /// CEFR level (A1, A2, B1, B2, C1, C2)
    #[arg(short, long, default_value = "A1")]
    level: ProficiencyLevel,

    /// Target vocabulary, comma separated
    #[arg(short, long, value_delimiter = ',')]
    words: Vec<String>,

    /// Conversation topic
    #[arg(short, long)]
    topic: Option<String>,

    /// Interaction mode: text or speech
    #[arg(short, long, default_value = "speech")]
    mode: InteractionMode,

    /// Settings file (without extension)
    #[arg(short, long, default_value = "config/parlez")]
    config: String,

    /// Stream a WAV file instead of the microphone
    #[arg(long)]
    input: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(&args.config)?;
    if args.input.is_some() {
        settings.audio.input_file = args.input.clone();
    }

    let app = AppConfig {
        level: args.level,
        words: args
            .words
            .iter()
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect(),
        topic: args.topic,
        mode: args.mode,
    };

    info!(
        "Parlez v{} ({} level, topic: {})",
        env!("CARGO_PKG_VERSION"),
        app.level,
        app.topic_or_default()
    );

    match app.mode {
        InteractionMode::Text => run_text(&settings, &app).await,
        InteractionMode::Speech => run_speech(settings, &app).await,
    }
}

async fn run_text(settings: &Settings, app: &AppConfig) -> Result<()> {
    settings.require_api_key()?;

    let mut chat = ChatSession::new(&settings.service, app);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Écrivez en français. Type /quit to leave.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        match chat.send(line).await {
            Ok(reply) => println!("{}\n", reply),
            Err(e) => {
                error!("Chat request failed: {}", e);
                println!("{}\n", e.user_message());
            }
        }
    }

    Ok(())
}

async fn run_speech(settings: Settings, app: &AppConfig) -> Result<()> {
    let visual = settings.visualizer.clone();
    let mut manager =
        SessionManager::from_settings(settings).context("Failed to set up voice session")?;

    loop {
        let disconnected = match manager.connect(app).await {
            Ok(signal) => signal,
            Err(e) => {
                eprintln!("{}", e.user_message());
                if prompt_retry().await? {
                    continue;
                }
                return Ok(());
            }
        };

        println!("Parlez ! Press Ctrl+C to stop.");

        let cancel = CancellationToken::new();
        let renderer = visual.enabled.then(|| {
            let surface = TerminalSurface::stdout(visual.width, visual.height, CANVAS_SIZE, CANVAS_SIZE);
            tokio::spawn(Renderer::new(surface, manager.volume(), visual.fps).run(cancel.clone()))
        });

        let remote_ended = tokio::select! {
            _ = tokio::signal::ctrl_c() => false,
            reason = disconnected => {
                if let Ok(reason) = reason {
                    info!("Session ended by remote: {:?}", reason);
                }
                true
            }
        };

        if let Some(stats) = manager.stats() {
            info!(
                "Session {}: {:.1}s, {} frames sent, {} chunks received ({} dropped), {} turns",
                stats.session_id,
                stats.duration_secs,
                stats.frames_sent,
                stats.chunks_received,
                stats.chunks_dropped,
                stats.turns_completed
            );
        }

        cancel.cancel();
        manager.disconnect().await;
        if let Some(renderer) = renderer {
            match renderer.await {
                Ok(Err(e)) => error!("Visualizer failed: {}", e),
                Err(e) => error!("Visualizer task panicked: {}", e),
                Ok(Ok(_)) => {}
            }
        }

        if !remote_ended || !prompt_retry().await? {
            return Ok(());
        }
    }
}

async fn prompt_retry() -> Result<bool> {
    print!("Try again? [y/N] ");
    std::io::stdout().flush()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
