use std::env;
use std::thread;

use anyhow::{Context, anyhow};
use pmoconfig::get_config;
use pmogrbl::{GrblConfigExt, SenderEvent, SenderWorker};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let config = get_config();
    let level = config.get_log_min_level().unwrap_or_else(|_| "INFO".to_string());
    // RUST_LOG a priorité sur la configuration
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.get_log_enable_console().unwrap_or(true))
        .init();
}

fn usage() -> anyhow::Error {
    anyhow!("usage: PMOSender <program.nc> [serial-port]")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Configuration ==========
    init_logging();

    let mut args = env::args().skip(1);
    let program_path = args.next().ok_or_else(usage)?;

    let config = get_config();
    let mut options = config
        .get_sender_options()
        .context("Invalid sender configuration")?;
    if let Some(port) = args.next() {
        options.port = Some(port);
    }
    let port = options.port.clone().ok_or_else(|| {
        anyhow!(
            "No serial port configured (serial.port in {})",
            config.directory()
        )
    })?;
    let baud_rate = options.baud_rate;

    // ========== PHASE 2 : Sender ==========
    info!("🔌 Starting GRBL sender on {} @ {} baud", port, baud_rate);
    let (worker, handle) = SenderWorker::spawn(options);

    let events = handle.subscribe();
    thread::spawn(move || {
        for event in events {
            match event {
                SenderEvent::LogLine(line) => info!(target: "pmosender", "{}", line),
                SenderEvent::LineSent { index, text } => {
                    info!(target: "pmosender", index, "➡️ {}", text)
                }
                SenderEvent::PositionChanged(position) => {
                    info!(target: "pmosender", "📍 {}", position)
                }
                SenderEvent::SettingsFetched(settings) => {
                    info!(target: "pmosender", "⚙️ {} settings fetched", settings.len())
                }
                SenderEvent::LinkError(message) => warn!(target: "pmosender", "⚠️ {}", message),
                SenderEvent::RecoveryFailed(reason) => {
                    warn!(target: "pmosender", "⚠️ {}", reason)
                }
            }
        }
    });

    handle.connect(port, baud_rate).await?;

    // ========== PHASE 3 : Streaming ==========
    let lines = handle.load_file(&program_path).await?;
    info!("📄 {} loaded ({} lines)", program_path, lines);
    handle.play().await?;

    info!("✅ Streaming started");
    info!("Press Ctrl+C to stop...");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for Ctrl+C: {}", e);
    }

    handle.pause().await?;
    let status = handle.status().await?;
    info!(
        "⏸️ Stopped after line {:?} of {}",
        status.machine.last_sent(),
        status.program_len
    );

    handle.shutdown().await?;
    worker.wait().await
}
