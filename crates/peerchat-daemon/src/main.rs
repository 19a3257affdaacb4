//! peerchat-daemon — a peer-to-peer chat daemon.
//!
//! Runs the P2P protocol engine and exposes the local HTTP/WebSocket
//! control interface for a co-located UI. See `--help` for flags.

mod app;
mod config;

use app::Application;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = config::CliArgs::parse_from_env();
    let daemon_config = match config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(%e, "configuration error");
            std::process::exit(1);
        }
    };

    tracing::info!(data_dir = %daemon_config.data_dir.display(), "starting p2p chat daemon");

    let application = match Application::start(daemon_config).await {
        Ok(application) => application,
        Err(e) => {
            tracing::error!(%e, "startup failed");
            std::process::exit(1);
        }
    };

    println!("===============================================================");
    println!(" Daemon is running. API and UI accessible at: {}", application.api_addr());
    println!("===============================================================");
    println!("Press Ctrl+C to stop.");

    application.wait_for_shutdown_signal().await;
    application.stop().await;
}
