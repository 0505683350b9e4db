//! Steadfast proxy server.
//!
//! # Usage
//!
//! ```sh
//! export STEADFAST_PORT=3000
//! export STEADFAST_SYMBOLS_DIR=./symbols
//! cargo run --bin steadfast-server --features cli
//! ```
//!
//! Panics are appended to `server_crash.log` before the process exits.

use std::fs::OpenOptions;
use std::io::Write;

use steadfast::config::ServerConfig;
use steadfast::instruments::download::refresh_public_files;
use steadfast::server::{AppState, router};

const CRASH_LOG: &str = "server_crash.log";

fn install_crash_log() {
    std::panic::set_hook(Box::new(|info| {
        let line = format!("[{}] Uncaught panic: {info}\n", chrono::Utc::now().to_rfc3339());
        let logged = OpenOptions::new()
            .create(true)
            .append(true)
            .open(CRASH_LOG)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        match logged {
            Ok(()) => eprintln!("Critical error logged to {CRASH_LOG}"),
            Err(e) => eprintln!("{line}(could not write {CRASH_LOG}: {e})"),
        }
        std::process::exit(1);
    }));
}

#[tokio::main]
async fn main() -> steadfast::Result<()> {
    let config = ServerConfig::from_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    install_crash_log();

    std::fs::create_dir_all(&config.symbols_dir)?;
    let state = AppState::new(&config)?;
    if config.paper_trading {
        tracing::warn!("paper trading enabled, orders will not reach any broker");
    }

    let poller = state.risk.spawn(config.position_poll_interval);

    let http = steadfast::client::BrokerHttp::with_settings(config.http_timeout, config.retry)?;
    let symbols_dir = config.symbols_dir.clone();
    tokio::spawn(async move {
        refresh_public_files(&http, &symbols_dir).await;
    });

    let app = router(state.clone(), &config.cors_origins);
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server is running");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
        })
        .await?;

    poller.abort();
    tracing::info!("server stopped");
    Ok(())
}
