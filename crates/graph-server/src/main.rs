//! `graphd`: the graph data sidecar binary (SPEC_FULL.md §6). Grounded on
//! `moire-web`'s `main.rs`: `tracing-subscriber` with an `EnvFilter`
//! defaulting to `info`, a `tokio` multi-threaded runtime, both transports
//! bound before the "ready" log line, and a `tokio::signal::ctrl_c` shutdown
//! hook that closes every open graph's storage.

mod config;
mod dispatch;
mod state;
mod tcp;
mod ws;

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::{Cli, ServerConfig};
use state::AppState;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from(cli);
    let exit_code = run(config).await;
    std::process::exit(exit_code);
}

async fn run(config: ServerConfig) -> i32 {
    let tcp_port = config.tcp_port;
    let ws_port = config.ws_port;
    let enable_websocket = config.enable_websocket;
    let state = AppState::new(config);
    let dispatcher = Arc::new(dispatch::build_dispatcher());

    let tcp_listener = match TcpListener::bind(("127.0.0.1", tcp_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(port = tcp_port, %e, "failed to bind TCP listener");
            return 1;
        }
    };
    info!(port = tcp_port, "TCP listener bound");

    let tcp_task = tokio::spawn(tcp::run_tcp_acceptor(tcp_listener, dispatcher.clone(), state.clone()));

    let ws_task = if enable_websocket {
        let ws_listener = match TcpListener::bind(("127.0.0.1", ws_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(port = ws_port, %e, "failed to bind WebSocket listener");
                tcp_task.abort();
                return 1;
            }
        };
        info!(port = ws_port, "WebSocket listener bound");
        let router = ws::build_router(dispatcher, state.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(ws_listener, router).await {
                error!(%e, "websocket server error");
            }
        }))
    } else {
        None
    };

    info!("graphd ready");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutdown requested");

    tcp_task.abort();
    if let Some(task) = ws_task {
        task.abort();
    }
    state.shutdown().await;
    0
}
