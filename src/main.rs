// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use turnstream::config;
use turnstream::engine;
use turnstream::proxy;

use std::net::SocketAddr;

#[derive(Parser)]
#[command(name = "turnstream", about = "Streaming chat transcoder")]
struct Cli {
    /// Path to the turnstream.yaml config file
    #[arg(long, default_value = "turnstream.yaml", env = "TURNSTREAM_CONFIG")]
    config: String,

    /// Port to listen on
    #[arg(long, default_value_t = proxy::BIND_ADDR.1, env = "TURNSTREAM_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::from((proxy::BIND_ADDR.0, cli.port));
    tracing::info!(%addr, "turnstream starting");

    let source = config::FileSource {
        path: std::path::PathBuf::from(cli.config),
    };
    let config = match config::load_config(&source) {
        Ok(c) => std::sync::Arc::new(c),
        Err(e) => {
            tracing::error!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        version = %config.version,
        upstream = %config.upstream.chat_url(),
        token_source = if config.upstream.api_token.is_some() { "config" } else { "env" },
        idle_timeout_ms = config.stream.idle_timeout_ms,
        channel_capacity = config.stream.channel_capacity,
        noise_markers = config.noise.markers.len(),
        noise_patterns = config.noise.patterns.len(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let max_body_bytes = config.server.max_body_bytes;
    let upstream: std::sync::Arc<dyn proxy::UpstreamClient> =
        std::sync::Arc::new(engine::build_chat_engine(config));

    let app = proxy::build_router(upstream, max_body_bytes);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(%addr, "failed to bind: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "turnstream listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
        std::process::exit(1);
    }
}
