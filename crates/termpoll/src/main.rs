//! # termpoll
//!
//! Model Context Protocol server that drives polled shell sessions.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Session management (create, list, close)
//! - Input (write, interrupt, resize)
//! - Polling (updates since a cursor, optionally long-polled)
//!
//! Logs go to stderr so stdout carries only the MCP stream.
//!
//! ## Architecture
//!
//! This is Layer 3 - the binary that ties together:
//! - termpoll-core: Core types and configuration
//! - termpoll-pty: PTY control, framing and shutdown
//! - termpoll-session: Sessions, registry and topic log

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use rmcp::{transport::stdio, ServiceExt};
use termpoll::TermpollServer;
use termpoll_core::ServerConfig;
use termpoll_session::SessionRegistry;

struct Args {
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args { config: None };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        "termpoll v{} starting (max_sessions={}, shell='{}')",
        env!("CARGO_PKG_VERSION"),
        config.server.max_sessions,
        config.terminal.shell
    );

    let registry = Arc::new(SessionRegistry::with_config(config));
    let reaper = registry.spawn_reaper();
    let server = TermpollServer::new(Arc::clone(&registry));

    tracing::info!("Server initialized, starting stdio transport...");

    // Serve the MCP server over stdio
    let served = match server.serve(stdio()).await {
        Ok(service) => service.waiting().await.map(|_| ()).map_err(anyhow::Error::from),
        Err(e) => {
            tracing::error!("Error starting server: {}", e);
            Err(anyhow::Error::from(e))
        }
    };

    tracing::info!("termpoll shutting down");
    reaper.abort();
    let closer = Arc::clone(&registry);
    tokio::task::spawn_blocking(move || closer.close_all()).await??;

    served
}
