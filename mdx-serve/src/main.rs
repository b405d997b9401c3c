//! mdx-serve - artifact streaming server
//!
//! Serves analysis results and audio from an output root produced by
//! mdx-batch. Read-only; safe to run while a batch is publishing.

use anyhow::{Context, Result};
use clap::Parser;
use mdx_common::config::{self, TomlConfig};
use mdx_common::{LayoutKind, MediaFormat};
use mdx_serve::{build_router, AppState};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mdx-serve")]
#[command(about = "Music structure artifact streaming server")]
#[command(version)]
struct Args {
    /// Output root folder to serve
    #[arg(short, long, env = "MDX_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "MDX_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (e.g. 127.0.0.1:8000)
    #[arg(short, long, env = "MDX_BIND")]
    bind: Option<String>,

    /// Cache-Control max-age for audio responses, seconds
    #[arg(long)]
    cache_max_age: Option<u64>,

    /// Directory layout of the output root
    #[arg(long, value_parser = parse_layout)]
    layout: Option<LayoutKind>,

    /// Published audio format
    #[arg(long, value_parser = parse_media_format)]
    media_format: Option<MediaFormat>,
}

fn parse_layout(s: &str) -> std::result::Result<LayoutKind, String> {
    match s {
        "standard" => Ok(LayoutKind::Standard),
        "simple" => Ok(LayoutKind::Simple),
        other => Err(format!("unknown layout {:?} (standard, simple)", other)),
    }
}

fn parse_media_format(s: &str) -> std::result::Result<MediaFormat, String> {
    match s {
        "mp3" => Ok(MediaFormat::Mp3),
        "wav" => Ok(MediaFormat::Wav),
        other => Err(format!("unknown media format {:?} (mp3, wav)", other)),
    }
}

fn apply_overrides(args: &Args, config: &mut TomlConfig) {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(max_age) = args.cache_max_age {
        config.server.cache_max_age = max_age;
    }
    if let Some(layout) = args.layout {
        config.storage.layout = layout;
    }
    if let Some(format) = args.media_format {
        config.storage.media_format = format;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut toml_config = config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&args, &mut toml_config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "mdx_serve={0},mdx_common={0},tower_http={0}",
                    toml_config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "mdx-serve v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    if !root_folder.is_dir() {
        warn!(root = %root_folder.display(), "Root folder does not exist yet; every track will be 404");
    }

    let storage = toml_config.storage.open(&root_folder);
    let state = AppState::new(storage).with_cache_max_age(toml_config.server.cache_max_age);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(toml_config.server.bind.as_str())
        .await
        .with_context(|| format!("Failed to bind {}", toml_config.server.bind))?;
    info!("Listening on http://{}", toml_config.server.bind);
    info!("Health check: http://{}/health", toml_config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
