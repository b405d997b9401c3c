//! mdx-batch - analyze audio files and publish their artifacts
//!
//! Usage: `mdx-batch [OPTIONS] <INPUT>...` where each input is an audio file
//! or a directory to scan. Exit status is 0 when every file succeeded or
//! was skipped, 2 when at least one file failed.

use anyhow::{Context, Result};
use clap::Parser;
use mdx_batch::{BatchOptions, BatchOrchestrator, CommandEngine, InputScanner, ResourcePolicy};
use mdx_common::config::{self, TomlConfig};
use mdx_common::events::{BatchEvent, EventBus};
use mdx_common::track::IdScheme;
use mdx_common::{LayoutKind, MediaFormat};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mdx-batch")]
#[command(about = "Batch music structure analysis")]
#[command(version)]
struct Args {
    /// Audio files or directories to analyze
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output root folder
    #[arg(short, long, env = "MDX_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "MDX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory layout of the output root
    #[arg(long, value_parser = parse_layout)]
    layout: Option<LayoutKind>,

    /// Published audio format
    #[arg(long, value_parser = parse_media_format)]
    media_format: Option<MediaFormat>,

    /// Analyze several files concurrently
    #[arg(long)]
    multiprocess: bool,

    /// Upper bound on concurrent workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Render structure visualizations
    #[arg(long)]
    visualize: bool,

    /// Render sonifications
    #[arg(long)]
    sonify: bool,

    /// Re-analyze tracks that already have a result
    #[arg(long)]
    overwrite: bool,

    /// Use hash-prefixed lowercase track ids
    #[arg(long)]
    prefixed_ids: bool,

    /// Analyzer program
    #[arg(long, env = "MDX_ENGINE")]
    engine: Option<String>,

    /// Print the batch report as JSON on stdout
    #[arg(long)]
    json: bool,
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

/// Fold CLI flags over the file configuration
fn apply_overrides(args: &Args, config: &mut TomlConfig) {
    if let Some(layout) = args.layout {
        config.storage.layout = layout;
    }
    if let Some(format) = args.media_format {
        config.storage.media_format = format;
    }
    let batch = &mut config.batch;
    batch.multiprocess |= args.multiprocess;
    batch.include_visualization |= args.visualize;
    batch.include_sonification |= args.sonify;
    batch.overwrite |= args.overwrite;
    if args.prefixed_ids {
        batch.id_scheme = IdScheme::Prefixed;
    }
    if args.max_workers.is_some() {
        batch.max_workers = args.max_workers;
    }
    if let Some(engine) = &args.engine {
        batch.engine.program = engine.clone();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut toml_config = config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    apply_overrides(&args, &mut toml_config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("mdx_batch={0},mdx_common={0}", toml_config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "mdx-batch v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    toml_config.batch.validate().context("Invalid batch configuration")?;
    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let storage = toml_config.storage.open(&root_folder);

    let files = InputScanner::new().discover(&args.inputs);
    if files.is_empty() {
        warn!("No audio files found in inputs");
        return Ok(ExitCode::SUCCESS);
    }

    let event_bus = EventBus::new(256);
    let progress = tokio::spawn(log_progress(event_bus.clone()));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let engine = Arc::new(CommandEngine::from_config(&toml_config.batch.engine));
    let orchestrator = BatchOrchestrator::new(storage, engine)
        .with_event_bus(event_bus)
        .with_resource_policy(ResourcePolicy::detect(&toml_config.batch))
        .with_validation_policy(toml_config.batch.validation_policy())
        .with_cancellation(cancel);

    let options = BatchOptions::from_config(&toml_config.batch);
    let report = orchestrator
        .run_batch(files, &options)
        .await
        .context("Batch could not start")?;

    // Closing the bus ends the progress logger
    drop(orchestrator);
    let _ = progress.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        "Done"
    );

    Ok(if report.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

async fn log_progress(event_bus: EventBus) {
    let mut rx = event_bus.subscribe();
    drop(event_bus);

    loop {
        match rx.recv().await {
            Ok(BatchEvent::FileStarted { index, track, .. }) => {
                info!(file_index = index, track = %track, "Started");
            }
            Ok(BatchEvent::FileCompleted { index, track, elapsed_ms, .. }) => {
                info!(file_index = index, track = %track, elapsed_ms, "Completed");
            }
            Ok(BatchEvent::FileFailed { index, track, error_kind, message, .. }) => {
                warn!(file_index = index, track = ?track, kind = %error_kind, error = %message, "Failed");
            }
            Ok(BatchEvent::BatchCompleted { .. }) => break,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Progress logger lagged, {} events dropped", n);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

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
        _ = ctrl_c => info!("Received Ctrl+C, cancelling pending files"),
        _ = terminate => info!("Received terminate signal, cancelling pending files"),
    }
}
