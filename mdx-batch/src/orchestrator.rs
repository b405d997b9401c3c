//! Batch orchestrator
//!
//! Drives the engine over a list of input files and publishes every output
//! through the stores. Each file runs in its own task: an engine error, a
//! storage error or a panic becomes a [`FileOutcome::Failure`] for that file
//! and the batch carries on. Only infrastructure problems detected before
//! any file starts (an unusable output root) fail the whole batch.

use crate::engine::{AnalysisEngine, EngineError, EngineOutput, RenderRequest};
use crate::strategy::{ExecutionStrategy, ResourcePolicy};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use mdx_common::config::BatchConfig;
use mdx_common::events::{BatchEvent, EventBus};
use mdx_common::store::Storage;
use mdx_common::track::IdScheme;
use mdx_common::{Error as StoreError, TrackId, ValidationPolicy};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Whole-batch failures (per-file problems never surface here)
#[derive(Debug, Error)]
pub enum BatchError {
    /// Output root cannot be created or written
    #[error("Storage root {path} unavailable: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid batch options: {0}")]
    InvalidOptions(String),
}

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub include_visualization: bool,
    pub include_sonification: bool,
    pub multiprocess: bool,
    /// Re-analyze tracks that already have a result
    pub overwrite: bool,
    pub id_scheme: IdScheme,
    pub render_backend: String,
    pub render_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            include_visualization: config.include_visualization,
            include_sonification: config.include_sonification,
            multiprocess: config.multiprocess,
            overwrite: config.overwrite,
            id_scheme: config.id_scheme,
            render_backend: config.render_backend.clone(),
            render_timeout: Duration::from_secs(config.render_timeout_secs),
        }
    }
}

/// Why one file failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InputNotFound,
    /// File name yields no usable track id
    InvalidInput,
    Analysis,
    /// Engine output failed schema validation
    InvalidResult,
    StorageWrite,
    WorkerPanic,
    Cancelled,
    /// Another input in the same batch maps to the same track
    DuplicateTrack,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InputNotFound => "input_not_found",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Analysis => "analysis",
            FailureKind::InvalidResult => "invalid_result",
            FailureKind::StorageWrite => "storage_write",
            FailureKind::WorkerPanic => "worker_panic",
            FailureKind::Cancelled => "cancelled",
            FailureKind::DuplicateTrack => "duplicate_track",
        }
    }

    fn from_engine(error: &EngineError) -> Self {
        match error {
            EngineError::InputNotFound(_) => FailureKind::InputNotFound,
            _ => FailureKind::Analysis,
        }
    }

    fn from_store(error: &StoreError) -> Self {
        match error {
            StoreError::InvalidResult(_) => FailureKind::InvalidResult,
            // Manifest pointed at a file the engine never wrote
            StoreError::NotFound(_) => FailureKind::Analysis,
            _ => FailureKind::StorageWrite,
        }
    }
}

/// Counts recorded for a successful analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisMetadata {
    pub bpm: f64,
    pub beat_count: usize,
    pub downbeat_count: usize,
    pub segment_count: usize,
    pub stem_count: usize,
    pub artifact_count: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Success {
        track: TrackId,
        input: PathBuf,
        metadata: AnalysisMetadata,
    },
    /// Result already present and overwrite disabled
    Skipped { track: TrackId, input: PathBuf },
    Failure {
        track: Option<TrackId>,
        input: PathBuf,
        kind: FailureKind,
        message: String,
    },
}

impl FileOutcome {
    pub fn input(&self) -> &Path {
        match self {
            FileOutcome::Success { input, .. }
            | FileOutcome::Skipped { input, .. }
            | FileOutcome::Failure { input, .. } => input,
        }
    }

    pub fn track(&self) -> Option<&TrackId> {
        match self {
            FileOutcome::Success { track, .. } | FileOutcome::Skipped { track, .. } => Some(track),
            FileOutcome::Failure { track, .. } => track.as_ref(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FileOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileOutcome::Failure { .. })
    }

    fn failure(track: Option<TrackId>, input: &Path, kind: FailureKind, message: impl Into<String>) -> Self {
        FileOutcome::Failure {
            track,
            input: input.to_path_buf(),
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one batch, one entry per input in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Skipped { .. }))
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

pub struct BatchOrchestrator {
    storage: Storage,
    engine: Arc<dyn AnalysisEngine>,
    event_bus: EventBus,
    resources: ResourcePolicy,
    validation: ValidationPolicy,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(storage: Storage, engine: Arc<dyn AnalysisEngine>) -> Self {
        Self {
            storage,
            engine,
            event_bus: EventBus::new(256),
            resources: ResourcePolicy::detect(&BatchConfig::default()),
            validation: BatchConfig::default().validation_policy(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_resource_policy(mut self, resources: ResourcePolicy) -> Self {
        self.resources = resources;
        self
    }

    /// Validation applied to engine output before anything is published
    pub fn with_validation_policy(mut self, validation: ValidationPolicy) -> Self {
        self.validation = validation;
        self
    }

    /// Files not yet started when `cancel` fires are recorded as cancelled
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Analyze `files` and publish their artifacts
    ///
    /// Per-file failures are recorded in the report; `Err` means the batch
    /// never started.
    pub async fn run_batch(
        &self,
        files: Vec<PathBuf>,
        options: &BatchOptions,
    ) -> Result<BatchReport, BatchError> {
        if options.render_timeout.is_zero()
            && (options.include_visualization || options.include_sonification)
        {
            return Err(BatchError::InvalidOptions(
                "render timeout must be non-zero".to_string(),
            ));
        }
        self.probe_storage()?;

        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let strategy = ExecutionStrategy::choose(options.multiprocess, &self.resources);
        let total_files = files.len();

        tracing::info!(
            batch_id = %batch_id,
            total_files,
            strategy = %strategy,
            root = %self.storage.layout.root().display(),
            "Starting batch"
        );
        self.event_bus.emit_lossy(BatchEvent::BatchStarted {
            batch_id,
            total_files,
            strategy: strategy.to_string(),
            timestamp: Utc::now(),
        });

        let worker = Arc::new(Worker {
            batch_id,
            storage: self.storage.clone(),
            engine: Arc::clone(&self.engine),
            event_bus: self.event_bus.clone(),
            validation: self.validation,
            options: options.clone(),
            cancel: self.cancel.clone(),
        });

        let mut duplicates = duplicate_tracks(&files, options.id_scheme);

        // With concurrency 1 the next file is not spawned until the previous
        // one finishes. Outcomes are sorted back into input order below.
        let mut outcomes: Vec<(usize, FileOutcome)> = stream::iter(files.into_iter().enumerate())
            .map(|(index, input)| {
                let worker = Arc::clone(&worker);
                let claimed = duplicates.remove(&index);
                async move {
                    if let Some((track, first)) = claimed {
                        return (index, worker.duplicate(index, &input, track, &first));
                    }
                    let handle = tokio::spawn({
                        let worker = Arc::clone(&worker);
                        let input = input.clone();
                        async move { worker.process(index, &input).await }
                    });
                    let outcome = match handle.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            let (kind, message) = if e.is_panic() {
                                (FailureKind::WorkerPanic, panic_message(e.into_panic()))
                            } else {
                                (FailureKind::Cancelled, e.to_string())
                            };
                            tracing::error!(
                                batch_id = %worker.batch_id,
                                file_index = index,
                                input = %input.display(),
                                error = %message,
                                "Worker task aborted"
                            );
                            let outcome = FileOutcome::failure(None, &input, kind, message);
                            worker.emit_failure(index, &outcome);
                            outcome
                        }
                    };
                    (index, outcome)
                }
            })
            .buffer_unordered(strategy.concurrency())
            .collect()
            .await;
        outcomes.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<FileOutcome> = outcomes.into_iter().map(|(_, outcome)| outcome).collect();

        let report = BatchReport {
            batch_id,
            strategy: strategy.to_string(),
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            outcomes,
        };

        tracing::info!(
            batch_id = %batch_id,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            elapsed_ms = report.elapsed_ms,
            "Batch completed"
        );
        self.event_bus.emit_lossy(BatchEvent::BatchCompleted {
            batch_id,
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
            elapsed_ms: report.elapsed_ms,
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Create the layout and prove the root is writable
    fn probe_storage(&self) -> Result<(), BatchError> {
        let layout = &self.storage.layout;
        let unavailable = |source| BatchError::StorageUnavailable {
            path: layout.root().to_path_buf(),
            source,
        };
        layout.ensure_directories().map_err(unavailable)?;
        tempfile::tempfile_in(layout.root()).map_err(unavailable)?;
        Ok(())
    }
}

/// Inputs whose track is already claimed by an earlier input, keyed by index
///
/// Only existing files claim a track, so a missing input never shadows a
/// later one with the same name.
fn duplicate_tracks(files: &[PathBuf], scheme: IdScheme) -> HashMap<usize, (TrackId, PathBuf)> {
    let mut claims: HashMap<TrackId, &PathBuf> = HashMap::new();
    let mut duplicates = HashMap::new();
    for (index, input) in files.iter().enumerate() {
        if !input.is_file() {
            continue;
        }
        let Ok(track) = TrackId::from_file_name_with(input, scheme) else {
            continue;
        };
        match claims.get(&track) {
            Some(first) => {
                duplicates.insert(index, (track, (*first).clone()));
            }
            None => {
                claims.insert(track, input);
            }
        }
    }
    duplicates
}

/// State shared by all tasks of one batch
struct Worker {
    batch_id: Uuid,
    storage: Storage,
    engine: Arc<dyn AnalysisEngine>,
    event_bus: EventBus,
    validation: ValidationPolicy,
    options: BatchOptions,
    cancel: CancellationToken,
}

impl Worker {
    async fn process(&self, index: usize, input: &Path) -> FileOutcome {
        let outcome = self.try_process(index, input).await;
        match &outcome {
            FileOutcome::Failure { kind, message, track, .. } => {
                tracing::warn!(
                    batch_id = %self.batch_id,
                    file_index = index,
                    input = %input.display(),
                    track = ?track.as_ref().map(|t| t.as_str()),
                    kind = kind.as_str(),
                    error = %message,
                    "File failed"
                );
                self.emit_failure(index, &outcome);
            }
            FileOutcome::Skipped { track, .. } => {
                tracing::info!(
                    batch_id = %self.batch_id,
                    file_index = index,
                    track = %track,
                    "Result exists, skipping"
                );
                self.event_bus.emit_lossy(BatchEvent::FileSkipped {
                    batch_id: self.batch_id,
                    index,
                    track: track.to_string(),
                    timestamp: Utc::now(),
                });
            }
            FileOutcome::Success { track, metadata, .. } => {
                self.event_bus.emit_lossy(BatchEvent::FileCompleted {
                    batch_id: self.batch_id,
                    index,
                    track: track.to_string(),
                    elapsed_ms: metadata.elapsed_ms,
                    timestamp: Utc::now(),
                });
            }
        }
        outcome
    }

    async fn try_process(&self, index: usize, input: &Path) -> FileOutcome {
        if self.cancel.is_cancelled() {
            return FileOutcome::failure(None, input, FailureKind::Cancelled, "batch cancelled");
        }
        if !input.is_file() {
            return FileOutcome::failure(
                None,
                input,
                FailureKind::InputNotFound,
                format!("{} is not a readable file", input.display()),
            );
        }

        let track = match TrackId::from_file_name_with(input, self.options.id_scheme) {
            Ok(track) => track,
            Err(e) => {
                return FileOutcome::failure(None, input, FailureKind::InvalidInput, e.to_string())
            }
        };

        if !self.options.overwrite && self.storage.results.exists(&track) {
            return FileOutcome::Skipped {
                track,
                input: input.to_path_buf(),
            };
        }

        let start = Instant::now();
        tracing::info!(
            batch_id = %self.batch_id,
            file_index = index,
            track = %track,
            input = %input.display(),
            "Analyzing"
        );
        self.event_bus.emit_lossy(BatchEvent::FileStarted {
            batch_id: self.batch_id,
            index,
            track: track.to_string(),
            file_path: input.display().to_string(),
            timestamp: Utc::now(),
        });

        // Scratch space lives in the layout's cache dir and is removed on drop
        let workdir = match tempfile::Builder::new()
            .prefix(&format!("{}-", track))
            .tempdir_in(self.storage.layout.cache_dir())
        {
            Ok(dir) => dir,
            Err(e) => {
                return FileOutcome::failure(
                    Some(track),
                    input,
                    FailureKind::StorageWrite,
                    format!("creating work directory: {}", e),
                )
            }
        };

        let mut output = match self.engine.analyze(input, workdir.path()).await {
            Ok(output) => output,
            Err(e) => {
                return FileOutcome::failure(Some(track), input, FailureKind::from_engine(&e), e.to_string())
            }
        };
        if output.result.file_name.is_empty() {
            output.result.file_name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        if output.result.file_path.is_empty() {
            output.result.file_path = input.display().to_string();
        }
        if let Err(reason) = output.result.validate(&self.validation) {
            return FileOutcome::failure(Some(track), input, FailureKind::InvalidResult, reason);
        }

        let storage = self.storage.clone();
        let publish_track = track.clone();
        let published = tokio::task::spawn_blocking(move || publish(&storage, &publish_track, output)).await;
        let mut metadata = match published {
            Ok(Ok(metadata)) => metadata,
            Ok(Err(e)) => {
                return FileOutcome::failure(Some(track), input, FailureKind::from_store(&e), e.to_string())
            }
            Err(e) => {
                return FileOutcome::failure(Some(track), input, FailureKind::WorkerPanic, e.to_string())
            }
        };

        metadata.artifact_count += self.render(&track, input, workdir.path()).await;
        metadata.elapsed_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            batch_id = %self.batch_id,
            file_index = index,
            track = %track,
            bpm = metadata.bpm,
            segments = metadata.segment_count,
            stems = metadata.stem_count,
            elapsed_ms = metadata.elapsed_ms,
            "Analysis published"
        );

        FileOutcome::Success {
            track,
            input: input.to_path_buf(),
            metadata,
        }
    }

    /// Run the optional render step; failures only warn
    ///
    /// Returns the number of artifacts published.
    async fn render(&self, track: &TrackId, input: &Path, workdir: &Path) -> usize {
        let request = RenderRequest {
            visualization: self.options.include_visualization,
            sonification: self.options.include_sonification,
            backend: self.options.render_backend.clone(),
            result_path: match self.storage.results.locate(track) {
                Some(artifact) => artifact.path,
                None => return 0,
            },
        };
        if request.is_empty() {
            return 0;
        }

        let outcome = tokio::time::timeout(
            self.options.render_timeout,
            self.engine.render(input, &request, workdir),
        )
        .await;
        let message = match outcome {
            Ok(Ok(artifacts)) => {
                let mut published = 0;
                for (kind, path) in artifacts {
                    match self.storage.artifacts.put_file(track, kind, &path) {
                        Ok(_) => published += 1,
                        Err(e) => {
                            tracing::warn!(track = %track, kind = %kind, error = %e, "Render artifact not published")
                        }
                    }
                }
                return published;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("render timed out after {:?}", self.options.render_timeout),
        };

        tracing::warn!(batch_id = %self.batch_id, track = %track, error = %message, "Render step failed");
        self.event_bus.emit_lossy(BatchEvent::RenderFailed {
            batch_id: self.batch_id,
            track: track.to_string(),
            message,
            timestamp: Utc::now(),
        });
        0
    }

    /// Refuse a second writer for a track already handled in this batch
    fn duplicate(&self, index: usize, input: &Path, track: TrackId, first: &Path) -> FileOutcome {
        tracing::warn!(
            batch_id = %self.batch_id,
            file_index = index,
            input = %input.display(),
            track = %track,
            first = %first.display(),
            "Track already claimed in this batch"
        );
        let message = format!("track '{}' is already produced from {}", track, first.display());
        let outcome = FileOutcome::failure(Some(track), input, FailureKind::DuplicateTrack, message);
        self.emit_failure(index, &outcome);
        outcome
    }

    fn emit_failure(&self, index: usize, outcome: &FileOutcome) {
        if let FileOutcome::Failure { track, kind, message, .. } = outcome {
            self.event_bus.emit_lossy(BatchEvent::FileFailed {
                batch_id: self.batch_id,
                index,
                track: track.as_ref().map(|t| t.to_string()),
                error_kind: kind.as_str().to_string(),
                message: message.clone(),
                timestamp: Utc::now(),
            });
        }
    }
}

/// Publish media and artifacts, then the result last so a present result
/// always means a complete track
fn publish(storage: &Storage, track: &TrackId, output: EngineOutput) -> mdx_common::Result<AnalysisMetadata> {
    if let Some(mixdown) = &output.mixdown {
        storage.media.publish_mixdown(track, mixdown)?;
    }
    for (stem, path) in &output.stems {
        storage.media.publish_stem(track, *stem, path)?;
    }
    for (kind, path) in &output.artifacts {
        storage.artifacts.put_file(track, *kind, path)?;
    }
    storage.results.put(track, &output.result)?;

    Ok(AnalysisMetadata {
        bpm: output.result.bpm,
        beat_count: output.result.beats.len(),
        downbeat_count: output.result.downbeats.len(),
        segment_count: output.result.segments.len(),
        stem_count: output.stems.len(),
        artifact_count: output.artifacts.len(),
        elapsed_ms: 0,
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", s)
    } else {
        "worker panicked".to_string()
    }
}
