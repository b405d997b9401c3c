//! Analysis engine boundary
//!
//! The orchestrator treats structure analysis as an opaque, possibly slow,
//! possibly failing call behind [`AnalysisEngine`]. [`CommandEngine`] runs an
//! external analyzer program that writes its outputs into a work directory
//! and prints a JSON manifest on stdout:
//!
//! ```json
//! {
//!   "result": "song.json",
//!   "mixdown": "song.mp3",
//!   "stems": {"bass": "bass.mp3", "drums": "drums.mp3", "other": "other.mp3", "vocals": "vocals.mp3"},
//!   "artifacts": {"activation": "song.activ.npz", "embedding": "song.embed.npy"}
//! }
//! ```
//!
//! Relative paths are resolved against the work directory.

use async_trait::async_trait;
use mdx_common::config::EngineConfig;
use mdx_common::store::ArtifactKind;
use mdx_common::{AnalysisResult, Stem};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Engine errors (recorded per file, never fatal to a batch)
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    /// Analyzer binary not found in PATH
    #[error("Engine program not found: {0}")]
    ProgramNotFound(String),

    #[error("Failed to execute engine: {0}")]
    Execution(String),

    /// Analyzer exited non-zero
    #[error("Engine failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("Engine timed out after {0:?}")]
    Timeout(Duration),

    /// Manifest or result JSON unusable
    #[error("Invalid engine output: {0}")]
    InvalidOutput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything one analysis produced, still inside the work directory
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub result: AnalysisResult,
    pub mixdown: Option<PathBuf>,
    pub stems: Vec<(Stem, PathBuf)>,
    pub artifacts: Vec<(ArtifactKind, PathBuf)>,
}

/// Optional visualization/sonification pass
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub visualization: bool,
    pub sonification: bool,
    /// Plotting backend, always headless
    pub backend: String,
    /// Result already published for this track
    pub result_path: PathBuf,
}

impl RenderRequest {
    pub fn is_empty(&self) -> bool {
        !self.visualization && !self.sonification
    }
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Analyze one audio file, writing outputs under `workdir`
    async fn analyze(&self, input: &Path, workdir: &Path) -> Result<EngineOutput, EngineError>;

    /// Produce visualization and/or sonification artifacts
    ///
    /// Engines without a render step return nothing.
    async fn render(
        &self,
        _input: &Path,
        _request: &RenderRequest,
        _workdir: &Path,
    ) -> Result<Vec<(ArtifactKind, PathBuf)>, EngineError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Manifest {
    result: Option<PathBuf>,
    mixdown: Option<PathBuf>,
    stems: HashMap<String, PathBuf>,
    artifacts: HashMap<ArtifactKind, PathBuf>,
}

/// Runs an external analyzer program
///
/// Invocations:
/// - `<program> <args..> analyze <input> --out-dir <workdir>`
/// - `<program> <args..> render <input> --result <json> --out-dir <workdir> [--visualize] [--sonify]`
///   with `MPLBACKEND` forced to the requested headless backend
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn command(&self, subcommand: &str, input: &Path, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(subcommand)
            .arg(input)
            .arg("--out-dir")
            .arg(workdir)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion and parse the stdout manifest
    async fn run(&self, mut cmd: Command, workdir: &Path) -> Result<Manifest, EngineError> {
        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ProgramNotFound(self.program.clone()),
            _ => EngineError::Execution(e.to_string()),
        })?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| EngineError::Timeout(limit))??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            return Err(EngineError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let mut manifest: Manifest = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::InvalidOutput(format!("manifest: {}", e)))?;
        manifest.resolve(workdir);
        Ok(manifest)
    }
}

impl Manifest {
    fn resolve(&mut self, workdir: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = workdir.join(&*p);
            }
        };
        self.result.iter_mut().for_each(join);
        self.mixdown.iter_mut().for_each(join);
        self.stems.values_mut().for_each(join);
        self.artifacts.values_mut().for_each(join);
    }

    fn artifacts(self) -> Vec<(ArtifactKind, PathBuf)> {
        let mut artifacts: Vec<_> = self
            .artifacts
            .into_iter()
            .filter(|(kind, _)| *kind != ArtifactKind::Result)
            .collect();
        artifacts.sort_by_key(|(kind, _)| kind.as_str());
        artifacts
    }
}

#[async_trait]
impl AnalysisEngine for CommandEngine {
    async fn analyze(&self, input: &Path, workdir: &Path) -> Result<EngineOutput, EngineError> {
        if !input.is_file() {
            return Err(EngineError::InputNotFound(input.to_path_buf()));
        }

        tracing::debug!(
            program = %self.program,
            input = %input.display(),
            workdir = %workdir.display(),
            "Running analysis engine"
        );
        let mut manifest = self.run(self.command("analyze", input, workdir), workdir).await?;

        let result_path = manifest
            .result
            .take()
            .ok_or_else(|| EngineError::InvalidOutput("manifest has no result".to_string()))?;
        let json = tokio::fs::read(&result_path).await.map_err(|e| {
            EngineError::InvalidOutput(format!("reading {}: {}", result_path.display(), e))
        })?;
        let result: AnalysisResult = serde_json::from_slice(&json)
            .map_err(|e| EngineError::InvalidOutput(format!("result JSON: {}", e)))?;

        let mut stems = Vec::with_capacity(manifest.stems.len());
        for (name, path) in manifest.stems.drain() {
            let stem = Stem::parse(&name)
                .map_err(|_| EngineError::InvalidOutput(format!("unknown stem {:?}", name)))?;
            stems.push((stem, path));
        }
        stems.sort_by_key(|(stem, _)| *stem);

        Ok(EngineOutput {
            result,
            mixdown: manifest.mixdown.take(),
            stems,
            artifacts: manifest.artifacts(),
        })
    }

    async fn render(
        &self,
        input: &Path,
        request: &RenderRequest,
        workdir: &Path,
    ) -> Result<Vec<(ArtifactKind, PathBuf)>, EngineError> {
        if request.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.command("render", input, workdir);
        cmd.arg("--result").arg(&request.result_path);
        if request.visualization {
            cmd.arg("--visualize");
        }
        if request.sonification {
            cmd.arg("--sonify");
        }
        cmd.env("MPLBACKEND", &request.backend);

        Ok(self.run(cmd, workdir).await?.artifacts())
    }
}
