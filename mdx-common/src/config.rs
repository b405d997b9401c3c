//! Configuration loading and root folder resolution
//!
//! Priority for every setting: command line, environment, TOML file,
//! compiled default. The binaries parse their own CLI with clap and pass
//! overrides in; this module owns the TOML schema and root folder lookup.

use crate::layout::{LayoutKind, MediaFormat, StorageLayout};
use crate::model::ValidationPolicy;
use crate::store::{ResultEncoding, Storage};
use crate::track::IdScheme;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the output root
pub const ROOT_FOLDER_ENV: &str = "MDX_ROOT_FOLDER";

/// Environment variable naming an explicit config file
pub const CONFIG_FILE_ENV: &str = "MDX_CONFIG";

/// Rendering backends that never open a window
pub const HEADLESS_BACKENDS: &[&str] = &["Agg", "pdf", "svg", "ps", "cairo"];

/// Bootstrap configuration loaded from TOML
///
/// Every section is optional; a missing file yields all defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub layout: LayoutKind,
    pub result_encoding: ResultEncoding,
    pub media_format: MediaFormat,
}

impl StorageConfig {
    /// Build the stores rooted at `root`
    pub fn open(&self, root: impl Into<PathBuf>) -> Storage {
        let layout = StorageLayout::new(root, self.layout, self.media_format);
        Storage::new(layout, self.result_encoding)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// `Cache-Control: max-age` for audio responses, seconds
    pub cache_max_age: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            cache_max_age: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub include_visualization: bool,
    pub include_sonification: bool,
    pub multiprocess: bool,
    pub overwrite: bool,
    /// How track ids are derived from input file names
    pub id_scheme: IdScheme,
    /// Hard cap on concurrent workers
    pub max_workers: Option<usize>,
    /// Accelerator memory available to the pool, MiB
    pub accelerator_memory_mb: Option<u64>,
    /// Accelerator memory one analysis job needs, MiB
    pub memory_per_job_mb: Option<u64>,
    /// Max seconds between a downbeat and its nearest beat
    pub downbeat_tolerance: f64,
    pub render_backend: String,
    pub render_timeout_secs: u64,
    pub engine: EngineConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            include_visualization: false,
            include_sonification: false,
            multiprocess: false,
            overwrite: false,
            id_scheme: IdScheme::Stem,
            max_workers: None,
            accelerator_memory_mb: None,
            memory_per_job_mb: None,
            downbeat_tolerance: 0.07,
            render_backend: "Agg".to_string(),
            render_timeout_secs: 300,
            engine: EngineConfig::default(),
        }
    }
}

impl BatchConfig {
    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy::default().with_downbeat_tolerance(self.downbeat_tolerance)
    }

    /// Reject settings that would make a batch misbehave mid-run
    pub fn validate(&self) -> Result<()> {
        if !HEADLESS_BACKENDS.contains(&self.render_backend.as_str()) {
            return Err(Error::Config(format!(
                "render backend {:?} is not headless (expected one of {})",
                self.render_backend,
                HEADLESS_BACKENDS.join(", ")
            )));
        }
        if !(self.downbeat_tolerance.is_finite() && self.downbeat_tolerance >= 0.0) {
            return Err(Error::Config(format!(
                "downbeat_tolerance must be non-negative, got {}",
                self.downbeat_tolerance
            )));
        }
        if self.max_workers == Some(0) {
            return Err(Error::Config("max_workers must be at least 1".to_string()));
        }
        if self.memory_per_job_mb == Some(0) {
            return Err(Error::Config("memory_per_job_mb must be at least 1".to_string()));
        }
        if self.engine.program.trim().is_empty() {
            return Err(Error::Config("engine program is empty".to_string()));
        }
        Ok(())
    }
}

/// External analysis program
///
/// Invoked as `<program> <args..> <input> --out-dir <dir>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Per-file analysis timeout, seconds (none = unbounded)
    pub timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "mdx-engine".to_string(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

/// Load TOML configuration
///
/// `explicit` (from `--config`) must exist and parse. Without it, the
/// `MDX_CONFIG` variable and then the platform config dir are tried; a
/// missing file there is not an error.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return read_toml_config(path);
    }
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return read_toml_config(Path::new(&path));
    }
    match default_config_path() {
        Some(path) if path.exists() => read_toml_config(&path),
        _ => {
            debug!("No config file found, using defaults");
            Ok(TomlConfig::default())
        }
    }
}

fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;
    let config = toml::from_str(&text)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
    info!(path = %path.display(), "Loaded TOML configuration");
    Ok(config)
}

/// `<config dir>/mdx/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mdx").join("config.toml"))
}

/// Resolve the output root: CLI, then `MDX_ROOT_FOLDER`, then TOML, then
/// the platform data dir.
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        info!(root = %path.display(), "Root folder from command line");
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.is_empty() {
            info!(root = %path, "Root folder from {}", ROOT_FOLDER_ENV);
            return PathBuf::from(path);
        }
        warn!("{} is set but empty, ignoring", ROOT_FOLDER_ENV);
    }

    if let Some(path) = &toml.root_folder {
        info!(root = %path.display(), "Root folder from config file");
        return path.clone();
    }

    let path = default_root_folder();
    info!(root = %path.display(), "Root folder from compiled default");
    path
}

/// OS-dependent default output root
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mdx"))
        .unwrap_or_else(|| PathBuf::from("./mdx_data"))
}
