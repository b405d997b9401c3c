//! Artifact stores
//!
//! - [`ResultStore`]: analysis result JSON (plain or gzip), validated on read
//! - [`MediaStore`]: mixdown and stem audio, streamed lazily
//! - [`ArtifactCache`]: opaque secondary artifacts keyed by kind
//!
//! All writes go through [`write_atomic`]: temp file in the destination
//! directory, fsync, rename. Readers observe either the previous complete
//! artifact or the new one.

pub mod artifact_cache;
pub mod media_store;
pub mod result_store;

pub use artifact_cache::ArtifactCache;
pub use media_store::{ByteRange, MediaStore, MediaStream};
pub use result_store::{ResultEncoding, ResultStore};

use crate::layout::StorageLayout;
use crate::track::TrackId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Kind of per-track artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Result,
    Activation,
    Embedding,
    Spectrogram,
    Visualization,
    Sonification,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 6] = [
        ArtifactKind::Result,
        ArtifactKind::Activation,
        ArtifactKind::Embedding,
        ArtifactKind::Spectrogram,
        ArtifactKind::Visualization,
        ArtifactKind::Sonification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Result => "result",
            ArtifactKind::Activation => "activation",
            ArtifactKind::Embedding => "embedding",
            ArtifactKind::Spectrogram => "spectrogram",
            ArtifactKind::Visualization => "visualization",
            ArtifactKind::Sonification => "sonification",
        }
    }

    /// File name suffix appended to the track id
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Result => "json",
            ArtifactKind::Activation => "activ.npz",
            ArtifactKind::Embedding => "embed.npy",
            ArtifactKind::Spectrogram => "npy",
            ArtifactKind::Visualization => "pdf",
            ArtifactKind::Sonification => "sonif.wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ArtifactKind::Result => "application/json",
            ArtifactKind::Visualization => "application/pdf",
            ArtifactKind::Sonification => "audio/wav",
            ArtifactKind::Activation | ArtifactKind::Embedding | ArtifactKind::Spectrogram => {
                "application/octet-stream"
            }
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| Error::NotFound(format!("artifact kind '{}'", name)))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location record for a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub track: TrackId,
    pub kind: ArtifactKind,
    pub compressed: bool,
    pub path: PathBuf,
}

/// All stores over one layout
#[derive(Debug, Clone)]
pub struct Storage {
    pub layout: Arc<StorageLayout>,
    pub results: ResultStore,
    pub media: MediaStore,
    pub artifacts: ArtifactCache,
}

impl Storage {
    pub fn new(layout: StorageLayout, encoding: ResultEncoding) -> Self {
        let layout = Arc::new(layout);
        Self {
            results: ResultStore::new(layout.clone(), encoding),
            media: MediaStore::new(layout.clone()),
            artifacts: ArtifactCache::new(layout.clone()),
            layout,
        }
    }
}

/// Publish a file atomically: write into a temp file next to `path`, fsync,
/// then rename over `path`.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    let dir = path
        .parent()
        .ok_or_else(|| Error::Config(format!("artifact path has no parent: {}", path.display())))?;
    std::fs::create_dir_all(dir).map_err(|e| Error::storage_write(path, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".mdx-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::storage_write(path, e))?;

    write(tmp.as_file_mut()).map_err(|e| Error::storage_write(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::storage_write(path, e))?;
    tmp.persist(path)
        .map_err(|e| Error::storage_write(path, e.error))?;
    Ok(())
}

/// Remove a file, treating "already gone" as success
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::storage_write(path, e)),
    }
}
