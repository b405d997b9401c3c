//! Opaque secondary artifacts (activations, embeddings, spectrograms,
//! visualizations, sonifications)
//!
//! The cache records kind and location only; payloads are never inspected.

use super::{write_atomic, ArtifactKind, ArtifactRef};
use crate::layout::StorageLayout;
use crate::track::TrackId;
use crate::{Error, Result};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    layout: Arc<StorageLayout>,
}

impl ArtifactCache {
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self { layout }
    }

    /// Raw bytes of an artifact
    ///
    /// For [`ArtifactKind::Result`] this is the stored representation as-is
    /// (gzip when compressed).
    pub fn get(&self, track: &TrackId, kind: ArtifactKind) -> Result<Vec<u8>> {
        let artifact = self
            .locate(track, kind)
            .ok_or_else(|| Error::NotFound(format!("{} artifact for track '{}'", kind, track)))?;
        std::fs::read(&artifact.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("{} artifact for track '{}'", kind, track))
            }
            _ => Error::Io(e),
        })
    }

    /// Atomically store a secondary artifact
    pub fn put(&self, track: &TrackId, kind: ArtifactKind, bytes: &[u8]) -> Result<ArtifactRef> {
        if kind == ArtifactKind::Result {
            return Err(Error::InvalidResult(
                "analysis results are published through the result store".to_string(),
            ));
        }
        let path = self.layout.artifact_path(track, kind);
        write_atomic(&path, |f| f.write_all(bytes))?;
        debug!(track = %track, kind = %kind, bytes = bytes.len(), "Cached artifact");
        Ok(ArtifactRef {
            track: track.clone(),
            kind,
            compressed: false,
            path,
        })
    }

    /// Atomically copy an engine output file into the cache
    pub fn put_file(&self, track: &TrackId, kind: ArtifactKind, source: &Path) -> Result<ArtifactRef> {
        let bytes = std::fs::read(source).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("{} source file {}", kind, source.display()))
            }
            _ => Error::Io(e),
        })?;
        self.put(track, kind, &bytes)
    }

    /// Where an artifact lives, if it exists
    pub fn locate(&self, track: &TrackId, kind: ArtifactKind) -> Option<ArtifactRef> {
        if kind == ArtifactKind::Result {
            let compressed = self.layout.result_path(track, true);
            if compressed.is_file() {
                return Some(ArtifactRef {
                    track: track.clone(),
                    kind,
                    compressed: true,
                    path: compressed,
                });
            }
        }
        let path = self.layout.artifact_path(track, kind);
        path.is_file().then(|| ArtifactRef {
            track: track.clone(),
            kind,
            compressed: false,
            path,
        })
    }

    /// Every artifact present for `track`
    pub fn list(&self, track: &TrackId) -> Vec<ArtifactRef> {
        ArtifactKind::ALL
            .into_iter()
            .filter_map(|kind| self.locate(track, kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(dir: &Path) -> ArtifactCache {
        ArtifactCache::new(Arc::new(StorageLayout::standard(dir)))
    }

    #[test]
    fn test_put_get_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let track = TrackId::new("song").unwrap();

        cache.put(&track, ArtifactKind::Embedding, &[1, 2, 3]).unwrap();
        cache.put(&track, ArtifactKind::Visualization, b"%PDF-1.4").unwrap();

        assert_eq!(cache.get(&track, ArtifactKind::Embedding).unwrap(), vec![1, 2, 3]);
        let kinds: Vec<_> = cache.list(&track).into_iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ArtifactKind::Embedding, ArtifactKind::Visualization]);
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let track = TrackId::new("song").unwrap();
        let err = cache(dir.path()).get(&track, ArtifactKind::Spectrogram).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_result_kind_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let track = TrackId::new("song").unwrap();
        assert!(cache(dir.path()).put(&track, ArtifactKind::Result, b"{}").is_err());
    }
}
