//! Analysis result persistence
//!
//! Reads prefer the compressed representation and fall back to the plain one
//! when the compressed file is missing or corrupt. Compression is a storage
//! setting only; callers always get an [`AnalysisResult`].

use super::{remove_if_exists, write_atomic, ArtifactKind, ArtifactRef};
use crate::layout::StorageLayout;
use crate::model::{AnalysisResult, ValidationPolicy};
use crate::track::TrackId;
use crate::{Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Representation(s) written by [`ResultStore::put`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultEncoding {
    /// `<track>.json` only
    Plain,
    /// `<track>.json.gz` only
    #[default]
    Gzip,
    /// Both; the plain copy is kept for debugging
    GzipWithPlain,
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    layout: Arc<StorageLayout>,
    encoding: ResultEncoding,
    policy: ValidationPolicy,
}

impl ResultStore {
    pub fn new(layout: Arc<StorageLayout>, encoding: ResultEncoding) -> Self {
        Self {
            layout,
            encoding,
            policy: ValidationPolicy::default(),
        }
    }

    /// Validation applied on both read and write
    pub fn with_policy(mut self, policy: ValidationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn encoding(&self) -> ResultEncoding {
        self.encoding
    }

    /// Load the result for `track`
    ///
    /// Errors: [`Error::NotFound`] when no representation exists,
    /// [`Error::DecodeFailure`] when every existing one is unreadable.
    pub fn get(&self, track: &TrackId) -> Result<AnalysisResult> {
        let mut last_failure = None;

        for compressed in [true, false] {
            let path = self.layout.result_path(track, compressed);
            match self.read(&path, compressed) {
                Ok(Some(result)) => {
                    debug!(track = %track, path = %path.display(), "Loaded analysis result");
                    return Ok(result);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        track = %track,
                        path = %path.display(),
                        error = %e,
                        "Unreadable analysis result, trying next representation"
                    );
                    last_failure = Some(e);
                }
            }
        }

        Err(last_failure
            .unwrap_or_else(|| Error::NotFound(format!("analysis result for track '{}'", track))))
    }

    /// Validate and atomically publish `result` for `track`
    pub fn put(&self, track: &TrackId, result: &AnalysisResult) -> Result<ArtifactRef> {
        result.validate(&self.policy).map_err(Error::InvalidResult)?;

        let plain = self.layout.result_path(track, false);
        let gz = self.layout.result_path(track, true);

        let primary = match self.encoding {
            ResultEncoding::Plain => {
                write_plain(&plain, result)?;
                remove_if_exists(&gz)?;
                (plain, false)
            }
            ResultEncoding::Gzip => {
                write_gzip(&gz, result)?;
                remove_if_exists(&plain)?;
                (gz, true)
            }
            ResultEncoding::GzipWithPlain => {
                write_plain(&plain, result)?;
                write_gzip(&gz, result)?;
                (gz, true)
            }
        };

        debug!(
            track = %track,
            path = %primary.0.display(),
            encoding = ?self.encoding,
            "Published analysis result"
        );

        Ok(ArtifactRef {
            track: track.clone(),
            kind: ArtifactKind::Result,
            compressed: primary.1,
            path: primary.0,
        })
    }

    /// True if any representation exists (no parsing)
    pub fn exists(&self, track: &TrackId) -> bool {
        self.locate(track).is_some()
    }

    /// Preferred existing representation
    pub fn locate(&self, track: &TrackId) -> Option<ArtifactRef> {
        [true, false].into_iter().find_map(|compressed| {
            let path = self.layout.result_path(track, compressed);
            path.is_file().then(|| ArtifactRef {
                track: track.clone(),
                kind: ArtifactKind::Result,
                compressed,
                path,
            })
        })
    }

    /// Ok(None) when the file does not exist
    fn read(&self, path: &Path, compressed: bool) -> Result<Option<AnalysisResult>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(decode_failure(path, e)),
        };

        let reader = BufReader::new(file);
        let parsed: AnalysisResult = if compressed {
            serde_json::from_reader(GzDecoder::new(reader))
        } else {
            serde_json::from_reader(reader)
        }
        .map_err(|e| decode_failure(path, e))?;

        parsed
            .validate(&self.policy)
            .map_err(|reason| decode_failure(path, reason))?;
        Ok(Some(parsed))
    }
}

fn decode_failure(path: &Path, reason: impl ToString) -> Error {
    Error::DecodeFailure {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

fn write_plain(path: &Path, result: &AnalysisResult) -> Result<()> {
    write_atomic(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, result)?;
        writer.flush()
    })
}

fn write_gzip(path: &Path, result: &AnalysisResult) -> Result<()> {
    write_atomic(path, |file| {
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut encoder, result)?;
        encoder.finish()?.flush()
    })
}
