//! On-disk artifact layout
//!
//! Every store resolves paths through a [`StorageLayout`] built once from
//! configuration and shared by reference; there is no process-wide output
//! directory.
//!
//! Standard layout (per run root):
//! ```text
//! <root>/results/<track>.json | <track>.json.gz
//! <root>/results/<track>.activ.npz | <track>.embed.npy
//! <root>/visualizations/<track>.pdf
//! <root>/sonifications/<track>.sonif.wav
//! <root>/demix/htdemucs/<track>/{bass,drums,other,vocals}.<ext>
//! <root>/mixdown/<track>.<ext>
//! <root>/spectrograms/<track>.npy
//! <root>/cache/
//! ```
//!
//! Simple layout:
//! ```text
//! <root>/<track>/<track>.json
//! <root>/<track>/<track>.<ext>
//! <root>/<track>/stems/{bass,drums,other,vocals}.<ext>
//! ```

use crate::store::ArtifactKind;
use crate::track::{Stem, TrackId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory structure variant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    #[default]
    Standard,
    Simple,
}

/// Container format of published audio
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    #[default]
    Mp3,
    Wav,
}

impl MediaFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Wav => "wav",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            MediaFormat::Mp3 => "audio/mpeg",
            MediaFormat::Wav => "audio/wav",
        }
    }
}

/// Resolved layout rooted at one output directory
#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
    kind: LayoutKind,
    media_format: MediaFormat,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>, kind: LayoutKind, media_format: MediaFormat) -> Self {
        Self {
            root: root.into(),
            kind,
            media_format,
        }
    }

    /// Standard layout with mp3 media
    pub fn standard(root: impl Into<PathBuf>) -> Self {
        Self::new(root, LayoutKind::Standard, MediaFormat::Mp3)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn media_format(&self) -> MediaFormat {
        self.media_format
    }

    /// Directories created up front by [`StorageLayout::ensure_directories`]
    pub fn directories(&self) -> Vec<PathBuf> {
        match self.kind {
            LayoutKind::Standard => [
                "results",
                "visualizations",
                "sonifications",
                "demix/htdemucs",
                "mixdown",
                "spectrograms",
                "cache",
            ]
            .iter()
            .map(|d| self.root.join(d))
            .collect(),
            LayoutKind::Simple => vec![self.root.clone(), self.cache_dir()],
        }
    }

    /// Create the layout's fixed directories
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for dir in self.directories() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Transient working files (engine scratch space)
    pub fn cache_dir(&self) -> PathBuf {
        match self.kind {
            LayoutKind::Standard => self.root.join("cache"),
            LayoutKind::Simple => self.root.join(".cache"),
        }
    }

    fn track_dir(&self, track: &TrackId) -> PathBuf {
        self.root.join(track.as_str())
    }

    pub fn result_path(&self, track: &TrackId, compressed: bool) -> PathBuf {
        let file = if compressed {
            format!("{}.json.gz", track)
        } else {
            format!("{}.json", track)
        };
        match self.kind {
            LayoutKind::Standard => self.root.join("results").join(file),
            LayoutKind::Simple => self.track_dir(track).join(file),
        }
    }

    pub fn stem_path(&self, track: &TrackId, stem: Stem) -> PathBuf {
        let file = format!("{}.{}", stem.file_stem(), self.media_format.extension());
        match self.kind {
            LayoutKind::Standard => self
                .root
                .join("demix")
                .join("htdemucs")
                .join(track.as_str())
                .join(file),
            LayoutKind::Simple => self.track_dir(track).join("stems").join(file),
        }
    }

    pub fn mixdown_path(&self, track: &TrackId) -> PathBuf {
        let file = format!("{}.{}", track, self.media_format.extension());
        match self.kind {
            LayoutKind::Standard => self.root.join("mixdown").join(file),
            LayoutKind::Simple => self.track_dir(track).join(file),
        }
    }

    /// Location of a secondary artifact, or of the uncompressed result for
    /// [`ArtifactKind::Result`]
    pub fn artifact_path(&self, track: &TrackId, kind: ArtifactKind) -> PathBuf {
        if kind == ArtifactKind::Result {
            return self.result_path(track, false);
        }
        let file = format!("{}.{}", track, kind.file_suffix());
        match self.kind {
            LayoutKind::Standard => {
                let dir = match kind {
                    ArtifactKind::Activation | ArtifactKind::Embedding | ArtifactKind::Result => {
                        "results"
                    }
                    ArtifactKind::Spectrogram => "spectrograms",
                    ArtifactKind::Visualization => "visualizations",
                    ArtifactKind::Sonification => "sonifications",
                };
                self.root.join(dir).join(file)
            }
            LayoutKind::Simple => self.track_dir(track).join(file),
        }
    }
}
