//! Input discovery
//!
//! Batch inputs may be files or directories. Directories are walked
//! recursively for audio extensions; hidden and system entries are skipped.
//! Explicit file arguments are passed through unchanged (a missing file is
//! reported per file by the orchestrator, not here).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Extensions accepted when walking directories (lowercase)
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "ogg", "flac"];

pub struct InputScanner {
    ignore_names: Vec<String>,
    max_depth: Option<usize>,
}

impl Default for InputScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl InputScanner {
    pub fn new() -> Self {
        Self {
            ignore_names: vec![
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
            ],
            max_depth: None,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Expand `inputs` into an ordered, de-duplicated file list
    ///
    /// Argument order is kept; files found inside one directory are sorted.
    pub fn discover(&self, inputs: &[PathBuf]) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for input in inputs {
            if input.is_dir() {
                let found = self.scan_dir(input);
                tracing::debug!(dir = %input.display(), count = found.len(), "Scanned input directory");
                files.extend(found.into_iter().filter(|p| seen.insert(p.clone())));
            } else {
                if !input.exists() {
                    tracing::warn!(path = %input.display(), "Input does not exist");
                }
                if seen.insert(input.clone()) {
                    files.push(input.clone());
                }
            }
        }
        files
    }

    fn scan_dir(&self, root: &Path) -> Vec<PathBuf> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth.unwrap_or(usize::MAX))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || self.should_process_entry(e));

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() && is_audio_path(entry.path()) => {
                    files.push(entry.into_path());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Error accessing entry: {}", e),
            }
        }
        files
    }

    fn should_process_entry(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !self.ignore_names.iter().any(|ignored| *ignored == name)
    }
}

/// True when the extension is one of [`AUDIO_EXTENSIONS`] (case-insensitive)
pub fn is_audio_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}
