//! Track identifiers and stem names
//!
//! A [`TrackId`] is always safe to use as a single path segment: it is the
//! key for every artifact of a track in every storage layout.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Maximum identifier length in bytes
pub const MAX_TRACK_ID_LEN: usize = 200;

/// How a track identifier is derived from an input file name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    /// Sanitized file stem (`My Song.mp3` -> `My_Song`)
    #[default]
    Stem,
    /// Lowercase stem without spaces or hyphens, prefixed with a stable
    /// 4-digit number unless it already starts with one
    /// (`My Song.mp3` -> `4821_mysong`)
    Prefixed,
}

/// Path-safe track identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackId(String);

impl TrackId {
    /// Validate an existing identifier (e.g. from a URL path)
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if is_path_safe(&id) {
            Ok(Self(id))
        } else {
            Err(Error::InvalidTrackId(id))
        }
    }

    /// Derive an identifier from an input file name using [`IdScheme::Stem`]
    pub fn from_file_name(path: &Path) -> Result<Self> {
        Self::from_file_name_with(path, IdScheme::Stem)
    }

    /// Derive an identifier from an input file name
    pub fn from_file_name_with(path: &Path, scheme: IdScheme) -> Result<Self> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let raw = match scheme {
            IdScheme::Stem => stem.clone(),
            IdScheme::Prefixed => prefixed_name(&stem),
        };

        let sanitized = sanitize(&raw);
        if sanitized.is_empty() {
            return Err(Error::InvalidTrackId(stem));
        }
        Self::new(sanitized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TrackId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TrackId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TrackId> for String {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

fn is_path_safe(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TRACK_ID_LEN
        && !id.starts_with('.')
        && !id
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
}

fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
            out.push(c);
        } else if c.is_whitespace() {
            out.push('_');
        }
    }

    let trimmed = out.trim_start_matches('.');
    let mut end = trimmed.len().min(MAX_TRACK_ID_LEN);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

fn prefixed_name(stem: &str) -> String {
    let normalized: String = stem
        .chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect::<String>()
        .to_lowercase();

    let has_numeric_prefix =
        normalized.len() >= 4 && normalized.bytes().take(4).all(|b| b.is_ascii_digit());
    if has_numeric_prefix {
        return normalized;
    }

    let digest = Sha256::digest(normalized.as_bytes());
    let number = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) % 10_000;
    format!("{:04}_{}", number, normalized)
}

/// One separated instrument channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stem {
    Bass,
    Drums,
    Other,
    Vocals,
}

impl Stem {
    pub const ALL: [Stem; 4] = [Stem::Bass, Stem::Drums, Stem::Other, Stem::Vocals];

    /// File name (without extension) written by the source separator
    pub fn file_stem(&self) -> &'static str {
        match self {
            Stem::Bass => "bass",
            Stem::Drums => "drums",
            Stem::Other => "other",
            Stem::Vocals => "vocals",
        }
    }

    /// Name used by the UI and in media URLs
    pub fn url_name(&self) -> &'static str {
        match self {
            Stem::Bass => "bass",
            Stem::Drums => "drum",
            Stem::Other => "other",
            Stem::Vocals => "vocal",
        }
    }

    /// Parse either naming convention (`drum`/`drums`, `vocal`/`vocals`)
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "bass" => Ok(Stem::Bass),
            "drum" | "drums" => Ok(Stem::Drums),
            "other" => Ok(Stem::Other),
            "vocal" | "vocals" => Ok(Stem::Vocals),
            _ => Err(Error::InvalidStem(name.to_string())),
        }
    }
}

impl fmt::Display for Stem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url_name())
    }
}

/// Audio source of a track: the original mix or one separated stem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSource {
    Mixdown,
    Stem(Stem),
}

impl MediaSource {
    /// Parse a media URL segment (`mixdown` or any stem name)
    pub fn parse(name: &str) -> Result<Self> {
        if name == "mixdown" {
            Ok(MediaSource::Mixdown)
        } else {
            Stem::parse(name).map(MediaSource::Stem)
        }
    }

    pub fn url_name(&self) -> &'static str {
        match self {
            MediaSource::Mixdown => "mixdown",
            MediaSource::Stem(stem) => stem.url_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_id_rejects_path_tricks() {
        for bad in ["", "..", "../etc", "a/b", "a\\b", ".hidden", "c:x", "nul\0"] {
            assert!(TrackId::new(bad).is_err(), "{:?} should be rejected", bad);
        }
        assert!(TrackId::new("1-03_Additional_Memory").is_ok());
    }

    #[test]
    fn test_from_file_name_sanitizes_stem() {
        let id = TrackId::from_file_name(Path::new("/music/1-03 Additional Memory.m4a")).unwrap();
        assert_eq!(id.as_str(), "1-03_Additional_Memory");

        let id = TrackId::from_file_name(Path::new("weird?*name!.mp3")).unwrap();
        assert_eq!(id.as_str(), "weirdname");

        let id = TrackId::from_file_name(Path::new("...dots.wav")).unwrap();
        assert_eq!(id.as_str(), "dots");
    }

    #[test]
    fn test_from_file_name_without_usable_chars_fails() {
        let err = TrackId::from_file_name(Path::new("???.mp3")).unwrap_err();
        assert!(matches!(err, Error::InvalidTrackId(_)));
    }

    #[test]
    fn test_prefixed_scheme() {
        let id = TrackId::from_file_name_with(Path::new("My Song-Live.mp3"), IdScheme::Prefixed)
            .unwrap();
        let (prefix, rest) = id.as_str().split_once('_').unwrap();
        assert_eq!(prefix.len(), 4);
        assert!(prefix.bytes().all(|b| b.is_ascii_digit()));
        assert_eq!(rest, "mysonglive");

        // Stable across calls
        let again = TrackId::from_file_name_with(Path::new("My Song-Live.mp3"), IdScheme::Prefixed)
            .unwrap();
        assert_eq!(id, again);

        // Existing numeric prefix is kept as-is
        let id = TrackId::from_file_name_with(Path::new("0042 Intro.mp3"), IdScheme::Prefixed)
            .unwrap();
        assert_eq!(id.as_str(), "0042intro");
    }

    #[test]
    fn test_stem_aliases() {
        assert_eq!(Stem::parse("drum").unwrap(), Stem::Drums);
        assert_eq!(Stem::parse("drums").unwrap(), Stem::Drums);
        assert_eq!(Stem::parse("vocal").unwrap(), Stem::Vocals);
        assert_eq!(Stem::parse("vocals").unwrap(), Stem::Vocals);
        assert!(matches!(Stem::parse("kazoo"), Err(Error::InvalidStem(_))));
        assert_eq!(MediaSource::parse("mixdown").unwrap(), MediaSource::Mixdown);
    }
}
