//! Analysis result model
//!
//! The JSON schema is the contract between the analysis engine, the stores
//! and the browser UI. Everything read from disk goes through
//! [`AnalysisResult::validate`] so a malformed file is rejected instead of
//! being served as partial data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural labels produced by the segmenter (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentLabel {
    Start,
    Intro,
    Verse,
    Chorus,
    Bridge,
    Inst,
    Solo,
    Outro,
    End,
}

impl SegmentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentLabel::Start => "start",
            SegmentLabel::Intro => "intro",
            SegmentLabel::Verse => "verse",
            SegmentLabel::Chorus => "chorus",
            SegmentLabel::Bridge => "bridge",
            SegmentLabel::Inst => "inst",
            SegmentLabel::Solo => "solo",
            SegmentLabel::Outro => "outro",
            SegmentLabel::End => "end",
        }
    }
}

impl fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labeled time interval (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub label: SegmentLabel,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Structured analysis output for one track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_path: String,
    pub bpm: f64,
    pub beats: Vec<f64>,
    pub downbeats: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub beat_positions: Vec<u32>,
    pub segments: Vec<Segment>,
    pub total_duration: f64,
}

/// Knobs for [`AnalysisResult::validate`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationPolicy {
    /// Maximum distance (seconds) between a downbeat and the nearest beat.
    /// `None` skips the alignment check.
    pub downbeat_tolerance: Option<f64>,
    /// Largest metrical position allowed in `beat_positions`
    pub max_beats_per_bar: u32,
    /// Slack used when comparing segment boundaries
    pub epsilon: f64,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            downbeat_tolerance: None,
            max_beats_per_bar: 12,
            epsilon: 1e-6,
        }
    }
}

impl ValidationPolicy {
    pub fn with_downbeat_tolerance(mut self, tolerance: f64) -> Self {
        self.downbeat_tolerance = Some(tolerance);
        self
    }
}

impl AnalysisResult {
    /// Check every schema invariant, returning the first violation
    pub fn validate(&self, policy: &ValidationPolicy) -> Result<(), String> {
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(format!("bpm must be positive, got {}", self.bpm));
        }
        if !(self.total_duration.is_finite() && self.total_duration > 0.0) {
            return Err(format!(
                "total_duration must be positive, got {}",
                self.total_duration
            ));
        }

        check_strictly_increasing("beats", &self.beats)?;
        check_strictly_increasing("downbeats", &self.downbeats)?;

        if let Some(tolerance) = policy.downbeat_tolerance {
            for &downbeat in &self.downbeats {
                if nearest_distance(&self.beats, downbeat) > tolerance {
                    return Err(format!(
                        "downbeat {} is not within {}s of any beat",
                        downbeat, tolerance
                    ));
                }
            }
        }

        if !self.beat_positions.is_empty() {
            if self.beat_positions.len() != self.beats.len() {
                return Err(format!(
                    "beat_positions has {} entries but beats has {}",
                    self.beat_positions.len(),
                    self.beats.len()
                ));
            }
            if let Some(pos) = self
                .beat_positions
                .iter()
                .find(|p| **p == 0 || **p > policy.max_beats_per_bar)
            {
                return Err(format!(
                    "beat position {} outside 1..={}",
                    pos, policy.max_beats_per_bar
                ));
            }
        }

        self.validate_segments(policy.epsilon)
    }

    fn validate_segments(&self, epsilon: f64) -> Result<(), String> {
        let Some(first) = self.segments.first() else {
            return Ok(());
        };
        if first.start.abs() > epsilon {
            return Err(format!("first segment starts at {}, expected 0", first.start));
        }

        for (i, segment) in self.segments.iter().enumerate() {
            if !(segment.start.is_finite() && segment.end.is_finite()) || segment.end <= segment.start {
                return Err(format!(
                    "segment {} has invalid bounds [{}, {}]",
                    i, segment.start, segment.end
                ));
            }
            if let Some(next) = self.segments.get(i + 1) {
                if (next.start - segment.end).abs() > epsilon {
                    return Err(format!(
                        "segments {} and {} are not contiguous ({} != {})",
                        i,
                        i + 1,
                        segment.end,
                        next.start
                    ));
                }
            }
        }

        let last_end = self.segments.last().map(|s| s.end).unwrap_or(0.0);
        if last_end > self.total_duration + epsilon {
            return Err(format!(
                "last segment ends at {} after total_duration {}",
                last_end, self.total_duration
            ));
        }
        Ok(())
    }

    /// Label sequence in time order
    pub fn structure_sequence(&self) -> Vec<SegmentLabel> {
        self.segments.iter().map(|s| s.label).collect()
    }
}

fn check_strictly_increasing(name: &str, values: &[f64]) -> Result<(), String> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(format!("{} contains invalid timestamp {}", name, bad));
    }
    for (i, pair) in values.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(format!(
                "{} not strictly increasing at index {} ({} -> {})",
                name,
                i + 1,
                pair[0],
                pair[1]
            ));
        }
    }
    Ok(())
}

/// Distance from `t` to the closest entry of a sorted slice
fn nearest_distance(sorted: &[f64], t: f64) -> f64 {
    let idx = sorted.partition_point(|v| *v < t);
    let after = sorted.get(idx).map(|v| (v - t).abs());
    let before = idx.checked_sub(1).and_then(|i| sorted.get(i)).map(|v| (t - v).abs());
    match (before, after) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => f64::INFINITY,
    }
}
