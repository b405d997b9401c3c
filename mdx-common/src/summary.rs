//! Musical structure summary derived from an analysis result

use crate::model::{AnalysisResult, SegmentLabel};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-label statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionStats {
    pub count: usize,
    pub total_duration: f64,
    pub average_duration: f64,
    pub durations: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureSummary {
    pub bpm: f64,
    pub total_duration: f64,
    pub segment_count: usize,
    pub beat_count: usize,
    pub downbeat_count: usize,
    pub section_stats: BTreeMap<SegmentLabel, SectionStats>,
    pub structure_sequence: Vec<SegmentLabel>,
}

impl StructureSummary {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let mut section_stats: BTreeMap<SegmentLabel, SectionStats> = BTreeMap::new();

        for segment in &result.segments {
            let stats = section_stats.entry(segment.label).or_insert(SectionStats {
                count: 0,
                total_duration: 0.0,
                average_duration: 0.0,
                durations: Vec::new(),
            });
            stats.count += 1;
            stats.total_duration += segment.duration();
            stats.durations.push(segment.duration());
        }
        for stats in section_stats.values_mut() {
            stats.average_duration = stats.total_duration / stats.count as f64;
        }

        Self {
            bpm: result.bpm,
            total_duration: result.total_duration,
            segment_count: result.segments.len(),
            beat_count: result.beats.len(),
            downbeat_count: result.downbeats.len(),
            section_stats,
            structure_sequence: result.structure_sequence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Segment;

    #[test]
    fn test_section_stats() {
        let result = AnalysisResult {
            file_name: String::new(),
            file_path: String::new(),
            bpm: 128.0,
            beats: vec![0.5, 1.0],
            downbeats: vec![0.5],
            beat_positions: vec![],
            segments: vec![
                Segment { start: 0.0, end: 10.0, label: SegmentLabel::Verse },
                Segment { start: 10.0, end: 30.0, label: SegmentLabel::Chorus },
                Segment { start: 30.0, end: 50.0, label: SegmentLabel::Verse },
            ],
            total_duration: 50.0,
        };

        let summary = StructureSummary::from_result(&result);
        assert_eq!(summary.segment_count, 3);
        let verse = &summary.section_stats[&SegmentLabel::Verse];
        assert_eq!(verse.count, 2);
        assert_eq!(verse.total_duration, 30.0);
        assert_eq!(verse.average_duration, 15.0);
        assert_eq!(
            summary.structure_sequence,
            vec![SegmentLabel::Verse, SegmentLabel::Chorus, SegmentLabel::Verse]
        );
    }
}
