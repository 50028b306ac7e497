//! SegmentRegrouper: the REGROUP phase.
//!
//! Folds the ordered segment list into [`MeaningfulUnit`]s at the boundary
//! positions of a [`ConversationStructure`]. Purely deterministic.

use std::collections::BTreeMap;

use crate::errors::{PodknowError, Result};
use crate::nodes::{MeaningfulUnit, UnitType};
use crate::transcript::{validate_segments, BoundaryType, ConversationStructure, TranscriptSegment};
use crate::utils::{normalize_whitespace, stable_id, truncate_with_ellipsis};

/// Maximum characters of a summary synthesised from the unit text.
pub const FALLBACK_SUMMARY_CHARS: usize = 240;

pub struct SegmentRegrouper<'a> {
    episode_id: &'a str,
}

impl<'a> SegmentRegrouper<'a> {
    pub fn new(episode_id: &'a str) -> Self {
        Self { episode_id }
    }

    /// Partition `segments` into units. Every segment lands in exactly one
    /// unit; units are returned in time order.
    pub fn regroup(
        &self,
        segments: &[TranscriptSegment],
        structure: &ConversationStructure,
    ) -> Result<Vec<MeaningfulUnit>> {
        validate_segments(segments)?;
        if segments.is_empty() {
            return Err(PodknowError::Validation(format!(
                "episode {} has no segments",
                self.episode_id
            )));
        }

        let ranges = partition(segments.len(), structure);
        let last = ranges.len() - 1;

        let mut units: Vec<MeaningfulUnit> = ranges
            .iter()
            .enumerate()
            .map(|(ordinal, &(start, end))| {
                let members = &segments[start..end];
                let is_first = ordinal == 0;
                let is_last = ordinal == last;
                MeaningfulUnit {
                    id: unit_id(self.episode_id, ordinal),
                    episode_id: self.episode_id.to_string(),
                    ordinal,
                    segment_indices: (start..end).collect(),
                    unit_type: unit_type_for(structure, start, end, is_first, is_last, segments.len()),
                    summary: summary_for(structure, start, members),
                    themes: themes_for(structure, start, end),
                    start: members[0].start,
                    end: members.iter().map(|s| s.end).fold(f64::MIN, f64::max),
                    speaker_distribution: speaker_distribution(members),
                    is_complete: !((is_first && structure.opens_mid_thought)
                        || (is_last && structure.closes_mid_thought)),
                    embedding: None,
                }
            })
            .collect();

        // Crosstalk can make a segment outlast the start of the next unit.
        for i in 1..units.len() {
            let next_start = units[i].start;
            let prev = &mut units[i - 1];
            if prev.end > next_start {
                prev.end = next_start;
            }
        }

        Ok(units)
    }
}

/// Stable id of the `ordinal`-th unit of an episode.
pub fn unit_id(episode_id: &str, ordinal: usize) -> uuid::Uuid {
    stable_id(&[episode_id, "unit", &ordinal.to_string()])
}

/// Half-open segment ranges delimited by the structure's boundaries.
fn partition(segment_count: usize, structure: &ConversationStructure) -> Vec<(usize, usize)> {
    let mut cuts: Vec<usize> = structure
        .boundaries
        .iter()
        .map(|b| b.position)
        .filter(|&p| p > 0 && p < segment_count)
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    let mut ranges = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        ranges.push((start, cut));
        start = cut;
    }
    ranges.push((start, segment_count));
    ranges
}

/// Model hint wins; the heuristic only fills in when no usable hint exists.
fn unit_type_for(
    structure: &ConversationStructure,
    start: usize,
    end: usize,
    is_first: bool,
    is_last: bool,
    segment_count: usize,
) -> UnitType {
    if let Some(hint) = structure
        .hint_at(start)
        .and_then(|h| h.unit_type.as_deref())
    {
        return UnitType::parse_lenient(hint);
    }

    let opens_at = structure.boundary_at(start).map(|b| b.boundary_type);
    let closes_at = structure.boundary_at(end).map(|b| b.boundary_type);
    let single_unit = start == 0 && end == segment_count;

    if opens_at == Some(BoundaryType::QuestionAnswer) {
        UnitType::QAndA
    } else if is_first
        && !single_unit
        && !structure.opens_mid_thought
        && closes_at == Some(BoundaryType::TopicShift)
    {
        UnitType::Introduction
    } else if is_last
        && !single_unit
        && !structure.closes_mid_thought
        && opens_at == Some(BoundaryType::TopicShift)
    {
        UnitType::Conclusion
    } else {
        UnitType::TopicDiscussion
    }
}

fn summary_for(structure: &ConversationStructure, start: usize, members: &[TranscriptSegment]) -> String {
    if let Some(summary) = structure.hint_at(start).and_then(|h| h.summary.clone()) {
        return summary;
    }
    let text = members
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    truncate_with_ellipsis(&normalize_whitespace(&text), FALLBACK_SUMMARY_CHARS)
}

fn themes_for(structure: &ConversationStructure, start: usize, end: usize) -> Vec<String> {
    structure
        .themes
        .iter()
        .filter(|t| t.segment_indices.iter().any(|&i| i >= start && i < end))
        .map(|t| t.label.clone())
        .collect()
}

/// Time-weighted speaker shares in percent, summing to exactly 100.00.
///
/// Shares are computed in hundredths of a percent; the rounding remainder
/// goes to the speaker with the largest raw share (ties: first by name).
/// Zero-duration units fall back to segment counts.
pub fn speaker_distribution(members: &[TranscriptSegment]) -> BTreeMap<String, f64> {
    let mut raw: BTreeMap<String, f64> = BTreeMap::new();
    let total: f64 = members.iter().map(TranscriptSegment::duration).sum();

    for seg in members {
        let weight = if total > 0.0 { seg.duration() } else { 1.0 };
        *raw.entry(seg.speaker_key().to_string()).or_default() += weight;
    }

    let denominator: f64 = raw.values().sum();
    if denominator <= 0.0 {
        return BTreeMap::new();
    }

    let mut hundredths: BTreeMap<String, i64> = raw
        .iter()
        .map(|(speaker, w)| (speaker.clone(), (w / denominator * 10_000.0).round() as i64))
        .collect();

    let remainder = 10_000 - hundredths.values().sum::<i64>();
    if remainder != 0 {
        let largest = raw
            .iter()
            .fold(None::<(&String, f64)>, |best, (k, v)| match best {
                Some((_, bv)) if bv >= *v => best,
                _ => Some((k, *v)),
            })
            .map(|(k, _)| k.clone());
        if let Some(speaker) = largest {
            if let Some(share) = hundredths.get_mut(&speaker) {
                *share += remainder;
            }
        }
    }

    hundredths
        .into_iter()
        .map(|(speaker, h)| (speaker, h as f64 / 100.0))
        .collect()
}
