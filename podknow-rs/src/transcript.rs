//! Transcript input and conversation-structure types.
//!
//! Segments arrive from an upstream parser as an ordered, immutable list.
//! Everything downstream refers to them by index.

use serde::{Deserialize, Serialize};

use crate::errors::{PodknowError, Result};

/// Speaker key used for segments without a speaker tag.
pub const UNKNOWN_SPEAKER: &str = "UNKNOWN";

/// One timestamped utterance from the source transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// `None` when the parser could not attribute the segment.
    pub speaker: Option<String>,
    /// Start time in seconds.
    pub start: f64,
    /// End time in seconds.
    pub end: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn new(speaker: impl Into<String>, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            speaker: Some(speaker.into()),
            start,
            end,
            text: text.into(),
        }
    }

    pub fn speaker_key(&self) -> &str {
        self.speaker
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(UNKNOWN_SPEAKER)
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// An episode as handed over by the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInput {
    pub episode_id: String,
    pub segments: Vec<TranscriptSegment>,
}

/// Reject segment lists that are not a well-formed, time-ordered sequence.
pub fn validate_segments(segments: &[TranscriptSegment]) -> Result<()> {
    let mut previous_start = f64::NEG_INFINITY;
    for (i, seg) in segments.iter().enumerate() {
        if !seg.start.is_finite() || !seg.end.is_finite() {
            return Err(PodknowError::Validation(format!(
                "segment {i} has a non-finite timestamp"
            )));
        }
        if seg.end < seg.start {
            return Err(PodknowError::Validation(format!(
                "segment {i} ends ({}) before it starts ({})",
                seg.end, seg.start
            )));
        }
        if seg.start < previous_start {
            return Err(PodknowError::Validation(format!(
                "segment {i} starts at {} before the previous segment ({previous_start})",
                seg.start
            )));
        }
        previous_start = seg.start;
    }
    Ok(())
}

/// Kind of transition detected at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    TopicShift,
    SpeakerHandoff,
    IncompleteThought,
    NarrativeTransition,
    QuestionAnswer,
    Other,
}

impl BoundaryType {
    /// Map a free-form model label onto the closed set.
    pub fn parse_lenient(raw: &str) -> Self {
        match crate::utils::to_upper_snake(raw).as_str() {
            "TOPIC_SHIFT" | "TOPIC_CHANGE" | "NEW_TOPIC" => BoundaryType::TopicShift,
            "SPEAKER_HANDOFF" | "SPEAKER_CHANGE" => BoundaryType::SpeakerHandoff,
            "INCOMPLETE_THOUGHT" | "INTERRUPTION" => BoundaryType::IncompleteThought,
            "NARRATIVE_TRANSITION" | "TRANSITION" | "SEGUE" => BoundaryType::NarrativeTransition,
            "QUESTION_ANSWER" | "QUESTION" | "Q_A" | "QA" => BoundaryType::QuestionAnswer,
            _ => BoundaryType::Other,
        }
    }
}

/// A detected transition: a new unit starts at segment `position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationBoundary {
    pub position: usize,
    pub boundary_type: BoundaryType,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTheme {
    pub label: String,
    pub segment_indices: Vec<usize>,
}

/// Model hint for the unit that starts at `start_position`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitHint {
    pub start_position: usize,
    /// Free-form type label; reified by [`crate::nodes::unit::UnitType::parse_lenient`].
    pub unit_type: Option<String>,
    pub summary: Option<String>,
}

/// Result of the ANALYZE phase for one episode. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStructure {
    /// Sorted by position, positions unique and within `1..segment_count`.
    pub boundaries: Vec<ConversationBoundary>,
    pub themes: Vec<ConversationTheme>,
    pub unit_hints: Vec<UnitHint>,
    pub narrative_flow: String,
    pub quality_observations: Vec<String>,
    /// The episode opens mid-thought; the first unit is incomplete.
    pub opens_mid_thought: bool,
    /// The episode closes mid-thought; the last unit is incomplete.
    pub closes_mid_thought: bool,
    /// Set when the analyzer fell back after the model call failed.
    pub degraded: bool,
    pub content_hash: String,
}

impl ConversationStructure {
    /// Whole transcript as one unit, no themes. Used when analysis fails.
    pub fn fallback(content_hash: impl Into<String>, reason: &str) -> Self {
        Self {
            boundaries: Vec::new(),
            themes: Vec::new(),
            unit_hints: Vec::new(),
            narrative_flow: String::new(),
            quality_observations: vec![format!("analysis unavailable: {reason}")],
            opens_mid_thought: false,
            closes_mid_thought: false,
            degraded: true,
            content_hash: content_hash.into(),
        }
    }

    pub fn boundary_at(&self, position: usize) -> Option<&ConversationBoundary> {
        self.boundaries
            .binary_search_by_key(&position, |b| b.position)
            .ok()
            .map(|i| &self.boundaries[i])
    }

    pub fn hint_at(&self, position: usize) -> Option<&UnitHint> {
        self.unit_hints.iter().find(|h| h.start_position == position)
    }
}
