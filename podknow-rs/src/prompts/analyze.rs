//! Conversation-structure analysis prompt.

use schemars::JsonSchema;
use serde::Deserialize;

use super::render_segments;
use crate::llm_client::Message;
use crate::transcript::TranscriptSegment;

const SYSTEM: &str = "You analyse the structure of long-form spoken conversations \
(podcasts, interviews, panels). You identify where the conversation moves from one \
coherent unit of meaning to the next, the recurring themes, and how the narrative \
flows. Answer strictly in the requested JSON format.";

/// Model answer for the ANALYZE phase.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StructureResponse {
    /// Segment indices where a new unit of meaning begins.
    #[serde(default)]
    pub boundaries: Vec<BoundaryResponse>,
    #[serde(default)]
    pub themes: Vec<ThemeResponse>,
    /// Optional type and summary for the unit starting at a given index
    /// (use index 0 for the opening unit).
    #[serde(default)]
    pub unit_hints: Vec<UnitHintResponse>,
    #[serde(default)]
    pub narrative_flow: String,
    #[serde(default)]
    pub quality_observations: Vec<String>,
    /// True when the transcript starts in the middle of a thought.
    #[serde(default)]
    pub opens_mid_thought: bool,
    /// True when the transcript is cut off in the middle of a thought.
    #[serde(default)]
    pub closes_mid_thought: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BoundaryResponse {
    pub position: usize,
    /// topic_shift, speaker_handoff, incomplete_thought, narrative_transition,
    /// question_answer or other.
    #[serde(default)]
    pub boundary_type: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ThemeResponse {
    pub label: String,
    #[serde(default)]
    pub segment_indices: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct UnitHintResponse {
    pub start_position: usize,
    /// topic_discussion, introduction, conclusion, story, q_and_a, debate,
    /// explanation, advertisement, tangent or other.
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Build the ANALYZE request for a full episode.
pub fn messages(segments: &[TranscriptSegment]) -> Vec<Message> {
    let user = format!(
        "The transcript below has {count} segments, numbered 0 to {last}.\n\n\
         1. List boundaries: the index of each segment that begins a new coherent unit \
         (never 0), with its type and your confidence between 0 and 1.\n\
         2. List the main themes with the indices of the segments that support them.\n\
         3. For each unit (starting at 0 and at every boundary) give a unit_type and a \
         one-sentence summary.\n\
         4. Describe the narrative flow in two or three sentences and note any \
         transcript quality issues.\n\
         5. Say whether the transcript opens or closes mid-thought.\n\n\
         TRANSCRIPT:\n{body}",
        count = segments.len(),
        last = segments.len().saturating_sub(1),
        body = render_segments(segments.iter().enumerate()),
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}
