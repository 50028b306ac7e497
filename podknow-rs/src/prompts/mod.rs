//! Prompt templates and response schemas for model requests.
//!
//! Each submodule builds the [`crate::llm_client::Message`] sequence for one
//! pipeline request and declares the `schemars`-derived type the response is
//! parsed into.

pub mod analyze;
pub mod extract;
pub mod label;

use crate::transcript::TranscriptSegment;

/// Render segments as `[index] Speaker (start–end s): text` lines.
pub(crate) fn render_segments<'a>(
    segments: impl IntoIterator<Item = (usize, &'a TranscriptSegment)>,
) -> String {
    segments
        .into_iter()
        .map(|(i, seg)| {
            format!(
                "[{i}] {} ({:.1}-{:.1}s): {}",
                seg.speaker_key(),
                seg.start,
                seg.end,
                crate::utils::normalize_whitespace(&seg.text)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
