//! ConversationAnalyzer: the ANALYZE phase.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::context::PipelineContext;
use super::retry::call_with_retry;
use crate::errors::Result;
use crate::llm_client::LlmClient;
use crate::prompts::analyze::{self, StructureResponse};
use crate::transcript::{
    BoundaryType, ConversationBoundary, ConversationStructure, ConversationTheme,
    TranscriptSegment, UnitHint,
};
use crate::utils::{content_hash, normalize_whitespace};

/// Outcome of one analysis request.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub structure: Arc<ConversationStructure>,
    pub cache_hit: bool,
}

/// Asks the model collaborator for the structure of a whole episode.
pub struct ConversationAnalyzer<'a, L> {
    llm: &'a L,
    ctx: &'a PipelineContext,
}

impl<'a, L: LlmClient> ConversationAnalyzer<'a, L> {
    pub fn new(llm: &'a L, ctx: &'a PipelineContext) -> Self {
        Self { llm, ctx }
    }

    /// Analyse `segments`, consulting the shared cache first.
    ///
    /// Never fails because of the model: after the retry is exhausted a
    /// degraded fallback structure is returned (and not cached).
    pub async fn analyze(&self, segments: &[TranscriptSegment]) -> Analysis {
        let hash = segment_text_hash(segments);

        if let Some(structure) = self.ctx.cache.get(&hash).await {
            debug!(hash = %hash, "conversation structure cache hit");
            return Analysis {
                structure,
                cache_hit: true,
            };
        }

        match self.request(segments).await {
            Ok(response) => {
                let structure = Arc::new(normalize_response(response, segments.len(), hash));
                info!(
                    boundaries = structure.boundaries.len(),
                    themes = structure.themes.len(),
                    "conversation structure analysed"
                );
                self.ctx.cache.insert(structure.clone()).await;
                Analysis {
                    structure,
                    cache_hit: false,
                }
            }
            Err(e) => {
                warn!(error = %e, "conversation analysis failed, using whole-transcript fallback");
                Analysis {
                    structure: Arc::new(ConversationStructure::fallback(hash, &e.to_string())),
                    cache_hit: false,
                }
            }
        }
    }

    async fn request(&self, segments: &[TranscriptSegment]) -> Result<StructureResponse> {
        let messages = analyze::messages(segments);
        call_with_retry(self.ctx, "analyze", || {
            self.llm.generate_structured::<StructureResponse>(&messages)
        })
        .await
    }
}

/// Cache key: MD5 over the concatenated segment text.
pub fn segment_text_hash(segments: &[TranscriptSegment]) -> String {
    content_hash(segments.iter().map(|s| s.text.as_str()))
}

/// Clamp the model answer into a well-formed structure for `segment_count`
/// segments.
fn normalize_response(
    response: StructureResponse,
    segment_count: usize,
    content_hash: String,
) -> ConversationStructure {
    // position → boundary; duplicates keep the most confident answer.
    let mut boundaries: BTreeMap<usize, ConversationBoundary> = BTreeMap::new();
    for b in response.boundaries {
        if b.position == 0 || b.position >= segment_count {
            debug!(position = b.position, "dropping out-of-range boundary");
            continue;
        }
        let candidate = ConversationBoundary {
            position: b.position,
            boundary_type: BoundaryType::parse_lenient(&b.boundary_type),
            confidence: clamp_unit(b.confidence.unwrap_or(1.0)),
        };
        match boundaries.get(&b.position) {
            Some(existing) if existing.confidence >= candidate.confidence => {}
            _ => {
                boundaries.insert(b.position, candidate);
            }
        }
    }

    let themes = response
        .themes
        .into_iter()
        .filter_map(|t| {
            let label = normalize_whitespace(&t.label);
            if label.is_empty() {
                return None;
            }
            let mut segment_indices: Vec<usize> = t
                .segment_indices
                .into_iter()
                .filter(|&i| i < segment_count)
                .collect();
            segment_indices.sort_unstable();
            segment_indices.dedup();
            Some(ConversationTheme {
                label,
                segment_indices,
            })
        })
        .collect();

    let unit_hints = response
        .unit_hints
        .into_iter()
        .filter(|h| h.start_position < segment_count)
        .map(|h| UnitHint {
            start_position: h.start_position,
            unit_type: h.unit_type.filter(|s| !s.trim().is_empty()),
            summary: h
                .summary
                .map(|s| normalize_whitespace(&s))
                .filter(|s| !s.is_empty()),
        })
        .collect();

    ConversationStructure {
        boundaries: boundaries.into_values().collect(),
        themes,
        unit_hints,
        narrative_flow: normalize_whitespace(&response.narrative_flow),
        quality_observations: response.quality_observations,
        opens_mid_thought: response.opens_mid_thought,
        closes_mid_thought: response.closes_mid_thought,
        degraded: false,
        content_hash,
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
