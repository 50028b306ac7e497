//! MeaningfulUnitExtractor: the EXTRACT phase for one unit.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::context::PipelineContext;
use super::retry::call_with_retry;
use crate::edges::Relationship;
use crate::errors::Result;
use crate::llm_client::LlmClient;
use crate::nodes::{EntityMention, EntityType, Insight, MeaningfulUnit, Quote, UnitId};
use crate::prompts::extract::{
    self, EntityRecord, ExtractionPayload, InsightRecord, QuoteRecord, RelationshipRecord,
};
use crate::transcript::{TranscriptSegment, UNKNOWN_SPEAKER};
use crate::utils::{normalize_whitespace, stable_id, to_upper_snake};

/// Score used when the model leaves confidence or importance out.
pub const DEFAULT_SCORE: f64 = 0.5;

/// Validated knowledge extracted from one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionResult {
    pub unit_id: UnitId,
    pub entities: Vec<EntityMention>,
    pub quotes: Vec<Quote>,
    pub insights: Vec<Insight>,
    pub relationships: Vec<Relationship>,
    /// Records the model returned that failed validation.
    pub dropped_records: usize,
}

impl ExtractionResult {
    /// Result for a unit whose extraction failed outright.
    pub fn empty(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            ..Default::default()
        }
    }
}

pub struct MeaningfulUnitExtractor<'a, L> {
    llm: &'a L,
    ctx: &'a PipelineContext,
}

impl<'a, L: LlmClient> MeaningfulUnitExtractor<'a, L> {
    pub fn new(llm: &'a L, ctx: &'a PipelineContext) -> Self {
        Self { llm, ctx }
    }

    /// Extract entities, quotes, insights and relationships from `unit`.
    ///
    /// Fails only when the model call fails after its retry; malformed
    /// individual records are dropped and counted instead.
    pub async fn extract(
        &self,
        unit: &MeaningfulUnit,
        segments: &[TranscriptSegment],
        previous_summary: Option<&str>,
        next_summary: Option<&str>,
    ) -> Result<ExtractionResult> {
        let messages = extract::messages(unit, segments, previous_summary, next_summary);
        let payload = call_with_retry(self.ctx, "extract", || {
            self.llm.generate_structured::<ExtractionPayload>(&messages)
        })
        .await?;

        let result = validate_payload(unit, payload);
        debug!(
            unit = unit.ordinal,
            entities = result.entities.len(),
            quotes = result.quotes.len(),
            insights = result.insights.len(),
            relationships = result.relationships.len(),
            dropped = result.dropped_records,
            "unit extracted"
        );
        Ok(result)
    }
}

/// Turn raw records into typed values, dropping the ones that fail.
pub fn validate_payload(unit: &MeaningfulUnit, payload: ExtractionPayload) -> ExtractionResult {
    let mut dropped = 0;
    let unit_key = unit.id.to_string();
    let default_speaker = unit.dominant_speaker().unwrap_or(UNKNOWN_SPEAKER).to_string();

    let entities = parse_records(unit, "entity", payload.entities, &mut dropped, |r: EntityRecord| {
        Ok(EntityMention {
            value: non_empty(&r.value).ok_or("empty value")?,
            entity_type: EntityType::parse_lenient(&r.entity_type),
            confidence: score(r.confidence),
            importance: score(r.importance),
            unit_id: unit.id,
        })
    });

    let mut quote_ordinal = 0usize;
    let quotes = parse_records(unit, "quote", payload.quotes, &mut dropped, |r: QuoteRecord| {
        let text = non_empty(&r.text).ok_or("empty text")?;
        let id = stable_id(&[&unit_key, "quote", &quote_ordinal.to_string()]);
        quote_ordinal += 1;
        Ok(Quote {
            id,
            text,
            speaker: r
                .speaker
                .as_deref()
                .and_then(non_empty)
                .unwrap_or_else(|| default_speaker.clone()),
            importance: score(r.importance),
            unit_id: unit.id,
        })
    });

    let mut insight_ordinal = 0usize;
    let insights = parse_records(unit, "insight", payload.insights, &mut dropped, |r: InsightRecord| {
        let title = non_empty(&r.title).ok_or("empty title")?;
        let id = stable_id(&[&unit_key, "insight", &insight_ordinal.to_string()]);
        insight_ordinal += 1;
        Ok(Insight {
            id,
            title,
            description: normalize_whitespace(&r.description),
            supporting_entities: r
                .supporting_entities
                .iter()
                .filter_map(|s| non_empty(s))
                .collect(),
            unit_id: unit.id,
        })
    });

    let relationships = parse_records(
        unit,
        "relationship",
        payload.relationships,
        &mut dropped,
        |r: RelationshipRecord| {
            let relationship_type = to_upper_snake(&r.relationship_type);
            if relationship_type.is_empty() {
                return Err("empty relationship type");
            }
            Ok(Relationship {
                source: non_empty(&r.source).ok_or("empty source")?,
                target: non_empty(&r.target).ok_or("empty target")?,
                relationship_type,
                confidence: score(r.confidence),
                unit_id: unit.id,
            })
        },
    );

    ExtractionResult {
        unit_id: unit.id,
        entities,
        quotes,
        insights,
        relationships,
        dropped_records: dropped,
    }
}

/// Deserialize each record on its own and run `build` over it. Failures are
/// logged and counted in `dropped`.
fn parse_records<R, T>(
    unit: &MeaningfulUnit,
    kind: &str,
    raw: Vec<Value>,
    dropped: &mut usize,
    mut build: impl FnMut(R) -> std::result::Result<T, &'static str>,
) -> Vec<T>
where
    R: DeserializeOwned,
{
    let mut out = Vec::with_capacity(raw.len());
    for value in raw {
        let outcome = serde_json::from_value::<R>(value)
            .map_err(|e| e.to_string())
            .and_then(|record| build(record).map_err(str::to_string));
        match outcome {
            Ok(item) => out.push(item),
            Err(reason) => {
                warn!(unit = unit.ordinal, record = kind, reason = %reason, "dropping malformed extraction record");
                *dropped += 1;
            }
        }
    }
    out
}

fn non_empty(s: &str) -> Option<String> {
    let s = normalize_whitespace(s);
    (!s.is_empty()).then_some(s)
}

/// Clamp a model score into `[0, 1]`; missing or NaN becomes the default.
fn score(raw: Option<f64>) -> f64 {
    match raw {
        Some(x) if !x.is_nan() => x.clamp(0.0, 1.0),
        _ => DEFAULT_SCORE,
    }
}
