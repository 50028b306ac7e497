//! Per-unit knowledge extraction prompt.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::render_segments;
use crate::llm_client::Message;
use crate::nodes::MeaningfulUnit;
use crate::transcript::TranscriptSegment;

const SYSTEM: &str = "You extract structured knowledge from one unit of a spoken \
conversation: the entities discussed, notable verbatim quotes, insights, and the \
relationships between entities. Only use what is said in the unit. Answer strictly \
in the requested JSON format.";

/// Model answer for the EXTRACT phase.
///
/// Records are kept as raw JSON so that one malformed record can be dropped
/// without losing the rest of the answer. The schema advertised to the model
/// is the typed one.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ExtractionPayload {
    #[serde(default, deserialize_with = "lenient_section")]
    #[schemars(with = "Vec<EntityRecord>")]
    pub entities: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_section")]
    #[schemars(with = "Vec<QuoteRecord>")]
    pub quotes: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_section")]
    #[schemars(with = "Vec<InsightRecord>")]
    pub insights: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_section")]
    #[schemars(with = "Vec<RelationshipRecord>")]
    pub relationships: Vec<Value>,
}

/// Accept any JSON for a section. `null` is an empty section; any other
/// non-array value becomes a single record, which record validation then
/// keeps or drops on its own merits.
fn lenient_section<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EntityRecord {
    /// Name of the entity as spoken.
    pub value: String,
    /// person, organization, product, technology, concept, location, event,
    /// work or other.
    #[serde(alias = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// How central the entity is to the unit, 0 to 1.
    #[serde(default)]
    pub importance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QuoteRecord {
    pub text: String,
    #[serde(default)]
    pub speaker: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct InsightRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Entity names the insight relies on.
    #[serde(default)]
    pub supporting_entities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RelationshipRecord {
    pub source: String,
    pub target: String,
    /// Short verb phrase, e.g. "works at" or "founded".
    #[serde(alias = "type")]
    pub relationship_type: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Build the EXTRACT request for one unit. `segments` is the full episode;
/// only the unit's slice is rendered.
pub fn messages(
    unit: &MeaningfulUnit,
    segments: &[TranscriptSegment],
    previous_summary: Option<&str>,
    next_summary: Option<&str>,
) -> Vec<Message> {
    let body = render_segments(
        unit.segment_indices
            .iter()
            .filter_map(|&i| segments.get(i).map(|s| (i, s))),
    );

    let mut context = String::new();
    if let Some(prev) = previous_summary {
        context.push_str(&format!("Previous unit: {prev}\n"));
    }
    if let Some(next) = next_summary {
        context.push_str(&format!("Next unit: {next}\n"));
    }
    if context.is_empty() {
        context.push_str("(this is the only unit)\n");
    }

    let themes = if unit.themes.is_empty() {
        "none".to_string()
    } else {
        unit.themes.join(", ")
    };

    let user = format!(
        "UNIT {ordinal} ({kind}): {summary}\n\
         Themes: {themes}\n\n\
         SURROUNDING CONTEXT (do not extract from it):\n{context}\n\
         UNIT TRANSCRIPT:\n{body}\n\n\
         Extract entities with a type, confidence and importance; quotes worth \
         keeping verbatim with their speaker; insights with the entities that \
         support them; and relationships between extracted entities.",
        ordinal = unit.ordinal,
        kind = unit.unit_type.as_str(),
        summary = unit.summary,
    );

    vec![Message::system(SYSTEM), Message::user(user)]
}
