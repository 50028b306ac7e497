//! Relationships between entities.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::nodes::UnitId;

/// A relationship as extracted from one unit, endpoints still raw values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub target: String,
    /// `UPPER_SNAKE_CASE` label (e.g. `"WORKS_AT"`).
    pub relationship_type: String,
    pub confidence: f64,
    pub unit_id: UnitId,
}

/// A relationship between two canonical entities, merged across units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRelationship {
    pub id: Uuid,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relationship_type: String,
    /// Max over contributing extractions.
    pub confidence: f64,
    pub provenance: Vec<UnitId>,
}
