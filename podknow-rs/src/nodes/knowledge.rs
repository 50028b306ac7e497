//! Quotes and insights extracted from units.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::unit::UnitId;

/// A notable verbatim statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub text: String,
    pub speaker: String,
    pub importance: f64,
    pub unit_id: UnitId,
}

/// A takeaway synthesised from a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Entity values before resolution; canonical labels after.
    pub supporting_entities: Vec<String>,
    pub unit_id: UnitId,
}
