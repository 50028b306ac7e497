//! Entity mentions and the canonical entities they resolve to.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::unit::UnitId;

/// Closed set of entity types; stored as uppercase tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Organization,
    Product,
    Technology,
    Concept,
    Location,
    Event,
    Work,
    Other,
}

impl EntityType {
    /// Map a free-form model label onto the closed set. Unrecognised labels
    /// become [`EntityType::Other`].
    pub fn parse_lenient(raw: &str) -> Self {
        match crate::utils::to_upper_snake(raw).as_str() {
            "PERSON" | "PEOPLE" | "INDIVIDUAL" | "SPEAKER" | "GUEST" | "HOST" => EntityType::Person,
            "ORGANIZATION" | "ORGANISATION" | "ORG" | "COMPANY" | "INSTITUTION" | "STARTUP" => {
                EntityType::Organization
            }
            "PRODUCT" | "SERVICE" | "BRAND" => EntityType::Product,
            "TECHNOLOGY" | "TECH" | "TOOL" | "SOFTWARE" | "FRAMEWORK" => EntityType::Technology,
            "CONCEPT" | "IDEA" | "TOPIC" | "THEORY" | "METHOD" => EntityType::Concept,
            "LOCATION" | "PLACE" | "CITY" | "COUNTRY" | "REGION" => EntityType::Location,
            "EVENT" | "CONFERENCE" | "INCIDENT" => EntityType::Event,
            "WORK" | "BOOK" | "PAPER" | "PUBLICATION" | "FILM" | "SHOW" | "PODCAST" => {
                EntityType::Work
            }
            _ => EntityType::Other,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Product => "PRODUCT",
            EntityType::Technology => "TECHNOLOGY",
            EntityType::Concept => "CONCEPT",
            EntityType::Location => "LOCATION",
            EntityType::Event => "EVENT",
            EntityType::Work => "WORK",
            EntityType::Other => "OTHER",
        }
    }
}

/// One mention of an entity inside one unit, before resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub value: String,
    pub entity_type: EntityType,
    pub confidence: f64,
    pub importance: f64,
    pub unit_id: UnitId,
}

/// The deduplicated representation of every mention of one real-world
/// entity within an episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: Uuid,
    /// Value of the first mention that created this entity.
    pub label: String,
    pub normalized_key: String,
    pub entity_type: EntityType,
    /// Units the entity was mentioned in, first-seen order, no duplicates.
    pub provenance: Vec<UnitId>,
    pub mention_count: usize,
    /// Max over contributing mentions.
    pub confidence: f64,
    /// Max over contributing mentions.
    pub importance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_parses_synonyms() {
        assert_eq!(EntityType::parse_lenient("company"), EntityType::Organization);
        assert_eq!(EntityType::parse_lenient("Person"), EntityType::Person);
        assert_eq!(EntityType::parse_lenient("book"), EntityType::Work);
        assert_eq!(EntityType::parse_lenient("vibe"), EntityType::Other);
    }

    #[test]
    fn entity_type_serializes_as_uppercase_tag() {
        assert_eq!(
            serde_json::to_string(&EntityType::Organization).unwrap(),
            "\"ORGANIZATION\""
        );
        let parsed: EntityType = serde_json::from_str("\"LOCATION\"").unwrap();
        assert_eq!(parsed, EntityType::Location);
        assert_eq!(parsed.as_tag(), "LOCATION");
    }
}
