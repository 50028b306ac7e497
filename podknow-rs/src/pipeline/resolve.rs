//! EntityResolver: the RESOLVE phase.
//!
//! Folds per-unit extraction results, in unit order, into one set of
//! canonical entities per episode. The output is a pure function of the
//! ordered input: ids are UUIDv5 over `(episode, type, normalized key)` and
//! every tie is broken by creation order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::extract::ExtractionResult;
use crate::edges::ResolvedRelationship;
use crate::nodes::{CanonicalEntity, EntityMention, EntityType, Insight, Quote, UnitId};
use crate::utils::{normalize_key, stable_id, string_similarity};

/// Same normalized value extracted under two incompatible types. Both
/// entities are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConflict {
    pub normalized_key: String,
    pub existing_entity_id: Uuid,
    pub existing_type: EntityType,
    pub new_entity_id: Uuid,
    pub new_type: EntityType,
    pub unit_id: UnitId,
}

/// Everything RESOLVE hands to STORE.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedExtraction {
    /// Creation order.
    pub entities: Vec<CanonicalEntity>,
    pub quotes: Vec<Quote>,
    pub insights: Vec<Insight>,
    pub relationships: Vec<ResolvedRelationship>,
    pub conflicts: Vec<ResolutionConflict>,
    pub unresolved_pronouns: usize,
    pub dropped_relationships: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PronounClass {
    Person,
    NonPerson,
    Any,
}

impl PronounClass {
    fn of(key: &str) -> Option<Self> {
        match key {
            "he" | "she" | "him" | "her" | "his" | "hers" | "himself" | "herself" => {
                Some(PronounClass::Person)
            }
            "it" | "its" | "itself" => Some(PronounClass::NonPerson),
            "they" | "them" | "their" | "theirs" | "themselves" => Some(PronounClass::Any),
            _ => None,
        }
    }

    fn accepts(self, entity_type: EntityType) -> bool {
        match self {
            PronounClass::Person => entity_type == EntityType::Person,
            PronounClass::NonPerson => entity_type != EntityType::Person,
            PronounClass::Any => true,
        }
    }
}

pub struct EntityResolver<'a> {
    episode_id: &'a str,
    similarity_threshold: f64,
}

impl<'a> EntityResolver<'a> {
    pub fn new(episode_id: &'a str, similarity_threshold: f64) -> Self {
        Self {
            episode_id,
            similarity_threshold,
        }
    }

    /// Resolve `results`, which must be in ascending unit order.
    pub fn resolve(&self, results: &[ExtractionResult]) -> ResolvedExtraction {
        let mut state = State::default();
        let mut out = ResolvedExtraction::default();
        let mut previous_unit: Vec<usize> = Vec::new();

        for result in results {
            // Entity indices in mention order, and this unit's value → entity map.
            let mut mentioned: Vec<usize> = Vec::new();
            let mut aliases: HashMap<String, usize> = HashMap::new();

            for mention in &result.entities {
                let key = normalize_key(&mention.value);

                let idx = if let Some(class) = PronounClass::of(&key) {
                    let antecedent = mentioned
                        .iter()
                        .rev()
                        .chain(previous_unit.iter().rev())
                        .copied()
                        .find(|&i| class.accepts(state.entities[i].entity_type));
                    match antecedent {
                        Some(i) => {
                            debug!(
                                unit = %result.unit_id,
                                pronoun = %key,
                                entity = %state.entities[i].label,
                                "pronoun resolved"
                            );
                            i
                        }
                        None => {
                            debug!(unit = %result.unit_id, pronoun = %key, "dropping unresolved pronoun");
                            out.unresolved_pronouns += 1;
                            continue;
                        }
                    }
                } else {
                    self.match_or_create(&mut state, &mut out.conflicts, mention, key.clone())
                };

                state.record(idx, mention);
                mentioned.push(idx);
                aliases.insert(key, idx);
            }

            for rel in &result.relationships {
                let endpoints = (
                    state.lookup(&aliases, &rel.source),
                    state.lookup(&aliases, &rel.target),
                );
                let (Some(src), Some(tgt)) = endpoints else {
                    debug!(
                        unit = %result.unit_id,
                        source = %rel.source,
                        target = %rel.target,
                        "dropping relationship with unknown endpoint"
                    );
                    out.dropped_relationships += 1;
                    continue;
                };
                let source_entity_id = state.entities[src].id;
                let target_entity_id = state.entities[tgt].id;
                let dedup_key = (source_entity_id, target_entity_id, rel.relationship_type.clone());

                match state.relationship_index.get(&dedup_key) {
                    Some(&i) => {
                        let existing: &mut ResolvedRelationship = &mut out.relationships[i];
                        existing.confidence = existing.confidence.max(rel.confidence);
                        if !existing.provenance.contains(&rel.unit_id) {
                            existing.provenance.push(rel.unit_id);
                        }
                    }
                    None => {
                        state
                            .relationship_index
                            .insert(dedup_key, out.relationships.len());
                        out.relationships.push(ResolvedRelationship {
                            id: stable_id(&[
                                self.episode_id,
                                "relationship",
                                &source_entity_id.to_string(),
                                &rel.relationship_type,
                                &target_entity_id.to_string(),
                            ]),
                            source_entity_id,
                            target_entity_id,
                            relationship_type: rel.relationship_type.clone(),
                            confidence: rel.confidence,
                            provenance: vec![rel.unit_id],
                        });
                    }
                }
            }

            for insight in &result.insights {
                let mut labels: Vec<String> = Vec::with_capacity(insight.supporting_entities.len());
                for value in &insight.supporting_entities {
                    let label = state
                        .lookup(&aliases, value)
                        .map(|i| state.entities[i].label.clone())
                        .unwrap_or_else(|| value.clone());
                    if !labels.contains(&label) {
                        labels.push(label);
                    }
                }
                out.insights.push(Insight {
                    supporting_entities: labels,
                    ..insight.clone()
                });
            }

            out.quotes.extend(result.quotes.iter().cloned());
            previous_unit = mentioned;
        }

        out.entities = state.entities;
        out
    }

    /// Exact key match, then the best same-type fuzzy match, then a new
    /// entity. A different-type entity holding the exact key is recorded as
    /// a conflict whichever of the last two wins.
    fn match_or_create(
        &self,
        state: &mut State,
        conflicts: &mut Vec<ResolutionConflict>,
        mention: &EntityMention,
        key: String,
    ) -> usize {
        if let Some(&idx) = state.by_key.get(&(key.clone(), mention.entity_type)) {
            return idx;
        }

        let cross_type = state
            .entities
            .iter()
            .find(|e| e.normalized_key == key && e.entity_type != mention.entity_type)
            .map(|e| (e.id, e.entity_type));

        let mut best: Option<(usize, f64)> = None;
        for (i, e) in state.entities.iter().enumerate() {
            if e.entity_type != mention.entity_type {
                continue;
            }
            let score = string_similarity(&key, &e.normalized_key);
            if score >= self.similarity_threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        if let Some((idx, score)) = best {
            debug!(
                value = %mention.value,
                entity = %state.entities[idx].label,
                score,
                "fuzzy entity match"
            );
        }

        let id = match best {
            Some((idx, _)) => state.entities[idx].id,
            None => stable_id(&[self.episode_id, mention.entity_type.as_tag(), &key]),
        };
        if let Some((existing_entity_id, existing_type)) = cross_type {
            let seen = conflicts.iter().any(|c| {
                c.normalized_key == key
                    && c.existing_entity_id == existing_entity_id
                    && c.new_entity_id == id
            });
            if !seen {
                warn!(
                    value = %mention.value,
                    existing_type = existing_type.as_tag(),
                    new_type = mention.entity_type.as_tag(),
                    "entity extracted under conflicting types, keeping both"
                );
                conflicts.push(ResolutionConflict {
                    normalized_key: key.clone(),
                    existing_entity_id,
                    existing_type,
                    new_entity_id: id,
                    new_type: mention.entity_type,
                    unit_id: mention.unit_id,
                });
            }
        }
        if let Some((idx, _)) = best {
            return idx;
        }

        let idx = state.entities.len();
        state.entities.push(CanonicalEntity {
            id,
            label: mention.value.clone(),
            normalized_key: key.clone(),
            entity_type: mention.entity_type,
            provenance: Vec::new(),
            mention_count: 0,
            confidence: 0.0,
            importance: 0.0,
        });
        state.by_key.insert((key, mention.entity_type), idx);
        idx
    }
}

#[derive(Default)]
struct State {
    entities: Vec<CanonicalEntity>,
    by_key: HashMap<(String, EntityType), usize>,
    relationship_index: HashMap<(Uuid, Uuid, String), usize>,
}

impl State {
    fn record(&mut self, idx: usize, mention: &EntityMention) {
        let entity = &mut self.entities[idx];
        entity.mention_count += 1;
        entity.confidence = entity.confidence.max(mention.confidence);
        entity.importance = entity.importance.max(mention.importance);
        if !entity.provenance.contains(&mention.unit_id) {
            entity.provenance.push(mention.unit_id);
        }
    }

    /// Entity a raw value refers to: this unit's mentions first, then the
    /// earliest entity anywhere with the same normalized key.
    fn lookup(&self, aliases: &HashMap<String, usize>, value: &str) -> Option<usize> {
        let key = normalize_key(value);
        aliases
            .get(&key)
            .copied()
            .or_else(|| self.entities.iter().position(|e| e.normalized_key == key))
    }
}
