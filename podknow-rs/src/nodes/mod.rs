//! Node types for the knowledge graph.
//!
//! - [`unit::MeaningfulUnit`]: regrouped transcript segments
//! - [`entity::CanonicalEntity`]: deduplicated entities (and their raw mentions)
//! - [`knowledge::Quote`] / [`knowledge::Insight`]: extracted knowledge
//! - [`cluster::Cluster`]: topic clusters over units

pub mod cluster;
pub mod entity;
pub mod knowledge;
pub mod unit;

pub use cluster::{Cluster, ClusterScope, ClusterStatus};
pub use entity::{CanonicalEntity, EntityMention, EntityType};
pub use knowledge::{Insight, Quote};
pub use unit::{MeaningfulUnit, UnitId, UnitType};
