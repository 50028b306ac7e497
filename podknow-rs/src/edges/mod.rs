//! Edge types for the knowledge graph.
//!
//! - [`relationship::Relationship`] / [`relationship::ResolvedRelationship`]: entity → entity
//! - [`membership::Membership`]: unit → cluster

pub mod membership;
pub mod relationship;

pub use membership::Membership;
pub use relationship::{Relationship, ResolvedRelationship};
