//! Topic clusters over meaningful units.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Set of units a clustering run covers. Each run fully replaces the prior
/// clusters of its scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ClusterScope {
    Episode(String),
    Corpus(String),
}

impl ClusterScope {
    pub fn key(&self) -> String {
        match self {
            ClusterScope::Episode(id) => format!("episode:{id}"),
            ClusterScope::Corpus(name) => format!("corpus:{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    /// Labelled by the model.
    Active,
    /// Label generation failed; the label is a truncated member summary.
    Unlabeled,
}

/// A density-based topic group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: Uuid,
    pub scope: ClusterScope,
    pub label: String,
    /// Arithmetic mean of member embeddings.
    pub centroid: Vec<f32>,
    pub member_count: usize,
    pub status: ClusterStatus,
    /// When this id was first stored; stores keep it across rewrites.
    pub created_at: DateTime<Utc>,
}
