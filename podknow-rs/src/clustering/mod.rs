//! Density-based topic clustering over unit embeddings.
//!
//! - [`hdbscan`]: deterministic HDBSCAN over a precomputed distance matrix
//! - [`engine::ClusteringEngine`]: builds clusters, centroids, memberships
//!   and model-generated labels for one [`crate::nodes::ClusterScope`]

pub mod engine;
pub mod hdbscan;

use std::fmt;
use std::str::FromStr;

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::edges::Membership;
use crate::errors::PodknowError;
use crate::nodes::{Cluster, ClusterScope, UnitId};

pub use engine::{ClusterInput, ClusterSettings, ClusteringEngine};

/// Distance between embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cosine similarity`; zero vectors are at distance 1 from everything.
    #[default]
    Cosine,
    Euclidean,
}

impl DistanceMetric {
    pub fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Cosine => {
                let norms = a.dot(&a).sqrt() * b.dot(&b).sqrt();
                if norms == 0.0 {
                    return 1.0;
                }
                (1.0 - a.dot(&b) / norms).clamp(0.0, 2.0)
            }
            DistanceMetric::Euclidean => {
                let diff = &a - &b;
                diff.dot(&diff).sqrt()
            }
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Cosine => f.write_str("cosine"),
            DistanceMetric::Euclidean => f.write_str("euclidean"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = PodknowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" => Ok(DistanceMetric::Euclidean),
            other => Err(PodknowError::Config(format!(
                "distance metric must be `cosine` or `euclidean`, got `{other}`"
            ))),
        }
    }
}

/// Result of one clustering run. Replaces all prior state of `scope`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringOutcome {
    pub scope: ClusterScope,
    pub clusters: Vec<Cluster>,
    pub memberships: Vec<Membership>,
    /// Units left unassigned.
    pub noise: Vec<UnitId>,
}

impl ClusteringOutcome {
    pub fn empty(scope: ClusterScope, noise: Vec<UnitId>) -> Self {
        Self {
            scope,
            clusters: Vec::new(),
            memberships: Vec::new(),
            noise,
        }
    }
}
