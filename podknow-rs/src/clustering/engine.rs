//! ClusteringEngine: turns unit embeddings into labelled topic clusters.

use chrono::Utc;
use ndarray::{Array2, Axis};
use tracing::{info, warn};

use super::hdbscan::{self, HdbscanParams};
use super::{ClusteringOutcome, DistanceMetric};
use crate::edges::Membership;
use crate::errors::{PodknowError, Result};
use crate::llm_client::LlmClient;
use crate::nodes::{Cluster, ClusterScope, ClusterStatus, UnitId};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::retry::call_with_retry;
use crate::prompts::label::{self, ClusterLabelResponse};
use crate::types::PipelineConfig;
use crate::utils::{normalize_whitespace, stable_id, truncate_with_ellipsis};

/// Maximum characters of a fallback label.
pub const FALLBACK_LABEL_CHARS: usize = 60;

/// One unit to cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterInput {
    pub unit_id: UnitId,
    pub summary: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSettings {
    pub min_cluster_size: usize,
    pub min_samples: usize,
    pub merge_epsilon: f64,
    pub metric: DistanceMetric,
    pub label_sample_size: usize,
}

impl ClusterSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            min_cluster_size: config.min_cluster_size,
            min_samples: config.min_samples,
            merge_epsilon: config.merge_epsilon,
            metric: config.distance_metric,
            label_sample_size: config.label_sample_size,
        }
    }
}

pub struct ClusteringEngine<'a, L> {
    llm: &'a L,
    ctx: &'a PipelineContext,
    settings: ClusterSettings,
}

impl<'a, L: LlmClient> ClusteringEngine<'a, L> {
    pub fn new(llm: &'a L, ctx: &'a PipelineContext, settings: ClusterSettings) -> Self {
        Self { llm, ctx, settings }
    }

    /// Cluster `inputs` within `scope`.
    ///
    /// Fewer inputs than `min_cluster_size` is not an error: every unit is
    /// reported as noise. Malformed embeddings are.
    pub async fn cluster(&self, scope: ClusterScope, inputs: &[ClusterInput]) -> Result<ClusteringOutcome> {
        let data = embedding_matrix(inputs)?;

        if inputs.len() < self.settings.min_cluster_size {
            info!(
                scope = %scope.key(),
                units = inputs.len(),
                min_cluster_size = self.settings.min_cluster_size,
                "too few units to cluster"
            );
            return Ok(ClusteringOutcome::empty(
                scope,
                inputs.iter().map(|i| i.unit_id).collect(),
            ));
        }

        let distances = hdbscan::pairwise_distances(data.view(), self.settings.metric);
        let fit = hdbscan::fit(
            &distances,
            &HdbscanParams {
                min_cluster_size: self.settings.min_cluster_size,
                min_samples: self.settings.min_samples,
                cluster_selection_epsilon: self.settings.merge_epsilon,
            },
        );

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); fit.cluster_count];
        let mut noise = Vec::new();
        for (i, label) in fit.labels.iter().enumerate() {
            match label {
                Some(c) => members[*c].push(i),
                None => noise.push(inputs[i].unit_id),
            }
        }

        let scope_key = scope.key();
        let mut clusters = Vec::with_capacity(fit.cluster_count);
        let mut memberships = Vec::with_capacity(inputs.len() - noise.len());

        for (ordinal, rows) in members.iter().enumerate() {
            let centroid = data
                .select(Axis(0), rows)
                .mean_axis(Axis(0))
                .ok_or_else(|| PodknowError::Clustering("empty cluster".to_string()))?;

            // Members nearest the centroid first, ties by input order.
            let mut nearest: Vec<(usize, f64)> = rows
                .iter()
                .map(|&r| (r, self.settings.metric.distance(data.row(r), centroid.view())))
                .collect();
            nearest.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            let samples: Vec<&str> = nearest
                .iter()
                .take(self.settings.label_sample_size.max(1))
                .map(|&(r, _)| inputs[r].summary.as_str())
                .collect();

            let (label, status) = self.label(&scope_key, ordinal, &samples).await;
            let cluster_id = stable_id(&[&scope_key, "cluster", &ordinal.to_string()]);

            for &r in rows {
                memberships.push(Membership {
                    unit_id: inputs[r].unit_id,
                    cluster_id,
                    confidence: fit.probabilities[r],
                    is_primary: true,
                });
            }
            clusters.push(Cluster {
                id: cluster_id,
                scope: scope.clone(),
                label,
                centroid: centroid.iter().map(|&x| x as f32).collect(),
                member_count: rows.len(),
                status,
                created_at: Utc::now(),
            });
        }

        info!(
            scope = %scope_key,
            clusters = clusters.len(),
            noise = noise.len(),
            "clustering complete"
        );

        Ok(ClusteringOutcome {
            scope,
            clusters,
            memberships,
            noise,
        })
    }

    async fn label(&self, scope_key: &str, ordinal: usize, samples: &[&str]) -> (String, ClusterStatus) {
        let messages = label::messages(samples);
        let answer = call_with_retry(self.ctx, "label", || {
            self.llm.generate_structured::<ClusterLabelResponse>(&messages)
        })
        .await
        .map(|r| normalize_whitespace(&r.label));

        match answer {
            Ok(label) if !label.is_empty() => (label, ClusterStatus::Active),
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty label".to_string(),
                };
                warn!(scope = %scope_key, cluster = ordinal, reason = %reason, "cluster labelling failed, using nearest summary");
                let nearest = samples.first().copied().unwrap_or_default();
                (
                    truncate_with_ellipsis(&normalize_whitespace(nearest), FALLBACK_LABEL_CHARS),
                    ClusterStatus::Unlabeled,
                )
            }
        }
    }
}

/// Stack embeddings into an `n x dim` matrix, rejecting ragged, empty or
/// non-finite vectors.
fn embedding_matrix(inputs: &[ClusterInput]) -> Result<Array2<f64>> {
    let Some(first) = inputs.first() else {
        return Ok(Array2::zeros((0, 0)));
    };
    let dim = first.embedding.len();
    if dim == 0 {
        return Err(PodknowError::Clustering(format!(
            "unit {} has an empty embedding",
            first.unit_id
        )));
    }

    let mut flat = Vec::with_capacity(inputs.len() * dim);
    for input in inputs {
        if input.embedding.len() != dim {
            return Err(PodknowError::Clustering(format!(
                "unit {} has dimension {}, expected {dim}",
                input.unit_id,
                input.embedding.len()
            )));
        }
        if input.embedding.iter().any(|x| !x.is_finite()) {
            return Err(PodknowError::Clustering(format!(
                "unit {} has a non-finite embedding component",
                input.unit_id
            )));
        }
        flat.extend(input.embedding.iter().map(|&x| f64::from(x)));
    }

    Array2::from_shape_vec((inputs.len(), dim), flat)
        .map_err(|e| PodknowError::Clustering(e.to_string()))
}
