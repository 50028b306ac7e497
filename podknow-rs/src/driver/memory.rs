//! In-process graph store.
//!
//! Transactions record an operation log; commit replays it onto a copy of
//! the current snapshot under the write lock and swaps the copy in, so a
//! commit is all-or-nothing and concurrent transactions never lose each
//! other's writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{GraphDriver, GraphTransaction};
use crate::edges::{Membership, ResolvedRelationship};
use crate::errors::{PodknowError, Result};
use crate::nodes::{CanonicalEntity, Cluster, ClusterScope, Insight, MeaningfulUnit, Quote, UnitId};

/// A stored record together with the units it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithProvenance<T> {
    pub record: T,
    pub provenance: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub episode_id: String,
    pub entity: CanonicalEntity,
    pub provenance: Vec<UnitId>,
}

/// Clusters and memberships of one [`ClusterScope`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeState {
    pub clusters: BTreeMap<Uuid, Cluster>,
    pub memberships: BTreeMap<UnitId, Membership>,
}

/// Full store contents. Ordered maps keep the serialized form stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub units: BTreeMap<UnitId, MeaningfulUnit>,
    pub entities: BTreeMap<Uuid, StoredEntity>,
    pub quotes: BTreeMap<Uuid, WithProvenance<Quote>>,
    pub insights: BTreeMap<Uuid, WithProvenance<Insight>>,
    pub relationships: BTreeMap<Uuid, WithProvenance<ResolvedRelationship>>,
    /// Keyed by [`ClusterScope::key`].
    pub cluster_scopes: BTreeMap<String, ScopeState>,
}

impl GraphSnapshot {
    pub fn units_of_episode<'a>(&'a self, episode_id: &'a str) -> impl Iterator<Item = &'a MeaningfulUnit> + 'a {
        self.units.values().filter(move |u| u.episode_id == episode_id)
    }

    pub fn entities_of_episode<'a>(&'a self, episode_id: &'a str) -> impl Iterator<Item = &'a StoredEntity> + 'a {
        self.entities.values().filter(move |e| e.episode_id == episode_id)
    }

    /// Apply one staged write. `before` is the state the transaction
    /// commits over.
    fn apply(&mut self, op: WriteOp, before: &GraphSnapshot) -> Result<()> {
        match op {
            WriteOp::Unit(unit) => {
                self.units.insert(unit.id, unit);
            }
            WriteOp::Entity {
                episode_id,
                entity,
                provenance,
            } => {
                self.entities.insert(
                    entity.id,
                    StoredEntity {
                        episode_id,
                        entity,
                        provenance,
                    },
                );
            }
            WriteOp::Quote(quote, provenance) => {
                self.quotes.insert(
                    quote.id,
                    WithProvenance {
                        record: quote,
                        provenance,
                    },
                );
            }
            WriteOp::Insight(insight, provenance) => {
                self.insights.insert(
                    insight.id,
                    WithProvenance {
                        record: insight,
                        provenance,
                    },
                );
            }
            WriteOp::Relationship(rel, provenance) => {
                for endpoint in [rel.source_entity_id, rel.target_entity_id] {
                    if !self.entities.contains_key(&endpoint) {
                        return Err(PodknowError::Storage(format!(
                            "relationship {} references unknown entity {endpoint}",
                            rel.id
                        )));
                    }
                }
                self.relationships.insert(
                    rel.id,
                    WithProvenance {
                        record: rel,
                        provenance,
                    },
                );
            }
            WriteOp::ReplaceScope(scope) => {
                self.cluster_scopes.insert(scope.key(), ScopeState::default());
            }
            WriteOp::Cluster(mut cluster) => {
                let key = cluster.scope.key();
                let earlier = before
                    .cluster_scopes
                    .get(&key)
                    .and_then(|state| state.clusters.get(&cluster.id))
                    .or_else(|| {
                        self.cluster_scopes
                            .get(&key)
                            .and_then(|state| state.clusters.get(&cluster.id))
                    });
                if let Some(earlier) = earlier {
                    cluster.created_at = earlier.created_at;
                }
                self.cluster_scopes
                    .entry(key)
                    .or_default()
                    .clusters
                    .insert(cluster.id, cluster);
            }
            WriteOp::Membership(scope, membership) => {
                let state = self.cluster_scopes.entry(scope.key()).or_default();
                if !state.clusters.contains_key(&membership.cluster_id) {
                    return Err(PodknowError::Storage(format!(
                        "membership references unknown cluster {} in scope {}",
                        membership.cluster_id,
                        scope.key()
                    )));
                }
                state.memberships.insert(membership.unit_id, membership);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum WriteOp {
    Unit(MeaningfulUnit),
    Entity {
        episode_id: String,
        entity: CanonicalEntity,
        provenance: Vec<UnitId>,
    },
    Quote(Quote, Vec<UnitId>),
    Insight(Insight, Vec<UnitId>),
    Relationship(ResolvedRelationship, Vec<UnitId>),
    ReplaceScope(ClusterScope),
    Cluster(Cluster),
    Membership(ClusterScope, Membership),
}

/// Shared handle to an in-memory graph; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraph {
    inner: Arc<RwLock<GraphSnapshot>>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> GraphSnapshot {
        self.inner.read().await.clone()
    }

    /// Serialized committed state, stable across identical contents.
    pub async fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&*self.inner.read().await)?)
    }
}

impl GraphDriver for InMemoryGraph {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction> {
        Ok(MemoryTransaction {
            target: self.inner.clone(),
            ops: Vec::new(),
        })
    }
}

pub struct MemoryTransaction {
    target: Arc<RwLock<GraphSnapshot>>,
    ops: Vec<WriteOp>,
}

impl MemoryTransaction {
    /// Writes staged so far.
    pub fn pending(&self) -> usize {
        self.ops.len()
    }
}

impl GraphTransaction for MemoryTransaction {
    async fn upsert_meaningful_unit(&mut self, unit: &MeaningfulUnit) -> Result<()> {
        self.ops.push(WriteOp::Unit(unit.clone()));
        Ok(())
    }

    async fn upsert_entity(
        &mut self,
        episode_id: &str,
        entity: &CanonicalEntity,
        provenance: &[UnitId],
    ) -> Result<()> {
        self.ops.push(WriteOp::Entity {
            episode_id: episode_id.to_string(),
            entity: entity.clone(),
            provenance: provenance.to_vec(),
        });
        Ok(())
    }

    async fn upsert_quote(&mut self, quote: &Quote, provenance: &[UnitId]) -> Result<()> {
        self.ops.push(WriteOp::Quote(quote.clone(), provenance.to_vec()));
        Ok(())
    }

    async fn upsert_insight(&mut self, insight: &Insight, provenance: &[UnitId]) -> Result<()> {
        self.ops.push(WriteOp::Insight(insight.clone(), provenance.to_vec()));
        Ok(())
    }

    async fn upsert_relationship(
        &mut self,
        relationship: &ResolvedRelationship,
        provenance: &[UnitId],
    ) -> Result<()> {
        self.ops
            .push(WriteOp::Relationship(relationship.clone(), provenance.to_vec()));
        Ok(())
    }

    async fn replace_cluster_scope(&mut self, scope: &ClusterScope) -> Result<()> {
        self.ops.push(WriteOp::ReplaceScope(scope.clone()));
        Ok(())
    }

    async fn upsert_cluster(&mut self, cluster: &Cluster) -> Result<()> {
        self.ops.push(WriteOp::Cluster(cluster.clone()));
        Ok(())
    }

    async fn upsert_membership(&mut self, scope: &ClusterScope, membership: &Membership) -> Result<()> {
        self.ops
            .push(WriteOp::Membership(scope.clone(), membership.clone()));
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut committed = self.target.write().await;
        let mut next = committed.clone();
        let count = self.ops.len();
        for op in self.ops {
            next.apply(op, &committed)?;
        }
        *committed = next;
        debug!(writes = count, "in-memory transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        debug!(writes = self.ops.len(), "in-memory transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{ClusterStatus, EntityType, UnitType};
    use chrono::Utc;

    fn unit(n: u128) -> MeaningfulUnit {
        MeaningfulUnit {
            id: Uuid::from_u128(n),
            episode_id: "ep".into(),
            ordinal: n as usize,
            segment_indices: vec![n as usize],
            unit_type: UnitType::TopicDiscussion,
            summary: format!("unit {n}"),
            themes: vec![],
            start: n as f64,
            end: n as f64 + 1.0,
            speaker_distribution: BTreeMap::from([("Host".to_string(), 100.0)]),
            is_complete: true,
            embedding: None,
        }
    }

    fn entity(n: u128) -> CanonicalEntity {
        CanonicalEntity {
            id: Uuid::from_u128(n),
            label: format!("E{n}"),
            normalized_key: format!("e{n}"),
            entity_type: EntityType::Concept,
            provenance: vec![Uuid::from_u128(1)],
            mention_count: 1,
            confidence: 0.9,
            importance: 0.5,
        }
    }

    fn cluster(scope: &ClusterScope, n: u128) -> Cluster {
        Cluster {
            id: Uuid::from_u128(n),
            scope: scope.clone(),
            label: "topic".into(),
            centroid: vec![0.5, 0.5],
            member_count: 1,
            status: ClusterStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() {
        let graph = InMemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        tx.upsert_meaningful_unit(&unit(1)).await.unwrap();
        assert_eq!(tx.pending(), 1);
        assert!(graph.snapshot().await.units.is_empty());

        tx.commit().await.unwrap();
        assert_eq!(graph.snapshot().await.units.len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let graph = InMemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        tx.upsert_meaningful_unit(&unit(1)).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(graph.snapshot().await, GraphSnapshot::default());
    }

    #[tokio::test]
    async fn upserts_are_idempotent() {
        let graph = InMemoryGraph::new();
        for _ in 0..2 {
            let mut tx = graph.begin().await.unwrap();
            tx.upsert_meaningful_unit(&unit(1)).await.unwrap();
            tx.upsert_entity("ep", &entity(10), &[Uuid::from_u128(1)]).await.unwrap();
            tx.commit().await.unwrap();
        }
        let snap = graph.snapshot().await;
        assert_eq!(snap.units.len(), 1);
        assert_eq!(snap.entities_of_episode("ep").count(), 1);
    }

    #[tokio::test]
    async fn failed_commit_leaves_store_untouched() {
        let graph = InMemoryGraph::new();
        let mut tx = graph.begin().await.unwrap();
        tx.upsert_meaningful_unit(&unit(1)).await.unwrap();
        tx.commit().await.unwrap();
        let before = graph.snapshot_json().await.unwrap();

        let mut tx = graph.begin().await.unwrap();
        tx.upsert_meaningful_unit(&unit(2)).await.unwrap();
        let dangling = ResolvedRelationship {
            id: Uuid::from_u128(99),
            source_entity_id: Uuid::from_u128(10),
            target_entity_id: Uuid::from_u128(11),
            relationship_type: "KNOWS".into(),
            confidence: 0.5,
            provenance: vec![],
        };
        tx.upsert_relationship(&dangling, &[]).await.unwrap();
        assert!(matches!(tx.commit().await, Err(PodknowError::Storage(_))));

        assert_eq!(graph.snapshot_json().await.unwrap(), before);
    }

    #[tokio::test]
    async fn replacing_a_scope_drops_only_that_scope() {
        let graph = InMemoryGraph::new();
        let a = ClusterScope::Episode("a".into());
        let b = ClusterScope::Corpus("b".into());

        let mut tx = graph.begin().await.unwrap();
        for (scope, id) in [(&a, 1), (&b, 2)] {
            tx.upsert_cluster(&cluster(scope, id)).await.unwrap();
            tx.upsert_membership(
                scope,
                &Membership {
                    unit_id: Uuid::from_u128(id + 100),
                    cluster_id: Uuid::from_u128(id),
                    confidence: 1.0,
                    is_primary: true,
                },
            )
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = graph.begin().await.unwrap();
        tx.replace_cluster_scope(&a).await.unwrap();
        tx.commit().await.unwrap();

        let snap = graph.snapshot().await;
        assert!(snap.cluster_scopes[&a.key()].clusters.is_empty());
        assert!(snap.cluster_scopes[&a.key()].memberships.is_empty());
        assert_eq!(snap.cluster_scopes[&b.key()].memberships.len(), 1);
    }

    #[tokio::test]
    async fn rewritten_cluster_keeps_first_creation_time() {
        let graph = InMemoryGraph::new();
        let scope = ClusterScope::Episode("a".into());
        let first = cluster(&scope, 1);

        let mut tx = graph.begin().await.unwrap();
        tx.upsert_cluster(&first).await.unwrap();
        tx.commit().await.unwrap();
        let before = graph.snapshot_json().await.unwrap();

        let mut again = cluster(&scope, 1);
        again.created_at = first.created_at + chrono::Duration::hours(1);
        let mut tx = graph.begin().await.unwrap();
        tx.replace_cluster_scope(&scope).await.unwrap();
        tx.upsert_cluster(&again).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(graph.snapshot_json().await.unwrap(), before);
        assert_eq!(
            graph.snapshot().await.cluster_scopes[&scope.key()].clusters[&first.id].created_at,
            first.created_at
        );
    }

    #[tokio::test]
    async fn membership_requires_cluster_in_scope() {
        let graph = InMemoryGraph::new();
        let scope = ClusterScope::Corpus("c".into());
        let mut tx = graph.begin().await.unwrap();
        tx.upsert_membership(
            &scope,
            &Membership {
                unit_id: Uuid::from_u128(1),
                cluster_id: Uuid::from_u128(2),
                confidence: 1.0,
                is_primary: true,
            },
        )
        .await
        .unwrap();
        assert!(tx.commit().await.is_err());
        assert!(graph.snapshot().await.cluster_scopes.is_empty());
    }
}
