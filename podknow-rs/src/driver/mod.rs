//! Graph store abstraction.
//!
//! Defines the [`GraphDriver`] / [`GraphTransaction`] pair every backend
//! implements, plus the in-process [`memory::InMemoryGraph`].
//!
//! All writes of one episode go through a single transaction: nothing is
//! visible until [`GraphTransaction::commit`], and [`GraphTransaction::rollback`]
//! (or a failed commit) leaves the store exactly as it was. Writes are
//! idempotent by id.

pub mod memory;

use crate::edges::{Membership, ResolvedRelationship};
use crate::errors::Result;
use crate::nodes::{CanonicalEntity, Cluster, ClusterScope, Insight, MeaningfulUnit, Quote, UnitId};

/// A graph database backend.
#[allow(async_fn_in_trait)]
pub trait GraphDriver: Send + Sync {
    type Transaction: GraphTransaction;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Self::Transaction>;
}

/// Staged writes against a [`GraphDriver`].
#[allow(async_fn_in_trait)]
pub trait GraphTransaction: Send {
    async fn upsert_meaningful_unit(&mut self, unit: &MeaningfulUnit) -> Result<()>;

    async fn upsert_entity(
        &mut self,
        episode_id: &str,
        entity: &CanonicalEntity,
        provenance: &[UnitId],
    ) -> Result<()>;

    async fn upsert_quote(&mut self, quote: &Quote, provenance: &[UnitId]) -> Result<()>;

    async fn upsert_insight(&mut self, insight: &Insight, provenance: &[UnitId]) -> Result<()>;

    async fn upsert_relationship(
        &mut self,
        relationship: &ResolvedRelationship,
        provenance: &[UnitId],
    ) -> Result<()>;

    /// Drop every cluster and membership of `scope`.
    async fn replace_cluster_scope(&mut self, scope: &ClusterScope) -> Result<()>;

    /// Rewriting a cluster id that already exists keeps its original
    /// `created_at`, including across [`Self::replace_cluster_scope`].
    async fn upsert_cluster(&mut self, cluster: &Cluster) -> Result<()>;

    async fn upsert_membership(&mut self, scope: &ClusterScope, membership: &Membership) -> Result<()>;

    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
