//! Unit → cluster membership edges.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::nodes::UnitId;

/// Assignment of a unit to a cluster. Noise units never get one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub unit_id: UnitId,
    pub cluster_id: Uuid,
    /// Soft-membership probability in `[0, 1]`.
    pub confidence: f64,
    pub is_primary: bool,
}
