//! Recoverable anomalies detected while a tick commits.
//!
//! None of these abort a tick. Each one is returned to the caller inside the
//! [`crate::report::SyncReport`] and logged through `tracing` when raised.

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, fixed64_to_f64};
use crate::id::{ModuleId, ResourceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeDiagnostic {
    /// Net consumption of a pool exceeded what storage held. Settlement
    /// prevents this on its own, so seeing it points at a logic defect or at
    /// storage that changed underneath the tick.
    ConservationViolation {
        resource: ResourceId,
        changed: Fixed64,
        stored: Fixed64,
    },
    /// Backing storage provided less than the committed withdrawal.
    UnderDelivery {
        resource: ResourceId,
        requested: Fixed64,
        provided: Fixed64,
    },
    /// A point-to-point channel ended the tick with consumer draws not
    /// matching the producer's registered supply. `settled` is the total drawn.
    PointToPointImbalance {
        resource: ResourceId,
        producer: ModuleId,
        registered: Fixed64,
        settled: Fixed64,
    },
    /// Settlement hit the configured pass limit before reaching a fixed point.
    SettlementCapped { passes: u32, unresolved: usize },
}

impl ExchangeDiagnostic {
    /// Log this diagnostic at the level its severity calls for.
    pub fn log(&self) {
        match self {
            Self::ConservationViolation {
                resource,
                changed,
                stored,
            } => tracing::error!(
                %resource,
                changed = fixed64_to_f64(*changed),
                stored = fixed64_to_f64(*stored),
                "used more resource than there is in storage"
            ),
            Self::UnderDelivery {
                resource,
                requested,
                provided,
            } => tracing::error!(
                %resource,
                requested = fixed64_to_f64(*requested),
                provided = fixed64_to_f64(*provided),
                "storage provided less than requested"
            ),
            Self::PointToPointImbalance {
                resource,
                producer,
                registered,
                settled,
            } => tracing::warn!(
                %resource,
                ?producer,
                registered = fixed64_to_f64(*registered),
                settled = fixed64_to_f64(*settled),
                "point-to-point channel out of balance"
            ),
            Self::SettlementCapped { passes, unresolved } => tracing::warn!(
                passes,
                unresolved,
                "settlement stopped at pass limit"
            ),
        }
    }

    pub fn resource(&self) -> Option<ResourceId> {
        match self {
            Self::ConservationViolation { resource, .. }
            | Self::UnderDelivery { resource, .. }
            | Self::PointToPointImbalance { resource, .. } => Some(*resource),
            Self::SettlementCapped { .. } => None,
        }
    }

    /// Signed size of the discrepancy in resource units, if the diagnostic has one.
    pub fn discrepancy(&self) -> Option<Fixed64> {
        match self {
            Self::ConservationViolation {
                changed, stored, ..
            } => Some(changed.saturating_neg() - *stored),
            Self::UnderDelivery {
                requested,
                provided,
                ..
            } => Some(*provided - *requested),
            Self::PointToPointImbalance {
                registered,
                settled,
                ..
            } => Some(*settled - *registered),
            Self::SettlementCapped { .. } => None,
        }
    }
}
