//! Backing storage: the persistent, vessel-wide home of every pooled resource.
//!
//! Snapshots never touch storage while a tick settles. They read
//! [`ResourceStorage::totals`] when created and again at commit, then push one
//! signed [`ResourceStorage::transfer`] per resource.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::ResourceId;

/// Summed amount and capacity of one resource across a vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageTotals {
    pub amount: Fixed64,
    pub capacity: Fixed64,
}

/// The backing storage collaborator.
pub trait ResourceStorage {
    /// Current total amount and capacity of `resource`.
    fn totals(&self, resource: ResourceId) -> StorageTotals;

    /// Move `delta` into (positive) or out of (negative) storage. Returns the
    /// amount actually moved with the same sign convention; the magnitude may
    /// be smaller than requested when tanks run dry or fill up.
    fn transfer(&mut self, resource: ResourceId, delta: Fixed64) -> Fixed64;
}

// ---------------------------------------------------------------------------
// Tank storage
// ---------------------------------------------------------------------------

/// A single tank holding one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tank {
    pub resource: ResourceId,
    /// Current contents. Clamped to [0, capacity].
    pub amount: Fixed64,
    pub capacity: Fixed64,
    /// Disabled tanks are invisible to totals and transfers.
    pub flow_enabled: bool,
}

impl Tank {
    pub fn new(resource: ResourceId, amount: Fixed64, capacity: Fixed64) -> Self {
        Self {
            resource,
            amount: amount.clamp(Fixed64::ZERO, capacity.max(Fixed64::ZERO)),
            capacity: capacity.max(Fixed64::ZERO),
            flow_enabled: true,
        }
    }

    pub fn headroom(&self) -> Fixed64 {
        self.capacity - self.amount
    }
}

/// Identifies a tank inside a [`TankStorage`]. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TankId(pub u32);

/// Vessel storage made of ordered tanks.
///
/// Deposits fill tanks in order up to their headroom and withdrawals drain them
/// in order down to zero. Any part of a deposit that does not fit is discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TankStorage {
    tanks: Vec<Tank>,
}

impl TankStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tank(&mut self, tank: Tank) -> TankId {
        let id = TankId(self.tanks.len() as u32);
        self.tanks.push(tank);
        id
    }

    /// Builder-style variant of [`TankStorage::add_tank`].
    pub fn with_tank(mut self, resource: ResourceId, amount: Fixed64, capacity: Fixed64) -> Self {
        self.add_tank(Tank::new(resource, amount, capacity));
        self
    }

    pub fn tank(&self, id: TankId) -> Option<&Tank> {
        self.tanks.get(id.0 as usize)
    }

    pub fn tank_mut(&mut self, id: TankId) -> Option<&mut Tank> {
        self.tanks.get_mut(id.0 as usize)
    }

    pub fn set_flow_enabled(&mut self, id: TankId, enabled: bool) {
        if let Some(tank) = self.tank_mut(id) {
            tank.flow_enabled = enabled;
        }
    }

    pub fn tanks(&self) -> &[Tank] {
        &self.tanks
    }

    fn flowing_mut(&mut self, resource: ResourceId) -> impl Iterator<Item = &mut Tank> {
        self.tanks
            .iter_mut()
            .filter(move |t| t.flow_enabled && t.resource == resource)
    }
}

impl ResourceStorage for TankStorage {
    fn totals(&self, resource: ResourceId) -> StorageTotals {
        self.tanks
            .iter()
            .filter(|t| t.flow_enabled && t.resource == resource)
            .fold(StorageTotals::default(), |acc, t| StorageTotals {
                amount: acc.amount.saturating_add(t.amount),
                capacity: acc.capacity.saturating_add(t.capacity),
            })
    }

    fn transfer(&mut self, resource: ResourceId, delta: Fixed64) -> Fixed64 {
        if delta > Fixed64::ZERO {
            let mut remaining = delta;
            for tank in self.flowing_mut(resource) {
                if remaining <= Fixed64::ZERO {
                    break;
                }
                let moved = remaining.min(tank.headroom());
                tank.amount += moved;
                remaining -= moved;
            }
            delta - remaining
        } else if delta < Fixed64::ZERO {
            let mut remaining = -delta;
            for tank in self.flowing_mut(resource) {
                if remaining <= Fixed64::ZERO {
                    break;
                }
                let moved = remaining.min(tank.amount);
                tank.amount -= moved;
                remaining -= moved;
            }
            delta + remaining
        } else {
            Fixed64::ZERO
        }
    }
}
