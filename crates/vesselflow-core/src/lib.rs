//! Vesselflow Core -- per-tick resource exchange for simulated vessels.
//!
//! Components on a vessel (reactors, generators, engines, radiators, labs)
//! describe what they want to do this tick as conversion processes: consume
//! these resources, produce those. The exchange settles all processes against
//! the vessel's storage at once so that nothing is created from nothing and
//! contended supply is shared proportionally.
//!
//! # Tick Pipeline
//!
//! Each call to [`exchange::ExchangeManager::synchronize`] runs:
//!
//! 1. **Collect** -- Components submit processes, open point-to-point
//!    channels and register radiators.
//! 2. **Settle** -- The fixed-point loop in [`settle`] resolves every
//!    process against its snapshots.
//! 3. **Commit** -- Each snapshot writes its net change to storage once.
//!    Waste heat is integrated over sub-ticks.
//! 4. **Notify** -- Owners receive their processes with the resolved
//!    fraction. Per-resource summaries are recorded.
//!
//! # Key Types
//!
//! - [`resource::ResourceLibrary`] -- Immutable catalogue of resource kinds
//!   and display units (frozen at startup).
//! - [`process::ConversionProcess`] -- Inputs, outputs and the remaining
//!   fraction for one component's tick.
//! - [`snapshot::Snapshot`] -- Pool, thermal and point-to-point views of a
//!   resource during a tick.
//! - [`storage::ResourceStorage`] -- Seam to the host's tanks.
//! - [`exchange::ExchangeManager`] -- One vessel's exchange.
//! - [`fleet::Fleet`] -- Every loaded vessel's manager.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod config;
pub mod diagnostic;
pub mod exchange;
pub mod fixed;
pub mod fleet;
pub mod id;
pub mod module;
pub mod process;
pub mod report;
pub mod resource;
pub mod settle;
pub mod snapshot;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
