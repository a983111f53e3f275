//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::sync::Arc;

use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::id::{ModuleId, ResourceId};
use crate::module::{ModuleSet, Radiator, SyncResourceModule};
use crate::process::ConversionProcess;
use crate::resource::{DisplayUnit, ResourceKind, ResourceLibrary};
use crate::storage::TankStorage;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    f64_to_fixed64(v)
}

// ===========================================================================
// Resource library
// ===========================================================================

pub const MEGAJOULES: &str = "Megajoules";
pub const WASTE_HEAT: &str = "WasteHeat";
pub const THERMAL_POWER: &str = "ThermalPower";
pub const CHARGED_PARTICLES: &str = "ChargedParticles";
pub const LQD_HYDROGEN: &str = "LqdHydrogen";

/// Megajoules, WasteHeat, ThermalPower, ChargedParticles and LqdHydrogen with
/// ids 0 to 4 in that order.
pub fn standard_library() -> ResourceLibrary {
    let mut builder = ResourceLibrary::builder();
    builder
        .register(MEGAJOULES, ResourceKind::Pooled, DisplayUnit::watts_from_megajoules())
        .register(WASTE_HEAT, ResourceKind::WasteHeat, DisplayUnit::watts_from_megajoules())
        .register(THERMAL_POWER, ResourceKind::Pooled, DisplayUnit::watts_from_megajoules())
        .register(CHARGED_PARTICLES, ResourceKind::Pooled, DisplayUnit::watts_from_megajoules())
        .register(LQD_HYDROGEN, ResourceKind::Pooled, DisplayUnit::units());
    match builder.build() {
        Ok(library) => library,
        Err(e) => panic!("standard library is valid: {e}"),
    }
}

pub fn shared_library() -> Arc<ResourceLibrary> {
    Arc::new(standard_library())
}

pub fn resource(name: &str) -> ResourceId {
    standard_library()
        .id_of(name)
        .unwrap_or_else(|| panic!("{name} is in the standard library"))
}

// ===========================================================================
// Storage
// ===========================================================================

/// One tank per `(name, amount, capacity)` entry, names from the standard library.
pub fn vessel_storage(tanks: &[(&str, f64, f64)]) -> TankStorage {
    tanks
        .iter()
        .fold(TankStorage::new(), |storage, (name, amount, capacity)| {
            storage.with_tank(resource(name), fixed(*amount), fixed(*capacity))
        })
}

// ===========================================================================
// Modules
// ===========================================================================

/// Records every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingModule {
    pub name: String,
    pub received: Vec<Vec<ConversionProcess>>,
}

impl RecordingModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: Vec::new(),
        }
    }

    pub fn ticks(&self) -> usize {
        self.received.len()
    }

    /// Resolved fractions of the processes delivered by the latest notification.
    pub fn last_fractions(&self) -> Vec<Fixed64> {
        self.received
            .last()
            .map(|batch| batch.iter().map(ConversionProcess::resolved_fraction).collect())
            .unwrap_or_default()
    }
}

impl SyncResourceModule for RecordingModule {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn notify(&mut self, processes: &[ConversionProcess]) {
        self.received.push(processes.to_vec());
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub fn recording_module(modules: &mut ModuleSet, name: &str) -> ModuleId {
    modules.insert(Box::new(RecordingModule::new(name)))
}

pub fn recorded(modules: &ModuleSet, id: ModuleId) -> &RecordingModule {
    modules
        .get(id)
        .and_then(|m| m.as_any().downcast_ref::<RecordingModule>())
        .unwrap_or_else(|| panic!("{id:?} is a RecordingModule"))
}

/// Counts notifications without keeping the processes. Used by benchmarks.
#[derive(Debug, Default)]
pub struct CountingModule {
    pub name: String,
    pub notifications: u64,
}

impl SyncResourceModule for CountingModule {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn notify(&mut self, _processes: &[ConversionProcess]) {
        self.notifications += 1;
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

pub fn counting_module(modules: &mut ModuleSet, name: &str) -> ModuleId {
    modules.insert(Box::new(CountingModule {
        name: name.to_string(),
        notifications: 0,
    }))
}

/// Radiator with a constant removal rate.
#[derive(Debug, Clone, Copy)]
pub struct FixedRadiator {
    pub module: ModuleId,
    pub rate: Fixed64,
}

impl FixedRadiator {
    pub fn new(module: ModuleId, rate: Fixed64) -> Self {
        Self { module, rate }
    }
}

impl Radiator for FixedRadiator {
    fn module_id(&self) -> ModuleId {
        self.module
    }

    fn heat_removal_per_second(&self) -> Fixed64 {
        self.rate
    }
}
