//! Per-vessel exchange manager: collects a tick's processes, settles them,
//! commits the snapshots and tells every owner what it actually got.
//!
//! # Tick pipeline
//!
//! 1. **Collecting** -- components call [`ExchangeManager::add_process`] and
//!    the channel/radiator registrations.
//! 2. **Settling** -- [`ExchangeManager::settle`] runs the fixed-point loop.
//! 3. **Committing** -- [`ExchangeManager::commit`] commits every snapshot
//!    exactly once.
//! 4. **Notifying** -- [`ExchangeManager::notify`] hands each owner its
//!    resolved processes, records summaries and clears the tick.
//!
//! [`ExchangeManager::synchronize`] runs steps 2-4. Calling a step out of
//! order returns [`ExchangeError::PhaseOrder`].
//!
//! Entries are bound to snapshots when a process is submitted: to a
//! point-to-point channel when the process's module is that channel's producer
//! or one of its consumers, otherwise to the vessel-wide pool.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ExchangeConfig, Limits};
use crate::diagnostic::ExchangeDiagnostic;
use crate::fixed::{Fixed64, Seconds};
use crate::id::{ModuleId, ResourceId, SnapshotId};
use crate::module::{ModuleDirectory, Radiator};
use crate::process::{ConversionEntry, ConversionProcess, ProcessBuilder, ProcessError};
use crate::report::{Flow, ResourceSummary, SyncReport};
use crate::resource::ResourceLibrary;
use crate::settle::{SettleOutcome, settle};
use crate::snapshot::{PointToPointSnapshot, Snapshot, SnapshotArena};
use crate::storage::ResourceStorage;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangePhase {
    Collecting,
    Settling,
    Committing,
    Notifying,
}

// ---------------------------------------------------------------------------
// Process batches
// ---------------------------------------------------------------------------

/// Processes submitted by one owner this tick, in submission order.
#[derive(Debug, Clone)]
pub struct ProcessBatch {
    pub owner: ModuleId,
    pub processes: Vec<ConversionProcess>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ExchangeManager<S: ResourceStorage> {
    storage: S,
    library: Arc<ResourceLibrary>,
    config: ExchangeConfig,
    limits: Limits,
    arena: SnapshotArena,
    batches: Vec<ProcessBatch>,
    batch_of: HashMap<ModuleId, usize>,
    phase: ExchangePhase,
    tick_passes: u32,
    tick_diagnostics: Vec<ExchangeDiagnostic>,
    summaries: BTreeMap<ResourceId, ResourceSummary>,
}

impl<S: ResourceStorage> ExchangeManager<S> {
    pub fn new(storage: S, library: Arc<ResourceLibrary>, config: ExchangeConfig) -> Self {
        let limits = config.limits();
        Self {
            storage,
            library,
            config,
            limits,
            arena: SnapshotArena::new(),
            batches: Vec::new(),
            batch_of: HashMap::new(),
            phase: ExchangePhase::Collecting,
            tick_passes: 0,
            tick_diagnostics: Vec::new(),
            summaries: BTreeMap::new(),
        }
    }

    pub fn with_default_config(storage: S, library: Arc<ResourceLibrary>) -> Self {
        Self::new(storage, library, ExchangeConfig::default())
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Direct access to backing storage. Changes made mid-tick are picked up
    /// when the affected snapshots commit.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn library(&self) -> &Arc<ResourceLibrary> {
        &self.library
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn snapshots(&self) -> &SnapshotArena {
        &self.arena
    }

    pub fn batches(&self) -> &[ProcessBatch] {
        &self.batches
    }

    pub fn pending_processes(&self) -> usize {
        self.batches.iter().map(|b| b.processes.len()).sum()
    }

    /// Start a process builder against this manager's library.
    pub fn process_builder(&self) -> ProcessBuilder<'_> {
        ConversionProcess::builder(&self.library)
    }

    fn expect_phase(&self, expected: ExchangePhase, operation: &'static str) -> Result<(), ExchangeError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ExchangeError::PhaseOrder {
                operation,
                phase: self.phase,
            })
        }
    }

    // -- collecting -----------------------------------------------------------

    /// Submit `process` on behalf of `owner`, who will be notified after
    /// commit. A process built without a module is attributed to `owner`.
    pub fn add_process(&mut self, owner: ModuleId, mut process: ConversionProcess) -> Result<(), ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "add_process")?;
        let module = match process.module() {
            Some(module) => module,
            None => {
                process.set_module(owner);
                owner
            }
        };
        let inputs = self.bind_entries(module, process.inputs())?;
        let outputs = self.bind_entries(module, process.outputs())?;
        process.bind(inputs, outputs);

        let index = match self.batch_of.get(&owner) {
            Some(index) => *index,
            None => {
                self.batches.push(ProcessBatch {
                    owner,
                    processes: Vec::new(),
                });
                let index = self.batches.len() - 1;
                self.batch_of.insert(owner, index);
                index
            }
        };
        self.batches[index].processes.push(process);
        Ok(())
    }

    fn bind_entries(
        &mut self,
        module: ModuleId,
        entries: &[ConversionEntry],
    ) -> Result<Vec<SnapshotId>, ExchangeError> {
        entries
            .iter()
            .map(|entry| self.bind_entry(module, entry.resource()))
            .collect()
    }

    fn bind_entry(&mut self, module: ModuleId, resource: ResourceId) -> Result<SnapshotId, ExchangeError> {
        if let Some(channel) = self.arena.channel_for(resource, module) {
            return Ok(channel);
        }
        let def = self
            .library
            .get(resource)
            .ok_or(ProcessError::UnknownResourceId(resource))?;
        Ok(self.arena.pool_or_insert(def, &self.storage))
    }

    /// Open a point-to-point channel for `resource` owned by `producer`.
    /// Opening an existing channel again is a no-op.
    pub fn open_channel(&mut self, resource: ResourceId, producer: ModuleId) -> Result<(), ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "open_channel")?;
        if self.library.get(resource).is_none() {
            return Err(ExchangeError::UnknownResource(resource));
        }
        self.arena
            .open_channel(resource, producer)
            .map(|_| ())
            .ok_or(ExchangeError::ChannelConflict {
                resource,
                module: producer,
            })
    }

    pub fn add_channel_consumer(
        &mut self,
        resource: ResourceId,
        producer: ModuleId,
        consumer: ModuleId,
    ) -> Result<(), ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "add_channel_consumer")?;
        if self.arena.channel_id(resource, producer).is_none() {
            return Err(ExchangeError::UnknownChannel { resource, producer });
        }
        if self.arena.add_channel_consumer(resource, producer, consumer) {
            Ok(())
        } else {
            Err(ExchangeError::ChannelConflict {
                resource,
                module: consumer,
            })
        }
    }

    /// Declare the supply `producer` offers on its channel this tick.
    pub fn register_max_production(
        &mut self,
        resource: ResourceId,
        producer: ModuleId,
        amount: Fixed64,
    ) -> Result<(), ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "register_max_production")?;
        self.arena
            .channel_mut(resource, producer)
            .ok_or(ExchangeError::UnknownChannel { resource, producer })?
            .register_max_production(amount);
        Ok(())
    }

    /// Remove a channel. Processes already bound to it this tick stop running.
    pub fn close_channel(&mut self, resource: ResourceId, producer: ModuleId) -> Result<(), ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "close_channel")?;
        if self.arena.close_channel(resource, producer) {
            Ok(())
        } else {
            Err(ExchangeError::UnknownChannel { resource, producer })
        }
    }

    pub fn channel(&self, resource: ResourceId, producer: ModuleId) -> Option<&PointToPointSnapshot> {
        self.arena.channel(resource, producer)
    }

    /// Let `radiator` drain the waste-heat pool during this tick's commit.
    /// Registrations are dropped after every commit.
    pub fn register_radiator(&mut self, radiator: &dyn Radiator) -> Result<(), ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "register_radiator")?;
        let def = self.library.waste_heat().ok_or(ExchangeError::NoWasteHeatResource)?;
        self.arena.pool_or_insert(def, &self.storage);
        if let Some(thermal) = self.arena.thermal_mut(def.id()) {
            thermal.register_radiator(radiator.module_id(), radiator.heat_removal_per_second());
        }
        Ok(())
    }

    // -- settling -------------------------------------------------------------

    /// Run the settlement loop over every submitted process.
    pub fn settle(&mut self) -> Result<SettleOutcome, ExchangeError> {
        self.expect_phase(ExchangePhase::Collecting, "settle")?;
        self.phase = ExchangePhase::Settling;
        self.arena.refresh_pools(&self.storage);

        let processes = self.batches.iter_mut().flat_map(|b| b.processes.iter_mut());
        let outcome = settle(processes, &mut self.arena, &self.limits);
        tracing::debug!(
            passes = outcome.passes,
            processes = self.pending_processes(),
            unresolved = outcome.unresolved,
            "settled"
        );
        if outcome.capped {
            let diagnostic = ExchangeDiagnostic::SettlementCapped {
                passes: outcome.passes,
                unresolved: outcome.unresolved,
            };
            diagnostic.log();
            self.tick_diagnostics.push(diagnostic);
        }

        self.tick_passes = outcome.passes;
        self.phase = ExchangePhase::Committing;
        Ok(outcome)
    }

    // -- committing -----------------------------------------------------------

    /// Commit every snapshot once. `dt` drives thermal sub-tick integration.
    pub fn commit(&mut self, dt: Seconds) -> Result<Vec<ExchangeDiagnostic>, ExchangeError> {
        self.expect_phase(ExchangePhase::Committing, "commit")?;
        let diagnostics = self.arena.commit_all(&mut self.storage, dt, &self.limits);
        self.tick_diagnostics.extend(diagnostics.iter().cloned());
        self.phase = ExchangePhase::Notifying;
        Ok(diagnostics)
    }

    pub(crate) fn settle_and_commit(&mut self, dt: Seconds) -> Result<(), ExchangeError> {
        self.settle()?;
        self.commit(dt)?;
        Ok(())
    }

    // -- notifying ------------------------------------------------------------

    /// Deliver resolved processes to their owners, record summaries and reset
    /// for the next tick.
    pub fn notify(&mut self, modules: &mut dyn ModuleDirectory) -> Result<SyncReport, ExchangeError> {
        self.expect_phase(ExchangePhase::Notifying, "notify")?;
        self.summaries = self.build_summaries(modules);

        for batch in &self.batches {
            match modules.module_mut(batch.owner) {
                Some(module) => module.notify(&batch.processes),
                None => tracing::debug!(owner = ?batch.owner, "owner gone before notification"),
            }
        }

        let report = SyncReport {
            passes: self.tick_passes,
            processes: self.pending_processes(),
            diagnostics: std::mem::take(&mut self.tick_diagnostics),
        };
        self.batches.clear();
        self.batch_of.clear();
        self.tick_passes = 0;
        self.phase = ExchangePhase::Collecting;
        Ok(report)
    }

    /// Settle, commit and notify in one call.
    pub fn synchronize(&mut self, dt: Seconds, modules: &mut dyn ModuleDirectory) -> Result<SyncReport, ExchangeError> {
        self.settle_and_commit(dt)?;
        self.notify(modules)
    }

    fn build_summaries(&self, modules: &dyn ModuleDirectory) -> BTreeMap<ResourceId, ResourceSummary> {
        let mut summaries: BTreeMap<ResourceId, ResourceSummary> = BTreeMap::new();
        for process in self.batches.iter().flat_map(|b| &b.processes) {
            let name = process
                .module()
                .and_then(|m| modules.display_name(m))
                .unwrap_or("unknown");
            let touched: BTreeSet<ResourceId> = process.resources().collect();
            for resource in touched {
                let Some(identity) = self.library.identity(resource) else {
                    continue;
                };
                let summary = summaries.entry(resource).or_insert_with(|| {
                    let (stored, capacity) = self
                        .arena
                        .pool(resource)
                        .map_or((Fixed64::ZERO, Fixed64::ZERO), |s| (s.stored_amount(), s.max_amount()));
                    ResourceSummary::new(identity.clone(), stored, capacity)
                });

                let max = process.max_production_per_second(resource);
                if max > Fixed64::ZERO {
                    summaries_add(&mut summary.producers, name, Flow {
                        current: process.production_per_second(resource),
                        max,
                    });
                }
                let max = process.max_consumption_per_second(resource);
                if max > Fixed64::ZERO {
                    summaries_add(&mut summary.consumers, name, Flow {
                        current: process.consumption_per_second(resource),
                        max,
                    });
                }
            }
        }
        summaries
    }

    // -- inspection -----------------------------------------------------------

    /// Vessel-wide snapshot of `resource`, if any process or radiator touched it.
    pub fn snapshot(&self, resource: ResourceId) -> Option<&Snapshot> {
        self.arena.pool(resource)
    }

    /// Fill fraction of the vessel-wide pool of `resource`.
    pub fn storage_ratio(&self, resource: ResourceId) -> Option<Fixed64> {
        self.snapshot(resource).map(Snapshot::storage_ratio)
    }

    /// Summary recorded at the last notification.
    pub fn summary(&self, resource: ResourceId) -> Option<&ResourceSummary> {
        self.summaries.get(&resource)
    }

    pub fn summaries(&self) -> &BTreeMap<ResourceId, ResourceSummary> {
        &self.summaries
    }
}

fn summaries_add(flows: &mut BTreeMap<String, Flow>, name: &str, flow: Flow) {
    flows.entry(name.to_string()).or_default().add(flow);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExchangeError {
    #[error("{operation} is not allowed during the {phase:?} phase")]
    PhaseOrder {
        operation: &'static str,
        phase: ExchangePhase,
    },
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("unknown resource id: {0}")]
    UnknownResource(ResourceId),
    #[error("no channel for resource {resource} owned by {producer:?}")]
    UnknownChannel { resource: ResourceId, producer: ModuleId },
    #[error("module {module:?} already belongs to another channel for resource {resource}")]
    ChannelConflict { resource: ResourceId, module: ModuleId },
    #[error("the resource library has no waste-heat resource")]
    NoWasteHeatResource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleSet;
    use crate::storage::TankStorage;
    use crate::test_utils::*;

    fn manager(storage: TankStorage) -> ExchangeManager<TankStorage> {
        ExchangeManager::with_default_config(storage, shared_library())
    }

    fn id(name: &str) -> ResourceId {
        standard_library().id_of(name).unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: Phase order is enforced
    // -----------------------------------------------------------------------
    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut mgr = manager(TankStorage::new());
        let mut modules = ModuleSet::with_key();

        assert!(matches!(
            mgr.commit(fixed(1.0)),
            Err(ExchangeError::PhaseOrder { operation: "commit", .. })
        ));
        assert!(matches!(mgr.notify(&mut modules), Err(ExchangeError::PhaseOrder { .. })));

        mgr.settle().unwrap();
        assert_eq!(mgr.phase(), ExchangePhase::Committing);
        let owner = recording_module(&mut modules, "Late");
        let process = mgr.process_builder().add_input("Megajoules", 1.0).build().unwrap();
        assert!(matches!(
            mgr.add_process(owner, process),
            Err(ExchangeError::PhaseOrder {
                phase: ExchangePhase::Committing,
                ..
            })
        ));
        assert!(mgr.settle().is_err());

        mgr.commit(fixed(1.0)).unwrap();
        assert_eq!(mgr.phase(), ExchangePhase::Notifying);
        mgr.notify(&mut modules).unwrap();
        assert_eq!(mgr.phase(), ExchangePhase::Collecting);
    }

    // -----------------------------------------------------------------------
    // Test 2: Full tick moves storage and notifies owners
    // -----------------------------------------------------------------------
    #[test]
    fn synchronize_commits_and_notifies() {
        let storage = TankStorage::new()
            .with_tank(id("Megajoules"), fixed(0.0), fixed(100.0))
            .with_tank(id("LqdHydrogen"), fixed(50.0), fixed(50.0));
        let mut mgr = manager(storage);
        let mut modules = ModuleSet::with_key();
        let generator = recording_module(&mut modules, "Generator");

        let process = mgr
            .process_builder()
            .add_input("LqdHydrogen", 10.0)
            .add_output("Megajoules", 40.0)
            .build()
            .unwrap();
        mgr.add_process(generator, process).unwrap();
        assert_eq!(mgr.pending_processes(), 1);

        let report = mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.processes, 1);
        assert_eq!(mgr.storage().totals(id("Megajoules")).amount, fixed(40.0));
        assert_eq!(mgr.storage().totals(id("LqdHydrogen")).amount, fixed(40.0));
        assert_eq!(mgr.pending_processes(), 0);

        let received = recorded(&modules, generator);
        assert_eq!(received.ticks(), 1);
        assert_eq!(received.last_fractions(), vec![Fixed64::ONE]);
    }

    // -----------------------------------------------------------------------
    // Test 3: Contention through the manager
    // -----------------------------------------------------------------------
    #[test]
    fn two_consumers_split_scarce_pool() {
        let storage = TankStorage::new().with_tank(id("Megajoules"), fixed(30.0), fixed(100.0));
        let mut mgr = manager(storage);
        let mut modules = ModuleSet::with_key();
        let a = recording_module(&mut modules, "Drill");
        let b = recording_module(&mut modules, "Lab");
        for owner in [a, b] {
            let p = mgr.process_builder().add_input("Megajoules", 30.0).build().unwrap();
            mgr.add_process(owner, p).unwrap();
        }
        mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        assert_eq!(recorded(&modules, a).last_fractions(), vec![fixed(0.5)]);
        assert_eq!(recorded(&modules, b).last_fractions(), vec![fixed(0.5)]);
        assert_eq!(mgr.storage().totals(id("Megajoules")).amount, Fixed64::ZERO);
    }

    // -----------------------------------------------------------------------
    // Test 4: Point-to-point channel, exact split
    // -----------------------------------------------------------------------
    #[test]
    fn point_to_point_exact_delivery() {
        let mut mgr = manager(TankStorage::new());
        let mut modules = ModuleSet::with_key();
        let reactor = recording_module(&mut modules, "Reactor");
        let first = recording_module(&mut modules, "Generator A");
        let second = recording_module(&mut modules, "Generator B");
        let thermal = id("ThermalPower");

        mgr.open_channel(thermal, reactor).unwrap();
        mgr.add_channel_consumer(thermal, reactor, first).unwrap();
        mgr.add_channel_consumer(thermal, reactor, second).unwrap();
        mgr.register_max_production(thermal, reactor, fixed(100.0)).unwrap();

        let supply = mgr.process_builder().add_virtual_output("ThermalPower", 100.0).build().unwrap();
        mgr.add_process(reactor, supply).unwrap();
        for (owner, amount) in [(first, 60.0), (second, 40.0)] {
            let draw = mgr.process_builder().add_input("ThermalPower", amount).build().unwrap();
            mgr.add_process(owner, draw).unwrap();
        }

        mgr.settle().unwrap();
        let channel = mgr.channel(thermal, reactor).unwrap();
        assert_eq!(channel.current_amount(), fixed(100.0));
        assert_eq!(channel.max_amount(), fixed(100.0));

        let diagnostics = mgr.commit(fixed(1.0)).unwrap();
        assert!(diagnostics.is_empty());
        mgr.notify(&mut modules).unwrap();
        assert_eq!(recorded(&modules, first).last_fractions(), vec![Fixed64::ONE]);
        assert_eq!(recorded(&modules, second).last_fractions(), vec![Fixed64::ONE]);
        assert_eq!(recorded(&modules, reactor).last_fractions(), vec![Fixed64::ONE]);
        // Never touches vessel storage.
        assert!(mgr.snapshot(thermal).is_none());
    }

    #[test]
    fn point_to_point_full_draw_needs_no_producer_process() {
        let mut mgr = manager(TankStorage::new());
        let mut modules = ModuleSet::with_key();
        let reactor = recording_module(&mut modules, "Reactor");
        let first = recording_module(&mut modules, "Generator A");
        let second = recording_module(&mut modules, "Generator B");
        let thermal = id("ThermalPower");
        mgr.open_channel(thermal, reactor).unwrap();
        mgr.add_channel_consumer(thermal, reactor, first).unwrap();
        mgr.add_channel_consumer(thermal, reactor, second).unwrap();
        mgr.register_max_production(thermal, reactor, fixed(100.0)).unwrap();
        for (owner, amount) in [(first, 60.0), (second, 40.0)] {
            let draw = mgr.process_builder().add_input("ThermalPower", amount).build().unwrap();
            mgr.add_process(owner, draw).unwrap();
        }

        let report = mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        assert!(report.is_clean(), "{:?}", report.diagnostics);
        assert_eq!(recorded(&modules, first).last_fractions(), vec![Fixed64::ONE]);
        assert_eq!(recorded(&modules, second).last_fractions(), vec![Fixed64::ONE]);
    }

    #[test]
    fn point_to_point_leftover_supply_is_reported() {
        let mut mgr = manager(TankStorage::new());
        let mut modules = ModuleSet::with_key();
        let reactor = recording_module(&mut modules, "Reactor");
        let consumer = recording_module(&mut modules, "Generator");
        let thermal = id("ThermalPower");
        mgr.open_channel(thermal, reactor).unwrap();
        mgr.add_channel_consumer(thermal, reactor, consumer).unwrap();
        mgr.register_max_production(thermal, reactor, fixed(100.0)).unwrap();
        let supply = mgr.process_builder().add_virtual_output("ThermalPower", 100.0).build().unwrap();
        mgr.add_process(reactor, supply).unwrap();
        let draw = mgr.process_builder().add_input("ThermalPower", 60.0).build().unwrap();
        mgr.add_process(consumer, draw).unwrap();

        let report = mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        // The reactor throttles to the draw, but the unused 40 still warns.
        let reactor_fraction = recorded(&modules, reactor).last_fractions()[0];
        assert!((reactor_fraction - fixed(0.6)).abs() < fixed(1e-6));
        assert_eq!(
            report.diagnostics,
            vec![ExchangeDiagnostic::PointToPointImbalance {
                resource: thermal,
                producer: reactor,
                registered: fixed(100.0),
                settled: fixed(60.0),
            }]
        );
        // Channel membership persists, amounts reset.
        let channel = mgr.channel(thermal, reactor).unwrap();
        assert!(channel.for_module(consumer));
        assert_eq!(channel.max_amount(), Fixed64::ZERO);
    }

    #[test]
    fn channel_errors() {
        let mut mgr = manager(TankStorage::new());
        let mut modules = ModuleSet::with_key();
        let a = recording_module(&mut modules, "A");
        let b = recording_module(&mut modules, "B");
        let c = recording_module(&mut modules, "C");
        let thermal = id("ThermalPower");

        assert!(matches!(
            mgr.add_channel_consumer(thermal, a, b),
            Err(ExchangeError::UnknownChannel { .. })
        ));
        assert!(matches!(
            mgr.register_max_production(thermal, a, fixed(1.0)),
            Err(ExchangeError::UnknownChannel { .. })
        ));
        assert!(matches!(
            mgr.open_channel(ResourceId(4242), a),
            Err(ExchangeError::UnknownResource(_))
        ));

        mgr.open_channel(thermal, a).unwrap();
        mgr.open_channel(thermal, c).unwrap();
        mgr.add_channel_consumer(thermal, a, b).unwrap();
        assert!(matches!(
            mgr.add_channel_consumer(thermal, c, b),
            Err(ExchangeError::ChannelConflict { .. })
        ));
        mgr.close_channel(thermal, a).unwrap();
        assert!(mgr.close_channel(thermal, a).is_err());
        mgr.add_channel_consumer(thermal, c, b).unwrap();
    }

    // -----------------------------------------------------------------------
    // Test 5: Radiators drain waste heat and must re-register
    // -----------------------------------------------------------------------
    #[test]
    fn radiators_register_per_tick() {
        let heat = id("WasteHeat");
        let storage = TankStorage::new().with_tank(heat, fixed(100.0), fixed(1000.0));
        let mut mgr = manager(storage);
        let mut modules = ModuleSet::with_key();
        let radiator_module = recording_module(&mut modules, "Radiator");
        let radiator = FixedRadiator::new(radiator_module, fixed(40.0));

        mgr.register_radiator(&radiator).unwrap();
        mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        assert_eq!(mgr.storage().totals(heat).amount, fixed(60.0));

        // Not registered again: nothing is removed.
        mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        assert_eq!(mgr.storage().totals(heat).amount, fixed(60.0));
    }

    #[test]
    fn waste_heat_output_is_never_throttled() {
        let heat = id("WasteHeat");
        let mj = id("Megajoules");
        let storage = TankStorage::new()
            .with_tank(heat, fixed(1000.0), fixed(1000.0))
            .with_tank(mj, fixed(100.0), fixed(100.0));
        let mut mgr = manager(storage);
        let mut modules = ModuleSet::with_key();
        let owner = recording_module(&mut modules, "Laser");
        let process = mgr
            .process_builder()
            .add_input("Megajoules", 10.0)
            .add_output("WasteHeat", 10.0)
            .build()
            .unwrap();
        mgr.add_process(owner, process).unwrap();
        mgr.synchronize(fixed(1.0), &mut modules).unwrap();
        assert_eq!(recorded(&modules, owner).last_fractions(), vec![Fixed64::ONE]);
        assert_eq!(mgr.storage().totals(mj).amount, fixed(90.0));
    }

    // -----------------------------------------------------------------------
    // Test 6: Summaries grouped by display name
    // -----------------------------------------------------------------------
    #[test]
    fn summaries_group_by_display_name() {
        let mj = id("Megajoules");
        let storage = TankStorage::new().with_tank(mj, fixed(0.0), fixed(1000.0));
        let mut mgr = manager(storage);
        let mut modules = ModuleSet::with_key();
        let panel_a = recording_module(&mut modules, "Solar Panel");
        let panel_b = recording_module(&mut modules, "Solar Panel");
        let drill = recording_module(&mut modules, "Drill");
        for panel in [panel_a, panel_b] {
            let p = mgr
                .process_builder()
                .delta_time(fixed(0.5))
                .add_output_per_second("Megajoules", 10.0)
                .build()
                .unwrap();
            mgr.add_process(panel, p).unwrap();
        }
        let d = mgr
            .process_builder()
            .delta_time(fixed(0.5))
            .add_input_per_second("Megajoules", 4.0)
            .build()
            .unwrap();
        mgr.add_process(drill, d).unwrap();
        mgr.synchronize(fixed(0.5), &mut modules).unwrap();

        let summary = mgr.summary(mj).unwrap();
        assert_eq!(summary.producers.len(), 1);
        assert_eq!(
            summary.producers["Solar Panel"],
            Flow {
                current: fixed(20.0),
                max: fixed(20.0)
            }
        );
        assert_eq!(summary.consumers["Drill"].current, fixed(4.0));
        assert_eq!(summary.stored, fixed(8.0));
        assert_eq!(summary.distribution(), Fixed64::ONE);
        assert_eq!(mgr.storage_ratio(mj), Some(fixed(8.0) / fixed(1000.0)));
    }

    #[test]
    fn unknown_resource_id_in_entry_is_rejected_at_submission() {
        let mut mgr = manager(TankStorage::new());
        let mut modules = ModuleSet::with_key();
        let owner = recording_module(&mut modules, "Broken");
        let process = ConversionProcess::from_entries(
            None,
            Fixed64::ONE,
            vec![ConversionEntry::new(ResourceId(777), fixed(1.0))],
            Vec::new(),
        );
        assert_eq!(
            mgr.add_process(owner, process),
            Err(ExchangeError::Process(ProcessError::UnknownResourceId(ResourceId(777))))
        );
        assert_eq!(mgr.pending_processes(), 0);
    }
}
