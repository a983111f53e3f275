//! Every loaded vessel's exchange manager, owned in one place.
//!
//! The fleet replaces a process-wide vessel registry: whoever simulates the
//! vessels owns the [`Fleet`] and hands out [`VesselId`]s.

use std::sync::Arc;

use slotmap::SlotMap;

use crate::config::ExchangeConfig;
use crate::exchange::{ExchangeError, ExchangeManager};
use crate::fixed::Seconds;
use crate::id::VesselId;
use crate::module::ModuleDirectory;
use crate::report::SyncReport;
use crate::resource::ResourceLibrary;
use crate::storage::ResourceStorage;

#[derive(Debug)]
pub struct Fleet<S: ResourceStorage> {
    library: Arc<ResourceLibrary>,
    config: ExchangeConfig,
    vessels: SlotMap<VesselId, ExchangeManager<S>>,
}

impl<S: ResourceStorage> Fleet<S> {
    pub fn new(library: Arc<ResourceLibrary>, config: ExchangeConfig) -> Self {
        Self {
            library,
            config,
            vessels: SlotMap::with_key(),
        }
    }

    pub fn library(&self) -> &Arc<ResourceLibrary> {
        &self.library
    }

    /// Load a vessel backed by `storage`. It gets the fleet's library and config.
    pub fn add_vessel(&mut self, storage: S) -> VesselId {
        let manager = ExchangeManager::new(storage, Arc::clone(&self.library), self.config.clone());
        self.vessels.insert(manager)
    }

    /// Unload a vessel, returning its manager (and with it, its storage).
    pub fn remove_vessel(&mut self, vessel: VesselId) -> Option<ExchangeManager<S>> {
        self.vessels.remove(vessel)
    }

    pub fn manager(&self, vessel: VesselId) -> Option<&ExchangeManager<S>> {
        self.vessels.get(vessel)
    }

    pub fn manager_mut(&mut self, vessel: VesselId) -> Option<&mut ExchangeManager<S>> {
        self.vessels.get_mut(vessel)
    }

    pub fn len(&self) -> usize {
        self.vessels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vessels.is_empty()
    }

    pub fn vessels(&self) -> impl Iterator<Item = (VesselId, &ExchangeManager<S>)> {
        self.vessels.iter()
    }

    /// Notify every vessel that settled and committed, in vessel order.
    fn notify_all(
        &mut self,
        settled: Vec<(VesselId, Result<(), ExchangeError>)>,
        modules: &mut dyn ModuleDirectory,
    ) -> Vec<(VesselId, SyncReport)> {
        let mut reports = Vec::with_capacity(settled.len());
        for (vessel, result) in settled {
            let Some(manager) = self.vessels.get_mut(vessel) else {
                continue;
            };
            let notified = match result {
                Ok(()) => manager.notify(modules),
                Err(error) => Err(error),
            };
            match notified {
                Ok(report) => reports.push((vessel, report)),
                Err(error) => tracing::warn!(?vessel, %error, "vessel skipped this tick"),
            }
        }
        reports
    }
}

#[cfg(not(feature = "parallel"))]
impl<S: ResourceStorage> Fleet<S> {
    /// Run one tick on every vessel. Vessels whose manager is mid-tick are
    /// skipped with a warning.
    pub fn synchronize_all(&mut self, dt: Seconds, modules: &mut dyn ModuleDirectory) -> Vec<(VesselId, SyncReport)> {
        let settled: Vec<_> = self
            .vessels
            .iter_mut()
            .map(|(vessel, manager)| (vessel, manager.settle_and_commit(dt)))
            .collect();
        self.notify_all(settled, modules)
    }
}

#[cfg(feature = "parallel")]
impl<S: ResourceStorage + Send> Fleet<S> {
    /// Run one tick on every vessel. Settlement and commit run in parallel
    /// across vessels; notification stays sequential.
    pub fn synchronize_all(&mut self, dt: Seconds, modules: &mut dyn ModuleDirectory) -> Vec<(VesselId, SyncReport)> {
        use rayon::prelude::*;

        let mut managers: Vec<(VesselId, &mut ExchangeManager<S>)> = self.vessels.iter_mut().collect();
        let settled: Vec<_> = managers
            .par_iter_mut()
            .map(|(vessel, manager)| (*vessel, manager.settle_and_commit(dt)))
            .collect();
        self.notify_all(settled, modules)
    }
}
