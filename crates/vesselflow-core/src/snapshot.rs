//! Buffered per-tick views of shared quantities.
//!
//! A snapshot records what storage held when it was read plus a signed
//! accumulator of everything produced and consumed since. Storage only sees the
//! net delta when the snapshot commits.
//!
//! # Design
//!
//! - Three variants behind one enum (no trait objects): [`PoolSnapshot`] for
//!   vessel-wide pools, [`ThermalSnapshot`] for waste heat, and
//!   [`PointToPointSnapshot`] for private producer/consumer channels.
//! - All snapshots of a vessel live in a [`SnapshotArena`]. Processes hold
//!   [`SnapshotId`]s, never references.
//! - Channel membership is an explicit table (resource, module) -> snapshot,
//!   filled when channels are opened and consumers added.

use std::collections::{BTreeMap, BTreeSet};

use slotmap::SlotMap;

use crate::config::{Limits, MAX_THERMAL_SUB_TICKS};
use crate::diagnostic::ExchangeDiagnostic;
use crate::fixed::{Fixed64, Seconds, checked_div_64};
use crate::id::{ModuleId, ResourceId, SnapshotId};
use crate::resource::{ResourceDef, ResourceKind};
use crate::storage::{ResourceStorage, StorageTotals};

// ---------------------------------------------------------------------------
// Pool snapshot
// ---------------------------------------------------------------------------

/// One resource's vessel-wide state for the duration of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    resource: ResourceId,
    stored: Fixed64,
    max: Fixed64,
    /// Positive = net produced, negative = net consumed, not yet in storage.
    changed: Fixed64,
}

impl PoolSnapshot {
    pub fn new(resource: ResourceId, totals: StorageTotals) -> Self {
        Self {
            resource,
            stored: totals.amount,
            max: totals.capacity,
            changed: Fixed64::ZERO,
        }
    }

    pub fn read<S: ResourceStorage + ?Sized>(resource: ResourceId, storage: &S) -> Self {
        Self::new(resource, storage.totals(resource))
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn stored_amount(&self) -> Fixed64 {
        self.stored
    }

    pub fn max_amount(&self) -> Fixed64 {
        self.max
    }

    pub fn changed_amount(&self) -> Fixed64 {
        self.changed
    }

    pub fn current_amount(&self) -> Fixed64 {
        self.stored.saturating_add(self.changed)
    }

    pub fn storage_left(&self) -> Fixed64 {
        self.max.saturating_sub(self.current_amount())
    }

    /// Producer refill. Only bounds the producer's virtual output.
    pub fn produce(&mut self, amount: Fixed64) {
        self.changed = self.changed.saturating_add(amount);
    }

    pub fn consume(&mut self, amount: Fixed64) {
        self.changed = self.changed.saturating_sub(amount);
    }

    /// Fill fraction in [0, 1]. Empty-capacity pools report zero.
    pub fn storage_ratio(&self) -> Fixed64 {
        if self.max <= Fixed64::ZERO {
            return Fixed64::ZERO;
        }
        checked_div_64(self.current_amount(), self.max)
            .unwrap_or(Fixed64::ZERO)
            .clamp(Fixed64::ZERO, Fixed64::ONE)
    }

    /// Re-read storage totals. Only meaningful while nothing is accumulated.
    pub fn refresh<S: ResourceStorage + ?Sized>(&mut self, storage: &S) {
        let totals = storage.totals(self.resource);
        self.stored = totals.amount;
        self.max = totals.capacity;
    }

    /// Push the net delta to storage as one signed transfer and reset.
    ///
    /// Committing twice in a row is a no-op the second time.
    pub fn commit<S: ResourceStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        limits: &Limits,
    ) -> Vec<ExchangeDiagnostic> {
        let mut diagnostics = Vec::new();
        self.refresh(storage);

        let changed = self.changed;
        if changed < Fixed64::ZERO && changed.saturating_neg() - self.stored > limits.tolerance {
            diagnostics.push(ExchangeDiagnostic::ConservationViolation {
                resource: self.resource,
                changed,
                stored: self.stored,
            });
        }

        if changed != Fixed64::ZERO {
            let provided = storage.transfer(self.resource, changed);
            if changed < Fixed64::ZERO && (provided - changed).abs() > limits.tolerance {
                diagnostics.push(ExchangeDiagnostic::UnderDelivery {
                    resource: self.resource,
                    requested: changed,
                    provided,
                });
            }
        }

        self.changed = Fixed64::ZERO;
        self.refresh(storage);
        for diagnostic in &diagnostics {
            diagnostic.log();
        }
        diagnostics
    }
}

// ---------------------------------------------------------------------------
// Thermal snapshot
// ---------------------------------------------------------------------------

/// A radiator registered for the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadiatorRegistration {
    pub module: ModuleId,
    pub rate_per_second: Fixed64,
}

/// What the last sub-tick integration did. Kept for telemetry and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThermalIntegration {
    pub sub_ticks: u32,
    pub warp_tick: Seconds,
    pub generated: Fixed64,
    pub removed: Fixed64,
    /// Largest net change of the pool within a single sub-tick.
    pub max_step_change: Fixed64,
}

/// Waste-heat pool. Never throttles producers; radiators drain it across
/// synthetic sub-ticks at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThermalSnapshot {
    pool: PoolSnapshot,
    radiators: Vec<RadiatorRegistration>,
    already_generated: Fixed64,
    already_consumed: Fixed64,
    last: Option<ThermalIntegration>,
}

impl ThermalSnapshot {
    pub fn new(pool: PoolSnapshot) -> Self {
        Self {
            pool,
            radiators: Vec::new(),
            already_generated: Fixed64::ZERO,
            already_consumed: Fixed64::ZERO,
            last: None,
        }
    }

    pub fn pool(&self) -> &PoolSnapshot {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut PoolSnapshot {
        &mut self.pool
    }

    /// Waste heat is never rationed.
    pub fn storage_left(&self) -> Fixed64 {
        Fixed64::MAX
    }

    pub fn register_radiator(&mut self, module: ModuleId, rate_per_second: Fixed64) {
        self.radiators.push(RadiatorRegistration {
            module,
            rate_per_second: rate_per_second.max(Fixed64::ZERO),
        });
    }

    pub fn radiators(&self) -> &[RadiatorRegistration] {
        &self.radiators
    }

    pub fn already_generated(&self) -> Fixed64 {
        self.already_generated
    }

    pub fn already_consumed(&self) -> Fixed64 {
        self.already_consumed
    }

    pub fn last_integration(&self) -> Option<&ThermalIntegration> {
        self.last.as_ref()
    }

    /// Number of sub-ticks needed so that no sub-tick changes the pool by more
    /// than `step_fraction` of its capacity.
    pub fn sub_tick_count(&self, limits: &Limits) -> u32 {
        let step_cap = self
            .pool
            .max_amount()
            .saturating_mul(limits.thermal_step_fraction);
        if step_cap <= Fixed64::ZERO {
            return 1;
        }
        let steps = checked_div_64(self.pool.changed_amount().abs(), step_cap)
            .and_then(|q| q.checked_ceil())
            .unwrap_or(Fixed64::MAX);
        let cap = limits.thermal_max_sub_ticks.clamp(1, MAX_THERMAL_SUB_TICKS);
        steps.saturating_to_num::<u32>().clamp(1, cap)
    }

    /// Spread the tick's accumulated heat over sub-ticks, letting every
    /// registered radiator drain its share each step. Replaces the pending
    /// delta with generated minus removed heat.
    pub fn integrate(&mut self, dt: Seconds, limits: &Limits) -> ThermalIntegration {
        let n = self.sub_tick_count(limits);
        let steps = Fixed64::from_num(n);
        let total = self.pool.changed_amount();
        let per_step = checked_div_64(total, steps).unwrap_or(total);
        let warp_tick = checked_div_64(dt, steps).unwrap_or(dt);
        let removal_rate = self
            .radiators
            .iter()
            .fold(Fixed64::ZERO, |acc, r| acc.saturating_add(r.rate_per_second));
        let stored = self.pool.stored_amount();

        self.already_generated = Fixed64::ZERO;
        self.already_consumed = Fixed64::ZERO;
        let mut max_step_change = Fixed64::ZERO;

        for step in 0..n {
            // The last step absorbs the rounding remainder so the total is exact.
            let generated = if step + 1 == n {
                total - self.already_generated
            } else {
                per_step
            };
            self.already_generated += generated;

            let available = (stored + self.already_generated - self.already_consumed).max(Fixed64::ZERO);
            let removed = warp_tick.saturating_mul(removal_rate).min(available);
            self.already_consumed += removed;

            max_step_change = max_step_change.max((generated - removed).abs());
        }

        self.pool.changed = self.already_generated - self.already_consumed;
        let integration = ThermalIntegration {
            sub_ticks: n,
            warp_tick,
            generated: self.already_generated,
            removed: self.already_consumed,
            max_step_change,
        };
        tracing::trace!(
            resource = %self.pool.resource(),
            sub_ticks = n,
            radiators = self.radiators.len(),
            "thermal sub-tick integration"
        );
        self.last = Some(integration);
        integration
    }

    /// Integrate, run the base commit, then drop radiator registrations.
    pub fn commit<S: ResourceStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        dt: Seconds,
        limits: &Limits,
    ) -> Vec<ExchangeDiagnostic> {
        self.integrate(dt, limits);
        let diagnostics = self.pool.commit(storage, limits);
        self.radiators.clear();
        self.already_generated = Fixed64::ZERO;
        self.already_consumed = Fixed64::ZERO;
        diagnostics
    }
}

// ---------------------------------------------------------------------------
// Point-to-point snapshot
// ---------------------------------------------------------------------------

/// A private channel from one producer to its registered consumers.
///
/// Never touches vessel storage. Supply exists only after the producer calls
/// [`PointToPointSnapshot::register_max_production`] and is reset at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointToPointSnapshot {
    resource: ResourceId,
    producer: ModuleId,
    consumers: BTreeSet<ModuleId>,
    stored: Fixed64,
    max: Fixed64,
    changed: Fixed64,
    drawn: Fixed64,
}

impl PointToPointSnapshot {
    pub fn new(resource: ResourceId, producer: ModuleId) -> Self {
        Self {
            resource,
            producer,
            consumers: BTreeSet::new(),
            stored: Fixed64::ZERO,
            max: Fixed64::ZERO,
            changed: Fixed64::ZERO,
            drawn: Fixed64::ZERO,
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn producer(&self) -> ModuleId {
        self.producer
    }

    pub fn consumers(&self) -> impl Iterator<Item = ModuleId> + '_ {
        self.consumers.iter().copied()
    }

    pub fn add_consumer(&mut self, consumer: ModuleId) {
        self.consumers.insert(consumer);
    }

    pub fn remove_consumer(&mut self, consumer: ModuleId) {
        self.consumers.remove(&consumer);
    }

    /// Whether `module` is this channel's producer or one of its consumers.
    pub fn for_module(&self, module: ModuleId) -> bool {
        self.producer == module || self.consumers.contains(&module)
    }

    /// Declare this tick's available supply.
    pub fn register_max_production(&mut self, amount: Fixed64) {
        let amount = amount.max(Fixed64::ZERO);
        self.stored = amount;
        self.max = amount;
    }

    pub fn stored_amount(&self) -> Fixed64 {
        self.stored
    }

    pub fn max_amount(&self) -> Fixed64 {
        self.max
    }

    pub fn changed_amount(&self) -> Fixed64 {
        self.changed
    }

    /// Total taken by consumers this tick. Producer refills do not reduce it.
    pub fn drawn_amount(&self) -> Fixed64 {
        self.drawn
    }

    pub fn current_amount(&self) -> Fixed64 {
        self.stored.saturating_add(self.changed)
    }

    pub fn storage_left(&self) -> Fixed64 {
        self.max.saturating_sub(self.current_amount())
    }

    /// Producer refill. Only bounds the producer's virtual output.
    pub fn produce(&mut self, amount: Fixed64) {
        self.changed = self.changed.saturating_add(amount);
    }

    pub fn consume(&mut self, amount: Fixed64) {
        self.changed = self.changed.saturating_sub(amount);
        self.drawn = self.drawn.saturating_add(amount);
    }

    pub fn storage_ratio(&self) -> Fixed64 {
        if self.max <= Fixed64::ZERO {
            return Fixed64::ZERO;
        }
        checked_div_64(self.current_amount(), self.max)
            .unwrap_or(Fixed64::ZERO)
            .clamp(Fixed64::ZERO, Fixed64::ONE)
    }

    /// Check that consumers drew exactly the registered supply, then reset
    /// to zero.
    pub fn commit(&mut self, limits: &Limits) -> Option<ExchangeDiagnostic> {
        let settled = self.drawn;
        let diagnostic = if (settled - self.max).abs() > limits.tolerance {
            let d = ExchangeDiagnostic::PointToPointImbalance {
                resource: self.resource,
                producer: self.producer,
                registered: self.max,
                settled,
            };
            d.log();
            Some(d)
        } else {
            None
        };
        self.stored = Fixed64::ZERO;
        self.max = Fixed64::ZERO;
        self.changed = Fixed64::ZERO;
        self.drawn = Fixed64::ZERO;
        diagnostic
    }
}

// ---------------------------------------------------------------------------
// Snapshot enum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Pool(PoolSnapshot),
    Thermal(ThermalSnapshot),
    PointToPoint(PointToPointSnapshot),
}

impl Snapshot {
    pub fn resource(&self) -> ResourceId {
        match self {
            Self::Pool(s) => s.resource(),
            Self::Thermal(s) => s.pool().resource(),
            Self::PointToPoint(s) => s.resource(),
        }
    }

    pub fn current_amount(&self) -> Fixed64 {
        match self {
            Self::Pool(s) => s.current_amount(),
            Self::Thermal(s) => s.pool().current_amount(),
            Self::PointToPoint(s) => s.current_amount(),
        }
    }

    pub fn storage_left(&self) -> Fixed64 {
        match self {
            Self::Pool(s) => s.storage_left(),
            Self::Thermal(s) => s.storage_left(),
            Self::PointToPoint(s) => s.storage_left(),
        }
    }

    pub fn stored_amount(&self) -> Fixed64 {
        match self {
            Self::Pool(s) => s.stored_amount(),
            Self::Thermal(s) => s.pool().stored_amount(),
            Self::PointToPoint(s) => s.stored_amount(),
        }
    }

    pub fn max_amount(&self) -> Fixed64 {
        match self {
            Self::Pool(s) => s.max_amount(),
            Self::Thermal(s) => s.pool().max_amount(),
            Self::PointToPoint(s) => s.max_amount(),
        }
    }

    pub fn changed_amount(&self) -> Fixed64 {
        match self {
            Self::Pool(s) => s.changed_amount(),
            Self::Thermal(s) => s.pool().changed_amount(),
            Self::PointToPoint(s) => s.changed_amount(),
        }
    }

    pub fn produce(&mut self, amount: Fixed64) {
        match self {
            Self::Pool(s) => s.produce(amount),
            Self::Thermal(s) => s.pool_mut().produce(amount),
            Self::PointToPoint(s) => s.produce(amount),
        }
    }

    pub fn consume(&mut self, amount: Fixed64) {
        match self {
            Self::Pool(s) => s.consume(amount),
            Self::Thermal(s) => s.pool_mut().consume(amount),
            Self::PointToPoint(s) => s.consume(amount),
        }
    }

    pub fn storage_ratio(&self) -> Fixed64 {
        match self {
            Self::Pool(s) => s.storage_ratio(),
            Self::Thermal(s) => s.pool().storage_ratio(),
            Self::PointToPoint(s) => s.storage_ratio(),
        }
    }

    /// Commit with the variant's own rules.
    pub fn commit<S: ResourceStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        dt: Seconds,
        limits: &Limits,
    ) -> Vec<ExchangeDiagnostic> {
        match self {
            Self::Pool(s) => s.commit(storage, limits),
            Self::Thermal(s) => s.commit(storage, dt, limits),
            Self::PointToPoint(s) => s.commit(limits).into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Owns every snapshot of one vessel.
#[derive(Debug, Default)]
pub struct SnapshotArena {
    snapshots: SlotMap<SnapshotId, Snapshot>,
    pools: BTreeMap<ResourceId, SnapshotId>,
    /// resource -> producer -> channel snapshot
    channels: BTreeMap<ResourceId, BTreeMap<ModuleId, SnapshotId>>,
    /// (resource, producer or consumer) -> channel snapshot
    members: BTreeMap<(ResourceId, ModuleId), SnapshotId>,
}

impl SnapshotArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots.get(id)
    }

    pub fn get_mut(&mut self, id: SnapshotId) -> Option<&mut Snapshot> {
        self.snapshots.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SnapshotId, &Snapshot)> {
        self.snapshots.iter()
    }

    pub fn pool_id(&self, resource: ResourceId) -> Option<SnapshotId> {
        self.pools.get(&resource).copied()
    }

    pub fn pool(&self, resource: ResourceId) -> Option<&Snapshot> {
        self.pool_id(resource).and_then(|id| self.snapshots.get(id))
    }

    /// Vessel-wide snapshot for `def`, created from storage on first use.
    /// Waste-heat resources get a thermal snapshot.
    pub fn pool_or_insert<S: ResourceStorage + ?Sized>(
        &mut self,
        def: &ResourceDef,
        storage: &S,
    ) -> SnapshotId {
        if let Some(id) = self.pools.get(&def.id()) {
            return *id;
        }
        let pool = PoolSnapshot::read(def.id(), storage);
        let snapshot = match def.kind {
            ResourceKind::Pooled => Snapshot::Pool(pool),
            ResourceKind::WasteHeat => Snapshot::Thermal(ThermalSnapshot::new(pool)),
        };
        let id = self.snapshots.insert(snapshot);
        self.pools.insert(def.id(), id);
        id
    }

    /// The thermal snapshot for `resource`, if that pool exists and is thermal.
    pub fn thermal_mut(&mut self, resource: ResourceId) -> Option<&mut ThermalSnapshot> {
        let id = self.pool_id(resource)?;
        match self.snapshots.get_mut(id)? {
            Snapshot::Thermal(t) => Some(t),
            _ => None,
        }
    }

    // -- channels -----------------------------------------------------------

    pub fn channel_id(&self, resource: ResourceId, producer: ModuleId) -> Option<SnapshotId> {
        self.channels
            .get(&resource)
            .and_then(|by_producer| by_producer.get(&producer))
            .copied()
    }

    pub fn channel(&self, resource: ResourceId, producer: ModuleId) -> Option<&PointToPointSnapshot> {
        match self.snapshots.get(self.channel_id(resource, producer)?)? {
            Snapshot::PointToPoint(p) => Some(p),
            _ => None,
        }
    }

    pub fn channel_mut(
        &mut self,
        resource: ResourceId,
        producer: ModuleId,
    ) -> Option<&mut PointToPointSnapshot> {
        let id = self.channel_id(resource, producer)?;
        match self.snapshots.get_mut(id)? {
            Snapshot::PointToPoint(p) => Some(p),
            _ => None,
        }
    }

    /// Channel `module` belongs to for `resource`, as producer or consumer.
    pub fn channel_for(&self, resource: ResourceId, module: ModuleId) -> Option<SnapshotId> {
        self.members.get(&(resource, module)).copied()
    }

    /// Open a channel. Returns the existing one if `producer` already owns it,
    /// or `None` when `producer` already belongs to another channel of
    /// `resource`.
    pub fn open_channel(&mut self, resource: ResourceId, producer: ModuleId) -> Option<SnapshotId> {
        if let Some(existing) = self.channel_id(resource, producer) {
            return Some(existing);
        }
        if self.members.contains_key(&(resource, producer)) {
            return None;
        }
        let id = self
            .snapshots
            .insert(Snapshot::PointToPoint(PointToPointSnapshot::new(resource, producer)));
        self.channels.entry(resource).or_default().insert(producer, id);
        self.members.insert((resource, producer), id);
        Some(id)
    }

    /// Add `consumer` to the channel owned by `producer`. Returns false when the
    /// channel does not exist or `consumer` already belongs to a different one.
    pub fn add_channel_consumer(
        &mut self,
        resource: ResourceId,
        producer: ModuleId,
        consumer: ModuleId,
    ) -> bool {
        let Some(id) = self.channel_id(resource, producer) else {
            return false;
        };
        match self.members.get(&(resource, consumer)) {
            Some(existing) if *existing != id => return false,
            _ => {}
        }
        if let Some(Snapshot::PointToPoint(channel)) = self.snapshots.get_mut(id) {
            channel.add_consumer(consumer);
        }
        self.members.insert((resource, consumer), id);
        true
    }

    /// Remove a channel and all of its memberships. Returns whether it existed.
    pub fn close_channel(&mut self, resource: ResourceId, producer: ModuleId) -> bool {
        let Some(id) = self
            .channels
            .get_mut(&resource)
            .and_then(|by_producer| by_producer.remove(&producer))
        else {
            return false;
        };
        self.members.retain(|_, member| *member != id);
        self.snapshots.remove(id);
        true
    }

    /// Re-read storage for every pool that has nothing pending.
    pub fn refresh_pools<S: ResourceStorage + ?Sized>(&mut self, storage: &S) {
        for id in self.pools.values() {
            match self.snapshots.get_mut(*id) {
                Some(Snapshot::Pool(p)) if p.changed_amount() == Fixed64::ZERO => p.refresh(storage),
                Some(Snapshot::Thermal(t)) if t.pool().changed_amount() == Fixed64::ZERO => {
                    t.pool_mut().refresh(storage)
                }
                _ => {}
            }
        }
    }

    /// Commit every snapshot exactly once.
    pub fn commit_all<S: ResourceStorage + ?Sized>(
        &mut self,
        storage: &mut S,
        dt: Seconds,
        limits: &Limits,
    ) -> Vec<ExchangeDiagnostic> {
        let mut diagnostics = Vec::new();
        for (_, snapshot) in self.snapshots.iter_mut() {
            diagnostics.extend(snapshot.commit(storage, dt, limits));
        }
        diagnostics
    }
}
