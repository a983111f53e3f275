//! Conversion processes: one tick's weighted request to turn input resources
//! into output resources.
//!
//! A process is built fresh every tick, submitted once, mutated only by
//! settlement, and dropped after its owner has been notified. Its
//! `remaining_fraction` starts at one and shrinks each time settlement lets it
//! run.

use crate::fixed::{Fixed64, Seconds, checked_div_64, coverage, fixed64_to_f64};
use crate::id::{ModuleId, ResourceId, SnapshotId};
use crate::resource::ResourceLibrary;
use crate::snapshot::SnapshotArena;

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One weighted flow line of a process. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionEntry {
    resource: ResourceId,
    /// Amount for the whole tick (already scaled by the tick duration).
    amount: Fixed64,
    /// Excess beyond storage capacity is discarded instead of throttling.
    dump_excess: bool,
    /// Elastic sink used by point-to-point accounting.
    virtual_output: bool,
}

impl ConversionEntry {
    pub fn new(resource: ResourceId, amount: Fixed64) -> Self {
        Self {
            resource,
            amount: amount.max(Fixed64::ZERO),
            dump_excess: false,
            virtual_output: false,
        }
    }

    pub fn dumping(resource: ResourceId, amount: Fixed64) -> Self {
        Self {
            dump_excess: true,
            ..Self::new(resource, amount)
        }
    }

    pub fn virtual_sink(resource: ResourceId, amount: Fixed64) -> Self {
        Self {
            virtual_output: true,
            ..Self::new(resource, amount)
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn amount(&self) -> Fixed64 {
        self.amount
    }

    pub fn dump_excess(&self) -> bool {
        self.dump_excess
    }

    pub fn is_virtual(&self) -> bool {
        self.virtual_output
    }

    /// Outputs that throttle the process when their pool is full.
    pub fn limits_output(&self) -> bool {
        !self.dump_excess && !self.virtual_output
    }
}

// ---------------------------------------------------------------------------
// Process
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionProcess {
    module: Option<ModuleId>,
    delta_time: Seconds,
    inputs: Vec<ConversionEntry>,
    outputs: Vec<ConversionEntry>,
    remaining: Fixed64,
    /// Snapshot each entry is bound to, parallel to `inputs` / `outputs`.
    /// Empty until the process is submitted.
    input_slots: Vec<SnapshotId>,
    output_slots: Vec<SnapshotId>,
}

impl ConversionProcess {
    pub fn builder(library: &ResourceLibrary) -> ProcessBuilder<'_> {
        ProcessBuilder::new(library)
    }

    /// Assemble a process from prepared entries, skipping validation against a
    /// library. Entries are already clamped to non-negative amounts.
    pub fn from_entries(
        module: Option<ModuleId>,
        delta_time: Seconds,
        inputs: Vec<ConversionEntry>,
        outputs: Vec<ConversionEntry>,
    ) -> Self {
        Self {
            module,
            delta_time,
            inputs,
            outputs,
            remaining: Fixed64::ONE,
            input_slots: Vec::new(),
            output_slots: Vec::new(),
        }
    }

    pub fn module(&self) -> Option<ModuleId> {
        self.module
    }

    pub(crate) fn set_module(&mut self, module: ModuleId) {
        self.module = Some(module);
    }

    pub fn delta_time(&self) -> Seconds {
        self.delta_time
    }

    pub fn inputs(&self) -> &[ConversionEntry] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ConversionEntry] {
        &self.outputs
    }

    /// Fraction of the requested flow not yet executed, in [0, 1].
    pub fn remaining_fraction(&self) -> Fixed64 {
        self.remaining
    }

    /// Fraction of the requested flow executed so far.
    pub fn resolved_fraction(&self) -> Fixed64 {
        Fixed64::ONE - self.remaining
    }

    pub fn is_bound(&self) -> bool {
        self.input_slots.len() == self.inputs.len() && self.output_slots.len() == self.outputs.len()
    }

    pub fn input_slots(&self) -> &[SnapshotId] {
        &self.input_slots
    }

    pub fn output_slots(&self) -> &[SnapshotId] {
        &self.output_slots
    }

    pub(crate) fn bind(&mut self, input_slots: Vec<SnapshotId>, output_slots: Vec<SnapshotId>) {
        debug_assert_eq!(input_slots.len(), self.inputs.len());
        debug_assert_eq!(output_slots.len(), self.outputs.len());
        self.input_slots = input_slots;
        self.output_slots = output_slots;
    }

    /// Run as much of this process as the bound snapshots allow on their own,
    /// treating this process as the only claimant.
    ///
    /// The ratio is the minimum of the remaining fraction, the most
    /// constrained input (`current / amount`), the most constrained limiting
    /// output (`storage_left / amount`) and the virtual-output ratio, which is
    /// the *maximum* fill over virtual outputs. Returns whether at least
    /// `epsilon` of the process executed. Unbound processes never run.
    pub fn run(&mut self, arena: &mut SnapshotArena, epsilon: Fixed64) -> bool {
        if self.remaining < epsilon || !self.is_bound() {
            return false;
        }

        let mut min_input = Fixed64::ONE;
        for (entry, slot) in self.inputs.iter().zip(&self.input_slots) {
            let available = arena.get(*slot).map_or(Fixed64::ZERO, |s| s.current_amount());
            min_input = min_input.min(coverage(available, entry.amount));
        }

        let mut min_output = Fixed64::ONE;
        let mut virtual_ratio: Option<Fixed64> = None;
        for (entry, slot) in self.outputs.iter().zip(&self.output_slots) {
            if entry.dump_excess {
                continue;
            }
            let left = arena.get(*slot).map_or(Fixed64::ZERO, |s| s.storage_left());
            let fill = coverage(left, entry.amount);
            if entry.virtual_output {
                virtual_ratio = Some(virtual_ratio.map_or(fill, |v| v.max(fill)));
            } else {
                min_output = min_output.min(fill);
            }
        }

        let ratio = self
            .remaining
            .min(min_input)
            .min(min_output)
            .min(virtual_ratio.unwrap_or(Fixed64::ONE));
        if ratio < epsilon {
            return false;
        }
        self.apply(arena, ratio);
        true
    }

    /// Consume and produce `ratio` of every entry and shrink the remaining fraction.
    pub(crate) fn apply(&mut self, arena: &mut SnapshotArena, ratio: Fixed64) {
        for (entry, slot) in self.inputs.iter().zip(&self.input_slots) {
            if let Some(snapshot) = arena.get_mut(*slot) {
                snapshot.consume(entry.amount.saturating_mul(ratio));
            }
        }
        for (entry, slot) in self.outputs.iter().zip(&self.output_slots) {
            if let Some(snapshot) = arena.get_mut(*slot) {
                snapshot.produce(entry.amount.saturating_mul(ratio));
            }
        }
        self.remaining = (self.remaining - ratio).max(Fixed64::ZERO);
    }

    // -- reporting ------------------------------------------------------------

    /// Amount of `resource` actually produced so far this tick.
    pub fn production(&self, resource: ResourceId) -> Fixed64 {
        self.max_production(resource)
            .saturating_mul(self.resolved_fraction())
    }

    /// Amount of `resource` actually consumed so far this tick.
    pub fn consumption(&self, resource: ResourceId) -> Fixed64 {
        self.max_consumption(resource)
            .saturating_mul(self.resolved_fraction())
    }

    /// Requested production of `resource` for the whole tick.
    pub fn max_production(&self, resource: ResourceId) -> Fixed64 {
        sum_for(&self.outputs, resource)
    }

    /// Requested consumption of `resource` for the whole tick.
    pub fn max_consumption(&self, resource: ResourceId) -> Fixed64 {
        sum_for(&self.inputs, resource)
    }

    pub fn production_per_second(&self, resource: ResourceId) -> Fixed64 {
        self.per_second(self.production(resource))
    }

    pub fn consumption_per_second(&self, resource: ResourceId) -> Fixed64 {
        self.per_second(self.consumption(resource))
    }

    pub fn max_production_per_second(&self, resource: ResourceId) -> Fixed64 {
        self.per_second(self.max_production(resource))
    }

    pub fn max_consumption_per_second(&self, resource: ResourceId) -> Fixed64 {
        self.per_second(self.max_consumption(resource))
    }

    fn per_second(&self, amount: Fixed64) -> Fixed64 {
        checked_div_64(amount, self.delta_time).unwrap_or(Fixed64::ZERO)
    }

    /// Resources this process reads or writes.
    pub fn resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.inputs
            .iter()
            .chain(&self.outputs)
            .map(ConversionEntry::resource)
    }
}

fn sum_for(entries: &[ConversionEntry], resource: ResourceId) -> Fixed64 {
    entries
        .iter()
        .filter(|e| e.resource == resource)
        .fold(Fixed64::ZERO, |acc, e| acc.saturating_add(e.amount))
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryRole {
    Normal,
    Dumping,
    Virtual,
}

#[derive(Debug, Clone)]
enum Pending {
    Ready(ConversionEntry),
    Scaled {
        resource: ResourceId,
        amount: f64,
        per_second: bool,
        role: EntryRole,
    },
}

/// Fluent builder for [`ConversionProcess`].
///
/// Unknown resources and bad amounts are recorded as they are added and the
/// first problem is returned by [`ProcessBuilder::build`].
#[derive(Debug)]
pub struct ProcessBuilder<'a> {
    library: &'a ResourceLibrary,
    module: Option<ModuleId>,
    delta_time: Seconds,
    inputs: Vec<Pending>,
    outputs: Vec<Pending>,
    error: Option<ProcessError>,
}

impl<'a> ProcessBuilder<'a> {
    pub fn new(library: &'a ResourceLibrary) -> Self {
        Self {
            library,
            module: None,
            delta_time: Fixed64::ONE,
            inputs: Vec::new(),
            outputs: Vec::new(),
            error: None,
        }
    }

    pub fn module(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self
    }

    /// Tick duration used by the `*_per_second` methods. Defaults to one second.
    pub fn delta_time(mut self, dt: Seconds) -> Self {
        self.delta_time = dt;
        self
    }

    pub fn add_input(self, name: &str, amount: f64) -> Self {
        self.push_named(true, name, amount, false, EntryRole::Normal)
    }

    pub fn add_input_id(self, id: ResourceId, amount: f64) -> Self {
        self.push_id(true, id, amount, false, EntryRole::Normal)
    }

    pub fn add_input_per_second(self, name: &str, rate: f64) -> Self {
        self.push_named(true, name, rate, true, EntryRole::Normal)
    }

    pub fn add_output(self, name: &str, amount: f64) -> Self {
        self.push_named(false, name, amount, false, EntryRole::Normal)
    }

    pub fn add_output_id(self, id: ResourceId, amount: f64) -> Self {
        self.push_id(false, id, amount, false, EntryRole::Normal)
    }

    pub fn add_output_per_second(self, name: &str, rate: f64) -> Self {
        self.push_named(false, name, rate, true, EntryRole::Normal)
    }

    /// Output whose excess is discarded rather than throttling the process.
    pub fn add_dumping_output(self, name: &str, amount: f64) -> Self {
        self.push_named(false, name, amount, false, EntryRole::Dumping)
    }

    pub fn add_dumping_output_per_second(self, name: &str, rate: f64) -> Self {
        self.push_named(false, name, rate, true, EntryRole::Dumping)
    }

    /// Elastic output: combined with other virtual outputs by maximum fill.
    pub fn add_virtual_output(self, name: &str, amount: f64) -> Self {
        self.push_named(false, name, amount, false, EntryRole::Virtual)
    }

    pub fn add_virtual_output_per_second(self, name: &str, rate: f64) -> Self {
        self.push_named(false, name, rate, true, EntryRole::Virtual)
    }

    pub fn add_input_entry(mut self, entry: ConversionEntry) -> Self {
        if self.library.get(entry.resource).is_none() {
            self.fail(ProcessError::UnknownResourceId(entry.resource));
        }
        self.inputs.push(Pending::Ready(entry));
        self
    }

    pub fn add_output_entry(mut self, entry: ConversionEntry) -> Self {
        if self.library.get(entry.resource).is_none() {
            self.fail(ProcessError::UnknownResourceId(entry.resource));
        }
        self.outputs.push(Pending::Ready(entry));
        self
    }

    pub fn build(self) -> Result<ConversionProcess, ProcessError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        if self.delta_time <= Fixed64::ZERO {
            return Err(ProcessError::InvalidDeltaTime(fixed64_to_f64(self.delta_time)));
        }
        let dt = self.delta_time;
        let inputs = resolve_all(self.inputs, dt)?;
        let outputs = resolve_all(self.outputs, dt)?;
        Ok(ConversionProcess::from_entries(self.module, dt, inputs, outputs))
    }

    fn push_named(self, input: bool, name: &str, amount: f64, per_second: bool, role: EntryRole) -> Self {
        match self.library.id_of(name) {
            Some(id) => self.push_id(input, id, amount, per_second, role),
            None => {
                let mut this = self;
                this.fail(ProcessError::UnknownResourceName(name.to_string()));
                this
            }
        }
    }

    fn push_id(mut self, input: bool, id: ResourceId, amount: f64, per_second: bool, role: EntryRole) -> Self {
        if self.library.get(id).is_none() {
            self.fail(ProcessError::UnknownResourceId(id));
            return self;
        }
        if !amount.is_finite() || amount < 0.0 {
            self.fail(ProcessError::InvalidAmount {
                resource: id,
                amount,
            });
            return self;
        }
        let pending = Pending::Scaled {
            resource: id,
            amount,
            per_second,
            role,
        };
        if input {
            self.inputs.push(pending);
        } else {
            self.outputs.push(pending);
        }
        self
    }

    fn fail(&mut self, error: ProcessError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

fn resolve_all(pending: Vec<Pending>, dt: Seconds) -> Result<Vec<ConversionEntry>, ProcessError> {
    pending.into_iter().map(|p| resolve(p, dt)).collect()
}

fn resolve(pending: Pending, dt: Seconds) -> Result<ConversionEntry, ProcessError> {
    match pending {
        Pending::Ready(entry) => Ok(entry),
        Pending::Scaled {
            resource,
            amount,
            per_second,
            role,
        } => {
            let base = Fixed64::checked_from_num(amount).ok_or(ProcessError::InvalidAmount { resource, amount })?;
            let scaled = if per_second {
                base.checked_mul(dt)
                    .ok_or(ProcessError::InvalidAmount { resource, amount })?
            } else {
                base
            };
            Ok(match role {
                EntryRole::Normal => ConversionEntry::new(resource, scaled),
                EntryRole::Dumping => ConversionEntry::dumping(resource, scaled),
                EntryRole::Virtual => ConversionEntry::virtual_sink(resource, scaled),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Malformed process, surfaced to the submitting component at build time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("unknown resource name: {0}")]
    UnknownResourceName(String),
    #[error("unknown resource id: {0}")]
    UnknownResourceId(ResourceId),
    #[error("invalid amount {amount} for resource {resource}")]
    InvalidAmount { resource: ResourceId, amount: f64 },
    #[error("tick duration must be positive, got {0}")]
    InvalidDeltaTime(f64),
}
