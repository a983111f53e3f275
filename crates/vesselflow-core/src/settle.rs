//! The fixed-point settlement loop.
//!
//! Every pass first totals the outstanding demand each snapshot faces
//! (`amount * remaining_fraction` over the active processes), then lets every
//! process run with its proportional share of each snapshot it touches. A
//! process that is the only claimant of all its snapshots gets exactly what
//! [`ConversionProcess::run`] would give it. Passes repeat until one makes no
//! progress or every process is resolved.
//!
//! # Design
//!
//! - Shares are computed from the state at the start of a pass, so the order
//!   processes were submitted in does not pick winners.
//! - Claimants of a snapshot together never take more than its current amount
//!   or fill more than its storage left, up to fixed-point rounding.
//! - Resolved processes leave the active set.

use slotmap::SecondaryMap;

use crate::config::Limits;
use crate::fixed::{Fixed64, checked_div_64, coverage};
use crate::id::SnapshotId;
use crate::process::ConversionProcess;
use crate::snapshot::SnapshotArena;

/// What a settlement run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettleOutcome {
    /// Passes executed, including the final pass that made no progress.
    pub passes: u32,
    /// Processes still holding a remaining fraction above epsilon.
    pub unresolved: usize,
    /// Whether the configured pass limit stopped the loop.
    pub capped: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct SlotDemand {
    input: Fixed64,
    output: Fixed64,
    virtual_output: Fixed64,
}

#[derive(Debug, Clone, Copy)]
struct SlotShare {
    /// Fraction of every input claim this snapshot can cover.
    input: Fixed64,
    /// Fraction of every limiting output claim this snapshot can absorb.
    output: Fixed64,
    storage_left: Fixed64,
    virtual_demand: Fixed64,
}

/// Settle `processes` against `arena` until no further progress is possible.
pub fn settle<'a, I>(processes: I, arena: &mut SnapshotArena, limits: &Limits) -> SettleOutcome
where
    I: IntoIterator<Item = &'a mut ConversionProcess>,
{
    let epsilon = limits.ratio_epsilon;
    let mut active: Vec<&'a mut ConversionProcess> = processes
        .into_iter()
        .filter(|p| p.is_bound() && p.remaining_fraction() >= epsilon)
        .collect();
    let mut outcome = SettleOutcome::default();

    while !active.is_empty() {
        if limits.max_passes.is_some_and(|max| outcome.passes >= max) {
            outcome.capped = true;
            break;
        }

        let shares = pass_shares(&active, arena);
        let mut progressed = false;
        for process in active.iter_mut() {
            let factor = share_factor(process, &shares);
            let ratio = process.remaining_fraction().saturating_mul(factor);
            if ratio >= epsilon {
                process.apply(arena, ratio);
                progressed = true;
            }
        }
        outcome.passes += 1;
        active.retain(|p| p.remaining_fraction() >= epsilon);

        tracing::trace!(pass = outcome.passes, active = active.len(), progressed, "settlement pass");
        if !progressed {
            break;
        }
    }

    outcome.unresolved = active.len();
    outcome
}

fn pass_shares(active: &[&mut ConversionProcess], arena: &SnapshotArena) -> SecondaryMap<SnapshotId, SlotShare> {
    let mut demand: SecondaryMap<SnapshotId, SlotDemand> = SecondaryMap::new();
    for process in active {
        let remaining = process.remaining_fraction();
        for (entry, slot) in process.inputs().iter().zip(process.input_slots()) {
            let d = slot_demand(&mut demand, *slot);
            d.input = d.input.saturating_add(entry.amount().saturating_mul(remaining));
        }
        for (entry, slot) in process.outputs().iter().zip(process.output_slots()) {
            let claim = entry.amount().saturating_mul(remaining);
            let d = slot_demand(&mut demand, *slot);
            if entry.is_virtual() {
                d.virtual_output = d.virtual_output.saturating_add(claim);
            } else if entry.limits_output() {
                d.output = d.output.saturating_add(claim);
            }
        }
    }

    let mut shares = SecondaryMap::new();
    for (slot, d) in demand.iter() {
        let Some(snapshot) = arena.get(slot) else {
            continue;
        };
        let storage_left = snapshot.storage_left();
        shares.insert(
            slot,
            SlotShare {
                input: coverage(snapshot.current_amount(), d.input),
                output: coverage(storage_left, d.output),
                storage_left,
                virtual_demand: d.virtual_output,
            },
        );
    }
    shares
}

fn slot_demand(demand: &mut SecondaryMap<SnapshotId, SlotDemand>, slot: SnapshotId) -> &mut SlotDemand {
    if !demand.contains_key(slot) {
        demand.insert(slot, SlotDemand::default());
    }
    // The key was inserted just above.
    &mut demand[slot]
}

/// Largest fraction of its remaining flow `process` may run this pass.
fn share_factor(process: &ConversionProcess, shares: &SecondaryMap<SnapshotId, SlotShare>) -> Fixed64 {
    let remaining = process.remaining_fraction();
    let mut factor = Fixed64::ONE;

    for slot in process.input_slots() {
        factor = factor.min(shares.get(*slot).map_or(Fixed64::ZERO, |s| s.input));
    }

    let mut virtual_factor: Option<Fixed64> = None;
    for (entry, slot) in process.outputs().iter().zip(process.output_slots()) {
        let Some(share) = shares.get(*slot) else {
            return Fixed64::ZERO;
        };
        if entry.is_virtual() {
            let claim = entry.amount().saturating_mul(remaining);
            let allotted = virtual_allotment(process, *slot, share);
            let fill = coverage(allotted, claim);
            virtual_factor = Some(virtual_factor.map_or(fill, |v| v.max(fill)));
        } else if entry.limits_output() {
            factor = factor.min(share.output);
        }
    }

    factor.min(virtual_factor.unwrap_or(Fixed64::ONE))
}

/// Storage left on `slot` that this process may fill with virtual output:
/// all of it when uncontended, otherwise a share proportional to the
/// process's own virtual claim on the slot.
fn virtual_allotment(process: &ConversionProcess, slot: SnapshotId, share: &SlotShare) -> Fixed64 {
    if share.virtual_demand <= share.storage_left {
        return share.storage_left;
    }
    let remaining = process.remaining_fraction();
    let own = process
        .outputs()
        .iter()
        .zip(process.output_slots())
        .filter(|(e, s)| e.is_virtual() && **s == slot)
        .fold(Fixed64::ZERO, |acc, (e, _)| acc.saturating_add(e.amount().saturating_mul(remaining)));
    let fraction = checked_div_64(own, share.virtual_demand).unwrap_or(Fixed64::ZERO);
    share.storage_left.max(Fixed64::ZERO).saturating_mul(fraction)
}
