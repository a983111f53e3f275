//! Property-based tests for the exchange.
//!
//! Uses proptest to generate random vessels and process sets, then verifies
//! that settlement terminates, conserves resources and does not depend on
//! submission order.

use std::collections::BTreeMap;

use proptest::prelude::*;
use vesselflow_core::exchange::ExchangeManager;
use vesselflow_core::fixed::Fixed64;
use vesselflow_core::id::{ModuleId, ResourceId};
use vesselflow_core::module::ModuleSet;
use vesselflow_core::storage::{ResourceStorage, TankStorage};
use vesselflow_core::test_utils::*;

/// Pooled resources of the standard library. Waste heat is left out because
/// its outputs are never throttled and may overflow tanks.
const POOLED: [&str; 4] = [MEGAJOULES, THERMAL_POWER, CHARGED_PARTICLES, LQD_HYDROGEN];

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
struct ProcessShape {
    inputs: Vec<(usize, u32)>,
    outputs: Vec<(usize, u32)>,
}

fn arb_entries() -> impl Strategy<Value = Vec<(usize, u32)>> {
    proptest::collection::vec((0..POOLED.len(), 1..50u32), 0..=3)
}

fn arb_process() -> impl Strategy<Value = ProcessShape> {
    (arb_entries(), arb_entries()).prop_map(|(inputs, outputs)| ProcessShape { inputs, outputs })
}

/// `(amount, capacity)` per pooled resource, amount never above capacity.
fn arb_tanks() -> impl Strategy<Value = Vec<(u32, u32)>> {
    proptest::collection::vec((0..=100u32, 0..=100u32), POOLED.len())
        .prop_map(|v| v.into_iter().map(|(amount, extra)| (amount, amount + extra)).collect())
}

fn arb_processes(max: usize) -> impl Strategy<Value = Vec<ProcessShape>> {
    proptest::collection::vec(arb_process(), 1..=max)
}

// ===========================================================================
// Harness
// ===========================================================================

fn pooled(index: usize) -> ResourceId {
    resource(POOLED[index])
}

fn build_storage(tanks: &[(u32, u32)]) -> TankStorage {
    tanks
        .iter()
        .enumerate()
        .fold(TankStorage::new(), |storage, (i, (amount, capacity))| {
            storage.with_tank(pooled(i), fixed(f64::from(*amount)), fixed(f64::from(*capacity)))
        })
}

struct Settled {
    manager: ExchangeManager<TankStorage>,
    /// Resolved fraction per process, in generation order.
    fractions: Vec<Fixed64>,
    /// Net flow (production minus consumption) per pooled resource.
    net: BTreeMap<ResourceId, Fixed64>,
}

/// Submit every process (reversed if asked), run one tick and collect results.
fn run_tick(tanks: &[(u32, u32)], shapes: &[ProcessShape], reversed: bool) -> Settled {
    let mut manager = ExchangeManager::with_default_config(build_storage(tanks), shared_library());
    let mut modules = ModuleSet::with_key();
    let owners: Vec<ModuleId> = (0..shapes.len())
        .map(|i| recording_module(&mut modules, &format!("Part {i}")))
        .collect();

    let mut order: Vec<usize> = (0..shapes.len()).collect();
    if reversed {
        order.reverse();
    }
    for i in order {
        let shape = &shapes[i];
        let mut builder = manager.process_builder();
        for (r, amount) in &shape.inputs {
            builder = builder.add_input_id(pooled(*r), f64::from(*amount));
        }
        for (r, amount) in &shape.outputs {
            builder = builder.add_output_id(pooled(*r), f64::from(*amount));
        }
        let process = builder.build().unwrap();
        manager.add_process(owners[i], process).unwrap();
    }

    manager.settle().unwrap();
    manager.commit(fixed(1.0)).unwrap();

    let mut net: BTreeMap<ResourceId, Fixed64> = BTreeMap::new();
    for batch in manager.batches() {
        for process in &batch.processes {
            for r in 0..POOLED.len() {
                let id = pooled(r);
                let flow = process.production(id) - process.consumption(id);
                *net.entry(id).or_insert(Fixed64::ZERO) += flow;
            }
        }
    }

    manager.notify(&mut modules).unwrap();
    let fractions = owners
        .iter()
        .map(|owner| recorded(&modules, *owner).last_fractions()[0])
        .collect();
    Settled {
        manager,
        fractions,
        net,
    }
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Settlement terminates and every resolved fraction lies in [0, 1].
    #[test]
    fn settlement_terminates_with_valid_fractions(
        tanks in arb_tanks(),
        shapes in arb_processes(50),
    ) {
        let settled = run_tick(&tanks, &shapes, false);
        for fraction in &settled.fractions {
            prop_assert!(*fraction >= Fixed64::ZERO);
            prop_assert!(*fraction <= Fixed64::ONE);
        }
    }

    /// Tanks never go negative or above capacity, and every tank moved by
    /// exactly the net flow the processes report.
    #[test]
    fn committed_storage_matches_process_flows(
        tanks in arb_tanks(),
        shapes in arb_processes(50),
    ) {
        let settled = run_tick(&tanks, &shapes, false);
        let tolerance = fixed(1e-3);
        for (i, (amount, capacity)) in tanks.iter().enumerate() {
            let id = pooled(i);
            let totals = settled.manager.storage().totals(id);
            prop_assert!(totals.amount >= Fixed64::ZERO);
            prop_assert!(totals.amount <= totals.capacity);
            prop_assert_eq!(totals.capacity, fixed(f64::from(*capacity)));

            let moved = totals.amount - fixed(f64::from(*amount));
            let net = settled.net.get(&id).copied().unwrap_or(Fixed64::ZERO);
            prop_assert!(
                (moved - net).abs() <= tolerance,
                "{}: storage moved {} but processes report {}", POOLED[i], moved, net
            );
        }
    }

    /// Submission order does not pick winners.
    #[test]
    fn submission_order_does_not_matter(
        tanks in arb_tanks(),
        shapes in arb_processes(30),
    ) {
        let forward = run_tick(&tanks, &shapes, false);
        let backward = run_tick(&tanks, &shapes, true);
        prop_assert_eq!(&forward.fractions, &backward.fractions);
        for i in 0..POOLED.len() {
            let id = pooled(i);
            prop_assert_eq!(
                forward.manager.storage().totals(id),
                backward.manager.storage().totals(id)
            );
        }
    }
}
