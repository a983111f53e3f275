//! Reactor vessel example: a nuclear-electric vessel over several ticks.
//!
//! A reactor supplies thermal power to a generator over a point-to-point
//! channel. The generator charges the vessel's megajoule pool, an ion drive
//! and a lab draw from it, and a radiator sheds the waste heat. Each tick
//! prints the per-resource summaries.
//!
//! Run with: `RUST_LOG=debug cargo run -p vesselflow-examples --example reactor_vessel`

use std::any::Any;
use std::sync::Arc;

use vesselflow_core::exchange::{ExchangeError, ExchangeManager};
use vesselflow_core::fixed::Fixed64;
use vesselflow_core::id::{ModuleId, ResourceId};
use vesselflow_core::module::{ModuleSet, Radiator, SyncResourceModule};
use vesselflow_core::process::ConversionProcess;
use vesselflow_core::resource::{DisplayUnit, ResourceKind, ResourceLibrary};
use vesselflow_core::storage::{ResourceStorage, TankStorage};

/// A component that remembers how much of its last process ran.
#[derive(Debug)]
struct Part {
    name: &'static str,
    last_fraction: Fixed64,
}

impl Part {
    fn new(name: &'static str) -> Box<Self> {
        Box::new(Self {
            name,
            last_fraction: Fixed64::ZERO,
        })
    }
}

impl SyncResourceModule for Part {
    fn display_name(&self) -> &str {
        self.name
    }

    fn notify(&mut self, processes: &[ConversionProcess]) {
        self.last_fraction = processes
            .iter()
            .map(ConversionProcess::resolved_fraction)
            .min()
            .unwrap_or(Fixed64::ZERO);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct Panel {
    module: ModuleId,
    rate: Fixed64,
}

impl Radiator for Panel {
    fn module_id(&self) -> ModuleId {
        self.module
    }

    fn heat_removal_per_second(&self) -> Fixed64 {
        self.rate
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // --- Resource library ---

    let mut builder = ResourceLibrary::builder();
    builder
        .register("Megajoules", ResourceKind::Pooled, DisplayUnit::watts_from_megajoules())
        .register("WasteHeat", ResourceKind::WasteHeat, DisplayUnit::watts_from_megajoules())
        .register("ThermalPower", ResourceKind::Pooled, DisplayUnit::watts_from_megajoules())
        .register("EnrichedUranium", ResourceKind::Pooled, DisplayUnit::units())
        .register("XenonGas", ResourceKind::Pooled, DisplayUnit::units());
    let library = match builder.build() {
        Ok(library) => Arc::new(library),
        Err(e) => {
            tracing::error!(%e, "invalid resource library");
            return;
        }
    };
    let id = |name: &str| library.id_of(name).unwrap_or(ResourceId(u32::MAX));
    let (megajoules, heat, thermal, uranium, xenon) = (
        id("Megajoules"),
        id("WasteHeat"),
        id("ThermalPower"),
        id("EnrichedUranium"),
        id("XenonGas"),
    );

    // --- Vessel storage and parts ---

    let storage = TankStorage::new()
        .with_tank(megajoules, Fixed64::from_num(50), Fixed64::from_num(500))
        .with_tank(heat, Fixed64::ZERO, Fixed64::from_num(5000))
        .with_tank(uranium, Fixed64::from_num(10), Fixed64::from_num(10))
        .with_tank(xenon, Fixed64::from_num(400), Fixed64::from_num(400));
    let mut manager = ExchangeManager::with_default_config(storage, Arc::clone(&library));

    let mut modules = ModuleSet::with_key();
    let reactor = modules.insert(Part::new("Nuclear Reactor"));
    let generator = modules.insert(Part::new("Thermal Generator"));
    let drive = modules.insert(Part::new("Ion Drive"));
    let lab = modules.insert(Part::new("Science Lab"));
    let radiator = Panel {
        module: modules.insert(Part::new("Radiator Panel")),
        rate: Fixed64::from_num(600),
    };

    let channel = manager
        .open_channel(thermal, reactor)
        .and_then(|()| manager.add_channel_consumer(thermal, reactor, generator));
    if let Err(e) = channel {
        tracing::error!(%e, "could not wire the reactor to the generator");
        return;
    }

    // --- Simulation loop ---

    let dt = Fixed64::from_num(0.5);
    for tick in 1..=6 {
        // The drive throttles up every tick until the generator can't keep up.
        let thrust = f64::from(tick) * 40.0;
        let parts = [reactor, generator, drive, lab];
        if let Err(e) = submit_tick(&mut manager, thermal, parts, &radiator, dt, thrust) {
            tracing::error!(%e, tick, "rejected process");
            return;
        }
        let report = match manager.synchronize(dt, &mut modules) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(%e, tick, "tick failed");
                return;
            }
        };

        println!("=== Tick {tick} ({} passes) ===", report.passes);
        for part in modules.values() {
            if let Some(part) = part.as_any().downcast_ref::<Part>() {
                println!("  {:<18} ran {:.3}", part.name, part.last_fraction.to_num::<f64>());
            }
        }
        for (resource, summary) in manager.summaries() {
            if let Some(def) = library.get(*resource) {
                for line in summary.render(def) {
                    println!("  {line}");
                }
            }
        }
        let store = manager.storage();
        println!(
            "  stored: {:.2} MJ, {:.2} heat, {:.4} uranium",
            store.totals(megajoules).amount.to_num::<f64>(),
            store.totals(heat).amount.to_num::<f64>(),
            store.totals(uranium).amount.to_num::<f64>(),
        );
    }
}

/// Queue every part's process for one tick.
fn submit_tick(
    manager: &mut ExchangeManager<TankStorage>,
    thermal: ResourceId,
    [reactor, generator, drive, lab]: [ModuleId; 4],
    radiator: &Panel,
    dt: Fixed64,
    drive_power: f64,
) -> Result<(), ExchangeError> {
    // 600 MW thermal at full power.
    let reactor_output = Fixed64::from_num(600).saturating_mul(dt);
    manager.register_max_production(thermal, reactor, reactor_output)?;
    let fission = manager
        .process_builder()
        .delta_time(dt)
        .add_input_per_second("EnrichedUranium", 0.001)
        .add_virtual_output_per_second("ThermalPower", 600.0)
        .add_output_per_second("WasteHeat", 60.0)
        .build()?;
    manager.add_process(reactor, fission)?;

    // Draws everything, converts 30% to electricity.
    let conversion = manager
        .process_builder()
        .delta_time(dt)
        .add_input_per_second("ThermalPower", 600.0)
        .add_output_per_second("Megajoules", 180.0)
        .add_output_per_second("WasteHeat", 420.0)
        .build()?;
    manager.add_process(generator, conversion)?;

    let thrust = manager
        .process_builder()
        .delta_time(dt)
        .add_input_per_second("Megajoules", drive_power)
        .add_input_per_second("XenonGas", 0.5)
        .build()?;
    manager.add_process(drive, thrust)?;

    let research = manager
        .process_builder()
        .delta_time(dt)
        .add_input_per_second("Megajoules", 50.0)
        .build()?;
    manager.add_process(lab, research)?;

    manager.register_radiator(radiator)
}
