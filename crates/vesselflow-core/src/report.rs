//! Per-tick results: the [`SyncReport`] returned to the caller and the
//! per-resource [`ResourceSummary`] kept for display.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diagnostic::ExchangeDiagnostic;
use crate::fixed::{Fixed64, checked_div_64};
use crate::id::ResourceIdentity;
use crate::resource::{ResourceDef, format_amount};

/// Outcome of one full tick of one vessel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Settlement passes executed.
    pub passes: u32,
    /// Processes submitted this tick.
    pub processes: usize,
    pub diagnostics: Vec<ExchangeDiagnostic>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Actual and requested rate, per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flow {
    pub current: Fixed64,
    pub max: Fixed64,
}

impl Flow {
    pub fn add(&mut self, other: Flow) {
        self.current = self.current.saturating_add(other.current);
        self.max = self.max.saturating_add(other.max);
    }
}

/// Who produced and consumed one resource last tick, grouped by module display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub resource: ResourceIdentity,
    pub stored: Fixed64,
    pub capacity: Fixed64,
    pub producers: BTreeMap<String, Flow>,
    pub consumers: BTreeMap<String, Flow>,
}

impl ResourceSummary {
    pub fn new(resource: ResourceIdentity, stored: Fixed64, capacity: Fixed64) -> Self {
        Self {
            resource,
            stored,
            capacity,
            producers: BTreeMap::new(),
            consumers: BTreeMap::new(),
        }
    }

    pub fn total_production(&self) -> Flow {
        total(&self.producers)
    }

    pub fn total_consumption(&self) -> Flow {
        total(&self.consumers)
    }

    /// Actual over theoretical supply. Zero when nothing could be produced.
    pub fn distribution(&self) -> Fixed64 {
        let supply = self.total_production();
        if supply.max <= Fixed64::ZERO {
            return Fixed64::ZERO;
        }
        checked_div_64(supply.current, supply.max).unwrap_or(Fixed64::ZERO)
    }

    /// Producers ordered by actual supply, largest first.
    pub fn producers_by_current(&self) -> Vec<(&str, Flow)> {
        sorted(&self.producers)
    }

    /// Consumers ordered by actual demand, largest first.
    pub fn consumers_by_current(&self) -> Vec<(&str, Flow)> {
        sorted(&self.consumers)
    }

    /// Plain-text rendering of the summary.
    pub fn render(&self, def: &ResourceDef) -> Vec<String> {
        let supply = self.total_production();
        let demand = self.total_consumption();
        let distribution = self.distribution().to_num::<f64>() * 100.0;
        let mut lines = vec![
            format!("{} Management Display", self.resource.name),
            format!("Theoretical Supply  {}", format_amount(def, supply.max)),
            format!("Current Supply      {}", format_amount(def, supply.current)),
            format!("Current Distribution {distribution:.3}%"),
            format!("Power Demand        {}", format_amount(def, demand.current)),
        ];
        for (name, flow) in self.producers_by_current() {
            lines.push(format!(
                "  + {name}: {} / {}",
                format_amount(def, flow.current),
                format_amount(def, flow.max)
            ));
        }
        for (name, flow) in self.consumers_by_current() {
            lines.push(format!(
                "  - {name}: {} / {}",
                format_amount(def, flow.current),
                format_amount(def, flow.max)
            ));
        }
        lines
    }
}

fn total(flows: &BTreeMap<String, Flow>) -> Flow {
    flows.values().fold(Flow::default(), |mut acc, f| {
        acc.add(*f);
        acc
    })
}

fn sorted(flows: &BTreeMap<String, Flow>) -> Vec<(&str, Flow)> {
    let mut entries: Vec<(&str, Flow)> = flows.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    entries.sort_by(|a, b| b.1.current.cmp(&a.1.current).then_with(|| a.0.cmp(b.0)));
    entries
}
