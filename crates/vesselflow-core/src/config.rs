//! Tuning knobs for one exchange manager.
//!
//! Values are stored as `f64` so data files stay human-readable; the manager
//! converts them to [`Fixed64`] once via [`ExchangeConfig::limits`].

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;

/// Ceiling on thermal sub-ticks in one commit, whatever the configuration asks for.
pub const MAX_THERMAL_SUB_TICKS: u32 = 10_000;

/// Configuration for settlement, commit checks and thermal integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// A process run that executes less than this fraction counts as no progress.
    pub ratio_epsilon: f64,
    /// Absolute slack (in resource units) for conservation and balance checks.
    pub conservation_tolerance: f64,
    /// Largest change of the thermal pool per sub-tick, as a fraction of its capacity.
    pub thermal_step_fraction: f64,
    /// Upper bound on thermal sub-ticks in one commit. Clamped to
    /// [`MAX_THERMAL_SUB_TICKS`].
    pub thermal_max_sub_ticks: u32,
    /// Optional guard on settlement passes. `None` runs to the fixed point.
    pub max_passes: Option<u32>,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            ratio_epsilon: 1e-6,
            conservation_tolerance: 1e-6,
            thermal_step_fraction: 0.10,
            thermal_max_sub_ticks: 1000,
            max_passes: None,
        }
    }
}

impl ExchangeConfig {
    /// Fixed-point view of the configuration used during a tick.
    ///
    /// Non-finite values fall back to the defaults. The epsilon never drops
    /// below the smallest representable step, otherwise a pass that moves
    /// nothing would still count as progress.
    pub fn limits(&self) -> Limits {
        let defaults = Self::default();
        Limits {
            ratio_epsilon: to_fixed(self.ratio_epsilon, defaults.ratio_epsilon).max(Fixed64::DELTA),
            tolerance: to_fixed(self.conservation_tolerance, defaults.conservation_tolerance).max(Fixed64::ZERO),
            thermal_step_fraction: to_fixed(self.thermal_step_fraction, defaults.thermal_step_fraction)
                .clamp(Fixed64::ZERO, Fixed64::ONE),
            thermal_max_sub_ticks: self.thermal_max_sub_ticks.clamp(1, MAX_THERMAL_SUB_TICKS),
            max_passes: self.max_passes,
        }
    }
}

fn to_fixed(value: f64, fallback: f64) -> Fixed64 {
    Fixed64::checked_from_num(value)
        .or_else(|| Fixed64::checked_from_num(fallback))
        .unwrap_or(Fixed64::ZERO)
}

/// [`ExchangeConfig`] converted to fixed point and clamped to sane ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub ratio_epsilon: Fixed64,
    pub tolerance: Fixed64,
    pub thermal_step_fraction: Fixed64,
    pub thermal_max_sub_ticks: u32,
    pub max_passes: Option<u32>,
}

impl Default for Limits {
    fn default() -> Self {
        ExchangeConfig::default().limits()
    }
}
