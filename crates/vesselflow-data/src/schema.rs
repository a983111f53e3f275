//! Serde data file structs for the resource library.
//!
//! These structs define the on-disk format for resources. They are
//! deserialized from RON, JSON, or TOML data files and then resolved into a
//! [`ResourceLibrary`](vesselflow_core::resource::ResourceLibrary) by the
//! loader. The exchange configuration needs no separate schema:
//! [`ExchangeConfig`](vesselflow_core::config::ExchangeConfig) deserializes
//! directly, with every field optional.

use serde::Deserialize;
use vesselflow_core::resource::{DisplayUnit, ResourceKind};

// ===========================================================================
// Resources
// ===========================================================================

/// A resource definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub name: String,
    /// Explicit numeric id. Resources without one get the lowest free id.
    #[serde(default)]
    pub id: Option<u32>,
    #[serde(default)]
    pub kind: ResourceKindData,
    #[serde(default)]
    pub unit: Option<UnitData>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKindData {
    #[default]
    Pooled,
    WasteHeat,
}

impl From<ResourceKindData> for ResourceKind {
    fn from(kind: ResourceKindData) -> Self {
        match kind {
            ResourceKindData::Pooled => ResourceKind::Pooled,
            ResourceKindData::WasteHeat => ResourceKind::WasteHeat,
        }
    }
}

/// Display unit, e.g. `(symbol: "W", scale: 1000000.0)` for megajoule power.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitData {
    pub symbol: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl From<UnitData> for DisplayUnit {
    fn from(unit: UnitData) -> Self {
        DisplayUnit::new(unit.symbol, unit.scale)
    }
}
