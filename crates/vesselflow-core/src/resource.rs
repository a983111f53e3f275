//! Resource library: the identity resolver that maps stable numeric ids to
//! names and carries per-resource metadata.
//!
//! The library follows a three-phase lifecycle: resources are registered on a
//! [`ResourceLibraryBuilder`], validated by [`ResourceLibraryBuilder::build`],
//! and then frozen into an immutable [`ResourceLibrary`] that is shared by
//! every exchange manager in the session.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::fixed::{Fixed64, fixed64_to_f64};
use crate::id::{ResourceId, ResourceIdentity};

// ---------------------------------------------------------------------------
// Resource metadata
// ---------------------------------------------------------------------------

/// Which snapshot variant backs a resource inside one vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Shared vessel-wide pool drawn from and filled by tank storage.
    #[default]
    Pooled,
    /// Waste heat: pooled, never rationed on output, integrated over sub-ticks.
    WasteHeat,
}

/// How amounts of a resource are rendered for humans.
///
/// `scale` converts stored units into display units (megajoules display as
/// watts with a scale of 1e6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayUnit {
    pub symbol: String,
    pub scale: f64,
}

impl DisplayUnit {
    pub fn new(symbol: impl Into<String>, scale: f64) -> Self {
        Self {
            symbol: symbol.into(),
            scale,
        }
    }

    /// Plain units, no scaling.
    pub fn units() -> Self {
        Self::new("U", 1.0)
    }

    /// Power-like resources stored in megajoules.
    pub fn watts_from_megajoules() -> Self {
        Self::new("W", 1e6)
    }
}

impl Default for DisplayUnit {
    fn default() -> Self {
        Self::units()
    }
}

/// A resource definition in the library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDef {
    pub identity: ResourceIdentity,
    pub kind: ResourceKind,
    pub unit: DisplayUnit,
}

impl ResourceDef {
    pub fn id(&self) -> ResourceId {
        self.identity.id
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }
}

/// Format `value` (stored units per second) with a K/M/G prefix and the
/// resource's display unit, e.g. `1.50 MW` or `250.0 KU`.
pub fn format_amount(def: &ResourceDef, value: Fixed64) -> String {
    let mut scaled = fixed64_to_f64(value) * def.unit.scale;
    let magnitude = scaled.abs();
    let prefix = if magnitude >= 1e9 {
        scaled /= 1e9;
        "G"
    } else if magnitude >= 1e6 {
        scaled /= 1e6;
        "M"
    } else if magnitude >= 1e3 {
        scaled /= 1e3;
        "K"
    } else {
        ""
    };
    if scaled.abs() > 20.0 {
        format!("{scaled:.1} {prefix}{}", def.unit.symbol)
    } else {
        format!("{scaled:.2} {prefix}{}", def.unit.symbol)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PendingResource {
    id: Option<ResourceId>,
    name: String,
    kind: ResourceKind,
    unit: DisplayUnit,
}

/// Builder for an immutable [`ResourceLibrary`].
#[derive(Debug, Default)]
pub struct ResourceLibraryBuilder {
    pending: Vec<PendingResource>,
}

impl ResourceLibraryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: register a resource with the next free sequential id.
    pub fn register(&mut self, name: &str, kind: ResourceKind, unit: DisplayUnit) -> &mut Self {
        self.pending.push(PendingResource {
            id: None,
            name: name.to_string(),
            kind,
            unit,
        });
        self
    }

    /// Phase 1: register a resource under an externally supplied id.
    pub fn register_with_id(
        &mut self,
        id: ResourceId,
        name: &str,
        kind: ResourceKind,
        unit: DisplayUnit,
    ) -> &mut Self {
        self.pending.push(PendingResource {
            id: Some(id),
            name: name.to_string(),
            kind,
            unit,
        });
        self
    }

    /// Phase 2: validate and freeze.
    ///
    /// Explicit ids are reserved first; resources without one get the lowest
    /// unused ids in registration order.
    pub fn build(self) -> Result<ResourceLibrary, LibraryError> {
        let mut by_id: BTreeMap<ResourceId, ResourceDef> = BTreeMap::new();
        let mut by_name: HashMap<String, ResourceId> = HashMap::new();

        for pending in &self.pending {
            if pending.name.trim().is_empty() {
                return Err(LibraryError::EmptyName);
            }
            if let Some(id) = pending.id {
                if by_id.contains_key(&id) {
                    return Err(LibraryError::DuplicateId(id));
                }
                by_id.insert(id, Self::def(id, pending));
            }
        }

        let mut next = 0u32;
        for pending in &self.pending {
            if pending.id.is_some() {
                continue;
            }
            while by_id.contains_key(&ResourceId(next)) {
                next = next.checked_add(1).ok_or(LibraryError::IdSpaceExhausted)?;
            }
            let id = ResourceId(next);
            by_id.insert(id, Self::def(id, pending));
        }

        for def in by_id.values() {
            if by_name.insert(def.identity.name.clone(), def.id()).is_some() {
                return Err(LibraryError::DuplicateName(def.identity.name.clone()));
            }
        }

        Ok(ResourceLibrary { by_id, by_name })
    }

    fn def(id: ResourceId, pending: &PendingResource) -> ResourceDef {
        ResourceDef {
            identity: ResourceIdentity::new(id, pending.name.clone()),
            kind: pending.kind,
            unit: pending.unit.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Frozen library
// ---------------------------------------------------------------------------

/// Immutable id/name resolver. Frozen after build. Thread-safe to share.
#[derive(Debug, Clone)]
pub struct ResourceLibrary {
    by_id: BTreeMap<ResourceId, ResourceDef>,
    by_name: HashMap<String, ResourceId>,
}

impl ResourceLibrary {
    pub fn builder() -> ResourceLibraryBuilder {
        ResourceLibraryBuilder::new()
    }

    pub fn get(&self, id: ResourceId) -> Option<&ResourceDef> {
        self.by_id.get(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<ResourceId> {
        self.by_name.get(name).copied()
    }

    pub fn by_name(&self, name: &str) -> Option<&ResourceDef> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    pub fn identity(&self, id: ResourceId) -> Option<&ResourceIdentity> {
        self.get(id).map(|def| &def.identity)
    }

    pub fn kind(&self, id: ResourceId) -> Option<ResourceKind> {
        self.get(id).map(|def| def.kind)
    }

    /// The first waste-heat resource, which radiators drain.
    pub fn waste_heat(&self) -> Option<&ResourceDef> {
        self.by_id.values().find(|def| def.kind == ResourceKind::WasteHeat)
    }

    /// Iterate definitions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDef> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LibraryError {
    #[error("duplicate resource name: {0}")]
    DuplicateName(String),
    #[error("duplicate resource id: {0}")]
    DuplicateId(ResourceId),
    #[error("resource name must not be empty")]
    EmptyName,
    #[error("no resource ids left to assign")]
    IdSpaceExhausted,
}
