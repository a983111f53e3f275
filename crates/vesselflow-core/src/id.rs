use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a component (reactor, generator, radiator, ...) that submits
    /// conversion processes.
    pub struct ModuleId;

    /// Identifies a vessel inside a [`crate::fleet::Fleet`].
    pub struct VesselId;

    /// Identifies a snapshot record in a [`crate::snapshot::SnapshotArena`].
    pub struct SnapshotId;
}

/// Stable numeric identifier of a resource. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A resource id paired with its human-readable name.
///
/// Produced by [`crate::resource::ResourceLibrary`]; the id and name are
/// guaranteed to map 1:1 within one library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub id: ResourceId,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(id: ResourceId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_equality() {
        assert_eq!(ResourceId(0), ResourceId(0));
        assert_ne!(ResourceId(0), ResourceId(1));
    }

    #[test]
    fn resource_ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ResourceId(0), "Megajoules");
        map.insert(ResourceId(1), "WasteHeat");
        assert_eq!(map[&ResourceId(1)], "WasteHeat");
    }

    #[test]
    fn identity_displays_name() {
        let identity = ResourceIdentity::new(ResourceId(7), "ThermalPower");
        assert_eq!(identity.to_string(), "ThermalPower");
        assert_eq!(ResourceId(7).to_string(), "#7");
    }
}
