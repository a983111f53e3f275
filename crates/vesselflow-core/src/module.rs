//! Capabilities the exchange needs from the components that use it.
//!
//! Components submit processes under a [`ModuleId`] and are looked up again
//! through a [`ModuleDirectory`] when results are delivered, so the manager
//! never stores references to them.

use slotmap::SlotMap;

use crate::fixed::Fixed64;
use crate::id::ModuleId;
use crate::process::ConversionProcess;

// ---------------------------------------------------------------------------
// Component capability
// ---------------------------------------------------------------------------

/// A component that submits conversion processes and reads back their results.
pub trait SyncResourceModule: std::fmt::Debug {
    /// Name shown in per-resource summaries. Modules sharing a name are grouped.
    fn display_name(&self) -> &str;

    /// Called once per tick after commit with the processes this module
    /// submitted, in submission order, carrying their final fractions.
    fn notify(&mut self, processes: &[ConversionProcess]);

    /// Downcast to `&dyn Any` for type-safe access to concrete module types.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Downcast to `&mut dyn Any` for type-safe mutable access to concrete module types.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Resolves module ids at notification time.
pub trait ModuleDirectory {
    fn display_name(&self, id: ModuleId) -> Option<&str>;
    fn module_mut(&mut self, id: ModuleId) -> Option<&mut dyn SyncResourceModule>;
}

/// The usual directory: every module of a simulation in one slot map.
pub type ModuleSet = SlotMap<ModuleId, Box<dyn SyncResourceModule>>;

impl ModuleDirectory for ModuleSet {
    fn display_name(&self, id: ModuleId) -> Option<&str> {
        self.get(id).map(|m| m.display_name())
    }

    fn module_mut(&mut self, id: ModuleId) -> Option<&mut dyn SyncResourceModule> {
        match self.get_mut(id) {
            Some(module) => Some(module.as_mut()),
            None => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Radiator capability
// ---------------------------------------------------------------------------

/// Something that drains waste heat at a steady rate while registered.
pub trait Radiator {
    fn module_id(&self) -> ModuleId;
    fn heat_removal_per_second(&self) -> Fixed64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter {
        name: String,
        notified: usize,
    }

    impl SyncResourceModule for Counter {
        fn display_name(&self) -> &str {
            &self.name
        }

        fn notify(&mut self, processes: &[ConversionProcess]) {
            self.notified += processes.len();
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    #[test]
    fn module_set_resolves_and_downcasts() {
        let mut set = ModuleSet::with_key();
        let id = set.insert(Box::new(Counter {
            name: "Reactor".into(),
            notified: 0,
        }));
        assert_eq!(ModuleDirectory::display_name(&set, id), Some("Reactor"));

        let module = set.module_mut(id).unwrap();
        module.notify(&[]);
        let counter = module.as_any().downcast_ref::<Counter>().unwrap();
        assert_eq!(counter.notified, 0);

        set.remove(id);
        assert!(ModuleDirectory::display_name(&set, id).is_none());
        assert!(set.module_mut(id).is_none());
    }
}
