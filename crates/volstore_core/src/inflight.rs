//! Registry of volumes whose creation has not finished.
//!
//! While a volume is being created, collaborators running inside the
//! creation (driver setup callbacks, the adaptation shim) may look it up
//! before any backend has stored it. Those lookups consult this registry
//! first. Entries are removed when the [`InflightGuard`] returned by
//! [`InflightRegistry::register`] is dropped, so no entry outlives the
//! creation call that added it.

use crate::entity::{Entity, EntityId, Volume};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Volumes currently being created, by identifier.
#[derive(Debug, Default)]
pub struct InflightRegistry {
    volumes: RwLock<HashMap<EntityId, Volume>>,
}

impl InflightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `volume` until the returned guard is dropped.
    #[must_use = "the volume is released as soon as the guard is dropped"]
    pub fn register(&self, volume: &Volume) -> InflightGuard<'_> {
        let id = volume.id();
        trace!(volume_id = %id, "registering in-flight volume");
        self.volumes.write().insert(id.clone(), volume.clone());
        InflightGuard { registry: self, id }
    }

    /// The in-flight volume with identifier `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Volume> {
        self.volumes.read().get(id).cloned()
    }

    /// Whether a volume with identifier `id` is in flight.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.volumes.read().contains_key(id)
    }

    /// Number of in-flight volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    /// Whether no volume is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.read().is_empty()
    }

    fn release(&self, id: &EntityId) {
        trace!(volume_id = %id, "releasing in-flight volume");
        self.volumes.write().remove(id);
    }
}

/// Keeps a volume registered as in flight. Releases it on drop.
#[derive(Debug)]
pub struct InflightGuard<'a> {
    registry: &'a InflightRegistry,
    id: EntityId,
}

impl InflightGuard<'_> {
    /// Identifier of the registered volume.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        &self.id
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.registry.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::VolumeSpec;

    #[test]
    fn guard_scopes_registration() {
        let registry = InflightRegistry::new();
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        {
            let guard = registry.register(&vol);
            assert_eq!(guard.id(), &vol.id());
            assert!(registry.contains(vol.id().as_str()));
            let found = registry.get(vol.id().as_str()).unwrap();
            assert!(found.same_entity(&vol));
        }
        assert!(registry.is_empty());
        assert!(registry.get(vol.id().as_str()).is_none());
    }

    #[test]
    fn released_on_unwind() {
        let registry = InflightRegistry::new();
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = registry.register(&vol);
            panic!("provisioning failed");
        }));
        assert!(result.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn lookups_of_unknown_ids_miss() {
        let registry = InflightRegistry::new();
        assert!(registry.get("fake-uuid").is_none());
        assert!(!registry.contains("fake-uuid"));
    }
}
