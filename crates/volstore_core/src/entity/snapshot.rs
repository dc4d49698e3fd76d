//! Snapshot entity.

use super::relation::ParentLink;
use super::{now, Entity, EntityId, EntityKind, Record, Volume};
use crate::driver::{PersistenceDriver, VolumeFilter};
use crate::error::{CoreError, CoreResult};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::Arc;
use volstore_codec::Value;

/// Parameters for creating a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSpec {
    /// Identifier to use instead of a random one.
    pub id: Option<EntityId>,
    /// Display name.
    pub name: Option<String>,
    /// Display description.
    pub description: Option<String>,
}

impl SnapshotSpec {
    /// Creates empty parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identifier.
    #[must_use]
    pub fn id(mut self, id: impl Into<EntityId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the display description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug)]
struct SnapshotState {
    record: Record,
    volume: ParentLink,
}

/// A point-in-time copy of a volume.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<RwLock<SnapshotState>>,
}

impl Snapshot {
    /// Creates a new snapshot of `volume`.
    ///
    /// If the volume's snapshot collection is loaded the snapshot joins it.
    ///
    /// # Errors
    ///
    /// Field writes are validated against the schema.
    pub fn new(volume: &Volume, spec: SnapshotSpec) -> CoreResult<Self> {
        let id = spec.id.filter(|id| !id.is_empty()).unwrap_or_else(EntityId::new);

        let mut record = Record::constructed(EntityKind::Snapshot);
        record.set("id", id.as_str())?;
        record.set("created_at", now())?;
        record.set("deleted", false)?;
        record.set("deleted_at", Value::Null)?;
        record.set("status", "creating")?;
        record.set("volume_id", volume.id().as_str())?;
        record.set("volume_size", volume.size())?;
        record.set("display_name", spec.name)?;
        record.set("display_description", spec.description)?;

        let snapshot = Self::from_record(record);
        snapshot.attach_to(volume);
        Ok(snapshot)
    }

    pub(crate) fn from_record(record: Record) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SnapshotState {
                record,
                volume: ParentLink::Unloaded,
            })),
        }
    }

    /// Links the snapshot to `volume`, joining its loaded collection.
    pub(crate) fn attach_to(&self, volume: &Volume) {
        let link = if volume.push_snapshot(self) {
            ParentLink::Weak(volume.downgrade())
        } else {
            ParentLink::Owned(volume.clone())
        };
        self.set_parent(link);
    }

    pub(crate) fn set_parent(&self, link: ParentLink) {
        self.inner.write().volume = link;
    }

    /// Identifier of the parent volume.
    #[must_use]
    pub fn volume_id(&self) -> Option<EntityId> {
        self.record().text("volume_id").map(EntityId::from)
    }

    /// Size of the parent volume when the snapshot was taken.
    #[must_use]
    pub fn volume_size(&self) -> Option<i64> {
        self.record().integer("volume_size")
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.record().text("display_name").map(str::to_string)
    }

    /// Parent volume, loading it through `driver` on first access.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the parent volume does not exist.
    pub fn volume(&self, driver: &dyn PersistenceDriver) -> CoreResult<Volume> {
        let cached = self.inner.read().volume.resolve();
        if let Some(volume) = cached {
            return Ok(volume);
        }
        let volume_id = self.volume_id().unwrap_or_default();
        let volume = driver
            .get_volumes(&VolumeFilter::new().volume_id(volume_id.clone()))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found(EntityKind::Volume, volume_id.as_str()))?;
        self.set_parent(ParentLink::Owned(volume.clone()));
        Ok(volume)
    }

    /// Parent volume if already resolved.
    #[must_use]
    pub fn loaded_volume(&self) -> Option<Volume> {
        self.inner.read().volume.resolve()
    }

    /// Whether the parent relationship is resolved.
    #[must_use]
    pub fn volume_is_loaded(&self) -> bool {
        self.inner.read().volume.is_loaded()
    }
}

impl Entity for Snapshot {
    const KIND: EntityKind = EntityKind::Snapshot;

    fn record(&self) -> MappedRwLockReadGuard<'_, Record> {
        RwLockReadGuard::map(self.inner.read(), |s| &s.record)
    }

    fn record_mut(&self) -> MappedRwLockWriteGuard<'_, Record> {
        RwLockWriteGuard::map(self.inner.write(), |s| &mut s.record)
    }

    fn same_entity(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("record", &*self.record())
            .finish()
    }
}
