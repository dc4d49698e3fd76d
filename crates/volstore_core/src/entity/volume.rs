//! Volume entity.

use super::relation::{ParentLink, Related};
use super::{
    backend_name_of, now, Connection, Entity, EntityId, EntityKind, QosSpecs, Record, Snapshot,
    VolumeType,
};
use crate::driver::{ConnectionFilter, PersistenceDriver, SnapshotFilter};
use crate::error::{CoreError, CoreResult};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use volstore_codec::Value;

/// Parameters for creating a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Size in GiB. Must be positive.
    pub size: i64,
    /// Identifier to use instead of a random one.
    pub id: Option<EntityId>,
    /// Display name.
    pub name: Option<String>,
    /// Display description.
    pub description: Option<String>,
    /// Whether the volume is bootable.
    pub bootable: bool,
    /// Availability zone.
    pub availability_zone: Option<String>,
    /// Free-form classification attributes.
    pub extra_specs: BTreeMap<String, String>,
    /// QoS limits. Empty means no QoS specification.
    pub qos_specs: BTreeMap<String, String>,
    /// User metadata.
    pub metadata: BTreeMap<String, String>,
    /// Administrative metadata.
    pub admin_metadata: BTreeMap<String, String>,
}

impl VolumeSpec {
    /// Creates parameters for a volume of `size` GiB.
    #[must_use]
    pub fn new(size: i64) -> Self {
        Self {
            size,
            ..Self::default()
        }
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

    /// Sets whether the volume is bootable.
    #[must_use]
    pub const fn bootable(mut self, value: bool) -> Self {
        self.bootable = value;
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn availability_zone(mut self, zone: impl Into<String>) -> Self {
        self.availability_zone = Some(zone.into());
        self
    }

    /// Sets the classification attributes.
    #[must_use]
    pub fn extra_specs(mut self, specs: BTreeMap<String, String>) -> Self {
        self.extra_specs = specs;
        self
    }

    /// Sets the QoS limits.
    #[must_use]
    pub fn qos_specs(mut self, specs: BTreeMap<String, String>) -> Self {
        self.qos_specs = specs;
        self
    }

    /// Sets the user metadata.
    #[must_use]
    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the administrative metadata.
    #[must_use]
    pub fn admin_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.admin_metadata = metadata;
        self
    }
}

#[derive(Debug)]
pub(crate) struct VolumeState {
    record: Record,
    volume_type: Related<VolumeType>,
    snapshots: Related<Vec<Snapshot>>,
    connections: Related<Vec<Connection>>,
}

/// A block-storage volume.
///
/// Clones are handles to the same volume.
#[derive(Clone)]
pub struct Volume {
    inner: Arc<RwLock<VolumeState>>,
}

/// Non-owning handle to a volume.
#[derive(Clone, Default)]
pub struct WeakVolume {
    inner: Weak<RwLock<VolumeState>>,
}

impl WeakVolume {
    /// Upgrades to a volume handle if the volume is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Volume> {
        self.inner.upgrade().map(|inner| Volume { inner })
    }
}

impl std::fmt::Debug for WeakVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WeakVolume")
    }
}

impl Volume {
    /// Creates a new volume owned by `host`.
    ///
    /// The volume gets an entity-scoped classification and, when QoS
    /// limits are given, an entity-scoped QoS specification. Every field
    /// is pending until the first persist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFieldValue` if the size is not positive.
    pub fn new(host: &str, spec: VolumeSpec) -> CoreResult<Self> {
        if spec.size <= 0 {
            return Err(CoreError::invalid_field_value(
                EntityKind::Volume,
                "size",
                "positive integer",
                spec.size.to_string(),
            ));
        }
        let id = spec.id.filter(|id| !id.is_empty()).unwrap_or_else(EntityId::new);

        let mut record = Record::constructed(EntityKind::Volume);
        record.set("id", id.as_str())?;
        record.set("created_at", now())?;
        record.set("deleted", false)?;
        record.set("deleted_at", Value::Null)?;
        record.set("status", "creating")?;
        record.set("size", spec.size)?;
        record.set("display_name", spec.name)?;
        record.set("display_description", spec.description)?;
        record.set("bootable", spec.bootable)?;
        record.set("host", host)?;
        record.set("availability_zone", spec.availability_zone)?;
        record.set("attach_status", "detached")?;
        record.set("metadata", Value::from_string_map(&spec.metadata))?;
        record.set("admin_metadata", Value::from_string_map(&spec.admin_metadata))?;

        let qos = if spec.qos_specs.is_empty() {
            None
        } else {
            Some(QosSpecs::entity_scoped(&id, &spec.qos_specs)?)
        };
        let volume_type = VolumeType::entity_scoped(&id, &spec.extra_specs, qos)?;

        Ok(Self::from_state(VolumeState {
            record,
            volume_type: Related::Loaded(volume_type),
            snapshots: Related::Loaded(Vec::new()),
            connections: Related::Loaded(Vec::new()),
        }))
    }

    /// Builds a volume whose child collections load lazily.
    pub(crate) fn from_parts(record: Record, volume_type: VolumeType) -> Self {
        Self::from_state(VolumeState {
            record,
            volume_type: Related::Loaded(volume_type),
            snapshots: Related::Unloaded,
            connections: Related::Unloaded,
        })
    }

    /// Builds a volume whose classification loads lazily too.
    pub(crate) fn from_record(record: Record) -> Self {
        Self::from_state(VolumeState {
            record,
            volume_type: Related::Unloaded,
            snapshots: Related::Unloaded,
            connections: Related::Unloaded,
        })
    }

    fn from_state(state: VolumeState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(state)),
        }
    }

    /// Non-owning handle to this volume.
    #[must_use]
    pub fn downgrade(&self) -> WeakVolume {
        WeakVolume {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Size in GiB.
    #[must_use]
    pub fn size(&self) -> Option<i64> {
        self.record().integer("size")
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.record().text("display_name").map(str::to_string)
    }

    /// Display description.
    #[must_use]
    pub fn description(&self) -> Option<String> {
        self.record().text("display_description").map(str::to_string)
    }

    /// Owner tag (`[node@]backend[#pool]`).
    #[must_use]
    pub fn host(&self) -> Option<String> {
        self.record().text("host").map(str::to_string)
    }

    /// Backend name part of the owner tag.
    #[must_use]
    pub fn backend_name(&self) -> Option<String> {
        self.record()
            .text("host")
            .map(|host| backend_name_of(host).to_string())
    }

    /// Whether the volume is bootable.
    #[must_use]
    pub fn bootable(&self) -> bool {
        self.record().boolean("bootable").unwrap_or(false)
    }

    /// Attach status.
    #[must_use]
    pub fn attach_status(&self) -> Option<String> {
        self.record().text("attach_status").map(str::to_string)
    }

    /// Sets the status.
    ///
    /// # Errors
    ///
    /// Never fails for text. Kept fallible like every field write.
    pub fn set_status(&self, status: &str) -> CoreResult<()> {
        self.set("status", status)
    }

    /// User metadata.
    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.record().string_map("metadata")
    }

    /// Replaces the user metadata.
    ///
    /// # Errors
    ///
    /// Never fails for a string mapping. Kept fallible like every field write.
    pub fn set_metadata(&self, metadata: &BTreeMap<String, String>) -> CoreResult<()> {
        self.set("metadata", Value::from_string_map(metadata))
    }

    /// Administrative metadata.
    #[must_use]
    pub fn admin_metadata(&self) -> BTreeMap<String, String> {
        self.record().string_map("admin_metadata")
    }

    /// Replaces the administrative metadata.
    ///
    /// # Errors
    ///
    /// Never fails for a string mapping. Kept fallible like every field write.
    pub fn set_admin_metadata(&self, metadata: &BTreeMap<String, String>) -> CoreResult<()> {
        self.set("admin_metadata", Value::from_string_map(metadata))
    }

    /// The classification, loading it through `driver` on first access.
    ///
    /// A volume the driver holds no classification for gets an empty one
    /// backed by the shared default record.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn volume_type(&self, driver: &dyn PersistenceDriver) -> CoreResult<VolumeType> {
        if let Some(volume_type) = self.loaded_volume_type() {
            return Ok(volume_type);
        }
        let id = self.id();
        let loaded = match driver.volume_type_get(id.as_str())? {
            Some(volume_type) => volume_type,
            None => {
                let created_at = self.record().value("created_at").cloned().unwrap_or(Value::Null);
                VolumeType::default_for(&id, created_at)?
            }
        };
        self.set_volume_type(loaded.clone());
        Ok(loaded)
    }

    /// Classification if already loaded.
    #[must_use]
    pub fn loaded_volume_type(&self) -> Option<VolumeType> {
        self.inner.read().volume_type.get().cloned()
    }

    /// Replaces the classification.
    pub fn set_volume_type(&self, volume_type: VolumeType) {
        self.inner.write().volume_type = Related::Loaded(volume_type);
    }

    /// Classification attributes.
    ///
    /// # Errors
    ///
    /// Propagates driver errors from loading the classification.
    pub fn extra_specs(
        &self,
        driver: &dyn PersistenceDriver,
    ) -> CoreResult<BTreeMap<String, String>> {
        Ok(self.volume_type(driver)?.extra_specs())
    }

    /// Replaces the classification attributes.
    ///
    /// # Errors
    ///
    /// Propagates driver errors from loading the classification.
    pub fn set_extra_specs(
        &self,
        driver: &dyn PersistenceDriver,
        extra_specs: &BTreeMap<String, String>,
    ) -> CoreResult<()> {
        self.volume_type(driver)?.set_extra_specs(extra_specs)
    }

    /// QoS specification, if the classification has one.
    ///
    /// # Errors
    ///
    /// Propagates driver errors from loading the classification.
    pub fn qos_specs(&self, driver: &dyn PersistenceDriver) -> CoreResult<Option<QosSpecs>> {
        Ok(self.volume_type(driver)?.qos_specs())
    }

    /// Sets the QoS limits, creating the volume's QoS specification on
    /// first use.
    ///
    /// # Errors
    ///
    /// Propagates driver errors from loading the classification.
    pub fn set_qos_specs(
        &self,
        driver: &dyn PersistenceDriver,
        specs: &BTreeMap<String, String>,
    ) -> CoreResult<()> {
        let volume_type = self.volume_type(driver)?;
        match volume_type.qos_specs() {
            Some(qos) => qos.set_specs(specs),
            None => volume_type.set_qos_specs(Some(QosSpecs::entity_scoped(&self.id(), specs)?)),
        }
    }

    /// Snapshots of this volume, loading them through `driver` on first
    /// access.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn snapshots(&self, driver: &dyn PersistenceDriver) -> CoreResult<Vec<Snapshot>> {
        let cached = self.inner.read().snapshots.get().cloned();
        if let Some(snapshots) = cached {
            return Ok(snapshots);
        }
        let loaded = driver.get_snapshots(&SnapshotFilter::new().volume_id(self.id()))?;
        self.set_snapshots(loaded.clone());
        Ok(loaded)
    }

    /// Snapshots if already loaded.
    #[must_use]
    pub fn loaded_snapshots(&self) -> Option<Vec<Snapshot>> {
        self.inner.read().snapshots.get().cloned()
    }

    /// Replaces the snapshot collection. Each snapshot links back to this
    /// volume.
    pub fn set_snapshots(&self, snapshots: Vec<Snapshot>) {
        for snapshot in &snapshots {
            snapshot.set_parent(ParentLink::Weak(self.downgrade()));
        }
        self.inner.write().snapshots = Related::Loaded(snapshots);
    }

    /// Appends a snapshot when the collection is loaded. Returns whether it
    /// was added.
    pub(crate) fn push_snapshot(&self, snapshot: &Snapshot) -> bool {
        let mut state = self.inner.write();
        match state.snapshots.get_mut() {
            Some(list) => {
                if !list.iter().any(|s| s.same_entity(snapshot)) {
                    list.push(snapshot.clone());
                }
                true
            }
            None => false,
        }
    }

    /// Drops a snapshot from the loaded collection.
    pub(crate) fn forget_snapshot(&self, id: &EntityId) {
        if let Some(list) = self.inner.write().snapshots.get_mut() {
            list.retain(|s| &s.id() != id);
        }
    }

    /// Connections of this volume, loading them through `driver` on first
    /// access.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn connections(&self, driver: &dyn PersistenceDriver) -> CoreResult<Vec<Connection>> {
        let cached = self.inner.read().connections.get().cloned();
        if let Some(connections) = cached {
            return Ok(connections);
        }
        let loaded = driver.get_connections(&ConnectionFilter::new().volume_id(self.id()))?;
        self.set_connections(loaded.clone());
        Ok(loaded)
    }

    /// Connections if already loaded.
    #[must_use]
    pub fn loaded_connections(&self) -> Option<Vec<Connection>> {
        self.inner.read().connections.get().cloned()
    }

    /// Replaces the connection collection. Each connection links back to
    /// this volume.
    pub fn set_connections(&self, connections: Vec<Connection>) {
        for connection in &connections {
            connection.set_parent(ParentLink::Weak(self.downgrade()));
        }
        self.inner.write().connections = Related::Loaded(connections);
    }

    pub(crate) fn push_connection(&self, connection: &Connection) -> bool {
        let mut state = self.inner.write();
        match state.connections.get_mut() {
            Some(list) => {
                if !list.iter().any(|c| c.same_entity(connection)) {
                    list.push(connection.clone());
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn forget_connection(&self, id: &EntityId) {
        if let Some(list) = self.inner.write().connections.get_mut() {
            list.retain(|c| &c.id() != id);
        }
    }
}

impl Entity for Volume {
    const KIND: EntityKind = EntityKind::Volume;

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

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("Volume")
            .field("record", &state.record)
            .field("volume_type_loaded", &state.volume_type.is_loaded())
            .field("snapshots_loaded", &state.snapshots.is_loaded())
            .field("connections_loaded", &state.connections.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::Baseline;

    fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn new_volume_defaults() {
        let vol = Volume::new("host@lvm#pool", VolumeSpec::new(1).name("disk")).unwrap();
        assert_eq!(vol.size(), Some(1));
        assert_eq!(vol.status().as_deref(), Some("creating"));
        assert_eq!(vol.name().as_deref(), Some("disk"));
        assert_eq!(vol.backend_name().as_deref(), Some("lvm"));
        assert!(!vol.is_deleted());
        assert!(vol.created_at().is_some());
        assert_eq!(vol.record().baseline(), Baseline::Constructed);
        assert!(vol.changed_fields().contains("id"));
        assert!(vol.loaded_snapshots().is_some_and(|s| s.is_empty()));
        assert!(vol.loaded_connections().is_some_and(|c| c.is_empty()));
    }

    #[test]
    fn size_must_be_positive() {
        assert!(matches!(
            Volume::new("lvm", VolumeSpec::new(0)),
            Err(CoreError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn explicit_id_is_used() {
        let vol = Volume::new("lvm", VolumeSpec::new(1).id("vol-1")).unwrap();
        assert_eq!(vol.id().as_str(), "vol-1");
        assert_eq!(vol.loaded_volume_type().unwrap().id().as_str(), "vol-1");
    }

    #[test]
    fn classification_is_entity_scoped() {
        let vol = Volume::new(
            "lvm",
            VolumeSpec::new(1)
                .extra_specs(pairs(&[("k", "v")]))
                .qos_specs(pairs(&[("total_iops_sec", "500")])),
        )
        .unwrap();
        let driver = MemoryBackend::new();
        let vt = vol.volume_type(&driver).unwrap();
        assert_eq!(vt.id(), vol.id());
        assert_eq!(vt.name(), Some(vol.id().to_string()));
        assert_eq!(vol.extra_specs(&driver).unwrap(), pairs(&[("k", "v")]));
        let qos = vol.qos_specs(&driver).unwrap().unwrap();
        assert_eq!(qos.id(), vol.id());
        assert_eq!(qos.specs(), pairs(&[("total_iops_sec", "500")]));
    }

    #[test]
    fn set_qos_specs_creates_then_updates() {
        let driver = MemoryBackend::new();
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        assert!(vol.qos_specs(&driver).unwrap().is_none());
        vol.set_qos_specs(&driver, &pairs(&[("a", "1")])).unwrap();
        let qos = vol.qos_specs(&driver).unwrap().unwrap();
        vol.set_qos_specs(&driver, &pairs(&[("a", "2")])).unwrap();
        assert!(qos.same_entity(&vol.qos_specs(&driver).unwrap().unwrap()));
        assert_eq!(qos.specs(), pairs(&[("a", "2")]));
    }

    #[test]
    fn new_volume_clears_deleted_at() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        assert!(vol.changed_fields().contains("deleted_at"));
        assert_eq!(vol.record().get("deleted_at").unwrap(), Some(&Value::Null));
    }

    #[test]
    fn unknown_classification_falls_back_to_default() {
        let vol = Volume::new("lvm", VolumeSpec::new(1).id("vol-9")).unwrap();
        let record = vol.record().clone();
        let lazy = Volume::from_record(record);
        assert!(lazy.loaded_volume_type().is_none());

        let driver = MemoryBackend::new();
        let vt = lazy.volume_type(&driver).unwrap();
        assert_eq!(vt.id().as_str(), "vol-9");
        assert!(vt.extra_specs().is_empty());
        assert!(vt.changed_fields().is_empty());
        assert!(lazy.loaded_volume_type().is_some_and(|v| v.same_entity(&vt)));
    }

    #[test]
    fn metadata_accessors() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        vol.reset_changes(None);
        vol.set_admin_metadata(&pairs(&[("readonly", "True")])).unwrap();
        assert_eq!(vol.admin_metadata(), pairs(&[("readonly", "True")]));
        assert_eq!(
            vol.changed_fields().into_iter().collect::<Vec<_>>(),
            vec!["admin_metadata"]
        );
    }

    #[test]
    fn weak_handle_follows_volume_lifetime() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let weak = vol.downgrade();
        assert!(weak.upgrade().is_some_and(|v| v.same_entity(&vol)));
        drop(vol);
        assert!(weak.upgrade().is_none());
    }
}
