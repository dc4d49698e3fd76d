//! Persistence driver interface.
//!
//! Every backend implements [`PersistenceDriver`]. Reads return the
//! matching entities in insertion order and an empty vector when nothing
//! matches. Deletes of entities that do not exist are no-ops.

use crate::entity::{
    backend_name_of, Connection, Entity, EntityId, KeyValue, QosSpecs, Snapshot, Volume,
    VolumeType,
};
use crate::error::CoreResult;

/// Exact-match predicates for volume reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeFilter {
    /// Volume identifier.
    pub volume_id: Option<EntityId>,
    /// Display name.
    pub volume_name: Option<String>,
    /// Backend name part of the owner tag.
    pub backend_name: Option<String>,
}

impl VolumeFilter {
    /// A filter matching every volume.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one identifier.
    #[must_use]
    pub fn volume_id(mut self, id: impl Into<EntityId>) -> Self {
        self.volume_id = Some(id.into());
        self
    }

    /// Restricts to one display name.
    #[must_use]
    pub fn volume_name(mut self, name: impl Into<String>) -> Self {
        self.volume_name = Some(name.into());
        self
    }

    /// Restricts to volumes owned by one backend.
    #[must_use]
    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend_name = Some(name.into());
        self
    }

    /// Whether the owner tag belongs to the requested backend.
    #[must_use]
    pub fn matches_host(&self, host: Option<&str>) -> bool {
        match &self.backend_name {
            None => true,
            Some(name) => host.is_some_and(|h| backend_name_of(h) == name),
        }
    }

    /// Whether `volume` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, volume: &Volume) -> bool {
        let record = volume.record();
        self.volume_id
            .as_ref()
            .map_or(true, |id| record.text("id") == Some(id.as_str()))
            && self
                .volume_name
                .as_deref()
                .map_or(true, |name| record.text("display_name") == Some(name))
            && self.matches_host(record.text("host"))
    }
}

/// Exact-match predicates for snapshot reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotFilter {
    /// Snapshot identifier.
    pub snapshot_id: Option<EntityId>,
    /// Display name.
    pub snapshot_name: Option<String>,
    /// Parent volume identifier.
    pub volume_id: Option<EntityId>,
}

impl SnapshotFilter {
    /// A filter matching every snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one identifier.
    #[must_use]
    pub fn snapshot_id(mut self, id: impl Into<EntityId>) -> Self {
        self.snapshot_id = Some(id.into());
        self
    }

    /// Restricts to one display name.
    #[must_use]
    pub fn snapshot_name(mut self, name: impl Into<String>) -> Self {
        self.snapshot_name = Some(name.into());
        self
    }

    /// Restricts to snapshots of one volume.
    #[must_use]
    pub fn volume_id(mut self, id: impl Into<EntityId>) -> Self {
        self.volume_id = Some(id.into());
        self
    }

    /// Whether `snapshot` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        let record = snapshot.record();
        self.snapshot_id
            .as_ref()
            .map_or(true, |id| record.text("id") == Some(id.as_str()))
            && self
                .snapshot_name
                .as_deref()
                .map_or(true, |name| record.text("display_name") == Some(name))
            && self
                .volume_id
                .as_ref()
                .map_or(true, |id| record.text("volume_id") == Some(id.as_str()))
    }
}

/// Exact-match predicates for connection reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionFilter {
    /// Connection identifier.
    pub connection_id: Option<EntityId>,
    /// Attached volume identifier.
    pub volume_id: Option<EntityId>,
}

impl ConnectionFilter {
    /// A filter matching every connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one identifier.
    #[must_use]
    pub fn connection_id(mut self, id: impl Into<EntityId>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    /// Restricts to connections of one volume.
    #[must_use]
    pub fn volume_id(mut self, id: impl Into<EntityId>) -> Self {
        self.volume_id = Some(id.into());
        self
    }

    /// Whether `connection` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, connection: &Connection) -> bool {
        let record = connection.record();
        self.connection_id
            .as_ref()
            .map_or(true, |id| record.text("id") == Some(id.as_str()))
            && self
                .volume_id
                .as_ref()
                .map_or(true, |id| record.text("volume_id") == Some(id.as_str()))
    }
}

/// Contract every persistence backend implements.
///
/// `set_*` upserts: the backend decides between create and update from the
/// entity's pending fields. `delete_*` is soft or hard depending on how the
/// backend was configured.
pub trait PersistenceDriver: Send + Sync {
    /// Short backend name used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Volumes matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors. An empty result is not an error.
    fn get_volumes(&self, filter: &VolumeFilter) -> CoreResult<Vec<Volume>>;

    /// Snapshots matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn get_snapshots(&self, filter: &SnapshotFilter) -> CoreResult<Vec<Snapshot>>;

    /// Connections matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn get_connections(&self, filter: &ConnectionFilter) -> CoreResult<Vec<Connection>>;

    /// Key/value pairs, all of them or the one with `key`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn get_key_values(&self, key: Option<&str>) -> CoreResult<Vec<KeyValue>>;

    /// Creates or updates a volume with its classification.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn set_volume(&self, volume: &Volume) -> CoreResult<()>;

    /// Creates or updates a snapshot.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn set_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()>;

    /// Creates or updates a connection.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn set_connection(&self, connection: &Connection) -> CoreResult<()>;

    /// Creates or replaces a key/value pair.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn set_key_value(&self, key_value: &KeyValue) -> CoreResult<()>;

    /// Deletes a volume and the rows it exclusively owns.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn delete_volume(&self, volume: &Volume) -> CoreResult<()>;

    /// Deletes a snapshot.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn delete_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()>;

    /// Deletes a connection.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn delete_connection(&self, connection: &Connection) -> CoreResult<()>;

    /// Deletes a key/value pair.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn delete_key_value(&self, key_value: &KeyValue) -> CoreResult<()>;

    /// Classification with identifier `id`.
    ///
    /// Classifications are scoped to their volume, so the default looks the
    /// volume up and returns its classification if one is loaded.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn volume_type_get(&self, id: &str) -> CoreResult<Option<VolumeType>> {
        Ok(self
            .get_volumes(&VolumeFilter::new().volume_id(id))?
            .first()
            .and_then(Volume::loaded_volume_type))
    }

    /// QoS specification with identifier `id`.
    ///
    /// # Errors
    ///
    /// Propagates backend errors.
    fn qos_specs_get(&self, id: &str) -> CoreResult<Option<QosSpecs>> {
        Ok(self
            .get_volumes(&VolumeFilter::new().volume_id(id))?
            .first()
            .and_then(Volume::loaded_volume_type)
            .and_then(|volume_type| volume_type.qos_specs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{SnapshotSpec, VolumeSpec};

    #[test]
    fn volume_filter_predicates() {
        let vol = Volume::new("node@fake2#pool", VolumeSpec::new(1).name("disk")).unwrap();
        assert!(VolumeFilter::new().matches(&vol));
        assert!(VolumeFilter::new().volume_name("disk").matches(&vol));
        assert!(VolumeFilter::new().backend_name("fake2").matches(&vol));
        assert!(!VolumeFilter::new().backend_name("fake").matches(&vol));
        assert!(VolumeFilter::new().volume_id(vol.id()).matches(&vol));
        assert!(!VolumeFilter::new()
            .volume_id(vol.id())
            .volume_name("other")
            .matches(&vol));
    }

    #[test]
    fn snapshot_filter_predicates() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let snap = Snapshot::new(&vol, SnapshotSpec::new().name("s1")).unwrap();
        assert!(SnapshotFilter::new().volume_id(vol.id()).matches(&snap));
        assert!(SnapshotFilter::new().snapshot_name("s1").matches(&snap));
        assert!(!SnapshotFilter::new().snapshot_id("fake-uuid").matches(&snap));
    }
}
