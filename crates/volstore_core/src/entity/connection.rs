//! Connection (attachment) entity.

use super::relation::ParentLink;
use super::{now, Entity, EntityId, EntityKind, Record, Volume};
use crate::driver::{PersistenceDriver, VolumeFilter};
use crate::error::{CoreError, CoreResult};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::Arc;
use volstore_codec::{Map, Value};

#[derive(Debug)]
struct ConnectionState {
    record: Record,
    volume: ParentLink,
}

/// An attachment of a volume to a consumer host.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<RwLock<ConnectionState>>,
}

impl Connection {
    /// Creates a new connection of `volume`.
    ///
    /// `connector` describes the consumer host; its `host` and `instance`
    /// entries fill `attached_host` and `instance_uuid`.
    ///
    /// # Errors
    ///
    /// Field writes are validated against the schema.
    pub fn new(volume: &Volume, connector: Map, connection_info: Map) -> CoreResult<Self> {
        let attached_host = connector.get("host").and_then(Value::as_text).map(str::to_string);
        let instance = connector
            .get("instance")
            .and_then(Value::as_text)
            .map(str::to_string);
        let mode = connector
            .get("mode")
            .and_then(Value::as_text)
            .unwrap_or("rw")
            .to_string();

        let mut record = Record::constructed(EntityKind::Connection);
        record.set("id", EntityId::new().as_str())?;
        record.set("created_at", now())?;
        record.set("deleted", false)?;
        record.set("deleted_at", Value::Null)?;
        record.set("status", "attached")?;
        record.set("volume_id", volume.id().as_str())?;
        record.set("attach_mode", mode)?;
        record.set("attached_host", attached_host)?;
        record.set("instance_uuid", instance)?;
        record.set("connector", connector)?;
        record.set("connection_info", connection_info)?;

        let connection = Self::from_record(record);
        let link = if volume.push_connection(&connection) {
            ParentLink::Weak(volume.downgrade())
        } else {
            ParentLink::Owned(volume.clone())
        };
        connection.set_parent(link);
        Ok(connection)
    }

    pub(crate) fn from_record(record: Record) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ConnectionState {
                record,
                volume: ParentLink::Unloaded,
            })),
        }
    }

    pub(crate) fn set_parent(&self, link: ParentLink) {
        self.inner.write().volume = link;
    }

    /// Identifier of the attached volume.
    #[must_use]
    pub fn volume_id(&self) -> Option<EntityId> {
        self.record().text("volume_id").map(EntityId::from)
    }

    /// Consumer host description.
    #[must_use]
    pub fn connector(&self) -> Map {
        self.record().map("connector").cloned().unwrap_or_default()
    }

    /// Transport details returned by the storage driver.
    #[must_use]
    pub fn connection_info(&self) -> Map {
        self.record()
            .map("connection_info")
            .cloned()
            .unwrap_or_default()
    }

    /// Host the volume is attached to.
    #[must_use]
    pub fn attached_host(&self) -> Option<String> {
        self.record().text("attached_host").map(str::to_string)
    }

    /// Attached volume, loading it through `driver` on first access.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the volume does not exist.
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

    /// Attached volume if already resolved.
    #[must_use]
    pub fn loaded_volume(&self) -> Option<Volume> {
        self.inner.read().volume.resolve()
    }
}

impl Entity for Connection {
    const KIND: EntityKind = EntityKind::Connection;

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

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("record", &*self.record())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::VolumeSpec;

    #[test]
    fn new_connection_reads_connector() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let connector = Map::from([
            ("host".to_string(), Value::from("compute-1")),
            ("multipath".to_string(), Value::from(false)),
        ]);
        let info = Map::from([("driver_volume_type".to_string(), Value::from("iscsi"))]);
        let conn = Connection::new(&vol, connector.clone(), info.clone()).unwrap();
        assert_eq!(conn.attached_host().as_deref(), Some("compute-1"));
        assert_eq!(conn.connector(), connector);
        assert_eq!(conn.connection_info(), info);
        assert_eq!(conn.record().text("attach_mode"), Some("rw"));
        assert_eq!(conn.volume_id(), Some(vol.id()));
        assert_eq!(vol.loaded_connections().unwrap().len(), 1);
    }
}
