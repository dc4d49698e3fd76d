//! Runtime context tying a persistence driver to an in-flight registry.
//!
//! Nothing here is global: every [`Session`] owns its driver and registry,
//! so independent sessions can coexist in one process.

use crate::backend::{MemoryBackend, SqlBackend};
use crate::config::{PersistenceConfig, StorageKind};
use crate::driver::{ConnectionFilter, PersistenceDriver, SnapshotFilter, VolumeFilter};
use crate::entity::{Connection, Entity, KeyValue, Snapshot, Volume};
use crate::error::{CoreError, CoreResult};
use crate::inflight::InflightRegistry;
use crate::shim::DbShim;
use crate::transport::{self, AnyEntity, BackendDump, Transport};
use std::sync::Arc;
use tracing::{debug, info, warn};
use volstore_codec::Value;

/// A persistence driver plus the registry of volumes being created.
#[derive(Clone)]
pub struct Session {
    driver: Arc<dyn PersistenceDriver>,
    inflight: Arc<InflightRegistry>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("driver", &self.driver.name())
            .field("inflight", &self.inflight.len())
            .finish()
    }
}

impl Session {
    /// Opens the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a bad configuration and the
    /// relational backend's initialization errors.
    pub fn open(config: &PersistenceConfig) -> CoreResult<Self> {
        config.validate()?;
        let inflight = Arc::new(InflightRegistry::new());
        let driver: Arc<dyn PersistenceDriver> = match config.storage {
            StorageKind::Memory => Arc::new(MemoryBackend::new()),
            StorageKind::Db | StorageKind::MemoryDb => {
                Arc::new(SqlBackend::open(config, Arc::clone(&inflight))?)
            }
        };
        info!(storage = config.storage.name(), driver = driver.name(), "session opened");
        Ok(Self { driver, inflight })
    }

    /// Session over a fresh memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_driver(Arc::new(MemoryBackend::new()))
    }

    /// Session over an existing driver with its own registry.
    pub fn with_driver(driver: Arc<dyn PersistenceDriver>) -> Self {
        Self {
            driver,
            inflight: Arc::new(InflightRegistry::new()),
        }
    }

    /// The persistence driver.
    #[must_use]
    pub fn driver(&self) -> &dyn PersistenceDriver {
        self.driver.as_ref()
    }

    /// The in-flight registry.
    #[must_use]
    pub fn inflight(&self) -> &Arc<InflightRegistry> {
        &self.inflight
    }

    /// Record access for the storage-driver engine.
    #[must_use]
    pub fn db(&self) -> DbShim {
        DbShim::new(Arc::clone(&self.driver), Arc::clone(&self.inflight))
    }

    /// Creates `volume`, running `provision` while it is in flight.
    ///
    /// The volume is persisted as `creating`, provisioned, then persisted
    /// again as `available`, or as `error` if provisioning fails. During
    /// the call lookups through [`Session::db`] resolve the volume before
    /// it is stored.
    ///
    /// # Errors
    ///
    /// Returns the provisioning error after recording the `error` status,
    /// and propagates driver errors.
    pub fn create_volume<F>(&self, volume: &Volume, provision: F) -> CoreResult<()>
    where
        F: FnOnce(&Volume) -> CoreResult<()>,
    {
        let _guard = self.inflight.register(volume);
        volume.set_status("creating")?;
        self.driver.set_volume(volume)?;

        match provision(volume) {
            Ok(()) => {
                volume.set_status("available")?;
                self.driver.set_volume(volume)?;
                debug!(volume_id = %volume.id(), "volume created");
                Ok(())
            }
            Err(err) => {
                warn!(volume_id = %volume.id(), error = %err, "volume provisioning failed");
                volume.set_status("error")?;
                self.driver.set_volume(volume)?;
                Err(err)
            }
        }
    }

    /// Volumes matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn volumes(&self, filter: &VolumeFilter) -> CoreResult<Vec<Volume>> {
        self.driver.get_volumes(filter)
    }

    /// Snapshots matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn snapshots(&self, filter: &SnapshotFilter) -> CoreResult<Vec<Snapshot>> {
        self.driver.get_snapshots(filter)
    }

    /// Connections matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn connections(&self, filter: &ConnectionFilter) -> CoreResult<Vec<Connection>> {
        self.driver.get_connections(filter)
    }

    /// Key/value pairs, all or the one with `key`.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn key_values(&self, key: Option<&str>) -> CoreResult<Vec<KeyValue>> {
        self.driver.get_key_values(key)
    }

    /// Persists a volume.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn save_volume(&self, volume: &Volume) -> CoreResult<()> {
        self.driver.set_volume(volume)
    }

    /// Persists a snapshot.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        self.driver.set_snapshot(snapshot)
    }

    /// Persists a connection.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn save_connection(&self, connection: &Connection) -> CoreResult<()> {
        self.driver.set_connection(connection)
    }

    /// Persists a key/value pair.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn save_key_value(&self, key_value: &KeyValue) -> CoreResult<()> {
        self.driver.set_key_value(key_value)
    }

    /// Deletes a volume.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn delete_volume(&self, volume: &Volume) -> CoreResult<()> {
        self.driver.delete_volume(volume)
    }

    /// Deletes a snapshot and drops it from its volume's loaded list.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn delete_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        self.driver.delete_snapshot(snapshot)?;
        if let Some(volume) = snapshot.loaded_volume() {
            volume.forget_snapshot(&snapshot.id());
        }
        Ok(())
    }

    /// Deletes a connection and drops it from its volume's loaded list.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn delete_connection(&self, connection: &Connection) -> CoreResult<()> {
        self.driver.delete_connection(connection)?;
        if let Some(volume) = connection.loaded_volume() {
            volume.forget_connection(&connection.id());
        }
        Ok(())
    }

    /// Deletes a key/value pair.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn delete_key_value(&self, key_value: &KeyValue) -> CoreResult<()> {
        self.driver.delete_key_value(key_value)
    }

    /// Rebuilds an entity from a transport document, persisting it and its
    /// embedded children when `save` is set.
    ///
    /// Classifications and QoS specifications are stored with their
    /// volume, so `save` has no effect on them.
    ///
    /// # Errors
    ///
    /// Returns the transport decoding errors and propagates driver errors.
    pub fn load(&self, value: Value, save: bool) -> CoreResult<AnyEntity> {
        let entity = transport::load(value)?;
        if save {
            match &entity {
                AnyEntity::Volume(volume) => self.save_volume_tree(volume)?,
                AnyEntity::Snapshot(snapshot) => self.driver.set_snapshot(snapshot)?,
                AnyEntity::Connection(connection) => self.driver.set_connection(connection)?,
                AnyEntity::KeyValue(key_value) => self.driver.set_key_value(key_value)?,
                AnyEntity::VolumeType(_) | AnyEntity::QosSpecs(_) => {}
            }
        }
        Ok(entity)
    }

    /// Rebuilds a volume from a transport document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFieldValue` if the document is not a volume, the
    /// transport decoding errors otherwise, and propagates driver errors.
    pub fn load_volume(&self, value: Value, save: bool) -> CoreResult<Volume> {
        let volume = Volume::from_transport(value)?;
        if save {
            self.save_volume_tree(&volume)?;
        }
        Ok(volume)
    }

    fn save_volume_tree(&self, volume: &Volume) -> CoreResult<()> {
        self.driver.set_volume(volume)?;
        for snapshot in volume.loaded_snapshots().unwrap_or_default() {
            self.driver.set_snapshot(&snapshot)?;
        }
        for connection in volume.loaded_connections().unwrap_or_default() {
            self.driver.set_connection(&connection)?;
        }
        Ok(())
    }

    /// Every volume of `backend_name` (or of all backends) with its
    /// snapshots and connections loaded.
    ///
    /// # Errors
    ///
    /// Propagates driver errors.
    pub fn dump(&self, backend_name: Option<&str>) -> CoreResult<BackendDump> {
        let mut filter = VolumeFilter::new();
        if let Some(name) = backend_name {
            filter = filter.backend_name(name);
        }
        let volumes = self.driver.get_volumes(&filter)?;
        for volume in &volumes {
            volume.snapshots(self.driver())?;
            volume.connections(self.driver())?;
        }
        debug!(volumes = volumes.len(), "dumped backend");
        Ok(BackendDump {
            backend_name: backend_name.map(str::to_string),
            volumes,
        })
    }

    /// Reads a `Backend` document, persisting every volume tree when
    /// `save` is set.
    ///
    /// # Errors
    ///
    /// Returns the transport decoding errors and propagates driver errors.
    pub fn load_dump(&self, value: Value, save: bool) -> CoreResult<BackendDump> {
        let dump = BackendDump::from_transport(value)?;
        if save {
            for volume in &dump.volumes {
                self.save_volume_tree(volume)?;
            }
            info!(volumes = dump.volumes.len(), "imported backend dump");
        }
        Ok(dump)
    }

    /// Rejects a document whose class is not the one expected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` naming both classes.
    pub fn expect_class(value: &Value, class: &str) -> CoreResult<()> {
        match volstore_codec::class_of(value) {
            Ok(found) if found == class => Ok(()),
            Ok(found) => Err(CoreError::invalid_configuration(format!(
                "expected a {class} document, found {found}"
            ))),
            Err(err) => Err(err.into()),
        }
    }
}
