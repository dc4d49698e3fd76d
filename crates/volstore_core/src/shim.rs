//! Record access for the external storage-driver engine.
//!
//! The engine reads and writes volume records through a small, fixed set of
//! calls. [`DriverDb`] declares all of them; [`DbShim`] answers them from a
//! persistence driver, consulting the in-flight registry first so a volume
//! that is still being created can already be resolved.

use crate::driver::{ConnectionFilter, PersistenceDriver, SnapshotFilter, VolumeFilter};
use crate::entity::{
    backend_name_of, Connection, Entity, EntityKind, QosSpecs, Snapshot, Volume, VolumeType,
};
use crate::error::{CoreError, CoreResult};
use crate::inflight::InflightRegistry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Record kinds the engine can request by identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Volume records.
    Volume,
    /// Snapshot records.
    Snapshot,
    /// Classification records.
    VolumeType,
    /// QoS records.
    QosSpecs,
    /// Attachment records.
    VolumeAttachment,
}

/// A record returned by [`DriverDb::get_by_id`].
#[derive(Debug, Clone)]
pub enum ModelRecord {
    /// A volume.
    Volume(Volume),
    /// A snapshot.
    Snapshot(Snapshot),
    /// A classification.
    VolumeType(VolumeType),
    /// A QoS specification.
    QosSpecs(QosSpecs),
    /// An attachment.
    VolumeAttachment(Connection),
}

/// Every record operation the storage-driver engine performs.
///
/// Single-record lookups fail with `NotFound` when the record is absent.
pub trait DriverDb: Send + Sync {
    /// Volume by identifier.
    fn volume_get(&self, volume_id: &str) -> CoreResult<Volume>;

    /// Snapshot by identifier.
    fn snapshot_get(&self, snapshot_id: &str) -> CoreResult<Snapshot>;

    /// Classification of the volume with `id`.
    fn volume_type_get(&self, id: &str) -> CoreResult<VolumeType>;

    /// QoS specification of the volume with `id`, if it has one.
    fn qos_specs_get(&self, id: &str) -> CoreResult<Option<QosSpecs>>;

    /// Any record kind by identifier.
    fn get_by_id(&self, model: Model, id: &str) -> CoreResult<ModelRecord>;

    /// Volumes of the backend named in `host`, which may carry a node and
    /// a pool.
    fn volume_get_all_by_host(&self, host: &str) -> CoreResult<Vec<Volume>>;

    /// Attachments of a volume.
    fn connections_get_all_by_volume_id(&self, volume_id: &str) -> CoreResult<Vec<Connection>>;

    /// Admin metadata of a volume.
    fn volume_admin_metadata_get(&self, volume_id: &str) -> CoreResult<BTreeMap<String, String>>;

    /// Merges `metadata` into a volume's admin metadata.
    ///
    /// With `delete`, keys absent from `metadata` are removed. New keys are
    /// written when `add` is set and existing keys when `update` is set.
    fn volume_admin_metadata_update(
        &self,
        volume_id: &str,
        metadata: &BTreeMap<String, String>,
        delete: bool,
        add: bool,
        update: bool,
    ) -> CoreResult<()>;

    /// Removes one admin metadata key.
    fn volume_admin_metadata_delete(&self, volume_id: &str, key: &str) -> CoreResult<()>;

    /// Image cache entry for a volume. There is no image cache.
    fn image_volume_cache_get_by_volume_id(&self, volume_id: &str) -> CoreResult<Option<Volume>>;
}

/// [`DriverDb`] over a persistence driver and an in-flight registry.
#[derive(Clone)]
pub struct DbShim {
    driver: Arc<dyn PersistenceDriver>,
    inflight: Arc<InflightRegistry>,
}

impl std::fmt::Debug for DbShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbShim")
            .field("driver", &self.driver.name())
            .field("inflight", &self.inflight.len())
            .finish()
    }
}

impl DbShim {
    /// Creates a shim.
    pub fn new(driver: Arc<dyn PersistenceDriver>, inflight: Arc<InflightRegistry>) -> Self {
        Self { driver, inflight }
    }

    /// Resolves a volume and reports whether it is still in flight.
    fn lookup_volume(&self, volume_id: &str) -> CoreResult<(bool, Volume)> {
        if let Some(volume) = self.inflight.get(volume_id) {
            return Ok((true, volume));
        }
        let volume = self
            .driver
            .get_volumes(&VolumeFilter::new().volume_id(volume_id))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found(EntityKind::Volume, volume_id))?;
        Ok((false, volume))
    }

    fn store_admin_metadata(
        &self,
        in_flight: bool,
        volume: &Volume,
        metadata: &BTreeMap<String, String>,
    ) -> CoreResult<()> {
        volume.set_admin_metadata(metadata)?;
        if in_flight {
            debug!(volume_id = %volume.id(), "admin metadata changed on in-flight volume");
            return Ok(());
        }
        self.driver.set_volume(volume)
    }
}

impl DriverDb for DbShim {
    fn volume_get(&self, volume_id: &str) -> CoreResult<Volume> {
        self.lookup_volume(volume_id).map(|(_, volume)| volume)
    }

    fn snapshot_get(&self, snapshot_id: &str) -> CoreResult<Snapshot> {
        self.driver
            .get_snapshots(&SnapshotFilter::new().snapshot_id(snapshot_id))?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::not_found(EntityKind::Snapshot, snapshot_id))
    }

    fn volume_type_get(&self, id: &str) -> CoreResult<VolumeType> {
        if let Some(volume_type) = self.inflight.get(id).and_then(|v| v.loaded_volume_type()) {
            return Ok(volume_type);
        }
        self.driver
            .volume_type_get(id)?
            .ok_or_else(|| CoreError::not_found(EntityKind::VolumeType, id))
    }

    fn qos_specs_get(&self, id: &str) -> CoreResult<Option<QosSpecs>> {
        if let Some(volume_type) = self.inflight.get(id).and_then(|v| v.loaded_volume_type()) {
            return Ok(volume_type.qos_specs());
        }
        if let Some(qos) = self.driver.qos_specs_get(id)? {
            return Ok(Some(qos));
        }
        // No QoS row: distinguish a volume without limits from no volume.
        self.volume_type_get(id).map(|volume_type| volume_type.qos_specs())
    }

    fn get_by_id(&self, model: Model, id: &str) -> CoreResult<ModelRecord> {
        Ok(match model {
            Model::Volume => ModelRecord::Volume(self.volume_get(id)?),
            Model::Snapshot => ModelRecord::Snapshot(self.snapshot_get(id)?),
            Model::VolumeType => ModelRecord::VolumeType(self.volume_type_get(id)?),
            Model::QosSpecs => ModelRecord::QosSpecs(
                self.qos_specs_get(id)?
                    .ok_or_else(|| CoreError::not_found(EntityKind::QosSpecs, id))?,
            ),
            Model::VolumeAttachment => ModelRecord::VolumeAttachment(
                self.driver
                    .get_connections(&ConnectionFilter::new().connection_id(id))?
                    .into_iter()
                    .next()
                    .ok_or_else(|| CoreError::not_found(EntityKind::Connection, id))?,
            ),
        })
    }

    fn volume_get_all_by_host(&self, host: &str) -> CoreResult<Vec<Volume>> {
        self.driver
            .get_volumes(&VolumeFilter::new().backend_name(backend_name_of(host)))
    }

    fn connections_get_all_by_volume_id(&self, volume_id: &str) -> CoreResult<Vec<Connection>> {
        self.driver
            .get_connections(&ConnectionFilter::new().volume_id(volume_id))
    }

    fn volume_admin_metadata_get(&self, volume_id: &str) -> CoreResult<BTreeMap<String, String>> {
        self.volume_get(volume_id).map(|volume| volume.admin_metadata())
    }

    fn volume_admin_metadata_update(
        &self,
        volume_id: &str,
        metadata: &BTreeMap<String, String>,
        delete: bool,
        add: bool,
        update: bool,
    ) -> CoreResult<()> {
        let (in_flight, volume) = self.lookup_volume(volume_id)?;
        let mut current = volume.admin_metadata();
        let mut changed = false;

        if delete {
            let before = current.len();
            current.retain(|key, _| metadata.contains_key(key));
            changed = current.len() != before;
        }
        for (key, value) in metadata {
            let present = current.contains_key(key);
            if (!present && add) || (present && update) {
                current.insert(key.clone(), value.clone());
                changed = true;
            }
        }

        if !changed {
            return Ok(());
        }
        self.store_admin_metadata(in_flight, &volume, &current)
    }

    fn volume_admin_metadata_delete(&self, volume_id: &str, key: &str) -> CoreResult<()> {
        let (in_flight, volume) = self.lookup_volume(volume_id)?;
        let mut current = volume.admin_metadata();
        if current.remove(key).is_none() {
            return Ok(());
        }
        self.store_admin_metadata(in_flight, &volume, &current)
    }

    fn image_volume_cache_get_by_volume_id(&self, _volume_id: &str) -> CoreResult<Option<Volume>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::{SnapshotSpec, VolumeSpec};

    fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn shim() -> (DbShim, Arc<dyn PersistenceDriver>, Arc<InflightRegistry>) {
        let driver: Arc<dyn PersistenceDriver> = Arc::new(MemoryBackend::new());
        let inflight = Arc::new(InflightRegistry::new());
        (
            DbShim::new(Arc::clone(&driver), Arc::clone(&inflight)),
            driver,
            inflight,
        )
    }

    fn stored_volume(driver: &Arc<dyn PersistenceDriver>, spec: VolumeSpec) -> Volume {
        let volume = Volume::new("node@lvm#pool", spec).unwrap();
        driver.set_volume(&volume).unwrap();
        volume
    }

    #[test]
    fn single_lookups_raise_not_found() {
        let (db, _, _) = shim();
        assert!(db.volume_get("missing").unwrap_err().is_not_found());
        assert!(db.snapshot_get("missing").unwrap_err().is_not_found());
        assert!(db.volume_type_get("missing").unwrap_err().is_not_found());
        assert!(db
            .get_by_id(Model::VolumeAttachment, "missing")
            .unwrap_err()
            .is_not_found());
        assert!(db.image_volume_cache_get_by_volume_id("x").unwrap().is_none());
    }

    #[test]
    fn get_by_id_dispatches() {
        let (db, driver, _) = shim();
        let volume = stored_volume(&driver, VolumeSpec::new(1));
        let snapshot = Snapshot::new(&volume, SnapshotSpec::new()).unwrap();
        driver.set_snapshot(&snapshot).unwrap();

        let id = volume.id();
        assert!(matches!(
            db.get_by_id(Model::Volume, id.as_str()).unwrap(),
            ModelRecord::Volume(v) if v.id() == id
        ));
        assert!(matches!(
            db.get_by_id(Model::Snapshot, snapshot.id().as_str()).unwrap(),
            ModelRecord::Snapshot(_)
        ));
        assert!(matches!(
            db.get_by_id(Model::VolumeType, id.as_str()).unwrap(),
            ModelRecord::VolumeType(vt) if vt.id() == id
        ));
        assert!(db
            .get_by_id(Model::QosSpecs, id.as_str())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn inflight_volumes_resolve_first() {
        let (db, _, inflight) = shim();
        let volume = Volume::new(
            "lvm",
            VolumeSpec::new(1).qos_specs(pairs(&[("read_iops_sec", "10")])),
        )
        .unwrap();
        let id = volume.id();
        {
            let _guard = inflight.register(&volume);
            assert!(db.volume_get(id.as_str()).unwrap().same_entity(&volume));
            let qos = db.qos_specs_get(id.as_str()).unwrap().unwrap();
            assert_eq!(qos.specs(), pairs(&[("read_iops_sec", "10")]));
        }
        assert!(db.volume_get(id.as_str()).is_err());
    }

    #[test]
    fn all_by_host_uses_backend_name() {
        let (db, driver, _) = shim();
        stored_volume(&driver, VolumeSpec::new(1));
        let other = Volume::new("node@fake2", VolumeSpec::new(3)).unwrap();
        driver.set_volume(&other).unwrap();

        assert_eq!(db.volume_get_all_by_host("other@lvm").unwrap().len(), 1);
        assert_eq!(db.volume_get_all_by_host("node@lvm#pool").unwrap().len(), 1);
        let found = db.volume_get_all_by_host("node@fake2").unwrap();
        assert!(found[0].same_entity(&other));
    }

    #[test]
    fn admin_metadata_merge() {
        let (db, driver, _) = shim();
        let volume = stored_volume(
            &driver,
            VolumeSpec::new(1).admin_metadata(pairs(&[("k", "v"), ("k2", "v2")])),
        );
        let id = volume.id();
        let incoming = pairs(&[("k2", "v2.1"), ("k3", "v3")]);

        db.volume_admin_metadata_update(id.as_str(), &incoming, false, false, false)
            .unwrap();
        assert_eq!(
            db.volume_admin_metadata_get(id.as_str()).unwrap(),
            pairs(&[("k", "v"), ("k2", "v2")])
        );

        db.volume_admin_metadata_update(id.as_str(), &incoming, true, true, true)
            .unwrap();
        assert_eq!(db.volume_admin_metadata_get(id.as_str()).unwrap(), incoming);

        db.volume_admin_metadata_delete(id.as_str(), "k2").unwrap();
        db.volume_admin_metadata_delete(id.as_str(), "absent").unwrap();
        assert_eq!(
            db.volume_admin_metadata_get(id.as_str()).unwrap(),
            pairs(&[("k3", "v3")])
        );
    }

    #[test]
    fn admin_metadata_on_inflight_volume_is_not_persisted() {
        let (db, driver, inflight) = shim();
        let volume = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let id = volume.id();
        let _guard = inflight.register(&volume);
        db.volume_admin_metadata_update(id.as_str(), &pairs(&[("a", "1")]), false, true, true)
            .unwrap();
        assert_eq!(volume.admin_metadata(), pairs(&[("a", "1")]));
        assert!(volume.changed_fields().contains("admin_metadata"));
        assert!(driver
            .get_volumes(&VolumeFilter::new().volume_id(id))
            .unwrap()
            .is_empty());
    }
}
