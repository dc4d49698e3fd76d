//! Relational persistence backend over SQLite.
//!
//! Every public mutating call runs in one transaction. Volumes whose
//! classification carries no attributes and no QoS reference a shared
//! default classification row; the others get their own classification and
//! QoS rows keyed by the volume id. Reads always present the
//! classification scoped to the volume.

pub mod migrations;
mod rows;

use self::migrations::{MigrationManager, SchemaStatus};
use self::rows::{
    ATTACHMENTS, EXTRA_SPECS, QOS_SPECS, SNAPSHOTS, VOLUMES, VOLUME_ADMIN_METADATA,
    VOLUME_METADATA, VOLUME_TYPES,
};
use crate::config::{DatabaseLocation, PersistenceConfig};
use crate::driver::{ConnectionFilter, PersistenceDriver, SnapshotFilter, VolumeFilter};
use crate::entity::{
    now, Connection, Entity, EntityId, EntityKind, KeyValue, QosSpecs, Record, Snapshot, Volume,
    VolumeType,
};
use crate::error::{CoreError, CoreResult};
use crate::inflight::InflightRegistry;
use crate::tracker::{self, WriteSet};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, OptionalExtension, Transaction};
use std::sync::Arc;
use tracing::debug;
use volstore_codec::{format_timestamp, Value};

/// Features of the linked SQLite library, detected once at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `INSERT ... ON CONFLICT DO UPDATE` is available (SQLite 3.24+).
    pub upsert: bool,
}

impl Capabilities {
    /// Detects features of the linked library.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            upsert: rusqlite::version_number() >= 3_024_000,
        }
    }
}

/// Persistence backend storing entities in SQLite tables.
pub struct SqlBackend {
    conn: Mutex<rusqlite::Connection>,
    location: DatabaseLocation,
    soft_deletes: bool,
    default_type_id: EntityId,
    capabilities: Capabilities,
    schema: SchemaStatus,
    inflight: Arc<InflightRegistry>,
}

impl std::fmt::Debug for SqlBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend")
            .field("location", &self.location)
            .field("soft_deletes", &self.soft_deletes)
            .field("default_type_id", &self.default_type_id)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

impl SqlBackend {
    /// Opens the database named by `config` and brings its schema up to
    /// date.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for the memory storage kind or a bad
    /// connection string, `SchemaVersion` for an older schema with
    /// migrations disabled, and propagates database errors.
    pub fn open(config: &PersistenceConfig, inflight: Arc<InflightRegistry>) -> CoreResult<Self> {
        let location = config.validate()?.ok_or_else(|| {
            CoreError::invalid_configuration("the relational backend needs db or memory_db storage")
        })?;
        let mut conn = match &location {
            DatabaseLocation::Memory => rusqlite::Connection::open_in_memory()?,
            DatabaseLocation::File(path) => rusqlite::Connection::open(path)?,
        };
        let synchronous = if config.synchronous_writes { "FULL" } else { "OFF" };
        conn.pragma_update(None, "synchronous", synchronous)?;

        let schema = MigrationManager::standard().ensure(&mut conn, config.auto_migrate)?;
        let default_type_id = rows::ensure_default_type(&conn)?;
        let capabilities = Capabilities::detect();
        debug!(
            ?location,
            schema = schema.current(),
            upsert = capabilities.upsert,
            soft_deletes = config.soft_deletes,
            "opened relational backend"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            location,
            soft_deletes: config.soft_deletes,
            default_type_id,
            capabilities,
            schema,
            inflight,
        })
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn open_in_memory(inflight: Arc<InflightRegistry>) -> CoreResult<Self> {
        Self::open(&PersistenceConfig::memory_db(), inflight)
    }

    /// Where the database lives.
    #[must_use]
    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    /// Library features detected at open.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Schema versions seen and applied at open.
    #[must_use]
    pub fn schema(&self) -> &SchemaStatus {
        &self.schema
    }

    /// Whether deletes only flag rows.
    #[must_use]
    pub fn soft_deletes(&self) -> bool {
        self.soft_deletes
    }

    /// Identifier of the shared default classification row.
    #[must_use]
    pub fn default_type_id(&self) -> &EntityId {
        &self.default_type_id
    }

    /// Live row counts per table.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    pub fn table_counts(&self) -> CoreResult<Vec<(&'static str, i64)>> {
        self.read(|conn| {
            let mut counts = Vec::new();
            for table in [VOLUMES, SNAPSHOTS, ATTACHMENTS, VOLUME_TYPES, QOS_SPECS] {
                counts.push((table.name, table.count(conn)?));
            }
            let key_values: i64 =
                conn.query_row("SELECT COUNT(*) FROM key_value", [], |row| row.get(0))?;
            counts.push(("key_value", key_values));
            Ok(counts)
        })
    }

    fn read<R>(&self, f: impl FnOnce(&rusqlite::Connection) -> CoreResult<R>) -> CoreResult<R> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` in one transaction, committing only if it succeeds.
    fn write<R>(&self, f: impl FnOnce(&Transaction<'_>) -> CoreResult<R>) -> CoreResult<R> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn load_volumes(
        &self,
        conn: &rusqlite::Connection,
        filter: &VolumeFilter,
    ) -> CoreResult<Vec<Volume>> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(id) = &filter.volume_id {
            params.push(rows::text(id.as_str()));
            conditions.push(format!("id = ?{}", params.len()));
        }
        if let Some(name) = &filter.volume_name {
            params.push(rows::text(name));
            conditions.push(format!("display_name = ?{}", params.len()));
        }
        if let Some(backend) = &filter.backend_name {
            // LIKE narrows the scan; matches_host below applies the exact rule.
            let first = params.len() + 1;
            params.push(rows::text(backend));
            params.push(rows::text(&format!("%@{backend}")));
            params.push(rows::text(&format!("{backend}#%")));
            params.push(rows::text(&format!("%@{backend}#%")));
            conditions.push(format!(
                "(host = ?{first} OR host LIKE ?{} OR host LIKE ?{} OR host LIKE ?{})",
                first + 1,
                first + 2,
                first + 3
            ));
        }

        let mut volumes = Vec::new();
        for (mut fields, extras) in VOLUMES.select(conn, &["volume_type_id"], &conditions, &params)? {
            let host = field_text(&fields, "host");
            if !filter.matches_host(host.as_deref()) {
                continue;
            }
            let id = EntityId::from(field_text(&fields, "id").unwrap_or_default());
            let created_at = fields
                .iter()
                .find(|(name, _)| *name == "created_at")
                .map_or(Value::Null, |(_, v)| v.clone());
            let metadata = VOLUME_METADATA.read(conn, id.as_str())?;
            let admin_metadata = VOLUME_ADMIN_METADATA.read(conn, id.as_str())?;
            fields.push(("metadata", Value::from_string_map(&metadata)));
            fields.push(("admin_metadata", Value::from_string_map(&admin_metadata)));
            let record = Record::synchronized(EntityKind::Volume, fields)?;

            let type_id = match extras.into_iter().next() {
                Some(SqlValue::Text(type_id)) => Some(type_id),
                _ => None,
            };
            let custom = match type_id {
                Some(type_id) if type_id != self.default_type_id.as_str() => {
                    rows::load_volume_type(conn, &type_id)?
                }
                _ => None,
            };
            let volume_type = match custom {
                Some(volume_type) => volume_type,
                None => VolumeType::default_for(&id, created_at)?,
            };
            volumes.push(Volume::from_parts(record, volume_type));
        }
        Ok(volumes)
    }

    /// Writes classification rows as needed and returns the value for the
    /// volume's `volume_type_id` column when it has to be set.
    fn store_classification(
        &self,
        tx: &Transaction<'_>,
        volume: &Volume,
        set: &WriteSet,
    ) -> CoreResult<Option<String>> {
        let volume_id = volume.id();
        let has_row = VOLUME_TYPES.exists(tx, volume_id.as_str())?;
        let default_id = Some(self.default_type_id.to_string());

        // An unloaded classification never carries pending attributes.
        let volume_type = match volume.loaded_volume_type() {
            Some(volume_type) if set.extra_specs.is_some() || set.qos_specs.is_some() => {
                volume_type
            }
            _ => {
                return Ok(if set.is_create() && !has_row {
                    default_id
                } else {
                    None
                })
            }
        };
        let qos = volume_type.qos_specs();

        let wants_custom =
            set.extra_specs.as_ref().is_some_and(|s| !s.is_empty()) || qos.is_some();
        if volume_type.id() != volume_id {
            if wants_custom {
                return Err(CoreError::classification_update(
                    volume_type.id().as_str(),
                    format!("attributes can only be stored on the classification of volume {volume_id}"),
                ));
            }
            return Ok(default_id);
        }
        if !has_row && !wants_custom {
            return Ok(default_id);
        }

        if has_row && VOLUME_TYPES.revive(tx, volume_id.as_str())? > 0 {
            debug!(volume_type_id = %volume_id, "reviving deleted volume type");
            let qos_id = Value::from(qos.as_ref().map(|q| q.id().to_string()));
            VOLUME_TYPES.update(
                tx,
                volume_id.as_str(),
                &[("qos_specs_id", rows::to_sql(&qos_id)?)],
            )?;
        }
        if !has_row {
            debug!(volume_type_id = %volume_id, "creating volume type");
            let values = VOLUME_TYPES.pairs(&volume_type.fields())?;
            VOLUME_TYPES.insert(tx, volume_id.as_str(), &values)?;
        }
        if let Some(extra_specs) = &set.extra_specs {
            debug!(volume_type_id = %volume_id, "replacing extra specs");
            EXTRA_SPECS.replace(tx, volume_id.as_str(), extra_specs)?;
        }
        if let Some(qos) = qos.filter(|_| set.qos_specs.is_some() || !has_row) {
            self.store_qos(tx, &qos)?;
            VOLUME_TYPES.update(
                tx,
                volume_id.as_str(),
                &[("qos_specs_id", rows::text(qos.id().as_str()))],
            )?;
        }
        Ok(Some(volume_id.to_string()))
    }

    fn store_qos(&self, tx: &Transaction<'_>, qos: &QosSpecs) -> CoreResult<()> {
        let qos_id = qos.id();
        if QOS_SPECS.exists(tx, qos_id.as_str())? {
            debug!(qos_specs_id = %qos_id, "replacing qos specs");
            let specs = Value::from_string_map(&qos.specs());
            QOS_SPECS.update(tx, qos_id.as_str(), &[("specs", rows::to_sql(&specs)?)])?;
            QOS_SPECS.revive(tx, qos_id.as_str())?;
        } else {
            debug!(qos_specs_id = %qos_id, "creating qos specs");
            let values = QOS_SPECS.pairs(&qos.fields())?;
            QOS_SPECS.insert(tx, qos_id.as_str(), &values)?;
        }
        Ok(())
    }

    fn store_volume(&self, tx: &Transaction<'_>, volume: &Volume, set: &mut WriteSet) -> CoreResult<()> {
        let id = volume.id();
        let type_id = self.store_classification(tx, volume, set)?;
        let mut created = false;

        tracker::persist_with_retry(
            EntityKind::Volume,
            set,
            |s| {
                debug!(volume_id = %id, fields = ?s.field_names(), "set_volume creating");
                let mut values = VOLUMES.pairs(&s.fields)?;
                if let Some(type_id) = &type_id {
                    values.push(("volume_type_id", rows::text(type_id)));
                }
                VOLUMES.insert(tx, id.as_str(), &values)?;
                created = true;
                Ok(())
            },
            |s| {
                debug!(volume_id = %id, fields = ?s.field_names(), "set_volume updating");
                let values = VOLUMES.pairs(&s.fields)?;
                VOLUMES.update(tx, id.as_str(), &values)?;
                Ok(())
            },
        )?;

        if let (false, Some(type_id)) = (created, &type_id) {
            VOLUMES.update(tx, id.as_str(), &[("volume_type_id", rows::text(type_id))])?;
        }
        if let Some(metadata) = set.fields.get("metadata") {
            let entries = metadata.to_string_map().unwrap_or_default();
            VOLUME_METADATA.replace(tx, id.as_str(), &entries)?;
        }
        if let Some(metadata) = set.fields.get("admin_metadata") {
            let entries = metadata.to_string_map().unwrap_or_default();
            VOLUME_ADMIN_METADATA.replace(tx, id.as_str(), &entries)?;
        }
        Ok(())
    }

    fn store_child<E: Entity>(
        &self,
        table: rows::TableDef,
        entity: &E,
        label: &'static str,
    ) -> CoreResult<()> {
        let mut set = WriteSet::for_entity(entity);
        let id = entity.id();
        if set.is_empty() {
            debug!(%id, "{label}: nothing changed");
            return Ok(());
        }
        self.write(|tx| {
            tracker::persist_with_retry(
                table.kind,
                &mut set,
                |s| {
                    debug!(%id, fields = ?s.field_names(), "{label} creating");
                    table.insert(tx, id.as_str(), &table.pairs(&s.fields)?)
                },
                |s| {
                    debug!(%id, fields = ?s.field_names(), "{label} updating");
                    table.update(tx, id.as_str(), &table.pairs(&s.fields)?)?;
                    Ok(())
                },
            )
        })?;
        tracker::finish_persist(entity, &set);
        Ok(())
    }

    fn delete_child<E: Entity>(&self, table: rows::TableDef, entity: &E) -> CoreResult<()> {
        let id = entity.id();
        let at = now();
        let stamp = format_timestamp(&at);
        self.write(|tx| {
            if self.soft_deletes {
                debug!(kind = %table.kind, %id, "soft deleting");
                table.soft_delete(tx, id.as_str(), &stamp)?;
            } else {
                debug!(kind = %table.kind, %id, "hard deleting");
                table.hard_delete(tx, id.as_str())?;
            }
            Ok(())
        })?;
        tracker::mark_deleted(entity, at)
    }
}

fn field_text(fields: &[(&'static str, Value)], name: &str) -> Option<String> {
    fields
        .iter()
        .find(|(field, _)| *field == name)
        .and_then(|(_, value)| value.as_text())
        .map(str::to_string)
}

fn key_value_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyValue> {
    Ok(KeyValue {
        key: row.get(0)?,
        value: row.get(1)?,
    })
}

impl PersistenceDriver for SqlBackend {
    fn name(&self) -> &'static str {
        "db"
    }

    fn get_volumes(&self, filter: &VolumeFilter) -> CoreResult<Vec<Volume>> {
        self.read(|conn| self.load_volumes(conn, filter))
    }

    fn get_snapshots(&self, filter: &SnapshotFilter) -> CoreResult<Vec<Snapshot>> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for (column, value) in [
            ("id", filter.snapshot_id.as_ref().map(EntityId::as_str)),
            ("display_name", filter.snapshot_name.as_deref()),
            ("volume_id", filter.volume_id.as_ref().map(EntityId::as_str)),
        ] {
            if let Some(value) = value {
                params.push(rows::text(value));
                conditions.push(format!("{column} = ?{}", params.len()));
            }
        }
        self.read(|conn| {
            SNAPSHOTS
                .select(conn, &[], &conditions, &params)?
                .into_iter()
                .map(|(fields, _)| {
                    Ok(Snapshot::from_record(Record::synchronized(
                        EntityKind::Snapshot,
                        fields,
                    )?))
                })
                .collect()
        })
    }

    fn get_connections(&self, filter: &ConnectionFilter) -> CoreResult<Vec<Connection>> {
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for (column, value) in [
            ("id", filter.connection_id.as_ref().map(EntityId::as_str)),
            ("volume_id", filter.volume_id.as_ref().map(EntityId::as_str)),
        ] {
            if let Some(value) = value {
                params.push(rows::text(value));
                conditions.push(format!("{column} = ?{}", params.len()));
            }
        }
        self.read(|conn| {
            ATTACHMENTS
                .select(conn, &[], &conditions, &params)?
                .into_iter()
                .map(|(fields, _)| {
                    Ok(Connection::from_record(Record::synchronized(
                        EntityKind::Connection,
                        fields,
                    )?))
                })
                .collect()
        })
    }

    fn get_key_values(&self, key: Option<&str>) -> CoreResult<Vec<KeyValue>> {
        self.read(|conn| {
            let mut sql = String::from("SELECT key, value FROM key_value");
            if key.is_some() {
                sql.push_str(" WHERE key = ?1");
            }
            sql.push_str(" ORDER BY rowid");
            let mut stmt = conn.prepare(&sql)?;
            let rows = match key {
                Some(key) => stmt
                    .query_map([key], key_value_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt
                    .query_map([], key_value_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            };
            Ok(rows)
        })
    }

    fn set_volume(&self, volume: &Volume) -> CoreResult<()> {
        let mut set = WriteSet::for_volume(volume);
        if set.is_empty() {
            debug!(volume_id = %volume.id(), "set_volume: nothing changed");
            return Ok(());
        }
        self.write(|tx| self.store_volume(tx, volume, &mut set))?;
        tracker::finish_volume_persist(volume, &set);
        Ok(())
    }

    fn set_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        self.store_child(SNAPSHOTS, snapshot, "set_snapshot")
    }

    fn set_connection(&self, connection: &Connection) -> CoreResult<()> {
        self.store_child(ATTACHMENTS, connection, "set_connection")
    }

    fn set_key_value(&self, key_value: &KeyValue) -> CoreResult<()> {
        debug!(key = %key_value.key, upsert = self.capabilities.upsert, "set_key_value");
        self.write(|tx| {
            if self.capabilities.upsert {
                tx.execute(
                    "INSERT INTO key_value (key, value) VALUES (?1, ?2) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key_value.key, key_value.value],
                )?;
            } else {
                let updated = tx.execute(
                    "UPDATE key_value SET value = ?2 WHERE key = ?1",
                    params![key_value.key, key_value.value],
                )?;
                if updated == 0 {
                    tx.execute(
                        "INSERT INTO key_value (key, value) VALUES (?1, ?2)",
                        params![key_value.key, key_value.value],
                    )?;
                }
            }
            Ok(())
        })
    }

    fn delete_volume(&self, volume: &Volume) -> CoreResult<()> {
        let id = volume.id();
        let at = now();
        let stamp = format_timestamp(&at);
        self.write(|tx| {
            let type_id: Option<String> = tx
                .query_row(
                    "SELECT volume_type_id FROM volumes WHERE id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .flatten();
            let custom_type = type_id.filter(|t| t != self.default_type_id.as_str());
            let qos_id: Option<String> = match &custom_type {
                Some(type_id) => tx
                    .query_row(
                        "SELECT qos_specs_id FROM volume_types WHERE id = ?1",
                        [type_id.as_str()],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten(),
                None => None,
            };

            if self.soft_deletes {
                debug!(volume_id = %id, "soft deleting volume");
                VOLUMES.soft_delete(tx, id.as_str(), &stamp)?;
                if let Some(type_id) = &custom_type {
                    debug!(volume_type_id = %type_id, "soft deleting volume type");
                    VOLUME_TYPES.soft_delete(tx, type_id, &stamp)?;
                }
                if let Some(qos_id) = &qos_id {
                    QOS_SPECS.soft_delete(tx, qos_id, &stamp)?;
                }
            } else {
                debug!(volume_id = %id, "hard deleting volume");
                VOLUME_METADATA.clear(tx, id.as_str())?;
                VOLUME_ADMIN_METADATA.clear(tx, id.as_str())?;
                VOLUMES.hard_delete(tx, id.as_str())?;
                if let Some(type_id) = &custom_type {
                    debug!(volume_type_id = %type_id, "hard deleting volume type");
                    EXTRA_SPECS.clear(tx, type_id)?;
                    VOLUME_TYPES.hard_delete(tx, type_id)?;
                }
                if let Some(qos_id) = &qos_id {
                    QOS_SPECS.hard_delete(tx, qos_id)?;
                }
            }
            Ok(())
        })?;
        tracker::mark_deleted(volume, at)
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        self.delete_child(SNAPSHOTS, snapshot)
    }

    fn delete_connection(&self, connection: &Connection) -> CoreResult<()> {
        self.delete_child(ATTACHMENTS, connection)
    }

    fn delete_key_value(&self, key_value: &KeyValue) -> CoreResult<()> {
        debug!(key = %key_value.key, "delete_key_value");
        self.write(|tx| {
            tx.execute("DELETE FROM key_value WHERE key = ?1", [&key_value.key])?;
            Ok(())
        })
    }

    fn volume_type_get(&self, id: &str) -> CoreResult<Option<VolumeType>> {
        if let Some(volume_type) = self.inflight.get(id).and_then(|v| v.loaded_volume_type()) {
            return Ok(Some(volume_type));
        }
        self.read(|conn| {
            if let Some(volume_type) = rows::load_volume_type(conn, id)? {
                return Ok(Some(volume_type));
            }
            let volume = self.load_volumes(conn, &VolumeFilter::new().volume_id(id))?;
            Ok(volume.first().and_then(Volume::loaded_volume_type))
        })
    }

    fn qos_specs_get(&self, id: &str) -> CoreResult<Option<QosSpecs>> {
        if let Some(volume_type) = self.inflight.get(id).and_then(|v| v.loaded_volume_type()) {
            return Ok(volume_type.qos_specs());
        }
        self.read(|conn| rows::load_qos_specs(conn, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{SnapshotSpec, VolumeSpec};
    use crate::transport::Transport;
    use std::collections::BTreeMap;

    fn backend() -> SqlBackend {
        SqlBackend::open_in_memory(Arc::new(InflightRegistry::new())).unwrap()
    }

    fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn count(backend: &SqlBackend, table: &str) -> i64 {
        backend
            .read(|conn| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap()
    }

    #[test]
    fn sql_default_classification_is_shared() {
        let backend = backend();
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        backend.set_volume(&vol).unwrap();
        // Only the __DEFAULT__ row.
        assert_eq!(count(&backend, "volume_types"), 1);

        let loaded = backend
            .get_volumes(&VolumeFilter::new().volume_id(vol.id()))
            .unwrap();
        let vt = loaded[0].loaded_volume_type().unwrap();
        assert_eq!(vt.id(), vol.id());
        assert!(vt.extra_specs().is_empty());
    }

    #[test]
    fn sql_custom_classification_is_created_once() {
        let backend = backend();
        let vol = Volume::new(
            "lvm",
            VolumeSpec::new(1)
                .extra_specs(pairs(&[("k1", "v1")]))
                .qos_specs(pairs(&[("read_iops_sec", "100")])),
        )
        .unwrap();
        backend.set_volume(&vol).unwrap();
        vol.set("size", 2).unwrap();
        backend.set_volume(&vol).unwrap();
        assert_eq!(count(&backend, "volume_types"), 2);
        assert_eq!(count(&backend, "qos_specs"), 1);

        let loaded = backend
            .get_volumes(&VolumeFilter::new().volume_id(vol.id()))
            .unwrap();
        assert_eq!(loaded[0].size(), Some(2));
        assert_eq!(loaded[0].extra_specs(&backend).unwrap(), pairs(&[("k1", "v1")]));
        assert_eq!(loaded[0].volume_type(&backend).unwrap().id(), vol.id());
        let qos = loaded[0].qos_specs(&backend).unwrap().unwrap();
        assert_eq!(qos.specs(), pairs(&[("read_iops_sec", "100")]));
    }

    #[test]
    fn sql_classification_update_replaces_map() {
        let backend = backend();
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        backend.set_volume(&vol).unwrap();
        vol.set_extra_specs(&backend, &pairs(&[("a", "1"), ("b", "2")])).unwrap();
        backend.set_volume(&vol).unwrap();
        vol.set_extra_specs(&backend, &pairs(&[("b", "3")])).unwrap();
        backend.set_volume(&vol).unwrap();

        let loaded = backend
            .get_volumes(&VolumeFilter::new().volume_id(vol.id()))
            .unwrap();
        assert_eq!(loaded[0].extra_specs(&backend).unwrap(), pairs(&[("b", "3")]));
    }

    #[test]
    fn sql_foreign_classification_rejects_attributes() {
        let backend = backend();
        let doc = volstore_codec::from_json(
            r#"{"class":"Volume","id":"vol-1","size":1,"host":"lvm",
                "volume_type":{"class":"VolumeType","id":"gold","name":"gold"}}"#,
        )
        .unwrap();

        let plain = Volume::from_transport(doc.clone()).unwrap();
        backend.set_volume(&plain).unwrap();
        backend.delete_volume(&plain).unwrap();

        let vol = Volume::from_transport(doc).unwrap();
        vol.set_extra_specs(&backend, &pairs(&[("k1", "v1")])).unwrap();
        let err = backend.set_volume(&vol).unwrap_err();
        assert!(matches!(err, CoreError::ClassificationUpdate { ref id, .. } if id == "gold"));
        assert_eq!(count(&backend, "volumes"), 0);
        assert_eq!(count(&backend, "volume_type_extra_specs"), 0);
    }

    #[test]
    fn sql_second_persist_writes_nothing() {
        let backend = backend();
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        backend.set_volume(&vol).unwrap();
        assert!(WriteSet::for_volume(&vol).is_empty());
        backend.set_volume(&vol).unwrap();
        assert_eq!(count(&backend, "volumes"), 1);
    }

    #[test]
    fn sql_duplicate_create_becomes_update() {
        let backend = backend();
        let vol = Volume::new("lvm", VolumeSpec::new(1).id("vol-1")).unwrap();
        backend.set_volume(&vol).unwrap();
        let again = Volume::new("lvm", VolumeSpec::new(4).id("vol-1")).unwrap();
        backend.set_volume(&again).unwrap();
        let loaded = backend.get_volumes(&VolumeFilter::new()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].size(), Some(4));
    }

    #[test]
    fn sql_metadata_round_trip() {
        let backend = backend();
        let vol = Volume::new(
            "lvm",
            VolumeSpec::new(1)
                .metadata(pairs(&[("owner", "me")]))
                .admin_metadata(pairs(&[("readonly", "False")])),
        )
        .unwrap();
        backend.set_volume(&vol).unwrap();
        let loaded = backend.get_volumes(&VolumeFilter::new()).unwrap();
        assert_eq!(loaded[0].metadata(), pairs(&[("owner", "me")]));
        assert_eq!(loaded[0].admin_metadata(), pairs(&[("readonly", "False")]));
    }

    #[test]
    fn sql_host_filter_is_exact() {
        let backend = backend();
        for host in ["node@lvm#pool", "lvm", "node@lvm_2", "lvmx", "node@xlvm#p"] {
            backend
                .set_volume(&Volume::new(host, VolumeSpec::new(1)).unwrap())
                .unwrap();
        }
        let found = backend
            .get_volumes(&VolumeFilter::new().backend_name("lvm"))
            .unwrap();
        let hosts: Vec<_> = found.iter().filter_map(Volume::host).collect();
        assert_eq!(hosts, vec!["node@lvm#pool", "lvm"]);
    }

    #[test]
    fn sql_hard_delete_removes_owned_rows() {
        let backend = backend();
        let vol = Volume::new(
            "lvm",
            VolumeSpec::new(1)
                .extra_specs(pairs(&[("k", "v")]))
                .qos_specs(pairs(&[("q", "1")]))
                .metadata(pairs(&[("m", "1")])),
        )
        .unwrap();
        backend.set_volume(&vol).unwrap();
        backend.delete_volume(&vol).unwrap();
        backend.delete_volume(&vol).unwrap();
        assert!(vol.is_deleted());
        assert_eq!(count(&backend, "volumes"), 0);
        assert_eq!(count(&backend, "volume_types"), 1);
        assert_eq!(count(&backend, "volume_type_extra_specs"), 0);
        assert_eq!(count(&backend, "qos_specs"), 0);
        assert_eq!(count(&backend, "volume_metadata"), 0);
    }

    #[test]
    fn sql_soft_delete_flags_rows() {
        let config = PersistenceConfig::memory_db().soft_deletes(true);
        let backend = SqlBackend::open(&config, Arc::new(InflightRegistry::new())).unwrap();
        let vol = Volume::new("lvm", VolumeSpec::new(1).extra_specs(pairs(&[("k", "v")])))
            .unwrap();
        backend.set_volume(&vol).unwrap();
        let snap = Snapshot::new(&vol, SnapshotSpec::new()).unwrap();
        backend.set_snapshot(&snap).unwrap();

        backend.delete_snapshot(&snap).unwrap();
        backend.delete_volume(&vol).unwrap();
        assert_eq!(count(&backend, "volumes"), 1);
        assert_eq!(count(&backend, "snapshots"), 1);
        assert!(backend.get_volumes(&VolumeFilter::new()).unwrap().is_empty());
        assert!(backend
            .get_snapshots(&SnapshotFilter::new())
            .unwrap()
            .is_empty());
        let deleted: i64 = backend
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT deleted FROM volume_types WHERE id = ?1",
                    [vol.id().as_str()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(vol.status().as_deref(), Some("deleted"));
    }

    #[test]
    fn sql_recreate_after_soft_delete_revives_classification() {
        let config = PersistenceConfig::memory_db().soft_deletes(true);
        let backend = SqlBackend::open(&config, Arc::new(InflightRegistry::new())).unwrap();
        let first = Volume::new(
            "lvm",
            VolumeSpec::new(1)
                .id("v1")
                .extra_specs(pairs(&[("k1", "v1")]))
                .qos_specs(pairs(&[("q", "1")])),
        )
        .unwrap();
        backend.set_volume(&first).unwrap();
        backend.delete_volume(&first).unwrap();

        let second = Volume::new(
            "lvm",
            VolumeSpec::new(2)
                .id("v1")
                .extra_specs(pairs(&[("k2", "v2")]))
                .qos_specs(pairs(&[("q", "2")])),
        )
        .unwrap();
        backend.set_volume(&second).unwrap();

        let loaded = backend.get_volumes(&VolumeFilter::new()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].size(), Some(2));
        assert_eq!(loaded[0].status().as_deref(), Some("creating"));
        assert!(loaded[0].deleted_at().is_none());
        assert_eq!(loaded[0].extra_specs(&backend).unwrap(), pairs(&[("k2", "v2")]));
        let qos = loaded[0].qos_specs(&backend).unwrap().unwrap();
        assert_eq!(qos.specs(), pairs(&[("q", "2")]));
        assert!(qos.deleted_at().is_none());
    }

    #[test]
    fn sql_simplified_reload_keeps_classification() {
        let backend = backend();
        let vol = Volume::new("lvm", VolumeSpec::new(1).extra_specs(pairs(&[("k1", "v1")])))
            .unwrap();
        backend.set_volume(&vol).unwrap();

        let reloaded = Volume::from_transport(vol.to_transport(true)).unwrap();
        backend.set_volume(&reloaded).unwrap();
        assert_eq!(reloaded.extra_specs(&backend).unwrap(), pairs(&[("k1", "v1")]));
        let loaded = backend.get_volumes(&VolumeFilter::new()).unwrap();
        assert_eq!(loaded[0].extra_specs(&backend).unwrap(), pairs(&[("k1", "v1")]));
    }

    #[test]
    fn sql_inflight_classification_lookup() {
        let inflight = Arc::new(InflightRegistry::new());
        let backend = SqlBackend::open_in_memory(Arc::clone(&inflight)).unwrap();
        let vol = Volume::new("lvm", VolumeSpec::new(1).qos_specs(pairs(&[("q", "1")]))).unwrap();
        assert!(backend.volume_type_get(vol.id().as_str()).unwrap().is_none());
        let _guard = inflight.register(&vol);
        let vt = backend.volume_type_get(vol.id().as_str()).unwrap().unwrap();
        assert!(vt.same_entity(&vol.loaded_volume_type().unwrap()));
        assert!(backend.qos_specs_get(vol.id().as_str()).unwrap().is_some());
    }

    #[test]
    fn sql_key_value_without_native_upsert() {
        let mut backend = backend();
        backend.capabilities = Capabilities { upsert: false };
        backend
            .set_key_value(&KeyValue::new("k", Some("1".to_string())))
            .unwrap();
        backend
            .set_key_value(&KeyValue::new("k", Some("2".to_string())))
            .unwrap();
        let all = backend.get_key_values(None).unwrap();
        assert_eq!(all, vec![KeyValue::new("k", Some("2".to_string()))]);
    }

    #[test]
    fn sql_rejects_memory_storage() {
        let err = SqlBackend::open(&PersistenceConfig::memory(), Arc::new(InflightRegistry::new()))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration { .. }));
    }

    #[test]
    fn sql_table_counts() {
        let backend = backend();
        backend
            .set_volume(&Volume::new("lvm", VolumeSpec::new(1)).unwrap())
            .unwrap();
        let counts = backend.table_counts().unwrap();
        assert!(counts.contains(&("volumes", 1)));
        assert!(counts.contains(&("volume_types", 1)));
    }
}
