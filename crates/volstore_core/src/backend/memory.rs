//! In-memory persistence backend.

use crate::driver::{ConnectionFilter, PersistenceDriver, SnapshotFilter, VolumeFilter};
use crate::entity::{now, Connection, Entity, EntityKind, KeyValue, Snapshot, Volume};
use crate::error::CoreResult;
use crate::tracker::{self, WriteSet};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Insertion-ordered table keyed by identifier.
///
/// Replacing an entry keeps its original position.
#[derive(Debug)]
struct Table<T> {
    next: u64,
    rows: BTreeMap<u64, T>,
    index: HashMap<String, u64>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            next: 0,
            rows: BTreeMap::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    fn upsert(&mut self, key: String, value: T) {
        if let Some(position) = self.index.get(&key) {
            self.rows.insert(*position, value);
            return;
        }
        let position = self.next;
        self.next += 1;
        self.index.insert(key, position);
        self.rows.insert(position, value);
    }

    fn get(&self, key: &str) -> Option<&T> {
        self.index.get(key).and_then(|position| self.rows.get(position))
    }

    fn remove(&mut self, key: &str) -> Option<T> {
        let position = self.index.remove(key)?;
        self.rows.remove(&position)
    }

    fn select(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|v| predicate(v)).cloned().collect()
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Persistence backend keeping entity handles in process-local maps.
///
/// `set_*` stores the caller's handle itself, so later mutations of that
/// handle are visible to reads without another persist. Nothing survives
/// the process. Deletes always remove the entry and flag the handle
/// deleted.
///
/// # Example
///
/// ```rust
/// use volstore_core::{Entity, MemoryBackend, PersistenceDriver, Volume, VolumeFilter, VolumeSpec};
///
/// let backend = MemoryBackend::new();
/// let volume = Volume::new("node@lvm", VolumeSpec::new(1).name("disk")).unwrap();
/// backend.set_volume(&volume).unwrap();
///
/// let found = backend.get_volumes(&VolumeFilter::new().volume_name("disk")).unwrap();
/// assert_eq!(found.len(), 1);
/// assert!(found[0].same_entity(&volume));
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    volumes: RwLock<Table<Volume>>,
    snapshots: RwLock<Table<Snapshot>>,
    connections: RwLock<Table<Connection>>,
    key_values: RwLock<Table<KeyValue>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries per kind.
    #[must_use]
    pub fn counts(&self) -> Vec<(EntityKind, usize)> {
        vec![
            (EntityKind::Volume, self.volumes.read().len()),
            (EntityKind::Snapshot, self.snapshots.read().len()),
            (EntityKind::Connection, self.connections.read().len()),
            (EntityKind::KeyValue, self.key_values.read().len()),
        ]
    }

    fn store<E: Entity>(table: &RwLock<Table<E>>, entity: &E, set: &WriteSet) {
        let id = entity.id();
        let mut table = table.write();
        let stored = table.get(id.as_str()).is_some_and(|e| e.same_entity(entity));
        if stored && set.is_empty() {
            debug!(kind = %E::KIND, %id, "nothing changed");
            return;
        }
        if set.is_create() {
            debug!(kind = %E::KIND, %id, fields = ?set.field_names(), "creating");
        } else {
            debug!(kind = %E::KIND, %id, fields = ?set.field_names(), "updating");
        }
        table.upsert(id.to_string(), entity.clone());
    }
}

impl PersistenceDriver for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get_volumes(&self, filter: &VolumeFilter) -> CoreResult<Vec<Volume>> {
        if let Some(id) = &filter.volume_id {
            let table = self.volumes.read();
            return Ok(table
                .get(id.as_str())
                .filter(|v| filter.matches(v))
                .cloned()
                .into_iter()
                .collect());
        }
        Ok(self.volumes.read().select(|v| filter.matches(v)))
    }

    fn get_snapshots(&self, filter: &SnapshotFilter) -> CoreResult<Vec<Snapshot>> {
        Ok(self.snapshots.read().select(|s| filter.matches(s)))
    }

    fn get_connections(&self, filter: &ConnectionFilter) -> CoreResult<Vec<Connection>> {
        Ok(self.connections.read().select(|c| filter.matches(c)))
    }

    fn get_key_values(&self, key: Option<&str>) -> CoreResult<Vec<KeyValue>> {
        Ok(self
            .key_values
            .read()
            .select(|kv| key.map_or(true, |k| kv.key == k)))
    }

    fn set_volume(&self, volume: &Volume) -> CoreResult<()> {
        // The stored handle is replaced, so its classification is carried over.
        volume.volume_type(self)?;
        let set = WriteSet::for_volume(volume);
        Self::store(&self.volumes, volume, &set);
        tracker::finish_volume_persist(volume, &set);
        Ok(())
    }

    fn set_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let set = WriteSet::for_entity(snapshot);
        Self::store(&self.snapshots, snapshot, &set);
        tracker::finish_persist(snapshot, &set);
        Ok(())
    }

    fn set_connection(&self, connection: &Connection) -> CoreResult<()> {
        let set = WriteSet::for_entity(connection);
        Self::store(&self.connections, connection, &set);
        tracker::finish_persist(connection, &set);
        Ok(())
    }

    fn set_key_value(&self, key_value: &KeyValue) -> CoreResult<()> {
        debug!(key = %key_value.key, "setting key value");
        self.key_values
            .write()
            .upsert(key_value.key.clone(), key_value.clone());
        Ok(())
    }

    fn delete_volume(&self, volume: &Volume) -> CoreResult<()> {
        let id = volume.id();
        debug!(volume_id = %id, "deleting volume");
        self.volumes.write().remove(id.as_str());
        tracker::mark_deleted(volume, now())
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> CoreResult<()> {
        let id = snapshot.id();
        debug!(snapshot_id = %id, "deleting snapshot");
        self.snapshots.write().remove(id.as_str());
        tracker::mark_deleted(snapshot, now())
    }

    fn delete_connection(&self, connection: &Connection) -> CoreResult<()> {
        let id = connection.id();
        debug!(connection_id = %id, "deleting connection");
        self.connections.write().remove(id.as_str());
        tracker::mark_deleted(connection, now())
    }

    fn delete_key_value(&self, key_value: &KeyValue) -> CoreResult<()> {
        debug!(key = %key_value.key, "deleting key value");
        self.key_values.write().remove(&key_value.key);
        Ok(())
    }
}
