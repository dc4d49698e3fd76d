//! Change tracking: which fields a persist call has to write.
//!
//! A write set is built from the entity's changed fields. When nothing
//! changed and the entity was built from a transport document, every set
//! field is written instead, because nothing is known about what storage
//! holds. For volumes the classification attributes and QoS limits are
//! composite fields that are always written whole.
//!
//! A write set that contains `id` is a create. Backends attempt the create
//! through [`persist_with_retry`], which turns a duplicate identifier into
//! an update of the remaining fields.

use crate::entity::{Baseline, Entity, EntityKind, Volume};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;
use volstore_codec::Value;

/// Name of the composite classification-attributes field.
pub const EXTRA_SPECS: &str = "extra_specs";

/// Name of the composite QoS-limits field.
pub const QOS_SPECS: &str = "qos_specs";

/// Status given to deleted entities.
pub const DELETED_STATUS: &str = "deleted";

/// Fields one persist call writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    /// Scalar fields and their values.
    pub fields: BTreeMap<&'static str, Value>,
    /// Full classification attribute map, when it has to be written.
    pub extra_specs: Option<BTreeMap<String, String>>,
    /// Full QoS limits, when they have to be written.
    pub qos_specs: Option<BTreeMap<String, String>>,
}

impl WriteSet {
    /// Computes the write set of any entity.
    pub fn for_entity<E: Entity>(entity: &E) -> Self {
        let record = entity.record();
        let fields = if !record.changed_fields().is_empty() {
            record
                .changed_fields()
                .iter()
                .map(|name| (*name, record.value(name).cloned().unwrap_or(Value::Null)))
                .collect()
        } else if record.baseline() == Baseline::Untracked {
            record.fields().clone()
        } else {
            BTreeMap::new()
        };
        Self {
            fields,
            extra_specs: None,
            qos_specs: None,
        }
    }

    /// Computes the write set of a volume, including the composite
    /// classification fields.
    ///
    /// A classification that was never loaded contributes nothing.
    pub fn for_volume(volume: &Volume) -> Self {
        let mut set = Self::for_entity(volume);
        let Some(volume_type) = volume.loaded_volume_type() else {
            return set;
        };
        let untracked = {
            let record = volume.record();
            record.changed_fields().is_empty() && record.baseline() == Baseline::Untracked
        };
        let qos = volume_type.qos_specs();

        let classification_changed = volume_type.record().is_changed(EXTRA_SPECS);
        if untracked || classification_changed {
            set.extra_specs = Some(volume_type.extra_specs());
        }
        if let Some(qos) = qos {
            let qos_changed = qos.record().is_changed("specs")
                || volume_type.record().is_changed("qos_specs_id");
            if untracked || qos_changed {
                set.qos_specs = Some(qos.specs());
            }
        }
        set
    }

    /// Whether nothing has to be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.extra_specs.is_none() && self.qos_specs.is_none()
    }

    /// Whether this persist creates the entity.
    #[must_use]
    pub fn is_create(&self) -> bool {
        self.fields.contains_key("id")
    }

    /// Drops the identifier so the write proceeds as an update.
    pub fn strip_identifier(&mut self) {
        self.fields.remove("id");
    }

    /// Names of the written fields, composites included.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.fields.keys().copied().collect();
        if self.extra_specs.is_some() {
            names.push(EXTRA_SPECS);
        }
        if self.qos_specs.is_some() {
            names.push(QOS_SPECS);
        }
        names
    }
}

/// Runs a create, falling back to an update on a duplicate identifier.
///
/// `create` receives the full write set. If it fails with
/// `DuplicateIdentifier` the identifier is stripped and `update` runs with
/// the remaining scalar fields; a second duplicate propagates. Without an
/// identifier only `update` runs.
///
/// # Errors
///
/// Propagates errors from `create` other than a duplicate identifier and
/// every error from `update`.
pub fn persist_with_retry<C, U>(
    kind: EntityKind,
    set: &mut WriteSet,
    create: C,
    update: U,
) -> CoreResult<()>
where
    C: FnOnce(&WriteSet) -> CoreResult<()>,
    U: FnOnce(&WriteSet) -> CoreResult<()>,
{
    if set.is_create() {
        match create(set) {
            Err(CoreError::DuplicateIdentifier { id, .. }) => {
                debug!(%kind, %id, "create collided with an existing row, retrying as update");
                set.strip_identifier();
            }
            other => return other,
        }
    }
    if set.fields.is_empty() {
        return Ok(());
    }
    update(set)
}

/// Resets the fields a successful persist wrote.
pub fn finish_persist<E: Entity>(entity: &E, set: &WriteSet) {
    let names: Vec<&str> = set.fields.keys().copied().collect();
    let mut record = entity.record_mut();
    // An identifier stripped by the create retry was still stored.
    record.reset_changes(Some(names.as_slice()));
    record.reset_changes(Some(&["id"][..]));
}

/// Resets a volume and its classification after a successful persist.
pub fn finish_volume_persist(volume: &Volume, set: &WriteSet) {
    finish_persist(volume, set);
    if let Some(volume_type) = volume.loaded_volume_type() {
        volume_type.reset_changes(None);
        if let Some(qos) = volume_type.qos_specs() {
            qos.reset_changes(None);
        }
    }
}

/// Flags an entity deleted and clears its pending changes.
///
/// # Errors
///
/// Returns `UnknownField` if the kind does not declare the deletion fields.
pub fn mark_deleted<E: Entity>(entity: &E, at: DateTime<Utc>) -> CoreResult<()> {
    let mut record = entity.record_mut();
    record.set("deleted", true)?;
    record.set("deleted_at", at)?;
    if record.kind().field("status").is_some() {
        record.set("status", DELETED_STATUS)?;
    }
    record.reset_changes(None);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::entity::{now, Record, Snapshot, SnapshotSpec, VolumeSpec};
    use crate::transport::Transport;

    fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn new_volume_is_a_create() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let set = WriteSet::for_volume(&vol);
        assert!(set.is_create());
        assert_eq!(set.fields.get("size"), Some(&Value::Integer(1)));
        assert_eq!(set.extra_specs, Some(BTreeMap::new()));
        assert_eq!(set.qos_specs, None);
    }

    #[test]
    fn synchronized_volume_writes_nothing() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let set = WriteSet::for_volume(&vol);
        finish_volume_persist(&vol, &set);
        assert!(WriteSet::for_volume(&vol).is_empty());
    }

    #[test]
    fn update_writes_only_changed_fields() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        finish_volume_persist(&vol, &WriteSet::for_volume(&vol));
        vol.set("size", 2).unwrap();
        let set = WriteSet::for_volume(&vol);
        assert!(!set.is_create());
        assert_eq!(set.field_names(), vec!["size"]);
    }

    #[test]
    fn classification_changes_are_composite() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        finish_volume_persist(&vol, &WriteSet::for_volume(&vol));
        let driver = MemoryBackend::new();
        vol.set_extra_specs(&driver, &pairs(&[("k1", "v1")])).unwrap();
        vol.set_qos_specs(&driver, &pairs(&[("read_iops_sec", "10")])).unwrap();
        let set = WriteSet::for_volume(&vol);
        assert!(set.fields.is_empty());
        assert_eq!(set.extra_specs, Some(pairs(&[("k1", "v1")])));
        assert_eq!(set.qos_specs, Some(pairs(&[("read_iops_sec", "10")])));
        assert_eq!(set.field_names(), vec![EXTRA_SPECS, QOS_SPECS]);
    }

    #[test]
    fn unloaded_classification_writes_no_composites() {
        let vol =
            Volume::new("lvm", VolumeSpec::new(1).extra_specs(pairs(&[("k1", "v1")]))).unwrap();
        let doc = vol.to_transport(true);
        let lazy = Volume::from_transport(doc).unwrap();
        assert!(lazy.loaded_volume_type().is_none());

        let set = WriteSet::for_volume(&lazy);
        assert!(set.is_create());
        assert_eq!(set.extra_specs, None);
        assert_eq!(set.qos_specs, None);
        finish_volume_persist(&lazy, &set);
        assert!(lazy.loaded_volume_type().is_none());
    }

    #[test]
    fn untracked_entities_write_every_field() {
        let record = Record::untracked(
            EntityKind::Snapshot,
            [("id", Value::from("s1")), ("status", Value::from("available"))],
        )
        .unwrap();
        let snap = Snapshot::from_record(record);
        let set = WriteSet::for_entity(&snap);
        assert!(set.is_create());
        assert_eq!(set.fields.len(), 2);
    }

    #[test]
    fn duplicate_create_retries_as_update() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        let snap = Snapshot::new(&vol, SnapshotSpec::new()).unwrap();
        let mut set = WriteSet::for_entity(&snap);
        let mut updated = Vec::new();
        persist_with_retry(
            EntityKind::Snapshot,
            &mut set,
            |_| Err(CoreError::duplicate(EntityKind::Snapshot, "s1")),
            |s| {
                updated = s.fields.keys().copied().collect();
                Ok(())
            },
        )
        .unwrap();
        assert!(!updated.is_empty());
        assert!(!updated.contains(&"id"));
        finish_persist(&snap, &set);
        assert!(snap.changed_fields().is_empty());
    }

    #[test]
    fn other_create_errors_propagate() {
        let mut set = WriteSet::default();
        set.fields.insert("id", Value::from("x"));
        let result = persist_with_retry(
            EntityKind::Volume,
            &mut set,
            |_| Err(CoreError::invalid_configuration("boom")),
            |_| panic!("update must not run"),
        );
        assert!(matches!(result, Err(CoreError::InvalidConfiguration { .. })));
    }

    #[test]
    fn mark_deleted_is_idempotent() {
        let vol = Volume::new("lvm", VolumeSpec::new(1)).unwrap();
        mark_deleted(&vol, now()).unwrap();
        mark_deleted(&vol, now()).unwrap();
        assert!(vol.is_deleted());
        assert_eq!(vol.status().as_deref(), Some(DELETED_STATUS));
        assert!(vol.deleted_at().is_some());
        assert!(vol.changed_fields().is_empty());
    }
}
