//! Persisted entities and their field model.
//!
//! Every entity kind declares a fixed set of fields (see [`schema`]). The
//! wrappers in this module are cheap, cloneable handles over shared state:
//! cloning a [`Volume`] yields another handle to the same volume, and the
//! memory backend stores such handles directly.

mod connection;
mod id;
mod key_value;
mod record;
mod relation;
mod schema;
mod snapshot;
mod volume;
mod volume_type;

pub use connection::Connection;
pub use id::EntityId;
pub use key_value::KeyValue;
pub use record::{Baseline, Record};
pub use relation::Related;
pub(crate) use relation::ParentLink;
pub use schema::{EntityKind, FieldDef, FieldType, RelationDef};
pub use snapshot::{Snapshot, SnapshotSpec};
pub use volume::{Volume, VolumeSpec, WeakVolume};
pub use volume_type::{QosSpecs, VolumeType, DEFAULT_QOS_CONSUMER};

use crate::error::CoreResult;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use volstore_codec::Value;

/// Current time at the precision every backend stores.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Backend name encoded in an owner tag of the form `[node@]backend[#pool]`.
#[must_use]
pub fn backend_name_of(host: &str) -> &str {
    let without_pool = host.split('#').next().unwrap_or(host);
    without_pool.rsplit('@').next().unwrap_or(without_pool)
}

/// Common behaviour of the record-backed entity wrappers.
///
/// Field access goes through the declared schema of [`Entity::KIND`]:
/// undeclared names fail with `UnknownField`.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind of this entity.
    const KIND: EntityKind;

    /// Shared read access to the field record.
    fn record(&self) -> MappedRwLockReadGuard<'_, Record>;

    /// Exclusive access to the field record.
    fn record_mut(&self) -> MappedRwLockWriteGuard<'_, Record>;

    /// Whether both handles refer to the same in-memory entity.
    fn same_entity(&self, other: &Self) -> bool;

    /// Identifier of the entity.
    fn id(&self) -> EntityId {
        self.record()
            .text("id")
            .map(EntityId::from)
            .unwrap_or_default()
    }

    /// Reads a declared field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names.
    fn get(&self, name: &str) -> CoreResult<Option<Value>> {
        Ok(self.record().get(name)?.cloned())
    }

    /// Assigns a declared field and marks it changed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names and `InvalidFieldValue`
    /// for values of the wrong type.
    fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.record_mut().set(name, value)
    }

    /// Snapshot of all assigned scalar fields.
    fn fields(&self) -> BTreeMap<&'static str, Value> {
        self.record().fields().clone()
    }

    /// Fields assigned since the last reset.
    fn changed_fields(&self) -> BTreeSet<&'static str> {
        self.record().changed_fields().clone()
    }

    /// Clears the named fields from the changed set, or all of them.
    fn reset_changes(&self, fields: Option<&[&str]>) {
        self.record_mut().reset_changes(fields);
    }

    /// Status text, if the kind has one and it is set.
    fn status(&self) -> Option<String> {
        self.record().text("status").map(str::to_string)
    }

    /// Whether the entity has been marked deleted.
    fn is_deleted(&self) -> bool {
        self.record().boolean("deleted").unwrap_or(false)
    }

    /// Creation time.
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.record().timestamp("created_at")
    }

    /// Deletion time.
    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.record().timestamp("deleted_at")
    }
}
