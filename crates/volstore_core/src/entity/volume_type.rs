//! Type classification and quality-of-service specification.

use super::{now, Entity, EntityId, EntityKind, Record};
use crate::error::CoreResult;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use volstore_codec::Value;

/// Consumer recorded on QoS specifications created for a volume.
pub const DEFAULT_QOS_CONSUMER: &str = "back-end";

/// Quality-of-service specification.
#[derive(Clone)]
pub struct QosSpecs {
    inner: Arc<RwLock<Record>>,
}

impl QosSpecs {
    /// Creates the QoS specification scoped to one volume.
    ///
    /// Its id and name are the volume id.
    ///
    /// # Errors
    ///
    /// Propagates field validation errors.
    pub fn entity_scoped(
        volume_id: &EntityId,
        specs: &BTreeMap<String, String>,
    ) -> CoreResult<Self> {
        let mut record = Record::constructed(EntityKind::QosSpecs);
        record.set("id", volume_id.as_str())?;
        record.set("name", volume_id.as_str())?;
        record.set("consumer", DEFAULT_QOS_CONSUMER)?;
        record.set("specs", Value::from_string_map(specs))?;
        record.set("created_at", now())?;
        record.set("deleted", false)?;
        record.set("deleted_at", Value::Null)?;
        Ok(Self::from_record(record))
    }

    pub(crate) fn from_record(record: Record) -> Self {
        Self {
            inner: Arc::new(RwLock::new(record)),
        }
    }

    /// Name of the specification.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.record().text("name").map(str::to_string)
    }

    /// Where the limits are enforced.
    #[must_use]
    pub fn consumer(&self) -> Option<String> {
        self.record().text("consumer").map(str::to_string)
    }

    /// The limits.
    #[must_use]
    pub fn specs(&self) -> BTreeMap<String, String> {
        self.record().string_map("specs")
    }

    /// Replaces the limits.
    ///
    /// # Errors
    ///
    /// Never fails for a string mapping. Kept fallible like every field write.
    pub fn set_specs(&self, specs: &BTreeMap<String, String>) -> CoreResult<()> {
        self.set("specs", Value::from_string_map(specs))
    }
}

impl Entity for QosSpecs {
    const KIND: EntityKind = EntityKind::QosSpecs;

    fn record(&self) -> MappedRwLockReadGuard<'_, Record> {
        RwLockReadGuard::map(self.inner.read(), |r| r)
    }

    fn record_mut(&self) -> MappedRwLockWriteGuard<'_, Record> {
        RwLockWriteGuard::map(self.inner.write(), |r| r)
    }

    fn same_entity(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for QosSpecs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QosSpecs")
            .field("record", &*self.record())
            .finish()
    }
}

#[derive(Debug)]
struct VolumeTypeState {
    record: Record,
    qos_specs: Option<QosSpecs>,
}

/// Type classification of a volume: free-form attributes plus optional QoS.
///
/// Every volume owns exactly one classification whose id and name are the
/// volume id.
#[derive(Clone)]
pub struct VolumeType {
    inner: Arc<RwLock<VolumeTypeState>>,
}

impl VolumeType {
    /// Creates the classification scoped to one volume.
    ///
    /// # Errors
    ///
    /// Propagates field validation errors.
    pub fn entity_scoped(
        volume_id: &EntityId,
        extra_specs: &BTreeMap<String, String>,
        qos_specs: Option<QosSpecs>,
    ) -> CoreResult<Self> {
        let mut record = Record::constructed(EntityKind::VolumeType);
        let qos_id = qos_specs.as_ref().map(|q| q.id().to_string());
        record.set("id", volume_id.as_str())?;
        record.set("name", volume_id.as_str())?;
        record.set("is_public", true)?;
        record.set("extra_specs", Value::from_string_map(extra_specs))?;
        record.set("qos_specs_id", qos_id)?;
        record.set("created_at", now())?;
        record.set("deleted", false)?;
        record.set("deleted_at", Value::Null)?;
        Ok(Self::from_parts(record, qos_specs))
    }

    /// Entity-scoped classification for a volume stored against the shared
    /// default record. Synchronized, with no attributes.
    pub(crate) fn default_for(volume_id: &EntityId, created_at: Value) -> CoreResult<Self> {
        let record = Record::synchronized(
            EntityKind::VolumeType,
            [
                ("id", Value::from(volume_id.as_str())),
                ("name", Value::from(volume_id.as_str())),
                ("is_public", Value::from(true)),
                ("extra_specs", Value::empty_map()),
                ("qos_specs_id", Value::Null),
                ("created_at", created_at),
                ("deleted", Value::from(false)),
            ],
        )?;
        Ok(Self::from_parts(record, None))
    }

    pub(crate) fn from_parts(record: Record, qos_specs: Option<QosSpecs>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(VolumeTypeState { record, qos_specs })),
        }
    }

    /// Name of the classification.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.record().text("name").map(str::to_string)
    }

    /// Whether the classification is visible to every tenant.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.record().boolean("is_public").unwrap_or(true)
    }

    /// Free-form attributes.
    #[must_use]
    pub fn extra_specs(&self) -> BTreeMap<String, String> {
        self.record().string_map("extra_specs")
    }

    /// Replaces the attribute map.
    ///
    /// # Errors
    ///
    /// Never fails for a string mapping. Kept fallible like every field write.
    pub fn set_extra_specs(&self, extra_specs: &BTreeMap<String, String>) -> CoreResult<()> {
        self.set("extra_specs", Value::from_string_map(extra_specs))
    }

    /// Attached QoS specification.
    #[must_use]
    pub fn qos_specs(&self) -> Option<QosSpecs> {
        self.inner.read().qos_specs.clone()
    }

    /// Attaches or detaches a QoS specification.
    ///
    /// # Errors
    ///
    /// Propagates field validation errors. Nothing changes on error.
    pub fn set_qos_specs(&self, qos_specs: Option<QosSpecs>) -> CoreResult<()> {
        let qos_id = qos_specs.as_ref().map(|q| q.id().to_string());
        let mut state = self.inner.write();
        state.record.set("qos_specs_id", qos_id)?;
        state.qos_specs = qos_specs;
        Ok(())
    }

    /// Whether the classification carries attributes or QoS.
    ///
    /// Classifications without either are stored against the shared
    /// default record by the relational backend.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        let state = self.inner.read();
        state.qos_specs.is_some()
            || state
                .record
                .map("extra_specs")
                .is_some_and(|specs| !specs.is_empty())
    }
}

impl Entity for VolumeType {
    const KIND: EntityKind = EntityKind::VolumeType;

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

impl std::fmt::Debug for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read();
        f.debug_struct("VolumeType")
            .field("record", &state.record)
            .field("qos_specs", &state.qos_specs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Baseline;

    fn specs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn entity_scoped_classification() {
        let volume_id = EntityId::new();
        let vt = VolumeType::entity_scoped(&volume_id, &BTreeMap::new(), None).unwrap();
        assert_eq!(vt.id(), volume_id);
        assert_eq!(vt.name().as_deref(), Some(volume_id.as_str()));
        assert!(vt.is_public());
        assert!(vt.extra_specs().is_empty());
        assert!(vt.qos_specs().is_none());
        assert!(!vt.is_custom());
        assert!(vt.changed_fields().contains("extra_specs"));
    }

    #[test]
    fn qos_is_scoped_to_the_volume() {
        let volume_id = EntityId::new();
        let qos = QosSpecs::entity_scoped(&volume_id, &specs(&[("read_iops_sec", "100")])).unwrap();
        let vt = VolumeType::entity_scoped(&volume_id, &specs(&[("k", "v")]), Some(qos)).unwrap();
        let qos = vt.qos_specs().unwrap();
        assert_eq!(qos.id(), volume_id);
        assert_eq!(qos.consumer().as_deref(), Some(DEFAULT_QOS_CONSUMER));
        assert_eq!(qos.specs(), specs(&[("read_iops_sec", "100")]));
        assert_eq!(
            vt.record().text("qos_specs_id"),
            Some(volume_id.as_str())
        );
        assert!(vt.is_custom());
    }

    #[test]
    fn default_view_is_synchronized() {
        let volume_id = EntityId::from("vol-1");
        let vt = VolumeType::default_for(&volume_id, Value::Null).unwrap();
        assert_eq!(vt.record().baseline(), Baseline::Synchronized);
        assert!(vt.changed_fields().is_empty());
        assert_eq!(vt.id().as_str(), "vol-1");
    }

    #[test]
    fn handles_share_state() {
        let vt = VolumeType::entity_scoped(&EntityId::new(), &BTreeMap::new(), None).unwrap();
        let other = vt.clone();
        other.set_extra_specs(&specs(&[("a", "b")])).unwrap();
        assert_eq!(vt.extra_specs(), specs(&[("a", "b")]));
        assert!(vt.same_entity(&other));
    }

    #[test]
    fn detaching_qos_clears_reference() {
        let volume_id = EntityId::new();
        let qos = QosSpecs::entity_scoped(&volume_id, &specs(&[("q", "1")])).unwrap();
        let vt = VolumeType::entity_scoped(&volume_id, &BTreeMap::new(), Some(qos)).unwrap();
        vt.reset_changes(None);
        vt.set_qos_specs(None).unwrap();
        assert!(vt.qos_specs().is_none());
        assert_eq!(vt.record().text("qos_specs_id"), None);
        assert!(vt.record().is_changed("qos_specs_id"));
    }
}
