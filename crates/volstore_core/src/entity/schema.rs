//! Declared fields of every entity kind.

use std::fmt;

/// Type of a declared scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Text.
    Text,
    /// Signed integer.
    Integer,
    /// Boolean.
    Bool,
    /// UTC timestamp.
    Timestamp,
    /// String-keyed map.
    Map,
}

impl FieldType {
    /// Name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::Map => "map",
        }
    }
}

/// A declared scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: &'static str,
    /// Field type.
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> FieldDef {
    FieldDef { name, ty }
}

/// A declared relationship field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationDef {
    /// Field name.
    pub name: &'static str,
    /// Kind of the related entity.
    pub target: EntityKind,
    /// Whether the relationship holds a collection.
    pub many: bool,
    /// Whether the relationship is populated when the owner is built.
    pub eager: bool,
}

const fn relation(name: &'static str, target: EntityKind, many: bool, eager: bool) -> RelationDef {
    RelationDef {
        name,
        target,
        many,
        eager,
    }
}

use FieldType::{Bool, Integer, Map, Text, Timestamp};

const VOLUME_FIELDS: &[FieldDef] = &[
    field("id", Text),
    field("created_at", Timestamp),
    field("updated_at", Timestamp),
    field("deleted_at", Timestamp),
    field("deleted", Bool),
    field("status", Text),
    field("size", Integer),
    field("display_name", Text),
    field("display_description", Text),
    field("bootable", Bool),
    field("host", Text),
    field("availability_zone", Text),
    field("attach_status", Text),
    field("metadata", Map),
    field("admin_metadata", Map),
];

const SNAPSHOT_FIELDS: &[FieldDef] = &[
    field("id", Text),
    field("created_at", Timestamp),
    field("updated_at", Timestamp),
    field("deleted_at", Timestamp),
    field("deleted", Bool),
    field("status", Text),
    field("volume_id", Text),
    field("volume_size", Integer),
    field("display_name", Text),
    field("display_description", Text),
    field("progress", Text),
];

const CONNECTION_FIELDS: &[FieldDef] = &[
    field("id", Text),
    field("created_at", Timestamp),
    field("updated_at", Timestamp),
    field("deleted_at", Timestamp),
    field("deleted", Bool),
    field("status", Text),
    field("volume_id", Text),
    field("attach_mode", Text),
    field("attached_host", Text),
    field("instance_uuid", Text),
    field("connector", Map),
    field("connection_info", Map),
];

const VOLUME_TYPE_FIELDS: &[FieldDef] = &[
    field("id", Text),
    field("created_at", Timestamp),
    field("updated_at", Timestamp),
    field("deleted_at", Timestamp),
    field("deleted", Bool),
    field("name", Text),
    field("is_public", Bool),
    field("extra_specs", Map),
    field("qos_specs_id", Text),
];

const QOS_SPECS_FIELDS: &[FieldDef] = &[
    field("id", Text),
    field("created_at", Timestamp),
    field("updated_at", Timestamp),
    field("deleted_at", Timestamp),
    field("deleted", Bool),
    field("name", Text),
    field("consumer", Text),
    field("specs", Map),
];

const KEY_VALUE_FIELDS: &[FieldDef] = &[field("key", Text), field("value", Text)];

const VOLUME_RELATIONS: &[RelationDef] = &[
    relation("volume_type", EntityKind::VolumeType, false, true),
    relation("snapshots", EntityKind::Snapshot, true, false),
    relation("volume_attachment", EntityKind::Connection, true, false),
];

const CHILD_RELATIONS: &[RelationDef] = &[relation("volume", EntityKind::Volume, false, false)];

const VOLUME_TYPE_RELATIONS: &[RelationDef] =
    &[relation("qos_specs", EntityKind::QosSpecs, false, true)];

/// The kinds of persisted entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    /// A block-storage volume.
    Volume,
    /// A point-in-time copy of a volume.
    Snapshot,
    /// An attachment of a volume to a consumer host.
    Connection,
    /// Per-volume type classification.
    VolumeType,
    /// Quality-of-service specification attached to a classification.
    QosSpecs,
    /// Free-form key/value pair.
    KeyValue,
}

impl EntityKind {
    /// All kinds, in dependency order.
    pub const ALL: [EntityKind; 6] = [
        Self::VolumeType,
        Self::QosSpecs,
        Self::Volume,
        Self::Snapshot,
        Self::Connection,
        Self::KeyValue,
    ];

    /// Class name carried in transport documents.
    #[must_use]
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::Volume => "Volume",
            Self::Snapshot => "Snapshot",
            Self::Connection => "Connection",
            Self::VolumeType => "VolumeType",
            Self::QosSpecs => "QosSpecs",
            Self::KeyValue => "KeyValue",
        }
    }

    /// Looks up a kind by transport class name.
    #[must_use]
    pub fn from_class(class: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.class_name() == class)
    }

    /// Declared scalar fields.
    #[must_use]
    pub const fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::Volume => VOLUME_FIELDS,
            Self::Snapshot => SNAPSHOT_FIELDS,
            Self::Connection => CONNECTION_FIELDS,
            Self::VolumeType => VOLUME_TYPE_FIELDS,
            Self::QosSpecs => QOS_SPECS_FIELDS,
            Self::KeyValue => KEY_VALUE_FIELDS,
        }
    }

    /// Declared relationship fields.
    #[must_use]
    pub const fn relations(self) -> &'static [RelationDef] {
        match self {
            Self::Volume => VOLUME_RELATIONS,
            Self::Snapshot | Self::Connection => CHILD_RELATIONS,
            Self::VolumeType => VOLUME_TYPE_RELATIONS,
            Self::QosSpecs | Self::KeyValue => &[],
        }
    }

    /// Looks up a declared scalar field.
    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static FieldDef> {
        self.fields().iter().find(|f| f.name == name)
    }

    /// Looks up a declared relationship field.
    #[must_use]
    pub fn relation(self, name: &str) -> Option<&'static RelationDef> {
        self.relations().iter().find(|r| r.name == name)
    }

    /// Whether `name` is a declared field of either sort.
    #[must_use]
    pub fn declares(self, name: &str) -> bool {
        self.field(name).is_some() || self.relation(name).is_some()
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_class(kind.class_name()), Some(kind));
        }
        assert_eq!(EntityKind::from_class("Backend"), None);
    }

    #[test]
    fn every_persisted_kind_has_common_fields() {
        for kind in EntityKind::ALL {
            if kind == EntityKind::KeyValue {
                continue;
            }
            for name in ["id", "created_at", "updated_at", "deleted_at", "deleted"] {
                assert!(kind.field(name).is_some(), "{kind} lacks {name}");
            }
        }
    }

    #[test]
    fn volume_declarations() {
        let kind = EntityKind::Volume;
        assert_eq!(kind.field("size").map(|f| f.ty), Some(FieldType::Integer));
        assert_eq!(kind.field("metadata").map(|f| f.ty), Some(FieldType::Map));
        assert!(kind.field("volume_type_id").is_none());
        assert!(kind.relation("volume_type").is_some_and(|r| r.eager));
        assert!(kind.relation("snapshots").is_some_and(|r| r.many && !r.eager));
        assert!(kind.declares("volume_attachment"));
        assert!(!kind.declares("colour"));
    }

    #[test]
    fn field_names_are_unique() {
        for kind in EntityKind::ALL {
            let fields = kind.fields();
            for (i, a) in fields.iter().enumerate() {
                assert!(fields[i + 1..].iter().all(|b| b.name != a.name));
            }
        }
    }
}
