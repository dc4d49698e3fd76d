//! Conversion between entities and transport documents.
//!
//! A document carries the class name and every field set on the entity.
//! Unless simplified, relationships nest the same shape: a volume embeds
//! its classification (with QoS) and whichever child collections are
//! loaded, and a child embeds its volume without that volume's children.
//!
//! Entities rebuilt from a document are *untracked*: their first persist
//! writes every set field. Relationships missing from the document load
//! lazily through the driver.

use crate::entity::{
    Connection, Entity, EntityKind, KeyValue, ParentLink, QosSpecs, Record, Snapshot,
    Volume, VolumeType,
};
use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;
use volstore_codec::{class_of, CodecError, Document, Value, CLASS_KEY};

/// Class name of a whole-backend dump.
pub const BACKEND_CLASS: &str = "Backend";

/// Entities that convert to and from transport documents.
pub trait Transport: Sized {
    /// Builds the document. `simplified` drops every relationship.
    fn to_transport(&self, simplified: bool) -> Value;

    /// Rebuilds an entity from its document.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared keys, `InvalidFieldValue` for a
    /// missing identifier, a wrong class or a badly typed value, and
    /// `Codec` if the value is not a document.
    fn from_transport(value: Value) -> CoreResult<Self>;
}

fn record_document(record: &Record) -> Document {
    let mut doc = Document::new(record.kind().class_name());
    for (name, value) in record.fields() {
        doc.insert(*name, value.clone());
    }
    doc
}

/// A decoded document split into its record and relationship values.
struct Parsed {
    record: Record,
    relations: BTreeMap<&'static str, Value>,
}

fn parse(kind: EntityKind, value: Value) -> CoreResult<Parsed> {
    let doc = Document::from_value(value)?;
    if doc.class() != kind.class_name() {
        return Err(CoreError::invalid_field_value(
            kind,
            CLASS_KEY,
            kind.class_name(),
            doc.class(),
        ));
    }

    let mut scalars = Vec::new();
    let mut relations = BTreeMap::new();
    for (name, value) in doc.into_fields() {
        match kind.relation(&name) {
            Some(relation) => {
                if !value.is_null() {
                    relations.insert(relation.name, value);
                }
            }
            None => scalars.push((name, value)),
        }
    }
    if !scalars.iter().any(|(name, value)| name == "id" && !value.is_null()) {
        return Err(CoreError::invalid_field_value(kind, "id", "text", "nothing"));
    }

    let record = Record::untracked(
        kind,
        scalars.iter().map(|(name, value)| (name.as_str(), value.clone())),
    )?;
    Ok(Parsed { record, relations })
}

fn children<T>(
    kind: EntityKind,
    name: &str,
    value: Value,
    parse: fn(Value) -> CoreResult<T>,
) -> CoreResult<Vec<T>> {
    match value {
        Value::Array(items) => items.into_iter().map(parse).collect(),
        other => Err(CoreError::invalid_field_value(
            kind,
            name,
            "array",
            other.type_name(),
        )),
    }
}

fn volume_document(volume: &Volume, simplified: bool, with_children: bool) -> Value {
    let mut doc = record_document(&volume.record());
    if simplified {
        return doc.into_value();
    }
    if let Some(volume_type) = volume.loaded_volume_type() {
        doc.insert("volume_type", volume_type.to_transport(false));
    }
    if with_children {
        if let Some(snapshots) = volume.loaded_snapshots() {
            let docs = snapshots.iter().map(|s| child_document(&s.record(), None));
            doc.insert("snapshots", Value::Array(docs.collect()));
        }
        if let Some(connections) = volume.loaded_connections() {
            let docs = connections.iter().map(|c| child_document(&c.record(), None));
            doc.insert("volume_attachment", Value::Array(docs.collect()));
        }
    }
    doc.into_value()
}

fn child_document(record: &Record, volume: Option<Volume>) -> Value {
    let mut doc = record_document(record);
    if let Some(volume) = volume {
        doc.insert("volume", volume_document(&volume, false, false));
    }
    doc.into_value()
}

impl Transport for Volume {
    fn to_transport(&self, simplified: bool) -> Value {
        volume_document(self, simplified, true)
    }

    fn from_transport(value: Value) -> CoreResult<Self> {
        let Parsed {
            record,
            mut relations,
        } = parse(EntityKind::Volume, value)?;
        let volume = match relations.remove("volume_type") {
            Some(doc) => Volume::from_parts(record, VolumeType::from_transport(doc)?),
            None => Volume::from_record(record),
        };
        if let Some(list) = relations.remove("snapshots") {
            let snapshots = children(EntityKind::Volume, "snapshots", list, Snapshot::from_transport)?;
            volume.set_snapshots(snapshots);
        }
        if let Some(list) = relations.remove("volume_attachment") {
            let connections = children(
                EntityKind::Volume,
                "volume_attachment",
                list,
                Connection::from_transport,
            )?;
            volume.set_connections(connections);
        }
        Ok(volume)
    }
}

impl Transport for Snapshot {
    fn to_transport(&self, simplified: bool) -> Value {
        let parent = if simplified { None } else { self.loaded_volume() };
        child_document(&self.record(), parent)
    }

    fn from_transport(value: Value) -> CoreResult<Self> {
        let Parsed {
            record,
            mut relations,
        } = parse(EntityKind::Snapshot, value)?;
        let snapshot = Snapshot::from_record(record);
        if let Some(doc) = relations.remove("volume") {
            snapshot.set_parent(ParentLink::Owned(Volume::from_transport(doc)?));
        }
        Ok(snapshot)
    }
}

impl Transport for Connection {
    fn to_transport(&self, simplified: bool) -> Value {
        let parent = if simplified { None } else { self.loaded_volume() };
        child_document(&self.record(), parent)
    }

    fn from_transport(value: Value) -> CoreResult<Self> {
        let Parsed {
            record,
            mut relations,
        } = parse(EntityKind::Connection, value)?;
        let connection = Connection::from_record(record);
        if let Some(doc) = relations.remove("volume") {
            connection.set_parent(ParentLink::Owned(Volume::from_transport(doc)?));
        }
        Ok(connection)
    }
}

impl Transport for VolumeType {
    fn to_transport(&self, simplified: bool) -> Value {
        let mut doc = record_document(&self.record());
        if !simplified {
            if let Some(qos) = self.qos_specs() {
                doc.insert("qos_specs", qos.to_transport(false));
            }
        }
        doc.into_value()
    }

    fn from_transport(value: Value) -> CoreResult<Self> {
        let Parsed {
            record,
            mut relations,
        } = parse(EntityKind::VolumeType, value)?;
        let qos = relations
            .remove("qos_specs")
            .map(QosSpecs::from_transport)
            .transpose()?;
        Ok(VolumeType::from_parts(record, qos))
    }
}

impl Transport for QosSpecs {
    fn to_transport(&self, _simplified: bool) -> Value {
        record_document(&self.record()).into_value()
    }

    fn from_transport(value: Value) -> CoreResult<Self> {
        let Parsed { record, .. } = parse(EntityKind::QosSpecs, value)?;
        Ok(QosSpecs::from_record(record))
    }
}

impl Transport for KeyValue {
    fn to_transport(&self, _simplified: bool) -> Value {
        let mut doc = Document::new(EntityKind::KeyValue.class_name());
        doc.insert("key", self.key.as_str());
        doc.insert("value", self.value.clone());
        doc.into_value()
    }

    fn from_transport(value: Value) -> CoreResult<Self> {
        let kind = EntityKind::KeyValue;
        let mut doc = Document::from_value(value)?;
        if doc.class() != kind.class_name() {
            return Err(CoreError::invalid_field_value(
                kind,
                CLASS_KEY,
                kind.class_name(),
                doc.class(),
            ));
        }
        let key = match doc.take("key") {
            Some(Value::Text(key)) => key,
            other => {
                let found = other.as_ref().map_or("nothing", Value::type_name);
                return Err(CoreError::invalid_field_value(kind, "key", "text", found));
            }
        };
        let value = match doc.take("value") {
            None | Some(Value::Null) => None,
            Some(Value::Text(value)) => Some(value),
            Some(other) => {
                return Err(CoreError::invalid_field_value(
                    kind,
                    "value",
                    "text",
                    other.type_name(),
                ))
            }
        };
        if let Some((name, _)) = doc.fields().next() {
            return Err(CoreError::unknown_field(kind, name));
        }
        Ok(KeyValue { key, value })
    }
}

/// An entity of any kind, as rebuilt from a document.
#[derive(Debug, Clone)]
pub enum AnyEntity {
    /// A volume.
    Volume(Volume),
    /// A snapshot.
    Snapshot(Snapshot),
    /// A connection.
    Connection(Connection),
    /// A classification.
    VolumeType(VolumeType),
    /// A QoS specification.
    QosSpecs(QosSpecs),
    /// A key/value pair.
    KeyValue(KeyValue),
}

impl AnyEntity {
    /// Kind of the wrapped entity.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Volume(_) => EntityKind::Volume,
            Self::Snapshot(_) => EntityKind::Snapshot,
            Self::Connection(_) => EntityKind::Connection,
            Self::VolumeType(_) => EntityKind::VolumeType,
            Self::QosSpecs(_) => EntityKind::QosSpecs,
            Self::KeyValue(_) => EntityKind::KeyValue,
        }
    }

    /// Builds the document of the wrapped entity.
    #[must_use]
    pub fn to_transport(&self, simplified: bool) -> Value {
        match self {
            Self::Volume(e) => e.to_transport(simplified),
            Self::Snapshot(e) => e.to_transport(simplified),
            Self::Connection(e) => e.to_transport(simplified),
            Self::VolumeType(e) => e.to_transport(simplified),
            Self::QosSpecs(e) => e.to_transport(simplified),
            Self::KeyValue(e) => e.to_transport(simplified),
        }
    }
}

/// Rebuilds an entity of whatever kind the document names.
///
/// # Errors
///
/// Returns `Codec` for a value without a known class and the
/// [`Transport::from_transport`] errors otherwise.
pub fn load(value: Value) -> CoreResult<AnyEntity> {
    let class = class_of(&value)?;
    let kind = EntityKind::from_class(class)
        .ok_or_else(|| CodecError::decoding_failed(format!("unknown class `{class}`")))?;
    Ok(match kind {
        EntityKind::Volume => AnyEntity::Volume(Volume::from_transport(value)?),
        EntityKind::Snapshot => AnyEntity::Snapshot(Snapshot::from_transport(value)?),
        EntityKind::Connection => AnyEntity::Connection(Connection::from_transport(value)?),
        EntityKind::VolumeType => AnyEntity::VolumeType(VolumeType::from_transport(value)?),
        EntityKind::QosSpecs => AnyEntity::QosSpecs(QosSpecs::from_transport(value)?),
        EntityKind::KeyValue => AnyEntity::KeyValue(KeyValue::from_transport(value)?),
    })
}

/// Every volume of one backend, with their classifications and children.
#[derive(Debug, Clone, Default)]
pub struct BackendDump {
    /// Backend the volumes belong to.
    pub backend_name: Option<String>,
    /// The volumes, in storage order.
    pub volumes: Vec<Volume>,
}

impl BackendDump {
    /// Builds the `Backend` document.
    #[must_use]
    pub fn to_transport(&self) -> Value {
        let mut doc = Document::new(BACKEND_CLASS);
        doc.insert(
            "backend",
            Value::map([("volume_backend_name", Value::from(self.backend_name.clone()))]),
        );
        let volumes = self.volumes.iter().map(|v| v.to_transport(false));
        doc.insert("volumes", Value::Array(volumes.collect()));
        doc.into_value()
    }

    /// Reads a `Backend` document.
    ///
    /// # Errors
    ///
    /// Returns `Codec` for a value that is not a `Backend` document and the
    /// volume decoding errors otherwise.
    pub fn from_transport(value: Value) -> CoreResult<Self> {
        let mut doc = Document::from_value(value)?;
        if doc.class() != BACKEND_CLASS {
            return Err(CodecError::decoding_failed(format!(
                "expected a {BACKEND_CLASS} document, found {}",
                doc.class()
            ))
            .into());
        }
        let backend_name = doc
            .get("backend")
            .and_then(|b| b.get("volume_backend_name"))
            .and_then(Value::as_text)
            .map(str::to_string);
        let volumes = match doc.take("volumes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .map(Volume::from_transport)
                .collect::<CoreResult<_>>()?,
            Some(other) => {
                return Err(CodecError::unexpected_type("array", other.type_name()).into())
            }
        };
        Ok(Self {
            backend_name,
            volumes,
        })
    }
}
