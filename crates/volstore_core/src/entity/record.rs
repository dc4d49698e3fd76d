//! Field storage with change tracking.

use super::schema::{EntityKind, FieldDef, FieldType};
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, SubsecRound, Utc};
use std::collections::{BTreeMap, BTreeSet};
use volstore_codec::{parse_timestamp, Map, Value};

/// How a record relates to persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    /// Built by a constructor. Every supplied field is pending.
    Constructed,
    /// Matches what a backend last stored or returned.
    Synchronized,
    /// Built from a transport document. Nothing is known about storage.
    Untracked,
}

/// Values of the declared scalar fields of one entity plus the set of
/// fields assigned since the last reset.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    kind: EntityKind,
    values: BTreeMap<&'static str, Value>,
    changed: BTreeSet<&'static str>,
    baseline: Baseline,
}

impl Record {
    /// Creates an empty record for a new entity.
    #[must_use]
    pub fn constructed(kind: EntityKind) -> Self {
        Self {
            kind,
            values: BTreeMap::new(),
            changed: BTreeSet::new(),
            baseline: Baseline::Constructed,
        }
    }

    /// Creates a record from values a backend returned.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or `InvalidFieldValue` for a bad pair.
    pub fn synchronized<'a>(
        kind: EntityKind,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> CoreResult<Self> {
        Self::filled(kind, values, Baseline::Synchronized)
    }

    /// Creates a record from transport values.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or `InvalidFieldValue` for a bad pair.
    pub fn untracked<'a>(
        kind: EntityKind,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> CoreResult<Self> {
        Self::filled(kind, values, Baseline::Untracked)
    }

    fn filled<'a>(
        kind: EntityKind,
        values: impl IntoIterator<Item = (&'a str, Value)>,
        baseline: Baseline,
    ) -> CoreResult<Self> {
        let mut record = Self::constructed(kind);
        for (name, value) in values {
            let def = record.def(name)?;
            let value = coerce(kind, def, value)?;
            record.values.insert(def.name, value);
        }
        record.baseline = baseline;
        Ok(record)
    }

    fn def(&self, name: &str) -> CoreResult<&'static FieldDef> {
        self.kind
            .field(name)
            .ok_or_else(|| CoreError::unknown_field(self.kind, name))
    }

    /// The entity kind.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Reads a declared field. `None` when the field was never set.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if the kind does not declare `name` as a
    /// scalar field.
    pub fn get(&self, name: &str) -> CoreResult<Option<&Value>> {
        let def = self.def(name)?;
        Ok(self.values.get(def.name))
    }

    /// Assigns a declared field and marks it changed.
    ///
    /// Assigning the current value still marks the field changed.
    /// Timestamps are truncated to microseconds and text is accepted for
    /// timestamp fields.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names and `InvalidFieldValue`
    /// when the value has the wrong type.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let def = self.def(name)?;
        let value = coerce(self.kind, def, value.into())?;
        self.values.insert(def.name, value);
        self.changed.insert(def.name);
        Ok(())
    }

    /// Current value of a field, skipping validation.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// Text field.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&str> {
        self.value(name).and_then(Value::as_text)
    }

    /// Integer field.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.value(name).and_then(Value::as_integer)
    }

    /// Boolean field.
    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(Value::as_bool)
    }

    /// Timestamp field.
    #[must_use]
    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.value(name).and_then(Value::as_timestamp)
    }

    /// Map field.
    #[must_use]
    pub fn map(&self, name: &str) -> Option<&Map> {
        self.value(name).and_then(Value::as_map)
    }

    /// Map field whose entries are text, as a string mapping. Non-text
    /// entries are skipped and an unset field yields an empty mapping.
    #[must_use]
    pub fn string_map(&self, name: &str) -> BTreeMap<String, String> {
        self.map(name)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_text().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether a field has been assigned at all.
    #[must_use]
    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// All assigned fields and their values.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<&'static str, Value> {
        &self.values
    }

    /// Fields assigned since the last reset.
    #[must_use]
    pub fn changed_fields(&self) -> &BTreeSet<&'static str> {
        &self.changed
    }

    /// Whether a field is in the changed set.
    #[must_use]
    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// Clears the named fields from the changed set, or all of them.
    ///
    /// Afterwards the record is synchronized with storage.
    pub fn reset_changes(&mut self, fields: Option<&[&str]>) {
        match fields {
            None => self.changed.clear(),
            Some(names) => {
                for name in names {
                    self.changed.remove(*name);
                }
            }
        }
        self.baseline = Baseline::Synchronized;
    }

    /// Relationship to persisted state.
    #[must_use]
    pub fn baseline(&self) -> Baseline {
        self.baseline
    }
}

fn coerce(kind: EntityKind, def: &FieldDef, value: Value) -> CoreResult<Value> {
    match (def.ty, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::Text, v @ Value::Text(_))
        | (FieldType::Integer, v @ Value::Integer(_))
        | (FieldType::Bool, v @ Value::Bool(_))
        | (FieldType::Map, v @ Value::Map(_)) => Ok(v),
        (FieldType::Timestamp, Value::Timestamp(ts)) => Ok(Value::Timestamp(ts.trunc_subsecs(6))),
        (FieldType::Timestamp, Value::Text(text)) => parse_timestamp(&text)
            .map(|ts| Value::Timestamp(ts.trunc_subsecs(6)))
            .map_err(|_| {
                CoreError::invalid_field_value(kind, def.name, "timestamp", format!("`{text}`"))
            }),
        (ty, other) => Err(CoreError::invalid_field_value(
            kind,
            def.name,
            ty.name(),
            other.type_name(),
        )),
    }
}
