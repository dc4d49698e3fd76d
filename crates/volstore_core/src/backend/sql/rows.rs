//! Mapping between entity records and table rows.

use crate::entity::{
    now, EntityId, EntityKind, FieldDef, FieldType, QosSpecs, Record, VolumeType,
};
use crate::error::{CoreError, CoreResult};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use volstore_codec::{format_timestamp, from_json, parse_timestamp, to_json, Value};

/// Name of the shared default classification row.
pub(crate) const DEFAULT_TYPE_NAME: &str = "__DEFAULT__";

/// A table holding one entity kind.
///
/// Scalar fields map to same-named columns. `side_fields` live elsewhere
/// (side tables) and never appear in the column list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TableDef {
    pub(crate) name: &'static str,
    pub(crate) kind: EntityKind,
    side_fields: &'static [&'static str],
}

pub(crate) const VOLUMES: TableDef = TableDef {
    name: "volumes",
    kind: EntityKind::Volume,
    side_fields: &["metadata", "admin_metadata"],
};

pub(crate) const SNAPSHOTS: TableDef = TableDef {
    name: "snapshots",
    kind: EntityKind::Snapshot,
    side_fields: &[],
};

pub(crate) const ATTACHMENTS: TableDef = TableDef {
    name: "volume_attachment",
    kind: EntityKind::Connection,
    side_fields: &[],
};

pub(crate) const VOLUME_TYPES: TableDef = TableDef {
    name: "volume_types",
    kind: EntityKind::VolumeType,
    side_fields: &["extra_specs"],
};

pub(crate) const QOS_SPECS: TableDef = TableDef {
    name: "qos_specs",
    kind: EntityKind::QosSpecs,
    side_fields: &[],
};

/// A key/value side table owned by another row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SideTable {
    pub(crate) name: &'static str,
    pub(crate) owner_column: &'static str,
}

pub(crate) const VOLUME_METADATA: SideTable = SideTable {
    name: "volume_metadata",
    owner_column: "volume_id",
};

pub(crate) const VOLUME_ADMIN_METADATA: SideTable = SideTable {
    name: "volume_admin_metadata",
    owner_column: "volume_id",
};

pub(crate) const EXTRA_SPECS: SideTable = SideTable {
    name: "volume_type_extra_specs",
    owner_column: "volume_type_id",
};

impl TableDef {
    /// Fields stored as columns of this table.
    pub(crate) fn columns(&self) -> impl Iterator<Item = &'static FieldDef> + '_ {
        self.kind
            .fields()
            .iter()
            .filter(move |f| !self.side_fields.contains(&f.name))
    }

    /// Comma-separated column list.
    pub(crate) fn select_list(&self) -> String {
        self.columns().map(|f| f.name).collect::<Vec<_>>().join(", ")
    }

    fn width(&self) -> usize {
        self.columns().count()
    }

    /// Column/value pairs for the stored fields among `fields`.
    pub(crate) fn pairs(
        &self,
        fields: &BTreeMap<&'static str, Value>,
    ) -> CoreResult<Vec<(&'static str, SqlValue)>> {
        self.columns()
            .filter_map(|def| fields.get(def.name).map(|v| (def.name, v)))
            .map(|(name, value)| Ok((name, to_sql(value)?)))
            .collect()
    }

    /// Inserts a row.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateIdentifier` when the primary key exists.
    pub(crate) fn insert(
        &self,
        conn: &Connection,
        id: &str,
        values: &[(&'static str, SqlValue)],
    ) -> CoreResult<()> {
        let columns = values.iter().map(|(c, _)| *c).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=values.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders})",
            self.name
        );
        match conn.execute(&sql, params_from_iter(values.iter().map(|(_, v)| v))) {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(CoreError::duplicate(self.kind, id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Updates columns of the row with `id`. Returns the number of rows
    /// changed.
    pub(crate) fn update(
        &self,
        conn: &Connection,
        id: &str,
        values: &[(&'static str, SqlValue)],
    ) -> CoreResult<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        let assignments = values
            .iter()
            .enumerate()
            .map(|(i, (c, _))| format!("{c} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE id = ?{}",
            self.name,
            values.len() + 1
        );
        let params = values
            .iter()
            .map(|(_, v)| v.clone())
            .chain(std::iter::once(SqlValue::Text(id.to_string())));
        Ok(conn.execute(&sql, params_from_iter(params))?)
    }

    /// Flags the row with `id` deleted.
    pub(crate) fn soft_delete(&self, conn: &Connection, id: &str, at: &str) -> CoreResult<usize> {
        let status = if self.kind.field("status").is_some() {
            ", status = 'deleted'"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE {} SET deleted = 1, deleted_at = ?1{status} WHERE id = ?2",
            self.name
        );
        Ok(conn.execute(&sql, params![at, id])?)
    }

    /// Clears the deleted flag of the row with `id`.
    pub(crate) fn revive(&self, conn: &Connection, id: &str) -> CoreResult<usize> {
        let sql = format!(
            "UPDATE {} SET deleted = 0, deleted_at = NULL WHERE id = ?1 AND deleted != 0",
            self.name
        );
        Ok(conn.execute(&sql, [id])?)
    }

    /// Removes the row with `id`.
    pub(crate) fn hard_delete(&self, conn: &Connection, id: &str) -> CoreResult<usize> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.name);
        Ok(conn.execute(&sql, [id])?)
    }

    /// Whether a row with `id` exists, deleted or not.
    pub(crate) fn exists(&self, conn: &Connection, id: &str) -> CoreResult<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?1", self.name);
        Ok(conn
            .query_row(&sql, [id], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// Number of rows not flagged deleted.
    pub(crate) fn count(&self, conn: &Connection) -> CoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE deleted = 0", self.name);
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Selects live rows matching `conditions` in insertion order.
    ///
    /// Each result holds the decoded non-NULL fields followed by the raw
    /// values of `extra_columns`.
    pub(crate) fn select(
        &self,
        conn: &Connection,
        extra_columns: &[&str],
        conditions: &[String],
        params: &[SqlValue],
    ) -> CoreResult<Vec<(Vec<(&'static str, Value)>, Vec<SqlValue>)>> {
        let mut columns = self.select_list();
        for extra in extra_columns {
            columns.push_str(", ");
            columns.push_str(extra);
        }
        let mut sql = format!("SELECT {columns} FROM {} WHERE deleted = 0", self.name);
        for condition in conditions {
            sql.push_str(" AND ");
            sql.push_str(condition);
        }
        sql.push_str(" ORDER BY rowid");

        let width = self.width() + extra_columns.len();
        let mut stmt = conn.prepare(&sql)?;
        let raw_rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            (0..width)
                .map(|i| row.get::<_, SqlValue>(i))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;

        let mut out = Vec::new();
        for raw in raw_rows {
            let mut raw = raw?;
            let extras = raw.split_off(self.width());
            let mut fields = self
                .columns()
                .zip(raw)
                .map(|(def, sql)| Ok((def.name, from_sql(self.kind, def, sql)?)))
                .collect::<CoreResult<Vec<_>>>()?;
            // NULL columns read as unset fields.
            fields.retain(|(_, value)| !value.is_null());
            out.push((fields, extras));
        }
        Ok(out)
    }
}

impl SideTable {
    /// Entries owned by `owner`, sorted by key.
    pub(crate) fn read(&self, conn: &Connection, owner: &str) -> CoreResult<BTreeMap<String, String>> {
        let sql = format!(
            "SELECT key, value FROM {} WHERE {} = ?1",
            self.name, self.owner_column
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([owner], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value.unwrap_or_default());
        }
        Ok(out)
    }

    /// Replaces every entry owned by `owner`.
    pub(crate) fn replace(
        &self,
        conn: &Connection,
        owner: &str,
        entries: &BTreeMap<String, String>,
    ) -> CoreResult<()> {
        self.clear(conn, owner)?;
        let sql = format!(
            "INSERT INTO {} ({}, key, value) VALUES (?1, ?2, ?3)",
            self.name, self.owner_column
        );
        let mut stmt = conn.prepare(&sql)?;
        for (key, value) in entries {
            stmt.execute(params![owner, key, value])?;
        }
        Ok(())
    }

    /// Removes every entry owned by `owner`.
    pub(crate) fn clear(&self, conn: &Connection, owner: &str) -> CoreResult<()> {
        let sql = format!("DELETE FROM {} WHERE {} = ?1", self.name, self.owner_column);
        conn.execute(&sql, [owner])?;
        Ok(())
    }
}

/// Whether `err` is a primary-key violation.
///
/// Other constraint failures are not duplicates of the identifier.
pub(crate) fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// Encodes a field value as a column value.
pub(crate) fn to_sql(value: &Value) -> CoreResult<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => SqlValue::Text(format_timestamp(ts)),
        Value::Array(_) | Value::Map(_) => SqlValue::Text(to_json(value)?),
    })
}

/// Decodes a column value for a declared field.
pub(crate) fn from_sql(kind: EntityKind, def: &FieldDef, raw: SqlValue) -> CoreResult<Value> {
    let mismatch = |found: &str| {
        CoreError::invalid_field_value(kind, def.name, def.ty.name(), format!("stored {found}"))
    };
    match (def.ty, raw) {
        (_, SqlValue::Null) => Ok(Value::Null),
        (FieldType::Text, SqlValue::Text(s)) => Ok(Value::Text(s)),
        (FieldType::Text, SqlValue::Integer(i)) => Ok(Value::Text(i.to_string())),
        (FieldType::Integer, SqlValue::Integer(i)) => Ok(Value::Integer(i)),
        (FieldType::Bool, SqlValue::Integer(i)) => Ok(Value::Bool(i != 0)),
        (FieldType::Timestamp, SqlValue::Text(s)) => Ok(Value::Timestamp(parse_timestamp(&s)?)),
        (FieldType::Map, SqlValue::Text(s)) => {
            let value = from_json(&s)?;
            if value.as_map().is_some() {
                Ok(value)
            } else {
                Err(mismatch(value.type_name()))
            }
        }
        (_, SqlValue::Real(_)) => Err(mismatch("real")),
        (_, SqlValue::Blob(_)) => Err(mismatch("blob")),
        (_, SqlValue::Text(_)) => Err(mismatch("text")),
        (_, SqlValue::Integer(_)) => Err(mismatch("integer")),
    }
}

/// Identifier of the shared default classification, created on first use.
pub(crate) fn ensure_default_type(conn: &Connection) -> CoreResult<EntityId> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM volume_types WHERE name = ?1 AND deleted = 0 ORDER BY rowid LIMIT 1",
            [DEFAULT_TYPE_NAME],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(EntityId::from(id));
    }
    let id = EntityId::new();
    conn.execute(
        "INSERT INTO volume_types (id, created_at, deleted, name, is_public) \
         VALUES (?1, ?2, 0, ?3, 1)",
        params![id.as_str(), format_timestamp(&now()), DEFAULT_TYPE_NAME],
    )?;
    Ok(id)
}

/// Loads the live QoS specification with `id`.
pub(crate) fn load_qos_specs(conn: &Connection, id: &str) -> CoreResult<Option<QosSpecs>> {
    let rows = QOS_SPECS.select(conn, &[], &["id = ?1".to_string()], &[text(id)])?;
    match rows.into_iter().next() {
        Some((fields, _)) => {
            let record = Record::synchronized(EntityKind::QosSpecs, fields)?;
            Ok(Some(QosSpecs::from_record(record)))
        }
        None => Ok(None),
    }
}

/// Loads the live classification with `id`, its attributes and QoS.
pub(crate) fn load_volume_type(conn: &Connection, id: &str) -> CoreResult<Option<VolumeType>> {
    let rows = VOLUME_TYPES.select(conn, &[], &["id = ?1".to_string()], &[text(id)])?;
    let Some((mut fields, _)) = rows.into_iter().next() else {
        return Ok(None);
    };
    let extra_specs = EXTRA_SPECS.read(conn, id)?;
    fields.push(("extra_specs", Value::from_string_map(&extra_specs)));
    let record = Record::synchronized(EntityKind::VolumeType, fields)?;
    let qos = match record.text("qos_specs_id") {
        Some(qos_id) => load_qos_specs(conn, qos_id)?,
        None => None,
    };
    Ok(Some(VolumeType::from_parts(record, qos)))
}

/// Text parameter.
pub(crate) fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sql::migrations::MigrationManager;
    use crate::entity::Entity;

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::standard().ensure(&mut conn, true).unwrap();
        conn
    }

    #[test]
    fn column_lists_skip_side_fields() {
        let columns = VOLUMES.select_list();
        assert!(columns.starts_with("id, created_at"));
        assert!(!columns.contains("metadata"));
        assert!(!VOLUME_TYPES.select_list().contains("extra_specs"));
        assert!(ATTACHMENTS.select_list().contains("connection_info"));
    }

    #[test]
    fn value_conversions() {
        let def = EntityKind::Volume.field("bootable").unwrap();
        assert_eq!(to_sql(&Value::Bool(true)).unwrap(), SqlValue::Integer(1));
        assert_eq!(
            from_sql(EntityKind::Volume, def, SqlValue::Integer(0)).unwrap(),
            Value::Bool(false)
        );

        let def = EntityKind::Connection.field("connector").unwrap();
        let map = Value::map([("multipath", Value::from(false))]);
        let stored = to_sql(&map).unwrap();
        assert_eq!(from_sql(EntityKind::Connection, def, stored).unwrap(), map);

        let def = EntityKind::Volume.field("size").unwrap();
        assert!(from_sql(EntityKind::Volume, def, SqlValue::Real(1.5)).is_err());
    }

    #[test]
    fn insert_detects_duplicate_primary_key() {
        let conn = conn();
        let values = vec![("id", text("k1")), ("status", text("available"))];
        SNAPSHOTS.insert(&conn, "k1", &values).unwrap();
        let err = SNAPSHOTS.insert(&conn, "k1", &values).unwrap_err();
        assert!(err.is_duplicate());
    }

    #[test]
    fn select_update_and_delete() {
        let conn = conn();
        SNAPSHOTS
            .insert(&conn, "s1", &[("id", text("s1")), ("status", text("creating"))])
            .unwrap();
        assert_eq!(
            SNAPSHOTS
                .update(&conn, "s1", &[("status", text("available"))])
                .unwrap(),
            1
        );
        let rows = SNAPSHOTS.select(&conn, &[], &[], &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]
            .0
            .contains(&("status", Value::from("available"))));

        SNAPSHOTS.soft_delete(&conn, "s1", "2020-01-01T00:00:00Z").unwrap();
        assert!(SNAPSHOTS.select(&conn, &[], &[], &[]).unwrap().is_empty());
        assert!(SNAPSHOTS.exists(&conn, "s1").unwrap());
        SNAPSHOTS.hard_delete(&conn, "s1").unwrap();
        assert!(!SNAPSHOTS.exists(&conn, "s1").unwrap());
    }

    #[test]
    fn revive_clears_deleted_flag() {
        let conn = conn();
        VOLUME_TYPES
            .insert(&conn, "t1", &[("id", text("t1")), ("name", text("t1"))])
            .unwrap();
        assert_eq!(VOLUME_TYPES.revive(&conn, "t1").unwrap(), 0);
        VOLUME_TYPES.soft_delete(&conn, "t1", "2020-01-01T00:00:00Z").unwrap();
        assert!(load_volume_type(&conn, "t1").unwrap().is_none());

        assert_eq!(VOLUME_TYPES.revive(&conn, "t1").unwrap(), 1);
        let vt = load_volume_type(&conn, "t1").unwrap().unwrap();
        assert!(vt.deleted_at().is_none());
    }

    #[test]
    fn side_tables_replace_wholesale() {
        let conn = conn();
        let mut entries = BTreeMap::new();
        entries.insert("a".to_string(), "1".to_string());
        entries.insert("b".to_string(), "2".to_string());
        VOLUME_METADATA.replace(&conn, "v1", &entries).unwrap();
        entries.remove("a");
        VOLUME_METADATA.replace(&conn, "v1", &entries).unwrap();
        assert_eq!(VOLUME_METADATA.read(&conn, "v1").unwrap(), entries);
        VOLUME_METADATA.clear(&conn, "v1").unwrap();
        assert!(VOLUME_METADATA.read(&conn, "v1").unwrap().is_empty());
    }

    #[test]
    fn default_type_is_reused() {
        let conn = conn();
        let first = ensure_default_type(&conn).unwrap();
        let second = ensure_default_type(&conn).unwrap();
        assert_eq!(first, second);
        let vt = load_volume_type(&conn, first.as_str()).unwrap().unwrap();
        assert_eq!(vt.name().as_deref(), Some(DEFAULT_TYPE_NAME));
        assert!(vt.extra_specs().is_empty());
    }
}
