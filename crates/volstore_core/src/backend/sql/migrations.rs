//! Schema versioning for the relational backend.
//!
//! Migrations are forward-only and recorded in `schema_migrations`. Each
//! one runs in its own transaction, so a failure leaves the schema at the
//! last applied version.

use crate::entity::now;
use crate::error::{CoreError, CoreResult};
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use volstore_codec::format_timestamp;

/// Version number for migrations.
pub type MigrationVersion = u32;

/// A schema migration.
pub trait Migration: Send + Sync {
    /// Version number. Unique and sequential from 1.
    fn version(&self) -> MigrationVersion;

    /// Short name recorded alongside the version.
    fn name(&self) -> &str;

    /// Applies the migration inside `tx`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    fn up(&self, tx: &Transaction<'_>) -> CoreResult<()>;
}

/// Migration defined by a static SQL batch.
#[derive(Debug, Clone, Copy)]
pub struct SqlMigration {
    version: MigrationVersion,
    name: &'static str,
    sql: &'static str,
}

impl Migration for SqlMigration {
    fn version(&self) -> MigrationVersion {
        self.version
    }

    fn name(&self) -> &str {
        self.name
    }

    fn up(&self, tx: &Transaction<'_>) -> CoreResult<()> {
        tx.execute_batch(self.sql)?;
        Ok(())
    }
}

const CORE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS volume_types (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    name TEXT,
    is_public INTEGER,
    qos_specs_id TEXT
);
CREATE TABLE IF NOT EXISTS volume_type_extra_specs (
    volume_type_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (volume_type_id, key)
);
CREATE TABLE IF NOT EXISTS qos_specs (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    name TEXT,
    consumer TEXT,
    specs TEXT
);
CREATE TABLE IF NOT EXISTS volumes (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    status TEXT,
    size INTEGER,
    display_name TEXT,
    display_description TEXT,
    bootable INTEGER,
    host TEXT,
    availability_zone TEXT,
    attach_status TEXT,
    volume_type_id TEXT
);
CREATE TABLE IF NOT EXISTS volume_metadata (
    volume_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (volume_id, key)
);
CREATE TABLE IF NOT EXISTS volume_admin_metadata (
    volume_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    PRIMARY KEY (volume_id, key)
);
CREATE TABLE IF NOT EXISTS snapshots (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    status TEXT,
    volume_id TEXT,
    volume_size INTEGER,
    display_name TEXT,
    display_description TEXT,
    progress TEXT
);
CREATE TABLE IF NOT EXISTS volume_attachment (
    id TEXT PRIMARY KEY NOT NULL,
    created_at TEXT,
    updated_at TEXT,
    deleted_at TEXT,
    deleted INTEGER NOT NULL DEFAULT 0,
    status TEXT,
    volume_id TEXT,
    attach_mode TEXT,
    attached_host TEXT,
    instance_uuid TEXT,
    connector TEXT,
    connection_info TEXT
);
CREATE TABLE IF NOT EXISTS key_value (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT
);
";

const LOOKUP_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS ix_volumes_host ON volumes (host);
CREATE INDEX IF NOT EXISTS ix_volumes_display_name ON volumes (display_name);
CREATE INDEX IF NOT EXISTS ix_snapshots_volume_id ON snapshots (volume_id);
CREATE INDEX IF NOT EXISTS ix_volume_attachment_volume_id ON volume_attachment (volume_id);
";

const MIGRATION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
";

/// Outcome of bringing a database up to the expected schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatus {
    /// Version stored before opening.
    pub stored: MigrationVersion,
    /// Version this build expects.
    pub expected: MigrationVersion,
    /// Migrations applied while opening.
    pub applied: Vec<MigrationVersion>,
}

impl SchemaStatus {
    /// Whether the database was written by a newer build.
    #[must_use]
    pub fn is_newer(&self) -> bool {
        self.stored > self.expected
    }

    /// Version of the schema now in place.
    #[must_use]
    pub fn current(&self) -> MigrationVersion {
        self.applied.last().copied().unwrap_or(self.stored)
    }
}

/// Registered migrations, by version.
pub struct MigrationManager {
    migrations: BTreeMap<MigrationVersion, Box<dyn Migration>>,
}

impl MigrationManager {
    /// Creates a manager with no migrations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// The migrations that build the volstore schema.
    #[must_use]
    pub fn standard() -> Self {
        let mut manager = Self::new();
        for migration in [
            SqlMigration {
                version: 1,
                name: "core_tables",
                sql: CORE_TABLES,
            },
            SqlMigration {
                version: 2,
                name: "lookup_indexes",
                sql: LOOKUP_INDEXES,
            },
        ] {
            manager
                .migrations
                .insert(migration.version, Box::new(migration));
        }
        manager
    }

    /// Registers a migration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the version is already registered.
    pub fn register(&mut self, migration: Box<dyn Migration>) -> CoreResult<()> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(CoreError::invalid_configuration(format!(
                "migration version {version} already registered"
            )));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Highest registered version.
    #[must_use]
    pub fn latest(&self) -> MigrationVersion {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }

    /// Versions and names of all registered migrations.
    #[must_use]
    pub fn list(&self) -> Vec<(MigrationVersion, String)> {
        self.migrations
            .values()
            .map(|m| (m.version(), m.name().to_string()))
            .collect()
    }

    /// Brings the schema up to [`latest`](Self::latest).
    ///
    /// A fresh database is always initialized. An older one is migrated
    /// only when `auto_migrate` is set. A newer one is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `SchemaVersion` for an older schema when `auto_migrate` is
    /// off, and propagates database errors from failing migrations.
    pub fn ensure(&self, conn: &mut Connection, auto_migrate: bool) -> CoreResult<SchemaStatus> {
        conn.execute_batch(MIGRATION_TABLE)?;
        let stored = stored_version(conn)?;
        let expected = self.latest();
        let mut status = SchemaStatus {
            stored,
            expected,
            applied: Vec::new(),
        };

        if stored > expected {
            warn!(
                stored,
                expected, "database schema is newer than this build, continuing"
            );
            return Ok(status);
        }
        if stored > 0 && stored < expected && !auto_migrate {
            return Err(CoreError::SchemaVersion {
                found: stored,
                expected,
            });
        }

        for migration in self.migrations.range(stored + 1..).map(|(_, m)| m) {
            let tx = conn.transaction()?;
            migration.up(&tx)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![
                    migration.version(),
                    migration.name(),
                    format_timestamp(&now())
                ],
            )?;
            tx.commit()?;
            debug!(
                version = migration.version(),
                name = migration.name(),
                "applied schema migration"
            );
            status.applied.push(migration.version());
        }
        Ok(status)
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Highest version recorded in `schema_migrations`, 0 when none.
///
/// # Errors
///
/// Propagates database errors.
pub fn stored_version(conn: &Connection) -> CoreResult<MigrationVersion> {
    let version: Option<MigrationVersion> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Migration for Broken {
        fn version(&self) -> MigrationVersion {
            3
        }

        fn name(&self) -> &str {
            "broken"
        }

        fn up(&self, tx: &Transaction<'_>) -> CoreResult<()> {
            tx.execute_batch("CREATE TABLE half_done (x INTEGER); SELECT * FROM missing;")?;
            Ok(())
        }
    }

    #[test]
    fn fresh_database_gets_every_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        let status = MigrationManager::standard().ensure(&mut conn, true).unwrap();
        assert_eq!(status.stored, 0);
        assert_eq!(status.applied, vec![1, 2]);
        assert_eq!(status.current(), 2);
        assert_eq!(stored_version(&conn).unwrap(), 2);

        let again = MigrationManager::standard().ensure(&mut conn, true).unwrap();
        assert!(again.applied.is_empty());
    }

    #[test]
    fn older_schema_without_auto_migrate_fails() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut v1 = MigrationManager::new();
        v1.register(Box::new(SqlMigration {
            version: 1,
            name: "core_tables",
            sql: CORE_TABLES,
        }))
        .unwrap();
        v1.ensure(&mut conn, true).unwrap();

        let err = MigrationManager::standard()
            .ensure(&mut conn, false)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::SchemaVersion {
                found: 1,
                expected: 2
            }
        ));

        let status = MigrationManager::standard().ensure(&mut conn, true).unwrap();
        assert_eq!(status.applied, vec![2]);
    }

    #[test]
    fn newer_schema_is_tolerated() {
        let mut conn = Connection::open_in_memory().unwrap();
        MigrationManager::standard().ensure(&mut conn, true).unwrap();
        conn.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (9, 'future', 'x')",
            [],
        )
        .unwrap();
        let status = MigrationManager::standard().ensure(&mut conn, false).unwrap();
        assert!(status.is_newer());
        assert!(status.applied.is_empty());
    }

    #[test]
    fn failing_migration_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        let mut manager = MigrationManager::standard();
        manager.register(Box::new(Broken)).unwrap();
        assert!(matches!(
            manager.ensure(&mut conn, true),
            Err(CoreError::Database(_))
        ));
        assert_eq!(stored_version(&conn).unwrap(), 2);
        let leftover: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut manager = MigrationManager::standard();
        assert!(manager
            .register(Box::new(SqlMigration {
                version: 2,
                name: "again",
                sql: "",
            }))
            .is_err());
        assert_eq!(manager.list().len(), 2);
    }

    #[test]
    fn default_manager_is_empty() {
        let manager = MigrationManager::default();
        assert_eq!(manager.latest(), 0);
        assert!(manager.list().is_empty());
        assert_eq!(MigrationManager::standard().latest(), 2);
    }
}
