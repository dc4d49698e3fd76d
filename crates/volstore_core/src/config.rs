//! Persistence configuration.

use crate::error::{CoreError, CoreResult};
use serde::Deserialize;
use std::path::PathBuf;

/// Connection string used by the `memory_db` storage kind.
pub const IN_MEMORY_CONNECTION: &str = "sqlite://";

const SQLITE_SCHEME: &str = "sqlite://";

/// Which persistence backend a session uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Process-local maps. Nothing survives the process.
    #[default]
    Memory,
    /// Relational database named by the connection string.
    Db,
    /// Relational backend over a private in-memory database.
    MemoryDb,
}

impl StorageKind {
    /// Parses a storage kind name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for an unknown name.
    pub fn from_name(name: &str) -> CoreResult<Self> {
        match name {
            "memory" => Ok(Self::Memory),
            "db" => Ok(Self::Db),
            "memory_db" => Ok(Self::MemoryDb),
            other => Err(CoreError::invalid_configuration(format!(
                "unknown storage kind `{other}`"
            ))),
        }
    }

    /// The configuration name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Db => "db",
            Self::MemoryDb => "memory_db",
        }
    }
}

/// Where a relational database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database.
    Memory,
    /// Database file.
    File(PathBuf),
}

impl DatabaseLocation {
    /// Parses a connection string.
    ///
    /// `sqlite://` is an in-memory database, `sqlite:///abs/path.db` and
    /// `sqlite://rel/path.db` are files.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for empty strings, strings without a
    /// scheme and engines other than SQLite.
    pub fn parse(connection: &str) -> CoreResult<Self> {
        let connection = connection.trim();
        if connection.is_empty() {
            return Err(CoreError::invalid_configuration(
                "connection string is empty",
            ));
        }
        if let Some(path) = connection.strip_prefix(SQLITE_SCHEME) {
            return Ok(match path {
                "" | ":memory:" | "/:memory:" => Self::Memory,
                path => Self::File(PathBuf::from(path)),
            });
        }
        match connection.split_once("://") {
            Some((scheme, _)) => {
                let engine = scheme.split('+').next().unwrap_or(scheme);
                Err(CoreError::invalid_configuration(format!(
                    "unsupported database engine `{engine}`"
                )))
            }
            None => Err(CoreError::invalid_configuration(format!(
                "connection string `{connection}` has no scheme"
            ))),
        }
    }
}

/// Configuration for opening a persistence session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Backend selection.
    pub storage: StorageKind,

    /// Connection string for the `db` storage kind.
    pub connection: Option<String>,

    /// Flag deleted rows instead of removing them.
    pub soft_deletes: bool,

    /// Wait for the database to reach durable storage on every commit.
    pub synchronous_writes: bool,

    /// Upgrade older stored schemas when opening.
    pub auto_migrate: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Memory,
            connection: None,
            soft_deletes: false,
            synchronous_writes: true,
            auto_migrate: true,
        }
    }
}

impl PersistenceConfig {
    /// Creates a configuration with default values (memory storage).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for the memory backend.
    #[must_use]
    pub fn memory() -> Self {
        Self::default()
    }

    /// Configuration for the relational backend over a private in-memory
    /// database.
    #[must_use]
    pub fn memory_db() -> Self {
        Self::default().storage(StorageKind::MemoryDb)
    }

    /// Configuration for the relational backend at `connection`.
    #[must_use]
    pub fn db(connection: impl Into<String>) -> Self {
        Self {
            connection: Some(connection.into()),
            ..Self::default().storage(StorageKind::Db)
        }
    }

    /// Sets the storage kind.
    #[must_use]
    pub const fn storage(mut self, storage: StorageKind) -> Self {
        self.storage = storage;
        self
    }

    /// Sets whether deletes only flag rows.
    #[must_use]
    pub const fn soft_deletes(mut self, value: bool) -> Self {
        self.soft_deletes = value;
        self
    }

    /// Sets whether commits are synchronous.
    #[must_use]
    pub const fn synchronous_writes(mut self, value: bool) -> Self {
        self.synchronous_writes = value;
        self
    }

    /// Sets whether older schemas are migrated on open.
    #[must_use]
    pub const fn auto_migrate(mut self, value: bool) -> Self {
        self.auto_migrate = value;
        self
    }

    /// Checks the configuration and resolves the database location.
    ///
    /// Returns `None` for the memory backend.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when `db` has no connection string or
    /// the connection string names an unsupported engine.
    pub fn validate(&self) -> CoreResult<Option<DatabaseLocation>> {
        match self.storage {
            StorageKind::Memory => Ok(None),
            StorageKind::MemoryDb => Ok(Some(DatabaseLocation::Memory)),
            StorageKind::Db => {
                let connection = self.connection.as_deref().ok_or_else(|| {
                    CoreError::invalid_configuration("db storage requires a connection string")
                })?;
                DatabaseLocation::parse(connection).map(Some)
            }
        }
    }
}
