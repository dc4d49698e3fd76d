//! CLI command implementations.

pub mod inspect;
pub mod kv;
pub mod list;
pub mod transfer;

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use volstore_core::{PersistenceConfig, Session, StorageKind};

/// Connection string used when neither a config file nor `--connection`
/// names one.
pub const DEFAULT_CONNECTION: &str = "sqlite://volumes.db";

/// Options selecting the metadata store.
#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// JSON file holding a persistence configuration
    #[arg(global = true, long)]
    pub config: Option<PathBuf>,

    /// Storage kind (memory, db, memory_db)
    #[arg(global = true, short, long)]
    pub storage: Option<String>,

    /// Connection string, e.g. sqlite:///var/lib/volstore/volumes.db
    #[arg(global = true, short, long)]
    pub connection: Option<String>,

    /// Flag deleted rows instead of removing them
    #[arg(global = true, long)]
    pub soft_deletes: bool,
}

impl StoreArgs {
    /// Builds the persistence configuration.
    ///
    /// The config file is the base; command-line options override it.
    /// Without either, a `db` store at [`DEFAULT_CONNECTION`] is used.
    pub fn to_config(&self) -> Result<PersistenceConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str::<PersistenceConfig>(&text)?
            }
            None => PersistenceConfig::db(DEFAULT_CONNECTION),
        };
        if let Some(storage) = &self.storage {
            config.storage = StorageKind::from_name(storage)?;
        }
        if let Some(connection) = &self.connection {
            config.connection = Some(connection.clone());
        }
        if self.soft_deletes {
            config.soft_deletes = true;
        }
        config.validate()?;
        Ok(config)
    }

    /// Opens a session on the configured store.
    pub fn open(&self) -> Result<Session, Box<dyn std::error::Error>> {
        Ok(Session::open(&self.to_config()?)?)
    }
}

/// Encoding of transport documents on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// JSON text
    Json,
    /// CBOR bytes
    Cbor,
}

impl Format {
    /// Guesses the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("cbor") => Self::Cbor,
            _ => Self::Json,
        }
    }
}

/// Entity collections `list` can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListTarget {
    /// Volumes
    Volumes,
    /// Snapshots
    Snapshots,
    /// Connections
    Connections,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn default_store_is_a_database_file() {
        let config = StoreArgs::default().to_config().unwrap();
        assert_eq!(config.storage, StorageKind::Db);
        assert_eq!(config.connection.as_deref(), Some(DEFAULT_CONNECTION));
    }

    #[test]
    fn options_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"storage": "db", "connection": "sqlite:///tmp/a.db", "soft_deletes": false}"#,
        )
        .unwrap();

        let args = StoreArgs {
            config: Some(path),
            connection: Some("sqlite:///tmp/b.db".to_string()),
            soft_deletes: true,
            ..StoreArgs::default()
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.connection.as_deref(), Some("sqlite:///tmp/b.db"));
        assert!(config.soft_deletes);
    }

    #[test]
    fn unsupported_engine_is_rejected() {
        let args = StoreArgs {
            connection: Some("postgresql://db/volumes".to_string()),
            ..StoreArgs::default()
        };
        assert!(args.to_config().is_err());

        let args = StoreArgs {
            storage: Some("tape".to_string()),
            ..StoreArgs::default()
        };
        assert!(args.to_config().is_err());
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("dump.cbor")), Format::Cbor);
        assert_eq!(Format::from_path(Path::new("dump.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("dump")), Format::Json);
    }
}
