//! Session fixtures and entity helpers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;
use volstore_core::{PersistenceConfig, Session, StorageKind, Volume, VolumeSpec};

/// A session with automatic cleanup of any database file.
pub struct TestSession {
    /// The session.
    pub session: Session,
    /// Storage kind the session was opened with.
    pub storage: StorageKind,
    /// Holds the database file, if any.
    _temp_dir: Option<TempDir>,
}

impl TestSession {
    /// Session over the memory backend.
    pub fn memory() -> Self {
        Self::open(PersistenceConfig::memory())
    }

    /// Session over a private in-memory SQLite database.
    pub fn memory_db() -> Self {
        Self::open(PersistenceConfig::memory_db())
    }

    /// Session over a private in-memory SQLite database with soft deletes.
    pub fn memory_db_soft_deletes() -> Self {
        Self::open(PersistenceConfig::memory_db().soft_deletes(true))
    }

    /// Session over a SQLite file in a temporary directory.
    pub fn file_db() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = PersistenceConfig::db(connection_for(&temp_dir));
        let session = Session::open(&config).expect("Failed to open file database");
        Self {
            session,
            storage: StorageKind::Db,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Opens a session from `config`.
    pub fn open(config: PersistenceConfig) -> Self {
        let session = Session::open(&config).expect("Failed to open session");
        Self {
            session,
            storage: config.storage,
            _temp_dir: None,
        }
    }

    /// Database file path, if file-based.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(database_path)
    }

    /// Opens a second session over the same database file.
    ///
    /// Returns `None` for sessions without a file.
    pub fn reopen(&self) -> Option<Session> {
        let temp_dir = self._temp_dir.as_ref()?;
        let config = PersistenceConfig::db(connection_for(temp_dir));
        Some(Session::open(&config).expect("Failed to reopen file database"))
    }

    /// Whether the session stores rows in SQLite.
    pub fn is_relational(&self) -> bool {
        self.storage != StorageKind::Memory
    }
}

impl std::ops::Deref for TestSession {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

fn database_path(temp_dir: &TempDir) -> PathBuf {
    temp_dir.path().join("volumes.db")
}

fn connection_for(temp_dir: &TempDir) -> String {
    format!("sqlite://{}", database_path(temp_dir).display())
}

/// Runs a test with a session of the given storage kind.
///
/// `Db` uses a temporary file.
pub fn with_session<F, R>(storage: StorageKind, f: F) -> R
where
    F: FnOnce(&Session) -> R,
{
    let fixture = match storage {
        StorageKind::Memory => TestSession::memory(),
        StorageKind::MemoryDb => TestSession::memory_db(),
        StorageKind::Db => TestSession::file_db(),
    };
    f(&fixture.session)
}

/// Builds a string map from pairs.
pub fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Creates and persists a volume through the session's creation flow.
pub fn create_volume(session: &Session, host: &str, spec: VolumeSpec) -> Volume {
    let volume = Volume::new(host, spec).expect("Failed to build volume");
    session
        .create_volume(&volume, |_| Ok(()))
        .expect("Failed to create volume");
    volume
}

/// Creates `count` volumes of size 1 named `disk-<n>` on `host`.
pub fn create_n_volumes(session: &Session, host: &str, count: usize) -> Vec<Volume> {
    (0..count)
        .map(|n| create_volume(session, host, VolumeSpec::new(1).name(format!("disk-{n}"))))
        .collect()
}
