//! # volstore Core
//!
//! Persistence layer for storage-volume metadata.
//!
//! Volumes, snapshots, connections and key/value pairs are handled through
//! one entity model while the records live in an interchangeable backend.
//!
//! This crate provides:
//! - Entity wrappers with per-field change tracking
//! - Diff-based persistence with create/update retry on duplicate ids
//! - The [`PersistenceDriver`] interface and its memory and SQLite backends
//! - The in-flight registry for volumes that are still being created
//! - Transport documents for backend-independent exchange
//! - [`DbShim`], the record interface offered to the storage-driver engine
//!
//! ## Backends
//!
//! - [`MemoryBackend`] keeps entity handles in process-local maps
//! - [`SqlBackend`] stores rows in SQLite, in memory or in a file
//!
//! ## Example
//!
//! ```rust
//! use volstore_core::{Entity, PersistenceConfig, Session, Volume, VolumeFilter, VolumeSpec};
//!
//! let session = Session::open(&PersistenceConfig::memory_db()).unwrap();
//! let volume = Volume::new("node@lvm#pool", VolumeSpec::new(1).name("disk")).unwrap();
//! session.create_volume(&volume, |_| Ok(())).unwrap();
//!
//! let found = session.volumes(&VolumeFilter::new().backend_name("lvm")).unwrap();
//! assert_eq!(found.len(), 1);
//! assert_eq!(found[0].status().as_deref(), Some("available"));
//! assert_eq!(found[0].volume_type(session.driver()).unwrap().id(), volume.id());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
mod config;
mod driver;
pub mod entity;
mod error;
mod inflight;
mod session;
mod shim;
pub mod tracker;
pub mod transport;

pub use backend::{
    Capabilities, MemoryBackend, Migration, MigrationManager, MigrationVersion, SchemaStatus,
    SqlBackend,
};
pub use config::{DatabaseLocation, PersistenceConfig, StorageKind, IN_MEMORY_CONNECTION};
pub use driver::{ConnectionFilter, PersistenceDriver, SnapshotFilter, VolumeFilter};
pub use entity::{
    backend_name_of, Baseline, Connection, Entity, EntityId, EntityKind, KeyValue, QosSpecs,
    Snapshot, SnapshotSpec, Volume, VolumeSpec, VolumeType,
};
pub use error::{CoreError, CoreResult};
pub use inflight::{InflightGuard, InflightRegistry};
pub use session::Session;
pub use shim::{DbShim, DriverDb, Model, ModelRecord};
pub use transport::{AnyEntity, BackendDump, Transport};
