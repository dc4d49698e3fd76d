//! Storage backends implementing [`PersistenceDriver`](crate::PersistenceDriver).

pub mod memory;
pub mod sql;

pub use memory::MemoryBackend;
pub use sql::migrations::{Migration, MigrationManager, MigrationVersion, SchemaStatus};
pub use sql::{Capabilities, SqlBackend};
