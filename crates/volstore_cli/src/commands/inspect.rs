//! Inspect command implementation.

use super::StoreArgs;
use serde::Serialize;
use std::sync::Arc;
use volstore_core::{
    DatabaseLocation, InflightRegistry, MigrationVersion, SqlBackend, StorageKind,
};

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database location.
    pub location: String,
    /// Schema version found when opening.
    pub stored_version: MigrationVersion,
    /// Schema version this build expects.
    pub expected_version: MigrationVersion,
    /// Migrations applied while opening.
    pub applied: Vec<MigrationVersion>,
    /// Whether a newer build wrote the database.
    pub newer_schema: bool,
    /// Whether deletes only flag rows.
    pub soft_deletes: bool,
    /// Whether key/value writes use a native upsert.
    pub native_upsert: bool,
    /// Live rows per table.
    pub tables: Vec<TableStats>,
}

/// Row count of one table.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name.
    pub name: String,
    /// Rows not flagged deleted.
    pub rows: i64,
}

/// Runs the inspect command.
pub fn run(store: &StoreArgs, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = store.to_config()?;
    if config.storage == StorageKind::Memory {
        return Err("the memory store keeps nothing to inspect".into());
    }

    let backend = SqlBackend::open(&config, Arc::new(InflightRegistry::new()))?;
    let schema = backend.schema();
    let result = InspectResult {
        location: match backend.location() {
            DatabaseLocation::Memory => "in-memory".to_string(),
            DatabaseLocation::File(path) => path.display().to_string(),
        },
        stored_version: schema.stored,
        expected_version: schema.expected,
        applied: schema.applied.clone(),
        newer_schema: schema.is_newer(),
        soft_deletes: backend.soft_deletes(),
        native_upsert: backend.capabilities().upsert,
        tables: backend
            .table_counts()?
            .into_iter()
            .map(|(name, rows)| TableStats {
                name: name.to_string(),
                rows,
            })
            .collect(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("volstore Database Inspection");
    println!("============================");
    println!();
    println!("Location: {}", result.location);
    println!();
    println!("Schema:");
    println!("  Stored version:   {}", result.stored_version);
    println!("  Expected version: {}", result.expected_version);
    if !result.applied.is_empty() {
        let applied: Vec<String> = result.applied.iter().map(ToString::to_string).collect();
        println!("  Applied now:      {}", applied.join(", "));
    }
    if result.newer_schema {
        println!("  (written by a newer build)");
    }
    println!();
    println!("Options:");
    println!("  Soft deletes:  {}", result.soft_deletes);
    println!("  Native upsert: {}", result.native_upsert);
    println!();
    println!("Rows:");
    for table in &result.tables {
        println!("  {:<24} {}", table.name, table.rows);
    }
}
