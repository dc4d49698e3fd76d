//! List command implementation.

use super::{ListTarget, StoreArgs};
use volstore_codec::{to_json_pretty, Value};
use volstore_core::{
    ConnectionFilter, Entity, Session, SnapshotFilter, Transport, VolumeFilter,
};

/// Filters accepted by `list`. Each applies only where it makes sense.
#[derive(Debug, Default)]
pub struct Filters {
    /// Entity id.
    pub id: Option<String>,
    /// Display name (volumes, snapshots).
    pub name: Option<String>,
    /// Backend name (volumes).
    pub backend: Option<String>,
    /// Owning volume (snapshots, connections).
    pub volume_id: Option<String>,
}

/// One listed entity.
struct Row {
    id: String,
    status: String,
    summary: String,
    document: Value,
}

/// Runs the list command.
pub fn run(
    store: &StoreArgs,
    target: ListTarget,
    filters: &Filters,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = store.open()?;
    let rows = collect(&session, target, filters)?;

    match format {
        "json" => {
            let docs = rows.into_iter().map(|row| row.document).collect();
            println!("{}", to_json_pretty(&Value::Array(docs))?);
        }
        _ => {
            for row in &rows {
                println!("{}  {:<10} {}", row.id, row.status, row.summary);
            }
            println!("{} {}", rows.len(), target_name(target));
        }
    }
    Ok(())
}

fn collect(
    session: &Session,
    target: ListTarget,
    filters: &Filters,
) -> Result<Vec<Row>, Box<dyn std::error::Error>> {
    let rows = match target {
        ListTarget::Volumes => {
            let mut filter = VolumeFilter::new();
            if let Some(id) = &filters.id {
                filter = filter.volume_id(id.as_str());
            }
            if let Some(name) = &filters.name {
                filter = filter.volume_name(name.as_str());
            }
            if let Some(backend) = &filters.backend {
                filter = filter.backend_name(backend.as_str());
            }
            session
                .volumes(&filter)?
                .into_iter()
                .map(|volume| Row {
                    id: volume.id().to_string(),
                    status: volume.status().unwrap_or_default(),
                    summary: format!(
                        "{} GiB {} on {}",
                        volume.size().unwrap_or_default(),
                        volume.name().unwrap_or_default(),
                        volume.host().unwrap_or_default()
                    ),
                    document: volume.to_transport(true),
                })
                .collect()
        }
        ListTarget::Snapshots => {
            let mut filter = SnapshotFilter::new();
            if let Some(id) = &filters.id {
                filter = filter.snapshot_id(id.as_str());
            }
            if let Some(name) = &filters.name {
                filter = filter.snapshot_name(name.as_str());
            }
            if let Some(volume_id) = &filters.volume_id {
                filter = filter.volume_id(volume_id.as_str());
            }
            session
                .snapshots(&filter)?
                .into_iter()
                .map(|snapshot| Row {
                    id: snapshot.id().to_string(),
                    status: snapshot.status().unwrap_or_default(),
                    summary: format!(
                        "{} of {}",
                        snapshot.name().unwrap_or_default(),
                        snapshot.volume_id().map(String::from).unwrap_or_default()
                    ),
                    document: snapshot.to_transport(true),
                })
                .collect()
        }
        ListTarget::Connections => {
            let mut filter = ConnectionFilter::new();
            if let Some(id) = &filters.id {
                filter = filter.connection_id(id.as_str());
            }
            if let Some(volume_id) = &filters.volume_id {
                filter = filter.volume_id(volume_id.as_str());
            }
            session
                .connections(&filter)?
                .into_iter()
                .map(|connection| Row {
                    id: connection.id().to_string(),
                    status: connection.status().unwrap_or_default(),
                    summary: format!(
                        "{} to {}",
                        connection.volume_id().map(String::from).unwrap_or_default(),
                        connection.attached_host().unwrap_or_default()
                    ),
                    document: connection.to_transport(true),
                })
                .collect()
        }
    };
    Ok(rows)
}

fn target_name(target: ListTarget) -> &'static str {
    match target {
        ListTarget::Volumes => "volume(s)",
        ListTarget::Snapshots => "snapshot(s)",
        ListTarget::Connections => "connection(s)",
    }
}
