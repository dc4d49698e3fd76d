//! Export and import of transport documents.

use super::{Format, StoreArgs};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;
use volstore_codec::{class_of, from_json, to_json_pretty, Decode, Encode, Value};
use volstore_core::transport::BACKEND_CLASS;
use volstore_core::Session;

/// Writes the backend dump of the store, or of one backend.
pub fn export(
    store: &StoreArgs,
    backend: Option<&str>,
    format: Format,
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = store.open()?;
    let dump = session.dump(backend)?;
    let bytes = encode(&dump.to_transport(), format)?;

    match output {
        Some(path) => {
            let mut file = fs::File::create(path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            info!(volumes = dump.volumes.len(), path = %path.display(), "exported");
            println!("✓ Exported {} volume(s) to {}", dump.volumes.len(), path.display());
        }
        None => {
            std::io::stdout().write_all(&bytes)?;
            if format == Format::Json {
                println!();
            }
        }
    }
    Ok(())
}

/// Loads a document from `path`, saving it unless `save` is false.
pub fn import(
    store: &StoreArgs,
    path: &Path,
    format: Option<Format>,
    save: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let format = format.unwrap_or_else(|| Format::from_path(path));
    let value = decode(&fs::read(path)?, format)?;
    let session = store.open()?;
    let summary = import_value(&session, value, save)?;

    if save {
        println!("✓ Imported {summary}");
    } else {
        println!("Would import {summary}");
    }
    Ok(())
}

fn import_value(
    session: &Session,
    value: Value,
    save: bool,
) -> Result<String, Box<dyn std::error::Error>> {
    if class_of(&value)? == BACKEND_CLASS {
        let dump = session.load_dump(value, save)?;
        let backend = dump.backend_name.as_deref().unwrap_or("all backends");
        return Ok(format!("{} volume(s) of {backend}", dump.volumes.len()));
    }
    let entity = session.load(value, save)?;
    Ok(format!("one {}", entity.kind()))
}

fn encode(value: &Value, format: Format) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    Ok(match format {
        Format::Json => to_json_pretty(value)?.into_bytes(),
        Format::Cbor => value.encode()?,
    })
}

fn decode(bytes: &[u8], format: Format) -> Result<Value, Box<dyn std::error::Error>> {
    Ok(match format {
        Format::Json => from_json(std::str::from_utf8(bytes)?)?,
        Format::Cbor => Value::decode(bytes)?,
    })
}
