//! Key/value maintenance commands.

use super::StoreArgs;
use volstore_core::KeyValue;

/// Prints the pair with `key`, or every pair.
pub fn get(store: &StoreArgs, key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let session = store.open()?;
    let pairs = session.key_values(key)?;
    if let (Some(key), true) = (key, pairs.is_empty()) {
        return Err(format!("No key `{key}`").into());
    }
    for pair in pairs {
        println!("{}={}", pair.key, pair.value.as_deref().unwrap_or("<null>"));
    }
    Ok(())
}

/// Inserts or overwrites a pair.
pub fn set(
    store: &StoreArgs,
    key: &str,
    value: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    store.open()?.save_key_value(&KeyValue::new(key, value))?;
    Ok(())
}

/// Removes a pair. Missing keys are not an error.
pub fn delete(store: &StoreArgs, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    store.open()?.delete_key_value(&KeyValue::new(key, None))?;
    Ok(())
}
