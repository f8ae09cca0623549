//! Datastore command implementation.

use super::{file_reader, CliError};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use telepipe_codec::VersionedRecord;
use telepipe_core::DATASTORE_DIR;
use telepipe_storage::Encryption;

/// One datastore entry as printed.
#[derive(Debug, Serialize)]
pub struct EntryView {
    /// Entry key.
    pub key: String,
    /// Version the entry was written with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Size of the serialized value in bytes.
    pub size: usize,
    /// The value, decoded from CBOR when possible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Why the entry could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the datastore command.
pub fn run(
    path: &Path,
    feature: &str,
    key: Option<&str>,
    format: &str,
    encryption: Option<Arc<dyn Encryption>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let entries = read_entries(path, feature, key, encryption)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(feature, &entries);
        }
    }

    Ok(())
}

/// Reads the entry `key` of `feature`, or every entry.
pub fn read_entries(
    path: &Path,
    feature: &str,
    key: Option<&str>,
    encryption: Option<Arc<dyn Encryption>>,
) -> Result<Vec<EntryView>, CliError> {
    let dir = path.join(feature).join(DATASTORE_DIR);
    if !dir.is_dir() {
        return Err(CliError::UnknownFeature(feature.to_string()));
    }

    let mut keys: Vec<String> = match key {
        Some(key) => vec![key.to_string()],
        None => std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().is_file())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default(),
    };
    keys.sort();

    let reader = file_reader(encryption);
    Ok(keys
        .into_iter()
        .map(|key| {
            let decoded = reader
                .read_data(&dir.join(&key))
                .map_err(|e| e.to_string())
                .and_then(|bytes| VersionedRecord::decode(&bytes).map_err(|e| e.to_string()));
            match decoded {
                Ok(record) => EntryView {
                    version: Some(record.version),
                    size: record.data.len(),
                    value: decode_value(&record.data),
                    error: None,
                    key,
                },
                Err(error) => EntryView {
                    key,
                    version: None,
                    size: 0,
                    value: None,
                    error: Some(error),
                },
            }
        })
        .collect())
}

/// Converts a CBOR value to JSON. Values JSON cannot hold are left out.
fn decode_value(data: &[u8]) -> Option<serde_json::Value> {
    let value: ciborium::Value = ciborium::from_reader(data).ok()?;
    serde_json::to_value(value).ok()
}

fn print_text_output(feature: &str, entries: &[EntryView]) {
    println!("Datastore of {feature}");
    if entries.is_empty() {
        println!("  (empty)");
        return;
    }
    for entry in entries {
        if let Some(error) = &entry.error {
            println!("  {}: unreadable ({error})", entry.key);
            continue;
        }
        let value = entry
            .value
            .as_ref()
            .map_or_else(|| format!("<{} bytes>", entry.size), ToString::to_string);
        println!("  {} (v{}): {value}", entry.key, entry.version.unwrap_or_default());
    }
}
