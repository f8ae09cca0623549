//! Dump command implementation.

use super::{batch_dir, batch_files, batch_reader, display_bytes, file_reader, CliError};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use telepipe_core::METADATA_SUFFIX;
use telepipe_storage::Encryption;

/// One batch as printed.
#[derive(Debug, Serialize)]
pub struct DumpedBatch {
    /// Batch name (creation time in epoch milliseconds).
    pub id: String,
    /// Events in file order.
    pub events: Vec<DumpedEvent>,
    /// Content of the metadata sidecar.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// What stopped the read early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corruption: Option<String>,
    /// Bytes after the last complete event.
    pub unread_bytes: usize,
    /// Events that could not be decrypted.
    pub undecryptable: usize,
}

/// One event as printed.
#[derive(Debug, Serialize)]
pub struct DumpedEvent {
    /// Payload, as text when possible.
    pub data: String,
    /// Event metadata, omitted when empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    feature: &str,
    pending: bool,
    limit: Option<usize>,
    format: &str,
    encryption: Option<Arc<dyn Encryption>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let batches = dump(path, feature, pending, limit, encryption)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&batches)?);
        }
        _ => {
            print_text_output(&batches);
        }
    }

    Ok(())
}

/// Reads up to `limit` batches of `feature`, oldest first.
pub fn dump(
    path: &Path,
    feature: &str,
    pending: bool,
    limit: Option<usize>,
    encryption: Option<Arc<dyn Encryption>>,
) -> Result<Vec<DumpedBatch>, Box<dyn std::error::Error>> {
    let dir = batch_dir(path, feature, pending);
    if !dir.is_dir() {
        return Err(CliError::UnknownFeature(feature.to_string()).into());
    }

    let events = batch_reader(encryption.clone());
    let sidecars = file_reader(encryption);
    let mut batches = Vec::new();

    for (ts, file) in batch_files(&dir).into_iter().take(limit.unwrap_or(usize::MAX)) {
        let contents = events.read_events(&file)?;
        let sidecar = dir.join(format!("{ts}{METADATA_SUFFIX}"));
        let metadata = if sidecar.is_file() {
            match sidecars.read_data(&sidecar) {
                Ok(bytes) => Some(display_bytes(&bytes)),
                Err(e) => {
                    tracing::warn!("unable to read {}: {e}", sidecar.display());
                    None
                }
            }
        } else {
            None
        };

        batches.push(DumpedBatch {
            id: ts.to_string(),
            events: contents
                .events
                .iter()
                .map(|e| DumpedEvent {
                    data: display_bytes(&e.data),
                    metadata: (!e.metadata.is_empty()).then(|| display_bytes(&e.metadata)),
                })
                .collect(),
            metadata,
            corruption: contents.corruption.map(|e| e.to_string()),
            unread_bytes: contents.unread_bytes,
            undecryptable: contents.undecryptable,
        });
    }

    Ok(batches)
}

fn print_text_output(batches: &[DumpedBatch]) {
    if batches.is_empty() {
        println!("No batches.");
        return;
    }

    for batch in batches {
        println!("Batch {} ({} events)", batch.id, batch.events.len());
        if let Some(metadata) = &batch.metadata {
            println!("  metadata: {metadata}");
        }
        for (i, event) in batch.events.iter().enumerate() {
            match &event.metadata {
                Some(metadata) => println!("  [{i}] {} (metadata: {metadata})", event.data),
                None => println!("  [{i}] {}", event.data),
            }
        }
        if let Some(corruption) = &batch.corruption {
            println!(
                "  ! corrupted: {corruption} ({} bytes unread)",
                batch.unread_bytes
            );
        }
        if batch.undecryptable > 0 {
            println!("  ! {} events could not be decrypted", batch.undecryptable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::write_batch;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn dumps_batches_oldest_first() {
        let dir = TempDir::new().unwrap();
        let granted = dir.path().join("logs-v2");
        write_batch(&granted.join("2000"), &[b"third"]);
        write_batch(&granted.join("1000"), &[b"first", b"second"]);
        std::fs::write(granted.join("1000_metadata"), b"session-1").unwrap();

        let batches = dump(dir.path(), "logs", false, None, None).unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].id, "1000");
        assert_eq!(batches[0].events[0].data, "first");
        assert_eq!(batches[0].events[1].data, "second");
        assert_eq!(batches[0].metadata.as_deref(), Some("session-1"));
        assert_eq!(batches[1].events[0].data, "third");
        assert!(batches[1].metadata.is_none());
    }

    #[test]
    fn limit_and_pending_are_honored() {
        let dir = TempDir::new().unwrap();
        let pending = dir.path().join("logs-pending-v2");
        write_batch(&pending.join("1000"), &[b"a"]);
        write_batch(&pending.join("2000"), &[b"b"]);

        let batches = dump(dir.path(), "logs", true, Some(1), None).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].events[0].data, "a");
    }

    #[test]
    fn truncated_batches_report_corruption() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("logs-v2").join("1000");
        write_batch(&file, &[b"intact", b"damaged"]);
        let bytes = std::fs::read(&file).unwrap();
        std::fs::write(&file, &bytes[..bytes.len() - 2]).unwrap();

        let batches = dump(dir.path(), "logs", false, None, None).unwrap();

        assert_eq!(batches[0].events.len(), 1);
        assert!(batches[0].corruption.is_some());
        assert!(batches[0].unread_bytes > 0);
    }

    #[test]
    fn unknown_feature_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(dump(dir.path(), "nope", false, None, None).is_err());
    }
}
