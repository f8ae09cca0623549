//! Inspect command implementation.

use super::{batch_dir, batch_files, feature_names, format_size, CliError};
use serde::Serialize;
use std::path::Path;
use telepipe_core::DATASTORE_DIR;

/// Storage root inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Storage root path.
    pub path: String,
    /// Whether a process lock file exists.
    pub lock_file: bool,
    /// Total size of batch files in bytes.
    pub total_size: u64,
    /// Per-feature statistics.
    pub features: Vec<FeatureStats>,
}

/// Statistics for a single feature.
#[derive(Debug, Serialize)]
pub struct FeatureStats {
    /// Feature name.
    pub name: String,
    /// Batches ready for upload.
    pub granted: DirStats,
    /// Batches waiting for consent.
    pub pending: DirStats,
    /// Number of datastore entries.
    pub datastore_entries: usize,
}

/// Statistics for one batch directory.
#[derive(Debug, Default, Serialize)]
pub struct DirStats {
    /// Number of batch files.
    pub batches: usize,
    /// Size of batch files and their sidecars in bytes.
    pub size: u64,
    /// Timestamp of the oldest batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<u64>,
    /// Timestamp of the newest batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest: Option<u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path)?;

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

/// Collects statistics for every feature under `path`.
pub fn inspect(path: &Path) -> Result<InspectResult, CliError> {
    if !path.is_dir() {
        return Err(CliError::NoStorage(path.to_path_buf()));
    }

    let features: Vec<FeatureStats> = feature_names(path)
        .into_iter()
        .map(|name| FeatureStats {
            granted: dir_stats(&batch_dir(path, &name, false)),
            pending: dir_stats(&batch_dir(path, &name, true)),
            datastore_entries: count_files(&path.join(&name).join(DATASTORE_DIR)),
            name,
        })
        .collect();
    tracing::debug!(features = features.len(), "inspected {}", path.display());

    Ok(InspectResult {
        path: path.display().to_string(),
        lock_file: path.join(".lock").exists(),
        total_size: features
            .iter()
            .map(|f| f.granted.size + f.pending.size)
            .sum(),
        features,
    })
}

fn dir_stats(dir: &Path) -> DirStats {
    let files = batch_files(dir);
    let size = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0);
    DirStats {
        batches: files.len(),
        size,
        oldest: files.first().map(|(ts, _)| *ts),
        newest: files.last().map(|(ts, _)| *ts),
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .count()
        })
        .unwrap_or(0)
}

fn print_text_output(result: &InspectResult) {
    println!("Telepipe Storage Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!(
        "Lock: {}",
        if result.lock_file { "present" } else { "absent" }
    );
    println!("Total batch size: {}", format_size(result.total_size));

    if result.features.is_empty() {
        println!();
        println!("No features found.");
        return;
    }

    for feature in &result.features {
        println!();
        println!("Feature {}:", feature.name);
        print_dir("Granted", &feature.granted);
        print_dir("Pending", &feature.pending);
        println!("  Datastore entries: {}", feature.datastore_entries);
    }
}

fn print_dir(label: &str, stats: &DirStats) {
    match (stats.oldest, stats.newest) {
        (Some(oldest), Some(newest)) => println!(
            "  {label}: {} batches, {} (oldest {oldest}, newest {newest})",
            stats.batches,
            format_size(stats.size)
        ),
        _ => println!("  {label}: empty"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::write_batch;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn counts_batches_per_directory() {
        let dir = TempDir::new().unwrap();
        write_batch(&dir.path().join("logs-v2").join("1000"), &[b"a", b"b"]);
        write_batch(&dir.path().join("logs-v2").join("3000"), &[b"c"]);
        write_batch(&dir.path().join("logs-pending-v2").join("2000"), &[b"d"]);
        let store = dir.path().join("logs").join(DATASTORE_DIR);
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(store.join("session"), b"x").unwrap();

        let result = inspect(dir.path()).unwrap();

        assert_eq!(result.features.len(), 1);
        let logs = &result.features[0];
        assert_eq!(logs.granted.batches, 2);
        assert_eq!(logs.granted.oldest, Some(1000));
        assert_eq!(logs.granted.newest, Some(3000));
        assert_eq!(logs.pending.batches, 1);
        assert_eq!(logs.datastore_entries, 1);
        assert_eq!(result.total_size, logs.granted.size + logs.pending.size);
        assert!(!result.lock_file);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            inspect(&dir.path().join("absent")),
            Err(CliError::NoStorage(_))
        ));
    }

    #[test]
    fn json_output_skips_empty_timestamps() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("rum-v2")).unwrap();

        let result = inspect(dir.path()).unwrap();
        let json = serde_json::to_string(&result).unwrap();

        assert!(json.contains("\"name\":\"rum\""));
        assert!(!json.contains("oldest"));
    }
}
