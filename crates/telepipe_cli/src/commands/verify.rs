//! Verify command implementation.

use super::{batch_dir, batch_files, batch_reader, feature_names, file_reader, CliError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use telepipe_codec::VersionedRecord;
use telepipe_core::DATASTORE_DIR;
use telepipe_storage::Encryption;

/// A damaged file.
#[derive(Debug)]
pub struct Damage {
    /// The file.
    pub file: PathBuf,
    /// What is wrong with it.
    pub problem: String,
}

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of batch files checked.
    pub batches_checked: usize,
    /// Number of events read from intact or partially intact batches.
    pub events_read: usize,
    /// Number of datastore entries checked.
    pub entries_checked: usize,
    /// Damaged files.
    pub damaged: Vec<Damage>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.damaged.is_empty()
    }
}

/// Runs the verify command.
pub fn run(
    path: &Path,
    feature: Option<&str>,
    encryption: Option<Arc<dyn Encryption>>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying storage at {}", path.display());
    println!();

    let result = verify(path, feature, encryption)?;

    println!("Batches checked:   {}", result.batches_checked);
    println!("Events read:       {}", result.events_read);
    println!("Datastore entries: {}", result.entries_checked);
    for damage in &result.damaged {
        println!("  ✗ {}: {}", damage.file.display(), damage.problem);
    }

    println!();
    if result.is_ok() {
        println!("✓ Storage verification passed");
        Ok(())
    } else {
        println!("✗ Storage verification failed");
        Err(CliError::Damaged(result.damaged.len()).into())
    }
}

/// Reads every batch and datastore entry of `feature`, or of all features.
pub fn verify(
    path: &Path,
    feature: Option<&str>,
    encryption: Option<Arc<dyn Encryption>>,
) -> Result<VerifyResult, CliError> {
    if !path.is_dir() {
        return Err(CliError::NoStorage(path.to_path_buf()));
    }
    let features = match feature {
        Some(name) => {
            if !feature_names(path).iter().any(|f| f == name) {
                return Err(CliError::UnknownFeature(name.to_string()));
            }
            vec![name.to_string()]
        }
        None => feature_names(path),
    };

    let events = batch_reader(encryption.clone());
    let entries = file_reader(encryption);
    let mut result = VerifyResult::default();

    for name in &features {
        for pending in [false, true] {
            for (_, file) in batch_files(&batch_dir(path, name, pending)) {
                result.batches_checked += 1;
                match events.read_events(&file) {
                    Ok(contents) => {
                        result.events_read += contents.events.len();
                        if let Some(corruption) = contents.corruption {
                            result.damaged.push(Damage {
                                problem: format!(
                                    "{corruption} after {} events",
                                    contents.events.len()
                                ),
                                file,
                            });
                        } else if contents.undecryptable > 0 {
                            result.damaged.push(Damage {
                                problem: format!(
                                    "{} events could not be decrypted",
                                    contents.undecryptable
                                ),
                                file,
                            });
                        }
                    }
                    Err(e) => result.damaged.push(Damage {
                        problem: e.to_string(),
                        file,
                    }),
                }
            }
        }

        let store = path.join(name).join(DATASTORE_DIR);
        let Ok(dir) = std::fs::read_dir(&store) else {
            continue;
        };
        for file in dir.filter_map(Result::ok).map(|e| e.path()) {
            if !file.is_file() {
                continue;
            }
            result.entries_checked += 1;
            let decoded = entries
                .read_data(&file)
                .map_err(|e| e.to_string())
                .and_then(|bytes| VersionedRecord::decode(&bytes).map_err(|e| e.to_string()));
            if let Err(problem) = decoded {
                result.damaged.push(Damage { file, problem });
            }
        }
    }

    tracing::debug!(
        batches = result.batches_checked,
        damaged = result.damaged.len(),
        "verified {}",
        path.display()
    );
    Ok(result)
}
