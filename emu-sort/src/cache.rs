//! Concatenation cache
//!
//! Joining several recording files into one segment is expensive, so the
//! result is kept in `<session>/concatenated_data/` next to a record of the
//! `[Data]` section that produced it. The artifact is reused only when the
//! stored section is structurally equal to the current one and the artifact
//! still opens; anything else rebuilds it.
//!
//! Write order matters: the old record is deleted first and the new one is
//! written only after the artifact is complete, so a crash mid-build leaves
//! no record and forces a rebuild next run.

use crate::error::{PipelineError, Result};
use crate::recording::{BinaryRecording, RecordingExt, RecordingHandle};
use chrono::{DateTime, Utc};
use emu_common::events::{CacheOutcome, EmuEvent, EventBus};
use emu_common::EmuConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Artifact folder inside the session folder
pub const CACHE_FOLDER: &str = "concatenated_data";

/// Fingerprint record inside the artifact folder
pub const FINGERPRINT_FILE: &str = "last_config.json";

/// Stored alongside the artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// SHA-256 of the canonical JSON, for logs only
    pub digest: String,
    pub written_at: DateTime<Utc>,
    /// `[Data]` section as JSON
    pub data: Value,
}

/// Concatenated recording plus how it was obtained
#[derive(Debug, Clone)]
pub struct CacheResolution {
    pub recording: RecordingHandle,
    pub outcome: CacheOutcome,
    pub folder: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct FingerprintCache {
    event_bus: Option<EventBus>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_bus(event_bus: EventBus) -> Self {
        Self {
            event_bus: Some(event_bus),
        }
    }

    pub fn folder_for(session_folder: &Path) -> PathBuf {
        session_folder.join(CACHE_FOLDER)
    }

    /// Return the concatenation of `source`, reusing the cached artifact when valid
    ///
    /// `source` is the already segment-selected raw recording.
    pub fn get_or_build(
        &self,
        config: &EmuConfig,
        source: &RecordingHandle,
    ) -> Result<CacheResolution> {
        let folder = Self::folder_for(&config.data.session_folder);
        let fingerprint = config.data_fingerprint()?;

        let resolution = if !folder.exists() {
            info!(folder = %folder.display(), "Concatenating recordings (no cached artifact)");
            self.build(&folder, fingerprint, source, CacheOutcome::Built)?
        } else {
            match read_record(&folder) {
                Ok(Some(record)) => match first_difference(&record.data, &fingerprint, "Data") {
                    None => match BinaryRecording::open(&folder) {
                        Ok(recording) => {
                            info!(
                                folder = %folder.display(),
                                digest = %short_digest(&record.digest),
                                "Loading cached concatenated recording"
                            );
                            CacheResolution {
                                recording: Arc::new(recording),
                                outcome: CacheOutcome::Loaded,
                                folder: folder.clone(),
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Cached concatenated recording unreadable, rebuilding");
                            self.rebuild(&folder, fingerprint, source, "cached artifact unreadable")?
                        }
                    },
                    Some(path) => {
                        info!(changed = %path, "Data section changed since last concatenation");
                        self.rebuild(&folder, fingerprint, source, &format!("{} changed", path))?
                    }
                },
                Ok(None) => self.rebuild(&folder, fingerprint, source, "no fingerprint record")?,
                Err(e) => {
                    warn!(error = %e, "Fingerprint record unreadable");
                    self.rebuild(&folder, fingerprint, source, "fingerprint record unreadable")?
                }
            }
        };

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(EmuEvent::CacheResolved {
                artifact: folder.display().to_string(),
                outcome: resolution.outcome.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(resolution)
    }

    fn rebuild(
        &self,
        folder: &Path,
        fingerprint: Value,
        source: &RecordingHandle,
        reason: &str,
    ) -> Result<CacheResolution> {
        info!(folder = %folder.display(), reason, "Rebuilding concatenated recording");
        self.build(
            folder,
            fingerprint,
            source,
            CacheOutcome::Rebuilt {
                reason: reason.to_string(),
            },
        )
    }

    fn build(
        &self,
        folder: &Path,
        fingerprint: Value,
        source: &RecordingHandle,
        outcome: CacheOutcome,
    ) -> Result<CacheResolution> {
        let record_path = folder.join(FINGERPRINT_FILE);
        match std::fs::remove_file(&record_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PipelineError::Cache(format!(
                    "cannot remove stale {}: {}",
                    record_path.display(),
                    e
                )))
            }
        }

        let concatenated = source.concatenate()?;
        let written = BinaryRecording::write(concatenated.as_ref(), folder).map_err(|e| {
            PipelineError::Cache(format!("failed to write {}: {}", folder.display(), e))
        })?;

        let record = FingerprintRecord {
            digest: fingerprint_digest(&fingerprint)?,
            written_at: Utc::now(),
            data: fingerprint,
        };
        write_record(&record_path, &record)?;

        Ok(CacheResolution {
            recording: Arc::new(written),
            outcome,
            folder: folder.to_path_buf(),
        })
    }
}

fn read_record(folder: &Path) -> Result<Option<FingerprintRecord>> {
    let path = folder.join(FINGERPRINT_FILE);
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let record = serde_json::from_str(&text)
        .map_err(|e| PipelineError::Cache(format!("{}: {}", path.display(), e)))?;
    Ok(Some(record))
}

fn write_record(path: &Path, record: &FingerprintRecord) -> Result<()> {
    let text = serde_json::to_string_pretty(record)?;
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);
    std::fs::write(&temp_path, text)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Hex SHA-256 of the canonical (key-sorted) JSON encoding
pub fn fingerprint_digest(fingerprint: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(fingerprint)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

fn short_digest(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

/// Path of the first structural difference, `None` when equal
///
/// Objects compare key-by-key regardless of order, arrays element-wise, and
/// scalars by value and type.
pub fn first_difference(stored: &Value, current: &Value, path: &str) -> Option<String> {
    match (stored, current) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            for key in keys {
                let child = format!("{}.{}", path, key);
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => {
                        if let Some(diff) = first_difference(x, y, &child) {
                            return Some(diff);
                        }
                    }
                    _ => return Some(child),
                }
            }
            None
        }
        (Value::Array(a), Value::Array(b)) if a.len() == b.len() => a
            .iter()
            .zip(b)
            .enumerate()
            .find_map(|(i, (x, y))| first_difference(x, y, &format!("{}[{}]", path, i))),
        (a, b) if a == b => None,
        _ => Some(path.to_string()),
    }
}
