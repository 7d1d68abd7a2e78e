//! # Candidate Files
//!
//! File-based scrobble source used by the out-of-process helper. The helper
//! reads the device itself and writes the plays it found to a JSON file:
//!
//! ```json
//! { "tracks": [ { "artist": "...", "title": "...", "timestamp": "...", ... } ] }
//! ```
//!
//! Those plays go through the same filter, anomaly guard, confirmation and
//! sink as a live device session. The helper owns the counters, so there
//! is no cache to commit; consuming a batch means deleting its files.

use crate::coordinator::{EntryOutcome, DISABLED_REASON};
use crate::delta::sort_chronologically;
use crate::error::{Result, SyncError};
use crate::policy::{remember_choice, ScrobblePolicy};
use crate::session::{SessionContext, SessionId, SessionOutcome};
use bridge_traits::{ConfirmationRequest, TrackRecord};
use core_runtime::events::{CoreEvent, DeviceEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Extension of candidate files under the devices directory.
pub const CANDIDATE_FILE_EXTENSION: &str = "json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFile {
    pub tracks: Vec<TrackRecord>,
}

/// Parse one candidate file.
pub async fn read_candidate_file(path: &Path) -> Result<Vec<TrackRecord>> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| SyncError::CandidateFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let file: CandidateFile =
        serde_json::from_slice(&raw).map_err(|e| SyncError::CandidateFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(file.tracks)
}

/// Candidate files left behind by earlier runs, sorted by path.
///
/// A missing directory yields nothing.
pub async fn find_leftover_files(devices_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![devices_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(SyncError::Bridge(e.into())),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::Bridge(e.into()))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SyncError::Bridge(e.into()))?;

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(CANDIDATE_FILE_EXTENSION)
            {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

async fn remove_files(files: &[PathBuf]) {
    for file in files {
        match tokio::fs::remove_file(file).await {
            Ok(()) => debug!(path = %file.display(), "Candidate file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %file.display(), error = %e, "Failed to remove candidate file"),
        }
    }
}

/// Runs candidate-file batches through the scrobble pipeline, one at a time.
pub struct CandidateProcessor {
    context: SessionContext,
    policy: ScrobblePolicy,
    busy: Mutex<()>,
}

impl CandidateProcessor {
    pub fn new(context: SessionContext, policy: ScrobblePolicy) -> Self {
        Self {
            context,
            policy,
            busy: Mutex::new(()),
        }
    }

    fn emit(&self, event: DeviceEvent) {
        self.context.event_bus.emit(CoreEvent::Device(event)).ok();
    }

    /// Process one batch of candidate files.
    ///
    /// Batches run one after another: a batch that arrives while another
    /// waits for confirmation is processed once that one is resolved.
    ///
    /// Files are deleted once their plays were submitted, rejected or
    /// discarded. They are kept when the sink fails so the batch is picked
    /// up again as leftovers.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn process_candidate_files(&self, files: &[PathBuf]) -> Result<EntryOutcome> {
        let _guard = self.busy.lock().await;

        let policy = self
            .policy
            .clone()
            .with_settings(self.context.settings.as_ref())
            .await;

        if !policy.device_scrobbling_enabled {
            info!("Device scrobbling disabled, discarding candidate files");
            remove_files(files).await;
            return Ok(EntryOutcome::Dropped {
                reason: DISABLED_REASON.to_string(),
            });
        }

        let mut tracks = Vec::new();
        for file in files {
            match read_candidate_file(file).await {
                Ok(records) => tracks.extend(records),
                Err(e) => warn!(error = %e, "Skipping unreadable candidate file"),
            }
        }
        tracks.retain(|t| policy.is_eligible(t));

        let batch = SessionId::new();
        let (outcome, consumed) = self.resolve(batch, &policy, tracks).await;
        if consumed {
            remove_files(files).await;
        }

        Ok(EntryOutcome::Session(outcome))
    }

    async fn resolve(
        &self,
        batch: SessionId,
        policy: &ScrobblePolicy,
        mut tracks: Vec<TrackRecord>,
    ) -> (SessionOutcome, bool) {
        let count = tracks.len();

        if count == 0 {
            self.emit(DeviceEvent::NoScrobbles {
                session_id: batch.to_string(),
            });
            return (SessionOutcome::NoScrobbles, true);
        }

        if policy.is_anomalous(count as u64) {
            warn!(count, "Discarding anomalous candidate batch");
            self.emit(DeviceEvent::AnomalousBatch {
                session_id: batch.to_string(),
                count: count as u64,
            });
            return (
                SessionOutcome::Anomalous {
                    count: count as u64,
                },
                true,
            );
        }

        if policy.requires_confirmation(count) {
            sort_chronologically(&mut tracks);
            self.emit(DeviceEvent::AwaitingConfirmation {
                session_id: batch.to_string(),
                candidates: count as u64,
            });

            let response = self
                .context
                .confirmation
                .confirm(ConfirmationRequest { tracks })
                .await;

            tracks = match response {
                Ok(response) if response.accepted => {
                    remember_choice(self.context.settings.as_ref(), response.remember_choice)
                        .await;
                    response.tracks
                }
                Ok(_) => {
                    info!(candidates = count, "Candidate scrobbles rejected");
                    return (SessionOutcome::Rejected, true);
                }
                Err(e) => {
                    warn!(error = %e, "Confirmation failed, discarding candidate batch");
                    return (SessionOutcome::Rejected, true);
                }
            };
        }

        sort_chronologically(&mut tracks);
        let count = tracks.len();
        if count == 0 {
            return (SessionOutcome::Submitted { count }, true);
        }

        match self.context.sink.submit(tracks).await {
            Ok(()) => {
                info!(count, "Candidate scrobbles submitted");
                self.emit(DeviceEvent::ScrobblesFound {
                    session_id: batch.to_string(),
                    count: count as u64,
                });
                (SessionOutcome::Submitted { count }, true)
            }
            Err(e) => {
                warn!(error = %e, count, "Scrobble sink rejected candidate batch");
                (SessionOutcome::Deferred, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_candidates(path: &Path, tracks: &[TrackRecord]) {
        let file = CandidateFile {
            tracks: tracks.to_vec(),
        };
        std::fs::write(path, serde_json::to_vec(&file).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_read_candidate_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        let tracks = vec![TrackRecord::new("A", "B", TrackRecord::timestamp_from_unix(5))];
        write_candidates(&path, &tracks);

        assert_eq!(read_candidate_file(&path).await.unwrap(), tracks);
    }

    #[tokio::test]
    async fn test_malformed_candidate_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            read_candidate_file(&path).await,
            Err(SyncError::CandidateFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_leftover_files_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("ipod/000A27");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("b.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("a.json"), b"{}").unwrap();
        std::fs::write(nested.join("playcounts.db"), b"").unwrap();

        let files = find_leftover_files(dir.path()).await.unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("a.json"), nested.join("b.json")]
        );
    }

    #[tokio::test]
    async fn test_find_leftover_files_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let files = find_leftover_files(&dir.path().join("devices")).await.unwrap();
        assert!(files.is_empty());
    }
}
