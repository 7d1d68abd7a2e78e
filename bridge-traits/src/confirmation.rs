//! Human-in-the-loop confirmation and the downstream scrobble sink.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::track::TrackRecord;

/// Candidate plays waiting for approval, in chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub tracks: Vec<TrackRecord>,
}

/// The user's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationResponse {
    pub accepted: bool,
    /// Possibly edited subset of the requested tracks.
    pub tracks: Vec<TrackRecord>,
    /// "Don't ask me again": turns off always-ask for future syncs.
    pub remember_choice: bool,
}

impl ConfirmationResponse {
    pub fn accept(tracks: Vec<TrackRecord>) -> Self {
        Self {
            accepted: true,
            tracks,
            remember_choice: false,
        }
    }

    pub fn reject() -> Self {
        Self {
            accepted: false,
            tracks: Vec::new(),
            remember_choice: false,
        }
    }
}

/// Lets a person accept, edit or reject candidate scrobbles.
///
/// `confirm` may wait indefinitely; it is called from the session worker,
/// never from the orchestrator's control path.
#[async_trait]
pub trait ConfirmationPort: Send + Sync {
    async fn confirm(&self, request: ConfirmationRequest) -> Result<ConfirmationResponse>;

    /// Ask where a device is mounted when detection failed.
    ///
    /// `None` means the user cancelled.
    async fn request_mount_path(&self) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Approves every request unchanged. For headless hosts.
#[derive(Debug, Clone, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationPort for AutoApprove {
    async fn confirm(&self, request: ConfirmationRequest) -> Result<ConfirmationResponse> {
        Ok(ConfirmationResponse::accept(request.tracks))
    }
}

/// Receives accepted plays for submission.
#[async_trait]
pub trait ScrobbleSink: Send + Sync {
    /// `tracks` is sorted by timestamp and contains one record per play.
    async fn submit(&self, tracks: Vec<TrackRecord>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackRecord;

    #[tokio::test]
    async fn test_auto_approve_returns_request_unchanged() {
        let tracks = vec![
            TrackRecord::new("A", "One", TrackRecord::timestamp_from_unix(10)),
            TrackRecord::new("B", "Two", TrackRecord::timestamp_from_unix(20)),
        ];
        let response = AutoApprove
            .confirm(ConfirmationRequest {
                tracks: tracks.clone(),
            })
            .await
            .unwrap();

        assert!(response.accepted);
        assert!(!response.remember_choice);
        assert_eq!(response.tracks, tracks);
        assert_eq!(AutoApprove.request_mount_path().await.unwrap(), None);
    }

    #[test]
    fn test_reject_is_empty() {
        let response = ConfirmationResponse::reject();
        assert!(!response.accepted);
        assert!(response.tracks.is_empty());
    }
}
