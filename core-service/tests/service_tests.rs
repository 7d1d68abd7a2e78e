//! Service wiring tests: cold start, helper messages and shutdown.

use async_trait::async_trait;
use bridge_traits::error::{DeviceAccessError, Result as BridgeResult};
use bridge_traits::{
    AutoApprove, DeviceDatabase, DeviceDatabaseReader, HelperLauncher, HelperProcess,
    ScrobbleSink, SettingsStore, TrackRecord,
};
use core_runtime::config::CoreConfig;
use core_service::{
    CoordinatorState, CoreError, DeviceBridges, DeviceScrobbleService, EntryOutcome,
    TwiddleResult,
};
use core_sync::{CandidateFile, SessionOutcome};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct NoDevices;

#[async_trait]
impl DeviceDatabaseReader for NoDevices {
    async fn open(&self, mount_path: &Path) -> Result<Box<dyn DeviceDatabase>, DeviceAccessError> {
        Err(DeviceAccessError::MountNotFound(mount_path.to_path_buf()))
    }
}

#[derive(Default)]
struct RecordingSink {
    submitted: Mutex<Vec<TrackRecord>>,
}

#[async_trait]
impl ScrobbleSink for RecordingSink {
    async fn submit(&self, tracks: Vec<TrackRecord>) -> BridgeResult<()> {
        self.submitted.lock().unwrap().extend(tracks);
        Ok(())
    }
}

#[derive(Default)]
struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn set_string(&self, key: &str, value: &str) -> BridgeResult<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> BridgeResult<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set_bool(&self, key: &str, value: bool) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_bool(&self, key: &str) -> BridgeResult<Option<bool>> {
        Ok(self.get_string(key).await?.map(|v| v == "true"))
    }

    async fn set_i64(&self, key: &str, value: i64) -> BridgeResult<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_i64(&self, key: &str) -> BridgeResult<Option<i64>> {
        Ok(self.get_string(key).await?.and_then(|v| v.parse().ok()))
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }

    async fn has_key(&self, key: &str) -> BridgeResult<bool> {
        Ok(self.values.lock().unwrap().contains_key(key))
    }

    async fn list_keys(&self) -> BridgeResult<Vec<String>> {
        Ok(self.values.lock().unwrap().keys().cloned().collect())
    }
}

struct IdleLauncher;

#[async_trait]
impl HelperLauncher for IdleLauncher {
    async fn is_host_running(&self) -> bool {
        false
    }

    async fn is_plugin_installed(&self) -> bool {
        true
    }

    async fn launch(&self, _args: &[String]) -> BridgeResult<Box<dyn HelperProcess>> {
        unreachable!("host is never running")
    }
}

fn config(dir: &TempDir) -> CoreConfig {
    CoreConfig::builder()
        .runtime_data_dir(dir.path())
        .settings_store(Arc::new(MemorySettings::default()))
        .build()
        .unwrap()
}

fn bridges(sink: Arc<RecordingSink>) -> DeviceBridges {
    DeviceBridges::new(Arc::new(NoDevices), Arc::new(AutoApprove), sink)
}

fn write_candidates(path: &Path, tracks: Vec<TrackRecord>) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(&CandidateFile { tracks }).unwrap()).unwrap();
}

#[tokio::test]
async fn test_start_without_watcher_processes_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("devices/ipod/helper/left.json");
    write_candidates(
        &file,
        vec![
            TrackRecord::new("B", "Two", TrackRecord::timestamp_from_unix(20)),
            TrackRecord::new("A", "One", TrackRecord::timestamp_from_unix(10)),
        ],
    );

    let sink = Arc::new(RecordingSink::default());
    let service = DeviceScrobbleService::new(config(&dir), bridges(sink.clone())).unwrap();
    service.start().await.unwrap();

    let submitted = sink.submitted.lock().unwrap().clone();
    let artists: Vec<_> = submitted.iter().map(|t| t.artist.clone().unwrap()).collect();
    assert_eq!(artists, vec!["A", "B"]);
    assert!(!file.exists());

    service.shutdown().await;
}

#[tokio::test]
async fn test_helper_capability_is_required_for_messages() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        DeviceScrobbleService::new(config(&dir), bridges(Arc::new(RecordingSink::default())))
            .unwrap();

    let args = vec!["--twiddly".to_string(), "starting".to_string()];
    assert!(matches!(
        service.handle_helper_message(&args).await,
        Err(CoreError::CapabilityMissing { .. })
    ));
    assert!(matches!(
        service.twiddle(false).await,
        Err(CoreError::CapabilityMissing { .. })
    ));
}

#[tokio::test]
async fn test_helper_messages_reach_candidate_processing() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(RecordingSink::default());
    let service = DeviceScrobbleService::new(
        config(&dir),
        bridges(sink.clone()).with_helper_launcher(Arc::new(IdleLauncher)),
    )
    .unwrap();

    assert_eq!(
        service.twiddle(false).await.unwrap(),
        TwiddleResult::HostNotRunning
    );

    let file = dir.path().join("devices/batch.json");
    write_candidates(
        &file,
        vec![TrackRecord::new("A", "One", TrackRecord::timestamp_from_unix(10))],
    );
    let args: Vec<String> = vec![
        "--twiddly".into(),
        "complete".into(),
        "--ipod-path".into(),
        file.display().to_string(),
    ];

    let outcome = service.handle_helper_message(&args).await.unwrap();
    assert_eq!(
        outcome,
        Some(EntryOutcome::Session(SessionOutcome::Submitted { count: 1 }))
    );
    assert_eq!(sink.submitted.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_status_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        DeviceScrobbleService::new(config(&dir), bridges(Arc::new(RecordingSink::default())))
            .unwrap();

    let status = service.status().await;
    assert_eq!(status.state, CoordinatorState::Idle);
    assert_eq!(status.pending, 0);

    service.shutdown().await;
}

#[test]
fn test_background_polling_requires_executor() {
    let dir = tempfile::tempdir().unwrap();
    let result = CoreConfig::builder()
        .runtime_data_dir(dir.path())
        .settings_store(Arc::new(MemorySettings::default()))
        .enable_background_polling(true)
        .build();

    assert!(result.is_err());
}
