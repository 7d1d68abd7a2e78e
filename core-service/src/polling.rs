//! Background helper polling.
//!
//! Two tasks ask the helper process for a run: a one-shot shortly after
//! startup and a recurring one every `poll_interval`. Failures are logged
//! and never surfaced as events.

use bridge_traits::{BackgroundExecutor, TaskId};
use core_runtime::DeviceScrobbleConfig;
use tracing::{info, warn};

#[cfg(feature = "desktop-shims")]
use crate::DeviceScrobbleService;
#[cfg(feature = "desktop-shims")]
use std::sync::Arc;

pub const POLL_TASK_ID: &str = "device-scrobble.poll";
pub const STARTUP_POLL_TASK_ID: &str = "device-scrobble.startup-poll";

/// Schedule both polling tasks. Handlers for [`POLL_TASK_ID`] and
/// [`STARTUP_POLL_TASK_ID`] must already be registered with the executor.
///
/// Returns the tasks that were scheduled.
pub async fn schedule_polling(
    executor: &dyn BackgroundExecutor,
    device: &DeviceScrobbleConfig,
) -> Vec<TaskId> {
    let mut scheduled = Vec::with_capacity(2);

    match executor.schedule_task(POLL_TASK_ID, device.poll_interval).await {
        Ok(id) => scheduled.push(id),
        Err(e) => warn!(error = %e, "Failed to schedule helper polling"),
    }
    match executor
        .schedule_once(STARTUP_POLL_TASK_ID, device.startup_delay)
        .await
    {
        Ok(id) => scheduled.push(id),
        Err(e) => warn!(error = %e, "Failed to schedule startup helper poll"),
    }

    info!(
        interval_secs = device.poll_interval.as_secs(),
        tasks = scheduled.len(),
        "Helper polling scheduled"
    );
    scheduled
}

/// Register the polling handlers on the desktop executor.
///
/// The handlers hold a weak reference so a dropped service stops polling.
#[cfg(feature = "desktop-shims")]
pub async fn register_desktop_polling(
    executor: &bridge_desktop::TokioBackgroundExecutor,
    service: &Arc<DeviceScrobbleService>,
) -> crate::Result<()> {
    for task_id in [POLL_TASK_ID, STARTUP_POLL_TASK_ID] {
        let service = Arc::downgrade(service);
        executor
            .register_task_handler(task_id, move || {
                let service = service.upgrade();
                async move {
                    let Some(service) = service else {
                        return Ok(());
                    };
                    match service.twiddle(false).await {
                        Ok(result) => tracing::debug!(%result, "Helper poll"),
                        Err(e) => warn!(error = %e, "Helper poll failed"),
                    }
                    Ok(())
                }
            })
            .await?;
    }
    Ok(())
}
