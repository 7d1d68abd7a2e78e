//! Background Execution and Task Scheduling
//!
//! Timer-driven task scheduling used for periodic device polling on hosts
//! that have no mount notifications.

use std::time::Duration;

use crate::error::Result;

/// Scheduled task identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Task execution status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Task is scheduled but not yet running
    Scheduled,
    /// Task is currently executing
    Running,
    /// Last run completed successfully
    Completed,
    /// Last run failed
    Failed,
    /// Task was cancelled
    Cancelled,
}

/// Background task executor trait
///
/// The host registers a handler per task id and then asks the executor to
/// fire it either on a fixed interval or once after a delay. A run that is
/// still in progress when the next tick arrives is not re-entered by the
/// executor; handlers that need stronger coalescing do it themselves.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::BackgroundExecutor;
/// use std::time::Duration;
///
/// async fn schedule_poll(executor: &dyn BackgroundExecutor) -> Result<()> {
///     executor.schedule_task("device-poll", Duration::from_secs(30 * 60)).await?;
///     executor.schedule_once("device-poll-startup", Duration::from_secs(3)).await?;
///     Ok(())
/// }
/// ```
#[async_trait::async_trait]
pub trait BackgroundExecutor: Send + Sync {
    /// Schedule a recurring task. The first run happens after one interval.
    async fn schedule_task(&self, task_id: &str, interval: Duration) -> Result<TaskId>;

    /// Schedule a one-time delayed task
    async fn schedule_once(&self, task_id: &str, delay: Duration) -> Result<TaskId>;

    /// Cancel a scheduled task
    async fn cancel_task(&self, task_id: &TaskId) -> Result<()>;

    /// Get status of a task
    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus>;

    /// List all scheduled tasks
    async fn list_tasks(&self) -> Result<Vec<TaskId>>;

    /// Check if background execution is available
    async fn is_available(&self) -> bool {
        true
    }

    /// Get estimated time until next execution
    ///
    /// Returns `None` if the task will not run again.
    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>>;
}
