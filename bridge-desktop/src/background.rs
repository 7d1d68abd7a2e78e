//! Tokio timer executor.
//!
//! Backs the helper polling tasks on desktop hosts. Each scheduled task is a
//! spawned loop that sleeps until its next run, calls the registered handler
//! and records the result. A recurring task whose handler overruns skips the
//! ticks it missed instead of firing them back to back.

use async_trait::async_trait;
use bridge_traits::{
    background::{BackgroundExecutor, TaskId, TaskStatus},
    error::{BridgeError, Result},
    time::{Clock, SystemClock},
};
use futures::{future::BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type TaskTable = Arc<RwLock<HashMap<TaskId, ScheduledTask>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    /// First run one period after scheduling
    Every(Duration),
    Once(Duration),
}

impl Schedule {
    fn first_delay(self) -> Duration {
        match self {
            Schedule::Every(d) | Schedule::Once(d) => d,
        }
    }

    fn period(self) -> Option<Duration> {
        match self {
            Schedule::Every(d) => Some(d),
            Schedule::Once(_) => None,
        }
    }
}

struct ScheduledTask {
    status: TaskStatus,
    /// Unix millis of the next run, `None` once the task will not run again
    next_run: Option<i64>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Desktop [`BackgroundExecutor`].
///
/// Handlers are registered by task name with
/// [`register_task_handler`](Self::register_task_handler); scheduling a name
/// without a handler fails. Scheduling a name that is already scheduled
/// replaces the old task.
pub struct TokioBackgroundExecutor {
    tasks: TaskTable,
    handlers: RwLock<HashMap<String, TaskHandler>>,
    clock: Arc<dyn Clock>,
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn not_found(task_id: &TaskId) -> BridgeError {
    BridgeError::OperationFailed(format!("Task not found: {}", task_id.0))
}

impl TokioBackgroundExecutor {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            handlers: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub async fn register_task_handler<F, Fut>(&self, task_id: &str, handler: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers
            .write()
            .await
            .insert(task_id.to_string(), Arc::new(move || handler().boxed()));
        Ok(())
    }

    async fn schedule(&self, task_id: &str, schedule: Schedule) -> Result<TaskId> {
        let handler = self
            .handlers
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| {
                BridgeError::OperationFailed(format!(
                    "No handler registered for task: {}",
                    task_id
                ))
            })?;

        let id = TaskId::new(task_id);
        let cancel = CancellationToken::new();
        let runner = TaskRunner {
            id: id.clone(),
            schedule,
            handler,
            tasks: Arc::clone(&self.tasks),
            clock: Arc::clone(&self.clock),
        };

        let mut tasks = self.tasks.write().await;
        if let Some(previous) = tasks.remove(&id) {
            debug!(task_id, "Replacing scheduled task");
            previous.cancel.cancel();
            previous.handle.abort();
        }

        let next_run = self
            .clock
            .unix_timestamp_millis()
            .saturating_add(millis(schedule.first_delay()));
        let handle = tokio::spawn(runner.run(cancel.clone()));
        tasks.insert(
            id.clone(),
            ScheduledTask {
                status: TaskStatus::Scheduled,
                next_run: Some(next_run),
                cancel,
                handle,
            },
        );

        debug!(task_id, ?schedule, "Task scheduled");
        Ok(id)
    }
}

impl Default for TokioBackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct TaskRunner {
    id: TaskId,
    schedule: Schedule,
    handler: TaskHandler,
    tasks: TaskTable,
    clock: Arc<dyn Clock>,
}

impl TaskRunner {
    async fn run(self, cancel: CancellationToken) {
        let start = Instant::now() + self.schedule.first_delay();

        match self.schedule.period() {
            Some(period) => {
                let mut ticker = tokio::time::interval_at(start, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => self.execute().await,
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(start) => self.execute().await,
                }
            }
        }
    }

    async fn set_status(&self, status: TaskStatus, next_run: Option<i64>) {
        if let Some(task) = self.tasks.write().await.get_mut(&self.id) {
            task.status = status;
            task.next_run = next_run;
        }
    }

    async fn execute(&self) {
        self.set_status(TaskStatus::Running, None).await;
        let result = (self.handler)().await;

        let next_run = self
            .schedule
            .period()
            .map(|p| self.clock.unix_timestamp_millis().saturating_add(millis(p)));
        let status = match result {
            Ok(()) => TaskStatus::Completed,
            Err(e) => {
                warn!(task_id = %self.id.0, error = %e, "Background task failed");
                TaskStatus::Failed
            }
        };
        self.set_status(status, next_run).await;
    }
}

#[async_trait]
impl BackgroundExecutor for TokioBackgroundExecutor {
    async fn schedule_task(&self, task_id: &str, interval: Duration) -> Result<TaskId> {
        if interval.is_zero() {
            return Err(BridgeError::OperationFailed(
                "Recurring task interval must be greater than 0".to_string(),
            ));
        }
        self.schedule(task_id, Schedule::Every(interval)).await
    }

    async fn schedule_once(&self, task_id: &str, delay: Duration) -> Result<TaskId> {
        self.schedule(task_id, Schedule::Once(delay)).await
    }

    async fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        let task = self
            .tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| not_found(task_id))?;

        task.cancel.cancel();
        task.handle.abort();
        debug!(task_id = %task_id.0, "Task cancelled");
        Ok(())
    }

    async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|task| task.status.clone())
            .ok_or_else(|| not_found(task_id))
    }

    async fn list_tasks(&self) -> Result<Vec<TaskId>> {
        Ok(self.tasks.read().await.keys().cloned().collect())
    }

    async fn next_execution_time(&self, task_id: &TaskId) -> Result<Option<Duration>> {
        let tasks = self.tasks.read().await;
        let task = tasks.get(task_id).ok_or_else(|| not_found(task_id))?;

        let now = self.clock.unix_timestamp_millis();
        Ok(task
            .next_run
            .map(|next| Duration::from_millis(u64::try_from(next - now).unwrap_or(0))))
    }
}
