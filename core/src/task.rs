//! Progress reporting, cooperative cancellation and background tasks.
//!
//! Long-running operations (copying subtrees, staging content, saving
//! into a drive) receive a [`TaskContext`] and poll it between units of
//! work. [`TaskManager`] runs such operations on tokio and keeps a
//! snapshot of each task's progress for clients to poll.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::DriveError;

/// Progress sink and cancellation flag handed to long-running operations.
pub trait TaskContext: Send + Sync {
    /// Report the amount of work completed so far (cumulative).
    fn progress(&self, loaded: i64);

    /// Report the total amount of work known so far.
    fn total(&self, total: i64);

    /// Whether the operation should stop before its next unit of work.
    fn is_cancelled(&self) -> bool;
}

/// Context for callers that do not care about progress; never cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyContext;

impl TaskContext for DummyContext {
    fn progress(&self, _loaded: i64) {}

    fn total(&self, _total: i64) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Forwards only cancellation to the wrapped context.
///
/// Nested operations (staging bytes of one file) report progress in a
/// different unit than their parent (nodes of a tree); this keeps the
/// inner unit out of the parent's counters.
pub struct CancelOnly<'a>(pub &'a dyn TaskContext);

impl TaskContext for CancelOnly<'_> {
    fn progress(&self, _loaded: i64) {}

    fn total(&self, _total: i64) {}

    fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Lifecycle state of a managed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// Serializable view of a task, returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: String,
    pub name: String,
    pub status: TaskStatus,
    pub loaded: i64,
    pub total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Who started the task; `None` for tasks without an owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

struct TaskState {
    status: TaskStatus,
    error: Option<String>,
    finished_at: Option<Instant>,
}

/// A [`TaskContext`] backed by atomics and a [`CancellationToken`].
///
/// Progress values are stored as reported; callers are expected to
/// report monotonically non-decreasing counts.
pub struct TaskHandle {
    id: String,
    name: String,
    owner: Option<String>,
    loaded: AtomicI64,
    total: AtomicI64,
    cancel: CancellationToken,
    state: Mutex<TaskState>,
}

impl TaskHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_owner(name, None)
    }

    pub fn with_owner(name: impl Into<String>, owner: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            owner,
            loaded: AtomicI64::new(0),
            total: AtomicI64::new(0),
            cancel: CancellationToken::new(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                error: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Request cancellation. The running operation stops at its next poll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn status(&self) -> TaskStatus {
        self.lock_state().status
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock_state();
        TaskSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: state.status,
            loaded: self.loaded.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            error: state.error.clone(),
            owner: self.owner.clone(),
        }
    }

    fn set_status(&self, status: TaskStatus, error: Option<String>) {
        let mut state = self.lock_state();
        state.status = status;
        state.error = error;
        if status.is_finished() {
            state.finished_at = Some(Instant::now());
        }
    }

    /// Whether the task finished at least `retention` ago.
    fn expired(&self, retention: Duration) -> bool {
        self.lock_state()
            .finished_at
            .is_some_and(|at| at.elapsed() >= retention)
    }

    fn finish(&self, result: Result<(), DriveError>) {
        match result {
            Ok(()) => self.set_status(TaskStatus::Done, None),
            Err(DriveError::Cancelled) => self.set_status(TaskStatus::Cancelled, None),
            Err(e) => self.set_status(TaskStatus::Error, Some(e.to_string())),
        }
    }

    // Poisoning is ignored: the state is plain data.
    fn lock_state(&self) -> std::sync::MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TaskContext for TaskHandle {
    fn progress(&self, loaded: i64) {
        self.loaded.store(loaded, Ordering::Relaxed);
    }

    fn total(&self, total: i64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs operations in the background and tracks them by id.
#[derive(Default)]
pub struct TaskManager {
    tasks: Mutex<HashMap<String, Arc<TaskHandle>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `job` on the tokio runtime with a fresh [`TaskHandle`].
    ///
    /// The handle is registered before the job starts so it can be polled
    /// or cancelled immediately. Its final status reflects the job result:
    /// `Cancelled` errors mark the task cancelled, other errors mark it
    /// failed with the error message.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, job: F) -> Arc<TaskHandle>
    where
        F: FnOnce(Arc<TaskHandle>) -> Fut,
        Fut: Future<Output = Result<(), DriveError>> + Send + 'static,
    {
        self.spawn_owned(None, name, job)
    }

    /// Like [`TaskManager::spawn`], recording `owner` on the task.
    pub fn spawn_owned<F, Fut>(
        &self,
        owner: Option<String>,
        name: impl Into<String>,
        job: F,
    ) -> Arc<TaskHandle>
    where
        F: FnOnce(Arc<TaskHandle>) -> Fut,
        Fut: Future<Output = Result<(), DriveError>> + Send + 'static,
    {
        let handle = Arc::new(TaskHandle::with_owner(name, owner));
        self.lock_tasks().insert(handle.id.clone(), handle.clone());

        let fut = job(handle.clone());
        let task = handle.clone();
        tokio::spawn(async move {
            task.set_status(TaskStatus::Running, None);
            info!("Task {} ({}) started", task.id, task.name);
            let result = fut.await;
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    warn!("Task {} ({}) failed: {}", task.id, task.name, e);
                }
            }
            task.finish(result);
            info!("Task {} finished as {:?}", task.id, task.status());
        });
        handle
    }

    pub fn get(&self, id: &str) -> Option<TaskSnapshot> {
        self.lock_tasks().get(id).map(|t| t.snapshot())
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.lock_tasks().values().map(|t| t.snapshot()).collect()
    }

    /// Snapshots of the tasks started by `owner`.
    pub fn list_owned(&self, owner: Option<&str>) -> Vec<TaskSnapshot> {
        self.lock_tasks()
            .values()
            .filter(|t| t.owner() == owner)
            .map(|t| t.snapshot())
            .collect()
    }

    /// Cancel a task. Returns `false` when no task has that id.
    pub fn cancel(&self, id: &str) -> bool {
        match self.lock_tasks().get(id) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every task that has not finished yet.
    pub fn cancel_all(&self) {
        for task in self.lock_tasks().values() {
            if !task.status().is_finished() {
                task.cancel();
            }
        }
    }

    /// Drop all tasks that reached a terminal status. Returns how many were removed.
    pub fn remove_finished(&self) -> usize {
        let mut tasks = self.lock_tasks();
        let before = tasks.len();
        tasks.retain(|_, t| !t.status().is_finished());
        before - tasks.len()
    }

    /// Drop tasks that finished at least `retention` ago. Returns how many were removed.
    pub fn remove_expired(&self, retention: Duration) -> usize {
        let mut tasks = self.lock_tasks();
        let before = tasks.len();
        tasks.retain(|_, t| !t.expired(retention));
        before - tasks.len()
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<TaskHandle>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}
