//! Task service - the client's view of the worker pool backend
//!
//! Backends:
//! - `MemoryTaskService` - in-process, broadcast based (tests, embedding)
//! - `SqliteTaskService` - shared SQLite store written by workers, observed by polling
//!
//! Waiters depend only on the [`TaskService`] trait.

pub mod memory;
pub mod sqlite;
pub mod subscription;

pub use memory::MemoryTaskService;
pub use sqlite::SqliteTaskService;
pub use subscription::{subscription_channel, Subscription, SubscriptionSender};

use crate::manifest::{plan_batch, BatchItem, Manifest};
use crate::task::{TaskId, TaskResult, WorkId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use wpok_foundation::Result;

/// One completion signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub task_id: TaskId,
    pub code: i32,
}

impl Completion {
    pub fn new(task_id: TaskId, code: i32) -> Self {
        Self { task_id, code }
    }
}

impl From<Completion> for TaskResult {
    fn from(completion: Completion) -> Self {
        TaskResult::new(completion.task_id, completion.code)
    }
}

/// Membership of a work as known by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkStatus {
    /// Tasks registered under the work
    pub total: u64,
    /// Tasks without an exit code yet
    pub pending: u64,
}

impl WorkStatus {
    pub fn done(&self) -> u64 {
        self.total.saturating_sub(self.pending)
    }
}

/// Item of a work subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkSignal {
    /// A task of the work reported its exit code
    Completed(Completion),
    /// Membership changed (tasks added, or pending count moved)
    Membership(WorkStatus),
}

/// Task service trait - implement to add new backends
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Backend name
    fn name(&self) -> &'static str;

    /// Submit one task
    async fn create_task(&self, manifest: &Manifest) -> Result<TaskId>;

    /// Submit one task per planned batch item, atomically
    async fn create_tasks_batch(&self, manifest: &Manifest) -> Result<Vec<TaskId>>;

    /// Resolves once with the task's completion (immediately if already done)
    async fn subscribe_task(&self, task_id: &TaskId) -> Result<Subscription<Completion>>;

    /// Completions already recorded for the work and its membership first,
    /// then live signals
    async fn subscribe_work(&self, work_id: &WorkId) -> Result<Subscription<WorkSignal>>;

    /// Current membership of a work
    async fn work_status(&self, work_id: &WorkId) -> Result<WorkStatus>;

    /// Report a task's exit code (worker side). Returns `false` if the task
    /// had already reported.
    async fn complete_task(&self, task_id: &TaskId, code: i32) -> Result<bool>;

    /// Release the backend connection. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// A task about to be submitted
#[derive(Debug, Clone)]
pub(crate) struct PlannedTask {
    pub id: TaskId,
    pub manifest: Manifest,
}

/// Work id plus the task(s) a manifest expands into
pub(crate) fn plan_tasks(manifest: &Manifest, batch: bool) -> Result<(WorkId, Vec<PlannedTask>)> {
    let work_id = manifest.resolve_work_id()?;

    let items = if batch {
        plan_batch(manifest)?
    } else {
        vec![BatchItem {
            index: 0,
            input: None,
        }]
    };

    let tasks = items
        .iter()
        .map(|item| PlannedTask {
            id: TaskId::generate(&work_id),
            manifest: if batch {
                manifest.for_batch_item(item)
            } else {
                manifest.clone()
            },
        })
        .collect();

    Ok((work_id, tasks))
}
