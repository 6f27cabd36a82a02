//! In-process task service
//!
//! Keeps tasks and listener registrations in memory and pushes completions
//! to listeners as soon as they are reported. Used by tests and by embedders
//! that run workers in the same process.

use super::subscription::{subscription_channel, Subscription, SubscriptionSender};
use super::{plan_tasks, Completion, TaskService, WorkSignal, WorkStatus};
use crate::manifest::Manifest;
use crate::task::{Task, TaskId, WorkId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wpok_foundation::{Error, Result};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Default)]
struct WorkEntry {
    members: Vec<TaskId>,
    /// In completion order
    completions: Vec<Completion>,
}

impl WorkEntry {
    fn status(&self) -> WorkStatus {
        let total = self.members.len() as u64;
        WorkStatus {
            total,
            pending: total.saturating_sub(self.completions.len() as u64),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<TaskId, Task>,
    works: HashMap<WorkId, WorkEntry>,
    task_listeners: Vec<(TaskId, SubscriptionSender<Completion>)>,
    work_listeners: Vec<(WorkId, SubscriptionSender<WorkSignal>)>,
    closed: bool,
}

impl MemoryState {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::disconnected("memory task service is closed"));
        }
        Ok(())
    }

    fn work_status(&self, work_id: &WorkId) -> WorkStatus {
        self.works
            .get(work_id)
            .map(WorkEntry::status)
            .unwrap_or_default()
    }

    /// Queue `signals` on every listener of `work_id` without waiting.
    ///
    /// A listener whose buffer is full is lagging: it is unregistered, so its
    /// stream ends after the items already queued.
    fn publish_work(&mut self, work_id: &WorkId, signals: &[WorkSignal]) {
        self.work_listeners.retain(|(id, sender)| {
            if sender.is_closed() {
                return false;
            }
            if id != work_id {
                return true;
            }
            let delivered = signals
                .iter()
                .all(|signal| sender.try_send(Ok(signal.clone())));
            if !delivered {
                warn!(
                    "Dropping lagging subscription {} on work {}",
                    sender.id(),
                    work_id
                );
            }
            delivered
        });
    }

    fn prune(&mut self) {
        self.task_listeners.retain(|(_, sender)| !sender.is_closed());
        self.work_listeners.retain(|(_, sender)| !sender.is_closed());
    }
}

struct Inner {
    state: RwLock<MemoryState>,
    root: CancellationToken,
    capacity: usize,
}

/// In-memory task service
#[derive(Clone)]
pub struct MemoryTaskService {
    inner: Arc<Inner>,
}

impl Default for MemoryTaskService {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskService {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create with a specific subscription buffer size
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(MemoryState::default()),
                root: CancellationToken::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Snapshot of a task
    pub async fn get_task(&self, task_id: &TaskId) -> Option<Task> {
        self.inner.state.read().await.tasks.get(task_id).cloned()
    }

    /// Registrations that are still live
    pub async fn active_subscriptions(&self) -> usize {
        let mut state = self.inner.state.write().await;
        state.prune();
        state.task_listeners.len() + state.work_listeners.len()
    }

    /// Fail every live subscription with a disconnect error, as a broker
    /// connection loss would
    pub async fn inject_failure(&self, message: &str) {
        let mut state = self.inner.state.write().await;
        let task_listeners = std::mem::take(&mut state.task_listeners);
        let work_listeners = std::mem::take(&mut state.work_listeners);

        // A full buffer still ends the stream once the senders drop
        for (_, sender) in task_listeners {
            sender.try_send(Err(Error::disconnected(message)));
        }
        for (_, sender) in work_listeners {
            sender.try_send(Err(Error::disconnected(message)));
        }
    }

    async fn submit(&self, manifest: &Manifest, batch: bool) -> Result<Vec<TaskId>> {
        let (work_id, planned) = plan_tasks(manifest, batch)?;

        // Listeners are notified under the lock so signals keep their order.
        // Nothing awaits while it is held.
        let mut state = self.inner.state.write().await;
        state.ensure_open()?;

        if let Some(dup) = planned.iter().find(|t| state.tasks.contains_key(&t.id)) {
            return Err(Error::service(format!("task {} already exists", dup.id)));
        }

        let ids: Vec<TaskId> = planned.iter().map(|t| t.id.clone()).collect();
        for task in planned {
            let record = Task::new(task.id.clone(), task.manifest.metadata.name.clone());
            state.tasks.insert(task.id, record);
        }

        let entry = state.works.entry(work_id.clone()).or_default();
        entry.members.extend(ids.iter().cloned());
        let status = entry.status();

        state.publish_work(&work_id, &[WorkSignal::Membership(status)]);

        info!("Created {} task(s) in work {}", ids.len(), work_id);
        Ok(ids)
    }
}

#[async_trait]
impl TaskService for MemoryTaskService {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_task(&self, manifest: &Manifest) -> Result<TaskId> {
        let mut ids = self.submit(manifest, false).await?;
        ids.pop()
            .ok_or_else(|| Error::Internal("no task planned".to_string()))
    }

    async fn create_tasks_batch(&self, manifest: &Manifest) -> Result<Vec<TaskId>> {
        self.submit(manifest, true).await
    }

    async fn subscribe_task(&self, task_id: &TaskId) -> Result<Subscription<Completion>> {
        let mut state = self.inner.state.write().await;
        state.ensure_open()?;

        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        let already_done = task.exit_code.filter(|_| task.is_done());

        let (sender, subscription) = subscription_channel(
            format!("task {}", task_id),
            self.inner.capacity,
            &self.inner.root,
        );

        match already_done {
            // Resolved immediately; nothing to register
            Some(code) => {
                sender.try_send(Ok(Completion::new(task_id.clone(), code)));
            }
            None => state.task_listeners.push((task_id.clone(), sender)),
        }

        debug!("Subscribed to task {}", task_id);
        Ok(subscription)
    }

    async fn subscribe_work(&self, work_id: &WorkId) -> Result<Subscription<WorkSignal>> {
        let mut state = self.inner.state.write().await;
        state.ensure_open()?;

        let (status, replay) = match state.works.get(work_id) {
            Some(entry) => (entry.status(), entry.completions.clone()),
            None => (WorkStatus::default(), Vec::new()),
        };

        // Room for the whole snapshot so it can be queued without waiting
        let capacity = self.inner.capacity.max(replay.len() + 1);
        let (sender, subscription) =
            subscription_channel(format!("work {}", work_id), capacity, &self.inner.root);

        sender.try_send(Ok(WorkSignal::Membership(status)));
        for completion in replay {
            sender.try_send(Ok(WorkSignal::Completed(completion)));
        }

        state.work_listeners.push((work_id.clone(), sender));
        debug!("Subscribed to work {} ({:?})", work_id, status);
        Ok(subscription)
    }

    async fn work_status(&self, work_id: &WorkId) -> Result<WorkStatus> {
        let state = self.inner.state.read().await;
        state.ensure_open()?;
        Ok(state.work_status(work_id))
    }

    async fn complete_task(&self, task_id: &TaskId, code: i32) -> Result<bool> {
        let mut state = self.inner.state.write().await;
        state.ensure_open()?;

        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))?;
        if !task.complete(code) {
            debug!("Task {} already reported, ignoring code {}", task_id, code);
            return Ok(false);
        }

        let work_id = task_id.work_id();
        let completion = Completion::new(task_id.clone(), code);
        let entry = state.works.entry(work_id.clone()).or_default();
        entry.completions.push(completion.clone());
        let status = entry.status();

        // Task subscriptions resolve once: hand them the item and forget them
        let (resolved, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut state.task_listeners)
            .into_iter()
            .partition(|(id, _)| id == task_id);
        state.task_listeners = remaining;

        // Each task listener gets at most this one item, so its buffer has room
        for (_, sender) in resolved {
            sender.try_send(Ok(completion.clone()));
        }

        state.publish_work(
            &work_id,
            &[
                WorkSignal::Membership(status),
                WorkSignal::Completed(completion),
            ],
        );

        debug!("Task {} completed with code {}", task_id, code);
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        state.task_listeners.clear();
        state.work_listeners.clear();
        self.inner.root.cancel();
        info!("Memory task service closed");
        Ok(())
    }
}
