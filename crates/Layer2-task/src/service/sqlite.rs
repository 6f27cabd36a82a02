//! SQLite task service
//!
//! Workers write exit codes into the shared task store; this backend turns
//! those rows into subscription items by polling. Each subscription owns one
//! poller task that stops as soon as the subscription is cancelled, dropped,
//! or the service is closed.
//!
//! Store calls run on the blocking pool: a worker holding the write lock can
//! keep rusqlite waiting for the whole busy timeout.

use super::subscription::{subscription_channel, Subscription, SubscriptionSender};
use super::{plan_tasks, Completion, TaskService, WorkSignal, WorkStatus};
use crate::manifest::Manifest;
use crate::state::TaskState;
use crate::task::{Task, TaskId, WorkId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wpok_foundation::{Error, Result, TaskRecord, TaskStore, WorkCounts, WpokConfig};

/// Task service on top of a [`TaskStore`]
pub struct SqliteTaskService {
    store: TaskStore,
    poll_interval: Duration,
    capacity: usize,
    root: CancellationToken,
}

impl SqliteTaskService {
    /// Open the store named by the configuration
    pub fn open(config: &WpokConfig) -> Result<Self> {
        let path = config.store_path()?;
        debug!("Opening task store at {}", path.display());
        let store = TaskStore::new(&path)?;
        Ok(Self::with_store(
            store,
            config.poll_interval(),
            config.channel_capacity(),
        ))
    }

    pub fn with_store(store: TaskStore, poll_interval: Duration, capacity: usize) -> Self {
        Self {
            store,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            capacity: capacity.max(1),
            root: CancellationToken::new(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Snapshot of a task as recorded in the store
    pub async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let id = task_id.to_string();
        let Some(record) = on_store(&self.store, move |store| store.get_task(&id)).await? else {
            return Ok(None);
        };
        let state = TaskState::from_store(&record.state).ok_or_else(|| {
            Error::Storage(format!(
                "unknown state '{}' for task {}",
                record.state, task_id
            ))
        })?;

        let mut task = Task::new(task_id.clone(), record.name.unwrap_or_default());
        task.state = state;
        task.exit_code = record.exit_code;
        if let Some(created_at) = parse_time(&record.created_at) {
            task.created_at = created_at;
        }
        task.completed_at = record.completed_at.as_deref().and_then(parse_time);
        Ok(Some(task))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.root.is_cancelled() {
            return Err(Error::disconnected("sqlite task service is closed"));
        }
        Ok(())
    }

    fn ticker(&self) -> tokio::time::Interval {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    async fn submit(&self, manifest: &Manifest, batch: bool) -> Result<Vec<TaskId>> {
        self.ensure_open()?;
        let (work_id, planned) = plan_tasks(manifest, batch)?;
        let created_at = chrono::Utc::now().to_rfc3339();

        let records = planned
            .iter()
            .map(|task| {
                Ok(TaskRecord {
                    id: task.id.to_string(),
                    work_id: work_id.to_string(),
                    name: Some(task.manifest.metadata.name.clone()),
                    manifest: serde_json::to_string(&task.manifest)?,
                    created_at: created_at.clone(),
                    ..Default::default()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let count = records.len();
        on_store(&self.store, move |store| store.insert_tasks(&records))
            .await
            .map_err(|e| Error::service(e.to_string()))?;

        info!("Created {} task(s) in work {}", count, work_id);
        Ok(planned.into_iter().map(|task| task.id).collect())
    }
}

/// Run a store call on the blocking pool
async fn on_store<T, F>(store: &TaskStore, op: F) -> Result<T>
where
    F: FnOnce(&TaskStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {}", e)))?
}

// ============================================================================
// Pollers
// ============================================================================

async fn poll_task(
    store: TaskStore,
    task_id: TaskId,
    sender: SubscriptionSender<Completion>,
    mut ticker: tokio::time::Interval,
) {
    loop {
        tokio::select! {
            _ = sender.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let id = task_id.to_string();
        match on_store(&store, move |store| store.get_task(&id)).await {
            Ok(Some(record)) if record.is_done() => {
                let code = record.exit_code.unwrap_or(-1);
                sender.send(Ok(Completion::new(task_id.clone(), code))).await;
                break;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                sender
                    .send(Err(Error::NotFound(format!("task {}", task_id))))
                    .await;
                break;
            }
            Err(e) => {
                warn!("Polling task {} failed: {}", task_id, e);
                sender.send(Err(Error::service(e.to_string()))).await;
                break;
            }
        }
    }
    debug!("Task poller for {} stopped", task_id);
}

async fn poll_work(
    store: TaskStore,
    work_id: WorkId,
    sender: SubscriptionSender<WorkSignal>,
    mut ticker: tokio::time::Interval,
) {
    let mut last_seq = 0i64;
    let mut last_status: Option<WorkStatus> = None;

    'poll: loop {
        tokio::select! {
            _ = sender.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let work = work_id.to_string();
        let read = on_store(&store, move |store| {
            let completions = store.completions_since(&work, last_seq)?;
            let counts = store.work_counts(&work)?;
            Ok((counts, completions))
        })
        .await;

        let (counts, completions) = match read {
            Ok(read) => read,
            Err(e) => {
                warn!("Polling work {} failed: {}", work_id, e);
                sender.send(Err(Error::service(e.to_string()))).await;
                break;
            }
        };

        let status = to_status(counts);
        if last_status != Some(status) {
            last_status = Some(status);
            if !sender.send(Ok(WorkSignal::Membership(status))).await {
                break;
            }
        }

        for record in completions {
            last_seq = record.seq;
            let task_id = match TaskId::parse(record.task_id) {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping malformed task id in work {}: {}", work_id, e);
                    continue;
                }
            };
            let completion = Completion::new(task_id, record.exit_code);
            if !sender.send(Ok(WorkSignal::Completed(completion))).await {
                break 'poll;
            }
        }
    }
    debug!("Work poller for {} stopped", work_id);
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.with_timezone(&Utc))
}

fn to_status(counts: WorkCounts) -> WorkStatus {
    WorkStatus {
        total: counts.total,
        pending: counts.pending,
    }
}

#[async_trait]
impl TaskService for SqliteTaskService {
    fn name(&self) -> &'static str {
        "sqlite"
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
        self.ensure_open()?;
        let id = task_id.to_string();
        if on_store(&self.store, move |store| store.get_task(&id))
            .await?
            .is_none()
        {
            return Err(Error::NotFound(format!("task {}", task_id)));
        }

        let (sender, subscription) =
            subscription_channel(format!("task {}", task_id), self.capacity, &self.root);
        tokio::spawn(poll_task(
            self.store.clone(),
            task_id.clone(),
            sender,
            self.ticker(),
        ));

        debug!("Subscribed to task {}", task_id);
        Ok(subscription)
    }

    async fn subscribe_work(&self, work_id: &WorkId) -> Result<Subscription<WorkSignal>> {
        self.ensure_open()?;

        let (sender, subscription) =
            subscription_channel(format!("work {}", work_id), self.capacity, &self.root);
        tokio::spawn(poll_work(
            self.store.clone(),
            work_id.clone(),
            sender,
            self.ticker(),
        ));

        debug!("Subscribed to work {}", work_id);
        Ok(subscription)
    }

    async fn work_status(&self, work_id: &WorkId) -> Result<WorkStatus> {
        self.ensure_open()?;
        let work = work_id.to_string();
        let counts = on_store(&self.store, move |store| store.work_counts(&work)).await?;
        Ok(to_status(counts))
    }

    async fn complete_task(&self, task_id: &TaskId, code: i32) -> Result<bool> {
        self.ensure_open()?;
        let id = task_id.to_string();
        let recorded = on_store(&self.store, move |store| store.complete_task(&id, code)).await?;
        if recorded {
            debug!("Task {} completed with code {}", task_id, code);
        } else {
            debug!("Task {} already reported, ignoring code {}", task_id, code);
        }
        Ok(recorded)
    }

    async fn close(&self) -> Result<()> {
        if !self.root.is_cancelled() {
            self.root.cancel();
            info!("SQLite task service closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::validate_manifest;
    use serde_json::json;

    fn service() -> SqliteTaskService {
        SqliteTaskService::with_store(
            TaskStore::in_memory().unwrap(),
            Duration::from_millis(10),
            16,
        )
    }

    fn manifest(work_id: &str, count: u64) -> Manifest {
        validate_manifest(&json!({
            "apiVersion": "wpok/v1",
            "kind": "Task",
            "metadata": {"name": "thumbs", "workId": work_id},
            "spec": {"image": "alpine", "batch": {"count": count}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_batch_is_stored_with_member_manifests() {
        let service = service();
        let ids = service
            .create_tasks_batch(&manifest("w-sql", 3))
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        let record = service.store().get_task(ids[0].as_str()).unwrap().unwrap();
        assert_eq!(record.work_id, "w-sql");
        assert_eq!(record.name.as_deref(), Some("thumbs"));
        let stored: serde_json::Value = serde_json::from_str(&record.manifest).unwrap();
        assert!(stored["spec"].get("batch").is_none());

        let status = service
            .work_status(&WorkId::parse("w-sql").unwrap())
            .await
            .unwrap();
        assert_eq!(status, WorkStatus { total: 3, pending: 3 });
    }

    #[tokio::test]
    async fn test_task_subscription_sees_worker_completion() {
        let service = service();
        let id = service
            .create_task(&manifest("w-sql", 1))
            .await
            .unwrap();
        let mut sub = service.subscribe_task(&id).await.unwrap();

        assert!(service.complete_task(&id, 5).await.unwrap());
        let completion = sub.recv().await.unwrap().unwrap();
        assert_eq!(completion, Completion::new(id.clone(), 5));
        assert!(sub.recv().await.is_none());

        let task = service.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Done);
        assert_eq!(task.exit_code, Some(5));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_work_subscription_replays_then_follows() {
        let service = service();
        let ids = service
            .create_tasks_batch(&manifest("w-follow", 2))
            .await
            .unwrap();
        service.complete_task(&ids[1], 0).await.unwrap();

        let mut sub = service
            .subscribe_work(&WorkId::parse("w-follow").unwrap())
            .await
            .unwrap();
        assert_eq!(
            sub.recv().await.unwrap().unwrap(),
            WorkSignal::Membership(WorkStatus { total: 2, pending: 1 })
        );
        assert_eq!(
            sub.recv().await.unwrap().unwrap(),
            WorkSignal::Completed(Completion::new(ids[1].clone(), 0))
        );

        service.complete_task(&ids[0], 3).await.unwrap();
        assert_eq!(
            sub.recv().await.unwrap().unwrap(),
            WorkSignal::Membership(WorkStatus { total: 2, pending: 0 })
        );
        assert_eq!(
            sub.recv().await.unwrap().unwrap(),
            WorkSignal::Completed(Completion::new(ids[0].clone(), 3))
        );
    }

    #[tokio::test]
    async fn test_unknown_task_subscription_fails() {
        let service = service();
        let id = TaskId::parse("w-none:0").unwrap();
        assert!(matches!(
            service.subscribe_task(&id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_stops_subscriptions() {
        let service = service();
        let id = service
            .create_task(&manifest("w-sql", 1))
            .await
            .unwrap();
        let mut sub = service.subscribe_task(&id).await.unwrap();

        service.close().await.unwrap();
        service.close().await.unwrap();
        assert!(sub.recv().await.is_none());
        assert!(service.create_task(&manifest("w-sql", 1)).await.is_err());
    }
}
