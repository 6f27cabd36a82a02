//! Batch waiter

use super::outcome::{BatchOutcome, BatchState};
use super::{deadline_after, sleep_until_opt, BatchOptions};
use crate::service::{Completion, Subscription, TaskService};
use crate::task::{TaskId, TaskResult};
use futures::stream::SelectAll;
use futures::StreamExt;
use std::collections::HashSet;
use tracing::{debug, warn};
use wpok_foundation::{Error, Result};

fn cancel_all(streams: &mut SelectAll<Subscription<Completion>>) {
    for subscription in streams.iter_mut() {
        subscription.cancel();
    }
}

/// Wait for a fixed set of tasks.
///
/// - `DONE` once every task reported, whatever the codes
/// - `FAILED` at the first non-zero code when `fail_fast` is set
/// - `TIMEOUT` when the deadline passes first
///
/// Duplicate ids are collapsed; `done` and `pending` of the outcome always
/// partition the distinct requested ids.
pub async fn wait_for_many<S>(
    service: &S,
    task_ids: &[TaskId],
    options: BatchOptions,
) -> Result<BatchOutcome>
where
    S: TaskService + ?Sized,
{
    if task_ids.is_empty() {
        return Err(Error::InvalidInput(
            "batch wait needs at least one task id".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let requested: Vec<TaskId> = task_ids
        .iter()
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect();
    if requested.len() != task_ids.len() {
        debug!(
            "Collapsed {} duplicate task id(s)",
            task_ids.len() - requested.len()
        );
    }

    let deadline = deadline_after(options.timeout);
    let mut pending: HashSet<TaskId> = requested.iter().cloned().collect();
    let mut done: Vec<TaskResult> = Vec::with_capacity(requested.len());

    let mut streams = SelectAll::new();
    for id in &requested {
        match service.subscribe_task(id).await {
            Ok(subscription) => streams.push(subscription),
            Err(e) => {
                cancel_all(&mut streams);
                return Err(e);
            }
        }
    }

    let state = loop {
        if pending.is_empty() {
            break BatchState::Done;
        }

        tokio::select! {
            biased;
            item = streams.next() => match item {
                Some(Ok(completion)) => {
                    if !pending.remove(&completion.task_id) {
                        debug!("Ignoring completion of {}", completion.task_id);
                        continue;
                    }
                    let failed = completion.code != 0;
                    done.push(completion.into());
                    if failed && options.fail_fast {
                        break BatchState::Failed;
                    }
                }
                Some(Err(e)) => {
                    warn!("Batch wait aborted: {}", e);
                    cancel_all(&mut streams);
                    return Err(e);
                }
                None => {
                    return Err(Error::disconnected(format!(
                        "subscriptions ended with {} task(s) still pending",
                        pending.len()
                    )));
                }
            },
            _ = sleep_until_opt(deadline) => break BatchState::Timeout,
        }
    };

    cancel_all(&mut streams);

    let pending: Vec<TaskId> = requested
        .into_iter()
        .filter(|id| pending.contains(id))
        .collect();

    debug!(
        "Batch finished: {:?}, {} done, {} pending",
        state,
        done.len(),
        pending.len()
    );
    Ok(BatchOutcome {
        state,
        done,
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{validate_manifest, Manifest};
    use crate::service::MemoryTaskService;
    use serde_json::json;
    use std::time::Duration;

    fn manifest(count: u64) -> Manifest {
        validate_manifest(&json!({
            "apiVersion": "wpok/v1",
            "kind": "Task",
            "metadata": {"name": "batch"},
            "spec": {"image": "alpine", "batch": {"count": count}}
        }))
        .unwrap()
    }

    /// Report `codes[i]` for `ids[i]`, one second apart
    fn report_later(service: &MemoryTaskService, ids: &[TaskId], codes: &[i32]) {
        let service = service.clone();
        let reports: Vec<(TaskId, i32)> = ids.iter().cloned().zip(codes.iter().copied()).collect();
        tokio::spawn(async move {
            for (id, code) in reports {
                tokio::time::sleep(Duration::from_secs(1)).await;
                service.complete_task(&id, code).await.unwrap();
            }
        });
    }

    fn assert_partition(outcome: &BatchOutcome, requested: &[TaskId]) {
        let mut all: Vec<TaskId> = outcome
            .done
            .iter()
            .map(|r| r.task_id.clone())
            .chain(outcome.pending.iter().cloned())
            .collect();
        all.sort();
        let mut expected = requested.to_vec();
        expected.sort();
        expected.dedup();
        assert_eq!(all, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_succeed() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(3)).await.unwrap();
        report_later(&service, &ids, &[0, 0, 0]);

        let outcome = wait_for_many(&service, &ids, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.state, BatchState::Done);
        assert_eq!(outcome.done.len(), 3);
        assert!(outcome.done.iter().all(|r| r.code == 0));
        assert!(outcome.pending.is_empty());
        assert_eq!(service.active_subscriptions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_stops_at_first_failure() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(3)).await.unwrap();
        report_later(&service, &ids, &[0, 1, 0]);

        let outcome = wait_for_many(&service, &ids, BatchOptions::from_secs(0, true))
            .await
            .unwrap();

        assert_eq!(outcome.state, BatchState::Failed);
        assert_eq!(outcome.done.len(), 2);
        assert_eq!(outcome.done[1].code, 1);
        assert_eq!(outcome.pending, vec![ids[2].clone()]);
        assert_partition(&outcome, &ids);
        assert_eq!(service.active_subscriptions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_without_fail_fast_still_finish() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(3)).await.unwrap();
        report_later(&service, &ids, &[2, 1, 0]);

        let outcome = wait_for_many(&service, &ids, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.state, BatchState::Done);
        assert_eq!(outcome.failed_count(), 2);
        let order: Vec<TaskId> = outcome.done.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(order, ids);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_pending_in_request_order() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(4)).await.unwrap();
        // Only the third task reports before the deadline
        report_later(&service, &ids[2..3], &[0]);

        let outcome = wait_for_many(&service, &ids, BatchOptions::from_secs(5, false))
            .await
            .unwrap();

        assert_eq!(outcome.state, BatchState::Timeout);
        assert_eq!(outcome.done.len(), 1);
        assert_eq!(
            outcome.pending,
            vec![ids[0].clone(), ids[1].clone(), ids[3].clone()]
        );
        assert_partition(&outcome, &ids);
        assert_eq!(service.active_subscriptions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ids_are_collapsed() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(2)).await.unwrap();
        let requested = vec![ids[0].clone(), ids[1].clone(), ids[0].clone()];
        report_later(&service, &ids, &[0, 0]);

        let outcome = wait_for_many(&service, &requested, BatchOptions::from_secs(10, false))
            .await
            .unwrap();

        assert_eq!(outcome.state, BatchState::Done);
        assert_eq!(outcome.done.len(), 2);
        assert_partition(&outcome, &requested);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let service = MemoryTaskService::new();
        let err = wait_for_many(&service, &[], BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_failure_releases_every_subscription() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(3)).await.unwrap();

        let broker = service.clone();
        let first = ids[0].clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            broker.complete_task(&first, 0).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            broker.inject_failure("broker went away").await;
        });

        let err = wait_for_many(&service, &ids, BatchOptions::from_secs(30, false))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected(_)));
        assert_eq!(service.active_subscriptions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_fails_before_waiting() {
        let service = MemoryTaskService::new();
        let mut ids = service.create_tasks_batch(&manifest(2)).await.unwrap();
        ids.push(TaskId::parse("w-elsewhere:00").unwrap());

        let err = wait_for_many(&service, &ids, BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(service.active_subscriptions().await, 0);
    }
}
