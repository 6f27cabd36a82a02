//! Work watcher
//!
//! Follows every task of a work until the work settles, the idle window
//! passes without a new completion, or the global deadline expires.
//!
//! ```text
//!              completion / membership
//!                   +--------+
//!                   v        |
//!   start ---> WAITING ------+
//!                 |  all known tasks reported ----> DONE
//!                 |  global deadline ------------> TIMEOUT
//!                 +  idle window elapsed --------> IDLE
//! ```
//!
//! When both timers expire at the same instant the global deadline wins.

use super::outcome::{Phase, WatchEvent, WorkOutcome, WorkState};
use super::{deadline_after, sleep_until_opt, WatchOptions};
use crate::service::{Completion, TaskService, WorkSignal, WorkStatus};
use crate::task::{TaskId, TaskResult, WorkId};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use wpok_foundation::{Error, Result};

/// Accumulated view of a work
#[derive(Debug, Default)]
struct WorkTracker {
    results: Vec<TaskResult>,
    seen: HashSet<TaskId>,
    total: u64,
    /// Unknown until the first membership signal
    pending: Option<u64>,
}

impl WorkTracker {
    fn done(&self) -> u64 {
        self.results.len() as u64
    }

    fn phase(&self) -> Phase {
        if self.total > 0 && self.done() == self.total && self.pending == Some(0) {
            Phase::Done
        } else {
            Phase::Waiting
        }
    }

    fn apply_membership(&mut self, status: WorkStatus) {
        self.total = self.total.max(status.total).max(self.done());
        self.pending = Some(status.pending);
    }

    /// Returns `false` for a task that already reported
    fn record(&mut self, completion: Completion) -> bool {
        if !self.seen.insert(completion.task_id.clone()) {
            return false;
        }
        self.results.push(completion.into());
        // A completion may arrive before the membership that counts it
        self.total = self.total.max(self.done());
        true
    }

    fn into_outcome(self, state: WorkState) -> WorkOutcome {
        WorkOutcome {
            state,
            results: self.results,
            total: self.total,
        }
    }
}

/// Watch every task of `work_id`.
///
/// Completions already recorded for the work are replayed first. For each new
/// completion a [`WatchEvent::TaskDone`] then a [`WatchEvent::Progress`] is
/// sent on `events` and the idle window restarts. A closed `events` receiver
/// does not stop the watch.
pub async fn watch_work<S>(
    service: &S,
    work_id: &WorkId,
    options: WatchOptions,
    events: &mpsc::UnboundedSender<WatchEvent>,
) -> Result<WorkOutcome>
where
    S: TaskService + ?Sized,
{
    let deadline = deadline_after(options.timeout);
    let mut idle_deadline = deadline_after(options.idle);
    let mut subscription = service.subscribe_work(work_id).await?;
    let mut tracker = WorkTracker::default();

    let result = loop {
        if tracker.phase() == Phase::Done {
            break Ok(WorkState::Done);
        }

        tokio::select! {
            biased;
            item = subscription.recv() => match item {
                Some(Ok(WorkSignal::Membership(status))) => {
                    trace!("Work {} membership: {:?}", work_id, status);
                    tracker.apply_membership(status);
                }
                Some(Ok(WorkSignal::Completed(completion))) => {
                    let task_id = completion.task_id.clone();
                    let code = completion.code;
                    if !tracker.record(completion) {
                        debug!("Ignoring repeated completion of {}", task_id);
                        continue;
                    }
                    let _ = events.send(WatchEvent::TaskDone { task_id, code });
                    let _ = events.send(WatchEvent::Progress {
                        done: tracker.done(),
                        total: tracker.total,
                    });
                    idle_deadline = deadline_after(options.idle);
                }
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(Error::disconnected(format!(
                        "subscription to work {} ended",
                        work_id
                    )))
                }
            },
            _ = sleep_until_opt(deadline) => break Ok(WorkState::Timeout),
            _ = sleep_until_opt(idle_deadline) => break Ok(WorkState::Idle),
        }
    };

    subscription.cancel();

    let state = result?;
    debug!(
        "Work {} finished: {} ({}/{} done)",
        work_id,
        Phase::from(state),
        tracker.done(),
        tracker.total
    );
    Ok(tracker.into_outcome(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{validate_manifest, Manifest};
    use crate::service::MemoryTaskService;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    const WORK: &str = "w-watch";

    fn manifest(count: u64) -> Manifest {
        validate_manifest(&json!({
            "apiVersion": "wpok/v1",
            "kind": "Task",
            "metadata": {"name": "watch", "workId": WORK},
            "spec": {"image": "alpine", "batch": {"count": count}}
        }))
        .unwrap()
    }

    fn work_id() -> WorkId {
        WorkId::parse(WORK).unwrap()
    }

    /// Complete `reports[i].0` at absolute offset `reports[i].1` seconds
    fn report_at(service: &MemoryTaskService, reports: Vec<(TaskId, u64)>) {
        let service = service.clone();
        let start = Instant::now();
        tokio::spawn(async move {
            for (id, at) in reports {
                tokio::time::sleep_until(start + Duration::from_secs(at)).await;
                service.complete_task(&id, 0).await.unwrap();
            }
        });
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WatchEvent>) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_after_silence() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(5)).await.unwrap();
        report_at(&service, vec![(ids[0].clone(), 1), (ids[1].clone(), 2)]);

        let (tx, _rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(0, 10), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkState::Idle);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.total, 5);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(12) && elapsed < Duration::from_secs(13));
        assert_eq!(service.active_subscriptions().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_window_restarts_on_each_completion() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(4)).await.unwrap();
        report_at(
            &service,
            vec![(ids[0].clone(), 0), (ids[1].clone(), 3), (ids[2].clone(), 7)],
        );

        let (tx, _rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(0, 5), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkState::Idle);
        assert_eq!(outcome.results.len(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(12) && elapsed < Duration::from_secs(13));
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_emits_events_in_order() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(3)).await.unwrap();
        report_at(
            &service,
            ids.iter().cloned().zip(1..).collect(),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = watch_work(&service, &work_id(), WatchOptions::default(), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkState::Done);
        assert_eq!(outcome.total, 3);
        let order: Vec<TaskId> = outcome.results.iter().map(|r| r.task_id.clone()).collect();
        assert_eq!(order, ids);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[0],
            WatchEvent::TaskDone {
                task_id: ids[0].clone(),
                code: 0
            }
        );
        assert_eq!(events[1], WatchEvent::Progress { done: 1, total: 3 });
        assert_eq!(events[5], WatchEvent::Progress { done: 3, total: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_existing_completions() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(3)).await.unwrap();
        service.complete_task(&ids[1], 4).await.unwrap();
        service.complete_task(&ids[0], 0).await.unwrap();
        report_at(&service, vec![(ids[2].clone(), 1)]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(60, 0), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkState::Done);
        assert_eq!(outcome.results[0].task_id, ids[1]);
        assert_eq!(outcome.results[0].code, 4);
        assert_eq!(outcome.failed_count(), 1);

        let done_events = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, WatchEvent::TaskDone { .. }))
            .count();
        assert_eq!(done_events, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_timeout() {
        let service = MemoryTaskService::new();
        service.create_tasks_batch(&manifest(2)).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(5, 0), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkState::Timeout);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.total, 2);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_deadline_wins_a_tie_with_idle() {
        let service = MemoryTaskService::new();
        service.create_tasks_batch(&manifest(2)).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(5, 5), &tx)
            .await
            .unwrap();
        assert_eq!(outcome.state, WorkState::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_growth_raises_total() {
        let service = MemoryTaskService::new();
        let first = service.create_tasks_batch(&manifest(1)).await.unwrap();

        let producer = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let more = producer.create_tasks_batch(&manifest(2)).await.unwrap();
            for id in first.iter().chain(more.iter()) {
                tokio::time::sleep(Duration::from_secs(1)).await;
                producer.complete_task(id, 0).await.unwrap();
            }
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(30, 0), &tx)
            .await
            .unwrap();

        assert_eq!(outcome.state, WorkState::Done);
        assert_eq!(outcome.total, 3);
        assert_eq!(outcome.results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_event_receiver_does_not_abort() {
        let service = MemoryTaskService::new();
        let ids = service.create_tasks_batch(&manifest(2)).await.unwrap();
        report_at(&service, vec![(ids[0].clone(), 1), (ids[1].clone(), 2)]);

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let outcome = watch_work(&service, &work_id(), WatchOptions::from_secs(10, 0), &tx)
            .await
            .unwrap();
        assert_eq!(outcome.state, WorkState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_failure_propagates() {
        let service = MemoryTaskService::new();
        service.create_tasks_batch(&manifest(2)).await.unwrap();

        let broker = service.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            broker.inject_failure("broker restarted").await;
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = watch_work(&service, &work_id(), WatchOptions::from_secs(10, 10), &tx)
            .await
            .unwrap_err();
        assert!(err.is_service_failure());
        assert_eq!(service.active_subscriptions().await, 0);
    }

    #[test]
    fn test_tracker_ignores_repeats_and_keeps_total_consistent() {
        let mut tracker = WorkTracker::default();
        let id = TaskId::parse("w-t:1").unwrap();

        assert!(tracker.record(Completion::new(id.clone(), 0)));
        assert!(!tracker.record(Completion::new(id, 3)));
        assert_eq!(tracker.total, 1);
        assert_eq!(tracker.phase(), Phase::Waiting);

        tracker.apply_membership(WorkStatus { total: 0, pending: 0 });
        assert_eq!(tracker.total, 1);
        assert_eq!(tracker.phase(), Phase::Done);
    }
}
