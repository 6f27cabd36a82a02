//! Single-task waiter

use super::outcome::WaitOutcome;
use super::{deadline_after, sleep_until_opt, WaitOptions};
use crate::service::TaskService;
use crate::task::TaskId;
use tracing::debug;
use wpok_foundation::{Error, Result};

/// Wait for one task to report its exit code.
///
/// Races the task's completion against `options.timeout`. A service error
/// (or a subscription that ends without an item) is returned as `Err`.
pub async fn wait_for_task<S>(
    service: &S,
    task_id: &TaskId,
    options: WaitOptions,
) -> Result<WaitOutcome>
where
    S: TaskService + ?Sized,
{
    let deadline = deadline_after(options.timeout);
    let mut subscription = service.subscribe_task(task_id).await?;

    let result = tokio::select! {
        biased;
        item = subscription.recv() => match item {
            Some(Ok(completion)) => Ok(WaitOutcome::Done { code: completion.code }),
            Some(Err(e)) => Err(e),
            None => Err(Error::disconnected(format!(
                "subscription to task {} ended without a completion",
                task_id
            ))),
        },
        _ = sleep_until_opt(deadline) => Ok(WaitOutcome::Timeout),
    };

    subscription.cancel();

    match &result {
        Ok(outcome) => debug!("Task {} finished waiting: {}", task_id, outcome.phase()),
        Err(e) => debug!("Waiting for task {} failed: {}", task_id, e),
    }
    result
}
