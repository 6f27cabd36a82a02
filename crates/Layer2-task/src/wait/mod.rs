//! Completion waiting
//!
//! Three orchestrations over a [`TaskService`](crate::service::TaskService):
//!
//! - [`wait_for_task`] - one task, optional timeout
//! - [`wait_for_many`] - a fixed set of tasks, optional timeout and fail-fast
//! - [`watch_work`] - every task of a work, global and idle timeouts, live events
//!
//! Each call is a single `tokio::select!` loop that owns its accumulators.
//! Timeouts, idle timeouts and fail-fast are outcome values; only service
//! failures are errors. Subscriptions are cancelled on every exit path.
//!
//! ```ignore
//! let service = MemoryTaskService::new();
//! let id = service.create_task(&manifest).await?;
//!
//! match wait_for_task(&service, &id, WaitOptions::from_secs(30)).await? {
//!     WaitOutcome::Done { code } => println!("exit {}", code),
//!     WaitOutcome::Timeout => eprintln!("Timeout."),
//! }
//! ```

mod batch;
mod outcome;
mod single;
mod work;

pub use batch::wait_for_many;
pub use outcome::{
    BatchOutcome, BatchState, Phase, WaitOutcome, WatchEvent, WorkOutcome, WorkState,
};
pub use single::wait_for_task;
pub use work::watch_work;

use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Options
// ============================================================================

/// `0` means "no timeout"
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Single-task waiting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    /// `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl WaitOptions {
    pub fn from_secs(timeout_secs: u64) -> Self {
        Self {
            timeout: timeout_from_secs(timeout_secs),
        }
    }
}

/// Batch waiting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOptions {
    pub timeout: Option<Duration>,
    /// Stop at the first non-zero exit code
    pub fail_fast: bool,
}

impl BatchOptions {
    pub fn from_secs(timeout_secs: u64, fail_fast: bool) -> Self {
        Self {
            timeout: timeout_from_secs(timeout_secs),
            fail_fast,
        }
    }
}

/// Work watching
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Deadline measured from the start of the watch
    pub timeout: Option<Duration>,
    /// Longest allowed silence between completions
    pub idle: Option<Duration>,
}

impl WatchOptions {
    pub fn from_secs(timeout_secs: u64, idle_secs: u64) -> Self {
        Self {
            timeout: timeout_from_secs(timeout_secs),
            idle: timeout_from_secs(idle_secs),
        }
    }
}

// ============================================================================
// Timers
// ============================================================================

pub(crate) fn deadline_after(duration: Option<Duration>) -> Option<Instant> {
    duration.map(|d| Instant::now() + d)
}

/// Sleep until `deadline`, or forever when there is none
pub(crate) async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
