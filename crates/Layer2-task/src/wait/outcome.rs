//! Outcome and event types of the waiters

use crate::task::{TaskId, TaskResult};
use serde::{Deserialize, Serialize};

/// Where an orchestration loop stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Waiting,
    Done,
    Timeout,
    Idle,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waiting => "WAITING",
            Self::Done => "DONE",
            Self::Timeout => "TIMEOUT",
            Self::Idle => "IDLE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Single task
// ============================================================================

/// Terminal result of waiting on one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitOutcome {
    /// The task reported; a non-zero code is still `Done`
    Done { code: i32 },
    Timeout,
}

impl WaitOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            Self::Done { .. } => Phase::Done,
            Self::Timeout => Phase::Timeout,
        }
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Done { code } => Some(*code),
            Self::Timeout => None,
        }
    }
}

// ============================================================================
// Batch
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Done,
    Timeout,
    /// Fail-fast stopped the wait
    Failed,
}

impl From<BatchState> for Phase {
    fn from(state: BatchState) -> Self {
        match state {
            BatchState::Done => Phase::Done,
            BatchState::Timeout => Phase::Timeout,
            BatchState::Failed => Phase::Failed,
        }
    }
}

/// Terminal result of a batch wait. `done` and `pending` partition the
/// requested ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub state: BatchState,
    /// In the order completions were observed
    pub done: Vec<TaskResult>,
    /// In request order
    pub pending: Vec<TaskId>,
}

impl BatchOutcome {
    pub fn failed_count(&self) -> usize {
        self.done.iter().filter(|r| !r.is_success()).count()
    }

    pub fn requested(&self) -> usize {
        self.done.len() + self.pending.len()
    }
}

// ============================================================================
// Work
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkState {
    Done,
    /// No completion within the idle window
    Idle,
    Timeout,
}

impl From<WorkState> for Phase {
    fn from(state: WorkState) -> Self {
        match state {
            WorkState::Done => Phase::Done,
            WorkState::Idle => Phase::Idle,
            WorkState::Timeout => Phase::Timeout,
        }
    }
}

/// Terminal result of watching a work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkOutcome {
    pub state: WorkState,
    pub results: Vec<TaskResult>,
    /// Never below `results.len()`
    pub total: u64,
}

impl WorkOutcome {
    pub fn done_count(&self) -> usize {
        self.results.len()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }
}

/// Live event of a work watch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WatchEvent {
    #[serde(rename = "task:done", rename_all = "camelCase")]
    TaskDone { task_id: TaskId, code: i32 },

    #[serde(rename = "progress")]
    Progress { done: u64, total: u64 },
}
