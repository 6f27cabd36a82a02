//! Task state as observed by the client

use serde::{Deserialize, Serialize};

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Submitted, no exit code reported yet
    Pending,

    /// A worker reported an exit code
    Done,
}

impl TaskState {
    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Done => "DONE",
        }
    }

    /// Parse the stored representation
    pub fn from_store(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TaskState::Pending),
            "DONE" => Some(TaskState::Done),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
