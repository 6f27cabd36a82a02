//! Task and work identities

use crate::state::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wpok_foundation::{Error, Result};

/// Separator between the work id and the task suffix in a task id
const TASK_ID_SEPARATOR: char = ':';

fn random_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

fn check_id_part(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", kind)));
    }
    if value.contains(TASK_ID_SEPARATOR) || value.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "{} '{}' must not contain '{}' or whitespace",
            kind, value, TASK_ID_SEPARATOR
        )));
    }
    Ok(())
}

// ============================================================================
// WorkId
// ============================================================================

/// Identifier of a work (a group of tasks)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(String);

impl WorkId {
    /// Generate a new random work id (`w-` + 12 hex chars)
    pub fn generate() -> Self {
        Self(format!("w-{}", random_hex(12)))
    }

    /// Accept a user-provided work id
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        check_id_part("work id", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for WorkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// TaskId
// ============================================================================

/// Identifier of a task: `{work_id}:{suffix}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a new task id inside `work_id`
    pub fn generate(work_id: &WorkId) -> Self {
        Self(format!("{}{}{}", work_id, TASK_ID_SEPARATOR, random_hex(8)))
    }

    /// Parse a task id, checking that it carries a work id
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let (work, suffix) = value.rsplit_once(TASK_ID_SEPARATOR).ok_or_else(|| {
            Error::Validation(format!(
                "task id '{}' has no work id (expected <workId>{}<suffix>)",
                value, TASK_ID_SEPARATOR
            ))
        })?;
        check_id_part("work id", work)?;
        check_id_part("task suffix", suffix)?;
        Ok(Self(value))
    }

    /// The work this task belongs to
    pub fn work_id(&self) -> WorkId {
        let work = self
            .0
            .rsplit_once(TASK_ID_SEPARATOR)
            .map(|(work, _)| work)
            .unwrap_or(&self.0);
        WorkId(work.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Work id embedded in a task id
pub fn extract_work_id(task_id: &str) -> Result<WorkId> {
    TaskId::parse(task_id).map(|id| id.work_id())
}

// ============================================================================
// Task
// ============================================================================

/// A task as seen by the client. Only the task service mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Work this task belongs to
    pub work_id: WorkId,

    /// Manifest name
    pub name: String,

    /// Current state
    pub state: TaskState,

    /// Exit code, present once the task is done
    pub exit_code: Option<i32>,

    /// When the task was created
    pub created_at: DateTime<Utc>,

    /// When the exit code was reported
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            work_id: id.work_id(),
            id,
            name: name.into(),
            state: TaskState::Pending,
            exit_code: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record the exit code. Returns `false` if the task was already done.
    pub fn complete(&mut self, exit_code: i32) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Done;
        self.exit_code = Some(exit_code);
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Exit code reported for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub code: i32,
}

impl TaskResult {
    pub fn new(task_id: TaskId, code: i32) -> Self {
        Self { task_id, code }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}
