//! Result reporting and exit codes
//!
//! Reports are built as plain lines first so the wording and the exit code
//! can be checked without a terminal.

use wpok_task::{
    BatchOutcome, BatchState, ManifestError, TaskId, WaitOutcome, WatchEvent, WorkOutcome,
    WorkState,
};

/// Process exit status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Everything finished with code 0
    Success,
    /// Validation or unexpected error
    Error,
    /// At least one task reported a non-zero code (or fail-fast stopped)
    TaskFailed,
    /// Timeout or idle timeout
    Timeout,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Error => 1,
            ExitStatus::TaskFailed => 2,
            ExitStatus::Timeout => 124,
        }
    }
}

/// Lines for stdout/stderr plus the resulting exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub out: Vec<String>,
    pub err: Vec<String>,
    pub status: ExitStatus,
}

impl Report {
    fn new() -> Self {
        Self {
            out: Vec::new(),
            err: Vec::new(),
            status: ExitStatus::Success,
        }
    }

    /// Write the report and hand back its status
    pub fn emit(self) -> ExitStatus {
        for line in &self.out {
            println!("{}", line);
        }
        for line in &self.err {
            eprintln!("{}", line);
        }
        self.status
    }
}

// ============================================================================
// Creation
// ============================================================================

pub fn created_single(task_id: &TaskId) -> String {
    format!("Created task: {}", task_id)
}

pub fn created_batch(task_ids: &[TaskId]) -> Vec<String> {
    std::iter::once(format!("Created {} tasks:", task_ids.len()))
        .chain(task_ids.iter().map(|id| format!(" - {}", id)))
        .collect()
}

/// Manifest problems, one line per issue
pub fn manifest_error(error: &ManifestError) -> Report {
    let mut report = Report::new();
    report.err.push(error.to_string());
    for issue in error.issues() {
        report.err.push(format!("  • {}", issue));
    }
    report.status = ExitStatus::Error;
    report
}

// ============================================================================
// Outcomes
// ============================================================================

pub fn single_outcome(outcome: &WaitOutcome) -> Report {
    let mut report = Report::new();
    match outcome {
        WaitOutcome::Done { code } => {
            report.out.push(format!("Exit code: {}", code));
            if *code != 0 {
                report.status = ExitStatus::TaskFailed;
            }
        }
        WaitOutcome::Timeout => {
            report.err.push("Timeout.".to_string());
            report.status = ExitStatus::Timeout;
        }
    }
    report
}

pub fn batch_outcome(outcome: &BatchOutcome) -> Report {
    let mut report = Report::new();
    let failed = outcome.failed_count();

    report
        .out
        .push(format!("Done: {}/{}", outcome.done.len(), outcome.requested()));
    if failed > 0 {
        report.out.push(format!("Failed: {}", failed));
        report.status = ExitStatus::TaskFailed;
    }

    match outcome.state {
        BatchState::Done => {}
        BatchState::Failed => {
            report.err.push("Fail-fast: some task failed.".to_string());
            report.status = ExitStatus::TaskFailed;
        }
        BatchState::Timeout => {
            report
                .err
                .push(format!("Timeout; pending: {}", outcome.pending.len()));
            report.status = ExitStatus::Timeout;
        }
    }
    report
}

pub fn work_outcome(outcome: &WorkOutcome) -> Report {
    let mut report = Report::new();
    let done = outcome.done_count();

    match outcome.state {
        WorkState::Done => {
            let failed = outcome.failed_count();
            if failed > 0 {
                report
                    .err
                    .push(format!("Failed: {}/{}", failed, outcome.total));
                report.status = ExitStatus::TaskFailed;
            }
        }
        WorkState::Idle => {
            report.err.push(format!(
                "Idle timeout with {}/{} done",
                done, outcome.total
            ));
            report.status = ExitStatus::Timeout;
        }
        WorkState::Timeout => {
            report.err.push(format!(
                "Global timeout with {}/{} done",
                done, outcome.total
            ));
            report.status = ExitStatus::Timeout;
        }
    }
    report
}

/// Rendering of one live watch event, including its line terminator
pub fn watch_event(event: &WatchEvent, json: bool) -> String {
    if json {
        // WatchEvent only holds strings and integers
        let line = serde_json::to_string(event).unwrap_or_default();
        return format!("{}\n", line);
    }
    match event {
        WatchEvent::TaskDone { task_id, code } => format!("done: {} (code={})\n", task_id, code),
        WatchEvent::Progress { done, total } => format!("progress: {}/{}\r", done, total),
    }
}
