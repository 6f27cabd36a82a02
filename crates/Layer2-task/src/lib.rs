//! # wpok-task
//!
//! Task submission and completion waiting for the wpok worker pool.
//!
//! ## Features
//!
//! - Task and work identities (`TaskId`, `WorkId`)
//! - Manifest loading, validation and batch planning
//! - `TaskService` trait with memory and SQLite backends
//! - Completion waiting: single task, fixed batch (with fail-fast) and
//!   open-ended work watching (with idle timeout and live events)

pub mod manifest;
pub mod service;
pub mod state;
pub mod task;
pub mod wait;

// Task model
pub use state::TaskState;
pub use task::{extract_work_id, Task, TaskId, TaskResult, WorkId};

// Manifests
pub use manifest::{
    load_and_validate_manifest, load_manifest, parse_s3_url, plan_batch, validate_manifest,
    BatchItem, BatchSpec, Manifest, ManifestError, ManifestMetadata, S3Url, TaskSpec,
    ValidationError, ValidationIssue,
};

// Task service
pub use service::{
    Completion, MemoryTaskService, SqliteTaskService, Subscription, SubscriptionSender,
    TaskService, WorkSignal, WorkStatus,
};

// Waiting
pub use wait::{
    wait_for_many, wait_for_task, watch_work, BatchOptions, BatchOutcome, BatchState, Phase,
    WaitOptions, WaitOutcome, WatchEvent, WatchOptions, WorkOutcome, WorkState,
};
