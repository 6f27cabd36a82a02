//! Storage module for wpok
//!
//! - `db`: SQLite - task store (tasks, completions, works)
//! - `json`: JSON - configuration files

mod db;
mod json;

// SQLite Storage
pub use db::{CompletionRecord, TaskRecord, TaskStore, WorkCounts};

// JSON Storage
pub use json::{ConfigScope, JsonStore};
