//! # wpok-foundation
//!
//! Foundation layer for the wpok worker-pool CLI:
//! - Error: central error type shared by every layer
//! - Config: merged global/project configuration with env overrides
//! - Storage: SQLite task store (runtime), JsonStore (config files)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  wpokctl (Layer4)                            │
//! │      │                                       │
//! │      ▼                                       │
//! │  Waiters / Watcher (Layer2)                  │
//! │      │                                       │
//! │      ▼                                       │
//! │  TaskService ──► MemoryTaskService           │
//! │              └─► SqliteTaskService           │
//! │                        │                     │
//! │                        ▼                     │
//! │                  TaskStore (Layer1)          │
//! └──────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{WpokConfig, WPOK_CONFIG_FILE};

// ============================================================================
// Storage
// ============================================================================
pub use storage::{CompletionRecord, ConfigScope, JsonStore, TaskRecord, TaskStore, WorkCounts};
