//! SQLite task store
//!
//! Runtime data shared between `wpokctl` and the workers:
//! - Tasks: one row per submitted task, with its manifest
//! - Completions: exit code plus a global completion sequence, so readers can
//!   resume from the last sequence they observed
//!
//! ## Migration System
//!
//! Database schema is versioned. Migrations run automatically on open.
//! - Version 1: Initial schema (tasks)
//! - Version 2: Index for per-work pending counts

use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Current schema version
const CURRENT_SCHEMA_VERSION: i32 = 2;

pub const STATE_PENDING: &str = "PENDING";
pub const STATE_DONE: &str = "DONE";

/// Task store backed by SQLite
#[derive(Clone)]
pub struct TaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (or create) the store at `db_path`
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open database: {}", e)))?;

        // WAL lets workers write while wpokctl polls
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| Error::Storage(format!("Failed to set pragmas: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.initialize_schema()?;
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to create in-memory database: {}", e)))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.initialize_schema()?;
        store.run_migrations()?;

        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Internal("Lock poisoned".to_string()))
    }

    /// Get current schema version from database
    pub fn get_schema_version(&self) -> Result<i32> {
        let conn = self.conn()?;

        conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Storage(format!("Failed to get schema version: {}", e)))
    }

    /// Initialize database schema (base tables)
    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Tasks table
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                work_id TEXT NOT NULL,
                name TEXT,
                manifest TEXT NOT NULL,
                state TEXT NOT NULL CHECK(state IN ('PENDING', 'DONE')),
                exit_code INTEGER,
                completion_seq INTEGER,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_work_completion
                ON tasks(work_id, completion_seq);

            -- Insert initial schema version if not exists
            INSERT OR IGNORE INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(|e| Error::Storage(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Run all pending migrations
    fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version >= CURRENT_SCHEMA_VERSION {
            debug!(
                "Database schema is up to date (version {})",
                current_version
            );
            return Ok(());
        }

        info!(
            "Running database migrations from version {} to {}",
            current_version, CURRENT_SCHEMA_VERSION
        );

        let conn = self.conn()?;

        for version in (current_version + 1)..=CURRENT_SCHEMA_VERSION {
            match version {
                2 => Self::migrate_v2(&conn)?,
                _ => {
                    warn!("Unknown migration version: {}", version);
                }
            }

            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![version],
            )
            .map_err(|e| Error::Storage(format!("Failed to record migration: {}", e)))?;

            info!("Applied migration to version {}", version);
        }

        Ok(())
    }

    /// Migration to version 2: index for pending counts
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_work_state ON tasks(work_id, state)",
            [],
        )
        .map_err(|e| Error::Storage(format!("Failed to migrate to v2: {}", e)))?;
        Ok(())
    }

    // ========================================================================
    // Task Operations
    // ========================================================================

    /// Insert tasks atomically (all or nothing)
    pub fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        for task in tasks {
            tx.execute(
                r#"
                INSERT INTO tasks (id, work_id, name, manifest, state, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    task.id,
                    task.work_id,
                    task.name,
                    task.manifest,
                    STATE_PENDING,
                    task.created_at,
                ],
            )
            .map_err(|e| Error::Storage(format!("Failed to insert task {}: {}", task.id, e)))?;
        }

        tx.commit()
            .map_err(|e| Error::Storage(format!("Failed to commit tasks: {}", e)))?;

        debug!("Inserted {} task(s)", tasks.len());
        Ok(())
    }

    /// Get a task by ID
    pub fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;

        conn.query_row(
            r#"
            SELECT id, work_id, name, manifest, state, exit_code, completion_seq,
                   created_at, completed_at
            FROM tasks WHERE id = ?1
            "#,
            params![id],
            |row| {
                Ok(TaskRecord {
                    id: row.get(0)?,
                    work_id: row.get(1)?,
                    name: row.get(2)?,
                    manifest: row.get(3)?,
                    state: row.get(4)?,
                    exit_code: row.get(5)?,
                    completion_seq: row.get(6)?,
                    created_at: row.get(7)?,
                    completed_at: row.get(8)?,
                })
            },
        )
        .optional()
        .map_err(|e| Error::Storage(format!("Failed to get task: {}", e)))
    }

    /// Record a task's exit code.
    ///
    /// Returns `false` when the task was already complete (the first code wins).
    pub fn complete_task(&self, id: &str, exit_code: i32) -> Result<bool> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().to_rfc3339();

        let updated = conn
            .execute(
                r#"
                UPDATE tasks SET
                    state = 'DONE',
                    exit_code = ?2,
                    completed_at = ?3,
                    completion_seq = (SELECT COALESCE(MAX(completion_seq), 0) + 1 FROM tasks)
                WHERE id = ?1 AND state = 'PENDING'
                "#,
                params![id, exit_code, now],
            )
            .map_err(|e| Error::Storage(format!("Failed to complete task: {}", e)))?;

        if updated == 1 {
            return Ok(true);
        }

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1)",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(format!("Failed to look up task: {}", e)))?;

        if exists {
            Ok(false)
        } else {
            Err(Error::NotFound(format!("task {}", id)))
        }
    }

    /// Completions of a work recorded after `after_seq`, in completion order
    pub fn completions_since(&self, work_id: &str, after_seq: i64) -> Result<Vec<CompletionRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT id, exit_code, completion_seq FROM tasks
                WHERE work_id = ?1 AND state = 'DONE' AND completion_seq > ?2
                ORDER BY completion_seq ASC
                "#,
            )
            .map_err(|e| Error::Storage(format!("Failed to prepare query: {}", e)))?;

        let rows = stmt
            .query_map(params![work_id, after_seq], |row| {
                Ok(CompletionRecord {
                    task_id: row.get(0)?,
                    exit_code: row.get::<_, Option<i32>>(1)?.unwrap_or(-1),
                    seq: row.get(2)?,
                })
            })
            .map_err(|e| Error::Storage(format!("Failed to query completions: {}", e)))?;

        let completions = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Storage(format!("Failed to read completion: {}", e)))?;

        Ok(completions)
    }

    /// Total and pending task counts of a work
    pub fn work_counts(&self, work_id: &str) -> Result<WorkCounts> {
        let conn = self.conn()?;

        conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN state = 'PENDING' THEN 1 ELSE 0 END), 0)
            FROM tasks WHERE work_id = ?1
            "#,
            params![work_id],
            |row| {
                Ok(WorkCounts {
                    total: row.get::<_, i64>(0)? as u64,
                    pending: row.get::<_, i64>(1)? as u64,
                })
            },
        )
        .map_err(|e| Error::Storage(format!("Failed to count work tasks: {}", e)))
    }
}

// ============================================================================
// Records
// ============================================================================

/// Task row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub work_id: String,
    pub name: Option<String>,
    /// Manifest as JSON
    pub manifest: String,
    pub state: String,
    pub exit_code: Option<i32>,
    pub completion_seq: Option<i64>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl TaskRecord {
    pub fn is_done(&self) -> bool {
        self.state == STATE_DONE
    }
}

/// A completed task as seen by readers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub task_id: String,
    pub exit_code: i32,
    pub seq: i64,
}

/// Membership counts of a work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkCounts {
    pub total: u64,
    pub pending: u64,
}
