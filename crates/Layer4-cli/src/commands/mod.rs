//! Command handlers
//!
//! Every handler opens the task service, runs exactly one operation and
//! closes the service again, whatever the operation returned.

pub mod tasks;
pub mod work;

use anyhow::Context;
use wpok_foundation::WpokConfig;
use wpok_task::SqliteTaskService;

/// Seconds from a command-line value. Anything that does not start with a
/// number counts as 0 (no limit); trailing text is ignored.
pub fn parse_secs(value: &str) -> u64 {
    let digits: String = value
        .trim()
        .trim_start_matches('+')
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

pub fn open_service(config: &WpokConfig) -> anyhow::Result<SqliteTaskService> {
    let path = config.store_path()?;
    SqliteTaskService::open(config)
        .with_context(|| format!("failed to open task store {}", path.display()))
}
