//! Config - merged configuration
//!
//! - `wpok.rs` - WpokConfig (global + project files, env overrides)

mod wpok;

pub use wpok::{WpokConfig, ENV_POLL_INTERVAL_MS, ENV_STORE, WPOK_CONFIG_FILE};
