mod backend;
mod config;
pub mod database;
mod record;
mod store;

pub use backend::{MemoryRecordBackend, RecordBackend};
pub use config::{Config, DebugMode, GoalConfig, ModulesConfig, ScopeConfig};
pub use database::SqliteRecordBackend;
pub use record::{DailyPeriod, GoalCursor, UserRecord};
pub use store::{lock_record, RecordObserver, SharedRecord, UnloadOutcome, UserStore};

use std::path::PathBuf;

use crate::error::Result;

/// Returns `~/.config/playtime-rewarder[-dev]/` based on REWARDER_ENV.
///
/// Set REWARDER_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("REWARDER_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("playtime-rewarder-dev")
    } else {
        base_dir.join("playtime-rewarder")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
