//! # Rewarder Core Library
//!
//! This library tracks per-player active playtime on a ticking game server
//! and pays out configured rewards when playtime goals are reached. The host
//! server supplies the players, a reward sink and a tick; everything else
//! lives here.
//!
//! ## Architecture
//!
//! - **Tracker**: a tick-driven state machine per session that tells active,
//!   idle and AFK ticks apart and accrues session and global minutes
//! - **Goals**: per-scope registries (daily, global) of playtime thresholds
//! - **Scheduler**: pays out crossed goals and advances per-user cursors
//! - **Storage**: resident user records with asynchronous SQLite persistence,
//!   and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`Rewarder`]: the context object tying everything together
//! - [`PlaytimeTracker`]: per-session accrual state machine
//! - [`GoalRegistry`]: ordered goals with half-open range queries
//! - [`UserStore`]: record lifecycle with vetoable unloads
//! - [`Config`]: configuration management

pub mod clock;
pub mod error;
pub mod events;
pub mod goals;
pub mod rewarder;
pub mod rewards;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod tracker;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, Result};
pub use events::Event;
pub use goals::{Goal, GoalRegistry, GoalScope, ScopeModule, ScopeSet};
pub use rewarder::Rewarder;
pub use rewards::{LoggingSink, Recipient, RecordingSink, Reward, RewardCollection, RewardSink};
pub use scheduler::{MinuteEvaluation, ReachedGoal, RewardScheduler};
pub use session::{OnlinePlayer, SessionSnapshot};
pub use storage::{
    Config, MemoryRecordBackend, RecordBackend, RecordObserver, SqliteRecordBackend,
    UnloadOutcome, UserRecord, UserStore,
};
pub use tracker::{Activity, Location, PlaytimeTracker, Presence, TickOutcome, TrackerSettings};
