use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::goals::GoalScope;

/// Every observable state change in the rewarder produces an Event.
/// The driver collects them per tick; the CLI prints them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A tracker was attached after the user's record finished loading.
    SessionStarted {
        user: Uuid,
        global_minutes: u32,
        at: DateTime<Utc>,
    },
    /// The connection went away; the tracker is gone.
    SessionEnded {
        user: Uuid,
        session_minutes: u32,
        global_minutes: u32,
        at: DateTime<Utc>,
    },
    AfkStarted {
        user: Uuid,
        idle_ticks: u32,
        at: DateTime<Utc>,
    },
    AfkEnded {
        user: Uuid,
        at: DateTime<Utc>,
    },
    /// One more minute of active playtime was accrued.
    PlaytimeMinute {
        user: Uuid,
        global_minutes: u32,
        at: DateTime<Utc>,
    },
    /// A goal threshold was crossed and its rewards were handed to the sink.
    GoalReached {
        user: Uuid,
        scope: GoalScope,
        threshold: u32,
        rewards: usize,
        at: DateTime<Utc>,
    },
    RecordLoaded {
        user: Uuid,
        minutes_played: u32,
        at: DateTime<Utc>,
    },
    RecordUnloaded {
        user: Uuid,
        at: DateTime<Utc>,
    },
    /// An observer asked to keep the record resident.
    UnloadVetoed {
        user: Uuid,
        at: DateTime<Utc>,
    },
    ConfigReloaded {
        scopes: Vec<GoalScope>,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// The user the event is about, if any.
    pub fn user(&self) -> Option<Uuid> {
        match self {
            Event::SessionStarted { user, .. }
            | Event::SessionEnded { user, .. }
            | Event::AfkStarted { user, .. }
            | Event::AfkEnded { user, .. }
            | Event::PlaytimeMinute { user, .. }
            | Event::GoalReached { user, .. }
            | Event::RecordLoaded { user, .. }
            | Event::RecordUnloaded { user, .. }
            | Event::UnloadVetoed { user, .. } => Some(*user),
            Event::ConfigReloaded { .. } => None,
        }
    }
}
