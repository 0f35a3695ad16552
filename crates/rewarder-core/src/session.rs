//! Connected players and their per-session state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::storage::SharedRecord;
use crate::tracker::{Location, PlaytimeTracker, Presence};

/// The host's view of a connected player.
pub trait OnlinePlayer: Send + Sync {
    /// Stable identity. Display names may change, ids never do.
    fn id(&self) -> Uuid;

    fn name(&self) -> String;

    fn is_online(&self) -> bool;

    fn location(&self) -> Location;

    /// What the tracker should see this tick.
    fn presence(&self) -> Presence {
        if self.is_online() {
            Presence::Online(self.location())
        } else {
            Presence::Offline
        }
    }
}

/// A session whose tracker is running.
pub(crate) struct ActiveSession {
    pub player: Arc<dyn OnlinePlayer>,
    pub record: SharedRecord,
    pub tracker: PlaytimeTracker,
}

pub(crate) enum SessionSlot {
    /// Waiting for the user record. Not ticked until it arrives.
    Loading {
        player: Arc<dyn OnlinePlayer>,
        record: oneshot::Receiver<SharedRecord>,
    },
    Active(ActiveSession),
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub user: Uuid,
    pub name: String,
    pub loading: bool,
    pub afk: bool,
    pub idle_ticks: u32,
    pub session_minutes: u32,
    pub total_session_minutes: u32,
    /// Session minutes as configured by `playtime-ignore-afk`.
    pub reported_minutes: u32,
    pub global_minutes: u32,
}

impl SessionSlot {
    pub fn snapshot(&self) -> SessionSnapshot {
        match self {
            SessionSlot::Loading { player, .. } => SessionSnapshot {
                user: player.id(),
                name: player.name(),
                loading: true,
                afk: false,
                idle_ticks: 0,
                session_minutes: 0,
                total_session_minutes: 0,
                reported_minutes: 0,
                global_minutes: 0,
            },
            SessionSlot::Active(session) => {
                let t = &session.tracker;
                SessionSnapshot {
                    user: session.player.id(),
                    name: session.player.name(),
                    loading: false,
                    afk: t.is_afk(),
                    idle_ticks: t.idle_ticks(),
                    session_minutes: t.session_minutes(),
                    total_session_minutes: t.total_session_minutes(),
                    reported_minutes: t.reported_session_minutes(),
                    global_minutes: t.global_minutes(),
                }
            }
        }
    }
}
