mod engine;
mod location;

pub use engine::{
    Activity, MinuteCrossed, PlaytimeTracker, TickOutcome, TickReport, TrackerSettings,
    FLUSH_EVERY_MINUTES, IDLE_TICKS_TO_AFK, TICKS_PER_MINUTE,
};
pub use location::{Location, Presence};
