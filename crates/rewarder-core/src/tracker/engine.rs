//! Playtime tracker implementation.
//!
//! The tracker is a tick-driven state machine, one per connected user. It
//! does not own a clock or a thread - the driver calls `tick()` once per
//! quantum with whatever it sampled from the connection.
//!
//! ## States
//!
//! ```text
//! Active <-> Grace -> Afk -> Active
//! ```
//!
//! A tick where the block position changed is `Active`. Unchanged ticks are
//! `Grace` until the idle counter passes the threshold, then `Afk`. Active and
//! grace ticks accrue session time; AFK ticks accrue nothing.
//!
//! ## Usage
//!
//! ```ignore
//! let mut tracker = PlaytimeTracker::new(record.minutes_played, location, settings);
//! // Once per tick:
//! match tracker.tick(Presence::Online(player.location())) {
//!     TickOutcome::SessionEnded => { /* tear the session down */ }
//!     TickOutcome::Tracked(report) => { /* report.minute drives goal checks */ }
//! }
//! ```

use serde::{Deserialize, Serialize};

use super::location::{Location, Presence};

/// Consecutive unchanged ticks tolerated before a user is considered AFK.
pub const IDLE_TICKS_TO_AFK: u32 = 300;
/// Accrued ticks per global playtime minute.
pub const TICKS_PER_MINUTE: u32 = 60;
/// Global minutes between write-throughs into the user record.
pub const FLUSH_EVERY_MINUTES: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    /// Position changed this tick.
    Active,
    /// Unchanged position, still inside the idle allowance. Accrues.
    Grace,
    /// Past the idle allowance. Accrues nothing.
    Afk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSettings {
    pub idle_threshold_ticks: u32,
    /// Report active minutes (AFK time ignored) instead of elapsed minutes.
    pub ignore_afk: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            idle_threshold_ticks: IDLE_TICKS_TO_AFK,
            ignore_afk: true,
        }
    }
}

/// A global minute boundary crossed during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteCrossed {
    pub global_minutes: u32,
    /// The new total should be written into the user record.
    pub flush: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub activity: Activity,
    /// `Some(true)` when the user just went AFK, `Some(false)` when they just came back.
    pub afk_changed: Option<bool>,
    pub minute: Option<MinuteCrossed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The connection is gone. The caller must stop ticking and tear down.
    SessionEnded,
    Tracked(TickReport),
}

/// Per-session playtime state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaytimeTracker {
    settings: TrackerSettings,
    last_location: Location,
    afk: bool,
    /// Accrued ticks since the session started.
    session_time: u32,
    /// Consecutive ticks without movement.
    idle_time: u32,
    /// Global playtime in minutes, seeded from the user record.
    global_time: u32,
    #[serde(default)]
    ended: bool,
}

impl PlaytimeTracker {
    pub fn new(global_minutes: u32, location: Location, settings: TrackerSettings) -> Self {
        Self {
            settings,
            last_location: location,
            afk: false,
            session_time: 0,
            idle_time: 0,
            global_time: global_minutes,
            ended: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn is_afk(&self) -> bool {
        self.afk
    }

    pub fn has_ended(&self) -> bool {
        self.ended
    }

    pub fn settings(&self) -> TrackerSettings {
        self.settings
    }

    pub fn idle_ticks(&self) -> u32 {
        self.idle_time
    }

    pub fn session_ticks(&self) -> u32 {
        self.session_time
    }

    /// Whole minutes of accrued (non-AFK) time this session.
    pub fn session_minutes(&self) -> u32 {
        self.session_time / TICKS_PER_MINUTE
    }

    /// Whole minutes of accrued plus idle time this session.
    pub fn total_session_minutes(&self) -> u32 {
        self.session_time.saturating_add(self.idle_time) / TICKS_PER_MINUTE
    }

    /// Session minutes as shown to users, honoring `ignore_afk`.
    pub fn reported_session_minutes(&self) -> u32 {
        if self.settings.ignore_afk {
            self.session_minutes()
        } else {
            self.total_session_minutes()
        }
    }

    pub fn global_minutes(&self) -> u32 {
        self.global_time
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Advance one tick with what was sampled from the connection.
    pub fn tick(&mut self, presence: Presence) -> TickOutcome {
        if self.ended {
            return TickOutcome::SessionEnded;
        }
        match presence {
            Presence::Offline => {
                self.ended = true;
                TickOutcome::SessionEnded
            }
            Presence::Online(location) => {
                let report = if location != self.last_location {
                    self.last_location = location;
                    self.while_active()
                } else {
                    self.while_inactive()
                };
                TickOutcome::Tracked(report)
            }
        }
    }

    /// Swap settings after a configuration reload. Accrued time is untouched.
    pub fn set_settings(&mut self, settings: TrackerSettings) {
        self.settings = settings;
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn while_active(&mut self) -> TickReport {
        // The idle counter only restarts on the way back from AFK.
        let returned = self.afk;
        if returned {
            self.afk = false;
            self.idle_time = 0;
        }
        TickReport {
            activity: Activity::Active,
            afk_changed: returned.then_some(false),
            minute: self.accrue(),
        }
    }

    fn while_inactive(&mut self) -> TickReport {
        self.idle_time = self.idle_time.saturating_add(1);

        if self.afk {
            return TickReport {
                activity: Activity::Afk,
                afk_changed: None,
                minute: None,
            };
        }

        if self.idle_time > self.settings.idle_threshold_ticks {
            self.afk = true;
            return TickReport {
                activity: Activity::Afk,
                afk_changed: Some(true),
                minute: None,
            };
        }

        TickReport {
            activity: Activity::Grace,
            afk_changed: None,
            minute: self.accrue(),
        }
    }

    fn accrue(&mut self) -> Option<MinuteCrossed> {
        self.session_time = self.session_time.saturating_add(1);
        if self.session_time % TICKS_PER_MINUTE != 0 {
            return None;
        }
        self.global_time = self.global_time.saturating_add(1);
        Some(MinuteCrossed {
            global_minutes: self.global_time,
            flush: self.global_time % FLUSH_EVERY_MINUTES == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spawn() -> Location {
        Location::new("world", 0, 64, 0)
    }

    fn moved(step: u32) -> Presence {
        Presence::Online(Location::new("world", step as i32 + 1, 64, 0))
    }

    fn still() -> Presence {
        Presence::Online(spawn())
    }

    fn tracker(global: u32, ignore_afk: bool) -> PlaytimeTracker {
        PlaytimeTracker::new(
            global,
            spawn(),
            TrackerSettings {
                idle_threshold_ticks: IDLE_TICKS_TO_AFK,
                ignore_afk,
            },
        )
    }

    fn report(outcome: TickOutcome) -> TickReport {
        match outcome {
            TickOutcome::Tracked(report) => report,
            TickOutcome::SessionEnded => panic!("Expected Tracked"),
        }
    }

    #[test]
    fn sixty_active_ticks_make_one_minute() {
        let mut t = tracker(59, true);
        let mut crossed = Vec::new();
        for i in 0..60 {
            if let Some(m) = report(t.tick(moved(i))).minute {
                crossed.push(m);
            }
        }
        assert_eq!(t.global_minutes(), 60);
        assert_eq!(
            crossed,
            vec![MinuteCrossed {
                global_minutes: 60,
                flush: true
            }]
        );
        assert_eq!(t.session_minutes(), 1);
    }

    #[test]
    fn grace_period_then_afk_on_tick_301() {
        let mut t = tracker(0, false);
        for i in 1..=300 {
            let r = report(t.tick(still()));
            assert_eq!(r.activity, Activity::Grace, "tick {i}");
        }
        assert_eq!(t.session_ticks(), 300);
        assert_eq!(t.global_minutes(), 5);
        assert!(!t.is_afk());

        let r = report(t.tick(still()));
        assert_eq!(r.activity, Activity::Afk);
        assert_eq!(r.afk_changed, Some(true));
        assert!(t.is_afk());
        assert_eq!(t.session_ticks(), 300);

        for _ in 0..500 {
            let r = report(t.tick(still()));
            assert_eq!(r.afk_changed, None);
            assert!(r.minute.is_none());
        }
        assert_eq!(t.session_ticks(), 300);
        assert_eq!(t.idle_ticks(), 801);
        assert!(t.is_afk());
    }

    #[test]
    fn movement_clears_afk_and_accrues() {
        let mut t = tracker(0, true);
        for _ in 0..301 {
            t.tick(still());
        }
        assert!(t.is_afk());

        let r = report(t.tick(moved(0)));
        assert_eq!(r.activity, Activity::Active);
        assert_eq!(r.afk_changed, Some(false));
        assert!(!t.is_afk());
        assert_eq!(t.idle_ticks(), 0);
        assert_eq!(t.session_ticks(), 301);
    }

    #[test]
    fn movement_outside_afk_keeps_idle_count() {
        let mut t = tracker(0, false);
        let mut here = spawn();
        for _ in 0..200 {
            t.tick(Presence::Online(here.clone()));
        }
        here.x += 1;
        let r = report(t.tick(Presence::Online(here.clone())));
        assert_eq!(r.activity, Activity::Active);
        assert_eq!(t.idle_ticks(), 200);

        for _ in 0..100 {
            t.tick(Presence::Online(here.clone()));
        }
        assert!(!t.is_afk());
        let r = report(t.tick(Presence::Online(here.clone())));
        assert_eq!(r.afk_changed, Some(true));
        assert_eq!(t.idle_ticks(), 301);
        assert_eq!(t.session_ticks(), 301);
        // Elapsed minutes include every idle tick of the session.
        assert_eq!(t.total_session_minutes(), (301 + 301) / TICKS_PER_MINUTE);
        assert_eq!(t.reported_session_minutes(), 10);
    }

    #[test]
    fn offline_ends_session_for_good() {
        let mut t = tracker(10, true);
        t.tick(moved(0));
        assert_eq!(t.tick(Presence::Offline), TickOutcome::SessionEnded);
        assert!(t.has_ended());
        assert_eq!(t.tick(moved(1)), TickOutcome::SessionEnded);
        assert_eq!(t.session_ticks(), 1);
        assert_eq!(t.global_minutes(), 10);
    }

    #[test]
    fn flush_every_fifteen_minutes() {
        let mut t = tracker(0, true);
        let mut flushed = Vec::new();
        for i in 0..(TICKS_PER_MINUTE * 45) {
            if let Some(m) = report(t.tick(moved(i))).minute {
                if m.flush {
                    flushed.push(m.global_minutes);
                }
            }
        }
        assert_eq!(flushed, vec![15, 30, 45]);
    }

    #[test]
    fn reported_minutes_follow_ignore_afk() {
        let mut t = tracker(0, true);
        for _ in 0..(301 + 240) {
            t.tick(still());
        }
        // 300 accrued ticks, 541 idle ticks
        assert_eq!(t.session_minutes(), 5);
        assert_eq!(t.total_session_minutes(), 14);
        assert_eq!(t.reported_session_minutes(), 5);

        t.set_settings(TrackerSettings {
            idle_threshold_ticks: IDLE_TICKS_TO_AFK,
            ignore_afk: false,
        });
        assert_eq!(t.reported_session_minutes(), 14);
    }

    proptest! {
        #[test]
        fn global_time_tracks_accrued_ticks(start in 0u32..10_000, moves in prop::collection::vec(any::<bool>(), 0..3000)) {
            let mut t = tracker(start, true);
            let mut accrued = 0u32;
            let mut last_global = start;
            let mut x = 0;
            for m in moves {
                let presence = if m {
                    x += 1;
                    Presence::Online(Location::new("world", x, 64, 0))
                } else {
                    Presence::Online(Location::new("world", x, 64, 0))
                };
                let r = report(t.tick(presence));
                if r.activity != Activity::Afk {
                    accrued += 1;
                }
                prop_assert!(t.global_minutes() >= last_global);
                last_global = t.global_minutes();
            }
            prop_assert_eq!(t.global_minutes(), start + accrued / TICKS_PER_MINUTE);
        }
    }
}
