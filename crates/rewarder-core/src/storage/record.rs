//! Persisted per-user state.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Day a daily cursor belongs to, and the global minutes at its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPeriod {
    pub date: NaiveDate,
    pub baseline_minutes: u32,
}

/// Watermark of the last playtime value whose goals were paid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalCursor {
    pub last_collected: u32,
    /// Only set for scopes that reset on a day boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<DailyPeriod>,
}

impl GoalCursor {
    pub fn at(last_collected: u32) -> Self {
        Self {
            last_collected,
            period: None,
        }
    }

    /// Move the watermark forward. Never moves backwards.
    pub fn advance_to(&mut self, value: u32) -> bool {
        if value > self.last_collected {
            self.last_collected = value;
            true
        } else {
            false
        }
    }

    /// Fold another copy of the same cursor into this one. The watermark and
    /// the period date only move forward.
    pub fn merge(&mut self, other: &GoalCursor) {
        self.advance_to(other.last_collected);
        match (self.period, other.period) {
            (Some(mine), Some(theirs)) if theirs.date > mine.date => self.period = Some(theirs),
            (None, Some(theirs)) => self.period = Some(theirs),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    /// Last known display name. Informational only.
    #[serde(default)]
    pub username: String,
    minutes_played: u32,
    /// Module id -> cursor.
    #[serde(default)]
    cursors: BTreeMap<String, GoalCursor>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Stand-in created after a failed load. Never written back.
    #[serde(skip)]
    degraded: bool,
}

impl UserRecord {
    /// A record with no playtime and no cursors.
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            minutes_played: 0,
            cursors: BTreeMap::new(),
            updated_at: Utc::now(),
            degraded: false,
        }
    }

    /// Empty stand-in for a record whose stored copy could not be read.
    pub(crate) fn degraded(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            degraded: true,
            ..Self::new(id, username)
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Rebuild a record from stored columns.
    pub fn from_parts(
        id: Uuid,
        username: String,
        minutes_played: u32,
        cursors: BTreeMap<String, GoalCursor>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut record = Self {
            id,
            username,
            minutes_played,
            cursors,
            updated_at,
            degraded: false,
        };
        record.clamp_cursors();
        record
    }

    pub fn minutes_played(&self) -> u32 {
        self.minutes_played
    }

    /// Raise the playtime total. Lower values are ignored.
    pub fn record_minutes(&mut self, minutes: u32) {
        if minutes > self.minutes_played {
            self.minutes_played = minutes;
            self.touch();
        }
    }

    pub fn cursor(&self, module_id: &str) -> Option<&GoalCursor> {
        self.cursors.get(module_id)
    }

    /// Last collected value for a module, 0 when never set.
    pub fn last_collected(&self, module_id: &str) -> u32 {
        self.cursors
            .get(module_id)
            .map(|c| c.last_collected)
            .unwrap_or(0)
    }

    pub fn cursors(&self) -> &BTreeMap<String, GoalCursor> {
        &self.cursors
    }

    /// Cursor for a module, created by `init` when missing.
    pub fn cursor_entry(
        &mut self,
        module_id: &str,
        init: impl FnOnce() -> GoalCursor,
    ) -> &mut GoalCursor {
        self.cursors.entry(module_id.to_string()).or_insert_with(init)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Fold a previously stored copy into this snapshot, so a write that
    /// lands late never lowers the total or rewinds a cursor.
    pub fn absorb(&mut self, stored: &UserRecord) {
        self.minutes_played = self.minutes_played.max(stored.minutes_played);
        merge_cursors(&mut self.cursors, &stored.cursors);
    }

    /// Stored cursors may be ahead of a stale playtime total after a crash
    /// between a cursor save and a playtime flush. Trust the cursor.
    fn clamp_cursors(&mut self) {
        let highest = self
            .cursors
            .values()
            .map(|c| c.last_collected)
            .max()
            .unwrap_or(0);
        if highest > self.minutes_played {
            self.minutes_played = highest;
        }
    }
}

/// Fold `stored` into `cursors` key by key. Keys only present in `stored`
/// are kept.
pub fn merge_cursors(cursors: &mut BTreeMap<String, GoalCursor>, stored: &BTreeMap<String, GoalCursor>) {
    for (key, cursor) in stored {
        cursors
            .entry(key.clone())
            .and_modify(|c| c.merge(cursor))
            .or_insert(*cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_never_rewinds() {
        let mut cursor = GoalCursor::at(40);
        assert!(!cursor.advance_to(30));
        assert!(!cursor.advance_to(40));
        assert!(cursor.advance_to(75));
        assert_eq!(cursor.last_collected, 75);
    }

    #[test]
    fn minutes_played_is_monotonic() {
        let mut record = UserRecord::new(Uuid::new_v4(), "Steve");
        record.record_minutes(45);
        record.record_minutes(30);
        assert_eq!(record.minutes_played(), 45);
    }

    #[test]
    fn missing_cursor_reads_as_zero() {
        let record = UserRecord::new(Uuid::new_v4(), "Steve");
        assert_eq!(record.last_collected("global-playtime-goals"), 0);
        assert!(record.cursor("global-playtime-goals").is_none());
    }

    #[test]
    fn from_parts_lifts_stale_total() {
        let mut cursors = BTreeMap::new();
        cursors.insert("global-playtime-goals".to_string(), GoalCursor::at(75));
        let record = UserRecord::from_parts(Uuid::nil(), "Alex".into(), 60, cursors, Utc::now());
        assert_eq!(record.minutes_played(), 75);
    }

    #[test]
    fn absorb_keeps_the_furthest_state() {
        let day = |d| NaiveDate::from_ymd_opt(2026, 10, d).unwrap();
        let id = Uuid::new_v4();

        let mut stored = UserRecord::new(id, "Alex");
        stored.record_minutes(120);
        *stored.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(120);
        *stored.cursor_entry("daily-playtime-goals", GoalCursor::default) = GoalCursor {
            last_collected: 120,
            period: Some(DailyPeriod { date: day(18), baseline_minutes: 100 }),
        };

        let mut late = UserRecord::new(id, "Alex");
        late.record_minutes(90);
        *late.cursor_entry("global-playtime-goals", GoalCursor::default) = GoalCursor::at(90);
        *late.cursor_entry("daily-playtime-goals", GoalCursor::default) = GoalCursor {
            last_collected: 90,
            period: Some(DailyPeriod { date: day(17), baseline_minutes: 60 }),
        };

        late.absorb(&stored);
        assert_eq!(late.minutes_played(), 120);
        assert_eq!(late.last_collected("global-playtime-goals"), 120);
        let daily = late.cursor("daily-playtime-goals").unwrap();
        assert_eq!(daily.last_collected, 120);
        assert_eq!(daily.period.unwrap().date, day(18));
    }

    #[test]
    fn degraded_flag_is_not_persisted() {
        let record = UserRecord::degraded(Uuid::new_v4(), "Alex");
        assert!(record.is_degraded());
        let json = serde_json::to_string(&record).unwrap();
        let back: UserRecord = serde_json::from_str(&json).unwrap();
        assert!(!back.is_degraded());
    }

    #[test]
    fn json_roundtrip_keeps_cursors() {
        let mut record = UserRecord::new(Uuid::new_v4(), "Alex");
        record.record_minutes(90);
        record
            .cursor_entry("daily-playtime-goals", || GoalCursor {
                last_collected: 5,
                period: Some(DailyPeriod {
                    date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
                    baseline_minutes: 80,
                }),
            });
        let json = serde_json::to_string(&record).unwrap();
        let back: UserRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
