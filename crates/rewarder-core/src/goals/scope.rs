//! Goal scopes: which playtime figure a registry is measured against and
//! when it resets.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::registry::GoalRegistry;
use crate::storage::{DailyPeriod, GoalCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalScope {
    /// Playtime since the start of the current calendar day.
    Daily,
    /// Lifetime playtime. Never resets.
    Global,
}

impl GoalScope {
    pub const ALL: [GoalScope; 2] = [GoalScope::Daily, GoalScope::Global];

    /// Key of this scope's cursor in the user record.
    pub fn module_id(self) -> &'static str {
        match self {
            GoalScope::Daily => "daily-playtime-goals",
            GoalScope::Global => "global-playtime-goals",
        }
    }

    pub fn from_module_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.module_id() == id)
    }

    /// Cursor for a user seen for the first time in this scope. Starts at the
    /// user's current totals so nothing is paid out retroactively.
    ///
    /// `last_collected` is a global-minute watermark in every scope, so a
    /// cursor only ever moves forward.
    pub fn initial_cursor(self, minutes_played: u32, today: NaiveDate) -> GoalCursor {
        match self {
            GoalScope::Global => GoalCursor::at(minutes_played),
            GoalScope::Daily => GoalCursor {
                last_collected: minutes_played,
                period: Some(DailyPeriod {
                    date: today,
                    baseline_minutes: minutes_played,
                }),
            },
        }
    }

    /// Start a fresh daily period when the date moved on. `minutes_before` is
    /// the global total before the current minute was accrued. Returns true
    /// when a new period was started.
    pub fn roll_period(self, cursor: &mut GoalCursor, minutes_before: u32, today: NaiveDate) -> bool {
        if self != GoalScope::Daily {
            return false;
        }
        match cursor.period {
            Some(period) if period.date >= today => false,
            _ => {
                cursor.period = Some(DailyPeriod {
                    date: today,
                    baseline_minutes: minutes_before,
                });
                cursor.advance_to(minutes_before);
                true
            }
        }
    }

    /// The playtime figure this scope's thresholds are compared against.
    pub fn progress(self, cursor: &GoalCursor, global_minutes: u32) -> u32 {
        match (self, cursor.period) {
            (GoalScope::Global, _) => global_minutes,
            (GoalScope::Daily, Some(period)) => global_minutes.saturating_sub(period.baseline_minutes),
            (GoalScope::Daily, None) => 0,
        }
    }

    /// Threshold range `(from, to]` still unpaid, in this scope's own units.
    pub fn window(self, cursor: &GoalCursor, global_minutes: u32) -> (u32, u32) {
        let to = self.progress(cursor, global_minutes);
        let from = match (self, cursor.period) {
            (GoalScope::Global, _) => cursor.last_collected,
            (GoalScope::Daily, Some(period)) => cursor.last_collected.saturating_sub(period.baseline_minutes),
            (GoalScope::Daily, None) => to,
        };
        (from, to)
    }
}

impl fmt::Display for GoalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module_id())
    }
}

/// One enabled scope with its goals and evaluation cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeModule {
    scope: GoalScope,
    /// Evaluate every `refresh_time` global minutes; 0 disables evaluation.
    refresh_time: u32,
    registry: GoalRegistry,
}

impl ScopeModule {
    pub fn new(scope: GoalScope, refresh_time: u32, registry: GoalRegistry) -> Self {
        Self {
            scope,
            refresh_time,
            registry,
        }
    }

    pub fn scope(&self) -> GoalScope {
        self.scope
    }

    pub fn refresh_time(&self) -> u32 {
        self.refresh_time
    }

    pub fn registry(&self) -> &GoalRegistry {
        &self.registry
    }

    pub fn cursor_key(&self) -> &'static str {
        self.scope.module_id()
    }

    /// Whether goals are evaluated at this global minute.
    pub fn is_due(&self, global_minutes: u32) -> bool {
        self.refresh_time > 0 && global_minutes % self.refresh_time == 0
    }
}

/// Every enabled scope of one configuration generation.
///
/// Shared behind an `Arc` and replaced whole on reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet {
    modules: Vec<ScopeModule>,
}

impl ScopeSet {
    pub fn new(mut modules: Vec<ScopeModule>) -> Self {
        modules.sort_by_key(|m| m.scope);
        modules.dedup_by_key(|m| m.scope);
        Self { modules }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn get(&self, scope: GoalScope) -> Option<&ScopeModule> {
        self.modules.iter().find(|m| m.scope == scope)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScopeModule> {
        self.modules.iter()
    }

    pub fn scopes(&self) -> Vec<GoalScope> {
        self.modules.iter().map(|m| m.scope).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn module_ids_roundtrip() {
        for scope in GoalScope::ALL {
            assert_eq!(GoalScope::from_module_id(scope.module_id()), Some(scope));
        }
        assert_eq!(GoalScope::from_module_id("daily-rewards"), None);
    }

    #[test]
    fn global_cursor_starts_at_current_total() {
        let cursor = GoalScope::Global.initial_cursor(420, day(18));
        assert_eq!(cursor.last_collected, 420);
        assert_eq!(GoalScope::Global.progress(&cursor, 421), 421);
    }

    #[test]
    fn daily_progress_counts_from_baseline() {
        let cursor = GoalScope::Daily.initial_cursor(420, day(18));
        assert_eq!(cursor.last_collected, 420);
        assert_eq!(GoalScope::Daily.progress(&cursor, 450), 30);
        assert_eq!(GoalScope::Daily.window(&cursor, 450), (0, 30));
    }

    #[test]
    fn daily_period_rolls_on_new_date_only() {
        let mut cursor = GoalScope::Daily.initial_cursor(100, day(17));
        cursor.advance_to(130);
        assert!(!GoalScope::Daily.roll_period(&mut cursor, 140, day(17)));
        assert_eq!(cursor.last_collected, 130);
        assert_eq!(GoalScope::Daily.window(&cursor, 141), (30, 41));

        assert!(GoalScope::Daily.roll_period(&mut cursor, 140, day(18)));
        assert_eq!(cursor.last_collected, 140);
        assert_eq!(GoalScope::Daily.progress(&cursor, 141), 1);
        assert_eq!(GoalScope::Daily.window(&cursor, 141), (0, 1));

        let mut global = GoalCursor::at(50);
        assert!(!GoalScope::Global.roll_period(&mut global, 60, day(19)));
        assert_eq!(global.last_collected, 50);
    }

    #[test]
    fn rolling_a_period_never_rewinds_the_watermark() {
        let mut cursor = GoalScope::Daily.initial_cursor(100, day(17));
        cursor.advance_to(160);
        // A stale total from before the watermark must not reopen paid goals.
        assert!(GoalScope::Daily.roll_period(&mut cursor, 120, day(18)));
        assert_eq!(cursor.last_collected, 160);
        assert_eq!(GoalScope::Daily.window(&cursor, 161), (40, 41));

        // A period from a later date is left alone.
        assert!(!GoalScope::Daily.roll_period(&mut cursor, 170, day(17)));
        assert_eq!(cursor.period.unwrap().date, day(18));
    }

    #[test]
    fn global_window_starts_at_watermark() {
        let cursor = GoalCursor::at(75);
        assert_eq!(GoalScope::Global.window(&cursor, 90), (75, 90));
        assert_eq!(GoalScope::Daily.window(&cursor, 90), (0, 0));
    }

    #[test]
    fn refresh_time_gates_evaluation() {
        let every_five = ScopeModule::new(GoalScope::Global, 5, GoalRegistry::default());
        assert!(every_five.is_due(10));
        assert!(!every_five.is_due(11));
        let disabled = ScopeModule::new(GoalScope::Global, 0, GoalRegistry::default());
        assert!(!disabled.is_due(0));
        assert!(!disabled.is_due(60));
    }

    #[test]
    fn scope_set_keeps_one_module_per_scope() {
        let set = ScopeSet::new(vec![
            ScopeModule::new(GoalScope::Global, 1, GoalRegistry::default()),
            ScopeModule::new(GoalScope::Daily, 1, GoalRegistry::default()),
            ScopeModule::new(GoalScope::Global, 5, GoalRegistry::default()),
        ]);
        assert_eq!(set.scopes(), vec![GoalScope::Daily, GoalScope::Global]);
    }
}
