//! Goal evaluation and reward disbursement.
//!
//! On every accrued global minute the scheduler:
//! - rolls daily periods over when the date changed
//! - for each scope due at this minute, pays out every goal crossed since the
//!   user's cursor, in ascending threshold order
//! - advances the cursor after the payouts and queues a save of the record
//!
//! Delivery is at-least-once: a crash after delivery but before the save can
//! pay a goal again on the next load, a crash before delivery never skips one.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::goals::{GoalScope, ScopeModule, ScopeSet};
use crate::rewards::{Recipient, RewardSink};
use crate::storage::{lock_record, GoalCursor, SharedRecord, UserRecord, UserStore};

/// A goal paid out during an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReachedGoal {
    pub scope: GoalScope,
    pub threshold: u32,
    pub rewards: usize,
}

/// Result of handling one global minute for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinuteEvaluation {
    pub reached: Vec<ReachedGoal>,
    /// At least one scope was evaluated and a save was queued.
    pub persisted: bool,
}

pub struct RewardScheduler {
    sink: Arc<dyn RewardSink>,
    store: Arc<UserStore>,
}

impl RewardScheduler {
    pub fn new(sink: Arc<dyn RewardSink>, store: Arc<UserStore>) -> Self {
        Self { sink, store }
    }

    /// Give a freshly attached record a cursor for every enabled scope, at
    /// the user's current totals, and roll stale daily periods.
    pub fn prepare(&self, record: &mut UserRecord, scopes: &ScopeSet, today: NaiveDate) {
        let minutes = record.minutes_played();
        for module in scopes.iter() {
            let scope = module.scope();
            let cursor = record.cursor_entry(module.cursor_key(), || scope.initial_cursor(minutes, today));
            if scope.roll_period(cursor, minutes, today) {
                debug!(user = %record.id, %scope, "started a new goal period");
            }
        }
    }

    /// Handle a global minute increment reported by the tracker.
    pub fn on_minute(
        &self,
        recipient: &Recipient,
        record: &SharedRecord,
        scopes: &ScopeSet,
        today: NaiveDate,
    ) -> MinuteEvaluation {
        let global = recipient.global_minutes;
        let mut evaluation = MinuteEvaluation::default();

        let snapshot = {
            let mut record = lock_record(record);
            let before = global.saturating_sub(1);
            for module in scopes.iter() {
                let scope = module.scope();
                let cursor = record.cursor_entry(module.cursor_key(), || scope.initial_cursor(before, today));
                scope.roll_period(cursor, before, today);

                if !module.is_due(global) {
                    continue;
                }
                // Cursors must never get ahead of the stored total.
                record.record_minutes(global);
                evaluation
                    .reached
                    .extend(self.evaluate(module, recipient, &mut record));
                evaluation.persisted = true;
            }
            evaluation.persisted.then(|| record.clone())
        };

        if let Some(snapshot) = snapshot {
            self.store.save(&snapshot);
        }
        evaluation
    }

    /// Pay out every goal of `module` between the cursor and the current
    /// progress, then advance the cursor. Does not persist.
    pub fn evaluate(
        &self,
        module: &ScopeModule,
        recipient: &Recipient,
        record: &mut UserRecord,
    ) -> Vec<ReachedGoal> {
        let scope = module.scope();
        let global = recipient.global_minutes;
        let cursor = *record.cursor_entry(module.cursor_key(), || unprepared_cursor(global));
        let (from, to) = scope.window(&cursor, global);

        let goals = module.registry().rewards_in_range(from, to);
        let mut reached = Vec::with_capacity(goals.len());
        for goal in goals {
            for reward in &goal.rewards {
                self.sink.deliver(recipient, reward);
            }
            info!(
                user = %recipient.id,
                %scope,
                threshold = goal.threshold,
                rewards = goal.rewards.len(),
                "goal reached"
            );
            reached.push(ReachedGoal {
                scope,
                threshold: goal.threshold,
                rewards: goal.rewards.len(),
            });
        }

        if record
            .cursor_entry(module.cursor_key(), || unprepared_cursor(global))
            .advance_to(global)
        {
            record.touch();
        }
        reached
    }
}

/// Cursor for a record that was never prepared: everything up to now
/// counts as collected.
fn unprepared_cursor(global: u32) -> GoalCursor {
    GoalCursor::at(global)
}
