//! Ordered playtime goals for one scope.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rewards::RewardCollection;

/// A playtime threshold (in minutes) and what it pays out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub threshold: u32,
    pub rewards: RewardCollection,
}

impl Goal {
    pub fn new(threshold: u32, rewards: RewardCollection) -> Self {
        Self { threshold, rewards }
    }
}

/// Goals keyed by threshold. Built once per configuration generation and
/// never mutated afterwards; a reload builds a new registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalRegistry {
    goals: BTreeMap<u32, Goal>,
}

impl GoalRegistry {
    /// Build from goals in any order. Goals sharing a threshold are merged,
    /// rewards kept in the order they were listed.
    pub fn from_goals(goals: impl IntoIterator<Item = Goal>) -> Self {
        let mut map: BTreeMap<u32, Goal> = BTreeMap::new();
        for goal in goals {
            match map.get_mut(&goal.threshold) {
                Some(existing) => {
                    warn!(
                        threshold = goal.threshold,
                        "duplicate goal threshold, merging reward collections"
                    );
                    existing.rewards.extend(goal.rewards);
                }
                None => {
                    map.insert(goal.threshold, goal);
                }
            }
        }
        Self { goals: map }
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn get(&self, threshold: u32) -> Option<&Goal> {
        self.goals.get(&threshold)
    }

    pub fn thresholds(&self) -> impl Iterator<Item = u32> + '_ {
        self.goals.keys().copied()
    }

    /// Goals with `from_exclusive < threshold <= to_inclusive`, ascending.
    ///
    /// Empty when `from_exclusive >= to_inclusive`.
    pub fn rewards_in_range(&self, from_exclusive: u32, to_inclusive: u32) -> Vec<&Goal> {
        if from_exclusive >= to_inclusive {
            return Vec::new();
        }
        self.goals
            .range((Bound::Excluded(from_exclusive), Bound::Included(to_inclusive)))
            .map(|(_, goal)| goal)
            .collect()
    }

    /// Smallest threshold strictly above `after`, for "next goal" displays.
    pub fn next_threshold(&self, after: u32) -> Option<u32> {
        self.goals
            .range((Bound::Excluded(after), Bound::Unbounded))
            .next()
            .map(|(threshold, _)| *threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::Reward;
    use proptest::prelude::*;

    fn goal(threshold: u32) -> Goal {
        Goal::new(
            threshold,
            RewardCollection::new(vec![Reward::command(format!("reward {threshold}"))]),
        )
    }

    fn registry(thresholds: &[u32]) -> GoalRegistry {
        GoalRegistry::from_goals(thresholds.iter().map(|t| goal(*t)))
    }

    fn thresholds(goals: Vec<&Goal>) -> Vec<u32> {
        goals.into_iter().map(|g| g.threshold).collect()
    }

    #[test]
    fn range_is_half_open() {
        let reg = registry(&[90, 30, 60]);
        assert_eq!(thresholds(reg.rewards_in_range(10, 75)), vec![30, 60]);
        assert_eq!(thresholds(reg.rewards_in_range(30, 60)), vec![60]);
        assert_eq!(thresholds(reg.rewards_in_range(0, 30)), vec![30]);
    }

    #[test]
    fn empty_and_inverted_ranges() {
        let reg = registry(&[30, 60, 90]);
        assert!(reg.rewards_in_range(60, 60).is_empty());
        assert!(reg.rewards_in_range(90, 10).is_empty());
        assert!(reg.rewards_in_range(u32::MAX, 0).is_empty());
        assert!(GoalRegistry::default().rewards_in_range(0, 100).is_empty());
    }

    #[test]
    fn duplicate_thresholds_merge() {
        let reg = GoalRegistry::from_goals(vec![goal(60), goal(60)]);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(60).unwrap().rewards.len(), 2);
    }

    #[test]
    fn next_threshold_skips_reached_goals() {
        let reg = registry(&[30, 60, 90]);
        assert_eq!(reg.next_threshold(30), Some(60));
        assert_eq!(reg.next_threshold(0), Some(30));
        assert_eq!(reg.next_threshold(90), None);
    }

    proptest! {
        #[test]
        fn range_matches_filter(
            set in prop::collection::btree_set(0u32..500, 0..40),
            from in 0u32..520,
            to in 0u32..520,
        ) {
            let list: Vec<u32> = set.iter().copied().collect();
            let reg = registry(&list);
            let expected: Vec<u32> = list.iter().copied().filter(|t| *t > from && *t <= to).collect();
            prop_assert_eq!(thresholds(reg.rewards_in_range(from, to)), expected);
        }
    }
}
