use chrono::{DateTime, Utc};

use crate::config::RulesConfig;
use crate::database::models::DemotionTracker;

/// Pure promotion and demotion predicates over child counts and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRules {
    am_promotion_threshold: usize,
    dm_promotion_threshold: usize,
    demotion_trigger_threshold: usize,
    demotion_recovery_cap: usize,
    demotion_grace_days: i64,
}

impl TransitionRules {
    pub fn from_config(config: &RulesConfig) -> Self {
        Self {
            // Triggers must be at least one child.
            am_promotion_threshold: config.am_promotion_threshold.max(1),
            dm_promotion_threshold: config.dm_promotion_threshold.max(1),
            demotion_trigger_threshold: config.demotion_trigger_threshold,
            demotion_recovery_cap: config.demotion_recovery_cap,
            demotion_grace_days: config.demotion_grace_days,
        }
    }

    /// An AM with at least 10 direct sub-AMs becomes a DM.
    pub fn should_promote_am(&self, sub_am_count: usize) -> bool {
        sub_am_count >= self.am_promotion_threshold
    }

    /// A DM with at least 2 direct sub-DMs becomes a CCM. Not symmetric with
    /// the AM trigger.
    pub fn should_promote_dm(&self, sub_dm_count: usize) -> bool {
        sub_dm_count >= self.dm_promotion_threshold
    }

    /// Evaluated on the ex-parent CCM right after one of its DMs was promoted.
    pub fn should_track_demotion(&self, remaining_dm_count: usize, already_tracked: bool) -> bool {
        !already_tracked && remaining_dm_count < self.demotion_trigger_threshold
    }

    /// Whole days only: 14 days 23 hours is still inside the grace window.
    pub fn grace_elapsed(&self, triggered_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - triggered_at).num_days() >= self.demotion_grace_days
    }

    pub fn should_demote(&self, tracker: &DemotionTracker, dm_count: usize, now: DateTime<Utc>) -> bool {
        self.grace_elapsed(tracker.triggered_at, now) && dm_count < self.demotion_recovery_cap
    }

    pub fn has_recovered(&self, dm_count: usize) -> bool {
        dm_count >= self.demotion_recovery_cap
    }
}

impl Default for TransitionRules {
    fn default() -> Self {
        Self::from_config(&RulesConfig::default())
    }
}
