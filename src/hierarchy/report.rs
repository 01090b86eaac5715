use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::models::{AmId, CcmId, DmId, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    AmPromotion,
    DmPromotion,
    Demotion,
}

impl ScanKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScanKind::AmPromotion => "am_promotion",
            ScanKind::DmPromotion => "dm_promotion",
            ScanKind::Demotion => "demotion",
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    AmToDm,
    DmToCcm,
    CcmToDm,
}

/// One committed rank change. `from` no longer exists; `to` is the new
/// identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub kind: TransitionKind,
    pub from: NodeRef,
    pub to: NodeRef,
    /// Children relinked under `to`, in id order
    pub moved: Vec<NodeRef>,
    /// AMs redistributed from the promoted DM, with their new DM
    pub reassigned: Vec<(AmId, DmId)>,
    /// CCM that started a demotion countdown because of this transition
    pub tracked: Option<CcmId>,
    pub at: DateTime<Utc>,
}

/// Why a candidate produced no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Node was gone by the time its transaction started
    Vanished,
    /// Child count no longer meets the trigger inside the transaction
    NotEligible,
    /// Grace window still open, or the CCM sits at or above the recovery cap
    /// with recovery cancellation off. Tracker kept.
    NotDue,
    /// CCM regained enough DMs; tracker deleted
    Recovered,
    /// Tracked CCM no longer exists; tracker deleted
    StaleTracker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub node: NodeRef,
    pub reason: SkipReason,
}

/// A per-node transaction that rolled back. `node` is `None` when the scan
/// could not even list its candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub node: Option<NodeRef>,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scan: ScanKind,
    pub started_at: DateTime<Utc>,
    pub examined: usize,
    pub transitions: Vec<Transition>,
    pub skipped: Vec<Skipped>,
    pub failures: Vec<ScanFailure>,
}

impl ScanReport {
    pub fn new(scan: ScanKind, started_at: DateTime<Utc>) -> Self {
        Self {
            scan,
            started_at,
            examined: 0,
            transitions: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn skip(&mut self, node: NodeRef, reason: SkipReason) {
        self.skipped.push(Skipped { node, reason });
    }

    pub fn fail(&mut self, node: Option<NodeRef>, error: impl fmt::Display) {
        self.failures.push(ScanFailure {
            node,
            error: error.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: examined {}, {} transition(s), {} skipped, {} failed",
            self.scan,
            self.examined,
            self.transitions.len(),
            self.skipped.len(),
            self.failures.len()
        )
    }
}
