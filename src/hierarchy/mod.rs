//! Rank-transition engine: the promotion and demotion scans and the rules
//! they evaluate.

pub mod clock;
pub mod demotion;
pub mod promotion;
pub mod report;
pub mod rules;

use thiserror::Error;

use crate::database::models::NodeRef;
use crate::database::store::StoreError;

pub use clock::{Clock, ManualClock, SystemClock};
pub use demotion::{DemotionEngine, DemotionOutcome};
pub use promotion::{round_robin, PromotionEngine};
pub use report::{ScanFailure, ScanKind, ScanReport, SkipReason, Skipped, Transition, TransitionKind};
pub use rules::TransitionRules;

/// Errors from a single node's transition. Only `Store` is a real failure;
/// the others are benign and end up as skips in the scan report.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("{0} no longer exists")]
    Vanished(NodeRef),

    #[error("{0} is no longer eligible")]
    NoLongerEligible(NodeRef),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransitionError {
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            TransitionError::Vanished(_) => Some(SkipReason::Vanished),
            TransitionError::NoLongerEligible(_) => Some(SkipReason::NotEligible),
            TransitionError::Store(_) => None,
        }
    }
}
