use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::node::CcmId;

/// Pending-demotion marker: when a CCM first became under-populated.
/// At most one per CCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemotionTracker {
    pub id: i64,
    pub ccm_id: CcmId,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub(crate) struct TrackerRow {
    pub id: i64,
    pub ccm_id: i64,
    pub triggered_at: DateTime<Utc>,
}

impl From<TrackerRow> for DemotionTracker {
    fn from(row: TrackerRow) -> Self {
        Self {
            id: row.id,
            ccm_id: CcmId(row.ccm_id),
            triggered_at: row.triggered_at,
        }
    }
}
