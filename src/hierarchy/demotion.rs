use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::database::models::{DemotionTracker, DmParent, NodeRef};
use crate::database::store::{finish, CredentialMode, HierarchyStore, HierarchyTx, StoreError};
use crate::hierarchy::clock::Clock;
use crate::hierarchy::report::{ScanKind, ScanReport, SkipReason, Transition, TransitionKind};
use crate::hierarchy::rules::TransitionRules;
use crate::hierarchy::TransitionError;

/// Result of processing one tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemotionOutcome {
    Demoted(Transition),
    /// Tracker kept for a later scan
    NotDue,
    /// Tracker deleted, CCM kept
    Recovered,
    /// Tracker deleted, its CCM was already gone
    StaleTracker,
}

/// Works through pending demotion trackers. A CCM whose grace window has
/// run out becomes a root-level DM that adopts the CCM's DMs.
#[derive(Clone)]
pub struct DemotionEngine {
    store: Arc<dyn HierarchyStore>,
    clock: Arc<dyn Clock>,
    rules: TransitionRules,
    recovery_cancels: bool,
}

impl DemotionEngine {
    pub fn new(store: Arc<dyn HierarchyStore>, clock: Arc<dyn Clock>, rules: TransitionRules) -> Self {
        Self {
            store,
            clock,
            rules,
            recovery_cancels: true,
        }
    }

    /// When off, a tracker is only ever resolved by demotion or by its CCM
    /// disappearing.
    pub fn with_recovery_cancellation(mut self, enabled: bool) -> Self {
        self.recovery_cancels = enabled;
        self
    }

    pub async fn run_scan(&self) -> ScanReport {
        let span = info_span!("scan", scan = %ScanKind::Demotion);
        async {
            let mut report = ScanReport::new(ScanKind::Demotion, self.clock.now());

            let trackers = match self.store.trackers().await {
                Ok(trackers) => trackers,
                Err(err) => {
                    error!("Could not list demotion trackers: {}", err);
                    report.fail(None, err);
                    return report;
                }
            };
            report.examined = trackers.len();

            for tracker in trackers {
                let node = NodeRef::Ccm(tracker.ccm_id);
                match self.process(&tracker).await {
                    Ok(DemotionOutcome::Demoted(transition)) => report.transitions.push(transition),
                    Ok(DemotionOutcome::NotDue) => report.skip(node, SkipReason::NotDue),
                    Ok(DemotionOutcome::Recovered) => report.skip(node, SkipReason::Recovered),
                    Ok(DemotionOutcome::StaleTracker) => report.skip(node, SkipReason::StaleTracker),
                    Err(err) => match err.skip_reason() {
                        Some(reason) => {
                            debug!("Skipping tracker for {}: {}", node, err);
                            report.skip(node, reason);
                        }
                        None => {
                            error!("Demotion of {} rolled back: {}", node, err);
                            report.fail(Some(node), err);
                        }
                    },
                }
            }

            info!("{}", report);
            report
        }
        .instrument(span)
        .await
    }

    /// Resolves one tracker in its own transaction.
    pub async fn process(&self, tracker: &DemotionTracker) -> Result<DemotionOutcome, TransitionError> {
        let mut tx = self.store.begin().await?;
        let result = self.process_in(&mut *tx, tracker).await;
        let outcome = finish(tx, result).await?;

        let ccm = tracker.ccm_id;
        match &outcome {
            DemotionOutcome::Demoted(transition) => info!(
                from = %transition.from,
                to = %transition.to,
                moved = transition.moved.len(),
                "Demoted CCM to DM"
            ),
            DemotionOutcome::Recovered => info!("{} recovered, demotion cancelled", ccm),
            DemotionOutcome::StaleTracker => warn!("Removed stale tracker for missing {}", ccm),
            DemotionOutcome::NotDue => debug!("Tracker for {} not due", ccm),
        }
        Ok(outcome)
    }

    async fn process_in(
        &self,
        tx: &mut dyn HierarchyTx,
        tracker: &DemotionTracker,
    ) -> Result<DemotionOutcome, TransitionError> {
        let node = NodeRef::Ccm(tracker.ccm_id);
        let tracker = tx
            .tracker_for(tracker.ccm_id)
            .await?
            .ok_or(TransitionError::Vanished(node))?;
        let dms = tx.dm_ids_under_ccm(tracker.ccm_id).await?;
        let now = self.clock.now();

        if self.recovery_cancels && self.rules.has_recovered(dms.len()) {
            tx.delete_tracker(tracker.id).await?;
            return Ok(DemotionOutcome::Recovered);
        }
        if !self.rules.should_demote(&tracker, dms.len(), now) {
            return Ok(DemotionOutcome::NotDue);
        }

        let Some(ccm) = tx.ccm(tracker.ccm_id).await? else {
            tx.delete_tracker(tracker.id).await?;
            return Ok(DemotionOutcome::StaleTracker);
        };

        // The demoted CCM is not reattached to any DM chain.
        let dm = tx.insert_dm(DmParent::Root, &ccm.profile, CredentialMode::Verbatim).await?;
        tx.set_dm_parent(&dms, DmParent::Dm(dm.id)).await?;
        if !tx.delete(node).await? {
            return Err(StoreError::NotFound(node).into());
        }
        tx.delete_tracker(tracker.id).await?;

        Ok(DemotionOutcome::Demoted(Transition {
            kind: TransitionKind::CcmToDm,
            from: node,
            to: NodeRef::Dm(dm.id),
            moved: dms.into_iter().map(NodeRef::Dm).collect(),
            reassigned: Vec::new(),
            tracked: None,
            at: now,
        }))
    }
}
