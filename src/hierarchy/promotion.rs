use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::database::models::{Am, AmId, AmParent, DmId, DmParent, NodeRef};
use crate::database::store::{finish, CredentialMode, HierarchyStore, HierarchyTx, StoreError};
use crate::hierarchy::clock::Clock;
use crate::hierarchy::report::{ScanKind, ScanReport, Transition, TransitionKind};
use crate::hierarchy::rules::TransitionRules;
use crate::hierarchy::TransitionError;

/// Pairs `items[i]` with `targets[i % targets.len()]`, preserving item order.
/// Empty when there are no targets.
pub fn round_robin<T: Copy, U: Copy>(items: &[T], targets: &[U]) -> Vec<(T, U)> {
    if targets.is_empty() {
        return Vec::new();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (*item, targets[i % targets.len()]))
        .collect()
}

/// Runs the AM→DM and DM→CCM scans. Every promotion is its own
/// transaction; one node failing never stops the scan.
#[derive(Clone)]
pub struct PromotionEngine {
    store: Arc<dyn HierarchyStore>,
    clock: Arc<dyn Clock>,
    rules: TransitionRules,
}

impl PromotionEngine {
    pub fn new(store: Arc<dyn HierarchyStore>, clock: Arc<dyn Clock>, rules: TransitionRules) -> Self {
        Self { store, clock, rules }
    }

    pub async fn run_am_scan(&self) -> ScanReport {
        let span = info_span!("scan", scan = %ScanKind::AmPromotion);
        async {
            let mut report = ScanReport::new(ScanKind::AmPromotion, self.clock.now());

            let candidates = match self.am_candidates().await {
                Ok((examined, candidates)) => {
                    report.examined = examined;
                    candidates
                }
                Err(err) => {
                    error!("Could not list AM candidates: {}", err);
                    report.fail(None, err);
                    return report;
                }
            };

            for id in candidates {
                let node = NodeRef::Am(id);
                match self.promote_am(id).await {
                    Ok(transition) => report.transitions.push(transition),
                    Err(err) => match err.skip_reason() {
                        Some(reason) => {
                            debug!("Skipping {}: {}", node, err);
                            report.skip(node, reason);
                        }
                        None => {
                            error!("Promotion of {} rolled back: {}", node, err);
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

    pub async fn run_dm_scan(&self) -> ScanReport {
        let span = info_span!("scan", scan = %ScanKind::DmPromotion);
        async {
            let mut report = ScanReport::new(ScanKind::DmPromotion, self.clock.now());

            let candidates = match self.dm_candidates().await {
                Ok((examined, candidates)) => {
                    report.examined = examined;
                    candidates
                }
                Err(err) => {
                    error!("Could not list DM candidates: {}", err);
                    report.fail(None, err);
                    return report;
                }
            };

            for id in candidates {
                let node = NodeRef::Dm(id);
                match self.promote_dm(id).await {
                    Ok(transition) => report.transitions.push(transition),
                    Err(err) => match err.skip_reason() {
                        Some(reason) => {
                            debug!("Skipping {}: {}", node, err);
                            report.skip(node, reason);
                        }
                        None => {
                            error!("Promotion of {} rolled back: {}", node, err);
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

    /// AMs whose sub-AM count meets the trigger, from one snapshot. The count
    /// is checked again inside each promotion.
    async fn am_candidates(&self) -> Result<(usize, Vec<AmId>), StoreError> {
        let mut tx = self.store.begin().await?;
        let ams = tx.ams().await?;
        tx.rollback().await?;

        let mut children: HashMap<AmId, usize> = HashMap::new();
        for am in &ams {
            if let AmParent::Am(parent) = am.parent {
                *children.entry(parent).or_default() += 1;
            }
        }

        let candidates = ams
            .iter()
            .map(|am| am.id)
            .filter(|id| self.rules.should_promote_am(children.get(id).copied().unwrap_or(0)))
            .collect();
        Ok((ams.len(), candidates))
    }

    async fn dm_candidates(&self) -> Result<(usize, Vec<DmId>), StoreError> {
        let mut tx = self.store.begin().await?;
        let dms = tx.dms().await?;
        tx.rollback().await?;

        let mut children: HashMap<DmId, usize> = HashMap::new();
        for dm in &dms {
            if let DmParent::Dm(parent) = dm.parent {
                *children.entry(parent).or_default() += 1;
            }
        }

        let candidates = dms
            .iter()
            .map(|dm| dm.id)
            .filter(|id| self.rules.should_promote_dm(children.get(id).copied().unwrap_or(0)))
            .collect();
        Ok((dms.len(), candidates))
    }

    /// Replaces AM `id` with a new DM that adopts its direct sub-AMs.
    pub async fn promote_am(&self, id: AmId) -> Result<Transition, TransitionError> {
        let mut tx = self.store.begin().await?;
        let result = self.promote_am_in(&mut *tx, id).await;
        let transition = finish(tx, result).await?;
        info!(
            from = %transition.from,
            to = %transition.to,
            moved = transition.moved.len(),
            "Promoted AM to DM"
        );
        Ok(transition)
    }

    async fn promote_am_in(&self, tx: &mut dyn HierarchyTx, id: AmId) -> Result<Transition, TransitionError> {
        let node = NodeRef::Am(id);
        let am = tx.am(id).await?.ok_or(TransitionError::Vanished(node))?;
        let sub_ams = tx.sub_am_ids(id).await?;
        if !self.rules.should_promote_am(sub_ams.len()) {
            return Err(TransitionError::NoLongerEligible(node));
        }

        let highest = highest_am(tx, &am).await?;
        let inherited = match highest.parent {
            AmParent::Dm(dm) => DmParent::Dm(dm),
            _ => DmParent::Root,
        };

        tx.set_am_parent(&sub_ams, AmParent::Root).await?;
        let dm = tx.insert_dm(inherited, &am.profile, CredentialMode::Verbatim).await?;
        tx.set_am_parent(&sub_ams, AmParent::Dm(dm.id)).await?;
        if !tx.delete(node).await? {
            return Err(StoreError::NotFound(node).into());
        }

        Ok(Transition {
            kind: TransitionKind::AmToDm,
            from: node,
            to: NodeRef::Dm(dm.id),
            moved: sub_ams.into_iter().map(NodeRef::Am).collect(),
            reassigned: Vec::new(),
            tracked: None,
            at: self.clock.now(),
        })
    }

    /// Replaces DM `id` with a new CCM. Its sub-DMs move under the CCM and
    /// the AMs it held are spread over those sub-DMs round-robin.
    pub async fn promote_dm(&self, id: DmId) -> Result<Transition, TransitionError> {
        let mut tx = self.store.begin().await?;
        let result = self.promote_dm_in(&mut *tx, id).await;
        let transition = finish(tx, result).await?;
        info!(
            from = %transition.from,
            to = %transition.to,
            moved = transition.moved.len(),
            reassigned = transition.reassigned.len(),
            "Promoted DM to CCM"
        );
        if let Some(ccm) = transition.tracked {
            warn!("{} fell below the DM minimum, demotion countdown started", ccm);
        }
        Ok(transition)
    }

    async fn promote_dm_in(&self, tx: &mut dyn HierarchyTx, id: DmId) -> Result<Transition, TransitionError> {
        let node = NodeRef::Dm(id);
        let dm = tx.dm(id).await?.ok_or(TransitionError::Vanished(node))?;
        let under_dms = tx.sub_dm_ids(id).await?;
        if !self.rules.should_promote_dm(under_dms.len()) {
            return Err(TransitionError::NoLongerEligible(node));
        }
        let ams = tx.am_ids_under_dm(id).await?;
        let now = self.clock.now();

        let ccm = tx.insert_ccm(&dm.profile, CredentialMode::Verbatim).await?;
        tx.set_dm_parent(&under_dms, DmParent::Ccm(ccm.id)).await?;

        let mut tracked = None;
        if let DmParent::Ccm(parent) = dm.parent {
            let remaining = tx
                .dm_ids_under_ccm(parent)
                .await?
                .into_iter()
                .filter(|dm_id| *dm_id != id)
                .count();
            let existing = tx.tracker_for(parent).await?;
            if self.rules.should_track_demotion(remaining, existing.is_some()) {
                tx.insert_tracker(parent, now).await?;
                tracked = Some(parent);
            }
        }

        let reassigned = round_robin(&ams, &under_dms);
        let mut groups: BTreeMap<DmId, Vec<AmId>> = BTreeMap::new();
        for (am, target) in &reassigned {
            groups.entry(*target).or_default().push(*am);
        }
        for (target, group) in groups {
            tx.set_am_parent(&group, AmParent::Dm(target)).await?;
        }

        if !tx.delete(node).await? {
            return Err(StoreError::NotFound(node).into());
        }

        Ok(Transition {
            kind: TransitionKind::DmToCcm,
            from: node,
            to: NodeRef::Ccm(ccm.id),
            moved: under_dms.into_iter().map(NodeRef::Dm).collect(),
            reassigned,
            tracked,
            at: now,
        })
    }
}

/// Follows `parent_am_id` up to the AM with no AM parent. The walk is bounded
/// by the AM population so a corrupt cycle errors out instead of looping.
async fn highest_am(tx: &mut dyn HierarchyTx, am: &Am) -> Result<Am, TransitionError> {
    let limit = tx.counts().await?.am.max(0) as usize;
    let mut current = am.clone();
    let mut hops = 0usize;
    while let AmParent::Am(parent) = current.parent {
        hops += 1;
        if hops > limit {
            return Err(StoreError::Corrupt {
                table: "am",
                id: am.id.0,
                reason: "parent chain does not terminate",
            }
            .into());
        }
        current = tx
            .am(parent)
            .await?
            .ok_or(StoreError::NotFound(NodeRef::Am(parent)))?;
    }
    Ok(current)
}
