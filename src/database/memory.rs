//! In-process hierarchy store.
//!
//! Nodes live in per-rank ordered maps and every parent pointer is mirrored
//! in an adjacency index (parent id -> child ids) that is updated on each
//! write, so child lookups cost O(children) instead of a table scan.
//!
//! A transaction owns the store's single async mutex for its whole lifetime,
//! which makes transactions serializable. Each write pushes the previous
//! value of the touched record onto an undo journal; rollback (explicit or on
//! drop) replays the journal backwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::database::models::{
    Admin, AdminId, Am, AmId, AmParent, Ccm, CcmId, DemotionTracker, Dm, DmId, DmParent, NodeRef,
    Profile, ProfileUpdate, RankCounts,
};
use crate::database::store::{
    stored_credential, CredentialHasher, CredentialMode, HierarchyStore, HierarchyTx, ScanLock,
    StoreError,
};
use crate::hierarchy::ScanKind;

#[derive(Debug)]
struct Adjacency<P, C> {
    edges: HashMap<P, BTreeSet<C>>,
}

impl<P, C> Default for Adjacency<P, C> {
    fn default() -> Self {
        Self { edges: HashMap::new() }
    }
}

impl<P: Copy + Eq + Hash, C: Copy + Ord> Adjacency<P, C> {
    fn link(&mut self, parent: P, child: C) {
        self.edges.entry(parent).or_default().insert(child);
    }

    fn unlink(&mut self, parent: P, child: C) {
        if let Some(children) = self.edges.get_mut(&parent) {
            children.remove(&child);
            if children.is_empty() {
                self.edges.remove(&parent);
            }
        }
    }

    fn children(&self, parent: P) -> Vec<C> {
        self.edges
            .get(&parent)
            .map(|children| children.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct Sequences {
    admin: i64,
    ccm: i64,
    dm: i64,
    am: i64,
    tracker: i64,
}

fn next_id(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

/// Previous value of a record touched inside a transaction
#[derive(Debug)]
enum Undo {
    Admin(AdminId, Option<Admin>),
    Ccm(CcmId, Option<Ccm>),
    Dm(DmId, Option<Dm>),
    Am(AmId, Option<Am>),
    Tracker(i64, Option<DemotionTracker>),
}

#[derive(Debug, Default)]
struct State {
    admins: BTreeMap<AdminId, Admin>,
    ccms: BTreeMap<CcmId, Ccm>,
    dms: BTreeMap<DmId, Dm>,
    ams: BTreeMap<AmId, Am>,
    trackers: BTreeMap<i64, DemotionTracker>,

    sub_ams: Adjacency<AmId, AmId>,
    dm_ams: Adjacency<DmId, AmId>,
    sub_dms: Adjacency<DmId, DmId>,
    ccm_dms: Adjacency<CcmId, DmId>,

    // Ids are never reused, even after rollback.
    sequences: Sequences,
    writes_before_fault: Option<usize>,
}

impl State {
    fn put_am(&mut self, am: Am) -> Option<Am> {
        let previous = self.take_am(am.id);
        match am.parent {
            AmParent::Am(parent) => self.sub_ams.link(parent, am.id),
            AmParent::Dm(dm) => self.dm_ams.link(dm, am.id),
            AmParent::Root => {}
        }
        self.ams.insert(am.id, am);
        previous
    }

    fn take_am(&mut self, id: AmId) -> Option<Am> {
        let am = self.ams.remove(&id)?;
        match am.parent {
            AmParent::Am(parent) => self.sub_ams.unlink(parent, id),
            AmParent::Dm(dm) => self.dm_ams.unlink(dm, id),
            AmParent::Root => {}
        }
        Some(am)
    }

    fn put_dm(&mut self, dm: Dm) -> Option<Dm> {
        let previous = self.take_dm(dm.id);
        match dm.parent {
            DmParent::Dm(parent) => self.sub_dms.link(parent, dm.id),
            DmParent::Ccm(ccm) => self.ccm_dms.link(ccm, dm.id),
            DmParent::Root => {}
        }
        self.dms.insert(dm.id, dm);
        previous
    }

    fn take_dm(&mut self, id: DmId) -> Option<Dm> {
        let dm = self.dms.remove(&id)?;
        match dm.parent {
            DmParent::Dm(parent) => self.sub_dms.unlink(parent, id),
            DmParent::Ccm(ccm) => self.ccm_dms.unlink(ccm, id),
            DmParent::Root => {}
        }
        Some(dm)
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::Admin(id, previous) => {
                self.admins.remove(&id);
                if let Some(admin) = previous {
                    self.admins.insert(id, admin);
                }
            }
            Undo::Ccm(id, previous) => {
                self.ccms.remove(&id);
                if let Some(ccm) = previous {
                    self.ccms.insert(id, ccm);
                }
            }
            Undo::Dm(id, previous) => {
                self.take_dm(id);
                if let Some(dm) = previous {
                    self.put_dm(dm);
                }
            }
            Undo::Am(id, previous) => {
                self.take_am(id);
                if let Some(am) = previous {
                    self.put_am(am);
                }
            }
            Undo::Tracker(id, previous) => {
                self.trackers.remove(&id);
                if let Some(tracker) = previous {
                    self.trackers.insert(id, tracker);
                }
            }
        }
    }

    fn charge_write(&mut self) -> Result<(), StoreError> {
        if let Some(remaining) = self.writes_before_fault {
            if remaining == 0 {
                self.writes_before_fault = None;
                return Err(StoreError::Unavailable("injected write fault".to_string()));
            }
            self.writes_before_fault = Some(remaining - 1);
        }
        Ok(())
    }

    fn check_am_parent(&self, parent: AmParent) -> Result<(), StoreError> {
        let exists = match parent {
            AmParent::Root => true,
            AmParent::Am(id) => self.ams.contains_key(&id),
            AmParent::Dm(id) => self.dms.contains_key(&id),
        };
        match (exists, parent.node()) {
            (false, Some(node)) => Err(StoreError::InvalidParent(node)),
            _ => Ok(()),
        }
    }

    fn check_dm_parent(&self, parent: DmParent) -> Result<(), StoreError> {
        let exists = match parent {
            DmParent::Root => true,
            DmParent::Dm(id) => self.dms.contains_key(&id),
            DmParent::Ccm(id) => self.ccms.contains_key(&id),
        };
        match (exists, parent.node()) {
            (false, Some(node)) => Err(StoreError::InvalidParent(node)),
            _ => Ok(()),
        }
    }

    /// Fails if `parent` is one of `moving` or sits below one of them.
    fn check_am_chain(&self, moving: &[AmId], parent: AmId) -> Result<(), StoreError> {
        let mut cursor = Some(parent);
        let mut steps = 0usize;
        while let Some(current) = cursor {
            if moving.contains(&current) || steps > self.ams.len() {
                return Err(StoreError::Cycle(NodeRef::Am(parent)));
            }
            steps += 1;
            cursor = match self.ams.get(&current).map(|am| am.parent) {
                Some(AmParent::Am(next)) => Some(next),
                _ => None,
            };
        }
        Ok(())
    }

    fn check_dm_chain(&self, moving: &[DmId], parent: DmId) -> Result<(), StoreError> {
        let mut cursor = Some(parent);
        let mut steps = 0usize;
        while let Some(current) = cursor {
            if moving.contains(&current) || steps > self.dms.len() {
                return Err(StoreError::Cycle(NodeRef::Dm(parent)));
            }
            steps += 1;
            cursor = match self.dms.get(&current).map(|dm| dm.parent) {
                Some(DmParent::Dm(next)) => Some(next),
                _ => None,
            };
        }
        Ok(())
    }

    fn profiles(&self) -> impl Iterator<Item = (NodeRef, &Profile)> {
        let admins = self.admins.values().map(|n| (NodeRef::Admin(n.id), &n.profile));
        let ccms = self.ccms.values().map(|n| (NodeRef::Ccm(n.id), &n.profile));
        let dms = self.dms.values().map(|n| (NodeRef::Dm(n.id), &n.profile));
        let ams = self.ams.values().map(|n| (NodeRef::Am(n.id), &n.profile));
        admins.chain(ccms).chain(dms).chain(ams)
    }
}

#[derive(Debug, Default)]
struct ScanLocks {
    am_promotion: Arc<Mutex<()>>,
    dm_promotion: Arc<Mutex<()>>,
    demotion: Arc<Mutex<()>>,
}

impl ScanLocks {
    fn slot(&self, kind: ScanKind) -> Arc<Mutex<()>> {
        match kind {
            ScanKind::AmPromotion => self.am_promotion.clone(),
            ScanKind::DmPromotion => self.dm_promotion.clone(),
            ScanKind::Demotion => self.demotion.clone(),
        }
    }
}

struct MemoryScanLock(OwnedMutexGuard<()>);

#[async_trait]
impl ScanLock for MemoryScanLock {
    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        drop(self.0);
        Ok(())
    }
}

/// Hierarchy store kept entirely in memory. Used by tests and local drills;
/// it honours the same transactional contract as the Postgres store.
/// Clones share state, so two runners on clones of one store contend for
/// the same scan locks.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    scan_locks: Arc<ScanLocks>,
    hasher: Option<Arc<dyn CredentialHasher>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn CredentialHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Lets the next `writes` writes succeed, then fails the one after with
    /// `StoreError::Unavailable`. One-shot.
    pub async fn fail_after_writes(&self, writes: usize) {
        self.state.lock().await.writes_before_fault = Some(writes);
    }
}

#[async_trait]
impl HierarchyStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn HierarchyTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryTx {
            state: guard,
            journal: Vec::new(),
            hasher: self.hasher.clone(),
            open: true,
        }))
    }

    async fn try_scan_lock(&self, kind: ScanKind) -> Result<Option<Box<dyn ScanLock>>, StoreError> {
        match self.scan_locks.slot(kind).try_lock_owned() {
            Ok(guard) => Ok(Some(Box::new(MemoryScanLock(guard)))),
            Err(_) => Ok(None),
        }
    }

    async fn am_ids(&self) -> Result<Vec<AmId>, StoreError> {
        Ok(self.state.lock().await.ams.keys().copied().collect())
    }

    async fn dm_ids(&self) -> Result<Vec<DmId>, StoreError> {
        Ok(self.state.lock().await.dms.keys().copied().collect())
    }

    async fn trackers(&self) -> Result<Vec<DemotionTracker>, StoreError> {
        Ok(self.state.lock().await.trackers.values().cloned().collect())
    }
}

pub struct MemoryTx {
    state: OwnedMutexGuard<State>,
    journal: Vec<Undo>,
    hasher: Option<Arc<dyn CredentialHasher>>,
    open: bool,
}

impl MemoryTx {
    fn undo_all(&mut self) {
        while let Some(entry) = self.journal.pop() {
            self.state.revert(entry);
        }
    }

    fn write_am(&mut self, am: Am) -> Result<(), StoreError> {
        self.state.charge_write()?;
        let id = am.id;
        let previous = self.state.put_am(am);
        self.journal.push(Undo::Am(id, previous));
        Ok(())
    }

    fn write_dm(&mut self, dm: Dm) -> Result<(), StoreError> {
        self.state.charge_write()?;
        let id = dm.id;
        let previous = self.state.put_dm(dm);
        self.journal.push(Undo::Dm(id, previous));
        Ok(())
    }

    fn with_credential(&self, profile: &Profile, mode: CredentialMode) -> Profile {
        let mut stored = profile.clone();
        stored.credential_hash =
            stored_credential(mode, self.hasher.as_ref(), &profile.credential_hash);
        stored
    }

    fn delete_am(&mut self, id: AmId) -> Result<bool, StoreError> {
        if !self.state.ams.contains_key(&id) {
            return Ok(false);
        }
        let orphans = self.state.sub_ams.children(id);
        self.set_am_parent_inner(&orphans, AmParent::Root)?;
        self.state.charge_write()?;
        let previous = self.state.take_am(id);
        self.journal.push(Undo::Am(id, previous));
        Ok(true)
    }

    fn delete_dm(&mut self, id: DmId) -> Result<bool, StoreError> {
        if !self.state.dms.contains_key(&id) {
            return Ok(false);
        }
        let sub_dms = self.state.sub_dms.children(id);
        self.set_dm_parent_inner(&sub_dms, DmParent::Root)?;
        let ams = self.state.dm_ams.children(id);
        self.set_am_parent_inner(&ams, AmParent::Root)?;
        self.state.charge_write()?;
        let previous = self.state.take_dm(id);
        self.journal.push(Undo::Dm(id, previous));
        Ok(true)
    }

    fn delete_ccm(&mut self, id: CcmId) -> Result<bool, StoreError> {
        if !self.state.ccms.contains_key(&id) {
            return Ok(false);
        }
        let dms = self.state.ccm_dms.children(id);
        self.set_dm_parent_inner(&dms, DmParent::Root)?;
        self.state.charge_write()?;
        let previous = self.state.ccms.remove(&id);
        self.journal.push(Undo::Ccm(id, previous));
        Ok(true)
    }

    fn delete_admin(&mut self, id: AdminId) -> Result<bool, StoreError> {
        if !self.state.admins.contains_key(&id) {
            return Ok(false);
        }
        self.state.charge_write()?;
        let previous = self.state.admins.remove(&id);
        self.journal.push(Undo::Admin(id, previous));
        Ok(true)
    }

    fn set_am_parent_inner(&mut self, ids: &[AmId], parent: AmParent) -> Result<u64, StoreError> {
        self.state.check_am_parent(parent)?;
        if let AmParent::Am(target) = parent {
            self.state.check_am_chain(ids, target)?;
        }
        let mut changed = 0;
        for id in ids {
            let Some(mut am) = self.state.ams.get(id).cloned() else {
                continue;
            };
            am.parent = parent;
            self.write_am(am)?;
            changed += 1;
        }
        Ok(changed)
    }

    fn set_dm_parent_inner(&mut self, ids: &[DmId], parent: DmParent) -> Result<u64, StoreError> {
        self.state.check_dm_parent(parent)?;
        if let DmParent::Dm(target) = parent {
            self.state.check_dm_chain(ids, target)?;
        }
        let mut changed = 0;
        for id in ids {
            let Some(mut dm) = self.state.dms.get(id).cloned() else {
                continue;
            };
            dm.parent = parent;
            self.write_dm(dm)?;
            changed += 1;
        }
        Ok(changed)
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.open {
            self.undo_all();
        }
    }
}

#[async_trait]
impl HierarchyTx for MemoryTx {
    async fn admin(&mut self, id: AdminId) -> Result<Option<Admin>, StoreError> {
        Ok(self.state.admins.get(&id).cloned())
    }

    async fn ccm(&mut self, id: CcmId) -> Result<Option<Ccm>, StoreError> {
        Ok(self.state.ccms.get(&id).cloned())
    }

    async fn dm(&mut self, id: DmId) -> Result<Option<Dm>, StoreError> {
        Ok(self.state.dms.get(&id).cloned())
    }

    async fn am(&mut self, id: AmId) -> Result<Option<Am>, StoreError> {
        Ok(self.state.ams.get(&id).cloned())
    }

    async fn admins(&mut self) -> Result<Vec<Admin>, StoreError> {
        Ok(self.state.admins.values().cloned().collect())
    }

    async fn ccms(&mut self) -> Result<Vec<Ccm>, StoreError> {
        Ok(self.state.ccms.values().cloned().collect())
    }

    async fn dms(&mut self) -> Result<Vec<Dm>, StoreError> {
        Ok(self.state.dms.values().cloned().collect())
    }

    async fn ams(&mut self) -> Result<Vec<Am>, StoreError> {
        Ok(self.state.ams.values().cloned().collect())
    }

    async fn sub_am_ids(&mut self, parent: AmId) -> Result<Vec<AmId>, StoreError> {
        Ok(self.state.sub_ams.children(parent))
    }

    async fn am_ids_under_dm(&mut self, dm: DmId) -> Result<Vec<AmId>, StoreError> {
        Ok(self.state.dm_ams.children(dm))
    }

    async fn sub_dm_ids(&mut self, parent: DmId) -> Result<Vec<DmId>, StoreError> {
        Ok(self.state.sub_dms.children(parent))
    }

    async fn dm_ids_under_ccm(&mut self, ccm: CcmId) -> Result<Vec<DmId>, StoreError> {
        Ok(self.state.ccm_dms.children(ccm))
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<NodeRef>, StoreError> {
        Ok(self
            .state
            .profiles()
            .find(|(_, profile)| profile.email.eq_ignore_ascii_case(email))
            .map(|(node, _)| node))
    }

    async fn find_by_contact(&mut self, contact: &str) -> Result<Option<NodeRef>, StoreError> {
        Ok(self
            .state
            .profiles()
            .find(|(_, profile)| profile.contact == contact)
            .map(|(node, _)| node))
    }

    async fn counts(&mut self) -> Result<RankCounts, StoreError> {
        Ok(RankCounts {
            admin: self.state.admins.len() as i64,
            ccm: self.state.ccms.len() as i64,
            dm: self.state.dms.len() as i64,
            am: self.state.ams.len() as i64,
        })
    }

    async fn lock_directory(&mut self) -> Result<(), StoreError> {
        // The owned guard already excludes every other transaction.
        Ok(())
    }

    async fn insert_admin(&mut self, profile: &Profile, mode: CredentialMode) -> Result<Admin, StoreError> {
        self.state.charge_write()?;
        let admin = Admin {
            id: AdminId(next_id(&mut self.state.sequences.admin)),
            profile: self.with_credential(profile, mode),
            created_at: Utc::now(),
        };
        self.state.admins.insert(admin.id, admin.clone());
        self.journal.push(Undo::Admin(admin.id, None));
        Ok(admin)
    }

    async fn insert_ccm(&mut self, profile: &Profile, mode: CredentialMode) -> Result<Ccm, StoreError> {
        self.state.charge_write()?;
        let ccm = Ccm {
            id: CcmId(next_id(&mut self.state.sequences.ccm)),
            profile: self.with_credential(profile, mode),
            created_at: Utc::now(),
        };
        self.state.ccms.insert(ccm.id, ccm.clone());
        self.journal.push(Undo::Ccm(ccm.id, None));
        Ok(ccm)
    }

    async fn insert_dm(
        &mut self,
        parent: DmParent,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<Dm, StoreError> {
        self.state.check_dm_parent(parent)?;
        let dm = Dm {
            id: DmId(next_id(&mut self.state.sequences.dm)),
            parent,
            profile: self.with_credential(profile, mode),
            created_at: Utc::now(),
        };
        self.write_dm(dm.clone())?;
        Ok(dm)
    }

    async fn insert_am(
        &mut self,
        parent: AmParent,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<Am, StoreError> {
        self.state.check_am_parent(parent)?;
        let am = Am {
            id: AmId(next_id(&mut self.state.sequences.am)),
            parent,
            profile: self.with_credential(profile, mode),
            created_at: Utc::now(),
        };
        self.write_am(am.clone())?;
        Ok(am)
    }

    async fn set_am_parent(&mut self, ids: &[AmId], parent: AmParent) -> Result<u64, StoreError> {
        self.set_am_parent_inner(ids, parent)
    }

    async fn set_dm_parent(&mut self, ids: &[DmId], parent: DmParent) -> Result<u64, StoreError> {
        self.set_dm_parent_inner(ids, parent)
    }

    async fn update_profile(&mut self, node: NodeRef, update: &ProfileUpdate) -> Result<bool, StoreError> {
        match node {
            NodeRef::Admin(id) => {
                let Some(mut admin) = self.state.admins.get(&id).cloned() else {
                    return Ok(false);
                };
                self.state.charge_write()?;
                update.apply(&mut admin.profile);
                let previous = self.state.admins.insert(id, admin);
                self.journal.push(Undo::Admin(id, previous));
            }
            NodeRef::Ccm(id) => {
                let Some(mut ccm) = self.state.ccms.get(&id).cloned() else {
                    return Ok(false);
                };
                self.state.charge_write()?;
                update.apply(&mut ccm.profile);
                let previous = self.state.ccms.insert(id, ccm);
                self.journal.push(Undo::Ccm(id, previous));
            }
            NodeRef::Dm(id) => {
                let Some(mut dm) = self.state.dms.get(&id).cloned() else {
                    return Ok(false);
                };
                update.apply(&mut dm.profile);
                self.write_dm(dm)?;
            }
            NodeRef::Am(id) => {
                let Some(mut am) = self.state.ams.get(&id).cloned() else {
                    return Ok(false);
                };
                update.apply(&mut am.profile);
                self.write_am(am)?;
            }
        }
        Ok(true)
    }

    async fn delete(&mut self, node: NodeRef) -> Result<bool, StoreError> {
        match node {
            NodeRef::Admin(id) => self.delete_admin(id),
            NodeRef::Ccm(id) => self.delete_ccm(id),
            NodeRef::Dm(id) => self.delete_dm(id),
            NodeRef::Am(id) => self.delete_am(id),
        }
    }

    async fn trackers(&mut self) -> Result<Vec<DemotionTracker>, StoreError> {
        Ok(self.state.trackers.values().cloned().collect())
    }

    async fn tracker_for(&mut self, ccm: CcmId) -> Result<Option<DemotionTracker>, StoreError> {
        Ok(self
            .state
            .trackers
            .values()
            .find(|tracker| tracker.ccm_id == ccm)
            .cloned())
    }

    async fn insert_tracker(
        &mut self,
        ccm: CcmId,
        triggered_at: DateTime<Utc>,
    ) -> Result<DemotionTracker, StoreError> {
        if self.state.trackers.values().any(|tracker| tracker.ccm_id == ccm) {
            return Err(StoreError::Conflict("demotion_tracker_ccm_id_key".to_string()));
        }
        self.state.charge_write()?;
        let tracker = DemotionTracker {
            id: next_id(&mut self.state.sequences.tracker),
            ccm_id: ccm,
            triggered_at,
        };
        self.state.trackers.insert(tracker.id, tracker.clone());
        self.journal.push(Undo::Tracker(tracker.id, None));
        Ok(tracker)
    }

    async fn delete_tracker(&mut self, id: i64) -> Result<bool, StoreError> {
        if !self.state.trackers.contains_key(&id) {
            return Ok(false);
        }
        self.state.charge_write()?;
        let previous = self.state.trackers.remove(&id);
        self.journal.push(Undo::Tracker(id, previous));
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.journal.clear();
        tx.open = false;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.undo_all();
        tx.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(n: u32) -> Profile {
        Profile {
            name: format!("Member {n}"),
            email: format!("member{n}@example.com"),
            contact: format!("90000{n:05}"),
            address: "1 Test Lane".to_string(),
            credential_hash: format!("hash-{n}"),
        }
    }

    #[tokio::test]
    async fn adjacency_follows_reparenting() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let root = tx.insert_am(AmParent::Root, &profile(1), CredentialMode::Hash).await.unwrap();
        let child = tx.insert_am(AmParent::Am(root.id), &profile(2), CredentialMode::Hash).await.unwrap();
        let dm = tx.insert_dm(DmParent::Root, &profile(3), CredentialMode::Hash).await.unwrap();

        assert_eq!(tx.sub_am_ids(root.id).await.unwrap(), vec![child.id]);

        tx.set_am_parent(&[child.id], AmParent::Dm(dm.id)).await.unwrap();
        assert!(tx.sub_am_ids(root.id).await.unwrap().is_empty());
        assert_eq!(tx.am_ids_under_dm(dm.id).await.unwrap(), vec![child.id]);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.am(child.id).await.unwrap().unwrap().parent, AmParent::Dm(dm.id));
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let ccm = tx.insert_ccm(&profile(1), CredentialMode::Hash).await.unwrap();
        tx.commit().await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            let dm = tx.insert_dm(DmParent::Ccm(ccm.id), &profile(2), CredentialMode::Hash).await.unwrap();
            assert_eq!(tx.dm_ids_under_ccm(ccm.id).await.unwrap(), vec![dm.id]);
            tx.delete(NodeRef::Ccm(ccm.id)).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.ccm(ccm.id).await.unwrap().is_some());
        assert!(tx.dms().await.unwrap().is_empty());
        assert!(tx.dm_ids_under_ccm(ccm.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn explicit_rollback_restores_parent_links() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let parent = tx.insert_dm(DmParent::Root, &profile(1), CredentialMode::Hash).await.unwrap();
        let child = tx.insert_dm(DmParent::Dm(parent.id), &profile(2), CredentialMode::Hash).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.delete(NodeRef::Dm(parent.id)).await.unwrap();
        assert_eq!(tx.dm(child.id).await.unwrap().unwrap().parent, DmParent::Root);
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.sub_dm_ids(parent.id).await.unwrap(), vec![child.id]);
    }

    #[tokio::test]
    async fn rejects_cycles_and_missing_parents() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = tx.insert_am(AmParent::Root, &profile(1), CredentialMode::Hash).await.unwrap();
        let b = tx.insert_am(AmParent::Am(a.id), &profile(2), CredentialMode::Hash).await.unwrap();
        let c = tx.insert_am(AmParent::Am(b.id), &profile(3), CredentialMode::Hash).await.unwrap();

        let err = tx.set_am_parent(&[a.id], AmParent::Am(c.id)).await.unwrap_err();
        assert!(matches!(err, StoreError::Cycle(_)));

        let err = tx.set_am_parent(&[a.id], AmParent::Am(a.id)).await.unwrap_err();
        assert!(matches!(err, StoreError::Cycle(_)));

        let err = tx
            .insert_am(AmParent::Dm(DmId(99)), &profile(4), CredentialMode::Hash)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidParent(NodeRef::Dm(DmId(99)))));
    }

    #[tokio::test]
    async fn injected_fault_fails_exactly_one_write() {
        let store = MemoryStore::new();
        store.fail_after_writes(1).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_ccm(&profile(1), CredentialMode::Hash).await.unwrap();
        let err = tx.insert_ccm(&profile(2), CredentialMode::Hash).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        tx.insert_ccm(&profile(3), CredentialMode::Hash).await.unwrap();
    }

    #[tokio::test]
    async fn email_lookup_spans_ranks_and_ignores_case() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let dm = tx.insert_dm(DmParent::Root, &profile(7), CredentialMode::Hash).await.unwrap();

        let found = tx.find_by_email("MEMBER7@example.com").await.unwrap();
        assert_eq!(found, Some(NodeRef::Dm(dm.id)));
        assert_eq!(tx.find_by_contact(&profile(7).contact).await.unwrap(), Some(NodeRef::Dm(dm.id)));
        assert_eq!(tx.find_by_email("nobody@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn one_tracker_per_ccm() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let ccm = tx.insert_ccm(&profile(1), CredentialMode::Hash).await.unwrap();
        tx.insert_tracker(ccm.id, Utc::now()).await.unwrap();
        let err = tx.insert_tracker(ccm.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn scan_locks_are_shared_by_clones_and_per_kind() {
        let store = MemoryStore::new();
        let other = store.clone();

        let held = store.try_scan_lock(ScanKind::AmPromotion).await.unwrap().expect("free");
        assert!(other.try_scan_lock(ScanKind::AmPromotion).await.unwrap().is_none());
        assert!(other.try_scan_lock(ScanKind::Demotion).await.unwrap().is_some());

        held.release().await.unwrap();
        assert!(other.try_scan_lock(ScanKind::AmPromotion).await.unwrap().is_some());
    }
}
