use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::RulesConfig;
use crate::database::models::{AmId, AmParent, CcmId, DmId, DmParent, Profile, RankCounts};
use crate::database::store::{CredentialMode, HierarchyStore, HierarchyTx};
use crate::database::MemoryStore;
use crate::hierarchy::{DemotionEngine, ManualClock, PromotionEngine, TransitionRules};

/// Distinct, valid profile for member `n`.
pub fn profile(n: u32) -> Profile {
    Profile {
        name: format!("Member {n}"),
        email: format!("member{n}@example.com"),
        contact: format!("90000{n:05}"),
        address: format!("{n} Test Lane"),
        credential_hash: format!("hash-{n}"),
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

/// In-memory hierarchy with a hand-driven clock. Seeding writes straight
/// to the store and skips registration checks, so fixtures can exceed the
/// fan-out cap.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub rules: RulesConfig,
    next_member: AtomicU32,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(epoch())),
            rules: RulesConfig::default(),
            next_member: AtomicU32::new(1),
        }
    }

    pub fn promotion(&self) -> PromotionEngine {
        PromotionEngine::new(
            self.store.clone(),
            self.clock.clone(),
            TransitionRules::from_config(&self.rules),
        )
    }

    pub fn demotion(&self) -> DemotionEngine {
        DemotionEngine::new(
            self.store.clone(),
            self.clock.clone(),
            TransitionRules::from_config(&self.rules),
        )
    }

    fn next_profile(&self) -> Profile {
        profile(self.next_member.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn seed_ccm(&self) -> CcmId {
        let mut tx = self.store.begin().await.unwrap();
        let ccm = tx.insert_ccm(&self.next_profile(), CredentialMode::Verbatim).await.unwrap();
        tx.commit().await.unwrap();
        ccm.id
    }

    pub async fn seed_dms(&self, parent: DmParent, n: usize) -> Vec<DmId> {
        let mut tx = self.store.begin().await.unwrap();
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            ids.push(tx.insert_dm(parent, &self.next_profile(), CredentialMode::Verbatim).await.unwrap().id);
        }
        tx.commit().await.unwrap();
        ids
    }

    pub async fn seed_ams(&self, parent: AmParent, n: usize) -> Vec<AmId> {
        let mut tx = self.store.begin().await.unwrap();
        let mut ids = Vec::with_capacity(n);
        for _ in 0..n {
            ids.push(tx.insert_am(parent, &self.next_profile(), CredentialMode::Verbatim).await.unwrap().id);
        }
        tx.commit().await.unwrap();
        ids
    }

    pub async fn counts(&self) -> RankCounts {
        let mut tx = self.store.begin().await.unwrap();
        tx.counts().await.unwrap()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeded_profiles_stay_unique() {
        let ctx = TestContext::new();
        let ccm = ctx.seed_ccm().await;
        ctx.seed_dms(DmParent::Ccm(ccm), 3).await;
        ctx.seed_ams(AmParent::Root, 4).await;

        let counts = ctx.counts().await;
        assert_eq!((counts.ccm, counts.dm, counts.am), (1, 3, 4));

        let mut tx = ctx.store.begin().await.unwrap();
        assert!(tx.find_by_email("member5@example.com").await.unwrap().is_some());
        assert!(tx.find_by_email("member9@example.com").await.unwrap().is_none());
    }
}
