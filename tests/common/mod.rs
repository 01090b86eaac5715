#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};

use mlm_hierarchy::config::{RulesConfig, SchedulerConfig};
use mlm_hierarchy::database::models::{AmId, AmParent, CcmId, DmId, DmParent, NodeRef, Profile};
use mlm_hierarchy::database::{CredentialMode, HierarchyStore, HierarchyTx, MemoryStore};
use mlm_hierarchy::hierarchy::{DemotionEngine, ManualClock, PromotionEngine, TransitionRules};
use mlm_hierarchy::scheduler::ScanRunner;
use mlm_hierarchy::services::{DirectoryService, RegistryService};

pub fn profile(n: u32) -> Profile {
    Profile {
        name: format!("Member {n}"),
        email: format!("member{n}@example.com"),
        contact: format!("98765{n:05}"),
        address: format!("{n} Market Road"),
        credential_hash: format!("$argon2id$member{n}"),
    }
}

/// One isolated hierarchy per test: an in-memory store and a clock that only
/// moves when told to.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub rules: RulesConfig,
    next_member: AtomicU32,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        Self {
            store: Arc::new(store),
            clock: Arc::new(ManualClock::new(start)),
            rules: RulesConfig::default(),
            next_member: AtomicU32::new(1),
        }
    }

    pub fn next_profile(&self) -> Profile {
        profile(self.next_member.fetch_add(1, Ordering::Relaxed))
    }

    pub fn promotion(&self) -> PromotionEngine {
        PromotionEngine::new(self.store.clone(), self.clock.clone(), TransitionRules::from_config(&self.rules))
    }

    pub fn demotion(&self) -> DemotionEngine {
        DemotionEngine::new(self.store.clone(), self.clock.clone(), TransitionRules::from_config(&self.rules))
    }

    pub fn runner(&self) -> ScanRunner {
        ScanRunner::from_config(self.store.clone(), self.clock.clone(), &self.rules, &SchedulerConfig::default())
    }

    pub fn registry(&self) -> RegistryService {
        RegistryService::new(self.store.clone(), &self.rules)
    }

    pub fn directory(&self) -> DirectoryService {
        DirectoryService::new(self.store.clone(), self.rules.fan_out_cap)
    }

    pub async fn tx(&self) -> Result<Box<dyn HierarchyTx>> {
        Ok(self.store.begin().await?)
    }

    pub async fn ccm(&self) -> Result<CcmId> {
        let mut tx = self.tx().await?;
        let ccm = tx.insert_ccm(&self.next_profile(), CredentialMode::Verbatim).await?;
        tx.commit().await?;
        Ok(ccm.id)
    }

    pub async fn dm(&self, parent: DmParent) -> Result<DmId> {
        Ok(self.dms(parent, 1).await?[0])
    }

    pub async fn dms(&self, parent: DmParent, n: usize) -> Result<Vec<DmId>> {
        let mut tx = self.tx().await?;
        let mut ids = Vec::new();
        for _ in 0..n {
            ids.push(tx.insert_dm(parent, &self.next_profile(), CredentialMode::Verbatim).await?.id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    pub async fn am(&self, parent: AmParent) -> Result<AmId> {
        Ok(self.ams(parent, 1).await?[0])
    }

    pub async fn ams(&self, parent: AmParent, n: usize) -> Result<Vec<AmId>> {
        let mut tx = self.tx().await?;
        let mut ids = Vec::new();
        for _ in 0..n {
            ids.push(tx.insert_am(parent, &self.next_profile(), CredentialMode::Verbatim).await?.id);
        }
        tx.commit().await?;
        Ok(ids)
    }

    /// Every node id currently stored, rank-tagged.
    pub async fn all_nodes(&self) -> Result<Vec<NodeRef>> {
        let mut tx = self.tx().await?;
        let mut nodes: Vec<NodeRef> = Vec::new();
        nodes.extend(tx.admins().await?.into_iter().map(|n| NodeRef::Admin(n.id)));
        nodes.extend(tx.ccms().await?.into_iter().map(|n| NodeRef::Ccm(n.id)));
        nodes.extend(tx.dms().await?.into_iter().map(|n| NodeRef::Dm(n.id)));
        nodes.extend(tx.ams().await?.into_iter().map(|n| NodeRef::Am(n.id)));
        Ok(nodes)
    }
}
