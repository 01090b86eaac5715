use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use crate::database::models::tracker::TrackerRow;
use crate::database::models::{
    Admin, AdminId, Am, AmId, AmParent, Ccm, CcmId, DemotionTracker, Dm, DmId, DmParent, NodeRef,
    Profile, ProfileUpdate, Rank, RankCounts,
};
use crate::database::store::{
    stored_credential, CredentialHasher, CredentialMode, HierarchyStore, HierarchyTx, ScanLock,
    StoreError,
};
use crate::hierarchy::ScanKind;

const PROFILE_COLUMNS: &str = "id, name, email, contact, password_hash, address, created_at";
const DM_COLUMNS: &str =
    "id, parent_dm_id, ccm_id, name, email, contact, password_hash, address, created_at";
const AM_COLUMNS: &str =
    "id, parent_am_id, dm_id, name, email, contact, password_hash, address, created_at";
const TRACKER_COLUMNS: &str = "id, ccm_id, triggered_at";

/// Advisory lock key serializing registrations ("mlmdirectory" folded to i64)
const DIRECTORY_LOCK_KEY: i64 = 0x6d6c_6d64_6972_6563;

/// Advisory lock keys for scan runs ("mlmscan" plus the scan's slot)
const SCAN_LOCK_KEY_BASE: i64 = 0x6d6c_6d73_6361_6e00;

fn scan_lock_key(kind: ScanKind) -> i64 {
    let slot = match kind {
        ScanKind::AmPromotion => 1,
        ScanKind::DmPromotion => 2,
        ScanKind::Demotion => 3,
    };
    SCAN_LOCK_KEY_BASE + slot
}

/// Upper bound on chain walks, guards against corrupt data
const MAX_CHAIN_DEPTH: i64 = 100_000;

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: i64,
    name: String,
    email: String,
    contact: String,
    password_hash: String,
    address: String,
    created_at: DateTime<Utc>,
}

impl ProfileRow {
    fn profile(&self) -> Profile {
        Profile {
            name: self.name.clone(),
            email: self.email.clone(),
            contact: self.contact.clone(),
            address: self.address.clone(),
            credential_hash: self.password_hash.clone(),
        }
    }
}

impl From<ProfileRow> for Admin {
    fn from(row: ProfileRow) -> Self {
        Admin {
            id: AdminId(row.id),
            profile: row.profile(),
            created_at: row.created_at,
        }
    }
}

impl From<ProfileRow> for Ccm {
    fn from(row: ProfileRow) -> Self {
        Ccm {
            id: CcmId(row.id),
            profile: row.profile(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct DmRow {
    id: i64,
    parent_dm_id: Option<i64>,
    ccm_id: Option<i64>,
    name: String,
    email: String,
    contact: String,
    password_hash: String,
    address: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<DmRow> for Dm {
    type Error = StoreError;

    fn try_from(row: DmRow) -> Result<Self, Self::Error> {
        let parent = DmParent::from_columns(row.parent_dm_id, row.ccm_id).ok_or(StoreError::Corrupt {
            table: "dm",
            id: row.id,
            reason: "both parent_dm_id and ccm_id are set",
        })?;
        Ok(Dm {
            id: DmId(row.id),
            parent,
            profile: Profile {
                name: row.name,
                email: row.email,
                contact: row.contact,
                address: row.address,
                credential_hash: row.password_hash,
            },
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AmRow {
    id: i64,
    parent_am_id: Option<i64>,
    dm_id: Option<i64>,
    name: String,
    email: String,
    contact: String,
    password_hash: String,
    address: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AmRow> for Am {
    type Error = StoreError;

    fn try_from(row: AmRow) -> Result<Self, Self::Error> {
        let parent = AmParent::from_columns(row.parent_am_id, row.dm_id).ok_or(StoreError::Corrupt {
            table: "am",
            id: row.id,
            reason: "both parent_am_id and dm_id are set",
        })?;
        Ok(Am {
            id: AmId(row.id),
            parent,
            profile: Profile {
                name: row.name,
                email: row.email,
                contact: row.contact,
                address: row.address,
                credential_hash: row.password_hash,
            },
            created_at: row.created_at,
        })
    }
}

/// Postgres-backed hierarchy store. Every transaction runs SERIALIZABLE and
/// locks the rows it bases decisions on, so a count and the writes that
/// depend on it see the same child set.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    hasher: Option<Arc<dyn CredentialHasher>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, hasher: None }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn CredentialHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl HierarchyStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn HierarchyTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx {
            tx,
            hasher: self.hasher.clone(),
        }))
    }

    /// Takes a transaction-scoped advisory lock on a connection of its own,
    /// held open until the lock is released or dropped. Ending that
    /// transaction frees the lock even if the scan task dies.
    async fn try_scan_lock(&self, kind: ScanKind) -> Result<Option<Box<dyn ScanLock>>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
            .bind(scan_lock_key(kind))
            .fetch_one(&mut *tx)
            .await?;
        if !acquired {
            tx.rollback().await?;
            return Ok(None);
        }
        Ok(Some(Box::new(PgScanLock { tx })))
    }

    async fn am_ids(&self) -> Result<Vec<AmId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM am ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(AmId).collect())
    }

    async fn dm_ids(&self) -> Result<Vec<DmId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM dm ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(DmId).collect())
    }

    async fn trackers(&self) -> Result<Vec<DemotionTracker>, StoreError> {
        let rows = sqlx::query_as::<_, TrackerRow>(&format!(
            "SELECT {TRACKER_COLUMNS} FROM demotion_tracker ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DemotionTracker::from).collect())
    }
}

struct PgScanLock {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ScanLock for PgScanLock {
    async fn release(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    hasher: Option<Arc<dyn CredentialHasher>>,
}

impl PgTx {
    async fn child_ids(&mut self, table: Rank, column: &str, parent: i64) -> Result<Vec<i64>, StoreError> {
        let sql = format!(
            "SELECT id FROM {} WHERE {} = $1 ORDER BY id FOR UPDATE",
            table.table(),
            column
        );
        let ids = sqlx::query_scalar(&sql).bind(parent).fetch_all(&mut *self.tx).await?;
        Ok(ids)
    }

    async fn exists(&mut self, node: NodeRef) -> Result<bool, StoreError> {
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)", node.rank().table());
        let exists = sqlx::query_scalar(&sql)
            .bind(node.raw_id())
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(exists)
    }

    async fn ensure_parent(&mut self, parent: Option<NodeRef>) -> Result<(), StoreError> {
        if let Some(node) = parent {
            if !self.exists(node).await? {
                return Err(StoreError::InvalidParent(node));
            }
        }
        Ok(())
    }

    /// Ids on the same-rank chain from `start` up to its root, `start` included.
    async fn chain_ids(&mut self, table: Rank, column: &str, start: i64) -> Result<Vec<i64>, StoreError> {
        let table = table.table();
        let sql = format!(
            "WITH RECURSIVE chain (id, parent, depth) AS (
                 SELECT id, {column}, 0::BIGINT FROM {table} WHERE id = $1
                 UNION ALL
                 SELECT t.id, t.{column}, c.depth + 1
                 FROM {table} t JOIN chain c ON t.id = c.parent
                 WHERE c.depth < $2
             )
             SELECT id FROM chain"
        );
        let ids = sqlx::query_scalar(&sql)
            .bind(start)
            .bind(MAX_CHAIN_DEPTH)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(ids)
    }

    async fn find_by(&mut self, predicate: &str, value: &str) -> Result<Option<NodeRef>, StoreError> {
        let sql = format!(
            "SELECT rank, id FROM (
                 SELECT 'admin' AS rank, id FROM admin WHERE {predicate}
                 UNION ALL SELECT 'ccm', id FROM ccm WHERE {predicate}
                 UNION ALL SELECT 'dm', id FROM dm WHERE {predicate}
                 UNION ALL SELECT 'am', id FROM am WHERE {predicate}
             ) matches
             LIMIT 1"
        );
        let row: Option<(String, i64)> = sqlx::query_as(&sql)
            .bind(value)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.and_then(|(rank, id)| Rank::parse(&rank).map(|rank| NodeRef::from_parts(rank, id))))
    }

    fn credential(&self, profile: &Profile, mode: CredentialMode) -> String {
        stored_credential(mode, self.hasher.as_ref(), &profile.credential_hash)
    }

    async fn insert_profile_row(
        &mut self,
        rank: Rank,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<ProfileRow, StoreError> {
        let credential = self.credential(profile, mode);
        let sql = format!(
            "INSERT INTO {} (name, email, contact, password_hash, address)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {PROFILE_COLUMNS}",
            rank.table()
        );
        let row = sqlx::query_as::<_, ProfileRow>(&sql)
            .bind(&profile.name)
            .bind(&profile.email)
            .bind(&profile.contact)
            .bind(credential)
            .bind(&profile.address)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row)
    }
}

#[async_trait]
impl HierarchyTx for PgTx {
    async fn admin(&mut self, id: AdminId) -> Result<Option<Admin>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM admin WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Admin::from))
    }

    async fn ccm(&mut self, id: CcmId) -> Result<Option<Ccm>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM ccm WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Ccm::from))
    }

    async fn dm(&mut self, id: DmId) -> Result<Option<Dm>, StoreError> {
        let row = sqlx::query_as::<_, DmRow>(&format!(
            "SELECT {DM_COLUMNS} FROM dm WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Dm::try_from).transpose()
    }

    async fn am(&mut self, id: AmId) -> Result<Option<Am>, StoreError> {
        let row = sqlx::query_as::<_, AmRow>(&format!(
            "SELECT {AM_COLUMNS} FROM am WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Am::try_from).transpose()
    }

    async fn admins(&mut self) -> Result<Vec<Admin>, StoreError> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM admin ORDER BY id"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Admin::from).collect())
    }

    async fn ccms(&mut self) -> Result<Vec<Ccm>, StoreError> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM ccm ORDER BY id"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Ccm::from).collect())
    }

    async fn dms(&mut self) -> Result<Vec<Dm>, StoreError> {
        let rows = sqlx::query_as::<_, DmRow>(&format!("SELECT {DM_COLUMNS} FROM dm ORDER BY id"))
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(Dm::try_from).collect()
    }

    async fn ams(&mut self) -> Result<Vec<Am>, StoreError> {
        let rows = sqlx::query_as::<_, AmRow>(&format!("SELECT {AM_COLUMNS} FROM am ORDER BY id"))
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(Am::try_from).collect()
    }

    async fn sub_am_ids(&mut self, parent: AmId) -> Result<Vec<AmId>, StoreError> {
        let ids = self.child_ids(Rank::Am, "parent_am_id", parent.0).await?;
        Ok(ids.into_iter().map(AmId).collect())
    }

    async fn am_ids_under_dm(&mut self, dm: DmId) -> Result<Vec<AmId>, StoreError> {
        let ids = self.child_ids(Rank::Am, "dm_id", dm.0).await?;
        Ok(ids.into_iter().map(AmId).collect())
    }

    async fn sub_dm_ids(&mut self, parent: DmId) -> Result<Vec<DmId>, StoreError> {
        let ids = self.child_ids(Rank::Dm, "parent_dm_id", parent.0).await?;
        Ok(ids.into_iter().map(DmId).collect())
    }

    async fn dm_ids_under_ccm(&mut self, ccm: CcmId) -> Result<Vec<DmId>, StoreError> {
        let ids = self.child_ids(Rank::Dm, "ccm_id", ccm.0).await?;
        Ok(ids.into_iter().map(DmId).collect())
    }

    async fn find_by_email(&mut self, email: &str) -> Result<Option<NodeRef>, StoreError> {
        self.find_by("lower(email) = lower($1)", email).await
    }

    async fn find_by_contact(&mut self, contact: &str) -> Result<Option<NodeRef>, StoreError> {
        self.find_by("contact = $1", contact).await
    }

    async fn counts(&mut self) -> Result<RankCounts, StoreError> {
        let (admin, ccm, dm, am): (i64, i64, i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM admin),
                    (SELECT COUNT(*) FROM ccm),
                    (SELECT COUNT(*) FROM dm),
                    (SELECT COUNT(*) FROM am)",
        )
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(RankCounts { admin, ccm, dm, am })
    }

    async fn lock_directory(&mut self) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(DIRECTORY_LOCK_KEY)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_admin(&mut self, profile: &Profile, mode: CredentialMode) -> Result<Admin, StoreError> {
        let row = self.insert_profile_row(Rank::Admin, profile, mode).await?;
        Ok(Admin::from(row))
    }

    async fn insert_ccm(&mut self, profile: &Profile, mode: CredentialMode) -> Result<Ccm, StoreError> {
        let row = self.insert_profile_row(Rank::Ccm, profile, mode).await?;
        Ok(Ccm::from(row))
    }

    async fn insert_dm(
        &mut self,
        parent: DmParent,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<Dm, StoreError> {
        self.ensure_parent(parent.node()).await?;
        let (parent_dm_id, ccm_id) = parent.columns();
        let credential = self.credential(profile, mode);
        let row = sqlx::query_as::<_, DmRow>(&format!(
            "INSERT INTO dm (parent_dm_id, ccm_id, name, email, contact, password_hash, address)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {DM_COLUMNS}"
        ))
        .bind(parent_dm_id)
        .bind(ccm_id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.contact)
        .bind(credential)
        .bind(&profile.address)
        .fetch_one(&mut *self.tx)
        .await?;
        Dm::try_from(row)
    }

    async fn insert_am(
        &mut self,
        parent: AmParent,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<Am, StoreError> {
        self.ensure_parent(parent.node()).await?;
        let (parent_am_id, dm_id) = parent.columns();
        let credential = self.credential(profile, mode);
        let row = sqlx::query_as::<_, AmRow>(&format!(
            "INSERT INTO am (parent_am_id, dm_id, name, email, contact, password_hash, address)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {AM_COLUMNS}"
        ))
        .bind(parent_am_id)
        .bind(dm_id)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.contact)
        .bind(credential)
        .bind(&profile.address)
        .fetch_one(&mut *self.tx)
        .await?;
        Am::try_from(row)
    }

    async fn set_am_parent(&mut self, ids: &[AmId], parent: AmParent) -> Result<u64, StoreError> {
        self.ensure_parent(parent.node()).await?;
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        if let AmParent::Am(target) = parent {
            let chain = self.chain_ids(Rank::Am, "parent_am_id", target.0).await?;
            if chain.iter().any(|id| ids.contains(id)) {
                return Err(StoreError::Cycle(NodeRef::Am(target)));
            }
        }
        let (parent_am_id, dm_id) = parent.columns();
        let result = sqlx::query(
            "UPDATE am SET parent_am_id = $1, dm_id = $2, updated_at = now() WHERE id = ANY($3)",
        )
        .bind(parent_am_id)
        .bind(dm_id)
        .bind(&ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_dm_parent(&mut self, ids: &[DmId], parent: DmParent) -> Result<u64, StoreError> {
        self.ensure_parent(parent.node()).await?;
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        if let DmParent::Dm(target) = parent {
            let chain = self.chain_ids(Rank::Dm, "parent_dm_id", target.0).await?;
            if chain.iter().any(|id| ids.contains(id)) {
                return Err(StoreError::Cycle(NodeRef::Dm(target)));
            }
        }
        let (parent_dm_id, ccm_id) = parent.columns();
        let result = sqlx::query(
            "UPDATE dm SET parent_dm_id = $1, ccm_id = $2, updated_at = now() WHERE id = ANY($3)",
        )
        .bind(parent_dm_id)
        .bind(ccm_id)
        .bind(&ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_profile(&mut self, node: NodeRef, update: &ProfileUpdate) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET name = $1, email = $2, contact = $3, address = $4, updated_at = now()
             WHERE id = $5",
            node.rank().table()
        );
        let result = sqlx::query(&sql)
            .bind(&update.name)
            .bind(&update.email)
            .bind(&update.contact)
            .bind(&update.address)
            .bind(node.raw_id())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&mut self, node: NodeRef) -> Result<bool, StoreError> {
        // Children are detached by the ON DELETE SET NULL foreign keys.
        let sql = format!("DELETE FROM {} WHERE id = $1", node.rank().table());
        let result = sqlx::query(&sql)
            .bind(node.raw_id())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn trackers(&mut self) -> Result<Vec<DemotionTracker>, StoreError> {
        let rows = sqlx::query_as::<_, TrackerRow>(&format!(
            "SELECT {TRACKER_COLUMNS} FROM demotion_tracker ORDER BY id"
        ))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(DemotionTracker::from).collect())
    }

    async fn tracker_for(&mut self, ccm: CcmId) -> Result<Option<DemotionTracker>, StoreError> {
        let row = sqlx::query_as::<_, TrackerRow>(&format!(
            "SELECT {TRACKER_COLUMNS} FROM demotion_tracker WHERE ccm_id = $1 FOR UPDATE"
        ))
        .bind(ccm.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(DemotionTracker::from))
    }

    async fn insert_tracker(
        &mut self,
        ccm: CcmId,
        triggered_at: DateTime<Utc>,
    ) -> Result<DemotionTracker, StoreError> {
        let row = sqlx::query_as::<_, TrackerRow>(&format!(
            "INSERT INTO demotion_tracker (ccm_id, triggered_at) VALUES ($1, $2)
             RETURNING {TRACKER_COLUMNS}"
        ))
        .bind(ccm.0)
        .bind(triggered_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(DemotionTracker::from(row))
    }

    async fn delete_tracker(&mut self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM demotion_tracker WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgTx { tx, .. } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let PgTx { tx, .. } = *self;
        tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm_row(parent_dm_id: Option<i64>, ccm_id: Option<i64>) -> DmRow {
        DmRow {
            id: 4,
            parent_dm_id,
            ccm_id,
            name: "Ravi".to_string(),
            email: "ravi@example.com".to_string(),
            contact: "9123456780".to_string(),
            password_hash: "$2b$10$x".to_string(),
            address: "4 Hill St".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dm_row_maps_single_parent() {
        let dm = Dm::try_from(dm_row(None, Some(2))).unwrap();
        assert_eq!(dm.parent, DmParent::Ccm(CcmId(2)));
        assert_eq!(dm.profile.credential_hash, "$2b$10$x");
    }

    #[test]
    fn dm_row_with_two_parents_is_corrupt() {
        let err = Dm::try_from(dm_row(Some(1), Some(2))).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { table: "dm", id: 4, .. }));
    }

    #[test]
    fn scan_lock_keys_are_distinct() {
        let keys = [ScanKind::AmPromotion, ScanKind::DmPromotion, ScanKind::Demotion].map(scan_lock_key);
        assert!(keys.iter().all(|key| *key != DIRECTORY_LOCK_KEY));
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
    }
}
