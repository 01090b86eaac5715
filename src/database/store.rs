use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use crate::database::models::{
    Admin, AdminId, Am, AmId, AmParent, Ccm, CcmId, DemotionTracker, Dm, DmId, DmParent, NodeRef,
    Profile, ProfileUpdate, RankCounts,
};
use crate::hierarchy::ScanKind;

/// Errors from the hierarchy store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid database name: {0}")]
    InvalidDatabaseName(String),

    #[error("Not found: {0}")]
    NotFound(NodeRef),

    #[error("Parent does not exist: {0}")]
    InvalidParent(NodeRef),

    #[error("Re-parenting under {0} would create a cycle")]
    Cycle(NodeRef),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Corrupt row in {table}#{id}: {reason}")]
    Corrupt {
        table: &'static str,
        id: i64,
        reason: &'static str,
    },

    #[error("Serialization failure, transaction must be retried")]
    Serialization,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
            }
            if db.code().as_deref() == Some("40001") {
                return StoreError::Serialization;
            }
        }
        StoreError::Sqlx(err)
    }
}

/// Whether an insert runs the credential hook or stores the hash as given.
/// Rank transitions copy an already-hashed credential and must use
/// `Verbatim` so it is never hashed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    Hash,
    Verbatim,
}

/// Hook applied to credentials on `CredentialMode::Hash` inserts. Supplied by
/// the auth collaborator; stores without a hook keep the value unchanged.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, credential: &str) -> String;
}

pub(crate) fn stored_credential(
    mode: CredentialMode,
    hasher: Option<&Arc<dyn CredentialHasher>>,
    credential: &str,
) -> String {
    match (mode, hasher) {
        (CredentialMode::Hash, Some(hasher)) => hasher.hash(credential),
        _ => credential.to_string(),
    }
}

/// Exclusive claim on one scan kind, shared by every process using the
/// store. Dropping it also releases the claim.
#[async_trait]
pub trait ScanLock: Send {
    async fn release(self: Box<Self>) -> Result<(), StoreError>;
}

/// Entry point to the persisted hierarchy. All reads and writes go through a
/// transaction; a transaction dropped without `commit` is rolled back.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn HierarchyTx>, StoreError>;

    /// Claims `kind` for one run. `None` when another run, in this process
    /// or another one, holds it.
    async fn try_scan_lock(&self, kind: ScanKind) -> Result<Option<Box<dyn ScanLock>>, StoreError>;

    async fn am_ids(&self) -> Result<Vec<AmId>, StoreError> {
        let mut tx = self.begin().await?;
        let ids = tx.ams().await?.into_iter().map(|am| am.id).collect();
        tx.rollback().await?;
        Ok(ids)
    }

    async fn dm_ids(&self) -> Result<Vec<DmId>, StoreError> {
        let mut tx = self.begin().await?;
        let ids = tx.dms().await?.into_iter().map(|dm| dm.id).collect();
        tx.rollback().await?;
        Ok(ids)
    }

    async fn trackers(&self) -> Result<Vec<DemotionTracker>, StoreError> {
        let mut tx = self.begin().await?;
        let trackers = tx.trackers().await?;
        tx.rollback().await?;
        Ok(trackers)
    }
}

/// One isolated unit of work against the hierarchy.
///
/// Single-node fetches lock the row for the rest of the transaction, and
/// child-id queries lock the children so their parent pointers cannot move
/// between a count and the writes that depend on it. Child ids come back in
/// ascending id order, which is creation order.
#[async_trait]
pub trait HierarchyTx: Send {
    async fn admin(&mut self, id: AdminId) -> Result<Option<Admin>, StoreError>;
    async fn ccm(&mut self, id: CcmId) -> Result<Option<Ccm>, StoreError>;
    async fn dm(&mut self, id: DmId) -> Result<Option<Dm>, StoreError>;
    async fn am(&mut self, id: AmId) -> Result<Option<Am>, StoreError>;

    async fn admins(&mut self) -> Result<Vec<Admin>, StoreError>;
    async fn ccms(&mut self) -> Result<Vec<Ccm>, StoreError>;
    async fn dms(&mut self) -> Result<Vec<Dm>, StoreError>;
    async fn ams(&mut self) -> Result<Vec<Am>, StoreError>;

    /// AMs whose parent is the AM `parent`
    async fn sub_am_ids(&mut self, parent: AmId) -> Result<Vec<AmId>, StoreError>;
    /// AMs attached directly to `dm`
    async fn am_ids_under_dm(&mut self, dm: DmId) -> Result<Vec<AmId>, StoreError>;
    /// DMs whose parent is the DM `parent`
    async fn sub_dm_ids(&mut self, parent: DmId) -> Result<Vec<DmId>, StoreError>;
    /// DMs attached directly to `ccm`
    async fn dm_ids_under_ccm(&mut self, ccm: CcmId) -> Result<Vec<DmId>, StoreError>;

    /// Cross-rank lookups. Email comparison ignores ASCII case.
    async fn find_by_email(&mut self, email: &str) -> Result<Option<NodeRef>, StoreError>;
    async fn find_by_contact(&mut self, contact: &str) -> Result<Option<NodeRef>, StoreError>;

    async fn counts(&mut self) -> Result<RankCounts, StoreError>;

    /// Serializes registrations so uniqueness checks and inserts cannot race.
    async fn lock_directory(&mut self) -> Result<(), StoreError>;

    async fn insert_admin(&mut self, profile: &Profile, mode: CredentialMode) -> Result<Admin, StoreError>;
    async fn insert_ccm(&mut self, profile: &Profile, mode: CredentialMode) -> Result<Ccm, StoreError>;
    async fn insert_dm(
        &mut self,
        parent: DmParent,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<Dm, StoreError>;
    async fn insert_am(
        &mut self,
        parent: AmParent,
        profile: &Profile,
        mode: CredentialMode,
    ) -> Result<Am, StoreError>;

    /// Bulk re-parent by id list; returns the number of rows changed.
    async fn set_am_parent(&mut self, ids: &[AmId], parent: AmParent) -> Result<u64, StoreError>;
    async fn set_dm_parent(&mut self, ids: &[DmId], parent: DmParent) -> Result<u64, StoreError>;

    async fn update_profile(&mut self, node: NodeRef, update: &ProfileUpdate) -> Result<bool, StoreError>;

    /// Removes a node. Children still attached to it are detached (their
    /// parent becomes `Root`), never deleted.
    async fn delete(&mut self, node: NodeRef) -> Result<bool, StoreError>;

    async fn trackers(&mut self) -> Result<Vec<DemotionTracker>, StoreError>;
    async fn tracker_for(&mut self, ccm: CcmId) -> Result<Option<DemotionTracker>, StoreError>;
    async fn insert_tracker(
        &mut self,
        ccm: CcmId,
        triggered_at: DateTime<Utc>,
    ) -> Result<DemotionTracker, StoreError>;
    async fn delete_tracker(&mut self, id: i64) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Commits on success, rolls back otherwise. The original error wins over a
/// failed rollback.
pub(crate) async fn finish<T, E>(tx: Box<dyn HierarchyTx>, result: Result<T, E>) -> Result<T, E>
where
    T: Send,
    E: From<StoreError> + fmt::Display + Send,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed after {}: {}", err, rollback);
            }
            Err(err)
        }
    }
}
