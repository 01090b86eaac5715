use std::sync::Arc;

use tracing::info;

use crate::config::RulesConfig;
use crate::database::models::{
    Admin, Am, AmParent, Ccm, Dm, DmParent, NodeRef, Profile, ProfileUpdate,
};
use crate::database::store::{finish, CredentialMode, HierarchyStore, HierarchyTx, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Email is already registered")]
    EmailTaken,
    #[error("Contact number is already registered")]
    ContactTaken,
    #[error("Email and contact number are already registered")]
    EmailAndContactTaken,
    #[error("Invalid {0}")]
    InvalidProfile(&'static str),
    #[error("A parent is required")]
    MissingParent,
    #[error("Parent not found: {0}")]
    ParentNotFound(NodeRef),
    #[error("{parent} already has {cap} direct children")]
    ParentFull { parent: NodeRef, cap: usize },
    #[error("Not found: {0}")]
    NotFound(NodeRef),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Registration, profile edits and removal. Each call is one transaction
/// holding the directory lock, so uniqueness checks cannot race.
pub struct RegistryService {
    store: Arc<dyn HierarchyStore>,
    fan_out_cap: usize,
}

impl RegistryService {
    pub fn new(store: Arc<dyn HierarchyStore>, rules: &RulesConfig) -> Self {
        Self {
            store,
            fan_out_cap: rules.fan_out_cap,
        }
    }

    pub async fn register_admin(&self, profile: Profile) -> Result<Admin, RegistryError> {
        let profile = normalized(profile)?;
        let mut tx = self.store.begin().await?;
        let result: Result<Admin, RegistryError> = async {
            check_unique(&mut *tx, &profile.email, &profile.contact, None).await?;
            Ok(tx.insert_admin(&profile, CredentialMode::Hash).await?)
        }
        .await;
        let admin = finish(tx, result).await?;
        info!("Registered {}", admin.id);
        Ok(admin)
    }

    pub async fn register_ccm(&self, profile: Profile) -> Result<Ccm, RegistryError> {
        let profile = normalized(profile)?;
        let mut tx = self.store.begin().await?;
        let result: Result<Ccm, RegistryError> = async {
            check_unique(&mut *tx, &profile.email, &profile.contact, None).await?;
            Ok(tx.insert_ccm(&profile, CredentialMode::Hash).await?)
        }
        .await;
        let ccm = finish(tx, result).await?;
        info!("Registered {}", ccm.id);
        Ok(ccm)
    }

    /// DMs hang under a CCM (uncapped) or under another DM (capped).
    pub async fn register_dm(&self, parent: DmParent, profile: Profile) -> Result<Dm, RegistryError> {
        let profile = normalized(profile)?;
        let mut tx = self.store.begin().await?;
        let result = self.register_dm_in(&mut *tx, parent, &profile).await;
        let dm = finish(tx, result).await?;
        info!("Registered {} under {:?}", dm.id, dm.parent);
        Ok(dm)
    }

    async fn register_dm_in(
        &self,
        tx: &mut dyn HierarchyTx,
        parent: DmParent,
        profile: &Profile,
    ) -> Result<Dm, RegistryError> {
        check_unique(tx, &profile.email, &profile.contact, None).await?;
        match parent {
            DmParent::Root => return Err(RegistryError::MissingParent),
            DmParent::Ccm(ccm) => {
                if tx.ccm(ccm).await?.is_none() {
                    return Err(RegistryError::ParentNotFound(NodeRef::Ccm(ccm)));
                }
            }
            DmParent::Dm(dm) => {
                if tx.dm(dm).await?.is_none() {
                    return Err(RegistryError::ParentNotFound(NodeRef::Dm(dm)));
                }
                let children = tx.sub_dm_ids(dm).await?.len();
                self.check_capacity(NodeRef::Dm(dm), children)?;
            }
        }
        Ok(tx.insert_dm(parent, profile, CredentialMode::Hash).await?)
    }

    /// AMs hang under another AM or under a DM; both are capped.
    pub async fn register_am(&self, parent: AmParent, profile: Profile) -> Result<Am, RegistryError> {
        let profile = normalized(profile)?;
        let mut tx = self.store.begin().await?;
        let result = self.register_am_in(&mut *tx, parent, &profile).await;
        let am = finish(tx, result).await?;
        info!("Registered {} under {:?}", am.id, am.parent);
        Ok(am)
    }

    async fn register_am_in(
        &self,
        tx: &mut dyn HierarchyTx,
        parent: AmParent,
        profile: &Profile,
    ) -> Result<Am, RegistryError> {
        check_unique(tx, &profile.email, &profile.contact, None).await?;
        match parent {
            AmParent::Root => return Err(RegistryError::MissingParent),
            AmParent::Am(am) => {
                if tx.am(am).await?.is_none() {
                    return Err(RegistryError::ParentNotFound(NodeRef::Am(am)));
                }
                let children = tx.sub_am_ids(am).await?.len();
                self.check_capacity(NodeRef::Am(am), children)?;
            }
            AmParent::Dm(dm) => {
                if tx.dm(dm).await?.is_none() {
                    return Err(RegistryError::ParentNotFound(NodeRef::Dm(dm)));
                }
                let children = tx.am_ids_under_dm(dm).await?.len();
                self.check_capacity(NodeRef::Dm(dm), children)?;
            }
        }
        Ok(tx.insert_am(parent, profile, CredentialMode::Hash).await?)
    }

    /// Trims and validates the update; email and contact must stay unique
    /// across every rank, ignoring the node's own current values.
    pub async fn update_profile(&self, node: NodeRef, update: ProfileUpdate) -> Result<(), RegistryError> {
        let update = update.trimmed();
        update.validate().map_err(RegistryError::InvalidProfile)?;

        let mut tx = self.store.begin().await?;
        let result: Result<(), RegistryError> = async {
            check_unique(&mut *tx, &update.email, &update.contact, Some(node)).await?;
            if !tx.update_profile(node, &update).await? {
                return Err(RegistryError::NotFound(node));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;
        info!("Updated profile of {}", node);
        Ok(())
    }

    /// Removes a node. Its children stay in place with no parent.
    pub async fn delete_node(&self, node: NodeRef) -> Result<(), RegistryError> {
        let mut tx = self.store.begin().await?;
        let result = match tx.delete(node).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RegistryError::NotFound(node)),
            Err(err) => Err(err.into()),
        };
        finish(tx, result).await?;
        info!("Deleted {}", node);
        Ok(())
    }

    fn check_capacity(&self, parent: NodeRef, children: usize) -> Result<(), RegistryError> {
        if children >= self.fan_out_cap {
            return Err(RegistryError::ParentFull {
                parent,
                cap: self.fan_out_cap,
            });
        }
        Ok(())
    }
}

fn normalized(profile: Profile) -> Result<Profile, RegistryError> {
    let profile = Profile {
        name: profile.name.trim().to_string(),
        email: profile.email.trim().to_string(),
        contact: profile.contact.trim().to_string(),
        address: profile.address.trim().to_string(),
        credential_hash: profile.credential_hash,
    };
    profile.validate().map_err(RegistryError::InvalidProfile)?;
    Ok(profile)
}

async fn check_unique(
    tx: &mut dyn HierarchyTx,
    email: &str,
    contact: &str,
    except: Option<NodeRef>,
) -> Result<(), RegistryError> {
    tx.lock_directory().await?;
    let email_owner = tx.find_by_email(email).await?.filter(|owner| Some(*owner) != except);
    let contact_owner = tx.find_by_contact(contact).await?.filter(|owner| Some(*owner) != except);
    match (email_owner, contact_owner) {
        (Some(_), Some(_)) => Err(RegistryError::EmailAndContactTaken),
        (Some(_), None) => Err(RegistryError::EmailTaken),
        (None, Some(_)) => Err(RegistryError::ContactTaken),
        (None, None) => Ok(()),
    }
}
