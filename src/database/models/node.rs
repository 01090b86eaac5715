use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed distributor ranks, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Admin,
    Ccm,
    Dm,
    Am,
}

impl Rank {
    /// Backing table for this rank's partition
    pub fn table(&self) -> &'static str {
        match self {
            Rank::Admin => "admin",
            Rank::Ccm => "ccm",
            Rank::Dm => "dm",
            Rank::Am => "am",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Rank::Admin),
            "ccm" => Some(Rank::Ccm),
            "dm" => Some(Rank::Dm),
            "am" => Some(Rank::Am),
            _ => None,
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

macro_rules! node_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", $prefix, self.0)
            }
        }
    };
}

node_id!(AdminId, "admin");
node_id!(CcmId, "ccm");
node_id!(DmId, "dm");
node_id!(AmId, "am");

/// Rank-tagged identity. Ids are only unique within a rank, so cross-rank
/// lookups always carry the rank alongside the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "rank", content = "id", rename_all = "lowercase")]
pub enum NodeRef {
    Admin(AdminId),
    Ccm(CcmId),
    Dm(DmId),
    Am(AmId),
}

impl NodeRef {
    pub fn rank(&self) -> Rank {
        match self {
            NodeRef::Admin(_) => Rank::Admin,
            NodeRef::Ccm(_) => Rank::Ccm,
            NodeRef::Dm(_) => Rank::Dm,
            NodeRef::Am(_) => Rank::Am,
        }
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            NodeRef::Admin(id) => id.0,
            NodeRef::Ccm(id) => id.0,
            NodeRef::Dm(id) => id.0,
            NodeRef::Am(id) => id.0,
        }
    }

    pub fn from_parts(rank: Rank, id: i64) -> Self {
        match rank {
            Rank::Admin => NodeRef::Admin(AdminId(id)),
            Rank::Ccm => NodeRef::Ccm(CcmId(id)),
            Rank::Dm => NodeRef::Dm(DmId(id)),
            Rank::Am => NodeRef::Am(AmId(id)),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.rank(), self.raw_id())
    }
}

/// Where an AM hangs: under another AM (peer chain) or directly under a DM.
/// Both at once is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum AmParent {
    Root,
    Am(AmId),
    Dm(DmId),
}

impl AmParent {
    /// Column pair `(parent_am_id, dm_id)`
    pub fn columns(&self) -> (Option<i64>, Option<i64>) {
        match self {
            AmParent::Root => (None, None),
            AmParent::Am(id) => (Some(id.0), None),
            AmParent::Dm(id) => (None, Some(id.0)),
        }
    }

    /// Returns `None` when both columns are set.
    pub fn from_columns(parent_am_id: Option<i64>, dm_id: Option<i64>) -> Option<Self> {
        match (parent_am_id, dm_id) {
            (None, None) => Some(AmParent::Root),
            (Some(am), None) => Some(AmParent::Am(AmId(am))),
            (None, Some(dm)) => Some(AmParent::Dm(DmId(dm))),
            (Some(_), Some(_)) => None,
        }
    }

    pub fn node(&self) -> Option<NodeRef> {
        match self {
            AmParent::Root => None,
            AmParent::Am(id) => Some(NodeRef::Am(*id)),
            AmParent::Dm(id) => Some(NodeRef::Dm(*id)),
        }
    }
}

/// Where a DM hangs: under another DM or directly under a CCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum DmParent {
    Root,
    Dm(DmId),
    Ccm(CcmId),
}

impl DmParent {
    /// Column pair `(parent_dm_id, ccm_id)`
    pub fn columns(&self) -> (Option<i64>, Option<i64>) {
        match self {
            DmParent::Root => (None, None),
            DmParent::Dm(id) => (Some(id.0), None),
            DmParent::Ccm(id) => (None, Some(id.0)),
        }
    }

    pub fn from_columns(parent_dm_id: Option<i64>, ccm_id: Option<i64>) -> Option<Self> {
        match (parent_dm_id, ccm_id) {
            (None, None) => Some(DmParent::Root),
            (Some(dm), None) => Some(DmParent::Dm(DmId(dm))),
            (None, Some(ccm)) => Some(DmParent::Ccm(CcmId(ccm))),
            (Some(_), Some(_)) => None,
        }
    }

    pub fn node(&self) -> Option<NodeRef> {
        match self {
            DmParent::Root => None,
            DmParent::Dm(id) => Some(NodeRef::Dm(*id)),
            DmParent::Ccm(id) => Some(NodeRef::Ccm(*id)),
        }
    }
}

/// Identity and contact details shared by every rank. Carried verbatim
/// across rank transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub contact: String,
    pub address: String,
    #[serde(skip_serializing)]
    pub credential_hash: String,
}

impl Profile {
    /// Returns the name of the first offending field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.trim().is_empty() {
            return Err("name");
        }
        if !is_plausible_email(&self.email) {
            return Err("email");
        }
        if !is_valid_contact(&self.contact) {
            return Err("contact");
        }
        if self.address.trim().is_empty() {
            return Err("address");
        }
        if self.credential_hash.is_empty() {
            return Err("credential_hash");
        }
        Ok(())
    }
}

/// Editable subset of a profile; the credential is managed elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
    pub contact: String,
    pub address: String,
}

impl ProfileUpdate {
    pub fn trimmed(&self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            contact: self.contact.trim().to_string(),
            address: self.address.trim().to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.name.is_empty() {
            return Err("name");
        }
        if !is_plausible_email(&self.email) {
            return Err("email");
        }
        if !is_valid_contact(&self.contact) {
            return Err("contact");
        }
        if self.address.is_empty() {
            return Err("address");
        }
        Ok(())
    }

    pub fn apply(&self, profile: &mut Profile) {
        profile.name = self.name.clone();
        profile.email = self.email.clone();
        profile.contact = self.contact.clone();
        profile.address = self.address.clone();
    }
}

/// Exactly ten ASCII digits.
pub fn is_valid_contact(contact: &str) -> bool {
    contact.len() == 10 && contact.bytes().all(|b| b.is_ascii_digit())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !email.contains(' '),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admin {
    pub id: AdminId,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ccm {
    pub id: CcmId,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dm {
    pub id: DmId,
    pub parent: DmParent,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Am {
    pub id: AmId,
    pub parent: AmParent,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

/// Node population per rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankCounts {
    pub admin: i64,
    pub ccm: i64,
    pub dm: i64,
    pub am: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            name: "Asha".to_string(),
            email: "asha@example.com".to_string(),
            contact: "9876543210".to_string(),
            address: "12 Market Road".to_string(),
            credential_hash: "$2b$10$abc".to_string(),
        }
    }

    #[test]
    fn parent_columns_reject_double_parent() {
        assert_eq!(AmParent::from_columns(Some(3), None), Some(AmParent::Am(AmId(3))));
        assert_eq!(AmParent::from_columns(None, Some(4)), Some(AmParent::Dm(DmId(4))));
        assert_eq!(AmParent::from_columns(Some(3), Some(4)), None);
        assert_eq!(DmParent::from_columns(None, None), Some(DmParent::Root));
        assert_eq!(DmParent::from_columns(Some(1), Some(2)), None);
        assert_eq!(DmParent::Ccm(CcmId(9)).columns(), (None, Some(9)));
    }

    #[test]
    fn contact_must_be_ten_digits() {
        assert!(is_valid_contact("0123456789"));
        assert!(!is_valid_contact("012345678"));
        assert!(!is_valid_contact("01234567890"));
        assert!(!is_valid_contact("01234-6789"));
    }

    #[test]
    fn profile_validation_names_first_bad_field() {
        assert_eq!(profile().validate(), Ok(()));

        let mut bad = profile();
        bad.email = "not-an-email".to_string();
        assert_eq!(bad.validate(), Err("email"));

        let mut bad = profile();
        bad.contact = "12345".to_string();
        assert_eq!(bad.validate(), Err("contact"));
    }

    #[test]
    fn node_ref_display_carries_rank() {
        assert_eq!(NodeRef::Dm(DmId(7)).to_string(), "dm#7");
        assert_eq!(AmId(2).to_string(), "am#2");
        assert_eq!(NodeRef::from_parts(Rank::Ccm, 5), NodeRef::Ccm(CcmId(5)));
    }

    #[test]
    fn credential_hash_is_not_serialized() {
        let json = serde_json::to_value(profile()).unwrap();
        assert!(json.get("credential_hash").is_none());
        assert_eq!(json["email"], "asha@example.com");
    }
}
