pub mod node;
pub mod tracker;

pub use node::{
    Admin, AdminId, Am, AmId, AmParent, Ccm, CcmId, Dm, DmId, DmParent, NodeRef, Profile,
    ProfileUpdate, Rank, RankCounts,
};
pub use tracker::DemotionTracker;
