pub mod directory_service;
pub mod registry_service;

pub use directory_service::{DirectoryService, PlacementCandidates, TreeNode};
pub use registry_service::{RegistryError, RegistryService};
