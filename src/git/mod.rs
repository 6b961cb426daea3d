pub mod controller;
pub mod runner;

pub use controller::{is_protected_branch, BranchInfo, DeploymentController, StatusInfo, TagInfo};
pub use runner::{CommandOutput, GitRunner};
