//! Service layer
//!
//! Contains business logic separated from HTTP handlers.
//! Services orchestrate database and GitHub operations and scope every
//! resource to the identity making the request.

mod models;
mod repos;
mod user;

pub use models::{ModelService, ModelUpdate, NewModel};
pub use repos::{HookReceipt, RepoService, RepoUpdate, hub_signature, verify_hub_signature};
pub use user::{UserProfile, UserService};
