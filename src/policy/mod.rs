//! Per-request access policy
//!
//! Policies are supplied with each request and never persisted. Resolution
//! picks the single most specific entry for the active database and the
//! plan's collection.

mod types;
mod validator;

pub use types::{CollectionPolicy, PolicySet, WILDCARD};
pub use validator::PermissionValidator;
