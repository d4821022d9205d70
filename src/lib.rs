//! mqlguard - normalization, schema validation and safety enforcement for
//! untrusted document-store query plans
//!
//! A candidate plan produced by an unreliable generator is repaired,
//! checked against a schema sampled at runtime, checked against a
//! per-request access policy and a fixed operator denylist, and only then
//! executed. See [`guard::QueryGuard`] for the orchestrated pipeline.

pub mod config;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod guard;
pub mod normalize;
pub mod observability;
pub mod plan;
pub mod policy;
pub mod safety;
pub mod schema;
pub mod store;
pub mod templates;
pub mod validation;

pub use config::GuardConfig;
pub use deployment::Deployment;
pub use error::{GuardError, GuardResult};
pub use guard::QueryGuard;
pub use plan::{Operation, QueryPlan};
pub use policy::{CollectionPolicy, PolicySet};
pub use validation::{Rejection, RejectionCode, ValidatedPlan};
