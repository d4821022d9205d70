//! Validation outcomes
//!
//! Every validator answers with a `ValidationOutcome`: accepted, or rejected
//! with exactly one `RejectionCode`. There is no partial acceptance.
//!
//! Rejection taxonomy:
//! - Schema (UnknownCollection, InvalidField, InvalidJoinPath): eligible for
//!   one regeneration attempt by the caller
//! - Policy (OperationNotAllowed, LimitExceeded, RestrictedField): terminal
//! - Safety (UnsafeOperator): terminal, logged as a security event
//!
//! A plan that passed every validator is wrapped in `ValidatedPlan`, the only
//! type the executor accepts.

mod rejection;
mod validated;

pub use rejection::{Rejection, RejectionCode, RejectionKind, ValidationOutcome, ValidationResult};
pub use validated::{PlanOrigin, ValidatedPlan};
