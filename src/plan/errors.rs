//! Errors raised while reading a candidate plan document

use thiserror::Error;

/// A candidate document that cannot be read as a plan at all.
///
/// Shapes the normalizer knows how to repair never surface here; these are
/// the leftovers where no sensible repair exists.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("candidate plan must be a document, found {0}")]
    NotADocument(&'static str),

    #[error("candidate plan names no collection and no collection hint was given")]
    MissingCollection,

    #[error("plan member '{member}' is malformed: {reason}")]
    Malformed { member: String, reason: String },
}

impl PlanError {
    pub(crate) fn malformed(member: impl Into<String>, reason: impl Into<String>) -> Self {
        PlanError::Malformed {
            member: member.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for plan parsing
pub type PlanResult<T> = Result<T, PlanError>;
