//! Top-level guard errors
//!
//! Codes:
//! - rejection codes (UnknownCollection, InvalidField, ...) for validator rejections
//! - MALFORMED_PLAN for candidates the normalizer cannot read
//! - STORE_* / UNSUPPORTED_OPERATION / INVALID_STAGE for execution failures
//! - INVALID_INPUT for rejected natural-language text

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::plan::PlanError;
use crate::safety::InputError;
use crate::validation::{Rejection, RejectionKind};

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(#[from] ExecutorError),

    #[error(transparent)]
    Input(#[from] InputError),
}

impl GuardError {
    pub fn code(&self) -> &str {
        match self {
            GuardError::Rejected(rejection) => rejection.code().as_str(),
            GuardError::Plan(_) => "MALFORMED_PLAN",
            GuardError::Execution(e) => e.code(),
            GuardError::Input(_) => "INVALID_INPUT",
        }
    }

    /// Only schema rejections may be answered with one regenerated candidate
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::Rejected(rejection) if rejection.is_retryable())
    }

    /// The rejection, when a validator refused the plan
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            GuardError::Rejected(rejection) => Some(rejection),
            _ => None,
        }
    }

    pub fn is_security_violation(&self) -> bool {
        self.rejection()
            .is_some_and(|rejection| rejection.kind() == RejectionKind::Safety)
    }
}

pub type GuardResult<T> = Result<T, GuardError>;
