//! Executor error types

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operation '{0}' has no execution path")]
    UnsupportedOperation(String),

    #[error("pipeline stage {0} is not a document")]
    InvalidStage(usize),
}

impl ExecutorError {
    /// Stable code for logs and wire errors
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::Store(StoreError::Unavailable(_)) => "STORE_UNAVAILABLE",
            ExecutorError::Store(StoreError::Unsupported(_)) => "STORE_UNSUPPORTED",
            ExecutorError::Store(_) => "STORE_FAILED",
            ExecutorError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            ExecutorError::InvalidStage(_) => "INVALID_STAGE",
        }
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
