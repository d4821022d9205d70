//! Rejection codes and the rejection value

use std::fmt;

use serde_json::{json, Value};

/// Rejection category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    Schema,
    Policy,
    Safety,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Schema => "SCHEMA",
            RejectionKind::Policy => "POLICY",
            RejectionKind::Safety => "SAFETY",
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason codes carried on the wire as `reasonCode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionCode {
    /// Collection is not part of the active database
    UnknownCollection,
    /// A field path has a root that is not known at that point of the plan
    InvalidField,
    /// A join stage names an unknown local field or source collection
    InvalidJoinPath,
    /// No policy covers the target or it does not allow the operation
    OperationNotAllowed,
    /// Requested limit exceeds the policy maximum
    LimitExceeded,
    /// A restricted field is referenced
    RestrictedField,
    /// Denylisted operator or non read-only operation
    UnsafeOperator,
}

impl RejectionCode {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCode::UnknownCollection => "UnknownCollection",
            RejectionCode::InvalidField => "InvalidField",
            RejectionCode::InvalidJoinPath => "InvalidJoinPath",
            RejectionCode::OperationNotAllowed => "OperationNotAllowed",
            RejectionCode::LimitExceeded => "LimitExceeded",
            RejectionCode::RestrictedField => "RestrictedField",
            RejectionCode::UnsafeOperator => "UnsafeOperator",
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self {
            RejectionCode::UnknownCollection
            | RejectionCode::InvalidField
            | RejectionCode::InvalidJoinPath => RejectionKind::Schema,
            RejectionCode::OperationNotAllowed
            | RejectionCode::LimitExceeded
            | RejectionCode::RestrictedField => RejectionKind::Policy,
            RejectionCode::UnsafeOperator => RejectionKind::Safety,
        }
    }

    /// Only schema rejections may be answered with a regenerated candidate
    pub fn is_retryable(&self) -> bool {
        self.kind() == RejectionKind::Schema
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A rejected plan
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    code: RejectionCode,
    message: String,
    paths: Vec<String>,
    allowed_roots: Vec<String>,
}

impl Rejection {
    pub fn new(code: RejectionCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            paths: Vec::new(),
            allowed_roots: Vec::new(),
        }
    }

    pub fn unknown_collection(collection: &str, known: &[String]) -> Self {
        Self {
            paths: vec![collection.to_string()],
            allowed_roots: known.to_vec(),
            ..Self::new(
                RejectionCode::UnknownCollection,
                format!(
                    "collection '{}' does not exist; available collections: [{}]",
                    collection,
                    known.join(", ")
                ),
            )
        }
    }

    /// Unknown field roots in a whole-document check
    pub fn invalid_fields(collection: &str, paths: Vec<String>, allowed: Vec<String>) -> Self {
        let message = format!(
            "unknown field(s) [{}] in collection '{}'; allowed root fields: [{}]",
            paths.join(", "),
            collection,
            allowed.join(", ")
        );
        Self {
            paths,
            allowed_roots: allowed,
            ..Self::new(RejectionCode::InvalidField, message)
        }
    }

    /// Unknown roots referenced inside pipeline stage `stage`
    pub fn invalid_stage_fields(
        stage: usize,
        operator: &str,
        paths: Vec<String>,
        allowed: Vec<String>,
    ) -> Self {
        let message = format!(
            "stage {} ({}) references unknown field(s) [{}]; known at this stage: [{}]",
            stage,
            operator,
            paths.join(", "),
            allowed.join(", ")
        );
        Self {
            paths,
            allowed_roots: allowed,
            ..Self::new(RejectionCode::InvalidField, message)
        }
    }

    /// A root replacement whose resulting fields cannot be known
    pub fn unknown_root_shape(stage: usize, operator: &str, allowed: Vec<String>) -> Self {
        let message = format!(
            "stage {} ({}) replaces the document with a shape whose fields cannot be checked; \
             use $$ROOT, a document literal, or an array-of-documents field; known at this stage: [{}]",
            stage,
            operator,
            allowed.join(", ")
        );
        Self {
            allowed_roots: allowed,
            ..Self::new(RejectionCode::InvalidField, message)
        }
    }

    pub fn invalid_join_path(stage: usize, detail: &str, path: &str, allowed: Vec<String>) -> Self {
        let message = format!(
            "stage {} ($lookup) {} '{}'; known at this stage: [{}]",
            stage,
            detail,
            path,
            allowed.join(", ")
        );
        Self {
            paths: vec![path.to_string()],
            allowed_roots: allowed,
            ..Self::new(RejectionCode::InvalidJoinPath, message)
        }
    }

    pub fn operation_not_allowed(message: impl Into<String>) -> Self {
        Self::new(RejectionCode::OperationNotAllowed, message)
    }

    pub fn limit_exceeded(requested: i64, max: i64) -> Self {
        Self::new(
            RejectionCode::LimitExceeded,
            format!("requested limit {} exceeds the maximum of {}", requested, max),
        )
    }

    /// A `$limit` stage whose value is not a positive integer
    pub fn unreadable_limit(value: &Value) -> Self {
        Self::new(
            RejectionCode::LimitExceeded,
            format!("limit {} is not a positive integer", value),
        )
    }

    pub fn restricted_field(field: &str, location: &str) -> Self {
        Self {
            paths: vec![field.to_string()],
            ..Self::new(
                RejectionCode::RestrictedField,
                format!("restricted field '{}' is referenced in {}", field, location),
            )
        }
    }

    pub fn unsafe_operator(operator: &str) -> Self {
        Self {
            paths: vec![operator.to_string()],
            ..Self::new(
                RejectionCode::UnsafeOperator,
                format!("operator '{}' is not permitted", operator),
            )
        }
    }

    pub fn unsafe_operation(operation: &str) -> Self {
        Self::new(
            RejectionCode::UnsafeOperator,
            format!(
                "operation '{}' is not permitted; only find and aggregate may run",
                operation
            ),
        )
    }

    pub fn code(&self) -> RejectionCode {
        self.code
    }

    pub fn kind(&self) -> RejectionKind {
        self.code.kind()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Offending path(s), operator or collection
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Allowed root set, present for whole-document checks
    pub fn allowed_roots(&self) -> &[String] {
        &self.allowed_roots
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// `{ accepted: false, reasonCode, message }`
    pub fn to_wire(&self) -> Value {
        json!({
            "accepted": false,
            "reasonCode": self.code.as_str(),
            "message": self.message,
        })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.kind(), self.code, self.message)
    }
}

impl std::error::Error for Rejection {}

/// Result type for validators
pub type ValidationResult<T> = Result<T, Rejection>;

/// Accepted, or rejected with one reason
pub type ValidationOutcome = ValidationResult<()>;
