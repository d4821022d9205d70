//! Permission policy documents

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};

/// Wildcard for database and collection patterns
pub const WILDCARD: &str = "*";

fn default_operations() -> Vec<String> {
    vec!["find".to_string()]
}

/// Access rules for one (database, collection) pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPolicy {
    /// Exact database name or `*`; absent means `*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Exact collection name or `*`
    pub name: String,
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,
    #[serde(default)]
    pub restricted_fields: Vec<String>,
    /// Overrides the set-wide maximum for this pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<i64>,
}

impl CollectionPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            database: None,
            name: name.into(),
            operations: default_operations(),
            restricted_fields: Vec::new(),
            max_limit: None,
        }
    }

    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_operations(mut self, operations: &[&str]) -> Self {
        self.operations = operations.iter().map(|op| op.to_string()).collect();
        self
    }

    pub fn with_restricted_fields(mut self, fields: &[&str]) -> Self {
        self.restricted_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_max_limit(mut self, max_limit: i64) -> Self {
        self.max_limit = Some(max_limit);
        self
    }

    pub(crate) fn database_pattern(&self) -> &str {
        self.database.as_deref().unwrap_or(WILDCARD)
    }

    /// True if `operation` is listed, case-insensitively, or `*` is
    pub fn allows(&self, operation: &str) -> bool {
        self.operations
            .iter()
            .any(|allowed| allowed == WILDCARD || allowed.eq_ignore_ascii_case(operation))
    }
}

/// Per-request policy set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySet {
    #[serde(default)]
    pub collections: Vec<CollectionPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<i64>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, policy: CollectionPolicy) -> Self {
        self.collections.push(policy);
        self
    }

    pub fn with_max_limit(mut self, max_limit: i64) -> Self {
        self.max_limit = Some(max_limit);
        self
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let set: Self = serde_json::from_str(text)?;
        if let Some(bad) = set.collections.iter().find(|p| p.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "policy for database '{}' names no collection",
                bad.database_pattern()
            )));
        }
        Ok(set)
    }
}
