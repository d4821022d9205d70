//! Relationship facts

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a joined document is shown to a person
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DisplayName {
    /// A single name field
    Field { field: String },
    /// First and last name fields joined by a space
    FullName { first: String, last: String },
}

impl DisplayName {
    /// Fields a lookup must fetch to render the name
    pub fn fields(&self) -> Vec<&str> {
        match self {
            DisplayName::Field { field } => vec![field.as_str()],
            DisplayName::FullName { first, last } => vec![first.as_str(), last.as_str()],
        }
    }

    /// Render the display name of a target document
    pub fn render(&self, document: &Map<String, Value>) -> Option<String> {
        let text = |name: &str| document.get(name).and_then(Value::as_str).unwrap_or("");
        let rendered = match self {
            DisplayName::Field { field } => text(field).trim().to_string(),
            DisplayName::FullName { first, last } => {
                format!("{} {}", text(first), text(last)).trim().to_string()
            }
        };
        if rendered.is_empty() {
            None
        } else {
            Some(rendered)
        }
    }
}

/// `source_collection.source_field -> target_collection.target_field`
///
/// Besides the edge itself, a fact records the mistakes commonly made when
/// joining along it: collections wrongly named as the join source, local
/// field names that should have been `source_field`, and composite name
/// fields that do not exist on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipFact {
    pub source_collection: String,
    pub source_field: String,
    pub target_collection: String,
    #[serde(default = "default_target_field")]
    pub target_field: String,
    /// Canonical join alias
    pub alias: String,
    #[serde(default)]
    pub wrong_targets: Vec<String>,
    #[serde(default)]
    pub wrong_local_fields: Vec<String>,
    #[serde(default)]
    pub display: Option<DisplayName>,
    /// Result field that receives the resolved display name
    #[serde(default)]
    pub enriched_field: Option<String>,
    /// Names a candidate may use on the alias for the full display name
    #[serde(default)]
    pub composite_name_fields: Vec<String>,
}

fn default_target_field() -> String {
    "_id".to_string()
}

impl RelationshipFact {
    pub fn new(
        source_collection: impl Into<String>,
        source_field: impl Into<String>,
        target_collection: impl Into<String>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            source_collection: source_collection.into(),
            source_field: source_field.into(),
            target_collection: target_collection.into(),
            target_field: default_target_field(),
            alias: alias.into(),
            wrong_targets: Vec::new(),
            wrong_local_fields: Vec::new(),
            display: None,
            enriched_field: None,
            composite_name_fields: Vec::new(),
        }
    }

    pub fn with_wrong_targets(mut self, targets: &[&str]) -> Self {
        self.wrong_targets = targets.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_wrong_local_fields(mut self, fields: &[&str]) -> Self {
        self.wrong_local_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_display(mut self, display: DisplayName, enriched_field: &str) -> Self {
        self.display = Some(display);
        self.enriched_field = Some(enriched_field.to_string());
        self
    }

    pub fn with_composite_names(mut self, names: &[&str]) -> Self {
        self.composite_name_fields = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// `local_field` is the source field or a known wrong spelling of it
    pub fn matches_local(&self, local_field: &str) -> bool {
        local_field == self.source_field
            || self.wrong_local_fields.iter().any(|f| f == local_field)
    }

    pub fn is_wrong_target(&self, from: &str) -> bool {
        self.wrong_targets.iter().any(|t| t == from)
    }

    /// First and last name fields, when the display is a full name
    pub fn full_name_fields(&self) -> Option<(&str, &str)> {
        match &self.display {
            Some(DisplayName::FullName { first, last }) => Some((first.as_str(), last.as_str())),
            _ => None,
        }
    }
}
