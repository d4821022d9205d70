//! Deployment vocabulary
//!
//! The repair rules are data, not code paths: per-collection alias tables
//! map commonly hallucinated field names to schema names, and relationship
//! facts describe the joins the deployment's data supports. Both are
//! immutable for the lifetime of a database binding.

mod aliases;
mod names;
mod relationships;
mod retail;

pub use aliases::AliasTable;
pub use names::full_name_condition;
pub use relationships::{DisplayName, RelationshipFact};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};
use crate::plan::paths::leaf_of;

/// Alias tables and relationship facts for one database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Collection name to alias table
    #[serde(default)]
    pub aliases: BTreeMap<String, AliasTable>,
    #[serde(default)]
    pub relationships: Vec<RelationshipFact>,
}

impl Deployment {
    /// No aliases, no relationships: the pipeline only validates
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in retail vocabulary (orders, customers, products, categories)
    pub fn retail() -> Self {
        retail::deployment()
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let deployment: Self = serde_json::from_str(text)?;
        deployment.validate()?;
        Ok(deployment)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn with_aliases(mut self, collection: impl Into<String>, table: AliasTable) -> Self {
        self.aliases.insert(collection.into(), table);
        self
    }

    pub fn with_relationship(mut self, fact: RelationshipFact) -> Self {
        self.relationships.push(fact);
        self
    }

    /// Reject alias chains, which would make rewriting order dependent.
    pub fn validate(&self) -> ConfigResult<()> {
        for (collection, table) in &self.aliases {
            table
                .check_chains()
                .map_err(|alias| {
                    ConfigError::Invalid(format!(
                        "alias '{}' in collection '{}' maps onto another alias",
                        alias, collection
                    ))
                })?;
        }
        for fact in &self.relationships {
            if fact.alias.is_empty() || fact.source_field.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "relationship {}.{} needs a source field and an alias",
                    fact.source_collection, fact.source_field
                )));
            }
        }
        Ok(())
    }

    pub fn aliases_for(&self, collection: &str) -> Option<&AliasTable> {
        self.aliases.get(collection)
    }

    /// Facts whose source is `collection`
    pub fn facts_for<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a RelationshipFact> + 'a {
        self.relationships
            .iter()
            .filter(move |fact| fact.source_collection == collection)
    }

    /// Fact from `source` to `target`, either direction not considered
    pub fn fact_between(&self, source: &str, target: &str) -> Option<&RelationshipFact> {
        self.relationships
            .iter()
            .find(|fact| fact.source_collection == source && fact.target_collection == target)
    }

    /// True if the two collections are joined by some fact
    pub fn related(&self, a: &str, b: &str) -> bool {
        a == b || self.fact_between(a, b).is_some() || self.fact_between(b, a).is_some()
    }

    /// Field names and paths that carry reference ids: `_id`, every fact's
    /// source path and source leaf, and every target field.
    pub fn id_fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        fields.insert("_id".to_string());
        for fact in &self.relationships {
            fields.insert(fact.source_field.clone());
            fields.insert(leaf_of(&fact.source_field).to_string());
            fields.insert(fact.target_field.clone());
        }
        fields
    }
}
