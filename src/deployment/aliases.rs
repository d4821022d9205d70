//! Per-collection alias tables

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::plan::paths::{leaf_of, root_of};

/// Field-name synonyms for one collection.
///
/// `fields` rewrites the root segment of a path, `leaves` the last segment
/// of a dotted path. Middle segments are never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub leaves: BTreeMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map each of `aliases` onto `canonical` as a root field
    pub fn with_fields(mut self, canonical: &str, aliases: &[&str]) -> Self {
        for alias in aliases {
            self.fields.insert(alias.to_string(), canonical.to_string());
        }
        self
    }

    /// Map each of `aliases` onto `canonical` as a dotted-path leaf
    pub fn with_leaves(mut self, canonical: &str, aliases: &[&str]) -> Self {
        for alias in aliases {
            self.leaves.insert(alias.to_string(), canonical.to_string());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.leaves.is_empty()
    }

    /// Canonical form of `path`, or `None` when nothing changes
    pub fn rename_path(&self, path: &str) -> Option<String> {
        let mut segments: Vec<&str> = path.split('.').collect();
        let mut changed = false;

        if let Some(canonical) = self.fields.get(segments[0]) {
            segments[0] = canonical.as_str();
            changed = true;
        }
        if segments.len() > 1 {
            let last = segments.len() - 1;
            if let Some(canonical) = self.leaves.get(segments[last]) {
                segments[last] = canonical.as_str();
                changed = true;
            }
        }

        if changed {
            Some(segments.join("."))
        } else {
            None
        }
    }

    /// Returns the first alias whose canonical name is itself an alias
    pub(crate) fn check_chains(&self) -> Result<(), String> {
        for (alias, canonical) in &self.fields {
            if self.fields.contains_key(root_of(canonical))
                || (canonical.contains('.') && self.leaves.contains_key(leaf_of(canonical)))
            {
                return Err(alias.clone());
            }
        }
        for (alias, canonical) in &self.leaves {
            if self.leaves.contains_key(canonical.as_str()) {
                return Err(alias.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AliasTable {
        AliasTable::new()
            .with_fields("total_amount", &["total", "amount"])
            .with_fields("address.city", &["city"])
            .with_leaves("product", &["product_id", "productId"])
    }

    #[test]
    fn test_root_rename() {
        assert_eq!(table().rename_path("total"), Some("total_amount".into()));
        assert_eq!(table().rename_path("city"), Some("address.city".into()));
        assert_eq!(table().rename_path("total_amount"), None);
    }

    #[test]
    fn test_leaf_rename_only_on_dotted_paths() {
        assert_eq!(table().rename_path("items.product_id"), Some("items.product".into()));
        assert_eq!(table().rename_path("product_id"), None);
    }

    #[test]
    fn test_middle_segments_untouched() {
        assert_eq!(table().rename_path("a.total.b"), None);
    }

    #[test]
    fn test_rename_is_idempotent() {
        let table = table();
        for path in ["total", "city", "items.productId", "amount.product_id"] {
            let once = table.rename_path(path).unwrap();
            assert_eq!(table.rename_path(&once), None, "{} renamed twice", path);
        }
    }

    #[test]
    fn test_chain_detection() {
        let chained = AliasTable::new()
            .with_fields("amount", &["total"])
            .with_fields("total_amount", &["amount"]);
        assert!(chained.check_chains().is_err());
        assert!(table().check_chains().is_ok());
    }
}
