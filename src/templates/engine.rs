//! Intent matching over natural-language text

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deployment::{Deployment, RelationshipFact};
use crate::plan::QueryPlan;

use super::catalogue::{Template, CATALOGUE};
use super::visualization::{build_visualization, ChartType, VisualizationPlan};

/// Phrases that mark a multi-part analytical ask. Any of them disables
/// every template so the request goes through candidate generation.
pub const TOO_COMPLEX_MARKERS: &[&str] = &[
    "compare",
    "versus",
    " vs ",
    " vs. ",
    "correlat",
    "year over year",
    "percentage of",
    "breakdown by",
    "as well as",
    " and also ",
];

/// Collection and field names the templates are written against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateFields {
    pub orders: String,
    pub customers: String,
    pub products: String,
    pub categories: String,
    pub order_date: String,
    pub order_total: String,
    pub order_status: String,
    /// Quantity field inside each order line item
    pub item_quantity: String,
    pub product_stock: String,
    pub product_country: String,
    /// Location paths on a customer document, checked in order
    pub customer_location: Vec<String>,
    /// Known order status values
    pub statuses: Vec<String>,
    pub delivered_status: String,
}

impl Default for TemplateFields {
    fn default() -> Self {
        let owned = |names: &[&str]| names.iter().map(|n| n.to_string()).collect();
        Self {
            orders: "orders".into(),
            customers: "customers".into(),
            products: "products".into(),
            categories: "categories".into(),
            order_date: "order_date".into(),
            order_total: "total_amount".into(),
            order_status: "status".into(),
            item_quantity: "quantity".into(),
            product_stock: "stock".into(),
            product_country: "country".into(),
            customer_location: owned(&["address.city", "address.state", "address.country"]),
            statuses: owned(&[
                "pending",
                "processing",
                "shipped",
                "delivered",
                "cancelled",
                "canceled",
                "returned",
            ]),
            delivered_status: "delivered".into(),
        }
    }
}

/// A template that fired, and the plan it produced
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub name: &'static str,
    pub plan: QueryPlan,
}

/// Relationship facts the catalogue builds its joins from
pub(super) struct Context<'a> {
    pub fields: &'a TemplateFields,
    /// orders -> customers
    pub customer: Option<&'a RelationshipFact>,
    /// orders -> products
    pub product: Option<&'a RelationshipFact>,
    /// products -> categories
    pub category: Option<&'a RelationshipFact>,
}

/// The query text in both its original and lowercased forms
pub(super) struct QueryText<'a> {
    pub original: &'a str,
    pub lower: String,
}

impl<'a> QueryText<'a> {
    pub fn new(text: &'a str) -> Self {
        let original = text.trim();
        Self {
            original,
            lower: original.to_lowercase(),
        }
    }

    pub fn has(&self, phrase: &str) -> bool {
        self.lower.contains(phrase)
    }

    pub fn has_any(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|phrase| self.has(phrase))
    }

    pub fn has_word(&self, word: &str) -> bool {
        self.lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .any(|w| w == word)
    }

    fn is_too_complex(&self) -> bool {
        let padded = format!(" {} ", self.lower);
        TOO_COMPLEX_MARKERS.iter().any(|marker| padded.contains(marker))
    }
}

/// Compile once; a pattern that fails to compile never matches
pub(super) fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

/// First capture group of `regex`, cut at the first stop word.
///
/// Returns `None` when nothing matched, when the first captured word is in
/// `rejected_first`, or when the cut leaves nothing.
pub(super) fn capture_words(
    regex: Option<&Regex>,
    text: &str,
    rejected_first: &[&str],
    stop: &[&str],
) -> Option<String> {
    let captured = regex?.captures(text)?.get(1)?.as_str();
    let mut words = captured.split_whitespace().peekable();
    let first = words.peek()?.to_lowercase();
    if rejected_first.contains(&first.as_str()) {
        return None;
    }
    let kept: Vec<&str> = words
        .take_while(|word| !stop.contains(&word.to_lowercase().as_str()))
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(" "))
    }
}

/// Fixed catalogue of common intents with known-correct pipelines
///
/// Matching is deterministic: the same text and hint always produce the
/// same plan.
#[derive(Debug, Clone)]
pub struct RuleTemplateEngine {
    deployment: Arc<Deployment>,
    fields: TemplateFields,
    result_cap: i64,
}

impl RuleTemplateEngine {
    pub fn new(deployment: Arc<Deployment>, result_cap: i64) -> Self {
        Self {
            deployment,
            fields: TemplateFields::default(),
            result_cap,
        }
    }

    pub fn with_fields(mut self, fields: TemplateFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn fields(&self) -> &TemplateFields {
        &self.fields
    }

    pub fn result_cap(&self) -> i64 {
        self.result_cap
    }

    /// Template names in matching order
    pub fn template_names() -> Vec<&'static str> {
        CATALOGUE.iter().map(|template| template.name).collect()
    }

    /// True if `text` contains a marker that disables all templates
    pub fn is_too_complex(text: &str) -> bool {
        QueryText::new(text).is_too_complex()
    }

    /// First catalogue entry that fires on `text`.
    ///
    /// A template whose base collection is unrelated to `collection_hint`
    /// is skipped.
    pub fn match_query(&self, text: &str, collection_hint: Option<&str>) -> Option<TemplateMatch> {
        let query = QueryText::new(text);
        if query.lower.is_empty() || query.is_too_complex() {
            return None;
        }
        let context = self.context();

        CATALOGUE.iter().find_map(|template| {
            let base = (template.base)(&self.fields);
            if let Some(hint) = collection_hint {
                if !self.deployment.related(hint, base) {
                    return None;
                }
            }
            let stages = (template.build)(&context, &query)?;
            Some(self.instantiate(template, base, stages))
        })
    }

    /// Label/value chart plan for `text`
    pub fn visualization(
        &self,
        text: &str,
        chart_type: ChartType,
        collection_hint: Option<&str>,
    ) -> VisualizationPlan {
        build_visualization(&self.context(), text, chart_type, collection_hint)
    }

    fn context(&self) -> Context<'_> {
        let fields = &self.fields;
        Context {
            fields,
            customer: self.deployment.fact_between(&fields.orders, &fields.customers),
            product: self.deployment.fact_between(&fields.orders, &fields.products),
            category: self.deployment.fact_between(&fields.products, &fields.categories),
        }
    }

    fn instantiate(&self, template: &Template, base: &str, stages: Vec<Value>) -> TemplateMatch {
        let (stages, limit) = finalize(stages, self.result_cap);
        let mut plan = QueryPlan::aggregate(base, stages);
        plan.limit = limit;
        TemplateMatch {
            name: template.name,
            plan,
        }
    }
}

/// Keep only well-formed, non-empty stages; cap results when no stage
/// limits them.
fn finalize(stages: Vec<Value>, cap: i64) -> (Vec<Value>, Option<i64>) {
    let stages: Vec<Value> = stages
        .into_iter()
        .filter(|stage| {
            let Some(object) = stage.as_object() else {
                return false;
            };
            let mut entries = object.iter();
            match (entries.next(), entries.next()) {
                (Some((operator, argument)), None) => {
                    operator.starts_with('$')
                        && !argument.is_null()
                        && argument.as_object().map_or(true, |o| !o.is_empty())
                }
                _ => false,
            }
        })
        .collect();
    let limited = stages
        .iter()
        .any(|stage| stage.as_object().is_some_and(|o| o.contains_key("$limit")));
    let limit = if limited { None } else { Some(cap) };
    (stages, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> RuleTemplateEngine {
        RuleTemplateEngine::new(Arc::new(Deployment::retail()), 20)
    }

    #[test]
    fn test_too_complex_markers_suppress_matching() {
        assert!(RuleTemplateEngine::is_too_complex("Compare revenue per month"));
        assert!(RuleTemplateEngine::is_too_complex("orders vs returns"));
        assert!(!RuleTemplateEngine::is_too_complex("canvas orders"));
        assert!(engine()
            .match_query("total quantity sold per product as well as revenue", None)
            .is_none());
    }

    #[test]
    fn test_no_match_returns_none() {
        assert!(engine().match_query("who are you?", None).is_none());
        assert!(engine().match_query("   ", None).is_none());
    }

    #[test]
    fn test_unrelated_hint_skips_template() {
        let engine = engine();
        assert!(engine
            .match_query("total quantity sold per product", Some("orders"))
            .is_some());
        assert!(engine
            .match_query("total quantity sold per product", Some("movies"))
            .is_none());
    }

    #[test]
    fn test_finalize_drops_stray_stages_and_caps() {
        let (stages, limit) = finalize(
            vec![
                json!({"$match": {}}),
                json!("$unwind"),
                json!({"status": "delivered"}),
                json!({"$sort": {"a": 1}, "$limit": 3}),
                json!({"$sort": {"a": 1}}),
            ],
            20,
        );
        assert_eq!(stages, vec![json!({"$sort": {"a": 1}})]);
        assert_eq!(limit, Some(20));

        let (_, limit) = finalize(vec![json!({"$limit": 5})], 20);
        assert_eq!(limit, None);
    }

    #[test]
    fn test_capture_words_stops_and_rejects() {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let regex = cached(&PATTERN, r"(?i)\bfrom\s+(.+)");
        assert_eq!(
            capture_words(regex, "orders from Paris with status", &["last"], &["with"]),
            Some("Paris".to_string())
        );
        assert_eq!(capture_words(regex, "orders from last week", &["last"], &[]), None);
        assert_eq!(capture_words(regex, "no location", &[], &[]), None);
    }

    #[test]
    fn test_missing_facts_disable_join_templates() {
        let engine = RuleTemplateEngine::new(Arc::new(Deployment::empty()), 20);
        assert!(engine
            .match_query("orders for customer named Art with items", None)
            .is_none());
        assert_eq!(
            engine.match_query("orders by month", None).map(|m| m.name),
            Some("orders_by_month")
        );
    }

    #[test]
    fn test_template_names_in_order() {
        let names = RuleTemplateEngine::template_names();
        assert_eq!(names.first(), Some(&"customer_orders_with_items"));
        assert_eq!(names.len(), 8);
    }
}
