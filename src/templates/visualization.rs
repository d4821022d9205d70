//! Chart plans
//!
//! Every chart pipeline ends in `{label, value}` rows, sorted by value and
//! capped at ten.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::plan::QueryPlan;

use super::catalogue::{display_expression, field, lookup, unwind};
use super::engine::Context;

const CHART_ROWS: i64 = 10;
const TITLE_MAX: usize = 50;
const TITLE_KEEP: usize = 47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Doughnut,
}

impl ChartType {
    /// Unknown names fall back to a bar chart
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "line" => ChartType::Line,
            "pie" => ChartType::Pie,
            "doughnut" | "donut" => ChartType::Doughnut,
            _ => ChartType::Bar,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Doughnut => "doughnut",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationPlan {
    pub chart_type: ChartType,
    pub title: String,
    pub x_key: &'static str,
    pub y_key: &'static str,
    pub plan: QueryPlan,
}

impl VisualizationPlan {
    /// Response document with the plan under `mql`
    pub fn to_document(&self) -> Value {
        json!({
            "type": "visualization",
            "chart_type": self.chart_type.as_str(),
            "title": self.title,
            "x_key": self.x_key,
            "y_key": self.y_key,
            "mql": self.plan.to_document(),
        })
    }
}

/// Chart title from the query text: first letter upper-cased, the rest
/// lower-cased, long titles cut with an ellipsis.
pub fn chart_title(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    let title: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    };
    if title.chars().count() > TITLE_MAX {
        let kept: String = title.chars().take(TITLE_KEEP).collect();
        format!("{}...", kept)
    } else {
        title
    }
}

fn label_value_tail() -> [Value; 3] {
    [
        json!({"$project": {"_id": 0, "label": "$_id", "value": 1}}),
        json!({"$sort": {"value": -1}}),
        json!({"$limit": CHART_ROWS}),
    ]
}

fn grouped_count(key: Value) -> Value {
    json!({"$group": {"_id": key, "value": {"$sum": 1}}})
}

pub(super) fn build_visualization(
    ctx: &Context<'_>,
    text: &str,
    chart_type: ChartType,
    collection_hint: Option<&str>,
) -> VisualizationPlan {
    let lower = text.to_lowercase();
    let f = ctx.fields;
    let mentions_category = lower.contains("category") || lower.contains("categories");

    let collection = match collection_hint {
        Some(hint) => hint.to_string(),
        None if lower.contains("product") => f.products.clone(),
        None if lower.contains("order") => f.orders.clone(),
        None if lower.contains("customer") => f.customers.clone(),
        None if mentions_category => f.categories.clone(),
        None => f.products.clone(),
    };

    let mut stages = Vec::new();
    match (ctx.category, ctx.customer) {
        (Some(category), _) if collection == f.products && mentions_category => {
            stages.push(lookup(category));
            stages.push(unwind(&category.alias, true));
            stages.push(grouped_count(display_expression(category)));
            stages.extend(label_value_tail());
        }
        (_, Some(customer)) if collection == f.orders && lower.contains("customer") => {
            stages.push(lookup(customer));
            stages.push(unwind(&customer.alias, true));
            stages.push(grouped_count(display_expression(customer)));
            stages.extend(label_value_tail());
        }
        (Some(category), _) if collection == f.categories => {
            let label = match category.display.as_ref().and_then(|d| d.fields().first().copied()) {
                Some(name) => field(name),
                None => field(&category.target_field),
            };
            stages.push(json!({"$lookup": {
                "from": category.source_collection,
                "localField": category.target_field,
                "foreignField": category.source_field,
                "as": category.source_collection,
            }}));
            stages.push(json!({"$project": {
                "_id": 0,
                "label": label,
                "value": {"$size": field(&category.source_collection)},
            }}));
            stages.push(json!({"$sort": {"value": -1}}));
            stages.push(json!({"$limit": CHART_ROWS}));
        }
        _ => {
            let key = if lower.contains("name") {
                "$name"
            } else if lower.contains("status") {
                "$status"
            } else {
                "$_id"
            };
            stages.push(grouped_count(json!(key)));
            stages.extend(label_value_tail());
        }
    }

    VisualizationPlan {
        chart_type,
        title: chart_title(text),
        x_key: "label",
        y_key: "value",
        plan: QueryPlan::aggregate(collection, stages),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::deployment::Deployment;
    use crate::templates::RuleTemplateEngine;

    fn chart(text: &str, hint: Option<&str>) -> VisualizationPlan {
        RuleTemplateEngine::new(Arc::new(Deployment::retail()), 20).visualization(
            text,
            ChartType::Bar,
            hint,
        )
    }

    #[test]
    fn test_products_by_category_joins_names() {
        let plan = chart("bar chart of products by category", None);
        assert_eq!(plan.plan.collection, "products");
        assert_eq!(plan.plan.pipeline[0]["$lookup"]["from"], json!("categories"));
        assert_eq!(plan.plan.pipeline[2]["$group"]["_id"], json!("$category_info.name"));
        assert_eq!(plan.plan.pipeline.last(), Some(&json!({"$limit": 10})));
    }

    #[test]
    fn test_orders_by_customer_uses_full_name() {
        let plan = chart("orders per customer", None);
        assert_eq!(plan.plan.collection, "orders");
        assert!(plan.plan.pipeline[2]["$group"]["_id"]["$concat"].is_array());
    }

    #[test]
    fn test_categories_by_product_count() {
        let plan = chart("categories with most items", None);
        assert_eq!(plan.plan.collection, "categories");
        assert_eq!(
            plan.plan.pipeline[1]["$project"],
            json!({"_id": 0, "label": "$name", "value": {"$size": "$products"}})
        );
    }

    #[test]
    fn test_generic_fallback_groups_by_status() {
        let plan = chart("orders status distribution", Some("orders"));
        assert_eq!(plan.plan.pipeline[0], json!({"$group": {"_id": "$status", "value": {"$sum": 1}}}));
        assert_eq!(plan.x_key, "label");
        assert_eq!(plan.y_key, "value");
    }

    #[test]
    fn test_chart_title() {
        assert_eq!(chart_title("  revenue BY Status "), "Revenue by status");
        let long = "a".repeat(60);
        let title = chart_title(&long);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
        assert_eq!(chart_title(""), "");
    }

    #[test]
    fn test_chart_type_parse() {
        assert_eq!(ChartType::parse("PIE"), ChartType::Pie);
        assert_eq!(ChartType::parse("donut"), ChartType::Doughnut);
        assert_eq!(ChartType::parse("scatter"), ChartType::Bar);
        assert_eq!(
            serde_json::to_value(ChartType::Line).unwrap(),
            json!("line")
        );
    }
}
