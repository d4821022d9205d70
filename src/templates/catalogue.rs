//! Template catalogue
//!
//! Each entry recognizes one intent and builds its pipeline from the
//! deployment's relationship facts. Entries are tried in order.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::deployment::{full_name_condition, DisplayName, RelationshipFact};
use crate::plan::paths::root_of;

use super::engine::{cached, capture_words, Context, QueryText, TemplateFields};

pub(super) struct Template {
    pub name: &'static str,
    pub base: fn(&TemplateFields) -> &str,
    pub build: fn(&Context<'_>, &QueryText<'_>) -> Option<Vec<Value>>,
}

pub(super) const CATALOGUE: &[Template] = &[
    Template {
        name: "customer_orders_with_items",
        base: orders,
        build: customer_orders_with_items,
    },
    Template {
        name: "products_never_ordered",
        base: products,
        build: products_never_ordered,
    },
    Template {
        name: "quantity_sold_per_product",
        base: orders,
        build: quantity_sold_per_product,
    },
    Template {
        name: "orders_by_month",
        base: orders,
        build: orders_by_month,
    },
    Template {
        name: "delivered_revenue_and_units",
        base: orders,
        build: delivered_revenue_and_units,
    },
    Template {
        name: "stock_per_category",
        base: products,
        build: stock_per_category,
    },
    Template {
        name: "recent_orders",
        base: orders,
        build: recent_orders,
    },
    Template {
        name: "orders_from_location",
        base: orders,
        build: orders_from_location,
    },
];

const DEFAULT_RECENT: i64 = 10;
const ORDER_REFS: &str = "order_refs";

const NEVER_ORDERED: &[&str] = &[
    "never ordered",
    "never been ordered",
    "not been ordered",
    "not ordered",
    "zero orders",
    "no orders",
    "without orders",
    "without any orders",
    "never sold",
    "unsold",
];
const QUANTITY_SOLD: &[&str] = &[
    "quantity sold",
    "quantities sold",
    "units sold",
    "items sold",
    "sold per product",
    "sold by product",
];
const MONTHLY: &[&str] = &["by month", "per month", "monthly", "each month", "every month"];
const UNIT_WORDS: &[&str] = &["unit", "quantity", "product count", "items", "products"];
const PER_CATEGORY: &[&str] = &["per category", "by category", "each category", "categor"];
const BY_COUNTRY: &[&str] = &["by country", "per country", "each country"];

const NAME_STOP: &[&str] = &[
    "with", "and", "including", "items", "products", "their", "who", "that", "orders", "showing",
];
const PLACE_STOP: &[&str] = &[
    "with", "and", "by", "sorted", "in", "for", "including", "showing", "grouped", "per",
];
const NOT_A_PLACE: &[&str] = &[
    "last", "this", "the", "past", "previous", "next", "today", "yesterday", "customer",
    "customers", "each", "every", "all", "my", "our", "january", "february", "march", "april",
    "may", "june", "july", "august", "september", "october", "november", "december", "stock",
    "category", "categories",
];

static NAMED_CUSTOMER: OnceLock<Option<Regex>> = OnceLock::new();
static RECENT: OnceLock<Option<Regex>> = OnceLock::new();
static ORDER_PLACE: OnceLock<Option<Regex>> = OnceLock::new();
static IN_PLACE: OnceLock<Option<Regex>> = OnceLock::new();

fn orders(fields: &TemplateFields) -> &str {
    &fields.orders
}

fn products(fields: &TemplateFields) -> &str {
    &fields.products
}

pub(super) fn lookup(fact: &RelationshipFact) -> Value {
    json!({"$lookup": {
        "from": fact.target_collection,
        "localField": fact.source_field,
        "foreignField": fact.target_field,
        "as": fact.alias,
    }})
}

pub(super) fn unwind(path: &str, preserve_empty: bool) -> Value {
    json!({"$unwind": {"path": format!("${}", path), "preserveNullAndEmptyArrays": preserve_empty}})
}

pub(super) fn field(path: &str) -> String {
    format!("${}", path)
}

pub(super) fn joined(alias: &str, name: &str) -> String {
    format!("{}.{}", alias, name)
}

/// Expression rendering a joined document's display name
pub(super) fn display_expression(fact: &RelationshipFact) -> Value {
    match &fact.display {
        Some(DisplayName::FullName { first, last }) => json!({"$concat": [
            {"$ifNull": [field(&joined(&fact.alias, first)), ""]},
            " ",
            {"$ifNull": [field(&joined(&fact.alias, last)), ""]},
        ]}),
        Some(DisplayName::Field { field: name }) => json!(field(&joined(&fact.alias, name))),
        None => json!(field(&joined(&fact.alias, &fact.target_field))),
    }
}

fn anchored(text: &str) -> Value {
    json!({"$regex": format!("^{}$", regex::escape(text)), "$options": "i"})
}

fn customer_orders_with_items(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    if !text.has("order") {
        return None;
    }
    let customer = ctx.customer?;
    let product = ctx.product?;
    let (first, last) = customer.full_name_fields()?;
    let name = capture_words(
        cached(
            &NAMED_CUSTOMER,
            r"(?i)\b(?:customer|user|client)s?\s+(?:named|called)\s+([a-z][a-z'.-]*(?:\s+[a-z][a-z'.-]*)?)",
        ),
        text.original,
        &[],
        NAME_STOP,
    )?;
    let f = ctx.fields;
    let items = root_of(&product.source_field);
    let product_name = match &product.display {
        Some(DisplayName::Field { field: shown }) => field(&joined(&product.alias, shown)),
        _ => field(&joined(&product.alias, &product.target_field)),
    };

    Some(vec![
        lookup(customer),
        unwind(&customer.alias, false),
        json!({"$match": full_name_condition(&customer.alias, first, last, &name, false)}),
        json!({"$sort": {f.order_date.as_str(): -1}}),
        unwind(items, true),
        lookup(product),
        unwind(&product.alias, true),
        json!({"$group": {
            "_id": "$_id",
            f.order_date.as_str(): {"$first": field(&f.order_date)},
            f.order_total.as_str(): {"$first": field(&f.order_total)},
            f.order_status.as_str(): {"$first": field(&f.order_status)},
            "customer_name": {"$first": display_expression(customer)},
            "product_names": {"$addToSet": product_name},
        }}),
        json!({"$sort": {f.order_date.as_str(): -1}}),
    ])
}

fn products_never_ordered(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    if !text.has("product") || !text.has_any(NEVER_ORDERED) {
        return None;
    }
    let product = ctx.product?;
    Some(vec![
        json!({"$lookup": {
            "from": product.source_collection,
            "localField": product.target_field,
            "foreignField": product.source_field,
            "as": ORDER_REFS,
        }}),
        json!({"$match": {ORDER_REFS: {"$size": 0}}}),
        json!({"$project": {ORDER_REFS: 0}}),
    ])
}

fn quantity_sold_per_product(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    if !text.has("product") || !text.has_any(QUANTITY_SOLD) {
        return None;
    }
    let product = ctx.product?;
    let items = root_of(&product.source_field);
    let quantity = joined(items, &ctx.fields.item_quantity);
    let target = RelationshipFact {
        source_field: "_id".to_string(),
        ..product.clone()
    };

    Some(vec![
        json!({"$unwind": field(items)}),
        json!({"$group": {
            "_id": field(&product.source_field),
            "total_quantity": {"$sum": field(&quantity)},
        }}),
        lookup(&target),
        unwind(&product.alias, true),
        json!({"$project": {
            "_id": 0,
            "product_id": "$_id",
            "product_name": display_expression(product),
            "total_quantity": 1,
        }}),
        json!({"$sort": {"total_quantity": -1}}),
    ])
}

fn status_in(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<String> {
    ctx.fields
        .statuses
        .iter()
        .find(|status| text.has_word(status))
        .cloned()
}

fn orders_by_month(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    if !text.has("order") || !text.has_any(MONTHLY) {
        return None;
    }
    let f = ctx.fields;
    let mut stages = Vec::new();
    if let Some(status) = status_in(ctx, text) {
        stages.push(json!({"$match": {f.order_status.as_str(): status}}));
    }
    stages.push(json!({"$group": {
        "_id": {
            "year": {"$year": field(&f.order_date)},
            "month": {"$month": field(&f.order_date)},
        },
        "order_count": {"$sum": 1},
        "revenue": {"$sum": field(&f.order_total)},
    }}));
    stages.push(json!({"$sort": {"_id.year": 1, "_id.month": 1}}));
    Some(stages)
}

fn delivered_revenue_and_units(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    let f = ctx.fields;
    if !text.has_word(&f.delivered_status) || !text.has("revenue") || !text.has_any(UNIT_WORDS) {
        return None;
    }
    let product = ctx.product?;
    let items = root_of(&product.source_field);
    let quantity = joined(items, &f.item_quantity);

    // Revenue is summed before unwinding so each order counts once.
    Some(vec![
        json!({"$match": {f.order_status.as_str(): f.delivered_status}}),
        json!({"$facet": {
            "revenue": [
                {"$group": {"_id": null, "totalRevenue": {"$sum": field(&f.order_total)}}}
            ],
            "products": [
                {"$unwind": field(items)},
                {"$group": {"_id": null, "totalProductCount": {"$sum": field(&quantity)}}}
            ],
        }}),
        json!({"$project": {
            "totalRevenue": {"$round": [{"$arrayElemAt": ["$revenue.totalRevenue", 0]}, 2]},
            "totalProductCount": {"$arrayElemAt": ["$products.totalProductCount", 0]},
        }}),
    ])
}

fn stock_per_category(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    if !text.has_any(&["stock", "inventory"]) || !text.has_any(PER_CATEGORY) {
        return None;
    }
    let category = ctx.category?;
    let f = ctx.fields;
    let by_country = text.has_any(BY_COUNTRY);

    let mut stages = Vec::new();
    if !by_country {
        let country = capture_words(
            cached(
                &IN_PLACE,
                r"(?i)\b(?:in|from)\s+([a-z][a-z.'-]*(?:\s+[a-z][a-z.'-]*)?)",
            ),
            text.original,
            NOT_A_PLACE,
            PLACE_STOP,
        );
        if let Some(country) = country {
            stages.push(json!({"$match": {f.product_country.as_str(): anchored(&country)}}));
        }
    }
    let category_name = display_expression(category);
    let key = if by_country {
        json!({"category": category_name, "country": field(&f.product_country)})
    } else {
        category_name
    };
    stages.extend([
        lookup(category),
        unwind(&category.alias, true),
        json!({"$group": {
            "_id": key,
            "total_stock": {"$sum": field(&f.product_stock)},
            "product_count": {"$sum": 1},
        }}),
        json!({"$sort": {"total_stock": -1}}),
    ]);
    Some(stages)
}

fn recent_orders(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    let captures = cached(
        &RECENT,
        r"(?i)\b(?:last|latest|most\s+recent|recent|newest)\s+(?:(\d{1,4})\s+)?orders?\b",
    )?
    .captures(text.original)?;
    let count = match captures.get(1) {
        Some(digits) => digits.as_str().parse::<i64>().ok().filter(|n| *n > 0)?,
        None => DEFAULT_RECENT,
    };
    let f = ctx.fields;
    let mut projection = Map::new();
    for name in [&f.order_date, &f.order_status, &f.order_total] {
        projection.insert(name.clone(), json!(1));
    }
    if let Some(customer) = ctx.customer {
        projection.insert(customer.source_field.clone(), json!(1));
    }

    Some(vec![
        json!({"$sort": {f.order_date.as_str(): -1}}),
        json!({"$limit": count}),
        json!({"$project": projection}),
    ])
}

fn orders_from_location(ctx: &Context<'_>, text: &QueryText<'_>) -> Option<Vec<Value>> {
    let place = capture_words(
        cached(
            &ORDER_PLACE,
            r"(?i)\borders?\s+(?:placed\s+)?(?:from|in|shipped\s+to)\s+([a-z][a-z.'-]*(?:\s+[a-z][a-z.'-]*)?)",
        ),
        text.original,
        NOT_A_PLACE,
        PLACE_STOP,
    )?;
    let customer = ctx.customer?;
    let f = ctx.fields;
    let branches: Vec<Value> = f
        .customer_location
        .iter()
        .map(|path| json!({joined(&customer.alias, path): anchored(&place)}))
        .collect();
    if branches.is_empty() {
        return None;
    }

    Some(vec![
        lookup(customer),
        unwind(&customer.alias, false),
        json!({"$match": {"$or": branches}}),
        json!({"$project": {
            f.order_date.as_str(): 1,
            f.order_status.as_str(): 1,
            f.order_total.as_str(): 1,
            "customer_name": display_expression(customer),
        }}),
        json!({"$sort": {f.order_date.as_str(): -1}}),
    ])
}
