//! Guarded Pipeline Tests
//!
//! End-to-end behaviour of `QueryGuard` over an in-memory retail store:
//! - Aliased fields are rewritten before validation and execution
//! - Schema rejections carry the offending paths and are retryable
//! - Root replacement and `$elemMatch` stay under field checks
//! - Policy limits are enforced
//! - Enrichment adds names and never fails a request
//! - Template plans are deterministic and executable
//! - A database switch replaces the schema cache wholesale

use std::sync::Arc;

use mqlguard::store::InMemoryStore;
use mqlguard::validation::PlanOrigin;
use mqlguard::{
    CollectionPolicy, Deployment, GuardConfig, PolicySet, QueryGuard, RejectionCode,
};
use serde_json::{json, Value};

const ART: &str = "65a000000000000000000001";
const ADA: &str = "65a000000000000000000002";
const DESK: &str = "65b000000000000000000001";
const LAMP: &str = "65b000000000000000000002";
const OFFICE: &str = "65c000000000000000000001";

// =============================================================================
// Helper Functions
// =============================================================================

fn oid(hex: &str) -> Value {
    json!({"$oid": hex})
}

fn retail_store() -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new("shop"));
    store
        .insert_json(
            "customers",
            vec![
                json!({"_id": oid(ART), "first_name": "Art", "last_name": "Vandelay", "email": "art@example.com",
                       "address": {"city": "New York", "country": "USA"}}),
                json!({"_id": oid(ADA), "first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.com",
                       "address": {"city": "London", "country": "UK"}}),
            ],
        )
        .unwrap();
    store
        .insert_json(
            "categories",
            vec![json!({"_id": oid(OFFICE), "name": "Office"})],
        )
        .unwrap();
    store
        .insert_json(
            "products",
            vec![
                json!({"_id": oid(DESK), "name": "Desk", "price": 250, "stock": 4, "category": oid(OFFICE)}),
                json!({"_id": oid(LAMP), "name": "Lamp", "price": 30, "stock": 12, "category": oid(OFFICE)}),
                json!({"name": "Chair", "price": 90, "stock": 7, "category": oid(OFFICE)}),
            ],
        )
        .unwrap();
    store
        .insert_json(
            "orders",
            vec![
                json!({"user": oid(ART), "status": "delivered", "total_amount": 280,
                       "order_date": {"$date": "2025-11-03T10:00:00Z"},
                       "items": [{"product": oid(DESK), "quantity": 1, "price": 250},
                                 {"product": oid(LAMP), "quantity": 1, "price": 30}]}),
                json!({"user": oid(ADA), "status": "pending", "total_amount": 60,
                       "order_date": {"$date": "2025-12-01T09:30:00Z"},
                       "items": [{"product": oid(LAMP), "quantity": 2, "price": 30}]}),
                json!({"user": oid(ADA), "status": "delivered", "total_amount": 120,
                       "order_date": {"$date": "2025-12-15T16:45:00Z"},
                       "items": [{"product": oid(LAMP), "quantity": 4, "price": 30}]}),
            ],
        )
        .unwrap();
    store
}

fn guard_over(store: Arc<InMemoryStore>) -> QueryGuard {
    QueryGuard::new(store, Deployment::retail(), GuardConfig::default())
}

fn guard() -> QueryGuard {
    guard_over(retail_store())
}

// =============================================================================
// Alias Rewriting Tests
// =============================================================================

/// `total` is rewritten to `total_amount` before validation and execution.
#[tokio::test]
async fn test_aliased_filter_normalizes_validates_and_executes() {
    let guard = guard();
    let candidate = json!({"collection": "orders", "query": {"total": {"$gt": 100}}});

    let plan = guard.prepare(&candidate, None, None).await.unwrap();
    assert_eq!(
        plan.plan().to_document()["query"],
        json!({"total_amount": {"$gt": 100}})
    );

    let results = guard.execute(&plan).await.unwrap();
    let totals: Vec<&Value> = results.iter().map(|r| &r["total_amount"]).collect();
    assert_eq!(totals, vec![&json!(280), &json!(120)]);
}

/// Identifiers and datetimes come back as strings; names are added.
#[tokio::test]
async fn test_results_are_stringified_and_enriched() {
    let results = guard()
        .run(
            &json!({"collection": "orders", "query": {"status": "pending"}}),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    let order = &results[0];
    assert_eq!(order["user"], json!(ADA));
    assert!(order["_id"].is_string());
    assert!(order["order_date"].as_str().unwrap().starts_with("2025-12-01"));
    assert_eq!(order["customer_name"], json!("Ada Lovelace"));
    assert_eq!(order["items"][0]["product_name"], json!("Lamp"));
}

/// A string reference id in a filter is coerced before matching.
#[tokio::test]
async fn test_string_reference_id_is_coerced() {
    let results = guard()
        .run(
            &json!({"collection": "orders", "query": {"userId": ADA}}),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
}

// =============================================================================
// Schema Rejection Tests
// =============================================================================

/// A field absent from the sampled schema is rejected and may be retried.
#[tokio::test]
async fn test_unknown_field_rejected() {
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "query": {"customer.name": "Art"}}),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.code(), RejectionCode::InvalidField);
    assert_eq!(rejection.paths(), &["customer.name".to_string()]);
}

/// Fields introduced by a group stage are known to the stages after it.
#[tokio::test]
async fn test_group_outputs_are_known_downstream() {
    let candidate = json!({
        "collection": "orders",
        "operation": "aggregate",
        "pipeline": [
            {"$group": {"_id": "$status", "revenue": {"$sum": "$total"}}},
            {"$sort": {"revenue": -1}}
        ]
    });
    let results = guard().run(&candidate, None, None).await.unwrap();
    assert_eq!(results[0], json!({"_id": "delivered", "revenue": 400}));
}

/// A wrongly named join along a known relationship is repaired and runs.
#[tokio::test]
async fn test_join_repair_end_to_end() {
    let candidate = json!({
        "type": "database",
        "mql": {
            "collection": "orders",
            "operation": "aggregate",
            "pipeline": [
                {"$lookup": {"from": "users", "localField": "user", "foreignField": "_id", "as": "user_info"}},
                {"$unwind": "$user_info"},
                {"$match": {"user_info.name": "art"}},
                {"$project": {"total": 1, "who": "$user_info.email"}}
            ]
        }
    });
    let results = guard().run(&candidate, None, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["total_amount"], json!(280));
    assert_eq!(results[0]["who"], json!("art@example.com"));
}

/// Re-rooting on the current document does not switch off field checks.
#[tokio::test]
async fn test_current_root_does_not_hide_unknown_fields() {
    let candidate = json!({
        "collection": "orders",
        "operation": "aggregate",
        "pipeline": [
            {"$replaceRoot": {"newRoot": "$$ROOT"}},
            {"$match": {"totally_bogus_field": 1}},
            {"$sort": {"another_bogus": 1}}
        ]
    });
    let err = guard().prepare(&candidate, None, None).await.unwrap_err();
    assert!(err.is_retryable());
    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.code(), RejectionCode::InvalidField);
    assert_eq!(rejection.paths(), &["totally_bogus_field".to_string()]);
}

/// Re-rooting on an array field scopes later stages to its element keys,
/// with element aliases applied.
#[tokio::test]
async fn test_array_root_scoped_to_element_keys() {
    let candidate = json!({
        "collection": "orders",
        "operation": "aggregate",
        "pipeline": [
            {"$unwind": "$lineItems"},
            {"$replaceRoot": {"newRoot": "$lineItems"}},
            {"$match": {"qty": {"$gte": 2}}}
        ]
    });
    let guard = guard();
    let results = guard.run(&candidate, None, None).await.unwrap();
    let quantities: Vec<&Value> = results.iter().map(|r| &r["quantity"]).collect();
    assert_eq!(quantities, vec![&json!(2), &json!(4)]);

    let err = guard
        .prepare(
            &json!({"collection": "orders", "operation": "aggregate", "pipeline": [
                {"$replaceRoot": {"newRoot": "$items"}},
                {"$match": {"status": "pending"}}
            ]}),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().paths(), &["status".to_string()]);
}

/// `$elemMatch` keys are renamed through element aliases and checked
/// against the sampled element keys.
#[tokio::test]
async fn test_elem_match_keys_renamed_and_checked() {
    let guard = guard();
    let candidate = json!({
        "collection": "orders",
        "query": {"line_items": {"$elemMatch": {"qty": {"$gte": 2}, "price": 30}}}
    });
    let plan = guard.prepare(&candidate, None, None).await.unwrap();
    assert_eq!(
        plan.plan().to_document()["query"],
        json!({"items": {"$elemMatch": {"quantity": {"$gte": 2}, "price": 30}}})
    );
    assert_eq!(guard.execute(&plan).await.unwrap().len(), 2);

    let err = guard
        .prepare(
            &json!({"collection": "orders", "query": {"items": {"$elemMatch": {"sku": "A-1"}}}}),
            None,
            None,
        )
        .await
        .unwrap_err();
    let rejection = err.rejection().unwrap();
    assert_eq!(rejection.code(), RejectionCode::InvalidField);
    assert_eq!(rejection.paths(), &["items.sku".to_string()]);
}

// =============================================================================
// Policy Tests
// =============================================================================

/// limit 500 under maxLimit 100 is rejected as LimitExceeded.
#[tokio::test]
async fn test_limit_above_policy_maximum() {
    let policies = PolicySet::new()
        .with(CollectionPolicy::new("*").in_database("*"))
        .with_max_limit(100);
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "query": {}, "limit": 500}),
            Some(&policies),
            None,
        )
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::LimitExceeded);
}

// =============================================================================
// Failure Handling Tests
// =============================================================================

/// An enrichment failure degrades to unenriched results.
#[tokio::test]
async fn test_enrichment_failure_is_not_fatal() {
    let store = retail_store();
    let guard = guard_over(Arc::clone(&store));
    store.set_unavailable("customers", true);

    let results = guard
        .run(&json!({"collection": "orders", "query": {"status": "pending"}}), None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].get("customer_name").is_none());
}

/// A store failure during execution propagates unchanged.
#[tokio::test]
async fn test_store_failure_propagates() {
    let store = retail_store();
    let guard = guard_over(Arc::clone(&store));
    store.set_unavailable("orders", true);

    let err = guard
        .run(&json!({"collection": "orders", "query": {}}), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "STORE_UNAVAILABLE");
    assert!(!err.is_retryable());
}

// =============================================================================
// Template Tests
// =============================================================================

/// The same intent yields the same plan every time.
#[tokio::test]
async fn test_template_determinism() {
    let guard = guard();
    let mut rendered = Vec::new();
    for _ in 0..10 {
        let plan = guard
            .prepare_template("total quantity sold per product", None, None)
            .await
            .unwrap()
            .unwrap();
        rendered.push(serde_json::to_string(&plan.plan().to_document()).unwrap());
    }
    assert!(rendered.windows(2).all(|pair| pair[0] == pair[1]));
}

/// Template plans execute without schema validation.
#[tokio::test]
async fn test_template_plan_executes() {
    let guard = guard();
    let plan = guard
        .prepare_template("total quantity sold per product", None, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plan.origin(), &PlanOrigin::Template("quantity_sold_per_product"));

    let results = guard.execute(&plan).await.unwrap();
    assert_eq!(results[0]["product_name"], json!("Lamp"));
    assert_eq!(results[0]["total_quantity"], json!(7));
    assert_eq!(results[1]["product_name"], json!("Desk"));
}

/// Templates still pass the permission check.
#[tokio::test]
async fn test_template_plan_is_policy_checked() {
    let policies = PolicySet::new().with(CollectionPolicy::new("orders").in_database("shop"));
    let err = guard()
        .prepare_template("total quantity sold per product", Some(&policies), None)
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::OperationNotAllowed);
}

/// Products nobody ordered.
#[tokio::test]
async fn test_products_never_ordered() {
    let guard = guard();
    let plan = guard
        .prepare_template("products that have never been ordered", None, None)
        .await
        .unwrap()
        .unwrap();
    let results = guard.execute(&plan).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["name"], json!("Chair"));
}

// =============================================================================
// Database Switch Tests
// =============================================================================

/// Switching databases replaces cached schemas and the catalogue.
#[tokio::test]
async fn test_switch_database() {
    let guard = guard();
    guard.preload().await;
    assert!(guard.schemas().cached("orders").await.is_some());

    let archive = Arc::new(InMemoryStore::new("archive"));
    archive
        .insert_json("invoices", vec![json!({"number": 7, "amount": 10})])
        .unwrap();
    guard.switch_database(archive).await;

    assert_eq!(guard.database().await, "archive");
    let err = guard
        .prepare(&json!({"collection": "orders", "query": {}}), None, None)
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::UnknownCollection);

    let results = guard
        .run(&json!({"collection": "invoices", "query": {"number": 7}}), None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}
