//! Policy and Safety Tests
//!
//! - The most specific policy wins regardless of declaration order
//! - Denylisted operators and write operations are rejected with no
//!   policy, and under a permissive one
//! - Restricted fields are refused wherever the plan touches them
//! - Natural-language input is screened before template matching
//! - Configuration files load with defaults and reject bad values

use std::io::Write;
use std::sync::Arc;

use mqlguard::config::ConfigError;
use mqlguard::policy::PermissionValidator;
use mqlguard::safety::{sanitize_query, validate_natural_query, InputError, SafetyValidator, DENYLIST};
use mqlguard::store::InMemoryStore;
use mqlguard::validation::RejectionKind;
use mqlguard::{
    CollectionPolicy, Deployment, GuardConfig, PolicySet, QueryGuard, QueryPlan, RejectionCode,
};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

fn guard() -> QueryGuard {
    let store = Arc::new(InMemoryStore::new("shop"));
    store
        .insert_json(
            "orders",
            vec![
                json!({"status": "pending", "total_amount": 60, "note": "gift"}),
                json!({"status": "delivered", "total_amount": 280, "note": "rush"}),
            ],
        )
        .unwrap();
    store
        .insert_json(
            "customers",
            vec![json!({"first_name": "Ada", "last_name": "Lovelace", "email": "ada@example.com"})],
        )
        .unwrap();
    QueryGuard::new(store, Deployment::empty(), GuardConfig::default())
}

fn permissive() -> PolicySet {
    PolicySet::new().with(
        CollectionPolicy::new("*")
            .in_database("*")
            .with_operations(&["*"]),
    )
}

// =============================================================================
// Precedence Tests
// =============================================================================

/// (db, coll) beats (db, *) whichever is declared first.
#[test]
fn test_exact_policy_wins_in_any_order() {
    let wide = CollectionPolicy::new("*").in_database("shop").with_operations(&["find"]);
    let exact = CollectionPolicy::new("orders")
        .in_database("shop")
        .with_operations(&["aggregate"]);

    for policies in [
        PolicySet::new().with(wide.clone()).with(exact.clone()),
        PolicySet::new().with(exact.clone()).with(wide.clone()),
    ] {
        let resolved = PermissionValidator::resolve(&policies, Some("shop"), "orders").unwrap();
        assert_eq!(resolved.operations, vec!["aggregate"]);
    }
}

/// A collection matched by no policy is denied once a policy set exists.
#[tokio::test]
async fn test_unmatched_collection_denied() {
    let policies = PolicySet::new().with(CollectionPolicy::new("customers").in_database("shop"));
    let err = guard()
        .prepare(&json!({"collection": "orders", "query": {}}), Some(&policies), None)
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::OperationNotAllowed);
    assert!(!err.is_security_violation());
}

/// Without a policy set every read is allowed.
#[tokio::test]
async fn test_no_policy_accepts_reads() {
    let results = guard()
        .run(&json!({"collection": "orders", "query": {"status": "pending"}}), None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}

/// An aggregate on a find-only policy is refused.
#[tokio::test]
async fn test_operation_outside_policy_denied() {
    let policies = PolicySet::new().with(CollectionPolicy::new("orders").in_database("shop"));
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "operation": "aggregate", "pipeline": [{"$match": {"status": "pending"}}]}),
            Some(&policies),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::OperationNotAllowed);
}

// =============================================================================
// Limit Tests
// =============================================================================

/// A `$limit` stage is held to the same maximum as a top-level limit.
#[tokio::test]
async fn test_limit_stage_checked() {
    let policies = permissive().with_max_limit(10);
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "operation": "aggregate", "pipeline": [{"$limit": 50}]}),
            Some(&policies),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::LimitExceeded);
}

/// Limits inside facet branches and written as strings are held to the
/// same maximum.
#[tokio::test]
async fn test_nested_and_string_limits_checked() {
    let policies = permissive().with_max_limit(10);
    let guard = guard();
    for pipeline in [
        json!([{"$facet": {"a": [{"$limit": 500}]}}]),
        json!([{"$limit": "500"}]),
    ] {
        let err = guard
            .prepare(
                &json!({"collection": "orders", "operation": "aggregate", "pipeline": pipeline}),
                Some(&policies),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.rejection().unwrap().code(), RejectionCode::LimitExceeded);
    }
}

/// A per-collection maxLimit overrides the set-wide one.
#[tokio::test]
async fn test_collection_max_limit_overrides() {
    let policies = PolicySet::new()
        .with(CollectionPolicy::new("orders").in_database("shop").with_max_limit(500))
        .with_max_limit(10);
    let plan = guard()
        .prepare(&json!({"collection": "orders", "query": {}, "limit": 200}), Some(&policies), None)
        .await
        .unwrap();
    assert_eq!(plan.plan().limit, Some(200));
}

// =============================================================================
// Restricted Field Tests
// =============================================================================

/// Restricted fields are refused in filters, projections, sorts and stages.
#[tokio::test]
async fn test_restricted_field_everywhere() {
    let policies = PolicySet::new().with(
        CollectionPolicy::new("customers")
            .in_database("shop")
            .with_operations(&["find", "aggregate"])
            .with_restricted_fields(&["email"]),
    );
    let guard = guard();
    let candidates = [
        json!({"collection": "customers", "query": {"email": "ada@example.com"}}),
        json!({"collection": "customers", "projection": {"email": 1}}),
        json!({"collection": "customers", "query": {}, "sort": {"email": 1}}),
        json!({"collection": "customers", "operation": "aggregate",
               "pipeline": [{"$project": {"contact": "$email"}}]}),
    ];
    for candidate in candidates {
        let err = guard.prepare(&candidate, Some(&policies), None).await.unwrap_err();
        assert_eq!(
            err.rejection().unwrap().code(),
            RejectionCode::RestrictedField,
            "accepted {}",
            candidate
        );
    }

    let allowed = guard
        .prepare(
            &json!({"collection": "customers", "projection": {"first_name": 1, "email": 0}}),
            Some(&policies),
            None,
        )
        .await;
    assert!(allowed.is_ok());
}

// =============================================================================
// Safety Tests
// =============================================================================

/// Every denylisted operator is rejected with no policy involved.
#[test]
fn test_denylist_rejected_without_policy() {
    let validator = SafetyValidator::new();
    for operator in DENYLIST {
        let plan = QueryPlan::aggregate("orders", vec![json!({ *operator: "x" })]);
        let err = validator.validate(&plan).unwrap_err();
        assert_eq!(err.code(), RejectionCode::UnsafeOperator, "allowed {}", operator);
        assert_eq!(err.kind(), RejectionKind::Safety);
    }
}

/// A wildcard policy allowing everything does not unlock `$out`.
#[tokio::test]
async fn test_permissive_policy_cannot_unlock_out() {
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "operation": "aggregate", "pipeline": [
                {"$match": {"status": "pending"}},
                {"$out": "x"}
            ]}),
            Some(&permissive()),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::UnsafeOperator);
    assert!(err.is_security_violation());
    assert!(!err.is_retryable());
}

/// `$where` hidden in a filter is rejected with no policy set.
#[tokio::test]
async fn test_where_rejected_without_policy() {
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "query": {"$where": "this.total_amount > 0"}}),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_security_violation());
}

/// Write operations never reach the store.
#[tokio::test]
async fn test_delete_many_rejected() {
    let err = guard()
        .prepare(
            &json!({"collection": "orders", "operation": "deleteMany", "query": {"status": "pending"}}),
            Some(&permissive()),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.rejection().unwrap().code(), RejectionCode::UnsafeOperator);
}

// =============================================================================
// Policy Document Tests
// =============================================================================

/// The JSON wire form reads camelCase keys and fills defaults.
#[test]
fn test_policy_set_from_json() {
    let policies = PolicySet::from_json_str(
        r#"{
            "collections": [
                {"database": "shop", "name": "orders", "operations": ["find", "aggregate"], "maxLimit": 250},
                {"name": "customers", "restrictedFields": ["email", "address.street"]}
            ],
            "maxLimit": 50
        }"#,
    )
    .unwrap();

    let orders = PermissionValidator::resolve(&policies, Some("shop"), "orders").unwrap();
    assert!(orders.allows("aggregate"));
    assert_eq!(orders.max_limit, Some(250));

    let customers = PermissionValidator::resolve(&policies, Some("shop"), "customers").unwrap();
    assert_eq!(customers.operations, vec!["find"]);
    assert_eq!(customers.restricted_fields, vec!["email", "address.street"]);
    assert_eq!(policies.max_limit, Some(50));
}

// =============================================================================
// Input Screening Tests
// =============================================================================

/// Control characters are stripped and injection shapes refused.
#[test]
fn test_natural_query_screening() {
    assert_eq!(sanitize_query("\u{1}orders placed today\n"), "orders placed today");
    assert_eq!(validate_natural_query("", 100), Err(InputError::Empty));
    assert!(matches!(
        validate_natural_query("orders; drop collection", 100),
        Err(InputError::SuspiciousPattern(_))
    ));
    assert!(validate_natural_query("recent orders from London", 100).is_ok());
}

/// Screening failures surface as INVALID_INPUT before any template runs.
#[tokio::test]
async fn test_template_input_screened() {
    let guard = guard();
    let err = guard.prepare_template("   ", None, None).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let long = "orders ".repeat(1000);
    let err = guard.prepare_template(&long, None, None).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");
}

// =============================================================================
// Configuration Tests
// =============================================================================

/// A partial configuration file keeps defaults for everything else.
#[test]
fn test_config_file_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"sample_size": 5, "enrich_results": false}}"#).unwrap();

    let config = GuardConfig::from_file(file.path()).unwrap();
    assert_eq!(config.sample_size, 5);
    assert!(!config.enrich_results);
    assert_eq!(config.default_find_limit, GuardConfig::default().default_find_limit);
}

/// Inconsistent limits are rejected on load.
#[test]
fn test_config_file_invalid() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"default_find_limit": 10, "max_find_limit": 5}}"#).unwrap();
    assert!(matches!(
        GuardConfig::from_file(file.path()),
        Err(ConfigError::Invalid(_))
    ));

    let missing = GuardConfig::from_file("/nonexistent/mqlguard.json");
    assert!(matches!(missing, Err(ConfigError::Io(_))));
}

/// A deployment file drives alias rewriting.
#[tokio::test]
async fn test_deployment_file_drives_aliases() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deployment.json");
    std::fs::write(
        &path,
        r#"{"aliases": {"orders": {"fields": {"memo": "note"}}}}"#,
    )
    .unwrap();

    let deployment = Deployment::from_file(&path).unwrap();
    let store = Arc::new(InMemoryStore::new("shop"));
    store
        .insert_json("orders", vec![json!({"status": "pending", "note": "gift"})])
        .unwrap();
    let guard = QueryGuard::new(store, deployment, GuardConfig::default());

    let results = guard
        .run(&json!({"collection": "orders", "query": {"memo": "gift"}}), None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
}
