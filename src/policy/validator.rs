//! Permission validation

use serde_json::{Map, Value};

use crate::plan::paths::{classify_projection, collect_field_refs, field_ref, is_operator, ProjectionEntry};
use crate::plan::{read_limit, QueryPlan};
use crate::validation::{Rejection, ValidationOutcome, ValidationResult};

use super::types::{CollectionPolicy, PolicySet, WILDCARD};

/// Checks a plan against the most specific applicable policy
pub struct PermissionValidator {
    default_max_limit: i64,
}

impl PermissionValidator {
    /// `default_max_limit` applies when the policy set names none
    pub fn new(default_max_limit: i64) -> Self {
        Self { default_max_limit }
    }

    /// Most specific policy for (`database`, `collection`), by tier:
    /// exact/exact, exact/`*`, `*`/exact, `*`/`*`. Tiers naming a database
    /// are skipped when no database is active.
    pub fn resolve<'p>(
        policies: &'p PolicySet,
        database: Option<&str>,
        collection: &str,
    ) -> Option<&'p CollectionPolicy> {
        let tiers: [(Option<&str>, &str); 4] = [
            (database, collection),
            (database, WILDCARD),
            (Some(WILDCARD), collection),
            (Some(WILDCARD), WILDCARD),
        ];
        tiers.iter().find_map(|(db, name)| {
            let db = (*db)?;
            policies
                .collections
                .iter()
                .find(|policy| policy.database_pattern() == db && policy.name == *name)
        })
    }

    /// Validate `plan`. With no policy set the caller is trusted.
    pub fn validate(
        &self,
        plan: &QueryPlan,
        policies: Option<&PolicySet>,
        database: Option<&str>,
    ) -> ValidationOutcome {
        let Some(policies) = policies else {
            return Ok(());
        };
        let Some(policy) = Self::resolve(policies, database, &plan.collection) else {
            return Err(Rejection::operation_not_allowed(format!(
                "Access to collection '{}' in database '{}' is not allowed.",
                plan.collection,
                database.unwrap_or(WILDCARD)
            )));
        };

        let operation = plan.operation.as_str();
        if !policy.allows(operation) {
            return Err(Rejection::operation_not_allowed(format!(
                "Operation '{}' is not allowed on collection '{}'. Allowed: {}",
                operation,
                plan.collection,
                policy.operations.join(", ")
            )));
        }

        let max_limit = policy
            .max_limit
            .or(policies.max_limit)
            .unwrap_or(self.default_max_limit);
        for requested in requested_limits(plan)? {
            if requested > max_limit {
                return Err(Rejection::limit_exceeded(requested, max_limit));
            }
        }

        for field in &policy.restricted_fields {
            if let Some(location) = restricted_use(plan, field) {
                return Err(Rejection::restricted_field(field, location));
            }
        }
        Ok(())
    }
}

/// Top-level limit plus every `$limit` stage, including those nested in
/// `$facet` branches and sub-pipelines
fn requested_limits(plan: &QueryPlan) -> ValidationResult<Vec<i64>> {
    let mut limits: Vec<i64> = plan.limit.into_iter().collect();
    stage_limits(&plan.pipeline, &mut limits)?;
    Ok(limits)
}

fn stage_limits(stages: &[Value], limits: &mut Vec<i64>) -> ValidationOutcome {
    for stage in stages.iter().filter_map(Value::as_object) {
        for (operator, definition) in stage {
            match operator.as_str() {
                "$limit" => match read_limit(Some(definition)) {
                    Ok(limit) => limits.extend(limit),
                    Err(_) => return Err(Rejection::unreadable_limit(definition)),
                },
                "$facet" => {
                    for branch in definition.as_object().into_iter().flat_map(|facets| facets.values()) {
                        if let Some(branch) = branch.as_array() {
                            stage_limits(branch, limits)?;
                        }
                    }
                }
                "$lookup" | "$unionWith" => {
                    if let Some(Value::Array(pipeline)) = definition.get("pipeline") {
                        stage_limits(pipeline, limits)?;
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// `path` names `field`: equal, under it, or (for a plain name) passing
/// through it as a segment
fn names_field(path: &str, field: &str) -> bool {
    if path == field || path.strip_prefix(field).map_or(false, |rest| rest.starts_with('.')) {
        return true;
    }
    !field.contains('.') && path.split('.').any(|segment| segment == field)
}

fn restricted_use(plan: &QueryPlan, field: &str) -> Option<&'static str> {
    if value_uses(&Value::Object(plan.filter.clone()), field) {
        return Some("query filter");
    }
    if let Some(projection) = &plan.projection {
        if projection_uses(projection, field) {
            return Some("projection");
        }
    }
    if let Some(sort) = &plan.sort {
        if sort.keys().any(|key| names_field(key, field)) {
            return Some("sort");
        }
    }
    if plan.pipeline.iter().any(|stage| value_uses(stage, field)) {
        return Some("aggregation pipeline");
    }
    None
}

fn projection_uses(projection: &Map<String, Value>, field: &str) -> bool {
    projection.iter().any(|(key, value)| match classify_projection(value) {
        ProjectionEntry::Exclude => false,
        ProjectionEntry::Include => names_field(key, field),
        ProjectionEntry::Computed => {
            let mut refs = Vec::new();
            collect_field_refs(value, &mut refs);
            names_field(key, field) || refs.iter().any(|path| names_field(path, field))
        }
    })
}

/// Any non-operator key, field reference or literal string naming `field`
fn value_uses(value: &Value, field: &str) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, child)| {
            (!is_operator(key) && names_field(key, field)) || value_uses(child, field)
        }),
        Value::Array(items) => items.iter().any(|item| value_uses(item, field)),
        Value::String(text) => {
            text == field || field_ref(text).map_or(false, |path| names_field(path, field))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Operation;
    use crate::validation::RejectionCode;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn validator() -> PermissionValidator {
        PermissionValidator::new(100)
    }

    #[test]
    fn test_resolution_precedence() {
        let policies = PolicySet::new()
            .with(CollectionPolicy::new("*").in_database("shop").with_operations(&["find"]))
            .with(CollectionPolicy::new("orders").in_database("shop").with_operations(&["aggregate"]))
            .with(CollectionPolicy::new("orders").with_operations(&["delete"]));
        let resolved = PermissionValidator::resolve(&policies, Some("shop"), "orders").unwrap();
        assert_eq!(resolved.operations, vec!["aggregate"]);
        let resolved = PermissionValidator::resolve(&policies, Some("shop"), "products").unwrap();
        assert_eq!(resolved.operations, vec!["find"]);
        let resolved = PermissionValidator::resolve(&policies, None, "orders").unwrap();
        assert_eq!(resolved.operations, vec!["delete"]);
        assert!(PermissionValidator::resolve(&policies, Some("crm"), "products").is_none());
    }

    #[test]
    fn test_no_policy_set_accepts() {
        assert!(validator().validate(&QueryPlan::find("anything"), None, None).is_ok());
    }

    #[test]
    fn test_no_match_denies() {
        let policies = PolicySet::new().with(CollectionPolicy::new("products"));
        let err = validator()
            .validate(&QueryPlan::find("orders"), Some(&policies), Some("shop"))
            .unwrap_err();
        assert_eq!(err.code(), RejectionCode::OperationNotAllowed);
    }

    #[test]
    fn test_operation_denied() {
        let policies = PolicySet::new().with(CollectionPolicy::new("orders"));
        let plan = QueryPlan::aggregate("orders", vec![]);
        let err = validator().validate(&plan, Some(&policies), None).unwrap_err();
        assert_eq!(err.code(), RejectionCode::OperationNotAllowed);

        let mut plan = QueryPlan::find("orders");
        plan.operation = Operation::Delete;
        assert!(validator().validate(&plan, Some(&policies), None).is_err());
    }

    #[test]
    fn test_limit_checks() {
        let policies = PolicySet::new()
            .with(CollectionPolicy::new("orders").with_operations(&["find", "aggregate"]))
            .with_max_limit(100);
        let plan = QueryPlan::find("orders").with_limit(500);
        let err = validator().validate(&plan, Some(&policies), None).unwrap_err();
        assert_eq!(err.code(), RejectionCode::LimitExceeded);

        let plan = QueryPlan::aggregate("orders", vec![json!({"$limit": 101})]);
        assert!(validator().validate(&plan, Some(&policies), None).is_err());

        let plan = QueryPlan::find("orders").with_limit(100);
        assert!(validator().validate(&plan, Some(&policies), None).is_ok());
    }

    #[test]
    fn test_nested_and_string_limits_checked() {
        let policies = PolicySet::new()
            .with(CollectionPolicy::new("orders").with_operations(&["aggregate"]))
            .with_max_limit(10);
        let over = [
            json!({"$facet": {"a": [{"$limit": 5}], "b": [{"$limit": 500}]}}),
            json!({"$limit": "500"}),
            json!({"$lookup": {"from": "products", "as": "p", "pipeline": [{"$limit": 50}]}}),
            json!({"$facet": {"a": [{"$lookup": {"from": "products", "as": "p", "pipeline": [{"$limit": "11"}]}}]}}),
        ];
        for stage in over {
            let plan = QueryPlan::aggregate("orders", vec![stage.clone()]);
            let err = validator().validate(&plan, Some(&policies), None).unwrap_err();
            assert_eq!(err.code(), RejectionCode::LimitExceeded, "accepted {}", stage);
        }

        let plan = QueryPlan::aggregate("orders", vec![json!({"$limit": "many"})]);
        let err = validator().validate(&plan, Some(&policies), None).unwrap_err();
        assert_eq!(err.code(), RejectionCode::LimitExceeded);
        assert!(err.message().contains("many"));

        let plan = QueryPlan::aggregate(
            "orders",
            vec![json!({"$facet": {"a": [{"$limit": "10"}], "b": [{"$skip": 3}]}})],
        );
        assert!(validator().validate(&plan, Some(&policies), None).is_ok());
    }

    #[test]
    fn test_collection_limit_overrides_set() {
        let policies = PolicySet::new()
            .with(CollectionPolicy::new("orders").with_max_limit(10))
            .with_max_limit(1000);
        let plan = QueryPlan::find("orders").with_limit(20);
        assert!(validator().validate(&plan, Some(&policies), None).is_err());
    }

    #[test]
    fn test_restricted_fields() {
        let policies = PolicySet::new().with(
            CollectionPolicy::new("customers")
                .with_operations(&["find", "aggregate"])
                .with_restricted_fields(&["email"]),
        );
        let check = |plan: QueryPlan| validator().validate(&plan, Some(&policies), None);

        let filter = QueryPlan::find("customers").with_filter(object(json!({"email": {"$regex": "x"}})));
        assert_eq!(check(filter).unwrap_err().code(), RejectionCode::RestrictedField);

        let excluded = QueryPlan::find("customers").with_projection(object(json!({"email": 0})));
        assert!(check(excluded).is_ok());

        let included = QueryPlan::find("customers").with_projection(object(json!({"email": 1})));
        assert!(check(included).is_err());

        let pipeline = QueryPlan::aggregate(
            "customers",
            vec![json!({"$group": {"_id": null, "all": {"$push": "$email"}}})],
        );
        assert!(check(pipeline).is_err());

        let unrelated = QueryPlan::find("customers").with_filter(object(json!({"emailed": true})));
        assert!(check(unrelated).is_ok());
    }
}
