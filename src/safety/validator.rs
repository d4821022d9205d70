//! Operator denylist and read-only enforcement

use serde_json::Value;

use crate::plan::QueryPlan;
use crate::validation::{Rejection, ValidationOutcome};

/// Destructive or administrative operators, rejected anywhere in a plan
pub const DENYLIST: &[&str] = &[
    "$drop",
    "$dropDatabase",
    "$eval",
    "$where",
    "$out",
    "$merge",
    "$function",
    "$accumulator",
];

/// Rejects denylisted operators and non-read operations.
///
/// Runs regardless of policy: an absent or permissive policy never
/// weakens it.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafetyValidator;

impl SafetyValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, plan: &QueryPlan) -> ValidationOutcome {
        if let Some(operator) = find_denied(&plan.to_document()) {
            return Err(Rejection::unsafe_operator(operator));
        }
        if !plan.operation.is_read_only() {
            return Err(Rejection::unsafe_operation(plan.operation.as_str()));
        }
        Ok(())
    }
}

fn denied(text: &str) -> Option<&'static str> {
    DENYLIST
        .iter()
        .copied()
        .find(|operator| operator.eq_ignore_ascii_case(text.trim()))
}

/// First denylisted operator used as a key or a literal string value
fn find_denied(value: &Value) -> Option<&'static str> {
    match value {
        Value::Object(map) => map
            .iter()
            .find_map(|(key, child)| denied(key).or_else(|| find_denied(child))),
        Value::Array(items) => items.iter().find_map(find_denied),
        Value::String(text) => denied(text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Operation;
    use crate::validation::RejectionCode;
    use serde_json::json;

    fn object(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_plain_read_passes() {
        let plan = QueryPlan::find("orders").with_filter(object(json!({"status": "pending"})));
        assert!(SafetyValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn test_nested_where_rejected() {
        let plan = QueryPlan::find("orders")
            .with_filter(object(json!({"$or": [{"status": "x"}, {"$where": "sleep(100)"}]})));
        let err = SafetyValidator::new().validate(&plan).unwrap_err();
        assert_eq!(err.code(), RejectionCode::UnsafeOperator);
        assert!(err.message().contains("$where"));
    }

    #[test]
    fn test_write_stages_rejected_case_insensitively() {
        for stage in [json!({"$OUT": "copy"}), json!({"$merge": {"into": "x"}})] {
            let plan = QueryPlan::aggregate("orders", vec![stage]);
            assert!(SafetyValidator::new().validate(&plan).is_err());
        }
    }

    #[test]
    fn test_operator_as_string_value_rejected() {
        let plan = QueryPlan::aggregate("orders", vec![json!({"$project": {"x": "$dropDatabase"}})]);
        assert!(SafetyValidator::new().validate(&plan).is_err());
    }

    #[test]
    fn test_similar_names_allowed() {
        let plan = QueryPlan::find("orders").with_filter(object(json!({"dropoff": "$drop_zone"})));
        assert!(SafetyValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn test_non_read_operations_rejected() {
        let mut plan = QueryPlan::find("orders");
        plan.operation = Operation::Delete;
        let err = SafetyValidator::new().validate(&plan).unwrap_err();
        assert_eq!(err.code(), RejectionCode::UnsafeOperator);

        plan.operation = Operation::parse("updateMany");
        assert!(SafetyValidator::new().validate(&plan).is_err());
    }
}
