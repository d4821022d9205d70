//! Plan types and lenient candidate reading

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::errors::{PlanError, PlanResult};

/// Operation kind requested by a plan
///
/// Only `Find` and `Aggregate` can ever execute. `Delete` and `Other` are
/// kept as distinct values so that rejections can name what was asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Find,
    Aggregate,
    Delete,
    Other(String),
}

impl Operation {
    /// Parse an operation name, case-insensitively
    pub fn parse(name: &str) -> Self {
        let lowered = name.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "find" => Operation::Find,
            "aggregate" => Operation::Aggregate,
            "delete" | "deleteone" | "deletemany" | "delete_one" | "delete_many" => {
                Operation::Delete
            }
            _ => Operation::Other(lowered),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Operation::Find => "find",
            Operation::Aggregate => "aggregate",
            Operation::Delete => "delete",
            Operation::Other(name) => name,
        }
    }

    /// True for the read-only operations that may execute
    pub fn is_read_only(&self) -> bool {
        matches!(self, Operation::Find | Operation::Aggregate)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A query plan against a single collection
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    pub operation: Operation,
    /// Match conditions, carried on the wire as `query`
    pub filter: Map<String, Value>,
    pub pipeline: Vec<Value>,
    pub projection: Option<Map<String, Value>>,
    pub sort: Option<Map<String, Value>>,
    pub limit: Option<i64>,
}

impl QueryPlan {
    /// Empty find plan over a collection
    pub fn find(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operation: Operation::Find,
            filter: Map::new(),
            pipeline: Vec::new(),
            projection: None,
            sort: None,
            limit: None,
        }
    }

    /// Aggregate plan over a collection with the given stages
    pub fn aggregate(collection: impl Into<String>, pipeline: Vec<Value>) -> Self {
        Self {
            operation: Operation::Aggregate,
            pipeline,
            ..Self::find(collection)
        }
    }

    pub fn with_filter(mut self, filter: Map<String, Value>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_projection(mut self, projection: Map<String, Value>) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: Map<String, Value>) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Read a plan from a document whose keys are already canonical.
    ///
    /// Loose encodings are accepted: `limit` as a string or float, `sort`
    /// as a list of `[field, direction]` pairs or bare field names,
    /// `projection` as a list of field names, `pipeline` as a single stage.
    /// A missing collection falls back to `collection_hint`.
    pub fn from_document(
        document: &Map<String, Value>,
        collection_hint: Option<&str>,
    ) -> PlanResult<Self> {
        let collection = match document.get("collection") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            Some(Value::Null) | None => String::new(),
            Some(Value::String(_)) => String::new(),
            Some(other) => {
                return Err(PlanError::malformed(
                    "collection",
                    format!("expected a string, found {}", value_kind(other)),
                ))
            }
        };
        let collection = if collection.is_empty() {
            collection_hint
                .map(str::trim)
                .filter(|hint| !hint.is_empty())
                .ok_or(PlanError::MissingCollection)?
                .to_string()
        } else {
            collection
        };

        let filter = match document.get("query") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(other) => {
                return Err(PlanError::malformed(
                    "query",
                    format!("expected a document, found {}", value_kind(other)),
                ))
            }
        };

        let pipeline = read_pipeline(document.get("pipeline"))?;

        let operation = match document.get("operation") {
            Some(Value::String(name)) => Operation::parse(name),
            Some(Value::Null) | None if !pipeline.is_empty() => Operation::Aggregate,
            Some(Value::Null) | None => Operation::Find,
            Some(other) => {
                return Err(PlanError::malformed(
                    "operation",
                    format!("expected a string, found {}", value_kind(other)),
                ))
            }
        };

        Ok(Self {
            collection,
            operation,
            filter,
            pipeline,
            projection: read_projection(document.get("projection"))?,
            sort: read_sort(document.get("sort"))?,
            limit: read_limit(document.get("limit"))?,
        })
    }

    /// Wire form of the plan
    pub fn to_document(&self) -> Value {
        let mut out = Map::new();
        out.insert("collection".into(), Value::String(self.collection.clone()));
        out.insert("operation".into(), Value::String(self.operation.as_str().into()));
        if !self.filter.is_empty() || self.operation == Operation::Find {
            out.insert("query".into(), Value::Object(self.filter.clone()));
        }
        if !self.pipeline.is_empty() || self.operation == Operation::Aggregate {
            out.insert("pipeline".into(), Value::Array(self.pipeline.clone()));
        }
        if let Some(projection) = &self.projection {
            out.insert("projection".into(), Value::Object(projection.clone()));
        }
        if let Some(sort) = &self.sort {
            out.insert("sort".into(), Value::Object(sort.clone()));
        }
        if let Some(limit) = self.limit {
            out.insert("limit".into(), Value::from(limit));
        }
        Value::Object(out)
    }
}

impl Serialize for QueryPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_document().serialize(serializer)
    }
}

/// Short name of a JSON value's kind, for messages
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "document",
    }
}

fn read_pipeline(value: Option<&Value>) -> PlanResult<Vec<Value>> {
    let stages = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(stages)) => stages.clone(),
        Some(Value::Object(stage)) => vec![Value::Object(stage.clone())],
        Some(other) => {
            return Err(PlanError::malformed(
                "pipeline",
                format!("expected an array of stages, found {}", value_kind(other)),
            ))
        }
    };
    for (index, stage) in stages.iter().enumerate() {
        if !stage.is_object() {
            return Err(PlanError::malformed(
                "pipeline",
                format!("stage {} is a {}, not a document", index, value_kind(stage)),
            ));
        }
    }
    Ok(stages)
}

pub(crate) fn read_projection(value: Option<&Value>) -> PlanResult<Option<Map<String, Value>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) if map.is_empty() => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::Array(fields)) => {
            let mut map = Map::new();
            for field in fields {
                match field {
                    Value::String(name) => {
                        map.insert(name.clone(), Value::from(1));
                    }
                    other => {
                        return Err(PlanError::malformed(
                            "projection",
                            format!("field list holds a {}", value_kind(other)),
                        ))
                    }
                }
            }
            Ok(if map.is_empty() { None } else { Some(map) })
        }
        Some(other) => Err(PlanError::malformed(
            "projection",
            format!("expected a document, found {}", value_kind(other)),
        )),
    }
}

pub(crate) fn read_sort(value: Option<&Value>) -> PlanResult<Option<Map<String, Value>>> {
    let mut sort = Map::new();
    match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(map)) => {
            for (field, direction) in map {
                sort.insert(field.clone(), sort_direction(direction));
            }
        }
        Some(Value::String(field)) => insert_sort_field(&mut sort, field),
        Some(Value::Array(entries)) => {
            for entry in entries {
                match entry {
                    Value::String(field) => insert_sort_field(&mut sort, field),
                    Value::Array(pair) if pair.len() == 2 => match &pair[0] {
                        Value::String(field) => {
                            sort.insert(field.clone(), sort_direction(&pair[1]));
                        }
                        other => {
                            return Err(PlanError::malformed(
                                "sort",
                                format!("pair key is a {}", value_kind(other)),
                            ))
                        }
                    },
                    other => {
                        return Err(PlanError::malformed(
                            "sort",
                            format!("unexpected {} in sort list", value_kind(other)),
                        ))
                    }
                }
            }
        }
        Some(other) => {
            return Err(PlanError::malformed(
                "sort",
                format!("expected a document, found {}", value_kind(other)),
            ))
        }
    }
    Ok(if sort.is_empty() { None } else { Some(sort) })
}

fn insert_sort_field(sort: &mut Map<String, Value>, field: &str) {
    match field.strip_prefix('-') {
        Some(name) => sort.insert(name.to_string(), Value::from(-1)),
        None => sort.insert(field.to_string(), Value::from(1)),
    };
}

fn sort_direction(direction: &Value) -> Value {
    match direction {
        Value::Number(n) => match n.as_f64() {
            Some(d) if d < 0.0 => Value::from(-1),
            _ => Value::from(1),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "desc" | "descending" | "-1" => Value::from(-1),
            "asc" | "ascending" | "1" => Value::from(1),
            _ => direction.clone(),
        },
        Value::Bool(false) => Value::from(-1),
        Value::Bool(true) => Value::from(1),
        other => other.clone(),
    }
}

pub(crate) fn read_limit(value: Option<&Value>) -> PlanResult<Option<i64>> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
        Some(_) => None,
    };
    match parsed {
        Some(n) if n > 0 => Ok(Some(n)),
        Some(_) => Ok(None),
        None => Err(PlanError::malformed("limit", "expected a positive integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_operation_parse() {
        assert_eq!(Operation::parse("FIND"), Operation::Find);
        assert_eq!(Operation::parse(" aggregate "), Operation::Aggregate);
        assert_eq!(Operation::parse("deleteMany"), Operation::Delete);
        assert_eq!(Operation::parse("update"), Operation::Other("update".into()));
        assert!(!Operation::Delete.is_read_only());
    }

    #[test]
    fn test_collection_hint_fallback() {
        let plan = QueryPlan::from_document(&doc(json!({"query": {}})), Some("orders")).unwrap();
        assert_eq!(plan.collection, "orders");

        let err = QueryPlan::from_document(&doc(json!({"query": {}})), None).unwrap_err();
        assert_eq!(err, PlanError::MissingCollection);
    }

    #[test]
    fn test_operation_defaults_from_pipeline() {
        let plan = QueryPlan::from_document(
            &doc(json!({"collection": "orders", "pipeline": [{"$match": {}}]})),
            None,
        )
        .unwrap();
        assert_eq!(plan.operation, Operation::Aggregate);
    }

    #[test]
    fn test_loose_limit_and_sort() {
        let plan = QueryPlan::from_document(
            &doc(json!({
                "collection": "orders",
                "limit": "25",
                "sort": [["order_date", "desc"], "-total_amount"]
            })),
            None,
        )
        .unwrap();
        assert_eq!(plan.limit, Some(25));
        let sort = plan.sort.unwrap();
        assert_eq!(sort["order_date"], json!(-1));
        assert_eq!(sort["total_amount"], json!(-1));
    }

    #[test]
    fn test_non_positive_limit_is_dropped() {
        let plan =
            QueryPlan::from_document(&doc(json!({"collection": "orders", "limit": 0})), None)
                .unwrap();
        assert_eq!(plan.limit, None);
    }

    #[test]
    fn test_malformed_members_are_rejected() {
        let err = QueryPlan::from_document(
            &doc(json!({"collection": "orders", "query": "status = 'x'"})),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Malformed { ref member, .. } if member == "query"));

        let err = QueryPlan::from_document(
            &doc(json!({"collection": "orders", "pipeline": [1, 2]})),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, PlanError::Malformed { ref member, .. } if member == "pipeline"));
    }

    #[test]
    fn test_to_document_wire_shape() {
        let plan = QueryPlan::find("orders")
            .with_filter(doc(json!({"status": "pending"})))
            .with_limit(5);
        assert_eq!(
            plan.to_document(),
            json!({
                "collection": "orders",
                "operation": "find",
                "query": {"status": "pending"},
                "limit": 5
            })
        );
    }
}
