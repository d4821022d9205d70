//! Field-scope validation of normalized plans
//!
//! Every field path's root must be known at the point where it is used.
//! Known roots start as the schema's top-level fields; pipeline stages that
//! attach or compute fields add their output names for the stages after
//! them.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::plan::paths::{
    classify_new_root, classify_projection, collect_field_refs, field_ref, is_operator, root_of, NewRoot,
    ProjectionEntry,
};
use crate::plan::QueryPlan;
use crate::validation::{Rejection, ValidationOutcome, ValidationResult};

use super::types::SchemaDescriptor;

/// Roots visible at one point of a plan
#[derive(Debug, Clone)]
struct Scope {
    known: BTreeSet<String>,
    /// Element keys of known array-of-document roots
    elements: BTreeMap<String, BTreeSet<String>>,
}

impl Scope {
    fn new(schema: &SchemaDescriptor) -> Self {
        let elements = schema
            .typed_fields
            .iter()
            .filter_map(|field| {
                let keys = field.sub_fields.as_ref()?;
                Some((field.field.clone(), keys.iter().cloned().collect()))
            })
            .collect();
        Self {
            known: schema.fields.clone(),
            elements,
        }
    }

    fn is_known(&self, path: &str) -> bool {
        self.known.contains(root_of(path))
    }

    /// `$elemMatch` document on the array at `path`: its keys name element
    /// fields, checked when the element keys were sampled
    fn check_elements(&self, path: &str, condition: &Map<String, Value>, bad: &mut Vec<String>) {
        let Some(keys) = self.elements.get(path) else {
            return;
        };
        for (key, value) in condition {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    for clause in value.as_array().into_iter().flatten() {
                        if let Some(clause) = clause.as_object() {
                            self.check_elements(path, clause, bad);
                        }
                    }
                }
                k if is_operator(k) => {}
                _ => {
                    if !keys.contains(root_of(key)) {
                        let full = format!("{}.{}", path, key);
                        if !bad.contains(&full) {
                            bad.push(full);
                        }
                    }
                }
            }
        }
    }

    fn check_path(&self, path: &str, bad: &mut Vec<String>) {
        if !self.is_known(path) && !bad.iter().any(|p| p == path) {
            bad.push(path.to_string());
        }
    }

    fn check_refs(&self, expression: &Value, bad: &mut Vec<String>) {
        let mut refs = Vec::new();
        collect_field_refs(expression, &mut refs);
        for path in refs {
            self.check_path(&path, bad);
        }
    }

    /// Match document: field keys and `$expr` references
    fn check_query(&self, query: &Map<String, Value>, bad: &mut Vec<String>) {
        for (key, value) in query {
            match key.as_str() {
                "$and" | "$or" | "$nor" => {
                    for clause in value.as_array().into_iter().flatten() {
                        if let Some(clause) = clause.as_object() {
                            self.check_query(clause, bad);
                        }
                    }
                }
                "$expr" => self.check_refs(value, bad),
                k if k.starts_with('$') => {}
                _ => {
                    self.check_path(key, bad);
                    if let Some(Value::Object(condition)) = value.get("$elemMatch") {
                        self.check_elements(key, condition, bad);
                    }
                }
            }
        }
    }

    /// Projection document; returns the output names of computed entries
    fn check_projection(&self, projection: &Map<String, Value>, bad: &mut Vec<String>) -> Vec<String> {
        let mut computed = Vec::new();
        for (key, value) in projection {
            match classify_projection(value) {
                ProjectionEntry::Include | ProjectionEntry::Exclude => self.check_path(key, bad),
                ProjectionEntry::Computed => {
                    self.check_refs(value, bad);
                    computed.push(root_of(key).to_string());
                }
            }
        }
        computed
    }

    fn introduce<I: IntoIterator<Item = String>>(&mut self, names: I) {
        for name in names {
            let root = root_of(&name).to_string();
            self.elements.remove(&root);
            self.known.insert(root);
        }
    }

    /// The whole document is replaced by one with exactly `fields`
    fn replace<I: IntoIterator<Item = String>>(&mut self, fields: I, elements: BTreeMap<String, BTreeSet<String>>) {
        self.known = fields.into_iter().collect();
        self.elements = elements;
    }

    fn allowed(&self) -> Vec<String> {
        self.known.iter().cloned().collect()
    }
}

/// Validates field references against a schema descriptor.
///
/// With a catalogue of collection names attached, the plan's own collection
/// and every join source are checked against it as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator<'a> {
    catalog: Option<&'a [String]>,
}

impl<'a> SchemaValidator<'a> {
    pub fn new() -> Self {
        Self { catalog: None }
    }

    pub fn with_catalog(mut self, catalog: &'a [String]) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// An empty catalogue means the listing failed; nothing is rejected then
    fn known_collection(&self, name: &str) -> bool {
        match self.catalog {
            Some(catalog) if !catalog.is_empty() => catalog.iter().any(|c| c == name),
            _ => true,
        }
    }

    pub fn check_collection(&self, collection: &str) -> ValidationOutcome {
        if self.known_collection(collection) {
            Ok(())
        } else {
            Err(Rejection::unknown_collection(
                collection,
                self.catalog.unwrap_or_default(),
            ))
        }
    }

    /// Validate a normalized plan.
    ///
    /// An empty schema means nothing is known about the collection; the plan
    /// passes unchecked.
    pub fn validate(&self, plan: &QueryPlan, schema: &SchemaDescriptor) -> ValidationOutcome {
        self.check_collection(&plan.collection)?;
        if schema.is_empty() {
            return Ok(());
        }

        let mut scope = Scope::new(schema);
        let mut bad = Vec::new();
        scope.check_query(&plan.filter, &mut bad);
        if let Some(projection) = &plan.projection {
            scope.check_projection(projection, &mut bad);
        }
        if let Some(sort) = &plan.sort {
            for key in sort.keys() {
                scope.check_path(key, &mut bad);
            }
        }
        if !bad.is_empty() {
            return Err(Rejection::invalid_fields(&plan.collection, bad, scope.allowed()));
        }

        self.check_pipeline(&plan.pipeline, &mut scope)
    }

    fn check_pipeline(&self, stages: &[Value], scope: &mut Scope) -> ValidationOutcome {
        for (index, stage) in stages.iter().enumerate() {
            let Some(stage) = stage.as_object() else {
                continue;
            };
            for (operator, definition) in stage {
                self.check_stage(index, operator, definition, scope)?;
            }
        }
        Ok(())
    }

    fn check_stage(
        &self,
        index: usize,
        operator: &str,
        definition: &Value,
        scope: &mut Scope,
    ) -> ValidationOutcome {
        let mut bad = Vec::new();
        let mut introduced: Vec<String> = Vec::new();

        match operator {
            "$match" => {
                if let Some(query) = definition.as_object() {
                    scope.check_query(query, &mut bad);
                }
            }
            "$lookup" => introduced = self.check_lookup(index, definition, scope)?,
            "$unwind" => {
                let path = match definition {
                    Value::String(path) => Some(path.as_str()),
                    Value::Object(options) => options.get("path").and_then(Value::as_str),
                    _ => None,
                };
                if let Some(path) = path.and_then(field_ref) {
                    scope.check_path(path, &mut bad);
                }
                if let Some(index_field) = definition.get("includeArrayIndex").and_then(Value::as_str) {
                    introduced.push(index_field.to_string());
                }
            }
            "$group" => {
                if let Some(group) = definition.as_object() {
                    for (key, expression) in group {
                        scope.check_refs(expression, &mut bad);
                        if key != "_id" {
                            introduced.push(key.clone());
                        }
                    }
                }
            }
            "$addFields" | "$set" => {
                if let Some(fields) = definition.as_object() {
                    for (key, expression) in fields {
                        scope.check_refs(expression, &mut bad);
                        introduced.push(key.clone());
                    }
                }
            }
            "$project" => {
                if let Some(projection) = definition.as_object() {
                    introduced = scope.check_projection(projection, &mut bad);
                }
            }
            "$sort" => {
                if let Some(sort) = definition.as_object() {
                    for key in sort.keys() {
                        scope.check_path(key, &mut bad);
                    }
                }
            }
            "$unset" => {
                let names: Vec<&str> = match definition {
                    Value::String(name) => vec![name.as_str()],
                    Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
                    _ => Vec::new(),
                };
                for name in names {
                    scope.check_path(name, &mut bad);
                }
            }
            "$count" => {
                if let Some(name) = definition.as_str() {
                    introduced.push(name.to_string());
                }
            }
            "$sortByCount" => {
                scope.check_refs(definition, &mut bad);
                introduced.push("count".to_string());
            }
            "$bucket" | "$bucketAuto" => {
                if let Some(group_by) = definition.get("groupBy") {
                    scope.check_refs(group_by, &mut bad);
                }
                match definition.get("output").and_then(Value::as_object) {
                    Some(output) => {
                        for (key, expression) in output {
                            scope.check_refs(expression, &mut bad);
                            introduced.push(key.clone());
                        }
                    }
                    None => introduced.push("count".to_string()),
                }
            }
            "$facet" => {
                if let Some(facets) = definition.as_object() {
                    for (name, sub_pipeline) in facets {
                        let mut inner = scope.clone();
                        let stages = sub_pipeline.as_array().map(Vec::as_slice).unwrap_or(&[]);
                        self.check_pipeline(stages, &mut inner)?;
                        introduced.push(name.clone());
                    }
                }
            }
            "$replaceRoot" | "$replaceWith" => {
                scope.check_refs(definition, &mut bad);
                if bad.is_empty() {
                    return self.replace_root(index, operator, definition, scope);
                }
            }
            "$limit" | "$skip" | "$sample" => {}
            _ => scope.check_refs(definition, &mut bad),
        }

        if !bad.is_empty() {
            return Err(Rejection::invalid_stage_fields(
                index,
                operator,
                bad,
                scope.allowed(),
            ));
        }
        scope.introduce(introduced);
        Ok(())
    }

    /// Narrow the scope to the fields of the replacement document. A shape
    /// whose fields cannot be known is rejected.
    fn replace_root(&self, index: usize, operator: &str, definition: &Value, scope: &mut Scope) -> ValidationOutcome {
        match classify_new_root(operator, definition) {
            NewRoot::Unchanged => Ok(()),
            NewRoot::Literal(fields) => {
                scope.replace(fields.keys().map(|key| root_of(key).to_string()), BTreeMap::new());
                Ok(())
            }
            NewRoot::Path(path) => match scope.elements.get(path).cloned() {
                Some(keys) => {
                    scope.replace(keys, BTreeMap::new());
                    Ok(())
                }
                None => Err(Rejection::invalid_stage_fields(
                    index,
                    operator,
                    vec![path.to_string()],
                    scope.elements.keys().cloned().collect(),
                )),
            },
            NewRoot::Opaque => Err(Rejection::unknown_root_shape(index, operator, scope.allowed())),
        }
    }

    /// Join stage: the source collection must exist and the local field
    /// must already be in scope. Returns the alias it introduces.
    fn check_lookup(&self, index: usize, definition: &Value, scope: &Scope) -> ValidationResult<Vec<String>> {
        let Some(lookup) = definition.as_object() else {
            return Ok(Vec::new());
        };

        if let Some(from) = lookup.get("from").and_then(Value::as_str) {
            if !self.known_collection(from) {
                return Err(Rejection::invalid_join_path(
                    index,
                    "joins unknown collection",
                    from,
                    self.catalog.unwrap_or_default().to_vec(),
                ));
            }
        }

        if let Some(local) = lookup.get("localField").and_then(Value::as_str) {
            if !scope.is_known(local) {
                return Err(Rejection::invalid_join_path(
                    index,
                    "has unknown local field",
                    local,
                    scope.allowed(),
                ));
            }
        }

        if let Some(variables) = lookup.get("let") {
            let mut bad = Vec::new();
            scope.check_refs(variables, &mut bad);
            if let Some(path) = bad.first() {
                return Err(Rejection::invalid_join_path(
                    index,
                    "binds unknown field",
                    path,
                    scope.allowed(),
                ));
            }
        }

        Ok(lookup
            .get("as")
            .and_then(Value::as_str)
            .map(|alias| vec![alias.to_string()])
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, TypedField};
    use crate::validation::RejectionCode;
    use serde_json::json;

    fn orders_schema() -> SchemaDescriptor {
        let field = |name: &str| TypedField {
            field: name.into(),
            field_type: FieldType::Unknown,
            sample_values: vec![],
            nullable: false,
            sub_fields: None,
        };
        SchemaDescriptor::from_typed_fields(
            ["_id", "user", "total_amount", "order_date", "items", "status"]
                .iter()
                .map(|n| field(n))
                .collect(),
            10,
        )
    }

    fn plan(value: Value) -> QueryPlan {
        QueryPlan::from_document(value.as_object().unwrap(), None).unwrap()
    }

    #[test]
    fn test_known_fields_pass() {
        let p = plan(json!({
            "collection": "orders",
            "query": {"status": "pending", "$or": [{"total_amount": {"$gt": 5}}, {"items.quantity": 2}]},
            "projection": {"status": 1, "_id": 0},
            "sort": {"order_date": -1}
        }));
        SchemaValidator::new().validate(&p, &orders_schema()).unwrap();
    }

    #[test]
    fn test_unknown_filter_field_rejected_with_paths_and_roots() {
        let p = plan(json!({"collection": "orders", "query": {"customer.name": "Art"}}));
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidField);
        assert_eq!(err.paths(), &["customer.name".to_string()]);
        assert!(err.allowed_roots().contains(&"total_amount".to_string()));
    }

    #[test]
    fn test_empty_schema_skips_validation() {
        let p = plan(json!({"collection": "orders", "query": {"anything": 1}}));
        SchemaValidator::new().validate(&p, &SchemaDescriptor::empty()).unwrap();
    }

    #[test]
    fn test_lookup_alias_becomes_known() {
        let p = plan(json!({
            "collection": "orders",
            "pipeline": [
                {"$lookup": {"from": "customers", "localField": "user", "foreignField": "_id", "as": "customer_info"}},
                {"$unwind": "$customer_info"},
                {"$match": {"customer_info.first_name": "Art"}},
                {"$project": {"customer_info.email": 1, "name": {"$concat": ["$customer_info.first_name", " ", "$customer_info.last_name"]}}},
                {"$sort": {"name": 1}}
            ]
        }));
        SchemaValidator::new().validate(&p, &orders_schema()).unwrap();
    }

    #[test]
    fn test_unknown_local_field_is_join_path_error() {
        let p = plan(json!({
            "collection": "orders",
            "pipeline": [{"$lookup": {"from": "customers", "localField": "customer_id", "foreignField": "_id", "as": "c"}}]
        }));
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidJoinPath);
        assert_eq!(err.paths(), &["customer_id".to_string()]);
    }

    #[test]
    fn test_unknown_join_source_with_catalog() {
        let catalog = vec!["customers".to_string(), "orders".to_string()];
        let p = plan(json!({
            "collection": "orders",
            "pipeline": [{"$lookup": {"from": "clients", "localField": "user", "foreignField": "_id", "as": "c"}}]
        }));
        let err = SchemaValidator::new()
            .with_catalog(&catalog)
            .validate(&p, &orders_schema())
            .unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidJoinPath);
    }

    #[test]
    fn test_unknown_collection() {
        let catalog = vec!["orders".to_string()];
        let p = plan(json!({"collection": "invoices"}));
        let err = SchemaValidator::new()
            .with_catalog(&catalog)
            .validate(&p, &orders_schema())
            .unwrap_err();
        assert_eq!(err.code(), RejectionCode::UnknownCollection);
    }

    #[test]
    fn test_group_outputs_known_inputs_checked() {
        let ok = plan(json!({
            "collection": "orders",
            "pipeline": [
                {"$group": {"_id": "$status", "revenue": {"$sum": "$total_amount"}}},
                {"$sort": {"revenue": -1}}
            ]
        }));
        SchemaValidator::new().validate(&ok, &orders_schema()).unwrap();

        let bad = plan(json!({
            "collection": "orders",
            "pipeline": [{"$group": {"_id": "$status", "revenue": {"$sum": "$total"}}}]
        }));
        let err = SchemaValidator::new().validate(&bad, &orders_schema()).unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidField);
        assert_eq!(err.paths(), &["total".to_string()]);
    }

    #[test]
    fn test_names_are_not_known_before_they_are_introduced() {
        let p = plan(json!({
            "collection": "orders",
            "pipeline": [
                {"$match": {"customer_info.first_name": "Art"}},
                {"$lookup": {"from": "customers", "localField": "user", "foreignField": "_id", "as": "customer_info"}}
            ]
        }));
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert!(err.message().contains("stage 0"));
    }

    #[test]
    fn test_facet_branches_are_scoped() {
        let p = plan(json!({
            "collection": "orders",
            "pipeline": [
                {"$facet": {
                    "revenue": [{"$group": {"_id": null, "total": {"$sum": "$total_amount"}}}],
                    "units": [{"$unwind": "$items"}, {"$group": {"_id": null, "n": {"$sum": "$items.quantity"}}}]
                }},
                {"$project": {"revenue": {"$arrayElemAt": ["$revenue.total", 0]}, "units": 1}}
            ]
        }));
        SchemaValidator::new().validate(&p, &orders_schema()).unwrap();
    }

    #[test]
    fn test_unwind_unknown_path() {
        let p = plan(json!({
            "collection": "orders",
            "pipeline": [{"$unwind": {"path": "$line_items"}}]
        }));
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert_eq!(err.paths(), &["line_items".to_string()]);
    }

    fn orders_with_items() -> SchemaDescriptor {
        let mut schema = orders_schema();
        for field in schema.typed_fields.iter_mut().filter(|f| f.field == "items") {
            field.sub_fields = Some(vec!["product".into(), "quantity".into(), "price".into()]);
        }
        schema
    }

    fn pipeline(stages: Value) -> QueryPlan {
        plan(json!({"collection": "orders", "operation": "aggregate", "pipeline": stages}))
    }

    #[test]
    fn test_current_root_keeps_checking_fields() {
        let p = pipeline(json!([
            {"$replaceRoot": {"newRoot": "$$ROOT"}},
            {"$match": {"totally_bogus_field": 1}},
            {"$sort": {"another_bogus": 1}}
        ]));
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidField);
        assert_eq!(err.paths(), &["totally_bogus_field".to_string()]);

        let p = pipeline(json!([{"$replaceWith": "$$ROOT"}, {"$match": {"status": "pending"}}]));
        assert!(SchemaValidator::new().validate(&p, &orders_schema()).is_ok());
    }

    #[test]
    fn test_literal_root_narrows_scope() {
        let p = pipeline(json!([
            {"$replaceWith": {"spent": "$total_amount", "state": "$status"}},
            {"$match": {"spent": {"$gt": 10}}},
            {"$sort": {"state": 1}}
        ]));
        assert!(SchemaValidator::new().validate(&p, &orders_schema()).is_ok());

        let p = pipeline(json!([
            {"$replaceWith": {"spent": "$total_amount"}},
            {"$match": {"status": "pending"}}
        ]));
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert_eq!(err.paths(), &["status".to_string()]);
        assert_eq!(err.allowed_roots(), &["spent".to_string()]);
    }

    #[test]
    fn test_array_root_uses_element_keys() {
        let p = pipeline(json!([
            {"$unwind": "$items"},
            {"$replaceRoot": {"newRoot": "$items"}},
            {"$match": {"quantity": {"$gt": 1}}}
        ]));
        assert!(SchemaValidator::new().validate(&p, &orders_with_items()).is_ok());

        let p = pipeline(json!([
            {"$replaceRoot": {"newRoot": "$items"}},
            {"$match": {"total_amount": 1}}
        ]));
        let err = SchemaValidator::new().validate(&p, &orders_with_items()).unwrap_err();
        assert_eq!(err.paths(), &["total_amount".to_string()]);

        // No sampled element keys
        let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidField);
        assert_eq!(err.paths(), &["items".to_string()]);
    }

    #[test]
    fn test_computed_root_rejected() {
        for root in [
            json!({"$replaceRoot": {"newRoot": {"$mergeObjects": ["$$ROOT", {"x": 1}]}}}),
            json!({"$replaceWith": "$$item"}),
            json!({"$replaceRoot": {}}),
        ] {
            let p = pipeline(json!([root.clone(), {"$match": {"anything": 1}}]));
            let err = SchemaValidator::new().validate(&p, &orders_schema()).unwrap_err();
            assert_eq!(err.code(), RejectionCode::InvalidField, "accepted {}", root);
            assert!(err.paths().is_empty());
            assert!(err.message().contains("cannot be checked"));
        }
    }

    #[test]
    fn test_elem_match_keys_checked_against_element_keys() {
        let p = plan(json!({
            "collection": "orders",
            "query": {"items": {"$elemMatch": {"product": "p1", "quantity": {"$gt": 1}}}}
        }));
        assert!(SchemaValidator::new().validate(&p, &orders_with_items()).is_ok());

        let p = plan(json!({
            "collection": "orders",
            "query": {"items": {"$elemMatch": {"product_id": "p1", "$or": [{"qty": {"$gt": 1}}]}}}
        }));
        let err = SchemaValidator::new().validate(&p, &orders_with_items()).unwrap_err();
        assert_eq!(err.code(), RejectionCode::InvalidField);
        assert_eq!(err.paths(), &["items.product_id".to_string(), "items.qty".to_string()]);
    }
}
