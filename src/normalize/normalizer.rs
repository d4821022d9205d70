//! Structural repair and alias normalization of candidate plans

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::deployment::Deployment;
use crate::observability::{Event, Logger};
use crate::plan::paths::{classify_projection, ProjectionEntry};
use crate::plan::{read_limit, read_projection, read_sort, value_kind, Operation, PlanError, PlanResult, QueryPlan};

use super::rename::Renamer;

/// Top-level keys given operator-style or under a wrong name
const KEY_REPAIRS: &[(&str, &str)] = &[
    ("$sort", "sort"),
    ("$limit", "limit"),
    ("$projection", "projection"),
    ("$project", "projection"),
    ("$filter", "query"),
    ("$query", "query"),
    ("filter", "query"),
    ("$collection", "collection"),
    ("$pipeline", "pipeline"),
    ("$operation", "operation"),
];

/// Aggregation-only operators that move from a filter into a pipeline
const PIPELINE_ONLY: &[&str] = &[
    "$lookup",
    "$unwind",
    "$group",
    "$addFields",
    "$set",
    "$count",
    "$facet",
    "$sortByCount",
];

/// Stage names recognized with or without the `$` sigil
const STAGE_NAMES: &[&str] = &[
    "match",
    "lookup",
    "unwind",
    "group",
    "project",
    "sort",
    "limit",
    "skip",
    "addFields",
    "set",
    "unset",
    "count",
    "facet",
    "sortByCount",
    "replaceRoot",
    "replaceWith",
    "bucket",
    "sample",
];

fn stage_name(key: &str) -> Option<String> {
    let bare = key.strip_prefix('$').unwrap_or(key);
    STAGE_NAMES.contains(&bare).then(|| format!("${}", bare))
}

/// Repairs structural mistakes and rewrites field synonyms.
///
/// `normalize` is idempotent: a normalized plan normalizes to itself.
pub struct AliasNormalizer {
    deployment: Arc<Deployment>,
}

impl AliasNormalizer {
    pub fn new(deployment: Arc<Deployment>) -> Self {
        Self { deployment }
    }

    /// Read an untrusted candidate document and normalize it.
    ///
    /// A candidate wrapped as `{"mql": {...}}` is unwrapped. A missing
    /// collection falls back to the envelope's, then to `collection_hint`.
    pub fn normalize_candidate(
        &self,
        candidate: &Value,
        collection_hint: Option<&str>,
    ) -> PlanResult<QueryPlan> {
        let Value::Object(outer) = candidate else {
            return Err(PlanError::NotADocument(value_kind(candidate)));
        };
        let mut document = match outer.get("mql") {
            Some(Value::Object(inner)) => {
                let mut inner = inner.clone();
                if !inner.contains_key("collection") {
                    if let Some(collection) = outer.get("collection") {
                        inner.insert("collection".into(), collection.clone());
                    }
                }
                inner
            }
            _ => outer.clone(),
        };
        repair_keys(&mut document);
        let plan = QueryPlan::from_document(&document, collection_hint)?;
        Ok(self.normalize(plan))
    }

    /// Normalize a plan. Steps, in order:
    ///
    /// 1. Hoist `$sort`, `$limit` and `$project` out of the filter
    /// 2. Keep only inclusions in a mixed projection
    /// 3. Canonicalize stage documents
    /// 4. Unwrap a filter that is a lone `$match`
    /// 5. Hoist aggregation-only operators out of the filter into a pipeline
    /// 6. Fold an aggregate's filter, sort and projection into its pipeline
    /// 7. Rewrite field synonyms
    pub fn normalize(&self, mut plan: QueryPlan) -> QueryPlan {
        let before = plan.clone();

        hoist_plan_options(&mut plan);
        if let Some(projection) = plan.projection.as_mut() {
            repair_projection(projection);
        }
        canonicalize_stages(&mut plan.pipeline);
        unwrap_match(&mut plan.filter);
        hoist_pipeline_stages(&mut plan);
        if plan.operation == Operation::Find && !plan.pipeline.is_empty() {
            plan.operation = Operation::Aggregate;
        }
        if plan.operation == Operation::Aggregate {
            fold_into_pipeline(&mut plan);
        }
        self.rename(&mut plan);

        if plan != before {
            Logger::event(
                Event::PlanNormalized,
                &[
                    ("collection", plan.collection.as_str()),
                    ("operation", plan.operation.as_str()),
                    ("stages", plan.pipeline.len().to_string().as_str()),
                ],
            );
        }
        plan
    }

    fn rename(&self, plan: &mut QueryPlan) {
        let mut renamer = Renamer::new(&self.deployment, &plan.collection);
        renamer.query(&mut plan.filter);
        if let Some(projection) = plan.projection.as_mut() {
            renamer.projection(projection);
        }
        if let Some(sort) = plan.sort.as_mut() {
            renamer.sort(sort);
        }
        renamer.pipeline(&mut plan.pipeline);
    }
}

fn repair_keys(document: &mut Map<String, Value>) {
    for (wrong, canonical) in KEY_REPAIRS {
        if document.contains_key(*canonical) {
            continue;
        }
        if let Some(value) = document.remove(*wrong) {
            document.insert((*canonical).to_string(), value);
        }
    }
}

fn hoist_plan_options(plan: &mut QueryPlan) {
    if let Some(value) = plan.filter.remove("$sort") {
        if plan.sort.is_none() {
            plan.sort = read_sort(Some(&value)).ok().flatten();
        }
    }
    if let Some(value) = plan.filter.remove("$limit") {
        if plan.limit.is_none() {
            plan.limit = read_limit(Some(&value)).ok().flatten();
        }
    }
    for key in ["$project", "$projection"] {
        if let Some(value) = plan.filter.remove(key) {
            if plan.projection.is_none() {
                plan.projection = read_projection(Some(&value)).ok().flatten();
                if let Some(projection) = plan.projection.as_mut() {
                    repair_projection(projection);
                }
            }
        }
    }
}

/// Drop non-identifier exclusions when any inclusion or computed entry
/// is present
pub(crate) fn repair_projection(projection: &mut Map<String, Value>) {
    let mut includes = false;
    let mut excludes = false;
    for (key, value) in projection.iter() {
        if key == "_id" {
            continue;
        }
        match classify_projection(value) {
            ProjectionEntry::Exclude => excludes = true,
            _ => includes = true,
        }
    }
    if includes && excludes {
        projection.retain(|key, value| key == "_id" || classify_projection(value) != ProjectionEntry::Exclude);
    }
}

/// Split multi-stage documents, add missing `$` sigils and repair mixed
/// `$project` stages, descending into `$facet`
fn canonicalize_stages(stages: &mut Vec<Value>) {
    let mut out = Vec::with_capacity(stages.len());
    for stage in stages.drain(..) {
        let Value::Object(map) = stage else {
            out.push(stage);
            continue;
        };
        let all_stages = map.len() > 1 && map.keys().all(|key| stage_name(key).is_some());
        if all_stages || map.len() == 1 {
            for (key, mut argument) in map {
                let name = stage_name(&key).unwrap_or(key);
                repair_stage(&name, &mut argument);
                let mut single = Map::new();
                single.insert(name, argument);
                out.push(Value::Object(single));
            }
        } else {
            out.push(Value::Object(map));
        }
    }
    *stages = out;
}

fn repair_stage(name: &str, argument: &mut Value) {
    match (name, argument) {
        ("$project", Value::Object(projection)) => repair_projection(projection),
        ("$facet", Value::Object(facets)) => {
            for pipeline in facets.values_mut() {
                if let Value::Array(stages) = pipeline {
                    canonicalize_stages(stages);
                }
            }
        }
        _ => {}
    }
}

fn unwrap_match(filter: &mut Map<String, Value>) {
    while filter.len() == 1 {
        match filter.remove("$match") {
            Some(Value::Object(inner)) => *filter = inner,
            Some(other) => {
                filter.insert("$match".into(), other);
                break;
            }
            None => break,
        }
    }
}

fn hoist_pipeline_stages(plan: &mut QueryPlan) {
    if !plan.filter.keys().any(|key| PIPELINE_ONLY.contains(&key.as_str())) {
        return;
    }
    let mut hoisted = Vec::new();
    let mut residual = Map::new();
    for (key, value) in std::mem::take(&mut plan.filter) {
        if !PIPELINE_ONLY.contains(&key.as_str()) {
            residual.insert(key, value);
            continue;
        }
        let arguments = match value {
            Value::Array(items) if items.iter().all(Value::is_object) => items,
            other => vec![other],
        };
        for argument in arguments {
            let mut stage = Map::new();
            stage.insert(key.clone(), argument);
            hoisted.push(Value::Object(stage));
        }
    }
    unwrap_match(&mut residual);

    let mut pipeline = Vec::with_capacity(hoisted.len() + plan.pipeline.len() + 1);
    if !residual.is_empty() {
        let mut stage = Map::new();
        stage.insert("$match".into(), Value::Object(residual));
        pipeline.push(Value::Object(stage));
    }
    pipeline.extend(hoisted);
    pipeline.append(&mut plan.pipeline);
    plan.pipeline = pipeline;
    plan.operation = Operation::Aggregate;
}

fn fold_into_pipeline(plan: &mut QueryPlan) {
    if !plan.filter.is_empty() {
        let mut stage = Map::new();
        stage.insert("$match".into(), Value::Object(std::mem::take(&mut plan.filter)));
        plan.pipeline.insert(0, Value::Object(stage));
    }
    if let Some(sort) = plan.sort.take() {
        let mut stage = Map::new();
        stage.insert("$sort".into(), Value::Object(sort));
        // Ahead of the first page cut
        let at = plan
            .pipeline
            .iter()
            .position(|stage| stage.get("$limit").is_some() || stage.get("$skip").is_some())
            .unwrap_or(plan.pipeline.len());
        plan.pipeline.insert(at, Value::Object(stage));
    }
    if let Some(projection) = plan.projection.take() {
        let mut stage = Map::new();
        stage.insert("$project".into(), Value::Object(projection));
        plan.pipeline.push(Value::Object(stage));
    }
}
