//! Result enrichment with display names of referenced documents

use std::collections::{BTreeMap, BTreeSet};

use bson::{doc, Bson, Document};
use serde_json::{Map, Value};

use crate::deployment::{Deployment, RelationshipFact};
use crate::observability::{Event, Logger};
use crate::store::convert::document_to_json;
use crate::store::{DocumentStore, FindRequest, StoreResult};

use super::coerce::parse_object_id;

/// Add display names beside reference ids in `results`.
///
/// Existing keys are never overwritten. A failed lookup leaves the results
/// as they were.
pub(crate) async fn enrich_results(
    store: &dyn DocumentStore,
    deployment: &Deployment,
    collection: &str,
    results: Vec<Value>,
) -> Vec<Value> {
    let mut enriched = results.clone();
    for fact in deployment.facts_for(collection) {
        let (Some(display), Some(field)) = (&fact.display, &fact.enriched_field) else {
            continue;
        };
        let segments: Vec<&str> = fact.source_field.split('.').collect();
        let mut ids = BTreeSet::new();
        for row in &enriched {
            collect_ids(row, &segments, &mut ids);
        }
        if ids.is_empty() {
            continue;
        }
        let names = match lookup_names(store, fact, display, &ids).await {
            Ok(names) => names,
            Err(e) => {
                Logger::event(
                    Event::EnrichmentFailed,
                    &[
                        ("collection", collection),
                        ("target", fact.target_collection.as_str()),
                        ("error", e.to_string().as_str()),
                    ],
                );
                return results;
            }
        };
        for row in enriched.iter_mut() {
            inject_names(row, &segments, field, &names);
        }
    }
    enriched
}

fn collect_ids(value: &Value, segments: &[&str], out: &mut BTreeSet<String>) {
    let Some((head, rest)) = segments.split_first() else {
        if let Value::String(id) = value {
            if parse_object_id(id).is_some() {
                out.insert(id.clone());
            }
        }
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect_ids(child, rest, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ids(item, segments, out);
            }
        }
        _ => {}
    }
}

async fn lookup_names(
    store: &dyn DocumentStore,
    fact: &RelationshipFact,
    display: &crate::deployment::DisplayName,
    ids: &BTreeSet<String>,
) -> StoreResult<BTreeMap<String, String>> {
    let mut candidates: Vec<Bson> = Vec::with_capacity(ids.len() * 2);
    for id in ids {
        if let Some(oid) = parse_object_id(id) {
            candidates.push(Bson::ObjectId(oid));
        }
        candidates.push(Bson::String(id.clone()));
    }
    let mut projection = Document::new();
    projection.insert(fact.target_field.clone(), 1);
    for name in display.fields() {
        projection.insert(name, 1);
    }
    let mut filter = Document::new();
    filter.insert(fact.target_field.clone(), doc! {"$in": candidates});

    let request = FindRequest {
        filter,
        projection: Some(projection),
        sort: None,
        limit: None,
    };
    let found = store.find(&fact.target_collection, request).await?;

    let mut names = BTreeMap::new();
    for document in &found {
        let Value::Object(map) = document_to_json(document) else { continue };
        let key = match map.get(&fact.target_field) {
            Some(Value::String(key)) => key.clone(),
            _ => continue,
        };
        if let Some(name) = display.render(&map) {
            names.insert(key, name);
        }
    }
    Ok(names)
}

fn inject_names(value: &mut Value, segments: &[&str], field: &str, names: &BTreeMap<String, String>) {
    match value {
        Value::Array(items) => {
            for item in items.iter_mut() {
                inject_names(item, segments, field, names);
            }
        }
        Value::Object(map) => match segments {
            [leaf] => add_name(map, leaf, field, names),
            [head, rest @ ..] => {
                if let Some(child) = map.get_mut(*head) {
                    inject_names(child, rest, field, names);
                }
            }
            [] => {}
        },
        _ => {}
    }
}

fn add_name(map: &mut Map<String, Value>, leaf: &str, field: &str, names: &BTreeMap<String, String>) {
    if map.contains_key(field) {
        return;
    }
    let name = match map.get(leaf) {
        Some(Value::String(id)) => names.get(id).cloned(),
        _ => None,
    };
    if let Some(name) = name {
        map.insert(field.to_string(), Value::String(name));
    }
}
