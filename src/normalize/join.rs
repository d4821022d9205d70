//! Relationship-aware join repair

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::deployment::{full_name_condition, Deployment, RelationshipFact};
use crate::observability::{Event, Logger};
use crate::plan::paths::{field_ref, is_operator, root_of};
use crate::plan::{Operation, QueryPlan};

/// Corrects `$lookup` stages that join along a known relationship the
/// wrong way: a wrong source collection, or a wrong local field.
///
/// A corrected alias is renamed in every later stage. Later `$match`
/// conditions on a composite name under a full-name alias become a
/// first/last name condition.
pub struct JoinRepair {
    deployment: Arc<Deployment>,
}

impl JoinRepair {
    pub fn new(deployment: Arc<Deployment>) -> Self {
        Self { deployment }
    }

    /// Repair `plan` in place; returns the number of repairs applied
    pub fn repair(&self, plan: &mut QueryPlan) -> usize {
        if plan.operation != Operation::Aggregate {
            return 0;
        }
        let facts: Vec<&RelationshipFact> = self.deployment.facts_for(&plan.collection).collect();
        if facts.is_empty() {
            return 0;
        }

        let mut repairs = 0;
        for index in 0..plan.pipeline.len() {
            let Some(lookup) = lookup_mut(&mut plan.pipeline[index]) else {
                continue;
            };
            let local = string_member(lookup, "localField");
            let from = string_member(lookup, "from");
            let alias = string_member(lookup, "as");
            let Some(fact) = facts.iter().copied().find(|fact| {
                fact.matches_local(&local) && (fact.is_wrong_target(&from) || fact.target_collection == from)
            }) else {
                continue;
            };

            if fact.is_wrong_target(&from) {
                lookup.insert("from".into(), Value::String(fact.target_collection.clone()));
                lookup.insert("localField".into(), Value::String(fact.source_field.clone()));
                lookup.insert("foreignField".into(), Value::String(fact.target_field.clone()));
                lookup.insert("as".into(), Value::String(fact.alias.clone()));
                repairs += 1;
                log_repair(&plan.collection, index, "target", &from, &fact.target_collection);
                if !alias.is_empty() && alias != fact.alias {
                    for stage in plan.pipeline[index + 1..].iter_mut() {
                        rename_alias(stage, &alias, &fact.alias);
                    }
                }
            } else if local != fact.source_field {
                lookup.insert("localField".into(), Value::String(fact.source_field.clone()));
                repairs += 1;
                log_repair(&plan.collection, index, "local_field", &local, &fact.source_field);
            }

            let Some((first, last)) = fact.full_name_fields() else {
                continue;
            };
            let current_alias = match lookup_mut(&mut plan.pipeline[index]) {
                Some(lookup) => string_member(lookup, "as"),
                None => continue,
            };
            if current_alias.is_empty() {
                continue;
            }
            let composites: Vec<String> = fact
                .composite_name_fields
                .iter()
                .map(|name| format!("{}.{}", current_alias, name))
                .collect();
            for later in index + 1..plan.pipeline.len() {
                let Some(Value::Object(filter)) = plan.pipeline[later].get_mut("$match") else {
                    continue;
                };
                if expand_full_names(filter, &composites, &current_alias, first, last) {
                    repairs += 1;
                    log_repair(&plan.collection, later, "full_name", &current_alias, first);
                }
            }
        }
        repairs
    }
}

fn log_repair(collection: &str, stage: usize, kind: &str, from: &str, to: &str) {
    Logger::event(
        Event::JoinRepaired,
        &[
            ("collection", collection),
            ("from", from),
            ("kind", kind),
            ("stage", stage.to_string().as_str()),
            ("to", to),
        ],
    );
}

fn lookup_mut(stage: &mut Value) -> Option<&mut Map<String, Value>> {
    match stage.get_mut("$lookup") {
        Some(Value::Object(lookup)) => Some(lookup),
        _ => None,
    }
}

fn string_member(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

fn replace_root(path: &str, old: &str, new: &str) -> Option<String> {
    if root_of(path) != old {
        return None;
    }
    Some(format!("{}{}", new, &path[old.len()..]))
}

/// Rename the alias root `old` to `new` in keys, field references and
/// later join local fields
fn rename_alias(value: &mut Value, old: &str, new: &str) {
    match value {
        Value::Object(map) => {
            let entries = std::mem::take(map);
            for (key, mut child) in entries {
                if key == "$literal" {
                    map.insert(key, child);
                    continue;
                }
                if key == "localField" {
                    if let Value::String(local) = &mut child {
                        if let Some(renamed) = replace_root(local, old, new) {
                            *local = renamed;
                        }
                    }
                } else {
                    rename_alias(&mut child, old, new);
                }
                let key = if is_operator(&key) {
                    key
                } else {
                    replace_root(&key, old, new).unwrap_or(key)
                };
                map.insert(key, child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                rename_alias(item, old, new);
            }
        }
        Value::String(text) => {
            if let Some(renamed) = field_ref(text).and_then(|path| replace_root(path, old, new)) {
                *text = format!("${}", renamed);
            }
        }
        _ => {}
    }
}

/// Text searched for by a composite-name condition, and whether it is
/// already a pattern
fn name_search(condition: &Value) -> Option<(String, bool)> {
    match condition {
        Value::String(text) => Some((text.clone(), false)),
        Value::Object(operators) => match (operators.get("$regex"), operators.get("$eq")) {
            (Some(Value::String(pattern)), _) => Some((pattern.clone(), true)),
            (None, Some(Value::String(text))) if operators.len() == 1 => Some((text.clone(), false)),
            _ => None,
        },
        _ => None,
    }
}

fn expand_full_names(
    filter: &mut Map<String, Value>,
    composites: &[String],
    alias: &str,
    first: &str,
    last: &str,
) -> bool {
    let mut changed = false;
    for key in ["$and", "$or"] {
        if let Some(Value::Array(clauses)) = filter.get_mut(key) {
            for clause in clauses.iter_mut() {
                if let Value::Object(inner) = clause {
                    changed |= expand_full_names(inner, composites, alias, first, last);
                }
            }
        }
    }

    let mut conditions = Vec::new();
    for composite in composites {
        let Some((text, is_pattern)) = filter.get(composite).and_then(name_search) else {
            continue;
        };
        filter.remove(composite);
        conditions.push(full_name_condition(alias, first, last, &text, is_pattern));
    }
    if conditions.is_empty() {
        return changed;
    }

    if conditions.len() == 1 && !filter.contains_key("$or") {
        if let Some(Value::Object(mut condition)) = conditions.pop() {
            if let Some(branches) = condition.remove("$or") {
                filter.insert("$or".into(), branches);
            }
        }
        return true;
    }
    if let Some(existing) = filter.remove("$or") {
        let mut wrapped = Map::new();
        wrapped.insert("$or".into(), existing);
        conditions.insert(0, Value::Object(wrapped));
    }
    let mut clauses = match filter.remove("$and") {
        Some(Value::Array(clauses)) => clauses,
        Some(other) => vec![other],
        None => Vec::new(),
    };
    clauses.extend(conditions);
    filter.insert("$and".into(), Value::Array(clauses));
    true
}
