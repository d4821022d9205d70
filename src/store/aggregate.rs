//! Aggregation pipeline evaluation

use std::collections::BTreeMap;

use bson::{Bson, Document};

use super::compare::{compare, path_value, remove_path, resolve_path, set_path, values_equal};
use super::expr::{evaluate, reduce};
use super::filter::matches;
use super::project::apply_projection;
use super::{StoreError, StoreResult};

/// Run `stages` over `documents`. `collections` backs `$lookup`.
pub(crate) fn run_pipeline(
    collections: &BTreeMap<String, Vec<Document>>,
    mut documents: Vec<Document>,
    stages: &[Document],
) -> StoreResult<Vec<Document>> {
    for stage in stages {
        let mut entries = stage.iter();
        let (Some((operator, argument)), None) = (entries.next(), entries.next()) else {
            return Err(StoreError::query("each stage must have exactly one operator"));
        };
        documents = run_stage(collections, documents, operator, argument)?;
    }
    Ok(documents)
}

fn expect_document<'a>(argument: &'a Bson, stage: &str) -> StoreResult<&'a Document> {
    match argument {
        Bson::Document(document) => Ok(document),
        _ => Err(StoreError::query(format!("{} expects a document", stage))),
    }
}

fn expect_count(argument: &Bson, stage: &str) -> StoreResult<usize> {
    super::compare::as_f64(argument)
        .filter(|n| *n >= 0.0)
        .map(|n| n as usize)
        .ok_or_else(|| StoreError::query(format!("{} expects a non-negative number", stage)))
}

fn run_stage(
    collections: &BTreeMap<String, Vec<Document>>,
    documents: Vec<Document>,
    operator: &str,
    argument: &Bson,
) -> StoreResult<Vec<Document>> {
    match operator {
        "$match" => {
            let filter = expect_document(argument, operator)?;
            let mut kept = Vec::with_capacity(documents.len());
            for document in documents {
                if matches(&document, filter)? {
                    kept.push(document);
                }
            }
            Ok(kept)
        }
        "$sort" => {
            let mut documents = documents;
            sort_documents(&mut documents, expect_document(argument, operator)?);
            Ok(documents)
        }
        "$limit" => {
            let count = expect_count(argument, operator)?;
            Ok(documents.into_iter().take(count).collect())
        }
        "$skip" => {
            let count = expect_count(argument, operator)?;
            Ok(documents.into_iter().skip(count).collect())
        }
        "$sample" => {
            let size = expect_document(argument, operator)?
                .get("size")
                .map(|s| expect_count(s, operator))
                .transpose()?
                .unwrap_or(0);
            Ok(documents.into_iter().take(size).collect())
        }
        "$project" => {
            let projection = expect_document(argument, operator)?;
            documents.iter().map(|d| apply_projection(d, projection)).collect()
        }
        "$addFields" | "$set" => {
            let fields = expect_document(argument, operator)?;
            documents
                .into_iter()
                .map(|mut document| {
                    for (key, expression) in fields {
                        let value = evaluate(expression, &document)?;
                        set_path(&mut document, key, value);
                    }
                    Ok(document)
                })
                .collect()
        }
        "$unset" => {
            let paths: Vec<String> = match argument {
                Bson::String(path) => vec![path.clone()],
                Bson::Array(items) => items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect(),
                _ => return Err(StoreError::query("$unset expects a path or a list of paths")),
            };
            Ok(documents
                .into_iter()
                .map(|mut document| {
                    for path in &paths {
                        remove_path(&mut document, path);
                    }
                    document
                })
                .collect())
        }
        "$unwind" => unwind(documents, argument),
        "$lookup" => lookup(collections, documents, expect_document(argument, operator)?),
        "$group" => group(documents, expect_document(argument, operator)?),
        "$count" => {
            let Bson::String(field) = argument else {
                return Err(StoreError::query("$count expects a field name"));
            };
            if documents.is_empty() {
                return Ok(Vec::new());
            }
            let mut out = Document::new();
            out.insert(field.clone(), Bson::Int32(documents.len() as i32));
            Ok(vec![out])
        }
        "$sortByCount" => {
            let mut definition = Document::new();
            definition.insert("_id", argument.clone());
            definition.insert("count", bson::doc! {"$sum": 1});
            let mut grouped = group(documents, &definition)?;
            sort_documents(&mut grouped, &bson::doc! {"count": -1});
            Ok(grouped)
        }
        "$facet" => {
            let facets = expect_document(argument, operator)?;
            let mut out = Document::new();
            for (name, pipeline) in facets {
                let Bson::Array(stages) = pipeline else {
                    return Err(StoreError::query("$facet values must be pipelines"));
                };
                let stages: Vec<Document> = stages
                    .iter()
                    .map(|s| expect_document(s, "$facet stage").cloned())
                    .collect::<StoreResult<_>>()?;
                let results = run_pipeline(collections, documents.clone(), &stages)?;
                out.insert(name.clone(), results.into_iter().map(Bson::Document).collect::<Vec<_>>());
            }
            Ok(vec![out])
        }
        "$replaceRoot" | "$replaceWith" => {
            let expression = match (operator, argument) {
                ("$replaceRoot", Bson::Document(definition)) => definition
                    .get("newRoot")
                    .ok_or_else(|| StoreError::query("$replaceRoot requires newRoot"))?,
                (_, other) => other,
            };
            documents
                .iter()
                .map(|document| match evaluate(expression, document)? {
                    Bson::Document(root) => Ok(root),
                    _ => Err(StoreError::query("replacement root must be a document")),
                })
                .collect()
        }
        other => Err(StoreError::unsupported(format!("pipeline stage {}", other))),
    }
}

/// Stable sort by a `{field: direction}` specification
pub(crate) fn sort_documents(documents: &mut [Document], definition: &Document) {
    let keys: Vec<(String, bool)> = definition
        .iter()
        .map(|(key, direction)| (key.clone(), super::compare::as_f64(direction).map_or(true, |d| d >= 0.0)))
        .collect();
    documents.sort_by(|a, b| {
        for (key, ascending) in &keys {
            let left = sort_key(a, key, *ascending);
            let right = sort_key(b, key, *ascending);
            let ordering = compare(&left, &right);
            let ordering = if *ascending { ordering } else { ordering.reverse() };
            if ordering.is_ne() {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Arrays sort by their smallest element ascending and largest descending
fn sort_key(document: &Document, path: &str, ascending: bool) -> Bson {
    let mut values = Vec::new();
    for value in resolve_path(document, path) {
        match value {
            Bson::Array(items) if !items.is_empty() => values.extend(items),
            other => values.push(other),
        }
    }
    let picked = if ascending {
        values.into_iter().min_by(compare)
    } else {
        values.into_iter().max_by(compare)
    };
    picked.unwrap_or(Bson::Null)
}

fn unwind(documents: Vec<Document>, argument: &Bson) -> StoreResult<Vec<Document>> {
    let (path, preserve, index_field) = match argument {
        Bson::String(path) => (path.as_str(), false, None),
        Bson::Document(definition) => (
            definition.get_str("path").map_err(|_| StoreError::query("$unwind requires a path"))?,
            definition.get_bool("preserveNullAndEmptyArrays").unwrap_or(false),
            definition.get_str("includeArrayIndex").ok(),
        ),
        _ => return Err(StoreError::query("$unwind expects a path")),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| StoreError::query("$unwind path must start with '$'"))?;

    let mut out = Vec::new();
    for document in documents {
        match path_value(&document, field) {
            Some(Bson::Array(items)) if !items.is_empty() => {
                for (index, item) in items.into_iter().enumerate() {
                    let mut copy = document.clone();
                    set_path(&mut copy, field, item);
                    if let Some(index_field) = index_field {
                        copy.insert(index_field, Bson::Int64(index as i64));
                    }
                    out.push(copy);
                }
            }
            Some(Bson::Array(_)) | Some(Bson::Null) | None => {
                if preserve {
                    let mut copy = document;
                    if let Some(index_field) = index_field {
                        copy.insert(index_field, Bson::Null);
                    }
                    out.push(copy);
                }
            }
            Some(_) => {
                let mut copy = document;
                if let Some(index_field) = index_field {
                    copy.insert(index_field, Bson::Null);
                }
                out.push(copy);
            }
        }
    }
    Ok(out)
}

fn lookup(
    collections: &BTreeMap<String, Vec<Document>>,
    documents: Vec<Document>,
    definition: &Document,
) -> StoreResult<Vec<Document>> {
    if definition.contains_key("pipeline") {
        return Err(StoreError::unsupported("$lookup with a sub-pipeline"));
    }
    let field = |name: &str| {
        definition.get_str(name)
            .map_err(|_| StoreError::query(format!("$lookup requires {}", name)))
    };
    let (from, local, foreign, alias) = (field("from")?, field("localField")?, field("foreignField")?, field("as")?);
    let foreign_docs = collections.get(from).map(Vec::as_slice).unwrap_or(&[]);

    documents
        .into_iter()
        .map(|mut document| {
            let mut locals = Vec::new();
            for value in resolve_path(&document, local) {
                match value {
                    Bson::Array(items) => locals.extend(items),
                    other => locals.push(other),
                }
            }
            if locals.is_empty() {
                locals.push(Bson::Null);
            }
            let joined: Vec<Bson> = foreign_docs
                .iter()
                .filter(|candidate| {
                    let values = resolve_path(candidate, foreign);
                    locals.iter().any(|needle| {
                        if values.is_empty() {
                            return matches!(needle, Bson::Null);
                        }
                        values.iter().any(|value| match value {
                            Bson::Array(items) => items.iter().any(|item| values_equal(item, needle)),
                            other => values_equal(other, needle),
                        })
                    })
                })
                .cloned()
                .map(Bson::Document)
                .collect();
            set_path(&mut document, alias, Bson::Array(joined));
            Ok(document)
        })
        .collect()
}

enum Accumulator {
    Collect { operator: String, values: Vec<Bson> },
    First(Option<Bson>),
    Last(Bson),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
    Count(i64),
}

impl Accumulator {
    fn new(operator: &str) -> StoreResult<Self> {
        Ok(match operator {
            "$sum" | "$avg" | "$min" | "$max" => Accumulator::Collect {
                operator: operator.to_string(),
                values: Vec::new(),
            },
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            "$count" => Accumulator::Count(0),
            other => return Err(StoreError::unsupported(format!("accumulator {}", other))),
        })
    }

    fn add(&mut self, value: Bson) {
        match self {
            Accumulator::Collect { values, .. } => values.push(value),
            Accumulator::First(slot) => {
                if slot.is_none() {
                    *slot = Some(value);
                }
            }
            Accumulator::Last(slot) => *slot = value,
            Accumulator::Push(items) => items.push(value),
            Accumulator::AddToSet(items) => {
                if !items.iter().any(|existing| values_equal(existing, &value)) {
                    items.push(value);
                }
            }
            Accumulator::Count(n) => *n += 1,
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Collect { operator, values } => reduce(&operator, &values),
            Accumulator::First(slot) => slot.unwrap_or(Bson::Null),
            Accumulator::Last(value) => value,
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
            Accumulator::Count(n) => number_i64(n),
        }
    }
}

fn number_i64(n: i64) -> Bson {
    match i32::try_from(n) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(n),
    }
}

fn group(documents: Vec<Document>, definition: &Document) -> StoreResult<Vec<Document>> {
    let id_expression = definition.get("_id").unwrap_or(&Bson::Null);
    let mut outputs = Vec::new();
    for (name, accumulator) in definition {
        if name == "_id" {
            continue;
        }
        let Bson::Document(accumulator) = accumulator else {
            return Err(StoreError::query(format!("$group field '{}' needs an accumulator", name)));
        };
        let mut entries = accumulator.iter();
        let (Some((operator, expression)), None) = (entries.next(), entries.next()) else {
            return Err(StoreError::query(format!("$group field '{}' needs one accumulator", name)));
        };
        Accumulator::new(operator)?;
        outputs.push((name.clone(), operator.clone(), expression.clone()));
    }

    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();
    for document in &documents {
        let key = evaluate(id_expression, document)?;
        let position = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
            Some(position) => position,
            None => {
                let accumulators = outputs
                    .iter()
                    .map(|(_, operator, _)| Accumulator::new(operator))
                    .collect::<StoreResult<Vec<_>>>()?;
                groups.push((key, accumulators));
                groups.len() - 1
            }
        };
        for ((_, _, expression), accumulator) in outputs.iter().zip(groups[position].1.iter_mut()) {
            let value = evaluate(expression, document)?;
            accumulator.add(value);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, accumulators)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for ((name, _, _), accumulator) in outputs.iter().zip(accumulators) {
                out.insert(name.clone(), accumulator.finish());
            }
            out
        })
        .collect())
}
