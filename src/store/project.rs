//! Projection of documents

use bson::{Bson, Document};

use super::compare::{is_truthy, remove_path, set_path};
use super::expr::evaluate;
use super::StoreResult;

enum Entry<'a> {
    Include,
    Exclude,
    Computed(&'a Bson),
}

fn classify(value: &Bson) -> Entry<'_> {
    match value {
        Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
            if is_truthy(value) {
                Entry::Include
            } else {
                Entry::Exclude
            }
        }
        other => Entry::Computed(other),
    }
}

/// Apply an inclusion or exclusion projection. `_id` is kept unless
/// explicitly excluded.
pub(crate) fn apply_projection(document: &Document, projection: &Document) -> StoreResult<Document> {
    let inclusion = projection
        .iter()
        .any(|(key, value)| key != "_id" && !matches!(classify(value), Entry::Exclude));

    if !inclusion {
        let mut out = document.clone();
        for (key, value) in projection {
            if matches!(classify(value), Entry::Exclude) {
                remove_path(&mut out, key);
            }
        }
        return Ok(out);
    }

    let mut out = Document::new();
    let keep_id = projection.get("_id").map_or(true, |v| !matches!(classify(v), Entry::Exclude));
    if keep_id {
        if let Some(id) = document.get("_id") {
            out.insert("_id", id.clone());
        }
    }
    for (key, value) in projection {
        if key == "_id" && !matches!(classify(value), Entry::Computed(_)) {
            continue;
        }
        match classify(value) {
            Entry::Include => include_path(document, &mut out, key),
            Entry::Exclude => {}
            Entry::Computed(expression) => {
                let computed = evaluate(expression, document)?;
                set_path(&mut out, key, computed);
            }
        }
    }
    Ok(out)
}

fn include_path(source: &Document, target: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            if let Some(value) = source.get(path) {
                target.insert(path, value.clone());
            }
        }
        Some((head, rest)) => match source.get(head) {
            Some(Bson::Document(child)) => {
                let mut partial = match target.get(head) {
                    Some(Bson::Document(existing)) => existing.clone(),
                    _ => Document::new(),
                };
                include_path(child, &mut partial, rest);
                target.insert(head, partial);
            }
            Some(Bson::Array(items)) => {
                let existing = match target.get(head) {
                    Some(Bson::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                let mut projected = Vec::new();
                let mut slots = existing.into_iter();
                for item in items {
                    if let Bson::Document(child) = item {
                        let mut partial = match slots.next() {
                            Some(Bson::Document(existing)) => existing,
                            _ => Document::new(),
                        };
                        include_path(child, &mut partial, rest);
                        projected.push(Bson::Document(partial));
                    }
                }
                target.insert(head, projected);
            }
            _ => {}
        },
    }
}
