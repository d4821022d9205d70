//! Field path helpers shared by the normalizer and the validators

use serde_json::Value;

/// True for operator-style keys such as `$match` or `$gt`
pub fn is_operator(key: &str) -> bool {
    key.starts_with('$')
}

/// First segment of a dotted path
pub fn root_of(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Last segment of a dotted path
pub fn leaf_of(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// The path named by a field reference string such as `$items.product`.
///
/// Variables (`$$ROOT`, `$$item`) and bare `$` are not field references.
pub fn field_ref(value: &str) -> Option<&str> {
    let rest = value.strip_prefix('$')?;
    let first = rest.chars().next()?;
    if first.is_alphanumeric() || first == '_' {
        Some(rest)
    } else {
        None
    }
}

/// Collect every field reference inside an aggregation expression.
///
/// Content under `$literal` is data, not references.
pub fn collect_field_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some(path) = field_ref(s) {
                out.push(path.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_field_refs(item, out);
            }
        }
        Value::Object(map) => {
            for (key, child) in map {
                if key == "$literal" {
                    continue;
                }
                collect_field_refs(child, out);
            }
        }
        _ => {}
    }
}

/// Rewrite every field reference in an expression through `rename`.
///
/// `rename` receives the path without its sigil and returns a replacement
/// path, or `None` to leave the reference alone.
pub fn rewrite_field_refs<F>(value: &mut Value, rename: &F)
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if let Some(replacement) = field_ref(s).and_then(rename) {
                *s = format!("${}", replacement);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_field_refs(item, rename);
            }
        }
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "$literal" {
                    continue;
                }
                rewrite_field_refs(child, rename);
            }
        }
        _ => {}
    }
}

/// What a `$replaceRoot`/`$replaceWith` stage makes the new document
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NewRoot<'v> {
    /// `$$ROOT`: the document is unchanged
    Unchanged,
    /// A document literal; its keys are the new fields
    Literal(&'v serde_json::Map<String, Value>),
    /// The embedded document at a field path
    Path(&'v str),
    /// Anything else; the new shape cannot be known
    Opaque,
}

/// Classify the argument of a root-replacing stage
pub fn classify_new_root<'v>(stage: &str, argument: &'v Value) -> NewRoot<'v> {
    let root = match stage {
        "$replaceRoot" => match argument.get("newRoot") {
            Some(root) => root,
            None => return NewRoot::Opaque,
        },
        _ => argument,
    };
    match root {
        Value::String(text) if text == "$$ROOT" || text == "$$CURRENT" => NewRoot::Unchanged,
        Value::String(text) => field_ref(text).map_or(NewRoot::Opaque, NewRoot::Path),
        Value::Object(map) if !map.keys().any(|key| is_operator(key)) => NewRoot::Literal(map),
        _ => NewRoot::Opaque,
    }
}

/// Projection entry classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionEntry {
    Include,
    Exclude,
    /// Any non-boolean, non-numeric value: an expression producing a new field
    Computed,
}

pub fn classify_projection(value: &Value) -> ProjectionEntry {
    match value {
        Value::Bool(true) => ProjectionEntry::Include,
        Value::Bool(false) => ProjectionEntry::Exclude,
        Value::Number(n) => {
            if n.as_f64().map(|f| f == 0.0).unwrap_or(false) {
                ProjectionEntry::Exclude
            } else {
                ProjectionEntry::Include
            }
        }
        _ => ProjectionEntry::Computed,
    }
}
