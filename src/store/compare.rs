//! Value ordering, equality and path access over BSON

use std::cmp::Ordering;

use bson::{Bson, Document};

/// Cross-type ordering bracket:
/// null < numbers < strings < documents < arrays < binary < ids < booleans < dates < regex
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) | Bson::Timestamp(_) => 9,
        Bson::RegularExpression(_) => 10,
        Bson::MaxKey => 12,
        _ => 11,
    }
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

pub(crate) fn same_bracket(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b)
}

/// Total order used by sorts and range operators
pub(crate) fn compare(a: &Bson, b: &Bson) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::Array(x), Bson::Array(y)) => compare_sequences(x.iter(), y.iter()),
        (Bson::Document(x), Bson::Document(y)) => {
            for ((key_a, value_a), (key_b, value_b)) in x.iter().zip(y.iter()) {
                let ordering = key_a.cmp(key_b).then_with(|| compare(value_a, value_b));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn compare_sequences<'a>(
    mut a: impl Iterator<Item = &'a Bson>,
    mut b: impl Iterator<Item = &'a Bson>,
) -> Ordering {
    loop {
        match (a.next(), b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = compare(x, y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    same_bracket(a, b) && compare(a, b) == Ordering::Equal
}

pub(crate) fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Null | Bson::Undefined => false,
        Bson::Boolean(b) => *b,
        other => as_f64(other).map(|f| f != 0.0).unwrap_or(true),
    }
}

/// Every value reachable at a dotted path, descending through arrays of
/// documents. Numeric segments index into arrays.
pub(crate) fn resolve_path(document: &Document, path: &str) -> Vec<Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = document.get(*head) {
            resolve_in(value, rest, &mut out);
        }
    }
    out
}

fn resolve_in(value: &Bson, segments: &[&str], out: &mut Vec<Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value.clone());
        return;
    };
    match value {
        Bson::Document(document) => {
            if let Some(child) = document.get(*head) {
                resolve_in(child, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    resolve_in(item, rest, out);
                }
                return;
            }
            for item in items {
                if matches!(item, Bson::Document(_)) {
                    resolve_in(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

/// Expression-style path value: arrays of documents yield arrays of the
/// sub-values. Missing paths yield `None`.
pub(crate) fn path_value(document: &Document, path: &str) -> Option<Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let (head, rest) = segments.split_first()?;
    path_value_in(document.get(*head)?, rest)
}

fn path_value_in(value: &Bson, segments: &[&str]) -> Option<Bson> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match value {
        Bson::Document(document) => path_value_in(document.get(*head)?, rest),
        Bson::Array(items) => Some(Bson::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(_) => path_value_in(item, segments),
                    _ => None,
                })
                .collect(),
        )),
        _ => None,
    }
}

/// Set a dotted path, creating intermediate documents
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

pub(crate) fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(child)) => remove_path(child, rest),
            Some(Bson::Array(items)) => {
                for item in items.iter_mut() {
                    if let Bson::Document(child) = item {
                        remove_path(child, rest);
                    }
                }
            }
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_numbers_compare_across_widths() {
        assert!(values_equal(&Bson::Int32(1), &Bson::Double(1.0)));
        assert_eq!(compare(&Bson::Int64(2), &Bson::Double(1.5)), Ordering::Greater);
    }

    #[test]
    fn test_type_brackets() {
        assert_eq!(compare(&Bson::Null, &Bson::Int32(0)), Ordering::Less);
        assert_eq!(compare(&Bson::Int32(9), &Bson::String("a".into())), Ordering::Less);
        assert!(!values_equal(&Bson::Int32(1), &Bson::String("1".into())));
    }

    #[test]
    fn test_resolve_through_arrays() {
        let document = doc! {"items": [{"product": 1}, {"product": 2}, {"other": 3}]};
        assert_eq!(resolve_path(&document, "items.product"), vec![Bson::Int32(1), Bson::Int32(2)]);
        assert_eq!(resolve_path(&document, "items.1.product"), vec![Bson::Int32(2)]);
        assert!(resolve_path(&document, "missing").is_empty());
    }

    #[test]
    fn test_path_value_collects_arrays() {
        let document = doc! {"items": [{"q": 1}, {"q": 2}], "a": {"b": 5}};
        assert_eq!(
            path_value(&document, "items.q"),
            Some(Bson::Array(vec![Bson::Int32(1), Bson::Int32(2)]))
        );
        assert_eq!(path_value(&document, "a.b"), Some(Bson::Int32(5)));
        assert_eq!(path_value(&document, "a.c"), None);
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut document = doc! {"a": 1};
        set_path(&mut document, "b.c", Bson::Int32(2));
        assert_eq!(document, doc! {"a": 1, "b": {"c": 2}});
        remove_path(&mut document, "b.c");
        assert_eq!(document, doc! {"a": 1, "b": {}});
    }
}
