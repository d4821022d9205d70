//! Query filter evaluation

use std::cmp::Ordering;

use bson::{Bson, Document, Regex as BsonRegex};
use regex::{Regex, RegexBuilder};

use super::compare::{compare, resolve_path, same_bracket, values_equal};
use super::expr::evaluate;
use super::{StoreError, StoreResult};

/// Whether `document` satisfies `filter`
pub(crate) fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (key, condition) in filter {
        let satisfied = match key.as_str() {
            "$and" => all_of(document, condition)?,
            "$or" => any_of(document, condition)?,
            "$nor" => !any_of(document, condition)?,
            "$expr" => super::compare::is_truthy(&evaluate(condition, document)?),
            "$comment" => true,
            operator if operator.starts_with('$') => {
                return Err(StoreError::unsupported(format!("query operator {}", operator)))
            }
            path => field_matches(document, path, condition)?,
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses(condition: &Bson) -> StoreResult<Vec<&Document>> {
    let Bson::Array(items) = condition else {
        return Err(StoreError::query("logical operator expects an array"));
    };
    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(StoreError::query("logical operator clauses must be documents")),
        })
        .collect()
}

fn all_of(document: &Document, condition: &Bson) -> StoreResult<bool> {
    for clause in clauses(condition)? {
        if !matches(document, clause)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_of(document: &Document, condition: &Bson) -> StoreResult<bool> {
    for clause in clauses(condition)? {
        if matches(document, clause)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(inner) if inner.keys().next().map_or(false, |k| k.starts_with('$')) => {
            Some(inner)
        }
        _ => None,
    }
}

fn field_matches(document: &Document, path: &str, condition: &Bson) -> StoreResult<bool> {
    let values = resolve_path(document, path);
    match is_operator_document(condition) {
        Some(operators) => operators_match(&values, operators),
        None => match condition {
            Bson::RegularExpression(pattern) => {
                let regex = compile(&pattern.pattern, &pattern.options)?;
                Ok(any_candidate(&values, |v| regex_matches(&regex, v)))
            }
            _ => Ok(equals_any(&values, condition)),
        },
    }
}

/// Each value plus the elements of array values
fn candidates(values: &[Bson]) -> impl Iterator<Item = &Bson> {
    values.iter().flat_map(|value| {
        let elements: &[Bson] = match value {
            Bson::Array(items) => items,
            _ => &[],
        };
        std::iter::once(value).chain(elements.iter())
    })
}

fn any_candidate(values: &[Bson], predicate: impl Fn(&Bson) -> bool) -> bool {
    candidates(values).any(predicate)
}

fn equals_any(values: &[Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }
    any_candidate(values, |v| values_equal(v, expected))
}

fn operators_match(values: &[Bson], operators: &Document) -> StoreResult<bool> {
    let options = operators.get_str("$options").unwrap_or("");
    for (operator, argument) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => equals_any(values, argument),
            "$ne" => !equals_any(values, argument),
            "$gt" => range(values, argument, |o| o == Ordering::Greater),
            "$gte" => range(values, argument, |o| o != Ordering::Less),
            "$lt" => range(values, argument, |o| o == Ordering::Less),
            "$lte" => range(values, argument, |o| o != Ordering::Greater),
            "$in" => in_list(values, argument)?,
            "$nin" => !in_list(values, argument)?,
            "$exists" => super::compare::is_truthy(argument) != values.is_empty(),
            "$regex" => {
                let regex = match argument {
                    Bson::String(pattern) => compile(pattern, options)?,
                    Bson::RegularExpression(BsonRegex { pattern, options: own }) => {
                        compile(pattern, if options.is_empty() { own.as_str() } else { options })?
                    }
                    _ => return Err(StoreError::query("$regex expects a string")),
                };
                any_candidate(values, |v| regex_matches(&regex, v))
            }
            "$options" => true,
            "$not" => match argument {
                Bson::Document(inner) => !operators_match(values, inner)?,
                Bson::RegularExpression(pattern) => {
                    let regex = compile(&pattern.pattern, &pattern.options)?;
                    !any_candidate(values, |v| regex_matches(&regex, v))
                }
                _ => return Err(StoreError::query("$not expects an operator document")),
            },
            "$size" => {
                let expected = super::compare::as_f64(argument)
                    .ok_or_else(|| StoreError::query("$size expects a number"))?;
                values.iter().any(|v| matches!(v, Bson::Array(items) if items.len() as f64 == expected))
            }
            "$all" => {
                let Bson::Array(required) = argument else {
                    return Err(StoreError::query("$all expects an array"));
                };
                !values.is_empty() && required.iter().all(|r| equals_any(values, r))
            }
            "$elemMatch" => {
                let Bson::Document(inner) = argument else {
                    return Err(StoreError::query("$elemMatch expects a document"));
                };
                elem_match(values, inner)?
            }
            other => return Err(StoreError::unsupported(format!("query operator {}", other))),
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

fn range(values: &[Bson], bound: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    any_candidate(values, |v| same_bracket(v, bound) && accept(compare(v, bound)))
}

fn in_list(values: &[Bson], argument: &Bson) -> StoreResult<bool> {
    let Bson::Array(options) = argument else {
        return Err(StoreError::query("$in expects an array"));
    };
    for option in options {
        let hit = match option {
            Bson::RegularExpression(pattern) => {
                let regex = compile(&pattern.pattern, &pattern.options)?;
                any_candidate(values, |v| regex_matches(&regex, v))
            }
            _ => equals_any(values, option),
        };
        if hit {
            return Ok(true);
        }
    }
    Ok(false)
}

fn elem_match(values: &[Bson], condition: &Document) -> StoreResult<bool> {
    let operator_form = condition.keys().next().map_or(false, |k| k.starts_with('$'))
        && !matches!(condition.keys().next().map(String::as_str), Some("$and" | "$or" | "$nor"));
    for value in values {
        let Bson::Array(items) = value else { continue };
        for item in items {
            let hit = if operator_form {
                operators_match(std::slice::from_ref(item), condition)?
            } else if let Bson::Document(element) = item {
                matches(element, condition)?
            } else {
                false
            };
            if hit {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn compile(pattern: &str, options: &str) -> StoreResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| StoreError::query(format!("invalid regex: {}", e)))
}

fn regex_matches(regex: &Regex, value: &Bson) -> bool {
    match value {
        Bson::String(text) | Bson::Symbol(text) => regex.is_match(text),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn order() -> Document {
        doc! {
            "status": "delivered",
            "total_amount": 250.0,
            "items": [{"product": "p1", "quantity": 2}, {"product": "p2", "quantity": 1}],
            "tags": ["gift", "rush"],
        }
    }

    #[test]
    fn test_equality_and_ranges() {
        let doc = order();
        assert!(matches(&doc, &doc! {"status": "delivered"}).unwrap());
        assert!(matches(&doc, &doc! {"total_amount": {"$gt": 100, "$lte": 250}}).unwrap());
        assert!(!matches(&doc, &doc! {"total_amount": {"$lt": 100}}).unwrap());
        assert!(!matches(&doc, &doc! {"status": {"$gt": 5}}).unwrap());
    }

    #[test]
    fn test_array_element_equality() {
        let doc = order();
        assert!(matches(&doc, &doc! {"tags": "gift"}).unwrap());
        assert!(matches(&doc, &doc! {"items.product": "p2"}).unwrap());
        assert!(matches(&doc, &doc! {"tags": {"$size": 2}}).unwrap());
        assert!(matches(&doc, &doc! {"tags": {"$all": ["rush", "gift"]}}).unwrap());
    }

    #[test]
    fn test_null_matches_missing() {
        let doc = order();
        assert!(matches(&doc, &doc! {"coupon": Bson::Null}).unwrap());
        assert!(matches(&doc, &doc! {"coupon": {"$exists": false}}).unwrap());
        assert!(!matches(&doc, &doc! {"status": {"$exists": false}}).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let doc = order();
        let filter = doc! {"$or": [{"status": "pending"}, {"tags": {"$in": ["rush"]}}]};
        assert!(matches(&doc, &filter).unwrap());
        let filter = doc! {"$nor": [{"status": "delivered"}]};
        assert!(!matches(&doc, &filter).unwrap());
        let filter = doc! {"$and": [{"status": "delivered"}, {"total_amount": {"$ne": 250}}]};
        assert!(!matches(&doc, &filter).unwrap());
    }

    #[test]
    fn test_regex_with_options() {
        let doc = order();
        assert!(matches(&doc, &doc! {"status": {"$regex": "^DELIV", "$options": "i"}}).unwrap());
        assert!(!matches(&doc, &doc! {"status": {"$regex": "^DELIV"}}).unwrap());
        assert!(matches(&doc, &doc! {"status": {"$not": {"$regex": "^pend"}}}).unwrap());
    }

    #[test]
    fn test_elem_match() {
        let doc = order();
        let filter = doc! {"items": {"$elemMatch": {"product": "p1", "quantity": {"$gte": 2}}}};
        assert!(matches(&doc, &filter).unwrap());
        let filter = doc! {"items": {"$elemMatch": {"product": "p2", "quantity": {"$gte": 2}}}};
        assert!(!matches(&doc, &filter).unwrap());
    }

    #[test]
    fn test_expr_compares_fields() {
        let doc = doc! {"a": 5, "b": 3};
        assert!(matches(&doc, &doc! {"$expr": {"$gt": ["$a", "$b"]}}).unwrap());
    }

    #[test]
    fn test_unknown_operator_is_unsupported() {
        let err = matches(&order(), &doc! {"status": {"$near": [0, 0]}}).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
        let err = matches(&order(), &doc! {"$text": {"$search": "x"}}).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
