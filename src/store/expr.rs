//! Aggregation expression evaluation

use std::fmt::Write as _;

use bson::{Bson, Document};
use chrono::{Datelike, TimeZone, Timelike, Utc};

use super::compare::{as_f64, compare, is_truthy, path_value, values_equal};
use super::{StoreError, StoreResult};

/// Evaluate `expression` against `root`. Missing field references
/// evaluate to null.
pub(crate) fn evaluate(expression: &Bson, root: &Document) -> StoreResult<Bson> {
    match expression {
        Bson::String(text) => Ok(string_value(text, root)),
        Bson::Array(items) => Ok(Bson::Array(
            items
                .iter()
                .map(|item| evaluate(item, root))
                .collect::<StoreResult<_>>()?,
        )),
        Bson::Document(document) => match single_operator(document) {
            Some((operator, argument)) => apply(operator, argument, root),
            None => {
                let mut out = Document::new();
                for (key, value) in document {
                    out.insert(key.clone(), evaluate(value, root)?);
                }
                Ok(Bson::Document(out))
            }
        },
        other => Ok(other.clone()),
    }
}

fn string_value(text: &str, root: &Document) -> Bson {
    if text == "$$ROOT" || text == "$$CURRENT" {
        return Bson::Document(root.clone());
    }
    if let Some(path) = text.strip_prefix("$$ROOT.").or_else(|| text.strip_prefix("$$CURRENT.")) {
        return path_value(root, path).unwrap_or(Bson::Null);
    }
    match text.strip_prefix('$') {
        Some(path) if !path.starts_with('$') && !path.is_empty() => {
            path_value(root, path).unwrap_or(Bson::Null)
        }
        _ => Bson::String(text.to_string()),
    }
}

fn single_operator(document: &Document) -> Option<(&str, &Bson)> {
    let mut entries = document.iter();
    let (key, value) = entries.next()?;
    if entries.next().is_some() || !key.starts_with('$') {
        return None;
    }
    Some((key.as_str(), value))
}

fn arguments(argument: &Bson, root: &Document) -> StoreResult<Vec<Bson>> {
    match argument {
        Bson::Array(items) => items.iter().map(|item| evaluate(item, root)).collect(),
        other => Ok(vec![evaluate(other, root)?]),
    }
}

fn number(value: f64) -> Bson {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        let whole = value as i64;
        match i32::try_from(whole) {
            Ok(small) => Bson::Int32(small),
            Err(_) => Bson::Int64(whole),
        }
    } else {
        Bson::Double(value)
    }
}

fn numeric(values: &[Bson], operator: &str) -> StoreResult<Option<Vec<f64>>> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        match value {
            Bson::Null | Bson::Undefined => return Ok(None),
            other => out.push(
                as_f64(other)
                    .ok_or_else(|| StoreError::query(format!("{} expects numbers", operator)))?,
            ),
        }
    }
    Ok(Some(out))
}

/// Flatten a single array argument, as accumulator-style operators allow
fn spread(values: Vec<Bson>) -> Vec<Bson> {
    match values.as_slice() {
        [Bson::Array(items)] => items.clone(),
        _ => values,
    }
}

fn as_datetime(value: &Bson) -> Option<chrono::DateTime<Utc>> {
    match value {
        Bson::DateTime(dt) => Utc.timestamp_millis_opt(dt.timestamp_millis()).single(),
        _ => None,
    }
}

fn date_part(argument: &Bson, root: &Document, part: fn(&chrono::DateTime<Utc>) -> i64) -> StoreResult<Bson> {
    let target = match argument {
        Bson::Document(inner) if inner.contains_key("date") => inner.get("date").unwrap_or(&Bson::Null),
        other => other,
    };
    let value = evaluate(target, root)?;
    Ok(match as_datetime(&value) {
        Some(dt) => number(part(&dt) as f64),
        None => Bson::Null,
    })
}

fn apply(operator: &str, argument: &Bson, root: &Document) -> StoreResult<Bson> {
    match operator {
        "$literal" => Ok(argument.clone()),
        "$concat" => {
            let mut out = String::new();
            for value in arguments(argument, root)? {
                match value {
                    Bson::String(text) => out.push_str(&text),
                    Bson::Null | Bson::Undefined => return Ok(Bson::Null),
                    _ => return Err(StoreError::query("$concat expects strings")),
                }
            }
            Ok(Bson::String(out))
        }
        "$ifNull" => {
            for value in arguments(argument, root)? {
                if !matches!(value, Bson::Null | Bson::Undefined) {
                    return Ok(value);
                }
            }
            Ok(Bson::Null)
        }
        "$toUpper" | "$toLower" => {
            let value = arguments(argument, root)?.into_iter().next().unwrap_or(Bson::Null);
            let text = match value {
                Bson::String(text) => text,
                Bson::Null | Bson::Undefined => String::new(),
                other => to_text(&other),
            };
            Ok(Bson::String(if operator == "$toUpper" {
                text.to_uppercase()
            } else {
                text.to_lowercase()
            }))
        }
        "$toString" => {
            let value = evaluate(argument, root)?;
            Ok(match value {
                Bson::Null | Bson::Undefined => Bson::Null,
                other => Bson::String(to_text(&other)),
            })
        }
        "$add" | "$multiply" => {
            let values = arguments(argument, root)?;
            let mut date_base = None;
            let mut plain = Vec::new();
            for value in values {
                match value {
                    Bson::DateTime(dt) if operator == "$add" => date_base = Some(dt),
                    other => plain.push(other),
                }
            }
            let Some(nums) = numeric(&plain, operator)? else { return Ok(Bson::Null) };
            let result = if operator == "$add" {
                nums.iter().sum::<f64>()
            } else {
                nums.iter().product::<f64>()
            };
            Ok(match date_base {
                Some(dt) => Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis() + result as i64)),
                None => number(result),
            })
        }
        "$subtract" | "$divide" | "$mod" => {
            let values = arguments(argument, root)?;
            if values.len() != 2 {
                return Err(StoreError::query(format!("{} expects two arguments", operator)));
            }
            if let (Bson::DateTime(a), Bson::DateTime(b)) = (&values[0], &values[1]) {
                if operator == "$subtract" {
                    return Ok(Bson::Int64(a.timestamp_millis() - b.timestamp_millis()));
                }
            }
            let Some(nums) = numeric(&values, operator)? else { return Ok(Bson::Null) };
            match operator {
                "$subtract" => Ok(number(nums[0] - nums[1])),
                _ if nums[1] == 0.0 => Err(StoreError::query(format!("{} by zero", operator))),
                "$divide" => Ok(Bson::Double(nums[0] / nums[1])),
                _ => Ok(number(nums[0] % nums[1])),
            }
        }
        "$abs" => {
            let values = arguments(argument, root)?;
            let Some(nums) = numeric(&values[..values.len().min(1)], operator)? else { return Ok(Bson::Null) };
            Ok(nums.first().map(|n| number(n.abs())).unwrap_or(Bson::Null))
        }
        "$round" => {
            let values = arguments(argument, root)?;
            let Some(nums) = numeric(&values, operator)? else { return Ok(Bson::Null) };
            let Some(value) = nums.first() else { return Ok(Bson::Null) };
            let places = nums.get(1).copied().unwrap_or(0.0) as i32;
            let scale = 10f64.powi(places);
            let rounded = (value * scale).round() / scale;
            Ok(if places > 0 { Bson::Double(rounded) } else { number(rounded) })
        }
        "$size" => match evaluate(argument, root)? {
            Bson::Array(items) => Ok(Bson::Int32(items.len() as i32)),
            _ => Err(StoreError::query("$size expects an array")),
        },
        "$arrayElemAt" => {
            let values = arguments(argument, root)?;
            match values.as_slice() {
                [Bson::Array(items), index] => {
                    let index = as_f64(index).ok_or_else(|| StoreError::query("$arrayElemAt index"))? as i64;
                    let position = if index < 0 { items.len() as i64 + index } else { index };
                    Ok(usize::try_from(position)
                        .ok()
                        .and_then(|p| items.get(p).cloned())
                        .unwrap_or(Bson::Null))
                }
                [Bson::Null, _] => Ok(Bson::Null),
                _ => Err(StoreError::query("$arrayElemAt expects an array and an index")),
            }
        }
        "$first" | "$last" => match evaluate(argument, root)? {
            Bson::Array(items) => Ok(if operator == "$first" { items.first() } else { items.last() }
                .cloned()
                .unwrap_or(Bson::Null)),
            Bson::Null => Ok(Bson::Null),
            _ => Err(StoreError::query(format!("{} expects an array", operator))),
        },
        "$cond" => {
            let (condition, then, otherwise) = match argument {
                Bson::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
                Bson::Document(inner) => (
                    inner.get("if").unwrap_or(&Bson::Null),
                    inner.get("then").unwrap_or(&Bson::Null),
                    inner.get("else").unwrap_or(&Bson::Null),
                ),
                _ => return Err(StoreError::query("$cond expects if, then and else")),
            };
            if is_truthy(&evaluate(condition, root)?) {
                evaluate(then, root)
            } else {
                evaluate(otherwise, root)
            }
        }
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" | "$cmp" => {
            let values = arguments(argument, root)?;
            if values.len() != 2 {
                return Err(StoreError::query(format!("{} expects two arguments", operator)));
            }
            let ordering = compare(&values[0], &values[1]);
            Ok(match operator {
                "$eq" => Bson::Boolean(values_equal(&values[0], &values[1])),
                "$ne" => Bson::Boolean(!values_equal(&values[0], &values[1])),
                "$gt" => Bson::Boolean(ordering.is_gt()),
                "$gte" => Bson::Boolean(ordering.is_ge()),
                "$lt" => Bson::Boolean(ordering.is_lt()),
                "$lte" => Bson::Boolean(ordering.is_le()),
                _ => Bson::Int32(ordering as i32),
            })
        }
        "$and" => Ok(Bson::Boolean(arguments(argument, root)?.iter().all(is_truthy))),
        "$or" => Ok(Bson::Boolean(arguments(argument, root)?.iter().any(is_truthy))),
        "$not" => Ok(Bson::Boolean(!arguments(argument, root)?.first().map_or(false, is_truthy))),
        "$in" => {
            let values = arguments(argument, root)?;
            match values.as_slice() {
                [needle, Bson::Array(haystack)] => {
                    Ok(Bson::Boolean(haystack.iter().any(|item| values_equal(item, needle))))
                }
                _ => Err(StoreError::query("$in expects a value and an array")),
            }
        }
        "$sum" | "$avg" | "$max" | "$min" => {
            let values = spread(arguments(argument, root)?);
            Ok(reduce(operator, &values))
        }
        "$year" => date_part(argument, root, |dt| dt.year() as i64),
        "$month" => date_part(argument, root, |dt| dt.month() as i64),
        "$dayOfMonth" => date_part(argument, root, |dt| dt.day() as i64),
        "$dayOfWeek" => date_part(argument, root, |dt| dt.weekday().number_from_sunday() as i64),
        "$hour" => date_part(argument, root, |dt| dt.hour() as i64),
        "$minute" => date_part(argument, root, |dt| dt.minute() as i64),
        "$dateToString" => {
            let Bson::Document(inner) = argument else {
                return Err(StoreError::query("$dateToString expects a document"));
            };
            let format = inner.get_str("format").unwrap_or("%Y-%m-%dT%H:%M:%S.%LZ");
            let value = evaluate(inner.get("date").unwrap_or(&Bson::Null), root)?;
            let Some(dt) = as_datetime(&value) else {
                return match inner.get("onNull") {
                    Some(fallback) => evaluate(fallback, root),
                    None => Ok(Bson::Null),
                };
            };
            let mut out = String::new();
            write!(out, "{}", dt.format(&format.replace("%L", "%3f")))
                .map_err(|_| StoreError::query(format!("invalid date format '{}'", format)))?;
            Ok(Bson::String(out))
        }
        other => Err(StoreError::unsupported(format!("expression operator {}", other))),
    }
}

/// Reduce values the way `$sum`, `$avg`, `$max` and `$min` do: non-numeric
/// values are ignored by the arithmetic forms
pub(crate) fn reduce(operator: &str, values: &[Bson]) -> Bson {
    match operator {
        "$sum" => number(values.iter().filter_map(as_f64).sum()),
        "$avg" => {
            let nums: Vec<f64> = values.iter().filter_map(as_f64).collect();
            if nums.is_empty() {
                Bson::Null
            } else {
                Bson::Double(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        _ => {
            let present = values.iter().filter(|v| !matches!(v, Bson::Null | Bson::Undefined));
            let picked = if operator == "$max" {
                present.max_by(|a, b| compare(a, b))
            } else {
                present.min_by(|a, b| compare(a, b))
            };
            picked.cloned().unwrap_or(Bson::Null)
        }
    }
}

fn to_text(value: &Bson) -> String {
    match value {
        Bson::String(text) => text.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => super::convert::datetime_to_string(*dt),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}
