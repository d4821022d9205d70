//! Name-search conditions over joined documents

use serde_json::{json, Value};

fn regex_condition(path: &str, pattern: &str) -> Value {
    json!({ path: { "$regex": pattern, "$options": "i" } })
}

/// Case-insensitive partial match of `text` against the first or last name
/// under `prefix`.
///
/// A multi-word `text` also matches the first word on the first name
/// together with the remaining words on the last name. With `is_pattern`
/// the text is already a regular expression and is used verbatim.
pub fn full_name_condition(
    prefix: &str,
    first: &str,
    last: &str,
    text: &str,
    is_pattern: bool,
) -> Value {
    let first_path = format!("{}.{}", prefix, first);
    let last_path = format!("{}.{}", prefix, last);

    let text = text.trim();
    let pattern = if is_pattern {
        text.to_string()
    } else {
        regex::escape(text)
    };

    let mut branches = Vec::new();
    let words: Vec<&str> = text.split_whitespace().collect();
    if !is_pattern && words.len() > 1 {
        branches.push(json!({
            "$and": [
                regex_condition(&first_path, &regex::escape(words[0])),
                regex_condition(&last_path, &regex::escape(&words[1..].join(" "))),
            ]
        }));
    }
    branches.push(regex_condition(&first_path, &pattern));
    branches.push(regex_condition(&last_path, &pattern));

    json!({ "$or": branches })
}
