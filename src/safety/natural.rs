//! Screening of natural-language query text

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("query cannot be empty")]
    Empty,

    #[error("query is {len} characters; at most {max} are accepted")]
    TooLong { len: usize, max: usize },

    #[error("query contains a potentially dangerous pattern: {0}")]
    SuspiciousPattern(String),
}

const INJECTION_PATTERNS: &[&str] = &[
    r";\s*drop\s+",
    r";\s*truncate\s+",
    r"union\s+select",
    r"exec\s*\(",
    r"execute\s*\(",
];

static CONTROL_CHARS: OnceLock<Option<Regex>> = OnceLock::new();
static INJECTIONS: OnceLock<Vec<(&'static str, Regex)>> = OnceLock::new();

fn control_chars() -> Option<&'static Regex> {
    CONTROL_CHARS
        .get_or_init(|| Regex::new(r"[\x00-\x1f\x7f-\x9f]").ok())
        .as_ref()
}

fn injections() -> &'static [(&'static str, Regex)] {
    INJECTIONS.get_or_init(|| {
        INJECTION_PATTERNS
            .iter()
            .filter_map(|pattern| {
                Regex::new(&format!("(?i){}", pattern))
                    .ok()
                    .map(|regex| (*pattern, regex))
            })
            .collect()
    })
}

/// Strip control characters and surrounding whitespace
pub fn sanitize_query(text: &str) -> String {
    match control_chars() {
        Some(regex) => regex.replace_all(text, "").trim().to_string(),
        None => text
            .chars()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .trim()
            .to_string(),
    }
}

/// Reject empty, oversized and injection-shaped input
pub fn validate_natural_query(text: &str, max_len: usize) -> Result<(), InputError> {
    if text.trim().is_empty() {
        return Err(InputError::Empty);
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(InputError::TooLong { len, max: max_len });
    }
    if let Some((pattern, _)) = injections().iter().find(|(_, regex)| regex.is_match(text)) {
        return Err(InputError::SuspiciousPattern((*pattern).to_string()));
    }
    Ok(())
}
