//! Collection inference from free text

use std::sync::OnceLock;

use regex::Regex;

/// Conversational or meta words; a query containing one is not about data
const META_KEYWORDS: &[&str] = &[
    "permission",
    "help",
    "who are you",
    "what can you",
    "hi",
    "hello",
    "thank",
    "access",
    "policy",
    "role",
    "system",
    "status",
    "info",
    "capabilities",
    "tutorial",
    "guide",
    "explain",
];

static META: OnceLock<Option<Regex>> = OnceLock::new();

fn meta_pattern() -> Option<&'static Regex> {
    META.get_or_init(|| {
        let alternatives: Vec<String> = META_KEYWORDS.iter().map(|kw| regex::escape(kw)).collect();
        Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).ok()
    })
    .as_ref()
}

/// Name of the collection `text` is about, if any.
///
/// Meta keywords (whole words only) yield `None`. Otherwise the first known
/// collection whose name, singular or plural form appears in the text wins;
/// spaces in the text are ignored for the latter checks.
pub fn infer_collection(text: &str, known: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    if meta_pattern().is_some_and(|meta| meta.is_match(&lower)) {
        return None;
    }
    let squeezed: String = lower.chars().filter(|c| !c.is_whitespace()).collect();

    known
        .iter()
        .find(|collection| {
            let name = collection.to_lowercase();
            if lower.contains(&name) || squeezed.contains(&name) {
                return true;
            }
            match name.strip_suffix('s') {
                Some(singular) => !singular.is_empty() && squeezed.contains(singular),
                None => squeezed.contains(&format!("{}s", name)),
            }
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Vec<String> {
        ["orders", "customers", "products", "categories", "inventory"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_exact_and_singular_matches() {
        assert_eq!(infer_collection("list all orders", &known()), Some("orders".into()));
        assert_eq!(infer_collection("cheapest product", &known()), Some("products".into()));
        assert_eq!(infer_collection("show categorie s", &known()), Some("categories".into()));
    }

    #[test]
    fn test_plural_of_singular_collection() {
        let known = vec!["person".to_string()];
        assert_eq!(infer_collection("all persons", &known), Some("person".into()));
    }

    #[test]
    fn test_meta_keywords_yield_none() {
        assert_eq!(infer_collection("Hello there", &known()), None);
        assert_eq!(infer_collection("what permission do I have on orders", &known()), None);
        assert_eq!(infer_collection("order status", &known()), None);
    }

    #[test]
    fn test_meta_keywords_match_whole_words_only() {
        assert_eq!(infer_collection("shipped orders", &known()), Some("orders".into()));
    }

    #[test]
    fn test_unknown_text() {
        assert_eq!(infer_collection("the weather today", &known()), None);
        assert_eq!(infer_collection("anything", &[]), None);
    }
}
