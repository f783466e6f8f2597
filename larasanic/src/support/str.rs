//! String helpers in the Laravel `Str::` style.

use once_cell::sync::Lazy;
use rand::distr::Alphanumeric;
use rand::prelude::RngExt;
use rand::rng;
use regex::Regex;

static WORD_BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)([A-Z][a-z]+)").expect("valid regex"));
static LOWER_UPPER: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").expect("valid regex"));
static SLUG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s-]").expect("valid regex"));
static SLUG_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s-]+").expect("valid regex"));

/// Convert a string to snake case (`FrameworkApp` -> `framework_app`).
pub fn snake(value: &str, delimiter: &str) -> String {
    if value.is_empty() {
        return String::new();
    }

    let value = value.replace(' ', delimiter);
    let value = WORD_BOUNDARY.replace_all(&value, format!("${{1}}{delimiter}${{2}}").as_str());
    let value = LOWER_UPPER.replace_all(&value, format!("${{1}}{delimiter}${{2}}").as_str());
    let value = value.to_lowercase();

    if delimiter.is_empty() {
        return value;
    }

    // Collapse repeated delimiters
    let doubled = delimiter.repeat(2);
    let mut collapsed = value;
    while collapsed.contains(&doubled) {
        collapsed = collapsed.replace(&doubled, delimiter);
    }
    collapsed.trim_matches(|c| delimiter.contains(c)).to_string()
}

pub fn kebab(value: &str) -> String {
    snake(value, "-")
}

/// Convert to StudlyCase (`framework_app` -> `FrameworkApp`).
pub fn studly(value: &str) -> String {
    value
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(capitalize)
        .collect()
}

/// Convert to camelCase (`framework_app` -> `frameworkApp`).
pub fn camel(value: &str) -> String {
    let studly = studly(value);
    let mut chars = studly.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// URL-friendly slug (`Framework App!` -> `framework-app`).
pub fn slug(value: &str, separator: &str) -> String {
    let lower = value.to_lowercase();
    let stripped = SLUG_STRIP.replace_all(&lower, "");
    let joined = SLUG_RUNS.replace_all(&stripped, separator);
    joined.trim_matches(|c| separator.contains(c)).to_string()
}

/// Title case, treating `_` and `-` as spaces.
pub fn title(value: &str) -> String {
    let spaced = value.replace(['_', '-'], " ");
    let mut out = String::with_capacity(spaced.len());
    let mut in_word = false;
    for c in spaced.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Cut a string at `limit` characters, appending `end` when it was cut.
pub fn limit(value: &str, limit: usize, end: &str) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let cut: String = value.chars().take(limit).collect();
    format!("{}{end}", cut.trim_end())
}

pub fn contains(haystack: &str, needle: &str) -> bool {
    !haystack.is_empty() && haystack.contains(needle)
}

pub fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| contains(haystack, n))
}

pub fn starts_with(haystack: &str, needles: &[&str]) -> bool {
    !haystack.is_empty() && needles.iter().any(|n| haystack.starts_with(n))
}

pub fn ends_with(haystack: &str, needles: &[&str]) -> bool {
    !haystack.is_empty() && needles.iter().any(|n| haystack.ends_with(n))
}

/// Random alphanumeric string of `length` characters.
pub fn random(length: usize) -> String {
    rng().sample_iter(&Alphanumeric).take(length).map(char::from).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake() {
        assert_eq!(snake("FrameworkApp", "_"), "framework_app");
        assert_eq!(snake("Framework App", "_"), "framework_app");
        assert_eq!(snake("frameworkApp", "_"), "framework_app");
        assert_eq!(snake("HTTPServer", "_"), "http_server");
        assert_eq!(snake("Framework  App", "_"), "framework_app");
        assert_eq!(kebab("FrameworkApp"), "framework-app");
    }

    #[test]
    fn test_studly_and_camel() {
        assert_eq!(studly("framework_app"), "FrameworkApp");
        assert_eq!(studly("framework-app server"), "FrameworkAppServer");
        assert_eq!(camel("framework_app"), "frameworkApp");
        assert_eq!(camel("Framework App"), "frameworkApp");
        assert_eq!(camel(""), "");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Framework App!", "-"), "framework-app");
        assert_eq!(slug("Hello World", "_"), "hello_world");
        assert_eq!(slug("  multiple -- dashes  ", "-"), "multiple-dashes");
    }

    #[test]
    fn test_title_and_limit() {
        assert_eq!(title("framework_app"), "Framework App");
        assert_eq!(title("hello-world"), "Hello World");
        assert_eq!(limit("Hello World", 5, "..."), "Hello...");
        assert_eq!(limit("Hello World", 6, "..."), "Hello...");
        assert_eq!(limit("Hi", 5, "..."), "Hi");
    }

    #[test]
    fn test_searching() {
        assert!(contains("Hello World", "World"));
        assert!(contains_any("Hello", &["Hi", "Hello"]));
        assert!(!contains("", "x"));
        assert!(starts_with("Framework", &["Frame"]));
        assert!(ends_with("Framework", &["nope", "work"]));
    }

    #[test]
    fn test_random() {
        let value = random(24);
        assert_eq!(value.len(), 24);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random(24), value);
    }
}
