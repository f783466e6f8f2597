//! Built-in validation rules.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::errors::{Error, Result};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern is valid")
});

static URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}|localhost|\d{1,3}(?:\.\d{1,3}){3})(?::\d+)?(?:[/?#]\S*)?$",
    )
    .expect("url pattern is valid")
});

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A rule parameter, cast from its text form.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleParam {
    Int(i64),
    Float(f64),
    Str(String),
}

impl RuleParam {
    pub fn parse(raw: &str) -> Self {
        if let Ok(i) = raw.parse::<i64>() {
            RuleParam::Int(i)
        } else if let Ok(f) = raw.parse::<f64>()
            && f.is_finite()
        {
            RuleParam::Float(f)
        } else {
            RuleParam::Str(raw.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RuleParam::Int(i) => Some(*i as f64),
            RuleParam::Float(f) => Some(*f),
            RuleParam::Str(s) => s.parse().ok(),
        }
    }
}

impl fmt::Display for RuleParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleParam::Int(i) => write!(f, "{i}"),
            RuleParam::Float(v) => write!(f, "{v}"),
            RuleParam::Str(s) => f.write_str(s),
        }
    }
}

/// Split a parameter list on commas outside single or double quotes.
pub fn parse_params(raw: &str) -> Vec<RuleParam> {
    let mut params = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in raw.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => quote = Some(c),
            (None, ',') => params.push(RuleParam::parse(std::mem::take(&mut current).trim())),
            (None, c) => current.push(c),
        }
    }
    if !current.trim().is_empty() || !params.is_empty() {
        params.push(RuleParam::parse(current.trim()));
    }
    params
}

/// Everything a rule gets to look at for one field.
pub struct RuleContext<'a> {
    pub field: &'a str,
    pub value: &'a Value,
    pub params: &'a [RuleParam],
    /// The whole input, for rules that compare against other fields
    pub data: &'a Value,
}

impl RuleContext<'_> {
    fn param(&self, index: usize) -> Result<&RuleParam> {
        self.params.get(index).ok_or_else(|| Error::Internal {
            operation: format!("validate '{}': rule is missing parameter {}", self.field, index + 1),
        })
    }

    fn other(&self, index: usize) -> Result<Option<&Value>> {
        let other = self.param(index)?.to_string();
        Ok(lookup(self.data, &other))
    }
}

pub trait Rule: Send + Sync {
    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool>;

    /// Default message. `{field}` is replaced with the display name afterwards.
    fn message(&self, params: &[RuleParam]) -> String;

    /// Implicit rules also run when the value is null or empty.
    fn implicit(&self) -> bool {
        false
    }
}

type PassFn = fn(&RuleContext<'_>) -> Result<bool>;
type MessageFn = fn(&[RuleParam]) -> String;

struct BuiltinRule {
    passes: PassFn,
    message: MessageFn,
    implicit: bool,
}

impl Rule for BuiltinRule {
    fn passes(&self, ctx: &RuleContext<'_>) -> Result<bool> {
        (self.passes)(ctx)
    }

    fn message(&self, params: &[RuleParam]) -> String {
        (self.message)(params)
    }

    fn implicit(&self) -> bool {
        self.implicit
    }
}

/// Resolve a dot-notation path in a JSON document.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |current, key| match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// True for null and the empty string, which non-implicit rules let through.
pub fn is_empty_value(value: &Value) -> bool {
    matches!(value, Value::Null) || value.as_str().is_some_and(str::is_empty)
}

/// String form used by comparison rules.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn size(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        _ => None,
    }
}

fn bound(ctx: &RuleContext<'_>) -> Result<f64> {
    let param = ctx.param(0)?;
    param.as_f64().ok_or_else(|| Error::Internal {
        operation: format!("validate '{}': size parameter '{param}' is not numeric", ctx.field),
    })
}

fn joined(params: &[RuleParam]) -> String {
    params.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn first(params: &[RuleParam]) -> String {
    params.first().map(ToString::to_string).unwrap_or_default()
}

fn required(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(match ctx.value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

fn email(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx.value.as_str().is_some_and(|s| EMAIL.is_match(s)))
}

fn min(ctx: &RuleContext<'_>) -> Result<bool> {
    let n = bound(ctx)?;
    Ok(size(ctx.value).is_some_and(|size| size >= n))
}

fn max(ctx: &RuleContext<'_>) -> Result<bool> {
    let n = bound(ctx)?;
    Ok(size(ctx.value).is_some_and(|size| size <= n))
}

fn string(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx.value.is_string())
}

fn integer(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(match ctx.value {
        Value::Number(n) => n.is_i64() || n.is_u64(),
        Value::String(s) => s.trim().parse::<i64>().is_ok(),
        _ => false,
    })
}

fn numeric(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(match ctx.value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok_and(f64::is_finite),
        _ => false,
    })
}

fn boolean(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(match ctx.value {
        Value::Bool(_) => true,
        Value::Number(n) => matches!(n.as_i64(), Some(0 | 1)),
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "false" | "1" | "0" | "yes" | "no"),
        _ => false,
    })
}

fn regex(ctx: &RuleContext<'_>) -> Result<bool> {
    let pattern = ctx.param(0)?.to_string();
    let regex = Regex::new(&pattern).map_err(|e| Error::Internal {
        operation: format!("validate '{}': invalid regex '{pattern}': {e}", ctx.field),
    })?;
    Ok(value_as_string(ctx.value).is_some_and(|s| regex.find(&s).is_some_and(|m| m.start() == 0)))
}

fn in_list(ctx: &RuleContext<'_>) -> Result<bool> {
    let Some(value) = value_as_string(ctx.value) else {
        return Ok(false);
    };
    Ok(ctx.params.iter().any(|p| p.to_string() == value || RuleParam::parse(&value) == *p))
}

fn not_in_list(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(!in_list(ctx)?)
}

fn confirmed(ctx: &RuleContext<'_>) -> Result<bool> {
    let confirmation = lookup(ctx.data, &format!("{}_confirmation", ctx.field));
    Ok(confirmation == Some(ctx.value))
}

fn same(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx.other(0)? == Some(ctx.value))
}

fn different(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx.other(0)? != Some(ctx.value))
}

fn url(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx.value.as_str().is_some_and(|s| URL.is_match(s)))
}

fn date(ctx: &RuleContext<'_>) -> Result<bool> {
    let Some(s) = ctx.value.as_str() else {
        return Ok(false);
    };
    let s = s.trim();
    Ok(DateTime::parse_from_rfc3339(s).is_ok()
        || DATETIME_FORMATS.iter().any(|f| NaiveDateTime::parse_from_str(s, f).is_ok())
        || DATE_FORMATS.iter().any(|f| NaiveDate::parse_from_str(s, f).is_ok()))
}

fn chars_match(value: &Value, allowed: fn(char) -> bool) -> bool {
    value.as_str().is_some_and(|s| !s.is_empty() && s.chars().all(allowed))
}

fn alpha(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(chars_match(ctx.value, |c| c.is_ascii_alphabetic()))
}

fn alpha_num(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(chars_match(ctx.value, |c| c.is_ascii_alphanumeric()))
}

fn alpha_dash(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(chars_match(ctx.value, |c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
}

fn array(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx.value.is_array() || ctx.value.is_object())
}

fn json(ctx: &RuleContext<'_>) -> Result<bool> {
    Ok(ctx
        .value
        .as_str()
        .is_some_and(|s| serde_json::from_str::<Value>(s).is_ok()))
}

fn builtin(passes: PassFn, message: MessageFn) -> Arc<dyn Rule> {
    Arc::new(BuiltinRule {
        passes,
        message,
        implicit: false,
    })
}

/// Rules that only mark a field and never fail.
pub const MARKER_RULES: [&str; 2] = ["nullable", "sometimes"];

pub(crate) static BUILTIN_RULES: Lazy<HashMap<&'static str, Arc<dyn Rule>>> = Lazy::new(|| {
    let mut rules: HashMap<&'static str, Arc<dyn Rule>> = HashMap::new();
    rules.insert(
        "required",
        Arc::new(BuiltinRule {
            passes: required,
            message: |_| "The {field} field is required.".to_string(),
            implicit: true,
        }),
    );
    rules.insert("email", builtin(email, |_| "The {field} must be a valid email address.".to_string()));
    rules.insert("min", builtin(min, |p| format!("The {{field}} must be at least {}.", first(p))));
    rules.insert(
        "max",
        builtin(max, |p| format!("The {{field}} must not be greater than {}.", first(p))),
    );
    rules.insert("string", builtin(string, |_| "The {field} must be a string.".to_string()));
    rules.insert("integer", builtin(integer, |_| "The {field} must be an integer.".to_string()));
    rules.insert("numeric", builtin(numeric, |_| "The {field} must be a number.".to_string()));
    rules.insert("boolean", builtin(boolean, |_| "The {field} must be true or false.".to_string()));
    rules.insert("regex", builtin(regex, |_| "The {field} format is invalid.".to_string()));
    rules.insert("in", builtin(in_list, |p| format!("The {{field}} must be one of: {}.", joined(p))));
    rules.insert(
        "not_in",
        builtin(not_in_list, |p| format!("The {{field}} must not be one of: {}.", joined(p))),
    );
    rules.insert("confirmed", builtin(confirmed, |_| "The {field} confirmation does not match.".to_string()));
    rules.insert("same", builtin(same, |p| format!("The {{field}} must match {}.", first(p))));
    rules.insert(
        "different",
        builtin(different, |p| format!("The {{field}} must be different from {}.", first(p))),
    );
    rules.insert("url", builtin(url, |_| "The {field} must be a valid URL.".to_string()));
    rules.insert("date", builtin(date, |_| "The {field} must be a valid date.".to_string()));
    rules.insert("alpha", builtin(alpha, |_| "The {field} must only contain letters.".to_string()));
    rules.insert(
        "alpha_num",
        builtin(alpha_num, |_| "The {field} must only contain letters and numbers.".to_string()),
    );
    rules.insert(
        "alpha_dash",
        builtin(alpha_dash, |_| {
            "The {field} must only contain letters, numbers, dashes and underscores.".to_string()
        }),
    );
    rules.insert("array", builtin(array, |_| "The {field} must be an array.".to_string()));
    rules.insert("json", builtin(json, |_| "The {field} must be a valid JSON string.".to_string()));
    rules
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(rule: &str, value: Value, params: &str) -> bool {
        let data = json!({ "field": value.clone() });
        let params = parse_params(params);
        let ctx = RuleContext {
            field: "field",
            value: &value,
            params: &params,
            data: &data,
        };
        BUILTIN_RULES[rule].passes(&ctx).unwrap()
    }

    #[test]
    fn test_parse_params_casts_and_quotes() {
        assert_eq!(
            parse_params("1,2.5,abc"),
            vec![RuleParam::Int(1), RuleParam::Float(2.5), RuleParam::Str("abc".into())]
        );
        assert_eq!(
            parse_params(r#"'a,b', "c""#),
            vec![RuleParam::Str("a,b".into()), RuleParam::Str("c".into())]
        );
        assert!(parse_params("").is_empty());
    }

    #[test]
    fn test_required() {
        assert!(!check("required", Value::Null, ""));
        assert!(!check("required", json!(""), ""));
        assert!(!check("required", json!([]), ""));
        assert!(!check("required", json!({}), ""));
        assert!(check("required", json!(0), ""));
        assert!(check("required", json!(false), ""));
    }

    #[test]
    fn test_size_rules() {
        assert!(check("min", json!("héllo"), "5"));
        assert!(!check("min", json!("héll"), "5"));
        assert!(check("max", json!(10), "10"));
        assert!(!check("max", json!(10.5), "10"));
        assert!(check("min", json!([1, 2]), "2"));
    }

    #[test]
    fn test_type_rules() {
        assert!(check("integer", json!("42"), ""));
        assert!(!check("integer", json!(true), ""));
        assert!(!check("integer", json!(1.5), ""));
        assert!(check("numeric", json!("1.5"), ""));
        assert!(!check("numeric", json!("abc"), ""));
        assert!(check("boolean", json!("yes"), ""));
        assert!(check("boolean", json!(1), ""));
        assert!(!check("boolean", json!(2), ""));
        assert!(check("json", json!(r#"{"a":1}"#), ""));
        assert!(!check("json", json!("{"), ""));
    }

    #[test]
    fn test_format_rules() {
        assert!(check("email", json!("a.b@example.com"), ""));
        assert!(!check("email", json!("nope@"), ""));
        assert!(check("url", json!("https://example.com/path?q=1"), ""));
        assert!(check("url", json!("http://localhost:8000"), ""));
        assert!(check("url", json!("http://127.0.0.1/x"), ""));
        assert!(!check("url", json!("ftp://example.com"), ""));
        assert!(check("date", json!("2024-02-29"), ""));
        assert!(check("date", json!("29/02/2024"), ""));
        assert!(check("date", json!("2024-02-29T10:00:00Z"), ""));
        assert!(!check("date", json!("2023-02-29"), ""));
        assert!(check("alpha_dash", json!("a-b_c1"), ""));
        assert!(!check("alpha_num", json!("a b"), ""));
        assert!(check("regex", json!("abc123"), "^[a-z]+"));
        assert!(!check("regex", json!("123abc"), "[a-z]+"));
    }

    #[test]
    fn test_in_compares_casted_params() {
        assert!(check("in", json!("b"), "a,b"));
        assert!(check("in", json!(2), "1,2"));
        assert!(check("in", json!("2"), "1,2"));
        assert!(!check("not_in", json!("a"), "a,b"));
    }

    #[test]
    fn test_lookup_dot_notation() {
        let data = json!({ "user": { "emails": ["a@b.co"] } });
        assert_eq!(lookup(&data, "user.emails.0"), Some(&json!("a@b.co")));
        assert_eq!(lookup(&data, "user.name"), None);
    }
}
