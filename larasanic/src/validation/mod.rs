//! Request data validation with pipe-separated rule strings.
//!
//! ```ignore
//! let data = validate_request(body, [("email", "required|email"), ("age", "integer|min:18")])?;
//! ```
//!
//! Each field runs its rules in order and stops at the first failure. Failures come back
//! as [`Error::Validation`], which renders as a 422 with the per-field messages.

pub mod rules;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::Arc,
};

pub use rules::{Rule, RuleContext, RuleParam};
use rules::{BUILTIN_RULES, MARKER_RULES, is_empty_value, lookup, parse_params};

use crate::errors::{Error, Result};

/// Messages per field, in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some_and(|m| !m.is_empty())
    }

    /// First message for `field`, or for any field when `None`.
    pub fn first(&self, field: Option<&str>) -> Option<&str> {
        match field {
            Some(field) => self.get(field).and_then(<[String]>::first).map(String::as_str),
            None => self.0.values().find_map(|m| m.first()).map(String::as_str),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(&self.0).unwrap_or_default()
    }

    pub fn into_inner(self) -> BTreeMap<String, Vec<String>> {
        self.0
    }
}

impl From<BTreeMap<String, Vec<String>>> for ValidationErrors {
    fn from(errors: BTreeMap<String, Vec<String>>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "The given data was invalid ({} field(s))", self.0.len())
    }
}

impl std::error::Error for ValidationErrors {}

/// Rules for one field, either `"required|email"` or a list.
///
/// List entries are never split on `|`, so use a list for regex rules containing pipes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet(Vec<String>);

impl RuleSet {
    fn extend(&mut self, other: RuleSet) {
        self.0.extend(other.0);
    }
}

impl From<&str> for RuleSet {
    fn from(rules: &str) -> Self {
        Self(
            rules
                .split('|')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

impl From<String> for RuleSet {
    fn from(rules: String) -> Self {
        Self::from(rules.as_str())
    }
}

impl From<Vec<&str>> for RuleSet {
    fn from(rules: Vec<&str>) -> Self {
        Self(rules.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for RuleSet {
    fn from(rules: Vec<String>) -> Self {
        Self(rules)
    }
}

impl<const N: usize> From<[&str; N]> for RuleSet {
    fn from(rules: [&str; N]) -> Self {
        Self(rules.iter().map(|r| r.to_string()).collect())
    }
}

fn parse_rule(spec: &str) -> (&str, Vec<RuleParam>) {
    match spec.split_once(':') {
        Some((name, params)) => (name.trim(), parse_params(params)),
        None => (spec.trim(), Vec::new()),
    }
}

/// Write `value` into `target` at a dot-notation path, creating objects on the way.
fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                insert_path(inner, rest, value);
            }
        }
    }
}

pub struct Validator {
    data: Value,
    rules: Vec<(String, RuleSet)>,
    messages: HashMap<String, String>,
    attributes: HashMap<String, String>,
    custom_rules: HashMap<String, Arc<dyn Rule>>,
    errors: ValidationErrors,
    validated: Option<Map<String, Value>>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("rules", &self.rules)
            .field("errors", &self.errors)
            .finish_non_exhaustive()
    }
}

impl Validator {
    pub fn new<I, K, R>(data: Value, rules: I) -> Self
    where
        I: IntoIterator<Item = (K, R)>,
        K: Into<String>,
        R: Into<RuleSet>,
    {
        Self {
            data,
            rules: rules.into_iter().map(|(k, r)| (k.into(), r.into())).collect(),
            messages: HashMap::new(),
            attributes: HashMap::new(),
            custom_rules: HashMap::new(),
            errors: ValidationErrors::default(),
            validated: None,
        }
    }

    /// Custom messages keyed `field.rule` or `rule`.
    pub fn messages<I, K, V>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.messages
            .extend(messages.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Display names for fields.
    pub fn attributes<I, K, V>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn add_rule(&mut self, name: impl Into<String>, rule: Arc<dyn Rule>) -> &mut Self {
        self.custom_rules.insert(name.into(), rule);
        self.validated = None;
        self
    }

    /// Add rules to `field` when `condition` holds for the input.
    pub fn sometimes<F>(&mut self, field: &str, rules: impl Into<RuleSet>, condition: F) -> &mut Self
    where
        F: FnOnce(&Value) -> bool,
    {
        if !condition(&self.data) {
            return self;
        }
        let rules = rules.into();
        match self.rules.iter_mut().find(|(f, _)| f == field) {
            Some((_, existing)) => existing.extend(rules),
            None => self.rules.push((field.to_string(), rules)),
        }
        self.validated = None;
        self
    }

    fn display_name(&self, field: &str) -> String {
        self.attributes
            .get(field)
            .cloned()
            .unwrap_or_else(|| field.replace('_', " "))
    }

    fn message_for(&self, field: &str, rule_name: &str, rule: &dyn Rule, params: &[RuleParam]) -> String {
        let template = self
            .messages
            .get(&format!("{field}.{rule_name}"))
            .or_else(|| self.messages.get(rule_name))
            .cloned()
            .unwrap_or_else(|| rule.message(params));
        let attribute = self.display_name(field);
        let joined = params.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
        template
            .replace(":attribute", &attribute)
            .replace("{field}", &attribute)
            .replace(":param", &joined)
    }

    fn resolve_rule(&self, name: &str) -> Result<Arc<dyn Rule>> {
        self.custom_rules
            .get(name)
            .or_else(|| BUILTIN_RULES.get(name))
            .cloned()
            .ok_or_else(|| Error::Internal {
                operation: format!("Unknown validation rule: {name}"),
            })
    }

    /// First failure message for a field, if any.
    fn check_field(&self, field: &str, rules: &RuleSet) -> Result<Option<String>> {
        let present = lookup(&self.data, field);
        if present.is_none() && rules.0.iter().any(|r| parse_rule(r).0 == "sometimes") {
            return Ok(None);
        }
        let value = present.unwrap_or(&Value::Null);

        for spec in &rules.0 {
            let (name, params) = parse_rule(spec);
            if MARKER_RULES.contains(&name) {
                continue;
            }
            let rule = self.resolve_rule(name)?;
            if is_empty_value(value) && !rule.implicit() {
                continue;
            }
            let ctx = RuleContext {
                field,
                value,
                params: &params,
                data: &self.data,
            };
            if !rule.passes(&ctx)? {
                return Ok(Some(self.message_for(field, name, rule.as_ref(), &params)));
            }
        }
        Ok(None)
    }

    fn run(&mut self) -> Result<()> {
        if self.validated.is_some() {
            return Ok(());
        }

        let mut errors = ValidationErrors::default();
        let mut validated = Map::new();
        for (field, rules) in &self.rules {
            match self.check_field(field, rules)? {
                Some(message) => errors.add(field.as_str(), message),
                None => {
                    if let Some(value) = lookup(&self.data, field)
                        && !value.is_null()
                    {
                        insert_path(&mut validated, field, value.clone());
                    }
                }
            }
        }

        self.errors = errors;
        self.validated = Some(validated);
        Ok(())
    }

    pub fn passes(&mut self) -> Result<bool> {
        self.run()?;
        Ok(self.errors.is_empty())
    }

    pub fn fails(&mut self) -> Result<bool> {
        Ok(!self.passes()?)
    }

    /// Errors from the last run. Empty until the validator has run.
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn get_first_error(&self, field: &str) -> Option<&str> {
        self.errors.first(Some(field))
    }

    pub fn has_error(&self, field: &str) -> bool {
        self.errors.has(field)
    }

    /// Run the rules, returning only present, non-null fields that passed.
    pub fn validate(&mut self) -> Result<Map<String, Value>> {
        self.run()?;
        if !self.errors.is_empty() {
            return Err(Error::Validation(self.errors.clone()));
        }
        Ok(self.validated.clone().unwrap_or_default())
    }
}

/// Validate a request body, failing with a 422-mapped error.
pub fn validate_request<I, K, R>(data: Value, rules: I) -> Result<Map<String, Value>>
where
    I: IntoIterator<Item = (K, R)>,
    K: Into<String>,
    R: Into<RuleSet>,
{
    Validator::new(data, rules).validate()
}

/// Validate, then deserialize the validated fields into `T`.
pub fn validate_into<T, I, K, R>(data: Value, rules: I) -> Result<T>
where
    T: DeserializeOwned,
    I: IntoIterator<Item = (K, R)>,
    K: Into<String>,
    R: Into<RuleSet>,
{
    let validated = validate_request(data, rules)?;
    serde_json::from_value(Value::Object(validated)).map_err(|e| Error::BadRequest {
        message: format!("Invalid request body: {e}"),
    })
}
