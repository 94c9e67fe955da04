//! Variable resolver for prompt templates.
//!
//! Replaces `{{path.to.field}}` placeholders from a two-root context
//! (`input_data`, `reference_data`). Dot paths walk nested objects and
//! arrays; complex values render as pretty-printed JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::borrow::Cow;

use super::error::LookupError;

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^}]*)\}\}").expect("variable pattern is valid"));

static NESTED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^}]*\{\{").expect("nested pattern is valid"));

/// Variable paths reserved for engine-produced fields.
const RESERVED_PREFIXES: [&str; 2] = ["_", "_lookup_"];

/// Resolves `{{variable}}` placeholders against a fixed two-root context.
pub struct VariableResolver {
    context: Value,
}

impl VariableResolver {
    pub fn new(input_data: &Value, reference_data: &str) -> Self {
        Self { context: json!({ "input_data": input_data, "reference_data": reference_data }) }
    }

    /// Replace all `{{variable}}` references in a single left-to-right pass.
    /// Resolver output is not re-scanned for placeholders.
    pub fn resolve(&self, template: &str) -> String {
        VARIABLE_PATTERN
            .replace_all(template, |caps: &regex::Captures<'_>| {
                self.lookup_path(caps[1].trim())
            })
            .into_owned()
    }

    /// Extract the deduplicated, sorted set of variable paths in a template.
    pub fn detect_variables(template: &str) -> Vec<String> {
        if template.is_empty() {
            return Vec::new();
        }

        let mut vars: Vec<String> = VARIABLE_PATTERN
            .captures_iter(template)
            .map(|caps| caps[1].trim().to_string())
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Report which detected variables resolve to an empty value.
    pub fn missing_variables(&self, template: &str) -> Vec<String> {
        Self::detect_variables(template)
            .into_iter()
            .filter(|var| self.lookup_path(var).is_empty())
            .collect()
    }

    /// Walk a dot-separated path starting at the two-root context.
    ///
    /// Objects are indexed by key, arrays by parsed integer segment.
    /// Any miss, out-of-range index, or wrong-type step yields "".
    fn lookup_path(&self, path: &str) -> String {
        if path.is_empty() {
            return String::new();
        }

        let mut value = &self.context;
        for segment in path.split('.') {
            value = match value {
                Value::Object(map) => match map.get(segment) {
                    Some(v) => v,
                    None => return String::new(),
                },
                Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i))
                {
                    Some(v) => v,
                    None => return String::new(),
                },
                _ => return String::new(),
            };
        }

        render_value(value).into_owned()
    }
}

/// Render a resolved value for substitution: scalars stringify, null is
/// empty, objects and arrays become pretty-printed JSON.
fn render_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Bool(b) => Cow::Owned(b.to_string()),
        Value::Number(n) => Cow::Owned(n.to_string()),
        Value::Object(_) | Value::Array(_) => {
            Cow::Owned(serde_json::to_string_pretty(value).unwrap_or_default())
        }
    }
}

// ============================================================================
// Template Validation
// ============================================================================

/// Check balanced `{{ }}` braces and reject nested placeholders.
pub fn validate_syntax(template: &str) -> Result<(), LookupError> {
    let open_count = template.matches("{{").count();
    let close_count = template.matches("}}").count();

    if open_count != close_count {
        return Err(LookupError::InvalidTemplate(format!(
            "Mismatched braces in template: {} opening, {} closing",
            open_count, close_count
        )));
    }

    if NESTED_PATTERN.is_match(template) {
        return Err(LookupError::InvalidTemplate(
            "Nested variable placeholders are not allowed".to_string(),
        ));
    }

    Ok(())
}

/// Reject variables under reserved prefixes or that look like assignments.
pub fn validate_reserved_keywords(template: &str) -> Result<(), LookupError> {
    for var in VariableResolver::detect_variables(template) {
        for prefix in RESERVED_PREFIXES {
            if var.starts_with(prefix) {
                return Err(LookupError::InvalidTemplate(format!(
                    "Variable '{}' uses reserved prefix '{}'. Reserved prefixes: {}",
                    var,
                    prefix,
                    RESERVED_PREFIXES.join(", ")
                )));
            }
        }

        if var.contains('=') || var.ends_with("_metadata") {
            return Err(LookupError::InvalidTemplate(format!(
                "Variable '{}' appears to be trying to set a value. \
                 Variables should only reference existing data.",
                var
            )));
        }
    }

    Ok(())
}

/// Full validation applied when a template is stored: non-empty, balanced
/// syntax, no reserved paths, and the mandatory `{{reference_data}}` token.
pub fn validate_template(template: &str) -> Result<(), LookupError> {
    if template.is_empty() {
        return Err(LookupError::InvalidTemplate("Template text cannot be empty".to_string()));
    }

    validate_syntax(template)?;
    validate_reserved_keywords(template)?;

    if !VariableResolver::detect_variables(template)
        .iter()
        .any(|v| v == "reference_data")
    {
        return Err(LookupError::InvalidTemplate(
            "Template must reference {{reference_data}}".to_string(),
        ));
    }

    Ok(())
}
