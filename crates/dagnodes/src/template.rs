//! `{{ ... }}` placeholder templates used by prompts and search queries.

use chrono::{DateTime, Datelike, Local};
use dagcore::ExpressionEngine;
use regex::{Captures, Regex};
use serde_json::{json, Value};
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("placeholder pattern is valid"))
}

/// Placeholders found in a template, trimmed, in order of appearance.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    placeholder_re()
        .captures_iter(template)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TemplateCheck {
    pub placeholders: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl TemplateCheck {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Static checks on a template's placeholders.
///
/// An unknown root is only a warning; bare names still resolve against the
/// input document at render time.
pub fn check_template(template: &str) -> TemplateCheck {
    let placeholders = extract_placeholders(template);
    let mut check = TemplateCheck::default();

    for placeholder in &placeholders {
        if placeholder.is_empty() {
            check.errors.push("Empty placeholder found: {{}}".to_string());
            continue;
        }
        if placeholder.contains('{') || placeholder.contains('}') {
            check.errors.push(format!("Malformed placeholder: {{{{{}}}}}", placeholder));
            continue;
        }
        if !(placeholder.starts_with("base.") || placeholder.starts_with("input.")) {
            check.warnings.push(format!(
                "Unknown root in placeholder: {{{{{}}}}} - should start with 'base.' or 'input.'",
                placeholder
            ));
            continue;
        }
        if placeholder.matches('[').count() != placeholder.matches(']').count() {
            check.errors.push(format!("Unclosed brackets in placeholder: {{{{{}}}}}", placeholder));
        }
        if placeholder.matches('(').count() != placeholder.matches(')').count() {
            check.errors.push(format!("Unclosed parentheses in placeholder: {{{{{}}}}}", placeholder));
        }
    }

    check.placeholders = placeholders;
    check
}

/// Replace every placeholder with its value.
///
/// `base.x` reads from `base`, `input.x` from `input`; anything else tries the
/// input first and then base. Unresolved placeholders stay in the output
/// verbatim and produce a warning.
pub fn render_template(
    template: &str,
    base: &Value,
    input: &Value,
    engine: &dyn ExpressionEngine,
) -> (String, Vec<String>) {
    let mut warnings = Vec::new();

    let rendered = placeholder_re().replace_all(template, |caps: &Captures| {
        let expression = caps[1].trim();
        let resolved = if let Some(rest) = expression.strip_prefix("base.") {
            resolve(engine, rest, base)
        } else if let Some(rest) = expression.strip_prefix("input.") {
            resolve(engine, rest, input)
        } else {
            resolve(engine, expression, input).or_else(|| resolve(engine, expression, base))
        };

        match resolved {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => {
                warnings.push(format!("Could not resolve placeholder: {{{{{}}}}}", expression));
                caps[0].to_string()
            }
        }
    });

    (rendered.into_owned(), warnings)
}

fn resolve(engine: &dyn ExpressionEngine, expression: &str, data: &Value) -> Option<Value> {
    match engine.evaluate(expression, data) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!("Placeholder '{}' failed to evaluate: {}", expression, e);
            None
        }
    }
}

/// Values available under `base.` when rendering.
pub fn base_defaults(now: DateTime<Local>) -> Value {
    json!({
        "timestamp": now.to_rfc3339(),
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "timezone": now.format("%:z").to_string(),
        "unix_timestamp": now.timestamp(),
        "day_of_week": now.format("%A").to_string(),
        "month": now.format("%B").to_string(),
        "year": now.year(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::RhaiExpressionEngine;
    use chrono::TimeZone;

    #[test]
    fn extracts_trimmed_placeholders() {
        assert_eq!(
            extract_placeholders("Hi {{ input.name }}, today is {{base.date}}{{}}"),
            vec!["input.name", "base.date", ""]
        );
    }

    #[test]
    fn check_separates_errors_from_warnings() {
        let check = check_template("{{ }} {{ name }} {{ input.items[0 }} {{ input.a }}");
        assert_eq!(check.errors.len(), 2);
        assert!(check.errors[0].starts_with("Empty placeholder"));
        assert!(check.errors[1].contains("Unclosed brackets"));
        assert_eq!(check.warnings.len(), 1);
        assert!(check.warnings[0].contains("should start with 'base.' or 'input.'"));
        assert!(!check.is_ok());
        assert!(check_template("plain text").is_ok());
    }

    #[test]
    fn renders_from_base_and_input() {
        let base = json!({"date": "2024-05-01"});
        let input = json!({"user": {"name": "Ada"}, "count": 3});
        let (text, warnings) = render_template(
            "{{ input.user.name }} on {{base.date}}: {{count}} items, {{ input.missing }}",
            &base,
            &input,
            &RhaiExpressionEngine::new(),
        );
        assert_eq!(text, "Ada on 2024-05-01: 3 items, {{ input.missing }}");
        assert_eq!(warnings, vec!["Could not resolve placeholder: {{input.missing}}"]);
    }

    #[test]
    fn bare_names_fall_back_to_base() {
        let (text, warnings) = render_template(
            "{{ year }}",
            &json!({"year": 2024}),
            &json!({}),
            &RhaiExpressionEngine::new(),
        );
        assert_eq!(text, "2024");
        assert!(warnings.is_empty());
    }

    #[test]
    fn base_defaults_fields() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let base = base_defaults(now);
        assert_eq!(base["date"], "2024-03-09");
        assert_eq!(base["time"], "14:05:00");
        assert_eq!(base["day_of_week"], "Saturday");
        assert_eq!(base["month"], "March");
        assert_eq!(base["year"], 2024);
    }
}
