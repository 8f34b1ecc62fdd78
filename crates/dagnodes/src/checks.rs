use crate::meta::{Metadata, COMMON_FIELDS};
use crate::template::check_template;
use dagcore::{ExecutionError, ExpressionEngine, ValidationError};
use serde_json::Value;
use validator::{ValidationErrors, ValidationErrorsKind};

/// Run every configuration check for a node and return its typed metadata.
///
/// Checks run in a fixed order and stop at the first failure: shape of
/// `metadata` and `structured_output`, unknown keys, typed parse, field rules,
/// cross-field rules, placeholders, then expression syntax.
pub fn validate_metadata<M: Metadata>(
    metadata: &Value,
    structured_output: Option<&Value>,
    engine: &dyn ExpressionEngine,
) -> Result<M, ValidationError> {
    let object = metadata.as_object().ok_or(ValidationError::MetadataNotObject)?;
    check_structured_output(structured_output)?;

    let mut unknown: Vec<String> = object
        .keys()
        .filter(|key| {
            !COMMON_FIELDS.contains(&key.as_str()) && !M::FIELDS.contains(&key.as_str())
        })
        .cloned()
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(ValidationError::UnknownFields(unknown));
    }

    let invalid = |reason: String| ValidationError::InvalidMetadata {
        node_type: M::NODE_TYPE,
        reason,
    };

    let parsed: M = serde_json::from_value(metadata.clone()).map_err(|e| invalid(e.to_string()))?;
    validator::Validate::validate(&parsed).map_err(|e| invalid(format_errors(&e)))?;
    parsed.extra_checks().map_err(invalid)?;

    for (field, template) in parsed.templates() {
        let check = check_template(template);
        if let Some(first) = check.errors.first() {
            return Err(invalid(format!("{}: {}", field, first)));
        }
    }

    for (field, expression) in parsed.expressions() {
        engine
            .validate_syntax(expression)
            .map_err(|source| ValidationError::InvalidExpression { field, source })?;
    }

    Ok(parsed)
}

/// Lenient parse used while planning: no rule checks, only the types.
pub fn parse_metadata<M: Metadata>(metadata: &Value) -> Result<M, ExecutionError> {
    serde_json::from_value(metadata.clone()).map_err(|e| ExecutionError::Metadata(e.to_string()))
}

/// A non-empty `structured_output` that declares a `type` must compile as a
/// draft 7 JSON Schema.
pub fn check_structured_output(structured_output: Option<&Value>) -> Result<(), ValidationError> {
    let Some(schema) = structured_output else {
        return Ok(());
    };
    let object = schema
        .as_object()
        .ok_or(ValidationError::StructuredOutputNotObject)?;
    if object.is_empty() || !object.contains_key("type") {
        return Ok(());
    }
    jsonschema::draft7::new(schema)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidSchema(e.to_string()))
}

/// Flatten validator errors into `field: message` lines, sorted.
///
/// Errors from the flattened common block are reported under their own
/// field names.
fn format_errors(errors: &ValidationErrors) -> String {
    let mut lines = Vec::new();
    collect_errors(errors, "", &mut lines);
    lines.sort();
    lines.join("; ")
}

fn collect_errors(errors: &ValidationErrors, prefix: &str, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = match (prefix.is_empty(), &**field) {
            (true, "common") => String::new(),
            (true, name) => name.to_string(),
            (false, name) => format!("{}.{}", prefix, name),
        };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for error in field_errors {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("failed validation: {}", error.code));
                    out.push(format!("{}: {}", path, message));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_errors(nested, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_errors(nested, &format!("{}[{}]", path, index), out);
                }
            }
        }
    }
}
