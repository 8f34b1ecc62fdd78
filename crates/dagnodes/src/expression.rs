//! Expression engine backed by Rhai.
//!
//! Top-level fields of the input document are bound as variables, and the
//! whole document as `input`. Unknown variables read as `()` and end up as
//! JSON `null`.
//!
//! ```text
//! order.items[0].price
//! score >= 3 && !done
//! status == "open" || count(tags) > 2
//! input["user name"]
//! ```

use dagcore::{ExpressionEngine, ExpressionError};
use rhai::{Array, Dynamic, Engine, Scope, FLOAT, INT};
use serde_json::{Map, Value};

/// Parser nesting limit for expressions.
pub const MAX_EXPR_DEPTH: usize = 32;
/// Parser nesting limit inside function bodies.
pub const MAX_FUNCTION_EXPR_DEPTH: usize = 16;
const MAX_OPERATIONS: u64 = 100_000;

#[derive(Debug, Clone, Copy)]
pub struct RhaiExpressionEngine {
    max_depth: usize,
    max_operations: u64,
}

impl RhaiExpressionEngine {
    pub fn new() -> Self {
        Self {
            max_depth: MAX_EXPR_DEPTH,
            max_operations: MAX_OPERATIONS,
        }
    }

    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Create a configured Rhai engine.
    fn create_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(self.max_depth, MAX_FUNCTION_EXPR_DEPTH.min(self.max_depth));
        engine.set_max_operations(self.max_operations);

        engine.register_fn("count", count);
        engine.register_fn("sum", sum);
        engine.register_fn("exists", |value: Dynamic| -> bool { !value.is_unit() });

        #[allow(deprecated)]
        engine.on_var(|name, _index, context| {
            if context.scope().contains(name) {
                Ok(None)
            } else {
                Ok(Some(Dynamic::UNIT))
            }
        });

        engine
    }

    fn compile(&self, engine: &Engine, expression: &str) -> Result<rhai::AST, ExpressionError> {
        if expression.trim().is_empty() {
            return Err(ExpressionError::Empty);
        }
        engine
            .compile_expression(expression)
            .map_err(|e| ExpressionError::Syntax {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for RhaiExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEngine for RhaiExpressionEngine {
    fn evaluate(&self, expression: &str, data: &Value) -> Result<Value, ExpressionError> {
        let engine = self.create_engine();
        let ast = self.compile(&engine, expression)?;

        let mut scope = Scope::new();
        scope.push_constant_dynamic("input", json_to_dynamic(data.clone()));
        if let Value::Object(fields) = data {
            for (key, value) in fields {
                if is_identifier(key) {
                    scope.push_constant_dynamic(key.as_str(), json_to_dynamic(value.clone()));
                }
            }
        }

        let result: Dynamic = engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ExpressionError::Evaluation {
                expression: expression.to_string(),
                message: e.to_string(),
            })?;
        Ok(dynamic_to_json(result))
    }

    fn validate_syntax(&self, expression: &str) -> Result<(), ExpressionError> {
        let engine = self.create_engine();
        self.compile(&engine, expression).map(|_| ())
    }
}

/// JSONata-style truthiness: null, false, 0, "", [] and {} are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// Arrays count their items, `()` counts as nothing, anything else as one.
fn count(value: Dynamic) -> INT {
    if value.is_unit() {
        return 0;
    }
    value.into_array().map_or(1, |items| items.len() as INT)
}

fn sum(value: Dynamic) -> Dynamic {
    let items: Array = value.into_array().unwrap_or_default();
    let mut ints: INT = 0;
    let mut floats: FLOAT = 0.0;
    let mut any_float = false;
    for item in items {
        if let Ok(i) = item.as_int() {
            ints = ints.saturating_add(i);
            floats += i as FLOAT;
        } else if let Ok(f) = item.as_float() {
            any_float = true;
            floats += f;
        }
    }
    if any_float {
        Dynamic::from(floats)
    } else {
        Dynamic::from(ints)
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(items) => {
            let items: Array = items.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(items)
        }
        Value::Object(fields) => {
            let mut map = rhai::Map::new();
            for (k, v) in fields {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

fn dynamic_to_json(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if value.is_bool() {
        Value::Bool(value.as_bool().unwrap_or(false))
    } else if value.is_int() {
        Value::from(value.as_int().unwrap_or(0))
    } else if value.is_float() {
        serde_json::Number::from_f64(value.as_float().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else if value.is_string() {
        Value::String(value.into_string().unwrap_or_default())
    } else if value.is_char() {
        Value::String(value.to_string())
    } else if value.is_array() {
        value
            .into_array()
            .map(|items| Value::Array(items.into_iter().map(dynamic_to_json).collect()))
            .unwrap_or(Value::Null)
    } else if value.is_map() {
        match value.try_cast::<rhai::Map>() {
            Some(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect::<Map<String, Value>>(),
            ),
            None => Value::Null,
        }
    } else {
        Value::String(value.to_string())
    }
}
