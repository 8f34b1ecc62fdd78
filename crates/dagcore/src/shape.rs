use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field name to shape; the top-level form of every planned input/output.
pub type ShapeMap = BTreeMap<String, Shape>;

/// Static description of data flowing between nodes.
///
/// JSON form: `{"type": "string"}`, `{"type": "array", "items": {...}}`,
/// or a plain object mapping field names to shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Shape {
    Primitive(String),
    Array(Option<Box<Shape>>),
    Object(ShapeMap),
}

impl Shape {
    pub fn primitive(name: impl Into<String>) -> Self {
        Shape::Primitive(name.into())
    }

    pub fn string() -> Self {
        Shape::primitive("string")
    }

    pub fn number() -> Self {
        Shape::primitive("number")
    }

    pub fn boolean() -> Self {
        Shape::primitive("boolean")
    }

    /// An object whose fields are not known statically.
    pub fn object() -> Self {
        Shape::primitive("object")
    }

    pub fn unknown() -> Self {
        Shape::primitive("unknown")
    }

    pub fn array() -> Self {
        Shape::Array(None)
    }

    pub fn array_of(items: Shape) -> Self {
        Shape::Array(Some(Box::new(items)))
    }

    pub fn fields<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Shape)>,
        K: Into<String>,
    {
        Shape::Object(shape_map(fields))
    }

    /// Convert a JSON-Schema-like descriptor into a shape.
    ///
    /// Objects recurse through `properties`, arrays through `items`; a
    /// descriptor without a string `type` becomes `unknown`.
    pub fn from_schema(schema: &Value) -> Self {
        let Some(obj) = schema.as_object() else {
            return Shape::unknown();
        };
        match obj.get("type").and_then(Value::as_str) {
            Some("object") => match obj.get("properties").and_then(Value::as_object) {
                Some(props) => Shape::Object(
                    props
                        .iter()
                        .map(|(k, v)| (k.clone(), Shape::from_schema(v)))
                        .collect(),
                ),
                None => Shape::object(),
            },
            Some("array") => Shape::Array(obj.get("items").map(|i| Box::new(Shape::from_schema(i)))),
            Some(other) => Shape::primitive(other),
            None => Shape::unknown(),
        }
    }
}

pub fn shape_map<I, K>(fields: I) -> ShapeMap
where
    I: IntoIterator<Item = (K, Shape)>,
    K: Into<String>,
{
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Flatten a `structured_output` schema into the top-level field map.
///
/// A schema that does not describe an object is wrapped as `{"value": ...}`.
pub fn flatten_schema(schema: &Value) -> ShapeMap {
    match Shape::from_schema(schema) {
        Shape::Object(fields) => fields,
        other => shape_map([("value", other)]),
    }
}

impl From<Shape> for Value {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Primitive(name) => {
                let mut map = Map::new();
                map.insert("type".into(), Value::String(name));
                Value::Object(map)
            }
            Shape::Array(items) => {
                let mut map = Map::new();
                map.insert("type".into(), Value::String("array".into()));
                if let Some(items) = items {
                    map.insert("items".into(), Value::from(*items));
                }
                Value::Object(map)
            }
            Shape::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<Value> for Shape {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(name) => Ok(Shape::Primitive(name)),
            Value::Object(mut map) => match map.get("type") {
                Some(Value::String(t)) if t == "array" => match map.remove("items") {
                    Some(items) => Ok(Shape::array_of(Shape::try_from(items)?)),
                    None => Ok(Shape::Array(None)),
                },
                Some(Value::String(t)) => Ok(Shape::Primitive(t.clone())),
                _ => map
                    .into_iter()
                    .map(|(k, v)| Shape::try_from(v).map(|s| (k, s)))
                    .collect::<Result<ShapeMap, _>>()
                    .map(Shape::Object),
            },
            other => Err(format!("expected a shape object, got {}", other)),
        }
    }
}
