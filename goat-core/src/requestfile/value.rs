use serde::Serialize;
use serde_json::Value as JsonValue;
use std::fmt;

/// A literal value from a block entry such as `[QueryParams]` or `[Options]`.
///
/// `Placeholder` holds the raw text of a `{{ ... }}` expression which is evaluated against the
/// runtime state before the request is sent. The evaluated output is parsed again as a value so
/// that placeholders can produce integers, booleans or arrays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<Value>),
    Placeholder(String),
}

impl Value {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Integer(i) => JsonValue::from(*i),
            Value::Float(f) => JsonValue::from(*f),
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Placeholder(raw) => JsonValue::String(format!("{{{{{raw}}}}}")),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Placeholder(raw) => write!(f, "{{{{{raw}}}}}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn display_nested_array() {
        let v = Value::Array(vec![
            Value::Integer(1),
            Value::Array(vec!["a".into(), Value::Bool(true)]),
        ]);
        assert_eq!(v.to_string(), "[1 [a true]]");
    }

    #[test]
    fn placeholder_to_json_keeps_braces() {
        let v = Value::Placeholder(" foo ".into());
        assert_eq!(v.to_json(), json!("{{ foo }}"));
    }

    #[test]
    fn array_to_json() {
        let v = Value::Array(vec![Value::Integer(1), "two".into(), Value::Float(3.5)]);
        assert_eq!(v.to_json(), json!([1, "two", 3.5]));
    }
}
