//! Context document values.

use std::collections::BTreeMap;

use serde_json::{Number, Value};

/// Leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// JSON `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer or float, as written.
    Number(Number),
    /// String.
    Text(String),
}

/// Value stored under a context key.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    /// Leaf value.
    Scalar(Scalar),
    /// Ordered list.
    Sequence(Vec<ContextValue>),
    /// String-keyed map; the only kind MERGE can target.
    Mapping(BTreeMap<String, ContextValue>),
}

impl ContextValue {
    /// Empty mapping.
    pub fn empty_mapping() -> Self {
        ContextValue::Mapping(BTreeMap::new())
    }

    /// Decode a JSON payload.
    pub fn from_json_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(data)?;
        Ok(value.into())
    }

    /// Encode to JSON bytes.
    pub fn to_json_vec(&self) -> Vec<u8> {
        Value::from(self.clone()).to_string().into_bytes()
    }

    /// The mapping, if this is one.
    pub fn as_mapping(&self) -> Option<&BTreeMap<String, ContextValue>> {
        match self {
            ContextValue::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this is a mapping.
    pub fn is_mapping(&self) -> bool {
        matches!(self, ContextValue::Mapping(_))
    }

    /// Short kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ContextValue::Scalar(Scalar::Null) => "null",
            ContextValue::Scalar(Scalar::Bool(_)) => "bool",
            ContextValue::Scalar(Scalar::Number(_)) => "number",
            ContextValue::Scalar(Scalar::Text(_)) => "text",
            ContextValue::Sequence(_) => "sequence",
            ContextValue::Mapping(_) => "mapping",
        }
    }
}

impl From<Value> for ContextValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => ContextValue::Scalar(Scalar::Null),
            Value::Bool(b) => ContextValue::Scalar(Scalar::Bool(b)),
            Value::Number(n) => ContextValue::Scalar(Scalar::Number(n)),
            Value::String(s) => ContextValue::Scalar(Scalar::Text(s)),
            Value::Array(items) => ContextValue::Sequence(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                ContextValue::Mapping(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<ContextValue> for Value {
    fn from(value: ContextValue) -> Self {
        match value {
            ContextValue::Scalar(Scalar::Null) => Value::Null,
            ContextValue::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            ContextValue::Scalar(Scalar::Number(n)) => Value::Number(n),
            ContextValue::Scalar(Scalar::Text(s)) => Value::String(s),
            ContextValue::Sequence(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            ContextValue::Mapping(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_conversion() {
        let json = json!({"a": [1, 2.5, "x"], "b": {"c": null, "d": true}});
        let value = ContextValue::from(json.clone());

        let map = value.as_mapping().unwrap();
        assert_eq!(map["a"].kind(), "sequence");
        assert_eq!(map["b"].kind(), "mapping");
        assert_eq!(Value::from(value), json);
    }

    #[test]
    fn test_from_json_slice() {
        assert_eq!(
            ContextValue::from_json_slice(b"95").unwrap(),
            ContextValue::Scalar(Scalar::Number(95.into()))
        );
        assert!(ContextValue::from_json_slice(b"{not json").is_err());
    }

    #[test]
    fn test_to_json_vec() {
        let value = ContextValue::from(json!({"steps": 1200}));
        assert_eq!(value.to_json_vec(), br#"{"steps":1200}"#.to_vec());
    }
}
