use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a script-side callback passed as a method argument.
///
/// The engine encodes callbacks as plain integers; invoking one goes through
/// [`crate::BridgeHandle::invoke_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// Argument list of one decoded call, with typed accessors.
///
/// Accessors fail with a message naming the position and the expected type,
/// so a thunk can propagate with `?` and the dispatcher logs something useful.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    values: Vec<Value>,
}

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.values
    }

    pub fn value(&self, idx: usize) -> Result<&Value> {
        self.values
            .get(idx)
            .ok_or_else(|| anyhow!("missing argument {idx}"))
    }

    pub fn str(&self, idx: usize) -> Result<&str> {
        self.value(idx)?
            .as_str()
            .ok_or_else(|| self.type_error(idx, "string"))
    }

    pub fn i64(&self, idx: usize) -> Result<i64> {
        let value = self.value(idx)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| self.type_error(idx, "integer"))
    }

    pub fn f64(&self, idx: usize) -> Result<f64> {
        self.value(idx)?
            .as_f64()
            .ok_or_else(|| self.type_error(idx, "number"))
    }

    pub fn bool(&self, idx: usize) -> Result<bool> {
        self.value(idx)?
            .as_bool()
            .ok_or_else(|| self.type_error(idx, "boolean"))
    }

    pub fn array(&self, idx: usize) -> Result<&Vec<Value>> {
        self.value(idx)?
            .as_array()
            .ok_or_else(|| self.type_error(idx, "array"))
    }

    pub fn object(&self, idx: usize) -> Result<&Map<String, Value>> {
        self.value(idx)?
            .as_object()
            .ok_or_else(|| self.type_error(idx, "object"))
    }

    /// Read a callback ID. The engine may send callbacks as floats.
    pub fn callback(&self, idx: usize) -> Result<CallbackId> {
        let raw = self
            .i64(idx)
            .map_err(|_| self.type_error(idx, "callback id"))?;
        u64::try_from(raw)
            .map(CallbackId)
            .map_err(|_| self.type_error(idx, "callback id"))
    }

    fn type_error(&self, idx: usize, expected: &str) -> anyhow::Error {
        let found = match self.values.get(idx) {
            Some(Value::Null) => "null",
            Some(Value::Bool(_)) => "boolean",
            Some(Value::Number(_)) => "number",
            Some(Value::String(_)) => "string",
            Some(Value::Array(_)) => "array",
            Some(Value::Object(_)) => "object",
            None => "nothing",
        };
        anyhow!("argument {idx}: expected {expected}, found {found}")
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Args {
        match value {
            Value::Array(values) => Args::new(values),
            _ => panic!("fixture must be an array"),
        }
    }

    #[test]
    fn typed_accessors_read_values() {
        let a = args(json!(["key", 3, 1.5, true, [1], {"k": 1}, 7]));
        assert_eq!(a.str(0).unwrap(), "key");
        assert_eq!(a.i64(1).unwrap(), 3);
        assert_eq!(a.f64(2).unwrap(), 1.5);
        assert!(a.bool(3).unwrap());
        assert_eq!(a.array(4).unwrap().len(), 1);
        assert!(a.object(5).unwrap().contains_key("k"));
        assert_eq!(a.callback(6).unwrap(), CallbackId(7));
    }

    #[test]
    fn whole_floats_are_accepted_as_integers() {
        let a = args(json!([12.0]));
        assert_eq!(a.i64(0).unwrap(), 12);
        assert_eq!(a.callback(0).unwrap(), CallbackId(12));
    }

    #[test]
    fn type_mismatch_names_position_and_types() {
        let a = args(json!(["nope"]));
        let err = a.i64(0).unwrap_err().to_string();
        assert_eq!(err, "argument 0: expected integer, found string");
    }

    #[test]
    fn missing_argument_is_an_error() {
        let a = Args::new(Vec::new());
        assert!(a.is_empty());
        assert_eq!(a.str(2).unwrap_err().to_string(), "missing argument 2");
    }

    #[test]
    fn negative_callback_is_rejected() {
        let a = args(json!([-1]));
        assert!(a
            .callback(0)
            .unwrap_err()
            .to_string()
            .contains("expected callback id"));
    }
}
