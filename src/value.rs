use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Parameter bindings supplied to [`Engine::create`](crate::Engine::create).
///
/// A `BTreeMap` so that iteration order (and therefore anything derived from
/// it) is deterministic.
pub type Params = BTreeMap<String, Value>;

/// A value produced by a task and carried through the cache.
///
/// The cache has to decode values without knowing the concrete type that
/// produced them, so everything flowing between tasks is expressed in this
/// self-describing shape. Most tasks only ever touch a couple of variants;
/// the [`From`] conversions and `as_*` accessors keep that painless.
///
/// [`Value::Opaque`] holds an externally-serialized object (say, a trained
/// model written out by some toolkit). The default codec refuses it; a blob
/// codec stores the raw bytes under a separate key namespace instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Externally-serialized payload; `format` names the producing toolkit.
    Opaque { format: String, bytes: Vec<u8> },
}

impl Value {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Seq(vs) => Some(vs),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value (recursively) avoids [`Value::Opaque`].
    ///
    /// Only plain values may appear in parameter bindings, since parameters
    /// are serialized into cache keys with the default codec.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        match self {
            Value::Opaque { .. } => false,
            Value::Seq(vs) => vs.iter().all(Value::is_plain),
            Value::Map(m) => m.values().all(Value::is_plain),
            _ => true,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(vs: Vec<Value>) -> Self {
        Value::Seq(vs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_check_recurses_through_containers() {
        let opaque = Value::Opaque {
            format: "h5".into(),
            bytes: vec![1, 2, 3],
        };
        assert!(Value::from(7).is_plain());
        assert!(Value::Seq(vec![Value::from("a"), Value::Null]).is_plain());
        assert!(!opaque.is_plain());
        assert!(!Value::Seq(vec![Value::from(1), opaque.clone()]).is_plain());

        let mut m = BTreeMap::new();
        m.insert("model".to_owned(), opaque);
        assert!(!Value::Map(m).is_plain());
    }

    #[test]
    fn float_accessor_widens_ints() {
        assert_eq!(Value::from(3).as_float(), Some(3.0));
        assert_eq!(Value::from(2.5).as_float(), Some(2.5));
        assert_eq!(Value::from("x").as_float(), None);
    }
}
