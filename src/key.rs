//! Full target keys.
//!
//! A cached computation is identified by its target name plus the values of
//! every parameter that (transitively) affects it. Both tiers of the cache
//! key off the same byte string: `name`, a `:` separator, then a
//! deterministic MessagePack encoding of the sorted `(name, value)` pairs.

use std::fmt;

use crate::error::Error;
use crate::value::{Params, Value};

/// The byte key a memoized computation is cached under.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CacheKey(Vec<u8>);

impl CacheKey {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Build the full key for `target` from its relevant parameter names and the
/// caller's bindings.
///
/// `relevant` must already be sorted and deduplicated; names absent from
/// `params` encode as [`Value::Null`] so that "unbound" is itself a stable
/// binding.
pub fn mix(target: &str, relevant: &[String], params: &Params) -> Result<CacheKey, Error> {
    static NULL: Value = Value::Null;

    let mut pairs: Vec<(&str, &Value)> = Vec::with_capacity(relevant.len());
    for pn in relevant {
        let value = params.get(pn).unwrap_or(&NULL);
        if !value.is_plain() {
            return Err(Error::ParamEncoding {
                target: target.to_owned(),
                detail: format!("parameter '{pn}' is not a plain value"),
            });
        }
        pairs.push((pn.as_str(), value));
    }

    let pbytes = rmp_serde::to_vec(&pairs).map_err(|e| Error::ParamEncoding {
        target: target.to_owned(),
        detail: e.to_string(),
    })?;

    let mut bytes = Vec::with_capacity(target.len() + 1 + pbytes.len());
    bytes.extend_from_slice(target.as_bytes());
    bytes.push(b':');
    bytes.extend_from_slice(&pbytes);
    Ok(CacheKey(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let relevant = vec!["times".to_owned(), "value".to_owned()];
        let params = params! {"value" => 3, "times" => 5};
        let a = mix("product", &relevant, &params).unwrap();
        let b = mix("product", &relevant, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_bindings_produce_distinct_keys() {
        let relevant = vec!["times".to_owned(), "value".to_owned()];
        let a = mix("product", &relevant, &params! {"value" => 3, "times" => 5}).unwrap();
        let b = mix("product", &relevant, &params! {"value" => 5, "times" => 6}).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn unbound_parameters_encode_as_null() {
        let relevant = vec!["value".to_owned()];
        let unbound = mix("base", &relevant, &Params::new()).unwrap();
        let null_bound = mix("base", &relevant, &params! {"value" => Value::Null}).unwrap();
        assert_eq!(unbound, null_bound);
    }

    #[test]
    fn irrelevant_parameters_do_not_change_the_key() {
        let relevant = vec!["value".to_owned()];
        let a = mix("base", &relevant, &params! {"value" => 3}).unwrap();
        let b = mix("base", &relevant, &params! {"value" => 3, "noise" => 99}).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn opaque_parameter_values_are_rejected() {
        let relevant = vec!["model".to_owned()];
        let params = params! {
            "model" => Value::Opaque { format: "h5".into(), bytes: vec![1] }
        };
        let err = mix("score", &relevant, &params).unwrap_err();
        assert!(matches!(err, Error::ParamEncoding { .. }));
    }

    #[test]
    fn key_starts_with_the_target_name_and_separator() {
        let key = mix("base", &[], &Params::new()).unwrap();
        assert!(key.as_bytes().starts_with(b"base:"));
    }
}
