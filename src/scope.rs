//! Frozen per-job parameters
//!
//! A scope is built from the keyword arguments of one `submit()` call and frozen before anything
//! is written to disk. Frozen scopes are plain JSON objects, so they reach the job exactly as they
//! were declared.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::error::{Error, Result};

/// A value that may or may not survive a trip through JSON
pub trait ScopeValue {
    /// Convert to JSON, or explain why the value has no JSON form
    fn to_json(&self) -> std::result::Result<Json, String>;
}

impl ScopeValue for Json {
    fn to_json(&self) -> std::result::Result<Json, String> {
        Ok(self.clone())
    }
}

/// Immutable, ordered key/value parameters of one job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(Map<String, Json>);

impl Scope {
    /// Validate every value and produce the frozen scope
    ///
    /// Fails on the first value without a JSON form, naming its key. Later duplicates of a key
    /// replace earlier ones in place.
    pub fn freeze<'a, I, V>(pairs: I) -> Result<Scope>
    where
        I: IntoIterator<Item = (&'a str, &'a V)>,
        V: ScopeValue + 'a,
    {
        let mut map = Map::new();
        for (key, value) in pairs {
            let json = value.to_json().map_err(|reason| Error::ScopeSerialization {
                key: key.to_string(),
                reason,
            })?;
            map.insert(key.to_string(), json);
        }
        Ok(Scope(map))
    }

    pub fn get(&self, key: &str) -> Result<&Json> {
        self.0
            .get(key)
            .ok_or_else(|| Error::ScopeKey(key.to_string()))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Json)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.0)?)
    }
}

/// Hash consistent with equality: maps compare without regard to key order, so keys are hashed
/// in sorted order at every level
impl Hash for Scope {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_map(&self.0, state);
    }
}

fn hash_map<H: Hasher>(map: &Map<String, Json>, state: &mut H) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    state.write_usize(keys.len());
    for key in keys {
        key.hash(state);
        hash_json(&map[key.as_str()], state);
    }
}

fn hash_json<H: Hasher>(value: &Json, state: &mut H) {
    match value {
        Json::Null => state.write_u8(0),
        Json::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Json::Number(n) => {
            state.write_u8(2);
            n.to_string().hash(state);
        }
        Json::String(s) => {
            state.write_u8(3);
            s.hash(state);
        }
        Json::Array(items) => {
            state.write_u8(4);
            state.write_usize(items.len());
            for item in items {
                hash_json(item, state);
            }
        }
        Json::Object(map) => {
            state.write_u8(5);
            hash_map(map, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::hash_map::DefaultHasher;

    use serde_json::json;

    use super::*;

    struct Opaque;

    impl ScopeValue for Opaque {
        fn to_json(&self) -> std::result::Result<Json, String> {
            Err("open file handle".to_string())
        }
    }

    fn hash_of(scope: &Scope) -> u64 {
        let mut hasher = DefaultHasher::new();
        scope.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn freeze_keeps_insertion_order() {
        let values = [json!(2), json!("a"), json!({"nested": [1, 2]})];
        let scope = Scope::freeze([("zeta", &values[0]), ("alpha", &values[1]), ("mid", &values[2])])
            .unwrap();
        assert_eq!(scope.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(scope.get("mid").unwrap(), &json!({"nested": [1, 2]}));
    }

    #[test]
    fn unknown_key_is_an_error() {
        let scope = Scope::default();
        assert!(matches!(scope.get("missing"), Err(Error::ScopeKey(key)) if key == "missing"));
    }

    #[test]
    fn non_serializable_value_names_its_key() {
        let err = Scope::freeze([("handle", &Opaque)]).unwrap_err();
        match err {
            Error::ScopeSerialization { key, reason } => {
                assert_eq!(key, "handle");
                assert!(reason.contains("file handle"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn equality_and_hash_ignore_key_order() {
        let (one, two) = (json!(1), json!({"b": 2, "a": 1}));
        let two_reordered = json!({"a": 1, "b": 2});
        let left = Scope::freeze([("x", &one), ("y", &two)]).unwrap();
        let right = Scope::freeze([("y", &two_reordered), ("x", &one)]).unwrap();
        assert_eq!(left, right);
        assert_eq!(hash_of(&left), hash_of(&right));
    }

    #[test]
    fn serializes_as_plain_object() {
        let value = json!([1, 2.5, null]);
        let scope = Scope::freeze([("list", &value)]).unwrap();
        let text = serde_json::to_string(&scope).unwrap();
        assert_eq!(text, r#"{"list":[1,2.5,null]}"#);
        let back: Scope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, scope);
    }
}
