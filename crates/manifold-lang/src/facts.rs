//! Node facts.
//!
//! Facts are a flat, case-normalized map of names to values, usually
//! loaded from a JSON file. The top scope exposes each fact as a variable
//! and the whole set as `$facts`.

use crate::value::{Value, ValueHash};
use serde_json::Value as Json;
use std::path::Path;

/// A provider of node facts.
#[derive(Debug, Clone, Default)]
pub struct Facts {
    values: ValueHash,
}

fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Undef,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::string(s.clone()),
        Json::Array(elements) => Value::Array(elements.iter().map(from_json).collect()),
        Json::Object(object) => {
            let mut hash = ValueHash::new();
            for (key, value) in object {
                hash.insert(Value::string(key.clone()), from_json(value));
            }
            Value::Hash(hash)
        }
    }
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load facts from a JSON object file.
    pub fn from_json_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read facts file '{}': {}.", path.display(), e))?;
        let json: Json = serde_json::from_str(&text)
            .map_err(|e| format!("cannot parse facts file '{}': {}.", path.display(), e))?;
        let Json::Object(object) = json else {
            return Err(format!(
                "expected a JSON object in facts file '{}'.",
                path.display()
            ));
        };
        let mut facts = Self::new();
        for (name, value) in &object {
            facts.set(name, from_json(value));
        }
        Ok(facts)
    }

    /// Set one fact; names are lowercased.
    pub fn set(&mut self, name: &str, value: Value) {
        self.values
            .insert(Value::string(name.to_lowercase()), value);
    }

    /// Look a fact up by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(&Value::string(name.to_lowercase()))
    }

    /// The whole set, for `$facts`.
    pub fn to_hash(&self) -> ValueHash {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_are_case_insensitive() {
        let mut facts = Facts::new();
        facts.set("osFamily", Value::string("linux"));
        assert_eq!(
            facts.get("osfamily").and_then(|v| v.as_string()),
            Some("linux")
        );
        assert_eq!(
            facts.get("OSFAMILY").and_then(|v| v.as_string()),
            Some("linux")
        );
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(
            &path,
            r#"{"hostname": "web01", "processors": {"count": 4}, "tags": ["a", "b"]}"#,
        )
        .unwrap();
        let facts = Facts::from_json_file(&path).unwrap();
        assert_eq!(
            facts.get("hostname").and_then(|v| v.as_string()),
            Some("web01")
        );
        let processors = facts.get("processors").and_then(|v| v.as_hash()).unwrap();
        assert_eq!(
            processors.get(&Value::string("count")),
            Some(&Value::Integer(4))
        );
        assert_eq!(facts.get("tags").and_then(|v| v.as_array()).unwrap().len(), 2);
    }

    #[test]
    fn invalid_facts_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(Facts::from_json_file(&path).is_err());
    }
}
