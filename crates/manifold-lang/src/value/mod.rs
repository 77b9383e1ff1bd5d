//! The runtime value model.
//!
//! # Design
//!
//! - `Value` — the dynamically-typed union evaluated expressions produce
//! - Structural equality and hashing agree with each other; strings
//!   compare under Unicode canonical (NFC) equivalence
//! - Hashes preserve insertion order and key uniqueness under the
//!   language's equality
//! - `Variable` values are transparent references to another value; every
//!   operation sees through them
//!
//! The `==` *operator*'s case-insensitive string comparison lives with the
//! operator dispatch, not here: structural equality is case-sensitive.

mod iterator;
mod regex;

pub use self::regex::ValueRegex;
pub use iterator::{IterationCallback, IteratorValue};

use crate::types::Type;
use indexmap::IndexMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// Shared ownership of a value (scope variables, match captures).
pub type SharedValue = Arc<Value>;

/// A named reference to another value.
#[derive(Debug, Clone)]
pub struct VariableValue {
    pub name: String,
    pub value: SharedValue,
}

/// Insertion-ordered mapping with keys unique under language equality.
#[derive(Debug, Clone, Default)]
pub struct ValueHash {
    entries: IndexMap<Value, Value>,
}

impl ValueHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Hash equality ignores insertion order.
impl PartialEq for ValueHash {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).map(|v| v == value).unwrap_or(false))
    }
}

impl Eq for ValueHash {}

impl Hash for ValueHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Order-insensitive: combine per-pair hashes commutatively.
        let mut combined: u64 = 0;
        for (key, value) in self.iter() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            key.hash(&mut hasher);
            value.hash(&mut hasher);
            combined ^= hasher.finish();
        }
        state.write_u64(combined);
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Undef,
    Default,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Regex(ValueRegex),
    Type(Box<Type>),
    Array(Vec<Value>),
    Hash(ValueHash),
    Iterator(Box<IteratorValue>),
    Variable(VariableValue),
}

impl Value {
    /// Convenience string constructor.
    pub fn string(value: impl Into<String>) -> Self {
        Value::String(value.into())
    }

    /// See through variable references.
    pub fn dereference(&self) -> &Value {
        let mut current = self;
        while let Value::Variable(variable) = current {
            current = &variable.value;
        }
        current
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.dereference(), Value::Undef)
    }

    pub fn is_default(&self) -> bool {
        matches!(self.dereference(), Value::Default)
    }

    /// Everything but `undef` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        match self.dereference() {
            Value::Undef => false,
            Value::Boolean(b) => *b,
            _ => true,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self.dereference() {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.dereference() {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self.dereference() {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.dereference() {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self.dereference() {
            Value::Array(elements) => Some(elements),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&ValueHash> {
        match self.dereference() {
            Value::Hash(hash) => Some(hash),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self.dereference() {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&ValueRegex> {
        match self.dereference() {
            Value::Regex(r) => Some(r),
            _ => None,
        }
    }

    /// A short kind name for diagnostics, matching the type system's
    /// naming.
    pub fn kind_description(&self) -> &'static str {
        match self.dereference() {
            Value::Undef => "Undef",
            Value::Default => "Default",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Regex(_) => "Regexp",
            Value::Type(_) => "Type",
            Value::Array(_) => "Array",
            Value::Hash(_) => "Hash",
            Value::Iterator(_) => "Iterator",
            Value::Variable(_) => "Variable",
        }
    }

    /// Enumerate the resources a relationship operand refers to: resource
    /// reference types, class types, resource strings (`File[/x]`), and
    /// arrays thereof. Yields `(lowercased type name, title)` pairs.
    pub fn each_resource(
        &self,
        callback: &mut dyn FnMut(String, String),
        error: &mut dyn FnMut(String),
    ) {
        match self.dereference() {
            Value::String(text) => match crate::types::parse_resource_reference(text) {
                Some((type_name, title)) => callback(type_name, title),
                None => error(format!("expected a resource string but found \"{}\".", text)),
            },
            Value::Type(t) => match t.as_ref() {
                Type::Resource {
                    type_name: Some(type_name),
                    title: Some(title),
                } => callback(type_name.clone(), title.clone()),
                Type::Class { name: Some(name) } => {
                    callback("class".to_string(), name.clone());
                }
                other => error(format!(
                    "expected a fully qualified resource reference but found {}.",
                    other
                )),
            },
            Value::Array(elements) => {
                for element in elements {
                    element.each_resource(callback, error);
                }
            }
            other => error(format!(
                "expected String or fully qualified Resource for relationship but found {}.",
                other.kind_description()
            )),
        }
    }

    /// JSON export.
    ///
    /// `undef` maps to null, `default` to the string "default", regexes and
    /// types to their renderings, hashes to objects with stringified keys,
    /// and iterators materialize once.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self.dereference() {
            Value::Undef => Json::Null,
            Value::Default => Json::String("default".to_string()),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Integer(i) => Json::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Regex(r) => Json::String(r.to_string()),
            Value::Type(t) => Json::String(t.to_string()),
            Value::Array(elements) => {
                Json::Array(elements.iter().map(Value::to_json).collect())
            }
            Value::Hash(hash) => {
                let mut object = serde_json::Map::new();
                for (key, value) in hash.iter() {
                    object.insert(key.to_string(), value.to_json());
                }
                Json::Object(object)
            }
            Value::Iterator(iterator) => match iterator.to_array() {
                Ok(values) => Json::Array(values.iter().map(Value::to_json).collect()),
                Err(_) => Json::Null,
            },
            Value::Variable(_) => unreachable!("dereferenced"),
        }
    }
}

/// NFC-aware string equality.
pub fn unicode_eq(left: &str, right: &str) -> bool {
    if left == right {
        return true;
    }
    left.nfc().eq(right.nfc())
}

fn hash_string<H: Hasher>(value: &str, state: &mut H) {
    for c in value.nfc() {
        state.write_u32(c as u32);
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self.dereference(), other.dereference()) {
            (Value::Undef, Value::Undef) => true,
            (Value::Default, Value::Default) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => unicode_eq(a, b),
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Hash(a), Value::Hash(b)) => a == b,
            (Value::Iterator(a), Value::Iterator(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.dereference() {
            Value::Undef => state.write_u8(0),
            Value::Default => state.write_u8(1),
            Value::Boolean(b) => {
                state.write_u8(2);
                b.hash(state);
            }
            Value::Integer(i) => {
                state.write_u8(3);
                i.hash(state);
            }
            Value::Float(f) => {
                state.write_u8(4);
                // Normalize -0.0 so hashing agrees with IEEE equality.
                let normalized = if *f == 0.0 { 0.0f64 } else { *f };
                state.write_u64(normalized.to_bits());
            }
            Value::String(s) => {
                state.write_u8(5);
                hash_string(s, state);
            }
            Value::Regex(r) => {
                state.write_u8(6);
                r.hash(state);
            }
            Value::Type(t) => {
                state.write_u8(7);
                t.hash(state);
            }
            Value::Array(elements) => {
                state.write_u8(8);
                for element in elements {
                    element.hash(state);
                }
            }
            Value::Hash(hash) => {
                state.write_u8(9);
                hash.hash(state);
            }
            Value::Iterator(iterator) => {
                state.write_u8(10);
                iterator.value.hash(state);
                iterator.step.hash(state);
                iterator.reversed.hash(state);
            }
            Value::Variable(_) => unreachable!("dereferenced"),
        }
    }
}

/// Render a float the way the language writes them: integral values keep a
/// trailing `.0`.
pub fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    if value.is_finite() && value == value.trunc() && value.abs() < 1e16 {
        write!(f, "{:.1}", value)
    } else {
        write!(f, "{}", value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dereference() {
            Value::Undef => Ok(()),
            Value::Default => write!(f, "default"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write_float(f, *v),
            Value::String(s) => write!(f, "{}", s),
            Value::Regex(r) => write!(f, "{}", r),
            Value::Type(t) => write!(f, "{}", t),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            Value::Hash(hash) => {
                write!(f, "{{")?;
                for (i, (key, value)) in hash.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} => {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Iterator(iterator) => match iterator.to_array() {
                Ok(values) => write!(f, "{}", Value::Array(values)),
                Err(_) => write!(f, "Iterator"),
            },
            Value::Variable(_) => unreachable!("dereferenced"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Undef.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn string_equality_is_normalization_aware() {
        // U+00E9 vs e + combining acute.
        let composed = Value::string("caf\u{e9}");
        let decomposed = Value::string("cafe\u{301}");
        assert_eq!(composed, decomposed);
    }

    #[test]
    fn hash_agrees_with_equality_for_normalized_strings() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("caf\u{e9}"), Value::Integer(1));
        assert_eq!(
            hash.get(&Value::string("cafe\u{301}")),
            Some(&Value::Integer(1))
        );
    }

    #[test]
    fn integers_and_floats_are_structurally_distinct() {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
    }

    #[test]
    fn variables_are_transparent() {
        let variable = Value::Variable(VariableValue {
            name: "x".into(),
            value: Arc::new(Value::Integer(42)),
        });
        assert_eq!(variable, Value::Integer(42));
        assert_eq!(variable.as_integer(), Some(42));
    }

    #[test]
    fn hash_preserves_insertion_order() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("z"), Value::Integer(1));
        hash.insert(Value::string("a"), Value::Integer(2));
        let keys: Vec<_> = hash.keys().cloned().collect();
        assert_eq!(keys, vec![Value::string("z"), Value::string("a")]);
    }

    #[test]
    fn hash_equality_ignores_order() {
        let mut a = ValueHash::new();
        a.insert(Value::string("x"), Value::Integer(1));
        a.insert(Value::string("y"), Value::Integer(2));
        let mut b = ValueHash::new();
        b.insert(Value::string("y"), Value::Integer(2));
        b.insert(Value::string("x"), Value::Integer(1));
        assert_eq!(Value::Hash(a), Value::Hash(b));
    }

    #[test]
    fn display_rendering() {
        assert_eq!(Value::Undef.to_string(), "");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(2.5).to_string(), "2.5");
        let array = Value::Array(vec![Value::Integer(1), Value::string("two")]);
        assert_eq!(array.to_string(), "[1, two]");
    }

    #[test]
    fn json_export() {
        assert_eq!(Value::Undef.to_json(), serde_json::Value::Null);
        assert_eq!(
            Value::Default.to_json(),
            serde_json::Value::String("default".into())
        );
        let mut hash = ValueHash::new();
        hash.insert(Value::Integer(1), Value::Boolean(true));
        let json = Value::Hash(hash).to_json();
        assert_eq!(json, serde_json::json!({"1": true}));
    }

    #[test]
    fn each_resource_parses_strings_and_types() {
        let mut found = Vec::new();
        let mut errors = Vec::new();
        Value::string("File[/tmp/x]").each_resource(
            &mut |type_name, title| found.push((type_name, title)),
            &mut |message| errors.push(message),
        );
        assert_eq!(found, vec![("file".to_string(), "/tmp/x".to_string())]);
        assert!(errors.is_empty());

        let mut errors = Vec::new();
        Value::Integer(3).each_resource(&mut |_, _| {}, &mut |message| errors.push(message));
        assert_eq!(errors.len(), 1);
    }
}
