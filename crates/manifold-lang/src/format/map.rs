//! Type-keyed format maps.

use super::Format;
use crate::error::ConversionError;
use crate::types::{infer, RecursionGuard, Type};
use crate::value::{Value, ValueHash};

/// An ordered list of `(Type, Format)` pairs, sorted most specific first.
#[derive(Debug, Clone)]
pub struct FormatMap {
    formats: Vec<(Type, Format)>,
}

/// Tie-break rank for types that are equal or disjoint under
/// assignability; lower ranks sort first.
fn type_rank(t: &Type) -> usize {
    match t.dereference() {
        Type::Struct(_) => 1,
        Type::Hash { .. } => 2,
        Type::Tuple { .. } => 3,
        Type::Array { .. } => 4,
        Type::Pattern(_) => 5,
        Type::Enum(_) => 6,
        Type::String { .. } => 7,
        _ => usize::MAX,
    }
}

impl FormatMap {
    /// A map applying one specification to every value.
    pub fn from_string(specification: &str) -> Result<Self, ConversionError> {
        Ok(Self {
            formats: vec![(Type::Any, Format::parse(specification)?)],
        })
    }

    /// Build from a `Type => format` hash; when `allow_hash` is set, the
    /// values may be descriptor hashes as well as specification strings.
    pub fn from_hash(value: &ValueHash, allow_hash: bool) -> Result<Self, ConversionError> {
        let mut formats = Vec::new();
        for (key, entry) in value.iter() {
            let Some(t) = key.as_type() else {
                return Err(ConversionError::new(format!(
                    "expected Type for hash key but found {}.",
                    infer(key)
                )));
            };
            let format = match entry.dereference() {
                Value::Hash(hash) if allow_hash => Format::from_hash(hash)?,
                Value::String(specification) => Format::parse(specification)?,
                other => {
                    let expected = if allow_hash { "Hash or String" } else { "String" };
                    return Err(ConversionError::new(format!(
                        "expected {} for hash value but found {}.",
                        expected,
                        other.kind_description()
                    )));
                }
            };
            formats.push((t.clone(), format));
        }

        formats.sort_by(|(left, _), (right, _)| {
            use std::cmp::Ordering;
            let mut guard = RecursionGuard::new();
            let left_assignable = left.is_assignable(right, &mut guard);
            let right_assignable = right.is_assignable(left, &mut guard);
            if left_assignable && !right_assignable {
                return Ordering::Greater;
            }
            if !left_assignable && right_assignable {
                return Ordering::Less;
            }
            type_rank(left).cmp(&type_rank(right))
        });

        Ok(Self { formats })
    }

    /// The first format whose type matches the value, if any.
    pub fn find_format(&self, value: &Value) -> Option<&Format> {
        let mut guard = RecursionGuard::new();
        self.formats
            .iter()
            .find(|(t, _)| t.is_instance(value, &mut guard))
            .map(|(_, format)| format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_value(t: Type) -> Value {
        Value::Type(Box::new(t))
    }

    #[test]
    fn specific_types_sort_before_general() {
        let mut hash = ValueHash::new();
        hash.insert(type_value(Type::Any), Value::string("%s"));
        hash.insert(type_value(Type::integer()), Value::string("%x"));
        let map = FormatMap::from_hash(&hash, true).unwrap();

        let format = map.find_format(&Value::Integer(255)).unwrap();
        assert_eq!(format.type_char, 'x');
        let format = map.find_format(&Value::string("x")).unwrap();
        assert_eq!(format.type_char, 's');
    }

    #[test]
    fn rank_breaks_ties() {
        // Struct outranks Hash so it is found first for matching values.
        let mut hash = ValueHash::new();
        hash.insert(type_value(Type::hash()), Value::string("%h"));
        hash.insert(
            type_value(Type::Struct(vec![crate::types::StructField {
                key: "a".into(),
                optional: false,
                value: Type::integer(),
            }])),
            Value::string("%s"),
        );
        let map = FormatMap::from_hash(&hash, true).unwrap();

        let mut value = ValueHash::new();
        value.insert(Value::string("a"), Value::Integer(1));
        let format = map.find_format(&Value::Hash(value)).unwrap();
        assert_eq!(format.type_char, 's');
    }

    #[test]
    fn non_type_key_is_an_error() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("Integer"), Value::string("%d"));
        assert!(FormatMap::from_hash(&hash, true).is_err());
    }

    #[test]
    fn no_match_returns_none() {
        let mut hash = ValueHash::new();
        hash.insert(type_value(Type::integer()), Value::string("%d"));
        let map = FormatMap::from_hash(&hash, true).unwrap();
        assert!(map.find_format(&Value::string("nope")).is_none());
    }
}
