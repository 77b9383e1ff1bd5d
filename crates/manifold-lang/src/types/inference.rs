//! Type inference over values, least upper bounds, and generalization.
//!
//! Two inference modes:
//!
//! - *general*: the smallest well-known type containing the value; arrays
//!   and hashes compute a least upper bound across their contents
//! - *detailed*: arrays become tuples and string-keyed hashes become
//!   structs, preserving per-element types

use super::instance::string_length;
use super::{RecursionGuard, StructField, Type};
use crate::value::Value;

/// Infer the general type of a value.
pub fn infer(value: &Value) -> Type {
    match value.dereference() {
        Value::Undef => Type::Undef,
        Value::Default => Type::Default,
        Value::Boolean(_) => Type::Boolean,
        Value::Integer(i) => Type::Integer {
            from: Some(*i),
            to: Some(*i),
        },
        Value::Float(f) => Type::Float {
            from: Some(*f),
            to: Some(*f),
        },
        Value::String(s) => {
            let length = string_length(s);
            Type::String {
                from: Some(length),
                to: Some(length),
            }
        }
        Value::Regex(regex) => Type::Regexp {
            pattern: Some(regex.clone()),
        },
        Value::Type(t) => Type::Type(Some(t.clone())),
        Value::Array(elements) => {
            let element = lub_all(elements.iter().map(infer));
            Type::Array {
                element: Box::new(element),
                from: Some(elements.len()),
                to: Some(elements.len()),
            }
        }
        Value::Hash(hash) => {
            let key = lub_all(hash.keys().map(infer));
            let value = lub_all(hash.values().map(infer));
            Type::Hash {
                key: Box::new(key),
                value: Box::new(value),
                from: Some(hash.len()),
                to: Some(hash.len()),
            }
        }
        Value::Iterator(iterator) => {
            let element = match iterator.to_array() {
                Ok(values) => lub_all(values.iter().map(infer)),
                Err(_) => Type::Any,
            };
            Type::Iterator(Some(Box::new(element)))
        }
        Value::Variable(_) => unreachable!("dereferenced"),
    }
}

/// Infer the detailed type of a value.
pub fn infer_detailed(value: &Value) -> Type {
    match value.dereference() {
        Value::Array(elements) => {
            if elements.is_empty() {
                return infer(value);
            }
            Type::Tuple {
                types: elements.iter().map(infer_detailed).collect(),
                from: None,
                to: None,
            }
        }
        Value::Hash(hash) => {
            if hash.is_empty() {
                return infer(value);
            }
            if hash.keys().all(|key| key.as_string().is_some()) {
                let fields = hash
                    .iter()
                    .map(|(key, value)| StructField {
                        key: key.as_string().expect("checked string key").to_string(),
                        optional: false,
                        value: infer_detailed(value),
                    })
                    .collect();
                return Type::Struct(fields);
            }
            let keys = distinct(hash.keys().map(infer_detailed));
            let values = distinct(hash.values().map(infer_detailed));
            Type::Hash {
                key: Box::new(variant_of(keys)),
                value: Box::new(variant_of(values)),
                from: Some(hash.len()),
                to: Some(hash.len()),
            }
        }
        _ => infer(value),
    }
}

fn distinct(types: impl Iterator<Item = Type>) -> Vec<Type> {
    let mut result: Vec<Type> = Vec::new();
    for t in types {
        if !result.contains(&t) {
            result.push(t);
        }
    }
    result
}

fn variant_of(mut types: Vec<Type>) -> Type {
    if types.len() == 1 {
        types.remove(0)
    } else {
        Type::Variant(types)
    }
}

fn lub_all(types: impl Iterator<Item = Type>) -> Type {
    let mut result: Option<Type> = None;
    for t in types {
        result = Some(match result {
            None => t,
            Some(previous) => {
                let mut guard = RecursionGuard::new();
                least_upper_bound(&previous, &t, &mut guard)
            }
        });
    }
    result.unwrap_or(Type::Any)
}

/// The least upper bound of two types, per the reduction ladder:
/// assignability, element-wise collection merge, common resource type,
/// member-set joins, then the Numeric/Scalar/Data/Any widenings.
pub fn least_upper_bound(a: &Type, b: &Type, guard: &mut RecursionGuard) -> Type {
    if a.is_assignable(b, guard) {
        return a.clone();
    }
    if b.is_assignable(a, guard) {
        return b.clone();
    }

    let a = a.dereference();
    let b = b.dereference();

    match (a, b) {
        (
            Type::Array {
                element: ea,
                from: fa,
                to: ta,
            },
            Type::Array {
                element: eb,
                from: fb,
                to: tb,
            },
        ) => Type::Array {
            element: Box::new(least_upper_bound(ea, eb, guard)),
            from: merge_min(*fa, *fb),
            to: merge_max(*ta, *tb),
        },
        (
            Type::Hash {
                key: ka,
                value: va,
                from: fa,
                to: ta,
            },
            Type::Hash {
                key: kb,
                value: vb,
                from: fb,
                to: tb,
            },
        ) => Type::Hash {
            key: Box::new(least_upper_bound(ka, kb, guard)),
            value: Box::new(least_upper_bound(va, vb, guard)),
            from: merge_min(*fa, *fb),
            to: merge_max(*ta, *tb),
        },
        (
            Type::Resource {
                type_name: Some(name_a),
                ..
            },
            Type::Resource {
                type_name: Some(name_b),
                ..
            },
        ) if name_a == name_b => Type::Resource {
            type_name: Some(name_a.clone()),
            title: None,
        },
        (Type::Variant(arms_a), Type::Variant(arms_b)) => {
            let mut arms = arms_a.clone();
            for arm in arms_b {
                if !arms.contains(arm) {
                    arms.push(arm.clone());
                }
            }
            Type::Variant(arms)
        }
        (Type::Pattern(pa), Type::Pattern(pb)) => {
            let mut patterns = pa.clone();
            for pattern in pb {
                if !patterns.contains(pattern) {
                    patterns.push(pattern.clone());
                }
            }
            Type::Pattern(patterns)
        }
        (Type::Enum(va), Type::Enum(vb)) => {
            let mut values = va.clone();
            for value in vb {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
            Type::Enum(values)
        }
        _ => {
            let both = |bound: &Type, guard: &mut RecursionGuard| {
                bound.is_assignable(a, guard) && bound.is_assignable(b, guard)
            };
            if both(&Type::Numeric, guard) {
                Type::Numeric
            } else if both(&Type::Scalar, guard) {
                Type::Scalar
            } else if both(&Type::Data, guard) {
                Type::Data
            } else {
                Type::Any
            }
        }
    }
}

fn merge_min(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        _ => None,
    }
}

fn merge_max(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}

/// Erase value-specific parameters, keeping the structural shape.
pub(super) fn generalize(t: &Type) -> Type {
    match t {
        Type::Integer { .. } => Type::integer(),
        Type::Float { .. } => Type::float(),
        Type::String { .. } => Type::string(),
        Type::Enum(_) | Type::Pattern(_) => Type::string(),
        Type::Collection { .. } => Type::Collection {
            from: None,
            to: None,
        },
        Type::Array { element, .. } => Type::Array {
            element: Box::new(generalize(element)),
            from: None,
            to: None,
        },
        Type::Hash { key, value, .. } => Type::Hash {
            key: Box::new(generalize(key)),
            value: Box::new(generalize(value)),
            from: None,
            to: None,
        },
        Type::Tuple { types, .. } => Type::Tuple {
            types: types.iter().map(generalize).collect(),
            from: None,
            to: None,
        },
        Type::Struct(fields) => Type::Struct(
            fields
                .iter()
                .map(|field| StructField {
                    key: field.key.clone(),
                    optional: field.optional,
                    value: generalize(&field.value),
                })
                .collect(),
        ),
        Type::Variant(types) => Type::Variant(types.iter().map(generalize).collect()),
        Type::Optional(inner) => {
            Type::Optional(inner.as_ref().map(|inner| Box::new(generalize(inner))))
        }
        Type::NotUndef(inner) => {
            Type::NotUndef(inner.as_ref().map(|inner| Box::new(generalize(inner))))
        }
        Type::Resource { type_name, .. } => Type::Resource {
            type_name: type_name.clone(),
            title: None,
        },
        Type::Iterable(inner) => {
            Type::Iterable(inner.as_ref().map(|inner| Box::new(generalize(inner))))
        }
        Type::Iterator(inner) => {
            Type::Iterator(inner.as_ref().map(|inner| Box::new(generalize(inner))))
        }
        Type::Alias(alias) => match alias.resolved_type() {
            Some(resolved) => generalize(resolved),
            None => Type::Alias(alias.clone()),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueHash;

    #[test]
    fn scalar_inference() {
        assert_eq!(infer(&Value::Undef), Type::Undef);
        assert_eq!(
            infer(&Value::Integer(4)),
            Type::Integer {
                from: Some(4),
                to: Some(4)
            }
        );
        assert_eq!(
            infer(&Value::string("ab")),
            Type::String {
                from: Some(2),
                to: Some(2)
            }
        );
    }

    #[test]
    fn mixed_array_general_inference() {
        let value = Value::Array(vec![
            Value::Integer(1),
            Value::Float(2.0),
            Value::string("x"),
        ]);
        assert_eq!(infer(&value).to_string(), "Array[Scalar, 3, 3]");
    }

    #[test]
    fn mixed_array_detailed_inference() {
        let value = Value::Array(vec![
            Value::Integer(1),
            Value::Float(2.0),
            Value::string("x"),
        ]);
        assert_eq!(
            infer_detailed(&value).to_string(),
            "Tuple[Integer[1, 1], Float[2.0, 2.0], String[1, 1]]"
        );
    }

    #[test]
    fn string_keyed_hash_becomes_struct() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("port"), Value::Integer(80));
        hash.insert(Value::string("host"), Value::string("web"));
        let t = infer_detailed(&Value::Hash(hash));
        let Type::Struct(fields) = &t else {
            panic!("expected a struct, got {}", t);
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].key, "port");
    }

    #[test]
    fn non_string_keys_stay_hash() {
        let mut hash = ValueHash::new();
        hash.insert(Value::Integer(1), Value::string("one"));
        hash.insert(Value::string("two"), Value::Integer(2));
        let t = infer_detailed(&Value::Hash(hash));
        assert!(matches!(t, Type::Hash { .. }));
    }

    #[test]
    fn numeric_lub() {
        let mut guard = RecursionGuard::new();
        let a = Type::Integer {
            from: Some(1),
            to: Some(1),
        };
        let b = Type::Float {
            from: Some(2.0),
            to: Some(2.0),
        };
        assert_eq!(least_upper_bound(&a, &b, &mut guard), Type::Numeric);
    }

    #[test]
    fn assignable_side_wins() {
        let mut guard = RecursionGuard::new();
        let narrow = Type::Integer {
            from: Some(2),
            to: Some(3),
        };
        assert_eq!(
            least_upper_bound(&Type::integer(), &narrow, &mut guard),
            Type::integer()
        );
    }

    #[test]
    fn array_lub_recurses() {
        let mut guard = RecursionGuard::new();
        let a = Type::Array {
            element: Box::new(Type::Integer {
                from: Some(1),
                to: Some(1),
            }),
            from: Some(1),
            to: Some(1),
        };
        let b = Type::Array {
            element: Box::new(Type::String {
                from: Some(1),
                to: Some(1),
            }),
            from: Some(2),
            to: Some(2),
        };
        let lub = least_upper_bound(&a, &b, &mut guard);
        assert_eq!(lub.to_string(), "Array[Scalar, 1, 2]");
    }

    #[test]
    fn same_resource_type_lub() {
        let mut guard = RecursionGuard::new();
        let a = Type::Resource {
            type_name: Some("file".into()),
            title: Some("/a".into()),
        };
        let b = Type::Resource {
            type_name: Some("file".into()),
            title: Some("/b".into()),
        };
        assert_eq!(
            least_upper_bound(&a, &b, &mut guard).to_string(),
            "File"
        );
    }

    #[test]
    fn enum_join() {
        let mut guard = RecursionGuard::new();
        let a = Type::Enum(vec!["a".into()]);
        let b = Type::Enum(vec!["b".into()]);
        assert_eq!(
            least_upper_bound(&a, &b, &mut guard).to_string(),
            "Enum['a', 'b']"
        );
    }

    #[test]
    fn unrelated_types_widen_to_any() {
        let mut guard = RecursionGuard::new();
        assert_eq!(
            least_upper_bound(&Type::Boolean, &Type::Type(None), &mut guard),
            Type::Any
        );
    }

    #[test]
    fn generalization() {
        assert_eq!(
            generalize(&Type::Integer {
                from: Some(1),
                to: Some(2)
            }),
            Type::integer()
        );
        assert_eq!(generalize(&Type::Enum(vec!["a".into()])), Type::string());
        let array = Type::Array {
            element: Box::new(Type::String {
                from: Some(1),
                to: Some(1),
            }),
            from: Some(3),
            to: Some(3),
        };
        assert_eq!(generalize(&array).to_string(), "Array[String]");
    }
}
