//! `is_instance`: value membership tests for every type constructor.

use super::{RecursionGuard, StructField, Type};
use crate::value::{unicode_eq, IteratorValue, Value};
use unicode_segmentation::UnicodeSegmentation;

/// Grapheme count, which is what string type bounds measure.
pub(super) fn string_length(value: &str) -> usize {
    value.graphemes(true).count()
}

fn in_size_bounds(size: usize, from: &Option<usize>, to: &Option<usize>) -> bool {
    from.map(|from| size >= from).unwrap_or(true) && to.map(|to| size <= to).unwrap_or(true)
}

pub(super) fn is_instance(t: &Type, value: &Value, guard: &mut RecursionGuard) -> bool {
    let value = value.dereference();
    match t {
        Type::Any => true,
        Type::Undef => value.is_undef(),
        Type::Default => value.is_default(),
        Type::Boolean => matches!(value, Value::Boolean(_)),
        Type::Integer { from, to } => match value {
            Value::Integer(i) => {
                from.map(|from| *i >= from).unwrap_or(true)
                    && to.map(|to| *i <= to).unwrap_or(true)
            }
            _ => false,
        },
        Type::Float { from, to } => match value {
            Value::Float(f) => {
                from.map(|from| *f >= from).unwrap_or(true)
                    && to.map(|to| *f <= to).unwrap_or(true)
            }
            _ => false,
        },
        Type::String { from, to } => match value {
            Value::String(s) => in_size_bounds(string_length(s), from, to),
            _ => false,
        },
        Type::Regexp { pattern } => match value {
            Value::Regex(regex) => pattern
                .as_ref()
                .map(|pattern| pattern == regex)
                .unwrap_or(true),
            _ => false,
        },
        Type::Pattern(patterns) => match value {
            Value::String(s) => {
                patterns.is_empty() || patterns.iter().any(|pattern| pattern.is_match(s))
            }
            _ => false,
        },
        Type::Enum(values) => match value {
            Value::String(s) => {
                values.is_empty() || values.iter().any(|candidate| unicode_eq(candidate, s))
            }
            _ => false,
        },
        Type::Numeric => matches!(value, Value::Integer(_) | Value::Float(_)),
        Type::Scalar => matches!(
            value,
            Value::Integer(_) | Value::Float(_) | Value::String(_) | Value::Boolean(_)
                | Value::Regex(_)
        ),
        Type::Data => is_data(value, guard),
        Type::Collection { from, to } => match value {
            Value::Array(elements) => in_size_bounds(elements.len(), from, to),
            Value::Hash(hash) => in_size_bounds(hash.len(), from, to),
            _ => false,
        },
        Type::Array { element, from, to } => match value {
            Value::Array(elements) => {
                in_size_bounds(elements.len(), from, to)
                    && elements.iter().all(|e| is_instance(element, e, guard))
            }
            _ => false,
        },
        Type::Hash {
            key,
            value: value_type,
            from,
            to,
        } => match value {
            Value::Hash(hash) => {
                in_size_bounds(hash.len(), from, to)
                    && hash.iter().all(|(k, v)| {
                        is_instance(key, k, guard) && is_instance(value_type, v, guard)
                    })
            }
            _ => false,
        },
        Type::Tuple { types, from, to } => match value {
            Value::Array(elements) => {
                let min = from.unwrap_or(types.len());
                let max = to.unwrap_or(types.len());
                if elements.len() < min || elements.len() > max {
                    return false;
                }
                if types.is_empty() {
                    return true;
                }
                elements.iter().enumerate().all(|(i, element)| {
                    let t = &types[i.min(types.len() - 1)];
                    is_instance(t, element, guard)
                })
            }
            _ => false,
        },
        Type::Struct(fields) => match value {
            Value::Hash(hash) => is_struct_instance(fields, hash, guard),
            _ => false,
        },
        Type::Variant(types) => types.iter().any(|t| is_instance(t, value, guard)),
        Type::Optional(inner) => {
            value.is_undef()
                || inner
                    .as_ref()
                    .map(|inner| is_instance(inner, value, guard))
                    .unwrap_or(true)
        }
        Type::NotUndef(inner) => {
            !value.is_undef()
                && inner
                    .as_ref()
                    .map(|inner| is_instance(inner, value, guard))
                    .unwrap_or(true)
        }
        // There are no callable values.
        Type::Callable { .. } => false,
        Type::Resource { type_name, title } => match value {
            Value::Type(t) => match t.as_ref() {
                Type::Resource {
                    type_name: value_name,
                    title: value_title,
                } => {
                    let Some(type_name) = type_name else {
                        return true;
                    };
                    if value_name.as_deref() != Some(type_name.as_str()) {
                        return false;
                    }
                    title.is_none() || title.as_deref() == value_title.as_deref()
                }
                _ => false,
            },
            _ => false,
        },
        Type::Class { name } => match value {
            Value::Type(t) => match t.as_ref() {
                Type::Class { name: value_name } => {
                    name.is_none() || name.as_deref() == value_name.as_deref()
                }
                _ => false,
            },
            _ => false,
        },
        Type::Type(parameter) => match value {
            Value::Type(t) => parameter
                .as_ref()
                .map(|parameter| parameter.is_assignable(t, guard))
                .unwrap_or(true),
            _ => false,
        },
        Type::Iterable(element) => match value {
            Value::Array(elements) => element
                .as_ref()
                .map(|element| elements.iter().all(|e| is_instance(element, e, guard)))
                .unwrap_or(true),
            Value::Hash(hash) => match element {
                Some(element) => hash.iter().all(|(k, v)| {
                    let pair = Value::Array(vec![k.clone(), v.clone()]);
                    is_instance(element, &pair, guard)
                }),
                None => true,
            },
            Value::Integer(i) => *i >= 0,
            Value::Type(t) => matches!(
                t.as_ref(),
                Type::Integer {
                    from: Some(_),
                    to: Some(_)
                }
            ),
            Value::Iterator(iterator) => iterable_produces(iterator, element, guard),
            _ => false,
        },
        Type::Iterator(element) => match value {
            Value::Iterator(iterator) => iterable_produces(iterator, element, guard),
            _ => false,
        },
        Type::Alias(alias) => {
            let key = value as *const Value as usize;
            if !guard.enter(&alias.name, key) {
                return false;
            }
            let result = alias
                .resolved_type()
                .map(|resolved| is_instance(resolved, value, guard))
                .unwrap_or(false);
            guard.leave(&alias.name, key);
            result
        }
        // Runtime objects do not appear as values in this implementation.
        Type::Runtime { .. } => false,
        Type::CatalogEntry => match value {
            Value::Type(t) => matches!(
                t.as_ref(),
                Type::Resource { .. } | Type::Class { .. }
            ),
            _ => false,
        },
    }
}

fn is_data(value: &Value, guard: &mut RecursionGuard) -> bool {
    match value.dereference() {
        Value::Undef
        | Value::Integer(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Boolean(_)
        | Value::Regex(_) => true,
        Value::Array(elements) => elements.iter().all(|e| is_data(e, guard)),
        Value::Hash(hash) => hash.iter().all(|(k, v)| {
            is_instance(&Type::Scalar, k, guard) && is_data(v, guard)
        }),
        _ => false,
    }
}

fn is_struct_instance(
    fields: &[StructField],
    hash: &crate::value::ValueHash,
    guard: &mut RecursionGuard,
) -> bool {
    // Every present key must match its schema; required keys must be
    // present; no keys outside the schema.
    for field in fields {
        let key = Value::string(field.key.clone());
        match hash.get(&key) {
            Some(value) => {
                if !is_instance(&field.value, value, guard) {
                    return false;
                }
            }
            None => {
                let accepts_missing = field.optional
                    || is_instance(&field.value, &Value::Undef, guard);
                if !accepts_missing {
                    return false;
                }
            }
        }
    }
    hash.keys().all(|key| match key.as_string() {
        Some(name) => fields.iter().any(|field| unicode_eq(&field.key, name)),
        None => false,
    })
}

/// Whether an iterator produces values matching `element` (a `None`
/// element accepts anything).
fn iterable_produces(
    iterator: &IteratorValue,
    element: &Option<Box<Type>>,
    guard: &mut RecursionGuard,
) -> bool {
    let Some(element) = element else {
        return true;
    };
    match iterator.to_array() {
        Ok(values) => values.iter().all(|v| is_instance(element, v, guard)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::AliasType;
    use super::*;
    use crate::value::ValueHash;

    fn check(t: &Type, value: &Value) -> bool {
        let mut guard = RecursionGuard::new();
        t.is_instance(value, &mut guard)
    }

    #[test]
    fn primitives() {
        assert!(check(&Type::Any, &Value::Undef));
        assert!(check(&Type::Undef, &Value::Undef));
        assert!(!check(&Type::Undef, &Value::Integer(0)));
        assert!(check(&Type::Boolean, &Value::Boolean(true)));
        assert!(check(&Type::Numeric, &Value::Float(1.5)));
        assert!(!check(&Type::Numeric, &Value::string("1")));
    }

    #[test]
    fn integer_bounds() {
        let t = Type::Integer {
            from: Some(1),
            to: Some(10),
        };
        assert!(check(&t, &Value::Integer(1)));
        assert!(check(&t, &Value::Integer(10)));
        assert!(!check(&t, &Value::Integer(0)));
        assert!(!check(&t, &Value::Float(5.0)));
    }

    #[test]
    fn string_bounds_are_graphemes() {
        let t = Type::String {
            from: Some(4),
            to: Some(4),
        };
        // Four graphemes even though the last is two code points.
        assert!(check(&t, &Value::string("cafe\u{301}")));
        assert!(!check(&t, &Value::string("abc")));
    }

    #[test]
    fn enum_and_pattern() {
        let t = Type::Enum(vec!["running".into(), "stopped".into()]);
        assert!(check(&t, &Value::string("running")));
        assert!(!check(&t, &Value::string("crashed")));

        let t = Type::Pattern(vec![crate::value::ValueRegex::new(r"^\d+$").unwrap()]);
        assert!(check(&t, &Value::string("123")));
        assert!(!check(&t, &Value::string("x123y?!")));
    }

    #[test]
    fn tuple_with_trailing_type() {
        let t = Type::Tuple {
            types: vec![Type::integer(), Type::string()],
            from: Some(2),
            to: Some(4),
        };
        let ok = Value::Array(vec![
            Value::Integer(1),
            Value::string("a"),
            Value::string("b"),
        ]);
        assert!(check(&t, &ok));
        let short = Value::Array(vec![Value::Integer(1)]);
        assert!(!check(&t, &short));
    }

    #[test]
    fn struct_fields() {
        let t = Type::Struct(vec![
            StructField {
                key: "mode".into(),
                optional: false,
                value: Type::string(),
            },
            StructField {
                key: "owner".into(),
                optional: true,
                value: Type::string(),
            },
        ]);
        let mut hash = ValueHash::new();
        hash.insert(Value::string("mode"), Value::string("0644"));
        assert!(check(&t, &Value::Hash(hash.clone())));

        hash.insert(Value::string("extra"), Value::Integer(1));
        assert!(!check(&t, &Value::Hash(hash)));

        let empty = ValueHash::new();
        assert!(!check(&t, &Value::Hash(empty)));
    }

    #[test]
    fn variant_and_optional() {
        let t = Type::Variant(vec![Type::integer(), Type::string()]);
        assert!(check(&t, &Value::Integer(1)));
        assert!(check(&t, &Value::string("x")));
        assert!(!check(&t, &Value::Boolean(true)));

        let t = Type::Optional(Some(Box::new(Type::integer())));
        assert!(check(&t, &Value::Undef));
        assert!(check(&t, &Value::Integer(1)));
        assert!(!check(&t, &Value::string("1")));
    }

    #[test]
    fn data_recurses() {
        let mut hash = ValueHash::new();
        hash.insert(
            Value::string("list"),
            Value::Array(vec![Value::Integer(1), Value::Undef]),
        );
        assert!(check(&Type::Data, &Value::Hash(hash)));
        assert!(!check(
            &Type::Data,
            &Value::Type(Box::new(Type::integer()))
        ));
    }

    #[test]
    fn resource_and_class_references() {
        let file_x = Value::Type(Box::new(Type::Resource {
            type_name: Some("file".into()),
            title: Some("/x".into()),
        }));
        assert!(check(
            &Type::Resource {
                type_name: None,
                title: None
            },
            &file_x
        ));
        assert!(check(
            &Type::Resource {
                type_name: Some("file".into()),
                title: None
            },
            &file_x
        ));
        assert!(!check(
            &Type::Resource {
                type_name: Some("user".into()),
                title: None
            },
            &file_x
        ));
        assert!(check(&Type::CatalogEntry, &file_x));
    }

    #[test]
    fn type_type() {
        let t = Type::Type(Some(Box::new(Type::Numeric)));
        assert!(check(&t, &Value::Type(Box::new(Type::integer()))));
        assert!(!check(&t, &Value::Type(Box::new(Type::string()))));
        assert!(check(&Type::Type(None), &Value::Type(Box::new(Type::Any))));
    }

    #[test]
    fn recursive_alias_instance() {
        // Tree = Variant[Integer, Array[Tree]]
        let alias = AliasType::new("Tree");
        let tree = Type::Alias(alias.clone());
        alias.resolve(Type::Variant(vec![
            Type::integer(),
            Type::Array {
                element: Box::new(tree.clone()),
                from: None,
                to: None,
            },
        ]));

        let nested = Value::Array(vec![
            Value::Integer(1),
            Value::Array(vec![Value::Integer(2), Value::Array(vec![])]),
        ]);
        assert!(check(&tree, &nested));
        assert!(!check(&tree, &Value::string("nope")));
    }
}
