//! `is_assignable`: whether every instance of one type is an instance of
//! another.
//!
//! The right-hand side is normalized first (variants distribute, `NotUndef`
//! unwraps, aliases dereference under the guard), then each left-hand
//! constructor applies its own rule. Cycles through aliases terminate
//! coinductively as `true`: a recursive comparison that never produces a
//! counterexample is a match.

use super::{RecursionGuard, StructField, Type};
use crate::value::Value;

pub(super) fn is_assignable(t: &Type, other: &Type, guard: &mut RecursionGuard) -> bool {
    // Reflexivity, including alias-by-name.
    if t == other {
        return true;
    }

    // Left-hand aliases dereference under the guard.
    if let Type::Alias(alias) = t {
        let key = other as *const Type as usize;
        if !guard.enter(&alias.name, key) {
            return true;
        }
        let result = alias
            .resolved_type()
            .map(|resolved| is_assignable(resolved, other, guard))
            .unwrap_or(false);
        guard.leave(&alias.name, key);
        return result;
    }

    // Right-hand normalization.
    match other {
        // Every arm of a variant must be assignable.
        Type::Variant(types) if !types.is_empty() => {
            return types.iter().all(|arm| is_assignable(t, arm, guard));
        }
        Type::NotUndef(Some(inner)) => {
            return is_assignable(t, inner, guard);
        }
        Type::Alias(alias) => {
            let key = t as *const Type as usize;
            if !guard.enter(&alias.name, key) {
                return true;
            }
            let result = alias
                .resolved_type()
                .map(|resolved| is_assignable(t, resolved, guard))
                .unwrap_or(false);
            guard.leave(&alias.name, key);
            return result;
        }
        _ => {}
    }

    match t {
        Type::Any => true,
        Type::Undef => matches!(other, Type::Undef),
        Type::Default => matches!(other, Type::Default),
        Type::Boolean => matches!(other, Type::Boolean),
        Type::Integer { from, to } => match other {
            Type::Integer {
                from: other_from,
                to: other_to,
            } => range_within(*other_from, *other_to, *from, *to),
            _ => false,
        },
        Type::Float { from, to } => match other {
            Type::Float {
                from: other_from,
                to: other_to,
            } => float_range_within(*other_from, *other_to, *from, *to),
            _ => false,
        },
        Type::Numeric => matches!(
            other,
            Type::Numeric | Type::Integer { .. } | Type::Float { .. }
        ),
        Type::String { from, to } => match other {
            Type::String {
                from: other_from,
                to: other_to,
            } => size_within(*other_from, *other_to, *from, *to),
            Type::Enum(values) => {
                !values.is_empty()
                    && values.iter().all(|value| {
                        let length = super::instance::string_length(value);
                        from.map(|from| length >= from).unwrap_or(true)
                            && to.map(|to| length <= to).unwrap_or(true)
                    })
            }
            // Pattern strings are statically unknowable; only an
            // unconstrained String accepts them.
            Type::Pattern(_) => from.is_none() && to.is_none(),
            _ => false,
        },
        Type::Regexp { pattern } => match other {
            Type::Regexp {
                pattern: other_pattern,
            } => pattern.is_none() || pattern == other_pattern,
            _ => false,
        },
        Type::Pattern(patterns) => match other {
            Type::Enum(values) => {
                patterns.is_empty()
                    || values
                        .iter()
                        .all(|value| patterns.iter().any(|p| p.is_match(value)))
            }
            Type::Pattern(other_patterns) => {
                patterns.is_empty()
                    || other_patterns.iter().all(|p| patterns.contains(p))
            }
            Type::String { .. } => patterns.is_empty(),
            _ => false,
        },
        Type::Enum(values) => match other {
            Type::Enum(other_values) => {
                values.is_empty()
                    || other_values
                        .iter()
                        .all(|value| values.iter().any(|v| v == value))
            }
            Type::String { .. } | Type::Pattern(_) => values.is_empty(),
            _ => false,
        },
        Type::Scalar => matches!(
            other,
            Type::Scalar
                | Type::Numeric
                | Type::Integer { .. }
                | Type::Float { .. }
                | Type::String { .. }
                | Type::Enum(_)
                | Type::Pattern(_)
                | Type::Boolean
                | Type::Regexp { .. }
        ),
        Type::Data => is_data_assignable(other, guard),
        Type::Collection { from, to } => match other {
            Type::Collection {
                from: other_from,
                to: other_to,
            }
            | Type::Array {
                from: other_from,
                to: other_to,
                ..
            }
            | Type::Hash {
                from: other_from,
                to: other_to,
                ..
            } => size_within(*other_from, *other_to, *from, *to),
            Type::Tuple {
                types,
                from: other_from,
                to: other_to,
            } => size_within(
                Some(other_from.unwrap_or(types.len())),
                Some(other_to.unwrap_or(types.len())),
                *from,
                *to,
            ),
            Type::Struct(fields) => size_within(
                Some(required_field_count(fields)),
                Some(fields.len()),
                *from,
                *to,
            ),
            _ => false,
        },
        Type::Array { element, from, to } => match other {
            Type::Array {
                element: other_element,
                from: other_from,
                to: other_to,
            } => {
                size_within(*other_from, *other_to, *from, *to)
                    && is_assignable(element, other_element, guard)
            }
            Type::Tuple {
                types,
                from: other_from,
                to: other_to,
            } => {
                size_within(
                    Some(other_from.unwrap_or(types.len())),
                    Some(other_to.unwrap_or(types.len())),
                    *from,
                    *to,
                ) && types.iter().all(|t| is_assignable(element, t, guard))
            }
            _ => false,
        },
        Type::Hash {
            key,
            value,
            from,
            to,
        } => match other {
            Type::Hash {
                key: other_key,
                value: other_value,
                from: other_from,
                to: other_to,
            } => {
                size_within(*other_from, *other_to, *from, *to)
                    && is_assignable(key, other_key, guard)
                    && is_assignable(value, other_value, guard)
            }
            Type::Struct(fields) => {
                size_within(
                    Some(required_field_count(fields)),
                    Some(fields.len()),
                    *from,
                    *to,
                ) && fields.iter().all(|field| {
                    key.is_instance(&Value::string(field.key.clone()), guard)
                        && is_assignable(value, &field.value, guard)
                })
            }
            _ => false,
        },
        Type::Tuple { types, from, to } => match other {
            Type::Tuple {
                types: other_types,
                from: other_from,
                to: other_to,
            } => {
                let min = from.unwrap_or(types.len());
                let max = to.unwrap_or(types.len());
                let other_min = other_from.unwrap_or(other_types.len());
                let other_max = other_to.unwrap_or(other_types.len());
                if other_min < min || other_max > max {
                    return false;
                }
                if types.is_empty() {
                    return true;
                }
                other_types.iter().enumerate().all(|(i, other_type)| {
                    let t = &types[i.min(types.len() - 1)];
                    is_assignable(t, other_type, guard)
                })
            }
            Type::Array {
                element,
                from: other_from,
                to: other_to,
            } => {
                let min = from.unwrap_or(types.len());
                let max = to.unwrap_or(types.len());
                size_within(*other_from, *other_to, Some(min), Some(max))
                    && types.iter().all(|t| is_assignable(t, element, guard))
            }
            _ => false,
        },
        Type::Struct(fields) => match other {
            Type::Struct(other_fields) => {
                for field in fields {
                    match other_fields.iter().find(|f| f.key == field.key) {
                        Some(other_field) => {
                            if !is_assignable(&field.value, &other_field.value, guard) {
                                return false;
                            }
                        }
                        None => {
                            if !field.optional {
                                return false;
                            }
                        }
                    }
                }
                other_fields
                    .iter()
                    .all(|f| fields.iter().any(|field| field.key == f.key))
            }
            Type::Hash {
                key,
                value,
                from: other_from,
                to: other_to,
            } => {
                size_within(
                    *other_from,
                    *other_to,
                    Some(required_field_count(fields)),
                    Some(fields.len()),
                ) && is_assignable(&Type::string(), key, guard)
                    && fields
                        .iter()
                        .all(|field| is_assignable(&field.value, value, guard))
            }
            _ => false,
        },
        Type::Variant(types) => types.iter().any(|arm| is_assignable(arm, other, guard)),
        Type::Optional(inner) => {
            matches!(other, Type::Undef)
                || inner
                    .as_ref()
                    .map(|inner| is_assignable(inner, other, guard))
                    .unwrap_or(true)
        }
        Type::NotUndef(inner) => {
            !admits_undef(other, guard)
                && inner
                    .as_ref()
                    .map(|inner| is_assignable(inner, other, guard))
                    .unwrap_or(true)
        }
        Type::Callable {
            types,
            min,
            max,
            block,
        } => match other {
            Type::Callable {
                types: other_types,
                min: other_min,
                max: other_max,
                block: other_block,
            } => {
                if types.is_empty() && min.is_none() && max.is_none() && block.is_none() {
                    return true;
                }
                if types.len() != other_types.len() {
                    return false;
                }
                // Parameters are contravariant.
                if !types
                    .iter()
                    .zip(other_types)
                    .all(|(mine, theirs)| is_assignable(theirs, mine, guard))
                {
                    return false;
                }
                if min != other_min || max != other_max {
                    return false;
                }
                match (block, other_block) {
                    (None, None) => true,
                    (Some(mine), Some(theirs)) => is_assignable(theirs, mine, guard),
                    _ => false,
                }
            }
            _ => false,
        },
        Type::Resource { type_name, title } => match other {
            Type::Resource {
                type_name: other_name,
                title: other_title,
            } => match type_name {
                None => true,
                Some(name) => {
                    other_name.as_deref() == Some(name.as_str())
                        && (title.is_none() || title.as_deref() == other_title.as_deref())
                }
            },
            _ => false,
        },
        Type::Class { name } => match other {
            Type::Class { name: other_name } => {
                name.is_none() || name.as_deref() == other_name.as_deref()
            }
            _ => false,
        },
        Type::Type(parameter) => match other {
            Type::Type(other_parameter) => match parameter {
                None => true,
                Some(parameter) => other_parameter
                    .as_ref()
                    .map(|other| is_assignable(parameter, other, guard))
                    .unwrap_or(false),
            },
            _ => false,
        },
        Type::Iterable(element) => {
            let element_accepts = |produced: &Type, guard: &mut RecursionGuard| match element {
                None => true,
                Some(element) => is_assignable(element, produced, guard),
            };
            match other {
                Type::Array {
                    element: other_element,
                    ..
                } => element_accepts(other_element, guard),
                Type::Hash { key, value, .. } => element_accepts(
                    &Type::Tuple {
                        types: vec![key.as_ref().clone(), value.as_ref().clone()],
                        from: None,
                        to: None,
                    },
                    guard,
                ),
                Type::Integer { .. } => element_accepts(&Type::integer(), guard),
                Type::Iterator(Some(produced)) => element_accepts(produced, guard),
                Type::Iterator(None) => element.is_none(),
                Type::Iterable(Some(produced)) => element_accepts(produced, guard),
                Type::Iterable(None) => element.is_none(),
                Type::Tuple { types, .. } => types
                    .iter()
                    .all(|produced| element_accepts(produced, guard)),
                _ => false,
            }
        }
        Type::Iterator(element) => match other {
            Type::Iterator(other_element) => match element {
                None => true,
                Some(element) => other_element
                    .as_ref()
                    .map(|other| is_assignable(element, other, guard))
                    .unwrap_or(false),
            },
            _ => false,
        },
        Type::Runtime { runtime, type_name } => match other {
            Type::Runtime {
                runtime: other_runtime,
                type_name: other_type,
            } => match runtime {
                None => true,
                Some(runtime) => {
                    other_runtime.as_deref() == Some(runtime.as_str())
                        && (type_name.is_none() || type_name.as_deref() == other_type.as_deref())
                }
            },
            _ => false,
        },
        Type::CatalogEntry => matches!(
            other,
            Type::CatalogEntry | Type::Resource { .. } | Type::Class { .. }
        ),
        Type::Alias(_) => unreachable!("aliases dereference above"),
    }
}

fn range_within(
    other_from: Option<i64>,
    other_to: Option<i64>,
    from: Option<i64>,
    to: Option<i64>,
) -> bool {
    let from_ok = match (from, other_from) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(from), Some(other_from)) => other_from >= from,
    };
    let to_ok = match (to, other_to) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(to), Some(other_to)) => other_to <= to,
    };
    from_ok && to_ok
}

fn float_range_within(
    other_from: Option<f64>,
    other_to: Option<f64>,
    from: Option<f64>,
    to: Option<f64>,
) -> bool {
    let from_ok = match (from, other_from) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(from), Some(other_from)) => other_from >= from,
    };
    let to_ok = match (to, other_to) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(to), Some(other_to)) => other_to <= to,
    };
    from_ok && to_ok
}

fn size_within(
    other_from: Option<usize>,
    other_to: Option<usize>,
    from: Option<usize>,
    to: Option<usize>,
) -> bool {
    let from_ok = match (from, other_from) {
        (None, _) => true,
        (Some(from), other_from) => other_from.unwrap_or(0) >= from,
    };
    let to_ok = match (to, other_to) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(to), Some(other_to)) => other_to <= to,
    };
    from_ok && to_ok
}

fn required_field_count(fields: &[StructField]) -> usize {
    fields.iter().filter(|field| !field.optional).count()
}

/// Whether a type admits `undef` among its instances.
fn admits_undef(t: &Type, guard: &mut RecursionGuard) -> bool {
    match t {
        Type::Undef | Type::Any | Type::Optional(_) | Type::Data => true,
        Type::Variant(types) => types.iter().any(|arm| admits_undef(arm, guard)),
        Type::Alias(alias) => {
            if !guard.enter(&alias.name, 1) {
                return false;
            }
            let result = alias
                .resolved_type()
                .map(|resolved| admits_undef(resolved, guard))
                .unwrap_or(false);
            guard.leave(&alias.name, 1);
            result
        }
        _ => false,
    }
}

fn is_data_assignable(other: &Type, guard: &mut RecursionGuard) -> bool {
    match other {
        Type::Data
        | Type::Undef
        | Type::Scalar
        | Type::Numeric
        | Type::Integer { .. }
        | Type::Float { .. }
        | Type::String { .. }
        | Type::Enum(_)
        | Type::Pattern(_)
        | Type::Boolean
        | Type::Regexp { .. } => true,
        Type::Array { element, .. } => is_data_assignable(element, guard),
        Type::Hash { key, value, .. } => {
            is_assignable(&Type::Scalar, key, guard) && is_data_assignable(value, guard)
        }
        Type::Tuple { types, .. } => types.iter().all(|t| is_data_assignable(t, guard)),
        Type::Struct(fields) => fields
            .iter()
            .all(|field| is_data_assignable(&field.value, guard)),
        Type::Variant(types) => {
            !types.is_empty() && types.iter().all(|t| is_data_assignable(t, guard))
        }
        Type::Alias(alias) => {
            if !guard.enter(&alias.name, 2) {
                return true;
            }
            let result = alias
                .resolved_type()
                .map(|resolved| is_data_assignable(resolved, guard))
                .unwrap_or(false);
            guard.leave(&alias.name, 2);
            result
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::AliasType;
    use super::*;

    fn assignable(t: &Type, other: &Type) -> bool {
        let mut guard = RecursionGuard::new();
        t.is_assignable(other, &mut guard)
    }

    #[test]
    fn reflexive_for_realizable_types() {
        let types = vec![
            Type::Any,
            Type::integer(),
            Type::string(),
            Type::Data,
            Type::Scalar,
            Type::array(),
            Type::hash(),
            Type::Variant(vec![Type::integer(), Type::string()]),
            Type::Optional(Some(Box::new(Type::Boolean))),
            Type::Resource {
                type_name: Some("file".into()),
                title: None,
            },
        ];
        for t in &types {
            assert!(assignable(t, t), "{} should be assignable to itself", t);
        }
    }

    #[test]
    fn generalize_is_assignable_from_original() {
        let types = vec![
            Type::Integer {
                from: Some(1),
                to: Some(5),
            },
            Type::String {
                from: Some(1),
                to: Some(1),
            },
            Type::Enum(vec!["a".into()]),
            Type::Array {
                element: Box::new(Type::Integer {
                    from: Some(0),
                    to: Some(0),
                }),
                from: Some(2),
                to: Some(2),
            },
        ];
        for t in &types {
            let general = t.generalize();
            assert!(
                assignable(&general, t),
                "{} should be assignable from {}",
                general,
                t
            );
        }
    }

    #[test]
    fn numeric_ranges() {
        let wide = Type::Integer {
            from: Some(0),
            to: Some(100),
        };
        let narrow = Type::Integer {
            from: Some(10),
            to: Some(20),
        };
        assert!(assignable(&wide, &narrow));
        assert!(!assignable(&narrow, &wide));
        assert!(assignable(&Type::integer(), &narrow));
        assert!(!assignable(&narrow, &Type::integer()));
        assert!(assignable(&Type::Numeric, &Type::float()));
    }

    #[test]
    fn variant_assignability() {
        let variant = Type::Variant(vec![Type::integer(), Type::string()]);
        assert!(assignable(&variant, &Type::integer()));
        assert!(assignable(&variant, &Type::string()));
        assert!(!assignable(&variant, &Type::Boolean));
        // A variant source requires every arm to fit.
        assert!(assignable(
            &Type::Scalar,
            &Type::Variant(vec![Type::integer(), Type::Boolean])
        ));
        assert!(!assignable(
            &Type::integer(),
            &Type::Variant(vec![Type::integer(), Type::Boolean])
        ));
    }

    #[test]
    fn optional_and_not_undef() {
        let optional = Type::Optional(Some(Box::new(Type::integer())));
        assert!(assignable(&optional, &Type::Undef));
        assert!(assignable(&optional, &Type::integer()));
        assert!(!assignable(&optional, &Type::string()));

        let not_undef = Type::NotUndef(Some(Box::new(Type::Any)));
        assert!(assignable(&not_undef, &Type::integer()));
        assert!(!assignable(&not_undef, &Type::Undef));
        assert!(!assignable(&not_undef, &optional));
    }

    #[test]
    fn enum_subsets() {
        let wide = Type::Enum(vec!["a".into(), "b".into(), "c".into()]);
        let narrow = Type::Enum(vec!["a".into(), "b".into()]);
        assert!(assignable(&wide, &narrow));
        assert!(!assignable(&narrow, &wide));
        assert!(assignable(&Type::string(), &narrow));
    }

    #[test]
    fn struct_from_hash() {
        let structure = Type::Struct(vec![
            StructField {
                key: "mode".into(),
                optional: false,
                value: Type::string(),
            },
            StructField {
                key: "size".into(),
                optional: true,
                value: Type::integer(),
            },
        ]);
        let wide_hash = Type::Hash {
            key: Box::new(Type::string()),
            value: Box::new(Type::Data),
            from: None,
            to: None,
        };
        assert!(assignable(&wide_hash, &structure));
        // Too many entries to ever satisfy the schema.
        let big_hash = Type::Hash {
            key: Box::new(Type::string()),
            value: Box::new(Type::string()),
            from: Some(3),
            to: Some(3),
        };
        assert!(!assignable(&structure, &big_hash));
    }

    #[test]
    fn tuple_and_array() {
        let tuple = Type::Tuple {
            types: vec![Type::integer(), Type::string()],
            from: None,
            to: None,
        };
        let array = Type::Array {
            element: Box::new(Type::Scalar),
            from: Some(2),
            to: Some(2),
        };
        assert!(assignable(&array, &tuple));
        assert!(!assignable(&tuple, &array));
    }

    #[test]
    fn data_includes_nested_collections() {
        let nested = Type::Array {
            element: Box::new(Type::Hash {
                key: Box::new(Type::string()),
                value: Box::new(Type::integer()),
                from: None,
                to: None,
            }),
            from: None,
            to: None,
        };
        assert!(assignable(&Type::Data, &nested));
        assert!(!assignable(
            &Type::Data,
            &Type::Array {
                element: Box::new(Type::Type(None)),
                from: None,
                to: None,
            }
        ));
    }

    #[test]
    fn resource_hierarchy() {
        let any_resource = Type::Resource {
            type_name: None,
            title: None,
        };
        let file = Type::Resource {
            type_name: Some("file".into()),
            title: None,
        };
        let file_x = Type::Resource {
            type_name: Some("file".into()),
            title: Some("/x".into()),
        };
        assert!(assignable(&any_resource, &file_x));
        assert!(assignable(&file, &file_x));
        assert!(!assignable(&file_x, &file));
        assert!(assignable(&Type::CatalogEntry, &file));
        assert!(assignable(&Type::CatalogEntry, &Type::Class { name: None }));
    }

    #[test]
    fn recursive_alias_assignability() {
        // Tree = Variant[Integer, Array[Tree]] is assignable from itself.
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
        assert!(assignable(&tree, &tree));
        assert!(assignable(&tree, &Type::integer()));
        assert!(!assignable(&tree, &Type::string()));
    }
}
