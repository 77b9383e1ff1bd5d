//! Type parameterization (`Integer[1, 5]`, `File['/x']`) and `new`-style
//! instantiation (value conversion driven by a target type).

use super::{AliasType, RecursionGuard, StructField, Type};
use crate::error::{ArgumentError, ConversionError, InstantiationError};
use crate::value::{Value, ValueRegex};

/// Failure modes of [`instantiate`].
#[derive(Debug, Clone)]
pub enum CreationError {
    Instantiation(InstantiationError),
    Conversion(ConversionError),
    Argument(ArgumentError),
}

impl std::fmt::Display for CreationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreationError::Instantiation(e) => write!(f, "{}", e),
            CreationError::Conversion(e) => write!(f, "{}", e),
            CreationError::Argument(e) => write!(f, "{}", e),
        }
    }
}

fn argument_error(index: usize, message: impl Into<String>) -> ArgumentError {
    ArgumentError::new(message, index)
}

fn as_type_argument(value: &Value, index: usize) -> Result<Type, ArgumentError> {
    match value.dereference() {
        Value::Type(t) => Ok(t.as_ref().clone()),
        other => Err(argument_error(
            index,
            format!(
                "expected Type for argument but found {}.",
                other.kind_description()
            ),
        )),
    }
}

fn as_size_argument(value: &Value, index: usize) -> Result<Option<usize>, ArgumentError> {
    match value.dereference() {
        Value::Default => Ok(None),
        Value::Integer(i) if *i >= 0 => Ok(Some(*i as usize)),
        other => Err(argument_error(
            index,
            format!(
                "expected a non-negative Integer or default but found {}.",
                other.kind_description()
            ),
        )),
    }
}

fn as_string_argument(value: &Value, index: usize) -> Result<String, ArgumentError> {
    match value.dereference() {
        Value::String(s) => Ok(s.clone()),
        other => Err(argument_error(
            index,
            format!(
                "expected String for argument but found {}.",
                other.kind_description()
            ),
        )),
    }
}

fn as_regex_argument(value: &Value, index: usize) -> Result<ValueRegex, ArgumentError> {
    match value.dereference() {
        Value::Regex(regex) => Ok(regex.clone()),
        Value::String(pattern) => ValueRegex::new(pattern.clone())
            .map_err(|e| argument_error(index, format!("invalid regular expression: {}.", e))),
        other => Err(argument_error(
            index,
            format!(
                "expected String or Regexp for argument but found {}.",
                other.kind_description()
            ),
        )),
    }
}

/// Apply access arguments to a type, producing either a type value or an
/// array of type values (multi-title resource references).
pub fn parameterize(base: &Type, arguments: &[Value]) -> Result<Value, ArgumentError> {
    if arguments.is_empty() {
        return Err(argument_error(0, "expected at least one type parameter."));
    }
    let single = |t: Type| Ok(Value::Type(Box::new(t)));

    match base {
        Type::Integer { .. } => {
            if arguments.len() > 2 {
                return Err(argument_error(
                    2,
                    "expected at most two parameters for Integer.",
                ));
            }
            let from = integer_bound(&arguments[0], 0)?;
            let to = match arguments.get(1) {
                Some(argument) => integer_bound(argument, 1)?,
                None => from,
            };
            single(Type::Integer { from, to })
        }
        Type::Float { .. } => {
            if arguments.len() > 2 {
                return Err(argument_error(
                    2,
                    "expected at most two parameters for Float.",
                ));
            }
            let from = float_bound(&arguments[0], 0)?;
            let to = match arguments.get(1) {
                Some(argument) => float_bound(argument, 1)?,
                None => from,
            };
            single(Type::Float { from, to })
        }
        Type::String { .. } => {
            if arguments.len() > 2 {
                return Err(argument_error(
                    2,
                    "expected at most two parameters for String.",
                ));
            }
            let from = as_size_argument(&arguments[0], 0)?;
            let to = match arguments.get(1) {
                Some(argument) => as_size_argument(argument, 1)?,
                None => None,
            };
            single(Type::String { from, to })
        }
        Type::Enum(_) => {
            let mut values = Vec::new();
            for (i, argument) in arguments.iter().enumerate() {
                values.push(as_string_argument(argument, i)?);
            }
            single(Type::Enum(values))
        }
        Type::Pattern(_) => {
            let mut patterns = Vec::new();
            for (i, argument) in arguments.iter().enumerate() {
                patterns.push(as_regex_argument(argument, i)?);
            }
            single(Type::Pattern(patterns))
        }
        Type::Regexp { .. } => {
            if arguments.len() > 1 {
                return Err(argument_error(
                    1,
                    "expected at most one parameter for Regexp.",
                ));
            }
            single(Type::Regexp {
                pattern: Some(as_regex_argument(&arguments[0], 0)?),
            })
        }
        Type::Collection { .. } => {
            if arguments.len() > 2 {
                return Err(argument_error(
                    2,
                    "expected at most two parameters for Collection.",
                ));
            }
            let from = as_size_argument(&arguments[0], 0)?;
            let to = match arguments.get(1) {
                Some(argument) => as_size_argument(argument, 1)?,
                None => None,
            };
            single(Type::Collection { from, to })
        }
        Type::Array { .. } => {
            if arguments.len() > 3 {
                return Err(argument_error(
                    3,
                    "expected at most three parameters for Array.",
                ));
            }
            let element = as_type_argument(&arguments[0], 0)?;
            let from = match arguments.get(1) {
                Some(argument) => as_size_argument(argument, 1)?,
                None => None,
            };
            let to = match arguments.get(2) {
                Some(argument) => as_size_argument(argument, 2)?,
                None => None,
            };
            single(Type::Array {
                element: Box::new(element),
                from,
                to,
            })
        }
        Type::Hash { .. } => {
            if arguments.len() < 2 {
                return Err(argument_error(
                    arguments.len(),
                    "expected a key type and a value type for Hash.",
                ));
            }
            if arguments.len() > 4 {
                return Err(argument_error(
                    4,
                    "expected at most four parameters for Hash.",
                ));
            }
            let key = as_type_argument(&arguments[0], 0)?;
            let value = as_type_argument(&arguments[1], 1)?;
            let from = match arguments.get(2) {
                Some(argument) => as_size_argument(argument, 2)?,
                None => None,
            };
            let to = match arguments.get(3) {
                Some(argument) => as_size_argument(argument, 3)?,
                None => None,
            };
            single(Type::Hash {
                key: Box::new(key),
                value: Box::new(value),
                from,
                to,
            })
        }
        Type::Tuple { .. } => {
            // Trailing integers are size bounds; everything before must be
            // a type.
            let mut sizes = Vec::new();
            let mut end = arguments.len();
            while end > 0 && sizes.len() < 2 {
                match arguments[end - 1].dereference() {
                    Value::Integer(_) | Value::Default => {
                        sizes.insert(0, as_size_argument(&arguments[end - 1], end - 1)?);
                        end -= 1;
                    }
                    _ => break,
                }
            }
            let mut types = Vec::new();
            for (i, argument) in arguments[..end].iter().enumerate() {
                types.push(as_type_argument(argument, i)?);
            }
            if types.is_empty() {
                return Err(argument_error(0, "expected at least one type for Tuple."));
            }
            let (from, to) = match sizes.len() {
                0 => (None, None),
                1 => (sizes[0], None),
                _ => (sizes[0], sizes[1]),
            };
            single(Type::Tuple { types, from, to })
        }
        Type::Struct(_) => {
            if arguments.len() != 1 {
                return Err(argument_error(1, "expected one Hash parameter for Struct."));
            }
            let hash = match arguments[0].dereference() {
                Value::Hash(hash) => hash,
                other => {
                    return Err(argument_error(
                        0,
                        format!(
                            "expected Hash for Struct schema but found {}.",
                            other.kind_description()
                        ),
                    ))
                }
            };
            let mut fields = Vec::new();
            for (key, value) in hash.iter() {
                let value_type = as_type_argument(value, 0)?;
                match key.dereference() {
                    Value::String(name) => fields.push(StructField {
                        key: name.clone(),
                        optional: false,
                        value: value_type,
                    }),
                    Value::Type(t) => match optional_key_name(t) {
                        Some(name) => fields.push(StructField {
                            key: name,
                            optional: true,
                            value: value_type,
                        }),
                        None => {
                            return Err(argument_error(
                                0,
                                format!("unsupported Struct key type {}.", t),
                            ))
                        }
                    },
                    other => {
                        return Err(argument_error(
                            0,
                            format!(
                                "expected String or Optional key for Struct but found {}.",
                                other.kind_description()
                            ),
                        ))
                    }
                }
            }
            single(Type::Struct(fields))
        }
        Type::Variant(_) => {
            let mut types = Vec::new();
            for (i, argument) in arguments.iter().enumerate() {
                types.push(as_type_argument(argument, i)?);
            }
            single(Type::Variant(types))
        }
        Type::Optional(_) => {
            if arguments.len() != 1 {
                return Err(argument_error(1, "expected one parameter for Optional."));
            }
            single(Type::Optional(Some(Box::new(wrapped_type(&arguments[0])?))))
        }
        Type::NotUndef(_) => {
            if arguments.len() != 1 {
                return Err(argument_error(1, "expected one parameter for NotUndef."));
            }
            single(Type::NotUndef(Some(Box::new(wrapped_type(&arguments[0])?))))
        }
        Type::Callable { .. } => {
            let mut sizes = Vec::new();
            let mut end = arguments.len();
            while end > 0 && sizes.len() < 2 {
                match arguments[end - 1].dereference() {
                    Value::Integer(_) | Value::Default => {
                        sizes.insert(0, as_size_argument(&arguments[end - 1], end - 1)?);
                        end -= 1;
                    }
                    _ => break,
                }
            }
            let mut types = Vec::new();
            for (i, argument) in arguments[..end].iter().enumerate() {
                types.push(as_type_argument(argument, i)?);
            }
            let (min, max) = match sizes.len() {
                0 => (None, None),
                1 => (sizes[0], None),
                _ => (sizes[0], sizes[1]),
            };
            single(Type::Callable {
                types,
                min,
                max,
                block: None,
            })
        }
        Type::Resource { type_name, .. } => {
            let (name, titles) = match type_name {
                Some(name) => (name.clone(), arguments),
                None => {
                    let name = match arguments[0].dereference() {
                        Value::String(s) => s.to_lowercase(),
                        Value::Type(t) => match t.as_ref() {
                            Type::Resource {
                                type_name: Some(name),
                                title: None,
                            } => name.clone(),
                            other => {
                                return Err(argument_error(
                                    0,
                                    format!("expected a resource type but found {}.", other),
                                ))
                            }
                        },
                        other => {
                            return Err(argument_error(
                                0,
                                format!(
                                    "expected String or Resource for type name but found {}.",
                                    other.kind_description()
                                ),
                            ))
                        }
                    };
                    (name, &arguments[1..])
                }
            };
            if titles.is_empty() {
                return single(Type::Resource {
                    type_name: Some(name),
                    title: None,
                });
            }
            let mut references = Vec::new();
            collect_titles(titles, &mut |title| {
                references.push(Value::Type(Box::new(Type::Resource {
                    type_name: Some(name.clone()),
                    title: Some(title),
                })));
            })?;
            if references.len() == 1 {
                Ok(references.remove(0))
            } else {
                Ok(Value::Array(references))
            }
        }
        Type::Class { .. } => {
            let mut references = Vec::new();
            collect_titles(arguments, &mut |name| {
                let normalized = name.trim_start_matches("::").to_lowercase();
                references.push(Value::Type(Box::new(Type::Class {
                    name: Some(normalized),
                })));
            })?;
            if references.len() == 1 {
                Ok(references.remove(0))
            } else {
                Ok(Value::Array(references))
            }
        }
        Type::Type(_) => {
            if arguments.len() != 1 {
                return Err(argument_error(1, "expected one parameter for Type."));
            }
            single(Type::Type(Some(Box::new(as_type_argument(
                &arguments[0],
                0,
            )?))))
        }
        Type::Iterable(_) => {
            if arguments.len() != 1 {
                return Err(argument_error(1, "expected one parameter for Iterable."));
            }
            single(Type::Iterable(Some(Box::new(as_type_argument(
                &arguments[0],
                0,
            )?))))
        }
        Type::Iterator(_) => {
            if arguments.len() != 1 {
                return Err(argument_error(1, "expected one parameter for Iterator."));
            }
            single(Type::Iterator(Some(Box::new(as_type_argument(
                &arguments[0],
                0,
            )?))))
        }
        Type::Runtime { .. } => {
            if arguments.len() > 2 {
                return Err(argument_error(
                    2,
                    "expected at most two parameters for Runtime.",
                ));
            }
            let runtime = as_string_argument(&arguments[0], 0)?;
            let type_name = match arguments.get(1) {
                Some(argument) => Some(as_string_argument(argument, 1)?),
                None => None,
            };
            single(Type::Runtime {
                runtime: Some(runtime),
                type_name,
            })
        }
        Type::Alias(alias) => match alias.resolved_type() {
            Some(resolved) => parameterize(resolved, arguments),
            None => Err(argument_error(
                0,
                format!("type alias '{}' has not been resolved.", alias.name),
            )),
        },
        other => Err(argument_error(
            0,
            format!("type {} does not support parameters.", other),
        )),
    }
}

/// Optional / NotUndef accept a bare string as shorthand for an Enum of
/// that one value.
fn wrapped_type(argument: &Value) -> Result<Type, ArgumentError> {
    match argument.dereference() {
        Value::String(s) => Ok(Type::Enum(vec![s.clone()])),
        _ => as_type_argument(argument, 0),
    }
}

/// Extract the key name from an `Optional['name']`-style struct key.
fn optional_key_name(t: &Type) -> Option<String> {
    match t {
        Type::Optional(Some(inner)) => match inner.as_ref() {
            Type::Enum(values) if values.len() == 1 => Some(values[0].clone()),
            _ => None,
        },
        _ => None,
    }
}

fn collect_titles(
    arguments: &[Value],
    callback: &mut dyn FnMut(String),
) -> Result<(), ArgumentError> {
    for (i, argument) in arguments.iter().enumerate() {
        match argument.dereference() {
            Value::String(title) => callback(title.clone()),
            Value::Array(titles) => collect_titles(titles, callback)?,
            other => {
                return Err(argument_error(
                    i,
                    format!(
                        "expected String for title but found {}.",
                        other.kind_description()
                    ),
                ))
            }
        }
    }
    Ok(())
}

fn integer_bound(value: &Value, index: usize) -> Result<Option<i64>, ArgumentError> {
    match value.dereference() {
        Value::Default => Ok(None),
        Value::Integer(i) => Ok(Some(*i)),
        other => Err(argument_error(
            index,
            format!(
                "expected Integer or default but found {}.",
                other.kind_description()
            ),
        )),
    }
}

fn float_bound(value: &Value, index: usize) -> Result<Option<f64>, ArgumentError> {
    match value.dereference() {
        Value::Default => Ok(None),
        Value::Integer(i) => Ok(Some(*i as f64)),
        Value::Float(f) => Ok(Some(*f)),
        other => Err(argument_error(
            index,
            format!(
                "expected Numeric or default but found {}.",
                other.kind_description()
            ),
        )),
    }
}

/// Convert a value into an instance of the given type (`new`-style).
///
/// The conversion result is verified with `is_instance`; a conversion that
/// lands outside the target type is a [`ConversionError`].
pub fn instantiate(t: &Type, from: Value, arguments: &[Value]) -> Result<Value, CreationError> {
    let result = create(t, from, arguments)?;
    let mut guard = RecursionGuard::new();
    if !t.is_instance(&result, &mut guard) {
        return Err(CreationError::Conversion(ConversionError::new(format!(
            "cannot convert {} to {}.",
            super::inference::infer(&result),
            t
        ))));
    }
    Ok(result)
}

fn too_many_arguments(max: usize, count: usize) -> CreationError {
    CreationError::Argument(ArgumentError::new(
        format!(
            "expected at most {} type conversion {} but was given {}.",
            max,
            if max == 1 { "argument" } else { "arguments" },
            count
        ),
        max,
    ))
}

fn create(t: &Type, from: Value, arguments: &[Value]) -> Result<Value, CreationError> {
    match t {
        Type::Array { .. } | Type::Tuple { .. } => {
            if arguments.len() > 1 {
                return Err(too_many_arguments(1, arguments.len()));
            }
            let wrap = match arguments.first() {
                None => false,
                Some(argument) => argument.as_boolean().ok_or_else(|| {
                    CreationError::Argument(ArgumentError::new(
                        format!(
                            "expected Boolean for wrap argument but was given {}.",
                            argument.kind_description()
                        ),
                        0,
                    ))
                })?,
            };
            array_from(from, wrap)
        }
        Type::Hash { .. } | Type::Struct(_) => {
            if !arguments.is_empty() {
                return Err(too_many_arguments(0, arguments.len()));
            }
            hash_from(from)
        }
        Type::Boolean => {
            if !arguments.is_empty() {
                return Err(too_many_arguments(0, arguments.len()));
            }
            boolean_from(from)
        }
        Type::Integer { .. } => {
            if arguments.len() > 1 {
                return Err(too_many_arguments(1, arguments.len()));
            }
            let radix = radix_argument(arguments.first())?;
            integer_from(from, radix)
        }
        Type::Float { .. } => {
            if !arguments.is_empty() {
                return Err(too_many_arguments(0, arguments.len()));
            }
            float_from(from)
        }
        Type::Numeric => {
            if !arguments.is_empty() {
                return Err(too_many_arguments(0, arguments.len()));
            }
            numeric_from(from)
        }
        Type::String { .. } => {
            if arguments.len() > 1 {
                return Err(too_many_arguments(1, arguments.len()));
            }
            Ok(Value::string(from.to_string()))
        }
        Type::Optional(Some(inner)) | Type::NotUndef(Some(inner)) => {
            create(inner, from, arguments)
        }
        Type::Alias(alias) => match alias.resolved_type() {
            Some(resolved) => create(resolved, from, arguments),
            None => Err(cannot_create(&Type::Alias(alias.clone()))),
        },
        other => Err(cannot_create(other)),
    }
}

fn cannot_create(t: &Type) -> CreationError {
    CreationError::Instantiation(InstantiationError::new(format!(
        "cannot create an instance of type {}.",
        t
    )))
}

fn array_from(from: Value, wrap: bool) -> Result<Value, CreationError> {
    if wrap {
        return Ok(Value::Array(vec![from]));
    }
    match from.dereference().clone() {
        Value::Array(elements) => Ok(Value::Array(elements)),
        Value::Hash(hash) => Ok(Value::Array(
            hash.iter()
                .map(|(k, v)| Value::Array(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        Value::Iterator(iterator) => iterator
            .to_array()
            .map(Value::Array)
            .map_err(|message| CreationError::Conversion(ConversionError::new(message))),
        other => Err(CreationError::Conversion(ConversionError::new(format!(
            "cannot convert {} to Array.",
            other.kind_description()
        )))),
    }
}

fn hash_from(from: Value) -> Result<Value, CreationError> {
    match from.dereference().clone() {
        Value::Hash(hash) => Ok(Value::Hash(hash)),
        Value::Array(elements) => {
            let mut hash = crate::value::ValueHash::new();
            for element in &elements {
                match element.as_array() {
                    Some(pair) if pair.len() == 2 => {
                        hash.insert(pair[0].clone(), pair[1].clone());
                    }
                    _ => {
                        return Err(CreationError::Conversion(ConversionError::new(
                            "cannot convert Array to Hash: expected an array of [key, value] pairs."
                                .to_string(),
                        )))
                    }
                }
            }
            Ok(Value::Hash(hash))
        }
        other => Err(CreationError::Conversion(ConversionError::new(format!(
            "cannot convert {} to Hash.",
            other.kind_description()
        )))),
    }
}

fn boolean_from(from: Value) -> Result<Value, CreationError> {
    let result = match from.dereference() {
        Value::Boolean(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "y" => true,
            "false" | "no" | "n" => false,
            _ => {
                return Err(CreationError::Conversion(ConversionError::new(format!(
                    "cannot convert \"{}\" to Boolean.",
                    s
                ))))
            }
        },
        other => {
            return Err(CreationError::Conversion(ConversionError::new(format!(
                "cannot convert {} to Boolean.",
                other.kind_description()
            ))))
        }
    };
    Ok(Value::Boolean(result))
}

fn radix_argument(argument: Option<&Value>) -> Result<u32, CreationError> {
    let Some(argument) = argument else {
        return Ok(0);
    };
    if argument.is_default() {
        return Ok(0);
    }
    match argument.as_integer() {
        Some(radix @ (2 | 8 | 10 | 16)) => Ok(radix as u32),
        Some(other) => Err(CreationError::Argument(ArgumentError::new(
            format!(
                "expected a radix value of 2, 8, 10, or 16, but was given {}.",
                other
            ),
            0,
        ))),
        None => Err(CreationError::Argument(ArgumentError::new(
            format!(
                "expected Integer for radix value but was given {}.",
                argument.kind_description()
            ),
            0,
        ))),
    }
}

fn parse_integer(text: &str, radix: u32) -> Option<i64> {
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (radix, digits) = if radix == 0 {
        if let Some(rest) = unsigned
            .strip_prefix("0x")
            .or_else(|| unsigned.strip_prefix("0X"))
        {
            (16, rest)
        } else if let Some(rest) = unsigned
            .strip_prefix("0b")
            .or_else(|| unsigned.strip_prefix("0B"))
        {
            (2, rest)
        } else if unsigned.len() > 1 && unsigned.starts_with('0') {
            (8, &unsigned[1..])
        } else {
            (10, unsigned)
        }
    } else {
        (radix, unsigned)
    };
    i64::from_str_radix(digits, radix)
        .ok()
        .map(|value| if negative { -value } else { value })
}

fn integer_from(from: Value, radix: u32) -> Result<Value, CreationError> {
    let result = match from.dereference() {
        Value::Integer(i) => *i,
        Value::Float(f) => *f as i64,
        Value::Boolean(b) => {
            if *b {
                1
            } else {
                0
            }
        }
        Value::String(s) => parse_integer(s, radix).ok_or_else(|| {
            CreationError::Conversion(ConversionError::new(format!(
                "cannot convert \"{}\" to Integer.",
                s
            )))
        })?,
        other => {
            return Err(CreationError::Conversion(ConversionError::new(format!(
                "cannot convert {} to Integer.",
                other.kind_description()
            ))))
        }
    };
    Ok(Value::Integer(result))
}

fn float_from(from: Value) -> Result<Value, CreationError> {
    let result = match from.dereference() {
        Value::Float(f) => *f,
        Value::Integer(i) => *i as f64,
        Value::Boolean(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => s.trim().parse().map_err(|_| {
            CreationError::Conversion(ConversionError::new(format!(
                "cannot convert \"{}\" to Float.",
                s
            )))
        })?,
        other => {
            return Err(CreationError::Conversion(ConversionError::new(format!(
                "cannot convert {} to Float.",
                other.kind_description()
            ))))
        }
    };
    Ok(Value::Float(result))
}

fn numeric_from(from: Value) -> Result<Value, CreationError> {
    match from.dereference() {
        Value::Integer(_) | Value::Float(_) => Ok(from.dereference().clone()),
        Value::Boolean(b) => Ok(Value::Integer(if *b { 1 } else { 0 })),
        Value::String(s) => {
            if let Some(integer) = parse_integer(s, 0) {
                return Ok(Value::Integer(integer));
            }
            s.trim()
                .parse()
                .map(Value::Float)
                .map_err(|_| {
                    CreationError::Conversion(ConversionError::new(format!(
                        "cannot convert \"{}\" to Numeric.",
                        s
                    )))
                })
        }
        other => Err(CreationError::Conversion(ConversionError::new(format!(
            "cannot convert {} to Numeric.",
            other.kind_description()
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::super::Type;
    use super::*;

    fn type_value(t: Type) -> Value {
        Value::Type(Box::new(t))
    }

    #[test]
    fn integer_range_parameters() {
        let result = parameterize(&Type::integer(), &[Value::Integer(1), Value::Integer(5)])
            .expect("parameterization should succeed");
        assert_eq!(result.as_type().unwrap().to_string(), "Integer[1, 5]");

        let result =
            parameterize(&Type::integer(), &[Value::Default, Value::Integer(5)]).unwrap();
        assert_eq!(result.as_type().unwrap().to_string(), "Integer[default, 5]");
    }

    #[test]
    fn array_parameters() {
        let result = parameterize(
            &Type::array(),
            &[type_value(Type::string()), Value::Integer(1), Value::Integer(3)],
        )
        .unwrap();
        assert_eq!(result.as_type().unwrap().to_string(), "Array[String, 1, 3]");
    }

    #[test]
    fn tuple_trailing_sizes() {
        let result = parameterize(
            &Type::Tuple {
                types: vec![],
                from: None,
                to: None,
            },
            &[
                type_value(Type::integer()),
                type_value(Type::string()),
                Value::Integer(2),
                Value::Integer(4),
            ],
        )
        .unwrap();
        assert_eq!(
            result.as_type().unwrap().to_string(),
            "Tuple[Integer, String, 2, 4]"
        );
    }

    #[test]
    fn resource_with_titles() {
        let file = Type::Resource {
            type_name: Some("file".into()),
            title: None,
        };
        let result = parameterize(&file, &[Value::string("/a"), Value::string("/b")]).unwrap();
        let Value::Array(references) = result else {
            panic!("expected an array of references");
        };
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].as_type().unwrap().to_string(), "File[/a]");
    }

    #[test]
    fn resource_from_name() {
        let resource = Type::Resource {
            type_name: None,
            title: None,
        };
        let result =
            parameterize(&resource, &[Value::string("File"), Value::string("/x")]).unwrap();
        assert_eq!(result.as_type().unwrap().to_string(), "File[/x]");
    }

    #[test]
    fn struct_schema() {
        let mut schema = crate::value::ValueHash::new();
        schema.insert(Value::string("mode"), type_value(Type::string()));
        schema.insert(
            type_value(Type::Optional(Some(Box::new(Type::Enum(vec![
                "owner".into()
            ]))))),
            type_value(Type::string()),
        );
        let result = parameterize(&Type::Struct(vec![]), &[Value::Hash(schema)]).unwrap();
        let t = result.as_type().unwrap();
        let Type::Struct(fields) = t else {
            panic!("expected struct");
        };
        assert_eq!(fields.len(), 2);
        assert!(!fields[0].optional);
        assert!(fields[1].optional);
    }

    #[test]
    fn bad_parameter_reports_index() {
        let error =
            parameterize(&Type::array(), &[Value::Integer(3)]).expect_err("should fail");
        assert_eq!(error.index, 0);
    }

    #[test]
    fn instantiate_integer_from_string() {
        let result = instantiate(&Type::integer(), Value::string("0x1F"), &[]).unwrap();
        assert_eq!(result, Value::Integer(31));
        let result = instantiate(&Type::integer(), Value::string("10"), &[Value::Integer(2)])
            .unwrap();
        assert_eq!(result, Value::Integer(2));
    }

    #[test]
    fn instantiate_checks_result_type() {
        let narrow = Type::Integer {
            from: Some(0),
            to: Some(5),
        };
        let error = instantiate(&narrow, Value::string("10"), &[]).expect_err("out of range");
        assert!(matches!(error, CreationError::Conversion(_)));
    }

    #[test]
    fn instantiate_boolean_strings() {
        assert_eq!(
            instantiate(&Type::Boolean, Value::string("yes"), &[]).unwrap(),
            Value::Boolean(true)
        );
        assert!(instantiate(&Type::Boolean, Value::string("maybe"), &[]).is_err());
    }

    #[test]
    fn instantiate_array_wrap() {
        let result = instantiate(
            &Type::array(),
            Value::Integer(1),
            &[Value::Boolean(true)],
        )
        .unwrap();
        assert_eq!(result, Value::Array(vec![Value::Integer(1)]));
    }

    #[test]
    fn cannot_instantiate_abstract_types() {
        let error = instantiate(&Type::Any, Value::Integer(1), &[]).expect_err("should fail");
        assert!(matches!(error, CreationError::Instantiation(_)));
    }
}
