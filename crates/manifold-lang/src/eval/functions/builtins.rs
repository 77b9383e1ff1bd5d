//! Built-in functions.

use super::super::collector::{Collector, ListCollector};
use super::super::evaluator::Evaluator;
use super::super::scope;
use super::{CallContext, Descriptor, Signature};
use crate::catalog::Relationship;
use crate::error::EvaluationError;
use crate::eval::context::PendingRelationship;
use crate::format;
use crate::logging::Level;
use crate::types::{self, infer, infer_detailed, RecursionGuard, Type};
use crate::value::{IteratorValue, Value, ValueRegex};
use std::cell::RefCell;
use std::rc::Rc;

fn callable(types: Vec<Type>, min: usize, max: Option<usize>, block: bool) -> Type {
    Type::Callable {
        types,
        min: Some(min),
        max: Some(max.unwrap_or(usize::MAX)),
        block: block.then(|| {
            Box::new(Type::Callable {
                types: Vec::new(),
                min: None,
                max: None,
                block: None,
            })
        }),
    }
}

fn iterable() -> Type {
    Type::Variant(vec![
        Type::array(),
        Type::hash(),
        Type::integer(),
        Type::Iterator(None),
        Type::Type(None),
    ])
}

/// Look up the descriptor for a built-in function name.
pub fn descriptor(name: &str) -> Option<Descriptor> {
    let descriptor = match name {
        "include" => Descriptor {
            name: "include",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 1, None, false),
                body: include,
            }],
        },
        "require" => Descriptor {
            name: "require",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 1, None, false),
                body: require,
            }],
        },
        "contain" => Descriptor {
            name: "contain",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 1, None, false),
                body: contain,
            }],
        },
        "realize" => Descriptor {
            name: "realize",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 1, None, false),
                body: realize,
            }],
        },
        "tag" => Descriptor {
            name: "tag",
            signatures: vec![Signature {
                callable: callable(vec![Type::string()], 1, None, false),
                body: tag,
            }],
        },
        "debug" => log_descriptor("debug", Level::Debug),
        "info" => log_descriptor("info", Level::Info),
        "notice" => log_descriptor("notice", Level::Notice),
        "warning" => log_descriptor("warning", Level::Warning),
        "error" => log_descriptor("error", Level::Error),
        "fail" => Descriptor {
            name: "fail",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 0, None, false),
                body: fail,
            }],
        },
        "import" => Descriptor {
            name: "import",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 0, None, false),
                body: import,
            }],
        },
        "defined" => Descriptor {
            name: "defined",
            signatures: vec![Signature {
                callable: callable(
                    vec![Type::Variant(vec![Type::string(), Type::Type(None)])],
                    1,
                    None,
                    false,
                ),
                body: defined,
            }],
        },
        "assert_type" => Descriptor {
            name: "assert_type",
            signatures: vec![
                Signature {
                    callable: callable(
                        vec![
                            Type::Variant(vec![Type::Type(None), Type::string()]),
                            Type::Any,
                        ],
                        2,
                        Some(2),
                        true,
                    ),
                    body: assert_type,
                },
                Signature {
                    callable: callable(
                        vec![
                            Type::Variant(vec![Type::Type(None), Type::string()]),
                            Type::Any,
                        ],
                        2,
                        Some(2),
                        false,
                    ),
                    body: assert_type,
                },
            ],
        },
        "split" => Descriptor {
            name: "split",
            signatures: vec![Signature {
                callable: callable(
                    vec![
                        Type::string(),
                        Type::Variant(vec![Type::string(), Type::Regexp { pattern: None }]),
                    ],
                    2,
                    Some(2),
                    false,
                ),
                body: split,
            }],
        },
        "sprintf" => Descriptor {
            name: "sprintf",
            signatures: vec![Signature {
                callable: callable(vec![Type::string(), Type::Any], 1, None, false),
                body: sprintf,
            }],
        },
        "type" => Descriptor {
            name: "type",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any, Type::string()], 1, Some(2), false),
                body: type_of,
            }],
        },
        "versioncmp" => Descriptor {
            name: "versioncmp",
            signatures: vec![Signature {
                callable: callable(vec![Type::string(), Type::string()], 2, Some(2), false),
                body: versioncmp,
            }],
        },
        "with" => Descriptor {
            name: "with",
            signatures: vec![Signature {
                callable: callable(vec![Type::Any], 0, None, true),
                body: with,
            }],
        },
        "new" => Descriptor {
            name: "new",
            signatures: vec![Signature {
                callable: callable(vec![Type::Type(None), Type::Any], 2, None, false),
                body: new,
            }],
        },
        "each" => Descriptor {
            name: "each",
            signatures: vec![Signature {
                callable: callable(vec![iterable()], 1, Some(1), true),
                body: each,
            }],
        },
        "map" => Descriptor {
            name: "map",
            signatures: vec![Signature {
                callable: callable(vec![iterable()], 1, Some(1), true),
                body: map,
            }],
        },
        "filter" => Descriptor {
            name: "filter",
            signatures: vec![Signature {
                callable: callable(vec![iterable()], 1, Some(1), true),
                body: filter,
            }],
        },
        "reduce" => Descriptor {
            name: "reduce",
            signatures: vec![Signature {
                callable: callable(vec![iterable(), Type::Any], 1, Some(2), true),
                body: reduce,
            }],
        },
        "reverse_each" => Descriptor {
            name: "reverse_each",
            signatures: vec![
                Signature {
                    callable: callable(vec![iterable()], 1, Some(1), true),
                    body: reverse_each,
                },
                Signature {
                    callable: callable(vec![iterable()], 1, Some(1), false),
                    body: reverse_each,
                },
            ],
        },
        "step" => Descriptor {
            name: "step",
            signatures: vec![
                Signature {
                    callable: callable(vec![iterable(), Type::integer()], 2, Some(2), true),
                    body: step,
                },
                Signature {
                    callable: callable(vec![iterable(), Type::integer()], 2, Some(2), false),
                    body: step,
                },
            ],
        },
        _ => return None,
    };
    Some(descriptor)
}

fn log_descriptor(name: &'static str, level: Level) -> Descriptor {
    let body: super::BuiltinBody = match level {
        Level::Debug => |e, c| log_message(e, c, Level::Debug),
        Level::Info => |e, c| log_message(e, c, Level::Info),
        Level::Notice => |e, c| log_message(e, c, Level::Notice),
        Level::Warning => |e, c| log_message(e, c, Level::Warning),
        Level::Error => |e, c| log_message(e, c, Level::Error),
    };
    Descriptor {
        name,
        signatures: vec![Signature {
            callable: callable(vec![Type::Any], 0, None, false),
            body,
        }],
    }
}

fn join_arguments(arguments: &[Value]) -> String {
    arguments
        .iter()
        .map(|argument| argument.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_message(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
    level: Level,
) -> Result<Value, EvaluationError> {
    let message = join_arguments(&call.arguments);
    evaluator
        .context
        .log(level, message, Some(&call.call_context));
    Ok(Value::Undef)
}

fn fail(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    Err(evaluator.context.raise(
        format!("evaluation failed: {}.", join_arguments(&call.arguments)),
        Some(call.call_context.clone()),
    ))
}

fn import(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    Err(evaluator.context.raise(
        "'import' has been discontinued; use the environment's manifest directory instead.",
        Some(call.call_context.clone()),
    ))
}

/// Collect the class names referenced by `include`-family arguments:
/// strings, class reference types, and arrays thereof.
fn class_names(
    evaluator: &Evaluator<'_, '_>,
    call: &CallContext,
) -> Result<Vec<String>, EvaluationError> {
    fn walk(
        value: &Value,
        names: &mut Vec<String>,
    ) -> Result<(), String> {
        match value.dereference() {
            Value::String(name) => {
                names.push(crate::registry::normalize(name));
                Ok(())
            }
            Value::Type(t) => match t.as_ref() {
                Type::Class { name: Some(name) } => {
                    names.push(name.clone());
                    Ok(())
                }
                other => Err(format!(
                    "expected String or Class reference but found {}.",
                    other
                )),
            },
            Value::Array(elements) => {
                for element in elements {
                    walk(element, names)?;
                }
                Ok(())
            }
            other => Err(format!(
                "expected String or Class reference but found {}.",
                infer(other)
            )),
        }
    }

    let mut names = Vec::new();
    for (i, argument) in call.arguments.iter().enumerate() {
        walk(argument, &mut names).map_err(|message| {
            evaluator
                .context
                .raise(message, Some(call.argument_context(i)))
        })?;
    }
    Ok(names)
}

fn include(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    for name in class_names(evaluator, call)? {
        evaluator.declare_class(&name, call.call_context.clone(), Vec::new())?;
    }
    Ok(Value::Undef)
}

fn require(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let container = scope::nearest_resource(&evaluator.context.current_scope());
    for name in class_names(evaluator, call)? {
        evaluator.declare_class(&name, call.call_context.clone(), Vec::new())?;
        // The requiring container depends on the class.
        if let Some(container) = container {
            let reference = {
                let resource = evaluator.context.catalog_ref().get(container);
                Value::Type(Box::new(Type::Resource {
                    type_name: Some(resource.type_name().to_string()),
                    title: Some(resource.title().to_string()),
                }))
            };
            evaluator.context.add_relationship(PendingRelationship {
                relationship: Relationship::Require,
                source: Value::Type(Box::new(Type::Class {
                    name: Some(name.clone()),
                })),
                source_context: call.call_context.clone(),
                target: reference,
                target_context: call.call_context.clone(),
            });
        }
    }
    Ok(Value::Undef)
}

fn contain(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let container = scope::nearest_resource(&evaluator.context.current_scope());
    for name in class_names(evaluator, call)? {
        let class = evaluator.declare_class(&name, call.call_context.clone(), Vec::new())?;
        if let Some(container) = container {
            evaluator
                .context
                .catalog()
                .relate(Relationship::Contains, container, class);
        }
    }
    Ok(Value::Undef)
}

fn realize(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let mut references = Vec::new();
    let mut failure = None;
    for argument in &call.arguments {
        argument.each_resource(
            &mut |type_name, title| references.push((type_name, title)),
            &mut |message| {
                if failure.is_none() {
                    failure = Some(message);
                }
            },
        );
    }
    if let Some(message) = failure {
        return Err(evaluator
            .context
            .raise(message, Some(call.call_context.clone())));
    }
    let collector = ListCollector::new(references, call.call_context.clone());
    evaluator
        .context
        .add_collector(Rc::new(RefCell::new(Collector::List(collector))));
    Ok(Value::Undef)
}

fn tag(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let Some(index) = scope::nearest_resource(&evaluator.context.current_scope()) else {
        return Ok(Value::Undef);
    };
    let resource = evaluator.context.catalog().get_mut(index);
    for argument in &call.arguments {
        if let Some(tag) = argument.as_string() {
            resource.add_tag(tag.to_lowercase());
        }
    }
    Ok(Value::Undef)
}

fn defined(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let environment = evaluator.context.environment.clone();
    let logger = evaluator.context.logger.clone();

    for argument in &call.arguments {
        let known = match argument.dereference() {
            Value::String(name) => {
                let normalized = crate::registry::normalize(name);
                environment
                    .find_class(&logger, &normalized)
                    .ok()
                    .flatten()
                    .is_some()
                    || environment
                        .find_defined_type(&logger, &normalized)
                        .ok()
                        .flatten()
                        .is_some()
                    || environment
                        .find_resource_type(&logger, &normalized)
                        .ok()
                        .flatten()
                        .is_some()
                    || environment
                        .find_type_alias(&logger, &normalized)
                        .ok()
                        .flatten()
                        .is_some()
            }
            Value::Type(t) => match t.as_ref() {
                Type::Class { name: Some(name) } => evaluator
                    .context
                    .catalog_ref()
                    .find("class", name)
                    .is_some(),
                Type::Resource {
                    type_name: Some(type_name),
                    title: Some(title),
                } => evaluator
                    .context
                    .catalog_ref()
                    .find(type_name, title)
                    .is_some(),
                Type::Resource {
                    type_name: Some(type_name),
                    title: None,
                } => {
                    environment
                        .find_resource_type(&logger, type_name)
                        .ok()
                        .flatten()
                        .is_some()
                        || environment
                            .find_defined_type(&logger, type_name)
                            .ok()
                            .flatten()
                            .is_some()
                }
                _ => false,
            },
            _ => false,
        };
        if !known {
            return Ok(Value::Boolean(false));
        }
    }
    Ok(Value::Boolean(true))
}

fn assert_type(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let expected = match call.arguments[0].dereference() {
        Value::Type(t) => t.as_ref().clone(),
        Value::String(source) => {
            let expression = crate::parser::parse_expression(source).map_err(|e| {
                evaluator
                    .context
                    .raise(e.message, Some(call.argument_context(0)))
            })?;
            let value = evaluator.evaluate(&expression)?;
            match value.as_type() {
                Some(t) => t.clone(),
                None => {
                    return Err(evaluator.context.raise(
                        "expected the type string to evaluate to a type.",
                        Some(call.argument_context(0)),
                    ))
                }
            }
        }
        _ => unreachable!("guarded by the signature"),
    };

    let value = call.arguments[1].dereference().clone();
    let mut guard = RecursionGuard::new();
    if expected.is_instance(&value, &mut guard) {
        return Ok(value);
    }

    let actual = infer(&value);
    if let Some(closure) = call.lambda.clone() {
        return evaluator.yield_to(
            &closure,
            vec![
                Value::Type(Box::new(expected)),
                Value::Type(Box::new(actual)),
            ],
            &call.call_context,
        );
    }
    Err(evaluator.context.raise(
        format!("expected {} but was given {}.", expected, actual),
        Some(call.argument_context(1)),
    ))
}

fn split(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let subject = call.arguments[0].as_string().unwrap_or_default().to_string();
    let regex = match call.arguments[1].dereference() {
        Value::Regex(regex) => regex.clone(),
        // A string pattern is a regular expression, same as a literal.
        Value::String(pattern) => ValueRegex::new(pattern.clone()).map_err(|e| {
            evaluator.context.raise(
                format!("invalid regular expression: {}.", e),
                Some(call.argument_context(1)),
            )
        })?,
        _ => unreachable!("guarded by the signature"),
    };
    let parts: Vec<Value> = if regex.pattern().is_empty() {
        subject
            .chars()
            .map(|c| Value::string(c.to_string()))
            .collect()
    } else {
        regex
            .as_regex()
            .split(&subject)
            .map(Value::string)
            .collect()
    };
    Ok(Value::Array(parts))
}

fn sprintf(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let format_string = call.arguments[0].as_string().unwrap_or_default().to_string();
    format::sprintf(&format_string, &call.arguments[1..])
        .map(Value::string)
        .map_err(|e| {
            evaluator
                .context
                .raise(e.message, Some(call.call_context.clone()))
        })
}

fn type_of(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let mode = call
        .arguments
        .get(1)
        .and_then(|argument| argument.as_string())
        .unwrap_or("detailed")
        .to_string();
    let value = &call.arguments[0];
    let inferred = match mode.as_str() {
        "detailed" => infer_detailed(value),
        // The general mode: smallest well-known type, sizes preserved.
        "generalized" => infer(value),
        // Fully erased shape.
        "reduced" => infer(value).generalize(),
        other => {
            return Err(evaluator.context.raise(
                format!(
                    "expected 'detailed', 'reduced', or 'generalized' for inference mode but found '{}'.",
                    other
                ),
                Some(call.argument_context(1)),
            ))
        }
    };
    Ok(Value::Type(Box::new(inferred)))
}

fn versioncmp(
    _evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    fn segments(version: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut current = String::new();
        let mut numeric = None;
        for c in version.chars() {
            if matches!(c, '.' | '-' | '_') {
                if !current.is_empty() {
                    result.push(std::mem::take(&mut current));
                }
                numeric = None;
                continue;
            }
            let is_digit = c.is_ascii_digit();
            if numeric.is_some() && numeric != Some(is_digit) && !current.is_empty() {
                result.push(std::mem::take(&mut current));
            }
            numeric = Some(is_digit);
            current.push(c);
        }
        if !current.is_empty() {
            result.push(current);
        }
        result
    }

    let left = segments(call.arguments[0].as_string().unwrap_or_default());
    let right = segments(call.arguments[1].as_string().unwrap_or_default());
    let mut ordering = std::cmp::Ordering::Equal;
    for i in 0..left.len().max(right.len()) {
        let a = left.get(i).map(String::as_str).unwrap_or("");
        let b = right.get(i).map(String::as_str).unwrap_or("");
        ordering = match (a.parse::<i64>(), b.parse::<i64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        };
        if ordering != std::cmp::Ordering::Equal {
            break;
        }
    }
    Ok(Value::Integer(match ordering {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    }))
}

fn with(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let closure = call.lambda.clone().expect("guarded by the signature");
    evaluator.yield_to(&closure, call.arguments.clone(), &call.call_context)
}

fn new(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let t = call.arguments[0]
        .as_type()
        .expect("guarded by the signature")
        .clone();
    let from = call.arguments[1].dereference().clone();
    types::instantiate(&t, from, &call.arguments[2..]).map_err(|error| match error {
        types::CreationError::Argument(argument_error) => {
            let at = call.argument_context(2 + argument_error.index);
            evaluator.context.raise(argument_error.message, Some(at))
        }
        other => evaluator
            .context
            .raise(other.to_string(), Some(call.call_context.clone())),
    })
}

// ---- iteration ----

/// Materialize the pairs of an iterable argument.
fn iteration_pairs(
    evaluator: &Evaluator<'_, '_>,
    call: &CallContext,
) -> Result<Vec<(Option<Value>, Value)>, EvaluationError> {
    let iterator = to_iterator(&call.arguments[0]).map_err(|message| {
        evaluator
            .context
            .raise(message, Some(call.argument_context(0)))
    })?;
    let mut pairs = Vec::new();
    iterator
        .for_each(&mut |key, value| {
            pairs.push((key.cloned(), value.clone()));
            Ok(true)
        })
        .map_err(|message| {
            evaluator
                .context
                .raise(message, Some(call.argument_context(0)))
        })?;
    Ok(pairs)
}

fn to_iterator(value: &Value) -> Result<IteratorValue, String> {
    match value.dereference() {
        Value::Iterator(iterator) => Ok(iterator.as_ref().clone()),
        other => IteratorValue::new(other.clone()),
    }
}

/// Yield arguments for one pair given the block's parameter count.
fn yield_arguments(
    parameter_count: usize,
    key: Option<Value>,
    value: Value,
    keyed_source: bool,
) -> Vec<Value> {
    if parameter_count >= 2 {
        match key {
            Some(key) => vec![key, value],
            None => vec![value.clone(), value],
        }
    } else if keyed_source {
        // Single-parameter blocks over hashes receive [key, value] pairs.
        match key {
            Some(key) => vec![Value::Array(vec![key, value])],
            None => vec![value],
        }
    } else {
        vec![value]
    }
}

fn is_keyed_source(value: &Value) -> bool {
    match value.dereference() {
        Value::Hash(_) => true,
        Value::Iterator(iterator) => matches!(iterator.source_root(), Value::Hash(_)),
        _ => false,
    }
}

fn each(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let closure = call.lambda.clone().expect("guarded by the signature");
    let parameter_count = closure.lambda.parameters.len();
    let keyed = is_keyed_source(&call.arguments[0]);
    for (key, value) in iteration_pairs(evaluator, call)? {
        let arguments = yield_arguments(parameter_count, key, value, keyed);
        evaluator.yield_to(&closure, arguments, &call.call_context)?;
    }
    Ok(call.arguments[0].dereference().clone())
}

fn map(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let closure = call.lambda.clone().expect("guarded by the signature");
    let parameter_count = closure.lambda.parameters.len();
    let keyed = is_keyed_source(&call.arguments[0]);
    let mut results = Vec::new();
    for (key, value) in iteration_pairs(evaluator, call)? {
        let arguments = yield_arguments(parameter_count, key, value, keyed);
        results.push(
            evaluator
                .yield_to(&closure, arguments, &call.call_context)?
                .dereference()
                .clone(),
        );
    }
    Ok(Value::Array(results))
}

fn filter(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let closure = call.lambda.clone().expect("guarded by the signature");
    let parameter_count = closure.lambda.parameters.len();
    let keyed = is_keyed_source(&call.arguments[0]);
    let pairs = iteration_pairs(evaluator, call)?;

    if keyed {
        let mut result = crate::value::ValueHash::new();
        for (key, value) in pairs {
            let arguments =
                yield_arguments(parameter_count, key.clone(), value.clone(), true);
            if evaluator
                .yield_to(&closure, arguments, &call.call_context)?
                .is_truthy()
            {
                result.insert(key.expect("hash sources are keyed"), value);
            }
        }
        return Ok(Value::Hash(result));
    }

    let mut result = Vec::new();
    for (key, value) in pairs {
        let arguments = yield_arguments(parameter_count, key, value.clone(), false);
        if evaluator
            .yield_to(&closure, arguments, &call.call_context)?
            .is_truthy()
        {
            result.push(value);
        }
    }
    Ok(Value::Array(result))
}

fn reduce(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let closure = call.lambda.clone().expect("guarded by the signature");
    let keyed = is_keyed_source(&call.arguments[0]);
    let pairs = iteration_pairs(evaluator, call)?;

    let mut values = pairs.into_iter().map(|(key, value)| {
        if keyed {
            match key {
                Some(key) => Value::Array(vec![key, value]),
                None => value,
            }
        } else {
            value
        }
    });

    let mut memo = match call.arguments.get(1) {
        Some(memo) => memo.dereference().clone(),
        None => match values.next() {
            Some(first) => first,
            None => return Ok(Value::Undef),
        },
    };
    for value in values {
        memo = evaluator
            .yield_to(&closure, vec![memo, value], &call.call_context)?
            .dereference()
            .clone();
    }
    Ok(memo)
}

fn reverse_each(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let iterator = to_iterator(&call.arguments[0]).map_err(|message| {
        evaluator
            .context
            .raise(message, Some(call.argument_context(0)))
    })?;
    let reversed = IteratorValue::with(Value::Iterator(Box::new(iterator)), 1, true)
        .map_err(|message| {
            evaluator
                .context
                .raise(message, Some(call.argument_context(0)))
        })?;

    match call.lambda.clone() {
        None => Ok(Value::Iterator(Box::new(reversed))),
        Some(closure) => {
            let parameter_count = closure.lambda.parameters.len();
            let keyed = is_keyed_source(&call.arguments[0]);
            let mut pairs = Vec::new();
            reversed
                .for_each(&mut |key, value| {
                    pairs.push((key.cloned(), value.clone()));
                    Ok(true)
                })
                .map_err(|message| {
                    evaluator
                        .context
                        .raise(message, Some(call.argument_context(0)))
                })?;
            for (key, value) in pairs {
                let arguments = yield_arguments(parameter_count, key, value, keyed);
                evaluator.yield_to(&closure, arguments, &call.call_context)?;
            }
            Ok(call.arguments[0].dereference().clone())
        }
    }
}

fn step(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let step = call.arguments[1].as_integer().expect("guarded by the signature");
    let iterator = to_iterator(&call.arguments[0]).map_err(|message| {
        evaluator
            .context
            .raise(message, Some(call.argument_context(0)))
    })?;
    let stepped = IteratorValue::with(Value::Iterator(Box::new(iterator)), step, false)
        .map_err(|message| {
            evaluator
                .context
                .raise(message, Some(call.argument_context(1)))
        })?;

    match call.lambda.clone() {
        None => Ok(Value::Iterator(Box::new(stepped))),
        Some(closure) => {
            let parameter_count = closure.lambda.parameters.len();
            let keyed = is_keyed_source(&call.arguments[0]);
            let mut pairs = Vec::new();
            stepped
                .for_each(&mut |key, value| {
                    pairs.push((key.cloned(), value.clone()));
                    Ok(true)
                })
                .map_err(|message| {
                    evaluator
                        .context
                        .raise(message, Some(call.argument_context(0)))
                })?;
            for (key, value) in pairs {
                let arguments = yield_arguments(parameter_count, key, value, keyed);
                evaluator.yield_to(&closure, arguments, &call.call_context)?;
            }
            Ok(call.arguments[0].dereference().clone())
        }
    }
}
