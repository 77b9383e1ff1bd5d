//! Subscript evaluation: `value[...]` and `Type[...]`.
//!
//! Strings and arrays index by position (negative counts from the end; a
//! second argument is a count), hashes index by key (multiple keys select
//! values), and types parameterize through the type system.

use super::context::EvaluationContext;
use crate::ast::AstContext;
use crate::error::EvaluationError;
use crate::types::{infer, parameterize};
use crate::value::Value;
use unicode_segmentation::UnicodeSegmentation;

/// Apply access arguments to a target value.
pub fn access(
    context: &mut EvaluationContext<'_>,
    target: &Value,
    target_context: &AstContext,
    arguments: &[Value],
    argument_contexts: &[AstContext],
) -> Result<Value, EvaluationError> {
    match target.dereference() {
        Value::String(subject) => access_string(context, subject, arguments, argument_contexts),
        Value::Array(elements) => access_array(context, elements, arguments, argument_contexts),
        Value::Hash(hash) => {
            if arguments.len() == 1 {
                return Ok(hash
                    .get(&arguments[0])
                    .cloned()
                    .unwrap_or(Value::Undef));
            }
            // Multiple keys select the values that exist.
            let mut values = Vec::new();
            for key in arguments {
                if let Some(value) = hash.get(key) {
                    values.push(value.clone());
                }
            }
            Ok(Value::Array(values))
        }
        Value::Type(t) => parameterize(t, arguments).map_err(|error| {
            let at = argument_contexts
                .get(error.index)
                .unwrap_or(target_context)
                .clone();
            context.raise(error.message, Some(at))
        }),
        other => Err(context.raise(
            format!("{} cannot be accessed with '[]'.", infer(other)),
            Some(target_context.clone()),
        )),
    }
}

fn index_argument(
    context: &EvaluationContext<'_>,
    arguments: &[Value],
    argument_contexts: &[AstContext],
    position: usize,
) -> Result<i64, EvaluationError> {
    arguments[position].as_integer().ok_or_else(|| {
        context.raise(
            format!(
                "expected Integer for access index but found {}.",
                infer(&arguments[position])
            ),
            argument_contexts.get(position).cloned(),
        )
    })
}

/// Normalize a possibly-negative index against a length; `None` when out
/// of range on the low side.
fn normalize_index(index: i64, length: usize) -> Option<usize> {
    if index >= 0 {
        Some(index as usize)
    } else {
        let from_end = length as i64 + index;
        if from_end < 0 {
            None
        } else {
            Some(from_end as usize)
        }
    }
}

fn access_string(
    context: &EvaluationContext<'_>,
    subject: &str,
    arguments: &[Value],
    argument_contexts: &[AstContext],
) -> Result<Value, EvaluationError> {
    let graphemes: Vec<&str> = subject.graphemes(true).collect();
    let start = index_argument(context, arguments, argument_contexts, 0)?;
    let count = if arguments.len() > 1 {
        index_argument(context, arguments, argument_contexts, 1)?
    } else {
        1
    };

    let Some(start) = normalize_index(start, graphemes.len()) else {
        return Ok(Value::string(""));
    };
    if start >= graphemes.len() {
        return Ok(Value::string(""));
    }
    // A negative count addresses the end of the string.
    let end = if count < 0 {
        match normalize_index(count, graphemes.len()) {
            Some(end) => end + 1,
            None => 0,
        }
    } else {
        (start + count as usize).min(graphemes.len())
    };
    if end <= start {
        return Ok(Value::string(""));
    }
    Ok(Value::string(graphemes[start..end].concat()))
}

fn access_array(
    context: &EvaluationContext<'_>,
    elements: &[Value],
    arguments: &[Value],
    argument_contexts: &[AstContext],
) -> Result<Value, EvaluationError> {
    let start = index_argument(context, arguments, argument_contexts, 0)?;
    if arguments.len() == 1 {
        let Some(index) = normalize_index(start, elements.len()) else {
            return Ok(Value::Undef);
        };
        return Ok(elements.get(index).cloned().unwrap_or(Value::Undef));
    }

    let count = index_argument(context, arguments, argument_contexts, 1)?;
    let Some(start) = normalize_index(start, elements.len()) else {
        return Ok(Value::Array(Vec::new()));
    };
    if start >= elements.len() {
        return Ok(Value::Array(Vec::new()));
    }
    let end = if count < 0 {
        match normalize_index(count, elements.len()) {
            Some(end) => end + 1,
            None => 0,
        }
    } else {
        (start + count as usize).min(elements.len())
    };
    if end <= start {
        return Ok(Value::Array(Vec::new()));
    }
    Ok(Value::Array(elements[start..end].to_vec()))
}
