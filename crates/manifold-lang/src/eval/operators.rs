//! Binary and unary operator evaluation.
//!
//! Each operator dispatches on the operand kinds in a fixed order; the
//! first matching rule wins and anything else is a typed evaluation error
//! with the offending operand's source context. Arithmetic is
//! overflow-checked.
//!
//! The `==` operator compares strings case-insensitively (structural
//! equality, used for hash keys and matching, stays case-sensitive); `and`
//! and `or` short-circuit and are handled by the evaluator itself, as are
//! assignment and the edge operators.

use super::context::EvaluationContext;
use crate::ast::{AstContext, BinaryOperator, UnaryOperator};
use crate::error::EvaluationError;
use crate::types::{infer, RecursionGuard, Type};
use crate::value::{Value, ValueRegex};
use unicode_normalization::UnicodeNormalization;

/// Case-insensitive, normalization-aware string equality.
fn string_ci_eq(left: &str, right: &str) -> bool {
    let left: String = left.nfc().flat_map(char::to_lowercase).collect();
    let right: String = right.nfc().flat_map(char::to_lowercase).collect();
    left == right
}

/// `==` operator semantics.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.dereference(), right.dereference()) {
        (Value::String(a), Value::String(b)) => string_ci_eq(a, b),
        (Value::Integer(a), Value::Float(b)) => *a as f64 == *b,
        (Value::Float(a), Value::Integer(b)) => *a == *b as f64,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Hash(a), Value::Hash(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key).map(|other| values_equal(value, other)).unwrap_or(false)
                })
        }
        (a, b) => a == b,
    }
}

fn type_error(
    context: &EvaluationContext<'_>,
    operator: BinaryOperator,
    side: &str,
    expected: &str,
    found: &Value,
    at: &AstContext,
) -> EvaluationError {
    context.raise(
        format!(
            "expected {} for {} operand of '{}' but found {}.",
            expected,
            side,
            operator,
            infer(found)
        ),
        Some(at.clone()),
    )
}

fn overflow(
    context: &EvaluationContext<'_>,
    operator: BinaryOperator,
    at: &AstContext,
) -> EvaluationError {
    context.raise(
        format!("arithmetic overflow evaluating '{}'.", operator),
        Some(at.clone()),
    )
}

/// Evaluate a non-short-circuiting binary operator.
pub fn binary(
    context: &mut EvaluationContext<'_>,
    operator: BinaryOperator,
    left: &Value,
    left_context: &AstContext,
    right: &Value,
    right_context: &AstContext,
) -> Result<Value, EvaluationError> {
    use BinaryOperator as Op;
    let lhs = left.dereference();
    let rhs = right.dereference();

    match operator {
        Op::Plus => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_add(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow(context, operator, left_context)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a + *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
            (Value::Array(a), Value::Array(b)) => {
                let mut result = a.clone();
                result.extend(b.iter().cloned());
                Ok(Value::Array(result))
            }
            (Value::Array(a), other) => {
                let mut result = a.clone();
                result.push(other.clone());
                Ok(Value::Array(result))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                let mut result = a.clone();
                for (key, value) in b.iter() {
                    result.insert(key.clone(), value.clone());
                }
                Ok(Value::Hash(result))
            }
            (Value::Hash(a), Value::Array(pairs)) => {
                let mut result = a.clone();
                for pair in pairs {
                    match pair.as_array() {
                        Some(entry) if entry.len() == 2 => {
                            result.insert(entry[0].clone(), entry[1].clone());
                        }
                        _ => {
                            return Err(context.raise(
                                "expected an array of [key, value] pairs to merge into a hash.",
                                Some(right_context.clone()),
                            ))
                        }
                    }
                }
                Ok(Value::Hash(result))
            }
            (Value::Integer(_) | Value::Float(_), other) => Err(type_error(
                context, operator, "right", "Numeric", other, right_context,
            )),
            (other, _) => Err(type_error(
                context,
                operator,
                "left",
                "Numeric, Array, or Hash",
                other,
                left_context,
            )),
        },
        Op::Minus => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_sub(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow(context, operator, left_context)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 - b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a - *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a - b)),
            (Value::Array(a), Value::Array(b)) => Ok(Value::Array(
                a.iter()
                    .filter(|element| !b.iter().any(|removed| values_equal(element, removed)))
                    .cloned()
                    .collect(),
            )),
            (Value::Array(a), other) => Ok(Value::Array(
                a.iter()
                    .filter(|element| !values_equal(element, other))
                    .cloned()
                    .collect(),
            )),
            (Value::Hash(a), Value::Array(keys)) => {
                let mut result = crate::value::ValueHash::new();
                for (key, value) in a.iter() {
                    if !keys.iter().any(|removed| values_equal(key, removed)) {
                        result.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Hash(result))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                let mut result = crate::value::ValueHash::new();
                for (key, value) in a.iter() {
                    if !b.contains_key(key) {
                        result.insert(key.clone(), value.clone());
                    }
                }
                Ok(Value::Hash(result))
            }
            (Value::Integer(_) | Value::Float(_), other) => Err(type_error(
                context, operator, "right", "Numeric", other, right_context,
            )),
            (other, _) => Err(type_error(
                context,
                operator,
                "left",
                "Numeric, Array, or Hash",
                other,
                left_context,
            )),
        },
        Op::Multiply => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_mul(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow(context, operator, left_context)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 * b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a * *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a * b)),
            (Value::Integer(_) | Value::Float(_), other) => Err(type_error(
                context, operator, "right", "Numeric", other, right_context,
            )),
            (other, _) => Err(type_error(
                context, operator, "left", "Numeric", other, left_context,
            )),
        },
        Op::Divide => match (lhs, rhs) {
            (Value::Integer(_), Value::Integer(0)) => Err(context.raise(
                "cannot divide by zero.",
                Some(right_context.clone()),
            )),
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_div(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow(context, operator, left_context)),
            (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 / b)),
            (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a / *b as f64)),
            (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
            (Value::Integer(_) | Value::Float(_), other) => Err(type_error(
                context, operator, "right", "Numeric", other, right_context,
            )),
            (other, _) => Err(type_error(
                context, operator, "left", "Numeric", other, left_context,
            )),
        },
        Op::Modulo => match (lhs, rhs) {
            (Value::Integer(_), Value::Integer(0)) => Err(context.raise(
                "cannot divide by zero.",
                Some(right_context.clone()),
            )),
            (Value::Integer(a), Value::Integer(b)) => a
                .checked_rem(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow(context, operator, left_context)),
            (Value::Integer(_), other) => Err(type_error(
                context, operator, "right", "Integer", other, right_context,
            )),
            (other, _) => Err(type_error(
                context, operator, "left", "Integer", other, left_context,
            )),
        },
        Op::LeftShift => match (lhs, rhs) {
            (Value::Array(a), other) => {
                let mut result = a.clone();
                result.push(other.clone());
                Ok(Value::Array(result))
            }
            (Value::Integer(a), Value::Integer(b)) => {
                let shifted = if *b < 0 {
                    u32::try_from(-*b).ok().and_then(|shift| a.checked_shr(shift))
                } else {
                    u32::try_from(*b).ok().and_then(|shift| a.checked_shl(shift))
                };
                shifted
                    .map(Value::Integer)
                    .ok_or_else(|| overflow(context, operator, left_context))
            }
            (Value::Integer(_), other) => Err(type_error(
                context, operator, "right", "Integer", other, right_context,
            )),
            (other, _) => Err(type_error(
                context, operator, "left", "Integer or Array", other, left_context,
            )),
        },
        Op::RightShift => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => {
                let shifted = if *b < 0 {
                    u32::try_from(-*b).ok().and_then(|shift| a.checked_shl(shift))
                } else {
                    u32::try_from(*b).ok().and_then(|shift| a.checked_shr(shift))
                };
                shifted
                    .map(Value::Integer)
                    .ok_or_else(|| overflow(context, operator, left_context))
            }
            (Value::Integer(_), other) => Err(type_error(
                context, operator, "right", "Integer", other, right_context,
            )),
            (other, _) => Err(type_error(
                context, operator, "left", "Integer", other, left_context,
            )),
        },
        Op::Equal => Ok(Value::Boolean(values_equal(lhs, rhs))),
        Op::NotEqual => Ok(Value::Boolean(!values_equal(lhs, rhs))),
        Op::LessThan | Op::LessEqual | Op::GreaterThan | Op::GreaterEqual => {
            compare(context, operator, lhs, left_context, rhs, right_context)
        }
        Op::Match | Op::NotMatch => {
            let matched = match_values(context, lhs, rhs, right_context)?;
            Ok(Value::Boolean(
                if operator == Op::Match { matched } else { !matched },
            ))
        }
        Op::In => Ok(Value::Boolean(contains(context, lhs, rhs)?)),
        Op::And | Op::Or | Op::Assign
        | Op::InEdge | Op::InEdgeSubscribe | Op::OutEdge | Op::OutEdgeSubscribe => {
            unreachable!("handled by the evaluator")
        }
    }
}

fn compare(
    context: &EvaluationContext<'_>,
    operator: BinaryOperator,
    lhs: &Value,
    left_context: &AstContext,
    rhs: &Value,
    right_context: &AstContext,
) -> Result<Value, EvaluationError> {
    use std::cmp::Ordering;
    let ordering = match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
        (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => {
            // String ordering is case-insensitive, like string equality.
            let a: String = a.nfc().flat_map(char::to_lowercase).collect();
            let b: String = b.nfc().flat_map(char::to_lowercase).collect();
            Some(a.cmp(&b))
        }
        (Value::Type(a), Value::Type(b)) => {
            // Type comparison is the subtype relation.
            let mut guard = RecursionGuard::new();
            let a_in_b = b.is_assignable(a, &mut guard);
            let b_in_a = a.is_assignable(b, &mut guard);
            match (a_in_b, b_in_a) {
                (true, true) => Some(Ordering::Equal),
                (true, false) => Some(Ordering::Less),
                (false, true) => Some(Ordering::Greater),
                (false, false) => None,
            }
        }
        (Value::Integer(_) | Value::Float(_), other) => {
            return Err(type_error(
                context, operator, "right", "Numeric", other, right_context,
            ))
        }
        (Value::String(_), other) => {
            return Err(type_error(
                context, operator, "right", "String", other, right_context,
            ))
        }
        (other, _) => {
            return Err(type_error(
                context,
                operator,
                "left",
                "Numeric, String, or Type",
                other,
                left_context,
            ))
        }
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Boolean(false));
    };
    let result = match operator {
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        BinaryOperator::GreaterEqual => ordering != Ordering::Less,
        _ => unreachable!("comparison operator"),
    };
    Ok(Value::Boolean(result))
}

/// `=~` semantics: regexes and pattern strings match against strings and
/// set capture groups; types test instances.
fn match_values(
    context: &mut EvaluationContext<'_>,
    lhs: &Value,
    rhs: &Value,
    right_context: &AstContext,
) -> Result<bool, EvaluationError> {
    match rhs {
        Value::Regex(regex) => Ok(match lhs {
            Value::String(subject) => apply_regex(context, regex, subject),
            _ => false,
        }),
        Value::String(pattern) => {
            let regex = ValueRegex::new(pattern.clone()).map_err(|e| {
                context.raise(
                    format!("invalid regular expression: {}.", e),
                    Some(right_context.clone()),
                )
            })?;
            Ok(match lhs {
                Value::String(subject) => apply_regex(context, &regex, subject),
                _ => false,
            })
        }
        Value::Type(t) => {
            let mut guard = RecursionGuard::new();
            Ok(t.is_instance(lhs, &mut guard))
        }
        other => Err(context.raise(
            format!(
                "expected String, Regexp, or Type for match operand but found {}.",
                infer(other)
            ),
            Some(right_context.clone()),
        )),
    }
}

/// Run a regex and publish its captures to the active match scope.
pub fn apply_regex(
    context: &mut EvaluationContext<'_>,
    regex: &ValueRegex,
    subject: &str,
) -> bool {
    match regex.captures(subject) {
        Some(captures) => {
            context.set_matches(captures);
            true
        }
        None => false,
    }
}

/// `in` semantics.
fn contains(
    context: &mut EvaluationContext<'_>,
    lhs: &Value,
    rhs: &Value,
) -> Result<bool, EvaluationError> {
    match rhs {
        Value::String(haystack) => Ok(match lhs {
            Value::String(needle) => {
                let haystack: String = haystack.nfc().flat_map(char::to_lowercase).collect();
                let needle: String = needle.nfc().flat_map(char::to_lowercase).collect();
                haystack.contains(&needle)
            }
            Value::Regex(regex) => apply_regex(context, regex, haystack),
            _ => false,
        }),
        Value::Array(elements) => {
            for element in elements {
                let matched = match lhs {
                    Value::Regex(regex) => match element.as_string() {
                        Some(subject) => apply_regex(context, regex, subject),
                        None => false,
                    },
                    Value::Type(t) => {
                        let mut guard = RecursionGuard::new();
                        t.is_instance(element, &mut guard)
                    }
                    _ => values_equal(lhs, element),
                };
                if matched {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Hash(hash) => {
            for key in hash.keys() {
                let matched = match lhs {
                    Value::Regex(regex) => match key.as_string() {
                        Some(subject) => apply_regex(context, regex, subject),
                        None => false,
                    },
                    Value::Type(t) => {
                        let mut guard = RecursionGuard::new();
                        t.is_instance(key, &mut guard)
                    }
                    _ => values_equal(lhs, key),
                };
                if matched {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

/// Evaluate a unary operator; splats pass through to [`splat`].
pub fn unary(
    context: &EvaluationContext<'_>,
    operator: UnaryOperator,
    operand: &Value,
    operand_context: &AstContext,
) -> Result<Value, EvaluationError> {
    match operator {
        UnaryOperator::Negate => match operand.dereference() {
            Value::Integer(i) => i.checked_neg().map(Value::Integer).ok_or_else(|| {
                context.raise(
                    "arithmetic overflow evaluating '-'.",
                    Some(operand_context.clone()),
                )
            }),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(context.raise(
                format!("expected Numeric for unary '-' but found {}.", infer(other)),
                Some(operand_context.clone()),
            )),
        },
        UnaryOperator::LogicalNot => Ok(Value::Boolean(!operand.is_truthy())),
        UnaryOperator::Splat => Ok(Value::Array(splat(operand))),
    }
}

/// Splat a value into elements: arrays flatten one level, hashes become
/// `[key, value]` pairs, everything else wraps.
pub fn splat(value: &Value) -> Vec<Value> {
    match value.dereference() {
        Value::Array(elements) => elements.clone(),
        Value::Hash(hash) => hash
            .iter()
            .map(|(key, value)| Value::Array(vec![key.clone(), value.clone()]))
            .collect(),
        other => vec![other.clone()],
    }
}

/// Whether a value is equal to any element (used by `case` and splatted
/// options).
pub fn equals_value(left: &Value, right: &Value) -> bool {
    values_equal(left, right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_equality() {
        assert!(values_equal(&Value::string("Hello"), &Value::string("hELLo")));
        assert!(values_equal(&Value::Integer(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Integer(1), &Value::string("1")));
        // Structural equality stays case-sensitive.
        assert_ne!(Value::string("Hello"), Value::string("hELLo"));
    }

    #[test]
    fn array_and_hash_equality_recurse() {
        let a = Value::Array(vec![Value::string("A"), Value::Integer(1)]);
        let b = Value::Array(vec![Value::string("a"), Value::Float(1.0)]);
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn splatting() {
        assert_eq!(
            splat(&Value::Array(vec![Value::Integer(1), Value::Integer(2)])),
            vec![Value::Integer(1), Value::Integer(2)]
        );
        assert_eq!(splat(&Value::Integer(7)), vec![Value::Integer(7)]);
        let mut hash = crate::value::ValueHash::new();
        hash.insert(Value::string("k"), Value::string("v"));
        assert_eq!(
            splat(&Value::Hash(hash)),
            vec![Value::Array(vec![Value::string("k"), Value::string("v")])]
        );
    }
}
