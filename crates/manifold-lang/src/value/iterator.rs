//! Lazy iterator values.
//!
//! An iterator wraps an iterable source (array, hash, integer count,
//! integer-range type, or another iterator) together with a step and a
//! direction. Iteration drives a callback rather than materializing,
//! except when reversed, where the bounded source is collected first.
//! Iterators are restartable: they hold the source, not consumed state.

use super::Value;
use crate::types::Type;

#[derive(Debug, Clone, PartialEq)]
pub struct IteratorValue {
    /// The iterable source.
    pub value: Box<Value>,
    /// Yield every nth pair (1 = every pair).
    pub step: i64,
    /// Iterate the source back-to-front.
    pub reversed: bool,
}

/// Pairs yielded to iteration callbacks: hash keys or array indices, plus
/// the element value. The callback returns `false` to stop early.
pub type IterationCallback<'a> = dyn FnMut(Option<&Value>, &Value) -> Result<bool, String> + 'a;

impl IteratorValue {
    /// Wrap an iterable value; fails with a description of the value kind
    /// when the value cannot be iterated.
    pub fn new(value: Value) -> Result<Self, String> {
        Self::with(value, 1, false)
    }

    /// Wrap with an explicit step and direction.
    pub fn with(value: Value, step: i64, reversed: bool) -> Result<Self, String> {
        if step < 1 {
            return Err(format!("step must be a positive integer, not {}.", step));
        }
        if !is_iterable(&value) {
            return Err(format!("{} is not an iterable value.", value.kind_description()));
        }
        Ok(Self {
            value: Box::new(value),
            step,
            reversed,
        })
    }

    /// Drive `callback` over the pairs of this iterator.
    pub fn for_each(&self, callback: &mut IterationCallback<'_>) -> Result<(), String> {
        if self.reversed {
            let mut pairs = Vec::new();
            source_for_each(&self.value, &mut |key, value| {
                pairs.push((key.cloned(), value.clone()));
                Ok(true)
            })?;
            for (i, (key, value)) in pairs.iter().rev().enumerate() {
                if i as i64 % self.step != 0 {
                    continue;
                }
                if !callback(key.as_ref(), value)? {
                    break;
                }
            }
            return Ok(());
        }

        let mut index = 0i64;
        let step = self.step;
        source_for_each(&self.value, &mut |key, value| {
            let yield_this = index % step == 0;
            index += 1;
            if yield_this {
                callback(key, value)
            } else {
                Ok(true)
            }
        })
    }

    /// Materialize the iterator's values (keys dropped for keyed sources).
    pub fn to_array(&self) -> Result<Vec<Value>, String> {
        let mut values = Vec::new();
        self.for_each(&mut |key, value| {
            match key {
                // Hash sources materialize as [key, value] pairs.
                Some(key) if matches!(*self.source_root(), Value::Hash(_)) => {
                    values.push(Value::Array(vec![key.clone(), value.clone()]));
                }
                _ => values.push(value.clone()),
            }
            Ok(true)
        })?;
        Ok(values)
    }

    /// The non-iterator value at the bottom of an iterator chain.
    pub fn source_root(&self) -> &Value {
        let mut current = self.value.as_ref();
        while let Value::Iterator(inner) = current {
            current = inner.value.as_ref();
        }
        current
    }
}

fn is_iterable(value: &Value) -> bool {
    match value {
        Value::Array(_) | Value::Hash(_) | Value::Iterator(_) => true,
        Value::Integer(n) => *n >= 0,
        Value::Type(t) => matches!(
            t.as_ref(),
            Type::Integer {
                from: Some(_),
                to: Some(_),
            }
        ),
        _ => false,
    }
}

fn source_for_each(
    value: &Value,
    callback: &mut IterationCallback<'_>,
) -> Result<(), String> {
    match value {
        Value::Array(elements) => {
            for (i, element) in elements.iter().enumerate() {
                if !callback(Some(&Value::Integer(i as i64)), element)? {
                    break;
                }
            }
            Ok(())
        }
        Value::Hash(hash) => {
            for (key, element) in hash.iter() {
                if !callback(Some(key), element)? {
                    break;
                }
            }
            Ok(())
        }
        Value::Integer(count) => {
            if *count < 0 {
                return Err(format!("cannot iterate a negative count ({}).", count));
            }
            for i in 0..*count {
                if !callback(None, &Value::Integer(i))? {
                    break;
                }
            }
            Ok(())
        }
        Value::Type(t) => match t.as_ref() {
            Type::Integer {
                from: Some(from),
                to: Some(to),
            } => {
                for i in *from..=*to {
                    if !callback(None, &Value::Integer(i))? {
                        break;
                    }
                }
                Ok(())
            }
            other => Err(format!("{} is not an iterable type.", other)),
        },
        Value::Iterator(inner) => inner.for_each(callback),
        other => Err(format!("{} is not an iterable value.", other.kind_description())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueHash;

    fn collect(iterator: &IteratorValue) -> Vec<Value> {
        iterator.to_array().expect("iteration should succeed")
    }

    #[test]
    fn integer_count_iterates_from_zero() {
        let iterator = IteratorValue::new(Value::Integer(3)).unwrap();
        assert_eq!(
            collect(&iterator),
            vec![Value::Integer(0), Value::Integer(1), Value::Integer(2)]
        );
    }

    #[test]
    fn array_iteration_is_ordered() {
        let iterator =
            IteratorValue::new(Value::Array(vec![Value::Integer(5), Value::Integer(7)])).unwrap();
        assert_eq!(collect(&iterator), vec![Value::Integer(5), Value::Integer(7)]);
    }

    #[test]
    fn reverse_and_step_compose() {
        let source = Value::Array((0..6).map(Value::Integer).collect());
        let iterator = IteratorValue::with(source, 2, true).unwrap();
        assert_eq!(
            collect(&iterator),
            vec![Value::Integer(5), Value::Integer(3), Value::Integer(1)]
        );
    }

    #[test]
    fn hash_iteration_yields_pairs() {
        let mut hash = ValueHash::new();
        hash.insert(Value::string("a"), Value::Integer(1));
        let iterator = IteratorValue::new(Value::Hash(hash)).unwrap();
        let pairs = collect(&iterator);
        assert_eq!(
            pairs,
            vec![Value::Array(vec![Value::string("a"), Value::Integer(1)])]
        );
    }

    #[test]
    fn chained_iterators() {
        let inner = IteratorValue::new(Value::Integer(5)).unwrap();
        let outer = IteratorValue::with(Value::Iterator(Box::new(inner)), 2, false).unwrap();
        assert_eq!(
            collect(&outer),
            vec![Value::Integer(0), Value::Integer(2), Value::Integer(4)]
        );
    }

    #[test]
    fn strings_are_not_iterable() {
        assert!(IteratorValue::new(Value::string("nope")).is_err());
    }

    #[test]
    fn restartable() {
        let iterator = IteratorValue::new(Value::Integer(2)).unwrap();
        assert_eq!(collect(&iterator).len(), 2);
        assert_eq!(collect(&iterator).len(), 2);
    }
}
