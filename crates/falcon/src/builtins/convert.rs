//! Value helper builtins: `toString`, `len`, `range`, `typeOf`, `assert`,
//! `exit`.

use crate::{
    builtins::expect_args,
    error::{FalconError, RunResult},
    value::Value,
};

pub(crate) fn builtin_to_string(args: &[Value]) -> RunResult<Value> {
    expect_args("toString", args, 1, 1)?;
    Ok(Value::str(args[0].to_display_string()))
}

/// `len(v)` for strings (character count) and the sized collections.
pub(crate) fn builtin_len(args: &[Value]) -> RunResult<Value> {
    expect_args("len", args, 1, 1)?;
    let len = match &args[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.borrow().len(),
        Value::Tuple(items) => items.len(),
        Value::Dict(entries) => entries.borrow().len(),
        Value::Set(items) => items.borrow().len(),
        Value::Null => return Err(FalconError::runtime("len(null) is not supported")),
        other => {
            return Err(FalconError::runtime(format!(
                "object of type {} has no length",
                other.kind_name()
            )));
        }
    };
    Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

/// `range(stop)` or `range(start, stop[, step])` as an integer list.
pub(crate) fn builtin_range(args: &[Value]) -> RunResult<Value> {
    expect_args("range", args, 1, 3)?;
    let (start, stop, step) = match args {
        [stop] => (0, stop.expect_int("range() stop")?, 1),
        [start, stop] => (start.expect_int("range() start")?, stop.expect_int("range() stop")?, 1),
        [start, stop, step] => (
            start.expect_int("range() start")?,
            stop.expect_int("range() stop")?,
            step.expect_int("range() step")?,
        ),
        _ => unreachable!("arity checked above"),
    };
    if step == 0 {
        return Err(FalconError::runtime("range() step argument must not be zero"));
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::list(items))
}

pub(crate) fn builtin_type_of(args: &[Value]) -> RunResult<Value> {
    expect_args("typeOf", args, 1, 1)?;
    Ok(Value::str(args[0].type_of()))
}

pub(crate) fn builtin_assert(args: &[Value]) -> RunResult<Value> {
    expect_args("assert", args, 1, 2)?;
    if args[0].is_truthy() {
        return Ok(Value::Null);
    }
    let message = match args.get(1) {
        Some(msg) => msg.to_display_string(),
        None => "Assertion failed".to_owned(),
    };
    Err(FalconError::runtime(message))
}

pub(crate) fn builtin_exit(args: &[Value]) -> RunResult<Value> {
    expect_args("exit", args, 0, 1)?;
    let code = match args.first() {
        Some(value) => value.expect_int("exit() code")?,
        None => 0,
    };
    let code = i32::try_from(code).unwrap_or(1);
    Err(FalconError::exit(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(value: &Value) -> Vec<i64> {
        match value {
            Value::List(items) => items
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Int(n) => *n,
                    other => panic!("expected int, got {other:?}"),
                })
                .collect(),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_range_forms() {
        assert_eq!(ints(&builtin_range(&[Value::Int(4)]).unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(ints(&builtin_range(&[Value::Int(2), Value::Int(5)]).unwrap()), vec![2, 3, 4]);
        assert_eq!(
            ints(&builtin_range(&[Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap()),
            vec![5, 3, 1]
        );
        assert!(builtin_range(&[Value::Int(1), Value::Int(5), Value::Int(0)]).is_err());
    }

    #[test]
    fn test_len() {
        assert!(matches!(builtin_len(&[Value::str("héllo")]), Ok(Value::Int(5))));
        assert!(matches!(
            builtin_len(&[Value::list(vec![Value::Null, Value::Null])]),
            Ok(Value::Int(2))
        ));
        assert!(builtin_len(&[Value::Null]).is_err());
        assert!(builtin_len(&[Value::Int(3)]).is_err());
    }

    #[test]
    fn test_type_of() {
        let cases = [
            (Value::Null, "null"),
            (Value::Bool(true), "boolean"),
            (Value::Int(1), "number"),
            (Value::Float(1.5), "number"),
            (Value::str("s"), "string"),
            (Value::list(vec![]), "array"),
            (Value::dict(indexmap::IndexMap::new()), "object"),
        ];
        for (value, expected) in cases {
            let out = builtin_type_of(&[value]).unwrap();
            assert_eq!(out.to_display_string(), expected);
        }
    }

    #[test]
    fn test_assert() {
        assert!(builtin_assert(&[Value::Bool(true)]).is_ok());
        let err = builtin_assert(&[Value::Int(0), Value::str("boom")]).unwrap_err();
        assert_eq!(err.message(), "boom");
        let err = builtin_assert(&[Value::Null]).unwrap_err();
        assert_eq!(err.message(), "Assertion failed");
    }

    #[test]
    fn test_to_string() {
        let out = builtin_to_string(&[Value::Float(2.0)]).unwrap();
        assert_eq!(out.to_display_string(), "2.0");
    }
}
