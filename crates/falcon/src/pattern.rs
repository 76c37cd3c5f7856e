//! Structural pattern matching for `match` arms.
//!
//! Patterns are tested in order; a successful match may produce bindings
//! which the caller installs into the arm's environment before evaluating
//! the guard. Guards themselves are evaluated by the interpreter.

use crate::{
    ast::{Lit, Pattern, TypePattern},
    value::Value,
};

/// Tests `value` against `pattern`, appending any bindings produced.
///
/// Bindings appended by a failed sub-match are rolled back before
/// returning, so callers can reuse one vector across alternatives.
#[must_use]
pub fn match_pattern(pattern: &Pattern, value: &Value, bindings: &mut Vec<(String, Value)>) -> bool {
    let checkpoint = bindings.len();
    let matched = match_inner(pattern, value, bindings);
    if !matched {
        bindings.truncate(checkpoint);
    }
    matched
}

fn match_inner(pattern: &Pattern, value: &Value, bindings: &mut Vec<(String, Value)>) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Literal(lit) => literal_value(lit).falcon_eq(value),
        Pattern::Binding(name) => {
            bindings.push((name.clone(), value.clone()));
            true
        }
        Pattern::Type(type_pattern) => type_matches(*type_pattern, value),
        Pattern::List(elements) => match value {
            Value::List(items) => {
                let items = items.borrow();
                items.len() == elements.len()
                    && elements
                        .iter()
                        .zip(items.iter())
                        .all(|(p, v)| match_pattern(p, v, bindings))
            }
            _ => false,
        },
        Pattern::Tuple(elements) => match value {
            Value::Tuple(items) => {
                items.len() == elements.len()
                    && elements
                        .iter()
                        .zip(items.iter())
                        .all(|(p, v)| match_pattern(p, v, bindings))
            }
            _ => false,
        },
        Pattern::Dict(entries) => match value {
            Value::Dict(map) => {
                let map = map.borrow();
                // key sets must agree exactly, then values match recursively
                map.len() == entries.len()
                    && entries.iter().all(|(key, p)| {
                        map.get(key).is_some_and(|v| match_pattern(p, v, bindings))
                    })
            }
            _ => false,
        },
        Pattern::Or(alternatives) => alternatives.iter().any(|p| match_pattern(p, value, bindings)),
    }
}

fn type_matches(type_pattern: TypePattern, value: &Value) -> bool {
    match type_pattern {
        TypePattern::Int => matches!(value, Value::Int(_)),
        TypePattern::Float => matches!(value, Value::Float(_)),
        TypePattern::Bool => matches!(value, Value::Bool(_)),
        TypePattern::Str => matches!(value, Value::Str(_)),
        TypePattern::List => matches!(value, Value::List(_)),
        TypePattern::Tuple => matches!(value, Value::Tuple(_)),
        TypePattern::Dict => matches!(value, Value::Dict(_)),
        TypePattern::Object => matches!(value, Value::Dict(_) | Value::Object(_)),
    }
}

fn literal_value(lit: &Lit) -> Value {
    match lit {
        Lit::Null => Value::Null,
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Int(n) => Value::Int(*n),
        Lit::Float(x) => Value::Float(*x),
        Lit::Str(s) => Value::str(s.clone()),
    }
}

/// The `matchPattern` builtin: value-level structural matching.
///
/// Sequences match element-wise, dicts require the same key set with
/// recursively matching values, and anything else falls back to equality.
#[must_use]
pub fn match_value_pattern(value: &Value, pattern: &Value) -> bool {
    match (pattern, value) {
        (Value::List(pattern_items), Value::List(value_items)) => {
            let (pattern_items, value_items) = (pattern_items.borrow(), value_items.borrow());
            pattern_items.len() == value_items.len()
                && pattern_items
                    .iter()
                    .zip(value_items.iter())
                    .all(|(p, v)| match_value_pattern(v, p))
        }
        (Value::Tuple(pattern_items), Value::Tuple(value_items)) => {
            pattern_items.len() == value_items.len()
                && pattern_items
                    .iter()
                    .zip(value_items.iter())
                    .all(|(p, v)| match_value_pattern(v, p))
        }
        (Value::Dict(pattern_map), Value::Dict(value_map)) => {
            let (pattern_map, value_map) = (pattern_map.borrow(), value_map.borrow());
            pattern_map.len() == value_map.len()
                && pattern_map
                    .iter()
                    .all(|(key, p)| value_map.get(key).is_some_and(|v| match_value_pattern(v, p)))
        }
        (Value::List(_) | Value::Tuple(_) | Value::Dict(_), _) => false,
        _ => pattern.falcon_eq(value),
    }
}
