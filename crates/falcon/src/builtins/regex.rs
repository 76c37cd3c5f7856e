//! Regex and glob helper builtins.
//!
//! `regexMatch` anchors at the start of the text, `regexSearch` finds the
//! first occurrence; both return the list of captured groups (`null` where
//! a group did not participate) or `null` on no match. `regexFindAll`
//! returns all non-overlapping matches, `regexMatchDict` the named groups,
//! and `globMatch` full-matches a shell-style glob.

use regex::Regex;

use crate::{
    builtins::expect_args,
    error::{FalconError, RunResult},
    value::Value,
};

fn compile(pattern: &str) -> RunResult<Regex> {
    Regex::new(pattern).map_err(|err| FalconError::runtime(format!("invalid regex pattern: {err}")))
}

fn two_strings<'a>(name: &str, args: &'a [Value]) -> RunResult<(&'a str, &'a str)> {
    expect_args(name, args, 2, 2)?;
    match (&args[0], &args[1]) {
        (Value::Str(pattern), Value::Str(text)) => Ok((pattern, text)),
        _ => Err(FalconError::runtime(format!("{name}() expects two string arguments"))),
    }
}

fn groups_list(caps: &regex::Captures<'_>) -> Value {
    let groups: Vec<Value> = caps
        .iter()
        .skip(1)
        .map(|group| match group {
            Some(m) => Value::str(m.as_str()),
            None => Value::Null,
        })
        .collect();
    Value::list(groups)
}

pub(crate) fn builtin_regex_match(args: &[Value]) -> RunResult<Value> {
    let (pattern, text) = two_strings("regexMatch", args)?;
    let regex = compile(pattern)?;
    match regex.captures(text) {
        Some(caps) if caps.get(0).is_some_and(|m| m.start() == 0) => Ok(groups_list(&caps)),
        _ => Ok(Value::Null),
    }
}

pub(crate) fn builtin_regex_search(args: &[Value]) -> RunResult<Value> {
    let (pattern, text) = two_strings("regexSearch", args)?;
    let regex = compile(pattern)?;
    match regex.captures(text) {
        Some(caps) => Ok(groups_list(&caps)),
        None => Ok(Value::Null),
    }
}

pub(crate) fn builtin_regex_find_all(args: &[Value]) -> RunResult<Value> {
    let (pattern, text) = two_strings("regexFindAll", args)?;
    let regex = compile(pattern)?;
    let group_count = regex.captures_len() - 1;
    let mut items = Vec::new();
    for caps in regex.captures_iter(text) {
        match group_count {
            0 => items.push(Value::str(caps.get(0).map_or("", |m| m.as_str()))),
            1 => items.push(match caps.get(1) {
                Some(m) => Value::str(m.as_str()),
                None => Value::str(""),
            }),
            _ => {
                let groups: Vec<Value> = caps
                    .iter()
                    .skip(1)
                    .map(|group| match group {
                        Some(m) => Value::str(m.as_str()),
                        None => Value::str(""),
                    })
                    .collect();
                items.push(Value::tuple(groups));
            }
        }
    }
    Ok(Value::list(items))
}

pub(crate) fn builtin_regex_match_dict(args: &[Value]) -> RunResult<Value> {
    let (pattern, text) = two_strings("regexMatchDict", args)?;
    let regex = compile(pattern)?;
    let Some(caps) = regex.captures(text) else {
        return Ok(Value::Null);
    };
    if !caps.get(0).is_some_and(|m| m.start() == 0) {
        return Ok(Value::Null);
    }
    let mut entries = indexmap::IndexMap::new();
    for name in regex.capture_names().flatten() {
        let value = match caps.name(name) {
            Some(m) => Value::str(m.as_str()),
            None => Value::Null,
        };
        entries.insert(name.to_owned(), value);
    }
    Ok(Value::dict(entries))
}

pub(crate) fn builtin_glob_match(args: &[Value]) -> RunResult<Value> {
    let (pattern, text) = two_strings("globMatch", args)?;
    let regex = compile(&glob_to_regex(pattern))?;
    Ok(Value::Bool(regex.is_match(text)))
}

/// Translates a shell-style glob (`*`, `?`, `[seq]`) into an anchored
/// regex; `.` matches newlines so patterns can span lines.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("(?s)^");
    let mut chars = glob.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if inner == '\\' {
                        class.push_str("\\\\");
                    } else {
                        class.push(inner);
                    }
                }
                if closed {
                    class.push(']');
                    out.push_str(&class);
                } else {
                    // unclosed bracket matches literally
                    out.push_str("\\[");
                    out.push_str(&regex::escape(&class[1..]));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::str(text)
    }

    #[test]
    fn test_regex_match_is_anchored() {
        let out = builtin_regex_match(&[s(r"(\d+)"), s("42abc")]).unwrap();
        assert_eq!(out.to_display_string(), r#"["42"]"#);
        let miss = builtin_regex_match(&[s(r"(\d+)"), s("abc42")]).unwrap();
        assert!(matches!(miss, Value::Null));
    }

    #[test]
    fn test_regex_search_finds_anywhere() {
        let out = builtin_regex_search(&[s(r"(\d+)"), s("abc42")]).unwrap();
        assert_eq!(out.to_display_string(), r#"["42"]"#);
    }

    #[test]
    fn test_regex_find_all() {
        let out = builtin_regex_find_all(&[s(r"\d+"), s("a1 b22 c333")]).unwrap();
        assert_eq!(out.to_display_string(), r#"["1","22","333"]"#);
        let grouped = builtin_regex_find_all(&[s(r"(\w)(\d)"), s("a1 b2")]).unwrap();
        assert_eq!(grouped.to_display_string(), r#"[["a","1"],["b","2"]]"#);
    }

    #[test]
    fn test_regex_match_dict() {
        let out = builtin_regex_match_dict(&[s(r"(?P<year>\d{4})-(?P<month>\d{2})"), s("2024-07")]).unwrap();
        assert_eq!(out.to_display_string(), r#"{"year":"2024","month":"07"}"#);
        let miss = builtin_regex_match_dict(&[s(r"(?P<year>\d{4})"), s("none")]).unwrap();
        assert!(matches!(miss, Value::Null));
    }

    #[test]
    fn test_glob_match() {
        assert!(matches!(builtin_glob_match(&[s("*.txt"), s("notes.txt")]), Ok(Value::Bool(true))));
        assert!(matches!(builtin_glob_match(&[s("*.txt"), s("notes.md")]), Ok(Value::Bool(false))));
        assert!(matches!(builtin_glob_match(&[s("a?c"), s("abc")]), Ok(Value::Bool(true))));
        assert!(matches!(builtin_glob_match(&[s("[ab]x"), s("bx")]), Ok(Value::Bool(true))));
        assert!(matches!(builtin_glob_match(&[s("[!ab]x"), s("cx")]), Ok(Value::Bool(true))));
    }

    #[test]
    fn test_invalid_pattern_is_runtime_error() {
        assert!(builtin_regex_match(&[s("("), s("x")]).is_err());
    }
}
