//! Builtin functions, bound methods, and the globals they are installed
//! under.
//!
//! Each builtin is a variant of [`NativeFn`]; dispatch goes through
//! [`call_native`]. Builtins that need to call back into user code (the
//! Promise stub's callbacks) or perform I/O receive a [`NativeCtx`], which
//! both executors implement.

pub(crate) mod convert;
pub(crate) mod fs;
pub(crate) mod promise;
pub(crate) mod regex;
pub(crate) mod show;

use strum::{Display, IntoStaticStr};

use crate::{
    env::{EnvRef, Environment},
    error::{FalconError, RunResult},
    sandbox::Sandbox,
    value::{BoundMethod, SetKey, Value},
};

/// Enumerates every interpreter-native builtin function.
///
/// The strum serialization is the global name the builtin is installed
/// under (`typeOf`, `readFile`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum NativeFn {
    #[strum(serialize = "show")]
    Show,
    #[strum(serialize = "toString")]
    ToString,
    #[strum(serialize = "len")]
    Len,
    #[strum(serialize = "range")]
    Range,
    #[strum(serialize = "typeOf")]
    TypeOf,
    #[strum(serialize = "assert")]
    Assert,
    #[strum(serialize = "exit")]
    Exit,
    #[strum(serialize = "readFile")]
    ReadFile,
    #[strum(serialize = "writeFile")]
    WriteFile,
    #[strum(serialize = "regexMatch")]
    RegexMatch,
    #[strum(serialize = "regexSearch")]
    RegexSearch,
    #[strum(serialize = "regexFindAll")]
    RegexFindAll,
    #[strum(serialize = "regexMatchDict")]
    RegexMatchDict,
    #[strum(serialize = "globMatch")]
    GlobMatch,
    #[strum(serialize = "matchPattern")]
    MatchPattern,
    #[strum(serialize = "Promise")]
    Promise,
    #[strum(serialize = "resolve")]
    PromiseResolve,
    #[strum(serialize = "reject")]
    PromiseReject,
    #[strum(serialize = "log")]
    ConsoleLog,
    #[strum(serialize = "error")]
    ConsoleError,
    #[strum(serialize = "list")]
    ListCtor,
    #[strum(serialize = "tuple")]
    TupleCtor,
    #[strum(serialize = "dict")]
    DictCtor,
}

/// Builtin methods reachable through member access on runtime values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MethodKind {
    #[strum(serialize = "length")]
    Length,
    #[strum(serialize = "get")]
    Get,
    #[strum(serialize = "set")]
    Set,
    #[strum(serialize = "keys")]
    Keys,
    #[strum(serialize = "values")]
    Values,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "remove")]
    Remove,
    #[strum(serialize = "contains")]
    Contains,
    #[strum(serialize = "then")]
    Then,
    #[strum(serialize = "catch")]
    Catch,
    /// `resolve`/`reject` bound to a pending promise, handed to the
    /// executor function of `Promise(function(res, rej) { ... })`.
    #[strum(serialize = "resolve")]
    SettleResolve,
    #[strum(serialize = "reject")]
    SettleReject,
}

/// Services builtins need from their hosting executor.
pub(crate) trait NativeCtx {
    /// Calls an arbitrary callable value (used for Promise callbacks).
    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value>;
    fn sandbox(&self) -> &Sandbox;
    fn write_stdout(&mut self, text: &str) -> RunResult<()>;
    fn push_stdout(&mut self, ch: char) -> RunResult<()>;
    fn write_stderr(&mut self, text: &str);
}

/// Seeds the builtins into the globals environment.
///
/// Every binding is `const` so user code cannot rebind them during a run.
pub fn install_builtins(globals: &EnvRef) -> RunResult<()> {
    let functions = [
        NativeFn::Show,
        NativeFn::ToString,
        NativeFn::Len,
        NativeFn::Range,
        NativeFn::TypeOf,
        NativeFn::Assert,
        NativeFn::Exit,
        NativeFn::ReadFile,
        NativeFn::WriteFile,
        NativeFn::RegexMatch,
        NativeFn::RegexSearch,
        NativeFn::RegexFindAll,
        NativeFn::RegexMatchDict,
        NativeFn::GlobMatch,
        NativeFn::MatchPattern,
        NativeFn::Promise,
        NativeFn::ListCtor,
        NativeFn::TupleCtor,
        NativeFn::DictCtor,
    ];
    for f in functions {
        let name: &'static str = f.into();
        Environment::define(globals, name, Value::Native(f), true, None)?;
    }
    let mut console = indexmap::IndexMap::new();
    console.insert("log".to_owned(), Value::Native(NativeFn::ConsoleLog));
    console.insert("error".to_owned(), Value::Native(NativeFn::ConsoleError));
    Environment::define(globals, "console", Value::object(console), true, None)?;
    Ok(())
}

/// Names visible to the compiler as globals before any user code runs.
#[must_use]
pub fn builtin_names(globals: &EnvRef) -> ahash::AHashSet<String> {
    Environment::local_names(globals).into_iter().collect()
}

/// Dispatches a builtin function call.
pub(crate) fn call_native(f: NativeFn, args: Vec<Value>, ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    match f {
        NativeFn::Show => show::builtin_show(&args, ctx),
        NativeFn::ConsoleLog => show::builtin_show(&args, ctx),
        NativeFn::ConsoleError => show::builtin_console_error(&args, ctx),
        NativeFn::ToString => convert::builtin_to_string(&args),
        NativeFn::Len => convert::builtin_len(&args),
        NativeFn::Range => convert::builtin_range(&args),
        NativeFn::TypeOf => convert::builtin_type_of(&args),
        NativeFn::Assert => convert::builtin_assert(&args),
        NativeFn::Exit => convert::builtin_exit(&args),
        NativeFn::ReadFile => fs::builtin_read_file(&args, ctx),
        NativeFn::WriteFile => fs::builtin_write_file(&args, ctx),
        NativeFn::RegexMatch => regex::builtin_regex_match(&args),
        NativeFn::RegexSearch => regex::builtin_regex_search(&args),
        NativeFn::RegexFindAll => regex::builtin_regex_find_all(&args),
        NativeFn::RegexMatchDict => regex::builtin_regex_match_dict(&args),
        NativeFn::GlobMatch => regex::builtin_glob_match(&args),
        NativeFn::MatchPattern => {
            let [value, pattern] = expect_two(f, &args)?;
            Ok(Value::Bool(crate::pattern::match_value_pattern(value, pattern)))
        }
        NativeFn::Promise => promise::builtin_promise_new(args, ctx),
        NativeFn::PromiseResolve => promise::builtin_promise_resolved(&args),
        NativeFn::PromiseReject => promise::builtin_promise_rejected(&args),
        NativeFn::ListCtor => Ok(Value::list(args)),
        NativeFn::TupleCtor => Ok(Value::tuple(args)),
        NativeFn::DictCtor => {
            if args.is_empty() {
                Ok(Value::dict(indexmap::IndexMap::new()))
            } else {
                Err(FalconError::runtime("dict() takes no arguments"))
            }
        }
    }
}

/// Looks up an attribute on a value.
///
/// `Ok(None)` means the attribute is absent: the VM materializes that as
/// `null`, the interpreter reports it.
pub(crate) fn attr_lookup(base: &Value, name: &str) -> RunResult<Option<Value>> {
    let bound = |method: MethodKind| {
        Some(Value::Bound(std::rc::Rc::new(BoundMethod {
            recv: base.clone(),
            method,
        })))
    };
    match base {
        Value::Dict(entries) => {
            if let Some(value) = entries.borrow().get(name) {
                return Ok(Some(value.clone()));
            }
            Ok(match name {
                "get" => bound(MethodKind::Get),
                "set" => bound(MethodKind::Set),
                "keys" => bound(MethodKind::Keys),
                "values" => bound(MethodKind::Values),
                _ => None,
            })
        }
        Value::Object(entries) => Ok(entries.borrow().get(name).cloned()),
        Value::List(_) | Value::Tuple(_) | Value::Array(_) => Ok(match name {
            "length" => bound(MethodKind::Length),
            _ => None,
        }),
        Value::Set(_) => Ok(match name {
            "add" => bound(MethodKind::Add),
            "remove" => bound(MethodKind::Remove),
            "contains" => bound(MethodKind::Contains),
            _ => None,
        }),
        Value::Promise(_) => Ok(match name {
            "then" => bound(MethodKind::Then),
            "catch" => bound(MethodKind::Catch),
            _ => None,
        }),
        Value::Native(NativeFn::Promise) => Ok(match name {
            "resolve" => Some(Value::Native(NativeFn::PromiseResolve)),
            "reject" => Some(Value::Native(NativeFn::PromiseReject)),
            _ => None,
        }),
        other => Err(FalconError::runtime(format!(
            "cannot read attribute '{name}' of {}",
            other.kind_name()
        ))),
    }
}

/// Stores an attribute slot on a dict or object.
pub(crate) fn attr_store(base: &Value, name: &str, value: Value) -> RunResult<()> {
    match base {
        Value::Dict(entries) | Value::Object(entries) => {
            entries.borrow_mut().insert(name.to_owned(), value);
            Ok(())
        }
        other => Err(FalconError::runtime(format!(
            "cannot set attribute '{name}' on {}",
            other.kind_name()
        ))),
    }
}

/// Dispatches a bound-method call.
pub(crate) fn call_method(bound: &BoundMethod, args: Vec<Value>, ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    let recv = &bound.recv;
    match bound.method {
        MethodKind::Length => match recv {
            Value::List(items) | Value::Array(items) => {
                Ok(Value::Int(i64::try_from(items.borrow().len()).unwrap_or(i64::MAX)))
            }
            Value::Tuple(items) => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
            other => Err(method_type_error("length", other)),
        },
        MethodKind::Get => match recv {
            Value::Dict(entries) => {
                let key = string_arg("get", &args, 0)?;
                let default = args.get(1).cloned().unwrap_or(Value::Null);
                Ok(entries.borrow().get(key.as_str()).cloned().unwrap_or(default))
            }
            other => Err(method_type_error("get", other)),
        },
        MethodKind::Set => match recv {
            Value::Dict(entries) => {
                let key = string_arg("set", &args, 0)?;
                let value = args.get(1).cloned().unwrap_or(Value::Null);
                entries.borrow_mut().insert(key, value);
                Ok(Value::Null)
            }
            other => Err(method_type_error("set", other)),
        },
        MethodKind::Keys => match recv {
            Value::Dict(entries) => Ok(Value::list(
                entries.borrow().keys().map(|key| Value::str(key.clone())).collect(),
            )),
            other => Err(method_type_error("keys", other)),
        },
        MethodKind::Values => match recv {
            Value::Dict(entries) => Ok(Value::list(entries.borrow().values().cloned().collect())),
            other => Err(method_type_error("values", other)),
        },
        MethodKind::Add => match recv {
            Value::Set(items) => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                items.borrow_mut().insert(SetKey::try_from_value(&value)?);
                Ok(Value::Null)
            }
            other => Err(method_type_error("add", other)),
        },
        MethodKind::Remove => match recv {
            Value::Set(items) => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                let key = SetKey::try_from_value(&value)?;
                if items.borrow_mut().shift_remove(&key) {
                    Ok(Value::Null)
                } else {
                    Err(FalconError::runtime(format!(
                        "set.remove: value {} not found",
                        value.to_display_string()
                    )))
                }
            }
            other => Err(method_type_error("remove", other)),
        },
        MethodKind::Contains => match recv {
            Value::Set(items) => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                let key = SetKey::try_from_value(&value)?;
                Ok(Value::Bool(items.borrow().contains(&key)))
            }
            other => Err(method_type_error("contains", other)),
        },
        MethodKind::Then => promise::method_then(recv, &args, ctx),
        MethodKind::Catch => promise::method_catch(recv, &args, ctx),
        MethodKind::SettleResolve => promise::method_settle(recv, &args, ctx, true),
        MethodKind::SettleReject => promise::method_settle(recv, &args, ctx, false),
    }
}

fn method_type_error(name: &str, recv: &Value) -> FalconError {
    FalconError::runtime(format!("{} has no method '{name}'", recv.kind_name()))
}

fn string_arg(method: &str, args: &[Value], index: usize) -> RunResult<String> {
    match args.get(index) {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(FalconError::runtime(format!(
            "{method}: key must be a string, got {}",
            other.kind_name()
        ))),
        None => Err(FalconError::runtime(format!("{method}: missing key argument"))),
    }
}

fn expect_two<'a>(f: NativeFn, args: &'a [Value]) -> RunResult<[&'a Value; 2]> {
    match args {
        [a, b] => Ok([a, b]),
        _ => Err(FalconError::runtime(format!(
            "{f}() expects 2 arguments, got {}",
            args.len()
        ))),
    }
}

/// Arity guard shared by the builtin implementations.
pub(crate) fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> RunResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(FalconError::runtime(format!(
            "{name}() expects {expected} arguments, got {}",
            args.len()
        )));
    }
    Ok(())
}
