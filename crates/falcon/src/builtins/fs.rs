//! Sandboxed file-I/O builtins.

use std::fs;

use crate::{
    builtins::{expect_args, NativeCtx},
    error::{FalconError, RunResult},
    value::Value,
};

fn path_arg(name: &str, args: &[Value]) -> RunResult<String> {
    match args.first() {
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(FalconError::runtime(format!(
            "{name}() path must be a string, got {}",
            other.kind_name()
        ))),
        None => Err(FalconError::runtime(format!("{name}() requires a path argument"))),
    }
}

/// `readFile(path)`: UTF-8 file text under the sandbox base directory.
pub(crate) fn builtin_read_file(args: &[Value], ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    expect_args("readFile", args, 1, 1)?;
    let path = ctx.sandbox().resolve(&path_arg("readFile", args)?)?;
    if !path.exists() {
        return Err(FalconError::runtime(format!("file not found: {}", path.display())));
    }
    if path.is_dir() {
        return Err(FalconError::runtime(format!("is a directory: {}", path.display())));
    }
    let text = fs::read_to_string(&path)
        .map_err(|err| FalconError::runtime(format!("failed to read {}: {err}", path.display())))?;
    Ok(Value::str(text))
}

/// `writeFile(path, content)`: writes the canonical string form of
/// `content`, creating parent directories as needed.
pub(crate) fn builtin_write_file(args: &[Value], ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    expect_args("writeFile", args, 2, 2)?;
    let path = ctx.sandbox().resolve(&path_arg("writeFile", args)?)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| FalconError::runtime(format!("failed to create {}: {err}", parent.display())))?;
    }
    let content = args[1].to_display_string();
    fs::write(&path, content)
        .map_err(|err| FalconError::runtime(format!("failed to write {}: {err}", path.display())))?;
    Ok(Value::Null)
}
