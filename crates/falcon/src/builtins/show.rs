//! The `show` builtin and the `console` methods.

use crate::{builtins::NativeCtx, error::RunResult, value::Value};

/// `show(v1, v2, ...)`: arguments space-joined through the canonical
/// string coercion, with a trailing newline. Output is built first so a
/// call writes atomically.
pub(crate) fn builtin_show(args: &[Value], ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    let mut first = true;
    for value in args {
        if first {
            first = false;
        } else {
            ctx.push_stdout(' ')?;
        }
        ctx.write_stdout(&value.to_display_string())?;
    }
    ctx.push_stdout('\n')?;
    Ok(Value::Null)
}

/// `console.error(...)`: space-joined like `show`, prefixed `ERROR:`,
/// written to the error stream.
pub(crate) fn builtin_console_error(args: &[Value], ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    let joined: Vec<String> = args.iter().map(Value::to_display_string).collect();
    ctx.write_stderr(&format!("ERROR: {}", joined.join(" ")));
    Ok(Value::Null)
}
