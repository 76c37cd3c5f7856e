//! Synchronous Promise placeholder.
//!
//! `then(fn)` and `catch(fn)` invoke their callbacks immediately when the
//! promise is already settled, or append them to in-order callback lists
//! that run when `resolve`/`reject` fires later in the same thread. There
//! is no scheduling; everything happens synchronously on the host thread.

use std::{cell::RefCell, rc::Rc};

use crate::{
    builtins::{MethodKind, NativeCtx},
    error::{ErrorKind, FalconError, RunResult},
    value::{BoundMethod, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromisePhase {
    Pending,
    Resolved,
    Rejected,
}

/// Shared state of one promise instance.
#[derive(Debug)]
pub struct PromiseState {
    phase: PromisePhase,
    settled: Value,
    then_callbacks: Vec<Value>,
    catch_callbacks: Vec<Value>,
}

impl PromiseState {
    fn pending() -> Value {
        Value::Promise(Rc::new(RefCell::new(Self {
            phase: PromisePhase::Pending,
            settled: Value::Null,
            then_callbacks: Vec::new(),
            catch_callbacks: Vec::new(),
        })))
    }

    fn settled(phase: PromisePhase, value: Value) -> Value {
        Value::Promise(Rc::new(RefCell::new(Self {
            phase,
            settled: value,
            then_callbacks: Vec::new(),
            catch_callbacks: Vec::new(),
        })))
    }
}

/// `Promise(executor)` construction.
///
/// With a single callable argument the executor runs immediately and
/// receives bound `resolve`/`reject` settlers; a thrown value inside the
/// executor rejects the promise. Any other argument shape produces a
/// promise resolved with the first argument (or `null`).
pub(crate) fn builtin_promise_new(args: Vec<Value>, ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    if args.len() == 1 && is_callable(&args[0]) {
        let promise = PromiseState::pending();
        let resolve = settler(&promise, MethodKind::SettleResolve);
        let reject = settler(&promise, MethodKind::SettleReject);
        match ctx.call_value(&args[0], vec![resolve, reject]) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::Thrown => {
                let thrown = err.into_thrown_value().unwrap_or(Value::Null);
                settle(&promise, ctx, PromisePhase::Rejected, thrown)?;
            }
            Err(err) => return Err(err),
        }
        return Ok(promise);
    }
    Ok(PromiseState::settled(
        PromisePhase::Resolved,
        args.into_iter().next().unwrap_or(Value::Null),
    ))
}

/// `Promise.resolve(v)`.
pub(crate) fn builtin_promise_resolved(args: &[Value]) -> RunResult<Value> {
    Ok(PromiseState::settled(
        PromisePhase::Resolved,
        args.first().cloned().unwrap_or(Value::Null),
    ))
}

/// `Promise.reject(e)`.
pub(crate) fn builtin_promise_rejected(args: &[Value]) -> RunResult<Value> {
    Ok(PromiseState::settled(
        PromisePhase::Rejected,
        args.first().cloned().unwrap_or(Value::Null),
    ))
}

/// `p.then(fn)`: runs `fn` now when resolved, defers when pending, and
/// returns the promise for chaining.
pub(crate) fn method_then(recv: &Value, args: &[Value], ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    let Value::Promise(state) = recv else {
        return Err(FalconError::runtime("then() receiver is not a promise"));
    };
    let callback = args.first().cloned().unwrap_or(Value::Null);
    let ready = {
        let mut state = state.borrow_mut();
        match state.phase {
            PromisePhase::Resolved => Some(state.settled.clone()),
            PromisePhase::Rejected => None,
            PromisePhase::Pending => {
                state.then_callbacks.push(callback.clone());
                None
            }
        }
    };
    if let Some(value) = ready {
        run_callback(ctx, &callback, value);
    }
    Ok(recv.clone())
}

/// `p.catch(fn)`: the rejection-side counterpart of `then`.
pub(crate) fn method_catch(recv: &Value, args: &[Value], ctx: &mut dyn NativeCtx) -> RunResult<Value> {
    let Value::Promise(state) = recv else {
        return Err(FalconError::runtime("catch() receiver is not a promise"));
    };
    let callback = args.first().cloned().unwrap_or(Value::Null);
    let ready = {
        let mut state = state.borrow_mut();
        match state.phase {
            PromisePhase::Rejected => Some(state.settled.clone()),
            PromisePhase::Resolved => None,
            PromisePhase::Pending => {
                state.catch_callbacks.push(callback.clone());
                None
            }
        }
    };
    if let Some(value) = ready {
        run_callback(ctx, &callback, value);
    }
    Ok(recv.clone())
}

/// Bound `resolve`/`reject` handed to an executor function.
pub(crate) fn method_settle(
    recv: &Value,
    args: &[Value],
    ctx: &mut dyn NativeCtx,
    resolve: bool,
) -> RunResult<Value> {
    let phase = if resolve { PromisePhase::Resolved } else { PromisePhase::Rejected };
    settle(recv, ctx, phase, args.first().cloned().unwrap_or(Value::Null))?;
    Ok(Value::Null)
}

fn settle(promise: &Value, ctx: &mut dyn NativeCtx, phase: PromisePhase, value: Value) -> RunResult<()> {
    let Value::Promise(state) = promise else {
        return Err(FalconError::runtime("settle target is not a promise"));
    };
    let callbacks = {
        let mut state = state.borrow_mut();
        if state.phase != PromisePhase::Pending {
            // a promise settles at most once
            return Ok(());
        }
        state.phase = phase;
        state.settled = value.clone();
        match phase {
            PromisePhase::Resolved => std::mem::take(&mut state.then_callbacks),
            PromisePhase::Rejected => std::mem::take(&mut state.catch_callbacks),
            PromisePhase::Pending => unreachable!("phase was just set"),
        }
    };
    for callback in callbacks {
        run_callback(ctx, &callback, value.clone());
    }
    Ok(())
}

/// Callback failures are swallowed, matching the placeholder's semantics.
fn run_callback(ctx: &mut dyn NativeCtx, callback: &Value, value: Value) {
    if is_callable(callback) {
        let _ = ctx.call_value(callback, vec![value]);
    }
}

fn is_callable(value: &Value) -> bool {
    matches!(value, Value::Function(_) | Value::Native(_) | Value::Bound(_))
}

fn settler(promise: &Value, method: MethodKind) -> Value {
    Value::Bound(Rc::new(BoundMethod {
        recv: promise.clone(),
        method,
    }))
}
