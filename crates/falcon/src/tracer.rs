//! Execution tracing hooks for the VM and the runner.
//!
//! Provides a trait-based tracing seam instead of a logging crate. All hook
//! methods have default no-op implementations, so [`NoopTracer`] costs
//! nothing, while [`StderrTracer`] gives a human-readable execution log for
//! the runner's verbose mode.

use crate::bytecode::Op;

/// Trait for execution tracing.
///
/// Implementations only override the hooks they care about.
pub trait ExecTracer {
    /// Called before each instruction dispatch in the VM run loop.
    ///
    /// This is the hottest hook; implementations should stay lightweight.
    #[inline]
    fn on_instruction(&mut self, _frame: &str, _ip: usize, _op: &Op) {}

    /// Called when the VM pushes a call frame.
    #[inline]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called when the runner abandons the bytecode path and re-runs the
    /// module on the tree interpreter.
    #[inline]
    fn on_fallback(&mut self, _reason: &str) {}
}

/// Zero-cost tracer used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl ExecTracer for NoopTracer {}

/// Tracer that writes a human-readable execution log to stderr.
///
/// Selected by the runner's verbose flag.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExecTracer for StderrTracer {
    fn on_instruction(&mut self, frame: &str, ip: usize, op: &Op) {
        eprintln!("[vm] {frame}:{ip} {op}");
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        eprintln!("[vm] call {func_name} (depth {depth})");
    }

    fn on_fallback(&mut self, reason: &str) {
        eprintln!("[falcon] {reason}; falling back to the tree interpreter");
    }
}
