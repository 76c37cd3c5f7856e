//! Stack-based virtual machine.
//!
//! Execution is a dispatch loop over a frame's instruction stream. Frames
//! share one globals environment for the whole run, so mutually recursive
//! functions observe each other's `STORE_GLOBAL` definitions. Calls to
//! AST-backed functions bridge into the tree interpreter; both executors
//! share the value model, builtins, and globals.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    builtins::{self, NativeCtx},
    env::{EnvRef, Environment},
    error::{FalconError, RunResult},
    interp::Interpreter,
    io::PrintWriter,
    sandbox::Sandbox,
    tracer::ExecTracer,
    value::{FunctionValue, Value},
};

use super::{code::Code, code::Const, op::Op};

/// Call-depth ceiling shared by the VM and the interpreter bridge.
pub const MAX_CALL_DEPTH: usize = 300;

/// Per-call record: instruction pointer, operand stack, and local slots.
struct Frame {
    code: Rc<Code>,
    ip: usize,
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl Frame {
    fn new(code: Rc<Code>, locals: Vec<Value>) -> Self {
        Self {
            code,
            ip: 0,
            stack: Vec::with_capacity(8),
            locals,
        }
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| FalconError::internal(format!("stack underflow in {}", self.code.name())))
    }

    fn local(&self, slot: u16) -> RunResult<&Value> {
        self.locals
            .get(slot as usize)
            .ok_or_else(|| FalconError::internal(format!("local slot {slot} out of range in {}", self.code.name())))
    }

    fn set_local(&mut self, slot: u16, value: Value) -> RunResult<()> {
        match self.locals.get_mut(slot as usize) {
            Some(target) => {
                *target = value;
                Ok(())
            }
            None => Err(FalconError::internal(format!(
                "local slot {slot} out of range in {}",
                self.code.name()
            ))),
        }
    }
}

/// The bytecode executor.
pub struct Vm<'a, W: PrintWriter> {
    globals: EnvRef,
    sandbox: &'a Sandbox,
    print: &'a mut W,
    tracer: &'a mut dyn ExecTracer,
    depth: usize,
}

impl<'a, W: PrintWriter> Vm<'a, W> {
    pub fn new(globals: EnvRef, sandbox: &'a Sandbox, print: &'a mut W, tracer: &'a mut dyn ExecTracer) -> Self {
        Self::with_depth(globals, sandbox, print, tracer, 0)
    }

    pub(crate) fn with_depth(
        globals: EnvRef,
        sandbox: &'a Sandbox,
        print: &'a mut W,
        tracer: &'a mut dyn ExecTracer,
        depth: usize,
    ) -> Self {
        Self {
            globals,
            sandbox,
            print,
            tracer,
            depth,
        }
    }

    /// Runs a top-level code object to completion.
    pub fn run_code(&mut self, code: &Rc<Code>) -> RunResult<Value> {
        code.validate()?;
        let locals = vec![Value::Null; code.nlocals() as usize];
        let mut frame = Frame::new(Rc::clone(code), locals);
        self.run_frame(&mut frame)
    }

    fn run_frame(&mut self, frame: &mut Frame) -> RunResult<Value> {
        loop {
            let Some(op) = frame.code.instrs().get(frame.ip).copied() else {
                // fell off the end without an explicit RETURN
                return Ok(Value::Null);
            };
            self.tracer.on_instruction(frame.code.name(), frame.ip, &op);
            frame.ip += 1;
            match op {
                Op::LoadConst(idx) => {
                    let constant = frame.code.const_at(idx)?;
                    let value = constant.to_value().ok_or_else(|| {
                        FalconError::internal(format!("LOAD_CONST of non-scalar const {idx} in {}", frame.code.name()))
                    })?;
                    frame.stack.push(value);
                }
                Op::Pop => {
                    frame.pop()?;
                }
                Op::Dup => {
                    let top = frame
                        .stack
                        .last()
                        .cloned()
                        .ok_or_else(|| FalconError::internal("DUP on empty stack"))?;
                    frame.stack.push(top);
                }
                Op::LoadGlobal(idx) => {
                    let name = frame.code.name_at(idx)?;
                    frame.stack.push(Environment::get_or_null(&self.globals, name));
                }
                Op::StoreGlobal(idx) => {
                    let value = frame.pop()?;
                    let name = frame.code.name_at(idx)?.to_owned();
                    Environment::set_global(&self.globals, &name, value)?;
                }
                Op::LoadLocal(slot) => {
                    let value = frame.local(slot)?.clone();
                    frame.stack.push(value);
                }
                Op::StoreLocal(slot) => {
                    let value = frame.pop()?;
                    frame.set_local(slot, value)?;
                }
                Op::Add => self.binary(frame, Value::add)?,
                Op::Sub => self.binary(frame, Value::sub)?,
                Op::Mul => self.binary(frame, Value::mul)?,
                Op::Div => self.binary(frame, Value::div)?,
                Op::Mod => self.binary(frame, Value::modulo)?,
                Op::Eq => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    frame.stack.push(Value::Bool(a.falcon_eq(&b)));
                }
                Op::Neq => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    frame.stack.push(Value::Bool(!a.falcon_eq(&b)));
                }
                Op::Lt => self.compare(frame, |ord| ord == std::cmp::Ordering::Less)?,
                Op::Lte => self.compare(frame, |ord| ord != std::cmp::Ordering::Greater)?,
                Op::Gt => self.compare(frame, |ord| ord == std::cmp::Ordering::Greater)?,
                Op::Gte => self.compare(frame, |ord| ord != std::cmp::Ordering::Less)?,
                Op::And => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    frame.stack.push(if a.is_truthy() { b } else { a });
                }
                Op::Or => {
                    let b = frame.pop()?;
                    let a = frame.pop()?;
                    frame.stack.push(if a.is_truthy() { a } else { b });
                }
                Op::Not => {
                    let a = frame.pop()?;
                    frame.stack.push(Value::Bool(!a.is_truthy()));
                }
                Op::Jump(target) => frame.ip = target as usize,
                Op::JumpIfFalse(target) => {
                    if !frame.pop()?.is_truthy() {
                        frame.ip = target as usize;
                    }
                }
                Op::JumpIfTrue(target) => {
                    if frame.pop()?.is_truthy() {
                        frame.ip = target as usize;
                    }
                }
                Op::Call(argc) => {
                    let mut args: SmallVec<[Value; 4]> = SmallVec::with_capacity(argc as usize);
                    for _ in 0..argc {
                        args.push(frame.pop()?);
                    }
                    args.reverse();
                    let callee = frame.pop()?;
                    let result = self.call_value(&callee, args.into_vec())?;
                    frame.stack.push(result);
                }
                Op::Return => {
                    return Ok(frame.stack.pop().unwrap_or(Value::Null));
                }
                Op::LoadAttr(idx) => {
                    let base = frame.pop()?;
                    let name = frame.code.name_at(idx)?;
                    // absent attributes read as null
                    let value = builtins::attr_lookup(&base, name)?.unwrap_or(Value::Null);
                    frame.stack.push(value);
                }
                Op::StoreAttr(idx) => {
                    let value = frame.pop()?;
                    let base = frame.pop()?;
                    let name = frame.code.name_at(idx)?;
                    builtins::attr_store(&base, name, value.clone())?;
                    // the assigned value is the expression's result
                    frame.stack.push(value);
                }
                Op::MakeFunction(idx) => {
                    let function = match frame.code.const_at(idx)? {
                        Const::Code(code) => FunctionValue::Code { code: Rc::clone(code) },
                        Const::Function(decl) => FunctionValue::Ast {
                            decl: Rc::clone(decl),
                            closure: Rc::clone(&self.globals),
                        },
                        other => {
                            return Err(FalconError::internal(format!(
                                "MAKE_FUNCTION on non-function const {other:?}"
                            )));
                        }
                    };
                    frame.stack.push(Value::Function(Rc::new(function)));
                }
                Op::Print => {
                    let value = frame.pop()?;
                    self.print.stdout_write(value.to_display_string().into())?;
                    self.print.stdout_push('\n')?;
                }
                Op::CheckStep => {
                    let step_is_zero = matches!(frame.stack.last(), Some(Value::Int(0)))
                        || matches!(frame.stack.last(), Some(Value::Float(x)) if *x == 0.0);
                    if step_is_zero {
                        return Err(FalconError::runtime("for-loop step must not be zero"));
                    }
                }
                Op::IncLocal(slot) => {
                    // must stay observably identical to `x = x + 1`,
                    // string coercion included
                    let next = match frame.local(slot)? {
                        Value::Int(n) => Value::Int(
                            n.checked_add(1)
                                .ok_or_else(|| FalconError::runtime("integer overflow in '+'"))?,
                        ),
                        Value::Float(x) => Value::Float(x + 1.0),
                        other => other.add(&Value::Int(1))?,
                    };
                    frame.set_local(slot, next)?;
                }
                Op::JumpIfGeLocalImm { slot, limit, target } => {
                    // the fused guard keeps the `>=` comparison semantics
                    let at_limit = frame
                        .local(slot)?
                        .partial_cmp_values(&Value::Int(limit))?
                        .is_some_and(|ord| ord != std::cmp::Ordering::Less);
                    if at_limit {
                        frame.ip = target as usize;
                    }
                }
                Op::FastCount { slot, limit, target } => {
                    // the guard established counter < limit; write the value
                    // the unit-step loop would have reached, keeping the
                    // counter's numeric kind
                    let terminal = match frame.local(slot)? {
                        Value::Int(_) => Value::Int(limit),
                        Value::Float(x) => Value::Float(*x + (limit as f64 - *x).ceil()),
                        other => {
                            return Err(FalconError::runtime(format!(
                                "cannot compare {} with int",
                                other.kind_name()
                            )));
                        }
                    };
                    frame.set_local(slot, terminal)?;
                    frame.ip = target as usize;
                }
            }
        }
    }

    fn binary(&mut self, frame: &mut Frame, op: impl Fn(&Value, &Value) -> RunResult<Value>) -> RunResult<()> {
        let b = frame.pop()?;
        let a = frame.pop()?;
        frame.stack.push(op(&a, &b)?);
        Ok(())
    }

    fn compare(&mut self, frame: &mut Frame, accept: impl Fn(std::cmp::Ordering) -> bool) -> RunResult<()> {
        let b = frame.pop()?;
        let a = frame.pop()?;
        let result = a.partial_cmp_values(&b)?.is_some_and(accept);
        frame.stack.push(Value::Bool(result));
        Ok(())
    }

    /// Dispatches a call on the callee's kind: code-backed functions get
    /// a fresh frame, AST-backed functions go through the interpreter,
    /// native callables run directly.
    pub(crate) fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value> {
        match callee {
            Value::Function(function) => match function.as_ref() {
                FunctionValue::Code { code } => self.call_code(code, args),
                FunctionValue::Ast { decl, closure } => {
                    let mut interp = Interpreter::with_depth(
                        Rc::clone(&self.globals),
                        self.sandbox,
                        &mut *self.print,
                        &mut *self.tracer,
                        self.depth + 1,
                    );
                    interp.call_function_ast(decl, closure, args)
                }
            },
            Value::Native(f) => builtins::call_native(*f, args, self),
            Value::Bound(bound) => builtins::call_method(bound, args, self),
            other => Err(FalconError::runtime(format!(
                "attempted to call a non-callable value of type {}",
                other.kind_name()
            ))),
        }
    }

    /// Extra arguments are discarded; missing ones stay `null`.
    fn call_code(&mut self, code: &Rc<Code>, args: Vec<Value>) -> RunResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(FalconError::runtime("maximum call depth exceeded"));
        }
        self.tracer.on_call(code.name(), self.depth + 1);
        let mut locals = vec![Value::Null; code.nlocals() as usize];
        for (slot, arg) in locals
            .iter_mut()
            .zip(args.into_iter().take(code.argcount() as usize))
        {
            *slot = arg;
        }
        let mut frame = Frame::new(Rc::clone(code), locals);
        self.depth += 1;
        let result = self.run_frame(&mut frame);
        self.depth -= 1;
        result
    }
}

impl<W: PrintWriter> NativeCtx for Vm<'_, W> {
    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value> {
        Self::call_value(self, callee, args)
    }

    fn sandbox(&self) -> &Sandbox {
        self.sandbox
    }

    fn write_stdout(&mut self, text: &str) -> RunResult<()> {
        self.print.stdout_write(text.to_owned().into())
    }

    fn push_stdout(&mut self, ch: char) -> RunResult<()> {
        self.print.stdout_push(ch)
    }

    fn write_stderr(&mut self, text: &str) {
        self.print.stderr_write(text);
    }
}

#[cfg(test)]
mod tests {
    use ahash::AHashSet;

    use super::*;
    use crate::{
        builtins::{builtin_names, install_builtins},
        bytecode::compile_module,
        io::CollectStringPrint,
        parse::parse_source,
        tracer::NoopTracer,
    };

    /// Compiles and runs a module on the VM alone, returning its stdout.
    fn run_vm(source: &str) -> String {
        let globals = Environment::new_global();
        install_builtins(&globals).unwrap();
        let names: AHashSet<String> = builtin_names(&globals);
        let ast = parse_source(source).unwrap();
        let code = compile_module(&ast, "<test>", &names).unwrap();
        let sandbox = Sandbox::new("/tmp");
        let mut print = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(globals, &sandbox, &mut print, &mut tracer);
        vm.run_code(&code).unwrap();
        print.into_output()
    }

    fn run_vm_err(source: &str) -> FalconError {
        let globals = Environment::new_global();
        install_builtins(&globals).unwrap();
        let names: AHashSet<String> = builtin_names(&globals);
        let ast = parse_source(source).unwrap();
        let code = compile_module(&ast, "<test>", &names).unwrap();
        let sandbox = Sandbox::new("/tmp");
        let mut print = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut vm = Vm::new(globals, &sandbox, &mut print, &mut tracer);
        vm.run_code(&code).unwrap_err()
    }

    #[test]
    fn test_arithmetic_and_assignment() {
        assert_eq!(run_vm("var x := 2; x = x + 5; show(x);"), "7\n");
    }

    #[test]
    fn test_if_else() {
        assert_eq!(
            run_vm("var x := 10; if (x > 5) { show(\"big\"); } else { show(\"small\"); }"),
            "big\n"
        );
    }

    #[test]
    fn test_while_loop() {
        assert_eq!(
            run_vm("var i := 0; var s := 0; while (i < 4) { s = s + i; i = i + 1; } show(s);"),
            "6\n"
        );
    }

    #[test]
    fn test_function_call_and_recursion() {
        assert_eq!(
            run_vm("function add(a: int, b: int): int { return a + b; } show(add(7, 8));"),
            "15\n"
        );
        assert_eq!(
            run_vm("function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } show(fib(10));"),
            "55\n"
        );
    }

    #[test]
    fn test_closure_via_ast_fallback() {
        let source = "function make() { var n := 0; function bump() { n = n + 1; return n; } return bump; } \
                      var f := make(); show(f()); show(f()); show(f());";
        assert_eq!(run_vm(source), "1\n2\n3\n");
    }

    #[test]
    fn test_for_loop_inclusive_bound() {
        assert_eq!(run_vm("var s := 0; for var i := 1 to 4 { s = s + i; } show(s);"), "10\n");
        assert_eq!(run_vm("for var i := 3 to 1 step -1 { show(i); }"), "3\n2\n1\n");
        // a positive step never reaches a smaller end
        assert_eq!(run_vm("for var i := 5 to 1 { show(i); } show(\"done\");"), "done\n");
    }

    #[test]
    fn test_for_step_zero_is_runtime_error() {
        let err = run_vm_err("for var i := 0 to 3 step 0 { }");
        assert!(err.message().contains("step must not be zero"));
    }

    #[test]
    fn test_loop_break_and_fused_counter() {
        assert_eq!(
            run_vm("var i := 0; loop { if (i >= 3) { break; } show(i); i = i + 1; }"),
            "0\n1\n2\n"
        );
        // fused pure-counter form inside a function
        assert_eq!(
            run_vm("function f() { var i := 0; loop { if (i >= 100000) { break; } i = i + 1; } return i; } show(f());"),
            "100000\n"
        );
    }

    #[test]
    fn test_inc_local_follows_string_coercion() {
        // the fused increment must behave exactly like `i = i + 1`
        assert_eq!(
            run_vm("function f() { var i := \"x\"; i = i + 1; return i; } show(f());"),
            "x1\n"
        );
    }

    #[test]
    fn test_inc_local_on_null_errors_like_plus() {
        let err = run_vm_err("function f() { var i; i = i + 1; return i; } f();");
        assert!(err.message().contains("requires numbers"));
    }

    #[test]
    fn test_fast_count_preserves_float_counter() {
        // a float counter keeps its kind and its true terminal value
        assert_eq!(
            run_vm("function f() { var i := 0.5; loop { if (i >= 10) { break; } i = i + 1; } return i; } show(f());"),
            "10.5\n"
        );
        assert_eq!(
            run_vm("function f() { var i := 0.0; loop { if (i >= 10) { break; } i = i + 1; } return i; } show(f());"),
            "10.0\n"
        );
    }

    #[test]
    fn test_fused_guard_on_non_number_errors_like_compare() {
        let err = run_vm_err("function f() { var i := \"x\"; loop { if (i >= 10) { break; } show(i); i = i + 1; } } f();");
        assert!(err.message().contains("cannot compare"));
    }

    #[test]
    fn test_short_circuit_preserves_value() {
        assert_eq!(run_vm("show(0 && boom());"), "0\n");
        assert_eq!(run_vm("show(7 || boom());"), "7\n");
        assert_eq!(run_vm("show(null || \"fallback\");"), "fallback\n");
    }

    #[test]
    fn test_attribute_error_on_non_object() {
        let err = run_vm_err("var x := 1; x.name;");
        assert!(err.message().contains("attribute"));
    }

    #[test]
    fn test_say_uses_print_opcode() {
        assert_eq!(run_vm("say 1 + 2;"), "3\n");
    }

    #[test]
    fn test_arity_padding_and_truncation() {
        assert_eq!(
            run_vm("function f(a, b) { return toString(a) + \" \" + toString(b); } show(f(1)); show(f(1, 2, 3));"),
            "1 null\n1 2\n"
        );
    }

    #[test]
    fn test_call_non_callable_is_runtime_error() {
        let err = run_vm_err("var x := 3; x();");
        assert!(err.message().contains("non-callable"));
    }

    #[test]
    fn test_string_concat_in_vm() {
        assert_eq!(run_vm("show(\"n=\" + 42);"), "n=42\n");
    }

    #[test]
    fn test_division_semantics() {
        assert_eq!(run_vm("show(7 / 2);"), "3.5\n");
        assert_eq!(run_vm("show(7 % 3);"), "1\n");
        let err = run_vm_err("show(1 / 0);");
        assert!(err.message().contains("division by zero"));
    }

    #[test]
    fn test_undefined_global_reads_null() {
        assert_eq!(run_vm("show(missing);"), "null\n");
    }

    #[test]
    fn test_mutual_recursion_through_globals() {
        let source = "
            function is_even(n) { if (n == 0) { return true; } return is_odd(n - 1); }
            function is_odd(n) { if (n == 0) { return false; } return is_even(n - 1); }
            show(is_even(10)); show(is_odd(7));
        ";
        assert_eq!(run_vm(source), "true\ntrue\n");
    }
}
