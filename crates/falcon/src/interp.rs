//! Tree-walking interpreter.
//!
//! Direct-style evaluator over the AST, sharing the value model, builtins,
//! and globals with the VM. It runs AST-backed functions (closures) on
//! behalf of the VM and the whole module when the bytecode path falls
//! back. Control flow uses an explicit [`Flow`] enum rather than host
//! exceptions; `throw` travels as a value-carrying error until an
//! enclosing `catch` binds it.

use std::rc::Rc;

use crate::{
    ast::{ArmBody, BinOp, Expr, FunctionDecl, Lit, MatchNode, Stmt, UnOp},
    builtins::{self, NativeCtx},
    bytecode::{Vm, MAX_CALL_DEPTH},
    env::{EnvRef, Environment},
    error::{ErrorKind, FalconError, RunResult},
    io::PrintWriter,
    pattern::match_pattern,
    sandbox::Sandbox,
    tracer::ExecTracer,
    value::{FunctionValue, Value},
};

/// Non-error control signals produced by statement execution.
enum Flow {
    Normal,
    Break,
    Return(Value),
}

/// The fallback executor.
pub struct Interpreter<'a, W: PrintWriter> {
    globals: EnvRef,
    sandbox: &'a Sandbox,
    print: &'a mut W,
    tracer: &'a mut dyn ExecTracer,
    depth: usize,
}

impl<'a, W: PrintWriter> Interpreter<'a, W> {
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

    /// Interprets a whole module in the shared globals environment.
    pub fn interpret(&mut self, stmts: &[Stmt]) -> RunResult<()> {
        let globals = Rc::clone(&self.globals);
        hoist_vars(stmts, &globals);
        for stmt in stmts {
            match self.exec(stmt, &globals)? {
                Flow::Normal => {}
                Flow::Break => return Err(FalconError::runtime("'break' outside loop")),
                // a top-level return simply stops the module
                Flow::Return(_) => break,
            }
        }
        Ok(())
    }

    /// The VM/interpreter bridge: calls an AST-backed function.
    ///
    /// Creates a child environment of the captured closure, hoists `var`
    /// declarations, pads missing arguments with `null` and discards
    /// extras, and binds the function's own name for recursion.
    pub fn call_function_ast(
        &mut self,
        decl: &Rc<FunctionDecl>,
        closure: &EnvRef,
        args: Vec<Value>,
    ) -> RunResult<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(FalconError::runtime("maximum call depth exceeded"));
        }
        self.tracer.on_call(decl.display_name(), self.depth + 1);
        let local = Environment::function_child(closure);
        hoist_vars(&decl.body, &local);
        let mut args = args.into_iter();
        for param in &decl.params {
            let value = args.next().unwrap_or(Value::Null);
            Environment::define(&local, &param.name, value, false, param.ann.as_deref())?;
        }
        if let Some(name) = &decl.name {
            let recursive = Value::Function(Rc::new(FunctionValue::Ast {
                decl: Rc::clone(decl),
                closure: Rc::clone(closure),
            }));
            Environment::define(&local, name, recursive, false, None)?;
        }
        self.depth += 1;
        let result = self.run_body(&decl.body, &local);
        self.depth -= 1;
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Break => Err(FalconError::runtime("'break' outside loop")),
            Flow::Normal => Ok(Value::Null),
        }
    }

    fn run_body(&mut self, stmts: &[Stmt], env: &EnvRef) -> RunResult<Flow> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &EnvRef) -> RunResult<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Let {
                name,
                init,
                is_const,
                is_var,
                ann,
            } => {
                let value = match init {
                    Some(init) => self.eval(init, env)?,
                    None => Value::Null,
                };
                if *is_var {
                    Environment::define_var(env, name, value, ann.as_deref())?;
                } else {
                    Environment::define(env, name, value, *is_const, ann.as_deref())?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Say(expr) => {
                let value = self.eval(expr, env)?;
                builtins::call_native(builtins::NativeFn::Show, vec![value], self)?;
                Ok(Flow::Normal)
            }
            Stmt::Block(body) => {
                let inner = Environment::child(env);
                self.run_body(body, &inner)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond, env)?.is_truthy() {
                    self.exec(then_branch, env)
                } else if let Some(else_branch) = else_branch {
                    self.exec(else_branch, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond, env)?.is_truthy() {
                    match self.exec(body, env)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For {
                name,
                start,
                end,
                step,
                body,
            } => self.exec_for(name, start, end, step.as_ref(), body, env),
            Stmt::Loop { body } => {
                loop {
                    let inner = Environment::child(env);
                    match self.run_body(body, &inner)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Break(_) => Ok(Flow::Break),
            Stmt::Function(decl) => {
                let name = decl.name.as_deref().expect("function statements are named");
                let function = Value::Function(Rc::new(FunctionValue::Ast {
                    decl: Rc::clone(decl),
                    closure: Rc::clone(env),
                }));
                Environment::define(env, name, function, false, None)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(value) => self.eval(value, env)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(FalconError::thrown(value))
            }
            Stmt::TryCatch { body, name, handler } => {
                let inner = Environment::child(env);
                match self.run_body(body, &inner) {
                    Ok(flow) => Ok(flow),
                    Err(err) if err.kind() == ErrorKind::Thrown => {
                        let thrown = err.into_thrown_value().unwrap_or(Value::Null);
                        let catch_env = Environment::child(env);
                        Environment::define(&catch_env, name, thrown, false, None)?;
                        self.run_body(handler, &catch_env)
                    }
                    Err(err) => Err(err),
                }
            }
            Stmt::Match(node) => {
                let (_, flow) = self.eval_match(node, env, false)?;
                Ok(flow)
            }
        }
    }

    /// `for var i := start to end [step k]`: the bound is inclusive and
    /// the sign of the step picks the comparison; step 0 is an error.
    fn exec_for(
        &mut self,
        name: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
        env: &EnvRef,
    ) -> RunResult<Flow> {
        let mut current = self.eval(start, env)?;
        let end = self.eval(end, env)?;
        let step = match step {
            Some(step) => self.eval(step, env)?,
            None => Value::Int(1),
        };
        let step_sign = step
            .as_number()
            .ok_or_else(|| FalconError::runtime("for-loop step must be a number"))?;
        if step_sign == 0.0 {
            return Err(FalconError::runtime("for-loop step must not be zero"));
        }
        // the iterator lives in the surrounding scope, like the VM's slot
        Environment::define(env, name, current.clone(), false, None)?;
        loop {
            let ordering = current.partial_cmp_values(&end)?;
            let keep_going = match ordering {
                Some(ord) => {
                    if step_sign > 0.0 {
                        ord != std::cmp::Ordering::Greater
                    } else {
                        ord != std::cmp::Ordering::Less
                    }
                }
                None => false,
            };
            if !keep_going {
                break;
            }
            let inner = Environment::child(env);
            match self.run_body(body, &inner)? {
                Flow::Normal => {}
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
            }
            current = Environment::get(env, name)?.add(&step)?;
            Environment::assign(env, name, current.clone())?;
        }
        Ok(Flow::Normal)
    }

    /// Shared arm selection for match statements and expressions.
    ///
    /// Returns the arm's value (expression context) and the control flow
    /// escaping a block arm (statement context). With no matching arm a
    /// statement is a no-op and an expression yields `null`.
    fn eval_match(&mut self, node: &MatchNode, env: &EnvRef, want_value: bool) -> RunResult<(Value, Flow)> {
        let value = self.eval(&node.value, env)?;
        for arm in &node.arms {
            let mut bindings = Vec::new();
            if !match_pattern(&arm.pattern, &value, &mut bindings) {
                continue;
            }
            let arm_env = Environment::child(env);
            for (name, bound) in bindings {
                Environment::define(&arm_env, &name, bound, false, None)?;
            }
            if let Some(guard) = &arm.guard {
                if !self.eval(guard, &arm_env)?.is_truthy() {
                    continue;
                }
            }
            return match &arm.body {
                ArmBody::Expr(expr) => {
                    let result = self.eval(expr, &arm_env)?;
                    Ok((result, Flow::Normal))
                }
                ArmBody::Block(body) => {
                    let flow = self.run_body(body, &arm_env)?;
                    if want_value && !matches!(flow, Flow::Normal) {
                        return Err(FalconError::runtime("cannot break or return out of a match expression"));
                    }
                    Ok((Value::Null, flow))
                }
            };
        }
        Ok((Value::Null, Flow::Normal))
    }

    fn eval(&mut self, expr: &Expr, env: &EnvRef) -> RunResult<Value> {
        match expr {
            Expr::Literal(lit) => Ok(lit_value(lit)),
            Expr::ListLit(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Value::list(values))
            }
            Expr::TupleLit(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<RunResult<Vec<_>>>()?;
                Ok(Value::tuple(values))
            }
            Expr::SetLit(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<RunResult<Vec<_>>>()?;
                Value::set_from(values)
            }
            Expr::DictLit(entries) => {
                let mut map = indexmap::IndexMap::with_capacity(entries.len());
                for (key, value_expr) in entries {
                    map.insert(key.clone(), self.eval(value_expr, env)?);
                }
                Ok(Value::dict(map))
            }
            Expr::ArrayLit(size) => {
                let size = self.eval(size, env)?.expect_int("array size")?;
                Value::fixed_array(size)
            }
            Expr::Variable(name) => Environment::get(env, name),
            Expr::Grouping(inner) => self.eval(inner, env),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, env)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnOp::Neg => value.negate(),
                }
            }
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, env),
            Expr::Call { callee, args } => {
                let callee = self.eval(callee, env)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, env))
                    .collect::<RunResult<Vec<_>>>()?;
                self.call_value(&callee, args)
            }
            Expr::Member { base, name } => {
                let base = self.eval(base, env)?;
                match builtins::attr_lookup(&base, name)? {
                    Some(value) => Ok(value),
                    None => Err(FalconError::runtime(format!(
                        "attribute '{name}' not found on {}",
                        base.kind_name()
                    ))),
                }
            }
            Expr::Subscript { base, index } => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                subscript_get(&base, &index)
            }
            Expr::Function(decl) => Ok(Value::Function(Rc::new(FunctionValue::Ast {
                decl: Rc::clone(decl),
                closure: Rc::clone(env),
            }))),
            Expr::Assign { target, value } => {
                let value = self.eval(value, env)?;
                self.assign_target(target, value.clone(), env)?;
                Ok(value)
            }
            Expr::Match(node) => {
                let (value, _) = self.eval_match(node, env, true)?;
                Ok(value)
            }
        }
    }

    fn eval_binary(&mut self, left: &Expr, op: BinOp, right: &Expr, env: &EnvRef) -> RunResult<Value> {
        // short-circuit forms preserve the deciding operand's value
        if op == BinOp::And {
            let left = self.eval(left, env)?;
            if !left.is_truthy() {
                return Ok(left);
            }
            return self.eval(right, env);
        }
        if op == BinOp::Or {
            let left = self.eval(left, env)?;
            if left.is_truthy() {
                return Ok(left);
            }
            return self.eval(right, env);
        }
        let a = self.eval(left, env)?;
        let b = self.eval(right, env)?;
        match op {
            BinOp::Add => a.add(&b),
            BinOp::Sub => a.sub(&b),
            BinOp::Mul => a.mul(&b),
            BinOp::Div => a.div(&b),
            BinOp::Mod => a.modulo(&b),
            BinOp::Pow => a.pow(&b),
            BinOp::Eq => Ok(Value::Bool(a.falcon_eq(&b))),
            BinOp::Neq => Ok(Value::Bool(!a.falcon_eq(&b))),
            BinOp::Lt => Ok(Value::Bool(
                a.partial_cmp_values(&b)?.is_some_and(|ord| ord == std::cmp::Ordering::Less),
            )),
            BinOp::Lte => Ok(Value::Bool(
                a.partial_cmp_values(&b)?.is_some_and(|ord| ord != std::cmp::Ordering::Greater),
            )),
            BinOp::Gt => Ok(Value::Bool(
                a.partial_cmp_values(&b)?.is_some_and(|ord| ord == std::cmp::Ordering::Greater),
            )),
            BinOp::Gte => Ok(Value::Bool(
                a.partial_cmp_values(&b)?.is_some_and(|ord| ord != std::cmp::Ordering::Less),
            )),
            BinOp::And | BinOp::Or => unreachable!("short-circuit handled above"),
        }
    }

    fn assign_target(&mut self, target: &Expr, value: Value, env: &EnvRef) -> RunResult<()> {
        match target {
            Expr::Variable(name) => Environment::assign(env, name, value),
            Expr::Member { base, name } => {
                let base = self.eval(base, env)?;
                builtins::attr_store(&base, name, value)
            }
            Expr::Subscript { base, index } => {
                let base = self.eval(base, env)?;
                let index = self.eval(index, env)?;
                subscript_set(&base, &index, value)
            }
            Expr::Grouping(inner) => self.assign_target(inner, value, env),
            _ => Err(FalconError::runtime("invalid assignment target")),
        }
    }

    /// Call dispatch shared with the VM: AST functions run here, compiled
    /// functions spin a VM over the same globals, natives run directly.
    pub(crate) fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> RunResult<Value> {
        match callee {
            Value::Function(function) => match function.as_ref() {
                FunctionValue::Ast { decl, closure } => self.call_function_ast(decl, closure, args),
                FunctionValue::Code { .. } => {
                    let mut vm = Vm::with_depth(
                        Rc::clone(&self.globals),
                        self.sandbox,
                        &mut *self.print,
                        &mut *self.tracer,
                        self.depth + 1,
                    );
                    vm.call_value(callee, args)
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
}

impl<W: PrintWriter> NativeCtx for Interpreter<'_, W> {
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

/// Pre-defines `var` names (not `let`, not `const`) to `null` in the
/// nearest function scope; initializers still run at their original
/// position. Does not recurse into nested functions.
fn hoist_vars(stmts: &[Stmt], env: &EnvRef) {
    fn collect(stmts: &[Stmt], out: &mut Vec<String>) {
        for stmt in stmts {
            match stmt {
                Stmt::Let { name, is_var: true, .. } => out.push(name.clone()),
                Stmt::Block(body) | Stmt::Loop { body } => collect(body, out),
                Stmt::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    collect(std::slice::from_ref(then_branch), out);
                    if let Some(else_branch) = else_branch {
                        collect(std::slice::from_ref(else_branch), out);
                    }
                }
                Stmt::While { body, .. } => collect(std::slice::from_ref(body), out),
                Stmt::For { body, .. } => collect(body, out),
                Stmt::TryCatch { body, handler, .. } => {
                    collect(body, out);
                    collect(handler, out);
                }
                Stmt::Match(node) => {
                    for arm in &node.arms {
                        if let ArmBody::Block(body) = &arm.body {
                            collect(body, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }
    let mut names = Vec::new();
    collect(stmts, &mut names);
    for name in names {
        Environment::define_hoisted(env, &name);
    }
}

fn lit_value(lit: &Lit) -> Value {
    match lit {
        Lit::Null => Value::Null,
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Int(n) => Value::Int(*n),
        Lit::Float(x) => Value::Float(*x),
        Lit::Str(s) => Value::str(s.clone()),
    }
}

/// `a[i]` reads: integer indices with negative wrap for sequences,
/// string keys for dicts, character access for strings.
fn subscript_get(base: &Value, index: &Value) -> RunResult<Value> {
    match base {
        Value::List(items) | Value::Array(items) => {
            let items = items.borrow();
            let idx = wrap_index(index.expect_int("index")?, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = wrap_index(index.expect_int("index")?, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = wrap_index(index.expect_int("index")?, chars.len())?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::Dict(entries) => match index {
            Value::Str(key) => entries
                .borrow()
                .get(key.as_ref())
                .cloned()
                .ok_or_else(|| FalconError::runtime(format!("key not found: '{key}'"))),
            other => Err(FalconError::runtime(format!(
                "dict key must be a string, got {}",
                other.kind_name()
            ))),
        },
        other => Err(FalconError::runtime(format!("{} is not subscriptable", other.kind_name()))),
    }
}

/// `a[i] = v` writes into lists, fixed arrays, and dicts.
fn subscript_set(base: &Value, index: &Value, value: Value) -> RunResult<()> {
    match base {
        Value::List(items) | Value::Array(items) => {
            let mut items = items.borrow_mut();
            let idx = wrap_index(index.expect_int("index")?, items.len())?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(entries) => match index {
            Value::Str(key) => {
                entries.borrow_mut().insert(key.to_string(), value);
                Ok(())
            }
            other => Err(FalconError::runtime(format!(
                "dict key must be a string, got {}",
                other.kind_name()
            ))),
        },
        Value::Tuple(_) => Err(FalconError::runtime("tuple does not support assignment")),
        other => Err(FalconError::runtime(format!(
            "{} does not support subscript assignment",
            other.kind_name()
        ))),
    }
}

fn wrap_index(index: i64, len: usize) -> RunResult<usize> {
    let len_i64 = i64::try_from(len).map_err(|_| FalconError::runtime("collection is too large"))?;
    let wrapped = if index < 0 { index + len_i64 } else { index };
    if wrapped < 0 || wrapped >= len_i64 {
        return Err(FalconError::runtime("index out of bounds"));
    }
    Ok(wrapped as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builtins::install_builtins, io::CollectStringPrint, parse::parse_source, tracer::NoopTracer};

    /// Runs a module on the interpreter alone, returning its stdout.
    fn run_interp(source: &str) -> String {
        run_interp_result(source).unwrap()
    }

    fn run_interp_result(source: &str) -> Result<String, FalconError> {
        let globals = Environment::new_global();
        install_builtins(&globals).unwrap();
        let ast = parse_source(source).unwrap();
        let sandbox = Sandbox::new("/tmp");
        let mut print = CollectStringPrint::new();
        let mut tracer = NoopTracer;
        let mut interp = Interpreter::new(globals, &sandbox, &mut print, &mut tracer);
        interp.interpret(&ast)?;
        Ok(print.into_output())
    }

    #[test]
    fn test_basic_statements() {
        assert_eq!(run_interp("var x := 2; x = x + 5; show(x);"), "7\n");
        assert_eq!(
            run_interp("var x := 10; if (x > 5) { show(\"big\"); } else { show(\"small\"); }"),
            "big\n"
        );
    }

    #[test]
    fn test_closures_count() {
        let source = "function make() { var n := 0; function bump() { n = n + 1; return n; } return bump; } \
                      var f := make(); show(f()); show(f()); show(f());";
        assert_eq!(run_interp(source), "1\n2\n3\n");
    }

    #[test]
    fn test_two_closures_are_independent() {
        let source = "function make() { var n := 0; function bump() { n = n + 1; return n; } return bump; } \
                      var a := make(); var b := make(); show(a()); show(a()); show(b());";
        assert_eq!(run_interp(source), "1\n2\n1\n");
    }

    #[test]
    fn test_collections_and_subscripts() {
        assert_eq!(run_interp("var xs := [1, 2, 3]; xs[0] = 9; show(xs[0], xs[-1], len(xs));"), "9 3 3\n");
        assert_eq!(run_interp("var d := { a: 1 }; d[\"b\"] = 2; show(d.a, d[\"b\"]);"), "1 2\n");
        assert_eq!(run_interp("var t := (1, 2); show(t[1]);"), "2\n");
        assert_eq!(run_interp("var s := \"hello\"; show(s[1], s[-1]);"), "e o\n");
        assert_eq!(run_interp("var a := array[3]; a[0] = 5; show(a[0], a.length());"), "5 3\n");
        assert_eq!(run_interp("var s := set{1, 2}; s.add(3); show(s.contains(3), len(s));"), "true 3\n");
    }

    #[test]
    fn test_dict_methods() {
        assert_eq!(
            run_interp("var d := { a: 1, b: 2 }; show(d.keys(), d.values(), d.get(\"z\", 0));"),
            "[\"a\",\"b\"] [1,2] 0\n"
        );
    }

    #[test]
    fn test_attribute_on_dict_reads_slot_or_null_via_member() {
        let err = run_interp_result("var x := 1; show(x.name);").unwrap_err();
        assert!(err.message().contains("attribute"));
    }

    #[test]
    fn test_try_catch_throw() {
        assert_eq!(
            run_interp("try { throw \"boom\"; show(\"unreached\"); } catch (e) { show(\"caught\", e); }"),
            "caught boom\n"
        );
        // uncaught throw surfaces as an error
        let err = run_interp_result("throw 42;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Thrown);
    }

    #[test]
    fn test_runtime_errors_are_not_caught_by_catch() {
        let err = run_interp_result("try { missing_fn(); } catch (e) { show(\"caught\"); }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_match_statement_and_expression() {
        let source = "function d(x) { return match x { case 0: \"zero\"; case 1: \"one\"; case _: \"other\"; }; } \
                      show(d(0)); show(d(1)); show(d(5));";
        assert_eq!(run_interp(source), "zero\none\nother\n");
    }

    #[test]
    fn test_match_guards_and_bindings() {
        let source = "function f(x) { return match x { case [a] if a > 10: \"big single\"; case [a]: a; case _: \"other\"; }; } \
                      show(f([42])); show(f([5])); show(f([1, 2]));";
        assert_eq!(run_interp(source), "big single\n5\nother\n");
    }

    #[test]
    fn test_match_type_patterns() {
        let source = "function t(x) { return match x { case int: \"integer\"; case string: \"text\"; case _: \"other\"; }; } \
                      show(t(42)); show(t(\"hi\")); show(t(true));";
        assert_eq!(run_interp(source), "integer\ntext\nother\n");
    }

    #[test]
    fn test_unmatched_match_statement_is_noop_expression_is_null() {
        assert_eq!(run_interp("match 9 { case 0: show(\"no\"); } show(\"after\");"), "after\n");
        assert_eq!(run_interp("var x := match 9 { case 0: 1; }; show(x);"), "null\n");
    }

    #[test]
    fn test_var_hoisting() {
        // the var is visible (as null) before its initializer runs
        assert_eq!(run_interp("show(x); var x := 3; show(x);"), "null\n3\n");
        // a var declared inside a block escapes to function scope
        assert_eq!(run_interp("function f() { { var y := 2; } return y; } show(f());"), "2\n");
    }

    #[test]
    fn test_let_is_block_scoped_in_functions() {
        let err = run_interp_result("function f() { { let y := 2; } return y; } show(f());").unwrap_err();
        assert!(err.message().contains("undefined variable 'y'"));
    }

    #[test]
    fn test_const_rejects_reassignment() {
        let err = run_interp_result("const k := 1; k = 2;").unwrap_err();
        assert!(err.message().contains("constant"));
    }

    #[test]
    fn test_annotation_guard_on_assignment() {
        let err = run_interp_result("var n: int := 1; n = \"no\";").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_for_loop_semantics() {
        assert_eq!(run_interp("var s := 0; for var i := 1 to 4 { s = s + i; } show(s, i);"), "10 5\n");
        assert_eq!(run_interp("for var i := 3 to 1 step -1 { show(i); }"), "3\n2\n1\n");
        let err = run_interp_result("for var i := 0 to 3 step 0 { }").unwrap_err();
        assert!(err.message().contains("step must not be zero"));
    }

    #[test]
    fn test_loop_forms() {
        assert_eq!(run_interp("var i := 0; loop { if (i >= 2) { break; } show(i); i = i + 1; }"), "0\n1\n");
        assert_eq!(run_interp("var i := 0; loop i < 2 { show(i); i = i + 1; }"), "0\n1\n");
    }

    #[test]
    fn test_break_outside_loop_is_runtime_error() {
        let err = run_interp_result("break;").unwrap_err();
        assert!(err.message().contains("'break' outside loop"));
    }

    #[test]
    fn test_pow_operator() {
        assert_eq!(run_interp("show(2 ** 10);"), "1024\n");
        assert_eq!(run_interp("show(2 ** 3 ** 2);"), "512\n");
    }

    #[test]
    fn test_promise_stub() {
        let source = "
            var p := Promise(function(res, rej) { res(41); });
            p.then(function(v) { show(\"got\", v); });
            Promise.resolve(1).then(function(v) { show(\"now\", v); });
            var q := Promise(function(res, rej) { rej(\"bad\"); });
            q.catch(function(e) { show(\"err\", e); });
        ";
        assert_eq!(run_interp(source), "got 41\nnow 1\nerr bad\n");
    }

    #[test]
    fn test_promise_deferred_callbacks_run_on_settle() {
        let source = "
            var saved := null;
            var p := Promise(function(res, rej) { saved = res; });
            p.then(function(v) { show(\"later\", v); });
            show(\"before\");
            saved(9);
        ";
        assert_eq!(run_interp(source), "before\nlater 9\n");
    }

    #[test]
    fn test_console_object() {
        assert_eq!(run_interp("console.log(\"hi\", 2);"), "hi 2\n");
        assert_eq!(run_interp("console::log(\"legacy\");"), "legacy\n");
    }

    #[test]
    fn test_named_function_expression_recurses() {
        let source = "var f := function fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); }; show(f(5));";
        assert_eq!(run_interp(source), "120\n");
    }

    #[test]
    fn test_assignment_is_right_associative_expression() {
        assert_eq!(run_interp("var a := 0; var b := 0; a = b = 5; show(a, b);"), "5 5\n");
    }

    #[test]
    fn test_string_subscript_and_len() {
        assert_eq!(run_interp("show(len(\"héllo\"));"), "5\n");
    }

    #[test]
    fn test_to_string_and_type_of() {
        assert_eq!(run_interp("show(toString(null), toString(true), toString(2.5));"), "null true 2.5\n");
        assert_eq!(run_interp("show(typeOf(null), typeOf(1), typeOf([1]), typeOf(show));"), "null number array function\n");
    }

    #[test]
    fn test_match_pattern_builtin() {
        assert_eq!(run_interp("show(matchPattern([1, 2], [1, 2]), matchPattern([1], [2]));"), "true false\n");
    }

    #[test]
    fn test_range_builtin() {
        assert_eq!(run_interp("show(range(3), range(1, 4), range(6, 0, -2));"), "[0,1,2] [1,2,3] [6,4,2]\n");
    }
}
