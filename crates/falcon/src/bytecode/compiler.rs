//! AST to bytecode compiler.
//!
//! Two responsibilities: flattening statements into linear instruction
//! streams per code object, and deciding per function whether it can be
//! code-backed.
//!
//! A function is code-backed when its free-name set (referenced minus
//! defined minus compile-time globals) is empty and no nested function
//! captures one of its locals: a VM frame has no environment to close
//! over, so a capturing parent stays AST-backed and runs on the tree
//! interpreter. Constructs with no opcode counterpart (collection
//! literals, subscripts, `match`, `try`/`throw`) raise compile errors; at
//! module level the runner converts that into the interpreter fallback,
//! inside a function body it demotes that one function to AST-backed.

use std::rc::Rc;

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{ArmBody, BinOp, Expr, FunctionDecl, Lit, Stmt, UnOp},
    error::{FalconError, RunResult},
};

use super::{
    builder::{CodeBuilder, JumpLabel},
    code::{Code, Const},
    op::Op,
};

/// Compiles a module into a top-level code object.
///
/// `globals` are the names known at compile time: the builtins plus every
/// module-level declaration (pre-scanned, so forward references between
/// functions stay code-backed).
pub fn compile_module(stmts: &[Stmt], name: &str, globals: &AHashSet<String>) -> RunResult<Rc<Code>> {
    let mut all_globals = globals.clone();
    collect_declared(stmts, &mut all_globals);
    let compiler = Compiler { globals: all_globals };
    let mut ctx = FnCtx::module();
    for stmt in stmts {
        compiler.compile_stmt(stmt, &mut ctx)?;
    }
    let null_idx = ctx.builder.add_const(Const::Null);
    ctx.builder.emit(Op::LoadConst(null_idx));
    ctx.builder.emit(Op::Return);
    Ok(ctx.builder.build(name.to_owned(), 0, 0))
}

struct Compiler {
    globals: AHashSet<String>,
}

/// Where a variable reference resolves to.
enum VarRef {
    Local(u16),
    Global(u16),
}

struct LoopCtx {
    break_jumps: Vec<JumpLabel>,
}

enum CtxKind {
    Module,
    Function,
}

struct FnCtx {
    builder: CodeBuilder,
    kind: CtxKind,
    /// Block scopes for `let`/`const`, innermost last.
    scopes: Vec<AHashMap<String, u16>>,
    /// Function-scoped slots: parameters, `var` names, for-loop iterators.
    var_slots: AHashMap<String, u16>,
    const_locals: AHashSet<u16>,
    next_slot: u16,
    loops: Vec<LoopCtx>,
    for_counter: usize,
}

impl FnCtx {
    fn module() -> Self {
        Self {
            builder: CodeBuilder::new(),
            kind: CtxKind::Module,
            scopes: Vec::new(),
            var_slots: AHashMap::new(),
            const_locals: AHashSet::new(),
            next_slot: 0,
            loops: Vec::new(),
            for_counter: 0,
        }
    }

    fn function(params: &[crate::ast::Param]) -> RunResult<Self> {
        let mut ctx = Self {
            kind: CtxKind::Function,
            ..Self::module()
        };
        for param in params {
            let slot = ctx.alloc_slot()?;
            ctx.var_slots.insert(param.name.clone(), slot);
        }
        Ok(ctx)
    }

    fn alloc_slot(&mut self) -> RunResult<u16> {
        let slot = self.next_slot;
        self.next_slot = self
            .next_slot
            .checked_add(1)
            .ok_or_else(|| FalconError::compile("too many local variables"))?;
        Ok(slot)
    }

    /// Resolves a name to a local slot (function contexts only).
    fn resolve(&self, name: &str) -> Option<u16> {
        for scope in self.scopes.iter().rev() {
            if let Some(slot) = scope.get(name) {
                return Some(*slot);
            }
        }
        self.var_slots.get(name).copied()
    }

    fn emit_load_var(&mut self, var: &VarRef) {
        match var {
            VarRef::Local(slot) => self.builder.emit(Op::LoadLocal(*slot)),
            VarRef::Global(idx) => self.builder.emit(Op::LoadGlobal(*idx)),
        };
    }

    fn emit_store_var(&mut self, var: &VarRef) {
        match var {
            VarRef::Local(slot) => self.builder.emit(Op::StoreLocal(*slot)),
            VarRef::Global(idx) => self.builder.emit(Op::StoreGlobal(*idx)),
        };
    }

    fn var_ref(&mut self, name: &str) -> VarRef {
        match self.resolve(name) {
            Some(slot) => VarRef::Local(slot),
            None => VarRef::Global(self.builder.name_idx(name)),
        }
    }
}

impl Compiler {
    fn compile_stmt(&self, stmt: &Stmt, ctx: &mut FnCtx) -> RunResult<()> {
        match stmt {
            Stmt::Expr(Expr::Assign { target, value }) => self.compile_assign(target, value, false, ctx),
            Stmt::Expr(expr) => {
                self.compile_expr(expr, ctx)?;
                ctx.builder.emit(Op::Pop);
                Ok(())
            }
            Stmt::Let {
                name,
                init,
                is_const,
                is_var,
                ..
            } => self.compile_let(name, init.as_ref(), *is_const, *is_var, ctx),
            Stmt::Say(expr) => {
                self.compile_expr(expr, ctx)?;
                ctx.builder.emit(Op::Print);
                Ok(())
            }
            Stmt::Block(body) => {
                // module-level blocks flatten into globals; function
                // blocks open a lexical slot scope
                if matches!(ctx.kind, CtxKind::Function) {
                    ctx.scopes.push(AHashMap::new());
                }
                for s in body {
                    self.compile_stmt(s, ctx)?;
                }
                if matches!(ctx.kind, CtxKind::Function) {
                    ctx.scopes.pop();
                }
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.compile_expr(cond, ctx)?;
                let jump_else = ctx.builder.emit_jump(Op::JumpIfFalse(0));
                self.compile_stmt(then_branch, ctx)?;
                match else_branch {
                    Some(else_branch) => {
                        let jump_end = ctx.builder.emit_jump(Op::Jump(0));
                        ctx.builder.patch_jump(jump_else);
                        self.compile_stmt(else_branch, ctx)?;
                        ctx.builder.patch_jump(jump_end);
                    }
                    None => ctx.builder.patch_jump(jump_else),
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                let head = ctx.builder.current_offset();
                self.compile_expr(cond, ctx)?;
                let jump_exit = ctx.builder.emit_jump(Op::JumpIfFalse(0));
                ctx.loops.push(LoopCtx { break_jumps: vec![jump_exit] });
                self.compile_stmt(body, ctx)?;
                ctx.builder.emit(Op::Jump(head));
                self.finish_loop(ctx);
                Ok(())
            }
            Stmt::For {
                name,
                start,
                end,
                step,
                body,
            } => self.compile_for(name, start, end, step.as_ref(), body, ctx),
            Stmt::Loop { body } => self.compile_loop(body, ctx),
            Stmt::Break(loc) => {
                let jump = ctx.builder.emit_jump(Op::Jump(0));
                match ctx.loops.last_mut() {
                    Some(loop_ctx) => {
                        loop_ctx.break_jumps.push(jump);
                        Ok(())
                    }
                    None => Err(FalconError::compile("'break' outside loop").at(*loc)),
                }
            }
            Stmt::Function(decl) => {
                self.compile_function(decl, ctx)?;
                let name = decl.name.as_deref().expect("function statements are named");
                match ctx.kind {
                    CtxKind::Module => {
                        let idx = ctx.builder.name_idx(name);
                        ctx.builder.emit(Op::StoreGlobal(idx));
                    }
                    CtxKind::Function => {
                        let slot = self.let_slot(name, false, ctx)?;
                        ctx.builder.emit(Op::StoreLocal(slot));
                    }
                }
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(value) => self.compile_expr(value, ctx)?,
                    None => {
                        let idx = ctx.builder.add_const(Const::Null);
                        ctx.builder.emit(Op::LoadConst(idx));
                    }
                }
                ctx.builder.emit(Op::Return);
                Ok(())
            }
            Stmt::Throw(_) | Stmt::TryCatch { .. } | Stmt::Match(_) => Err(FalconError::compile(format!(
                "unsupported statement in compiler: {}",
                stmt_kind(stmt)
            ))),
        }
    }

    fn compile_let(
        &self,
        name: &str,
        init: Option<&Expr>,
        is_const: bool,
        is_var: bool,
        ctx: &mut FnCtx,
    ) -> RunResult<()> {
        // `x := x + 1` with x a known local fuses to INC_LOCAL
        if is_var && !matches!(ctx.kind, CtxKind::Module) {
            if let (Some(slot), Some(init)) = (ctx.resolve(name), init) {
                if is_increment_of(init, name) {
                    ctx.builder.emit(Op::IncLocal(slot));
                    return Ok(());
                }
            }
        }
        match init {
            Some(init) => self.compile_expr(init, ctx)?,
            None => {
                let idx = ctx.builder.add_const(Const::Null);
                ctx.builder.emit(Op::LoadConst(idx));
            }
        }
        match ctx.kind {
            CtxKind::Module => {
                let idx = ctx.builder.name_idx(name);
                ctx.builder.emit(Op::StoreGlobal(idx));
            }
            CtxKind::Function => {
                let slot = if is_var {
                    self.var_slot(name, ctx)?
                } else {
                    self.let_slot(name, is_const, ctx)?
                };
                ctx.builder.emit(Op::StoreLocal(slot));
            }
        }
        Ok(())
    }

    /// Function-scoped slot for a `var` name, shared across blocks.
    fn var_slot(&self, name: &str, ctx: &mut FnCtx) -> RunResult<u16> {
        if let Some(slot) = ctx.var_slots.get(name) {
            return Ok(*slot);
        }
        let slot = ctx.alloc_slot()?;
        ctx.var_slots.insert(name.to_owned(), slot);
        Ok(slot)
    }

    /// Fresh block-scoped slot for a `let`/`const` name.
    fn let_slot(&self, name: &str, is_const: bool, ctx: &mut FnCtx) -> RunResult<u16> {
        let slot = ctx.alloc_slot()?;
        if is_const {
            ctx.const_locals.insert(slot);
        }
        match ctx.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_owned(), slot);
            }
            None => {
                ctx.var_slots.insert(name.to_owned(), slot);
            }
        }
        Ok(slot)
    }

    fn compile_for(
        &self,
        name: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &[Stmt],
        ctx: &mut FnCtx,
    ) -> RunResult<()> {
        let k = ctx.for_counter;
        ctx.for_counter += 1;
        let (iter_var, end_var, step_var) = match ctx.kind {
            CtxKind::Module => (
                VarRef::Global(ctx.builder.name_idx(name)),
                VarRef::Global(ctx.builder.name_idx(&format!("__for_end_{k}"))),
                VarRef::Global(ctx.builder.name_idx(&format!("__for_step_{k}"))),
            ),
            CtxKind::Function => {
                let iter = self.var_slot(name, ctx)?;
                let end_slot = ctx.alloc_slot()?;
                let step_slot = ctx.alloc_slot()?;
                ctx.var_slots.insert(format!("__for_end_{k}"), end_slot);
                ctx.var_slots.insert(format!("__for_step_{k}"), step_slot);
                (VarRef::Local(iter), VarRef::Local(end_slot), VarRef::Local(step_slot))
            }
        };

        self.compile_expr(start, ctx)?;
        ctx.emit_store_var(&iter_var);
        self.compile_expr(end, ctx)?;
        ctx.emit_store_var(&end_var);
        match step {
            Some(step) => self.compile_expr(step, ctx)?,
            None => {
                let one = ctx.builder.add_const(Const::Int(1));
                ctx.builder.emit(Op::LoadConst(one));
            }
        }
        // step 0 is a runtime error, checked once before the loop
        ctx.builder.emit(Op::CheckStep);
        ctx.emit_store_var(&step_var);

        // each iteration branches on the sign of step to pick the
        // inclusive comparison direction
        let head = ctx.builder.current_offset();
        ctx.emit_load_var(&step_var);
        let zero = ctx.builder.add_const(Const::Int(0));
        ctx.builder.emit(Op::LoadConst(zero));
        ctx.builder.emit(Op::Gt);
        let jump_negative = ctx.builder.emit_jump(Op::JumpIfFalse(0));
        ctx.emit_load_var(&iter_var);
        ctx.emit_load_var(&end_var);
        ctx.builder.emit(Op::Lte);
        let jump_join = ctx.builder.emit_jump(Op::Jump(0));
        ctx.builder.patch_jump(jump_negative);
        ctx.emit_load_var(&iter_var);
        ctx.emit_load_var(&end_var);
        ctx.builder.emit(Op::Gte);
        ctx.builder.patch_jump(jump_join);
        let jump_exit = ctx.builder.emit_jump(Op::JumpIfFalse(0));

        ctx.loops.push(LoopCtx { break_jumps: vec![jump_exit] });
        for s in body {
            self.compile_stmt(s, ctx)?;
        }
        ctx.emit_load_var(&iter_var);
        ctx.emit_load_var(&step_var);
        ctx.builder.emit(Op::Add);
        ctx.emit_store_var(&iter_var);
        ctx.builder.emit(Op::Jump(head));
        self.finish_loop(ctx);
        Ok(())
    }

    /// `loop { ... }`, including the fused counter forms.
    fn compile_loop(&self, body: &[Stmt], ctx: &mut FnCtx) -> RunResult<()> {
        // loop { if (i >= LIMIT) break; ... } with i a local and LIMIT an
        // integer literal fuses the guard into JUMP_IF_GE_LOCAL_IMM
        if let Some((slot, limit)) = self.fused_guard(body, ctx) {
            let rest = &body[1..];
            let guard = ctx.builder.emit_jump(Op::JumpIfGeLocalImm { slot, limit, target: 0 });
            if pure_counter_body(rest, slot, ctx) {
                // pure counter: the loop's only effect is driving the
                // counter to the limit
                let fast = ctx.builder.emit_jump(Op::FastCount { slot, limit, target: 0 });
                ctx.builder.patch_jump(guard);
                ctx.builder.patch_jump(fast);
                return Ok(());
            }
            let head = ctx.builder.current_offset() - 1;
            ctx.loops.push(LoopCtx { break_jumps: vec![guard] });
            for s in rest {
                self.compile_stmt(s, ctx)?;
            }
            ctx.builder.emit(Op::Jump(head));
            self.finish_loop(ctx);
            return Ok(());
        }

        let head = ctx.builder.current_offset();
        ctx.loops.push(LoopCtx { break_jumps: Vec::new() });
        for s in body {
            self.compile_stmt(s, ctx)?;
        }
        ctx.builder.emit(Op::Jump(head));
        self.finish_loop(ctx);
        Ok(())
    }

    /// Recognizes `if (i >= LIMIT) break;` as the first loop statement.
    fn fused_guard(&self, body: &[Stmt], ctx: &FnCtx) -> Option<(u16, i64)> {
        let Stmt::If {
            cond,
            then_branch,
            else_branch: None,
        } = body.first()?
        else {
            return None;
        };
        let is_break = match then_branch.as_ref() {
            Stmt::Break(_) => true,
            Stmt::Block(stmts) => matches!(stmts.as_slice(), [Stmt::Break(_)]),
            _ => false,
        };
        if !is_break {
            return None;
        }
        let Expr::Binary { left, op: BinOp::Gte, right } = strip_grouping(cond) else {
            return None;
        };
        let Expr::Variable(name) = strip_grouping(left) else {
            return None;
        };
        let Expr::Literal(Lit::Int(limit)) = strip_grouping(right) else {
            return None;
        };
        let slot = ctx.resolve(name)?;
        Some((slot, *limit))
    }

    fn finish_loop(&self, ctx: &mut FnCtx) {
        let loop_ctx = ctx.loops.pop().expect("loop context must be open");
        for jump in loop_ctx.break_jumps {
            ctx.builder.patch_jump(jump);
        }
    }

    fn compile_expr(&self, expr: &Expr, ctx: &mut FnCtx) -> RunResult<()> {
        match expr {
            Expr::Literal(lit) => {
                let idx = ctx.builder.add_const(lit_const(lit));
                ctx.builder.emit(Op::LoadConst(idx));
                Ok(())
            }
            Expr::Variable(name) => {
                let var = ctx.var_ref(name);
                ctx.emit_load_var(&var);
                Ok(())
            }
            Expr::Grouping(inner) => self.compile_expr(inner, ctx),
            Expr::Unary { op, operand } => self.compile_unary(*op, operand, ctx),
            Expr::Binary { left, op, right } => self.compile_binary(left, *op, right, ctx),
            Expr::Assign { target, value } => self.compile_assign(target, value, true, ctx),
            Expr::Call { callee, args } => {
                self.compile_expr(callee, ctx)?;
                for arg in args {
                    self.compile_expr(arg, ctx)?;
                }
                let argc = u8::try_from(args.len())
                    .map_err(|_| FalconError::compile("call has too many arguments"))?;
                ctx.builder.emit(Op::Call(argc));
                Ok(())
            }
            Expr::Member { base, name } => {
                self.compile_expr(base, ctx)?;
                let idx = ctx.builder.name_idx(name);
                ctx.builder.emit(Op::LoadAttr(idx));
                Ok(())
            }
            Expr::Function(decl) => self.compile_function(decl, ctx),
            Expr::ListLit(_)
            | Expr::TupleLit(_)
            | Expr::SetLit(_)
            | Expr::DictLit(_)
            | Expr::ArrayLit(_)
            | Expr::Subscript { .. }
            | Expr::Match(_) => Err(FalconError::compile(format!(
                "unsupported expression in compiler: {}",
                expr_kind(expr)
            ))),
        }
    }

    fn compile_unary(&self, op: UnOp, operand: &Expr, ctx: &mut FnCtx) -> RunResult<()> {
        match op {
            UnOp::Not => {
                self.compile_expr(operand, ctx)?;
                ctx.builder.emit(Op::Not);
                Ok(())
            }
            UnOp::Neg => {
                // fold literal negation, otherwise lower to 0 - x
                if let Expr::Literal(Lit::Int(n)) = operand {
                    let idx = ctx.builder.add_const(Const::Int(-n));
                    ctx.builder.emit(Op::LoadConst(idx));
                    return Ok(());
                }
                if let Expr::Literal(Lit::Float(x)) = operand {
                    let idx = ctx.builder.add_const(Const::Float(-x));
                    ctx.builder.emit(Op::LoadConst(idx));
                    return Ok(());
                }
                let zero = ctx.builder.add_const(Const::Int(0));
                ctx.builder.emit(Op::LoadConst(zero));
                self.compile_expr(operand, ctx)?;
                ctx.builder.emit(Op::Sub);
                Ok(())
            }
        }
    }

    fn compile_binary(&self, left: &Expr, op: BinOp, right: &Expr, ctx: &mut FnCtx) -> RunResult<()> {
        match op {
            BinOp::And | BinOp::Or => self.compile_short_circuit(left, op, right, ctx),
            BinOp::Pow => Err(FalconError::compile("unsupported expression in compiler: '**'")),
            _ => {
                self.compile_expr(left, ctx)?;
                self.compile_expr(right, ctx)?;
                let opcode = match op {
                    BinOp::Add => Op::Add,
                    BinOp::Sub => Op::Sub,
                    BinOp::Mul => Op::Mul,
                    BinOp::Div => Op::Div,
                    BinOp::Mod => Op::Mod,
                    BinOp::Eq => Op::Eq,
                    BinOp::Neq => Op::Neq,
                    BinOp::Lt => Op::Lt,
                    BinOp::Lte => Op::Lte,
                    BinOp::Gt => Op::Gt,
                    BinOp::Gte => Op::Gte,
                    BinOp::And | BinOp::Or | BinOp::Pow => unreachable!("handled above"),
                };
                ctx.builder.emit(opcode);
                Ok(())
            }
        }
    }

    /// Short-circuit lowering preserving the leftmost value on the stack:
    /// `lhs; DUP; JUMP_IF_FALSE/TRUE end; POP; rhs; end:`. A literal rhs
    /// cannot fail or have effects, so it uses the eager AND/OR opcodes.
    fn compile_short_circuit(&self, left: &Expr, op: BinOp, right: &Expr, ctx: &mut FnCtx) -> RunResult<()> {
        self.compile_expr(left, ctx)?;
        if matches!(right, Expr::Literal(_)) {
            self.compile_expr(right, ctx)?;
            ctx.builder.emit(if op == BinOp::And { Op::And } else { Op::Or });
            return Ok(());
        }
        ctx.builder.emit(Op::Dup);
        let jump_end = ctx.builder.emit_jump(if op == BinOp::And {
            Op::JumpIfFalse(0)
        } else {
            Op::JumpIfTrue(0)
        });
        ctx.builder.emit(Op::Pop);
        self.compile_expr(right, ctx)?;
        ctx.builder.patch_jump(jump_end);
        Ok(())
    }

    fn compile_assign(&self, target: &Expr, value: &Expr, needs_value: bool, ctx: &mut FnCtx) -> RunResult<()> {
        match target {
            Expr::Variable(name) => {
                if let Some(slot) = ctx.resolve(name) {
                    if ctx.const_locals.contains(&slot) {
                        return Err(FalconError::compile(format!("cannot assign to constant '{name}'")));
                    }
                    // x = x + 1 fuses to INC_LOCAL
                    if is_increment_of(value, name) {
                        ctx.builder.emit(Op::IncLocal(slot));
                        if needs_value {
                            ctx.builder.emit(Op::LoadLocal(slot));
                        }
                        return Ok(());
                    }
                }
                self.compile_expr(value, ctx)?;
                if needs_value {
                    ctx.builder.emit(Op::Dup);
                }
                let var = ctx.var_ref(name);
                ctx.emit_store_var(&var);
                Ok(())
            }
            Expr::Member { base, name } => {
                self.compile_expr(base, ctx)?;
                self.compile_expr(value, ctx)?;
                let idx = ctx.builder.name_idx(name);
                // STORE_ATTR leaves the assigned value on the stack
                ctx.builder.emit(Op::StoreAttr(idx));
                if !needs_value {
                    ctx.builder.emit(Op::Pop);
                }
                Ok(())
            }
            Expr::Subscript { .. } => Err(FalconError::compile(
                "unsupported expression in compiler: subscript assignment",
            )),
            _ => Err(FalconError::compile("invalid assignment target")),
        }
    }

    /// Compiles a function and emits `MAKE_FUNCTION`.
    ///
    /// Code-backed when the free-name analysis allows it and the body
    /// lowers cleanly; otherwise the AST node itself joins the const pool.
    fn compile_function(&self, decl: &Rc<FunctionDecl>, ctx: &mut FnCtx) -> RunResult<()> {
        if self.can_code_back(decl) {
            if let Ok(code) = self.compile_function_code(decl) {
                let idx = ctx.builder.add_const(Const::Code(code));
                ctx.builder.emit(Op::MakeFunction(idx));
                return Ok(());
            }
        }
        let idx = ctx.builder.add_const(Const::Function(Rc::clone(decl)));
        ctx.builder.emit(Op::MakeFunction(idx));
        Ok(())
    }

    fn compile_function_code(&self, decl: &FunctionDecl) -> RunResult<Rc<Code>> {
        let mut ctx = FnCtx::function(&decl.params)?;
        for stmt in &decl.body {
            self.compile_stmt(stmt, &mut ctx)?;
        }
        let null_idx = ctx.builder.add_const(Const::Null);
        ctx.builder.emit(Op::LoadConst(null_idx));
        ctx.builder.emit(Op::Return);
        let argcount = u8::try_from(decl.params.len())
            .map_err(|_| FalconError::compile("function has too many parameters"))?;
        Ok(ctx.builder.build(decl.display_name().to_owned(), ctx.next_slot, argcount))
    }

    /// The code-backing decision: empty free set and no nested function
    /// capturing this function's locals.
    fn can_code_back(&self, decl: &FunctionDecl) -> bool {
        if !self.free_names(decl).is_empty() {
            return false;
        }
        let defined = self.defined_names(decl);
        let mut nested = Vec::new();
        collect_nested_functions(&decl.body, &mut nested);
        nested
            .iter()
            .all(|inner| self.free_names(inner).is_disjoint(&defined))
    }

    fn defined_names(&self, decl: &FunctionDecl) -> AHashSet<String> {
        let mut defined: AHashSet<String> = decl.params.iter().map(|p| p.name.clone()).collect();
        collect_declared(&decl.body, &mut defined);
        defined
    }

    /// referenced − defined − globals, with nested functions contributing
    /// their own free names.
    fn free_names(&self, decl: &FunctionDecl) -> AHashSet<String> {
        let defined = self.defined_names(decl);
        let mut referenced = AHashSet::new();
        self.collect_stmt_refs(&decl.body, &mut referenced);
        referenced
            .into_iter()
            .filter(|name| !defined.contains(name) && !self.globals.contains(name))
            .collect()
    }

    fn collect_stmt_refs(&self, stmts: &[Stmt], out: &mut AHashSet<String>) {
        for stmt in stmts {
            match stmt {
                Stmt::Expr(expr) | Stmt::Say(expr) | Stmt::Throw(expr) => self.collect_expr_refs(expr, out),
                Stmt::Let { init, .. } => {
                    if let Some(init) = init {
                        self.collect_expr_refs(init, out);
                    }
                }
                Stmt::Block(body) | Stmt::Loop { body } => self.collect_stmt_refs(body, out),
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                } => {
                    self.collect_expr_refs(cond, out);
                    self.collect_stmt_refs(std::slice::from_ref(then_branch), out);
                    if let Some(else_branch) = else_branch {
                        self.collect_stmt_refs(std::slice::from_ref(else_branch), out);
                    }
                }
                Stmt::While { cond, body } => {
                    self.collect_expr_refs(cond, out);
                    self.collect_stmt_refs(std::slice::from_ref(body), out);
                }
                Stmt::For {
                    start, end, step, body, ..
                } => {
                    self.collect_expr_refs(start, out);
                    self.collect_expr_refs(end, out);
                    if let Some(step) = step {
                        self.collect_expr_refs(step, out);
                    }
                    self.collect_stmt_refs(body, out);
                }
                Stmt::Function(decl) => out.extend(self.free_names(decl)),
                Stmt::Return(value) => {
                    if let Some(value) = value {
                        self.collect_expr_refs(value, out);
                    }
                }
                Stmt::TryCatch { body, handler, .. } => {
                    self.collect_stmt_refs(body, out);
                    self.collect_stmt_refs(handler, out);
                }
                Stmt::Match(node) => self.collect_match_refs(node, out),
                Stmt::Break(_) => {}
            }
        }
    }

    fn collect_expr_refs(&self, expr: &Expr, out: &mut AHashSet<String>) {
        match expr {
            Expr::Variable(name) => {
                out.insert(name.clone());
            }
            Expr::Literal(_) => {}
            Expr::ListLit(items) | Expr::TupleLit(items) | Expr::SetLit(items) => {
                for item in items {
                    self.collect_expr_refs(item, out);
                }
            }
            Expr::DictLit(entries) => {
                for (_, value) in entries {
                    self.collect_expr_refs(value, out);
                }
            }
            Expr::ArrayLit(size) => self.collect_expr_refs(size, out),
            Expr::Grouping(inner) => self.collect_expr_refs(inner, out),
            Expr::Unary { operand, .. } => self.collect_expr_refs(operand, out),
            Expr::Binary { left, right, .. } => {
                self.collect_expr_refs(left, out);
                self.collect_expr_refs(right, out);
            }
            Expr::Call { callee, args } => {
                self.collect_expr_refs(callee, out);
                for arg in args {
                    self.collect_expr_refs(arg, out);
                }
            }
            Expr::Member { base, .. } => self.collect_expr_refs(base, out),
            Expr::Subscript { base, index } => {
                self.collect_expr_refs(base, out);
                self.collect_expr_refs(index, out);
            }
            Expr::Function(decl) => out.extend(self.free_names(decl)),
            Expr::Assign { target, value } => {
                self.collect_expr_refs(target, out);
                self.collect_expr_refs(value, out);
            }
            Expr::Match(node) => self.collect_match_refs(node, out),
        }
    }

    fn collect_match_refs(&self, node: &crate::ast::MatchNode, out: &mut AHashSet<String>) {
        self.collect_expr_refs(&node.value, out);
        for arm in &node.arms {
            if let Some(guard) = &arm.guard {
                self.collect_expr_refs(guard, out);
            }
            match &arm.body {
                ArmBody::Expr(expr) => self.collect_expr_refs(expr, out),
                ArmBody::Block(body) => self.collect_stmt_refs(body, out),
            }
        }
    }
}

/// Declaration names introduced by a statement list, recursing into
/// nested blocks but not into nested functions.
fn collect_declared(stmts: &[Stmt], out: &mut AHashSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Let { name, .. } => {
                out.insert(name.clone());
            }
            Stmt::Function(decl) => {
                if let Some(name) = &decl.name {
                    out.insert(name.clone());
                }
            }
            Stmt::For { name, body, .. } => {
                out.insert(name.clone());
                collect_declared(body, out);
            }
            Stmt::Block(body) | Stmt::Loop { body } => collect_declared(body, out),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                collect_declared(std::slice::from_ref(then_branch), out);
                if let Some(else_branch) = else_branch {
                    collect_declared(std::slice::from_ref(else_branch), out);
                }
            }
            Stmt::While { body, .. } => collect_declared(std::slice::from_ref(body), out),
            Stmt::TryCatch { body, name, handler } => {
                out.insert(name.clone());
                collect_declared(body, out);
                collect_declared(handler, out);
            }
            Stmt::Match(node) => {
                for arm in &node.arms {
                    if let ArmBody::Block(body) = &arm.body {
                        collect_declared(body, out);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Direct nested function declarations/expressions of a body.
fn collect_nested_functions(stmts: &[Stmt], out: &mut Vec<Rc<FunctionDecl>>) {
    fn from_expr(expr: &Expr, out: &mut Vec<Rc<FunctionDecl>>) {
        match expr {
            Expr::Function(decl) => out.push(Rc::clone(decl)),
            Expr::ListLit(items) | Expr::TupleLit(items) | Expr::SetLit(items) => {
                for item in items {
                    from_expr(item, out);
                }
            }
            Expr::DictLit(entries) => {
                for (_, value) in entries {
                    from_expr(value, out);
                }
            }
            Expr::ArrayLit(inner) | Expr::Grouping(inner) => from_expr(inner, out),
            Expr::Unary { operand, .. } => from_expr(operand, out),
            Expr::Binary { left, right, .. } => {
                from_expr(left, out);
                from_expr(right, out);
            }
            Expr::Call { callee, args } => {
                from_expr(callee, out);
                for arg in args {
                    from_expr(arg, out);
                }
            }
            Expr::Member { base, .. } => from_expr(base, out),
            Expr::Subscript { base, index } => {
                from_expr(base, out);
                from_expr(index, out);
            }
            Expr::Assign { target, value } => {
                from_expr(target, out);
                from_expr(value, out);
            }
            Expr::Match(node) => {
                from_expr(&node.value, out);
                for arm in &node.arms {
                    if let Some(guard) = &arm.guard {
                        from_expr(guard, out);
                    }
                    match &arm.body {
                        ArmBody::Expr(expr) => from_expr(expr, out),
                        ArmBody::Block(body) => collect_nested_functions(body, out),
                    }
                }
            }
            Expr::Literal(_) | Expr::Variable(_) => {}
        }
    }

    for stmt in stmts {
        match stmt {
            Stmt::Function(decl) => out.push(Rc::clone(decl)),
            Stmt::Expr(expr) | Stmt::Say(expr) | Stmt::Throw(expr) => from_expr(expr, out),
            Stmt::Let { init: Some(init), .. } => from_expr(init, out),
            Stmt::Let { init: None, .. } | Stmt::Break(_) => {}
            Stmt::Block(body) | Stmt::Loop { body } => collect_nested_functions(body, out),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                from_expr(cond, out);
                collect_nested_functions(std::slice::from_ref(then_branch), out);
                if let Some(else_branch) = else_branch {
                    collect_nested_functions(std::slice::from_ref(else_branch), out);
                }
            }
            Stmt::While { cond, body } => {
                from_expr(cond, out);
                collect_nested_functions(std::slice::from_ref(body), out);
            }
            Stmt::For {
                start, end, step, body, ..
            } => {
                from_expr(start, out);
                from_expr(end, out);
                if let Some(step) = step {
                    from_expr(step, out);
                }
                collect_nested_functions(body, out);
            }
            Stmt::Return(Some(value)) => from_expr(value, out),
            Stmt::Return(None) => {}
            Stmt::TryCatch { body, handler, .. } => {
                collect_nested_functions(body, out);
                collect_nested_functions(handler, out);
            }
            Stmt::Match(node) => {
                from_expr(&node.value, out);
                for arm in &node.arms {
                    if let Some(guard) = &arm.guard {
                        from_expr(guard, out);
                    }
                    match &arm.body {
                        ArmBody::Expr(expr) => from_expr(expr, out),
                        ArmBody::Block(body) => collect_nested_functions(body, out),
                    }
                }
            }
        }
    }
}

/// Matches `name + 1` (or `1 + name`) as an increment of `name`.
fn is_increment_of(expr: &Expr, name: &str) -> bool {
    let Expr::Binary {
        left,
        op: BinOp::Add,
        right,
    } = strip_grouping(expr)
    else {
        return false;
    };
    let var_plus_one = matches!(strip_grouping(left), Expr::Variable(n) if n == name)
        && matches!(strip_grouping(right), Expr::Literal(Lit::Int(1)));
    let one_plus_var = matches!(strip_grouping(left), Expr::Literal(Lit::Int(1)))
        && matches!(strip_grouping(right), Expr::Variable(n) if n == name);
    var_plus_one || one_plus_var
}

/// Whether the remaining loop body is exactly the counter increment.
fn pure_counter_body(rest: &[Stmt], slot: u16, ctx: &FnCtx) -> bool {
    let [Stmt::Expr(Expr::Assign { target, value })] = rest else {
        return false;
    };
    let Expr::Variable(name) = strip_grouping(target) else {
        return false;
    };
    ctx.resolve(name) == Some(slot) && is_increment_of(value, name)
}

fn strip_grouping(expr: &Expr) -> &Expr {
    match expr {
        Expr::Grouping(inner) => strip_grouping(inner),
        other => other,
    }
}

fn lit_const(lit: &Lit) -> Const {
    match lit {
        Lit::Null => Const::Null,
        Lit::Bool(b) => Const::Bool(*b),
        Lit::Int(n) => Const::Int(*n),
        Lit::Float(x) => Const::Float(*x),
        Lit::Str(s) => Const::Str(Rc::from(s.as_str())),
    }
}

fn stmt_kind(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Throw(_) => "'throw'",
        Stmt::TryCatch { .. } => "'try/catch'",
        Stmt::Match(_) => "'match'",
        _ => "statement",
    }
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::ListLit(_) => "list literal",
        Expr::TupleLit(_) => "tuple literal",
        Expr::SetLit(_) => "set literal",
        Expr::DictLit(_) => "dict literal",
        Expr::ArrayLit(_) => "array literal",
        Expr::Subscript { .. } => "subscript",
        Expr::Match(_) => "'match'",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_source;

    fn compile(source: &str) -> Rc<Code> {
        let ast = parse_source(source).unwrap();
        compile_module(&ast, "<test>", &AHashSet::new()).unwrap()
    }

    fn compile_with_builtins(source: &str) -> Rc<Code> {
        let ast = parse_source(source).unwrap();
        let globals: AHashSet<String> = ["show".to_owned()].into_iter().collect();
        compile_module(&ast, "<test>", &globals).unwrap()
    }

    /// Finds the code object of the first compiled function const.
    fn first_fn_code(code: &Code) -> Option<Rc<Code>> {
        code.consts().iter().find_map(|c| match c {
            Const::Code(code) => Some(Rc::clone(code)),
            _ => None,
        })
    }

    fn first_fn_ast(code: &Code) -> Option<Rc<FunctionDecl>> {
        code.consts().iter().find_map(|c| match c {
            Const::Function(decl) => Some(Rc::clone(decl)),
            _ => None,
        })
    }

    #[test]
    fn test_module_compiles_to_globals() {
        let code = compile("var x := 2; x = x + 5;");
        assert!(code.instrs().iter().any(|op| matches!(op, Op::StoreGlobal(_))));
        assert!(code.validate().is_ok());
    }

    #[test]
    fn test_function_locals_and_args() {
        let code = compile("function add(a, b) { return a + b; }");
        let func = first_fn_code(&code).expect("add should be code-backed");
        assert_eq!(func.argcount(), 2);
        assert!(func.nlocals() >= 2);
        assert_eq!(
            func.instrs()[..3],
            [Op::LoadLocal(0), Op::LoadLocal(1), Op::Add]
        );
        assert!(func.validate().is_ok());
    }

    #[test]
    fn test_closure_bearing_function_is_ast_backed() {
        let source = "function make() { var n := 0; function bump() { n = n + 1; return n; } return bump; }";
        let code = compile(source);
        // `make` contains a nested function capturing its local, so the
        // whole chain stays AST-backed
        assert!(first_fn_code(&code).is_none());
        let decl = first_fn_ast(&code).expect("make should be in the const pool as AST");
        assert_eq!(decl.name.as_deref(), Some("make"));
    }

    #[test]
    fn test_nested_function_over_globals_stays_code_backed() {
        let source = "var base := 10; function outer() { function inner() { return base; } return inner(); }";
        let code = compile(source);
        assert!(first_fn_code(&code).is_some());
    }

    #[test]
    fn test_function_with_match_demotes_to_ast() {
        let source = "function d(x) { return match x { case 0: \"zero\"; case _: \"other\"; }; }";
        let code = compile(source);
        assert!(first_fn_code(&code).is_none());
        assert!(first_fn_ast(&code).is_some());
    }

    #[test]
    fn test_module_level_match_is_compile_error() {
        let ast = parse_source("match 1 { case _: 0; }").unwrap();
        let err = compile_module(&ast, "<test>", &AHashSet::new()).unwrap_err();
        assert!(err.message().contains("match"));
    }

    #[test]
    fn test_break_outside_loop_is_compile_error() {
        let ast = parse_source("break;").unwrap();
        let err = compile_module(&ast, "<test>", &AHashSet::new()).unwrap_err();
        assert!(err.message().contains("'break' outside loop"));
        assert!(err.loc().is_some());
    }

    #[test]
    fn test_inc_local_fusion() {
        let source = "function f() { var i := 0; i = i + 1; return i; }";
        let func = first_fn_code(&compile(source)).unwrap();
        assert!(func.instrs().contains(&Op::IncLocal(0)));
    }

    #[test]
    fn test_inc_local_expression_reloads_value() {
        let source = "function f() { var i := 0; var j := (i = i + 1); return j; }";
        let func = first_fn_code(&compile(source)).unwrap();
        let instrs = func.instrs();
        let pos = instrs.iter().position(|op| *op == Op::IncLocal(0)).unwrap();
        assert_eq!(instrs[pos + 1], Op::LoadLocal(0));
    }

    #[test]
    fn test_counted_loop_fuses_guard() {
        let source = "function f() { var i := 0; loop { if (i >= 10) { break; } show(i); i = i + 1; } return i; }";
        let func = first_fn_code(&compile_with_builtins(source)).unwrap();
        assert!(func
            .instrs()
            .iter()
            .any(|op| matches!(op, Op::JumpIfGeLocalImm { slot: 0, limit: 10, .. })));
        assert!(func.validate().is_ok());
    }

    #[test]
    fn test_pure_counter_loop_fuses_fast_count() {
        let source = "function f() { var i := 0; loop { if (i >= 1000) { break; } i = i + 1; } return i; }";
        let func = first_fn_code(&compile(source)).unwrap();
        assert!(func
            .instrs()
            .iter()
            .any(|op| matches!(op, Op::FastCount { slot: 0, limit: 1000, .. })));
    }

    #[test]
    fn test_for_loop_checks_step() {
        let code = compile("for var i := 0 to 3 { }");
        assert!(code.instrs().contains(&Op::CheckStep));
        assert!(code.validate().is_ok());
    }

    #[test]
    fn test_short_circuit_lowering() {
        let code = compile("var x := 1 && f();");
        let instrs = code.instrs();
        assert!(instrs.contains(&Op::Dup));
        assert!(instrs.iter().any(|op| matches!(op, Op::JumpIfFalse(_))));
        // literal rhs uses the eager opcode
        let code = compile("var x := y || true;");
        assert!(code.instrs().contains(&Op::Or));
        assert!(!code.instrs().contains(&Op::Dup));
    }

    #[test]
    fn test_const_local_assignment_demotes_function() {
        // assignment to a const local cannot compile, so the function
        // falls back to the interpreter (which raises at runtime)
        let source = "function f() { const k := 1; k = 2; return k; }";
        let code = compile(source);
        assert!(first_fn_code(&code).is_none());
        assert!(first_fn_ast(&code).is_some());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let source = "var a := 1; function f(x) { return x * 2; } show(f(a));";
        let ast = parse_source(source).unwrap();
        let globals: AHashSet<String> = ["show".to_owned()].into_iter().collect();
        let first = compile_module(&ast, "<m>", &globals).unwrap();
        let second = compile_module(&ast, "<m>", &globals).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_negation_constant_folds() {
        let code = compile("var x := -5;");
        assert!(code.consts().contains(&Const::Int(-5)));
    }

    #[test]
    fn test_every_jump_is_in_range() {
        let source = "
            var i := 0;
            while (i < 5) { if (i % 2 == 0) { show(i); } else { show(0 - i); } i = i + 1; }
            for var j := 10 to 0 step -2 { show(j); }
        ";
        let code = compile_with_builtins(source);
        assert!(code.validate().is_ok());
    }
}
