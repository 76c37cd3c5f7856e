//! Optional gradual type checker.
//!
//! Verifies the `: T` annotations the parser collected: declarations,
//! assignments, arguments, and returns. Types are plain strings as written
//! in source (`int`, `list[int]`, `dict[string, int]`, `int | null`,
//! `fn(2)`), and compatibility is structural over those strings.
//!
//! [`value_conforms`] is the dynamic half of the same rules, used by the
//! environment's annotation guards at runtime.

use ahash::AHashMap;

use crate::{
    ast::{ArmBody, Expr, FunctionDecl, Lit, MatchNode, Stmt},
    error::{FalconError, RunResult},
    value::Value,
};

/// Splits a comma-separated type list at bracket depth zero.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        parts.push(tail.to_owned());
    }
    parts
}

/// Structural compatibility of an inferred type with a declared one.
fn compatible(actual: &str, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();
    let expected_parts: Vec<&str> = expected.split('|').map(str::trim).collect();
    if expected_parts.contains(&actual) {
        return true;
    }
    if expected_parts.contains(&"any") || expected_parts.contains(&"object") {
        return true;
    }
    let actual_parts: Vec<&str> = actual.split('|').map(str::trim).collect();
    if actual_parts.len() > 1 {
        return actual_parts.iter().all(|a| compatible(a, expected));
    }
    if (actual == "int" || actual == "float") && expected_parts.contains(&"number") {
        return true;
    }
    if let Some(a_inner) = actual.strip_prefix("list[").and_then(|s| s.strip_suffix(']')) {
        return expected_parts.iter().any(|e| {
            e.strip_prefix("list[")
                .and_then(|s| s.strip_suffix(']'))
                .is_some_and(|e_inner| compatible(a_inner, e_inner))
        });
    }
    if let Some(a_inner) = actual.strip_prefix("set[").and_then(|s| s.strip_suffix(']')) {
        return expected_parts.iter().any(|e| {
            e.strip_prefix("set[")
                .and_then(|s| s.strip_suffix(']'))
                .is_some_and(|e_inner| compatible(a_inner, e_inner))
        });
    }
    if let Some(a_body) = actual.strip_prefix("tuple[").and_then(|s| s.strip_suffix(']')) {
        let a_inners = split_top_level(a_body);
        return expected_parts.iter().any(|e| {
            e.strip_prefix("tuple[")
                .and_then(|s| s.strip_suffix(']'))
                .is_some_and(|e_body| {
                    let e_inners = split_top_level(e_body);
                    a_inners.len() == e_inners.len()
                        && a_inners.iter().zip(&e_inners).all(|(a, b)| compatible(a, b))
                })
        });
    }
    if let Some(a_body) = actual.strip_prefix("dict[").and_then(|s| s.strip_suffix(']')) {
        let a_pair = split_top_level(a_body);
        if a_pair.len() == 2 {
            for e in &expected_parts {
                if let Some(e_body) = e.strip_prefix("dict[").and_then(|s| s.strip_suffix(']')) {
                    let e_pair = split_top_level(e_body);
                    if e_pair.len() == 2 && compatible(&a_pair[0], &e_pair[0]) && compatible(&a_pair[1], &e_pair[1]) {
                        return true;
                    }
                }
            }
        }
        return expected_parts.contains(&"dict");
    }
    if actual.starts_with("fn(") && (expected_parts.contains(&"function") || expected_parts.contains(&"fn")) {
        return true;
    }
    false
}

/// Dynamic check that a runtime value conforms to an annotation string.
///
/// Shares the rules of the static checker: scalar names, `number`,
/// `any`/`object`, generic `list[T]`/`set[T]`/`tuple[...]`/`dict[K, V]`
/// shapes, `fn`/`function`, and top-level unions.
#[must_use]
pub fn value_conforms(value: &Value, expected: &str) -> bool {
    let expected = expected.trim();
    let parts = {
        // split unions only at bracket depth zero
        let mut depth = 0usize;
        let mut parts = Vec::new();
        let mut current = String::new();
        for ch in expected.chars() {
            match ch {
                '[' => {
                    depth += 1;
                    current.push(ch);
                }
                ']' => {
                    depth = depth.saturating_sub(1);
                    current.push(ch);
                }
                '|' if depth == 0 => {
                    parts.push(current.trim().to_owned());
                    current.clear();
                }
                _ => current.push(ch),
            }
        }
        let tail = current.trim();
        if !tail.is_empty() {
            parts.push(tail.to_owned());
        }
        parts
    };
    if parts.len() > 1 {
        return parts.iter().any(|p| value_conforms(value, p));
    }
    match expected {
        "any" | "object" => return true,
        "int" => return matches!(value, Value::Int(_)),
        "float" => return matches!(value, Value::Float(_)),
        "number" => return matches!(value, Value::Int(_) | Value::Float(_)),
        "bool" => return matches!(value, Value::Bool(_)),
        "string" | "str" => return matches!(value, Value::Str(_)),
        "null" => return matches!(value, Value::Null),
        "list" => return matches!(value, Value::List(_)),
        "tuple" => return matches!(value, Value::Tuple(_)),
        "dict" => return matches!(value, Value::Dict(_)),
        "set" => return matches!(value, Value::Set(_)),
        "fn" | "function" => {
            return matches!(value, Value::Function(_) | Value::Native(_) | Value::Bound(_));
        }
        _ => {}
    }
    if expected.starts_with("fn(") {
        return matches!(value, Value::Function(_) | Value::Native(_) | Value::Bound(_));
    }
    if let Some(inner) = expected.strip_prefix("list[").and_then(|s| s.strip_suffix(']')) {
        if let Value::List(items) = value {
            return items.borrow().iter().all(|item| value_conforms(item, inner));
        }
        return false;
    }
    if let Some(inner) = expected.strip_prefix("set[").and_then(|s| s.strip_suffix(']')) {
        if let Value::Set(items) = value {
            return items.borrow().iter().all(|key| value_conforms(&key.to_value(), inner));
        }
        return false;
    }
    if let Some(body) = expected.strip_prefix("tuple[").and_then(|s| s.strip_suffix(']')) {
        if let Value::Tuple(items) = value {
            let inners = split_top_level(body);
            return items.len() == inners.len()
                && items.iter().zip(&inners).all(|(item, ty)| value_conforms(item, ty));
        }
        return false;
    }
    if let Some(body) = expected.strip_prefix("dict[").and_then(|s| s.strip_suffix(']')) {
        if let Value::Dict(entries) = value {
            let pair = split_top_level(body);
            if pair.len() != 2 {
                return false;
            }
            if !compatible("string", &pair[0]) {
                return false;
            }
            return entries.borrow().values().all(|v| value_conforms(v, &pair[1]));
        }
        return false;
    }
    false
}

#[derive(Debug, Clone)]
struct FunctionSig {
    params: Vec<String>,
    param_types: AHashMap<String, String>,
    return_type: Option<String>,
}

/// Gradual annotation verifier over a parsed module.
#[derive(Debug, Default)]
pub struct TypeChecker {
    scopes: Vec<AHashMap<String, String>>,
    functions: AHashMap<String, FunctionSig>,
    current_return_type: Option<String>,
}

impl TypeChecker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![AHashMap::new()],
            functions: AHashMap::new(),
            current_return_type: None,
        }
    }

    /// Checks a module; the first violation is returned as a `Type` error.
    pub fn check(&mut self, stmts: &[Stmt]) -> RunResult<()> {
        for stmt in stmts {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn push(&mut self) {
        self.scopes.push(AHashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn define(&mut self, name: &str, type_name: String) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned(), type_name);
        }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .map(String::as_str)
    }

    fn check_stmt(&mut self, stmt: &Stmt) -> RunResult<()> {
        match stmt {
            Stmt::Let { name, init, ann, .. } => {
                let inferred = match init {
                    Some(expr) => self.infer_expr(expr)?,
                    None => "null".to_owned(),
                };
                let declared = ann.clone().unwrap_or_else(|| inferred.clone());
                if ann.is_some() && !compatible(&inferred, &declared) {
                    return Err(FalconError::type_error(format!(
                        "type mismatch for '{name}': expected {declared}, got {inferred}"
                    )));
                }
                self.define(name, declared);
                Ok(())
            }
            Stmt::Expr(expr) | Stmt::Say(expr) | Stmt::Throw(expr) => {
                self.infer_expr(expr)?;
                Ok(())
            }
            Stmt::Block(body) => {
                self.push();
                for s in body {
                    self.check_stmt(s)?;
                }
                self.pop();
                Ok(())
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.infer_expr(cond)?;
                self.check_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.check_stmt(else_branch)?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.infer_expr(cond)?;
                self.check_stmt(body)
            }
            Stmt::For {
                name,
                start,
                end,
                step,
                body,
            } => {
                self.infer_expr(start)?;
                self.infer_expr(end)?;
                if let Some(step) = step {
                    self.infer_expr(step)?;
                }
                self.push();
                self.define(name, "number".to_owned());
                for s in body {
                    self.check_stmt(s)?;
                }
                self.pop();
                Ok(())
            }
            Stmt::Loop { body } => {
                self.push();
                for s in body {
                    self.check_stmt(s)?;
                }
                self.pop();
                Ok(())
            }
            Stmt::Function(decl) => self.check_function_decl(decl),
            Stmt::Return(value) => {
                let Some(expected) = self.current_return_type.clone() else {
                    if let Some(value) = value {
                        self.infer_expr(value)?;
                    }
                    return Ok(());
                };
                let actual = match value {
                    Some(value) => self.infer_expr(value)?,
                    None => "null".to_owned(),
                };
                if !compatible(&actual, &expected) {
                    return Err(FalconError::type_error(format!(
                        "type mismatch for return: expected {expected}, got {actual}"
                    )));
                }
                Ok(())
            }
            Stmt::TryCatch { body, name, handler } => {
                self.push();
                for s in body {
                    self.check_stmt(s)?;
                }
                self.pop();
                self.push();
                self.define(name, "any".to_owned());
                for s in handler {
                    self.check_stmt(s)?;
                }
                self.pop();
                Ok(())
            }
            Stmt::Match(node) => {
                self.infer_expr(&node.value)?;
                for arm in &node.arms {
                    if let Some(guard) = &arm.guard {
                        self.infer_expr(guard)?;
                    }
                    match &arm.body {
                        ArmBody::Expr(expr) => {
                            self.infer_expr(expr)?;
                        }
                        ArmBody::Block(body) => {
                            self.push();
                            for s in body {
                                self.check_stmt(s)?;
                            }
                            self.pop();
                        }
                    }
                }
                Ok(())
            }
            Stmt::Break(_) => Ok(()),
        }
    }

    fn check_function_decl(&mut self, decl: &FunctionDecl) -> RunResult<()> {
        let sig = FunctionSig {
            params: decl.params.iter().map(|p| p.name.clone()).collect(),
            param_types: decl
                .params
                .iter()
                .filter_map(|p| p.ann.clone().map(|ann| (p.name.clone(), ann)))
                .collect(),
            return_type: decl.return_ann.clone(),
        };
        if let Some(name) = &decl.name {
            self.functions.insert(name.clone(), sig.clone());
            self.define(name, format!("fn({})", decl.params.len()));
        }

        let prev_return = self.current_return_type.take();
        self.current_return_type = sig.return_type.clone();
        self.push();
        for param in &sig.params {
            let ty = sig.param_types.get(param).cloned().unwrap_or_else(|| "any".to_owned());
            self.define(param, ty);
        }
        for s in &decl.body {
            self.check_stmt(s)?;
        }
        self.pop();
        self.current_return_type = prev_return;
        Ok(())
    }

    fn infer_expr(&mut self, expr: &Expr) -> RunResult<String> {
        match expr {
            Expr::Literal(lit) => Ok(infer_literal(lit).to_owned()),
            Expr::Variable(name) => Ok(self.lookup(name).unwrap_or("any").to_owned()),
            Expr::ListLit(elements) => {
                if elements.is_empty() {
                    return Ok("list[any]".to_owned());
                }
                let inner = self.infer_all(elements)?;
                Ok(format!("list[{}]", join_types(&inner)))
            }
            Expr::TupleLit(elements) => {
                if elements.is_empty() {
                    return Ok("tuple[any]".to_owned());
                }
                let inner = self.infer_all(elements)?;
                Ok(format!("tuple[{}]", inner.join(", ")))
            }
            Expr::SetLit(elements) => {
                if elements.is_empty() {
                    return Ok("set[any]".to_owned());
                }
                let inner = self.infer_all(elements)?;
                Ok(format!("set[{}]", join_types(&inner)))
            }
            Expr::DictLit(entries) => {
                if entries.is_empty() {
                    return Ok("dict[any, any]".to_owned());
                }
                let values: Vec<String> = entries
                    .iter()
                    .map(|(_, value)| self.infer_expr(value))
                    .collect::<RunResult<_>>()?;
                Ok(format!("dict[string, {}]", join_types(&values)))
            }
            Expr::ArrayLit(size) => {
                self.infer_expr(size)?;
                Ok("object".to_owned())
            }
            Expr::Grouping(inner) => self.infer_expr(inner),
            Expr::Unary { op, operand } => {
                let t = self.infer_expr(operand)?;
                match op {
                    crate::ast::UnOp::Not => Ok("bool".to_owned()),
                    crate::ast::UnOp::Neg => {
                        if !matches!(t.as_str(), "int" | "float" | "number" | "any") {
                            return Err(FalconError::type_error(format!("unary '-' requires number, got {t}")));
                        }
                        Ok(t)
                    }
                }
            }
            Expr::Binary { left, op, right } => self.infer_binary(left, *op, right),
            Expr::Assign { target, value } => {
                let value_t = self.infer_expr(value)?;
                if let Expr::Variable(name) = target.as_ref() {
                    if let Some(target_t) = self.lookup(name).map(str::to_owned) {
                        if !compatible(&value_t, &target_t) {
                            return Err(FalconError::type_error(format!(
                                "type mismatch for '{name}': expected {target_t}, got {value_t}"
                            )));
                        }
                        return Ok(target_t);
                    }
                }
                Ok(value_t)
            }
            Expr::Call { callee, args } => {
                if let Expr::Variable(fn_name) = callee.as_ref() {
                    if let Some(sig) = self.functions.get(fn_name).cloned() {
                        if args.len() != sig.params.len() {
                            return Err(FalconError::type_error(format!(
                                "function '{fn_name}' expects {} args, got {}",
                                sig.params.len(),
                                args.len()
                            )));
                        }
                        for (arg, param) in args.iter().zip(&sig.params) {
                            let actual = self.infer_expr(arg)?;
                            let expected = sig.param_types.get(param).cloned().unwrap_or_else(|| "any".to_owned());
                            if !compatible(&actual, &expected) {
                                return Err(FalconError::type_error(format!(
                                    "argument type mismatch for '{fn_name}.{param}': expected {expected}, got {actual}"
                                )));
                            }
                        }
                        return Ok(sig.return_type.unwrap_or_else(|| "any".to_owned()));
                    }
                }
                for arg in args {
                    self.infer_expr(arg)?;
                }
                self.infer_expr(callee)?;
                Ok("any".to_owned())
            }
            Expr::Function(decl) => {
                self.check_function_decl(decl)?;
                Ok(format!("fn({})", decl.params.len()))
            }
            Expr::Member { base, .. } => {
                self.infer_expr(base)?;
                Ok("any".to_owned())
            }
            Expr::Subscript { base, index } => {
                let base_t = self.infer_expr(base)?;
                self.infer_expr(index)?;
                Ok(subscript_type(&base_t))
            }
            Expr::Match(node) => self.infer_match(node),
        }
    }

    fn infer_binary(&mut self, left: &Expr, op: crate::ast::BinOp, right: &Expr) -> RunResult<String> {
        use crate::ast::BinOp;
        let lt = self.infer_expr(left)?;
        let rt = self.infer_expr(right)?;
        match op {
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte | BinOp::And | BinOp::Or => {
                Ok("bool".to_owned())
            }
            BinOp::Add => {
                if lt == "string" || rt == "string" {
                    return Ok("string".to_owned());
                }
                if lt == "int" && rt == "int" {
                    return Ok("int".to_owned());
                }
                if is_numberish(&lt) && is_numberish(&rt) {
                    if lt == "float" || rt == "float" {
                        return Ok("float".to_owned());
                    }
                    return Ok("number".to_owned());
                }
                Ok("any".to_owned())
            }
            BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow => {
                if is_numberish(&lt) && is_numberish(&rt) {
                    if op == BinOp::Div && lt == "int" && rt == "int" {
                        return Ok("float".to_owned());
                    }
                    if lt == "int" && rt == "int" {
                        return Ok("int".to_owned());
                    }
                    return Ok("number".to_owned());
                }
                Err(FalconError::type_error(format!(
                    "operator '{op}' requires numbers, got {lt} and {rt}"
                )))
            }
        }
    }

    fn infer_match(&mut self, node: &MatchNode) -> RunResult<String> {
        self.infer_expr(&node.value)?;
        let mut arm_types = Vec::new();
        for arm in &node.arms {
            if let Some(guard) = &arm.guard {
                self.infer_expr(guard)?;
            }
            match &arm.body {
                ArmBody::Expr(expr) => arm_types.push(self.infer_expr(expr)?),
                ArmBody::Block(body) => {
                    self.push();
                    for s in body {
                        self.check_stmt(s)?;
                    }
                    self.pop();
                    arm_types.push("null".to_owned());
                }
            }
        }
        if arm_types.is_empty() {
            return Ok("null".to_owned());
        }
        Ok(join_types(&arm_types))
    }

    fn infer_all(&mut self, exprs: &[Expr]) -> RunResult<Vec<String>> {
        exprs.iter().map(|e| self.infer_expr(e)).collect()
    }
}

fn is_numberish(t: &str) -> bool {
    matches!(t, "int" | "float" | "number" | "any")
}

fn infer_literal(lit: &Lit) -> &'static str {
    match lit {
        Lit::Null => "null",
        Lit::Bool(_) => "bool",
        Lit::Int(_) => "int",
        Lit::Float(_) => "float",
        Lit::Str(_) => "string",
    }
}

/// Joins a list of types, collapsing duplicates into a sorted union.
fn join_types(types: &[String]) -> String {
    let first = &types[0];
    if types.iter().all(|t| t == first) {
        return first.clone();
    }
    let mut unique: Vec<&str> = types.iter().map(String::as_str).collect();
    unique.sort_unstable();
    unique.dedup();
    unique.join(" | ")
}

fn subscript_type(base_t: &str) -> String {
    if let Some(inner) = base_t.strip_prefix("list[").and_then(|s| s.strip_suffix(']')) {
        return inner.trim().to_owned();
    }
    if let Some(inner) = base_t.strip_prefix("set[").and_then(|s| s.strip_suffix(']')) {
        return inner.trim().to_owned();
    }
    if let Some(body) = base_t.strip_prefix("dict[").and_then(|s| s.strip_suffix(']')) {
        let pair = split_top_level(body);
        if pair.len() == 2 {
            return pair[1].clone();
        }
    }
    if let Some(body) = base_t.strip_prefix("tuple[").and_then(|s| s.strip_suffix(']')) {
        let inners = split_top_level(body);
        if inners.len() == 1 {
            return inners[0].clone();
        }
        let mut unique: Vec<&str> = inners.iter().map(String::as_str).collect();
        unique.sort_unstable();
        unique.dedup();
        return unique.join(" | ");
    }
    "any".to_owned()
}
