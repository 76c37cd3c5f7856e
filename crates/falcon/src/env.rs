//! Lexical environments: a linked scope chain with `const` and gradual
//! type-annotation guards.
//!
//! Lookup walks the parent chain; assignment walks until the binding is
//! found and honors `const` and annotation metadata. The globals environment
//! is shared by the VM and the tree interpreter, so guards hold on both
//! execution paths.

use std::{cell::RefCell, rc::Rc};

use ahash::{AHashMap, AHashSet};

use crate::{
    error::{FalconError, RunResult},
    typecheck::value_conforms,
    value::Value,
};

pub type EnvRef = Rc<RefCell<Environment>>;

/// One scope in the chain.
#[derive(Debug, Default)]
pub struct Environment {
    values: AHashMap<String, Value>,
    consts: AHashSet<String>,
    anns: AHashMap<String, String>,
    /// Const names that already received their one allowed store. Used by
    /// the VM's `STORE_GLOBAL`, where definition and assignment are the
    /// same instruction.
    initialized_consts: AHashSet<String>,
    parent: Option<EnvRef>,
    function_scope: bool,
}

impl Environment {
    /// Creates a root (global) environment.
    #[must_use]
    pub fn new_global() -> EnvRef {
        Rc::new(RefCell::new(Self {
            function_scope: true,
            ..Self::default()
        }))
    }

    /// Creates a block scope under `parent`.
    #[must_use]
    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Self {
            parent: Some(Rc::clone(parent)),
            ..Self::default()
        }))
    }

    /// Creates a function-call scope under `parent`; `var` declarations
    /// hoist to the nearest scope with this flag.
    #[must_use]
    pub fn function_child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Self {
            parent: Some(Rc::clone(parent)),
            function_scope: true,
            ..Self::default()
        }))
    }

    /// Defines a binding in this scope.
    ///
    /// Redefining a name that is `const` in the same scope is an error, and
    /// an annotated binding rejects a non-conforming value.
    pub fn define(
        env: &EnvRef,
        name: &str,
        value: Value,
        is_const: bool,
        ann: Option<&str>,
    ) -> RunResult<()> {
        let mut scope = env.borrow_mut();
        if scope.values.contains_key(name) && scope.consts.contains(name) {
            return Err(FalconError::runtime(format!(
                "cannot redefine constant '{name}' in the same scope"
            )));
        }
        if let Some(ann) = ann {
            check_annotation(name, &value, ann)?;
            scope.anns.insert(name.to_owned(), ann.to_owned());
        } else {
            scope.anns.remove(name);
        }
        if is_const {
            scope.consts.insert(name.to_owned());
            scope.initialized_consts.insert(name.to_owned());
        } else {
            scope.consts.remove(name);
            scope.initialized_consts.remove(name);
        }
        scope.values.insert(name.to_owned(), value);
        Ok(())
    }

    /// Looks a name up, walking the parent chain.
    pub fn get(env: &EnvRef, name: &str) -> RunResult<Value> {
        Self::lookup(env, name).ok_or_else(|| FalconError::runtime(format!("undefined variable '{name}'")))
    }

    /// Lookup that distinguishes "absent" from an error.
    #[must_use]
    pub fn lookup(env: &EnvRef, name: &str) -> Option<Value> {
        let scope = env.borrow();
        if let Some(value) = scope.values.get(name) {
            return Some(value.clone());
        }
        let parent = scope.parent.clone()?;
        drop(scope);
        Self::lookup(&parent, name)
    }

    /// Assigns to an existing binding, walking the parent chain.
    ///
    /// Fails on unknown names, `const` bindings, and annotation violations.
    pub fn assign(env: &EnvRef, name: &str, value: Value) -> RunResult<()> {
        let mut scope = env.borrow_mut();
        if scope.values.contains_key(name) {
            if scope.consts.contains(name) {
                return Err(FalconError::runtime(format!("cannot assign to constant '{name}'")));
            }
            if let Some(ann) = scope.anns.get(name) {
                check_annotation(name, &value, ann)?;
            }
            scope.values.insert(name.to_owned(), value);
            return Ok(());
        }
        let parent = scope.parent.clone();
        drop(scope);
        match parent {
            Some(parent) => Self::assign(&parent, name, value),
            None => Err(FalconError::runtime(format!(
                "attempt to assign to undefined variable '{name}'"
            ))),
        }
    }

    /// Pre-registers `const`/annotation metadata for a module-level name.
    ///
    /// The VM's `STORE_GLOBAL` carries no declaration info, so the runner
    /// registers it from the AST before execution; the first store to a
    /// `const` name is its definition, later stores are rejected.
    pub fn declare_meta(env: &EnvRef, name: &str, is_const: bool, ann: Option<&str>) {
        let mut scope = env.borrow_mut();
        if is_const {
            scope.consts.insert(name.to_owned());
        }
        if let Some(ann) = ann {
            scope.anns.insert(name.to_owned(), ann.to_owned());
        }
    }

    /// Define-or-assign used by the VM's `STORE_GLOBAL`.
    pub fn set_global(env: &EnvRef, name: &str, value: Value) -> RunResult<()> {
        let mut scope = env.borrow_mut();
        if scope.consts.contains(name) {
            if scope.initialized_consts.contains(name) {
                return Err(FalconError::runtime(format!("cannot assign to constant '{name}'")));
            }
            scope.initialized_consts.insert(name.to_owned());
        }
        if let Some(ann) = scope.anns.get(name) {
            check_annotation(name, &value, ann)?;
        }
        scope.values.insert(name.to_owned(), value);
        Ok(())
    }

    /// Reads a global, yielding `null` for absent names (VM semantics; the
    /// interpreter reports undefined variables instead).
    #[must_use]
    pub fn get_or_null(env: &EnvRef, name: &str) -> Value {
        Self::lookup(env, name).unwrap_or(Value::Null)
    }

    /// Defines a hoisted `var` binding in the nearest function scope.
    pub fn define_hoisted(env: &EnvRef, name: &str) {
        let owner = Self::nearest_function_scope(env);
        let mut scope = owner.borrow_mut();
        if !scope.values.contains_key(name) {
            scope.values.insert(name.to_owned(), Value::Null);
        }
    }

    /// Stores a `var` initializer into the nearest function scope,
    /// applying any annotation from the declaration site.
    pub fn define_var(env: &EnvRef, name: &str, value: Value, ann: Option<&str>) -> RunResult<()> {
        let owner = Self::nearest_function_scope(env);
        if let Some(ann) = ann {
            check_annotation(name, &value, ann)?;
            owner.borrow_mut().anns.insert(name.to_owned(), ann.to_owned());
        }
        let mut scope = owner.borrow_mut();
        scope.values.insert(name.to_owned(), value);
        Ok(())
    }

    fn nearest_function_scope(env: &EnvRef) -> EnvRef {
        let mut current = Rc::clone(env);
        loop {
            let next = {
                let scope = current.borrow();
                if scope.function_scope {
                    return Rc::clone(&current);
                }
                scope.parent.clone().expect("scope chain must end in a function scope")
            };
            current = next;
        }
    }

    /// Names bound in this scope only (no parents).
    #[must_use]
    pub fn local_names(env: &EnvRef) -> Vec<String> {
        env.borrow().values.keys().cloned().collect()
    }

    /// Single-scope shallow copy of a root environment.
    ///
    /// The runner executes each attempt against a fork so a failed VM run
    /// leaves the session globals untouched and the interpreter fallback
    /// starts from a clean state. Values are shared handles; only the
    /// binding tables are copied.
    #[must_use]
    pub fn fork(env: &EnvRef) -> EnvRef {
        let scope = env.borrow();
        Rc::new(RefCell::new(Self {
            values: scope.values.clone(),
            consts: scope.consts.clone(),
            anns: scope.anns.clone(),
            initialized_consts: scope.initialized_consts.clone(),
            parent: scope.parent.clone(),
            function_scope: scope.function_scope,
        }))
    }

    /// Copies every binding and its metadata from `source` back into
    /// `target`; used after a successful forked run.
    pub fn merge_into(target: &EnvRef, source: &EnvRef) {
        let source = source.borrow();
        let mut target = target.borrow_mut();
        target.values.extend(source.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        target.consts.extend(source.consts.iter().cloned());
        target.anns.extend(source.anns.iter().map(|(k, v)| (k.clone(), v.clone())));
        target
            .initialized_consts
            .extend(source.initialized_consts.iter().cloned());
    }
}

fn check_annotation(name: &str, value: &Value, ann: &str) -> RunResult<()> {
    if value_conforms(value, ann) {
        Ok(())
    } else {
        Err(FalconError::type_error(format!(
            "type mismatch for '{name}': expected {ann}, got {}",
            value.kind_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_get_assign() {
        let env = Environment::new_global();
        Environment::define(&env, "x", Value::Int(1), false, None).unwrap();
        assert!(Environment::get(&env, "x").unwrap().falcon_eq(&Value::Int(1)));
        Environment::assign(&env, "x", Value::Int(2)).unwrap();
        assert!(Environment::get(&env, "x").unwrap().falcon_eq(&Value::Int(2)));
        assert!(Environment::get(&env, "y").is_err());
        assert!(Environment::assign(&env, "y", Value::Null).is_err());
    }

    #[test]
    fn test_lookup_walks_parents_assign_finds_owner() {
        let root = Environment::new_global();
        Environment::define(&root, "x", Value::Int(1), false, None).unwrap();
        let inner = Environment::child(&root);
        assert!(Environment::get(&inner, "x").unwrap().falcon_eq(&Value::Int(1)));
        Environment::assign(&inner, "x", Value::Int(5)).unwrap();
        assert!(Environment::get(&root, "x").unwrap().falcon_eq(&Value::Int(5)));
    }

    #[test]
    fn test_const_guards() {
        let env = Environment::new_global();
        Environment::define(&env, "k", Value::Int(1), true, None).unwrap();
        assert!(Environment::assign(&env, "k", Value::Int(2)).is_err());
        assert!(Environment::define(&env, "k", Value::Int(2), false, None).is_err());
    }

    #[test]
    fn test_const_shadowing_in_child_scope_is_allowed() {
        let root = Environment::new_global();
        Environment::define(&root, "k", Value::Int(1), true, None).unwrap();
        let inner = Environment::child(&root);
        Environment::define(&inner, "k", Value::Int(2), false, None).unwrap();
        assert!(Environment::get(&inner, "k").unwrap().falcon_eq(&Value::Int(2)));
    }

    #[test]
    fn test_annotation_guards() {
        let env = Environment::new_global();
        assert!(Environment::define(&env, "n", Value::str("no"), false, Some("int")).is_err());
        Environment::define(&env, "n", Value::Int(1), false, Some("int")).unwrap();
        assert!(Environment::assign(&env, "n", Value::str("no")).is_err());
        Environment::assign(&env, "n", Value::Int(2)).unwrap();
    }

    #[test]
    fn test_set_global_const_once() {
        let env = Environment::new_global();
        Environment::declare_meta(&env, "k", true, None);
        Environment::set_global(&env, "k", Value::Int(1)).unwrap();
        assert!(Environment::set_global(&env, "k", Value::Int(2)).is_err());
    }

    #[test]
    fn test_var_hoisting_targets_function_scope() {
        let root = Environment::new_global();
        let call = Environment::function_child(&root);
        let block = Environment::child(&call);
        Environment::define_hoisted(&block, "v");
        Environment::define_var(&block, "v", Value::Int(3), None).unwrap();
        // visible from the call scope, not just the block
        assert!(Environment::get(&call, "v").unwrap().falcon_eq(&Value::Int(3)));
    }
}
