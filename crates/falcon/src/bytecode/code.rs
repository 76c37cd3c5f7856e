//! Immutable compiled code objects.

use std::rc::Rc;

use crate::{
    ast::FunctionDecl,
    error::{FalconError, RunResult},
    value::Value,
};

use super::op::Op;

/// Entry of a code object's const pool.
///
/// Scalars become values directly; `Code` and `Function` entries are the
/// two payload shapes of `MAKE_FUNCTION`: a compiled nested function and
/// a retained AST function respectively.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Code(Rc<Code>),
    Function(Rc<FunctionDecl>),
}

impl Const {
    /// Scalar consts as runtime values; function-shaped consts are
    /// handled by `MAKE_FUNCTION` and have no direct value form.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Null => Some(Value::Null),
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Int(n) => Some(Value::Int(*n)),
            Self::Float(x) => Some(Value::Float(*x)),
            Self::Str(s) => Some(Value::Str(Rc::clone(s))),
            Self::Code(_) | Self::Function(_) => None,
        }
    }
}

/// A compiled unit: instructions, const pool, name table, and the local
/// slot / argument counts. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Code {
    name: String,
    instrs: Vec<Op>,
    consts: Vec<Const>,
    names: Vec<String>,
    nlocals: u16,
    argcount: u8,
}

impl Code {
    pub(crate) fn new(
        name: String,
        instrs: Vec<Op>,
        consts: Vec<Const>,
        names: Vec<String>,
        nlocals: u16,
        argcount: u8,
    ) -> Self {
        Self {
            name,
            instrs,
            consts,
            names,
            nlocals,
            argcount,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn instrs(&self) -> &[Op] {
        &self.instrs
    }

    #[must_use]
    pub fn consts(&self) -> &[Const] {
        &self.consts
    }

    pub fn const_at(&self, idx: u16) -> RunResult<&Const> {
        self.consts
            .get(idx as usize)
            .ok_or_else(|| FalconError::internal(format!("const index {idx} out of range in {}", self.name)))
    }

    pub fn name_at(&self, idx: u16) -> RunResult<&str> {
        self.names
            .get(idx as usize)
            .map(String::as_str)
            .ok_or_else(|| FalconError::internal(format!("name index {idx} out of range in {}", self.name)))
    }

    #[must_use]
    pub fn nlocals(&self) -> u16 {
        self.nlocals
    }

    #[must_use]
    pub fn argcount(&self) -> u8 {
        self.argcount
    }

    /// Checks the structural invariants: every jump target is within
    /// bounds and `nlocals` covers every local slot reference.
    pub fn validate(&self) -> RunResult<()> {
        let len = u32::try_from(self.instrs.len()).map_err(|_| FalconError::internal("code object too large"))?;
        for (ip, op) in self.instrs.iter().enumerate() {
            if let Some(target) = op.jump_target() {
                if target > len {
                    return Err(FalconError::internal(format!(
                        "jump target {target} out of range at {ip} in {}",
                        self.name
                    )));
                }
            }
            if let Some(slot) = op.local_slot() {
                if slot >= self.nlocals {
                    return Err(FalconError::internal(format!(
                        "local slot {slot} exceeds nlocals {} at {ip} in {}",
                        self.nlocals, self.name
                    )));
                }
            }
        }
        for constant in &self.consts {
            if let Const::Code(code) = constant {
                code.validate()?;
            }
        }
        Ok(())
    }
}
