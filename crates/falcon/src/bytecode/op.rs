//! Opcode definitions.
//!
//! Instructions are `(opcode, operand)` pairs realized as enum payloads.
//! Jump targets are absolute instruction indices within the owning
//! [`Code`](super::Code) object. Name-carrying instructions index the code
//! object's name table; constants index its const pool.

use std::fmt::{self, Display};

/// One VM instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // stack
    LoadConst(u16),
    Pop,
    Dup,

    // variables
    LoadGlobal(u16),
    StoreGlobal(u16),
    LoadLocal(u16),
    StoreLocal(u16),

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // comparison
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,

    // logic (eager forms; short-circuit uses Dup + conditional jumps)
    And,
    Or,
    Not,

    // control flow
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    Call(u8),
    Return,

    // objects
    LoadAttr(u16),
    StoreAttr(u16),
    MakeFunction(u16),
    Print,

    /// Rejects a zero for-loop step; peeks at the stack top.
    CheckStep,

    // fused
    IncLocal(u16),
    JumpIfGeLocalImm { slot: u16, limit: i64, target: u32 },
    FastCount { slot: u16, limit: i64, target: u32 },
}

impl Op {
    /// The absolute jump target, for instructions that have one.
    #[must_use]
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Self::Jump(target)
            | Self::JumpIfFalse(target)
            | Self::JumpIfTrue(target)
            | Self::JumpIfGeLocalImm { target, .. }
            | Self::FastCount { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// The local slot the instruction touches, if any.
    #[must_use]
    pub fn local_slot(&self) -> Option<u16> {
        match self {
            Self::LoadLocal(slot)
            | Self::StoreLocal(slot)
            | Self::IncLocal(slot)
            | Self::JumpIfGeLocalImm { slot, .. }
            | Self::FastCount { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadConst(idx) => write!(f, "LOAD_CONST {idx}"),
            Self::Pop => f.write_str("POP"),
            Self::Dup => f.write_str("DUP"),
            Self::LoadGlobal(idx) => write!(f, "LOAD_GLOBAL {idx}"),
            Self::StoreGlobal(idx) => write!(f, "STORE_GLOBAL {idx}"),
            Self::LoadLocal(slot) => write!(f, "LOAD_LOCAL {slot}"),
            Self::StoreLocal(slot) => write!(f, "STORE_LOCAL {slot}"),
            Self::Add => f.write_str("ADD"),
            Self::Sub => f.write_str("SUB"),
            Self::Mul => f.write_str("MUL"),
            Self::Div => f.write_str("DIV"),
            Self::Mod => f.write_str("MOD"),
            Self::Eq => f.write_str("EQ"),
            Self::Neq => f.write_str("NEQ"),
            Self::Lt => f.write_str("LT"),
            Self::Lte => f.write_str("LTE"),
            Self::Gt => f.write_str("GT"),
            Self::Gte => f.write_str("GTE"),
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
            Self::Not => f.write_str("NOT"),
            Self::Jump(target) => write!(f, "JUMP {target}"),
            Self::JumpIfFalse(target) => write!(f, "JUMP_IF_FALSE {target}"),
            Self::JumpIfTrue(target) => write!(f, "JUMP_IF_TRUE {target}"),
            Self::Call(argc) => write!(f, "CALL {argc}"),
            Self::Return => f.write_str("RETURN"),
            Self::LoadAttr(idx) => write!(f, "LOAD_ATTR {idx}"),
            Self::StoreAttr(idx) => write!(f, "STORE_ATTR {idx}"),
            Self::MakeFunction(idx) => write!(f, "MAKE_FUNCTION {idx}"),
            Self::Print => f.write_str("PRINT"),
            Self::CheckStep => f.write_str("CHECK_STEP"),
            Self::IncLocal(slot) => write!(f, "INC_LOCAL {slot}"),
            Self::JumpIfGeLocalImm { slot, limit, target } => {
                write!(f, "JUMP_IF_GE_LOCAL_IMM {slot} {limit} {target}")
            }
            Self::FastCount { slot, limit, target } => write!(f, "FAST_COUNT {slot} {limit} {target}"),
        }
    }
}
