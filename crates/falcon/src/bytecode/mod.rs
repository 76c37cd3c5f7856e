//! Bytecode representation, compiler, and virtual machine.
//!
//! The compiler lowers the AST to stack-machine code objects; the VM
//! executes them and bridges to the tree interpreter for AST-backed
//! functions.

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, Const};
pub use compiler::compile_module;
pub use op::Op;
pub use vm::{Vm, MAX_CALL_DEPTH};

mod builder;
mod code;
mod compiler;
mod op;
mod vm;
