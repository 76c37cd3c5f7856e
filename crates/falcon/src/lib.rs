//! Falcon: a dynamically-typed, JavaScript-flavored scripting language
//! with a hybrid execution strategy.
//!
//! Source text flows through a classical pipeline (lexer, recursive-
//! descent parser, optional gradual type checker, bytecode compiler) and
//! then executes on a stack VM. Functions the compiler can prove free of
//! captured variables are lowered to bytecode; functions that close over
//! outer bindings stay AST and are dispatched to the tree interpreter at
//! call time. Both executors share the value model, builtins, and globals.
//!
//! ```
//! use falcon::{CollectStringPrint, Executor};
//!
//! let mut executor = Executor::new().unwrap();
//! let mut print = CollectStringPrint::new();
//! let exit = executor.run_source("var x := 2; x = x + 5; show(x);", "<demo>", &mut print);
//! assert_eq!(exit, 0);
//! assert_eq!(print.output(), "7\n");
//! ```

pub mod ast;
mod builtins;
pub mod bytecode;
mod env;
mod error;
mod interp;
mod io;
mod lex;
mod parse;
mod pattern;
mod run;
mod sandbox;
mod token;
pub mod tracer;
mod typecheck;
mod value;

pub use crate::{
    builtins::{builtin_names, install_builtins, NativeFn},
    bytecode::{compile_module, Code, Const, Op, Vm},
    env::{EnvRef, Environment},
    error::{CodeLoc, ErrorKind, FalconError, RunResult},
    interp::Interpreter,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    lex::{lex, Lexer},
    parse::{parse_source, Parser},
    pattern::{match_pattern, match_value_pattern},
    run::{format_error_context, ExecOptions, Executor},
    sandbox::Sandbox,
    token::{Token, TokenKind},
    tracer::{ExecTracer, NoopTracer, StderrTracer},
    typecheck::{value_conforms, TypeChecker},
    value::{FunctionValue, SetKey, Value},
};
