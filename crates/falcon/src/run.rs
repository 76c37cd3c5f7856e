//! Public interface for running Falcon code.
//!
//! [`Executor`] owns the session state: the shared globals (builtins plus
//! accumulated user definitions), the sandbox, and the in-memory compile
//! cache keyed by path and mtime. Each run executes against a fork of the
//! globals, merged back on success, so the documented fallback (a compile
//! error or VM failure re-runs the module on the tree interpreter) always
//! starts from a clean state.

use std::{collections::HashMap, path::PathBuf, rc::Rc, time::SystemTime};

use crate::{
    ast::Stmt,
    builtins::{builtin_names, install_builtins},
    bytecode::{compile_module, Code, Vm},
    env::{EnvRef, Environment},
    error::{ErrorKind, FalconError, RunResult},
    interp::Interpreter,
    io::PrintWriter,
    parse::parse_source,
    sandbox::Sandbox,
    tracer::{ExecTracer, NoopTracer, StderrTracer},
    typecheck::TypeChecker,
};

/// Configuration for an [`Executor`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Run the gradual type checker before compiling. On by default.
    pub type_check: bool,
    /// Trace instruction dispatch and fallbacks to stderr.
    pub verbose: bool,
    /// Base directory for the file-I/O sandbox; the working directory
    /// when unset.
    pub sandbox_root: Option<PathBuf>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            type_check: true,
            verbose: false,
            sandbox_root: None,
        }
    }
}

/// Exit codes produced by `run_source`/`run_file`.
mod exit_code {
    pub const OK: i32 = 0;
    pub const ERROR: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const READ_FAILED: i32 = 3;
    pub const INTERNAL: i32 = 4;
}

/// Module-level declaration metadata the VM path needs at runtime.
///
/// `STORE_GLOBAL` carries no declaration info, so `const` and annotation
/// guards for module names are registered on the run environment before
/// execution.
#[derive(Debug, Clone)]
struct DeclMeta {
    name: String,
    is_const: bool,
    ann: Option<String>,
}

/// Collects `const`/annotated declarations, recursing into the nested
/// statement forms the compiler flattens into globals at module scope.
fn module_decl_meta(stmts: &[Stmt]) -> Vec<DeclMeta> {
    fn walk(stmts: &[Stmt], out: &mut Vec<DeclMeta>) {
        for stmt in stmts {
            match stmt {
                Stmt::Let {
                    name, is_const, ann, ..
                } if *is_const || ann.is_some() => out.push(DeclMeta {
                    name: name.clone(),
                    is_const: *is_const,
                    ann: ann.clone(),
                }),
                Stmt::Block(body) | Stmt::Loop { body } | Stmt::For { body, .. } => walk(body, out),
                Stmt::If {
                    then_branch,
                    else_branch,
                    ..
                } => {
                    walk(std::slice::from_ref(then_branch), out);
                    if let Some(else_branch) = else_branch {
                        walk(std::slice::from_ref(else_branch), out);
                    }
                }
                Stmt::While { body, .. } => walk(std::slice::from_ref(body), out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(stmts, &mut out);
    out
}

/// Session-scoped executor: globals, builtins, sandbox, compile cache.
pub struct Executor {
    globals: EnvRef,
    sandbox: Sandbox,
    options: ExecOptions,
    cache: HashMap<PathBuf, (SystemTime, Rc<Code>, Vec<DeclMeta>)>,
}

impl Executor {
    pub fn new() -> RunResult<Self> {
        Self::with_options(ExecOptions::default())
    }

    pub fn with_options(options: ExecOptions) -> RunResult<Self> {
        let globals = Environment::new_global();
        install_builtins(&globals)?;
        let sandbox = match &options.sandbox_root {
            Some(root) => Sandbox::new(root.clone()),
            None => Sandbox::current_dir()?,
        };
        Ok(Self {
            globals,
            sandbox,
            options,
            cache: HashMap::new(),
        })
    }

    /// The shared globals environment (builtins are `const` bindings).
    #[must_use]
    pub fn globals(&self) -> &EnvRef {
        &self.globals
    }

    /// Lexes, parses, and compiles a module against the current globals.
    pub fn compile_source(&self, source: &str, name: &str) -> RunResult<Rc<Code>> {
        let ast = parse_source(source)?;
        self.compile(&ast, name)
    }

    /// Compiles an already-parsed module.
    pub fn compile(&self, ast: &[Stmt], name: &str) -> RunResult<Rc<Code>> {
        compile_module(ast, name, &builtin_names(&self.globals))
    }

    /// Runs source text; errors are rendered to stderr with file and
    /// position context, and mapped to the documented exit codes.
    pub fn run_source(&mut self, source: &str, filename: &str, print: &mut impl PrintWriter) -> i32 {
        match self.eval_source(source, filename, print) {
            Ok(()) => exit_code::OK,
            Err(err) => {
                report(&err, filename, source);
                error_exit_code(&err)
            }
        }
    }

    /// Runs a script file with the compile cache and file-level exit
    /// codes (2 file not found, 3 read error).
    pub fn run_file(&mut self, path: &str, print: &mut impl PrintWriter) -> i32 {
        let path_buf = PathBuf::from(path);
        let metadata = match std::fs::metadata(&path_buf) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                eprintln!("File not found: {path}");
                return exit_code::NOT_FOUND;
            }
            Err(_) => {
                eprintln!("File not found: {path}");
                return exit_code::NOT_FOUND;
            }
        };
        let source = match std::fs::read_to_string(&path_buf) {
            Ok(source) => source,
            Err(err) => {
                eprintln!("Failed to read file {path}: {err}");
                return exit_code::READ_FAILED;
            }
        };
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        let cached = self
            .cache
            .get(&path_buf)
            .filter(|(cached_mtime, _, _)| *cached_mtime == mtime)
            .map(|(_, code, meta)| (Rc::clone(code), meta.clone()));
        let result = match cached {
            Some((code, meta)) => self.eval_compiled(&code, &meta, &source, print),
            None => self.eval_source_caching(&source, path, Some((path_buf, mtime)), print),
        };
        match result {
            Ok(()) => exit_code::OK,
            Err(err) => {
                report(&err, path, &source);
                error_exit_code(&err)
            }
        }
    }

    /// Full pipeline with the documented fallback policy; errors are
    /// returned, not rendered.
    pub fn eval_source(&mut self, source: &str, _filename: &str, print: &mut impl PrintWriter) -> RunResult<()> {
        self.eval_source_caching(source, _filename, None, print)
    }

    fn eval_source_caching(
        &mut self,
        source: &str,
        _filename: &str,
        cache_key: Option<(PathBuf, SystemTime)>,
        print: &mut impl PrintWriter,
    ) -> RunResult<()> {
        let ast = parse_source(source)?;
        if self.options.type_check {
            TypeChecker::new().check(&ast)?;
        }
        let decl_meta = module_decl_meta(&ast);
        match self.compile(&ast, "<module>") {
            Ok(code) => {
                if let Some((path, mtime)) = cache_key {
                    self.cache.insert(path, (mtime, Rc::clone(&code), decl_meta.clone()));
                }
                match self.run_vm_attempt(&code, &decl_meta, print) {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == ErrorKind::Exit => Err(err),
                    Err(err) => {
                        self.tracer()
                            .on_fallback(&format!("vm error: {err}"));
                        self.run_interp_attempt(&ast, print)
                    }
                }
            }
            Err(err) => {
                self.tracer().on_fallback(&format!("{err}"));
                self.run_interp_attempt(&ast, print)
            }
        }
    }

    /// Cache-hit path: run the compiled module, re-parsing only if the VM
    /// fails and the interpreter fallback needs the AST.
    fn eval_compiled(
        &mut self,
        code: &Rc<Code>,
        decl_meta: &[DeclMeta],
        source: &str,
        print: &mut impl PrintWriter,
    ) -> RunResult<()> {
        match self.run_vm_attempt(code, decl_meta, print) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::Exit => Err(err),
            Err(err) => {
                self.tracer().on_fallback(&format!("vm error: {err}"));
                let ast = parse_source(source)?;
                self.run_interp_attempt(&ast, print)
            }
        }
    }

    /// One VM attempt against a fork of the session globals, merged back
    /// on success.
    fn run_vm_attempt(&mut self, code: &Rc<Code>, decl_meta: &[DeclMeta], print: &mut impl PrintWriter) -> RunResult<()> {
        let run_env = Environment::fork(&self.globals);
        for meta in decl_meta {
            Environment::declare_meta(&run_env, &meta.name, meta.is_const, meta.ann.as_deref());
        }
        let mut tracer = self.tracer();
        let result = {
            let mut vm = Vm::new(Rc::clone(&run_env), &self.sandbox, print, tracer.as_mut());
            vm.run_code(code)
        };
        match result {
            Ok(_) => {
                Environment::merge_into(&self.globals, &run_env);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// One tree-interpreter attempt, also forked and merged on success.
    fn run_interp_attempt(&mut self, ast: &[Stmt], print: &mut impl PrintWriter) -> RunResult<()> {
        let run_env = Environment::fork(&self.globals);
        let mut tracer = self.tracer();
        let result = {
            let mut interp = Interpreter::new(Rc::clone(&run_env), &self.sandbox, print, tracer.as_mut());
            interp.interpret(ast)
        };
        match result {
            Ok(()) => {
                Environment::merge_into(&self.globals, &run_env);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn tracer(&self) -> Box<dyn ExecTracer> {
        if self.options.verbose {
            Box::new(StderrTracer::new())
        } else {
            Box::new(NoopTracer)
        }
    }
}

fn error_exit_code(err: &FalconError) -> i32 {
    match err.kind() {
        ErrorKind::Exit => err.exit_code(),
        ErrorKind::Internal => exit_code::INTERNAL,
        _ => exit_code::ERROR,
    }
}

/// Renders an error with file name, position, the offending source line,
/// and a caret column marker.
#[must_use]
pub fn format_error_context(filename: &str, source: &str, err: &FalconError) -> String {
    let Some(loc) = err.loc() else {
        return format!("{filename}: {err}");
    };
    let mut out = format!("{filename}:{}:{}: {err}", loc.line, loc.col);
    let line_no = loc.line as usize;
    if let Some(line) = source.lines().nth(line_no.saturating_sub(1)) {
        out.push_str(&format!("\n  {line}"));
        if loc.col > 0 {
            let caret = usize::min(loc.col as usize - 1, line.len().saturating_sub(1));
            out.push_str(&format!("\n  {}^", " ".repeat(caret)));
        }
    }
    out
}

fn report(err: &FalconError, filename: &str, source: &str) {
    if err.kind() == ErrorKind::Exit {
        return;
    }
    eprintln!("{}", format_error_context(filename, source, err));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectStringPrint;

    fn executor() -> Executor {
        Executor::with_options(ExecOptions {
            type_check: true,
            verbose: false,
            sandbox_root: Some(std::env::temp_dir()),
        })
        .unwrap()
    }

    fn run(source: &str) -> (i32, String) {
        let mut executor = executor();
        let mut print = CollectStringPrint::new();
        let code = executor.run_source(source, "<test>", &mut print);
        (code, print.into_output())
    }

    #[test]
    fn test_run_source_success() {
        let (code, out) = run("var x := 2; x = x + 5; show(x);");
        assert_eq!(code, 0);
        assert_eq!(out, "7\n");
    }

    #[test]
    fn test_parse_error_is_exit_one() {
        let (code, _) = run("var := 1;");
        assert_eq!(code, 1);
    }

    #[test]
    fn test_type_error_is_exit_one() {
        let (code, _) = run("var x: int := \"no\";");
        assert_eq!(code, 1);
    }

    #[test]
    fn test_runtime_error_is_exit_one() {
        let (code, _) = run("undefined_fn();");
        assert_eq!(code, 1);
    }

    #[test]
    fn test_exit_builtin_code_passthrough() {
        let (code, out) = run("show(\"before\"); exit(7); show(\"after\");");
        assert_eq!(code, 7);
        assert_eq!(out, "before\n");
    }

    #[test]
    fn test_module_with_match_falls_back_to_interpreter() {
        // match has no opcode counterpart: the module compiles with an
        // error and the runner re-runs it on the tree interpreter
        let (code, out) = run("var r := match 3 { case 3: \"three\"; case _: \"other\"; }; show(r);");
        assert_eq!(code, 0);
        assert_eq!(out, "three\n");
    }

    #[test]
    fn test_collections_run_through_fallback() {
        let (code, out) = run("var xs := [1, 2, 3]; show(xs[1] + xs[2]);");
        assert_eq!(code, 0);
        assert_eq!(out, "5\n");
    }

    #[test]
    fn test_repl_style_state_persists_across_runs() {
        let mut executor = executor();
        let mut print = CollectStringPrint::new();
        assert_eq!(executor.run_source("var x := 41;", "<repl>", &mut print), 0);
        assert_eq!(executor.run_source("show(x + 1);", "<repl>", &mut print), 0);
        assert_eq!(print.output(), "42\n");
    }

    #[test]
    fn test_failed_run_does_not_pollute_session_globals() {
        let mut executor = executor();
        let mut print = CollectStringPrint::new();
        // the const is stored, then the run fails; the session fork is
        // discarded so the name stays free
        assert_eq!(executor.run_source("const k := 1; boom();", "<repl>", &mut print), 1);
        assert_eq!(executor.run_source("const k := 2; show(k);", "<repl>", &mut print), 0);
        assert_eq!(print.output(), "2\n");
    }

    #[test]
    fn test_const_reassignment_across_runs_is_rejected() {
        let mut executor = executor();
        let mut print = CollectStringPrint::new();
        assert_eq!(executor.run_source("const k := 1;", "<repl>", &mut print), 0);
        assert_eq!(executor.run_source("k = 2;", "<repl>", &mut print), 1);
    }

    #[test]
    fn test_format_error_context_has_caret() {
        let source = "var x := ;";
        let err = parse_source(source).unwrap_err();
        let rendered = format_error_context("script.fn", source, &err);
        assert!(rendered.starts_with("script.fn:1:"));
        assert!(rendered.contains("var x := ;"));
        assert!(rendered.lines().last().unwrap().trim_end().ends_with('^'));
    }

    #[test]
    fn test_run_file_not_found_is_exit_two() {
        let mut executor = executor();
        let mut print = CollectStringPrint::new();
        assert_eq!(executor.run_file("/definitely/not/there.fn", &mut print), 2);
    }

    #[test]
    fn test_run_file_uses_compile_cache() {
        let dir = std::env::temp_dir().join("falcon-cache-test");
        std::fs::create_dir_all(&dir).unwrap();
        let script = dir.join("cached.fn");
        std::fs::write(&script, "show(1 + 1);").unwrap();

        let mut executor = Executor::with_options(ExecOptions {
            type_check: true,
            verbose: false,
            sandbox_root: Some(dir),
        })
        .unwrap();
        let mut print = CollectStringPrint::new();
        let path = script.to_string_lossy().into_owned();
        assert_eq!(executor.run_file(&path, &mut print), 0);
        assert_eq!(executor.run_file(&path, &mut print), 0);
        assert_eq!(print.output(), "2\n2\n");
        assert_eq!(executor.cache.len(), 1);
    }

    #[test]
    fn test_vm_path_const_is_guarded() {
        // STORE_GLOBAL honors the const metadata registered from the AST
        let (code, _) = run("const k := 1; k = 2;");
        assert_eq!(code, 1);
    }

    #[test]
    fn test_vm_path_annotation_is_guarded() {
        let mut executor = executor();
        let mut print = CollectStringPrint::new();
        assert_eq!(executor.run_source("var n: int := 1;", "<repl>", &mut print), 0);
        // the annotation survives into the next run's globals
        assert_eq!(executor.run_source("n = \"no\";", "<repl>", &mut print), 1);
    }

    #[test]
    fn test_uncaught_throw_is_exit_one() {
        let (code, _) = run("throw \"up\";");
        assert_eq!(code, 1);
    }

    #[test]
    fn test_caught_throw_is_fine() {
        let (code, out) = run("try { throw 1; } catch (e) { show(\"ok\", e); }");
        assert_eq!(code, 0);
        assert_eq!(out, "ok 1\n");
    }
}
