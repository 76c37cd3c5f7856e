//! Error taxonomy and exit-code behavior through the public API.

use falcon::{lex, parse_source, CollectStringPrint, ErrorKind, ExecOptions, Executor, TypeChecker};

fn run(source: &str) -> (i32, String, String) {
    let mut executor = Executor::with_options(ExecOptions {
        sandbox_root: Some(std::env::temp_dir()),
        ..ExecOptions::default()
    })
    .unwrap();
    let mut print = CollectStringPrint::new();
    let exit = executor.run_source(source, "<test>", &mut print);
    let err = print.error_output().to_owned();
    (exit, print.into_output(), err)
}

#[test]
fn lexical_errors() {
    assert_eq!(lex("\"open").unwrap_err().kind(), ErrorKind::Lexical);
    assert_eq!(lex("/* open").unwrap_err().kind(), ErrorKind::Lexical);
    assert_eq!(lex("a & b").unwrap_err().kind(), ErrorKind::Lexical);
    assert_eq!(lex("var x := 99999999999999999999;").unwrap_err().kind(), ErrorKind::Lexical);
    let err = lex("@").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lexical);
    assert!(err.loc().is_some());
}

#[test]
fn parse_errors() {
    for source in [
        "var := 1;",
        "if (x { }",
        "for var i := 0 { }",
        "1 + 2 = 3;",
        "function f( { }",
        "match x { case : 1; }",
    ] {
        let err = parse_source(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse, "for source: {source}");
    }
}

#[test]
fn type_errors() {
    for source in [
        "var x: int := \"no\";",
        "function f(): int { return \"s\"; }",
        "function g(a: string) { return a; } g(1);",
        "var x := 1 - \"two\";",
    ] {
        let ast = parse_source(source).unwrap();
        let err = TypeChecker::new().check(&ast).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type, "for source: {source}");
    }
}

#[test]
fn runtime_errors_exit_one() {
    for source in [
        "missing();",
        "var x := 3; x();",
        "const k := 1; k = 2;",
        "show(1 / 0);",
        "for var i := 0 to 5 step 0 { }",
        "throw \"unhandled\";",
        "assert(false, \"nope\");",
    ] {
        let (exit, _, _) = run(source);
        assert_eq!(exit, 1, "for source: {source}");
    }
}

#[test]
fn exit_code_surfaces() {
    let (exit, out, err) = run("show(\"working\"); exit(5);");
    assert_eq!(exit, 5);
    assert_eq!(out, "working\n");
    // a requested exit is not an error report
    assert!(err.is_empty());
}

#[test]
fn exit_zero_by_default() {
    let (exit, _, _) = run("exit();");
    assert_eq!(exit, 0);
}

#[test]
fn break_outside_loop_both_paths() {
    // compile-time on the VM path; the fallback interpreter then raises
    // it at runtime, so the program still fails cleanly
    let (exit, _, _) = run("break;");
    assert_eq!(exit, 1);
    let (exit, _, _) = run("function f() { break; } f();");
    assert_eq!(exit, 1);
}

#[test]
fn sandbox_escape_is_rejected() {
    let (exit, _, _) = run("readFile(\"../../etc/passwd\");");
    assert_eq!(exit, 1);
    let (exit, _, _) = run("writeFile(\"/etc/falcon-test\", \"x\");");
    assert_eq!(exit, 1);
}

#[test]
fn console_error_goes_to_stderr() {
    let (exit, out, err) = run("console.error(\"bad thing\", 7);");
    assert_eq!(exit, 0);
    assert_eq!(out, "");
    assert_eq!(err, "ERROR: bad thing 7\n");
}

#[test]
fn catch_binds_thrown_value_only() {
    // runtime errors are not catchable; only thrown values are
    let (exit, out, _) = run("try { var x := 1 / 0; } catch (e) { show(\"caught\"); }");
    assert_eq!(exit, 1);
    assert_eq!(out, "");

    let (exit, out, _) = run("try { throw [1, 2]; } catch (e) { show(len(e)); }");
    assert_eq!(exit, 0);
    assert_eq!(out, "2\n");
}

#[test]
fn annotated_globals_guard_assignments() {
    let (exit, _, _) = run("var n: int := 1; n = 2; show(n);");
    assert_eq!(exit, 0);
}

#[test]
fn set_operations_errors() {
    let (exit, _, _) = run("var s := set{1}; s.remove(9);");
    assert_eq!(exit, 1);
    let (exit, _, _) = run("var s := set{[1]};");
    assert_eq!(exit, 1);
}

#[test]
fn index_out_of_bounds() {
    let (exit, _, _) = run("var xs := [1]; show(xs[5]);");
    assert_eq!(exit, 1);
    let (exit, _, _) = run("var a := array[2]; a[2] = 1;");
    assert_eq!(exit, 1);
}
