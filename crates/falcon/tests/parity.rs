//! VM / tree-interpreter parity suite.
//!
//! For any program free of closures, both executors must produce
//! identical stdout. Each case runs once on the bytecode VM alone and
//! once on the tree interpreter alone, against fresh globals.

use falcon::{
    builtin_names, compile_module, install_builtins, parse_source, CollectStringPrint, Environment, Interpreter,
    NoopTracer, Sandbox, Vm,
};

fn run_vm_only(source: &str) -> String {
    let globals = Environment::new_global();
    install_builtins(&globals).unwrap();
    let names = builtin_names(&globals);
    let ast = parse_source(source).unwrap();
    let code = compile_module(&ast, "<parity>", &names).unwrap();
    let sandbox = Sandbox::new(std::env::temp_dir());
    let mut print = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let mut vm = Vm::new(globals, &sandbox, &mut print, &mut tracer);
    vm.run_code(&code).unwrap();
    print.into_output()
}

fn run_interp_only(source: &str) -> String {
    let globals = Environment::new_global();
    install_builtins(&globals).unwrap();
    let ast = parse_source(source).unwrap();
    let sandbox = Sandbox::new(std::env::temp_dir());
    let mut print = CollectStringPrint::new();
    let mut tracer = NoopTracer;
    let mut interp = Interpreter::new(globals, &sandbox, &mut print, &mut tracer);
    interp.interpret(&ast).unwrap();
    print.into_output()
}

fn assert_parity(source: &str) {
    let vm_out = run_vm_only(source);
    let interp_out = run_interp_only(source);
    pretty_assertions::assert_eq!(vm_out, interp_out, "VM and interpreter disagree for:\n{source}");
}

#[test]
fn parity_arithmetic_and_assignment() {
    assert_parity("var x := 2; x = x + 5; show(x);");
}

#[test]
fn parity_numeric_promotion() {
    assert_parity("show(7 / 2); show(6 / 2); show(1 + 0.5); show(2 * 3); show(7 % 3); show(-7 % 3);");
}

#[test]
fn parity_string_coercion() {
    assert_parity("show(\"n=\" + 1); show(1 + \"x\"); show(null + \"!\"); show(true + \"\");");
}

#[test]
fn parity_if_else_branching() {
    assert_parity("var x := 10; if (x > 5) { show(\"big\"); } else { show(\"small\"); }");
    assert_parity("var x := 1; if (x > 5) { show(\"big\"); } else { show(\"small\"); }");
    assert_parity("if 0 { show(\"no\"); } show(\"after\");");
}

#[test]
fn parity_while_loop() {
    assert_parity("var i := 0; var s := 0; while (i < 4) { s = s + i; i = i + 1; } show(s);");
}

#[test]
fn parity_for_loops() {
    assert_parity("var s := 0; for var i := 1 to 4 { s = s + i; } show(s); show(i);");
    assert_parity("for var i := 3 to 1 step -1 { show(i); }");
    assert_parity("for var i := 5 to 1 { show(i); } show(\"empty\");");
    assert_parity("for var i := 0 to 10 step 3 { show(i); }");
}

#[test]
fn parity_loop_with_break() {
    assert_parity("var i := 0; loop { if (i >= 3) { break; } show(i); i = i + 1; }");
    assert_parity("var i := 0; loop i < 2 { show(i); i = i + 1; }");
}

#[test]
fn parity_fused_counter_function() {
    assert_parity(
        "function count() { var i := 0; loop { if (i >= 5000) { break; } i = i + 1; } return i; } show(count());",
    );
    assert_parity(
        "function count() { var i := 0; var s := 0; loop { if (i >= 10) { break; } s = s + i; i = i + 1; } return s; } \
         show(count());",
    );
}

#[test]
fn parity_string_counter_increment() {
    // `i = i + 1` fuses to INC_LOCAL on the VM path but must keep the
    // string-coercing `+` semantics
    assert_parity("function f() { var i := \"x\"; i = i + 1; i = i + 1; return i; } show(f());");
}

#[test]
fn parity_float_fused_counter() {
    // FAST_COUNT must preserve the counter's numeric kind and terminal
    // value, including counters that do not land exactly on the limit
    assert_parity(
        "function count() { var i := 0.5; loop { if (i >= 100) { break; } i = i + 1; } return i; } show(count());",
    );
    assert_parity(
        "function count() { var i := 0.0; loop { if (i >= 100) { break; } i = i + 1; } return i; } show(count());",
    );
    assert_parity(
        "function count() { var i := -3.5; loop { if (i >= 4) { break; } i = i + 1; } return i; } show(count());",
    );
}

#[test]
fn parity_functions_and_recursion() {
    assert_parity("function add(a: int, b: int): int { return a + b; } show(add(7, 8));");
    assert_parity("function fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); } show(fib(12));");
    assert_parity(
        "function is_even(n) { if (n == 0) { return true; } return is_odd(n - 1); } \
         function is_odd(n) { if (n == 0) { return false; } return is_even(n - 1); } \
         show(is_even(8)); show(is_odd(8));",
    );
}

#[test]
fn parity_short_circuit_values() {
    assert_parity("show(0 && 1); show(2 && 3); show(0 || 4); show(5 || 6);");
    assert_parity("show(null || \"fallback\"); show(\"\" && \"x\");");
    assert_parity("var n := 0; function bump() { n = 1; return n; } show(false && bump()); show(true || bump());");
}

#[test]
fn parity_unary_operators() {
    assert_parity("show(!true); show(!0); show(!\"\"); show(-5); show(- (2 + 3));");
}

#[test]
fn parity_comparisons() {
    assert_parity("show(1 < 2, 2 <= 2, 3 > 4, 4 >= 4, 1 == 1.0, 1 != 2);");
    assert_parity("show(\"a\" < \"b\", \"b\" < \"a\", \"abc\" == \"abc\");");
}

#[test]
fn parity_say_statement() {
    assert_parity("say 1 + 2; say \"hi\";");
}

#[test]
fn parity_nested_function_calls() {
    assert_parity(
        "function twice(x) { return x * 2; } function thrice(x) { return x * 3; } show(twice(thrice(2)));",
    );
}

#[test]
fn parity_arity_mismatches() {
    assert_parity("function f(a, b) { return toString(a) + \"|\" + toString(b); } show(f(1)); show(f(1, 2, 3));");
}

#[test]
fn parity_builtin_helpers() {
    assert_parity("show(len(\"hello\")); show(typeOf(1), typeOf(\"s\"), typeOf(null)); show(toString(2.5));");
    assert_parity("show(range(4)); show(range(2, 8, 2));");
}
