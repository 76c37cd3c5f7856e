//! End-to-end scenarios through the public `Executor` pipeline.

use falcon::{CollectStringPrint, ExecOptions, Executor};

fn run(source: &str) -> (i32, String) {
    let mut executor = Executor::with_options(ExecOptions {
        sandbox_root: Some(std::env::temp_dir()),
        ..ExecOptions::default()
    })
    .unwrap();
    let mut print = CollectStringPrint::new();
    let exit = executor.run_source(source, "<test>", &mut print);
    (exit, print.into_output())
}

fn run_ok(source: &str) -> String {
    let (exit, out) = run(source);
    assert_eq!(exit, 0, "expected success for:\n{source}");
    out
}

#[test]
fn scenario_arithmetic_and_assignment() {
    assert_eq!(run_ok("var x := 2; x = x + 5; show(x);"), "7\n");
}

#[test]
fn scenario_control_flow() {
    assert_eq!(
        run_ok("var x := 10; if (x > 5) { show(\"big\"); } else { show(\"small\"); }"),
        "big\n"
    );
}

#[test]
fn scenario_counted_loop() {
    assert_eq!(
        run_ok("var i := 0; var s := 0; while (i < 4) { s = s + i; i = i + 1; } show(s);"),
        "6\n"
    );
}

#[test]
fn scenario_function_and_recursion() {
    assert_eq!(
        run_ok("function add(a: int, b: int): int { return a + b; } show(add(7, 8));"),
        "15\n"
    );
}

#[test]
fn scenario_closure_exercises_ast_fallback() {
    let source = "function make() { var n := 0; function bump() { n = n + 1; return n; } return bump; } \
                  var f := make(); show(f()); show(f()); show(f());";
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn scenario_pattern_match() {
    let source = "function d(x) { return match x { case 0: \"zero\"; case 1: \"one\"; case _: \"other\"; }; } \
                  show(d(0)); show(d(1)); show(d(5));";
    assert_eq!(run_ok(source), "zero\none\nother\n");
}

#[test]
fn scenario_collections() {
    let source = "
        var xs := [1, 2, 3];
        xs[0] = 10;
        var d := { name: \"falcon\", version: 3 };
        var t := (1, 2.5);
        var s := set{1, 2, 2};
        show(xs, len(xs));
        show(d.name, d[\"version\"]);
        show(t[1], len(t));
        show(len(s));
    ";
    assert_eq!(run_ok(source), "[10,2,3] 3\nfalcon 3\n2.5 2\n2\n");
}

#[test]
fn scenario_fixed_array() {
    let source = "var a := array[4]; a[0] = 1; a[3] = \"x\"; show(a.length(), a[0], a[3], a[1]);";
    assert_eq!(run_ok(source), "4 1 x null\n");
}

#[test]
fn scenario_try_catch() {
    let source = "
        function safe_div(a, b) {
            if (b == 0) { throw \"division by zero!\"; }
            return a / b;
        }
        try { show(safe_div(6, 2)); show(safe_div(1, 0)); } catch (e) { show(\"caught:\", e); }
    ";
    assert_eq!(run_ok(source), "3.0\ncaught: division by zero!\n");
}

#[test]
fn scenario_promise_stub() {
    let source = "
        Promise(function(res, rej) { res(\"done\"); }).then(function(v) { show(v); });
        Promise.reject(\"nope\").catch(function(e) { show(\"err:\", e); });
    ";
    assert_eq!(run_ok(source), "done\nerr: nope\n");
}

#[test]
fn scenario_console_and_say() {
    assert_eq!(run_ok("say \"hello\"; console.log(\"world\", 42);"), "hello\nworld 42\n");
}

#[test]
fn scenario_gradual_types_accept_valid_programs() {
    let source = "
        function total(xs: list[int]): int {
            var s: int := 0;
            for var i := 0 to len(xs) - 1 { s = s + xs[i]; }
            return s;
        }
        show(total([1, 2, 3, 4]));
    ";
    assert_eq!(run_ok(source), "10\n");
}

#[test]
fn scenario_higher_order_functions() {
    let source = "
        function apply_twice(f, x) { return f(f(x)); }
        show(apply_twice(function(n) { return n * 3; }, 2));
    ";
    assert_eq!(run_ok(source), "18\n");
}

#[test]
fn scenario_match_with_guards_and_shapes() {
    let source = "
        function shape(v) {
            return match v {
                case []: \"empty\";
                case [x] if x > 100: \"big single\";
                case [x]: \"single\";
                case [x, y]: \"pair\";
                case int: \"number\";
                case _: \"other\";
            };
        }
        show(shape([])); show(shape([500])); show(shape([1])); show(shape([1, 2])); show(shape(9)); show(shape(\"s\"));
    ";
    assert_eq!(run_ok(source), "empty\nbig single\nsingle\npair\nnumber\nother\n");
}

#[test]
fn scenario_regex_builtins() {
    let source = "
        show(regexSearch(\"(\\\\d+)\", \"abc 42 def\"));
        show(regexFindAll(\"[a-z]+\", \"one 2 three\"));
        show(globMatch(\"*.fn\", \"script.fn\"));
    ";
    assert_eq!(run_ok(source), "[\"42\"]\n[\"one\",\"three\"]\ntrue\n");
}

#[test]
fn scenario_file_io_in_sandbox() {
    let source = "
        writeFile(\"falcon-scenario-io.txt\", \"payload 123\");
        show(readFile(\"falcon-scenario-io.txt\"));
    ";
    assert_eq!(run_ok(source), "payload 123\n");
}

#[test]
fn scenario_tuple_singleton_and_empty() {
    assert_eq!(run_ok("show(len(())); show(len((1,))); show((1, 2)[0]);"), "0\n1\n1\n");
}

#[test]
fn scenario_dict_methods_and_subscript_write() {
    let source = "
        var d := { a: 1 };
        d[\"b\"] = 2;
        d.set(\"c\", 3);
        show(d.keys());
        show(d.get(\"b\"), d.get(\"missing\", -1));
    ";
    assert_eq!(run_ok(source), "[\"a\",\"b\",\"c\"]\n2 -1\n");
}
