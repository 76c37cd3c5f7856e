//! Structural pattern matching through the full pipeline.

use falcon::{CollectStringPrint, ExecOptions, Executor};

fn run_ok(source: &str) -> String {
    let mut executor = Executor::with_options(ExecOptions {
        sandbox_root: Some(std::env::temp_dir()),
        ..ExecOptions::default()
    })
    .unwrap();
    let mut print = CollectStringPrint::new();
    let exit = executor.run_source(source, "<test>", &mut print);
    assert_eq!(exit, 0, "expected success for:\n{source}");
    print.into_output()
}

#[test]
fn basic_match_expression() {
    let source = "
        function describe_value(x) {
            return match x {
                case 0: \"zero\";
                case 1: \"one\";
                case _: \"other\";
            };
        }
        show(describe_value(0));
        show(describe_value(1));
        show(describe_value(5));
    ";
    assert_eq!(run_ok(source), "zero\none\nother\n");
}

#[test]
fn list_pattern_shapes() {
    let source = "
        function analyze_list(lst) {
            return match lst {
                case []: \"empty\";
                case [x]: \"single\";
                case [x, y]: \"double\";
                case _: \"longer\";
            };
        }
        show(analyze_list([]));
        show(analyze_list([1]));
        show(analyze_list([1, 2]));
        show(analyze_list([1, 2, 3]));
    ";
    assert_eq!(run_ok(source), "empty\nsingle\ndouble\nlonger\n");
}

#[test]
fn variable_binding_in_arm() {
    let source = "
        function first_element(lst) {
            return match lst {
                case [x]: x;
                case _: null;
            };
        }
        show(first_element([42]));
        show(first_element([]));
    ";
    assert_eq!(run_ok(source), "42\nnull\n");
}

#[test]
fn type_patterns() {
    let source = "
        function type_check(x) {
            return match x {
                case int: \"integer\";
                case str: \"string\";
                case _: \"other\";
            };
        }
        show(type_check(42));
        show(type_check(\"hello\"));
        show(type_check(true));
    ";
    assert_eq!(run_ok(source), "integer\nstring\nother\n");
}

#[test]
fn match_statement_with_blocks() {
    let source = "
        function classify(n) {
            match n {
                case 0: { show(\"nothing\"); }
                case int if n < 0: { show(\"negative\"); }
                case _: { show(\"positive\"); }
            }
        }
        classify(0); classify(-3); classify(7);
    ";
    assert_eq!(run_ok(source), "nothing\nnegative\npositive\n");
}

#[test]
fn or_patterns() {
    let source = "
        function low(x) {
            return match x { case 0 | 1 | 2: true; case _: false; };
        }
        show(low(1)); show(low(2)); show(low(5));
    ";
    assert_eq!(run_ok(source), "true\ntrue\nfalse\n");
}

#[test]
fn tuple_and_dict_patterns() {
    let source = "
        function f(v) {
            return match v {
                case (0, y): y;
                case { kind: \"point\", x: a }: a;
                case _: \"no\";
            };
        }
        show(f((0, 9)));
        show(f({ kind: \"point\", x: 3 }));
        show(f({ kind: \"point\", x: 3, extra: 1 }));
    ";
    // dict patterns require the exact key set
    assert_eq!(run_ok(source), "9\n3\nno\n");
}

#[test]
fn negative_and_string_literal_patterns() {
    let source = "
        function sign(n) {
            return match n { case -1: \"neg\"; case 0: \"zero\"; case 1: \"pos\"; case _: \"big\"; };
        }
        show(sign(-1)); show(sign(0)); show(sign(2));
        show(match \"hi\" { case \"hi\": \"greeting\"; case _: \"other\"; });
    ";
    assert_eq!(run_ok(source), "neg\nzero\npos\nbig\ngreeting\n");
}

#[test]
fn guard_sees_bindings() {
    let source = "
        function f(p) {
            return match p { case (a, b) if a > b: \"first\"; case (a, b): \"second\"; };
        }
        show(f((2, 1))); show(f((1, 2)));
    ";
    assert_eq!(run_ok(source), "first\nsecond\n");
}

#[test]
fn unmatched_match_expression_yields_null() {
    assert_eq!(run_ok("show(match 9 { case 0: 1; });"), "null\n");
}

#[test]
fn match_pattern_builtin_structural() {
    let source = "
        show(matchPattern({ a: 1, b: [1, 2] }, { a: 1, b: [1, 2] }));
        show(matchPattern({ a: 1 }, { a: 2 }));
        show(matchPattern((1, 2), (1, 2)));
    ";
    assert_eq!(run_ok(source), "true\nfalse\ntrue\n");
}
