//! End-to-end scenarios against the public `compile`/`run` seam, the
//! way a host application would use the crate.

use ql_runtime::driver::{self, CancelToken, RunOutcome, StringSink};

fn run_source(src: &str) -> (RunOutcome, String) {
    let program = driver::compile(src).expect("source should compile");
    let mut sink = StringSink::default();
    let cancel = CancelToken::new();
    let outcome = driver::run(&program, &mut sink, &cancel);
    (outcome, sink.buffer)
}

#[test]
fn println_int_literal() {
    let (outcome, out) = run_source("fn main(): int { println(42); return 0; }");
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "42\n");
}

#[test]
fn print_string_with_nonzero_exit_code() {
    let (outcome, out) = run_source("fn main(): int { let s: str = \"hi\"; print(s); return 1; }");
    assert_eq!(outcome, RunOutcome::Finished(1));
    assert_eq!(out, "hi");
}

#[test]
fn user_function_call() {
    let (outcome, out) = run_source(
        "fn add(a: int, b: int): int { return a + b; } fn main(): int { println(add(2,3)); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "5\n");
}

#[test]
fn while_loop_counts_up() {
    let (outcome, out) = run_source(
        "fn main(): int { let i: int = 0; while (i < 3) { println(i); i = i + 1; } return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn fixed_size_array_read_and_write() {
    let (outcome, out) = run_source(
        "fn main(): int { let xs: int[3]; xs[0]=10; xs[1]=20; xs[2]=30; println(xs[1]); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "20\n");
}

#[test]
fn short_circuit_and_skips_call_side_effects() {
    let (outcome, out) = run_source(
        "fn side(): int { println(\"boom\"); return 1; } fn main(): int { if (false && side() == 1) { println(\"x\"); } return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "");
}

#[test]
fn division_by_zero_is_a_runtime_error_not_a_panic() {
    let (outcome, _out) = run_source(
        "fn main(): int { let a: int = 10; let b: int = 0; println(a / b); return 0; }",
    );
    match outcome {
        RunOutcome::RuntimeError(message) => assert!(message.contains("division by zero")),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn short_circuit_or_skips_call_side_effects() {
    let (outcome, out) = run_source(
        "fn side(): bool { println(\"boom\"); return true; } fn main(): int { if (true || side()) { println(\"y\"); } return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "y\n");
}

#[test]
fn builtin_pointer_load_store_roundtrip() {
    let (outcome, out) = run_source(
        "fn main(): int { let x: int = 7; let p: ptr = &x; store16(p, 99); println(load16(p)); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "99\n");
}

#[test]
fn builtin_array_push_and_pop() {
    let (outcome, out) = run_source(
        "fn main(): int { let xs: int[4]; let n: int = 0; n = array_push(xs, n, 5); n = array_push(xs, n, 6); println(array_pop(xs, n)); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "6\n");
}

#[test]
fn builtin_ct_select_picks_branch_by_mask() {
    let (outcome, out) = run_source(
        "fn main(): int { println(ct_select(1, 10, 20)); println(ct_select(0, 10, 20)); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "10\n20\n");
}

#[test]
fn string_comparisons_are_lexicographic() {
    let (outcome, out) = run_source(
        r#"fn main(): int {
            let a: str = "apple";
            let b: str = "banana";
            if (a < b) { println(1); } else { println(0); }
            if (a == a) { println(1); } else { println(0); }
            if (a == b) { println(1); } else { println(0); }
            return 0;
        }"#,
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "1\n1\n0\n");
}

#[test]
fn recursive_function_calls_work() {
    let (outcome, out) = run_source(
        "fn fact(n: int): int { if (n <= 1) { return 1; } return n * fact(n - 1); } fn main(): int { println(fact(5)); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "120\n");
}

#[test]
fn arithmetic_wraps_modulo_2_16() {
    let (outcome, out) = run_source(
        "fn main(): int { let a: int = 32767; let b: int = 1; println(a + b); return 0; }",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    // Printing is neither a comparison nor a division, so the result
    // prints as the raw unsigned 16-bit word (32768), not as -32768.
    assert_eq!(out, "32768\n");
}

#[test]
fn printing_a_negative_value_shows_its_unsigned_word() {
    let (outcome, out) = run_source("fn main(): int { println(0 - 1); return 0; }");
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "65535\n");
}

#[test]
fn vm_asm_block_lowers_directly() {
    let (outcome, out) = run_source(
        "fn main(): int { let a: int = 2; let b: int = 3; vm_asm { load_local a; load_local b; add; } return 0; } ",
    );
    assert_eq!(outcome, RunOutcome::Finished(0));
    assert_eq!(out, "");
}

#[test]
fn syntax_error_reports_line_and_column() {
    let err = driver::compile("fn main(): int { return 0 }").unwrap_err();
    match err {
        ql_runtime::CompileError::Syntax { line, .. } => assert_eq!(line, 1),
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn semantic_error_on_missing_main() {
    let err = driver::compile("fn f(): int { return 0; }").unwrap_err();
    assert!(matches!(err, ql_runtime::CompileError::Semantic { .. }));
}

#[test]
fn cancellation_reports_stopped_not_an_error() {
    let program = driver::compile(
        "fn main(): int { let i: int = 0; while (i < 1000000) { i = i + 1; } return 0; }",
    )
    .unwrap();
    let mut sink = StringSink::default();
    let cancel = CancelToken::new();
    cancel.cancel();
    let outcome = driver::run(&program, &mut sink, &cancel);
    assert_eq!(outcome, RunOutcome::Stopped);
}
