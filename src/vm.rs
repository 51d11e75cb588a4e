//! # QL Stack Machine
//!
//! This module is the interpreter: it walks a compiled [`Program`]'s
//! flat instruction buffer and executes it against an [`OutputSink`].
//!
//! ## High-level model
//! - **Operand stack (`stack: Vec<u16>`)**: every value the machine
//!   manipulates is a 16-bit word, stored raw — the individual opcode
//!   handlers decide whether to reinterpret a word as signed or
//!   unsigned (see [`ops_arith`]).
//! - **Current frame (`frame: Frame`)**: the active function
//!   invocation's locals, zero-initialized at `CALL` time.
//! - **Call stack (`call_stack: Vec<(usize, Frame)>`)**: one
//!   `(return_pc, caller's frame)` entry pushed per `CALL`, popped by
//!   the matching `RET`.
//! - **Program counter (`pc`)**: index into `program.instructions`.
//! - **Advance flag (`advance_pc`)**: sidesteps the post-dispatch `pc
//!   += 1` for any instruction that already set `pc` itself (jumps,
//!   calls, returns).
//! - **Cancellation (`cancel: &CancelToken`)**: polled once at the top
//!   of every dispatch; a cancelled token stops execution immediately
//!   with [`VmOutcome::Stopped`], distinct from both a clean finish and
//!   a [`RuntimeError`].
//!
//! ## Module split
//! Arithmetic, comparisons, and unary `NOT` live in [`ops_arith`];
//! control flow, call/return, indexed and indirect memory access, and
//! `print`/`println` live in [`ops_control`]. Each handler function
//! takes exactly the pieces of machine state it touches rather than the
//! whole interpreter, so the dispatch loop below reads as a flat table
//! of `opcode -> handler call`.
//!
//! ## Error behavior
//! Any handler returning `Err(RuntimeError)` immediately aborts
//! execution; there is no handler-level recovery or unwinding, matching
//! a stack machine with no exception mechanism of its own.

use crate::bytecode::{Instr, Program};
use crate::driver::{CancelToken, OutputSink};
use crate::error::RuntimeError;

mod ops_arith;
mod ops_control;

use ops_control::{Frame, RetOutcome};

/// Pops a single operand, or reports the operand-stack underflow that
/// would otherwise panic on an empty `Vec::pop`.
pub(super) fn pop(stack: &mut Vec<u16>) -> Result<u16, RuntimeError> {
    stack.pop().ok_or(RuntimeError::StackUnderflow("operand stack"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VmOutcome {
    Finished(i32),
    Stopped,
}

/// Executes `program` against `sink`, observing `cancel` before every
/// instruction dispatch. Returns the interpreter's outcome, or the
/// first runtime error encountered.
pub fn execute(
    program: &Program,
    sink: &mut dyn OutputSink,
    cancel: &CancelToken,
) -> Result<VmOutcome, RuntimeError> {
    let main = program
        .functions
        .get(program.main_index)
        .ok_or(RuntimeError::MissingMain)?;

    let mut stack: Vec<u16> = Vec::new();
    let mut frame = Frame::zeroed(main.num_locals);
    let mut call_stack: Vec<(usize, Frame)> = Vec::new();
    let mut pc = main.entry_pc;

    loop {
        if cancel.is_cancelled() {
            return Ok(VmOutcome::Stopped);
        }

        let instr = program
            .instructions
            .get(pc)
            .ok_or_else(|| RuntimeError::VmInvariant(format!("pc {pc} out of bounds")))?;

        let mut advance_pc = true;

        match instr {
            Instr::PushInt(n) => stack.push(*n as i16 as u16),
            Instr::LoadLocal(i) => stack.push(frame.locals[*i]),
            Instr::StoreLocal(i) => {
                let v = pop(&mut stack)?;
                frame.locals[*i] = v;
            }
            Instr::Add => ops_arith::handle_add(&mut stack)?,
            Instr::Sub => ops_arith::handle_sub(&mut stack)?,
            Instr::Mul => ops_arith::handle_mul(&mut stack)?,
            Instr::Div => ops_arith::handle_div(&mut stack)?,
            Instr::Neg => ops_arith::handle_neg(&mut stack)?,
            Instr::Not => ops_arith::handle_not(&mut stack)?,
            Instr::CmpEq => ops_arith::handle_cmp_eq(&mut stack)?,
            Instr::CmpNe => ops_arith::handle_cmp_ne(&mut stack)?,
            Instr::CmpLt => ops_arith::handle_cmp_lt(&mut stack)?,
            Instr::CmpLe => ops_arith::handle_cmp_le(&mut stack)?,
            Instr::CmpGt => ops_arith::handle_cmp_gt(&mut stack)?,
            Instr::CmpGe => ops_arith::handle_cmp_ge(&mut stack)?,
            Instr::StrCmpEq => ops_arith::handle_str_cmp_eq(&mut stack, &program.strings)?,
            Instr::StrCmpNe => ops_arith::handle_str_cmp_ne(&mut stack, &program.strings)?,
            Instr::StrCmpLt => ops_arith::handle_str_cmp_lt(&mut stack, &program.strings)?,
            Instr::StrCmpLe => ops_arith::handle_str_cmp_le(&mut stack, &program.strings)?,
            Instr::StrCmpGt => ops_arith::handle_str_cmp_gt(&mut stack, &program.strings)?,
            Instr::StrCmpGe => ops_arith::handle_str_cmp_ge(&mut stack, &program.strings)?,
            Instr::Jmp(target) => ops_control::handle_jump(*target, &mut pc, &mut advance_pc),
            Instr::Jz(target) => {
                ops_control::handle_jz(*target, &mut stack, &mut pc, &mut advance_pc)?
            }
            Instr::Jnz(target) => {
                ops_control::handle_jnz(*target, &mut stack, &mut pc, &mut advance_pc)?
            }
            Instr::Call(fn_id) => {
                let func = program
                    .functions
                    .get(*fn_id)
                    .ok_or_else(|| RuntimeError::VmInvariant(format!("unknown function id {fn_id}")))?;
                ops_control::handle_call(
                    func,
                    &mut stack,
                    &mut frame,
                    &mut call_stack,
                    &mut pc,
                    &mut advance_pc,
                )?;
            }
            Instr::Ret => {
                match ops_control::handle_ret(&mut stack, &mut frame, &mut call_stack, &mut pc, &mut advance_pc) {
                    RetOutcome::ExitCode(code) => return Ok(VmOutcome::Finished(code as i16 as i32)),
                    RetOutcome::Returned => {}
                }
            }
            Instr::LoadLocalIdx(base) => ops_control::handle_load_local_idx(*base, &mut stack, &frame)?,
            Instr::StoreLocalIdx(base) => {
                ops_control::handle_store_local_idx(*base, &mut stack, &mut frame)?
            }
            Instr::LoadIndirect => ops_control::handle_load_indirect(&mut stack, &frame)?,
            Instr::StoreIndirect => ops_control::handle_store_indirect(&mut stack, &mut frame)?,
            Instr::MemcpyLocals => ops_control::handle_memcpy_locals(&mut stack, &mut frame)?,
            Instr::MemsetLocals => ops_control::handle_memset_locals(&mut stack, &mut frame)?,
            Instr::PrintInt => ops_control::handle_print_int(&mut stack, sink)?,
            Instr::PrintStr => ops_control::handle_print_str(&mut stack, &program.strings, sink)?,
            Instr::PrintlnInt => ops_control::handle_println_int(&mut stack, sink)?,
            Instr::PrintlnStr => ops_control::handle_println_str(&mut stack, &program.strings, sink)?,
        }

        if advance_pc {
            pc += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::StringSink;

    fn compile(src: &str) -> Program {
        let tokens = crate::lexer::Lexer::new(src).tokenize();
        let program = crate::parser::Parser::new(tokens).parse_program().unwrap();
        let analysis = crate::sema::analyze(&program).unwrap();
        crate::codegen::CodeGen::new(&analysis).generate(&program).unwrap()
    }

    fn run_source(src: &str) -> (VmOutcome, String) {
        let program = compile(src);
        let mut sink = StringSink::default();
        let cancel = CancelToken::new();
        let outcome = execute(&program, &mut sink, &cancel).unwrap();
        (outcome, sink.buffer)
    }

    #[test]
    fn println_and_exit_code() {
        let (outcome, out) = run_source("fn main(): int { println(42); return 0; }");
        assert_eq!(outcome, VmOutcome::Finished(0));
        assert_eq!(out, "42\n");
    }

    #[test]
    fn function_call_returns_value() {
        let (outcome, out) = run_source(
            "fn add(a: int, b: int): int { return a + b; } fn main(): int { println(add(2,3)); return 0; }",
        );
        assert_eq!(outcome, VmOutcome::Finished(0));
        assert_eq!(out, "5\n");
    }

    #[test]
    fn while_loop_accumulates_output() {
        let (outcome, out) = run_source(
            "fn main(): int { let i: int = 0; while (i < 3) { println(i); i = i + 1; } return 0; }",
        );
        assert_eq!(outcome, VmOutcome::Finished(0));
        assert_eq!(out, "0\n1\n2\n");
    }

    #[test]
    fn array_indexing_roundtrips() {
        let (outcome, out) = run_source(
            "fn main(): int { let xs: int[3]; xs[0]=10; xs[1]=20; xs[2]=30; println(xs[1]); return 0; }",
        );
        assert_eq!(outcome, VmOutcome::Finished(0));
        assert_eq!(out, "20\n");
    }

    #[test]
    fn short_circuit_and_skips_right_side_effects() {
        let (outcome, out) = run_source(
            "fn side(): int { println(\"boom\"); return 1; } fn main(): int { if (false && side() == 1) { println(\"x\"); } return 0; }",
        );
        assert_eq!(outcome, VmOutcome::Finished(0));
        assert_eq!(out, "");
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let program = compile("fn main(): int { let a: int = 10; let b: int = 0; println(a / b); return 0; }");
        let mut sink = StringSink::default();
        let cancel = CancelToken::new();
        let err = execute(&program, &mut sink, &cancel).unwrap_err();
        assert_eq!(err, RuntimeError::DivisionByZero);
    }

    #[test]
    fn cancellation_stops_before_completion() {
        let program = compile(
            "fn main(): int { let i: int = 0; while (i < 1000000) { i = i + 1; } return 0; }",
        );
        let mut sink = StringSink::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = execute(&program, &mut sink, &cancel).unwrap();
        assert_eq!(outcome, VmOutcome::Stopped);
    }

    #[test]
    fn string_literal_prints_interned_contents() {
        let (outcome, out) = run_source("fn main(): int { let s: str = \"hi\"; print(s); return 1; }");
        assert_eq!(outcome, VmOutcome::Finished(1));
        assert_eq!(out, "hi");
    }
}
