//! Control-flow, call/return, indexed memory, and I/O operations for the
//! QL VM.
//!
//! Handlers operate directly on the operand stack and update the
//! control registers (`pc`, `advance_pc`) the main loop checks after
//! every dispatch. Jumps and calls disable `advance_pc` so the loop
//! doesn't also step past the target.

use crate::bytecode::FunctionInfo;
use crate::driver::OutputSink;
use crate::error::RuntimeError;

use super::pop;

pub(super) struct Frame {
    pub locals: Vec<u16>,
}

impl Frame {
    pub fn zeroed(num_locals: usize) -> Self {
        Frame {
            locals: vec![0; num_locals],
        }
    }
}

pub(super) fn handle_jump(target: usize, pc: &mut usize, advance_pc: &mut bool) {
    *pc = target;
    *advance_pc = false;
}

pub(super) fn handle_jz(
    target: usize,
    stack: &mut Vec<u16>,
    pc: &mut usize,
    advance_pc: &mut bool,
) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    if v == 0 {
        *pc = target;
        *advance_pc = false;
    }
    Ok(())
}

pub(super) fn handle_jnz(
    target: usize,
    stack: &mut Vec<u16>,
    pc: &mut usize,
    advance_pc: &mut bool,
) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    if v != 0 {
        *pc = target;
        *advance_pc = false;
    }
    Ok(())
}

/// `CALL fn_id`: pop exactly `num_params` values, save `(pc, locals)`,
/// install a fresh zero-initialized frame, copy arguments into
/// `0..num_params`, jump to `entry_pc`.
pub(super) fn handle_call(
    func: &FunctionInfo,
    stack: &mut Vec<u16>,
    frame: &mut Frame,
    call_stack: &mut Vec<(usize, Frame)>,
    pc: &mut usize,
    advance_pc: &mut bool,
) -> Result<(), RuntimeError> {
    let mut args = Vec::with_capacity(func.num_params);
    for _ in 0..func.num_params {
        args.push(pop(stack)?);
    }
    args.reverse();

    let mut new_frame = Frame::zeroed(func.num_locals);
    new_frame.locals[..args.len()].copy_from_slice(&args);

    let saved = std::mem::replace(frame, new_frame);
    call_stack.push((*pc + 1, saved));
    *pc = func.entry_pc;
    *advance_pc = false;
    Ok(())
}

/// `RET`: pop the return value (0 if the stack is empty). An empty call
/// stack means we're returning from `main`: that value becomes the
/// program's exit code. Otherwise restore the caller's `(pc, locals)`
/// and push the return value onto its stack.
pub(super) enum RetOutcome {
    ExitCode(u16),
    Returned,
}

pub(super) fn handle_ret(
    stack: &mut Vec<u16>,
    frame: &mut Frame,
    call_stack: &mut Vec<(usize, Frame)>,
    pc: &mut usize,
    advance_pc: &mut bool,
) -> RetOutcome {
    let ret_val = stack.pop().unwrap_or(0);
    match call_stack.pop() {
        None => RetOutcome::ExitCode(ret_val),
        Some((ret_pc, caller_frame)) => {
            *frame = caller_frame;
            *pc = ret_pc;
            *advance_pc = false;
            stack.push(ret_val);
            RetOutcome::Returned
        }
    }
}

fn check_slot(slot: i64, num_locals: usize) -> Result<usize, RuntimeError> {
    if slot < 0 || slot as usize >= num_locals {
        return Err(RuntimeError::IndexOutOfRange {
            index: slot,
            num_locals,
        });
    }
    Ok(slot as usize)
}

pub(super) fn handle_load_local_idx(
    base: usize,
    stack: &mut Vec<u16>,
    frame: &Frame,
) -> Result<(), RuntimeError> {
    let idx = pop(stack)? as i64;
    let slot = check_slot(base as i64 + idx, frame.locals.len())?;
    stack.push(frame.locals[slot]);
    Ok(())
}

/// Pops `(value, idx)` — the interpreter pops the index first (it was
/// pushed last by the code generator's `push v; push i` sequence).
pub(super) fn handle_store_local_idx(
    base: usize,
    stack: &mut Vec<u16>,
    frame: &mut Frame,
) -> Result<(), RuntimeError> {
    let idx = pop(stack)? as i64;
    let value = pop(stack)?;
    let slot = check_slot(base as i64 + idx, frame.locals.len())?;
    frame.locals[slot] = value;
    Ok(())
}

pub(super) fn handle_load_indirect(stack: &mut Vec<u16>, frame: &Frame) -> Result<(), RuntimeError> {
    let ptr = pop(stack)? as i64;
    let slot = check_slot(ptr, frame.locals.len())?;
    stack.push(frame.locals[slot]);
    Ok(())
}

/// Pops `(pointer, value)` — value was pushed last, so it is popped
/// first.
pub(super) fn handle_store_indirect(stack: &mut Vec<u16>, frame: &mut Frame) -> Result<(), RuntimeError> {
    let value = pop(stack)?;
    let ptr = pop(stack)? as i64;
    let slot = check_slot(ptr, frame.locals.len())?;
    frame.locals[slot] = value;
    Ok(())
}

/// Pops `(dst, src, count)`; copies `count` locals from `src` to `dst`
/// in ascending order. Overlap is not handled specially.
pub(super) fn handle_memcpy_locals(stack: &mut Vec<u16>, frame: &mut Frame) -> Result<(), RuntimeError> {
    let count = pop(stack)? as i64;
    let src = pop(stack)? as i64;
    let dst = pop(stack)? as i64;
    if count < 0 {
        return Err(RuntimeError::NegativeCount(count));
    }
    let n = frame.locals.len();
    check_slot(dst + count - 1, n).or_else(|_| if count == 0 { Ok(0) } else { check_slot(dst, n) })?;
    check_slot(src + count - 1, n).or_else(|_| if count == 0 { Ok(0) } else { check_slot(src, n) })?;
    for i in 0..count {
        let s = check_slot(src + i, n)?;
        let d = check_slot(dst + i, n)?;
        frame.locals[d] = frame.locals[s];
    }
    Ok(())
}

/// Pops `(dst, value, count)`; fills `count` locals starting at `dst`
/// with `value`.
pub(super) fn handle_memset_locals(stack: &mut Vec<u16>, frame: &mut Frame) -> Result<(), RuntimeError> {
    let count = pop(stack)? as i64;
    let value = pop(stack)?;
    let dst = pop(stack)? as i64;
    if count < 0 {
        return Err(RuntimeError::NegativeCount(count));
    }
    let n = frame.locals.len();
    for i in 0..count {
        let d = check_slot(dst + i, n)?;
        frame.locals[d] = value;
    }
    Ok(())
}

/// Prints the raw unsigned 16-bit word: stack words are only ever
/// reinterpreted as signed for comparisons and division (§4.5), never
/// for output, so `println(0 - 1)` prints `65535`, not `-1`.
pub(super) fn handle_print_int(stack: &mut Vec<u16>, sink: &mut dyn OutputSink) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    sink.write_str(&v.to_string());
    Ok(())
}

pub(super) fn handle_println_int(stack: &mut Vec<u16>, sink: &mut dyn OutputSink) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    sink.write_line(&v.to_string());
    Ok(())
}

pub(super) fn handle_print_str(
    stack: &mut Vec<u16>,
    strings: &[String],
    sink: &mut dyn OutputSink,
) -> Result<(), RuntimeError> {
    let id = pop(stack)? as usize;
    let s = strings.get(id).map(String::as_str).unwrap_or("");
    sink.write_str(s);
    Ok(())
}

pub(super) fn handle_println_str(
    stack: &mut Vec<u16>,
    strings: &[String],
    sink: &mut dyn OutputSink,
) -> Result<(), RuntimeError> {
    let id = pop(stack)? as usize;
    let s = strings.get(id).map(String::as_str).unwrap_or("");
    sink.write_line(s);
    Ok(())
}
