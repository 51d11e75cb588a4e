//! # Arithmetic, Comparison, and Unary Operations for the QL VM
//!
//! This module implements the stack-machine semantics for every
//! arithmetic, comparison, and unary opcode.
//!
//! ## Execution model
//! Each handler pops its operand(s) off the back of the operand stack
//! (right operand first, then left, matching infix `a op b`), computes
//! a result, and pushes exactly one `u16` back — returning
//! `Result<(), RuntimeError>` so callers can propagate a fault with `?`.
//!
//! ## Type & coercion rules
//! - `+`, `-`, `*`, and unary `-` are the same bit pattern whether the
//!   16-bit word is read as signed or unsigned, so they operate on
//!   `u16` directly via wrapping ops (modulo 2^16).
//! - `/` and all six comparisons reinterpret both operands as `i16`
//!   (signed) before operating, since truncating division and ordering
//!   comparisons are meaningless without a sign.
//! - `!` (`handle_not`) is logical negation on a `bool`-shaped word
//!   (zero maps to 1, nonzero maps to 0) — not a bitwise complement.
//!
//! ## Error behavior
//! Division by zero is the only failure mode in this module; it
//! returns `RuntimeError::DivisionByZero` before computing anything.

use super::pop;
use crate::error::RuntimeError;

pub(super) fn handle_add(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    stack.push(a.wrapping_add(b));
    Ok(())
}

pub(super) fn handle_sub(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    stack.push(a.wrapping_sub(b));
    Ok(())
}

pub(super) fn handle_mul(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    stack.push(a.wrapping_mul(b));
    Ok(())
}

pub(super) fn handle_div(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)? as i16;
    if b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let a = pop(stack)? as i16;
    // Rust's `/` on signed integers truncates toward zero.
    stack.push(a.wrapping_div(b) as u16);
    Ok(())
}

pub(super) fn handle_neg(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    stack.push(v.wrapping_neg());
    Ok(())
}

/// Logical NOT: zero maps to 1, nonzero maps to 0. This is distinct from
/// a bitwise complement; QL's `!` operates on `bool`, not `int`.
pub(super) fn handle_not(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let v = pop(stack)?;
    stack.push(if v == 0 { 1 } else { 0 });
    Ok(())
}

fn push_bool(stack: &mut Vec<u16>, v: bool) {
    stack.push(if v { 1 } else { 0 });
}

pub(super) fn handle_cmp_eq(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, a == b);
    Ok(())
}

pub(super) fn handle_cmp_ne(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, a != b);
    Ok(())
}

pub(super) fn handle_cmp_lt(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)? as i16;
    let a = pop(stack)? as i16;
    push_bool(stack, a < b);
    Ok(())
}

pub(super) fn handle_cmp_le(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)? as i16;
    let a = pop(stack)? as i16;
    push_bool(stack, a <= b);
    Ok(())
}

pub(super) fn handle_cmp_gt(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)? as i16;
    let a = pop(stack)? as i16;
    push_bool(stack, a > b);
    Ok(())
}

pub(super) fn handle_cmp_ge(stack: &mut Vec<u16>) -> Result<(), RuntimeError> {
    let b = pop(stack)? as i16;
    let a = pop(stack)? as i16;
    push_bool(stack, a >= b);
    Ok(())
}

/// String-table lookup comparisons: operands are interned string ids;
/// the handler resolves them through `strings` and compares content
/// rather than id, so ordering comparisons are lexicographic rather
/// than by interning order.
fn resolve<'a>(strings: &'a [String], id: u16) -> &'a str {
    strings.get(id as usize).map(String::as_str).unwrap_or("")
}

pub(super) fn handle_str_cmp_eq(stack: &mut Vec<u16>, strings: &[String]) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, resolve(strings, a) == resolve(strings, b));
    Ok(())
}

pub(super) fn handle_str_cmp_ne(stack: &mut Vec<u16>, strings: &[String]) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, resolve(strings, a) != resolve(strings, b));
    Ok(())
}

pub(super) fn handle_str_cmp_lt(stack: &mut Vec<u16>, strings: &[String]) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, resolve(strings, a) < resolve(strings, b));
    Ok(())
}

pub(super) fn handle_str_cmp_le(stack: &mut Vec<u16>, strings: &[String]) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, resolve(strings, a) <= resolve(strings, b));
    Ok(())
}

pub(super) fn handle_str_cmp_gt(stack: &mut Vec<u16>, strings: &[String]) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, resolve(strings, a) > resolve(strings, b));
    Ok(())
}

pub(super) fn handle_str_cmp_ge(stack: &mut Vec<u16>, strings: &[String]) -> Result<(), RuntimeError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    push_bool(stack, resolve(strings, a) >= resolve(strings, b));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wraps_modulo_2_16() {
        let mut stack = vec![0xFFFFu16, 1];
        handle_add(&mut stack).unwrap();
        assert_eq!(stack, vec![0]);
    }

    #[test]
    fn div_truncates_toward_zero() {
        let mut stack = vec![(-7i16) as u16, 2];
        handle_div(&mut stack).unwrap();
        assert_eq!(stack.pop().unwrap() as i16, -3);
    }

    #[test]
    fn div_by_zero_errors() {
        let mut stack = vec![10u16, 0];
        assert_eq!(handle_div(&mut stack), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn logical_not_is_not_bitwise() {
        let mut stack = vec![5u16];
        handle_not(&mut stack).unwrap();
        assert_eq!(stack, vec![0]);
        let mut stack = vec![0u16];
        handle_not(&mut stack).unwrap();
        assert_eq!(stack, vec![1]);
    }

    #[test]
    fn string_comparison_is_lexicographic_not_by_id() {
        // Ids are assigned in interning order ("zebra" id 0, "apple" id 1),
        // the reverse of lexicographic order; a by-id compare would get
        // "zebra" < "apple" wrong.
        let strings = vec!["zebra".to_string(), "apple".to_string()];
        let mut stack = vec![0u16, 1u16];
        handle_str_cmp_lt(&mut stack, &strings).unwrap();
        assert_eq!(stack.pop().unwrap(), 0);

        let mut stack = vec![0u16, 1u16];
        handle_str_cmp_gt(&mut stack, &strings).unwrap();
        assert_eq!(stack.pop().unwrap(), 1);
    }

    #[test]
    fn string_equality_compares_content() {
        let strings = vec!["hi".to_string(), "hi".to_string()];
        let mut stack = vec![0u16, 1u16];
        handle_str_cmp_eq(&mut stack, &strings).unwrap();
        assert_eq!(stack.pop().unwrap(), 1);
    }
}
