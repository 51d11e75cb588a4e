//! # Error Taxonomy for the QL Toolchain
//!
//! This module defines the two error enums returned at the toolchain's
//! two boundaries: [`CompileError`], returned by `compile` for anything
//! lexing, parsing, semantic analysis, or code generation rejects, and
//! [`RuntimeError`], returned internally by the VM's instruction
//! handlers while executing an already-compiled program.
//!
//! ## Design
//! - [`CompileError`] has three variants, one per way a compile can
//!   fail: `Syntax` (an unexpected token; carries the offending
//!   token's line and column), `Semantic` (a type or scope violation;
//!   carries only a message, since no single source position pins down
//!   a scope or arity mismatch), and `Runtime` (a malformed `vm_asm`
//!   block caught during code generation — grouped with the runtime
//!   class rather than `Semantic` because its cause is identical to an
//!   actual VM failure: an instruction the machine cannot execute).
//! - [`RuntimeError`] covers every way the VM's instruction dispatch can
//!   fail during execution: division by zero, an out-of-range indexed
//!   or indirect memory access, a negative `MEMCPY_LOCALS`/
//!   `MEMSET_LOCALS` count, operand stack underflow, an unrecognized
//!   opcode (unreachable today — see the note on `UnknownOpcode`
//!   below), a missing `main` at run time, and `VmInvariant`, a
//!   catch-all for conditions that should be unreachable given a
//!   correctly compiled program (e.g. an out-of-bounds program
//!   counter).
//!
//! ## Display
//! - Both enums implement [`fmt::Display`] by hand rather than deriving
//!   it, producing one short human-readable line per variant.
//! - Both implement [`std::error::Error`] so they compose with `?` and
//!   the rest of the standard error-handling ecosystem.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    Syntax {
        line: usize,
        col: usize,
        message: String,
    },
    Semantic {
        message: String,
    },
    /// A malformed `vm_asm` instruction encountered during code
    /// generation: an unrecognized mnemonic or a missing operand. Shaped
    /// as a runtime error rather than a semantic one even though it
    /// surfaces at compile time, since its cause is the same as an
    /// actual VM failure.
    Runtime {
        message: String,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Syntax { line, col, message } => {
                write!(f, "syntax error at {line}:{col}: {message}")
            }
            CompileError::Semantic { message } => write!(f, "semantic error: {message}"),
            CompileError::Runtime { message } => write!(f, "runtime error: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    DivisionByZero,
    IndexOutOfRange { index: i64, num_locals: usize },
    NegativeCount(i64),
    StackUnderflow(&'static str),
    /// Named here because the interpreter's error taxonomy includes an
    /// "unknown opcode" class, but this implementation's instruction
    /// stream is a `Vec<Instr>` produced directly by code generation and
    /// dispatched by an exhaustive `match` — there is no decode-from-bytes
    /// step where an unrecognized opcode byte could appear, so no call
    /// site constructs this variant today. Kept for a future bytecode
    /// serialization format (e.g. loading a precompiled program from
    /// disk) that would need to reject an unrecognized opcode byte.
    UnknownOpcode(String),
    MissingMain,
    VmInvariant(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::DivisionByZero => write!(f, "division by zero"),
            RuntimeError::IndexOutOfRange { index, num_locals } => write!(
                f,
                "index {index} out of range for frame of {num_locals} locals"
            ),
            RuntimeError::NegativeCount(n) => write!(f, "negative count: {n}"),
            RuntimeError::StackUnderflow(op) => write!(f, "stack underflow on {op}"),
            RuntimeError::UnknownOpcode(op) => write!(f, "unknown opcode: {op}"),
            RuntimeError::MissingMain => write!(f, "missing main at run time"),
            RuntimeError::VmInvariant(message) => write!(f, "vm invariant violated: {message}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
