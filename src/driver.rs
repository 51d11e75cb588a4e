//! The host seam: the only two entry points an embedding application
//! (a GUI editor, a test harness, a CLI) needs to call.
//!
//! `run` is a synchronous call; cancellation is a plain flag the caller
//! may flip from another thread while a run is in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bytecode::Program;
use crate::codegen::CodeGen;
use crate::error::CompileError;
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::sema;
use crate::vm;

/// Where the interpreter's `print`/`println` output goes. Abstracts over
/// stdout, an in-memory buffer, or a callback into a host application.
pub trait OutputSink {
    fn write_str(&mut self, s: &str);

    fn write_line(&mut self, s: &str) {
        self.write_str(s);
        self.write_str("\n");
    }
}

/// Writes directly to process stdout.
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_str(&mut self, s: &str) {
        print!("{s}");
    }
}

/// Collects output into an in-memory string, useful for tests and for
/// embedding in a host that wants the whole run's output at once.
#[derive(Default)]
pub struct StringSink {
    pub buffer: String,
}

impl OutputSink for StringSink {
    fn write_str(&mut self, s: &str) {
        self.buffer.push_str(s);
    }
}

/// Single-writer, single-reader cooperative cancellation flag. The host
/// holds a clone and calls [`CancelToken::cancel`] from any thread; the
/// interpreter polls [`CancelToken::is_cancelled`] once per instruction
/// dispatch, bounding stop latency to one instruction.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The result of a `run` call. Cancellation is not an error — it is a
/// distinct outcome so hosts can tell a user abort from a bug.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Finished(i32),
    Stopped,
    RuntimeError(String),
}

/// Lexes, parses, and semantically analyzes `source`, then lowers it to
/// bytecode. Returns the first error encountered.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    let tokens = Lexer::new(source).tokenize();
    let program = Parser::new(tokens).parse_program()?;
    let analysis = sema::analyze(&program)?;
    CodeGen::new(&analysis).generate(&program)
}

/// Executes a compiled program against `sink`, observing `cancel`
/// between every instruction dispatch.
pub fn run(program: &Program, sink: &mut dyn OutputSink, cancel: &CancelToken) -> RunOutcome {
    match vm::execute(program, sink, cancel) {
        Ok(vm::VmOutcome::Finished(code)) => RunOutcome::Finished(code),
        Ok(vm::VmOutcome::Stopped) => RunOutcome::Stopped,
        Err(e) => RunOutcome::RuntimeError(e.to_string()),
    }
}
