//! # AST-to-Bytecode Lowering for QL
//!
//! This module turns a checked [`crate::ast::Program`] plus its
//! [`Analysis`] side table into the flat `(instructions, functions,
//! strings)` triple the VM executes.
//!
//! ## Per-function layout
//! [`build_layout`] assigns every local its slot before any code is
//! emitted: parameters occupy `0..num_params` in declaration order, then
//! a pre-order walk of the body hands out the next free index to each
//! `VarDecl` it finds (including ones nested inside `if`/`while`
//! bodies). An `int[N]` consumes `N` consecutive indices, recorded in
//! `arrays`. There is no scope-based slot reuse — every local declared
//! anywhere in the function lives in one flat frame for its entire
//! lifetime, even if its source-level scope has already closed.
//!
//! ## Emission
//! [`CodeGen::emit_expr`]/[`CodeGen::emit_stmt`] walk the AST once,
//! appending to a single flat `Vec<Instr>`. Jump targets are unknown at
//! the point a `Jmp`/`Jz`/`Jnz` is emitted (the code after it hasn't
//! been generated yet), so each is emitted with a placeholder `0`
//! operand and fixed up by [`CodeGen::patch_jump_target`] once the real
//! target position is known. `&&`/`||` lower to the same
//! push-0-or-1-via-conditional-jump shape so that the operand the
//! machine sees is always a plain `bool` int, matching a non-short-circuit
//! comparison's result. Every function body ends with a defensive
//! `PushInt(0); Ret` so a caller always receives a value even if a
//! `void`-returning function falls off the end of its body without an
//! explicit `return`.
//!
//! ## String interning
//! String literals are interned once per distinct value via
//! [`CodeGen::intern_string`]; the code stream only ever carries the
//! resulting small integer id, pushed with `PushInt`.

use std::collections::HashMap;

use crate::ast::{self, AssignTarget, BinaryOp, Expr, ExprKind, Literal, Stmt, UnaryOp};
use crate::bytecode::{FunctionInfo, Instr, Program as BcProgram};
use crate::error::CompileError;
use crate::sema::Analysis;
use crate::types::Type;

struct FunctionLayout {
    num_params: usize,
    local_index: HashMap<String, usize>,
    arrays: HashMap<String, usize>,
    num_locals: usize,
}

impl FunctionLayout {
    /// Resolves a name to its base local index, whether scalar or array.
    fn base_of(&self, name: &str) -> Option<usize> {
        self.local_index.get(name).copied()
    }
}

fn build_layout(func: &ast::Function) -> FunctionLayout {
    let mut local_index = HashMap::new();
    let mut arrays = HashMap::new();
    let mut next = 0usize;

    for param in &func.params {
        local_index.insert(param.name.clone(), next);
        next += 1;
    }
    let num_params = next;

    fn walk(
        body: &[Stmt],
        local_index: &mut HashMap<String, usize>,
        arrays: &mut HashMap<String, usize>,
        next: &mut usize,
    ) {
        for stmt in body {
            match stmt {
                Stmt::VarDecl {
                    name,
                    declared_type,
                    ..
                } => {
                    local_index.insert(name.clone(), *next);
                    if let Some(Type::Array(n)) = declared_type {
                        arrays.insert(name.clone(), *n);
                        *next += n;
                    } else {
                        *next += 1;
                    }
                }
                Stmt::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    walk(then_block, local_index, arrays, next);
                    if let Some(else_body) = else_block {
                        walk(else_body, local_index, arrays, next);
                    }
                }
                Stmt::While { body, .. } => walk(body, local_index, arrays, next),
                _ => {}
            }
        }
    }
    walk(&func.body, &mut local_index, &mut arrays, &mut next);

    FunctionLayout {
        num_params,
        local_index,
        arrays,
        num_locals: next,
    }
}

pub struct CodeGen<'a> {
    instructions: Vec<Instr>,
    functions: Vec<FunctionInfo>,
    name_to_index: HashMap<String, usize>,
    strings: Vec<String>,
    string_index: HashMap<String, usize>,
    analysis: &'a Analysis,
}

impl<'a> CodeGen<'a> {
    pub fn new(analysis: &'a Analysis) -> Self {
        CodeGen {
            instructions: Vec::new(),
            functions: Vec::new(),
            name_to_index: HashMap::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            analysis,
        }
    }

    pub fn generate(mut self, program: &ast::Program) -> Result<BcProgram, CompileError> {
        let layouts: Vec<FunctionLayout> = program.functions.iter().map(build_layout).collect();

        for (i, func) in program.functions.iter().enumerate() {
            self.name_to_index.insert(func.name.clone(), i);
            self.functions.push(FunctionInfo {
                name: func.name.clone(),
                num_params: layouts[i].num_params,
                num_locals: layouts[i].num_locals,
                entry_pc: 0,
            });
        }

        for (i, func) in program.functions.iter().enumerate() {
            let entry_pc = self.instructions.len();
            self.functions[i].entry_pc = entry_pc;
            self.emit_block(&func.body, &layouts[i])?;
            // Every function body ends with a push+ret so a caller
            // always gets a value even if a void function falls off
            // the end without an explicit return.
            self.instructions.push(Instr::PushInt(0));
            self.instructions.push(Instr::Ret);
        }

        let main_index = *self
            .name_to_index
            .get("main")
            .expect("sema guarantees main exists");

        tracing::debug!(
            instructions = self.instructions.len(),
            functions = self.functions.len(),
            "code generation complete"
        );

        Ok(BcProgram {
            instructions: self.instructions,
            functions: self.functions,
            strings: self.strings,
            main_index,
        })
    }

    fn intern_string(&mut self, s: &str) -> usize {
        if let Some(&id) = self.string_index.get(s) {
            return id;
        }
        let id = self.strings.len();
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), id);
        id
    }

    fn emit(&mut self, instr: Instr) -> usize {
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    fn patch_jump_target(&mut self, at: usize, target: usize) {
        match &mut self.instructions[at] {
            Instr::Jmp(t) | Instr::Jz(t) | Instr::Jnz(t) => *t = target,
            other => panic!("attempted to patch a non-jump instruction: {other:?}"),
        }
    }

    fn emit_block(&mut self, body: &[Stmt], layout: &FunctionLayout) -> Result<(), CompileError> {
        for stmt in body {
            self.emit_stmt(stmt, layout)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt, layout: &FunctionLayout) -> Result<(), CompileError> {
        match stmt {
            Stmt::ExprStmt(expr) => {
                // The opcode set has no POP, so a bare expression
                // statement's value is simply left on the operand stack.
                self.emit_expr(expr, layout)?;
            }
            Stmt::VarDecl { name, init, .. } => {
                if let Some(init_expr) = init {
                    self.emit_expr(init_expr, layout)?;
                    let base = layout.base_of(name).expect("layout assigns every declared local");
                    self.emit(Instr::StoreLocal(base));
                }
                // No initializer: the frame's locals start zeroed, which
                // is already the declared variable's default value.
            }
            Stmt::Assign { target, value, .. } => match target {
                AssignTarget::Identifier(name) => {
                    self.emit_expr(value, layout)?;
                    let base = layout.base_of(name).expect("assignment target must be declared");
                    self.emit(Instr::StoreLocal(base));
                }
                AssignTarget::Index(array_expr, index_expr) => {
                    let base = self.array_base(array_expr, layout)?;
                    self.emit_expr(value, layout)?;
                    self.emit_expr(index_expr, layout)?;
                    self.emit(Instr::StoreLocalIdx(base));
                }
            },
            Stmt::Print(value) => {
                self.emit_expr(value, layout)?;
                if self.analysis.types.get(value.id) == &Type::Str {
                    self.emit(Instr::PrintStr);
                } else {
                    self.emit(Instr::PrintInt);
                }
            }
            Stmt::PrintLn(value) => {
                self.emit_expr(value, layout)?;
                if self.analysis.types.get(value.id) == &Type::Str {
                    self.emit(Instr::PrintlnStr);
                } else {
                    self.emit(Instr::PrintlnInt);
                }
            }
            Stmt::Return(value, _) => {
                match value {
                    Some(expr) => self.emit_expr(expr, layout)?,
                    None => {
                        self.emit(Instr::PushInt(0));
                    }
                }
                self.emit(Instr::Ret);
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.emit_expr(cond, layout)?;
                let jz_to_else = self.emit(Instr::Jz(0));
                self.emit_block(then_block, layout)?;
                let jmp_to_end = self.emit(Instr::Jmp(0));
                let else_pc = self.instructions.len();
                self.patch_jump_target(jz_to_else, else_pc);
                if let Some(else_body) = else_block {
                    self.emit_block(else_body, layout)?;
                }
                let end_pc = self.instructions.len();
                self.patch_jump_target(jmp_to_end, end_pc);
            }
            Stmt::While { cond, body } => {
                let top_pc = self.instructions.len();
                self.emit_expr(cond, layout)?;
                let jz_to_end = self.emit(Instr::Jz(0));
                self.emit_block(body, layout)?;
                self.emit(Instr::Jmp(top_pc));
                let end_pc = self.instructions.len();
                self.patch_jump_target(jz_to_end, end_pc);
            }
            Stmt::Asm(_) => {
                // Opaque passthrough for the external assembly backend;
                // the VM ignores it entirely.
            }
            Stmt::VmAsm { lines, line } => {
                self.emit_vm_asm(lines, *line, layout)?;
            }
        }
        Ok(())
    }

    /// Resolves the base local index of an array expression used as an
    /// indexing target. A local's backing store only exists for a bound
    /// variable — there is no local slot to index into for a call result
    /// or any other computed array-typed expression (e.g. `f()[0]` where
    /// `f` returns `int[N]`), so anything other than a bare identifier is
    /// a semantic error caught here rather than earlier: sema only checks
    /// that the sub-expression's resolved *type* is an array, not that
    /// it's addressable.
    fn array_base(&self, array_expr: &Expr, layout: &FunctionLayout) -> Result<usize, CompileError> {
        match &array_expr.kind {
            ExprKind::Identifier(name) => Ok(layout
                .base_of(name)
                .expect("sema validated this identifier resolves")),
            other => Err(CompileError::Semantic {
                message: format!(
                    "array indexing requires a bound array variable, found a computed expression ({other:?})"
                ),
            }),
        }
    }

    fn emit_expr(&mut self, expr: &Expr, layout: &FunctionLayout) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Literal(Literal::Int(n)) => {
                self.emit(Instr::PushInt(*n));
            }
            ExprKind::Literal(Literal::Bool(b)) => {
                self.emit(Instr::PushInt(if *b { 1 } else { 0 }));
            }
            ExprKind::Literal(Literal::Str(s)) => {
                let id = self.intern_string(s);
                self.emit(Instr::PushInt(id as i64));
            }
            ExprKind::Identifier(name) => {
                let base = layout.base_of(name).expect("sema validated this identifier resolves");
                self.emit(Instr::LoadLocal(base));
            }
            ExprKind::Unary(UnaryOp::Neg, inner) => {
                self.emit_expr(inner, layout)?;
                self.emit(Instr::Neg);
            }
            ExprKind::Unary(UnaryOp::Not, inner) => {
                self.emit_expr(inner, layout)?;
                self.emit(Instr::Not);
            }
            ExprKind::Binary(left, BinaryOp::And, right) => {
                self.emit_short_circuit_and(left, right, layout)?;
            }
            ExprKind::Binary(left, BinaryOp::Or, right) => {
                self.emit_short_circuit_or(left, right, layout)?;
            }
            ExprKind::Binary(left, op, right) => {
                self.emit_expr(left, layout)?;
                self.emit_expr(right, layout)?;
                // Sema guarantees comparison operands share a type; strings
                // compare by content through the string table rather than
                // by their interned id, which wouldn't respect ordering.
                let operands_are_str = self.analysis.types.get(left.id) == &Type::Str;
                self.emit(self.binary_opcode(*op, operands_are_str));
            }
            ExprKind::Call(name, args) => {
                self.emit_call(name, args, layout)?;
            }
            ExprKind::Index(array_expr, index_expr) => {
                let base = self.array_base(array_expr, layout)?;
                self.emit_expr(index_expr, layout)?;
                self.emit(Instr::LoadLocalIdx(base));
            }
            ExprKind::AddressOf(target) => match &target.kind {
                ExprKind::Identifier(name) => {
                    let base = layout.base_of(name).expect("sema validated this identifier resolves");
                    self.emit(Instr::PushInt(base as i64));
                }
                ExprKind::Index(array_expr, index_expr) => {
                    let base = self.array_base(array_expr, layout)?;
                    self.emit_expr(index_expr, layout)?;
                    self.emit(Instr::PushInt(base as i64));
                    self.emit(Instr::Add);
                }
                other => panic!("sema validated AddressOf target, found {other:?}"),
            },
        }
        Ok(())
    }

    /// `a && b`: short-circuit via `JZ`. If `a` is false the result is
    /// false and `b`'s side effects are never observed.
    fn emit_short_circuit_and(
        &mut self,
        left: &Expr,
        right: &Expr,
        layout: &FunctionLayout,
    ) -> Result<(), CompileError> {
        self.emit_expr(left, layout)?;
        let jz_false_1 = self.emit(Instr::Jz(0));
        self.emit_expr(right, layout)?;
        let jz_false_2 = self.emit(Instr::Jz(0));
        self.emit(Instr::PushInt(1));
        let jmp_end = self.emit(Instr::Jmp(0));
        let false_pc = self.instructions.len();
        self.patch_jump_target(jz_false_1, false_pc);
        self.patch_jump_target(jz_false_2, false_pc);
        self.emit(Instr::PushInt(0));
        let end_pc = self.instructions.len();
        self.patch_jump_target(jmp_end, end_pc);
        Ok(())
    }

    /// `a || b`: short-circuit via `JNZ`. If `a` is true the result is
    /// true and `b`'s side effects are never observed.
    fn emit_short_circuit_or(
        &mut self,
        left: &Expr,
        right: &Expr,
        layout: &FunctionLayout,
    ) -> Result<(), CompileError> {
        self.emit_expr(left, layout)?;
        let jnz_true_1 = self.emit(Instr::Jnz(0));
        self.emit_expr(right, layout)?;
        let jnz_true_2 = self.emit(Instr::Jnz(0));
        self.emit(Instr::PushInt(0));
        let jmp_end = self.emit(Instr::Jmp(0));
        let true_pc = self.instructions.len();
        self.patch_jump_target(jnz_true_1, true_pc);
        self.patch_jump_target(jnz_true_2, true_pc);
        self.emit(Instr::PushInt(1));
        let end_pc = self.instructions.len();
        self.patch_jump_target(jmp_end, end_pc);
        Ok(())
    }

    fn binary_opcode(&self, op: BinaryOp, operands_are_str: bool) -> Instr {
        match op {
            BinaryOp::Add => Instr::Add,
            BinaryOp::Sub => Instr::Sub,
            BinaryOp::Mul => Instr::Mul,
            BinaryOp::Div => Instr::Div,
            BinaryOp::Eq if operands_are_str => Instr::StrCmpEq,
            BinaryOp::Ne if operands_are_str => Instr::StrCmpNe,
            BinaryOp::Lt if operands_are_str => Instr::StrCmpLt,
            BinaryOp::Le if operands_are_str => Instr::StrCmpLe,
            BinaryOp::Gt if operands_are_str => Instr::StrCmpGt,
            BinaryOp::Ge if operands_are_str => Instr::StrCmpGe,
            BinaryOp::Eq => Instr::CmpEq,
            BinaryOp::Ne => Instr::CmpNe,
            BinaryOp::Lt => Instr::CmpLt,
            BinaryOp::Le => Instr::CmpLe,
            BinaryOp::Gt => Instr::CmpGt,
            BinaryOp::Ge => Instr::CmpGe,
            // And/Or are lowered separately via short-circuit helpers.
            BinaryOp::And | BinaryOp::Or => unreachable!("handled by short-circuit lowering"),
        }
    }

    fn emit_call(&mut self, name: &str, args: &[Expr], layout: &FunctionLayout) -> Result<(), CompileError> {
        match name {
            "load16" => {
                self.emit_expr(&args[0], layout)?;
                self.emit(Instr::LoadIndirect);
            }
            "store16" => {
                self.emit_expr(&args[0], layout)?;
                self.emit_expr(&args[1], layout)?;
                self.emit(Instr::StoreIndirect);
            }
            "memcpy" => {
                self.emit_expr(&args[0], layout)?;
                self.emit_expr(&args[1], layout)?;
                self.emit_expr(&args[2], layout)?;
                self.emit(Instr::MemcpyLocals);
            }
            "memset" => {
                self.emit_expr(&args[0], layout)?;
                self.emit_expr(&args[1], layout)?;
                self.emit_expr(&args[2], layout)?;
                self.emit(Instr::MemsetLocals);
            }
            "array_push" => {
                let base = self.array_base(&args[0], layout)?;
                self.emit_expr(&args[2], layout)?; // v
                self.emit_expr(&args[1], layout)?; // len
                self.emit(Instr::StoreLocalIdx(base));
                self.emit_expr(&args[1], layout)?; // len
                self.emit(Instr::PushInt(1));
                self.emit(Instr::Add);
            }
            "array_pop" => {
                let base = self.array_base(&args[0], layout)?;
                self.emit_expr(&args[1], layout)?; // len
                self.emit(Instr::PushInt(1));
                self.emit(Instr::Sub);
                self.emit(Instr::LoadLocalIdx(base));
            }
            "ct_eq" => {
                self.emit_expr(&args[0], layout)?;
                self.emit_expr(&args[1], layout)?;
                self.emit(Instr::CmpEq);
            }
            "ct_select" => {
                // y + (x - y) * m
                self.emit_expr(&args[2], layout)?; // y
                self.emit_expr(&args[1], layout)?; // x
                self.emit_expr(&args[2], layout)?; // y
                self.emit(Instr::Sub);
                self.emit_expr(&args[0], layout)?; // m
                self.emit(Instr::Mul);
                self.emit(Instr::Add);
            }
            _ => {
                for arg in args {
                    self.emit_expr(arg, layout)?;
                }
                let fn_id = *self
                    .name_to_index
                    .get(name)
                    .expect("sema validated this call target resolves");
                self.emit(Instr::Call(fn_id));
            }
        }
        Ok(())
    }

    fn emit_vm_asm(&mut self, lines: &[String], line: usize, layout: &FunctionLayout) -> Result<(), CompileError> {
        for raw in lines {
            let mut parts = raw.split_whitespace();
            let mnemonic = parts.next().unwrap_or("");
            let instr = match mnemonic {
                "push_int" => {
                    let n: i64 = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| vm_asm_error(line, "push_int requires an integer operand"))?;
                    Instr::PushInt(n)
                }
                "load_local" => {
                    let name = parts
                        .next()
                        .ok_or_else(|| vm_asm_error(line, "load_local requires a name"))?;
                    let base = layout
                        .base_of(name)
                        .ok_or_else(|| vm_asm_error(line, &format!("unknown local '{name}' in vm_asm")))?;
                    Instr::LoadLocal(base)
                }
                "store_local" => {
                    let name = parts
                        .next()
                        .ok_or_else(|| vm_asm_error(line, "store_local requires a name"))?;
                    let base = layout
                        .base_of(name)
                        .ok_or_else(|| vm_asm_error(line, &format!("unknown local '{name}' in vm_asm")))?;
                    Instr::StoreLocal(base)
                }
                "add" => Instr::Add,
                "sub" => Instr::Sub,
                "mul" => Instr::Mul,
                "div" => Instr::Div,
                "neg" => Instr::Neg,
                "not" => Instr::Not,
                "cmp_eq" => Instr::CmpEq,
                "cmp_ne" => Instr::CmpNe,
                "cmp_lt" => Instr::CmpLt,
                "cmp_le" => Instr::CmpLe,
                "cmp_gt" => Instr::CmpGt,
                "cmp_ge" => Instr::CmpGe,
                other => {
                    return Err(vm_asm_error(line, &format!("unrecognized vm_asm instruction '{other}'")))
                }
            };
            self.emit(instr);
        }
        Ok(())
    }
}

fn vm_asm_error(line: usize, message: &str) -> CompileError {
    CompileError::Runtime {
        message: format!("line {line}: malformed vm_asm instruction: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::sema;

    fn compile(src: &str) -> BcProgram {
        let tokens = Lexer::new(src).tokenize();
        let program = Parser::new(tokens).parse_program().unwrap();
        let analysis = sema::analyze(&program).unwrap();
        CodeGen::new(&analysis).generate(&program).unwrap()
    }

    #[test]
    fn every_function_has_defensive_epilogue() {
        let program = compile("fn main(): int { return 0; }");
        let main = &program.functions[program.main_index];
        let tail = &program.instructions[program.instructions.len() - 2..];
        assert_eq!(tail, &[Instr::PushInt(0), Instr::Ret]);
        assert_eq!(main.entry_pc, 0);
    }

    #[test]
    fn array_layout_consumes_consecutive_slots() {
        let program = compile("fn main(): int { let xs: int[3]; let y: int = 1; return y; }");
        let main = &program.functions[program.main_index];
        // xs occupies 0..3, y occupies index 3.
        assert_eq!(main.num_locals, 4);
    }

    #[test]
    fn and_short_circuit_emits_conditional_jumps() {
        let program = compile(
            "fn side(): bool { println(1); return true; } fn main(): int { if (false && side()) { } return 0; }",
        );
        assert!(program
            .instructions
            .iter()
            .any(|i| matches!(i, Instr::Jz(_))));
    }

    #[test]
    fn string_equality_lowers_to_table_lookup_comparison() {
        let program = compile(
            "fn main(): int { let a: str = \"x\"; let b: str = \"y\"; if (a == b) { } return 0; }",
        );
        assert!(program.instructions.contains(&Instr::StrCmpEq));
        assert!(!program.instructions.contains(&Instr::CmpEq));
    }

    #[test]
    fn int_equality_still_lowers_to_plain_cmp_eq() {
        let program = compile("fn main(): int { if (1 == 2) { } return 0; }");
        assert!(program.instructions.contains(&Instr::CmpEq));
        assert!(!program.instructions.contains(&Instr::StrCmpEq));
    }

    #[test]
    fn indexing_a_call_result_is_a_semantic_error_not_a_panic() {
        let tokens = Lexer::new(
            "fn f(): int[3] { return 0; } fn main(): int { println(f()[0]); return 0; }",
        )
        .tokenize();
        let program = Parser::new(tokens).parse_program().unwrap();
        let analysis = sema::analyze(&program).unwrap();
        let result = CodeGen::new(&analysis).generate(&program);
        assert!(matches!(result, Err(CompileError::Semantic { .. })));
    }
}
