//! # Semantic Analysis for QL
//!
//! This module walks a parsed [`crate::ast::Program`] and either
//! produces an [`Analysis`] (a function signature table plus a
//! per-expression type side table, both consumed by code generation) or
//! rejects the program with a [`CompileError::Semantic`].
//!
//! ## Two passes
//! - **Pass 1** ([`analyze`]'s first loop) registers every user
//!   function's signature into [`SignatureTable`], seeded with the
//!   fixed builtin table from [`builtin_table`], and rejects duplicate
//!   or builtin-shadowing function names. It also confirms `main`
//!   exists before pass 2 ever runs.
//! - **Pass 2** ([`check_block`]/[`check_stmt`]/[`check_expr`]) walks
//!   each function body with a lexical [`Scope`] chain — `if`/`while`
//!   bodies open a nested scope that is discarded on exit, so a
//!   variable declared inside a branch never leaks past it.
//!
//! ## Side table
//! [`TypeTable`] is keyed by [`crate::ast::ExprId`] (an integer assigned
//! at parse time) rather than by node identity, so it's a plain `Vec`
//! indexed by id instead of a map keyed on a pointer. `check_expr`
//! populates one entry per visited expression; [`TypeTable::get`]
//! panics if asked for an id that was never visited, which would mean
//! code generation is looking at a node semantic analysis never saw.
//!
//! ## Builtins
//! `array_push`/`array_pop`'s first parameter is typed `Array(0)`, a
//! sentinel matched specially in [`check_expr`]'s `Call` arm (any
//! array length is accepted) since no user-facing signature can name an
//! unsized `int[N]`.
//!
//! ## Rules enforced
//! Variable declarations, assignments, arithmetic/comparison/logical
//! operators, indexing, `&`, `print`/`println`, call arity and
//! argument types, and the "non-void function needs a top-level
//! return" rule are all checked here — see each `check_*` function for
//! the specific rule it enforces.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::CompileError;
use crate::types::Type;

/// `name -> (param_types, return_type)`. Holds user functions and builtins.
pub type SignatureTable = HashMap<String, (Vec<Type>, Type)>;

/// Per-expression resolved types, indexed by `ExprId` — a `Vec` keyed on
/// an integer assigned at parse time rather than a map keyed on node
/// identity.
pub struct TypeTable {
    types: Vec<Option<Type>>,
}

impl TypeTable {
    fn with_capacity(n: usize) -> Self {
        TypeTable {
            types: vec![None; n],
        }
    }

    fn set(&mut self, id: ExprId, ty: Type) {
        if id >= self.types.len() {
            self.types.resize(id + 1, None);
        }
        self.types[id] = Some(ty);
    }

    pub fn get(&self, id: ExprId) -> &Type {
        self.types[id]
            .as_ref()
            .expect("semantic side table missing an entry for a visited expression")
    }
}

pub struct Analysis {
    pub signatures: SignatureTable,
    pub types: TypeTable,
}

struct Scope {
    vars: HashMap<String, Type>,
    parent: Option<Box<Scope>>,
}

impl Scope {
    fn new(parent: Option<Box<Scope>>) -> Self {
        Scope {
            vars: HashMap::new(),
            parent,
        }
    }

    /// Binds `name` in this scope. Redeclaring a name already bound in
    /// the *same* scope is a semantic error (shadowing an outer scope's
    /// binding, e.g. inside a nested `if`/`while`, is fine — only same-scope
    /// redeclaration is rejected here).
    fn declare(&mut self, name: &str, ty: Type) -> Result<(), CompileError> {
        if self.vars.contains_key(name) {
            return Err(semantic_error(format!("redeclaration of variable '{name}'")));
        }
        self.vars.insert(name.to_string(), ty);
        Ok(())
    }

    fn resolve(&self, name: &str) -> Option<&Type> {
        if let Some(ty) = self.vars.get(name) {
            Some(ty)
        } else if let Some(parent) = &self.parent {
            parent.resolve(name)
        } else {
            None
        }
    }
}

fn semantic_error(message: impl Into<String>) -> CompileError {
    CompileError::Semantic {
        message: message.into(),
    }
}

fn builtin_table() -> SignatureTable {
    let mut table = SignatureTable::new();
    table.insert(
        "load16".to_string(),
        (vec![Type::Ptr], Type::Int),
    );
    table.insert(
        "store16".to_string(),
        (vec![Type::Ptr, Type::Int], Type::Void),
    );
    table.insert(
        "memcpy".to_string(),
        (vec![Type::Ptr, Type::Ptr, Type::Int], Type::Void),
    );
    table.insert(
        "memset".to_string(),
        (vec![Type::Ptr, Type::Int, Type::Int], Type::Void),
    );
    // array_push/array_pop take an `int[N]` first argument, a value
    // category that can't appear in any other user-facing signature.
    // `Array(0)` is a placeholder sentinel matched specially by arity
    // checking below rather than by exact equality.
    table.insert(
        "array_push".to_string(),
        (vec![Type::Array(0), Type::Int, Type::Int], Type::Int),
    );
    table.insert(
        "array_pop".to_string(),
        (vec![Type::Array(0), Type::Int], Type::Int),
    );
    table.insert(
        "ct_eq".to_string(),
        (vec![Type::Int, Type::Int], Type::Bool),
    );
    table.insert(
        "ct_select".to_string(),
        (vec![Type::Int, Type::Int, Type::Int], Type::Int),
    );
    table
}

pub fn analyze(program: &Program) -> Result<Analysis, CompileError> {
    let mut signatures = builtin_table();

    // Pass 1: register user signatures, reject duplicates.
    for func in &program.functions {
        if signatures.contains_key(&func.name) && is_builtin(&func.name) {
            return Err(semantic_error(format!(
                "function '{}' shadows a builtin",
                func.name
            )));
        }
        if signatures.contains_key(&func.name) {
            return Err(semantic_error(format!(
                "duplicate function '{}'",
                func.name
            )));
        }
        let param_types = func.params.iter().map(|p| p.ty.clone()).collect();
        let return_type = func.return_type.clone().unwrap_or(Type::Void);
        signatures.insert(func.name.clone(), (param_types, return_type));
    }

    if !program.functions.iter().any(|f| f.name == "main") {
        return Err(semantic_error("missing 'main' function"));
    }

    let mut types = TypeTable::with_capacity(0);

    // Pass 2: walk each body with a lexical scope chain.
    for func in &program.functions {
        let mut scope = Scope::new(None);
        for param in &func.params {
            scope.declare(&param.name, param.ty.clone())?;
        }
        let declared_return = func.return_type.clone();
        check_block(&func.body, &mut scope, &signatures, &mut types, &declared_return)?;

        let is_void = matches!(declared_return, None | Some(Type::Void));
        if !is_void && !contains_top_level_return(&func.body) {
            return Err(semantic_error(format!(
                "non-void function '{}' has no top-level return",
                func.name
            )));
        }
    }

    tracing::debug!(functions = program.functions.len(), "semantic analysis complete");
    Ok(Analysis { signatures, types })
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "load16" | "store16" | "memcpy" | "memset" | "array_push" | "array_pop" | "ct_eq" | "ct_select"
    )
}

fn contains_top_level_return(body: &[Stmt]) -> bool {
    body.iter().any(|s| matches!(s, Stmt::Return(_, _)))
}

fn check_block(
    body: &[Stmt],
    scope: &mut Scope,
    signatures: &SignatureTable,
    types: &mut TypeTable,
    declared_return: &Option<Type>,
) -> Result<(), CompileError> {
    for stmt in body {
        check_stmt(stmt, scope, signatures, types, declared_return)?;
    }
    Ok(())
}

fn check_stmt(
    stmt: &Stmt,
    scope: &mut Scope,
    signatures: &SignatureTable,
    types: &mut TypeTable,
    declared_return: &Option<Type>,
) -> Result<(), CompileError> {
    match stmt {
        Stmt::ExprStmt(expr) => {
            check_expr(expr, scope, signatures, types)?;
        }
        Stmt::VarDecl {
            name,
            declared_type,
            init,
            ..
        } => {
            let ty = match (declared_type, init) {
                (Some(dt), Some(init_expr)) => {
                    let it = check_expr(init_expr, scope, signatures, types)?;
                    if &it != dt {
                        return Err(semantic_error(format!(
                            "variable '{name}' declared as {dt} but initialized with {it}"
                        )));
                    }
                    dt.clone()
                }
                (Some(dt), None) => dt.clone(),
                (None, Some(init_expr)) => check_expr(init_expr, scope, signatures, types)?,
                (None, None) => {
                    return Err(semantic_error(format!(
                        "variable '{name}' needs a declared type or an initializer"
                    )))
                }
            };
            scope.declare(name, ty)?;
        }
        Stmt::Assign { target, value, .. } => {
            let value_ty = check_expr(value, scope, signatures, types)?;
            match target {
                AssignTarget::Identifier(name) => {
                    let Some(var_ty) = scope.resolve(name).cloned() else {
                        return Err(semantic_error(format!("undefined identifier '{name}'")));
                    };
                    if var_ty != value_ty {
                        return Err(semantic_error(format!(
                            "cannot assign {value_ty} to '{name}' of type {var_ty}"
                        )));
                    }
                }
                AssignTarget::Index(array_expr, index_expr) => {
                    let array_ty = check_expr(array_expr, scope, signatures, types)?;
                    if !array_ty.is_array() {
                        return Err(semantic_error("index assignment target is not an array"));
                    }
                    let index_ty = check_expr(index_expr, scope, signatures, types)?;
                    if index_ty != Type::Int {
                        return Err(semantic_error("array index must be int"));
                    }
                    if value_ty != Type::Int {
                        return Err(semantic_error("array element assignment must be int"));
                    }
                }
            }
        }
        Stmt::Print(value) | Stmt::PrintLn(value) => {
            let ty = check_expr(value, scope, signatures, types)?;
            if ty != Type::Int && ty != Type::Str {
                return Err(semantic_error(format!("print/println requires int or str, found {ty}")));
            }
        }
        Stmt::Return(value, _) => {
            if let Some(expr) = value {
                check_expr(expr, scope, signatures, types)?;
            }
            let _ = declared_return;
        }
        Stmt::If {
            cond,
            then_block,
            else_block,
        } => {
            let cond_ty = check_expr(cond, scope, signatures, types)?;
            if cond_ty != Type::Bool {
                return Err(semantic_error("if condition must be bool"));
            }
            let mut then_scope = Scope::new(Some(Box::new(std::mem::replace(scope, Scope::new(None)))));
            check_block(then_block, &mut then_scope, signatures, types, declared_return)?;
            *scope = *then_scope.parent.take().unwrap();
            if let Some(else_body) = else_block {
                let mut else_scope = Scope::new(Some(Box::new(std::mem::replace(scope, Scope::new(None)))));
                check_block(else_body, &mut else_scope, signatures, types, declared_return)?;
                *scope = *else_scope.parent.take().unwrap();
            }
        }
        Stmt::While { cond, body } => {
            let cond_ty = check_expr(cond, scope, signatures, types)?;
            if cond_ty != Type::Bool {
                return Err(semantic_error("while condition must be bool"));
            }
            let mut body_scope = Scope::new(Some(Box::new(std::mem::replace(scope, Scope::new(None)))));
            check_block(body, &mut body_scope, signatures, types, declared_return)?;
            *scope = *body_scope.parent.take().unwrap();
        }
        Stmt::Asm(_) => {}
        Stmt::VmAsm { .. } => {}
    }
    Ok(())
}

fn check_expr(
    expr: &Expr,
    scope: &Scope,
    signatures: &SignatureTable,
    types: &mut TypeTable,
) -> Result<Type, CompileError> {
    let ty = match &expr.kind {
        ExprKind::Literal(Literal::Int(_)) => Type::Int,
        ExprKind::Literal(Literal::Bool(_)) => Type::Bool,
        ExprKind::Literal(Literal::Str(_)) => Type::Str,
        ExprKind::Identifier(name) => scope
            .resolve(name)
            .cloned()
            .ok_or_else(|| semantic_error(format!("undefined identifier '{name}'")))?,
        ExprKind::Unary(UnaryOp::Neg, inner) => {
            let it = check_expr(inner, scope, signatures, types)?;
            if it != Type::Int {
                return Err(semantic_error("unary '-' requires int"));
            }
            Type::Int
        }
        ExprKind::Unary(UnaryOp::Not, inner) => {
            let it = check_expr(inner, scope, signatures, types)?;
            if it != Type::Bool {
                return Err(semantic_error("unary '!' requires bool"));
            }
            Type::Bool
        }
        ExprKind::Binary(left, op, right) => {
            let lt = check_expr(left, scope, signatures, types)?;
            let rt = check_expr(right, scope, signatures, types)?;
            match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                    if lt != Type::Int || rt != Type::Int {
                        return Err(semantic_error("arithmetic requires two ints"));
                    }
                    Type::Int
                }
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                    if lt != rt {
                        return Err(semantic_error("comparison requires operands of equal type"));
                    }
                    Type::Bool
                }
                BinaryOp::And | BinaryOp::Or => {
                    if lt != Type::Bool || rt != Type::Bool {
                        return Err(semantic_error("logical operator requires two bools"));
                    }
                    Type::Bool
                }
            }
        }
        ExprKind::Call(name, args) => {
            let Some((param_types, return_type)) = signatures.get(name) else {
                return Err(semantic_error(format!("call to undefined function '{name}'")));
            };
            if args.len() != param_types.len() {
                return Err(semantic_error(format!(
                    "function '{name}' expects {} arguments, found {}",
                    param_types.len(),
                    args.len()
                )));
            }
            for (arg, expected) in args.iter().zip(param_types.iter()) {
                let at = check_expr(arg, scope, signatures, types)?;
                let matches_expected = match expected {
                    // array_push/array_pop's placeholder accepts any array.
                    Type::Array(0) => at.is_array(),
                    other => &at == other,
                };
                if !matches_expected {
                    return Err(semantic_error(format!(
                        "argument to '{name}' has type {at}, expected {expected}"
                    )));
                }
            }
            return_type.clone()
        }
        ExprKind::Index(array_expr, index_expr) => {
            let at = check_expr(array_expr, scope, signatures, types)?;
            if !at.is_array() {
                return Err(semantic_error("indexing requires an array"));
            }
            let it = check_expr(index_expr, scope, signatures, types)?;
            if it != Type::Int {
                return Err(semantic_error("array index must be int"));
            }
            Type::Int
        }
        ExprKind::AddressOf(target) => {
            match &target.kind {
                ExprKind::Identifier(_) | ExprKind::Index(_, _) => {
                    check_expr(target, scope, signatures, types)?;
                }
                _ => {
                    return Err(semantic_error(
                        "'&' may only address an identifier or array element",
                    ))
                }
            }
            Type::Ptr
        }
    };
    types.set(expr.id, ty.clone());
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn analyze_src(src: &str) -> Result<Analysis, CompileError> {
        let tokens = Lexer::new(src).tokenize();
        let program = Parser::new(tokens).parse_program().unwrap();
        analyze(&program)
    }

    #[test]
    fn missing_main_is_an_error() {
        let result = analyze_src("fn f(): int { return 0; }");
        assert!(matches!(result, Err(CompileError::Semantic { .. })));
    }

    #[test]
    fn type_mismatch_in_var_decl() {
        let result = analyze_src("fn main(): int { let x: int = true; return 0; }");
        assert!(result.is_err());
    }

    #[test]
    fn non_void_function_requires_return() {
        let result = analyze_src("fn f(): int { let x: int = 1; } fn main(): int { return 0; }");
        assert!(result.is_err());
    }

    #[test]
    fn builtin_array_push_accepts_any_array_length() {
        let result = analyze_src(
            "fn main(): int { let xs: int[4]; let n: int = array_push(xs, 0, 10); return n; }",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn redeclaration_in_the_same_scope_is_an_error() {
        let result = analyze_src(
            r#"fn main(): int { let x: int = 1; let x: str = "a"; return 0; }"#,
        );
        assert!(matches!(result, Err(CompileError::Semantic { .. })));
    }

    #[test]
    fn duplicate_parameter_names_are_an_error() {
        let result =
            analyze_src("fn f(a: int, a: int): int { return a; } fn main(): int { return 0; }");
        assert!(matches!(result, Err(CompileError::Semantic { .. })));
    }

    #[test]
    fn shadowing_an_outer_scope_in_a_nested_block_is_allowed() {
        let result = analyze_src(
            "fn main(): int { let x: int = 1; if (true) { let x: str = \"a\"; print(x); } return x; }",
        );
        assert!(result.is_ok());
    }
}
