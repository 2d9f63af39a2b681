//! Contract verifier — checks structure, scoping, call resolution and sandbox rules
//!
//! The verifier runs on the AST before a contract is deployed or updated. It
//! accumulates all diagnostics rather than stopping at the first error.
//!
//! # Verification Phases
//!
//! 1. **Structure** — `createSSC` present, unique item and parameter names,
//!    `break`/`continue` only inside loops
//! 2. **Scope** — every identifier resolves to a local, a parameter, a
//!    constant, a helper function or a builtin; constants are never assigned
//! 3. **Sandbox** — `api` is only used through known fields and syscalls
//! 4. **Type** — operators applied to literals of the wrong kind

use std::collections::{BTreeMap, BTreeSet};

use crate::builtins;
use crate::executor::{self, API_ROOT};
use crate::parser::ast::*;
use crate::parser::tokenizer::Span;

/// Action run on deploy and update; not callable by transactions
pub const CREATE_ACTION: &str = "createSSC";

// ── Verification Result Types ─────────────────────────────

/// Result of contract verification — accumulates all diagnostics
#[derive(Debug, Clone, Default)]
pub struct VerificationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl VerificationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no errors were found (warnings are OK)
    pub fn is_valid(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect()
    }

    fn add_error(&mut self, kind: DiagnosticKind, message: String, span: Option<Span>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            kind,
            message,
            span,
        });
    }

    fn add_warning(&mut self, kind: DiagnosticKind, message: String, span: Option<Span>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            message,
            span,
        });
    }
}

/// A single verification diagnostic
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<Span>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        if let Some(ref span) = self.span {
            write!(f, "{} [{}] at {}: {}", prefix, self.kind, span, self.message)
        } else {
            write!(f, "{} [{}]: {}", prefix, self.kind, self.message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// Category of verification issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    StructureError,
    ScopeError,
    SandboxViolation,
    TypeError,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::StructureError => write!(f, "structure"),
            DiagnosticKind::ScopeError => write!(f, "scope"),
            DiagnosticKind::SandboxViolation => write!(f, "sandbox"),
            DiagnosticKind::TypeError => write!(f, "type"),
        }
    }
}

// ── Public API ────────────────────────────────────────────

/// Verify a parsed contract.
///
/// Runs all phases and returns accumulated diagnostics.
pub fn verify(ast: &ContractNode) -> VerificationResult {
    let mut result = VerificationResult::new();

    verify_structure(ast, &mut result);
    verify_bodies(ast, &mut result);

    result
}

// ── Phase 1: Structure ────────────────────────────────────

fn verify_structure(ast: &ContractNode, result: &mut VerificationResult) {
    if !ast.actions().any(|a| a.name == CREATE_ACTION) {
        result.add_error(
            DiagnosticKind::StructureError,
            format!("contract must define 'action {}(payload)'", CREATE_ACTION),
            None,
        );
    }

    let mut seen = BTreeSet::new();
    for item in &ast.items {
        let (name, span) = match item {
            Item::Action(def) | Item::Function(def) => (&def.name, def.span),
            Item::Const(def) => (&def.name, def.span),
        };
        if !seen.insert(name.as_str()) {
            result.add_error(
                DiagnosticKind::StructureError,
                format!("duplicate item name '{}'", name),
                Some(span),
            );
        }
        if name == API_ROOT || builtins::arity(name).is_some() {
            result.add_error(
                DiagnosticKind::StructureError,
                format!("'{}' shadows a built-in name", name),
                Some(span),
            );
        }
    }

    for def in ast.actions().chain(ast.functions()) {
        let mut params = BTreeSet::new();
        for param in &def.params {
            if !params.insert(param.as_str()) {
                result.add_error(
                    DiagnosticKind::StructureError,
                    format!("duplicate parameter '{}' in '{}'", param, def.name),
                    Some(def.span),
                );
            }
        }
    }

    for action in ast.actions() {
        if action.params.len() > 1 {
            result.add_error(
                DiagnosticKind::StructureError,
                format!("action '{}' takes at most one parameter (the payload)", action.name),
                Some(action.span),
            );
        }
    }
}

// ── Phases 2-4: Bodies ────────────────────────────────────

struct Checker<'a> {
    consts: BTreeSet<&'a str>,
    functions: BTreeMap<&'a str, usize>,
    actions: BTreeSet<&'a str>,
    scopes: Vec<BTreeSet<String>>,
    loop_depth: usize,
    called: BTreeSet<String>,
    result: &'a mut VerificationResult,
}

fn verify_bodies(ast: &ContractNode, result: &mut VerificationResult) {
    let functions: BTreeMap<&str, usize> = ast
        .functions()
        .map(|f| (f.name.as_str(), f.params.len()))
        .collect();
    let actions: BTreeSet<&str> = ast.actions().map(|a| a.name.as_str()).collect();

    let mut checker = Checker {
        consts: BTreeSet::new(),
        functions,
        actions,
        scopes: Vec::new(),
        loop_depth: 0,
        called: BTreeSet::new(),
        result,
    };

    // constants see only the constants declared before them
    for def in ast.consts() {
        checker.scopes = vec![BTreeSet::new()];
        checker.check_const_expr(&def.value);
        checker.check_expr(&def.value);
        checker.consts.insert(def.name.as_str());
    }
    let all_consts: BTreeSet<&str> = ast.consts().map(|c| c.name.as_str()).collect();
    checker.consts = all_consts;

    for def in ast.actions().chain(ast.functions()) {
        checker.scopes = vec![def.params.iter().cloned().collect()];
        checker.loop_depth = 0;
        checker.check_block(&def.body);
    }

    for def in ast.functions() {
        if !checker.called.contains(&def.name) {
            checker.result.add_warning(
                DiagnosticKind::StructureError,
                format!("function '{}' is never called", def.name),
                Some(def.span),
            );
        }
    }
}

impl Checker<'_> {
    fn error(&mut self, kind: DiagnosticKind, message: String, span: Span) {
        self.result.add_error(kind, message, Some(span));
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name)) || self.consts.contains(name)
    }

    fn declare(&mut self, name: &str, span: Span) {
        if name == API_ROOT || self.consts.contains(name) {
            self.error(
                DiagnosticKind::ScopeError,
                format!("cannot redeclare '{}'", name),
                span,
            );
        }
        if let Some(scope) = self.scopes.last_mut() {
            if !scope.insert(name.to_string()) {
                self.error(
                    DiagnosticKind::ScopeError,
                    format!("'{}' is already declared in this scope", name),
                    span,
                );
            }
        }
    }

    fn check_block(&mut self, stmts: &[Stmt]) {
        self.scopes.push(BTreeSet::new());
        let mut terminated = false;
        for stmt in stmts {
            if terminated {
                self.result.add_warning(
                    DiagnosticKind::StructureError,
                    "unreachable statement".to_string(),
                    Some(stmt.span()),
                );
                terminated = false;
            }
            self.check_stmt(stmt);
            if matches!(
                stmt,
                Stmt::Return { .. } | Stmt::Throw { .. } | Stmt::Break { .. } | Stmt::Continue { .. }
            ) {
                terminated = true;
            }
        }
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { name, value, span } => {
                self.check_expr(value);
                self.declare(name, *span);
            }
            Stmt::Assign { target, value, span, .. } => {
                self.check_assign_target(target, *span);
                self.check_expr(value);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                self.check_expr(condition);
                self.check_block(then_branch);
                if let Some(branch) = else_branch {
                    self.check_block(branch);
                }
            }
            Stmt::While { condition, body, .. } => {
                self.check_expr(condition);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
            }
            Stmt::For {
                var,
                iterable,
                body,
                span,
            } => {
                self.check_expr(iterable);
                self.scopes.push(BTreeSet::new());
                self.declare(var, *span);
                self.loop_depth += 1;
                self.check_block(body);
                self.loop_depth -= 1;
                self.scopes.pop();
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Break { span } | Stmt::Continue { span } => {
                if self.loop_depth == 0 {
                    self.error(
                        DiagnosticKind::StructureError,
                        "'break'/'continue' outside of a loop".to_string(),
                        *span,
                    );
                }
            }
            Stmt::Throw { value, .. } => self.check_expr(value),
            Stmt::Expr { expr, .. } => self.check_expr(expr),
        }
    }

    fn check_assign_target(&mut self, target: &Expr, span: Span) {
        match target.root_ident() {
            Some(API_ROOT) => self.error(
                DiagnosticKind::SandboxViolation,
                "the 'api' object is read-only".to_string(),
                span,
            ),
            Some(name) if self.consts.contains(name) => self.error(
                DiagnosticKind::ScopeError,
                format!("cannot assign to constant '{}'", name),
                span,
            ),
            Some(name) if !self.is_bound(name) => self.error(
                DiagnosticKind::ScopeError,
                format!("assignment to undeclared variable '{}'", name),
                span,
            ),
            _ => {}
        }
        // index expressions inside the target still need checking
        if let ExprKind::Member { object, .. } | ExprKind::Index { object, .. } = &target.kind {
            self.check_target_parts(object);
        }
        if let ExprKind::Index { index, .. } = &target.kind {
            self.check_expr(index);
        }
    }

    fn check_target_parts(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Member { object, .. } => self.check_target_parts(object),
            ExprKind::Index { object, index } => {
                self.check_target_parts(object);
                self.check_expr(index);
            }
            _ => {}
        }
    }

    /// Constant initializers may not reach the sandbox
    fn check_const_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Ident(name) if name == API_ROOT => self.error(
                DiagnosticKind::SandboxViolation,
                "constants cannot use 'api'".to_string(),
                expr.span,
            ),
            ExprKind::Call { callee, args } => {
                if !matches!(&callee.kind, ExprKind::Ident(name) if builtins::arity(name).is_some()) {
                    self.error(
                        DiagnosticKind::StructureError,
                        "constants may only call built-in functions".to_string(),
                        expr.span,
                    );
                }
                args.iter().for_each(|a| self.check_const_expr(a));
            }
            ExprKind::Array(items) => items.iter().for_each(|e| self.check_const_expr(e)),
            ExprKind::Object(fields) => fields.iter().for_each(|(_, e)| self.check_const_expr(e)),
            ExprKind::Member { object, .. } => self.check_const_expr(object),
            ExprKind::Index { object, index } => {
                self.check_const_expr(object);
                self.check_const_expr(index);
            }
            ExprKind::Unary { operand, .. } => self.check_const_expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.check_const_expr(left);
                self.check_const_expr(right);
            }
            ExprKind::Literal(_) | ExprKind::Ident(_) => {}
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Ident(name) => {
                if name == API_ROOT {
                    self.error(
                        DiagnosticKind::SandboxViolation,
                        "'api' cannot be used as a value".to_string(),
                        expr.span,
                    );
                } else if !self.is_bound(name) {
                    let message = if self.functions.contains_key(name.as_str()) || builtins::arity(name).is_some() {
                        format!("function '{}' used as a value", name)
                    } else {
                        format!("undefined variable '{}'", name)
                    };
                    self.error(DiagnosticKind::ScopeError, message, expr.span);
                }
            }
            ExprKind::Array(items) => items.iter().for_each(|e| self.check_expr(e)),
            ExprKind::Object(fields) => fields.iter().for_each(|(_, e)| self.check_expr(e)),
            ExprKind::Member { object, property } => {
                if matches!(&object.kind, ExprKind::Ident(n) if n == API_ROOT) {
                    if !executor::API_FIELDS.contains(&property.as_str()) {
                        self.error(
                            DiagnosticKind::SandboxViolation,
                            format!("unknown api field 'api.{}'", property),
                            expr.span,
                        );
                    }
                } else {
                    self.check_expr(object);
                }
            }
            ExprKind::Index { object, index } => {
                self.check_expr(object);
                self.check_expr(index);
            }
            ExprKind::Call { callee, args } => {
                self.check_call(callee, args.len(), expr.span);
                args.iter().for_each(|a| self.check_expr(a));
            }
            ExprKind::Unary { op, operand } => {
                if *op == UnaryOp::Neg {
                    if let ExprKind::Literal(lit) = &operand.kind {
                        if !matches!(lit, Literal::Integer(_) | Literal::Float(_)) {
                            self.error(
                                DiagnosticKind::TypeError,
                                "unary '-' applied to a non-numeric literal".to_string(),
                                expr.span,
                            );
                        }
                    }
                }
                self.check_expr(operand);
            }
            ExprKind::Binary { op, left, right } => {
                self.check_literal_operands(*op, left, right, expr.span);
                self.check_expr(left);
                self.check_expr(right);
            }
        }
    }

    fn check_call(&mut self, callee: &Expr, argc: usize, span: Span) {
        match &callee.kind {
            ExprKind::Ident(name) => {
                if let Some(&arity) = self.functions.get(name.as_str()) {
                    self.called.insert(name.clone());
                    if arity != argc {
                        self.error(
                            DiagnosticKind::StructureError,
                            format!("'{}' expects {} argument(s), got {}", name, arity, argc),
                            span,
                        );
                    }
                } else if let Some((min, max)) = builtins::arity(name) {
                    if argc < min || max.is_some_and(|m| argc > m) {
                        self.error(
                            DiagnosticKind::StructureError,
                            format!("built-in '{}' called with {} argument(s)", name, argc),
                            span,
                        );
                    }
                } else if self.actions.contains(name.as_str()) {
                    self.error(
                        DiagnosticKind::StructureError,
                        format!("action '{}' cannot be called directly; use api.executeSmartContract", name),
                        span,
                    );
                } else {
                    self.error(
                        DiagnosticKind::ScopeError,
                        format!("call to undefined function '{}'", name),
                        span,
                    );
                }
            }
            _ => match callee.path() {
                Some(path) if path.starts_with("api.") => match executor::syscall_arity(&path) {
                    Some((min, max)) => {
                        if argc < min || argc > max {
                            self.error(
                                DiagnosticKind::StructureError,
                                format!("'{}' called with {} argument(s)", path, argc),
                                span,
                            );
                        }
                    }
                    None => self.error(
                        DiagnosticKind::SandboxViolation,
                        format!("unknown syscall '{}'", path),
                        span,
                    ),
                },
                _ => self.error(
                    DiagnosticKind::StructureError,
                    "only named functions, built-ins and api syscalls can be called".to_string(),
                    span,
                ),
            },
        }
    }

    fn check_literal_operands(&mut self, op: BinaryOp, left: &Expr, right: &Expr, span: Span) {
        if !matches!(op, BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem) {
            return;
        }
        let non_numeric = |e: &Expr| {
            matches!(
                &e.kind,
                ExprKind::Literal(Literal::String(_) | Literal::Boolean(_) | Literal::Null)
                    | ExprKind::Array(_)
                    | ExprKind::Object(_)
            )
        };
        if non_numeric(left) || non_numeric(right) {
            self.error(
                DiagnosticKind::TypeError,
                format!("operator '{}' requires numeric operands", op.symbol()),
                span,
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_contract;

    fn parse_and_verify(input: &str) -> VerificationResult {
        let ast = parse_contract(input).expect("test input should parse");
        verify(&ast)
    }

    fn has_error(result: &VerificationResult, kind: DiagnosticKind, needle: &str) -> bool {
        result
            .errors()
            .iter()
            .any(|d| d.kind == kind && d.message.contains(needle))
    }

    const DICE: &str = include_str!("../../../tests/fixtures/contracts/dice.ssc");

    // ── Structure ─────────────────────────────────────────

    #[test]
    fn test_valid_fixture_contract() {
        let result = parse_and_verify(DICE);
        assert!(result.is_valid(), "dice contract should verify: {:?}", result.errors());
    }

    #[test]
    fn test_missing_create_action() {
        let result = parse_and_verify("action roll(p) { }");
        assert!(has_error(&result, DiagnosticKind::StructureError, "createSSC"));
    }

    #[test]
    fn test_duplicate_item_names() {
        let result = parse_and_verify(
            "action createSSC(p) { }\nfn a() { return 1; }\nconst a = 1;",
        );
        assert!(has_error(&result, DiagnosticKind::StructureError, "duplicate item name 'a'"));
    }

    #[test]
    fn test_builtin_shadowing_rejected() {
        let result = parse_and_verify("action createSSC(p) { }\nfn len(x) { return 0; }");
        assert!(has_error(&result, DiagnosticKind::StructureError, "shadows"));
    }

    #[test]
    fn test_action_takes_one_parameter() {
        let result = parse_and_verify("action createSSC(a, b) { }");
        assert!(has_error(&result, DiagnosticKind::StructureError, "at most one parameter"));
    }

    #[test]
    fn test_break_outside_loop() {
        let result = parse_and_verify("action createSSC(p) { break; }");
        assert!(has_error(&result, DiagnosticKind::StructureError, "outside of a loop"));
        let ok = parse_and_verify("action createSSC(p) { while (true) { if (p) { break; } } }");
        assert!(ok.is_valid(), "{:?}", ok.errors());
    }

    // ── Scope ─────────────────────────────────────────────

    #[test]
    fn test_undefined_variable() {
        let result = parse_and_verify("action createSSC(p) { let x = y + 1; }");
        assert!(has_error(&result, DiagnosticKind::ScopeError, "undefined variable 'y'"));
    }

    #[test]
    fn test_block_scoping() {
        let result = parse_and_verify(
            "action createSSC(p) { if (p) { let inner = 1; } let x = inner; }",
        );
        assert!(has_error(&result, DiagnosticKind::ScopeError, "undefined variable 'inner'"));
    }

    #[test]
    fn test_const_assignment_rejected() {
        let result = parse_and_verify("const FEE = 1;\naction createSSC(p) { FEE = 2; }");
        assert!(has_error(&result, DiagnosticKind::ScopeError, "constant 'FEE'"));
    }

    #[test]
    fn test_const_forward_reference_rejected() {
        let result = parse_and_verify("const A = B;\nconst B = 1;\naction createSSC(p) { }");
        assert!(has_error(&result, DiagnosticKind::ScopeError, "undefined variable 'B'"));
    }

    #[test]
    fn test_function_arity_and_unknown_calls() {
        let result = parse_and_verify(
            "fn two(a, b) { return a; }\naction createSSC(p) { two(1); nope(); len(); createSSC(p); }",
        );
        assert!(has_error(&result, DiagnosticKind::StructureError, "'two' expects 2"));
        assert!(has_error(&result, DiagnosticKind::ScopeError, "undefined function 'nope'"));
        assert!(has_error(&result, DiagnosticKind::StructureError, "built-in 'len'"));
        assert!(has_error(&result, DiagnosticKind::StructureError, "cannot be called directly"));
    }

    #[test]
    fn test_unused_function_warns() {
        let result = parse_and_verify("fn helper() { return 1; }\naction createSSC(p) { }");
        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 1);
    }

    // ── Sandbox ───────────────────────────────────────────

    #[test]
    fn test_api_rules() {
        let result = parse_and_verify(
            "action createSSC(p) { let a = api; api.sender = 'x'; api.db.drop('t'); let t = api.clock; }",
        );
        assert!(has_error(&result, DiagnosticKind::SandboxViolation, "cannot be used as a value"));
        assert!(has_error(&result, DiagnosticKind::SandboxViolation, "read-only"));
        assert!(has_error(&result, DiagnosticKind::SandboxViolation, "unknown syscall 'api.db.drop'"));
        assert!(has_error(&result, DiagnosticKind::SandboxViolation, "unknown api field 'api.clock'"));
    }

    #[test]
    fn test_syscall_arity() {
        let result = parse_and_verify("action createSSC(p) { api.random(1); api.emit('x'); }");
        assert!(has_error(&result, DiagnosticKind::StructureError, "'api.random' called with 1"));
        assert!(has_error(&result, DiagnosticKind::StructureError, "'api.emit' called with 1"));
    }

    #[test]
    fn test_const_cannot_use_api() {
        let result = parse_and_verify("const S = api.sender;\naction createSSC(p) { }");
        assert!(has_error(&result, DiagnosticKind::SandboxViolation, "constants cannot use 'api'"));
    }

    // ── Type ──────────────────────────────────────────────

    #[test]
    fn test_literal_type_errors() {
        let result = parse_and_verify("action createSSC(p) { let x = 'a' - 1; let y = -true; }");
        assert!(has_error(&result, DiagnosticKind::TypeError, "numeric operands"));
        assert!(has_error(&result, DiagnosticKind::TypeError, "unary '-'"));
        // `+` concatenates strings
        let ok = parse_and_verify("action createSSC(p) { let x = 'a' + 1; }");
        assert!(ok.is_valid(), "{:?}", ok.errors());
    }

    // ── Diagnostics ───────────────────────────────────────

    #[test]
    fn test_diagnostic_display() {
        let result = parse_and_verify("action createSSC(p) {\n  let x = y;\n}");
        let text = result.errors()[0].to_string();
        assert_eq!(text, "error [scope] at 2:11: undefined variable 'y'");
    }

    #[test]
    fn test_verify_determinism_100_iterations() {
        let ast = parse_contract(DICE).unwrap();
        let first: Vec<String> = verify(&ast).diagnostics.iter().map(|d| d.to_string()).collect();
        for i in 0..100 {
            let result: Vec<String> = verify(&ast).diagnostics.iter().map(|d| d.to_string()).collect();
            assert_eq!(first, result, "Determinism failure at iteration {}", i);
        }
    }
}
