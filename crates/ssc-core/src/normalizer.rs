//! Canonical normalizer — converts contract source to deterministic canonical form
//!
//! The canonical text is what the ledger stores and what the code hash is
//! computed over, so two deployments that differ only in whitespace,
//! comments, quoting or redundant parentheses share one `codeHash`.
//!
//! # Pipeline
//!
//! `source → parse → AST → print_canonical → SHA-256`
//!
//! # Guarantees
//!
//! - **Idempotent**: `normalize(normalize(x)) == normalize(x)`
//! - **Deterministic**: same input always produces same output
//! - **Semantic preserving**: `parse(normalize(x))` has the same meaning as `parse(x)`

use crate::hashing::sha256_hex;
use crate::parser::ast::*;
use crate::parser::{is_else_if, parse_contract};
use crate::Result;

const INDENT: &str = "    ";

// ── Public API ─────────────────────────────────────────────

/// Normalize contract source to canonical form
///
/// # Errors
/// Returns `Error::Parse` for invalid input.
pub fn normalize(source: &str) -> Result<String> {
    let ast = parse_contract(source)?;
    Ok(print_canonical(&ast))
}

/// Code hash of contract source: SHA-256 of its canonical form
pub fn code_hash(source: &str) -> Result<String> {
    Ok(sha256_hex(normalize(source)?))
}

/// Code hash of an already parsed contract
pub fn compute_code_hash(ast: &ContractNode) -> String {
    sha256_hex(print_canonical(ast))
}

/// Print an AST as canonical source. Items keep source order; constants are
/// evaluated in that order.
pub fn print_canonical(ast: &ContractNode) -> String {
    let mut out = String::new();
    for (i, item) in ast.items.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        match item {
            Item::Const(def) => {
                out.push_str("const ");
                out.push_str(&def.name);
                out.push_str(" = ");
                write_expr(&mut out, &def.value);
                out.push_str(";\n");
            }
            Item::Action(def) => write_function(&mut out, "action", def),
            Item::Function(def) => write_function(&mut out, "fn", def),
        }
    }
    out
}

// ── Statements ─────────────────────────────────────────────

fn write_function(out: &mut String, keyword: &str, def: &FunctionDef) {
    out.push_str(keyword);
    out.push(' ');
    out.push_str(&def.name);
    out.push('(');
    out.push_str(&def.params.join(", "));
    out.push_str(") ");
    write_block(out, &def.body, 0);
    out.push('\n');
}

fn write_block(out: &mut String, body: &[Stmt], depth: usize) {
    if body.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    for stmt in body {
        write_stmt(out, stmt, depth + 1);
    }
    write_indent(out, depth);
    out.push('}');
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    write_indent(out, depth);
    match stmt {
        Stmt::Let { name, value, .. } => {
            out.push_str("let ");
            out.push_str(name);
            out.push_str(" = ");
            write_expr(out, value);
            out.push(';');
        }
        Stmt::Assign { target, op, value, .. } => {
            write_expr(out, target);
            out.push_str(match op {
                AssignOp::Set => " = ",
                AssignOp::Add => " += ",
                AssignOp::Sub => " -= ",
            });
            write_expr(out, value);
            out.push(';');
        }
        Stmt::If { .. } => write_if(out, stmt, depth),
        Stmt::While { condition, body, .. } => {
            out.push_str("while (");
            write_expr(out, condition);
            out.push_str(") ");
            write_block(out, body, depth);
        }
        Stmt::For { var, iterable, body, .. } => {
            out.push_str("for (");
            out.push_str(var);
            out.push_str(" in ");
            write_expr(out, iterable);
            out.push_str(") ");
            write_block(out, body, depth);
        }
        Stmt::Return { value, .. } => match value {
            Some(value) => {
                out.push_str("return ");
                write_expr(out, value);
                out.push(';');
            }
            None => out.push_str("return;"),
        },
        Stmt::Break { .. } => out.push_str("break;"),
        Stmt::Continue { .. } => out.push_str("continue;"),
        Stmt::Throw { value, .. } => {
            out.push_str("throw ");
            write_expr(out, value);
            out.push(';');
        }
        Stmt::Expr { expr, .. } => {
            write_expr(out, expr);
            out.push(';');
        }
    }
    out.push('\n');
}

/// `if` chains; the caller has already written the indent
fn write_if(out: &mut String, stmt: &Stmt, depth: usize) {
    let Stmt::If {
        condition,
        then_branch,
        else_branch,
        ..
    } = stmt
    else {
        return;
    };
    out.push_str("if (");
    write_expr(out, condition);
    out.push_str(") ");
    write_block(out, then_branch, depth);
    match else_branch {
        Some(branch) if is_else_if(branch) => {
            out.push_str(" else ");
            write_if(out, &branch[0], depth);
        }
        Some(branch) => {
            out.push_str(" else ");
            write_block(out, branch, depth);
        }
        None => {}
    }
}

// ── Expressions ────────────────────────────────────────────

/// Precedence used for parenthesization; postfix and primary bind tightest
fn expr_precedence(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Binary { op, .. } => op.precedence(),
        ExprKind::Unary { .. } => 7,
        _ => 8,
    }
}

fn write_expr(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::Literal(lit) => write_literal(out, lit),
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, item);
            }
            out.push(']');
        }
        ExprKind::Object(fields) => {
            if fields.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, (key, value)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_key(out, key);
                out.push_str(": ");
                write_expr(out, value);
            }
            out.push_str(" }");
        }
        ExprKind::Member { object, property } => {
            write_operand(out, object, 8);
            out.push('.');
            out.push_str(property);
        }
        ExprKind::Index { object, index } => {
            write_operand(out, object, 8);
            out.push('[');
            write_expr(out, index);
            out.push(']');
        }
        ExprKind::Call { callee, args } => {
            write_operand(out, callee, 8);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, arg);
            }
            out.push(')');
        }
        ExprKind::Unary { op, operand } => {
            out.push(match op {
                UnaryOp::Not => '!',
                UnaryOp::Neg => '-',
            });
            write_operand(out, operand, 7);
        }
        ExprKind::Binary { op, left, right } => {
            let prec = op.precedence();
            write_operand(out, left, prec);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            // left-associative: an equal-precedence right child needs parens
            write_operand(out, right, prec + 1);
        }
    }
}

fn write_operand(out: &mut String, expr: &Expr, min_precedence: u8) {
    if expr_precedence(expr) < min_precedence {
        out.push('(');
        write_expr(out, expr);
        out.push(')');
    } else {
        write_expr(out, expr);
    }
}

fn write_literal(out: &mut String, lit: &Literal) {
    match lit {
        Literal::Null => out.push_str("null"),
        Literal::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Integer(i) => out.push_str(&i.to_string()),
        Literal::Float(f) => {
            let text = f.to_string();
            out.push_str(&text);
            if !text.contains('.') {
                out.push_str(".0");
            }
        }
        Literal::String(s) => write_string(out, s),
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
}

const KEYWORDS: &[&str] = &[
    "action", "fn", "const", "let", "if", "else", "while", "for", "in", "return", "break",
    "continue", "throw", "null", "true", "false",
];

/// Object keys print bare when they are plain identifiers
fn write_key(out: &mut String, key: &str) {
    let mut chars = key.chars();
    let is_ident = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !KEYWORDS.contains(&key);
    if is_ident {
        out.push_str(key);
    } else {
        write_string(out, key);
    }
}

fn write_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

// ── Tests ──────────────────────────────────────────────────
