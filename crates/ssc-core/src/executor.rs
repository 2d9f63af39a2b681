//! Execution engine — tree-walking interpreter for contract code
//!
//! A [`Program`] is a verified contract, compiled once per code hash and
//! shared through a [`ProgramCache`]. Running an action evaluates the
//! contract's constants, binds the payload and walks the action body.
//!
//! # Determinism
//!
//! The interpreter itself has no I/O, no clock and no entropy. Every effect
//! goes through the [`Host`] syscall bridge, objects iterate in key order and
//! numeric results that are not finite are rejected. The only non-semantic
//! input is the wall-clock deadline, which can abort a run but never changes
//! what a completed run computes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use thiserror::Error;

use crate::builtins::{self, to_text};
use crate::normalizer;
use crate::parser::ast::*;
use crate::parser::parse_contract;
use crate::parser::tokenizer::Span;
use crate::value::{Value, MAX_DEPTH};
use crate::verifier;

/// Name of the capability object exposed to contract code
pub const API_ROOT: &str = "api";

/// Read-only transaction context readable as `api.<field>`
pub const API_FIELDS: &[&str] = &[
    "sender",
    "owner",
    "contract",
    "action",
    "payload",
    "transactionId",
    "blockNumber",
    "sourceBlockNumber",
    "sourceBlockId",
    "timestamp",
    "contractVersion",
];

/// `(path, min args, max args)`
const SYSCALLS: &[(&str, usize, usize)] = &[
    ("api.db.createTable", 1, 2),
    ("api.db.find", 2, 5),
    ("api.db.findOne", 2, 2),
    ("api.db.findInTable", 3, 6),
    ("api.db.findOneInTable", 3, 3),
    ("api.db.insert", 2, 2),
    ("api.db.update", 2, 3),
    ("api.db.remove", 2, 2),
    ("api.db.tableExists", 1, 1),
    ("api.db.getTableDetails", 1, 1),
    ("api.db.findContract", 1, 1),
    ("api.db.getBlockInfo", 1, 1),
    ("api.assert", 2, 2),
    ("api.emit", 2, 2),
    ("api.random", 0, 0),
    ("api.executeSmartContract", 3, 3),
    ("api.executeSmartContractAsOwner", 3, 3),
    ("api.transferTokens", 4, 4),
    ("api.transferTokensFromCallingContract", 4, 4),
    ("api.logs", 0, 0),
    ("api.sha256", 1, 1),
    ("api.checkSignature", 3, 4),
    ("api.isValidAccountName", 1, 1),
    ("api.verifyBlock", 1, 1),
    ("api.debug", 1, 1),
];

/// Helper `fn` recursion bound within one contract frame
const MAX_FUNCTION_DEPTH: usize = 64;

/// Remaining stack below which evaluation moves to a fresh segment
const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_SEGMENT: usize = 1024 * 1024;

/// Argument count bounds of a syscall path such as `api.db.insert`
pub fn syscall_arity(path: &str) -> Option<(usize, usize)> {
    SYSCALLS
        .iter()
        .find(|(p, ..)| *p == path)
        .map(|(_, min, max)| (*min, *max))
}

// ── Errors & Host ─────────────────────────────────────────

/// Abnormal end of a contract run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Uncaught error inside contract code
    #[error("{0}")]
    Thrown(String),

    #[error("contract execution timed out")]
    Timeout,

    /// Nested contract calls went deeper than allowed; aborts the whole transaction
    #[error("maximum call depth exceeded")]
    CallDepthExceeded,
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// The syscall bridge between contract code and the node
pub trait Host {
    /// Value of a read-only `api` field
    fn field(&self, name: &str) -> Value;

    /// Perform a syscall. `path` is the full dotted name (`api.db.insert`).
    fn syscall(&mut self, path: &str, args: Vec<Value>) -> ExecResult<Value>;
}

// ── Program ───────────────────────────────────────────────

/// A verified contract ready to run
#[derive(Debug)]
pub struct Program {
    code_hash: String,
    actions: BTreeMap<String, FunctionDef>,
    functions: BTreeMap<String, FunctionDef>,
    consts: Vec<ConstDef>,
}

impl Program {
    /// Parse, verify and hash contract source
    pub fn compile(source: &str) -> crate::Result<Self> {
        let ast = parse_contract(source)?;
        Self::from_ast(ast)
    }

    pub fn from_ast(ast: ContractNode) -> crate::Result<Self> {
        let result = verifier::verify(&ast);
        if !result.is_valid() {
            let messages: Vec<String> = result.errors().iter().map(|d| d.to_string()).collect();
            return Err(crate::Error::Verification(messages.join("; ")));
        }

        let code_hash = normalizer::compute_code_hash(&ast);
        let mut program = Program {
            code_hash,
            actions: BTreeMap::new(),
            functions: BTreeMap::new(),
            consts: Vec::new(),
        };
        for item in ast.items {
            match item {
                Item::Action(def) => {
                    program.actions.insert(def.name.clone(), def);
                }
                Item::Function(def) => {
                    program.functions.insert(def.name.clone(), def);
                }
                Item::Const(def) => program.consts.push(def),
            }
        }
        Ok(program)
    }

    pub fn code_hash(&self) -> &str {
        &self.code_hash
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Run `action` with `payload` until it returns, throws or passes `deadline`
    pub fn run(
        &self,
        host: &mut dyn Host,
        action: &str,
        payload: Value,
        deadline: Instant,
    ) -> ExecResult<Value> {
        let def = self
            .actions
            .get(action)
            .ok_or_else(|| ExecError::Thrown(format!("action '{}' does not exist", action)))?;

        let mut interp = Interpreter {
            program: self,
            host,
            deadline,
            consts: BTreeMap::new(),
            depth: 0,
        };
        interp.init_consts()?;

        let mut env = Env::new();
        if let Some(param) = def.params.first() {
            env.declare(param, payload);
        }
        match interp.run_block(&mut env, &def.body)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }
}

/// Compiled programs keyed by code hash
#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: Mutex<BTreeMap<String, Arc<Program>>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached program for `code_hash`, compiling `source` on a miss
    pub fn get_or_compile(&self, code_hash: &str, source: &str) -> crate::Result<Arc<Program>> {
        if let Some(program) = self.programs.lock().get(code_hash) {
            return Ok(Arc::clone(program));
        }
        let program = Arc::new(Program::compile(source)?);
        self.programs
            .lock()
            .insert(code_hash.to_string(), Arc::clone(&program));
        Ok(program)
    }

    pub fn len(&self) -> usize {
        self.programs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.lock().is_empty()
    }
}

// ── Interpreter ───────────────────────────────────────────

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Lexical scopes of one function frame
struct Env {
    scopes: Vec<BTreeMap<String, Value>>,
}

impl Env {
    fn new() -> Self {
        Env {
            scopes: vec![BTreeMap::new()],
        }
    }

    fn push(&mut self) {
        self.scopes.push(BTreeMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(name))
    }
}

/// One step of an assignment path
enum PathKey {
    Field(String),
    Index(Value),
}

struct Interpreter<'p, 'h> {
    program: &'p Program,
    host: &'h mut dyn Host,
    deadline: Instant,
    consts: BTreeMap<String, Value>,
    depth: usize,
}

fn error_at(span: Span, message: impl std::fmt::Display) -> ExecError {
    ExecError::Thrown(format!("{} at {}", message, span))
}

fn bounded(value: Value, span: Span) -> ExecResult<Value> {
    if value.depth() > MAX_DEPTH {
        return Err(error_at(span, format!("value nested deeper than {} levels", MAX_DEPTH)));
    }
    Ok(value)
}

impl Interpreter<'_, '_> {
    fn check_deadline(&self) -> ExecResult<()> {
        if Instant::now() >= self.deadline {
            return Err(ExecError::Timeout);
        }
        Ok(())
    }

    fn init_consts(&mut self) -> ExecResult<()> {
        let program = self.program;
        let mut env = Env::new();
        for def in &program.consts {
            let value = self.eval(&mut env, &def.value)?;
            self.consts.insert(def.name.clone(), value);
        }
        Ok(())
    }

    /// Helper recursion and nested contract calls stack interpreters on one
    /// thread; deep runs continue on heap-allocated stack segments
    fn run_block(&mut self, env: &mut Env, body: &[Stmt]) -> ExecResult<Flow> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.run_stmts(env, body))
    }

    fn run_stmts(&mut self, env: &mut Env, body: &[Stmt]) -> ExecResult<Flow> {
        env.push();
        for stmt in body {
            match self.exec_stmt(env, stmt)? {
                Flow::Normal => {}
                flow => {
                    env.pop();
                    return Ok(flow);
                }
            }
        }
        env.pop();
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, env: &mut Env, stmt: &Stmt) -> ExecResult<Flow> {
        self.check_deadline()?;
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = self.eval(env, value)?;
                env.declare(name, value);
            }
            Stmt::Assign {
                target,
                op,
                value,
                span,
            } => self.assign(env, target, *op, value, *span)?,
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.eval(env, condition)?.is_truthy() {
                    return self.run_block(env, then_branch);
                } else if let Some(branch) = else_branch {
                    return self.run_block(env, branch);
                }
            }
            Stmt::While { condition, body, .. } => loop {
                self.check_deadline()?;
                if !self.eval(env, condition)?.is_truthy() {
                    break;
                }
                match self.run_block(env, body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            Stmt::For {
                var,
                iterable,
                body,
                span,
            } => {
                let items = match self.eval(env, iterable)? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.into_keys().map(Value::String).collect(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => return Err(error_at(*span, format!("cannot iterate over {}", other.type_name()))),
                };
                for item in items {
                    self.check_deadline()?;
                    env.push();
                    env.declare(var, item);
                    let flow = self.run_block(env, body);
                    env.pop();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval(env, expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Break { .. } => return Ok(Flow::Break),
            Stmt::Continue { .. } => return Ok(Flow::Continue),
            Stmt::Throw { value, .. } => {
                let value = self.eval(env, value)?;
                return Err(ExecError::Thrown(to_text(&value)));
            }
            Stmt::Expr { expr, .. } => {
                self.eval(env, expr)?;
            }
        }
        Ok(Flow::Normal)
    }

    // ── Assignment ────────────────────────────────────────

    fn assign(&mut self, env: &mut Env, target: &Expr, op: AssignOp, value: &Expr, span: Span) -> ExecResult<()> {
        let mut keys = Vec::new();
        let root = self.resolve_target(env, target, &mut keys)?;
        let rhs = self.eval(env, value)?;

        let new_value = match op {
            AssignOp::Set => rhs,
            AssignOp::Add | AssignOp::Sub => {
                let current = self.read_target(env, &root, &keys, span)?;
                let bin = if op == AssignOp::Add { BinaryOp::Add } else { BinaryOp::Sub };
                binary(bin, &current, &rhs).map_err(|m| error_at(span, m))?
            }
        };

        if keys.len() + new_value.depth() > MAX_DEPTH {
            return Err(error_at(span, format!("value nested deeper than {} levels", MAX_DEPTH)));
        }

        let slot = env
            .lookup_mut(&root)
            .ok_or_else(|| error_at(span, format!("assignment to undeclared variable '{}'", root)))?;
        write_path(slot, &keys, new_value).map_err(|m| error_at(span, m))
    }

    /// Root variable of an assignment target, collecting evaluated path keys
    fn resolve_target(&mut self, env: &mut Env, target: &Expr, keys: &mut Vec<PathKey>) -> ExecResult<String> {
        match &target.kind {
            ExprKind::Ident(name) => Ok(name.clone()),
            ExprKind::Member { object, property } => {
                let root = self.resolve_target(env, object, keys)?;
                keys.push(PathKey::Field(property.clone()));
                Ok(root)
            }
            ExprKind::Index { object, index } => {
                let root = self.resolve_target(env, object, keys)?;
                let index = self.eval(env, index)?;
                keys.push(PathKey::Index(index));
                Ok(root)
            }
            _ => Err(error_at(target.span, "invalid assignment target")),
        }
    }

    fn read_target(&self, env: &Env, root: &str, keys: &[PathKey], span: Span) -> ExecResult<Value> {
        let mut current = env
            .lookup(root)
            .cloned()
            .ok_or_else(|| error_at(span, format!("undefined variable '{}'", root)))?;
        for key in keys {
            current = match key {
                PathKey::Field(name) => member(&current, name),
                PathKey::Index(index) => index_value(&current, index),
            }
            .map_err(|m| error_at(span, m))?;
        }
        Ok(current)
    }

    // ── Expressions ───────────────────────────────────────

    fn eval(&mut self, env: &mut Env, expr: &Expr) -> ExecResult<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, || self.eval_expr(env, expr))
    }

    fn eval_expr(&mut self, env: &mut Env, expr: &Expr) -> ExecResult<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Integer(i) => Value::Integer(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
            }),
            ExprKind::Ident(name) => {
                if let Some(value) = env.lookup(name) {
                    return Ok(value.clone());
                }
                if let Some(value) = self.consts.get(name) {
                    return Ok(value.clone());
                }
                if name == API_ROOT {
                    return Err(error_at(expr.span, "'api' cannot be used as a value"));
                }
                Err(error_at(expr.span, format!("undefined variable '{}'", name)))
            }
            ExprKind::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(env, item)?);
                }
                bounded(Value::Array(values), expr.span)
            }
            ExprKind::Object(fields) => {
                let mut map = BTreeMap::new();
                for (key, value) in fields {
                    let value = self.eval(env, value)?;
                    map.insert(key.clone(), value);
                }
                bounded(Value::Object(map), expr.span)
            }
            ExprKind::Member { object, property } => {
                if matches!(&object.kind, ExprKind::Ident(name) if name == API_ROOT) {
                    if !API_FIELDS.contains(&property.as_str()) {
                        return Err(error_at(expr.span, format!("unknown api field 'api.{}'", property)));
                    }
                    return Ok(self.host.field(property));
                }
                let object = self.eval(env, object)?;
                member(&object, property).map_err(|m| error_at(expr.span, m))
            }
            ExprKind::Index { object, index } => {
                let object = self.eval(env, object)?;
                let index = self.eval(env, index)?;
                index_value(&object, &index).map_err(|m| error_at(expr.span, m))
            }
            ExprKind::Call { callee, args } => self.call(env, callee, args, expr.span),
            ExprKind::Unary { op, operand } => {
                let value = self.eval(env, operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Integer(i) => i
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or_else(|| error_at(expr.span, "numeric overflow")),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(error_at(
                            expr.span,
                            format!("cannot negate {}", other.type_name()),
                        )),
                    },
                }
            }
            ExprKind::Binary { op, left, right } => {
                let lhs = self.eval(env, left)?;
                match op {
                    BinaryOp::And if !lhs.is_truthy() => Ok(lhs),
                    BinaryOp::Or if lhs.is_truthy() => Ok(lhs),
                    BinaryOp::And | BinaryOp::Or => self.eval(env, right),
                    _ => {
                        let rhs = self.eval(env, right)?;
                        binary(*op, &lhs, &rhs).map_err(|m| error_at(expr.span, m))
                    }
                }
            }
        }
    }

    fn call(&mut self, env: &mut Env, callee: &Expr, args: &[Expr], span: Span) -> ExecResult<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(env, arg)?);
        }

        match &callee.kind {
            ExprKind::Ident(name) => {
                let program = self.program;
                if let Some(def) = program.functions.get(name) {
                    return self.call_function(def, values, span);
                }
                if builtins::arity(name).is_some() {
                    let result = builtins::call(name, &values).map_err(|m| error_at(span, m))?;
                    return bounded(result, span);
                }
                Err(error_at(span, format!("undefined function '{}'", name)))
            }
            _ => match callee.path() {
                Some(path) if syscall_arity(&path).is_some() => self.host.syscall(&path, values),
                Some(path) => Err(error_at(span, format!("unknown function '{}'", path))),
                None => Err(error_at(span, "expression is not callable")),
            },
        }
    }

    fn call_function(&mut self, def: &FunctionDef, args: Vec<Value>, span: Span) -> ExecResult<Value> {
        if args.len() != def.params.len() {
            return Err(error_at(
                span,
                format!("'{}' expects {} argument(s), got {}", def.name, def.params.len(), args.len()),
            ));
        }
        if self.depth >= MAX_FUNCTION_DEPTH {
            return Err(error_at(span, "maximum recursion depth exceeded"));
        }

        let mut env = Env::new();
        for (param, arg) in def.params.iter().zip(args) {
            env.declare(param, arg);
        }
        self.depth += 1;
        let flow = self.run_block(&mut env, &def.body);
        self.depth -= 1;
        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }
}

// ── Value operations ──────────────────────────────────────

fn float_result(f: f64) -> Result<Value, String> {
    if f.is_finite() {
        Ok(Value::Float(f))
    } else {
        Err("numeric overflow".to_string())
    }
}

fn numbers(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<(f64, f64), String> {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(format!(
            "operator '{}' cannot be applied to {} and {}",
            op.symbol(),
            lhs.type_name(),
            rhs.type_name()
        )),
    }
}

/// Non short-circuit binary operators
fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, String> {
    use Value::{Integer, String as Str};

    let overflow = || "numeric overflow".to_string();
    match op {
        BinaryOp::Eq => Ok(Value::Boolean(lhs.loose_eq(rhs))),
        BinaryOp::NotEq => Ok(Value::Boolean(!lhs.loose_eq(rhs))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let comparable = matches!((lhs, rhs), (Str(_), Str(_)))
                || (lhs.as_f64().is_some() && rhs.as_f64().is_some());
            if !comparable {
                return Err(format!("cannot compare {} with {}", lhs.type_name(), rhs.type_name()));
            }
            let ord = lhs.compare(rhs);
            Ok(Value::Boolean(match op {
                BinaryOp::Lt => ord.is_lt(),
                BinaryOp::LtEq => ord.is_le(),
                BinaryOp::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            }))
        }
        BinaryOp::Add => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_add(*b).map(Integer).ok_or_else(overflow),
            (Str(_), _) | (_, Str(_)) => Ok(Str(format!("{}{}", to_text(lhs), to_text(rhs)))),
            _ => {
                let (a, b) = numbers(op, lhs, rhs)?;
                float_result(a + b)
            }
        },
        BinaryOp::Sub => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_sub(*b).map(Integer).ok_or_else(overflow),
            _ => {
                let (a, b) = numbers(op, lhs, rhs)?;
                float_result(a - b)
            }
        },
        BinaryOp::Mul => match (lhs, rhs) {
            (Integer(a), Integer(b)) => a.checked_mul(*b).map(Integer).ok_or_else(overflow),
            _ => {
                let (a, b) = numbers(op, lhs, rhs)?;
                float_result(a * b)
            }
        },
        BinaryOp::Div => {
            let (a, b) = numbers(op, lhs, rhs)?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            match (lhs, rhs) {
                (Integer(x), Integer(y)) if x.checked_rem(*y) == Some(0) => {
                    x.checked_div(*y).map(Integer).ok_or_else(overflow)
                }
                _ => float_result(a / b),
            }
        }
        BinaryOp::Rem => {
            let (a, b) = numbers(op, lhs, rhs)?;
            if b == 0.0 {
                return Err("division by zero".to_string());
            }
            match (lhs, rhs) {
                (Integer(x), Integer(y)) => x.checked_rem(*y).map(Integer).ok_or_else(overflow),
                _ => float_result(a % b),
            }
        }
        BinaryOp::And | BinaryOp::Or => Ok(Value::Boolean(lhs.is_truthy() && rhs.is_truthy())),
    }
}

fn member(object: &Value, property: &str) -> Result<Value, String> {
    match object {
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or_default()),
        other => Err(format!(
            "cannot read property '{}' of {}",
            property,
            other.type_name()
        )),
    }
}

fn array_index(index: &Value) -> Option<i64> {
    match index {
        Value::Integer(i) => Some(*i),
        Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        _ => None,
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, String> {
    match (object, index) {
        (Value::Object(map), Value::String(key)) => Ok(map.get(key).cloned().unwrap_or_default()),
        (Value::Array(items), idx) if array_index(idx).is_some() => Ok(array_index(idx)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| items.get(i).cloned())
            .unwrap_or_default()),
        (Value::String(s), idx) if array_index(idx).is_some() => Ok(array_index(idx)
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or_default()),
        (object, index) => Err(format!(
            "cannot index {} with {}",
            object.type_name(),
            index.type_name()
        )),
    }
}

/// Store `value` at `keys` below `slot`
fn write_path(slot: &mut Value, keys: &[PathKey], value: Value) -> Result<(), String> {
    let Some((key, rest)) = keys.split_first() else {
        *slot = value;
        return Ok(());
    };

    match (slot, key) {
        (Value::Object(map), PathKey::Field(name))
        | (Value::Object(map), PathKey::Index(Value::String(name))) => {
            if rest.is_empty() {
                map.insert(name.clone(), value);
                Ok(())
            } else {
                let child = map
                    .get_mut(name)
                    .ok_or_else(|| format!("cannot set property of missing field '{}'", name))?;
                write_path(child, rest, value)
            }
        }
        (Value::Array(items), PathKey::Index(index)) => {
            let i = array_index(index)
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| format!("invalid array index {}", index))?;
            if rest.is_empty() && i == items.len() {
                items.push(value);
                return Ok(());
            }
            let child = items
                .get_mut(i)
                .ok_or_else(|| format!("array index {} out of range", i))?;
            write_path(child, rest, value)
        }
        (slot, PathKey::Field(name)) => Err(format!(
            "cannot set property '{}' of {}",
            name,
            slot.type_name()
        )),
        (slot, PathKey::Index(index)) => Err(format!(
            "cannot set index {} of {}",
            index,
            slot.type_name()
        )),
    }
}

// ── Tests ─────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct TestHost {
        events: Vec<(String, Value)>,
        errors: Vec<String>,
        calls: usize,
    }

    impl Host for TestHost {
        fn field(&self, name: &str) -> Value {
            match name {
                "sender" => Value::from("alice"),
                _ => Value::Null,
            }
        }

        fn syscall(&mut self, path: &str, args: Vec<Value>) -> ExecResult<Value> {
            self.calls += 1;
            match path {
                "api.emit" => {
                    let name = to_text(&args[0]);
                    self.events.push((name, args[1].clone()));
                    Ok(Value::Null)
                }
                "api.assert" => {
                    let ok = args[0].is_truthy();
                    if !ok {
                        self.errors.push(to_text(&args[1]));
                    }
                    Ok(Value::Boolean(ok))
                }
                "api.random" => Ok(Value::Float(0.5)),
                _ => Err(ExecError::Thrown(format!("unsupported {}", path))),
            }
        }
    }

    fn program(body: &str) -> Program {
        let source = format!("action createSSC(p) {{}}\naction run(payload) {{\n{}\n}}", body);
        Program::compile(&source).unwrap()
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    fn run(body: &str) -> ExecResult<Value> {
        run_with(body, Value::Null)
    }

    fn run_with(body: &str, payload: Value) -> ExecResult<Value> {
        let mut host = TestHost::default();
        program(body).run(&mut host, "run", payload, later())
    }

    fn v(json: &str) -> Value {
        Value::parse_json(json).unwrap()
    }

    // ── Arithmetic ────────────────────────────────────────

    #[test]
    fn test_precedence_and_integer_math() {
        assert_eq!(run("return 1 + 2 * 3 - 4 % 3;").unwrap(), Value::Integer(6));
        assert_eq!(run("return 7 / 2;").unwrap(), Value::Float(3.5));
        assert_eq!(run("return 8 / 2;").unwrap(), Value::Integer(4));
        assert_eq!(run("return -(2 - 5);").unwrap(), Value::Integer(3));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(run("return 'roll: ' + 5 + ' ' + true;").unwrap(), Value::from("roll: 5 true"));
    }

    #[test]
    fn test_division_by_zero_throws_with_position() {
        let err = run("let x = 0;\nreturn 1 / x;").unwrap_err();
        assert!(err.to_string().starts_with("division by zero at 4:"), "{}", err);
    }

    #[test]
    fn test_integer_overflow_throws() {
        assert!(run("return 9223372036854775807 + 1;").is_err());
    }

    #[test]
    fn test_comparison_types() {
        assert_eq!(run("return 'a' < 'b';").unwrap(), Value::Boolean(true));
        assert_eq!(run("return 1 == 1.0;").unwrap(), Value::Boolean(true));
        assert!(run("return 'a' < 1;").is_err());
    }

    // ── Control flow ──────────────────────────────────────

    #[test]
    fn test_short_circuit_skips_syscalls() {
        let mut host = TestHost::default();
        let p = program("let a = false && api.random(); let b = 1 || api.random(); return [a, b];");
        let result = p.run(&mut host, "run", Value::Null, later()).unwrap();
        assert_eq!(result, v("[false, 1]"));
        assert_eq!(host.calls, 0);
    }

    #[test]
    fn test_loops() {
        let body = "let total = 0;\n\
                    for (k in {b: 2, a: 1}) { total = total + 1; }\n\
                    let i = 0;\n\
                    while (true) { i += 1; if (i < 3) { continue; } break; }\n\
                    let keys = [];\n\
                    for (let k in {b: 2, a: 1}) { keys = push(keys, k); }\n\
                    return [total, i, keys];";
        assert_eq!(run(body).unwrap(), v(r#"[2, 3, ["a", "b"]]"#));
    }

    #[test]
    fn test_else_if_chain() {
        let body = "let n = payload.n;\n\
                    if (n < 0) { return 'neg'; } else if (n == 0) { return 'zero'; } else { return 'pos'; }";
        assert_eq!(run_with(body, v(r#"{"n": 0}"#)).unwrap(), Value::from("zero"));
        assert_eq!(run_with(body, v(r#"{"n": 3}"#)).unwrap(), Value::from("pos"));
    }

    #[test]
    fn test_throw_records_message() {
        assert_eq!(run("throw 'not allowed';").unwrap_err(), ExecError::Thrown("not allowed".into()));
    }

    // ── Values & assignment ───────────────────────────────

    #[test]
    fn test_assignment_copies_values() {
        let body = "let a = {x: 1}; let b = a; b.x = 2; return [a.x, b.x];";
        assert_eq!(run(body).unwrap(), v("[1, 2]"));
    }

    #[test]
    fn test_nested_assignment() {
        let body = "let o = {}; o.list = []; o.list[0] = 5; o['n'] = 1; o.n += 2; o.list[0] -= 1; return o;";
        assert_eq!(run(body).unwrap(), v(r#"{"list": [4], "n": 3}"#));
    }

    #[test]
    fn test_member_of_missing_payload_throws() {
        assert!(run("return payload.amount;").is_err());
        assert_eq!(run_with("return payload.amount;", v("{}")).unwrap(), Value::Null);
    }

    #[test]
    fn test_payload_and_fields() {
        let body = "return { who: api.sender, qty: payload.qty };";
        assert_eq!(run_with(body, v(r#"{"qty": 3}"#)).unwrap(), v(r#"{"qty": 3, "who": "alice"}"#));
    }

    // ── Functions & constants ─────────────────────────────

    #[test]
    fn test_functions_and_consts() {
        let source = "const BASE = 10;\nconst DOUBLE = BASE * 2;\n\
                      fn fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); }\n\
                      action createSSC(p) {}\n\
                      action run(payload) { return fact(5) + DOUBLE; }";
        let p = Program::compile(source).unwrap();
        let mut host = TestHost::default();
        assert_eq!(p.run(&mut host, "run", Value::Null, later()).unwrap(), Value::Integer(140));
    }

    #[test]
    fn test_runaway_recursion_throws() {
        let source = "fn loop(n) { return loop(n + 1); }\n\
                      action createSSC(p) {}\n\
                      action run(payload) { return loop(0); }";
        let p = Program::compile(source).unwrap();
        let mut host = TestHost::default();
        let err = p.run(&mut host, "run", Value::Null, later()).unwrap_err();
        assert!(err.to_string().contains("maximum recursion depth"));
    }

    #[test]
    fn test_deep_recursion_runs_on_small_stack() {
        let nested = format!("{}deep(n - 1){}", "1 + (".repeat(50), ")".repeat(50));
        let source = format!(
            "fn deep(n) {{ if (n <= 0) {{ return 0; }} return {}; }}\n\
             action createSSC(p) {{}}\n\
             action run(payload) {{ return deep(63); }}",
            nested
        );
        let p = Program::compile(&source).unwrap();
        let result = std::thread::Builder::new()
            .stack_size(512 * 1024)
            .spawn(move || {
                let mut host = TestHost::default();
                p.run(&mut host, "run", Value::Null, later())
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(result.unwrap(), Value::Integer(63 * 50));
    }

    // ── Value depth ───────────────────────────────────────

    #[test]
    fn test_nested_literals_are_bounded() {
        let err = run("let v = 1; let i = 0; while (i < 200) { v = [v]; i += 1; } return v;").unwrap_err();
        assert!(err.to_string().contains("value nested deeper than 64 levels"), "{}", err);

        let ok = run("let v = 1; let i = 0; while (i < 64) { v = { v }; i += 1; } return v;").unwrap();
        assert_eq!(ok.depth(), 64);
    }

    #[test]
    fn test_nested_assignment_and_builtins_are_bounded() {
        let err = run("let v = []; let i = 0; while (i < 100) { v = push([], v); i += 1; } return v;").unwrap_err();
        assert!(err.to_string().contains("nested deeper"), "{}", err);

        let err = run("let v = { a: 1 }; let i = 0; while (i < 100) { v.a = v; i += 1; } return v;").unwrap_err();
        assert!(err.to_string().contains("nested deeper"), "{}", err);
    }

    // ── Host & limits ─────────────────────────────────────

    #[test]
    fn test_syscalls_reach_host_in_order() {
        let mut host = TestHost::default();
        let p = program(
            "if (api.assert(payload.ok, 'bad input')) { api.emit('first', 1); }\napi.emit('second', {n: 2});",
        );
        p.run(&mut host, "run", v(r#"{"ok": false}"#), later()).unwrap();
        assert_eq!(host.errors, vec!["bad input".to_string()]);
        assert_eq!(host.events.len(), 1);
        assert_eq!(host.events[0].0, "second");
    }

    #[test]
    fn test_deadline_aborts_infinite_loop() {
        let mut host = TestHost::default();
        let p = program("while (true) { }");
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(p.run(&mut host, "run", Value::Null, deadline).unwrap_err(), ExecError::Timeout);
    }

    #[test]
    fn test_unknown_action() {
        let mut host = TestHost::default();
        let err = program("").run(&mut host, "missing", Value::Null, later()).unwrap_err();
        assert_eq!(err, ExecError::Thrown("action 'missing' does not exist".into()));
    }

    // ── Compilation ───────────────────────────────────────

    #[test]
    fn test_compile_rejects_invalid_contract() {
        let err = Program::compile("action roll(p) { return x; }").unwrap_err();
        assert!(matches!(err, crate::Error::Verification(_)));
    }

    #[test]
    fn test_cache_compiles_once_per_hash() {
        let cache = ProgramCache::new();
        let source = "action createSSC(p) {}";
        let hash = normalizer::code_hash(source).unwrap();
        let a = cache.get_or_compile(&hash, source).unwrap();
        let b = cache.get_or_compile(&hash, source).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.code_hash(), hash);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_syscall_table() {
        assert_eq!(syscall_arity("api.db.find"), Some((2, 5)));
        assert_eq!(syscall_arity("api.db.drop"), None);
    }

    #[test]
    fn test_execution_determinism_100_iterations() {
        let body = "let out = []; for (x in [3, 1, 2]) { out = push(out, x * 1.5 + api.random()); } return out;";
        let first = run(body).unwrap();
        for i in 0..100 {
            assert_eq!(first, run(body).unwrap(), "Determinism failure at iteration {}", i);
        }
    }
}
