//! Sandboxed Execution Context — runs one transaction against a ledger batch
//!
//! A transaction gets a [`TxContext`]: the batch it writes into, a wall-clock
//! deadline, a stack of [`CallFrame`]s for nested contract calls, the
//! transaction-wide event list and the deterministic random counter. The
//! context is the [`Host`] the interpreter talks to.
//!
//! Failures never escape [`Sandbox::execute`]. Assertion failures and thrown
//! errors are recorded in `logs.errors`; writes made before the failure stay
//! in the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::builtins::to_text;
use crate::executor::{ExecError, ExecResult, Host, Program, ProgramCache};
use crate::hashing::{sha256, sha256_hex};
use crate::normalizer;
use crate::store::{is_alphanumeric, ContractRecord, FindOptions, LedgerBatch, LedgerView};
use crate::signature;
use crate::value::{object, Value, MAX_DEPTH};
use crate::verifier::CREATE_ACTION;
use crate::{BlockAnnotations, Event, Logs, Transaction, TransactionStatus};

/// Contract handling `deploy` and `update`
pub const SYSTEM_CONTRACT: &str = "contract";
/// Contract whose transactions are recorded without execution
pub const NULL_CONTRACT: &str = "null";
/// Only contract allowed to annotate blocks
pub const WITNESSES_CONTRACT: &str = "witnesses";
/// Names that can never be deployed
pub const RESERVED_NAMES: &[&str] = &[SYSTEM_CONTRACT, "blockProduction", NULL_CONTRACT];

const TOKENS_CONTRACT: &str = "tokens";
const TRANSFER_ACTION: &str = "transferFromContract";
const CALLING_CONTRACT_INFO: &str = "callingContractInfo";
/// Source-chain payload fields that follow a transaction into nested calls
const FORWARDED_FIELDS: &[&str] = &["amountHIVEHBD", "recipient", "isSignedWithActiveKey"];

const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_CALL_DEPTH: usize = 8;

/// Limits and policy shared by every transaction
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSettings {
    pub timeout: Duration,
    /// Maximum number of nested `executeSmartContract` frames
    pub max_call_depth: usize,
    /// Accounts allowed to deploy; empty means anyone
    pub authorized_deployers: Vec<String>,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        SandboxSettings {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            authorized_deployers: Vec::new(),
        }
    }
}

/// Block-level context visible to every transaction in the block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockContext {
    /// Id the block under construction will receive
    pub block_number: u64,
    pub source_block_number: u64,
    pub source_block_id: String,
    pub prev_source_block_id: String,
    pub timestamp: String,
}

/// One contract invocation on the call stack
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub contract: String,
    pub owner: String,
    pub sender: String,
    pub action: String,
    pub payload: Value,
    pub version: u64,
    errors: Vec<String>,
    /// Index of this frame's first event in the transaction event list
    first_event: usize,
}

impl CallFrame {
    fn new(record: &ContractRecord, sender: &str, action: &str, payload: Value) -> Self {
        CallFrame {
            contract: record.name.clone(),
            owner: record.owner.clone(),
            sender: sender.to_string(),
            action: action.to_string(),
            payload,
            version: record.version,
            errors: Vec::new(),
            first_event: 0,
        }
    }
}

/// How a frame ended. Every failure message is already in `logs.errors`.
struct FrameExit {
    logs: Logs,
    failure: Option<ExecError>,
}

/// Executes transactions; owns the compiled program cache
#[derive(Debug, Default)]
pub struct Sandbox {
    programs: ProgramCache,
    settings: SandboxSettings,
}

impl Sandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Sandbox {
            programs: ProgramCache::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SandboxSettings {
        &self.settings
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Run one transaction, filling in its `logs` and `executedCodeHash`
    pub fn execute(
        &self,
        batch: &mut LedgerBatch<'_>,
        block: &BlockContext,
        tx: &mut Transaction,
    ) -> TransactionStatus {
        debug!(
            txid = %tx.transaction_id,
            contract = %tx.contract,
            action = %tx.action,
            status = ?TransactionStatus::Running,
            "executing transaction"
        );

        let mut ctx = TxContext {
            sandbox: self,
            batch,
            block,
            transaction_id: tx.transaction_id.clone(),
            deadline: Instant::now() + self.settings.timeout,
            frames: Vec::new(),
            events: Vec::new(),
            executed_code_hash: String::new(),
            random_calls: 0,
        };
        let logs = ctx.run_transaction(tx);
        tx.executed_code_hash = ctx.executed_code_hash;
        tx.logs = logs;

        let status = tx.status();
        if status == TransactionStatus::Failed {
            debug!(txid = %tx.transaction_id, errors = ?tx.logs.errors, "transaction failed");
        }
        status
    }

    fn compile(&self, code: &str) -> crate::Result<(String, String, Arc<Program>)> {
        let canonical = normalizer::normalize(code)?;
        let code_hash = sha256_hex(&canonical);
        let program = self.programs.get_or_compile(&code_hash, &canonical)?;
        Ok((canonical, code_hash, program))
    }

    fn load(&self, record: &ContractRecord) -> crate::Result<Arc<Program>> {
        self.programs.get_or_compile(&record.code_hash, &record.code)
    }
}

// ── Transaction context ───────────────────────────────────

/// Per-transaction execution state; the interpreter's [`Host`]
pub struct TxContext<'a, 'db> {
    sandbox: &'a Sandbox,
    batch: &'a mut LedgerBatch<'db>,
    block: &'a BlockContext,
    transaction_id: String,
    deadline: Instant,
    frames: Vec<CallFrame>,
    /// Every event of the transaction, nested frames included, in emission order
    events: Vec<Event>,
    executed_code_hash: String,
    random_calls: u64,
}

fn thrown(message: impl Into<String>) -> ExecError {
    ExecError::Thrown(message.into())
}

fn is_fatal(error: &ExecError) -> bool {
    !matches!(error, ExecError::Thrown(_))
}

impl TxContext<'_, '_> {
    fn run_transaction(&mut self, tx: &Transaction) -> Logs {
        if tx.sender.is_empty() || tx.contract.is_empty() || tx.action.is_empty() {
            return Logs::with_error("the parameters sender, contract and action are required");
        }
        if tx.contract == NULL_CONTRACT {
            return Logs::default();
        }

        let payload = match parse_payload(&tx.payload) {
            Some(payload) => payload,
            None => return Logs::with_error("payload is not valid JSON"),
        };

        if tx.contract == SYSTEM_CONTRACT {
            return self.system_action(tx, payload);
        }
        if tx.action == CREATE_ACTION {
            return Logs::with_error("you cannot trigger this action");
        }

        let Some(record) = self.batch.contract(&tx.contract) else {
            return Logs::with_error("contract doesn't exist");
        };
        let program = match self.sandbox.load(&record) {
            Ok(program) => program,
            Err(e) => return Logs::with_error(e.to_string()),
        };
        if !program.has_action(&tx.action) {
            return Logs::with_error("invalid action");
        }

        let frame = CallFrame::new(&record, &tx.sender, &tx.action, payload);
        self.enter(frame, &program).logs
    }

    /// Push `frame`, run its action and pop it again
    fn enter(&mut self, mut frame: CallFrame, program: &Program) -> FrameExit {
        if self.frames.len() > self.sandbox.settings.max_call_depth {
            let error = ExecError::CallDepthExceeded;
            return FrameExit {
                logs: Logs::with_error(error.to_string()),
                failure: Some(error),
            };
        }

        self.executed_code_hash.push_str(program.code_hash());
        frame.first_event = self.events.len();
        let action = frame.action.clone();
        let payload = frame.payload.clone();
        self.frames.push(frame);

        let deadline = self.deadline;
        let outcome = program.run(self, &action, payload, deadline);

        let (mut frame_errors, first_event) = self
            .frames
            .pop()
            .map(|f| (f.errors, f.first_event))
            .unwrap_or_default();
        let failure = outcome.err();
        let events = match &failure {
            // an aborted frame reports its error alone
            Some(error) => {
                frame_errors.push(error.to_string());
                self.events.truncate(first_event);
                Vec::new()
            }
            None => self.events.get(first_event..).map(<[Event]>::to_vec).unwrap_or_default(),
        };
        FrameExit {
            logs: Logs {
                errors: frame_errors,
                events,
            },
            failure,
        }
    }

    fn current(&self) -> ExecResult<&CallFrame> {
        self.frames.last().ok_or_else(|| thrown("no active contract"))
    }

    fn current_mut(&mut self) -> ExecResult<&mut CallFrame> {
        self.frames.last_mut().ok_or_else(|| thrown("no active contract"))
    }

    // ── System actions ────────────────────────────────────

    fn system_action(&mut self, tx: &Transaction, payload: Value) -> Logs {
        let (Some(name), Some(code)) = (
            payload.get("name").and_then(Value::as_str),
            payload.get("code").and_then(Value::as_str),
        ) else {
            return Logs::with_error("invalid params");
        };
        let params = payload.get("params").cloned().unwrap_or_default();

        match tx.action.as_str() {
            "deploy" => self.deploy(&tx.sender, name, code, params),
            "update" => self.update(&tx.sender, name, code, params),
            _ => Logs::with_error("invalid action"),
        }
    }

    fn deploy(&mut self, sender: &str, name: &str, code: &str, params: Value) -> Logs {
        if !is_alphanumeric(name) || !(3..=50).contains(&name.len()) || RESERVED_NAMES.contains(&name) {
            return Logs::with_error("invalid contract name");
        }
        let deployers = &self.sandbox.settings.authorized_deployers;
        if !deployers.is_empty() && !deployers.iter().any(|d| d == sender) {
            warn!(contract = name, sender, "unauthorized deploy");
            return Logs::with_error("deployer not authorized");
        }
        if self.batch.contract(name).is_some() {
            return Logs::with_error("contract already exists");
        }
        let (canonical, code_hash, program) = match self.sandbox.compile(code) {
            Ok(compiled) => compiled,
            Err(e) => return Logs::with_error(e.to_string()),
        };

        let record = ContractRecord::new(name, sender, canonical, code_hash.clone());
        let frame = CallFrame::new(&record, sender, CREATE_ACTION, params);
        self.batch.add_contract(record);

        let exit = self.enter(frame, &program);
        if exit.failure.is_some() {
            warn!(contract = name, "createSSC failed, dropping contract");
            self.batch.drop_contract(name);
        } else {
            info!(contract = name, owner = sender, code_hash = %code_hash, "contract deployed");
        }
        exit.logs
    }

    fn update(&mut self, sender: &str, name: &str, code: &str, params: Value) -> Logs {
        let Some(existing) = self.batch.contract(name) else {
            return Logs::with_error("contract doesn't exist");
        };
        if existing.owner != sender {
            return Logs::with_error("you are not the owner of this contract");
        }
        let (canonical, code_hash, program) = match self.sandbox.compile(code) {
            Ok(compiled) => compiled,
            Err(e) => return Logs::with_error(e.to_string()),
        };

        let mut frame = CallFrame::new(&existing, sender, CREATE_ACTION, params);
        frame.version = existing.version + 1;
        let exit = self.enter(frame, &program);
        if exit.failure.is_some() {
            let created: Vec<String> = self
                .batch
                .contract(name)
                .map(|record| {
                    record
                        .tables
                        .keys()
                        .filter(|table| !existing.tables.contains_key(*table))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            warn!(contract = name, dropped_tables = created.len(), "createSSC failed, keeping previous code");
            for table in &created {
                self.batch.drop_table(name, table);
            }
        } else if self.batch.update_contract(sender, name, &canonical, &code_hash) {
            info!(contract = name, version = existing.version + 1, "contract updated");
        }
        exit.logs
    }

    // ── Nested calls ──────────────────────────────────────

    fn call_contract(&mut self, contract: &Value, action: &Value, payload: Value, sender: String) -> ExecResult<Value> {
        let contract = string_arg(contract, "contract name")?;
        let action = string_arg(action, "action")?;
        let mut payload = match payload {
            Value::Null => Value::object(),
            p @ Value::Object(_) => p,
            other => return Err(thrown(format!("payload must be an object, got {}", other.type_name()))),
        };

        let caller = self.current()?;
        let info = object([
            ("name", Value::from(caller.contract.as_str())),
            ("action", Value::from(caller.action.as_str())),
            ("version", Value::from(caller.version)),
        ]);
        if let Some(map) = payload.as_object_mut() {
            for field in FORWARDED_FIELDS {
                if let Some(value) = caller.payload.get(field).filter(|v| v.is_truthy()) {
                    map.insert(field.to_string(), value.clone());
                }
            }
            map.insert(CALLING_CONTRACT_INFO.to_string(), info);
        }

        if action == CREATE_ACTION {
            return Ok(Logs::with_error("you cannot trigger this action").to_value());
        }
        let Some(record) = self.batch.contract(&contract) else {
            return Ok(Logs::with_error("contract doesn't exist").to_value());
        };
        let program = match self.sandbox.load(&record) {
            Ok(program) => program,
            Err(e) => return Ok(Logs::with_error(e.to_string()).to_value()),
        };
        if !program.has_action(&action) {
            return Ok(Logs::with_error("invalid action").to_value());
        }

        let frame = CallFrame::new(&record, &sender, &action, payload);
        let exit = self.enter(frame, &program);
        match exit.failure {
            Some(error) if is_fatal(&error) => Err(error),
            _ => Ok(exit.logs.to_value()),
        }
    }

    // ── Syscall helpers ───────────────────────────────────

    /// `random()`: first 53 bits of a hash over the block, transaction and call counter
    fn next_random(&mut self) -> f64 {
        let seed = format!(
            "{}{}{}:{}",
            self.block.prev_source_block_id, self.block.source_block_id, self.transaction_id, self.random_calls
        );
        self.random_calls += 1;
        let digest = sha256(seed);
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
    }

    fn find(&self, contract: &str, args: &[Value], first: usize) -> ExecResult<Value> {
        let table = string_arg(&arg(args, first), "table name")?;
        let options = FindOptions::from_values(&arg(args, first + 2), &arg(args, first + 3), &arg(args, first + 4));
        let result = options.and_then(|options| self.batch.find(contract, &table, &arg(args, first + 1), &options));
        Ok(result.map(Value::Array).unwrap_or_default())
    }

    fn transfer(&mut self, from: &str, args: &[Value]) -> ExecResult<Value> {
        let payload = object([
            ("from", Value::from(from)),
            ("to", arg(args, 0)),
            ("symbol", arg(args, 1)),
            ("quantity", arg(args, 2)),
            ("type", arg(args, 3)),
        ]);
        self.call_contract(
            &Value::from(TOKENS_CONTRACT),
            &Value::from(TRANSFER_ACTION),
            payload,
            NULL_CONTRACT.to_string(),
        )
    }

    fn find_one(&self, contract: &str, table: &Value, query: &Value) -> ExecResult<Value> {
        let table = string_arg(table, "table name")?;
        Ok(self.batch.find_one(contract, &table, query).unwrap_or_default())
    }
}

impl Host for TxContext<'_, '_> {
    fn field(&self, name: &str) -> Value {
        let Some(frame) = self.frames.last() else {
            return Value::Null;
        };
        match name {
            "sender" => Value::from(frame.sender.as_str()),
            "owner" => Value::from(frame.owner.as_str()),
            "contract" => Value::from(frame.contract.as_str()),
            "action" => Value::from(frame.action.as_str()),
            "payload" => frame.payload.clone(),
            "transactionId" => Value::from(self.transaction_id.as_str()),
            "blockNumber" => Value::from(self.block.block_number),
            "sourceBlockNumber" => Value::from(self.block.source_block_number),
            "sourceBlockId" => Value::from(self.block.source_block_id.as_str()),
            "timestamp" => Value::from(self.block.timestamp.as_str()),
            "contractVersion" => Value::from(frame.version),
            _ => Value::Null,
        }
    }

    fn syscall(&mut self, path: &str, args: Vec<Value>) -> ExecResult<Value> {
        let contract = self.current()?.contract.clone();
        match path {
            "api.db.createTable" => {
                if self.current()?.action != CREATE_ACTION {
                    return Err(thrown("tables can only be created in createSSC"));
                }
                let table = string_arg(&arg(&args, 0), "table name")?;
                let indexes = match arg(&args, 1) {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items
                        .iter()
                        .map(|i| string_arg(i, "index name"))
                        .collect::<ExecResult<Vec<_>>>()?,
                    _ => return Err(thrown("indexes must be an array of strings")),
                };
                Ok(Value::Boolean(self.batch.create_table(&contract, &table, &indexes)))
            }
            "api.db.find" => self.find(&contract, &args, 0),
            "api.db.findOne" => self.find_one(&contract, &arg(&args, 0), &arg(&args, 1)),
            "api.db.findInTable" => {
                let other = string_arg(&arg(&args, 0), "contract name")?;
                self.find(&other, &args, 1)
            }
            "api.db.findOneInTable" => {
                let other = string_arg(&arg(&args, 0), "contract name")?;
                self.find_one(&other, &arg(&args, 1), &arg(&args, 2))
            }
            "api.db.insert" => {
                let table = string_arg(&arg(&args, 0), "table name")?;
                let record = arg(&args, 1);
                if record.as_object().is_none() {
                    return Err(thrown("record must be an object"));
                }
                let record = shallow(record, "record")?;
                Ok(self.batch.insert(&contract, &table, record).unwrap_or_default())
            }
            "api.db.update" => {
                let table = string_arg(&arg(&args, 0), "table name")?;
                let record = shallow(existing_record(arg(&args, 1))?, "record")?;
                let unsets = match arg(&args, 2) {
                    Value::Null => None,
                    u @ Value::Object(_) => Some(u),
                    _ => return Err(thrown("unsets must be an object")),
                };
                self.batch.update(&contract, &table, &record, unsets.as_ref());
                Ok(Value::Null)
            }
            "api.db.remove" => {
                let table = string_arg(&arg(&args, 0), "table name")?;
                let record = existing_record(arg(&args, 1))?;
                self.batch.remove(&contract, &table, &record);
                Ok(Value::Null)
            }
            "api.db.tableExists" => {
                let table = string_arg(&arg(&args, 0), "table name")?;
                Ok(Value::Boolean(self.batch.table_exists(&contract, &table)))
            }
            "api.db.getTableDetails" => {
                let table = string_arg(&arg(&args, 0), "table name")?;
                Ok(self
                    .batch
                    .get_table_details(&contract, &table)
                    .map(|meta| to_value(&meta))
                    .unwrap_or_default())
            }
            "api.db.findContract" => {
                let name = string_arg(&arg(&args, 0), "contract name")?;
                Ok(self.batch.find_contract(&name).map(|c| to_value(&c)).unwrap_or_default())
            }
            "api.db.getBlockInfo" => Ok(arg(&args, 0)
                .as_i64()
                .and_then(|id| u64::try_from(id).ok())
                .and_then(|id| self.batch.get_block_info(id))
                .map(|block| to_value(&block))
                .unwrap_or_default()),
            "api.assert" => {
                let ok = arg(&args, 0).is_truthy();
                if !ok {
                    let message = to_text(&arg(&args, 1));
                    self.current_mut()?.errors.push(message);
                }
                Ok(Value::Boolean(ok))
            }
            "api.emit" => {
                let event = string_arg(&arg(&args, 0), "event name")?;
                let data = shallow(arg(&args, 1), "event data")?;
                self.events.push(Event { contract, event, data });
                Ok(Value::Null)
            }
            "api.random" => Ok(Value::Float(self.next_random())),
            "api.executeSmartContract" => {
                let sender = self.current()?.sender.clone();
                self.call_contract(&arg(&args, 0), &arg(&args, 1), arg(&args, 2), sender)
            }
            "api.executeSmartContractAsOwner" => {
                let owner = self.current()?.owner.clone();
                self.call_contract(&arg(&args, 0), &arg(&args, 1), arg(&args, 2), owner)
            }
            "api.transferTokens" => self.transfer(&contract, &args),
            "api.transferTokensFromCallingContract" => {
                let calling = self
                    .current()?
                    .payload
                    .get(CALLING_CONTRACT_INFO)
                    .and_then(|info| info.get("name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| thrown("transferTokensFromCallingContract needs a calling contract"))?;
                self.transfer(&calling, &args)
            }
            "api.logs" => {
                let frame = self.current()?;
                let logs = Logs {
                    errors: frame.errors.clone(),
                    events: self.events.get(frame.first_event..).map(<[Event]>::to_vec).unwrap_or_default(),
                };
                Ok(logs.to_value())
            }
            "api.sha256" => Ok(Value::String(sha256_hex(to_text(&arg(&args, 0))))),
            "api.checkSignature" => Ok(Value::Boolean(signature::check(
                &arg(&args, 0),
                &arg(&args, 1),
                &arg(&args, 2),
                arg(&args, 3).as_bool().unwrap_or(false),
            ))),
            "api.isValidAccountName" => Ok(Value::Boolean(
                arg(&args, 0).as_str().is_some_and(is_valid_account_name),
            )),
            "api.verifyBlock" => {
                if contract != WITNESSES_CONTRACT {
                    return Ok(Value::Boolean(false));
                }
                let annotations: BlockAnnotations = serde_json::from_value(arg(&args, 0).to_json())
                    .map_err(|e| thrown(format!("invalid block annotations: {}", e)))?;
                Ok(Value::Boolean(self.batch.verify_block(annotations)))
            }
            "api.debug" => {
                debug!(contract = %contract, value = %to_text(&arg(&args, 0)), "contract debug");
                Ok(Value::Null)
            }
            _ => Err(thrown(format!("unknown syscall '{}'", path))),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn string_arg(value: &Value, what: &str) -> ExecResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| thrown(format!("{} must be a string", what)))
}

/// Stored documents and event data stay within [`MAX_DEPTH`] levels
fn shallow(value: Value, what: &str) -> ExecResult<Value> {
    if value.depth() > MAX_DEPTH {
        return Err(thrown(format!("{} is nested deeper than {} levels", what, MAX_DEPTH)));
    }
    Ok(value)
}

/// Update/remove records must be objects carrying an integer `_id`
fn existing_record(record: Value) -> ExecResult<Value> {
    match record.get("_id") {
        Some(Value::Integer(_)) => Ok(record),
        _ => Err(thrown("record must be an object with an integer _id")),
    }
}

fn to_value<T: Serialize>(item: &T) -> Value {
    serde_json::to_value(item)
        .map(|json| Value::from_json(&json))
        .unwrap_or_default()
}

/// Empty payloads are `null`
fn parse_payload(payload: &str) -> Option<Value> {
    if payload.trim().is_empty() {
        return Some(Value::Null);
    }
    Value::parse_json(payload).ok()
}

/// Source-chain account rules: 3 to 16 characters, dot-separated segments of
/// at least 3 characters that start with a letter and end alphanumerically
pub fn is_valid_account_name(name: &str) -> bool {
    if !(3..=16).contains(&name.len()) {
        return false;
    }
    name.split('.').all(|segment| {
        let bytes = segment.as_bytes();
        bytes.len() >= 3
            && bytes[0].is_ascii_lowercase()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes
                .iter()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
            && !segment.contains("--")
    })
}
