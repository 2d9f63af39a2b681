//! SSC Core - deterministic block production and contract execution for a sidechain node
//!
//! Every honest node that feeds the same source-chain transaction stream
//! through this crate must reach the same block hashes and database hashes.
//!
//! # Architecture
//!
//! ```text
//! Source block ─→ BlockProducer ─→ Sandbox (per tx) ─→ Executor (contract code)
//!                      │                 │
//!                      │                 └─→ LedgerBatch (copy-on-write writes)
//!                      ↓
//!                 Block hash + merkle root ─→ Database::commit (atomic)
//!
//! Contract source → Parser → AST → Verifier → Normalizer (code hash) → cached Program
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic**: no clock, entropy or unordered iteration reaches contract code
//! - **Isolated**: a failing transaction never prevents its siblings from committing
//! - **Atomic**: readers see the previous block or the whole new block, never a half block
//! - **Verifiable**: every table mutation folds into the running database hash

pub mod builtins;
pub mod config;
pub mod error;
pub mod executor;
pub mod genesis;
pub mod hashing;
pub mod ipc;
pub mod node;
pub mod normalizer;
pub mod parser;
pub mod producer;
pub mod sandbox;
pub mod signature;
pub mod store;
pub mod value;
pub mod verifier;

pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::Node;
pub use producer::{BlockProducer, EngineState};
pub use sandbox::{Sandbox, SandboxSettings};
pub use store::{Database, LedgerView};
pub use value::Value;

use serde::{Deserialize, Serialize};

/// Event emitted by contract code through `api.emit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub contract: String,
    pub event: String,
    pub data: Value,
}

/// Outcome record of one contract action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

impl Logs {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.events.is_empty()
    }

    pub fn with_error(message: impl Into<String>) -> Self {
        Logs {
            errors: vec![message.into()],
            events: Vec::new(),
        }
    }

    /// `{errors?, events?}` as a contract-visible value
    pub fn to_value(&self) -> Value {
        let mut map = std::collections::BTreeMap::new();
        if !self.errors.is_empty() {
            map.insert(
                "errors".to_string(),
                Value::Array(self.errors.iter().map(|e| Value::from(e.as_str())).collect()),
            );
        }
        if !self.events.is_empty() {
            map.insert(
                "events".to_string(),
                Value::Array(
                    self.events
                        .iter()
                        .map(|e| {
                            value::object([
                                ("contract", Value::from(e.contract.as_str())),
                                ("event", Value::from(e.event.as_str())),
                                ("data", e.data.clone()),
                            ])
                        })
                        .collect(),
                ),
            );
        }
        Value::Object(map)
    }
}

/// Transaction lifecycle: `Pending -> Running -> {Succeeded, Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A sidechain transaction, as delivered by the source feed and as recorded in a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(default)]
    pub source_block_number: u64,
    pub transaction_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub contract: String,
    #[serde(default)]
    pub action: String,
    /// Opaque JSON text; parsed by the sandbox, never by the producer
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub executed_code_hash: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub logs: Logs,
}

impl Transaction {
    pub fn new(
        source_block_number: u64,
        transaction_id: impl Into<String>,
        sender: impl Into<String>,
        contract: impl Into<String>,
        action: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        let mut tx = Transaction {
            source_block_number,
            transaction_id: transaction_id.into(),
            sender: sender.into(),
            contract: contract.into(),
            action: action.into(),
            payload: payload.into(),
            executed_code_hash: String::new(),
            hash: String::new(),
            logs: Logs::default(),
        };
        tx.hash = tx.calculate_hash();
        tx
    }

    pub fn calculate_hash(&self) -> String {
        hashing::sha256_hex(format!(
            "{}{}{}{}{}{}",
            self.source_block_number,
            self.transaction_id,
            self.sender,
            self.contract,
            self.action,
            self.payload
        ))
    }

    /// Resolved outcome; only meaningful once the transaction sits in a block
    pub fn status(&self) -> TransactionStatus {
        if self.logs.errors.is_empty() {
            TransactionStatus::Succeeded
        } else {
            TransactionStatus::Failed
        }
    }
}

/// Consensus annotations attached after commit by the round-verification contract
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAnnotations {
    pub block_number: u64,
    pub witness: String,
    pub round: u64,
    pub round_hash: String,
    #[serde(default)]
    pub signing_key: String,
    pub round_signature: String,
}

/// A committed sidechain block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: u64,
    pub source_block_number: u64,
    pub source_block_id: String,
    pub prev_source_block_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub virtual_transactions: Vec<Transaction>,
    pub prev_block_hash: String,
    pub prev_database_hash: String,
    pub hash: String,
    pub database_hash: String,
    pub merkle_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_signature: Option<String>,
}

impl Block {
    /// Hash over the canonical contents; consensus annotations are excluded
    pub fn calculate_hash(&self) -> Result<String> {
        let txs = serde_json::to_string(&self.transactions)?;
        let vtxs = serde_json::to_string(&self.virtual_transactions)?;
        Ok(hashing::sha256_hex(format!(
            "{}{}{}{}{}{}{}{}{}",
            self.prev_block_hash,
            self.id,
            self.source_block_number,
            self.source_block_id,
            self.prev_source_block_id,
            self.timestamp,
            txs,
            vtxs,
            self.database_hash
        )))
    }

    pub fn calculate_merkle_root(&self) -> String {
        let leaves: Vec<String> = self
            .transactions
            .iter()
            .chain(self.virtual_transactions.iter())
            .map(|tx| tx.hash.clone())
            .collect();
        hashing::merkle_root(&leaves)
    }

    /// Copy with transaction bodies stripped, for cheap polling
    pub fn metadata(&self) -> Block {
        Block {
            transactions: Vec::new(),
            virtual_transactions: Vec::new(),
            ..self.clone()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty() && self.virtual_transactions.is_empty()
    }
}

/// Source-chain block handed to the producer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBlock {
    pub source_block_number: u64,
    pub source_block_id: String,
    pub prev_source_block_id: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub virtual_transactions: Vec<Transaction>,
}

/// A transaction looked up through the ledger's transaction index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub block_number: u64,
    #[serde(flatten)]
    pub transaction: Transaction,
}
