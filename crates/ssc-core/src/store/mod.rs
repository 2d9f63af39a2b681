//! Ledger Store - hash-chained document collections, contract registry and block chain
//!
//! The committed state lives behind one `RwLock`. Block production works on a
//! [`LedgerBatch`]: a copy-on-write overlay of the table and contract maps that
//! is published with a single write-lock swap on [`LedgerBatch::commit`].
//! Readers therefore see either the previous block or the whole new block.
//!
//! # Hash chain
//!
//! Every table carries a rolling hash seeded with `""`. Each mutation advances
//! it as `tableHash = H(tableHash)` and folds it into the global hash as
//! `databaseHash = H(databaseHash || tableHash)`. Inserts advance the hash after
//! the write, updates and removes before it.

pub mod collection;
pub mod query;
pub mod snapshot;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hashing::sha256_hex;
use crate::value::Value;
use crate::{Block, BlockAnnotations, TransactionInfo};

pub use collection::Collection;
pub use query::{FindOptions, IndexSpec};
pub use snapshot::SnapshotStore;

/// Sequence key used for block id assignment
pub const CHAIN_SEQUENCE: &str = "chain";

/// Per-table metadata stored in the contract registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub hash: String,
    pub indexes: Vec<String>,
}

/// A deployed contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractRecord {
    pub name: String,
    pub owner: String,
    pub code: String,
    pub code_hash: String,
    pub version: u64,
    pub tables: BTreeMap<String, TableMeta>,
}

impl ContractRecord {
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        code: impl Into<String>,
        code_hash: impl Into<String>,
    ) -> Self {
        ContractRecord {
            name: name.into(),
            owner: owner.into(),
            code: code.into(),
            code_hash: code_hash.into(),
            version: 1,
            tables: BTreeMap::new(),
        }
    }
}

/// Position of a transaction inside the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxLocation {
    pub block_number: u64,
    /// Index over `transactions` followed by `virtualTransactions`
    pub index: usize,
}

/// Backing collection name for a contract table
pub fn collection_name(contract: &str, table: &str) -> String {
    format!("{}_{}", contract, table)
}

pub fn is_alphanumeric(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Committed ledger state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerState {
    tables: BTreeMap<String, Arc<Collection>>,
    contracts: BTreeMap<String, Arc<ContractRecord>>,
    sequences: BTreeMap<String, u64>,
    chain: BTreeMap<u64, Arc<Block>>,
    transactions: BTreeMap<String, TxLocation>,
    database_hash: String,
}

impl LedgerState {
    pub fn database_hash(&self) -> &str {
        &self.database_hash
    }

    pub fn block_count(&self) -> usize {
        self.chain.len()
    }

    pub(crate) fn rebuild_indexes(&mut self) {
        for collection in self.tables.values_mut() {
            Arc::make_mut(collection).rebuild_indexes();
        }
    }

    fn index_transactions(&mut self, block: &Block) {
        let all = block.transactions.iter().chain(block.virtual_transactions.iter());
        for (index, tx) in all.enumerate() {
            if self.transactions.contains_key(&tx.transaction_id) {
                warn!(txid = %tx.transaction_id, block = block.id, "duplicate transaction id, keeping first");
                continue;
            }
            self.transactions.insert(
                tx.transaction_id.clone(),
                TxLocation {
                    block_number: block.id,
                    index,
                },
            );
        }
    }
}

/// Read operations shared by the committed store and an in-flight batch.
///
/// Malformed input yields `None` rather than an error.
pub trait LedgerView {
    fn collection(&self, contract: &str, table: &str) -> Option<Arc<Collection>>;
    fn contract(&self, name: &str) -> Option<Arc<ContractRecord>>;
    fn block(&self, id: u64) -> Option<Arc<Block>>;
    fn latest_block(&self) -> Option<Arc<Block>>;
    fn transaction_location(&self, txid: &str) -> Option<TxLocation>;

    fn find(
        &self,
        contract: &str,
        table: &str,
        query: &Value,
        options: &FindOptions,
    ) -> Option<Vec<Value>> {
        if !query::is_valid_query(query) {
            debug!(contract, table, "rejected query");
            return None;
        }
        let collection = self.collection(contract, table)?;
        if !query::indexes_allowed(&collection, options) {
            debug!(contract, table, "rejected undeclared sort index");
            return None;
        }
        Some(query::execute(&collection, query, options))
    }

    fn find_one(&self, contract: &str, table: &str, query: &Value) -> Option<Value> {
        let options = FindOptions {
            limit: 1,
            ..FindOptions::default()
        };
        self.find(contract, table, query, &options)?.into_iter().next()
    }

    fn find_contract(&self, name: &str) -> Option<ContractRecord> {
        self.contract(name).map(|c| (*c).clone())
    }

    fn table_exists(&self, contract: &str, table: &str) -> bool {
        self.contract(contract)
            .is_some_and(|c| c.tables.contains_key(table))
    }

    fn get_table_details(&self, contract: &str, table: &str) -> Option<TableMeta> {
        self.contract(contract)?.tables.get(table).cloned()
    }

    fn get_block_info(&self, id: u64) -> Option<Block> {
        self.block(id).map(|b| (*b).clone())
    }

    fn get_latest_block_info(&self) -> Option<Block> {
        self.latest_block().map(|b| (*b).clone())
    }

    fn get_latest_block_metadata(&self) -> Option<Block> {
        self.latest_block().map(|b| b.metadata())
    }

    fn get_transaction_info(&self, txid: &str) -> Option<TransactionInfo> {
        let location = self.transaction_location(txid)?;
        let block = self.block(location.block_number)?;
        let transaction = block
            .transactions
            .iter()
            .chain(block.virtual_transactions.iter())
            .nth(location.index)?
            .clone();
        Some(TransactionInfo {
            block_number: location.block_number,
            transaction,
        })
    }
}

/// The ledger store handle
pub struct Database {
    state: RwLock<LedgerState>,
    snapshots: Option<SnapshotStore>,
}

impl Database {
    pub fn in_memory() -> Self {
        Database {
            state: RwLock::new(LedgerState::default()),
            snapshots: None,
        }
    }

    /// Open a snapshot-backed store in `dir`, loading `<dir>/<name>.json` if present
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let snapshots = SnapshotStore::new(dir, name)?;
        let state = snapshots.load()?.unwrap_or_default();
        Ok(Database {
            state: RwLock::new(state),
            snapshots: Some(snapshots),
        })
    }

    /// `memory://` or a directory path
    pub fn from_url(url: &str, name: &str) -> Result<Self> {
        match url.strip_prefix("memory://") {
            Some(_) => Ok(Database::in_memory()),
            None => Database::open(url.strip_prefix("file://").unwrap_or(url), name),
        }
    }

    /// Persist the committed state; a no-op for in-memory stores
    pub fn save(&self) -> Result<()> {
        match &self.snapshots {
            Some(store) => store.save(&self.state.read()),
            None => Ok(()),
        }
    }

    /// Copy of the committed state
    pub fn snapshot(&self) -> LedgerState {
        self.state.read().clone()
    }

    pub fn database_hash(&self) -> String {
        self.state.read().database_hash.clone()
    }

    /// Start a write batch over the committed state
    pub fn begin(&self) -> LedgerBatch<'_> {
        let state = self.state.read();
        LedgerBatch {
            db: self,
            tables: state.tables.clone(),
            contracts: state.contracts.clone(),
            sequences: state.sequences.clone(),
            database_hash: state.database_hash.clone(),
            blocks: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Attach consensus annotations to a committed block; the block hash is untouched
    pub fn verify_block(&self, annotations: &BlockAnnotations) -> bool {
        let mut state = self.state.write();
        apply_annotations(&mut state.chain, annotations)
    }
}

fn apply_annotations(chain: &mut BTreeMap<u64, Arc<Block>>, annotations: &BlockAnnotations) -> bool {
    let Some(block) = chain.get_mut(&annotations.block_number) else {
        warn!(block = annotations.block_number, "verifyBlock on unknown block");
        return false;
    };
    let block = Arc::make_mut(block);
    block.witness = Some(annotations.witness.clone());
    block.round = Some(annotations.round);
    block.round_hash = Some(annotations.round_hash.clone());
    block.signing_key = Some(annotations.signing_key.clone());
    block.round_signature = Some(annotations.round_signature.clone());
    true
}

impl LedgerView for Database {
    fn collection(&self, contract: &str, table: &str) -> Option<Arc<Collection>> {
        self.state
            .read()
            .tables
            .get(&collection_name(contract, table))
            .cloned()
    }

    fn contract(&self, name: &str) -> Option<Arc<ContractRecord>> {
        self.state.read().contracts.get(name).cloned()
    }

    fn block(&self, id: u64) -> Option<Arc<Block>> {
        self.state.read().chain.get(&id).cloned()
    }

    fn latest_block(&self) -> Option<Arc<Block>> {
        self.state
            .read()
            .chain
            .last_key_value()
            .map(|(_, b)| b.clone())
    }

    fn transaction_location(&self, txid: &str) -> Option<TxLocation> {
        self.state.read().transactions.get(txid).copied()
    }
}

/// Copy-on-write write set for one block.
///
/// Dropping a batch without calling [`LedgerBatch::commit`] discards it.
pub struct LedgerBatch<'a> {
    db: &'a Database,
    tables: BTreeMap<String, Arc<Collection>>,
    contracts: BTreeMap<String, Arc<ContractRecord>>,
    sequences: BTreeMap<String, u64>,
    database_hash: String,
    blocks: Vec<Block>,
    annotations: Vec<BlockAnnotations>,
}

impl<'a> LedgerBatch<'a> {
    pub fn init_database_hash(&mut self, previous: impl Into<String>) {
        self.database_hash = previous.into();
    }

    pub fn database_hash(&self) -> &str {
        &self.database_hash
    }

    /// Register a new contract; `false` if the name is taken
    pub fn add_contract(&mut self, record: ContractRecord) -> bool {
        if self.contracts.contains_key(&record.name) {
            return false;
        }
        self.contracts.insert(record.name.clone(), Arc::new(record));
        true
    }

    /// Replace a contract's code; only its owner may do so. Bumps `version`
    /// and keeps every declared table.
    pub fn update_contract(&mut self, updater: &str, name: &str, code: &str, code_hash: &str) -> bool {
        let Some(record) = self.contracts.get_mut(name) else {
            return false;
        };
        if record.owner != updater {
            warn!(contract = name, updater, "contract update by non-owner");
            return false;
        }
        let record = Arc::make_mut(record);
        record.code = code.to_string();
        record.code_hash = code_hash.to_string();
        record.version += 1;
        true
    }

    /// Drop a contract together with its tables and sequences
    pub fn drop_contract(&mut self, name: &str) -> bool {
        let Some(record) = self.contracts.remove(name) else {
            return false;
        };
        for table in record.tables.keys() {
            let collection = collection_name(name, table);
            self.tables.remove(&collection);
            self.sequences.remove(&collection);
        }
        true
    }

    /// Forget a table created in this batch along with its rows and sequence
    pub fn drop_table(&mut self, contract: &str, table: &str) -> bool {
        let Some(record) = self.contracts.get_mut(contract) else {
            return false;
        };
        if Arc::make_mut(record).tables.remove(table).is_none() {
            return false;
        }
        let collection = collection_name(contract, table);
        self.tables.remove(&collection);
        self.sequences.remove(&collection);
        true
    }

    /// Create a contract table. `false` if the contract is unknown, the table
    /// already exists, or a name is not alphanumeric.
    pub fn create_table(&mut self, contract: &str, table: &str, indexes: &[String]) -> bool {
        if !is_alphanumeric(table) || !indexes.iter().all(|i| is_alphanumeric(i)) {
            return false;
        }
        let Some(record) = self.contracts.get_mut(contract) else {
            return false;
        };
        if record.tables.contains_key(table) {
            return false;
        }

        let name = collection_name(contract, table);
        Arc::make_mut(record).tables.insert(
            table.to_string(),
            TableMeta {
                hash: String::new(),
                indexes: indexes.to_vec(),
            },
        );
        self.tables
            .insert(name.clone(), Arc::new(Collection::new(name.clone(), indexes)));
        self.sequences.insert(name, 1);
        true
    }

    /// Insert a record, assigning the next `_id`. `None` if the table is not declared.
    pub fn insert(&mut self, contract: &str, table: &str, record: Value) -> Option<Value> {
        if !self.table_exists(contract, table) {
            warn!(contract, table, "insert into undeclared table");
            return None;
        }
        let name = collection_name(contract, table);
        let collection = Arc::make_mut(self.tables.get_mut(&name)?);
        let sequence = self.sequences.entry(name).or_insert(1);
        let id = *sequence;
        *sequence += 1;

        let stored = collection.insert(id, record);
        self.advance_table_hash(contract, table);
        Some(stored)
    }

    /// Merge `record`'s fields into the row with the same `_id`, then drop `unsets`' keys
    pub fn update(&mut self, contract: &str, table: &str, record: &Value, unsets: Option<&Value>) -> bool {
        if !self.table_exists(contract, table) {
            warn!(contract, table, "update of undeclared table");
            return false;
        }
        self.advance_table_hash(contract, table);

        let Some(id) = record_id(record) else {
            return false;
        };
        let Some(collection) = self.tables.get_mut(&collection_name(contract, table)) else {
            return false;
        };
        let Some(mut doc) = collection.get(id).cloned() else {
            return false;
        };

        if let (Some(target), Some(fields)) = (doc.as_object_mut(), record.as_object()) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
            if let Some(unsets) = unsets.and_then(Value::as_object) {
                for key in unsets.keys() {
                    target.remove(key);
                }
            }
        }
        Arc::make_mut(collection).replace(id, doc)
    }

    /// Remove the row with `record._id`
    pub fn remove(&mut self, contract: &str, table: &str, record: &Value) -> bool {
        if !self.table_exists(contract, table) {
            warn!(contract, table, "remove from undeclared table");
            return false;
        }
        self.advance_table_hash(contract, table);

        let Some(id) = record_id(record) else {
            return false;
        };
        let Some(collection) = self.tables.get_mut(&collection_name(contract, table)) else {
            return false;
        };
        if collection.get(id).is_none() {
            return false;
        }
        Arc::make_mut(collection).remove(id).is_some()
    }

    fn advance_table_hash(&mut self, contract: &str, table: &str) {
        let Some(record) = self.contracts.get_mut(contract) else {
            return;
        };
        if !record.tables.contains_key(table) {
            return;
        }
        if let Some(meta) = Arc::make_mut(record).tables.get_mut(table) {
            meta.hash = sha256_hex(&meta.hash);
            self.database_hash = sha256_hex(format!("{}{}", self.database_hash, meta.hash));
        }
    }

    /// Id the next block will receive
    pub fn next_block_id(&self) -> u64 {
        match self.blocks.last() {
            Some(block) => block.id + 1,
            None => self
                .db
                .state
                .read()
                .sequences
                .get(CHAIN_SEQUENCE)
                .copied()
                .unwrap_or(0),
        }
    }

    /// Stage a block. It must carry the next chain id and link to the current head.
    pub fn add_block(&mut self, block: Block) -> Result<()> {
        let expected = self.next_block_id();
        if block.id != expected {
            return Err(Error::chain(format!(
                "block id {} does not follow chain head (expected {})",
                block.id, expected
            )));
        }
        let prev_hash = self.latest_block().map(|b| b.hash.clone()).unwrap_or_default();
        if block.prev_block_hash != prev_hash {
            return Err(Error::chain(format!(
                "block {} prevBlockHash does not match chain head",
                block.id
            )));
        }
        self.sequences.insert(CHAIN_SEQUENCE.to_string(), block.id + 1);
        self.blocks.push(block);
        Ok(())
    }

    /// Stage consensus annotations; applied on commit
    pub fn verify_block(&mut self, annotations: BlockAnnotations) -> bool {
        if self.block(annotations.block_number).is_none() {
            return false;
        }
        self.annotations.push(annotations);
        true
    }

    /// Publish everything staged in this batch atomically
    pub fn commit(self) {
        let LedgerBatch {
            db,
            tables,
            contracts,
            sequences,
            database_hash,
            blocks,
            annotations,
        } = self;

        let mut state = db.state.write();
        state.tables = tables;
        state.contracts = contracts;
        state.sequences = sequences;
        state.database_hash = database_hash;
        for block in blocks {
            state.index_transactions(&block);
            state.chain.insert(block.id, Arc::new(block));
        }
        for annotation in &annotations {
            apply_annotations(&mut state.chain, annotation);
        }
    }
}

impl LedgerView for LedgerBatch<'_> {
    fn collection(&self, contract: &str, table: &str) -> Option<Arc<Collection>> {
        self.tables.get(&collection_name(contract, table)).cloned()
    }

    fn contract(&self, name: &str) -> Option<Arc<ContractRecord>> {
        self.contracts.get(name).cloned()
    }

    fn block(&self, id: u64) -> Option<Arc<Block>> {
        match self.blocks.iter().find(|b| b.id == id) {
            Some(block) => Some(Arc::new(block.clone())),
            None => self.db.block(id),
        }
    }

    fn latest_block(&self) -> Option<Arc<Block>> {
        match self.blocks.last() {
            Some(block) => Some(Arc::new(block.clone())),
            None => self.db.latest_block(),
        }
    }

    fn transaction_location(&self, txid: &str) -> Option<TxLocation> {
        for block in &self.blocks {
            let mut all = block.transactions.iter().chain(block.virtual_transactions.iter());
            if let Some(index) = all.position(|tx| tx.transaction_id == txid) {
                return Some(TxLocation {
                    block_number: block.id,
                    index,
                });
            }
        }
        self.db.transaction_location(txid)
    }
}

fn record_id(record: &Value) -> Option<u64> {
    match record.get(collection::ID_FIELD)? {
        Value::Integer(i) => u64::try_from(*i).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::object;
    use crate::Transaction;

    fn setup() -> Database {
        let db = Database::in_memory();
        let mut batch = db.begin();
        batch.add_contract(ContractRecord::new("dice", "alice", "code", "codehash"));
        assert!(batch.create_table("dice", "params", &[]));
        assert!(batch.create_table("dice", "bets", &["account".to_string()]));
        batch.commit();
        db
    }

    fn v(json: &str) -> Value {
        Value::parse_json(json).unwrap()
    }

    fn block(id: u64, prev: &str, txs: Vec<Transaction>) -> Block {
        let mut block = Block {
            id,
            source_block_number: id + 100,
            prev_block_hash: prev.to_string(),
            transactions: txs,
            ..Default::default()
        };
        block.hash = block.calculate_hash().unwrap();
        block
    }

    // ── Tables ──

    #[test]
    fn test_create_table_rules() {
        let db = setup();
        let mut batch = db.begin();
        assert!(!batch.create_table("dice", "params", &[]), "duplicate");
        assert!(!batch.create_table("dice", "bad_name", &[]), "not alphanumeric");
        assert!(!batch.create_table("dice", "ok", &["bad-index".to_string()]));
        assert!(!batch.create_table("nobody", "t", &[]), "unknown contract");
        assert!(batch.create_table("dice", "history", &[]));
        assert!(batch.table_exists("dice", "history"));
    }

    #[test]
    fn test_create_table_leaves_hashes_alone() {
        let db = setup();
        assert_eq!(db.database_hash(), "");
        let details = db.get_table_details("dice", "params").unwrap();
        assert_eq!(details.hash, "");
        assert!(details.indexes.is_empty());
    }

    #[test]
    fn test_insert_into_undeclared_table_is_noop() {
        let db = setup();
        let mut batch = db.begin();
        assert!(batch.insert("dice", "missing", v("{}")).is_none());
        assert!(batch.insert("other", "params", v("{}")).is_none());
        assert_eq!(batch.database_hash(), "");
    }

    // ── Hash chain ──

    #[test]
    fn test_insert_advances_table_and_database_hash() {
        let db = setup();
        let mut batch = db.begin();
        batch.insert("dice", "params", v(r#"{"houseEdge": 0.01}"#)).unwrap();

        let table_hash = sha256_hex("");
        let db_hash = sha256_hex(format!("{}{}", "", table_hash));
        assert_eq!(batch.get_table_details("dice", "params").unwrap().hash, table_hash);
        assert_eq!(batch.database_hash(), db_hash);
    }

    #[test]
    fn test_same_mutations_same_hash() {
        let run = || {
            let db = setup();
            let mut batch = db.begin();
            batch.init_database_hash("prev");
            let row = batch.insert("dice", "bets", v(r#"{"account": "bob", "amount": 3}"#)).unwrap();
            let id = row.get("_id").cloned().unwrap();
            batch.update("dice", "bets", &object([("_id", id), ("amount", Value::Integer(4))]), None);
            batch.remove("dice", "bets", &row);
            batch.database_hash().to_string()
        };
        let first = run();
        for i in 0..100 {
            assert_eq!(first, run(), "Non-determinism at iteration {}", i);
        }
    }

    #[test]
    fn test_update_and_remove_hash_even_when_row_missing() {
        let db = setup();
        let mut batch = db.begin();
        assert!(!batch.update("dice", "params", &v(r#"{"_id": 99}"#), None));
        let after_update = batch.database_hash().to_string();
        assert_ne!(after_update, "");
        assert!(!batch.remove("dice", "params", &v(r#"{"_id": 99}"#)));
        assert_ne!(batch.database_hash(), after_update);
    }

    // ── Rows ──

    #[test]
    fn test_update_merges_and_unsets() {
        let db = setup();
        let mut batch = db.begin();
        batch.insert("dice", "params", v(r#"{"houseEdge": 0.01, "minBet": 1, "legacy": true}"#));
        assert!(batch.update(
            "dice",
            "params",
            &v(r#"{"_id": 1, "houseEdge": 0.02}"#),
            Some(&v(r#"{"legacy": ""}"#)),
        ));
        let row = batch.find_one("dice", "params", &v(r#"{"_id": 1}"#)).unwrap();
        assert_eq!(row, v(r#"{"_id": 1, "houseEdge": 0.02, "minBet": 1}"#));
    }

    #[test]
    fn test_ids_never_reused_after_remove() {
        let db = setup();
        let mut batch = db.begin();
        let a = batch.insert("dice", "params", v("{}")).unwrap();
        let b = batch.insert("dice", "params", v("{}")).unwrap();
        assert!(batch.remove("dice", "params", &b));
        let c = batch.insert("dice", "params", v("{}")).unwrap();
        assert_eq!(a.get("_id"), Some(&Value::Integer(1)));
        assert_eq!(c.get("_id"), Some(&Value::Integer(3)));
    }

    // ── Isolation ──

    #[test]
    fn test_readers_do_not_see_uncommitted_writes() {
        let db = setup();
        let mut batch = db.begin();
        batch.insert("dice", "params", v(r#"{"houseEdge": 0.01}"#));
        assert_eq!(db.find("dice", "params", &v("{}"), &FindOptions::default()).unwrap().len(), 0);
        batch.commit();
        assert_eq!(db.find("dice", "params", &v("{}"), &FindOptions::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_dropped_batch_discards_writes() {
        let db = setup();
        {
            let mut batch = db.begin();
            batch.insert("dice", "params", v("{}"));
        }
        let mut batch = db.begin();
        let row = batch.insert("dice", "params", v("{}")).unwrap();
        assert_eq!(row.get("_id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_drop_contract_removes_tables() {
        let db = setup();
        let mut batch = db.begin();
        assert!(batch.drop_contract("dice"));
        assert!(batch.find_contract("dice").is_none());
        assert!(batch.collection("dice", "params").is_none());
        assert!(db.find_contract("dice").is_some());
    }

    #[test]
    fn test_drop_table_forgets_new_table() {
        let db = setup();
        let mut batch = db.begin();
        assert!(batch.create_table("dice", "extra", &[]));
        batch.insert("dice", "extra", v("{}")).unwrap();
        assert!(batch.drop_table("dice", "extra"));
        assert!(!batch.table_exists("dice", "extra"));
        assert!(batch.collection("dice", "extra").is_none());
        assert!(!batch.drop_table("dice", "extra"));
        assert!(batch.table_exists("dice", "params"));
    }

    #[test]
    fn test_update_contract_owner_checked() {
        let db = setup();
        let mut batch = db.begin();
        assert!(!batch.update_contract("mallory", "dice", "x", "h"));
        assert!(batch.update_contract("alice", "dice", "x", "h"));
        let record = batch.find_contract("dice").unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.tables.len(), 2);
    }

    // ── Chain ──

    #[test]
    fn test_add_block_checks_linkage_and_indexes_transactions() {
        let db = Database::in_memory();
        let mut batch = db.begin();
        let genesis = block(0, "", vec![Transaction::new(0, "GENESIS-0", "null", "null", "null", "{}")]);
        let genesis_hash = genesis.hash.clone();
        batch.add_block(genesis).unwrap();

        assert!(batch.add_block(block(5, &genesis_hash, vec![])).is_err());
        assert!(batch.add_block(block(1, "wrong", vec![])).is_err());
        batch
            .add_block(block(1, &genesis_hash, vec![Transaction::new(101, "tx-1", "a", "c", "x", "{}")]))
            .unwrap();
        assert_eq!(batch.get_transaction_info("tx-1").unwrap().block_number, 1);
        batch.commit();

        assert_eq!(db.get_latest_block_info().unwrap().id, 1);
        assert!(db.get_latest_block_metadata().unwrap().transactions.is_empty());
        let info = db.get_transaction_info("tx-1").unwrap();
        assert_eq!(info.block_number, 1);
        assert_eq!(info.transaction.sender, "a");
        assert!(db.get_transaction_info("nope").is_none());
        assert_eq!(db.begin().next_block_id(), 2);
    }

    #[test]
    fn test_verify_block_keeps_hash() {
        let db = Database::in_memory();
        let mut batch = db.begin();
        batch.add_block(block(0, "", vec![])).unwrap();
        batch.commit();
        let before = db.get_block_info(0).unwrap();

        let annotations = BlockAnnotations {
            block_number: 0,
            witness: "w1".into(),
            round: 1,
            round_hash: "rh".into(),
            signing_key: "key".into(),
            round_signature: "sig".into(),
        };
        assert!(db.verify_block(&annotations));
        let after = db.get_block_info(0).unwrap();
        assert_eq!(after.hash, before.hash);
        assert_eq!(after.witness.as_deref(), Some("w1"));
        assert!(!db.verify_block(&BlockAnnotations { block_number: 9, ..annotations }));
    }

    #[test]
    fn test_from_url_memory_and_dir() {
        assert!(Database::from_url("memory://", "ssc").unwrap().save().is_ok());
        let dir = tempfile::tempdir().unwrap();
        let db = Database::from_url(dir.path().to_str().unwrap(), "ssc").unwrap();
        db.save().unwrap();
        assert!(dir.path().join("ssc.json").exists());
    }
}
