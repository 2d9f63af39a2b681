//! Genesis Initializer - produces block 0 from bootstrap transactions
//!
//! Genesis runs through the ordinary [`BlockProducer`] path. Only its
//! linkage is special: source block number 0, empty previous hashes and a
//! fixed timestamp, so every node builds the same block 0 from the same config.

use serde_json::json;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::producer::BlockProducer;
use crate::sandbox::{NULL_CONTRACT, SYSTEM_CONTRACT};
use crate::store::LedgerView;
use crate::{Block, SourceBlock, Transaction};

pub const GENESIS_TIMESTAMP: &str = "2018-06-01T00:00:00";

/// Id of the i-th genesis transaction
pub fn genesis_transaction_id(index: usize) -> String {
    format!("GENESIS-{}", index)
}

/// Chain-identity record followed by one deploy per seed contract
pub fn bootstrap_transactions(config: &NodeConfig) -> Result<Vec<Transaction>> {
    let sbn = config.genesis_source_block;
    let identity = json!({
        "chainId": config.chain_id,
        "genesisSourceBlock": sbn,
    });
    let mut transactions = vec![Transaction::new(
        sbn,
        genesis_transaction_id(0),
        NULL_CONTRACT,
        NULL_CONTRACT,
        NULL_CONTRACT,
        identity.to_string(),
    )];

    for (i, seed) in config.genesis_contracts.iter().enumerate() {
        let payload = json!({
            "name": seed.name,
            "code": seed.load_code()?,
            "params": seed.params.to_json(),
        });
        transactions.push(Transaction::new(
            sbn,
            genesis_transaction_id(i + 1),
            seed.owner.as_str(),
            SYSTEM_CONTRACT,
            "deploy",
            payload.to_string(),
        ));
    }
    Ok(transactions)
}

/// Produce block 0 unless the ledger already has it.
///
/// Returns the new genesis block, or `None` when the chain already existed.
pub fn initialize(producer: &BlockProducer, config: &NodeConfig) -> Result<Option<Block>> {
    if let Some(existing) = producer.database().get_block_info(0) {
        info!(hash = %existing.hash, "genesis block already present");
        return Ok(None);
    }

    let source = SourceBlock {
        source_block_number: 0,
        source_block_id: String::new(),
        prev_source_block_id: String::new(),
        timestamp: GENESIS_TIMESTAMP.to_string(),
        transactions: bootstrap_transactions(config)?,
        virtual_transactions: Vec::new(),
    };
    let block = producer
        .produce_pending_transactions(source)?
        .ok_or_else(|| Error::chain("genesis block was not produced"))?;

    for tx in &block.transactions {
        if !tx.logs.errors.is_empty() {
            warn!(txid = %tx.transaction_id, errors = ?tx.logs.errors, "genesis transaction failed");
        }
    }
    info!(chain_id = %config.chain_id, hash = %block.hash, database_hash = %block.database_hash, "genesis block created");
    Ok(Some(block))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedContract;
    use crate::store::Database;
    use crate::value::Value;
    use crate::TransactionStatus;
    use std::sync::Arc;

    const DICE: &str = include_str!("../../../tests/fixtures/contracts/dice.ssc");

    fn config() -> NodeConfig {
        let mut config = NodeConfig::new("ssc-testnet1");
        config.genesis_source_block = 29_056_257;
        config.genesis_contracts.push(SeedContract {
            name: "dice".into(),
            owner: "steemsc".into(),
            code: Some(DICE.into()),
            ..SeedContract::default()
        });
        config
    }

    fn producer(config: &NodeConfig) -> BlockProducer {
        BlockProducer::new(Arc::new(Database::in_memory()), config.sandbox_settings())
    }

    #[test]
    fn test_genesis_block_linkage() {
        let config = config();
        let p = producer(&config);
        let block = initialize(&p, &config).unwrap().unwrap();
        assert_eq!(block.id, 0);
        assert_eq!(block.source_block_number, 0);
        assert_eq!(block.prev_block_hash, "");
        assert_eq!(block.prev_database_hash, "");
        assert_eq!(block.timestamp, GENESIS_TIMESTAMP);

        let ids: Vec<&str> = block.transactions.iter().map(|t| t.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["GENESIS-0", "GENESIS-1"]);
        assert!(block.transactions.iter().all(|t| t.status() == TransactionStatus::Succeeded));
        assert_eq!(block.transactions[0].source_block_number, 29_056_257);
    }

    #[test]
    fn test_genesis_records_chain_identity_and_deploys_seeds() {
        let config = config();
        let p = producer(&config);
        initialize(&p, &config).unwrap();
        let db = p.database();

        let identity = db.get_transaction_info("GENESIS-0").unwrap();
        let payload = Value::parse_json(&identity.transaction.payload).unwrap();
        assert_eq!(payload.get("chainId").and_then(Value::as_str), Some("ssc-testnet1"));

        let dice = db.find_contract("dice").unwrap();
        assert_eq!(dice.owner, "steemsc");
        assert!(dice.tables.contains_key("params"));
    }

    #[test]
    fn test_genesis_runs_once() {
        let config = config();
        let p = producer(&config);
        let first = initialize(&p, &config).unwrap().unwrap();
        assert!(initialize(&p, &config).unwrap().is_none());
        assert_eq!(p.database().get_latest_block_info().unwrap().hash, first.hash);
    }

    #[test]
    fn test_genesis_determinism_100_iterations() {
        let config = config();
        let first = initialize(&producer(&config), &config).unwrap().unwrap().hash;
        for i in 0..100 {
            let hash = initialize(&producer(&config), &config).unwrap().unwrap().hash;
            assert_eq!(first, hash, "Non-determinism at iteration {}", i);
        }
    }

    #[test]
    fn test_chain_id_changes_genesis_hash() {
        let a = config();
        let mut b = config();
        b.chain_id = "ssc-mainnet1".into();
        let ha = initialize(&producer(&a), &a).unwrap().unwrap().hash;
        let hb = initialize(&producer(&b), &b).unwrap().unwrap().hash;
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_unreadable_seed_is_a_config_error() {
        let mut config = NodeConfig::new("c");
        config.genesis_contracts.push(SeedContract {
            name: "ghost".into(),
            owner: "alice".into(),
            path: Some("/nonexistent/ghost.ssc".into()),
            ..SeedContract::default()
        });
        assert!(matches!(bootstrap_transactions(&config), Err(Error::Config(_))));
    }
}
