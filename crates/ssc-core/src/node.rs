//! Node façade - init, block intake, queries and graceful shutdown
//!
//! Production runs on tokio's blocking pool behind the producer's mutex, so
//! concurrent `produceNewBlockSync` requests queue instead of interleaving.
//! Queries read committed state directly and never wait on production.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::genesis;
use crate::ipc::{Envelope, Ipc, Message};
use crate::producer::BlockProducer;
use crate::store::{Database, FindOptions, LedgerView};
use crate::value::Value;
use crate::{Block, BlockAnnotations, SourceBlock};

const STOP_POLL_START: Duration = Duration::from_millis(5);
const STOP_POLL_MAX: Duration = Duration::from_secs(1);

pub struct Node {
    config: NodeConfig,
    producer: Arc<BlockProducer>,
}

impl Node {
    /// Open the store and make sure the genesis block exists
    pub fn init(config: NodeConfig) -> Result<Self> {
        config.validate().map_err(|problems| Error::Config(problems.join("; ")))?;
        let db = Arc::new(Database::from_url(&config.store_url, &config.store_name)?);
        let producer = Arc::new(BlockProducer::new(db, config.sandbox_settings()));
        genesis::initialize(&producer, &config)?;

        let head = producer.database().get_latest_block_metadata();
        info!(
            chain_id = %config.chain_id,
            store = %config.store_url,
            head = ?head.as_ref().map(|b| b.id),
            endpoints = config.source_stream_endpoints.len(),
            "node initialized"
        );
        Ok(Node { config, producer })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        self.producer.database()
    }

    pub fn producer(&self) -> &Arc<BlockProducer> {
        &self.producer
    }

    /// Produce a block for `block` and wait until it is committed
    pub async fn produce_new_block_sync(&self, block: SourceBlock) -> Result<Option<Block>> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.produce_pending_transactions(block))
            .await
            .map_err(|e| Error::Execution(format!("block production task failed: {}", e)))?
    }

    /// Refuse new blocks, wait for the one in flight, then persist
    pub async fn stop(&self) -> Result<()> {
        let state = self.producer.state();
        state.request_stop();

        let mut delay = STOP_POLL_START;
        while state.is_producing() {
            debug!(delay_ms = delay.as_millis() as u64, "waiting for block production to finish");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(STOP_POLL_MAX);
        }

        self.database().save()?;
        info!("node stopped");
        Ok(())
    }

    /// Execute one action by name and return its result payload
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<Value> {
        let payload = &envelope.payload;
        let db = self.database();
        match envelope.action.as_str() {
            "produceNewBlockSync" => {
                let block: SourceBlock = serde_json::from_value(payload.to_json())?;
                let produced = self.produce_new_block_sync(block).await?;
                to_value(&produced.map(|b| b.metadata()))
            }
            "getLatestBlockInfo" => to_value(&db.get_latest_block_info()),
            "getLatestBlockMetadata" => to_value(&db.get_latest_block_metadata()),
            "getBlockInfo" => {
                let id = payload.as_i64().and_then(|n| u64::try_from(n).ok());
                to_value(&id.and_then(|id| db.get_block_info(id)))
            }
            "getTransactionInfo" => to_value(&payload.as_str().and_then(|txid| db.get_transaction_info(txid))),
            "findContract" => {
                let name = payload.get("name").and_then(Value::as_str).unwrap_or_default();
                to_value(&db.find_contract(name))
            }
            "find" => {
                let rows = table_args(payload).and_then(|(contract, table, query)| {
                    let options = FindOptions::from_values(
                        payload.get("limit").unwrap_or(&Value::Null),
                        payload.get("offset").unwrap_or(&Value::Null),
                        payload.get("indexes").unwrap_or(&Value::Null),
                    )?;
                    db.find(contract, table, query, &options)
                });
                Ok(rows.map(Value::Array).unwrap_or_default())
            }
            "findOne" => {
                let row = table_args(payload).and_then(|(contract, table, query)| db.find_one(contract, table, query));
                Ok(row.unwrap_or_default())
            }
            "verifyBlock" => {
                let annotations: BlockAnnotations = serde_json::from_value(payload.to_json())?;
                Ok(Value::Boolean(db.verify_block(&annotations)))
            }
            "stop" => {
                self.stop().await?;
                Ok(Value::Boolean(true))
            }
            other => Err(Error::Ipc(format!("unknown action '{}'", other))),
        }
    }

    /// Dispatch inbound messages until a `stop` request or until the channel closes
    pub async fn serve(&self, ipc: &Ipc, mut inbound: mpsc::UnboundedReceiver<Message>) -> Result<()> {
        while let Some(message) = inbound.recv().await {
            let Some(message) = ipc.deliver(message) else {
                continue;
            };
            let stopping = message.envelope().action == "stop";
            match message {
                Message::Request(request) => {
                    let reply = match self.dispatch(&request).await {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(action = %request.action, error = %e, "request failed");
                            crate::value::object([("error", Value::from(e.to_string()))])
                        }
                    };
                    ipc.respond(&request, reply)?;
                }
                Message::Broadcast(broadcast) => {
                    if let Err(e) = self.dispatch(&broadcast).await {
                        error!(action = %broadcast.action, error = %e, "broadcast handling failed");
                    }
                }
                Message::Response(_) => {}
            }
            if stopping {
                break;
            }
        }
        Ok(())
    }
}

fn table_args(payload: &Value) -> Option<(&str, &str, &Value)> {
    let contract = payload.get("contract")?.as_str()?;
    let table = payload.get("table")?.as_str()?;
    let query = payload.get("query")?;
    Some((contract, table, query))
}

fn to_value<T: Serialize>(item: &T) -> Result<Value> {
    Ok(Value::from_json(&serde_json::to_value(item)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SeedContract;
    use crate::Transaction;
    use serde_json::json;

    const DICE: &str = include_str!("../../../tests/fixtures/contracts/dice.ssc");

    fn config() -> NodeConfig {
        let mut config = NodeConfig::new("ssc-test");
        config.genesis_contracts.push(SeedContract {
            name: "dice".into(),
            owner: "alice".into(),
            code: Some(DICE.into()),
            ..SeedContract::default()
        });
        config
    }

    fn source(number: u64, txs: Vec<Transaction>) -> SourceBlock {
        SourceBlock {
            source_block_number: number,
            source_block_id: format!("src-{}", number),
            prev_source_block_id: format!("src-{}", number - 1),
            timestamp: "2018-06-01T00:00:03".into(),
            transactions: txs,
            virtual_transactions: Vec::new(),
        }
    }

    fn params_tx(id: &str, edge: f64) -> Transaction {
        Transaction::new(5, id, "alice", "dice", "updateParams", json!({ "houseEdge": edge }).to_string())
    }

    fn request(action: &str, payload: Value) -> Envelope {
        Envelope::new("blockchain", "test", action, payload)
    }

    fn v(text: &str) -> Value {
        Value::parse_json(text).unwrap()
    }

    // ── Lifecycle ─────────────────────────────────────────

    #[tokio::test]
    async fn test_init_creates_genesis() {
        let node = Node::init(config()).unwrap();
        let head = node.database().get_latest_block_info().unwrap();
        assert_eq!(head.id, 0);
        assert!(node.database().find_contract("dice").is_some());
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        assert!(matches!(Node::init(NodeConfig::new("")), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_yields_one_block() {
        let node = Node::init(config()).unwrap();
        let first = node.produce_new_block_sync(source(5, vec![params_tx("tx-1", 0.01)])).await.unwrap();
        let second = node.produce_new_block_sync(source(5, vec![params_tx("tx-2", 0.05)])).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        let db = node.database();
        assert_eq!(db.get_latest_block_info().unwrap().id, 1);
        let rows = db.find("dice", "params", &Value::object(), &FindOptions::default()).unwrap();
        assert_eq!(rows, vec![v(r#"{"_id": 1, "houseEdge": 0.01}"#)]);
    }

    #[tokio::test]
    async fn test_stop_refuses_further_blocks() {
        let node = Node::init(config()).unwrap();
        node.stop().await.unwrap();
        assert!(!node.producer().state().is_producing());
        let produced = node.produce_new_block_sync(source(6, vec![params_tx("tx-1", 0.01)])).await.unwrap();
        assert!(produced.is_none());
    }

    #[tokio::test]
    async fn test_restart_from_snapshot_keeps_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.store_url = dir.path().to_string_lossy().into_owned();

        let hash = {
            let node = Node::init(config.clone()).unwrap();
            let block = node.produce_new_block_sync(source(5, vec![params_tx("tx-1", 0.01)])).await.unwrap().unwrap();
            node.stop().await.unwrap();
            block.hash
        };

        let node = Node::init(config).unwrap();
        let head = node.database().get_latest_block_info().unwrap();
        assert_eq!(head.id, 1);
        assert_eq!(head.hash, hash);
        let row = node.database().find_one("dice", "params", &v(r#"{"houseEdge": 0.01}"#));
        assert!(row.is_some());
    }

    // ── Dispatch ──────────────────────────────────────────

    #[tokio::test]
    async fn test_dispatch_produce_and_query() {
        let node = Node::init(config()).unwrap();
        let block = to_value(&source(5, vec![params_tx("tx-1", 0.02)])).unwrap();
        let produced = node.dispatch(&request("produceNewBlockSync", block)).await.unwrap();
        assert_eq!(produced.get("id"), Some(&Value::Integer(1)));

        let info = node.dispatch(&request("getBlockInfo", Value::Integer(1))).await.unwrap();
        assert_eq!(info.get("transactions").and_then(Value::as_array).map(Vec::len), Some(1));

        let tx = node.dispatch(&request("getTransactionInfo", Value::from("tx-1"))).await.unwrap();
        assert_eq!(tx.get("blockNumber"), Some(&Value::Integer(1)));

        let rows = node
            .dispatch(&request("find", v(r#"{"contract": "dice", "table": "params", "query": {}}"#)))
            .await
            .unwrap();
        assert_eq!(rows, v(r#"[{"_id": 1, "houseEdge": 0.02}]"#));

        let row = node
            .dispatch(&request("findOne", v(r#"{"contract": "dice", "table": "params", "query": {"_id": 1}}"#)))
            .await
            .unwrap();
        assert_eq!(row.get("houseEdge"), Some(&Value::Float(0.02)));

        let contract = node.dispatch(&request("findContract", v(r#"{"name": "dice"}"#))).await.unwrap();
        assert_eq!(contract.get("owner").and_then(Value::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn test_dispatch_malformed_queries_return_null() {
        let node = Node::init(config()).unwrap();
        let missing = node.dispatch(&request("getBlockInfo", Value::Integer(42))).await.unwrap();
        assert!(missing.is_null());
        let bad_limit = node
            .dispatch(&request(
                "find",
                v(r#"{"contract": "dice", "table": "params", "query": {}, "limit": -1}"#),
            ))
            .await
            .unwrap();
        assert!(bad_limit.is_null());
        assert!(node.dispatch(&request("findOne", v("{}"))).await.unwrap().is_null());
        assert!(node.dispatch(&request("noSuchAction", Value::Null)).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_verify_block() {
        let node = Node::init(config()).unwrap();
        let annotations = v(
            r#"{"blockNumber": 0, "witness": "w1", "round": 1, "roundHash": "rh", "signingKey": "k", "roundSignature": "sig"}"#,
        );
        let ok = node.dispatch(&request("verifyBlock", annotations)).await.unwrap();
        assert_eq!(ok, Value::Boolean(true));
        let meta = node.dispatch(&request("getLatestBlockMetadata", Value::Null)).await.unwrap();
        assert_eq!(meta.get("witness").and_then(Value::as_str), Some("w1"));
    }

    // ── IPC loop ──────────────────────────────────────────

    #[tokio::test]
    async fn test_serve_answers_requests_until_stop() {
        let node = Node::init(config()).unwrap();
        let (ipc, mut outbound) = Ipc::new("blockchain");
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let mut latest = request("getLatestBlockInfo", Value::Null);
        latest.job_id = 11;
        let mut stop = request("stop", Value::Null);
        stop.job_id = 12;
        inbound_tx.send(Message::Request(latest)).unwrap();
        inbound_tx.send(Message::Request(stop)).unwrap();

        node.serve(&ipc, inbound_rx).await.unwrap();

        let Some(Message::Response(first)) = outbound.recv().await else {
            panic!("expected a response");
        };
        assert_eq!((first.job_id, first.to.as_str()), (11, "test"));
        assert_eq!(first.payload.get("id"), Some(&Value::Integer(0)));
        let Some(Message::Response(second)) = outbound.recv().await else {
            panic!("expected a response");
        };
        assert_eq!(second.payload, Value::Boolean(true));
        assert!(node.producer().state().stop_requested());
    }
}
