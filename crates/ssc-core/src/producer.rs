//! Block Producer — turns one source block into one committed sidechain block
//!
//! Production is serialized by a mutex and tracked in [`EngineState`]:
//! `Idle -> Producing -> Idle`. A stop request is only honoured between
//! blocks; a block that has started always finishes and commits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::sandbox::{BlockContext, Sandbox, SandboxSettings};
use crate::store::{Database, LedgerView};
use crate::{Block, SourceBlock, TransactionStatus};

/// Engine flags shared between the producer and whoever stops it
#[derive(Debug, Default)]
pub struct EngineState {
    producing: AtomicBool,
    stop_requested: AtomicBool,
}

impl EngineState {
    pub fn is_producing(&self) -> bool {
        self.producing.load(Ordering::SeqCst)
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// Clears the `producing` flag however production ends
struct ProducingGuard<'a>(&'a EngineState);

impl<'a> ProducingGuard<'a> {
    fn enter(state: &'a EngineState) -> Self {
        state.producing.store(true, Ordering::SeqCst);
        ProducingGuard(state)
    }
}

impl Drop for ProducingGuard<'_> {
    fn drop(&mut self) {
        self.0.producing.store(false, Ordering::SeqCst);
    }
}

pub struct BlockProducer {
    db: Arc<Database>,
    sandbox: Sandbox,
    state: Arc<EngineState>,
    production: Mutex<()>,
}

impl BlockProducer {
    pub fn new(db: Arc<Database>, settings: SandboxSettings) -> Self {
        BlockProducer {
            db,
            sandbox: Sandbox::new(settings),
            state: Arc::new(EngineState::default()),
            production: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Execute a source block's transactions and commit the resulting block.
    ///
    /// Returns `Ok(None)` when nothing is committed: the source block was
    /// already processed, it carried no transactions, or a stop was requested.
    pub fn produce_pending_transactions(&self, source: SourceBlock) -> Result<Option<Block>> {
        let _serialized = self.production.lock();
        if self.state.stop_requested() {
            info!(source_block = source.source_block_number, "stop requested, not producing");
            return Ok(None);
        }
        let _producing = ProducingGuard::enter(&self.state);

        let latest = self.db.get_latest_block_metadata();
        if let Some(latest) = &latest {
            if source.source_block_number <= latest.source_block_number {
                warn!(
                    source_block = source.source_block_number,
                    last_processed = latest.source_block_number,
                    "skipping already processed source block"
                );
                return Ok(None);
            }
        }

        if source.transactions.is_empty() && source.virtual_transactions.is_empty() {
            debug!(source_block = source.source_block_number, "no transactions, no block");
            return Ok(None);
        }

        let mut batch = self.db.begin();
        let (prev_block_hash, prev_database_hash) = latest
            .map(|b| (b.hash, b.database_hash))
            .unwrap_or_default();
        let context = BlockContext {
            block_number: batch.next_block_id(),
            source_block_number: source.source_block_number,
            source_block_id: source.source_block_id.clone(),
            prev_source_block_id: source.prev_source_block_id.clone(),
            timestamp: source.timestamp.clone(),
        };

        let mut transactions = source.transactions;
        let mut virtual_transactions = source.virtual_transactions;
        let mut failed = 0usize;
        for tx in transactions.iter_mut().chain(virtual_transactions.iter_mut()) {
            tx.hash = tx.calculate_hash();
            if self.sandbox.execute(&mut batch, &context, tx) == TransactionStatus::Failed {
                failed += 1;
            }
        }

        let mut block = Block {
            id: context.block_number,
            source_block_number: context.source_block_number,
            source_block_id: context.source_block_id,
            prev_source_block_id: context.prev_source_block_id,
            timestamp: context.timestamp,
            transactions,
            virtual_transactions,
            prev_block_hash,
            prev_database_hash,
            database_hash: batch.database_hash().to_string(),
            ..Block::default()
        };
        block.merkle_root = block.calculate_merkle_root();
        block.hash = block.calculate_hash()?;

        batch.add_block(block.clone())?;
        batch.commit();

        if let Err(e) = self.db.save() {
            error!(block = block.id, error = %e, "failed to persist ledger snapshot");
        }

        info!(
            block = block.id,
            source_block = block.source_block_number,
            transactions = block.transactions.len() + block.virtual_transactions.len(),
            failed,
            hash = %block.hash,
            database_hash = %block.database_hash,
            "block committed"
        );
        Ok(Some(block))
    }
}
