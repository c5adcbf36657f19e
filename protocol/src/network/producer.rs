//! # Producer Loop
//!
//! The `ProducerLoop` is the heartbeat of a podoru authority node. On a
//! 500 ms tick it checks whether this node is eligible to produce the next
//! block — either the strictly scheduled authority for `head_height + 1`,
//! or, once `head.timestamp + 2Δ` has elapsed, the next authority in the
//! round-robin liveness-skip order — and if so runs the full pipeline:
//!
//! ```text
//! 1. SELECT   — drain candidate transactions from the mempool
//! 2. BUILD    — apply them to a scratch copy of chain state via ChainEngine
//! 3. SIGN     — attach this node's signature over the block hash
//! 4. COMMIT   — ingest the block locally (persists atomically)
//! 5. EMIT     — hand the committed block to the gossip layer's broadcast fn
//! ```
//!
//! Unlike a model that optimistically executes every mempool candidate and
//! drops whichever fail, every transaction here was already verified and
//! nonce-checked at mempool admission, so `build_block` either succeeds
//! with the whole batch or the producer treats failure as a bug, not a
//! per-transaction filter.
//!
//! ## Shutdown
//!
//! The loop monitors a `tokio::sync::watch` channel. When the sender drops
//! or sends `true`, the loop exits cleanly after finishing (or skipping)
//! its current tick. No in-flight block is left half-committed, since
//! `ChainEngine::ingest_block` commits atomically.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::keys::{Address, PodoruKeypair};
use crate::network::consensus::AuthoritySet;
use crate::network::mempool::Mempool;
use crate::storage::db::StorageAdapter;
use crate::storage::{Block, ChainEngine, ChainError};

/// How often the producer loop checks eligibility.
pub const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum number of transactions pulled from the mempool per block.
pub const MAX_BLOCK_TRANSACTIONS: usize = 1_000;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("not scheduled or eligible to produce at this tick")]
    NotScheduled,

    #[error("chain engine rejected the candidate block: {0}")]
    Chain(#[from] ChainError),
}

/// A callback invoked with every block this node commits, so the gossip
/// layer can broadcast it. Kept as a trait object rather than a concrete
/// dependency on `gossip.rs` so the producer loop has no knowledge of the
/// transport.
pub trait BlockSink: Send + Sync {
    fn emit(&self, block: &Block);
}

pub struct ProducerLoop<S: StorageAdapter> {
    chain: Arc<ChainEngine<S>>,
    mempool: Arc<Mempool>,
    authorities: AuthoritySet,
    keypair: PodoruKeypair,
    delta_secs: i64,
    sink: Arc<dyn BlockSink>,
    block_production_seconds: prometheus::Histogram,
}

impl<S: StorageAdapter> ProducerLoop<S> {
    pub fn new(
        chain: Arc<ChainEngine<S>>,
        mempool: Arc<Mempool>,
        authorities: AuthoritySet,
        keypair: PodoruKeypair,
        delta_secs: i64,
        sink: Arc<dyn BlockSink>,
        block_production_seconds: prometheus::Histogram,
    ) -> Self {
        Self { chain, mempool, authorities, keypair, delta_secs, sink, block_production_seconds }
    }

    pub fn self_address(&self) -> Address {
        self.keypair.address()
    }

    /// Runs the loop until `shutdown` fires. Returns once a shutdown signal
    /// is observed; never returns an error, since a failed tick is logged
    /// and simply retried on the next one.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(address = %hex::encode(self.self_address()), "producer loop starting");

        loop {
            if *shutdown.borrow() {
                info!("producer loop received shutdown signal, exiting");
                return;
            }

            match self.try_produce() {
                Ok(Some(block)) => {
                    info!(height = block.height(), txs = block.transactions.len(), "block produced and committed");
                }
                Ok(None) => {}
                Err(ProducerError::NotScheduled) => {}
                Err(e) => warn!(error = %e, "producer tick failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {}
                _ = shutdown.changed() => {
                    info!("producer loop shutting down during sleep");
                    return;
                }
            }
        }
    }

    /// Checks eligibility for the current tick and, if eligible, runs the
    /// full SELECT → BUILD → SIGN → COMMIT → EMIT pipeline. Returns
    /// `Ok(None)` only in the impossible case where eligibility passed but
    /// the resulting candidate was empty and stale by the time it
    /// committed (defensive; in practice `Ok(Some(_))` or an error).
    pub fn try_produce(&self) -> Result<Option<Block>, ProducerError> {
        let head_height = self.chain.height();
        let head_header = self.chain.head_header();
        let now = now_unix();

        let self_address = self.self_address();
        let k = self
            .authorities
            .eligible_producer(&self_address, head_height, head_header.timestamp, now, self.delta_secs)
            .ok_or(ProducerError::NotScheduled)?;

        if k > 0 {
            debug!(skipped = k, "producing under liveness slot-skip");
        }

        let candidates = self.mempool.drain_candidates(MAX_BLOCK_TRANSACTIONS);
        let timestamp = std::cmp::max(now, head_header.timestamp + 1);

        let build_started = std::time::Instant::now();
        let mut block = self.chain.build_block(self_address, candidates, timestamp)?;
        block.signature = *self.keypair.sign_hash(&block.hash()).as_bytes();

        self.chain.ingest_block(block.clone())?;
        self.block_production_seconds.observe(build_started.elapsed().as_secs_f64());

        // Evicts by sender rather than by id: a sender's pending mempool
        // entry is now stale whether or not it was the exact transaction
        // included, since its nonce counter has advanced either way.
        for tx in &block.transactions {
            self.mempool.evict_sender(&tx.from);
        }

        self.sink.emit(&block);

        Ok(Some(block))
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
