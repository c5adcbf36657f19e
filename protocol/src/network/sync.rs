//! # Block Synchronization
//!
//! When a node boots for the first time, or reconnects after being offline,
//! it needs to catch up to the chain tip. This module implements both sides
//! of that protocol: [`SyncRequest`]/[`SyncResponse`] are the wire messages,
//! and [`SyncEngine`] is the logic that answers incoming requests and applies
//! downloaded batches to local chain state.
//!
//! ```text
//! New Node                           Peer
//! ─────────                         ──────
//!   │  GetChainTip                    │
//!   │──────────────────────────────>  │
//!   │  ChainTip { height, hash }      │
//!   │<──────────────────────────────  │
//!   │                                 │
//!   │  GetBlocks { start, end }       │
//!   │──────────────────────────────>  │
//!   │  Blocks(Vec<Block>)             │
//!   │<──────────────────────────────  │
//!   │  ... (repeat in batches) ...    │
//! ```
//!
//! ## Design Decisions
//!
//! - **Batch downloads.** The gap between local and remote height is split
//!   into chunks of [`SyncConfig::batch_size`] (default 128, matching the
//!   gossip layer's RANGE_REQ cap) so one slow peer round-trip doesn't mean
//!   one block.
//! - **Validate-then-apply.** Every downloaded block is re-validated and its
//!   transactions re-executed by [`crate::storage::ChainEngine::ingest_block`]
//!   — the syncing node independently re-derives its own state root rather
//!   than trusting the peer's.
//! - **Stateless engine.** `SyncEngine` does not open connections. It answers
//!   `process_sync_request` and applies `apply_blocks`; transport is the
//!   caller's problem, which keeps this testable without a live socket.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::block::Block;
use crate::storage::db::StorageAdapter;
use crate::storage::{ChainEngine, ChainError};

/// Maximum blocks requested in one `GetBlocks` batch.
pub const DEFAULT_SYNC_BATCH_SIZE: u64 = 128;

// ---------------------------------------------------------------------------
// Sync Request / Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncRequest {
    /// "What's your chain tip?"
    GetChainTip,

    /// "Give me blocks in range [start, end)."
    GetBlocks { start: u64, end: u64 },

    /// "Give me the block at this height."
    GetBlock { height: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncResponse {
    ChainTip { height: u64, head_hash: [u8; 32] },
    Blocks(Vec<Block>),
    Block(Option<Block>),
    Error(String),
}

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of blocks requested per `GetBlocks` call.
    pub batch_size: u64,

    /// Maximum concurrent `GetBlocks` requests in flight.
    pub max_parallel_requests: usize,

    /// Per-request timeout in milliseconds before a request is considered
    /// failed and eligible for retry against a different peer.
    pub request_timeout_ms: u64,

    /// Retries per request before giving up on the current peer.
    pub max_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            max_parallel_requests: 4,
            request_timeout_ms: 10_000,
            max_retries: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// SyncResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub blocks_applied: u64,
    pub transactions_executed: u64,
    pub final_height: u64,
    pub final_head_hash: [u8; 32],
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid block at height {height}: {reason}")]
    InvalidBlock { height: u64, reason: String },

    #[error("chain gap in downloaded batch: expected height {expected}, got {got}")]
    ChainGap { expected: u64, got: u64 },

    #[error("downloaded batch's parent hash does not chain at height {height}")]
    InvalidParentHash { height: u64 },

    #[error("chain engine rejected block: {0}")]
    Chain(#[from] ChainError),
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

/// Answers incoming sync requests and applies downloaded batches. Holds an
/// `Arc<ChainEngine<S>>` rather than owning chain state directly, since the
/// producer loop and gossip layer also need concurrent access to it.
pub struct SyncEngine<S: StorageAdapter> {
    chain: Arc<ChainEngine<S>>,
    config: SyncConfig,
}

impl<S: StorageAdapter> SyncEngine<S> {
    pub fn new(chain: Arc<ChainEngine<S>>, config: SyncConfig) -> Self {
        Self { chain, config }
    }

    /// Local chain tip: current height and head block hash.
    pub fn local_chain_tip(&self) -> (u64, [u8; 32]) {
        (self.chain.height(), self.chain.head_hash())
    }

    /// Handles an incoming request from a peer. Pure read path, no mutation.
    pub fn process_sync_request(&self, request: SyncRequest) -> SyncResponse {
        match request {
            SyncRequest::GetChainTip => {
                let (height, head_hash) = self.local_chain_tip();
                SyncResponse::ChainTip { height, head_hash }
            }

            SyncRequest::GetBlocks { start, end } => {
                if start >= end {
                    return SyncResponse::Blocks(Vec::new());
                }
                let count = std::cmp::min(end - start, self.config.batch_size) as u32;
                match self.chain.blocks_from(start, count) {
                    Ok(blocks) => SyncResponse::Blocks(blocks),
                    Err(e) => SyncResponse::Error(format!("failed to read blocks [{start}, {end}): {e}")),
                }
            }

            SyncRequest::GetBlock { height } => match self.chain.block_at_height(height) {
                Ok(block) => SyncResponse::Block(block),
                Err(e) => SyncResponse::Error(format!("failed to read block at height {height}: {e}")),
            },
        }
    }

    /// Structural pre-check on a downloaded batch before committing resources
    /// to apply it: merkle root self-consistency, height contiguity, and
    /// parent-hash linkage. Does not touch chain state and does not replay
    /// transactions — `apply_blocks` does the real validation.
    pub fn validate_block_chain(&self, blocks: &[Block], expected_start: u64) -> Result<(), SyncError> {
        for (i, block) in blocks.iter().enumerate() {
            if !block.merkle_root_matches() {
                return Err(SyncError::InvalidBlock {
                    height: block.height(),
                    reason: "merkle root does not match transaction list".to_string(),
                });
            }

            let expected_height = expected_start + i as u64;
            if block.height() != expected_height {
                return Err(SyncError::ChainGap { expected: expected_height, got: block.height() });
            }

            if i > 0 {
                let prev = &blocks[i - 1];
                if block.header.previous_hash != prev.hash() {
                    return Err(SyncError::InvalidParentHash { height: block.height() });
                }
            }
        }
        Ok(())
    }

    /// Validates and applies a batch of blocks, in ascending height order,
    /// to local chain state via [`ChainEngine::ingest_block`]. Each block is
    /// independently re-validated (parent linkage, merkle root, signature,
    /// state root) and its transactions re-executed — this node derives its
    /// own state, it does not trust the peer's.
    ///
    /// Returns as soon as a block is rejected; blocks already applied before
    /// the failure remain committed (this is not a transactional rollback
    /// across the whole batch, only within a single block).
    pub fn apply_blocks(&self, blocks: Vec<Block>) -> Result<SyncResult, SyncError> {
        let mut blocks_applied = 0u64;
        let mut transactions_executed = 0u64;

        for block in blocks {
            transactions_executed += block.transactions.len() as u64;
            self.chain.ingest_block(block)?;
            blocks_applied += 1;
        }

        let (final_height, final_head_hash) = self.local_chain_tip();
        Ok(SyncResult { blocks_applied, transactions_executed, final_height, final_head_hash })
    }

    /// Whether the local node is behind a peer reporting `remote_height`.
    pub fn needs_sync(&self, remote_height: u64) -> bool {
        remote_height > self.chain.height()
    }

    /// Splits the gap between local and remote height into `[start, end)`
    /// download batches of `config.batch_size` blocks each.
    pub fn compute_sync_plan(&self, local_height: u64, remote_height: u64) -> Vec<(u64, u64)> {
        if local_height >= remote_height {
            return Vec::new();
        }

        let start = local_height + 1;
        let end = remote_height + 1;
        let batch = self.config.batch_size;

        let mut plan = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let batch_end = std::cmp::min(cursor + batch, end);
            plan.push((cursor, batch_end));
            cursor = batch_end;
        }
        plan
    }
}
