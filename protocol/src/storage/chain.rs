//! # Chain Engine
//!
//! [`ChainEngine`] owns the authoritative view of chain state: the current
//! head, the flat key-value store, and per-sender nonce counters. It is
//! generic over [`StorageAdapter`] so the same logic runs against
//! [`super::db::SledStore`] in production and [`super::db::MemoryStore`] in
//! tests.
//!
//! Three operations matter:
//!
//! - [`ChainEngine::submit_transaction`] — admission-time check, used by the
//!   mempool before a transaction is queued.
//! - [`ChainEngine::build_block`] — applies a transaction list to a scratch
//!   copy of state and returns an unsigned candidate block.
//! - [`ChainEngine::ingest_block`] — validates and commits a block (either
//!   self-produced and now signed, or received from a peer), persisting it
//!   atomically and advancing the head.
//!
//! Unlike a speculative-execution model that drops failing transactions at
//! block-production time, every transaction here has already passed
//! [`verify_transaction`] and nonce admission before it reaches a block —
//! so applying a block's transactions is infallible in the ordinary case,
//! and any failure during `ingest_block` means the block itself is invalid.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use thiserror::Error;

use crate::crypto::keys::{address_from_hex, address_to_hex, Address, Signature};
use crate::crypto::signatures::{recover_address, SignatureError};
use crate::crypto::state_root;
use crate::storage::block::{Block, BlockHeader};
use crate::storage::db::{BlockCommit, DbError, StorageAdapter, TREE_BLOCK, TREE_HEIGHT, TREE_META, TREE_STATE};
use crate::transaction::{verify_transaction, Operation, Transaction, TransactionError};

/// Maximum number of out-of-order blocks buffered while waiting for a gap
/// in the chain to be filled by sync or gossip.
pub const PENDING_BUFFER_CAPACITY: usize = 128;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transaction failed verification: {0}")]
    InvalidTransaction(#[from] TransactionError),

    #[error("nonce mismatch for sender: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("block does not extend the current head: expected parent {expected}, got {got}")]
    WrongParent { expected: String, got: String },

    #[error("unexpected block height: expected {expected}, got {got}")]
    WrongHeight { expected: u64, got: u64 },

    #[error("block transaction merkle root does not match its transaction list")]
    MerkleMismatch,

    #[error("block state root does not match the state produced by applying its transactions")]
    StateRootMismatch,

    #[error("block signature does not recover to its claimed producer: {0}")]
    InvalidBlockSignature(#[from] SignatureError),

    #[error("block producer {got:?} does not match scheduled producer {expected:?} for height {height}")]
    WrongProducer { height: u64, expected: Option<Address>, got: Address },

    #[error("block timestamp {got} is not >= parent timestamp {expected}")]
    NonMonotonicTimestamp { expected: i64, got: i64 },

    #[error("pending block buffer is full ({0} entries); dropping out-of-order block")]
    PendingBufferFull(usize),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),
}

// ---------------------------------------------------------------------------
// ChainEngine
// ---------------------------------------------------------------------------

struct ChainState {
    height: u64,
    head_header: BlockHeader,
    /// Flat key-value chain state, kept sorted so `state_root` can be
    /// recomputed directly from this map's iteration order.
    cache: BTreeMap<String, Vec<u8>>,
    nonces: HashMap<Address, u64>,
    /// Blocks received out of order (height > current + 1), keyed by
    /// height, waiting for the gap to close.
    pending: BTreeMap<u64, Block>,
}

/// The authoritative chain state machine: head, flat key-value store, and
/// nonce counters, backed by a [`StorageAdapter`].
pub struct ChainEngine<S: StorageAdapter> {
    store: std::sync::Arc<S>,
    authorities: Vec<Address>,
    genesis_hash: [u8; 32],
    inner: RwLock<ChainState>,
}

impl<S: StorageAdapter> ChainEngine<S> {
    /// Opens (or initializes) a chain against `store` with an empty genesis
    /// state. Convenience wrapper around [`Self::open_with_genesis_state`]
    /// for callers (tests, dev tooling) that don't seed any initial state.
    pub fn open(store: std::sync::Arc<S>, authorities: Vec<Address>, genesis_timestamp: i64) -> Result<Self, ChainError> {
        Self::open_with_genesis_state(store, authorities, genesis_timestamp, Vec::new())
    }

    /// Opens (or initializes) a chain against `store`. If the store already
    /// has a head, state is rebuilt from the `state`/`meta` trees and
    /// `initial_state` is ignored. Otherwise a genesis block is constructed
    /// seeded with `initial_state` (the genesis file's `initial_state` map)
    /// and committed.
    pub fn open_with_genesis_state(
        store: std::sync::Arc<S>,
        authorities: Vec<Address>,
        genesis_timestamp: i64,
        initial_state: Vec<(String, Vec<u8>)>,
    ) -> Result<Self, ChainError> {
        let existing_head = store.get(TREE_META, crate::storage::db::META_HEAD)?;

        if let Some(head_bytes) = existing_head {
            let mut head_hash = [0u8; 32];
            head_hash.copy_from_slice(&head_bytes);
            let height_bytes = store
                .get(TREE_META, crate::storage::db::META_HEIGHT)?
                .ok_or_else(|| DbError::Fatal("head present but height missing".into()))?;
            let height = u64::from_be_bytes(
                height_bytes.try_into().map_err(|_| DbError::Fatal("corrupt height meta entry".into()))?,
            );

            let block_bytes = store
                .get(crate::storage::db::TREE_BLOCK, &head_hash)?
                .ok_or_else(|| DbError::Fatal("head hash has no corresponding block".into()))?;
            let head_block: Block = bincode::deserialize(&block_bytes)?;

            let mut cache = BTreeMap::new();
            for (k, v) in store.scan_prefix(TREE_STATE, b"", usize::MAX)? {
                let key = String::from_utf8(k).map_err(|_| DbError::Fatal("non-utf8 state key".into()))?;
                cache.insert(key, v);
            }

            let mut nonces = HashMap::new();
            for (k, v) in store.scan_prefix(TREE_META, b"nonce:", usize::MAX)? {
                let key = String::from_utf8(k).map_err(|_| DbError::Fatal("non-utf8 nonce key".into()))?;
                let hex_part = key.strip_prefix("nonce:").unwrap_or(&key);
                let address = address_from_hex(hex_part).map_err(|_| DbError::Fatal("corrupt nonce key".into()))?;
                let nonce = u64::from_be_bytes(v.try_into().map_err(|_| DbError::Fatal("corrupt nonce value".into()))?);
                nonces.insert(address, nonce);
            }

            // Genesis is special-cased here too in case `authorities` was
            // recomputed from config rather than persisted state.
            let _ = genesis_timestamp;

            Ok(Self {
                store,
                genesis_hash: if height == 0 { head_hash } else { head_hash },
                authorities,
                inner: RwLock::new(ChainState { height, head_header: head_block.header, cache, nonces, pending: BTreeMap::new() }),
            })
        } else {
            let cache: BTreeMap<String, Vec<u8>> = initial_state.into_iter().collect();
            let root = state_root(cache.iter().map(|(k, v)| (k.as_str(), v.as_slice())));
            let genesis = Block::genesis(genesis_timestamp, &authorities, root);
            let genesis_hash = genesis.hash();

            let state_writes = cache.iter().map(|(k, v)| (k.clone(), Some(v.clone()))).collect();
            store.put_block_atomic(BlockCommit { block: genesis.clone(), state_writes, nonce_writes: vec![] })?;

            Ok(Self {
                store,
                genesis_hash,
                authorities,
                inner: RwLock::new(ChainState {
                    height: 0,
                    head_header: genesis.header,
                    cache,
                    nonces: HashMap::new(),
                    pending: BTreeMap::new(),
                }),
            })
        }
    }

    pub fn authorities(&self) -> &[Address] {
        &self.authorities
    }

    /// The round-robin schedule `A[height mod n]`, mirroring
    /// [`crate::network::consensus::AuthoritySet::schedule`].
    fn scheduled_producer(&self, height: u64) -> Option<Address> {
        if self.authorities.is_empty() {
            return None;
        }
        Some(self.authorities[(height as usize) % self.authorities.len()])
    }

    pub fn genesis_hash(&self) -> [u8; 32] {
        self.genesis_hash
    }

    pub fn height(&self) -> u64 {
        self.inner.read().height
    }

    pub fn head_hash(&self) -> [u8; 32] {
        self.inner.read().head_header.hash()
    }

    pub fn head_header(&self) -> BlockHeader {
        self.inner.read().head_header.clone()
    }

    pub fn pending_buffer_len(&self) -> usize {
        self.inner.read().pending.len()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.read().cache.get(key).cloned()
    }

    pub fn scan_prefix(&self, prefix: &str, limit: usize) -> Vec<(String, Vec<u8>)> {
        self.inner
            .read()
            .cache
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn nonce_of(&self, address: &Address) -> u64 {
        *self.inner.read().nonces.get(address).unwrap_or(&0)
    }

    /// Looks up the committed block at `height`, if any.
    pub fn block_at_height(&self, height: u64) -> Result<Option<Block>, ChainError> {
        let Some(hash_bytes) = self.store.get(TREE_HEIGHT, &height.to_be_bytes())? else {
            return Ok(None);
        };
        let Some(block_bytes) = self.store.get(TREE_BLOCK, &hash_bytes)? else {
            return Ok(None);
        };
        let block: Block = bincode::deserialize(&block_bytes).map_err(DbError::from)?;
        Ok(Some(block))
    }

    /// Returns up to `count` committed blocks starting at `from_height`,
    /// stopping early if the chain's head is reached first.
    pub fn blocks_from(&self, from_height: u64, count: u32) -> Result<Vec<Block>, ChainError> {
        let mut blocks = Vec::new();
        for height in from_height..from_height.saturating_add(count as u64) {
            match self.block_at_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// Admission-time check: structural/signature verification plus
    /// strict `nonce == current counter`. Does not mutate any state — the
    /// caller (mempool) owns actually queuing the transaction.
    pub fn submit_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        verify_transaction(tx)?;
        let expected = self.nonce_of(&tx.from);
        if tx.nonce != expected {
            return Err(ChainError::NonceMismatch { expected, got: tx.nonce });
        }
        Ok(())
    }

    /// Applies `transactions` to a scratch copy of current state and
    /// returns an unsigned candidate block extending the current head.
    /// The caller signs the returned block before gossiping or ingesting
    /// it.
    pub fn build_block(&self, producer_addr: Address, transactions: Vec<Transaction>, timestamp: i64) -> Result<Block, ChainError> {
        let guard = self.inner.read();
        let mut scratch_cache = guard.cache.clone();
        let mut scratch_nonces = guard.nonces.clone();
        let parent_header = guard.head_header.clone();
        drop(guard);

        apply_transactions(&mut scratch_cache, &mut scratch_nonces, &transactions)?;
        let root = compute_state_root(&scratch_cache);

        Ok(Block::new_candidate(&parent_header, transactions, producer_addr, timestamp, root))
    }

    /// Validates `block` against the current head and, if it extends the
    /// head directly, applies and commits it atomically. Blocks that
    /// arrive ahead of the current height are buffered (capped at
    /// [`PENDING_BUFFER_CAPACITY`]) and drained automatically once the gap
    /// closes.
    pub fn ingest_block(&self, block: Block) -> Result<(), ChainError> {
        let current_height = self.height();

        if block.header.height <= current_height {
            // Already applied (or stale); nothing to do.
            return Ok(());
        }

        if block.header.height > current_height + 1 {
            let mut guard = self.inner.write();
            if !guard.pending.contains_key(&block.header.height) && guard.pending.len() >= PENDING_BUFFER_CAPACITY {
                return Err(ChainError::PendingBufferFull(PENDING_BUFFER_CAPACITY));
            }
            guard.pending.insert(block.header.height, block);
            return Ok(());
        }

        self.apply_and_commit(block)?;

        // Drain any buffered blocks that are now contiguous.
        loop {
            let next_height = self.height() + 1;
            let maybe_next = {
                let mut guard = self.inner.write();
                guard.pending.remove(&next_height)
            };
            match maybe_next {
                Some(next_block) => self.apply_and_commit(next_block)?,
                None => break,
            }
        }

        Ok(())
    }

    fn apply_and_commit(&self, block: Block) -> Result<(), ChainError> {
        let (parent_hash, parent_timestamp, expected_height, mut scratch_cache, mut scratch_nonces) = {
            let guard = self.inner.read();
            (guard.head_header.hash(), guard.head_header.timestamp, guard.height + 1, guard.cache.clone(), guard.nonces.clone())
        };

        if block.header.previous_hash != parent_hash {
            return Err(ChainError::WrongParent {
                expected: hex::encode(parent_hash),
                got: hex::encode(block.header.previous_hash),
            });
        }
        if block.header.height != expected_height {
            return Err(ChainError::WrongHeight { expected: expected_height, got: block.header.height });
        }
        if block.header.timestamp < parent_timestamp {
            return Err(ChainError::NonMonotonicTimestamp { expected: parent_timestamp, got: block.header.timestamp });
        }
        if !block.merkle_root_matches() {
            return Err(ChainError::MerkleMismatch);
        }
        if !block.is_genesis() {
            let expected_producer = self.scheduled_producer(block.header.height);
            if expected_producer != Some(block.header.producer_addr) {
                return Err(ChainError::WrongProducer {
                    height: block.header.height,
                    expected: expected_producer,
                    got: block.header.producer_addr,
                });
            }
            let recovered = recover_address(&Signature::from_bytes(block.signature), &block.hash())?;
            if recovered != block.header.producer_addr {
                return Err(ChainError::InvalidBlockSignature(SignatureError::VerificationFailed));
            }
        }

        let touched = apply_transactions(&mut scratch_cache, &mut scratch_nonces, &block.transactions)?;
        let root = compute_state_root(&scratch_cache);
        if root != block.header.state_root {
            return Err(ChainError::StateRootMismatch);
        }

        let nonce_writes: Vec<(String, u64)> = touched
            .iter()
            .map(|addr| (address_to_hex(addr), *scratch_nonces.get(addr).unwrap_or(&0)))
            .collect();
        let state_writes: Vec<(String, Option<Vec<u8>>)> = block
            .transactions
            .iter()
            .flat_map(|tx| tx.operations.iter())
            .map(|op| match op {
                Operation::Set { key, value } => (key.clone(), Some(value.clone())),
                Operation::Delete { key } => (key.clone(), None),
            })
            .collect();

        self.store.put_block_atomic(BlockCommit { block: block.clone(), state_writes, nonce_writes })?;

        let mut guard = self.inner.write();
        guard.height = block.header.height;
        guard.head_header = block.header;
        guard.cache = scratch_cache;
        guard.nonces = scratch_nonces;

        Ok(())
    }
}

/// Applies `transactions` to `cache`/`nonces` in place, re-verifying each
/// one and enforcing strict nonce ordering. Returns the set of distinct
/// senders touched, for computing nonce writes.
fn apply_transactions(
    cache: &mut BTreeMap<String, Vec<u8>>,
    nonces: &mut HashMap<Address, u64>,
    transactions: &[Transaction],
) -> Result<Vec<Address>, ChainError> {
    let mut touched = Vec::new();
    for tx in transactions {
        verify_transaction(tx)?;
        let expected = *nonces.get(&tx.from).unwrap_or(&0);
        if tx.nonce != expected {
            return Err(ChainError::NonceMismatch { expected, got: tx.nonce });
        }

        for op in &tx.operations {
            match op {
                Operation::Set { key, value } => {
                    cache.insert(key.clone(), value.clone());
                }
                Operation::Delete { key } => {
                    cache.remove(key);
                }
            }
        }

        nonces.insert(tx.from, tx.nonce + 1);
        if !touched.contains(&tx.from) {
            touched.push(tx.from);
        }
    }
    Ok(touched)
}

fn compute_state_root(cache: &BTreeMap<String, Vec<u8>>) -> [u8; 32] {
    state_root(cache.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
