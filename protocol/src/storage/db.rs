//! # Storage Adapter
//!
//! [`StorageAdapter`] is the persistence seam: everything above this trait
//! (chain engine, sync, mempool bootstrap) talks to storage only through it,
//! so tests run against an in-memory [`MemoryStore`] while production runs
//! against [`SledStore`].
//!
//! ## Tree layout
//!
//! Five named sled trees, matching the five namespaces a chain actually
//! needs:
//!
//! | Tree    | Key                      | Value                              |
//! |---------|--------------------------|-------------------------------------|
//! | `block` | block hash (32B)         | `bincode(Block)`                    |
//! | `height`| height (8B BE)           | block hash (32B)                    |
//! | `tx`    | transaction id (32B)     | `bincode((Transaction, block hash))`|
//! | `state` | UTF-8 key                | raw value bytes                     |
//! | `meta`  | `head`/`height`/`nonce:*`| raw bytes                            |
//!
//! Heights are stored big-endian so sled's lexicographic tree order matches
//! numeric order.
//!
//! ## Atomicity
//!
//! [`SledStore::put_block_atomic`] writes `block`, `height`, `tx`, `state`,
//! and `meta` inside a single `sled::Db::transaction` spanning all five
//! trees, so a crash mid-commit never leaves the height index pointing at a
//! block that isn't there, or state mutated without the block that caused
//! it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::storage::block::Block;
use crate::transaction::Transaction;

pub const TREE_BLOCK: &str = "block";
pub const TREE_HEIGHT: &str = "height";
pub const TREE_TX: &str = "tx";
pub const TREE_STATE: &str = "state";
pub const TREE_META: &str = "meta";

pub const META_HEAD: &[u8] = b"head";
pub const META_HEIGHT: &[u8] = b"height";

pub fn meta_nonce_key(address_hex: &str) -> Vec<u8> {
    format!("nonce:{address_hex}").into_bytes()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a [`StorageAdapter`] implementation.
///
/// `NotFound` is recoverable -- most callers treat it as `Option::None`.
/// `Fatal` means the on-disk store is no longer trustworthy; the chain
/// engine that sees this should stop applying blocks and shut down rather
/// than risk diverging from disk.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("fatal storage error: {0}")]
    Fatal(String),
}

impl From<sled::Error> for DbError {
    fn from(e: sled::Error) -> Self {
        DbError::Fatal(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// StorageAdapter
// ---------------------------------------------------------------------------

/// A single write in a [`StorageAdapter::batch`] call.
pub enum WriteOp {
    Put { tree: &'static str, key: Vec<u8>, value: Vec<u8> },
    Delete { tree: &'static str, key: Vec<u8> },
}

/// Storage seam between the chain engine and the on-disk (or in-memory)
/// key-value store. Every method takes a tree name rather than hardcoding
/// one, since the same trait backs all five namespaces.
pub trait StorageAdapter: Send + Sync {
    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DbError>;
    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<(), DbError>;
    fn delete(&self, tree: &str, key: &[u8]) -> Result<(), DbError>;

    /// Applies a list of writes. Implementations are not required to make
    /// this atomic across trees -- only [`Self::put_block_atomic`]
    /// provides that guarantee for the block-commit path.
    fn batch(&self, ops: Vec<WriteOp>) -> Result<(), DbError>;

    /// Returns up to `limit` `(key, value)` pairs in `tree` whose key starts
    /// with `prefix`, in key order.
    fn scan_prefix(&self, tree: &str, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError>;

    /// Commits a block and all of its side effects (state writes, nonce
    /// bumps, head/height pointers) as a single unit. `SledStore` backs
    /// this with a real cross-tree `sled` transaction; `MemoryStore` backs
    /// it with a single lock held for the whole call.
    fn put_block_atomic(&self, commit: BlockCommit) -> Result<(), DbError>;
}

// ---------------------------------------------------------------------------
// Block commit helpers (shared by SledStore and MemoryStore)
// ---------------------------------------------------------------------------

/// Bundles the five writes a committed block requires, so both storage
/// backends build the same shape before handing it to their respective
/// atomic-commit primitive.
pub struct BlockCommit {
    pub block: Block,
    /// `(key, value)` writes to apply to the `state` tree for this block.
    /// A `None` value means delete.
    pub state_writes: Vec<(String, Option<Vec<u8>>)>,
    /// `(address_hex, new_nonce)` pairs to persist to `meta`.
    pub nonce_writes: Vec<(String, u64)>,
}

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// Production [`StorageAdapter`] backed by an embedded `sled` database.
pub struct SledStore {
    db: sled::Db,
    block: sled::Tree,
    height: sled::Tree,
    tx: sled::Tree,
    state: sled::Tree,
    meta: sled::Tree,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    pub fn open_temporary() -> Result<Self, DbError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, DbError> {
        Ok(Self {
            block: db.open_tree(TREE_BLOCK)?,
            height: db.open_tree(TREE_HEIGHT)?,
            tx: db.open_tree(TREE_TX)?,
            state: db.open_tree(TREE_STATE)?,
            meta: db.open_tree(TREE_META)?,
            db,
        })
    }

    fn tree(&self, name: &str) -> Result<&sled::Tree, DbError> {
        match name {
            TREE_BLOCK => Ok(&self.block),
            TREE_HEIGHT => Ok(&self.height),
            TREE_TX => Ok(&self.tx),
            TREE_STATE => Ok(&self.state),
            TREE_META => Ok(&self.meta),
            other => Err(DbError::Fatal(format!("unknown tree: {other}"))),
        }
    }

    pub fn get_block_by_hash(&self, hash: &[u8; 32]) -> Result<Option<Block>, DbError> {
        match self.block.get(hash)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, DbError> {
        match self.height.get(height_key(height))? {
            Some(hash) => {
                let mut h = [0u8; 32];
                h.copy_from_slice(&hash);
                self.get_block_by_hash(&h)
            }
            None => Ok(None),
        }
    }

    pub fn get_transaction(&self, id: &[u8; 32]) -> Result<Option<(Transaction, [u8; 32])>, DbError> {
        match self.tx.get(id)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn head(&self) -> Result<Option<[u8; 32]>, DbError> {
        match self.meta.get(META_HEAD)? {
            Some(v) => {
                let mut h = [0u8; 32];
                h.copy_from_slice(&v);
                Ok(Some(h))
            }
            None => Ok(None),
        }
    }

    pub fn height_value(&self) -> Result<Option<u64>, DbError> {
        match self.meta.get(META_HEIGHT)? {
            Some(v) => Ok(Some(u64::from_be_bytes(
                v.as_ref().try_into().map_err(|_| DbError::Fatal("corrupt height meta entry".into()))?,
            ))),
            None => Ok(None),
        }
    }

    pub fn nonce(&self, address_hex: &str) -> Result<u64, DbError> {
        match self.meta.get(meta_nonce_key(address_hex))? {
            Some(v) => Ok(u64::from_be_bytes(
                v.as_ref().try_into().map_err(|_| DbError::Fatal("corrupt nonce meta entry".into()))?,
            )),
            None => Ok(0),
        }
    }

}

impl StorageAdapter for SledStore {
    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        Ok(self.tree(tree)?.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.tree(tree)?.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, tree: &str, key: &[u8]) -> Result<(), DbError> {
        self.tree(tree)?.remove(key)?;
        Ok(())
    }

    fn batch(&self, ops: Vec<WriteOp>) -> Result<(), DbError> {
        let mut batches: std::collections::HashMap<&'static str, sled::Batch> = std::collections::HashMap::new();
        for op in ops {
            match op {
                WriteOp::Put { tree, key, value } => {
                    batches.entry(tree).or_default().insert(key, value);
                }
                WriteOp::Delete { tree, key } => {
                    batches.entry(tree).or_default().remove(key);
                }
            }
        }
        for (tree, batch) in batches {
            self.tree(tree)?.apply_batch(batch)?;
        }
        Ok(())
    }

    fn scan_prefix(&self, tree: &str, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
        let mut out = Vec::new();
        for item in self.tree(tree)?.scan_prefix(prefix).take(limit) {
            let (k, v) = item?;
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }

    /// Commits a block and all of its side effects (state writes, nonce
    /// bumps, head/height pointers) in a single cross-tree transaction.
    ///
    /// This is the correctness-critical generalization beyond a per-tree
    /// batch: all five trees advance together or not at all.
    fn put_block_atomic(&self, commit: BlockCommit) -> Result<(), DbError> {
        let block_bytes = bincode::serialize(&commit.block)?;
        let hash = commit.block.hash();
        let height = commit.block.header.height;

        let mut tx_entries = Vec::with_capacity(commit.block.transactions.len());
        for t in &commit.block.transactions {
            tx_entries.push((t.id, bincode::serialize(&(t.clone(), hash))?));
        }

        let result = (&self.block, &self.height, &self.tx, &self.state, &self.meta).transaction(
            |(block_tx, height_tx, tx_tx, state_tx, meta_tx)| {
                block_tx.insert(&hash[..], block_bytes.clone())?;
                height_tx.insert(&height_key(height)[..], &hash[..])?;

                for (id, bytes) in &tx_entries {
                    tx_tx.insert(&id[..], bytes.clone())?;
                }

                for (key, value) in &commit.state_writes {
                    match value {
                        Some(v) => state_tx.insert(key.as_bytes(), v.clone())?,
                        None => state_tx.remove(key.as_bytes())?,
                    };
                }

                for (address_hex, nonce) in &commit.nonce_writes {
                    meta_tx.insert(meta_nonce_key(address_hex), &nonce.to_be_bytes()[..])?;
                }

                meta_tx.insert(META_HEAD, &hash[..])?;
                meta_tx.insert(META_HEIGHT, &height.to_be_bytes()[..])?;

                Ok(())
            },
        );

        result.map_err(|e: sled::transaction::TransactionError<()>| {
            DbError::Fatal(format!("block commit transaction failed: {e}"))
        })?;

        self.db.flush().map_err(DbError::from)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Test-only in-memory [`StorageAdapter`] backed by one `BTreeMap` per tree.
/// Never used in production -- `sled::Db::transaction` has no in-memory
/// substitute worth faking, so `MemoryStore` just takes a global lock for
/// writes, which is fine for single-process tests.
#[derive(Default)]
pub struct MemoryStore {
    trees: RwLock<std::collections::HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn known_tree(name: &str) -> Result<&'static str, DbError> {
        match name {
            TREE_BLOCK => Ok(TREE_BLOCK),
            TREE_HEIGHT => Ok(TREE_HEIGHT),
            TREE_TX => Ok(TREE_TX),
            TREE_STATE => Ok(TREE_STATE),
            TREE_META => Ok(TREE_META),
            other => Err(DbError::Fatal(format!("unknown tree: {other}"))),
        }
    }

}

impl StorageAdapter for MemoryStore {
    fn get(&self, tree: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let name = Self::known_tree(tree)?;
        Ok(self.trees.read().get(name).and_then(|t| t.get(key).cloned()))
    }

    fn put(&self, tree: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let name = Self::known_tree(tree)?;
        self.trees.write().entry(name).or_default().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, tree: &str, key: &[u8]) -> Result<(), DbError> {
        let name = Self::known_tree(tree)?;
        self.trees.write().entry(name).or_default().remove(key);
        Ok(())
    }

    fn batch(&self, ops: Vec<WriteOp>) -> Result<(), DbError> {
        let mut trees = self.trees.write();
        for op in ops {
            match op {
                WriteOp::Put { tree, key, value } => {
                    trees.entry(tree).or_default().insert(key, value);
                }
                WriteOp::Delete { tree, key } => {
                    trees.entry(tree).or_default().remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(&self, tree: &str, prefix: &[u8], limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
        let name = Self::known_tree(tree)?;
        let trees = self.trees.read();
        let Some(t) = trees.get(name) else { return Ok(Vec::new()) };
        Ok(t.range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn put_block_atomic(&self, commit: BlockCommit) -> Result<(), DbError> {
        let hash = commit.block.hash();
        let height = commit.block.header.height;
        let block_bytes = bincode::serialize(&commit.block)?;

        let mut trees = self.trees.write();

        trees.entry(TREE_BLOCK).or_default().insert(hash.to_vec(), block_bytes);
        trees.entry(TREE_HEIGHT).or_default().insert(height_key(height).to_vec(), hash.to_vec());

        for t in &commit.block.transactions {
            let bytes = bincode::serialize(&(t.clone(), hash))?;
            trees.entry(TREE_TX).or_default().insert(t.id.to_vec(), bytes);
        }

        let state_tree = trees.entry(TREE_STATE).or_default();
        for (key, value) in &commit.state_writes {
            match value {
                Some(v) => {
                    state_tree.insert(key.clone().into_bytes(), v.clone());
                }
                None => {
                    state_tree.remove(key.as_bytes());
                }
            }
        }

        let meta_tree = trees.entry(TREE_META).or_default();
        for (address_hex, nonce) in &commit.nonce_writes {
            meta_tree.insert(meta_nonce_key(address_hex), nonce.to_be_bytes().to_vec());
        }
        meta_tree.insert(META_HEAD.to_vec(), hash.to_vec());
        meta_tree.insert(META_HEIGHT.to_vec(), height.to_be_bytes().to_vec());

        Ok(())
    }
}

/// Thread-safe handle shared across the chain engine, sync, and gossip
/// layers. Both backends implement [`StorageAdapter`], so call sites
/// generic over `S: StorageAdapter` don't care which is behind the `Arc`.
pub type SharedStore<S> = Arc<S>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PodoruKeypair;

    fn genesis_commit() -> BlockCommit {
        let authorities = vec![[1u8; 20]];
        let block = Block::genesis(0, &authorities, [0u8; 32]);
        BlockCommit { block, state_writes: vec![], nonce_writes: vec![] }
    }

    #[test]
    fn memory_store_put_get_roundtrip() {
        let store = MemoryStore::new();
        store.put(TREE_STATE, b"k", b"v").unwrap();
        assert_eq!(store.get(TREE_STATE, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn memory_store_delete_removes_key() {
        let store = MemoryStore::new();
        store.put(TREE_STATE, b"k", b"v").unwrap();
        store.delete(TREE_STATE, b"k").unwrap();
        assert_eq!(store.get(TREE_STATE, b"k").unwrap(), None);
    }

    #[test]
    fn memory_store_scan_prefix() {
        let store = MemoryStore::new();
        store.put(TREE_STATE, b"user:1", b"a").unwrap();
        store.put(TREE_STATE, b"user:2", b"b").unwrap();
        store.put(TREE_STATE, b"other", b"c").unwrap();

        let results = store.scan_prefix(TREE_STATE, b"user:", 10).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn memory_store_scan_prefix_respects_limit() {
        let store = MemoryStore::new();
        for i in 0..5u8 {
            store.put(TREE_STATE, &[b'k', i], b"v").unwrap();
        }
        let results = store.scan_prefix(TREE_STATE, b"k", 2).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn memory_store_put_block_atomic_sets_head_and_height() {
        let store = MemoryStore::new();
        store.put_block_atomic(genesis_commit()).unwrap();

        let head = store.get(TREE_META, META_HEAD).unwrap().unwrap();
        assert_eq!(head.len(), 32);
        let height = store.get(TREE_META, META_HEIGHT).unwrap().unwrap();
        assert_eq!(u64::from_be_bytes(height.try_into().unwrap()), 0);
    }

    #[test]
    fn memory_store_put_block_atomic_writes_state() {
        let store = MemoryStore::new();
        let authorities = vec![[1u8; 20]];
        let block = Block::genesis(0, &authorities, [0u8; 32]);
        let commit = BlockCommit {
            block,
            state_writes: vec![("greeting".to_string(), Some(b"hi".to_vec()))],
            nonce_writes: vec![],
        };
        store.put_block_atomic(commit).unwrap();
        assert_eq!(store.get(TREE_STATE, b"greeting").unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn memory_store_nonce_write_persists() {
        let store = MemoryStore::new();
        let mut commit = genesis_commit();
        commit.nonce_writes.push(("aabb".to_string(), 3));
        store.put_block_atomic(commit).unwrap();

        let key = meta_nonce_key("aabb");
        let value = store.get(TREE_META, &key).unwrap().unwrap();
        assert_eq!(u64::from_be_bytes(value.try_into().unwrap()), 3);
    }

    #[test]
    fn sled_store_open_temporary_roundtrip() {
        let store = SledStore::open_temporary().expect("open temp sled");
        store.put(TREE_STATE, b"k", b"v").unwrap();
        assert_eq!(store.get(TREE_STATE, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn sled_store_put_block_atomic_cross_tree() {
        let store = SledStore::open_temporary().expect("open temp sled");
        let kp = PodoruKeypair::generate();
        let authorities = vec![kp.address()];
        let block = Block::genesis(0, &authorities, [0u8; 32]);
        let hash = block.hash();

        let commit = BlockCommit {
            block,
            state_writes: vec![("k".to_string(), Some(b"v".to_vec()))],
            nonce_writes: vec![],
        };
        store.put_block_atomic(commit).unwrap();

        assert_eq!(store.head().unwrap(), Some(hash));
        assert_eq!(store.height_value().unwrap(), Some(0));
        assert!(store.get_block_by_hash(&hash).unwrap().is_some());
        assert!(store.get_block_by_height(0).unwrap().is_some());
        assert_eq!(store.get(TREE_STATE, b"k").unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn sled_store_nonce_defaults_to_zero() {
        let store = SledStore::open_temporary().expect("open temp sled");
        assert_eq!(store.nonce("deadbeef").unwrap(), 0);
    }

    #[test]
    fn unknown_tree_is_fatal_error() {
        let store = MemoryStore::new();
        let result = store.get("bogus", b"k");
        assert!(matches!(result, Err(DbError::Fatal(_))));
    }
}
