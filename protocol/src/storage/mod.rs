//! # Storage Module
//!
//! Persistent storage for the podoru chain. This module provides the block
//! structure, the chain state machine, and the persistence layer that make
//! podoru a real chain, not just a fancy calculator.
//!
//! ## Architecture
//!
//! ```text
//! block.rs  — Block structure, genesis block, hash/merkle operations
//! chain.rs  — ChainEngine: head tracking, state cache, nonce counters
//! db.rs     — StorageAdapter trait + SledStore/MemoryStore backends
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! Transaction → ChainEngine::build_block → Block → ChainEngine::ingest_block
//!                                                          ↓
//!                                                 StorageAdapter::put_block_atomic
//! ```
//!
//! `ChainEngine` holds the canonical in-memory state cache and nonce map,
//! rebuilding them from the `state`/`meta` trees on startup. Every
//! committed block is written atomically across all five trees so a crash
//! mid-commit can never leave the head pointer ahead of the state it
//! describes.
//!
//! ## Design Decisions
//!
//! 1. **Keccak-256 for everything.** Block hashes, transaction ids, Merkle
//!    roots, state roots — all Keccak-256, matching the secp256k1/Ethereum-
//!    style address scheme used for signing.
//!
//! 2. **Five named trees in sled, not column families.** `block`, `height`,
//!    `tx`, `state`, `meta`. `sled::Db::transaction` gives us atomicity
//!    across all five without a separate WAL.
//!
//! 3. **Bincode for on-disk serialization.** Compact, fast, deterministic.
//!    YAML is for config, JSON is for the HTTP surface; bincode is for
//!    storage.

pub mod block;
pub mod chain;
pub mod db;

pub use block::{Block, BlockHeader, BLOCK_VERSION};
pub use chain::{ChainEngine, ChainError};
pub use db::{BlockCommit, DbError, MemoryStore, SharedStore, SledStore, StorageAdapter, WriteOp};
