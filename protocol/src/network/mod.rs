//! # Network Module
//!
//! P2P networking layer for the podoru engine: the PoA authority schedule,
//! the transaction mempool, the raw-TCP gossip transport, block production,
//! chain sync, and the orchestrator that wires them into a running node.
//!
//! ## Architecture
//!
//! ```text
//! consensus.rs  — Fixed authority set + round-robin producer schedule
//! mempool.rs    — Nonce-ordered transaction pool with thread-safe access
//! gossip.rs     — Length-prefixed TCP transport for tx/block propagation
//! producer.rs   — Tick-driven block production loop for authority nodes
//! sync.rs        — Chain catch-up against a peer's reported height
//! node.rs       — The orchestrator: wires the above into one running node
//! ```
//!
//! ## Design Decisions
//!
//! - There is no leader election and no voting round: the authority set is
//!   fixed at genesis and `AuthoritySet::schedule` deterministically assigns
//!   each height to a producer. This is a permissioned PoA chain, not a BFT
//!   consensus engine — finality is immediate on block ingestion, not a
//!   separate quorum step.
//! - The mempool is protected by `parking_lot::RwLock` rather than `tokio::Mutex`
//!   because mempool reads vastly outnumber writes, and we want zero-cost
//!   reads on the hot path (block production).
//! - Gossip deduplication uses a bounded per-peer seen-message cache, keyed
//!   by transaction id / block hash, so the network doesn't re-broadcast a
//!   frame back to the peer that just sent it.

pub mod consensus;
pub mod gossip;
pub mod mempool;
pub mod node;
pub mod producer;
pub mod sync;

pub use consensus::{AuthoritySet, ConsensusConfig, ConsensusError, DEFAULT_BLOCK_TIME_SECS};
pub use gossip::{
    ChainQuery, GossipConfig, GossipError, GossipService, InboundEvent, NodeId, Tag,
    MAX_FRAME_SIZE, MAX_PEER_STRIKES, MAX_RANGE_BATCH,
};
pub use mempool::{Mempool, MempoolConfig, MempoolError};
pub use node::{ChainEvent, NodeError, PodoruNode};
pub use producer::{BlockSink, ProducerError, ProducerLoop};
pub use sync::{SyncConfig, SyncEngine, SyncError, SyncResult};
