//! # P2P Gossip Layer
//!
//! Raw-TCP transport connecting podoru nodes. Each connection carries
//! length-prefixed frames: a 4-byte big-endian payload length, a 1-byte
//! message tag, then the payload. Frames over [`MAX_FRAME_SIZE`] close the
//! connection — this bounds memory use against a malicious or broken peer.
//!
//! ## Handshake
//!
//! Immediately after TCP accept/connect, both sides send [`Tag::Hello`].
//! If genesis hashes differ, the connection is dropped — the two nodes
//! are simply not on the same chain. Duplicate node ids are rejected to
//! prevent a node from connecting to itself via a loopback route.
//!
//! ## Broadcast and dedup
//!
//! New transactions/blocks are enqueued to every connected peer's bounded
//! outbound queue (256 frames). A full queue drops its oldest frame and
//! logs — a slow peer should not stall the rest of the mesh. Each peer
//! connection keeps a small LRU of recently seen transaction ids and block
//! hashes (1024 entries) so the network doesn't re-broadcast frames back
//! to the peer that just sent them.
//!
//! ## Bootstrap
//!
//! On startup, each configured bootstrap peer is dialed; on failure, the
//! dialer retries with exponential backoff (1s, 2s, 4s, capped at 60s).
//! Incoming connections beyond `max_peers` are accepted only if the new
//! peer's id is lexicographically smaller than an existing peer's id, in
//! which case the existing (larger-id) peer is evicted.
//!
//! ## Reputation
//!
//! The transport itself has no opinion on whether a gossiped transaction or
//! block is valid — it only frames and deserializes. Callers with that
//! context (mempool admission, block validation) report failures back via
//! [`GossipService::report_invalid`]; after [`MAX_PEER_STRIKES`] the peer is
//! disconnected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::storage::db::StorageAdapter;
use crate::storage::{Block, ChainEngine};
use crate::transaction::Transaction;

pub const PROTOCOL_VERSION: u16 = 1;
pub const MAX_FRAME_SIZE: u32 = 5 * 1024 * 1024;
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const PEER_DEDUP_CAPACITY: usize = 1024;
pub const MAX_RANGE_BATCH: u32 = 128;

pub type NodeId = [u8; 16];

// ---------------------------------------------------------------------------
// Wire tags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Hello = 0x01,
    /// Carries both directions of a liveness probe; sender and receiver
    /// agree on meaning purely from who initiated.
    Ping = 0x02,
    Tx = 0x03,
    Block = 0x04,
    HeightReq = 0x05,
    HeightRes = 0x06,
    RangeReq = 0x07,
    RangeRes = 0x08,
}

impl Tag {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::Hello),
            0x02 => Some(Tag::Ping),
            0x03 => Some(Tag::Tx),
            0x04 => Some(Tag::Block),
            0x05 => Some(Tag::HeightReq),
            0x06 => Some(Tag::HeightRes),
            0x07 => Some(Tag::RangeReq),
            0x08 => Some(Tag::RangeRes),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloPayload {
    node_id: NodeId,
    version: u16,
    height: u64,
    genesis_hash: [u8; 32],
}

#[derive(Debug, Serialize, Deserialize)]
struct PingPongPayload {
    nonce: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeightResPayload {
    height: u64,
    head_hash: [u8; 32],
}

#[derive(Debug, Serialize, Deserialize)]
struct RangeReqPayload {
    from_height: u64,
    count: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct RangeResPayload {
    blocks: Vec<Block>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame exceeds max size: {0} bytes")]
    FrameTooLarge(u32),

    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("genesis hash mismatch, peer is on a different chain")]
    GenesisMismatch,

    #[error("duplicate node id, already connected to this peer")]
    DuplicatePeer,
}

// ---------------------------------------------------------------------------
// Frame I/O
// ---------------------------------------------------------------------------

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, tag: u8, payload: &[u8]) -> Result<(), GossipError> {
    if payload.len() as u64 > MAX_FRAME_SIZE as u64 {
        return Err(GossipError::FrameTooLarge(payload.len() as u32));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_u8(tag).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<(u8, Vec<u8>), GossipError> {
    let len = reader.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        return Err(GossipError::FrameTooLarge(len));
    }
    let tag = reader.read_u8().await?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok((tag, payload))
}

// ---------------------------------------------------------------------------
// ChainQuery — the read-only slice of chain state the gossip layer needs
// ---------------------------------------------------------------------------

/// Decouples the transport layer from the concrete [`crate::storage::ChainEngine`]
/// generic parameter. Implemented by `ChainEngine<S>` for any `S`.
pub trait ChainQuery: Send + Sync {
    fn genesis_hash(&self) -> [u8; 32];
    fn height_and_head(&self) -> (u64, [u8; 32]);
    fn blocks_from(&self, from_height: u64, count: u32) -> Vec<Block>;
}

impl<S: StorageAdapter + 'static> ChainQuery for ChainEngine<S> {
    fn genesis_hash(&self) -> [u8; 32] {
        ChainEngine::genesis_hash(self)
    }

    fn height_and_head(&self) -> (u64, [u8; 32]) {
        (self.height(), self.head_hash())
    }

    fn blocks_from(&self, from_height: u64, count: u32) -> Vec<Block> {
        match ChainEngine::blocks_from(self, from_height, count) {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(error = %e, "blocks_from query failed");
                Vec::new()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound events
// ---------------------------------------------------------------------------

/// Events handed to the node orchestrator for anything that needs write
/// access to chain state or the mempool. The gossip layer itself never
/// touches them directly.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Transaction { from_peer: NodeId, transaction: Transaction },
    Block { from_peer: NodeId, block: Block },
    /// A peer's reported height/head, in answer to our `HEIGHT_REQ`. Drives
    /// the sync phase's "target = max(peer_heights)" step.
    HeightAnnounce { from_peer: NodeId, height: u64, head_hash: [u8; 32] },
    /// A batch of blocks answering one of our `RANGE_REQ`s.
    RangeResponse { from_peer: NodeId, blocks: Vec<Block> },
}

// ---------------------------------------------------------------------------
// Peer handle
// ---------------------------------------------------------------------------

/// Strikes before a peer sending invalid gossip content is disconnected.
pub const MAX_PEER_STRIKES: u8 = 3;

struct PeerHandle {
    id: NodeId,
    addr: SocketAddr,
    outbound: mpsc::Sender<(u8, Vec<u8>)>,
    seen_tx: Mutex<LruCache<[u8; 32], ()>>,
    seen_block: Mutex<LruCache<[u8; 32], ()>>,
    strikes: std::sync::atomic::AtomicU8,
    disconnect_requested: std::sync::atomic::AtomicBool,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub listen_addr: SocketAddr,
    pub bootstrap_peers: Vec<SocketAddr>,
    pub max_peers: usize,
    pub node_id: NodeId,
}

// ---------------------------------------------------------------------------
// GossipService
// ---------------------------------------------------------------------------

/// Owns the listening socket and the set of active peer connections.
/// `Q` gives the service read-only access to chain height/head/block-range
/// queries without depending on a concrete storage backend.
pub struct GossipService<Q: ChainQuery + 'static> {
    config: GossipConfig,
    chain: Arc<Q>,
    peers: Arc<Mutex<HashMap<NodeId, Arc<PeerHandle>>>>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
}

impl<Q: ChainQuery + 'static> GossipService<Q> {
    pub fn new(config: GossipConfig, chain: Arc<Q>) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (Self { config, chain, peers: Arc::new(Mutex::new(HashMap::new())), inbound_tx }, inbound_rx)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn peer_ids(&self) -> Vec<NodeId> {
        self.peers.lock().keys().copied().collect()
    }

    /// Binds the listener and spawns the accept loop. Returns immediately;
    /// the accept loop runs until the returned task is aborted or the
    /// listener errors.
    pub async fn listen(self: &Arc<Self>) -> Result<tokio::task::JoinHandle<()>, GossipError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let this = Arc::clone(&this);
                        tokio::spawn(async move {
                            if let Err(e) = this.accept_connection(stream, addr).await {
                                debug!(peer = %addr, error = %e, "inbound connection closed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }))
    }

    /// Dials every configured bootstrap peer, retrying with exponential
    /// backoff (1s, 2s, 4s, ... capped at 60s) on failure.
    pub fn dial_bootstrap_peers(self: &Arc<Self>) {
        for addr in self.config.bootstrap_peers.clone() {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let mut backoff = Duration::from_secs(1);
                loop {
                    match TcpStream::connect(addr).await {
                        Ok(stream) => {
                            if let Err(e) = this.accept_connection(stream, addr).await {
                                debug!(peer = %addr, error = %e, "outbound connection closed");
                            }
                            return;
                        }
                        Err(e) => {
                            warn!(peer = %addr, error = %e, backoff_secs = backoff.as_secs(), "dial failed, retrying");
                            tokio::time::sleep(backoff).await;
                            backoff = std::cmp::min(backoff * 2, Duration::from_secs(60));
                        }
                    }
                }
            });
        }
    }

    async fn accept_connection(self: &Arc<Self>, mut stream: TcpStream, addr: SocketAddr) -> Result<(), GossipError> {
        let (height, head_hash) = self.chain.height_and_head();
        let hello = HelloPayload {
            node_id: self.config.node_id,
            version: PROTOCOL_VERSION,
            height,
            genesis_hash: self.chain.genesis_hash(),
        };
        write_frame(&mut stream, Tag::Hello as u8, &bincode::serialize(&hello)?).await?;

        let (tag, payload) = read_frame(&mut stream).await?;
        if Tag::from_byte(tag) != Some(Tag::Hello) {
            return Err(GossipError::UnknownTag(tag));
        }
        let peer_hello: HelloPayload = bincode::deserialize(&payload)?;

        if peer_hello.genesis_hash != self.chain.genesis_hash() {
            return Err(GossipError::GenesisMismatch);
        }
        if peer_hello.node_id == self.config.node_id {
            return Err(GossipError::DuplicatePeer);
        }

        let accepted = self.register_peer(peer_hello.node_id, addr);
        if !accepted {
            return Err(GossipError::DuplicatePeer);
        }

        let (mut read_half, mut write_half) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<(u8, Vec<u8>)>(OUTBOUND_QUEUE_CAPACITY);
        let handle = Arc::new(PeerHandle {
            id: peer_hello.node_id,
            addr,
            outbound: outbound_tx,
            seen_tx: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(PEER_DEDUP_CAPACITY).unwrap())),
            seen_block: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(PEER_DEDUP_CAPACITY).unwrap())),
            strikes: std::sync::atomic::AtomicU8::new(0),
            disconnect_requested: std::sync::atomic::AtomicBool::new(false),
        });
        self.peers.lock().insert(handle.id, Arc::clone(&handle));
        info!(peer = %addr, "peer connected");

        let writer_task = tokio::spawn(async move {
            while let Some((tag, payload)) = outbound_rx.recv().await {
                if write_frame(&mut write_half, tag, &payload).await.is_err() {
                    break;
                }
            }
        });

        let this = Arc::clone(self);
        let result = loop {
            if handle.disconnect_requested.load(std::sync::atomic::Ordering::SeqCst) {
                break Ok(());
            }
            match read_frame(&mut read_half).await {
                Ok((tag, payload)) => {
                    if let Err(e) = this.dispatch(&handle, tag, payload).await {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.peers.lock().remove(&handle.id);
        writer_task.abort();
        info!(peer = %addr, "peer disconnected");
        result
    }

    /// Registers a newly handshaken peer, enforcing `max_peers` via the
    /// lexicographic-id eviction rule: beyond capacity, only a peer whose
    /// id is smaller than some existing peer's id is accepted, evicting
    /// the larger one.
    fn register_peer(&self, id: NodeId, _addr: SocketAddr) -> bool {
        let mut peers = self.peers.lock();
        if peers.contains_key(&id) {
            return false;
        }
        if peers.len() < self.config.max_peers {
            return true;
        }
        let evictable = peers.keys().copied().max();
        match evictable {
            Some(largest) if id < largest => {
                peers.remove(&largest);
                true
            }
            _ => false,
        }
    }

    async fn dispatch(&self, peer: &Arc<PeerHandle>, tag: u8, payload: Vec<u8>) -> Result<(), GossipError> {
        match Tag::from_byte(tag).ok_or(GossipError::UnknownTag(tag))? {
            Tag::Hello => Err(GossipError::UnknownTag(tag)),
            Tag::Ping => {
                // PING and PONG share a tag; a peer that wants a liveness probe
                // answered calls `send_ping` itself and awaits one in return
                // via its own read loop. We only log receipt here — replying
                // unconditionally would bounce the same nonce back and forth
                // forever.
                let _ping: PingPongPayload = bincode::deserialize(&payload)?;
                debug!(peer = %peer.addr, "ping/pong received");
                Ok(())
            }
            Tag::Tx => {
                let tx: Transaction = bincode::deserialize(&payload)?;
                let hash = tx.id;
                if peer.seen_tx.lock().put(hash, ()).is_some() {
                    return Ok(());
                }
                self.broadcast_except(peer.id, Tag::Tx as u8, &payload, &hash, false);
                let _ = self.inbound_tx.send(InboundEvent::Transaction { from_peer: peer.id, transaction: tx });
                Ok(())
            }
            Tag::Block => {
                let block: Block = bincode::deserialize(&payload)?;
                let hash = block.hash();
                if peer.seen_block.lock().put(hash, ()).is_some() {
                    return Ok(());
                }
                self.broadcast_except(peer.id, Tag::Block as u8, &payload, &hash, true);
                let _ = self.inbound_tx.send(InboundEvent::Block { from_peer: peer.id, block });
                Ok(())
            }
            Tag::HeightReq => {
                let (height, head_hash) = self.chain.height_and_head();
                let res = HeightResPayload { height, head_hash };
                peer.outbound.try_send((Tag::HeightRes as u8, bincode::serialize(&res)?)).ok();
                Ok(())
            }
            Tag::HeightRes => {
                let res: HeightResPayload = bincode::deserialize(&payload)?;
                let _ = self.inbound_tx.send(InboundEvent::HeightAnnounce {
                    from_peer: peer.id,
                    height: res.height,
                    head_hash: res.head_hash,
                });
                Ok(())
            }
            Tag::RangeReq => {
                let req: RangeReqPayload = bincode::deserialize(&payload)?;
                let count = req.count.min(MAX_RANGE_BATCH);
                let blocks = self.chain.blocks_from(req.from_height, count);
                let res = RangeResPayload { blocks };
                peer.outbound.try_send((Tag::RangeRes as u8, bincode::serialize(&res)?)).ok();
                Ok(())
            }
            Tag::RangeRes => {
                let res: RangeResPayload = bincode::deserialize(&payload)?;
                let _ = self.inbound_tx.send(InboundEvent::RangeResponse { from_peer: peer.id, blocks: res.blocks });
                Ok(())
            }
        }
    }

    /// Broadcasts a TX or BLOCK frame to every peer except the one it was
    /// received from (or every peer, if called locally for a self-produced
    /// item). Marks the item as seen in each target peer's dedup cache so
    /// it isn't immediately bounced back.
    fn broadcast_except(&self, except: NodeId, tag: u8, payload: &[u8], id_hash: &[u8; 32], is_block: bool) {
        let peers = self.peers.lock();
        for (peer_id, handle) in peers.iter() {
            if *peer_id == except {
                continue;
            }
            let already_seen = if is_block {
                handle.seen_block.lock().put(*id_hash, ()).is_some()
            } else {
                handle.seen_tx.lock().put(*id_hash, ()).is_some()
            };
            if already_seen {
                continue;
            }
            if handle.outbound.try_send((tag, payload.to_vec())).is_err() {
                warn!(peer = %handle.addr, "outbound queue full, dropping frame");
            }
        }
    }

    /// Broadcasts a locally-admitted transaction to all connected peers.
    pub fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), GossipError> {
        let payload = bincode::serialize(tx)?;
        self.broadcast_except([0xFFu8; 16], Tag::Tx as u8, &payload, &tx.id, false);
        Ok(())
    }

    /// Broadcasts a locally-committed block to all connected peers.
    pub fn broadcast_block(&self, block: &Block) -> Result<(), GossipError> {
        let payload = bincode::serialize(block)?;
        let hash = block.hash();
        self.broadcast_except([0xFFu8; 16], Tag::Block as u8, &payload, &hash, true);
        Ok(())
    }

    /// Sends a liveness probe to one connected peer. The peer does not
    /// auto-reply; callers track round-trip time by watching for their own
    /// nonce to come back (e.g. a future pong from that peer echoing it).
    pub fn send_ping(&self, peer_id: NodeId, nonce: u64) -> Result<(), GossipError> {
        if let Some(handle) = self.peers.lock().get(&peer_id) {
            let payload = bincode::serialize(&PingPongPayload { nonce })?;
            handle.outbound.try_send((Tag::Ping as u8, payload)).ok();
        }
        Ok(())
    }

    /// Sends a HEIGHT_REQ to every connected peer.
    pub fn request_heights(&self) -> Result<(), GossipError> {
        let peers = self.peers.lock();
        for handle in peers.values() {
            handle.outbound.try_send((Tag::HeightReq as u8, Vec::new())).ok();
        }
        Ok(())
    }

    /// Sends a RANGE_REQ to one peer, asking for up to `count` blocks
    /// starting at `from_height`. Used by the sync phase to catch up after
    /// `request_heights` reveals a gap.
    pub fn request_range(&self, peer_id: NodeId, from_height: u64, count: u32) -> Result<(), GossipError> {
        if let Some(handle) = self.peers.lock().get(&peer_id) {
            let req = RangeReqPayload { from_height, count: count.min(MAX_RANGE_BATCH) };
            handle.outbound.try_send((Tag::RangeReq as u8, bincode::serialize(&req)?)).ok();
        }
        Ok(())
    }

    /// Records a reputation strike against a peer whose gossiped transaction
    /// or block failed downstream validation (the transport layer only
    /// deserializes; mempool/chain admission is what actually judges
    /// validity). After [`MAX_PEER_STRIKES`] the peer is disconnected.
    pub fn report_invalid(&self, peer_id: NodeId) {
        if let Some(handle) = self.peers.lock().get(&peer_id) {
            let strikes = handle.strikes.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if strikes >= MAX_PEER_STRIKES {
                warn!(peer = %handle.addr, strikes, "peer exceeded strike limit, disconnecting");
                self.disconnect(peer_id);
            }
        }
    }

    /// Immediately asks a peer's connection to close. Used for violations
    /// that warrant no leniency (e.g. a sync response that fails structural
    /// validation), unlike the accumulated-strikes path in
    /// [`Self::report_invalid`]. The connection actually closes the next
    /// time that peer's read loop checks for a pending disconnect, which is
    /// before its next received frame -- a silent peer is only caught once
    /// an idle timeout is layered on top.
    pub fn disconnect(&self, peer_id: NodeId) {
        if let Some(handle) = self.peers.lock().get(&peer_id) {
            handle.disconnect_requested.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Marks every connected peer for disconnect, then waits out
    /// `drain_deadline` so already-queued outbound frames have a chance to
    /// flush before the process exits.
    pub async fn shutdown(&self, drain_deadline: Duration) {
        for peer_id in self.peer_ids() {
            self.disconnect(peer_id);
        }
        tokio::time::sleep(drain_deadline).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct FakeChain {
        genesis: [u8; 32],
        height: AtomicU64,
    }

    impl ChainQuery for FakeChain {
        fn genesis_hash(&self) -> [u8; 32] {
            self.genesis
        }
        fn height_and_head(&self) -> (u64, [u8; 32]) {
            (self.height.load(Ordering::SeqCst), [1u8; 32])
        }
        fn blocks_from(&self, _from_height: u64, _count: u32) -> Vec<Block> {
            Vec::new()
        }
    }

    fn fake_chain() -> Arc<FakeChain> {
        Arc::new(FakeChain { genesis: [7u8; 32], height: AtomicU64::new(0) })
    }

    #[test]
    fn tag_round_trips_through_byte() {
        assert_eq!(Tag::from_byte(0x01), Some(Tag::Hello));
        assert_eq!(Tag::from_byte(0x03), Some(Tag::Tx));
        assert_eq!(Tag::from_byte(0x08), Some(Tag::RangeRes));
        assert_eq!(Tag::from_byte(0xFF), None);
    }

    #[tokio::test]
    async fn frame_round_trip_over_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, Tag::Tx as u8, b"hello").await.unwrap();
        let (tag, payload) = read_frame(&mut server).await.unwrap();
        assert_eq!(tag, Tag::Tx as u8);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(16);
        let big = vec![0u8; (MAX_FRAME_SIZE + 1) as usize];
        let write_result = write_frame(&mut client, Tag::Block as u8, &big).await;
        assert!(matches!(write_result, Err(GossipError::FrameTooLarge(_))));
        drop(server_unused(&mut server));
    }

    fn server_unused<T>(_t: &mut T) {}

    #[tokio::test]
    async fn handshake_over_loopback_tcp_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let chain_a = fake_chain();
        let chain_b = fake_chain();

        let config_a = GossipConfig { listen_addr: addr, bootstrap_peers: vec![], max_peers: 8, node_id: [1u8; 16] };
        let (service_a, _rx_a) = GossipService::new(config_a, chain_a);
        let service_a = Arc::new(service_a);

        let accept_task = {
            let service_a = Arc::clone(&service_a);
            tokio::spawn(async move {
                let (stream, peer_addr) = listener.accept().await.unwrap();
                service_a.accept_connection(stream, peer_addr).await
            })
        };

        let config_b = GossipConfig { listen_addr: "127.0.0.1:0".parse().unwrap(), bootstrap_peers: vec![], max_peers: 8, node_id: [2u8; 16] };
        let (service_b, _rx_b) = GossipService::new(config_b, chain_b);
        let service_b = Arc::new(service_b);

        let stream_b = TcpStream::connect(addr).await.unwrap();
        let b_addr = stream_b.local_addr().unwrap();
        let connect_task = {
            let service_b = Arc::clone(&service_b);
            tokio::spawn(async move { service_b.accept_connection(stream_b, b_addr).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service_a.peer_count(), 1);
        assert_eq!(service_b.peer_count(), 1);

        accept_task.abort();
        connect_task.abort();
    }

    #[test]
    fn register_peer_rejects_duplicate_id() {
        let chain = fake_chain();
        let config = GossipConfig { listen_addr: "127.0.0.1:0".parse().unwrap(), bootstrap_peers: vec![], max_peers: 8, node_id: [0u8; 16] };
        let (service, _rx) = GossipService::new(config, chain);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        assert!(service.register_peer([1u8; 16], addr));
        assert!(!service.register_peer([1u8; 16], addr));
    }

    #[test]
    fn register_peer_evicts_lexicographically_larger_id_when_full() {
        let chain = fake_chain();
        let config = GossipConfig { listen_addr: "127.0.0.1:0".parse().unwrap(), bootstrap_peers: vec![], max_peers: 1, node_id: [0u8; 16] };
        let (service, _rx) = GossipService::new(config, chain);
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();

        assert!(service.register_peer([5u8; 16], addr));
        // New peer has a smaller id: should evict the existing one.
        assert!(service.register_peer([1u8; 16], addr));
        assert_eq!(service.peer_ids(), vec![[1u8; 16]]);

        // Another peer with a larger id than the sole remaining one is rejected.
        assert!(!service.register_peer([9u8; 16], addr));
    }
}
