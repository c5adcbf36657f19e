//! # Protocol Constants
//!
//! The handful of values that are load-bearing for every node on the same
//! chain: they have to agree, or two otherwise-healthy nodes will reject
//! each other's blocks. Everything else (ports, peer lists, the authority
//! set itself) is per-node configuration, not a protocol constant, and
//! lives in `podoru-node`'s YAML config instead.

/// Crate version string, surfaced in the `version` CLI subcommand and the
/// `/healthz` response.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire protocol version exchanged in the gossip handshake
/// ([`crate::network::gossip::Tag::Hello`]). Bump on any change to frame
/// layout or message semantics that isn't backward compatible.
pub const WIRE_PROTOCOL_VERSION: u16 = 1;

/// Default PoA block interval, used when a node's config omits `block_time`.
pub const DEFAULT_BLOCK_TIME_SECS: i64 = crate::network::consensus::DEFAULT_BLOCK_TIME_SECS;

/// Minimum connected peers before a node's `/healthz` reports itself as
/// network-ready rather than merely alive.
pub const MIN_PEERS_FOR_READY: usize = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_version_is_nonempty() {
        assert!(!PROTOCOL_VERSION.is_empty());
    }

    #[test]
    fn default_block_time_matches_consensus_module() {
        assert_eq!(DEFAULT_BLOCK_TIME_SECS, 5);
    }
}
