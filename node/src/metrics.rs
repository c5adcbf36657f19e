//! # Prometheus Metrics
//!
//! Exposes operational metrics for the node. Scraped by Prometheus at the
//! `/metrics` HTTP endpoint on the configured metrics address.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers. A background
//! task feeds these counters/gauges from the [`podoru_chain::network::ChainEvent`]
//! broadcast stream rather than from request handlers, so scraping never
//! touches the hot path.

use podoru_chain::network::ChainEvent;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Total number of blocks committed (ingested or self-produced) by this node.
    pub blocks_committed_total: IntCounter,
    /// Total number of transactions admitted into committed blocks.
    pub transactions_committed_total: IntCounter,
    /// Current number of transactions waiting in the mempool.
    pub mempool_size: IntGauge,
    /// Number of currently connected gossip peers.
    pub connected_peers: IntGauge,
    /// Current chain height (latest committed block).
    pub chain_height: IntGauge,
    /// Histogram of time spent building a candidate block, in seconds.
    pub block_production_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("podoru".into()), None)
            .expect("failed to create prometheus registry");

        let blocks_committed_total = IntCounter::new(
            "blocks_committed_total",
            "Total number of blocks committed to the local chain",
        )
        .expect("metric creation");
        registry
            .register(Box::new(blocks_committed_total.clone()))
            .expect("metric registration");

        let transactions_committed_total = IntCounter::new(
            "transactions_committed_total",
            "Total number of transactions included in committed blocks",
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_committed_total.clone()))
            .expect("metric registration");

        let mempool_size = IntGauge::new(
            "mempool_size",
            "Current number of pending transactions in the mempool",
        )
        .expect("metric creation");
        registry
            .register(Box::new(mempool_size.clone()))
            .expect("metric registration");

        let connected_peers =
            IntGauge::new("connected_peers", "Number of currently connected gossip peers")
                .expect("metric creation");
        registry
            .register(Box::new(connected_peers.clone()))
            .expect("metric registration");

        let chain_height = IntGauge::new("chain_height", "Height of the latest committed block")
            .expect("metric creation");
        registry
            .register(Box::new(chain_height.clone()))
            .expect("metric registration");

        let block_production_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "block_production_seconds",
                "Time spent building a candidate block, in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(block_production_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            blocks_committed_total,
            transactions_committed_total,
            mempool_size,
            connected_peers,
            chain_height,
            block_production_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers via extension.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Drives the metric gauges/counters from the node's chain event stream.
///
/// Runs until the broadcast channel closes (node shutdown). Lagged receivers
/// just skip ahead to the next event rather than stalling the node.
pub async fn drive_metrics(metrics: SharedMetrics, mut events: broadcast::Receiver<ChainEvent>) {
    loop {
        match events.recv().await {
            Ok(ChainEvent::BlockCommitted { height, tx_count, .. }) => {
                metrics.blocks_committed_total.inc();
                metrics.transactions_committed_total.inc_by(tx_count as u64);
                metrics.chain_height.set(height as i64);
            }
            Ok(ChainEvent::TransactionAdmitted { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// How often [`poll_gauges`] samples the mempool/gossip state.
pub const GAUGE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Periodically samples gauges that aren't driven by a discrete
/// [`ChainEvent`]: mempool size and gossip peer count. `sample` returns
/// `(mempool_len, peer_count)` each tick; runs until the calling task is
/// aborted (there's no completion signal to wait on otherwise).
pub async fn poll_gauges(metrics: SharedMetrics, sample: impl Fn() -> (usize, usize) + Send + 'static) {
    let mut interval = tokio::time::interval(GAUGE_POLL_INTERVAL);
    loop {
        interval.tick().await;
        let (mempool_len, peer_count) = sample();
        metrics.mempool_size.set(mempool_len as i64);
        metrics.connected_peers.set(peer_count as i64);
    }
}
