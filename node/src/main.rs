// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # podoru Node
//!
//! Entry point for the `podoru-node` binary. Parses CLI arguments,
//! initializes logging and metrics, wires up the chain engine and gossip
//! transport, and runs the node until shutdown.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — initialize a data directory and generate a keypair
//! - `status`  — query a running node's health endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod config;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use podoru_chain::crypto::keys::PodoruKeypair;
use podoru_chain::network::consensus::AuthoritySet;
use podoru_chain::network::gossip::GossipConfig;
use podoru_chain::network::mempool::{Mempool, MempoolConfig};
use podoru_chain::network::node::PodoruNode;
use podoru_chain::storage::db::SledStore;
use podoru_chain::storage::ChainEngine;

use api::AppState;
use cli::{Commands, PodoruNodeCli};
use config::{GenesisFile, NodeConfig};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = PodoruNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — node startup sequence
// ---------------------------------------------------------------------------

/// Starts the node.
///
/// Startup sequence:
/// 1.  Parse CLI args (already done)
/// 2.  Initialize logging
/// 3.  Load node config (YAML) and genesis file (JSON)
/// 4.  Load or generate this node's keypair
/// 5.  Open the sled store and the chain engine (genesis-seeded if new)
/// 6.  Create the mempool
/// 7.  Wire the node orchestrator (gossip + producer + sync)
/// 8.  Spawn the metrics-feed task and the health/metrics HTTP server
/// 9.  Print the startup banner
/// 10. Run until shutdown, then drain gossip and exit
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    let node_config = NodeConfig::load(&args.config)
        .with_context(|| format!("failed to load node config from {}", args.config.display()))?;
    let genesis = GenesisFile::load(&node_config.genesis_path).with_context(|| {
        format!("failed to load genesis file from {}", node_config.genesis_path.display())
    })?;

    let authorities_addrs = node_config
        .authority_addresses()
        .context("invalid authority address in node config")?;
    let authorities = AuthoritySet::new(authorities_addrs.clone());
    let block_time = node_config.block_time_duration().context("invalid block_time")?;

    let keypair = load_or_generate_keypair(&node_config.private_key)?;

    std::fs::create_dir_all(&node_config.data_dir)
        .with_context(|| format!("failed to create data dir {}", node_config.data_dir.display()))?;
    let store = Arc::new(
        SledStore::open(node_config.data_dir.join("chain"))
            .with_context(|| format!("failed to open chain store at {}", node_config.data_dir.display()))?,
    );
    let chain = Arc::new(
        ChainEngine::open_with_genesis_state(
            store,
            authorities_addrs,
            genesis.timestamp,
            genesis.decoded_initial_state().context("invalid genesis initial_state")?,
        )
        .context("failed to open chain engine")?,
    );

    let mempool = Arc::new(Mempool::new(MempoolConfig::default()));

    let listen_addr = node_config
        .listen_addr()
        .parse()
        .with_context(|| format!("invalid p2p listen address {}", node_config.listen_addr()))?;
    let bootstrap_peers = node_config
        .bootstrap_peers
        .iter()
        .map(|s| s.parse().with_context(|| format!("invalid bootstrap peer address {s}")))
        .collect::<Result<Vec<_>>>()?;
    let gossip_config = GossipConfig {
        listen_addr,
        bootstrap_peers,
        max_peers: node_config.max_peers,
        node_id: *uuid::Uuid::new_v4().as_bytes(),
    };

    let metrics = Arc::new(NodeMetrics::new());

    let (node, inbound_rx) = PodoruNode::new(
        Arc::clone(&chain),
        Arc::clone(&mempool),
        gossip_config,
        authorities,
        keypair.clone(),
        block_time.as_secs() as i64,
        metrics.block_production_seconds.clone(),
    );

    tokio::spawn(metrics::drive_metrics(Arc::clone(&metrics), node.subscribe_events()));
    {
        let gossip = Arc::clone(&node.gossip);
        let mempool = Arc::clone(&mempool);
        tokio::spawn(metrics::poll_gauges(Arc::clone(&metrics), move || (mempool.len(), gossip.peer_count())));
    }

    let app_state = {
        let gossip = Arc::clone(&node.gossip);
        AppState {
            chain: Arc::clone(&chain),
            peer_count: Arc::new(move || gossip.peer_count()),
            metrics: Arc::clone(&metrics),
        }
    };
    let metrics_addr: std::net::SocketAddr = args
        .metrics_addr
        .parse()
        .with_context(|| format!("invalid metrics address {}", args.metrics_addr))?;
    let http_listener = tokio::net::TcpListener::bind(metrics_addr)
        .await
        .with_context(|| format!("failed to bind health/metrics endpoint on {metrics_addr}"))?;
    let http_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, api::build_router(app_state)).await {
            tracing::error!(error = %e, "health/metrics server exited");
        }
    });

    print_startup_banner(
        &keypair.address(),
        &node_config.listen_addr(),
        &metrics_addr.to_string(),
        &node_config.data_dir.display().to_string(),
        node.is_authority(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    node.run(inbound_rx, shutdown_rx).await.context("node run loop failed")?;
    http_server.abort();

    Ok(())
}

// ---------------------------------------------------------------------------
// init — scaffold a new data directory
// ---------------------------------------------------------------------------

fn init_node(args: cli::InitArgs) -> Result<()> {
    let data_dir = expand_home(&args.data_dir);

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let key_path = data_dir.join("node.key");
    let keypair = load_or_generate_keypair(&key_path)?;

    println!("initialized node data directory at {}", data_dir.display());
    println!("address: 0x{}", podoru_chain::crypto::keys::address_to_hex(&keypair.address()));
    println!();
    println!("next steps:");
    println!("  1. add this address to every node's `authorities` list in their genesis file");
    println!("  2. write a node config YAML pointing `private_key` at {}", key_path.display());
    println!("  3. run: podoru-node run --config <path-to-config.yaml>");

    Ok(())
}

// ---------------------------------------------------------------------------
// status — query a running node
// ---------------------------------------------------------------------------

async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let body = http_get(&args.health_url).await?;
    println!("{body}");
    Ok(())
}

fn print_version() {
    println!("podoru-node {}", env!("CARGO_PKG_VERSION"));
    println!("podoru-chain {}", podoru_chain::config::PROTOCOL_VERSION);
    println!("wire protocol version {}", podoru_chain::config::WIRE_PROTOCOL_VERSION);
    println!("rustc {}", rustc_version());
}

fn rustc_version() -> &'static str {
    option_env!("CARGO_PKG_RUST_VERSION").unwrap_or("unknown")
}

/// Expands a leading `~` to `$HOME`. Just enough tilde support for
/// `--data-dir ~/.podoru` without a dependency on `dirs`/`shellexpand`.
fn expand_home(path: &std::path::Path) -> std::path::PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix('~')) else {
        return path.to_path_buf();
    };
    let Ok(home) = std::env::var("HOME") else {
        return path.to_path_buf();
    };
    std::path::PathBuf::from(format!("{home}{rest}"))
}

// ---------------------------------------------------------------------------
// Keypair loading
// ---------------------------------------------------------------------------

/// Loads the hex-encoded secp256k1 key at `key_path`, generating and saving
/// a fresh one (mode 0600 on Unix) if the file doesn't exist yet.
fn load_or_generate_keypair(key_path: &std::path::Path) -> Result<PodoruKeypair> {
    if key_path.exists() {
        let hex_str = std::fs::read_to_string(key_path)
            .with_context(|| format!("failed to read key from {}", key_path.display()))?;
        let keypair = PodoruKeypair::from_hex(hex_str.trim())
            .map_err(|e| anyhow::anyhow!("invalid key at {}: {}", key_path.display(), e))?;
        tracing::info!(
            address = %podoru_chain::crypto::keys::address_to_hex(&keypair.address()),
            key_path = %key_path.display(),
            "loaded keypair from disk"
        );
        Ok(keypair)
    } else {
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create key directory {}", parent.display()))?;
        }

        let keypair = PodoruKeypair::generate();
        std::fs::write(key_path, keypair.to_hex())
            .with_context(|| format!("failed to write key to {}", key_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::info!(
            address = %podoru_chain::crypto::keys::address_to_hex(&keypair.address()),
            key_path = %key_path.display(),
            "generated and saved new keypair"
        );
        Ok(keypair)
    }
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

fn print_startup_banner(address: &podoru_chain::crypto::keys::Address, p2p_addr: &str, health_addr: &str, data_dir: &str, is_authority: bool) {
    let lines = [
        format!("  Address:    0x{}", podoru_chain::crypto::keys::address_to_hex(address)),
        format!("  P2P:        {}", p2p_addr),
        format!("  Health:     http://{}/healthz", health_addr),
        format!("  Data:       {}", data_dir),
        format!("  Role:       {}", if is_authority { "authority" } else { "full" }),
    ];

    let title = format!("  podoru \u{2014} PoA Node v{}", env!("CARGO_PKG_VERSION"));

    let max_width = lines.iter().map(|l| l.len()).chain(std::iter::once(title.len())).max().unwrap_or(50) + 4;
    let border = "\u{2550}".repeat(max_width);

    println!();
    println!("\u{2554}{border}\u{2557}");
    println!("\u{2551}  {:<width$}  \u{2551}", title.trim(), width = max_width - 4);
    println!("\u{2560}{border}\u{2563}");
    for line in &lines {
        println!("\u{2551}  {:<width$}  \u{2551}", line.trim(), width = max_width - 4);
    }
    println!("\u{255A}{border}\u{255D}");
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Minimal HTTP client
// ---------------------------------------------------------------------------

/// Minimal HTTP GET without pulling in `reqwest` as a dependency -- the
/// `status` subcommand is the only caller and a raw request is all it needs.
async fn http_get(url: &str) -> Result<String> {
    let parsed: url::Url = url.parse().map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let host = parsed.host_str().ok_or_else(|| anyhow::anyhow!("missing host in URL"))?;
    let port = parsed.port().unwrap_or(80);
    let path = parsed.path();

    let addr = format!("{host}:{port}");
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Minimal URL parser -- just enough to extract host/port/path, avoiding the
/// `url` crate for a single use.
mod url {
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host_str(&self) -> Option<&str> {
            Some(&self.host)
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let rest = s.strip_prefix("http://").or_else(|| s.strip_prefix("https://")).unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..].parse::<u16>().map_err(|e| format!("bad port: {e}"))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url { host, port, path: path.to_string() })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_parses_host_port_path() {
        let parsed: url::Url = "http://127.0.0.1:9600/healthz".parse().unwrap();
        assert_eq!(parsed.host_str(), Some("127.0.0.1"));
        assert_eq!(parsed.port(), Some(9600));
        assert_eq!(parsed.path(), "/healthz");
    }

    #[test]
    fn url_defaults_path_to_root() {
        let parsed: url::Url = "http://example.com".parse().unwrap();
        assert_eq!(parsed.path(), "/");
        assert_eq!(parsed.port(), None);
    }

    #[test]
    fn keypair_roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("node.key");

        let first = load_or_generate_keypair(&key_path).unwrap();
        let second = load_or_generate_keypair(&key_path).unwrap();
        assert_eq!(first.address(), second.address());
    }

    #[cfg(unix)]
    #[test]
    fn generated_key_file_has_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("node.key");
        load_or_generate_keypair(&key_path).unwrap();

        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
