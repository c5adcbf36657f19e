//! # CLI Interface
//!
//! Defines the command-line argument structure for `podoru-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// podoru permissioned PoA node.
///
/// Runs one authority (or full, non-producing) node of a permissioned
/// Proof-of-Authority chain: produces or ingests blocks on schedule,
/// gossips them to peers over TCP, and exposes a bare health/metrics
/// surface.
#[derive(Parser, Debug)]
#[command(
    name = "podoru-node",
    about = "podoru permissioned PoA node",
    version,
    propagate_version = true
)]
pub struct PodoruNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the podoru node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a new node — creates the data directory and generates
    /// a fresh keypair.
    Init(InitArgs),
    /// Query the status of a running node via its health endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (YAML).
    #[arg(long, short = 'c', env = "PODORU_CONFIG")]
    pub config: PathBuf,

    /// Address to bind the health/metrics HTTP endpoint on.
    #[arg(
        long,
        env = "PODORU_METRICS_ADDR",
        default_value = "127.0.0.1:9600"
    )]
    pub metrics_addr: String,

    /// Log level when `RUST_LOG` is not set.
    #[arg(long, env = "PODORU_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "PODORU_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "PODORU_DATA_DIR", default_value = "~/.podoru")]
    pub data_dir: PathBuf,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Health endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9600/healthz")]
    pub health_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        PodoruNodeCli::command().debug_assert();
    }
}
