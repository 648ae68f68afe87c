//! Command-line argument parsing

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// prikop - evolutionary search for working DPI-bypass configurations
///
/// In orchestrator mode (the default), provisions a pool of worker
/// sandboxes and evolves packet-engine strategies against canary targets.
/// With `--worker-socket`, runs as the in-sandbox evaluator instead.
#[derive(Parser, Debug)]
#[command(name = "prikop")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Run as the in-sandbox worker server on the given UNIX socket
    #[arg(long, value_name = "PATH")]
    pub worker_socket: Option<PathBuf>,

    /// Directory with decoy payload .bin files
    #[arg(long, value_name = "DIR", default_value = "/app/fake")]
    pub fake_path: PathBuf,

    /// Directory with hostlist files referenced by the engine filters
    #[arg(long, value_name = "DIR", default_value = "/app/targets")]
    pub targets_path: PathBuf,

    /// Host directory mounted into worker sandboxes for the IPC sockets
    #[arg(
        long,
        value_name = "DIR",
        env = "HOST_SOCKET_DIR",
        default_value = "/tmp/prikop_sockets"
    )]
    pub socket_dir: PathBuf,

    /// Number of worker sandboxes (overrides the config file)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Run in quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format for logs
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}
