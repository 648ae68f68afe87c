//! prikop CLI
//!
//! One binary, two modes: the orchestrator (default) and the in-sandbox
//! worker server selected by `--worker-socket`.

mod args;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use args::Args;
use prikop_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args)?;

    let result = run(args).await;
    if let Err(ref e) = result {
        error!("fatal: {e:#}");
    }
    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    config.pool.host_socket_dir = args.socket_dir.clone();
    if let Some(workers) = args.workers {
        config.pool.size = workers;
    }
    config.validate().context("invalid configuration")?;

    match &args.worker_socket {
        Some(socket_path) => prikop_worker::server::run(socket_path, &config)
            .await
            .context("worker server failed"),
        None => prikop_orchestrator::driver::run(config, &args.fake_path, &args.targets_path)
            .await
            .context("orchestrator run failed"),
    }
}
