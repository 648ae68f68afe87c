//! Worker server: the evaluator behind a UNIX-domain socket
//!
//! One connection carries one evaluation. Requests are served strictly in
//! order; the sandbox owns a single engine instance and a single firewall
//! state, so there is nothing to parallelize at this level.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tracing::{info, warn};

use prikop_core::config::Config;
use prikop_core::protocol::{self, WorkerRequest, WorkerResult};
use prikop_core::targets::VerifierKind;

use crate::engine::Engine;
use crate::error::{EvalError, WorkerError};
use crate::firewall;
use crate::probe::{self, ProbeLimits};

/// Bind the socket and serve evaluations until killed.
pub async fn run(socket_path: &Path, config: &Config) -> Result<(), WorkerError> {
    // A stale socket file from a previous worker blocks the bind
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path).map_err(|source| WorkerError::SocketSetup {
        path: socket_path.display().to_string(),
        source,
    })?;

    // The orchestrator dials from outside the sandbox through the bind
    // mount; it runs under a different uid.
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o777)).map_err(
        |source| WorkerError::SocketSetup {
            path: socket_path.display().to_string(),
            source,
        },
    )?;

    info!(socket = %socket_path.display(), "worker listening");

    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        handle_connection(stream, config).await;
    }
}

async fn handle_connection(stream: UnixStream, config: &Config) {
    let mut framed = protocol::framed(stream);

    let request: WorkerRequest = match protocol::recv(&mut framed).await {
        Ok(request) => request,
        Err(e) => {
            let _ = protocol::send(&mut framed, &WorkerResult::failure(format!("bad request: {e}")))
                .await;
            return;
        }
    };

    // Clean slate before and after, whatever the previous request left
    cleanup(config).await;
    let result = evaluate(&request, config).await;
    cleanup(config).await;

    if let Err(e) = protocol::send(&mut framed, &result).await {
        warn!("response write failed: {e}");
    }
}

/// One full evaluation: firewall, engine, probe suite.
async fn evaluate(request: &WorkerRequest, config: &Config) -> WorkerResult {
    let queue_num = config.engine.queue_num;

    if let Err(e) = firewall::apply(&request.target_group, queue_num).await {
        return WorkerResult::failure(e.message());
    }

    let mut engine = match Engine::spawn(&config.engine.binary, queue_num, &request.strategy_args) {
        Ok(engine) => engine,
        Err(e) => return WorkerResult::failure(e.message()),
    };

    // Give the engine a moment to attach to the queue, then make sure it
    // is actually still alive.
    tokio::time::sleep(config.engine.settle_delay()).await;
    if let Some(stderr) = engine.crashed() {
        engine.kill().await;
        return WorkerResult::failure(EvalError::EngineCrash(stderr).message());
    }

    let kind = VerifierKind::for_group(&request.target_group);
    info!(verifier = %kind.name(), args = %request.strategy_args, "evaluating");

    let limits = ProbeLimits {
        max_parallel: config.probes.max_parallel,
        timeout: config.probes.check_timeout(),
    };
    let outcome = probe::run_suite(&kind, limits).await;

    engine.kill().await;

    let success = outcome.success_count > 0;
    WorkerResult {
        success,
        code: 0,
        error: (!success).then(|| "ZERO_SUCCESS".to_string()),
        success_count: outcome.success_count,
        total_count: outcome.total_count,
        passed: outcome.passed,
        failed: outcome.failed,
    }
}

/// Kill any stray engine and flush the firewall.
async fn cleanup(config: &Config) {
    if let Some(name) = config.engine.binary.file_name().and_then(|n| n.to_str()) {
        let _ = Command::new("pkill").args(["-9", name]).output().await;
    }
    firewall::flush().await;
}
