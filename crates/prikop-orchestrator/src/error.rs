//! Error types for the orchestrator

use std::path::PathBuf;
use thiserror::Error;

/// Worker pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Container runtime call failed
    #[error("Container runtime error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// A worker's process exited before its socket appeared
    #[error("Worker {index} died early (exit code {exit_code}). Logs: {logs}")]
    WorkerDied {
        /// Worker index within the pool
        index: usize,
        /// Container exit code
        exit_code: i64,
        /// Captured container logs
        logs: String,
    },

    /// A worker's socket file never appeared
    #[error("Socket {path} not created within the startup window")]
    SocketTimeout {
        /// Expected socket path on the host side
        path: PathBuf,
    },

    /// Dialing the worker socket timed out
    #[error("Dial timeout for worker {worker}")]
    DialTimeout {
        /// Worker id
        worker: String,
    },

    /// The combined request/response deadline elapsed
    #[error("Worker {worker} exceeded the socket deadline")]
    Deadline {
        /// Worker id
        worker: String,
    },

    /// The operation was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// The pool is shut down
    #[error("Worker pool is closed")]
    Closed,

    /// Protocol error on the worker socket
    #[error("Worker protocol error: {0}")]
    Protocol(#[from] prikop_core::Error),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level orchestrator errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The container runtime is unreachable
    #[error("Container runtime unreachable: {0}")]
    RuntimeUnreachable(String),

    /// No decoy payload files were discovered
    #[error("No payload files (*.bin) found in {path}")]
    NoPayloads {
        /// The searched directory
        path: PathBuf,
    },

    /// Worker pool failed to start
    #[error("Worker pool start failed: {0}")]
    PoolStart(#[source] PoolError),

    /// The run was cancelled by a signal
    #[error("Run cancelled")]
    Cancelled,

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
