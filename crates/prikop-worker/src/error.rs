//! Error types for the worker evaluator
//!
//! Evaluation failures never cross the socket as errors; they are folded
//! into the protocol response with a tagged message. Only server-level
//! faults (bind failure, broken accept loop) surface as real errors.

use thiserror::Error;

/// Fatal worker server errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to bind or configure the listening socket
    #[error("Socket setup failed for '{path}': {source}")]
    SocketSetup {
        /// The socket path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-evaluation failures, folded into the protocol response
#[derive(Error, Debug)]
pub enum EvalError {
    /// Firewall rules could not be applied
    #[error("FIREWALL_ERR: {0}")]
    Firewall(String),

    /// The packet engine failed to start or died during settling
    #[error("ENGINE_CRASH: {0}")]
    EngineCrash(String),
}

impl EvalError {
    /// The tagged message embedded in the protocol response
    pub fn message(&self) -> String {
        self.to_string()
    }
}
