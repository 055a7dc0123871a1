//! Error types for the PV bridge.

use thiserror::Error;

/// Errors reported by a PV client while opening or closing a monitor.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Subscription to {name} rejected: {reason}")]
    Rejected { name: String, reason: String },

    #[error("Connection to PV source lost")]
    ConnectionLost,

    #[error("PV client error: {0}")]
    Other(String),
}

/// Errors surfaced to the thread controlling a [`PvDataWorker`](crate::PvDataWorker).
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("PV client error: {0}")]
    Client(#[from] ClientError),

    #[error("Worker is not running")]
    NotRunning,

    #[error("Worker has already been started")]
    AlreadyStarted,

    #[error("Failed to spawn worker thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Failed to build worker event loop: {0}")]
    EventLoop(String),

    #[error("Worker thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, BridgeError>;
