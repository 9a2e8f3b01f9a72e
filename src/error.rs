//! Error types for the replay engine

use thiserror::Error;

/// Errors raised on the open/probe path. Everything past a successful open
/// is handled inside the pacing thread with logs and local recovery.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// File missing, unreadable, or a positioned read failed.
    #[error("failed to open file: {0}")]
    FileOpen(#[from] std::io::Error),

    /// Neither a 188-byte TS nor a 192-byte M2TS sync pattern was found.
    #[error("wrong file format")]
    WrongFormat,

    /// No PCR-bearing packet inside the probe window.
    #[error("first PCR is not found")]
    FirstPcrNotFound,

    /// The pacing thread could not be started.
    #[error("failed to start pacing thread: {0}")]
    ThreadSpawn(std::io::Error),
}

/// Result type alias for replay operations.
pub type Result<T> = std::result::Result<T, ReplayError>;
