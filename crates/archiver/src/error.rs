//! Error types for archiver operations.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for archiver operations.
///
/// Cancellation is not represented here: an aborted operation ends with
/// [`Outcome::Aborted`](crate::types::Outcome::Aborted), which is a normal
/// terminal state.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// No archiver executable could be located.
    #[error("7-Zip executable not found (tried {0})")]
    BinaryNotFound(String),

    /// The archiver executable could not be launched.
    #[error("Failed to launch {binary}: {source}")]
    Spawn {
        /// Path of the executable that failed to start
        binary: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The output ended before an overwrite prompt was complete.
    #[error("Unexpected end of overwrite prompt: {0}")]
    ConflictProtocol(String),

    /// The archiver wrote to its error channel.
    #[error("{0}")]
    ToolFailure(String),

    /// A decision was supplied while no prompt of that kind was outstanding.
    #[error("No pending {0} prompt")]
    NoPendingPrompt(&'static str),

    /// The request cannot be turned into a valid invocation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The listing output did not contain the expected table.
    #[error("Unrecognized listing output: {0}")]
    ListingFormat(String),

    /// An I/O error occurred while talking to the subprocess.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
