//! # Archiver
//!
//! Drives an external 7-Zip executable as a subprocess.
//!
//! Every operation (extract, create, add, delete, rename, test) runs in its
//! own tokio task that streams the archiver's standard output byte by byte.
//! The output is interpreted into progress updates, overwrite-conflict
//! prompts and password prompts, and the operation ends with exactly one
//! [`Outcome`]: finished, aborted or failed.
//!
//! Pause and resume suspend the process with signals; cancellation asks the
//! archiver to stop and unblocks any prompt that is still waiting.
//!
//! ## Example
//!
//! ```rust,no_run
//! use archiver::{ArchiverConfig, OperationEvent, OperationRequest, ProcessDriver};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # async fn run() -> Result<(), archiver::ArchiverError> {
//! let config = Arc::new(ArchiverConfig::resolve(None)?);
//! let driver = ProcessDriver::new(config);
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let request = OperationRequest::extract("photos.7z", vec![], "out");
//! let running = driver.start(request, tx)?;
//! let handle = running.handle().clone();
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         OperationEvent::Progress { percent, .. } => println!("{percent}%"),
//!         OperationEvent::PasswordRequired => handle.resolve_password("secret")?,
//!         OperationEvent::Terminated(outcome) => println!("{outcome:?}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod control;
pub mod driver;
pub mod error;
pub mod formats;
pub mod interpreter;
pub mod listing;
pub mod types;

// Re-export main types
pub use config::ArchiverConfig;
pub use driver::{OperationHandle, ProcessDriver, RunningOperation};
pub use error::ArchiverError;
pub use formats::{format_size, is_supported_archive, supports_modification, test_report};
pub use interpreter::{StreamEvent, StreamInterpreter};
pub use types::{
    ArchiveEntry, ArchiveListing, ArchiveType, CompressionLevel, ConflictDecision, ConflictPrompt,
    OperationEvent, OperationKind, OperationRequest, Outcome,
};

use std::path::Path;

/// List the contents of an archive.
///
/// # Arguments
///
/// * `config` - Resolved archiver executable
/// * `archive` - Path to the archive file
/// * `password` - Password for archives with encrypted headers
///
/// # Errors
///
/// Returns an error if:
/// - The archiver cannot be launched
/// - The archive cannot be opened (wrong password, corrupt, unsupported)
/// - The output does not contain a listing table
pub async fn list(
    config: &ArchiverConfig,
    archive: &Path,
    password: Option<&str>,
) -> Result<ArchiveListing, ArchiverError> {
    listing::list_archive(config, archive, password).await
}
