//! Error type for the application facade.

use archiver::ArchiverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// No live job has this id; it may already have finished.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Archiver(#[from] ArchiverError),

    /// Settings could not be located, encoded or written.
    #[error("Settings error: {0}")]
    Settings(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
