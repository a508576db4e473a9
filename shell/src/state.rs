use crate::error::ShellError;
use archiver::{OperationHandle, OperationKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Handle for a running archiver job
pub struct JobHandle {
    /// Control surface of the underlying operation
    pub operation: OperationHandle,
    pub kind: OperationKind,
    pub archive: PathBuf,
}

/// Registry of live jobs plus resources that outlive them
#[derive(Default)]
pub struct AppState {
    /// Map of job_id to JobHandle; entries leave when the job terminates
    pub jobs: Arc<Mutex<HashMap<String, JobHandle>>>,
    /// Scratch directories for opened entries keyed by the job filling them
    pub temp_dirs: Mutex<Vec<(String, TempDir)>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone the operation handle for `job_id` without holding the lock.
    pub fn operation(&self, job_id: &str) -> Result<OperationHandle, ShellError> {
        self.jobs
            .lock()
            .get(job_id)
            .map(|job| job.operation.clone())
            .ok_or_else(|| ShellError::JobNotFound(job_id.to_string()))
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }
}
