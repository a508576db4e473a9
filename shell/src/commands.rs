use crate::error::ShellError;
use crate::settings::{self, Settings};
use crate::state::{AppState, JobHandle};
use archiver::formats;
use archiver::{
    ArchiveListing, ArchiveType, ArchiverConfig, ArchiverError, CompressionLevel,
    ConflictDecision, ConflictPrompt, OperationEvent, OperationRequest, Outcome, ProcessDriver,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How long `shutdown` waits for cancelled jobs to report back.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Whether extraction keeps the archive's directory structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractMode {
    /// Keep paths (`x`)
    #[default]
    All,
    /// Drop paths (`e`)
    One,
}

/// Event payload delivered to the collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellEvent {
    pub job_id: String,
    pub kind: ShellEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShellEventKind {
    Progress { percent: u8, message: String },
    Conflict { prompt: ConflictPrompt },
    PasswordRequired,
    Message { line: String },
    Finished,
    Aborted,
    Failed { error: String },
}

impl ShellEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShellEventKind::Finished | ShellEventKind::Aborted | ShellEventKind::Failed { .. }
        )
    }
}

impl From<Outcome> for ShellEventKind {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Finished => ShellEventKind::Finished,
            Outcome::Aborted => ShellEventKind::Aborted,
            Outcome::Failed(error) => ShellEventKind::Failed { error },
        }
    }
}

impl From<OperationEvent> for ShellEventKind {
    fn from(event: OperationEvent) -> Self {
        match event {
            OperationEvent::Progress { percent, message } => {
                ShellEventKind::Progress { percent, message }
            }
            OperationEvent::Conflict(prompt) => ShellEventKind::Conflict { prompt },
            OperationEvent::PasswordRequired => ShellEventKind::PasswordRequired,
            OperationEvent::Message { line } => ShellEventKind::Message { line },
            OperationEvent::Terminated(outcome) => outcome.into(),
        }
    }
}

/// Where an opened entry lands once its job finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempExtraction {
    pub job_id: String,
    pub path: PathBuf,
}

/// Entry point for collaborators: starts jobs, relays control, emits events.
///
/// Jobs are identified by string ids. Every job produces exactly one terminal
/// event (`Finished`, `Aborted` or `Failed`), after which its id is no longer
/// known to the registry.
pub struct Shell {
    driver: RwLock<ProcessDriver>,
    state: AppState,
    settings: Mutex<Settings>,
    settings_path: Option<PathBuf>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    events: mpsc::UnboundedSender<ShellEvent>,
}

impl Shell {
    /// Build a shell from already loaded settings.
    ///
    /// `settings_path` is where `shutdown` writes the settings back; `None`
    /// keeps them in memory only.
    pub fn new(
        settings: Settings,
        settings_path: Option<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ShellEvent>), ShellError> {
        let config = ArchiverConfig::resolve(settings.binary_path.as_deref())?;
        info!(binary = %config.binary.display(), "archiver resolved");

        let (events, rx) = mpsc::unbounded_channel();
        let shell = Self {
            driver: RwLock::new(ProcessDriver::new(Arc::new(config))),
            state: AppState::new(),
            settings: Mutex::new(settings),
            settings_path,
            tasks: Mutex::new(Vec::new()),
            events,
        };
        Ok((shell, rx))
    }

    /// Load settings from `config_dir` (or the platform default) and build a shell.
    pub async fn open(
        config_dir: Option<&Path>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ShellEvent>), ShellError> {
        let path = settings::settings_path(config_dir)?;
        let settings = Settings::load(&path).await?;
        Self::new(settings, Some(path))
    }

    /// Extract `items` (everything when empty) into `destination`.
    pub fn start_extract(
        &self,
        archive: impl Into<PathBuf>,
        items: Vec<String>,
        destination: impl Into<PathBuf>,
        mode: ExtractMode,
        password: Option<String>,
    ) -> Result<String, ShellError> {
        let archive = archive.into();
        ensure_supported(&archive)?;

        let request = match mode {
            ExtractMode::All => OperationRequest::extract(archive, items, destination),
            ExtractMode::One => OperationRequest::extract_one(archive, items, destination),
        };
        self.launch(request.with_password(password))
    }

    /// Create `destination` from `sources`.
    ///
    /// Archive type and compression level default to the current settings.
    pub fn start_archive(
        &self,
        sources: Vec<String>,
        destination: impl Into<PathBuf>,
        archive_type: Option<ArchiveType>,
        password: Option<String>,
        compression_level: Option<CompressionLevel>,
    ) -> Result<String, ShellError> {
        let (default_type, default_level) = {
            let settings = self.settings.lock();
            (settings.default_archive_type, settings.compression_level)
        };

        let request = OperationRequest::archive(
            sources,
            destination,
            archive_type.unwrap_or(default_type),
        )
        .with_password(password)
        .with_compression(compression_level.unwrap_or(default_level));
        self.launch(request)
    }

    /// Add `files` to an existing archive, optionally under `subdir`.
    pub fn start_add(
        &self,
        archive: impl Into<PathBuf>,
        files: Vec<String>,
        subdir: Option<String>,
    ) -> Result<String, ShellError> {
        let archive = archive.into();
        ensure_modifiable(&archive)?;
        self.launch(OperationRequest::add(archive, files, subdir))
    }

    pub fn start_delete(
        &self,
        archive: impl Into<PathBuf>,
        item: impl Into<String>,
    ) -> Result<String, ShellError> {
        let archive = archive.into();
        ensure_modifiable(&archive)?;
        self.launch(OperationRequest::delete(archive, item))
    }

    pub fn start_rename(
        &self,
        archive: impl Into<PathBuf>,
        old_path: impl Into<String>,
        new_path: impl Into<String>,
    ) -> Result<String, ShellError> {
        let archive = archive.into();
        ensure_modifiable(&archive)?;
        self.launch(OperationRequest::rename(archive, old_path, new_path))
    }

    pub fn start_test(
        &self,
        archive: impl Into<PathBuf>,
        password: Option<String>,
    ) -> Result<String, ShellError> {
        let archive = archive.into();
        ensure_supported(&archive)?;
        self.launch(OperationRequest::test(archive).with_password(password))
    }

    /// Extract a single entry into a fresh scratch directory.
    ///
    /// The directory is kept until [`Shell::shutdown`] so the entry can be
    /// opened after the job finishes.
    pub fn extract_to_temp(
        &self,
        archive: impl Into<PathBuf>,
        item: impl Into<String>,
        password: Option<String>,
    ) -> Result<TempExtraction, ShellError> {
        let archive = archive.into();
        let item = item.into();
        ensure_supported(&archive)?;

        let file_name = Path::new(&item)
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| {
                ArchiverError::InvalidRequest(format!("'{}' does not name a file", item))
            })?;

        let temp_dir = tempfile::Builder::new()
            .prefix("archive-shell-")
            .tempdir()?;
        let path = temp_dir.path().join(file_name);

        let request = OperationRequest::extract_one(archive, vec![item], temp_dir.path())
            .with_password(password);
        let job_id = self.launch(request)?;
        self.state.temp_dirs.lock().push((job_id.clone(), temp_dir));

        Ok(TempExtraction { job_id, path })
    }

    /// Suspend a job. Pausing a paused job does nothing.
    pub fn pause(&self, job_id: &str) -> Result<(), ShellError> {
        self.state.operation(job_id)?.pause();
        Ok(())
    }

    /// Continue a paused job. Resuming a running job does nothing.
    pub fn resume(&self, job_id: &str) -> Result<(), ShellError> {
        self.state.operation(job_id)?.resume();
        Ok(())
    }

    /// Ask a job to stop; its terminal event follows once the archiver exits.
    pub fn cancel(&self, job_id: &str) -> Result<(), ShellError> {
        self.state.operation(job_id)?.cancel();
        Ok(())
    }

    pub fn resolve_conflict(
        &self,
        job_id: &str,
        decision: ConflictDecision,
    ) -> Result<(), ShellError> {
        self.state.operation(job_id)?.resolve_conflict(decision)?;
        Ok(())
    }

    pub fn resolve_password(
        &self,
        job_id: &str,
        password: impl Into<String>,
    ) -> Result<(), ShellError> {
        self.state.operation(job_id)?.resolve_password(password)?;
        Ok(())
    }

    /// Ids of jobs that have not terminated yet.
    pub fn jobs(&self) -> Vec<String> {
        self.state.job_ids()
    }

    /// List the entries of `archive`.
    pub async fn list(
        &self,
        archive: &Path,
        password: Option<&str>,
    ) -> Result<ArchiveListing, ShellError> {
        let config = self.driver.read().config().clone();
        Ok(archiver::list(&config, archive, password).await?)
    }

    /// Whether `path` looks like an archive the archiver can open.
    pub fn is_supported(path: &Path) -> bool {
        formats::is_supported_archive(path)
    }

    /// `path`, or the first `name (n).ext` next to it that is still free.
    pub fn unique_archive_path(path: &Path) -> Result<PathBuf, ShellError> {
        Ok(formats::unique_output_path(path)?)
    }

    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Replace the settings. A changed executable applies to jobs started afterwards.
    pub fn update_settings(&self, settings: Settings) -> Result<(), ShellError> {
        let binary_changed = self.settings.lock().binary_path != settings.binary_path;
        if binary_changed {
            let config = ArchiverConfig::resolve(settings.binary_path.as_deref())?;
            info!(binary = %config.binary.display(), "archiver changed");
            *self.driver.write() = ProcessDriver::new(Arc::new(config));
        }
        *self.settings.lock() = settings;
        Ok(())
    }

    /// Cancel every live job, wait for them to report, and persist settings.
    pub async fn shutdown(self) -> Result<(), ShellError> {
        let live = self.state.job_ids();
        if !live.is_empty() {
            info!(jobs = live.len(), "cancelling live jobs");
        }
        for job_id in &live {
            if let Ok(operation) = self.state.operation(job_id) {
                operation.cancel();
            }
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("job did not stop within the shutdown grace period");
            }
        }

        self.release_temp_dirs();

        if let Some(path) = &self.settings_path {
            let settings = self.settings.lock().clone();
            settings.save(path).await?;
        }
        Ok(())
    }

    /// Remove scratch directories, except those a still running job writes into.
    fn release_temp_dirs(&self) {
        let unfinished = self.state.job_ids();
        for (job_id, dir) in self.state.temp_dirs.lock().drain(..) {
            if unfinished.contains(&job_id) {
                let path = dir.keep();
                warn!(
                    %job_id,
                    path = %path.display(),
                    "job still running; leaving its scratch directory"
                );
            }
        }
    }

    /// Start `request` and forward its events until it terminates.
    fn launch(&self, request: OperationRequest) -> Result<String, ShellError> {
        let kind = request.kind;
        let archive = request.archive.clone();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let running = self.driver.read().start(request, tx)?;
        let job_id = running.id().to_string();

        self.state.jobs.lock().insert(
            job_id.clone(),
            JobHandle {
                operation: running.handle().clone(),
                kind,
                archive: archive.clone(),
            },
        );
        info!(%job_id, ?kind, archive = %archive.display(), "job started");

        let jobs = self.state.jobs.clone();
        let events = self.events.clone();
        let id = job_id.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let kind = ShellEventKind::from(event);
                // Deregister first so a collaborator reacting to the event
                // never sees a stale id
                if kind.is_terminal() {
                    if let Some(job) = jobs.lock().remove(&id) {
                        debug!(
                            job_id = %id,
                            kind = ?job.kind,
                            archive = %job.archive.display(),
                            "job deregistered"
                        );
                    }
                }
                let _ = events.send(ShellEvent {
                    job_id: id.clone(),
                    kind,
                });
            }

            let outcome = running.wait().await;
            // Still registered means the worker ended without reporting
            if jobs.lock().remove(&id).is_some() {
                warn!(job_id = %id, ?outcome, "job ended without a terminal event");
                let _ = events.send(ShellEvent {
                    job_id: id.clone(),
                    kind: outcome.into(),
                });
            }
            debug!(job_id = %id, "job forwarder done");
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);

        Ok(job_id)
    }
}

fn ensure_supported(archive: &Path) -> Result<(), ArchiverError> {
    if formats::is_supported_archive(archive) {
        Ok(())
    } else {
        Err(ArchiverError::InvalidRequest(format!(
            "{} is not a supported archive",
            archive.display()
        )))
    }
}

fn ensure_modifiable(archive: &Path) -> Result<(), ArchiverError> {
    if formats::supports_modification(archive) {
        Ok(())
    } else {
        Err(ArchiverError::InvalidRequest(format!(
            "{} cannot be modified; only 7z and zip archives support that",
            archive.display()
        )))
    }
}
