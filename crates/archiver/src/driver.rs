//! Subprocess lifecycle for archiver operations.
//!
//! [`ProcessDriver::start`] spawns the archiver and hands the child to a tokio
//! task that streams standard output through a [`StreamInterpreter`]. The
//! caller keeps an [`OperationHandle`] to pause, resume, cancel and answer
//! prompts while events arrive on an mpsc channel.

use crate::command;
use crate::config::ArchiverConfig;
use crate::control::{self, ControlSignal};
use crate::error::ArchiverError;
use crate::interpreter::{StreamEvent, StreamInterpreter};
use crate::types::{ConflictDecision, OperationEvent, OperationKind, OperationRequest, Outcome};
use parking_lot::Mutex;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Printed on the error channel when 7-Zip intercepts a termination signal.
pub const BREAK_MARKER: &str = "Break signaled";

/// Reply channel for the prompt the worker is currently blocked on.
enum PendingPrompt {
    Conflict(oneshot::Sender<ConflictDecision>),
    Password(oneshot::Sender<String>),
}

/// State shared between an [`OperationHandle`] and its worker.
#[derive(Default)]
struct Shared {
    pid: AtomicU32,
    paused: AtomicBool,
    cancelled: AtomicBool,
    exited: AtomicBool,
    pending: Mutex<Option<PendingPrompt>>,
    kill_requested: Notify,
}

impl Shared {
    fn attach(&self, child: &Child) {
        let pid = child.id().unwrap_or(0);
        self.pid.store(pid, Ordering::SeqCst);
        self.exited.store(false, Ordering::SeqCst);
        // A cancel that landed while no child was attached has no target yet
        if self.is_cancelled() {
            control::send_signal(pid, ControlSignal::Terminate);
            return;
        }
        // A follow-up step spawned while paused starts out paused too
        if self.paused.load(Ordering::SeqCst) {
            control::send_signal(pid, ControlSignal::Stop);
        }
    }

    fn install(&self, prompt: PendingPrompt) {
        *self.pending.lock() = Some(prompt);
    }

    fn clear_pending(&self) {
        self.pending.lock().take();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Control surface of a running operation. Cheap to clone.
#[derive(Clone)]
pub struct OperationHandle {
    id: Uuid,
    kind: OperationKind,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("paused", &self.is_paused())
            .field("cancelled", &self.is_cancelled())
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl OperationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    pub fn has_exited(&self) -> bool {
        self.shared.exited.load(Ordering::SeqCst)
    }

    /// Suspend the archiver. No-op when already paused or exited.
    pub fn pause(&self) {
        if self.has_exited() {
            return;
        }
        if !control::supports_suspend() {
            warn!(id = %self.id, "pause is not supported on this platform");
            return;
        }
        if self
            .shared
            .paused
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            control::send_signal(self.shared.pid.load(Ordering::SeqCst), ControlSignal::Stop);
            debug!(id = %self.id, "paused");
        }
    }

    /// Continue a paused archiver. No-op when not paused.
    pub fn resume(&self) {
        if self
            .shared
            .paused
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
            && !self.has_exited()
        {
            control::send_signal(
                self.shared.pid.load(Ordering::SeqCst),
                ControlSignal::Continue,
            );
            debug!(id = %self.id, "resumed");
        }
    }

    /// Ask the archiver to stop.
    ///
    /// Any prompt the worker is waiting on resolves to its safe default
    /// (`Quit` or an empty password). The terminal event still arrives once
    /// the process has actually exited.
    pub fn cancel(&self) {
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(id = %self.id, "cancel requested");

        if !self.has_exited() {
            let pid = self.shared.pid.load(Ordering::SeqCst);
            control::send_signal(pid, ControlSignal::Terminate);
            // A stopped process only acts on SIGTERM once continued
            if self.shared.paused.swap(false, Ordering::SeqCst) {
                control::send_signal(pid, ControlSignal::Continue);
            }
        }

        self.shared.clear_pending();
        self.shared.kill_requested.notify_one();
    }

    /// Answer the outstanding overwrite prompt.
    pub fn resolve_conflict(&self, decision: ConflictDecision) -> Result<(), ArchiverError> {
        let mut slot = self.shared.pending.lock();
        match slot.take() {
            Some(PendingPrompt::Conflict(tx)) => {
                // The worker may have gone away; nothing left to answer then
                let _ = tx.send(decision);
                Ok(())
            }
            other => {
                *slot = other;
                Err(ArchiverError::NoPendingPrompt("conflict"))
            }
        }
    }

    /// Answer the outstanding password prompt. Empty passwords are allowed.
    pub fn resolve_password(&self, password: impl Into<String>) -> Result<(), ArchiverError> {
        let mut slot = self.shared.pending.lock();
        match slot.take() {
            Some(PendingPrompt::Password(tx)) => {
                let _ = tx.send(password.into());
                Ok(())
            }
            other => {
                *slot = other;
                Err(ArchiverError::NoPendingPrompt("password"))
            }
        }
    }
}

/// A started operation: its handle plus the worker producing the outcome.
pub struct RunningOperation {
    handle: OperationHandle,
    task: JoinHandle<Outcome>,
}

impl RunningOperation {
    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(format!("Worker task failed: {}", e)),
        }
    }
}

/// Launches archiver operations against a resolved executable.
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    config: Arc<ArchiverConfig>,
}

impl ProcessDriver {
    pub fn new(config: Arc<ArchiverConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<ArchiverConfig> {
        &self.config
    }

    /// Spawn the archiver for `request` and start streaming its output.
    ///
    /// Returns as soon as the process is running. Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is malformed or the executable cannot
    /// be launched. Everything after a successful spawn is reported through
    /// `events` and the operation's [`Outcome`].
    pub fn start(
        &self,
        request: OperationRequest,
        events: mpsc::UnboundedSender<OperationEvent>,
    ) -> Result<RunningOperation, ArchiverError> {
        let mut steps = command::plan(&request)?.into_iter();
        let first = steps
            .next()
            .ok_or_else(|| ArchiverError::InvalidRequest("empty command plan".into()))?;

        let child = spawn_archiver(&self.config.binary, &first)?;

        let shared = Arc::new(Shared::default());
        shared.attach(&child);

        let id = Uuid::new_v4();
        info!(
            %id,
            kind = ?request.kind,
            archive = %request.archive.display(),
            "operation started"
        );

        let worker = Worker {
            id,
            kind: request.kind,
            binary: self.config.binary.clone(),
            shared: shared.clone(),
            events,
        };
        let task = tokio::spawn(worker.run(child, steps.collect()));

        Ok(RunningOperation {
            handle: OperationHandle {
                id,
                kind: request.kind,
                shared,
            },
            task,
        })
    }
}

/// Decide the terminal outcome from what the archiver left behind.
///
/// `Break signaled` on the error channel, or a cancelled process that did not
/// exit cleanly, is an abort. Otherwise an empty error channel means success
/// and anything else is reported as the failure text.
pub fn determine_outcome(stderr: &str, cancel_requested: bool, exit_success: bool) -> Outcome {
    if stderr.contains(BREAK_MARKER) {
        return Outcome::Aborted;
    }
    if cancel_requested && !exit_success {
        return Outcome::Aborted;
    }
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        Outcome::Finished
    } else {
        Outcome::Failed(trimmed.to_string())
    }
}

fn spawn_archiver(binary: &Path, args: &[OsString]) -> Result<Child, ArchiverError> {
    debug!(
        binary = %binary.display(),
        args = %command::redacted(args),
        "spawning archiver"
    );
    Command::new(binary)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ArchiverError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })
}

struct Worker {
    id: Uuid,
    kind: OperationKind,
    binary: PathBuf,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<OperationEvent>,
}

impl Worker {
    async fn run(self, first: Child, follow_up: Vec<Vec<OsString>>) -> Outcome {
        let mut outcome = self.drive(first).await;

        for args in follow_up {
            if outcome != Outcome::Finished {
                break;
            }
            if self.shared.is_cancelled() {
                outcome = Outcome::Aborted;
                break;
            }
            outcome = match spawn_archiver(&self.binary, &args) {
                Ok(child) => {
                    self.shared.attach(&child);
                    self.drive(child).await
                }
                Err(e) => Outcome::Failed(e.to_string()),
            };
        }

        match &outcome {
            Outcome::Finished => info!(id = %self.id, kind = ?self.kind, "operation finished"),
            Outcome::Aborted => info!(id = %self.id, kind = ?self.kind, "operation aborted"),
            Outcome::Failed(error) => {
                warn!(id = %self.id, kind = ?self.kind, %error, "operation failed")
            }
        }

        self.emit(OperationEvent::Terminated(outcome.clone()));
        outcome
    }

    /// Stream one child process to completion.
    async fn drive(&self, mut child: Child) -> Outcome {
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Outcome::Failed("Archiver output was not captured".to_string());
        };
        let mut stdin = child.stdin.take();

        // Drained concurrently so a chatty error channel cannot fill its pipe
        let stderr_task = tokio::spawn(drain(stderr));

        let mut reader = BufReader::new(stdout);
        let mut interpreter = StreamInterpreter::new();

        loop {
            let byte = tokio::select! {
                read = reader.read_u8() => match read {
                    Ok(byte) => byte,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        warn!(id = %self.id, error = %e, "reading archiver output failed");
                        break;
                    }
                },
                _ = self.shared.kill_requested.notified() => {
                    force_kill(&mut child);
                    continue;
                }
            };

            if let Some(event) = interpreter.push(byte) {
                self.dispatch(event, &mut stdin).await;
            }
        }

        match interpreter.finish() {
            Ok(Some(event @ (StreamEvent::Progress { .. } | StreamEvent::Line(_)))) => {
                self.dispatch(event, &mut stdin).await;
            }
            Ok(Some(event)) => {
                debug!(id = %self.id, ?event, "prompt at end of output ignored");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(id = %self.id, error = %e, "archiver output ended inside an overwrite prompt");
            }
        }

        drop(stdin);
        let status = child.wait().await;
        self.shared.exited.store(true, Ordering::SeqCst);

        let exit_success = match &status {
            Ok(status) => {
                debug!(id = %self.id, %status, "archiver exited");
                status.success()
            }
            Err(e) => {
                warn!(id = %self.id, error = %e, "failed to wait for archiver");
                false
            }
        };
        let stderr_text = stderr_task.await.unwrap_or_default();

        determine_outcome(&stderr_text, self.shared.is_cancelled(), exit_success)
    }

    async fn dispatch(&self, event: StreamEvent, stdin: &mut Option<ChildStdin>) {
        match event {
            StreamEvent::Progress { percent, line } => {
                self.emit(OperationEvent::Progress {
                    percent,
                    message: line,
                });
            }
            StreamEvent::Line(line) => {
                debug!(id = %self.id, %line, "archiver output");
                self.emit(OperationEvent::Message { line });
            }
            StreamEvent::Conflict(prompt) => {
                let (tx, rx) = oneshot::channel();
                self.shared.install(PendingPrompt::Conflict(tx));
                self.emit(OperationEvent::Conflict(prompt));

                let decision = if self.shared.is_cancelled() {
                    self.shared.clear_pending();
                    ConflictDecision::Quit
                } else {
                    rx.await.unwrap_or(ConflictDecision::Quit)
                };
                debug!(id = %self.id, ?decision, "overwrite prompt answered");
                write_line(stdin, &decision.token().to_string()).await;
            }
            StreamEvent::PasswordPrompt => {
                let (tx, rx) = oneshot::channel();
                self.shared.install(PendingPrompt::Password(tx));
                self.emit(OperationEvent::PasswordRequired);

                let password = if self.shared.is_cancelled() {
                    self.shared.clear_pending();
                    String::new()
                } else {
                    rx.await.unwrap_or_default()
                };
                debug!(id = %self.id, "password prompt answered");
                write_line(stdin, &password).await;
            }
        }
    }

    fn emit(&self, event: OperationEvent) {
        // Nobody listening is fine; the outcome is still returned by `wait`
        let _ = self.events.send(event);
    }
}

async fn write_line(stdin: &mut Option<ChildStdin>, text: &str) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let mut payload = String::with_capacity(text.len() + 1);
    payload.push_str(text);
    payload.push('\n');

    let result = match pipe.write_all(payload.as_bytes()).await {
        Ok(()) => pipe.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!(error = %e, "archiver input closed");
        *stdin = None;
    }
}

async fn drain(mut stderr: ChildStderr) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        debug!(error = %e, "reading archiver error channel failed");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Deliver SIGTERM to the child currently being driven.
///
/// Repeats the signal from `OperationHandle::cancel`, which may have been
/// sent before this child was attached.
#[cfg(unix)]
fn force_kill(child: &mut Child) {
    if let Some(pid) = child.id() {
        control::send_signal(pid, ControlSignal::Terminate);
    }
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "archiver already gone");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_empty_stderr_is_finished() {
        assert_eq!(determine_outcome("", false, true), Outcome::Finished);
        assert_eq!(determine_outcome("\n  \n", false, false), Outcome::Finished);
    }

    #[test]
    fn test_outcome_break_is_aborted() {
        assert_eq!(determine_outcome("Break signaled", false, false), Outcome::Aborted);
        assert_eq!(
            determine_outcome("\nERROR:\nBreak signaled\n", true, false),
            Outcome::Aborted
        );
    }

    #[test]
    fn test_outcome_failure_text_is_kept() {
        assert_eq!(
            determine_outcome("Cannot open encrypted archive. Wrong password?\n", false, false),
            Outcome::Failed("Cannot open encrypted archive. Wrong password?".to_string())
        );
        assert_eq!(
            determine_outcome("\nERROR: a.7z\n  Unexpected end of archive\n\n", false, false),
            Outcome::Failed("ERROR: a.7z\n  Unexpected end of archive".to_string())
        );
    }

    #[test]
    fn test_outcome_cancelled_nonzero_exit_is_aborted() {
        assert_eq!(determine_outcome("", true, false), Outcome::Aborted);
        assert_eq!(determine_outcome("Terminated", true, false), Outcome::Aborted);
        // Cancel arrived after a clean exit
        assert_eq!(determine_outcome("", true, true), Outcome::Finished);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_attach_after_cancel_terminates_child() {
        use std::os::unix::process::ExitStatusExt;

        let shared = Shared::default();
        shared.cancelled.store(true, Ordering::SeqCst);
        shared.exited.store(true, Ordering::SeqCst);

        let mut child = Command::new("sleep")
            .arg("5")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        shared.attach(&child);

        let status = tokio::time::timeout(std::time::Duration::from_secs(3), child.wait())
            .await
            .expect("cancelled child kept running")
            .unwrap();
        assert_eq!(status.signal(), Some(15));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails_immediately() {
        let driver = ProcessDriver::new(Arc::new(ArchiverConfig::with_binary(
            "/nonexistent/definitely-not-7zz",
        )));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = driver.start(OperationRequest::test("a.7z"), tx);
        assert!(matches!(result, Err(ArchiverError::Spawn { .. })));
    }
}
