#![cfg(unix)]

use archiver::{
    ArchiverConfig, ArchiverError, ConflictDecision, OperationEvent, OperationRequest, Outcome,
    ProcessDriver, RunningOperation,
};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

const ETXTBSY: i32 = 26;

/// Helper to write a shell script standing in for 7-Zip
fn fake_archiver(dir: &Path, body: &str) -> ProcessDriver {
    let path = dir.join("7zz");
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    ProcessDriver::new(Arc::new(ArchiverConfig::with_binary(path)))
}

/// Start `request`, retrying while a freshly written script is still busy
fn start(
    driver: &ProcessDriver,
    request: OperationRequest,
) -> (RunningOperation, mpsc::UnboundedReceiver<OperationEvent>) {
    for _ in 0..50 {
        let (tx, rx) = mpsc::unbounded_channel();
        match driver.start(request.clone(), tx) {
            Ok(running) => return (running, rx),
            Err(ArchiverError::Spawn { source, .. }) if source.raw_os_error() == Some(ETXTBSY) => {
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => panic!("failed to start fake archiver: {e}"),
        }
    }
    panic!("fake archiver stayed busy");
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<OperationEvent>) -> OperationEvent {
    timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed early")
}

/// Collect events up to and including the terminal one
async fn collect(rx: &mut mpsc::UnboundedReceiver<OperationEvent>) -> Vec<OperationEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, OperationEvent::Terminated(_));
        events.push(event);
        if done {
            return events;
        }
    }
}

/// Drain the channel until the worker drops its sender
async fn drain_all(rx: &mut mpsc::UnboundedReceiver<OperationEvent>) -> Vec<OperationEvent> {
    let mut events = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out draining events")
    {
        events.push(event);
    }
    events
}

fn terminals(events: &[OperationEvent]) -> Vec<Outcome> {
    events
        .iter()
        .filter_map(|e| match e {
            OperationEvent::Terminated(outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}

const CONFLICT_SCRIPT: &str = r#"printf 'Extracting archive: a.7z\n'
printf 'Would you like to replace the existing file:\n'
printf '  Path:     ./a.txt\n  Size:     5 bytes\n  Modified: 2024-01-01 10:00:00\n'
printf 'with the file from archive:\n'
printf '  Path:     a.txt\n  Size:     7 bytes\n  Modified: 2024-02-01 10:00:00\n'
printf '? (Y)es / (N)o / (A)lways / (S)kip all / A(u)to rename all / (Q)uit?'
head -c 2 > "$ANSWER_FILE"
printf '\nEverything is Ok\n'
"#;

#[tokio::test]
async fn test_progress_then_finished() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"printf '  45%%  3 files\n'
printf '  72%%\b\b\b\b\b     \b\b\b\b\b 100%%\n'
printf 'Everything is Ok\n'
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::extract("a.7z", vec![], "out"));
    let events = collect(&mut rx).await;

    assert_eq!(
        events,
        vec![
            OperationEvent::Progress {
                percent: 45,
                message: "45%  3 files".to_string()
            },
            OperationEvent::Progress {
                percent: 72,
                message: "72%".to_string()
            },
            OperationEvent::Progress {
                percent: 100,
                message: "100%".to_string()
            },
            OperationEvent::Message {
                line: "Everything is Ok".to_string()
            },
            OperationEvent::Terminated(Outcome::Finished),
        ]
    );
    assert_eq!(running.wait().await, Outcome::Finished);
}

#[tokio::test]
async fn test_stderr_output_fails_operation() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"printf 'Cannot open encrypted archive. Wrong password?\n' >&2
exit 2
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::test("a.7z"));
    let events = collect(&mut rx).await;

    let expected = Outcome::Failed("Cannot open encrypted archive. Wrong password?".to_string());
    assert_eq!(terminals(&events), vec![expected.clone()]);
    assert_eq!(running.wait().await, expected);
}

#[tokio::test]
async fn test_each_conflict_decision_writes_one_token() {
    for decision in ConflictDecision::ALL {
        let temp_dir = TempDir::new().unwrap();
        let answer_file = temp_dir.path().join("answer");
        let script = format!(
            "ANSWER_FILE='{}'\n{}",
            answer_file.display(),
            CONFLICT_SCRIPT
        );
        let driver = fake_archiver(temp_dir.path(), &script);

        let (running, mut rx) = start(&driver, OperationRequest::extract("a.7z", vec![], "out"));
        let handle = running.handle().clone();

        let prompt = loop {
            match next_event(&mut rx).await {
                OperationEvent::Conflict(prompt) => break prompt,
                OperationEvent::Terminated(outcome) => panic!("ended before prompt: {outcome:?}"),
                _ => {}
            }
        };
        assert_eq!(prompt.existing[0], "Path:     ./a.txt");
        assert_eq!(prompt.incoming[1], "Size:     7 bytes");

        handle.resolve_conflict(decision).unwrap();
        // Only one answer per prompt
        assert!(matches!(
            handle.resolve_conflict(decision),
            Err(ArchiverError::NoPendingPrompt(_))
        ));

        assert_eq!(running.wait().await, Outcome::Finished);
        let written = fs::read_to_string(&answer_file).unwrap();
        assert_eq!(written, format!("{}\n", decision.token()));
    }
}

#[tokio::test]
async fn test_password_prompt_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"printf 'Extracting archive: secret.7z\n'
printf 'Enter password (will not be echoed):'
read pw
if [ "$pw" = "hunter2" ]; then
  printf '\nEverything is Ok\n'
else
  printf 'Wrong password\n' >&2
  exit 2
fi
"#,
    );

    for (password, expected) in [
        ("hunter2", Outcome::Finished),
        ("nope", Outcome::Failed("Wrong password".to_string())),
    ] {
        let (running, mut rx) =
            start(&driver, OperationRequest::extract("secret.7z", vec![], "out"));
        let handle = running.handle().clone();

        loop {
            match next_event(&mut rx).await {
                OperationEvent::PasswordRequired => break,
                OperationEvent::Terminated(outcome) => panic!("ended before prompt: {outcome:?}"),
                _ => {}
            }
        }
        handle.resolve_password(password).unwrap();

        let events = collect(&mut rx).await;
        assert_eq!(terminals(&events), vec![expected.clone()]);
        assert_eq!(running.wait().await, expected);
        assert!(matches!(
            handle.resolve_password("too late"),
            Err(ArchiverError::NoPendingPrompt(_))
        ));
    }
}

#[tokio::test]
async fn test_cancel_reports_break_as_aborted() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"trap 'printf "\nBreak signaled\n" >&2; exit 255' TERM
printf '  10%%\n'
while true; do sleep 0.1; done
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::extract("a.7z", vec![], "out"));
    let handle = running.handle().clone();

    assert!(matches!(
        next_event(&mut rx).await,
        OperationEvent::Progress { percent: 10, .. }
    ));
    handle.cancel();
    assert!(handle.is_cancelled());

    let events = drain_all(&mut rx).await;
    assert_eq!(terminals(&events), vec![Outcome::Aborted]);
    assert!(handle.has_exited());
    assert_eq!(running.wait().await, Outcome::Aborted);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_password() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"printf 'Enter password:'
read pw
read again
printf 'unreachable\n'
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::test("a.7z"));
    let handle = running.handle().clone();

    assert_eq!(next_event(&mut rx).await, OperationEvent::PasswordRequired);
    handle.cancel();
    // A second cancel is harmless
    handle.cancel();

    let events = drain_all(&mut rx).await;
    assert_eq!(terminals(&events), vec![Outcome::Aborted]);
    assert!(matches!(
        handle.resolve_password("late"),
        Err(ArchiverError::NoPendingPrompt(_))
    ));
    assert_eq!(running.wait().await, Outcome::Aborted);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_conflict() {
    let temp_dir = TempDir::new().unwrap();
    let answer_file = temp_dir.path().join("answer");
    let script = format!(
        "ANSWER_FILE='{}'\n{}",
        answer_file.display(),
        CONFLICT_SCRIPT
    );
    let driver = fake_archiver(temp_dir.path(), &script);

    let (running, mut rx) = start(&driver, OperationRequest::extract("a.7z", vec![], "out"));
    let handle = running.handle().clone();

    loop {
        if let OperationEvent::Conflict(_) = next_event(&mut rx).await {
            break;
        }
    }
    handle.cancel();

    let events = drain_all(&mut rx).await;
    assert_eq!(terminals(&events), vec![Outcome::Aborted]);
    assert_eq!(running.wait().await, Outcome::Aborted);
}

#[tokio::test]
async fn test_pause_and_resume_are_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"printf '  10%%\n'
sleep 1
printf '100%%\n'
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::test("a.7z"));
    let handle = running.handle().clone();

    // Resume while running does nothing
    handle.resume();
    assert!(!handle.is_paused());

    assert!(matches!(
        next_event(&mut rx).await,
        OperationEvent::Progress { percent: 10, .. }
    ));

    handle.pause();
    handle.pause();
    assert!(handle.is_paused());

    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.resume();
    handle.resume();
    assert!(!handle.is_paused());

    let events = collect(&mut rx).await;
    assert_eq!(terminals(&events), vec![Outcome::Finished]);
    assert_eq!(running.wait().await, Outcome::Finished);

    // Controls after exit are no-ops
    handle.pause();
    assert!(!handle.is_paused());
    handle.cancel();
}

#[tokio::test]
async fn test_pause_suspends_output_until_resume() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"i=0
while [ $i -le 100 ]; do
  printf '%d%%\n' $i
  i=$((i+1))
  sleep 0.05
done
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::test("a.7z"));
    let handle = running.handle().clone();

    assert!(matches!(
        next_event(&mut rx).await,
        OperationEvent::Progress { percent: 0, .. }
    ));
    handle.pause();

    // Let anything written before the stop reach the channel, then discard it
    tokio::time::sleep(Duration::from_millis(100)).await;
    while rx.try_recv().is_ok() {}

    let quiet = timeout(Duration::from_millis(300), rx.recv()).await;
    assert!(quiet.is_err(), "stopped archiver still produced {quiet:?}");

    handle.resume();
    assert!(matches!(
        next_event(&mut rx).await,
        OperationEvent::Progress { .. }
    ));

    handle.cancel();
    let events = drain_all(&mut rx).await;
    assert_eq!(terminals(&events), vec![Outcome::Aborted]);
    assert_eq!(running.wait().await, Outcome::Aborted);
}

#[tokio::test]
async fn test_output_ending_inside_conflict_fails_from_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"printf 'Would you like to replace the existing file:\n'
printf '  Path:     ./a.txt\n  Size:     5 bytes\n'
printf 'ERROR: Unexpected end of input\n' >&2
exit 2
"#,
    );

    let (running, mut rx) = start(&driver, OperationRequest::extract("a.7z", vec![], "out"));
    let events = drain_all(&mut rx).await;

    assert!(!events
        .iter()
        .any(|e| matches!(e, OperationEvent::Conflict(_))));
    let expected = Outcome::Failed("ERROR: Unexpected end of input".to_string());
    assert_eq!(terminals(&events), vec![expected.clone()]);
    assert_eq!(running.wait().await, expected);
}

#[tokio::test]
async fn test_add_into_subdir_runs_rename_steps() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("calls.log");
    let script = format!(
        "printf '%s\\n' \"$*\" >> '{}'\nprintf '100%%\\n'\n",
        log.display()
    );
    let driver = fake_archiver(temp_dir.path(), &script);

    let request = OperationRequest::add(
        "a.7z",
        vec!["/data/one.txt".into(), "two.txt".into()],
        Some("docs".into()),
    );
    let (running, mut rx) = start(&driver, request);

    let events = collect(&mut rx).await;
    assert_eq!(terminals(&events), vec![Outcome::Finished]);
    assert_eq!(running.wait().await, Outcome::Finished);

    let calls = fs::read_to_string(&log).unwrap();
    assert_eq!(
        calls.lines().collect::<Vec<_>>(),
        vec![
            "a a.7z /data/one.txt two.txt -bsp1",
            "rn a.7z one.txt docs/one.txt -bsp1",
            "rn a.7z two.txt docs/two.txt -bsp1",
        ]
    );
}

#[tokio::test]
async fn test_failed_step_stops_composite_add() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("calls.log");
    let script = format!(
        "printf '%s\\n' \"$*\" >> '{}'\nprintf 'Unsupported archive type\\n' >&2\nexit 2\n",
        log.display()
    );
    let driver = fake_archiver(temp_dir.path(), &script);

    let request = OperationRequest::add("a.tar", vec!["one.txt".into()], Some("docs".into()));
    let (running, _rx) = start(&driver, request);

    assert_eq!(
        running.wait().await,
        Outcome::Failed("Unsupported archive type".to_string())
    );
    assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 1);
}

#[tokio::test]
async fn test_list_parses_fake_output() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        r#"cat <<'EOF'
   Date      Time    Attr         Size   Compressed  Name
------------------- ----- ------------ ------------  ------------------------
2024-03-01 09:15:42 D....            0            0  docs
2024-03-01 09:15:42 ....A         1200          380  docs/readme.txt
------------------- ----- ------------ ------------  ------------------------
EOF
"#,
    );

    let mut listing = None;
    for _ in 0..50 {
        match archiver::list(driver.config(), Path::new("a.7z"), None).await {
            Ok(result) => {
                listing = Some(result);
                break;
            }
            Err(ArchiverError::Spawn { source, .. }) if source.raw_os_error() == Some(ETXTBSY) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("listing failed: {e}"),
        }
    }
    let listing = listing.expect("fake archiver stayed busy");

    assert_eq!(listing.entries.len(), 2);
    assert!(listing.entries[0].is_directory);
    assert_eq!(listing.entries[1].path, "docs/readme.txt");
    assert_eq!(listing.total_size(), 1200);
}

#[tokio::test]
async fn test_list_reports_stderr() {
    let temp_dir = TempDir::new().unwrap();
    let driver = fake_archiver(
        temp_dir.path(),
        "printf 'Can not open the file as archive\\n' >&2\nexit 2\n",
    );

    let result = loop {
        match archiver::list(driver.config(), Path::new("a.7z"), None).await {
            Err(ArchiverError::Spawn { source, .. }) if source.raw_os_error() == Some(ETXTBSY) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            other => break other,
        }
    };
    assert!(matches!(
        result,
        Err(ArchiverError::ToolFailure(message)) if message == "Can not open the file as archive"
    ));
}
