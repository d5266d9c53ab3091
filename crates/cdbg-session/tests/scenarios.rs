//! Integration scenarios: cancel-while-queued never reaches the debugger,
//! consecutive cheap commands coalesce into one round trip, an excluded
//! command forces an immediate flush, and a lost stdout stream faults the
//! session. Uses a fake `cdb.exe` shell script (no real debugger involved)
//! so these run in any CI environment.

use std::path::PathBuf;
use std::time::Duration;

use cdbg_config::CdbgConfig;
use cdbg_core::{CommandState, SessionId, SessionState};
use cdbg_session::SessionHandle;

fn write_script(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("cdb.exe");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{contents}").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A fake debugger that echoes each sentinel line back verbatim and turns
/// every non-sentinel token into `out:<token>`, counting round trips (one
/// tick per line read from stdin) into `counter_path` for tests that need
/// to observe how many times the debugger was actually invoked.
fn echo_script(counter_path: &std::path::Path) -> String {
    format!(
        r#"
while IFS= read -r line; do
  echo tick >> {counter}
  printf '%s' "$line" | tr ';' '\n' | while IFS= read -r tok; do
    tok=$(printf '%s' "$tok" | sed -e 's/^ *//' -e 's/ *$//')
    case "$tok" in
      .echo\ *) printf '%s\n' "${{tok#.echo }}" ;;
      *) [ -n "$tok" ] && printf 'out:%s\n' "$tok" ;;
    esac
  done
done
"#,
        counter = counter_path.display()
    )
}

/// A fake debugger that reads exactly one line, then exits, closing its
/// stdout before any sentinel is ever written back.
const CRASH_SCRIPT: &str = r#"
read -r _ignored
exit 0
"#;

fn test_config(cdb_path: PathBuf) -> CdbgConfig {
    let mut config = CdbgConfig::default();
    config.process.executable_override = Some(cdb_path);
    config.process.startup_delay = Duration::from_millis(1);
    config
}

#[tokio::test]
async fn cancel_while_queued_never_reaches_debugger() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("ticks");
    let cdb = write_script(&dir, &echo_script(&counter));

    let session = SessionHandle::open(
        SessionId::from("cancel-test".to_string()),
        test_config(cdb),
        PathBuf::from("/dumps/crash.dmp"),
        None,
    );

    let id = session.enqueue("lm").unwrap();
    assert!(session.cancel(&id));

    let info = session
        .wait_for_info(&id, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(info.state, CommandState::Cancelled);

    // Give the (now-Active) consumer loop time to prove it skips dispatch.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !counter.exists(),
        "a command cancelled while still queued must never reach the debugger"
    );

    session.close().await;
}

#[tokio::test]
async fn consecutive_cheap_commands_coalesce_into_one_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("ticks");
    let cdb = write_script(&dir, &echo_script(&counter));

    let mut config = test_config(cdb);
    config.batching.enabled = true;
    config.batching.max_batch_size = 10;

    let session = SessionHandle::open(
        SessionId::from("batch-test".to_string()),
        config,
        PathBuf::from("/dumps/crash.dmp"),
        None,
    );

    let id1 = session.enqueue("lm").unwrap();
    let id2 = session.enqueue("r eax").unwrap();

    let info1 = session
        .wait_for_info(&id1, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    let info2 = session
        .wait_for_info(&id2, Some(Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(info1.state, CommandState::Completed);
    assert_eq!(info2.state, CommandState::Completed);
    assert_eq!(info1.aggregated_output.as_deref(), Some("out:lm\n"));
    assert_eq!(info2.aggregated_output.as_deref(), Some("out:r eax\n"));

    let ticks = std::fs::read_to_string(&counter).unwrap_or_default();
    assert_eq!(
        ticks.lines().count(),
        1,
        "two commands enqueued back-to-back should coalesce into a single debugger round trip"
    );

    session.close().await;
}

#[tokio::test]
async fn excluded_command_forces_an_immediate_flush() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("ticks");
    let cdb = write_script(&dir, &echo_script(&counter));

    let mut config = test_config(cdb);
    config.batching.enabled = true;
    config.batching.max_batch_size = 10;
    // Long enough that a natural timer flush would blow past the 5s wait
    // below; only the exclusion forcing an early flush keeps this fast.
    config.batching.batch_wait_timeout_ms = 5_000;

    let session = SessionHandle::open(
        SessionId::from("exclude-test".to_string()),
        config,
        PathBuf::from("/dumps/crash.dmp"),
        None,
    );

    let buffered = session.enqueue("lm").unwrap();
    let excluded = session.enqueue("!analyze -v").unwrap();

    let info_buffered = session
        .wait_for_info(&buffered, Some(Duration::from_secs(2)))
        .await
        .unwrap();
    let info_excluded = session
        .wait_for_info(&excluded, Some(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(info_buffered.state, CommandState::Completed);
    assert_eq!(info_excluded.state, CommandState::Completed);

    let ticks = std::fs::read_to_string(&counter).unwrap_or_default();
    assert_eq!(
        ticks.lines().count(),
        2,
        "the excluded command must flush the pending batch and then run its own solo round trip"
    );

    session.close().await;
}

#[tokio::test]
async fn session_faults_when_debugger_closes_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let cdb = write_script(&dir, CRASH_SCRIPT);

    let mut config = test_config(cdb);
    config.batching.enabled = false;

    let session = SessionHandle::open(
        SessionId::from("crash-test".to_string()),
        config,
        PathBuf::from("/dumps/crash.dmp"),
        None,
    );

    let id = session.enqueue("lm").unwrap();
    let info = session
        .wait_for_info(&id, Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(info.state, CommandState::Failed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Faulted);
}
