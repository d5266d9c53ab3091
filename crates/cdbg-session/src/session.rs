//! `DebugSession`: the state machine wiring a queue, a batch processor, and
//! a process adapter together into one addressable session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use cdbg_batch::BatchProcessor;
use cdbg_config::CdbgConfig;
use cdbg_core::{
    CancelReason, CommandId, CommandInfo, CommandStateChanged, CoreError, SessionId,
    SessionState, SessionStateChanged,
};
use cdbg_process::{DebuggerAdapter, SpawnArgs};
use cdbg_queue::CommandQueue;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{info, warn};

struct Inner {
    session_id: SessionId,
    config: CdbgConfig,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionStateChanged>,
    queue: CommandQueue,
    batch: AsyncMutex<Option<BatchProcessor>>,
    fault_cause: StdMutex<Option<String>>,
    last_activity: StdMutex<Instant>,
}

/// A cheap, cloneable handle to one open debugger session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

impl SessionHandle {
    /// Open a session against `dump_path`: spawns the background driver
    /// task (`Initializing` -> spawn adapter -> `Active`) and returns
    /// immediately. Commands may be enqueued before the session reaches
    /// `Active`; they simply wait in the queue.
    pub fn open(session_id: SessionId, config: CdbgConfig, dump_path: PathBuf, symbol_path: Option<PathBuf>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Initializing);
        let (events_tx, _) = broadcast::channel(64);
        let queue = CommandQueue::with_heartbeat_interval(
            session_id.clone(),
            config.command_timeout,
            config.process.heartbeat_interval,
        );

        let handle = Self {
            inner: Arc::new(Inner {
                session_id,
                config,
                state: state_tx,
                events: events_tx,
                queue,
                batch: AsyncMutex::new(None),
                fault_cause: StdMutex::new(None),
                last_activity: StdMutex::new(Instant::now()),
            }),
        };

        let mut spawn_args = SpawnArgs::new(dump_path);
        spawn_args.symbol_path = symbol_path;

        let driver = handle.clone();
        tokio::spawn(async move { driver.drive(spawn_args).await });

        handle
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn fault_cause(&self) -> Option<String> {
        self.inner.fault_cause.lock().unwrap().clone()
    }

    pub fn last_activity(&self) -> Instant {
        *self.inner.last_activity.lock().unwrap()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<SessionStateChanged> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<CommandStateChanged> {
        self.inner.queue.subscribe()
    }

    pub fn subscribe_heartbeats(&self) -> broadcast::Receiver<cdbg_core::CommandHeartbeat> {
        self.inner.queue.subscribe_heartbeats()
    }

    /// Enqueue a command. Rejects with `SessionFaulted` once the session
    /// has left `Initializing`/`Active` (spec.md §4.6: "Closing: no new
    /// commands accepted").
    pub fn enqueue(&self, raw: &str) -> Result<CommandId, CoreError> {
        match self.state() {
            SessionState::Initializing | SessionState::Active => {}
            _ => {
                return Err(CoreError::SessionFaulted {
                    session_id: self.inner.session_id.clone(),
                    cause: self
                        .fault_cause()
                        .unwrap_or_else(|| format!("session is {}", self.state())),
                });
            }
        }
        self.touch();
        self.inner.queue.enqueue(raw)
    }

    pub fn get_info(&self, id: &CommandId) -> Option<CommandInfo> {
        self.touch();
        self.inner.queue.get_info(id)
    }

    pub fn get_all_infos(&self) -> HashMap<CommandId, CommandInfo> {
        self.touch();
        self.inner.queue.get_all_infos()
    }

    pub fn cancel(&self, id: &CommandId) -> bool {
        self.touch();
        self.inner.queue.cancel(id, CancelReason::UserRequest)
    }

    pub async fn wait_for_info(
        &self,
        id: &CommandId,
        deadline: Option<Duration>,
    ) -> Result<CommandInfo, CoreError> {
        self.touch();
        self.inner.queue.wait_for_info(id, deadline).await
    }

    /// Close the session: stop accepting new commands, let (or cancel) any
    /// in-flight command per configuration, quit the debugger, and
    /// transition to `Closed`.
    pub async fn close(&self) {
        let current = self.state();
        if matches!(
            current,
            SessionState::Closing | SessionState::Closed | SessionState::Faulted
        ) {
            return;
        }
        self.transition(SessionState::Closing);

        if self.inner.config.process.cancel_in_flight_on_close {
            self.inner.queue.cancel_all(CancelReason::SessionClose);
        } else {
            self.inner.queue.cancel_all_queued(CancelReason::SessionClose);
        }

        let processor = self.inner.batch.lock().await.clone();

        // Spec.md §4.5 point 3(d): the session closing is itself a flush
        // trigger. Without this, a cheap command still sitting in an open
        // batch would otherwise block the wait loop below until the
        // batch's own `batch_wait_timeout` timer fires.
        if let Some(processor) = &processor {
            processor.flush_pending(&self.inner.queue).await;
        }

        for id in self.inner.queue.non_terminal_ids() {
            let _ = self.inner.queue.wait_for_info(&id, None).await;
        }

        if let Some(processor) = processor {
            processor
                .shutdown(self.inner.config.process.quit_grace_period)
                .await;
        }
        self.inner.queue.stop_loop();
        self.transition(SessionState::Closed);
        info!(session_id = %self.inner.session_id, "session closed");
    }

    async fn drive(&self, spawn_args: SpawnArgs) {
        let adapter = match DebuggerAdapter::start(&self.inner.config.process, spawn_args).await {
            Ok(adapter) => adapter,
            Err(e) => {
                self.fault_spawn_failure(e.to_string()).await;
                return;
            }
        };

        tokio::time::sleep(self.inner.config.process.startup_delay).await;

        let fault_handle = self.clone();
        let processor = BatchProcessor::new(
            adapter,
            self.inner.config.batching.clone(),
            self.inner.config.command_timeout,
            move |_message| {
                let handle = fault_handle.clone();
                tokio::spawn(async move { handle.fault_io_closed().await });
            },
        );

        *self.inner.batch.lock().await = Some(processor.clone());

        // A concurrent close() may have already fired while we were
        // spawning; don't resurrect a closing/closed/faulted session.
        if self.state() == SessionState::Initializing {
            self.transition(SessionState::Active);
            self.inner.queue.start_loop(processor);
        }
    }

    async fn fault_spawn_failure(&self, reason: String) {
        *self.inner.fault_cause.lock().unwrap() = Some(reason.clone());
        self.transition(SessionState::Faulted);
        let message = format!("session faulted: {reason}");
        self.inner.queue.fail_all_non_terminal(&message);
        warn!(session_id = %self.inner.session_id, %reason, "session faulted during spawn");
    }

    async fn fault_io_closed(&self) {
        if self.state().is_terminal() {
            return;
        }
        let cause = CoreError::IoClosed.to_string();
        *self.inner.fault_cause.lock().unwrap() = Some(cause);
        self.transition(SessionState::Faulted);
        self.inner.queue.cancel_all_queued(CancelReason::SessionClose);
        warn!(session_id = %self.inner.session_id, "session faulted: stdout closed");
    }

    fn touch(&self) {
        *self.inner.last_activity.lock().unwrap() = Instant::now();
    }

    fn transition(&self, new: SessionState) {
        let old = *self.inner.state.borrow();
        if old == new {
            return;
        }
        let _ = self.inner.state.send(new);
        let event = SessionStateChanged::new(self.inner.session_id.clone(), old, new);
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdbg_config::CdbgConfig;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn fake_cdb(script: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cdb.exe");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{script}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    }

    fn test_config(cdb_path: PathBuf) -> CdbgConfig {
        let mut config = CdbgConfig::default();
        config.process.executable_override = Some(cdb_path);
        config.process.startup_delay = Duration::from_millis(1);
        config.batching.enabled = false;
        config
    }

    /// A fake `cdb.exe` that echoes back whatever sentinel-wrapped command
    /// it is sent, acting as a pass-through debugger for single commands.
    const ECHO_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *MCP_NEXUS_SENTINEL_COMMAND_START*) echo "MCP_NEXUS_SENTINEL_COMMAND_START" ;;
  esac
  case "$line" in
    *"; .echo MCP_NEXUS_SENTINEL_COMMAND_END"*)
      body=$(echo "$line" | sed -n 's/.*; \(.*\); \.echo MCP_NEXUS_SENTINEL_COMMAND_END/\1/p')
      echo "ran:$body"
      echo "MCP_NEXUS_SENTINEL_COMMAND_END"
      ;;
  esac
done
"#;

    #[tokio::test]
    async fn happy_path_single_command_completes() {
        let (_dir, cdb) = fake_cdb(ECHO_SCRIPT);
        let session = SessionHandle::open(
            SessionId::from("s1".to_string()),
            test_config(cdb),
            PathBuf::from("/dumps/crash.dmp"),
            None,
        );

        let id = session.enqueue("lm").unwrap();
        let info = session
            .wait_for_info(&id, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(info.state, cdbg_core::CommandState::Completed);
        assert_eq!(info.aggregated_output.as_deref(), Some("ran:lm\n"));
    }

    #[tokio::test]
    async fn enqueue_rejected_after_close() {
        let (_dir, cdb) = fake_cdb(ECHO_SCRIPT);
        let session = SessionHandle::open(
            SessionId::from("s2".to_string()),
            test_config(cdb),
            PathBuf::from("/dumps/crash.dmp"),
            None,
        );
        // Give the driver a moment to reach Active.
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let err = session.enqueue("lm").unwrap_err();
        assert!(matches!(err, CoreError::SessionFaulted { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_faults_session_and_queued_commands() {
        let config = test_config(PathBuf::from("/definitely/does/not/exist/cdb.exe"));
        let session = SessionHandle::open(
            SessionId::from("s3".to_string()),
            config,
            PathBuf::from("/dumps/crash.dmp"),
            None,
        );

        // Enqueue while still Initializing; execution is deferred.
        let id = session.enqueue("lm").unwrap();

        let info = session
            .wait_for_info(&id, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(info.state, cdbg_core::CommandState::Failed);
        assert_eq!(session.state(), SessionState::Faulted);
    }
}
