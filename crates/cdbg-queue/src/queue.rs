//! Per-session command queue: FIFO ordering, monotone id assignment, state
//! tracking, and cooperative cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cdbg_core::{
    CancelReason, CommandHeartbeat, CommandId, CommandInfo, CommandState, CommandStateChanged,
    CoreError, SessionId, ids::CommandIdAllocator,
};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::{CommandExecutor, ExecutionOutcome, ExecutionRequest};

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    session_id: SessionId,
    allocator: CommandIdAllocator,
    infos: Mutex<HashMap<CommandId, CommandInfo>>,
    tokens: Mutex<HashMap<CommandId, CancellationToken>>,
    pending_cancel: Mutex<HashMap<CommandId, CancelReason>>,
    fifo_tx: mpsc::UnboundedSender<CommandId>,
    fifo_rx: Mutex<Option<mpsc::UnboundedReceiver<CommandId>>>,
    events: broadcast::Sender<CommandStateChanged>,
    heartbeats: broadcast::Sender<CommandHeartbeat>,
    notify: Notify,
    loop_cancel: CancellationToken,
    default_timeout: Duration,
    heartbeat_interval: Duration,
}

/// A cheap, cloneable handle to one session's command queue.
///
/// Shared between the session's consumer loop (which dequeues and dispatches
/// via [`CommandQueue::start_loop`]) and external callers (enqueue/cancel/
/// lookup), per spec.md §5's "multi-producer, single-consumer" model.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub fn new(session_id: SessionId, default_timeout: Duration) -> Self {
        Self::with_heartbeat_interval(session_id, default_timeout, Duration::from_secs(15))
    }

    pub fn with_heartbeat_interval(
        session_id: SessionId,
        default_timeout: Duration,
        heartbeat_interval: Duration,
    ) -> Self {
        let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (heartbeats, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                session_id,
                allocator: CommandIdAllocator::new(),
                infos: Mutex::new(HashMap::new()),
                tokens: Mutex::new(HashMap::new()),
                pending_cancel: Mutex::new(HashMap::new()),
                fifo_tx,
                fifo_rx: Mutex::new(Some(fifo_rx)),
                events,
                heartbeats,
                notify: Notify::new(),
                loop_cancel: CancellationToken::new(),
                default_timeout,
                heartbeat_interval,
            }),
        }
    }

    /// Preprocess, assign the next id, and enqueue. Fails with
    /// `InvalidCommand` on preprocessor rejection; no `CommandInfo` is
    /// created for a rejected command.
    pub fn enqueue(&self, raw: &str) -> Result<CommandId, CoreError> {
        let command_text =
            cdbg_preprocess::preprocess(raw).map_err(|e| CoreError::invalid_command(e.to_string()))?;

        let command_id = self.inner.allocator.allocate(&self.inner.session_id);
        let info = CommandInfo::new(
            self.inner.session_id.clone(),
            command_id.clone(),
            command_text,
        );
        self.inner
            .infos
            .lock()
            .unwrap()
            .insert(command_id.clone(), info);

        self.publish(command_id.clone(), CommandState::Queued, CommandState::Queued);
        let _ = self.inner.fifo_tx.send(command_id.clone());
        Ok(command_id)
    }

    pub fn get_info(&self, id: &CommandId) -> Option<CommandInfo> {
        let mut infos = self.inner.infos.lock().unwrap();
        let info = infos.get_mut(id)?;
        info.record_read();
        Some(info.clone())
    }

    pub fn get_all_infos(&self) -> HashMap<CommandId, CommandInfo> {
        let mut infos = self.inner.infos.lock().unwrap();
        for info in infos.values_mut() {
            info.record_read();
        }
        infos.clone()
    }

    /// Cancel one command. `Queued` cancels synchronously; `Executing`
    /// cancels cooperatively via the command's token. Returns `false` if the
    /// command is unknown or already terminal.
    pub fn cancel(&self, id: &CommandId, reason: CancelReason) -> bool {
        let mut infos = self.inner.infos.lock().unwrap();
        let Some(info) = infos.get_mut(id) else {
            return false;
        };

        match info.state {
            CommandState::Queued => {
                let old = info.state;
                info.mark_terminal(CommandState::Cancelled, None, Some(reason.to_string()));
                drop(infos);
                self.publish(id.clone(), old, CommandState::Cancelled);
                self.inner.notify.notify_waiters();
                true
            }
            CommandState::Executing => {
                drop(infos);
                self.inner
                    .pending_cancel
                    .lock()
                    .unwrap()
                    .insert(id.clone(), reason);
                if let Some(token) = self.inner.tokens.lock().unwrap().get(id) {
                    token.cancel();
                }
                true
            }
            _ => false,
        }
    }

    /// Cancel every non-terminal command. Returns the count cancelled.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let ids: Vec<CommandId> = {
            let infos = self.inner.infos.lock().unwrap();
            infos
                .iter()
                .filter(|(_, info)| !info.state.is_terminal())
                .map(|(id, _)| id.clone())
                .collect()
        };
        ids.iter()
            .filter(|id| self.cancel(id, reason.clone()))
            .count()
    }

    /// Cancel every still-`Queued` command, leaving anything `Executing`
    /// alone. Used when closing a session that lets an in-flight command
    /// run to completion.
    pub fn cancel_all_queued(&self, reason: CancelReason) -> usize {
        let ids: Vec<CommandId> = {
            let infos = self.inner.infos.lock().unwrap();
            infos
                .iter()
                .filter(|(_, info)| info.state == CommandState::Queued)
                .map(|(id, _)| id.clone())
                .collect()
        };
        ids.iter()
            .filter(|id| self.cancel(id, reason.clone()))
            .count()
    }

    /// Ids of every command not yet in a terminal state.
    pub fn non_terminal_ids(&self) -> Vec<CommandId> {
        let infos = self.inner.infos.lock().unwrap();
        infos
            .iter()
            .filter(|(_, info)| !info.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Force every non-terminal command straight to `Failed` with
    /// `error_message`, bypassing cooperative cancellation. Used when the
    /// session itself is unusable (spec.md §4.6: "every queued command
    /// fails with `SessionFaulted`").
    pub fn fail_all_non_terminal(&self, error_message: &str) -> usize {
        let ids = self.non_terminal_ids();
        let mut count = 0;
        for id in ids {
            let mut infos = self.inner.infos.lock().unwrap();
            let Some(info) = infos.get_mut(&id) else {
                continue;
            };
            if info.state.is_terminal() {
                continue;
            }
            let old = info.state;
            info.mark_terminal(CommandState::Failed, None, Some(error_message.to_string()));
            drop(infos);
            self.inner.tokens.lock().unwrap().remove(&id);
            self.inner.pending_cancel.lock().unwrap().remove(&id);
            self.publish(id, old, CommandState::Failed);
            count += 1;
        }
        self.inner.notify.notify_waiters();
        count
    }

    /// Resolve once the command reaches a terminal state, or once `deadline`
    /// elapses (`CoreError::Timeout`).
    pub async fn wait_for_info(
        &self,
        id: &CommandId,
        deadline: Option<Duration>,
    ) -> Result<CommandInfo, CoreError> {
        let start = tokio::time::Instant::now();
        loop {
            match self.get_info(id) {
                None => return Err(CoreError::not_found(format!("command '{id}'"))),
                Some(info) if info.state.is_terminal() => return Ok(info),
                Some(_) => {}
            }

            match deadline {
                None => self.inner.notify.notified().await,
                Some(limit) => {
                    let elapsed = start.elapsed();
                    if elapsed >= limit {
                        return Err(CoreError::Timeout);
                    }
                    let remaining = limit - elapsed;
                    if tokio::time::timeout(remaining, self.inner.notify.notified())
                        .await
                        .is_err()
                    {
                        return Err(CoreError::Timeout);
                    }
                }
            }
        }
    }

    /// The reason passed to the most recent `cancel()` call for `id`, if
    /// any, regardless of whether it has taken effect yet. Executors use
    /// this to label batch-mates once a mid-batch cancel is observed.
    pub fn cancel_reason(&self, id: &CommandId) -> Option<CancelReason> {
        self.inner.pending_cancel.lock().unwrap().get(id).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandStateChanged> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_heartbeats(&self) -> broadcast::Receiver<CommandHeartbeat> {
        self.inner.heartbeats.subscribe()
    }

    /// Called by an executor once it begins acting on a dequeued command.
    /// Arms a periodic heartbeat that stops on its own once the command
    /// reaches a terminal state.
    pub fn mark_executing(&self, id: &CommandId, process_id: Option<u32>) {
        let mut infos = self.inner.infos.lock().unwrap();
        if let Some(info) = infos.get_mut(id) {
            let old = info.state;
            info.mark_executing(process_id);
            drop(infos);
            self.publish(id.clone(), old, CommandState::Executing);
            self.spawn_heartbeat(id.clone());
        }
    }

    fn spawn_heartbeat(&self, id: CommandId) {
        let inner = self.inner.clone();
        let interval = inner.heartbeat_interval;
        if interval.is_zero() {
            return;
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let (state, elapsed_ms) = {
                    let infos = inner.infos.lock().unwrap();
                    match infos.get(&id) {
                        Some(info) => (
                            info.state,
                            info.start_time
                                .map(|start| (chrono::Utc::now() - start).num_milliseconds().max(0) as u64)
                                .unwrap_or(0),
                        ),
                        None => return,
                    }
                };
                if state != CommandState::Executing {
                    return;
                }
                let heartbeat = CommandHeartbeat::new(inner.session_id.clone(), id.clone(), elapsed_ms);
                let _ = inner.heartbeats.send(heartbeat);
            }
        });
    }

    /// Called by an executor once a dequeued command reaches a terminal
    /// outcome.
    pub fn complete(&self, id: &CommandId, outcome: ExecutionOutcome) {
        let (state, output, error) = match outcome {
            ExecutionOutcome::Completed { output } => (CommandState::Completed, Some(output), None),
            ExecutionOutcome::Cancelled { reason } => {
                (CommandState::Cancelled, None, Some(reason.to_string()))
            }
            ExecutionOutcome::Timeout => {
                (CommandState::Timeout, None, Some(CoreError::Timeout.to_string()))
            }
            ExecutionOutcome::Failed { error } => (CommandState::Failed, None, Some(error)),
        };

        let mut infos = self.inner.infos.lock().unwrap();
        let Some(info) = infos.get_mut(id) else {
            return;
        };
        let old = info.state;
        if old.is_terminal() {
            return;
        }
        info.mark_terminal(state, output, error);
        drop(infos);

        self.inner.tokens.lock().unwrap().remove(id);
        self.inner.pending_cancel.lock().unwrap().remove(id);
        self.publish(id.clone(), old, state);
        self.inner.notify.notify_waiters();
    }

    /// Start the single consumer task that drains the FIFO through
    /// `executor`. Panics if called twice on the same queue.
    pub fn start_loop<E: CommandExecutor>(&self, mut executor: E) -> JoinHandle<()> {
        let mut rx = self
            .inner
            .fifo_rx
            .lock()
            .unwrap()
            .take()
            .expect("start_loop called more than once");
        let queue = self.clone();
        let inner = self.inner.clone();

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = inner.loop_cancel.cancelled() => None,
                    maybe_id = rx.recv() => maybe_id,
                };

                let Some(id) = next else { break };
                if inner.loop_cancel.is_cancelled() {
                    break;
                }

                let Some(request) = queue.prepare_dispatch(&id) else {
                    continue;
                };
                executor.submit(request, queue.clone()).await;
            }
            debug!("command queue consumer loop stopped");
        })
    }

    pub fn stop_loop(&self) {
        self.inner.loop_cancel.cancel();
    }

    /// Atomically verify the command is still `Queued` and build its
    /// dispatch request, creating its cancellation token. Returns `None` if
    /// it was cancelled before being dequeued.
    fn prepare_dispatch(&self, id: &CommandId) -> Option<ExecutionRequest> {
        let infos = self.inner.infos.lock().unwrap();
        let info = infos.get(id)?;
        if info.state != CommandState::Queued {
            return None;
        }
        let command_text = info.command_text.clone();
        drop(infos);

        let token = CancellationToken::new();
        if self.inner.pending_cancel.lock().unwrap().contains_key(id) {
            token.cancel();
        }
        self.inner.tokens.lock().unwrap().insert(id.clone(), token.clone());

        Some(ExecutionRequest {
            command_id: id.clone(),
            command_text,
            cancel: token,
            timeout: self.inner.default_timeout,
        })
    }

    fn publish(&self, command_id: CommandId, old: CommandState, new: CommandState) {
        let event = CommandStateChanged::new(self.inner.session_id.clone(), command_id, old, new);
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdbg_core::SessionId;
    use std::time::Duration as StdDuration;

    struct EchoExecutor;

    impl CommandExecutor for EchoExecutor {
        async fn submit(&mut self, request: ExecutionRequest, queue: CommandQueue) {
            queue.mark_executing(&request.command_id, Some(1234));
            queue.complete(
                &request.command_id,
                ExecutionOutcome::Completed {
                    output: format!("echo:{}", request.command_text),
                },
            );
        }
    }

    fn queue() -> CommandQueue {
        CommandQueue::new(SessionId::from("s1".to_string()), StdDuration::from_secs(5))
    }

    #[test]
    fn enqueue_rejects_invalid_command() {
        let q = queue();
        let err = q.enqueue("").unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand { .. }));
        assert!(q.get_all_infos().is_empty());
    }

    #[tokio::test]
    async fn happy_path_completes_in_order() {
        let q = queue();
        let id = q.enqueue("lm").unwrap();
        q.start_loop(EchoExecutor);

        let info = q.wait_for_info(&id, Some(StdDuration::from_secs(1))).await.unwrap();
        assert_eq!(info.state, CommandState::Completed);
        assert_eq!(info.aggregated_output.as_deref(), Some("echo:lm"));
    }

    #[tokio::test]
    async fn cancel_while_queued_skips_executing() {
        let q = queue();
        let a = q.enqueue("a").unwrap();
        let b = q.enqueue("b").unwrap();
        let c = q.enqueue("c").unwrap();

        assert!(q.cancel(&b, CancelReason::UserRequest));
        q.start_loop(EchoExecutor);

        let info_a = q.wait_for_info(&a, Some(StdDuration::from_secs(1))).await.unwrap();
        let info_b = q.get_info(&b).unwrap();
        let info_c = q.wait_for_info(&c, Some(StdDuration::from_secs(1))).await.unwrap();

        assert_eq!(info_a.state, CommandState::Completed);
        assert_eq!(info_b.state, CommandState::Cancelled);
        assert!(info_b.start_time.is_none());
        assert_eq!(info_c.state, CommandState::Completed);
    }

    #[test]
    fn cancel_unknown_command_returns_false() {
        let q = queue();
        let fake = cdbg_core::CommandId::new(&SessionId::from("s1".to_string()), 999);
        assert!(!q.cancel(&fake, CancelReason::UserRequest));
    }

    #[tokio::test]
    async fn cancel_all_counts_only_non_terminal() {
        let q = queue();
        let _a = q.enqueue("a").unwrap();
        let _b = q.enqueue("b").unwrap();
        let cancelled = q.cancel_all(CancelReason::SessionClose);
        assert_eq!(cancelled, 2);
        assert_eq!(q.cancel_all(CancelReason::SessionClose), 0);
    }

    #[tokio::test]
    async fn fail_all_non_terminal_marks_failed_not_cancelled() {
        let q = queue();
        let a = q.enqueue("a").unwrap();
        let count = q.fail_all_non_terminal("debugger could not be started");
        assert_eq!(count, 1);
        let info = q.get_info(&a).unwrap();
        assert_eq!(info.state, CommandState::Failed);
        assert_eq!(
            info.error_message.as_deref(),
            Some("debugger could not be started")
        );
    }

    #[tokio::test]
    async fn cancel_all_queued_leaves_executing_alone() {
        let q = queue();
        let a = q.enqueue("a").unwrap();
        let b = q.enqueue("b").unwrap();
        q.mark_executing(&a, Some(1));

        let cancelled = q.cancel_all_queued(CancelReason::SessionClose);
        assert_eq!(cancelled, 1);
        assert_eq!(q.get_info(&a).unwrap().state, CommandState::Executing);
        assert_eq!(q.get_info(&b).unwrap().state, CommandState::Cancelled);
    }

    #[tokio::test]
    async fn heartbeat_fires_while_executing_and_stops_on_completion() {
        struct SlowExecutor;
        impl CommandExecutor for SlowExecutor {
            async fn submit(&mut self, request: ExecutionRequest, queue: CommandQueue) {
                queue.mark_executing(&request.command_id, Some(1));
                tokio::time::sleep(StdDuration::from_millis(30)).await;
                queue.complete(
                    &request.command_id,
                    ExecutionOutcome::Completed {
                        output: "done".to_string(),
                    },
                );
            }
        }

        let q = CommandQueue::with_heartbeat_interval(
            SessionId::from("s1".to_string()),
            StdDuration::from_secs(5),
            StdDuration::from_millis(5),
        );
        let mut heartbeats = q.subscribe_heartbeats();
        let id = q.enqueue("lm").unwrap();
        q.start_loop(SlowExecutor);

        let beat = tokio::time::timeout(StdDuration::from_secs(1), heartbeats.recv())
            .await
            .expect("heartbeat should fire while executing")
            .unwrap();
        assert_eq!(beat.command_id, id);

        let info = q.wait_for_info(&id, Some(StdDuration::from_secs(1))).await.unwrap();
        assert_eq!(info.state, CommandState::Completed);

        // No further heartbeats after completion.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        while heartbeats.try_recv().is_ok() {}
        assert!(matches!(
            tokio::time::timeout(StdDuration::from_millis(30), heartbeats.recv()).await,
            Err(_)
        ));
    }

    #[test]
    fn non_terminal_ids_excludes_terminal_commands() {
        let q = queue();
        let a = q.enqueue("a").unwrap();
        let b = q.enqueue("b").unwrap();
        q.cancel(&b, CancelReason::UserRequest);
        assert_eq!(q.non_terminal_ids(), vec![a]);
    }
}
