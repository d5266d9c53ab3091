//! Coalesces consecutive cheap commands into one debugger round-trip and
//! demultiplexes the result. Wraps a [`DebuggerAdapter`] and
//! is inserted between the queue's consumer loop and the process adapter.

use std::sync::Arc;
use std::time::Duration;

use cdbg_config::BatchingConfiguration;
use cdbg_core::{CancelReason, CommandId};
use cdbg_framer::{BATCH_END, BATCH_START, END, ExtractOutcome, LineExtractor, START};
use cdbg_process::DebuggerAdapter;
use cdbg_queue::{CommandExecutor, CommandQueue, ExecutionOutcome, ExecutionRequest};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

struct Pending {
    id: CommandId,
    text: String,
    cancel: CancellationToken,
}

struct Inner {
    adapter: DebuggerAdapter,
    buffer: Vec<Pending>,
}

enum ReadOutcome {
    Done(String),
    Timeout,
    Cancelled,
    IoClosed,
}

/// Executes commands dequeued by a [`CommandQueue`], coalescing
/// non-excluded commands into batches per the configured policy.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<Mutex<Inner>>,
    config: BatchingConfiguration,
    default_timeout: Duration,
    on_io_closed: Arc<dyn Fn(String) + Send + Sync>,
}

impl BatchProcessor {
    pub fn new(
        adapter: DebuggerAdapter,
        config: BatchingConfiguration,
        default_timeout: Duration,
        on_io_closed: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                adapter,
                buffer: Vec::new(),
            })),
            config,
            default_timeout,
            on_io_closed: Arc::new(on_io_closed),
        }
    }

    /// Send the debugger a graceful quit, then force-kill after `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.lock().await.adapter.quit_then_kill(grace).await;
    }

    async fn execute_solo(&self, request: ExecutionRequest, queue: CommandQueue) {
        let mut guard = self.inner.lock().await;
        queue.mark_executing(&request.command_id, guard.adapter.pid());

        let wrapped = cdbg_framer::wrap_single(&request.command_text);
        if let Err(e) = guard.adapter.write_line(&wrapped).await {
            drop(guard);
            queue.complete(
                &request.command_id,
                ExecutionOutcome::Failed {
                    error: e.to_string(),
                },
            );
            return;
        }

        let mut extractor = LineExtractor::new(START, END);
        let outcome = read_until_done(
            &mut guard.adapter,
            &mut extractor,
            request.timeout,
            request.cancel.clone(),
        )
        .await;
        drop(guard);

        self.resolve_solo(&request.command_id, outcome, &queue);
    }

    fn resolve_solo(&self, id: &CommandId, outcome: ReadOutcome, queue: &CommandQueue) {
        match outcome {
            ReadOutcome::Done(body) => queue.complete(id, ExecutionOutcome::Completed { output: body }),
            ReadOutcome::Timeout => queue.complete(id, ExecutionOutcome::Timeout),
            ReadOutcome::Cancelled => {
                let reason = queue.cancel_reason(id).unwrap_or(CancelReason::UserRequest);
                queue.complete(id, ExecutionOutcome::Cancelled { reason });
            }
            ReadOutcome::IoClosed => {
                (self.on_io_closed)("stdout closed before the end sentinel was seen".to_string());
                queue.complete(
                    id,
                    ExecutionOutcome::Failed {
                        error: cdbg_core::CoreError::IoClosed.to_string(),
                    },
                );
            }
        }
    }

    /// Flush whatever is currently buffered, without waiting for the
    /// timer or size trigger. Spec.md §4.5 point 3(d): a session closing
    /// is itself a flush trigger, so any cheap command sitting in an open
    /// batch is submitted immediately instead of waiting out the rest of
    /// `batch_wait_timeout`.
    pub async fn flush_pending(&self, queue: &CommandQueue) {
        self.flush(queue).await;
    }

    async fn flush(&self, queue: &CommandQueue) {
        let pending = {
            let mut guard = self.inner.lock().await;
            if guard.buffer.is_empty() {
                return;
            }
            std::mem::take(&mut guard.buffer)
        };

        if let Some(cancelled_idx) = pending.iter().position(|p| p.cancel.is_cancelled()) {
            let reason = queue
                .cancel_reason(&pending[cancelled_idx].id)
                .unwrap_or(CancelReason::UserRequest);
            for (i, p) in pending.iter().enumerate() {
                let r = if i == cancelled_idx {
                    reason.clone()
                } else {
                    CancelReason::BatchAbortedByPeer
                };
                queue.complete(&p.id, ExecutionOutcome::Cancelled { reason: r });
            }
            return;
        }

        let deadline = batch_deadline(self.default_timeout, pending.len(), &self.config);

        let entries: Vec<(&str, &str)> = pending
            .iter()
            .map(|p| (p.id.as_str(), p.text.as_str()))
            .collect();
        let wrapped = cdbg_framer::wrap_batch(&entries);

        let mut guard = self.inner.lock().await;
        if let Err(e) = guard.adapter.write_line(&wrapped).await {
            drop(guard);
            for p in &pending {
                queue.complete(
                    &p.id,
                    ExecutionOutcome::Failed {
                        error: e.to_string(),
                    },
                );
            }
            return;
        }

        let mut extractor = LineExtractor::new(BATCH_START, BATCH_END);
        // A batch, once submitted, is one indivisible debugger round-trip:
        // a member cancelled after submission is resolved during demux
        // rather than aborting the shared read (see demux_and_complete).
        let uncancellable = CancellationToken::new();
        let outcome = read_until_done(&mut guard.adapter, &mut extractor, deadline, uncancellable).await;
        drop(guard);

        match outcome {
            ReadOutcome::Done(body) => self.demux_and_complete(&pending, &body, queue),
            ReadOutcome::Timeout => {
                for p in &pending {
                    queue.complete(&p.id, ExecutionOutcome::Timeout);
                }
            }
            ReadOutcome::IoClosed => {
                (self.on_io_closed)("stdout closed before the end sentinel was seen".to_string());
                for p in &pending {
                    queue.complete(
                        &p.id,
                        ExecutionOutcome::Failed {
                            error: cdbg_core::CoreError::IoClosed.to_string(),
                        },
                    );
                }
            }
            ReadOutcome::Cancelled => unreachable!("batch reads use a token that is never cancelled"),
        }
    }

    fn demux_and_complete(&self, pending: &[Pending], body: &str, queue: &CommandQueue) {
        let mut rest = body;
        let mut outputs = Vec::with_capacity(pending.len());
        let mut mismatch = false;

        for p in pending {
            let marker = format!("{}\n", cdbg_framer::batch_separator(p.id.as_str()));
            if let Some(pos) = rest.find(&marker) {
                outputs.push(rest[..pos].to_string());
                rest = &rest[pos + marker.len()..];
            } else {
                mismatch = true;
                break;
            }
        }

        if mismatch || !rest.is_empty() {
            warn!(raw_len = body.len(), "batch demux mismatch");
            let error = format!(
                "batch output did not split into the expected number of pieces; raw body: {body}"
            );
            for p in pending {
                queue.complete(
                    &p.id,
                    ExecutionOutcome::Failed {
                        error: error.clone(),
                    },
                );
            }
            return;
        }

        for (p, output) in pending.iter().zip(outputs) {
            if let Some(reason) = queue.cancel_reason(&p.id) {
                queue.complete(&p.id, ExecutionOutcome::Cancelled { reason });
            } else {
                queue.complete(&p.id, ExecutionOutcome::Completed { output });
            }
        }
    }
}

impl CommandExecutor for BatchProcessor {
    async fn submit(&mut self, request: ExecutionRequest, queue: CommandQueue) {
        if !self.config.is_active() || self.config.is_excluded(&request.command_text) {
            self.flush(&queue).await;
            self.execute_solo(request, queue).await;
            return;
        }

        let pid = self.inner.lock().await.adapter.pid();
        queue.mark_executing(&request.command_id, pid);

        let (armed_timer, size_flush) = {
            let mut guard = self.inner.lock().await;
            guard.buffer.push(Pending {
                id: request.command_id.clone(),
                text: request.command_text.clone(),
                cancel: request.cancel.clone(),
            });
            (guard.buffer.len() == 1, guard.buffer.len() >= self.config.max_batch_size)
        };

        if size_flush {
            self.flush(&queue).await;
        } else if armed_timer {
            let this = self.clone();
            let queue = queue.clone();
            let wait = self.config.batch_wait_timeout();
            tokio::spawn(async move {
                tokio::time::sleep(wait).await;
                this.flush(&queue).await;
            });
        }
    }
}

/// Sum of per-command timeouts times the multiplier, capped at
/// `max_batch_timeout`.
fn batch_deadline(per_command: Duration, count: usize, config: &BatchingConfiguration) -> Duration {
    let sum_secs = per_command.as_secs_f64() * count.max(1) as f64;
    let scaled = sum_secs * config.batch_timeout_multiplier;
    let capped = scaled.min(config.max_batch_timeout().as_secs_f64()).max(0.0);
    Duration::from_secs_f64(capped)
}

async fn read_until_done(
    adapter: &mut DebuggerAdapter,
    extractor: &mut LineExtractor,
    timeout: Duration,
    cancel: CancellationToken,
) -> ReadOutcome {
    let body = async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                maybe_line = adapter.next_line() => {
                    match maybe_line {
                        None => return ReadOutcome::IoClosed,
                        Some(line) => {
                            if let Some(ExtractOutcome::Done(body)) = extractor.feed_line(&line.text) {
                                return ReadOutcome::Done(body);
                            }
                        }
                    }
                }
            }
        }
    };

    match tokio::time::timeout(timeout, body).await {
        Ok(outcome) => outcome,
        Err(_) => ReadOutcome::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_deadline_sums_and_caps() {
        let config = BatchingConfiguration {
            batch_timeout_multiplier: 2.0,
            max_batch_timeout_ms: 5_000,
            ..BatchingConfiguration::default()
        };
        let deadline = batch_deadline(Duration::from_secs(3), 3, &config);
        assert_eq!(deadline, Duration::from_secs(5));

        let small = batch_deadline(Duration::from_secs(1), 2, &config);
        assert_eq!(small, Duration::from_secs(4));
    }
}
