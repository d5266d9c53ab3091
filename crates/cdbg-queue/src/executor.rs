//! The interface the Command Queue's consumer task dispatches through.
//!
//! `submit` must return promptly: it hands the command off (to a direct
//! debugger invocation, or to a batch buffer) and reports completion later,
//! out of band, via the `CommandQueue` handle it is given. This is what lets
//! the Batch Processor coalesce several dequeued commands before any one of
//! them actually completes.

use std::future::Future;
use std::time::Duration;

use cdbg_core::CommandId;
use tokio_util::sync::CancellationToken;

use crate::queue::CommandQueue;

/// One command handed from the queue's consumer loop to an executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub command_id: CommandId,
    pub command_text: String,
    pub cancel: CancellationToken,
    pub timeout: Duration,
}

/// Terminal disposition of a command, reported back via
/// [`CommandQueue::complete`].
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Completed { output: String },
    Cancelled { reason: cdbg_core::CancelReason },
    Timeout,
    Failed { error: String },
}

/// Drives command execution for a session's consumer loop.
///
/// Implementations are handed each dequeued command in FIFO order and must
/// call [`CommandQueue::mark_executing`] then, eventually,
/// [`CommandQueue::complete`] on the queue handle they receive — possibly
/// from a spawned task, possibly much later than `submit` returns.
pub trait CommandExecutor: Send + 'static {
    fn submit(
        &mut self,
        request: ExecutionRequest,
        queue: CommandQueue,
    ) -> impl Future<Output = ()> + Send;
}
