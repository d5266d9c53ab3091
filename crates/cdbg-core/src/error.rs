//! Core error discriminators. Per-command execution errors
//! never propagate through `Result` — they resolve a command's completion
//! channel in the matching terminal state. Only synchronous caller-facing
//! operations (`enqueue`, `get`, `cancel`, registry `create`) return
//! `CoreError` directly.

use crate::ids::{CommandId, SessionId};

/// Why a command was cooperatively cancelled.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    #[error("cancelled by user request")]
    UserRequest,
    #[error("cancelled because the session is closing")]
    SessionClose,
    #[error("cancelled because a batch-mate triggered abort")]
    BatchAbortedByPeer,
    #[error("cancelled because the command timed out")]
    Timeout,
}

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("registry at capacity (limit {limit})")]
    CapacityExceeded { limit: usize },

    #[error("session '{session_id}' is faulted: {cause}")]
    SessionFaulted {
        session_id: SessionId,
        cause: String,
    },

    #[error("failed to spawn debugger: {reason}")]
    SpawnFailed { reason: String },

    #[error("stdout closed before the end sentinel was seen")]
    IoClosed,

    #[error("command or batch exceeded its deadline")]
    Timeout,

    #[error("batch output did not split into the expected number of pieces")]
    BatchDemuxMismatch { raw_body: String },

    #[error("command '{command_id}' cancelled: {reason}")]
    Cancelled {
        command_id: CommandId,
        reason: CancelReason,
    },
}

impl CoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_invalid_command() {
        let err = CoreError::invalid_command("empty command");
        assert_eq!(err.to_string(), "invalid command: empty command");
    }

    #[test]
    fn display_not_found() {
        let err = CoreError::not_found("session 'abc'");
        assert_eq!(err.to_string(), "session 'abc' not found");
    }

    #[test]
    fn display_capacity_exceeded() {
        let err = CoreError::CapacityExceeded { limit: 8 };
        assert_eq!(err.to_string(), "registry at capacity (limit 8)");
    }

    #[test]
    fn display_session_faulted() {
        let err = CoreError::SessionFaulted {
            session_id: SessionId::from("s1".to_string()),
            cause: "lost stdout".to_string(),
        };
        assert_eq!(err.to_string(), "session 's1' is faulted: lost stdout");
    }

    #[test]
    fn display_spawn_failed() {
        let err = CoreError::SpawnFailed {
            reason: "cdb.exe not found".to_string(),
        };
        assert_eq!(err.to_string(), "failed to spawn debugger: cdb.exe not found");
    }

    #[test]
    fn display_io_closed() {
        assert_eq!(
            CoreError::IoClosed.to_string(),
            "stdout closed before the end sentinel was seen"
        );
    }

    #[test]
    fn display_timeout() {
        assert_eq!(
            CoreError::Timeout.to_string(),
            "command or batch exceeded its deadline"
        );
    }

    #[test]
    fn display_batch_demux_mismatch() {
        let err = CoreError::BatchDemuxMismatch {
            raw_body: "garbage".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "batch output did not split into the expected number of pieces"
        );
    }

    #[test]
    fn display_cancelled() {
        let sid = SessionId::from("s1".to_string());
        let err = CoreError::Cancelled {
            command_id: CommandId::new(&sid, 3),
            reason: CancelReason::UserRequest,
        };
        assert_eq!(
            err.to_string(),
            "command 'cmd-s1-3' cancelled: cancelled by user request"
        );
    }

    #[test]
    fn cancel_reason_display_strings() {
        assert_eq!(CancelReason::UserRequest.to_string(), "cancelled by user request");
        assert_eq!(
            CancelReason::SessionClose.to_string(),
            "cancelled because the session is closing"
        );
        assert_eq!(
            CancelReason::BatchAbortedByPeer.to_string(),
            "cancelled because a batch-mate triggered abort"
        );
        assert_eq!(
            CancelReason::Timeout.to_string(),
            "cancelled because the command timed out"
        );
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoreError>();
    }
}
