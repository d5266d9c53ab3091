//! Lifecycle notification events published by sessions and their queues.

use crate::ids::{CommandId, SessionId};
use crate::state::{CommandState, SessionState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published on every command state transition. Delivery is best-effort and
/// non-blocking: a slow subscriber must never stall the session consumer
/// (see spec.md §9, "event + handler pattern").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStateChanged {
    pub session_id: SessionId,
    pub command_id: CommandId,
    pub old: CommandState,
    pub new: CommandState,
    pub timestamp: DateTime<Utc>,
}

impl CommandStateChanged {
    pub fn new(session_id: SessionId, command_id: CommandId, old: CommandState, new: CommandState) -> Self {
        Self {
            session_id,
            command_id,
            old,
            new,
            timestamp: Utc::now(),
        }
    }
}

/// Published at a fixed interval for every command still `Executing`, as a
/// liveness hint to clients — no output is carried, only elapsed time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandHeartbeat {
    pub session_id: SessionId,
    pub command_id: CommandId,
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl CommandHeartbeat {
    pub fn new(session_id: SessionId, command_id: CommandId, elapsed_ms: u64) -> Self {
        Self {
            session_id,
            command_id,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Published on every session state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub session_id: SessionId,
    pub old: SessionState,
    pub new: SessionState,
    pub timestamp: DateTime<Utc>,
}

impl SessionStateChanged {
    pub fn new(session_id: SessionId, old: SessionState, new: SessionState) -> Self {
        Self {
            session_id,
            old,
            new,
            timestamp: Utc::now(),
        }
    }
}
