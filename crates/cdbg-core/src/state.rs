//! Command and session state machines.

use serde::{Deserialize, Serialize};

/// Lifecycle state of one enqueued command.
///
/// Terminal states are `Completed`, `Cancelled`, `Timeout`, `Failed`. Once a
/// command reaches a terminal state it never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandState {
    Queued,
    Executing,
    Completed,
    Cancelled,
    Timeout,
    Failed,
}

impl CommandState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Cancelled | Self::Timeout | Self::Failed
        )
    }

    /// True if `self -> next` is a legal transition under the state machine
    /// in spec.md §3/§8: `Queued -> Executing -> terminal`, with `Executing`
    /// skippable only when cancelled while still `Queued`.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Queued, Self::Executing) => true,
            (Self::Queued, n) if n.is_terminal() => true,
            (Self::Executing, n) if n.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for CommandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "Queued",
            Self::Executing => "Executing",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
            Self::Timeout => "Timeout",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a debug session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initializing,
    Active,
    Closing,
    Closed,
    Faulted,
}

impl SessionState {
    /// A session only accepts and executes commands while `Active`.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Faulted)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "Initializing",
            Self::Active => "Active",
            Self::Closing => "Closing",
            Self::Closed => "Closed",
            Self::Faulted => "Faulted",
        };
        write!(f, "{s}")
    }
}
