//! `CommandInfo`: one record per enqueued command, mutated through states.

use crate::ids::{CommandId, SessionId};
use crate::state::CommandState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot/record of a single command's full lifecycle.
///
/// Invariants (enforced by callers, see spec.md §3):
/// - once `state` is terminal, `state`/`aggregated_output`/`error_message`/
///   `end_time` never change again.
/// - `queued_time <= start_time <= end_time` whenever all three are set.
/// - `start_time` is set exactly on the `Queued -> Executing` transition;
///   `end_time` on the transition into any terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInfo {
    pub session_id: SessionId,
    pub command_id: CommandId,
    pub command_text: String,
    pub state: CommandState,
    pub queued_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub aggregated_output: Option<String>,
    pub error_message: Option<String>,
    pub process_id: Option<u32>,
    /// Incremented each time an external observer fetches this info.
    pub read_count: u64,
}

impl CommandInfo {
    pub fn new(session_id: SessionId, command_id: CommandId, command_text: String) -> Self {
        Self {
            session_id,
            command_id,
            command_text,
            state: CommandState::Queued,
            queued_time: Utc::now(),
            start_time: None,
            end_time: None,
            aggregated_output: None,
            error_message: None,
            process_id: None,
            read_count: 0,
        }
    }

    /// Transition `Queued -> Executing`. Sets `start_time` and records the
    /// debugger pid the command is about to run against, per spec.md §3.
    pub fn mark_executing(&mut self, process_id: Option<u32>) {
        debug_assert!(self.state.can_transition_to(CommandState::Executing));
        self.state = CommandState::Executing;
        self.start_time = Some(Utc::now());
        self.process_id = process_id;
    }

    /// Transition into a terminal state, setting `end_time` and the
    /// output/error payload. No-op semantics are the caller's
    /// responsibility: this always mutates, so callers must not call it
    /// twice on the same command.
    pub fn mark_terminal(
        &mut self,
        state: CommandState,
        aggregated_output: Option<String>,
        error_message: Option<String>,
    ) {
        debug_assert!(state.is_terminal());
        debug_assert!(self.state.can_transition_to(state));
        self.state = state;
        self.end_time = Some(Utc::now());
        self.aggregated_output = aggregated_output;
        self.error_message = error_message;
    }

    pub fn record_read(&mut self) {
        self.read_count += 1;
    }
}
