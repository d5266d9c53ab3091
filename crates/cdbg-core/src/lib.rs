//! Shared types for the debugger orchestration core: session/command ids,
//! command state, command info, lifecycle events, and the core error type.

pub mod error;
pub mod event;
pub mod ids;
pub mod info;
pub mod state;

pub use error::{CancelReason, CoreError};
pub use event::{CommandHeartbeat, CommandStateChanged, SessionStateChanged};
pub use ids::{CommandId, SessionId};
pub use info::CommandInfo;
pub use state::{CommandState, SessionState};
