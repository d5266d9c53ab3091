//! Debugger process adapter configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration consumed by the debugger process adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Explicit configured path, overriding the probed candidate list.
    pub executable_override: Option<PathBuf>,
    /// Delay after spawn before the session is considered initialized.
    #[serde(with = "super::duration_ms", rename = "startup_delay_ms")]
    pub startup_delay: Duration,
    /// Grace period `quit_then_kill` waits before forcibly terminating.
    #[serde(with = "super::duration_ms", rename = "quit_grace_period_ms")]
    pub quit_grace_period: Duration,
    /// When closing a session, whether an in-flight command is
    /// cooperatively cancelled (`true`) or allowed to run to completion
    /// (`false`) before the debugger is quit.
    pub cancel_in_flight_on_close: bool,
    /// How often a "still running" heartbeat is published for a command
    /// that remains `Executing`.
    #[serde(with = "super::duration_ms", rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,
}
