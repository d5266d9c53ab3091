//! Opaque session and command identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Globally-unique session identifier, generated on session creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new session id from a monotone process-wide counter plus
    /// the process start time, so ids stay unique and sortable within a run.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("sess-{n:08x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command identifier of the form `cmd-<sessionId>-<N>`, `N` a per-session
/// monotone counter starting at 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(session_id: &SessionId, sequence: u64) -> Self {
        Self(format!("cmd-{session_id}-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Round-trips an id a caller received from a prior response back into a
/// [`CommandId`], for transports that hand ids back as opaque strings.
impl From<String> for CommandId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session monotone counter assigning the `N` in `cmd-<sessionId>-<N>`.
/// Starts at 1, as spec'd.
#[derive(Debug, Default)]
pub struct CommandIdAllocator {
    next: AtomicU64,
}

impl CommandIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self, session_id: &SessionId) -> CommandId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        CommandId::new(session_id, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn command_id_format() {
        let sid = SessionId::from("abc123".to_string());
        let cid = CommandId::new(&sid, 7);
        assert_eq!(cid.as_str(), "cmd-abc123-7");
    }

    #[test]
    fn allocator_starts_at_one_and_is_monotone() {
        let sid = SessionId::from("s".to_string());
        let alloc = CommandIdAllocator::new();
        assert_eq!(alloc.allocate(&sid).as_str(), "cmd-s-1");
        assert_eq!(alloc.allocate(&sid).as_str(), "cmd-s-2");
        assert_eq!(alloc.allocate(&sid).as_str(), "cmd-s-3");
    }

    #[test]
    fn display_matches_as_str() {
        let sid = SessionId::from("xyz".to_string());
        assert_eq!(sid.to_string(), sid.as_str());
        let cid = CommandId::new(&sid, 1);
        assert_eq!(cid.to_string(), cid.as_str());
    }
}
