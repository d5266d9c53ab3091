//! Command preprocessor: a pure function that normalizes and validates a
//! raw command string before it is sent to the debugger.

use cdbg_framer::all_sentinels;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreprocessError {
    #[error("command is empty or whitespace-only")]
    Empty,
    #[error("command '{0}' would terminate or detach the debugger")]
    Terminating(String),
    #[error("command contains a literal sentinel token")]
    ContainsSentinel,
}

/// Commands that terminate or detach the debugger, per spec.md §4.3.
/// Matched case-insensitively against the whole trimmed command.
const DENIED_COMMANDS: &[&str] = &["q", "qd", "qq", "qa", ".detach", "~*q"];

/// Normalize and validate a raw command string.
///
/// - Rejects empty/whitespace-only input.
/// - Rejects commands that would terminate or detach the debugger.
/// - Rejects input containing a literal sentinel token.
/// - Trims trailing whitespace, but not leading (some debugger commands are
///   whitespace-sensitive).
pub fn preprocess(raw: &str) -> Result<String, PreprocessError> {
    if raw.trim().is_empty() {
        return Err(PreprocessError::Empty);
    }

    for sentinel in all_sentinels() {
        if raw.contains(sentinel) {
            return Err(PreprocessError::ContainsSentinel);
        }
    }

    let trimmed = raw.trim_end().to_string();

    let normalized = trimmed.trim().to_ascii_lowercase();
    if DENIED_COMMANDS.contains(&normalized.as_str()) {
        return Err(PreprocessError::Terminating(trimmed));
    }

    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty() {
        assert_eq!(preprocess(""), Err(PreprocessError::Empty));
        assert_eq!(preprocess("   "), Err(PreprocessError::Empty));
    }

    #[test]
    fn rejects_terminating_commands() {
        for denied in ["q", "qd", "qq", "Q", "QD"] {
            assert!(matches!(
                preprocess(denied),
                Err(PreprocessError::Terminating(_))
            ));
        }
    }

    #[test]
    fn rejects_detach_alias() {
        assert!(matches!(
            preprocess(".detach"),
            Err(PreprocessError::Terminating(_))
        ));
    }

    #[test]
    fn rejects_sentinel_in_body() {
        let raw = "lm MCP_NEXUS_SENTINEL_COMMAND_START";
        assert_eq!(preprocess(raw), Err(PreprocessError::ContainsSentinel));
    }

    #[test]
    fn trims_trailing_but_not_leading_whitespace() {
        let out = preprocess("  lm  ").unwrap();
        assert_eq!(out, "  lm");
    }

    #[test]
    fn accepts_ordinary_command() {
        assert_eq!(preprocess("lm").unwrap(), "lm");
        assert_eq!(preprocess("k").unwrap(), "k");
        assert_eq!(preprocess("!analyze -v").unwrap(), "!analyze -v");
    }

    #[test]
    fn does_not_reject_commands_merely_containing_q() {
        assert_eq!(preprocess("kq").unwrap(), "kq");
        assert_eq!(preprocess("qword").unwrap(), "qword");
    }
}
