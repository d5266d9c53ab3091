//! Fixed sentinel literals. Chosen to be unique in normal debugger output.

pub const START: &str = "MCP_NEXUS_SENTINEL_COMMAND_START";
pub const END: &str = "MCP_NEXUS_SENTINEL_COMMAND_END";
pub const BATCH_START: &str = "MCP_NEXUS_SENTINEL_BATCH_START";
pub const BATCH_END: &str = "MCP_NEXUS_SENTINEL_BATCH_END";
pub const BATCH_SEP_PREFIX: &str = "MCP_NEXUS_SENTINEL_SEP_";

/// All literal sentinel substrings a submitted command body must never
/// contain (enforced by the preprocessor, not here).
pub fn all_sentinels() -> [&'static str; 5] {
    [START, END, BATCH_START, BATCH_END, BATCH_SEP_PREFIX]
}
