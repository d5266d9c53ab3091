//! Construct the sentinel-wrapped submission strings sent to the debugger.

use crate::constants::{BATCH_END, BATCH_SEP_PREFIX, BATCH_START, END, START};

/// Wrap a single command body: `.echo <START>; <body>; .echo <END>`.
pub fn wrap_single(body: &str) -> String {
    format!(".echo {START}; {body}; .echo {END}")
}

/// The separator literal embedding a command id, used between batch members
/// so demux is positional-plus-tagged (robust to blank lines).
pub fn batch_separator(command_id: &str) -> String {
    format!("{BATCH_SEP_PREFIX}{command_id}")
}

/// Wrap a sequence of `(command_id, body)` pairs into one batched
/// submission: `.echo <B_START>; <cmd1>; .echo <SEP_id1>; <cmd2>; ...; .echo <B_END>`.
pub fn wrap_batch<'a, I>(entries: I) -> String
where
    I: IntoIterator<Item = &'a (&'a str, &'a str)>,
{
    let mut out = format!(".echo {BATCH_START}");
    for (command_id, body) in entries {
        out.push_str("; ");
        out.push_str(body);
        out.push_str("; .echo ");
        out.push_str(&batch_separator(command_id));
    }
    out.push_str("; .echo ");
    out.push_str(BATCH_END);
    out
}
