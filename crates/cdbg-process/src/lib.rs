//! Debugger process adapter: locates the debugger executable, spawns it
//! against a dump file, redirects stdio, and merges stdout+stderr into an
//! ordered line stream.

mod adapter;
mod locate;

pub use adapter::{DebuggerAdapter, Line, LineSource, ProcessError, SpawnArgs};
pub use locate::locate_debugger;
