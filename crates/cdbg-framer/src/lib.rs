//! Sentinel framing: wrap a debugger command so its output can be located in
//! the merged stdout stream, and extract that output back out of a line
//! stream. Pure; no process I/O lives in this crate.

mod constants;
mod extractor;
mod wrap;

pub use constants::{BATCH_END, BATCH_START, END, START};
pub use extractor::{ExtractOutcome, LineExtractor};
pub use wrap::{batch_separator, wrap_batch, wrap_single};
