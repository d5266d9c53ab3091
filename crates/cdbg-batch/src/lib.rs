//! Batch processor: coalesces consecutive cheap commands into one debugger
//! round-trip, then demultiplexes the result back onto the individual
//! commands that requested it.

mod processor;

pub use processor::BatchProcessor;
