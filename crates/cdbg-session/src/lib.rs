//! A single debugger session: owns the process adapter, command queue, and
//! batch processor, and drives the `Initializing` -> `Active` -> `Closing`
//! -> `Closed` state machine.

mod session;

pub use session::SessionHandle;
