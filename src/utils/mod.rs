/// Provide interoperability with C error codes.
mod interop;

/// Blocking FIFO with a terminal closed state.
mod queue;

pub(crate) use self::interop::*;
pub use self::queue::*;
