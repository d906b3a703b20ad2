//! Completion-driven execution.
//!
//! A [`CqPoller`] drains a completion queue and feeds each record to an
//! [`Executor`], whose workers invoke the callback registered for the
//! record's `wr_id`. Queue pair verbs register a callback that completes a
//! [`WrFuture`], which is how an awaiting task gets resumed.

mod executor;
mod op;
mod poller;
mod registry;

pub use self::executor::*;
pub use self::op::*;
pub use self::poller::*;
