//! The `cordma` prelude.
//!
//! The purpose of this module is to alleviate imports of common
//! functionalities.

pub use crate::ctrl::{self, Acceptor, Connector, QpHandshake};
pub use crate::exec::{CqPoller, Executor, RecvCompletion, WrFuture};
pub use crate::rdma::cq::{Cq, Wc, WcOpcode, WcStatus};
pub use crate::rdma::mr::{MrRemote, MrSlice, Permission, Slicing};
pub use crate::rdma::qp::{Qp, QpCaps, QpEndpoint, QpFactory, QpState, RawQp};
pub use crate::rdma::wr::*;
pub use crate::{Config, Error, Result};
