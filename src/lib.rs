//! Completion-driven RDMA queue pairs with `async` verbs.
//!
//! `cordma` turns RDMA completions into resumed futures. Every verb on a
//! [`Qp`] posts a work request and returns a [`WrFuture`]; a [`CqPoller`]
//! thread drains the completion queue and hands each [`Wc`] to an
//! [`Executor`], whose workers complete the future registered under the
//! completion's `wr_id`. Futures are runtime-agnostic and may be resumed on
//! any executor worker.
//!
//! Queue pairs are stood up by exchanging [`QpHandshake`](ctrl::QpHandshake)s
//! over an ordinary byte stream, see [`ctrl::Acceptor`] and
//! [`ctrl::Connector`].
//!
//! The device is reached through the [`RawCq`] and [`RawQp`] traits. The
//! [`soft`] module implements them in-process, which is enough to run the
//! whole stack without RDMA hardware.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use cordma::prelude::*;
//! use cordma::soft::{Fabric, QpBuilder};
//!
//! fn main() -> anyhow::Result<()> {
//!     let nic = Fabric::new().open_nic();
//!     let cq = nic.create_cq(Cq::DEFAULT_CQ_DEPTH)?;
//!     let exec = Arc::new(Executor::new(2)?);
//!     let _poller = CqPoller::spawn(cq.cq().clone(), exec.clone())?;
//!
//!     let builder = QpBuilder::new(&nic).send_cq(&cq).recv_cq(&cq);
//!     let mut a = Qp::new(Arc::new(builder.build()?), exec.clone());
//!     let mut b = Qp::new(Arc::new(builder.build()?), exec.clone());
//!     ctrl::Connector::connect_local(&mut a, &mut b)?;
//!
//!     let src = nic.reg_mr(64)?;
//!     let dst = nic.reg_mr(64)?;
//!     src.with_bytes_mut(|b| b.fill(0x42));
//!
//!     let recv = b.recv(&[dst.as_slice()])?;
//!     let sent = futures::executor::block_on(a.send(&[src.as_slice()])?)?;
//!     let got = futures::executor::block_on(recv)?;
//!     assert_eq!((sent, got.len), (64, 64));
//!     assert_eq!(dst.to_vec(), vec![0x42; 64]);
//!     Ok(())
//! }
//! ```
//!
//! ## Warning
//!
//! **The interfaces are unstable and up to change!**

mod error;
mod rdma;

pub mod config;
pub mod exec;
pub mod prelude;
pub mod soft;
pub mod utils;
pub mod wire;

/// Connection management utilities.
pub mod ctrl;

pub use config::Config;
pub use error::{Error, Result};
pub use exec::{CqPoller, Executor, PollerError, RecvCompletion, WrFuture};
pub use rdma::{cq::*, mr::*, qp::*, type_alias::*, wr::*};
