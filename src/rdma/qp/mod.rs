//! Queue pair and related types.

use std::fmt;
use std::io;
use std::sync::Arc;

use futures::channel::oneshot;
use thiserror::Error;

use crate::ctrl::QpHandshake;
use crate::error::{Error, Result};
use crate::exec::{Executor, RecvCompletion, WrFuture};
use crate::rdma::{cq::Wc, mr::*, type_alias::*, wr::*};

pub use self::caps::*;
pub use self::endpoint::*;
pub use self::state::*;

mod caps;
mod endpoint;
mod state;

/// Device-side queue pair.
///
/// This is the seam to the verbs layer. Posting only enqueues: the outcome
/// of every work request is reported later through the queue pair's
/// completion queues, carrying the request's `wr_id`.
pub trait RawQp: Send + Sync {
    /// Routable parameters of this queue pair.
    fn endpoint(&self) -> QpEndpoint;

    /// Current state.
    fn state(&self) -> QpState;

    /// Capabilities the queue pair was created with.
    fn caps(&self) -> QpCaps;

    /// Bring the queue pair from RESET through INIT and RTR to RTS,
    /// targeting the given peer.
    fn connect(&self, peer: &QpEndpoint) -> io::Result<()>;

    /// Post a send-queue work request.
    fn post_send(&self, wr: &SendWr) -> io::Result<()>;

    /// Post a receive-queue work request.
    fn post_recv(&self, wr: &RecvWr) -> io::Result<()>;
}

/// Something that can create fresh queue pairs, e.g. a QP builder bound to a
/// device and its completion queues.
pub trait QpFactory: Send + Sync {
    fn create_qp(&self) -> Result<Arc<dyn RawQp>, QpCreationError>;
}

/// Queue pair creation error type.
#[derive(Debug, Error)]
pub enum QpCreationError {
    /// The device returned an error.
    #[error("I/O error from device")]
    IoError(#[from] io::Error),

    /// Specified capabilities are not supported by the device.
    /// The three fields are for the capability name, the maximum supported
    /// value, and the required value.
    #[error("capability not enough: {0} supports up to {1}, {2} required")]
    CapabilityNotEnough(String, u32, u32),
}

/// Explain `post_recv` errors.
pub(crate) fn recv_err_explanation(ret: i32) -> Option<&'static str> {
    match ret {
        libc::EINVAL => Some("invalid work request"),
        libc::ENOMEM => {
            Some("recv queue is full, or not enough resources to complete this operation")
        }
        libc::EFAULT => Some("invalid QP"),
        _ => None,
    }
}

/// Explain `post_send` errors.
pub(crate) fn send_err_explanation(ret: i32) -> Option<&'static str> {
    match ret {
        libc::EINVAL => Some("invalid work request"),
        libc::ENOMEM => {
            Some("send queue is full, or not enough resources to complete this operation")
        }
        libc::EFAULT => Some("invalid QP"),
        _ => None,
    }
}

/// Queue pair with awaitable verbs.
///
/// Every verb registers a completion callback with the [`Executor`], posts
/// a work request carrying the callback's token as `wr_id`, and returns a
/// [`WrFuture`] resolved by an executor worker once the completion arrives.
/// Posting is eager: the work request is on the device when the verb
/// returns, so several operations can be in flight before any is awaited.
///
/// A posted operation completes exactly once. Dropping the future does not
/// cancel the operation; its completion is still consumed and discarded.
pub struct Qp {
    raw: Arc<dyn RawQp>,
    exec: Arc<Executor>,
    peer: Option<QpHandshake>,
}

impl fmt::Debug for Qp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qp")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("peer", &self.peer.as_ref().map(QpHandshake::endpoint))
            .finish()
    }
}

impl Qp {
    /// Global initial packet sequence number.
    pub const GLOBAL_INIT_PSN: Psn = 0;

    /// Wrap a device queue pair. Completions of its work requests must be
    /// fed to `exec`, normally by a [`CqPoller`](crate::CqPoller).
    pub fn new(raw: Arc<dyn RawQp>, exec: Arc<Executor>) -> Self {
        Self {
            raw,
            exec,
            peer: None,
        }
    }

    /// Get the underlying device queue pair.
    #[inline]
    pub fn raw(&self) -> &Arc<dyn RawQp> {
        &self.raw
    }

    /// Get the executor this queue pair dispatches completions to.
    #[inline]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.exec
    }

    /// Get the endpoint information of this QP.
    #[inline]
    pub fn endpoint(&self) -> QpEndpoint {
        self.raw.endpoint()
    }

    /// Get the current state of the queue pair.
    #[inline]
    pub fn state(&self) -> QpState {
        self.raw.state()
    }

    /// Get the capabilities of this QP.
    #[inline]
    pub fn caps(&self) -> QpCaps {
        self.raw.caps()
    }

    /// Get the handshake received from the remote peer, including its user
    /// data. `None` until the QP is bound to a peer.
    #[inline]
    pub fn peer(&self) -> Option<&QpHandshake> {
        self.peer.as_ref()
    }

    /// Bind the queue pair to a remote peer and bring it up to RTS.
    ///
    /// # Panics
    ///
    /// Panic if the QP is already bound to a remote peer.
    pub fn bind_peer(&mut self, peer: QpHandshake) -> io::Result<()> {
        assert!(self.peer.is_none(), "QP already bound to a remote peer");
        self.raw.connect(&peer.endpoint())?;
        self.peer = Some(peer);
        Ok(())
    }

    /// Post a send-queue work request whose completion runs `handler` on an
    /// executor worker. Return the `wr_id` the request was posted with.
    ///
    /// If the device rejects the request, `handler` is dropped without
    /// being invoked.
    pub fn post_send_with<F>(&self, sgl: &[MrSlice], op: SendOp, handler: F) -> Result<WrId>
    where
        F: FnOnce(Wc) + Send + 'static,
    {
        let wr_id = self.exec.register(handler);
        if let Err(e) = self.raw.post_send(&SendWr::new(wr_id, sgl, op)) {
            self.exec.cancel(wr_id);
            return Err(Error::Post(e));
        }
        Ok(wr_id)
    }

    /// Post a receive-queue work request whose completion runs `handler` on
    /// an executor worker. Return the `wr_id` the request was posted with.
    ///
    /// If the device rejects the request, `handler` is dropped without
    /// being invoked.
    pub fn post_recv_with<F>(&self, sgl: &[MrSlice], handler: F) -> Result<WrId>
    where
        F: FnOnce(Wc) + Send + 'static,
    {
        let wr_id = self.exec.register(handler);
        if let Err(e) = self.raw.post_recv(&RecvWr::new(wr_id, sgl)) {
            self.exec.cancel(wr_id);
            return Err(Error::Post(e));
        }
        Ok(wr_id)
    }

    fn send_future<T>(
        &self,
        sgl: &[MrSlice],
        op: SendOp,
        map: fn(&Wc) -> T,
    ) -> Result<WrFuture<T>> {
        let (tx, rx) = oneshot::channel();
        let wr_id = self.post_send_with(sgl, op, move |wc| {
            // The receiver may have been dropped; the completion is then discarded.
            let _ = tx.send(wc);
        })?;
        Ok(WrFuture::new(wr_id, rx, map))
    }

    /// Post an RDMA send. Resolve to the number of bytes sent.
    pub fn send(&self, sgl: &[MrSlice]) -> Result<WrFuture<usize>> {
        self.send_future(sgl, SendOp::Send { imm: None }, Wc::bytes)
    }

    /// Post an RDMA send with immediate data.
    pub fn send_with_imm(&self, sgl: &[MrSlice], imm: ImmData) -> Result<WrFuture<usize>> {
        self.send_future(sgl, SendOp::Send { imm: Some(imm) }, Wc::bytes)
    }

    /// Post an RDMA receive. Resolve to the received length and the
    /// immediate data, if the peer sent any.
    ///
    /// **NOTE:** the buffers are written by the device once the peer sends.
    pub fn recv(&self, sgl: &[MrSlice]) -> Result<WrFuture<RecvCompletion>> {
        let (tx, rx) = oneshot::channel();
        let wr_id = self.post_recv_with(sgl, move |wc| {
            let _ = tx.send(wc);
        })?;
        Ok(WrFuture::new(wr_id, rx, RecvCompletion::from_wc))
    }

    /// Post an RDMA write of the local buffers into `remote`.
    pub fn write(&self, sgl: &[MrSlice], remote: &MrRemote) -> Result<WrFuture<usize>> {
        let op = SendOp::Write {
            remote: *remote,
            imm: None,
        };
        self.send_future(sgl, op, Wc::bytes)
    }

    /// Post an RDMA write with immediate data. The peer must have a receive
    /// posted, which completes with the immediate.
    pub fn write_with_imm(
        &self,
        sgl: &[MrSlice],
        remote: &MrRemote,
        imm: ImmData,
    ) -> Result<WrFuture<usize>> {
        let op = SendOp::Write {
            remote: *remote,
            imm: Some(imm),
        };
        self.send_future(sgl, op, Wc::bytes)
    }

    /// Post an RDMA read from `remote` into the local buffers.
    pub fn read(&self, sgl: &[MrSlice], remote: &MrRemote) -> Result<WrFuture<usize>> {
        self.send_future(sgl, SendOp::Read { remote: *remote }, Wc::bytes)
    }

    /// Post an RDMA compare-and-swap on the first 8 bytes of `remote`.
    ///
    /// The original remote value is written into `local`, which must be an
    /// 8-byte slice; the future resolves to the number of bytes fetched.
    pub fn compare_swap(
        &self,
        local: MrSlice,
        remote: &MrRemote,
        compare: u64,
        swap: u64,
    ) -> Result<WrFuture<usize>> {
        let op = SendOp::CompareSwap {
            remote: *remote,
            compare,
            swap,
        };
        self.send_future(&[local], op, Wc::bytes)
    }

    /// Post an RDMA fetch-and-add on the first 8 bytes of `remote`.
    ///
    /// The original remote value is written into `local`, which must be an
    /// 8-byte slice.
    pub fn fetch_add(
        &self,
        local: MrSlice,
        remote: &MrRemote,
        add: u64,
    ) -> Result<WrFuture<usize>> {
        let op = SendOp::FetchAdd {
            remote: *remote,
            add,
        };
        self.send_future(&[local], op, Wc::bytes)
    }
}
