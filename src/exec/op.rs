use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;

use crate::error::{Error, Result};
use crate::rdma::{cq::Wc, type_alias::*};

/// Outcome of a successful receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecvCompletion {
    /// Number of bytes written into the receive buffers.
    pub len: usize,

    /// Immediate data sent along with the message, if any.
    pub imm: Option<ImmData>,
}

impl RecvCompletion {
    pub(crate) fn from_wc(wc: &Wc) -> Self {
        Self {
            len: wc.bytes(),
            imm: wc.imm(),
        }
    }
}

/// Future of one posted work request.
///
/// Resolved by an executor worker when the completion arrives, so the task
/// awaiting it is woken from that worker's thread. Resolves to:
///
/// - the operation's output if the completion status is success;
/// - [`Error::Completion`] with the hardware status otherwise;
/// - [`Error::Cancelled`] if the executor was torn down first.
#[must_use = "the result of a posted operation is only observable by awaiting it"]
pub struct WrFuture<T> {
    wr_id: WrId,
    rx: oneshot::Receiver<Wc>,
    map: fn(&Wc) -> T,
}

impl<T> fmt::Debug for WrFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrFuture").field("wr_id", &self.wr_id).finish()
    }
}

impl<T> WrFuture<T> {
    pub(crate) fn new(wr_id: WrId, rx: oneshot::Receiver<Wc>, map: fn(&Wc) -> T) -> Self {
        Self { wr_id, rx, map }
    }

    /// The `wr_id` the work request was posted with.
    #[inline]
    pub fn wr_id(&self) -> WrId {
        self.wr_id
    }
}

impl<T> Future for WrFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Ready(Ok(wc)) if wc.status().is_success() => Poll::Ready(Ok((this.map)(&wc))),
            Poll::Ready(Ok(wc)) => Poll::Ready(Err(Error::Completion {
                wr_id: wc.wr_id(),
                status: wc.status(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdma::cq::{WcOpcode, WcStatus};
    use futures::executor::block_on;

    #[test]
    fn test_success_maps_output() {
        let (tx, rx) = oneshot::channel();
        let fut = WrFuture::new(3, rx, Wc::bytes);
        tx.send(Wc::new(3, WcStatus::Success, WcOpcode::Send, 64))
            .unwrap();
        assert_eq!(block_on(fut).unwrap(), 64);
    }

    #[test]
    fn test_error_status() {
        let (tx, rx) = oneshot::channel();
        let fut = WrFuture::new(3, rx, RecvCompletion::from_wc);
        tx.send(Wc::new(3, WcStatus::WrFlushErr, WcOpcode::Recv, 0))
            .unwrap();
        let err = block_on(fut).unwrap_err();
        assert_eq!(err.wc_status(), Some(WcStatus::WrFlushErr));
    }

    #[test]
    fn test_dropped_sender_cancels() {
        let (tx, rx) = oneshot::channel::<Wc>();
        let fut = WrFuture::new(3, rx, Wc::bytes);
        drop(tx);
        assert!(matches!(block_on(fut), Err(Error::Cancelled)));
    }

    #[test]
    fn test_resolves_across_threads() {
        let (tx, rx) = oneshot::channel();
        let fut = WrFuture::new(9, rx, RecvCompletion::from_wc);
        let t = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            tx.send(Wc::new(9, WcStatus::Success, WcOpcode::Recv, 5).with_imm(1))
                .unwrap();
        });
        assert_eq!(
            block_on(fut).unwrap(),
            RecvCompletion {
                len: 5,
                imm: Some(1)
            }
        );
        t.join().unwrap();
    }
}
