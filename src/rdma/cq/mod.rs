//! Completion queue and Work completion.

mod wc;

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

pub use self::wc::*;

/// Device-side completion queue.
///
/// This is the seam to the verbs layer: an implementation wraps whatever the
/// device exposes (`ibv_poll_cq` on real hardware, or the in-process
/// [`SoftCq`](crate::soft::SoftCq)).
pub trait RawCq: Send + Sync {
    /// Non-blockingly poll into the given buffer and return the number of
    /// entries filled. Returning `Ok(0)` means that nothing is ready, which
    /// is not an error.
    fn poll_into(&self, wc: &mut [Wc]) -> io::Result<usize>;

    /// Number of entries the queue can hold.
    fn capacity(&self) -> u32;
}

struct CqInner {
    raw: Arc<dyn RawCq>,
    polled_by_poller: AtomicBool,
}

/// Completion queue.
///
/// `Cq` is a cheap, clonable reference to the underlying queue. Polling is
/// meant for a single poller at a time; a [`CqPoller`](crate::CqPoller)
/// claims the queue for its whole lifetime.
#[derive(Clone)]
pub struct Cq {
    inner: Arc<CqInner>,
}

impl fmt::Debug for Cq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cq")
            .field("capacity", &self.capacity())
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

impl Cq {
    /// The default CQ depth.
    pub const DEFAULT_CQ_DEPTH: u32 = 128;

    /// Wrap a device completion queue.
    pub fn new(raw: Arc<dyn RawCq>) -> Self {
        Self {
            inner: Arc::new(CqInner {
                raw,
                polled_by_poller: AtomicBool::new(false),
            }),
        }
    }

    /// Get the capacity of the completion queue.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.inner.raw.capacity()
    }

    /// Non-blockingly poll one work completion.
    ///
    /// It is the caller's responsibility to check the status code of the
    /// returned work completion entry.
    #[inline]
    pub fn poll_one(&self) -> io::Result<Option<Wc>> {
        let mut wc = [Wc::default()];
        let n = self.inner.raw.poll_into(&mut wc)?;
        Ok((n > 0).then_some(wc[0]))
    }

    /// Non-blockingly poll into the given buffer. Return the number of work
    /// completions polled, which is at most `wc.len()` and may be zero.
    ///
    /// **NOTE:** The validity of entries beyond the returned count is not
    /// guaranteed.
    #[inline]
    pub fn poll_into(&self, wc: &mut [Wc]) -> io::Result<usize> {
        if wc.is_empty() {
            return Ok(0);
        }
        let n = self.inner.raw.poll_into(wc)?;
        debug_assert!(n <= wc.len());
        Ok(n)
    }

    /// Non-blockingly poll with a limited number of expected work completions.
    #[inline]
    pub fn poll_some(&self, num: u32) -> io::Result<Vec<Wc>> {
        let mut wc = vec![Wc::default(); num as usize];
        let n = self.poll_into(&mut wc)?;
        wc.truncate(n);
        Ok(wc)
    }

    /// Non-blockingly poll as many completions as the queue can hold.
    ///
    /// **NOTE:** This allocates a buffer of the queue's capacity. Prefer
    /// [`poll_into`](Self::poll_into) with a reused buffer on hot paths.
    #[inline]
    pub fn poll(&self) -> io::Result<Vec<Wc>> {
        self.poll_some(self.capacity())
    }

    /// Try to claim exclusive polling rights. Returns `false` if another
    /// poller already holds them.
    pub(crate) fn claim(&self) -> bool {
        self.inner
            .polled_by_poller
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give up polling rights obtained with [`claim`](Self::claim).
    pub(crate) fn release(&self) {
        self.inner.polled_by_poller.store(false, Ordering::Release);
    }

    /// Whether a poller currently owns this queue.
    pub fn is_claimed(&self) -> bool {
        self.inner.polled_by_poller.load(Ordering::Acquire)
    }
}

/// CQ creation error type.
#[derive(Debug, Error)]
pub enum CqCreationError {
    /// The device returned an error.
    #[error("I/O error from device")]
    IoError(#[from] io::Error),

    /// The capacity of the CQ is larger than the device's maximum allowed
    /// capacity, which is contained in the error.
    #[error("CQ capacity too large (maximum: {0})")]
    TooManyCqes(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedCq {
        ready: Mutex<VecDeque<Wc>>,
        fail: AtomicBool,
    }

    impl RawCq for ScriptedCq {
        fn poll_into(&self, wc: &mut [Wc]) -> io::Result<usize> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            let mut ready = self.ready.lock();
            let n = wc.len().min(ready.len());
            for slot in wc.iter_mut().take(n) {
                *slot = ready.pop_front().unwrap();
            }
            Ok(n)
        }

        fn capacity(&self) -> u32 {
            64
        }
    }

    fn scripted(n: u64) -> (Arc<ScriptedCq>, Cq) {
        let raw = Arc::new(ScriptedCq {
            ready: Mutex::new(
                (0..n)
                    .map(|i| Wc::new(i, WcStatus::Success, WcOpcode::Send, 8))
                    .collect(),
            ),
            fail: AtomicBool::new(false),
        });
        (raw.clone(), Cq::new(raw))
    }

    #[test]
    fn test_poll_empty_returns_zero() {
        let (_, cq) = scripted(0);
        let mut buf = [Wc::default(); 16];
        assert_eq!(cq.poll_into(&mut buf).unwrap(), 0);
        assert!(cq.poll_one().unwrap().is_none());
        assert!(cq.poll().unwrap().is_empty());
    }

    #[test]
    fn test_poll_batch_is_bounded() {
        let (_, cq) = scripted(20);
        let mut buf = [Wc::default(); 16];
        assert_eq!(cq.poll_into(&mut buf).unwrap(), 16);
        assert_eq!(buf[15].wr_id(), 15);
        assert_eq!(cq.poll_into(&mut buf).unwrap(), 4);
        assert_eq!(buf[0].wr_id(), 16);
        assert_eq!(cq.poll_into(&mut buf).unwrap(), 0);
        assert_eq!(cq.poll_into(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_poll_one_and_some() {
        let (_, cq) = scripted(3);
        assert_eq!(cq.poll_one().unwrap().map(|wc| wc.wr_id()), Some(0));
        let rest = cq.poll_some(8).unwrap();
        assert_eq!(rest.iter().map(Wc::wr_id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_poll_error_is_not_empty() {
        let (raw, cq) = scripted(1);
        raw.fail.store(true, Ordering::Relaxed);
        assert!(cq.poll_one().is_err());
        assert!(cq.poll_into(&mut [Wc::default(); 4]).is_err());
    }

    #[test]
    fn test_claim_is_exclusive() {
        let (_, cq) = scripted(0);
        let other = cq.clone();
        assert!(cq.claim());
        assert!(!other.claim());
        assert!(other.is_claimed());
        cq.release();
        assert!(other.claim());
    }
}
