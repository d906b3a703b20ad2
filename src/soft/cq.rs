use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::rdma::cq::{Cq, RawCq, Wc};

struct Ring {
    entries: VecDeque<Wc>,
    overrun: bool,
}

/// Bounded completion ring written by software queue pairs.
pub(crate) struct CqRing {
    ring: Mutex<Ring>,
    depth: u32,
}

impl CqRing {
    pub fn new(depth: u32) -> Self {
        Self {
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(depth as usize),
                overrun: false,
            }),
            depth,
        }
    }

    /// Append a completion. A full ring is overrun: the entry is lost and
    /// every later poll fails.
    pub fn push(&self, wc: Wc) {
        let mut ring = self.ring.lock();
        if ring.entries.len() >= self.depth as usize {
            if !ring.overrun {
                log::error!(
                    "cordma: completion queue overrun (depth {}), lost {:?}",
                    self.depth,
                    wc
                );
            }
            ring.overrun = true;
            return;
        }
        ring.entries.push_back(wc);
    }
}

impl RawCq for CqRing {
    fn poll_into(&self, wc: &mut [Wc]) -> io::Result<usize> {
        let mut ring = self.ring.lock();
        if ring.overrun {
            return Err(io::Error::from_raw_os_error(libc::EOVERFLOW));
        }
        let n = wc.len().min(ring.entries.len());
        for (slot, entry) in wc.iter_mut().zip(ring.entries.drain(..n)) {
            *slot = entry;
        }
        Ok(n)
    }

    fn capacity(&self) -> u32 {
        self.depth
    }
}

/// Completion queue of a [`SoftNic`](super::SoftNic).
///
/// Clones refer to the same queue.
#[derive(Clone)]
pub struct SoftCq {
    ring: Arc<CqRing>,
    cq: Cq,
}

impl fmt::Debug for SoftCq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SoftCq").field(&self.cq).finish()
    }
}

impl SoftCq {
    pub(crate) fn new(depth: u32) -> Self {
        let ring = Arc::new(CqRing::new(depth));
        let cq = Cq::new(ring.clone());
        Self { ring, cq }
    }

    /// Get the generic completion queue handle, to poll or to hand to a
    /// [`CqPoller`](crate::CqPoller).
    #[inline]
    pub fn cq(&self) -> &Cq {
        &self.cq
    }

    #[inline]
    pub(crate) fn ring(&self) -> &Arc<CqRing> {
        &self.ring
    }
}
