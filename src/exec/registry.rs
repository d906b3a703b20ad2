use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::rdma::{cq::Wc, type_alias::WrId};

/// Completion callback.
pub(crate) type Callback = Box<dyn FnOnce(Wc) + Send + 'static>;

/// Owning table of outstanding completion callbacks, keyed by the token
/// posted as `wr_id`.
///
/// Every callback leaves the table exactly once: taken by the worker that
/// invokes it, cancelled after a rejected post, or dropped on close.
pub(crate) struct CallbackRegistry {
    next: AtomicU64,
    // `Mutex` only makes the table `Sync`; an entry is never locked while
    // it is in the table.
    callbacks: DashMap<WrId, Mutex<Callback>>,
    closed: AtomicBool,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            callbacks: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Store a callback and return its token.
    ///
    /// Once the registry is closed the callback is dropped at once; the
    /// returned token then matches nothing.
    pub fn insert(&self, cb: Callback) -> WrId {
        let wr_id = self.next.fetch_add(1, Ordering::Relaxed);
        self.callbacks.insert(wr_id, Mutex::new(cb));

        // Pairs with the fence in `close`: either `close` sees this entry, or
        // this sees the flag.
        fence(Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            drop(self.take(wr_id));
        }
        wr_id
    }

    /// Remove the callback for `wr_id`, if still outstanding.
    pub fn take(&self, wr_id: WrId) -> Option<Callback> {
        self.callbacks.remove(&wr_id).map(|(_, cb)| cb.into_inner())
    }

    /// Drop every outstanding callback without invoking it and refuse new
    /// ones. Return how many were dropped.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let ids: Vec<WrId> = self.callbacks.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.take(id))
            .map(drop)
            .count()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }
}
