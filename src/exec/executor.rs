use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::registry::CallbackRegistry;
use crate::config::ExecutorConfig;
use crate::rdma::{cq::Wc, type_alias::WrId};
use crate::utils::{ClosableQueue, QueueClosed};

struct Shared {
    queue: ClosableQueue<Wc>,
    registry: CallbackRegistry,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

fn worker_loop(shared: Arc<Shared>, idx: usize) {
    while let Ok(wc) = shared.queue.pop() {
        let wr_id = wc.wr_id();
        let Some(cb) = shared.registry.take(wr_id) else {
            log::warn!("cordma: dropping completion for unknown wr_id {}: {:?}", wr_id, wc);
            continue;
        };

        log::trace!("cordma: worker {} dispatching {:?}", idx, wc);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || cb(wc))) {
            log::error!(
                "cordma: completion callback for wr_id {} panicked: {}",
                wr_id,
                panic_message(payload.as_ref())
            );
        }
    }
    log::debug!("cordma: executor worker {} exiting", idx);
}

/// Completion dispatcher.
///
/// An executor owns the callbacks of every outstanding work request and a
/// fixed pool of worker threads. Completions handed to
/// [`process_wc`](Self::process_wc) are queued; a worker pops each one,
/// removes the callback registered under its `wr_id`, and invokes it. No
/// ordering is guaranteed between completions handled by different workers.
///
/// Callbacks run on worker threads and should not block for long. A
/// panicking callback is logged and does not take its worker down.
pub struct Executor {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    nr_workers: usize,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("nr_workers", &self.nr_workers)
            .field("pending", &self.pending())
            .field("closed", &self.is_shutdown())
            .finish()
    }
}

impl Executor {
    /// Default number of worker threads.
    pub const DEFAULT_WORKERS: usize = 4;

    /// Start an executor with `nr_workers` worker threads.
    pub fn new(nr_workers: usize) -> io::Result<Self> {
        if nr_workers == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "executor needs at least one worker",
            ));
        }

        let shared = Arc::new(Shared {
            queue: ClosableQueue::new(),
            registry: CallbackRegistry::new(),
        });
        let exec = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(nr_workers)),
            nr_workers,
        };
        for idx in 0..nr_workers {
            let shared = exec.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("cordma-exec-{}", idx))
                .spawn(move || worker_loop(shared, idx))?;
            exec.workers.lock().push(handle);
        }
        Ok(exec)
    }

    /// Start an executor as configured.
    pub fn with_config(config: &ExecutorConfig) -> io::Result<Self> {
        Self::new(config.workers)
    }

    /// Number of worker threads.
    #[inline]
    pub fn nr_workers(&self) -> usize {
        self.nr_workers
    }

    /// Number of registered callbacks not yet invoked or released.
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    /// Register a completion callback and return the token to post as the
    /// work request's `wr_id`.
    ///
    /// The callback is invoked at most once, with the completion whose
    /// `wr_id` equals the token. After [`join`](Self::join) it is dropped
    /// immediately instead.
    pub fn register<F>(&self, callback: F) -> WrId
    where
        F: FnOnce(Wc) + Send + 'static,
    {
        self.shared.registry.insert(Box::new(callback))
    }

    /// Release a registered callback without invoking it. Used when the work
    /// request it belongs to could not be posted.
    ///
    /// Return `false` if the token is unknown or already consumed.
    pub fn cancel(&self, wr_id: WrId) -> bool {
        self.shared.registry.take(wr_id).is_some()
    }

    /// Hand a completion over to the workers.
    ///
    /// Fail with [`QueueClosed`] once the executor is shut down.
    pub fn process_wc(&self, wc: Wc) -> Result<(), QueueClosed> {
        log::trace!("cordma: queued {:?}", wc);
        self.shared.queue.push(wc)
    }

    /// Stop accepting completions. Workers finish what is already queued,
    /// then exit. Idempotent.
    pub fn shutdown(&self) {
        self.shared.queue.close();
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Wait for the workers to exit, then release every callback still
    /// outstanding without invoking it; futures waiting on them resolve to
    /// [`Error::Cancelled`](crate::Error::Cancelled).
    ///
    /// Call [`shutdown`](Self::shutdown) first, or this blocks until someone
    /// does. When called from a worker thread, that worker is not waited for.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        let me = thread::current().id();
        for handle in handles {
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                log::error!("cordma: executor worker terminated abnormally");
            }
        }

        let released = self.shared.registry.close();
        if released > 0 {
            log::debug!("cordma: released {} outstanding callbacks", released);
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}
