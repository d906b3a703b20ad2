use std::fmt;
use std::hint;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use quanta::Instant;
use thiserror::Error;

use super::Executor;
use crate::config::PollerConfig;
use crate::error::{Error, Result};
use crate::rdma::cq::{Cq, Wc};

/// Poller creation error type.
#[derive(Debug, Error)]
pub enum PollerError {
    /// Another live poller already owns the completion queue.
    #[error("completion queue is already polled by another poller")]
    AlreadyPolled,

    /// The polling thread could not be started.
    #[error("cannot spawn poller thread")]
    Spawn(#[from] io::Error),
}

fn poll_loop(
    cq: Cq,
    exec: Arc<Executor>,
    stop: Arc<AtomicBool>,
    batch: usize,
    idle_spin: Duration,
) -> Result<()> {
    let res = drain(&cq, &exec, &stop, batch, idle_spin);
    cq.release();
    res
}

fn drain(
    cq: &Cq,
    exec: &Executor,
    stop: &AtomicBool,
    batch: usize,
    idle_spin: Duration,
) -> Result<()> {
    let mut wc = vec![Wc::default(); batch];
    let mut idle_since: Option<Instant> = None;

    while !stop.load(Ordering::Acquire) {
        let n = match cq.poll_into(&mut wc) {
            Ok(n) => n,
            Err(e) => {
                log::error!("cordma: failed to poll completion queue, poller stopping: {}", e);
                return Err(Error::Poll(e));
            }
        };

        if n == 0 {
            let since = *idle_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= idle_spin {
                thread::yield_now();
            } else {
                hint::spin_loop();
            }
            continue;
        }

        idle_since = None;
        for wc in &wc[..n] {
            if exec.process_wc(*wc).is_err() {
                log::debug!("cordma: executor closed, poller stopping");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Completion poller.
///
/// Owns one thread that drains a completion queue in batches and hands
/// every record, in polled order, to an [`Executor`]. A completion queue is
/// polled by at most one live poller.
///
/// The thread stops when asked to, when polling fails, or when the
/// executor stops accepting completions. A polling failure is fatal to the
/// poller and is returned by [`stop`](Self::stop). Dropping the poller
/// stops it and waits for the thread.
pub struct CqPoller {
    cq: Cq,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl fmt::Debug for CqPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CqPoller")
            .field("cq", &self.cq)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl CqPoller {
    /// Start polling `cq` with default settings.
    pub fn spawn(cq: Cq, exec: Arc<Executor>) -> Result<Self, PollerError> {
        Self::spawn_with(cq, exec, &PollerConfig::default())
    }

    /// Start polling `cq` as configured.
    pub fn spawn_with(
        cq: Cq,
        exec: Arc<Executor>,
        config: &PollerConfig,
    ) -> Result<Self, PollerError> {
        if !cq.claim() {
            return Err(PollerError::AlreadyPolled);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let (cq, stop) = (cq.clone(), stop.clone());
            let batch = config.batch_size.max(1);
            let idle_spin = config.idle_spin();
            thread::Builder::new()
                .name("cordma-poller".to_string())
                .spawn(move || poll_loop(cq, exec, stop, batch, idle_spin))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                cq.release();
                return Err(e.into());
            }
        };

        Ok(Self {
            cq,
            stop,
            handle: Some(handle),
        })
    }

    /// Get the polled completion queue.
    #[inline]
    pub fn cq(&self) -> &Cq {
        &self.cq
    }

    /// Whether the polling thread has exited.
    pub fn is_stopped(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the polling thread and wait for it.
    ///
    /// Fail with [`Error::Poll`] if the thread had stopped because polling
    /// the completion queue failed. The error is reported once; later calls
    /// return `Ok(())`.
    ///
    /// Completions already handed to the executor are unaffected; those
    /// still in the completion queue stay there.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(res) => res,
            Err(_) => {
                log::error!("cordma: poller thread terminated abnormally");
                self.cq.release();
                Ok(())
            }
        }
    }
}

impl Drop for CqPoller {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::debug!("cordma: dropped poller had failed: {}", e);
        }
    }
}
