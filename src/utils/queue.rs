//! Blocking FIFO with a terminal closed state.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// The queue has been closed.
///
/// Returned by [`ClosableQueue::push`] after closure, and by
/// [`ClosableQueue::pop`] once the queue is closed and drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("queue closed")]
pub struct QueueClosed;

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Unbounded multi-producer multi-consumer FIFO that can be closed.
///
/// Once closed, the queue never accepts new items. Items that were already
/// queued are still handed out, after which every blocked and every future
/// [`pop`](Self::pop) returns [`QueueClosed`] instead of blocking.
pub struct ClosableQueue<T> {
    state: Mutex<State<T>>,
    cv: Condvar,
}

impl<T> Default for ClosableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClosableQueue<T> {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Enqueue an item and wake one waiter.
    pub fn push(&self, item: T) -> Result<(), QueueClosed> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(QueueClosed);
        }
        state.items.push_back(item);
        drop(state);
        self.cv.notify_one();
        Ok(())
    }

    /// Block until an item is available or the queue is closed.
    pub fn pop(&self) -> Result<T, QueueClosed> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.closed {
                return Err(QueueClosed);
            }
            self.cv.wait(&mut state);
        }
    }

    /// Non-blockingly take the front item, if any.
    ///
    /// Returns `Ok(None)` if the queue is open but empty.
    pub fn try_pop(&self) -> Result<Option<T>, QueueClosed> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => Ok(Some(item)),
            None if state.closed => Err(QueueClosed),
            None => Ok(None),
        }
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.cv.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = ClosableQueue::new();
        for i in 0..5 {
            q.push(i).unwrap();
        }
        assert_eq!(q.len(), 5);
        for i in 0..5 {
            assert_eq!(q.pop(), Ok(i));
        }
        assert!(q.is_empty());
        assert_eq!(q.try_pop(), Ok(None));
    }

    #[test]
    fn test_push_after_close_fails() {
        let q = ClosableQueue::new();
        q.close();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.push(1), Err(QueueClosed));
        assert_eq!(q.pop(), Err(QueueClosed));
        assert_eq!(q.pop(), Err(QueueClosed));
    }

    #[test]
    fn test_queued_items_survive_close() {
        let q = ClosableQueue::new();
        q.push("a").unwrap();
        q.push("b").unwrap();
        q.close();
        assert_eq!(q.pop(), Ok("a"));
        assert_eq!(q.try_pop(), Ok(Some("b")));
        assert_eq!(q.pop(), Err(QueueClosed));
        assert_eq!(q.try_pop(), Err(QueueClosed));
    }

    #[test]
    fn test_close_wakes_every_blocked_pop() {
        let q = Arc::new(ClosableQueue::<u32>::new());
        let (tx, rx) = mpsc::channel();

        let waiters = (0..4)
            .map(|_| {
                let q = q.clone();
                let tx = tx.clone();
                thread::spawn(move || tx.send(q.pop()).unwrap())
            })
            .collect::<Vec<_>>();

        // Nobody may return before closure.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        q.close();

        for _ in 0..4 {
            let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(res, Err(QueueClosed));
        }
        for w in waiters {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_push_wakes_blocked_pop() {
        let q = Arc::new(ClosableQueue::new());
        let consumer = {
            let q = q.clone();
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(20));
        q.push(42u64).unwrap();
        assert_eq!(consumer.join().unwrap(), Ok(42));
    }
}
