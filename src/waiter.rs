//! FIFO queue of blocked callers, each with a single-fire delivery slot

use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Identifies one registration in a [`WaiterQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitKey(u64);

/// Blocked callers in arrival order.
///
/// Every registration owns a oneshot slot that fires at most once. The queue
/// must live behind the same lock as the state it hands out: a value is sent
/// while the lock is held, and a caller that gives up calls [`remove`] under
/// that lock. If `remove` returns `false` the slot was already claimed and the
/// value is sitting in the receiver, so the giving-up caller must take it
/// with `try_recv` instead of losing it.
///
/// [`remove`]: WaiterQueue::remove
pub(crate) struct WaiterQueue<T> {
    next_key: u64,
    queue: VecDeque<(WaitKey, oneshot::Sender<T>)>,
}

impl<T> WaiterQueue<T> {
    pub fn new() -> Self {
        Self {
            next_key: 0,
            queue: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Append a waiter to the back of the queue.
    pub fn register(&mut self) -> (WaitKey, oneshot::Receiver<T>) {
        let key = WaitKey(self.next_key);
        self.next_key = self.next_key.wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        self.queue.push_back((key, tx));
        (key, rx)
    }

    /// Deliver `value` to the longest-waiting live caller.
    ///
    /// Registrations whose receiver is gone are discarded on the way. The
    /// value comes back if nobody could take it.
    pub fn notify_one(&mut self, mut value: T) -> Result<(), T> {
        while let Some((key, tx)) = self.queue.pop_front() {
            match tx.send(value) {
                Ok(()) => return Ok(()),
                Err(returned) => {
                    tracing::trace!(waiter = key.0, "skipping abandoned waiter");
                    value = returned;
                }
            }
        }
        Err(value)
    }

    /// Withdraw a registration. Returns `false` if it was already claimed.
    pub fn remove(&mut self, key: WaitKey) -> bool {
        match self.queue.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    /// Fire every registration with a value from `make`, emptying the queue.
    /// Returns how many callers were reached.
    pub fn close_all(&mut self, mut make: impl FnMut() -> T) -> usize {
        self.queue
            .drain(..)
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(_, tx)| tx.send(make()))
            .filter(Result::is_ok)
            .count()
    }
}
