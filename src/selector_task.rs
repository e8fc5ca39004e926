//! Selector-task queue: the hand-off point from workers back to the event
//! loop, asking it to re-arm or clear interest bits.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use mio::{Interest, Token, Waker};

/// A message from a worker to the event loop asking it to add or remove
/// interest bits on a handle. Immutable once enqueued.
#[derive(Debug, Clone, Copy)]
pub enum SelectorTask {
    /// Add `ops` to the handle's interest set.
    Add {
        /// Selection handle to modify.
        token: Token,
        /// Interest ops to add.
        ops: Interest,
    },
    /// Remove `ops` from the handle's interest set.
    Remove {
        /// Selection handle to modify.
        token: Token,
        /// Interest ops to remove.
        ops: Interest,
    },
    /// The connection behind this handle was closed by the worker that held
    /// it (end-of-stream or an unrecoverable I/O error). Asks the event loop
    /// to drop the session from its table instead of leaving a dormant
    /// entry behind.
    Closed {
        /// Selection handle whose session should be reaped.
        token: Token,
    },
}

impl SelectorTask {
    /// The selection handle this task targets.
    pub fn token(&self) -> Token {
        match self {
            SelectorTask::Add { token, .. }
            | SelectorTask::Remove { token, .. }
            | SelectorTask::Closed { token } => *token,
        }
    }
}

/// Producer handle for the selector-task queue. Held by workers. Enqueuing a
/// task always wakes the selector (§5(d): waking after enqueuing is
/// mandatory) so the event loop's blocking `poll()` returns promptly.
#[derive(Debug, Clone)]
pub struct SelectorTaskQueue {
    tx: Sender<SelectorTask>,
    waker: Arc<Waker>,
}

impl SelectorTaskQueue {
    /// Creates the queue's producer/consumer pair, bound to the given
    /// waker. The consumer side is kept private to the event loop.
    pub(crate) fn new(waker: Arc<Waker>) -> (Self, Receiver<SelectorTask>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx, waker }, rx)
    }

    /// Requests that `ops` be added to `token`'s interest set, then wakes
    /// the selector.
    pub fn add_interest(&self, token: Token, ops: Interest) {
        let _ = self.tx.send(SelectorTask::Add { token, ops });
        let _ = self.waker.wake();
    }

    /// Requests that `ops` be removed from `token`'s interest set, then
    /// wakes the selector.
    pub fn remove_interest(&self, token: Token, ops: Interest) {
        let _ = self.tx.send(SelectorTask::Remove { token, ops });
        let _ = self.waker.wake();
    }

    /// Tells the event loop that the connection behind `token` was closed,
    /// so it can drop the session from its table rather than leaving it
    /// dormant indefinitely.
    pub fn notify_closed(&self, token: Token) {
        let _ = self.tx.send(SelectorTask::Closed { token });
        let _ = self.waker.wake();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mio::Poll;

    fn queue() -> (SelectorTaskQueue, Receiver<SelectorTask>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(99)).unwrap());
        SelectorTaskQueue::new(waker)
    }

    #[test]
    fn add_interest_enqueues_a_matching_task() {
        let (queue, rx) = queue();
        queue.add_interest(Token(1), Interest::READABLE);
        let task = rx.try_recv().unwrap();
        assert_eq!(task.token(), Token(1));
        assert!(matches!(task, SelectorTask::Add { ops, .. } if ops == Interest::READABLE));
    }

    #[test]
    fn remove_interest_enqueues_a_matching_task() {
        let (queue, rx) = queue();
        queue.remove_interest(Token(2), Interest::WRITABLE);
        let task = rx.try_recv().unwrap();
        assert_eq!(task.token(), Token(2));
        assert!(matches!(task, SelectorTask::Remove { ops, .. } if ops == Interest::WRITABLE));
    }

    #[test]
    fn notify_closed_enqueues_a_matching_task() {
        let (queue, rx) = queue();
        queue.notify_closed(Token(3));
        let task = rx.try_recv().unwrap();
        assert_eq!(task.token(), Token(3));
        assert!(matches!(task, SelectorTask::Closed { .. }));
    }
}
