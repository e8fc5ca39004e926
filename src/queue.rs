//! Request queue: the hand-off point from the event loop to the worker pool.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use mio::Interest;

use crate::session::Session;

/// One item taken off the request queue by a worker.
#[derive(Debug, Clone)]
pub enum RequestItem {
    /// A session whose key is ready, along with the ready ops captured at
    /// dispatch time.
    Ready {
        /// The session to process.
        session: Arc<Mutex<Session>>,
        /// Ready ops captured when the event loop dispatched this session.
        ready: Interest,
    },
    /// Sentinel enqueued once per worker at shutdown so a worker blocked in
    /// [`RequestQueue::take`] wakes immediately instead of waiting for the
    /// next connection.
    Shutdown,
}

/// Unbounded thread-safe FIFO of [`RequestItem`]s. Multi-producer,
/// multi-consumer: the event loop is the only producer in practice, the
/// worker pool shares the consumer side via cloned receivers.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: Sender<RequestItem>,
    rx: Receiver<RequestItem>,
}

impl RequestQueue {
    /// Creates a new, empty queue.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Enqueues a session for processing. Returns `false` if the queue has
    /// no consumers left (all workers have disconnected).
    pub fn insert(&self, session: Arc<Mutex<Session>>, ready: Interest) -> bool {
        self.tx.send(RequestItem::Ready { session, ready }).is_ok()
    }

    /// Enqueues one shutdown sentinel.
    pub fn insert_shutdown(&self) -> bool {
        self.tx.send(RequestItem::Shutdown).is_ok()
    }

    /// Blocks until an item is available, or returns `None` if every
    /// producer has disconnected.
    pub fn take(&self) -> Option<RequestItem> {
        self.rx.recv().ok()
    }

    /// Whether the queue currently holds no items.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_queue_is_empty() {
        let queue = RequestQueue::new();
        assert!(queue.is_empty());
    }

    #[test]
    fn insert_shutdown_is_observed_by_take() {
        let queue = RequestQueue::new();
        assert!(queue.insert_shutdown());
        assert!(matches!(queue.take(), Some(RequestItem::Shutdown)));
    }

    #[test]
    fn take_returns_none_once_every_sender_is_dropped() {
        let queue = RequestQueue::new();
        let rx_only = queue.rx.clone();
        drop(queue);
        assert!(rx_only.recv().is_err());
    }
}
