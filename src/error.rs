//! Error taxonomy for the server core.
//!
//! Only [`ServerError::Bind`] ever propagates out of [`crate::Server::start`].
//! Every other variant is caught at its component boundary, logged, and
//! handled by dropping the affected dispatch, connection, or task — never by
//! unwinding the event loop or a worker thread.

use std::io;

/// Errors raised by the server core.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not bind the configured address. Fatal;
    /// surfaced to the caller of [`crate::Server::start`].
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the listener attempted to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A single accept attempt failed. Logged and the loop continues.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// Constructing a [`crate::Session`] for an accepted socket failed. The
    /// accepted socket is closed.
    #[error("session initialization failed: {0}")]
    SessionInit(#[source] io::Error),

    /// A read or write on a connection failed. The connection is closed and
    /// not re-armed.
    #[error("io error on token {token}: {source}")]
    Io {
        /// The selection handle the error occurred on.
        token: usize,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A selector task referenced an invalid/cancelled key or a closed
    /// selector. Logged at warn; the task is dropped.
    #[error("stale selector task for token {token}")]
    StaleKey {
        /// The selection handle the task referenced.
        token: usize,
    },

    /// The request queue refused a session. Logged at warn; the interest bit
    /// stays cleared so the connection is dormant until external stimulus.
    #[error("request queue rejected session for token {token}")]
    QueueRejected {
        /// The selection handle whose dispatch was dropped.
        token: usize,
    },

    /// A worker raised unexpectedly. Caught at the worker run-loop boundary.
    #[error("worker fault: {0}")]
    WorkerFault(String),

    /// A worker failed to stop within the shutdown grace period.
    #[error("worker {worker} did not stop within the grace period")]
    ShutdownEscalation {
        /// Index of the worker within the pool.
        worker: usize,
    },
}
