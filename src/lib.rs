#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]

//! A reactor-style TCP server core: a single-threaded event loop multiplexes
//! many client connections over a readiness selector and dispatches
//! ready-to-run I/O work to a pool of worker threads.
//!
//! The event loop is the sole owner of the selector and the sole mutator of
//! per-connection interest ops. Workers never touch the selector directly;
//! they ask the loop to re-arm interest via [`SelectorTask`]s. See the
//! [`server`] module for the public entry point.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use reactor_server::{Server, ServerConfig};
//!
//! let config = ServerConfig {
//!     local_port: 4100,
//!     num_request_threads: 4,
//!     shutdown_grace_period: Duration::from_secs(5),
//!     ..ServerConfig::default()
//! };
//!
//! let handle = Server::new(config).start().expect("bind failed");
//! handle.request_shutdown("example finished");
//! handle.join();
//! ```

mod config;
mod connection;
mod error;
mod event_loop;
mod queue;
mod selector_task;
mod server;
mod session;
mod worker;

pub use config::ServerConfig;
pub use connection::Connection;
pub use error::ServerError;
pub use queue::{RequestItem, RequestQueue};
pub use selector_task::{SelectorTask, SelectorTaskQueue};
pub use server::{Server, ServerHandle};
pub use session::Session;
pub use worker::{EchoWorker, Worker, WorkerContext, WorkerFactory, WorkerRegistry};
