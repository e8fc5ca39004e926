//! Server configuration.
//!
//! Replaces the original properties-file binding with a plain struct passed
//! directly into [`crate::Server::new`]. No process-wide mutable
//! configuration state exists.

use std::time::Duration;

/// Configuration for a [`crate::Server`].
///
/// `remote_host`, `remote_port`, `username`, and `password` are unused by the
/// core itself; they are reserved for worker implementations that need
/// upstream connection details.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the worker implementation to look up in the
    /// [`crate::WorkerRegistry`]. Default `"echo"`.
    pub request_processor_name: String,
    /// Size of the worker pool. Must be >= 1.
    pub num_request_threads: usize,
    /// Bound on waiting for workers to stop during shutdown before
    /// escalating.
    pub shutdown_grace_period: Duration,
    /// Local bind address.
    pub local_host: String,
    /// Local bind port.
    pub local_port: u16,
    /// Unused by the core; reserved for workers.
    pub remote_host: Option<String>,
    /// Unused by the core; reserved for workers.
    pub remote_port: Option<u16>,
    /// Unused by the core; reserved for workers.
    pub username: Option<String>,
    /// Unused by the core; reserved for workers.
    pub password: Option<String>,
    /// Enables verbose logging in the demo binary's log filter. The core
    /// logs at the levels named in its error taxonomy regardless of this
    /// flag.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            request_processor_name: "echo".to_string(),
            num_request_threads: 8,
            shutdown_grace_period: Duration::from_secs(30),
            local_host: "localhost".to_string(),
            local_port: 4100,
            remote_host: None,
            remote_port: None,
            username: None,
            password: None,
            debug: false,
        }
    }
}
