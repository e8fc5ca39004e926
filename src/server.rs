//! Public entry point: [`Server`] and its lifecycle handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::info;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::event_loop::{EventLoop, ShutdownGate};
use crate::queue::RequestQueue;
use crate::worker::{WorkerContext, WorkerRegistry};

/// Builder/owner of a not-yet-started server. Holds configuration and the
/// optional `stopping`/`stopped` lifecycle hooks.
pub struct Server {
    config: ServerConfig,
    registry: WorkerRegistry,
    on_stopping: Option<Box<dyn Fn() + Send + Sync>>,
    on_stopped: Option<Box<dyn Fn() + Send + Sync>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a server with the given configuration and the default worker
    /// registry (just the echo worker).
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: WorkerRegistry::with_default(),
            on_stopping: None,
            on_stopped: None,
        }
    }

    /// Registers an additional worker implementation, selectable by setting
    /// [`ServerConfig::request_processor_name`].
    pub fn with_worker(mut self, name: &'static str, factory: crate::worker::WorkerFactory) -> Self {
        self.registry.register(name, factory);
        self
    }

    /// Sets the hook invoked once shutdown has been requested, before the
    /// loop waits for workers to stop.
    pub fn on_stopping(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stopping = Some(Box::new(hook));
        self
    }

    /// Sets the hook invoked after the worker pool has stopped (or been
    /// escalated past), before the selector and listener are closed.
    pub fn on_stopped(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stopped = Some(Box::new(hook));
        self
    }

    /// Runs the startup sequence (§4.1) and spawns the event-loop thread.
    ///
    /// Only [`ServerError::Bind`] propagates from this call; every other
    /// failure during the server's life is caught and logged at its
    /// component boundary.
    pub fn start(self) -> Result<ServerHandle, ServerError> {
        if !self.registry.contains(&self.config.request_processor_name) {
            return Err(ServerError::WorkerFault(format!(
                "unknown worker processor {:?}",
                self.config.request_processor_name
            )));
        }

        let requests = RequestQueue::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_gate = Arc::new(ShutdownGate::new(self.config.num_request_threads));

        // Step 1 of the startup sequence: instantiate and start the
        // configured number of workers, bound to the shared request queue.
        // The selector-task queue's producer handle is created alongside
        // the event loop below (its Sender needs the loop's Waker), so
        // worker threads are spawned once that handle exists.
        let (event_loop, selector_tasks, waker) = EventLoop::new(
            self.config.clone(),
            requests.clone(),
            Vec::new(),
            shutdown.clone(),
            shutdown_gate.clone(),
            self.on_stopping,
            self.on_stopped,
        )?;

        let mut workers = Vec::with_capacity(self.config.num_request_threads);
        for worker_index in 0..self.config.num_request_threads {
            let mut worker = self
                .registry
                .create(&self.config.request_processor_name)
                .expect("validated above");
            let ctx = WorkerContext {
                worker_index,
                requests: requests.clone(),
                selector_tasks: selector_tasks.clone(),
                shutdown: shutdown.clone(),
            };
            let gate = shutdown_gate.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("request-worker-{worker_index}"))
                    .spawn(move || {
                        worker.run(ctx);
                        gate.worker_finished();
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        let mut event_loop = event_loop;
        event_loop.attach_workers(workers);
        let local_addr = event_loop
            .local_addr()
            .expect("listener must be bound after EventLoop::new succeeds");

        let loop_thread = thread::Builder::new()
            .name("event-loop".to_string())
            .spawn(move || event_loop.run())
            .expect("failed to spawn event loop thread");

        info!(
            "server started on {local_addr} with {} worker(s)",
            self.config.num_request_threads
        );

        Ok(ServerHandle {
            thread: Some(loop_thread),
            shutdown,
            waker,
            local_addr,
        })
    }
}

/// A running server. Dropping this without calling [`ServerHandle::join`]
/// leaves the server running in the background; the event-loop thread is
/// detached, not killed.
#[derive(Debug)]
pub struct ServerHandle {
    thread: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<mio::Waker>,
    local_addr: std::net::SocketAddr,
}

impl ServerHandle {
    /// The address the listening socket was actually bound to. Useful when
    /// [`ServerConfig::local_port`] is `0` and the OS assigns a port.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Requests a graceful shutdown. Returns immediately; the actual
    /// teardown (stopping workers, invoking hooks, closing the listener)
    /// happens on the event-loop thread and completes by the time
    /// [`ServerHandle::join`] returns.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!("shutdown requested: {reason}");
        self.shutdown.store(true, Ordering::Release);
        let _ = self.waker.wake();
    }

    /// Blocks until the event-loop thread has exited.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
