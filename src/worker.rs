//! Request processors: threads that drain the request queue and perform the
//! I/O the event loop dispatched to them.
//!
//! Workers never touch selection-handle interest ops directly — only the
//! event-loop thread calls `interestOps(set)` (§5(a)). A worker asks for
//! interest changes via [`SelectorTaskQueue`] instead.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, warn};
use mio::Interest;

use crate::connection::ReadOutcome;
use crate::error::ServerError;
use crate::queue::{RequestItem, RequestQueue};
use crate::selector_task::SelectorTaskQueue;
use crate::session::Session;

/// Reference value for the default worker's receive buffer. Implementations
/// may use any size >= 1.
pub const DEFAULT_READ_BUFFER: usize = 1460;

/// Everything a [`Worker`] needs to run: the shared queues and the
/// cooperative shutdown flag. Constructed by the event loop and handed to
/// each worker thread, replacing the `initialize(server, requestQueue,
/// selectorTaskQueue)` step of the plugin contract.
#[derive(Clone)]
pub struct WorkerContext {
    /// Index of this worker within the pool. Used for logging and for
    /// [`crate::ServerError::ShutdownEscalation`] — the server identifies
    /// workers by pool index rather than OS thread id (§9).
    pub worker_index: usize,
    /// Shared request queue.
    pub requests: RequestQueue,
    /// Producer handle for the selector-task queue.
    pub selector_tasks: SelectorTaskQueue,
    /// Cooperative shutdown flag, checked between iterations.
    pub shutdown: Arc<AtomicBool>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_index", &self.worker_index)
            .finish_non_exhaustive()
    }
}

/// A request-processor implementation. The core ships exactly one: the
/// default echo worker. Real deployments supply their own and register it
/// with a [`WorkerRegistry`].
pub trait Worker: Send {
    /// Runs the worker's main loop. Returns when the shutdown flag is
    /// observed or the request queue is disconnected.
    fn run(&mut self, ctx: WorkerContext);
}

/// Factory function constructing a boxed [`Worker`]. Replaces reflective
/// class loading (§9): the core calls a factory `create(name) -> Worker`
/// backed by this registry instead of resolving a classname at runtime.
pub type WorkerFactory = fn() -> Box<dyn Worker>;

/// Registry mapping a configured worker name to a [`WorkerFactory`].
#[derive(Default)]
pub struct WorkerRegistry {
    factories: HashMap<&'static str, WorkerFactory>,
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl WorkerRegistry {
    /// A registry pre-populated with the default echo worker under the name
    /// `"echo"`.
    pub fn with_default() -> Self {
        let mut registry = Self::default();
        registry.register("echo", || Box::new(EchoWorker::default()));
        registry
    }

    /// Registers a factory under `name`, overwriting any existing entry.
    pub fn register(&mut self, name: &'static str, factory: WorkerFactory) {
        self.factories.insert(name, factory);
    }

    /// Looks up and invokes the factory registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Worker>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Whether a factory is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

/// The reference worker: performs no protocol interpretation and simply
/// echoes received bytes back to their sender (§4.2.2).
#[derive(Debug)]
pub struct EchoWorker {
    read_buffer_size: usize,
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }
}

impl EchoWorker {
    /// Creates an echo worker with a non-default receive-buffer size.
    pub fn with_read_buffer_size(read_buffer_size: usize) -> Self {
        Self { read_buffer_size }
    }
}

impl Worker for EchoWorker {
    fn run(&mut self, ctx: WorkerContext) {
        loop {
            if ctx.shutdown.load(Ordering::Acquire) {
                debug!("worker {} observed shutdown flag, exiting", ctx.worker_index);
                return;
            }

            match ctx.requests.take() {
                None | Some(RequestItem::Shutdown) => {
                    debug!("worker {} exiting", ctx.worker_index);
                    return;
                }
                Some(RequestItem::Ready { session, ready }) => {
                    let token = {
                        let locked = match session.lock() {
                            Ok(locked) => locked,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        locked.token()
                    };

                    if ready.is_writable() {
                        write_pending(&session, &ctx);
                    }
                    if ready.is_readable() {
                        read_and_echo(&session, &ctx, self.read_buffer_size);
                    }
                    let _ = token;
                }
            }
        }
    }
}

/// Write handling (§4.2.1): drains the pending-write queue one buffer at a
/// time, re-arming WRITE if a write is still partial and removing WRITE
/// interest once the queue empties.
fn write_pending(session: &std::sync::Mutex<Session>, ctx: &WorkerContext) {
    let mut locked = match session.lock() {
        Ok(locked) => locked,
        Err(poisoned) => poisoned.into_inner(),
    };
    let token = locked.token();

    while let Some(head) = locked.peek_write().cloned() {
        let result = locked.connection_mut().write(&head);
        match result {
            Ok(n) if n == head.len() => {
                locked.consume_write(n);
            }
            Ok(n) => {
                locked.consume_write(n);
                ctx.selector_tasks.add_interest(token, Interest::WRITABLE);
                return;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                ctx.selector_tasks.add_interest(token, Interest::WRITABLE);
                return;
            }
            Err(e) => {
                error!("{}", ServerError::Io { token: token.0, source: e });
                locked.connection_mut().close();
                ctx.selector_tasks.notify_closed(token);
                return;
            }
        }
    }

    if !locked.connection().is_closed() {
        ctx.selector_tasks.remove_interest(token, Interest::WRITABLE);
    }
}

/// Read handling (§4.2.2): the default/echo worker. Reads up to
/// `read_buffer_size` bytes, echoes anything received, and re-arms READ —
/// except after end-of-stream, which is not re-armed.
fn read_and_echo(session: &std::sync::Mutex<Session>, ctx: &WorkerContext, read_buffer_size: usize) {
    let mut locked = match session.lock() {
        Ok(locked) => locked,
        Err(poisoned) => poisoned.into_inner(),
    };
    let token = locked.token();

    let mut buf = vec![0u8; read_buffer_size];
    match locked.connection_mut().read(&mut buf) {
        Ok(ReadOutcome::Eof) => {
            debug!("end-of-stream on token {}", token.0);
            locked.connection_mut().close();
            ctx.selector_tasks.notify_closed(token);
        }
        Ok(ReadOutcome::Data(0)) => {
            ctx.selector_tasks.add_interest(token, Interest::READABLE);
        }
        Ok(ReadOutcome::Data(n)) => {
            buf.truncate(n);
            locked.queue_write(buf);
            drop(locked);
            ctx.selector_tasks.add_interest(token, Interest::WRITABLE);
            ctx.selector_tasks.add_interest(token, Interest::READABLE);
        }
        Err(e) => {
            warn!("{}", ServerError::Io { token: token.0, source: e });
            locked.connection_mut().close();
            ctx.selector_tasks.notify_closed(token);
        }
    }
}
