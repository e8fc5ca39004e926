//! The event loop: sole owner of the readiness selector, sole mutator of
//! interest ops, accepts connections, dispatches sessions to workers, and
//! drives shutdown.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::queue::RequestQueue;
use crate::selector_task::{SelectorTask, SelectorTaskQueue};
use crate::session::Session;

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// One slab entry: the session plus the interest currently registered with
/// the selector for it. `None` means the session is temporarily
/// deregistered (dormant) because its interest set would otherwise be
/// empty — `mio::Interest` cannot represent "no interest".
struct SessionEntry {
    session: Arc<Mutex<Session>>,
    registered: Option<Interest>,
}

/// Shared state used to implement the bounded shutdown wait without busy
/// polling: each worker thread decrements `remaining` and notifies the
/// condvar just before it returns from its run loop.
pub(crate) struct ShutdownGate {
    remaining: Mutex<usize>,
    cv: std::sync::Condvar,
}

impl ShutdownGate {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            remaining: Mutex::new(workers),
            cv: std::sync::Condvar::new(),
        }
    }

    pub(crate) fn worker_finished(&self) {
        let mut remaining = self.remaining.lock().unwrap();
        *remaining = remaining.saturating_sub(1);
        self.cv.notify_all();
    }

    /// Waits until every worker has finished or `timeout` elapses. Returns
    /// the number of workers still outstanding.
    fn wait_timeout(&self, timeout: Duration) -> usize {
        let remaining = self.remaining.lock().unwrap();
        let (guard, _) = self
            .cv
            .wait_timeout_while(remaining, timeout, |r| *r > 0)
            .unwrap();
        *guard
    }
}

/// The event loop itself. Constructed and driven entirely by
/// [`crate::Server::start`]; its lifecycle is owned by the server, so it is
/// not a public type.
pub(crate) struct EventLoop {
    listener: TcpListener,
    poll: Poll,
    sessions: Slab<SessionEntry>,
    token_for: HashMap<usize, usize>,
    requests: RequestQueue,
    selector_task_rx: crossbeam_channel::Receiver<SelectorTask>,
    shutdown: Arc<AtomicBool>,
    shutdown_gate: Arc<ShutdownGate>,
    workers: Vec<std::thread::JoinHandle<()>>,
    config: ServerConfig,
    on_stopping: Option<Box<dyn Fn() + Send + Sync>>,
    on_stopped: Option<Box<dyn Fn() + Send + Sync>>,
}

impl EventLoop {
    /// Startup sequence (§4.1), steps 2 and 3: opens the selector with its
    /// waker anchor, then binds and registers the listening socket,
    /// fail-fast if the port is occupied. Step 1 (instantiating and
    /// starting the workers) is the caller's responsibility since the
    /// workers must share the `RequestQueue` this loop also owns.
    pub(crate) fn new(
        config: ServerConfig,
        requests: RequestQueue,
        workers: Vec<std::thread::JoinHandle<()>>,
        shutdown: Arc<AtomicBool>,
        shutdown_gate: Arc<ShutdownGate>,
        on_stopping: Option<Box<dyn Fn() + Send + Sync>>,
        on_stopped: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Result<(Self, SelectorTaskQueue, Arc<Waker>), ServerError> {
        let addr: SocketAddr = format!("{}:{}", config.local_host, config.local_port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ServerError::Bind {
                addr: format!("{}:{}", config.local_host, config.local_port),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?;

        let bind_err = |source: std::io::Error| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let poll = Poll::new().map_err(bind_err)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).map_err(bind_err)?);
        let (selector_tasks, selector_task_rx) = SelectorTaskQueue::new(waker.clone());

        let mut listener = TcpListener::bind(addr).map_err(bind_err)?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)
            .map_err(bind_err)?;

        Ok((
            Self {
                listener,
                poll,
                sessions: Slab::new(),
                token_for: HashMap::new(),
                requests,
                selector_task_rx,
                shutdown,
                shutdown_gate,
                workers,
                config,
                on_stopping,
                on_stopped,
            },
            selector_tasks,
            waker,
        ))
    }

    /// Attaches the worker thread handles once they have been spawned. The
    /// loop needs these only for the shutdown sequence.
    pub(crate) fn attach_workers(&mut self, workers: Vec<std::thread::JoinHandle<()>>) {
        self.workers = workers;
    }

    /// The address actually bound by the listening socket. Useful when the
    /// configured port is `0` and the OS assigns one.
    pub(crate) fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main loop. Blocks until shutdown has been requested and fully
    /// orchestrated, then returns.
    pub(crate) fn run(&mut self) {
        let mut events = Events::with_capacity(1024);

        loop {
            self.drain_selector_tasks();

            if self.shutdown.load(Ordering::Acquire) {
                self.shutdown_sequence();
                return;
            }

            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) => {
                    error!("selector closed unexpectedly: {e}");
                    return;
                }
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    WAKE_TOKEN => {}
                    token => self.session_event(token, event),
                }
            }
        }
    }

    /// Step 1 of the iteration (§4.1): apply queued selector tasks,
    /// skipping (with a warning) any whose key is no longer valid.
    fn drain_selector_tasks(&mut self) {
        loop {
            let task = match self.selector_task_rx.try_recv() {
                Ok(task) => task,
                Err(_) => return,
            };

            let token = task.token();
            let Some(&slab_index) = self.token_for.get(&token.0) else {
                warn!("{}", ServerError::StaleKey { token: token.0 });
                continue;
            };
            if !self.sessions.contains(slab_index) {
                warn!("{}", ServerError::StaleKey { token: token.0 });
                continue;
            }

            if let SelectorTask::Closed { .. } = task {
                self.close_session(slab_index, token);
                continue;
            }

            let base = self.sessions[slab_index].registered;
            let desired = match task {
                SelectorTask::Add { ops, .. } => Some(add_ops(base, ops)),
                SelectorTask::Remove { ops, .. } => base.and_then(|b| b.remove(ops)),
                SelectorTask::Closed { .. } => unreachable!("handled above"),
            };

            self.apply_interest(slab_index, token, desired);
        }
    }

    /// Moves a session's registration to `desired`, registering,
    /// reregistering, or deregistering as needed. Logs and leaves the
    /// previous registration in place on failure.
    fn apply_interest(&mut self, slab_index: usize, token: Token, desired: Option<Interest>) {
        let entry = &mut self.sessions[slab_index];
        let mut locked = match entry.session.lock() {
            Ok(l) => l,
            Err(p) => p.into_inner(),
        };

        let result = match (entry.registered, desired) {
            (None, Some(new)) => {
                self.poll
                    .registry()
                    .register(locked.connection_mut().source(), token, new)
            }
            (Some(_), Some(new)) => {
                self.poll
                    .registry()
                    .reregister(locked.connection_mut().source(), token, new)
            }
            (Some(_), None) => self.poll.registry().deregister(locked.connection_mut().source()),
            (None, None) => Ok(()),
        };

        drop(locked);

        match result {
            Ok(()) => self.sessions[slab_index].registered = desired,
            Err(e) => warn!("failed to update interest for token {}: {e}", token.0),
        }
    }

    fn accept(&mut self) {
        loop {
            let (stream, _peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    warn!("{}", ServerError::Accept(e));
                    return;
                }
            };

            let entry = self.sessions.vacant_entry();
            let slab_index = entry.key();
            let token = Token(slab_index);

            let connection = match Connection::new(stream) {
                Ok(c) => c,
                Err(e) => {
                    error!("{}", ServerError::SessionInit(e));
                    continue;
                }
            };

            let mut session = Session::new(token, connection);
            let registered = self.poll.registry().register(
                session.connection_mut().source(),
                token,
                Interest::READABLE,
            );

            if let Err(e) = registered {
                warn!("could not register accepted socket: {e}");
                continue;
            }

            self.token_for.insert(token.0, slab_index);
            entry.insert(SessionEntry {
                session: Arc::new(Mutex::new(session)),
                registered: Some(Interest::READABLE),
            });
        }
    }

    /// Handles a readiness event for a connection's token (step 4 of the
    /// iteration). Clears the ready bits from the registered interest
    /// before handing the session to the request queue, upholding the
    /// interest-arm discipline.
    fn session_event(&mut self, token: Token, event: &mio::event::Event) {
        let Some(&slab_index) = self.token_for.get(&token.0) else {
            return;
        };
        if !self.sessions.contains(slab_index) {
            return;
        }

        if event.is_error() {
            self.close_session(slab_index, token);
            return;
        }

        let ready_read = event.is_readable();
        let ready_write = event.is_writable();
        if !ready_read && !ready_write {
            return;
        }

        let mut ready: Option<Interest> = None;
        if ready_read {
            ready = Some(add_ops(ready, Interest::READABLE));
        }
        if ready_write {
            ready = Some(add_ops(ready, Interest::WRITABLE));
        }
        let Some(ready) = ready else { return };

        if let Some(current) = self.sessions[slab_index].registered {
            let mut remaining = Some(current);
            if ready_read {
                remaining = remaining.and_then(|r| r.remove(Interest::READABLE));
            }
            if ready_write {
                remaining = remaining.and_then(|r| r.remove(Interest::WRITABLE));
            }
            self.apply_interest(slab_index, token, remaining);
        }

        let session = self.sessions[slab_index].session.clone();
        if !self.requests.insert(session, ready) {
            warn!("{}", ServerError::QueueRejected { token: token.0 });
        }
    }

    fn close_session(&mut self, slab_index: usize, token: Token) {
        if !self.sessions.contains(slab_index) {
            return;
        }
        let entry = self.sessions.remove(slab_index);
        self.token_for.remove(&token.0);
        let mut locked = match entry.session.lock() {
            Ok(l) => l,
            Err(p) => p.into_inner(),
        };
        if entry.registered.is_some() {
            let _ = self.poll.registry().deregister(locked.connection_mut().source());
        }
        locked.connection_mut().close();
    }

    /// Shutdown orchestration (§4.1): signal workers, invoke `stopping`,
    /// wait up to the grace period, escalate, invoke `stopped`, then let
    /// `Drop` close the selector and listener.
    fn shutdown_sequence(&mut self) {
        debug!("shutdown requested, signalling {} worker(s)", self.workers.len());
        for _ in &self.workers {
            let _ = self.requests.insert_shutdown();
        }

        if let Some(hook) = &self.on_stopping {
            hook();
        }

        let remaining = self
            .shutdown_gate
            .wait_timeout(self.config.shutdown_grace_period);

        if remaining > 0 {
            warn!(
                "{remaining} worker(s) did not stop within the {:?} grace period, escalating",
                self.config.shutdown_grace_period
            );
        }

        for (index, handle) in self.workers.drain(..).enumerate() {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                // Rust offers no safe thread-kill primitive; the
                // "interrupt" the original design calls for degrades to
                // abandoning the handle and logging the escalation.
                warn!("{}", ServerError::ShutdownEscalation { worker: index });
            }
        }

        if let Some(hook) = &self.on_stopped {
            hook();
        }

        debug!("event loop stopped");
    }
}

/// Adds `ops` to `base`, treating `None` as the empty set. Always returns a
/// non-empty `Interest` because `ops` itself is non-empty.
fn add_ops(base: Option<Interest>, ops: Interest) -> Interest {
    match base {
        Some(existing) => existing.add(ops),
        None => ops,
    }
}
