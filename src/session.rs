//! Per-connection state kept by the server on behalf of a client.

use std::collections::VecDeque;

use mio::Token;

use crate::connection::Connection;

/// Per-connection state: the selection handle, the owning [`Connection`],
/// the pending-write FIFO, and authentication state.
///
/// Invariants upheld by construction and by the event loop's interest-arm
/// discipline (see [`crate::event_loop`]):
/// - a session is referenced as the attachment of exactly one selection
///   handle for its lifetime (the `Slab` entry keyed by `token`);
/// - pending-write buffers are consumed in insertion order;
/// - only the worker currently holding the session mutates the write queue.
#[derive(Debug)]
pub struct Session {
    token: Token,
    connection: Connection,
    write_queue: VecDeque<Vec<u8>>,
    user_id: Option<String>,
    credentials: Option<Vec<u8>>,
    authenticated: bool,
}

impl Session {
    /// Creates a session for a freshly accepted connection.
    pub fn new(token: Token, connection: Connection) -> Self {
        Self {
            token,
            connection,
            write_queue: VecDeque::new(),
            user_id: None,
            credentials: None,
            authenticated: false,
        }
    }

    /// The selection handle this session is attached to.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Read-only access to the owned connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Mutable access to the owned connection, for the worker holding the
    /// session during one dispatch.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// The authenticated user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Whether [`Session::authenticate`] has been called successfully.
    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    /// Single-shot authentication. Returns `false` without effect if the
    /// session is already authenticated.
    pub fn authenticate(&mut self, user_id: String, credentials: Vec<u8>) -> bool {
        if self.authenticated {
            return false;
        }
        self.user_id = Some(user_id);
        self.credentials = Some(credentials);
        self.authenticated = true;
        true
    }

    /// Appends a buffer to the pending-write FIFO.
    pub fn queue_write(&mut self, buffer: Vec<u8>) {
        self.write_queue.push_back(buffer);
    }

    /// Whether the pending-write queue is empty.
    pub fn has_pending_writes(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Looks at the head of the pending-write queue without removing it.
    pub(crate) fn peek_write(&self) -> Option<&Vec<u8>> {
        self.write_queue.front()
    }

    /// Drops `n` transmitted bytes from the front of the head buffer,
    /// popping it entirely once it is fully drained. Internal to the write
    /// path (§4.2.1): only the worker holding the session calls this.
    pub(crate) fn consume_write(&mut self, n: usize) {
        if let Some(head) = self.write_queue.front_mut() {
            head.drain(..n);
            if head.is_empty() {
                self.write_queue.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::TcpListener;

    fn loopback_session() -> Session {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        drop(client);
        let connection = Connection::new(mio::net::TcpStream::from_std(accepted)).unwrap();
        Session::new(Token(0), connection)
    }

    #[test]
    fn fresh_session_has_no_pending_writes() {
        let session = loopback_session();
        assert!(!session.has_pending_writes());
        assert_eq!(session.peek_write(), None);
    }

    #[test]
    fn consume_write_partially_drains_then_pops_head_buffer() {
        let mut session = loopback_session();
        session.queue_write(b"hello".to_vec());
        session.queue_write(b"world".to_vec());

        session.consume_write(2);
        assert_eq!(session.peek_write(), Some(&b"llo".to_vec()));

        session.consume_write(3);
        assert_eq!(session.peek_write(), Some(&b"world".to_vec()));
        assert!(session.has_pending_writes());
    }

    #[test]
    fn authenticate_is_single_shot() {
        let mut session = loopback_session();
        assert!(session.authenticate("alice".to_string(), vec![1, 2, 3]));
        assert_eq!(session.user_id(), Some("alice"));
        assert!(session.authenticated());

        assert!(!session.authenticate("mallory".to_string(), vec![]));
        assert_eq!(session.user_id(), Some("alice"));
    }
}
