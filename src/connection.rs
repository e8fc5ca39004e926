//! Thin, correctness-focused wrapper over a non-blocking TCP socket.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;

use log::debug;
use mio::net::TcpStream;

/// Default receive-buffer-size hint.
pub const DEFAULT_RECV_BUFFER: usize = 8192;
/// Default send-buffer-size hint.
pub const DEFAULT_SEND_BUFFER: usize = 65536;

/// Outcome of a single [`Connection::read`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// End-of-stream was observed; the caller should close the connection.
    Eof,
    /// `n` bytes were read into the buffer this call. `n == 0` means the
    /// socket would block before any byte arrived — distinct from `Eof`.
    Data(usize),
}

/// A non-blocking TCP socket plus the bits of state the spec asks a
/// connection to carry: addressing, buffer-size hints, and the Nagle
/// toggle. Owned exclusively by its [`crate::Session`].
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    recv_buffer_hint: usize,
    send_buffer_hint: usize,
    nagle_enabled: bool,
    closed: bool,
}

impl Connection {
    /// Wraps an accepted, already non-blocking socket.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
            recv_buffer_hint: DEFAULT_RECV_BUFFER,
            send_buffer_hint: DEFAULT_SEND_BUFFER,
            nagle_enabled: true,
            closed: false,
        })
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer address of the socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Receive-buffer-size hint.
    pub fn recv_buffer_hint(&self) -> usize {
        self.recv_buffer_hint
    }

    /// Send-buffer-size hint.
    pub fn send_buffer_hint(&self) -> usize {
        self.send_buffer_hint
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reads into `buf` until it is full, the socket would block, or
    /// end-of-stream is observed.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        let mut total = 0;
        while total < buf.len() {
            match self.stream.read(&mut buf[total..]) {
                Ok(0) => {
                    return Ok(if total == 0 {
                        ReadOutcome::Eof
                    } else {
                        ReadOutcome::Data(total)
                    });
                }
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::Data(total));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(ReadOutcome::Data(total))
    }

    /// Attempts one non-blocking write, returning the number of bytes
    /// actually written.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match self.stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Enables Nagle's algorithm (disables `TCP_NODELAY`).
    pub fn enable_nagle(&mut self) -> io::Result<()> {
        self.nagle_enabled = true;
        self.stream.set_nodelay(false)
    }

    /// Disables Nagle's algorithm (enables `TCP_NODELAY`).
    pub fn disable_nagle(&mut self) -> io::Result<()> {
        self.nagle_enabled = false;
        self.stream.set_nodelay(true)
    }

    /// Whether Nagle's algorithm is currently enabled.
    pub fn nagle_enabled(&self) -> bool {
        self.nagle_enabled
    }

    /// Idempotent close. Subsequent calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Both) {
            if e.kind() != ErrorKind::NotConnected {
                debug!("error shutting down connection to {}: {e}", self.peer_addr);
            }
        }
        debug!("closed connection to {}", self.peer_addr);
    }

    /// Mutable access to the underlying mio stream, for registration with a
    /// [`mio::Poll`].
    pub fn source(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
