//! End-to-end scenarios E1, E2, E4, E5 from the acceptance suite: single and
//! multi-message echo, a write that cannot complete in one syscall, and a
//! peer disconnecting mid-session.

mod util;

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use socket2::{Domain, Socket, Type};

use util::{connect, read_exact, start_server, write_all};

#[test]
fn echo_single_message() {
    let handle = start_server(2, Duration::from_secs(5));
    let mut client = connect(&handle);

    write_all(&mut client, b"Hello\n");
    let echoed = read_exact(&mut client, 6);

    assert_eq!(echoed, b"Hello\n");

    handle.request_shutdown("test done");
    handle.join();
}

#[test]
fn echo_multiple_messages_preserve_order() {
    let handle = start_server(2, Duration::from_secs(5));
    let mut client = connect(&handle);

    for payload in [b"A".as_slice(), b"BB".as_slice(), b"CCC".as_slice()] {
        write_all(&mut client, payload);
        let echoed = read_exact(&mut client, payload.len());
        assert_eq!(echoed, payload);
    }

    handle.request_shutdown("test done");
    handle.join();
}

#[test]
fn large_write_spanning_multiple_syscalls() {
    let handle = start_server(2, Duration::from_secs(10));

    // Shrink the client's receive window to a few KiB *before* connecting,
    // so the OS advertises a tiny window for the life of the socket. That
    // throttles how much of the echoed payload the server's kernel send
    // buffer can drain at a time, which is what actually forces the
    // server's non-blocking `write()` in worker.rs's write_pending to
    // return a short count and take the re-arm-WRITE branch — a plain
    // loopback write of a few KiB, as in the old version of this test,
    // completes in a single syscall and never exercises that branch.
    let addr = handle.local_addr();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).expect("socket() failed");
    socket
        .set_recv_buffer_size(2048)
        .expect("failed to shrink recv buffer");
    socket.connect(&addr.into()).expect("connect failed");
    socket
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut client: TcpStream = socket.into();

    // Large enough to exceed both the shrunk client window and a typical
    // default server-side send buffer many times over.
    const PAYLOAD_LEN: usize = 2 * 1024 * 1024;
    let payload: Vec<u8> = (0..PAYLOAD_LEN as u32).map(|i| (i % 256) as u8).collect();
    write_all(&mut client, &payload);

    let mut echoed = Vec::with_capacity(PAYLOAD_LEN);
    let mut reads = 0usize;
    let mut buf = [0u8; 64 * 1024];
    while echoed.len() < PAYLOAD_LEN {
        let n = client.read(&mut buf).expect("read failed");
        assert!(n > 0, "connection closed before the full payload arrived");
        echoed.extend_from_slice(&buf[..n]);
        reads += 1;
    }

    assert_eq!(echoed, payload);
    // The client's read buffer (64 KiB) comfortably exceeds the shrunk
    // receive window (2 KiB), so a read count this high cannot be an
    // artifact of our own chunking — it only happens if the transfer was
    // genuinely throttled in many small bursts, the observable signature
    // of the server repeatedly blocking on write and re-arming WRITE.
    assert!(
        reads >= 50,
        "expected the shrunk receive window to force many partial reads, got only {reads}"
    );

    handle.request_shutdown("test done");
    handle.join();
}

#[test]
fn peer_disconnect_mid_session_does_not_leak() {
    let handle = start_server(2, Duration::from_secs(5));
    {
        let mut client = connect(&handle);
        write_all(&mut client, b"ping");
        let echoed = read_exact(&mut client, 4);
        assert_eq!(echoed, b"ping");
        // client socket closes here; the server should observe EOF, close
        // its side, and not loop trying to re-arm READ on a dead session.
    }

    // Give the loop a moment to process the EOF, then confirm the server
    // is still healthy for other connections.
    std::thread::sleep(Duration::from_millis(100));
    let mut another = connect(&handle);
    write_all(&mut another, b"still alive");
    let echoed = read_exact(&mut another, 11);
    assert_eq!(echoed, b"still alive");

    handle.request_shutdown("test done");
    handle.join();
}
