#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Once;
use std::time::Duration;

use reactor_server::{Server, ServerConfig, ServerHandle};

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Starts a server bound to an OS-assigned port with the given thread count
/// and grace period, returning the handle and the address to connect to.
pub fn start_server(num_request_threads: usize, shutdown_grace_period: Duration) -> ServerHandle {
    init();
    let config = ServerConfig {
        local_host: "127.0.0.1".to_string(),
        local_port: 0,
        num_request_threads,
        shutdown_grace_period,
        ..ServerConfig::default()
    };
    Server::new(config).start().expect("server failed to bind")
}

pub fn connect(handle: &ServerHandle) -> TcpStream {
    let stream = TcpStream::connect(handle.local_addr()).expect("client connect failed");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

pub fn read_exact(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).expect("read_exact failed");
    buf
}

pub fn write_all(stream: &mut TcpStream, data: &[u8]) {
    stream.write_all(data).expect("write_all failed");
}

/// Deterministic pseudo-random payload generator (xorshift), used so that
/// many-client tests can verify each client gets back exactly its own
/// bytes without needing true randomness.
pub fn prng_payload(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2685821657736338717).wrapping_add(1);
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.push((state & 0xff) as u8);
    }
    out
}
