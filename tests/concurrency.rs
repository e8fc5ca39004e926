//! E3 (many concurrent clients) and E6 (shutdown with in-flight work).

mod util;

use std::thread;
use std::time::Duration;

use util::{prng_payload, read_exact, start_server, write_all};

#[test]
fn many_concurrent_clients_get_back_their_own_payload() {
    let handle = start_server(4, Duration::from_secs(5));
    let addr = handle.local_addr();

    let threads: Vec<_> = (0..100u64)
        .map(|i| {
            thread::spawn(move || {
                let payload = prng_payload(i, 1024);
                let mut client = std::net::TcpStream::connect(addr).expect("connect failed");
                client
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .unwrap();
                write_all(&mut client, &payload);
                let echoed = read_exact(&mut client, payload.len());
                assert_eq!(echoed, payload, "client {i} got back the wrong bytes");
            })
        })
        .collect();

    for t in threads {
        t.join().expect("client thread panicked");
    }

    handle.request_shutdown("test done");
    handle.join();
}

#[test]
fn shutdown_with_in_flight_streams_exits_within_grace_period() {
    let grace_period = Duration::from_secs(3);
    let handle = start_server(2, grace_period);
    let addr = handle.local_addr();

    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut senders = Vec::new();
    for _ in 0..10 {
        let stop = stop.clone();
        senders.push(thread::spawn(move || {
            let mut client = match std::net::TcpStream::connect(addr) {
                Ok(c) => c,
                Err(_) => return,
            };
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                if write_all_ignoring_errors(&mut client, &[0u8; 128]) {
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }));
    }

    thread::sleep(Duration::from_millis(100));

    let start = std::time::Instant::now();
    handle.request_shutdown("test done");
    handle.join();
    let elapsed = start.elapsed();

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for s in senders {
        let _ = s.join();
    }

    assert!(
        elapsed < grace_period + Duration::from_secs(2),
        "shutdown took {elapsed:?}, expected within grace period + epsilon"
    );
}

fn write_all_ignoring_errors(stream: &mut std::net::TcpStream, buf: &[u8]) -> bool {
    use std::io::Write;
    stream.write_all(buf).is_err()
}
