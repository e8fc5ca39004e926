//! Runs the reference echo server on the configured port until interrupted.
//!
//! ```text
//! RUST_LOG=debug cargo run --bin echo-server -- --port 4100 --threads 8
//! ```

use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reactor_server::{Server, ServerConfig};

fn parse_args() -> ServerConfig {
    let mut config = ServerConfig::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => {
                if let Some(v) = args.next() {
                    config.local_port = v.parse().expect("--port expects a u16");
                }
            }
            "--threads" => {
                if let Some(v) = args.next() {
                    config.num_request_threads = v.parse().expect("--threads expects a usize");
                }
            }
            "--debug" => config.debug = true,
            other => eprintln!("ignoring unrecognized argument: {other}"),
        }
    }
    config
}

fn main() {
    let config = parse_args();

    let mut builder = env_logger::Builder::from_default_env();
    if config.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let interrupted = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupted.clone();
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::Release))
        .expect("failed to install Ctrl-C handler");

    let handle = Server::new(config.clone())
        .on_stopping(|| log::info!("server stopping"))
        .on_stopped(|| log::info!("server stopped"))
        .start()
        .unwrap_or_else(|e| panic!("failed to start server: {e}"));

    log::info!(
        "echo server listening on {}:{}",
        config.local_host, config.local_port
    );

    while !interrupted.load(Ordering::Acquire) {
        std::thread::sleep(Duration::from_millis(100));
    }

    handle.request_shutdown("received interrupt signal");
    handle.join();
}
