//! Raw HTTP/1.1 keep-alive listener that counts open connections.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Counters {
    open: AtomicUsize,
    peak: AtomicUsize,
    accepted: AtomicUsize,
    requests: AtomicUsize,
}

/// Answers every GET with `200 ok` after `delay`, keeping connections open.
pub struct CountingServer {
    port: u16,
    counters: Arc<Counters>,
}

impl CountingServer {
    /// Returns `None` when localhost cannot be bound.
    pub fn start(delay: Duration) -> Option<Self> {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0") else {
            eprintln!("[socket-bound-test] cannot bind localhost; skipping");
            return None;
        };
        let port = listener.local_addr().ok()?.port();
        let counters = Arc::new(Counters::default());

        let shared = Arc::clone(&counters);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let counters = Arc::clone(&shared);
                let open = counters.open.fetch_add(1, Ordering::SeqCst) + 1;
                counters.peak.fetch_max(open, Ordering::SeqCst);
                counters.accepted.fetch_add(1, Ordering::SeqCst);
                thread::spawn(move || {
                    serve(stream, delay, &counters);
                    counters.open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Some(Self { port, counters })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Connections currently open.
    pub fn open(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    /// Most connections ever open at once.
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }
}

fn serve(stream: TcpStream, delay: Duration, counters: &Counters) {
    let Ok(mut writer) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        // Request head ends at the first empty line; GETs carry no body.
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) if line == "\r\n" || line == "\n" => break,
                Ok(_) => {}
            }
        }
        counters.requests.fetch_add(1, Ordering::SeqCst);
        thread::sleep(delay);
        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: keep-alive\r\n\r\nok";
        if writer.write_all(response).is_err() {
            return;
        }
    }
}
