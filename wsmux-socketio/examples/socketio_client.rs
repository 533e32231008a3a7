//! Socket.IO client.
//!
//! Run with: cargo run -p wsmux-socketio --example socketio_client -- 127.0.0.1:3000
//!
//! Emits `["hello",{"n":N}]` every five seconds while connected and prints every
//! event the server sends back.

use std::time::{Duration, Instant};

use wsmux::TcpConnector;
use wsmux_socketio::{SocketIoClient, SocketIoEvent};

fn main() {
    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:3000".to_string());
    let (host, port) = match addr.rsplit_once(':').and_then(|(h, p)| Some((h.to_string(), p.parse().ok()?))) {
        Some(parts) => parts,
        None => {
            eprintln!("expected host:port, got {}", addr);
            return;
        }
    };

    let mut io = SocketIoClient::new(TcpConnector::new(addr.clone()), host, port);
    io.on_event(|event, payload| match event {
        SocketIoEvent::Connect => println!("connected: {}", String::from_utf8_lossy(payload)),
        SocketIoEvent::Disconnect => println!("disconnected"),
        SocketIoEvent::Event(kind) => println!("{:?}: {}", kind, String::from_utf8_lossy(payload)),
    });

    let mut last_emit = Instant::now();
    let mut n = 0u64;
    loop {
        io.tick();
        if io.is_connected() && last_emit.elapsed() >= Duration::from_secs(5) {
            n += 1;
            io.send_event(format!("[\"hello\",{{\"n\":{}}}]", n));
            last_emit = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
