//! Echo server.
//!
//! Run with: cargo run --example echo_server --release
//!
//! Then connect with any WebSocket client, e.g.:
//! ```bash
//! websocat ws://127.0.0.1:8081/
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use wsmux::{EventKind, MessageKind, ServerConfig, TcpAcceptor, WsServer};

fn main() -> std::io::Result<()> {
    let addr = "127.0.0.1:8081";
    let acceptor = TcpAcceptor::bind(addr)?;
    let mut server = WsServer::new(acceptor, ServerConfig::default().with_origin("*"));
    println!("Echo server listening on ws://{}", addr);

    // the callback cannot borrow the server, so replies are queued and sent after tick()
    let outbox: Rc<RefCell<Vec<(usize, MessageKind, Vec<u8>)>>> = Rc::default();
    let queue = outbox.clone();
    server.on_event(move |slot, kind, payload| match kind {
        EventKind::Connected => println!("[{}] connected to {}", slot, String::from_utf8_lossy(payload)),
        EventKind::Disconnected => println!("[{}] disconnected", slot),
        EventKind::Text => queue.borrow_mut().push((slot, MessageKind::Text, payload.to_vec())),
        EventKind::Binary => queue.borrow_mut().push((slot, MessageKind::Binary, payload.to_vec())),
        EventKind::Error => eprintln!("[{}] error: {}", slot, String::from_utf8_lossy(payload)),
        _ => {}
    });

    loop {
        server.tick();
        let pending: Vec<_> = outbox.borrow_mut().drain(..).collect();
        for (slot, kind, payload) in pending {
            if let Err(e) = server.send(slot, kind, &payload) {
                eprintln!("[{}] send failed: {}", slot, e);
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
