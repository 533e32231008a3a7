//! Real sockets against an independent WebSocket implementation.

use std::cell::RefCell;
use std::net::TcpListener;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use tungstenite::Message;
use wsmux::{ClientConfig, EventKind, ServerConfig, TcpAcceptor, TcpConnector, WsClient, WsServer};

const DEADLINE: Duration = Duration::from_secs(10);

#[test]
fn test_tungstenite_client_against_server() {
    let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
    let addr = acceptor.local_addr().unwrap();
    let mut server = WsServer::new(acceptor, ServerConfig::default());

    let inbox: Rc<RefCell<Vec<(usize, EventKind, Vec<u8>)>>> = Rc::default();
    let sink = inbox.clone();
    server.on_event(move |slot, kind, payload| sink.borrow_mut().push((slot, kind, payload.to_vec())));

    let client = thread::spawn(move || {
        let (mut ws, response) = tungstenite::connect(format!("ws://{}/echo", addr)).unwrap();
        assert_eq!(response.status().as_u16(), 101);
        ws.send(Message::Text("hello wsmux".into())).unwrap();
        ws.send(Message::Binary(vec![0u8; 70_000])).unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 2 {
            match ws.read().unwrap() {
                msg @ (Message::Text(_) | Message::Binary(_)) => echoed.push(msg),
                _ => {}
            }
        }
        ws.close(None).unwrap();
        while ws.read().is_ok() {}
        echoed
    });

    let started = Instant::now();
    while !client.is_finished() && started.elapsed() < DEADLINE {
        server.tick();
        let pending: Vec<_> = inbox.borrow_mut().drain(..).collect();
        for (slot, kind, payload) in pending {
            match kind {
                EventKind::Text => server.send_text(slot, &String::from_utf8_lossy(&payload)).unwrap(),
                EventKind::Binary => server.send_binary(slot, &payload).unwrap(),
                _ => {}
            }
        }
        thread::sleep(Duration::from_millis(1));
    }

    let echoed = client.join().unwrap();
    assert_eq!(echoed[0], Message::Text("hello wsmux".into()));
    assert_eq!(echoed[1], Message::Binary(vec![0u8; 70_000]));
}

#[test]
fn test_client_against_tungstenite_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut ws = tungstenite::accept(stream).unwrap();
        loop {
            match ws.read().unwrap() {
                msg @ Message::Text(_) => {
                    ws.send(msg).unwrap();
                    break;
                }
                _ => {}
            }
        }
        ws.close(None).unwrap();
        while ws.read().is_ok() {}
    });

    let config = ClientConfig::new("127.0.0.1", addr.port(), "/");
    let mut client = WsClient::new(TcpConnector::new(addr.to_string()), config);
    let events: Rc<RefCell<Vec<(EventKind, Vec<u8>)>>> = Rc::default();
    let sink = events.clone();
    client.on_event(move |kind, payload| sink.borrow_mut().push((kind, payload.to_vec())));

    let started = Instant::now();
    let mut sent = false;
    while started.elapsed() < DEADLINE {
        client.tick();
        if client.is_connected() && !sent {
            client.send_text("from wsmux").unwrap();
            sent = true;
        }
        if events.borrow().iter().any(|(kind, _)| *kind == EventKind::Disconnected) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    server.join().unwrap();

    let events = events.borrow();
    let kinds: Vec<EventKind> = events.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, vec![EventKind::Connected, EventKind::Text, EventKind::Disconnected]);
    assert_eq!(events[1].1, b"from wsmux");
}
