//! Socket.IO client on top of the WebSocket client.
//!
//! [`WsClient`] events are queued by its callback and processed after each
//! `WsClient::tick()`, because replies (pongs, the upgrade packet) go back through
//! the same client that produced the event.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use wsmux::{ClientConfig, Clock, Connector, EventKind, HeartbeatConfig, MessageKind, SystemClock, WsClient};

use crate::packet::{self, EngineIoType, Packet, SocketIoType};

/// Engine.IO ping period, independent of the WebSocket ping/pong heartbeat.
pub const EIO_HEARTBEAT_INTERVAL_MS: u64 = 20_000;

pub const DEFAULT_PATH: &str = "/socket.io/?EIO=3&transport=websocket";

/// WebSocket keepalive used unless the config says otherwise.
pub const DEFAULT_HEARTBEAT: HeartbeatConfig = HeartbeatConfig::new(60_000, 90_000, 5);

/// What the Socket.IO callback is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketIoEvent {
    /// WebSocket is open and the upgrade packet was sent. Payload is the request path.
    Connect,
    /// WebSocket went away. Empty payload.
    Disconnect,
    /// Socket.IO packet of the given type. Payload follows the type byte.
    Event(SocketIoType),
}

type Inbox = Rc<RefCell<VecDeque<(EventKind, Vec<u8>)>>>;
type Handler = Box<dyn FnMut(SocketIoEvent, &[u8])>;

pub struct SocketIoClient<C: Connector> {
    ws: WsClient<C>,
    inbox: Inbox,
    handler: Option<Handler>,
    clock: Box<dyn Clock>,
    last_heartbeat: u64,
}

impl<C: Connector> SocketIoClient<C> {
    /// Connect to `host:port` on [`DEFAULT_PATH`] with the default keepalive.
    pub fn new(connector: C, host: impl Into<String>, port: u16) -> Self {
        let config = ClientConfig::new(host, port, DEFAULT_PATH).with_heartbeat(DEFAULT_HEARTBEAT);
        Self::with_config(connector, config)
    }

    pub fn with_config(connector: C, config: ClientConfig) -> Self {
        Self::with_clock(connector, config, SystemClock::new())
    }

    /// Both layers read the same clock.
    pub fn with_clock<K: Clock + Clone + 'static>(connector: C, config: ClientConfig, clock: K) -> Self {
        let inbox: Inbox = Rc::default();
        let sink = inbox.clone();
        let mut ws = WsClient::with_clock(connector, config, clock.clone());
        ws.on_event(move |kind, payload| sink.borrow_mut().push_back((kind, payload.to_vec())));

        let last_heartbeat = clock.now_ms();
        Self { ws, inbox, handler: None, clock: Box::new(clock), last_heartbeat }
    }

    /// Register the event callback, replacing any previous one.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: FnMut(SocketIoEvent, &[u8]) + 'static,
    {
        self.handler = Some(Box::new(handler));
    }

    pub fn websocket(&self) -> &WsClient<C> {
        &self.ws
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_connected()
    }

    /// Send `"4" + type + payload` as one text frame. `false` when not connected or
    /// the write failed.
    pub fn send(&mut self, io_type: SocketIoType, payload: impl AsRef<[u8]>) -> bool {
        if !self.ws.is_connected() {
            return false;
        }
        let packet = packet::encode_message(io_type, payload.as_ref());
        let sent = self.ws.send(MessageKind::Text, &packet).is_ok();
        // a failed write tears the link down; report it right away
        self.drain();
        sent
    }

    pub fn send_event(&mut self, payload: impl AsRef<[u8]>) -> bool {
        self.send(SocketIoType::Event, payload)
    }

    pub fn disconnect(&mut self) {
        self.ws.disconnect();
        self.drain();
    }

    pub fn tick(&mut self) {
        self.ws.tick();
        self.drain();

        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_heartbeat) > EIO_HEARTBEAT_INTERVAL_MS {
            if self.ws.is_connected() {
                self.send_engine_io(&[EngineIoType::Ping.as_byte()]);
            }
            self.last_heartbeat = now;
        }
    }

    fn drain(&mut self) {
        loop {
            let batch: Vec<_> = self.inbox.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                return;
            }
            for (kind, payload) in batch {
                self.handle(kind, &payload);
            }
        }
    }

    fn handle(&mut self, kind: EventKind, payload: &[u8]) {
        match kind {
            EventKind::Connected => {
                trace_debug!("websocket open on {}", String::from_utf8_lossy(payload));
                self.send_engine_io(&[EngineIoType::Upgrade.as_byte()]);
                self.emit(SocketIoEvent::Connect, payload);
            }
            EventKind::Disconnected => self.emit(SocketIoEvent::Disconnect, &[]),
            EventKind::Text => self.handle_text(payload),
            _ => {}
        }
    }

    fn handle_text(&mut self, data: &[u8]) {
        match packet::parse(data) {
            Packet::Control(EngineIoType::Ping, _) => {
                trace_debug!("engine.io ping");
                self.send_engine_io(&packet::pong_for(data));
            }
            Packet::Control(EngineIoType::Pong, _) => trace_debug!("engine.io pong"),
            Packet::Message(io_type, payload) => {
                if io_type == SocketIoType::Event {
                    trace_debug!("socket.io event: {}", String::from_utf8_lossy(payload));
                } else {
                    trace_debug!("socket.io packet {:?}", io_type);
                }
                self.emit(SocketIoEvent::Event(io_type), payload);
            }
            Packet::Control(_eio, _) => trace_debug!("engine.io {:?} ignored", _eio),
            Packet::Invalid => trace_warn!("unrecognised engine.io packet ({} bytes)", data.len()),
        }
    }

    fn send_engine_io(&mut self, packet: &[u8]) {
        if let Err(_e) = self.ws.send(MessageKind::Text, packet) {
            trace_warn!("engine.io packet not sent: {}", _e);
        }
    }

    fn emit(&mut self, event: SocketIoEvent, payload: &[u8]) {
        if let Some(handler) = self.handler.as_mut() {
            handler(event, payload);
        }
    }
}
