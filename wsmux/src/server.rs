//! Connection multiplexer.
//!
//! Every call to [`WsServer::tick`] makes one non-blocking pass: drain the
//! listener into free slots, then service each slot in index order. All events
//! reach the application through the single callback registered with
//! [`WsServer::on_event`].

use std::io;
use std::net::SocketAddr;

use crate::channel::{self, Role, Teardown};
use crate::config::ServerConfig;
use crate::error::{FrameError, HandshakeError, Result, WsError};
use crate::event::{Dispatcher, EventKind, MessageKind};
use crate::frame::{Opcode, MAX_CONTROL_PAYLOAD};
use crate::handshake::{self, LineResult};
use crate::table::{ConnectionTable, Phase, Slot, SlotStatus};
use crate::transport::{Clock, Listener, Stream, SystemClock};
use crate::validator::HeaderValidator;

/// WebSocket server over any [`Listener`].
pub struct WsServer<L: Listener> {
    listener: L,
    table: ConnectionTable<L::Stream>,
    dispatcher: Dispatcher,
    validator: HeaderValidator,
    /// Base64 `user:password` expected after `Basic `.
    credential: Option<String>,
    config: ServerConfig,
    clock: Box<dyn Clock>,
    running: bool,
}

impl<L: Listener> WsServer<L> {
    pub fn new(listener: L, config: ServerConfig) -> Self {
        Self::with_clock(listener, config, SystemClock::new())
    }

    pub fn with_clock<C: Clock + 'static>(listener: L, config: ServerConfig, clock: C) -> Self {
        Self {
            listener,
            table: ConnectionTable::new(config.capacity),
            dispatcher: Dispatcher::new(),
            validator: HeaderValidator::new(),
            credential: None,
            config,
            clock: Box::new(clock),
            running: true,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    /// Register the event callback, replacing any previous one.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: FnMut(usize, EventKind, &[u8]) + 'static,
    {
        self.dispatcher.set(handler);
    }

    /// Install a custom header predicate and the list of headers every request must carry.
    pub fn set_header_validator<F, I, S>(&mut self, predicate: F, mandatory: I)
    where
        F: Fn(&str, &str) -> bool + 'static,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validator = HeaderValidator::new().with_predicate(predicate).with_mandatory(mandatory);
    }

    pub fn set_basic_auth(&mut self, user: &str, password: &str) {
        self.credential = Some(handshake::basic_credential(user, password));
    }

    /// Require an already Base64-encoded `user:password`. An empty string turns auth off.
    pub fn set_authorization(&mut self, credential: &str) {
        self.credential = (!credential.is_empty()).then(|| credential.to_string());
    }

    pub fn table(&self) -> &ConnectionTable<L::Stream> {
        &self.table
    }

    pub fn status(&self, slot: usize) -> Option<SlotStatus> {
        self.table.get(slot).map(Slot::status)
    }

    pub fn remote_addr(&self, slot: usize) -> Option<SocketAddr> {
        self.table.get(slot).and_then(Slot::peer_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn send(&mut self, slot: usize, kind: MessageKind, payload: &[u8]) -> Result<()> {
        let max_frame = self.config.max_frame_payload;
        self.write_connected(slot, |stream| {
            channel::write_message(stream, Role::Server, kind, payload, max_frame)
        })
    }

    pub fn send_text(&mut self, slot: usize, text: &str) -> Result<()> {
        self.send(slot, MessageKind::Text, text.as_bytes())
    }

    pub fn send_binary(&mut self, slot: usize, data: &[u8]) -> Result<()> {
        self.send(slot, MessageKind::Binary, data)
    }

    pub fn send_ping(&mut self, slot: usize, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLarge(payload.len()).into());
        }
        self.write_connected(slot, |stream| channel::write_frame(stream, Role::Server, Opcode::Ping, payload))
    }

    /// Send to every connected slot. Returns how many accepted the write.
    pub fn broadcast(&mut self, kind: MessageKind, payload: &[u8]) -> usize {
        self.connected_slots()
            .into_iter()
            .filter(|&slot| self.send(slot, kind, payload).is_ok())
            .count()
    }

    pub fn broadcast_ping(&mut self, payload: &[u8]) -> usize {
        self.connected_slots()
            .into_iter()
            .filter(|&slot| self.send_ping(slot, payload).is_ok())
            .count()
    }

    /// Close one connection with code 1000.
    pub fn disconnect(&mut self, slot: usize) -> Result<()> {
        let record = self.table.get_mut(slot).ok_or(WsError::InvalidSlot(slot))?;
        if record.is_free() {
            return Err(WsError::NotConnected);
        }
        teardown(record, &mut self.dispatcher, Teardown::Local);
        Ok(())
    }

    pub fn disconnect_all(&mut self) {
        self.release_all(Teardown::Local);
    }

    /// Number of upgraded connections.
    ///
    /// With `ping_first` every connection is pinged beforehand, so transports that
    /// died silently are torn down and not counted.
    pub fn connected_count(&mut self, ping_first: bool) -> usize {
        if ping_first {
            for slot in self.connected_slots() {
                let _ = self.send_ping(slot, &[]);
            }
        }
        self.table.count(SlotStatus::Connected)
    }

    /// Stop accepting and drop every connection.
    pub fn close(&mut self) {
        self.running = false;
        self.release_all(Teardown::Shutdown);
        trace_info!("server closed");
    }

    /// One non-blocking pass over the listener and every slot.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        if self.running {
            self.accept_pending(now);
        }
        for index in 0..self.table.capacity() {
            self.service(index, now);
        }
    }

    fn accept_pending(&mut self, now: u64) {
        loop {
            match self.listener.accept() {
                Ok(Some(stream)) => match self.table.acquire(stream, now) {
                    Ok(_index) => trace_debug!("slot {} accepted", _index),
                    Err(mut stream) => {
                        trace_warn!("connection table full, refusing connection");
                        stream.close();
                    }
                },
                Ok(None) => break,
                Err(_e) => {
                    trace_warn!("accept failed: {}", _e);
                    break;
                }
            }
        }
    }

    fn service(&mut self, index: usize, now: u64) {
        let Self { table, dispatcher, validator, credential, config, .. } = self;
        let Some(slot) = table.get_mut(index) else {
            return;
        };
        let Some(link) = slot.link.as_mut() else {
            return;
        };
        if !link.stream.is_connected() {
            teardown(slot, dispatcher, Teardown::TransportLost);
            return;
        }

        let result = match link.phase {
            Phase::AwaitingHeaders => read_header(slot, validator, credential.as_deref(), config, dispatcher, now),
            Phase::Connected => pump_frames(slot, config, dispatcher, now),
        };
        if let Err(cause) = result {
            teardown(slot, dispatcher, cause);
        }
    }

    fn connected_slots(&self) -> Vec<usize> {
        self.table
            .iter()
            .filter(|slot| slot.status() == SlotStatus::Connected)
            .map(Slot::index)
            .collect()
    }

    fn release_all(&mut self, cause: Teardown) {
        for index in 0..self.table.capacity() {
            if let Some(slot) = self.table.get_mut(index) {
                teardown(slot, &mut self.dispatcher, cause.clone());
            }
        }
    }

    /// Run `write` against an upgraded slot, tearing it down if the transport fails.
    fn write_connected<F>(&mut self, index: usize, write: F) -> Result<()>
    where
        F: FnOnce(&mut L::Stream) -> io::Result<()>,
    {
        let slot = self.table.get_mut(index).ok_or(WsError::InvalidSlot(index))?;
        let link = match slot.link.as_mut() {
            Some(link) if link.phase == Phase::Connected => link,
            _ => return Err(WsError::NotConnected),
        };
        if let Err(err) = write(&mut link.stream) {
            teardown(slot, &mut self.dispatcher, Teardown::TransportLost);
            return Err(err.into());
        }
        Ok(())
    }
}

/// Route at most one header line to the negotiator, answering the upgrade once
/// the blank line arrives.
fn read_header<S: Stream>(
    slot: &mut Slot<S>,
    validator: &HeaderValidator,
    credential: Option<&str>,
    config: &ServerConfig,
    dispatcher: &mut Dispatcher,
    now: u64,
) -> std::result::Result<(), Teardown> {
    let index = slot.index();
    let Some(link) = slot.link.as_mut() else {
        return Ok(());
    };
    if now.saturating_sub(slot.accepted_at) >= config.handshake_timeout_ms {
        return Err(Teardown::Timeout);
    }

    let raw = match link.stream.read_line(b'\n') {
        Some(raw) if raw.len() <= config.max_header_line => raw,
        Some(_) => return Err(reject_line(&mut link.stream, config)),
        None if link.stream.bytes_available() > config.max_header_line => {
            return Err(reject_line(&mut link.stream, config))
        }
        None => return Ok(()),
    };
    slot.last_activity = now;

    let line = String::from_utf8_lossy(&raw);
    trace_debug!("slot {} header: {}", index, line.trim_end());
    if slot.request.feed_line(&line, validator) == LineResult::Header {
        return Ok(());
    }

    match slot.request.evaluate(validator, credential) {
        Ok(()) => {
            let request = &slot.request;
            let accept = handshake::accept_key(&request.key);
            let protocol = (!request.protocol.is_empty()).then_some(config.protocol.as_str());
            let response =
                handshake::switching_protocols(&accept, &config.server_name, config.origin.as_deref(), protocol);
            link.stream.write(response.as_bytes()).map_err(|_| Teardown::TransportLost)?;
            link.phase = Phase::Connected;
            trace_info!("slot {} upgraded on {}", index, request.path);

            dispatcher.emit(index, EventKind::Connected, request.path.as_bytes());
            channel::write_frame(&mut link.stream, Role::Server, Opcode::Ping, &[])
                .map_err(|_| Teardown::TransportLost)
        }
        Err(HandshakeError::AuthFailed) => {
            trace_warn!("slot {} failed authorization", index);
            let _ = link.stream.write(handshake::unauthorized(&config.server_name).as_bytes());
            Err(Teardown::AuthFailed)
        }
        Err(err) => {
            trace_warn!("slot {} upgrade rejected: {}", index, err);
            let _ = link.stream.write(handshake::bad_request(&config.server_name).as_bytes());
            Err(Teardown::HandshakeRejected(err))
        }
    }
}

fn reject_line<S: Stream>(stream: &mut S, config: &ServerConfig) -> Teardown {
    let _ = stream.write(handshake::bad_request(&config.server_name).as_bytes());
    Teardown::HandshakeRejected(HandshakeError::LineTooLong(config.max_header_line))
}

fn pump_frames<S: Stream>(
    slot: &mut Slot<S>,
    config: &ServerConfig,
    dispatcher: &mut Dispatcher,
    now: u64,
) -> std::result::Result<(), Teardown> {
    let index = slot.index();
    let Some(link) = slot.link.as_mut() else {
        return Ok(());
    };

    if slot.channel.fill(&mut link.stream, config.read_chunk)? {
        slot.last_activity = now;
    } else if slot.channel.has_partial() && now.saturating_sub(slot.last_activity) >= config.read_timeout_ms {
        return Err(Teardown::Timeout);
    }

    slot.channel.pump(&mut link.stream, Role::Server, config.max_message, &mut |kind, payload| {
        dispatcher.emit(index, kind, payload)
    })
}

/// End a session: optional Error event, close frame when upgraded, release, Disconnected.
///
/// Free slots are left alone, so a session never reports Disconnected twice.
fn teardown<S: Stream>(slot: &mut Slot<S>, dispatcher: &mut Dispatcher, cause: Teardown) {
    let index = slot.index();
    let Some(link) = slot.link.as_mut() else {
        return;
    };
    trace_info!("slot {} disconnected: {:?}", index, cause);

    if let Some(reason) = cause.error_reason() {
        dispatcher.emit(index, EventKind::Error, reason.as_bytes());
    }
    if link.phase == Phase::Connected {
        if let Some(body) = cause.close_body() {
            let _ = channel::write_frame(&mut link.stream, Role::Server, Opcode::Close, &body);
        }
    }
    slot.release();
    dispatcher.emit(index, EventKind::Disconnected, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::TcpAcceptor;

    #[test]
    fn test_tick_without_clients() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let mut server = WsServer::new(acceptor, ServerConfig::default().with_capacity(3));
        server.tick();
        assert_eq!(server.table().capacity(), 3);
        assert_eq!(server.connected_count(true), 0);
        assert!(server.listener().local_addr().unwrap().port() > 0);
    }

    #[test]
    fn test_api_on_free_slots() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let mut server = WsServer::new(acceptor, ServerConfig::default());
        assert!(matches!(server.send_text(0, "x"), Err(WsError::NotConnected)));
        assert!(matches!(server.send_text(99, "x"), Err(WsError::InvalidSlot(99))));
        assert!(matches!(server.disconnect(1), Err(WsError::NotConnected)));
        assert!(matches!(
            server.send_ping(0, &[0; 126]),
            Err(WsError::Frame(FrameError::ControlTooLarge(126)))
        ));
        assert_eq!(server.broadcast(MessageKind::Text, b"x"), 0);
        assert_eq!(server.status(0), Some(SlotStatus::NotConnected));
        assert!(server.remote_addr(0).is_none());
    }

    #[test]
    fn test_close_stops_accepting() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let mut server = WsServer::new(acceptor, ServerConfig::default());
        server.close();
        assert!(!server.is_running());
        let addr = server.listener().local_addr().unwrap();
        let _client = std::net::TcpStream::connect(addr).unwrap();
        server.tick();
        assert_eq!(server.table().count(SlotStatus::AwaitingHeaders), 0);
    }
}
