//! Single outbound WebSocket connection.
//!
//! The client dials through a [`Connector`], sends the upgrade request, checks the
//! server's `101` answer and then pumps frames like a server slot does, except that
//! everything it sends is masked. A lost connection is redialled after
//! `reconnect_interval_ms`.

use std::time::Duration;

use crate::channel::{self, Channel, Role, Teardown};
use crate::config::{ClientConfig, HeartbeatConfig};
use crate::error::{FrameError, Result, WsError};
use crate::event::{Dispatcher, EventKind, MessageKind};
use crate::frame::{Opcode, MAX_CONTROL_PAYLOAD};
use crate::handshake::{ClientHandshake, LineResult, ResponseState};
use crate::heartbeat::{Beat, Heartbeat};
use crate::transport::{Clock, Connector, Stream, SystemClock};

enum LinkState {
    Handshake { handshake: ClientHandshake, response: ResponseState },
    Open,
}

struct ClientLink<S> {
    stream: S,
    state: LinkState,
    channel: Channel,
    opened_at: u64,
}

pub struct WsClient<C: Connector> {
    connector: C,
    config: ClientConfig,
    clock: Box<dyn Clock>,
    dispatcher: Dispatcher,
    link: Option<ClientLink<C::Stream>>,
    heartbeat: Option<Heartbeat>,
    last_attempt: Option<u64>,
}

impl<C: Connector> WsClient<C> {
    pub fn new(connector: C, config: ClientConfig) -> Self {
        Self::with_clock(connector, config, SystemClock::new())
    }

    pub fn with_clock<K: Clock + 'static>(connector: C, config: ClientConfig, clock: K) -> Self {
        let now = clock.now_ms();
        let heartbeat = config.heartbeat.map(|hb| Heartbeat::new(hb, now));
        Self {
            connector,
            config,
            clock: Box::new(clock),
            dispatcher: Dispatcher::new(),
            link: None,
            heartbeat,
            last_attempt: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register the event callback, replacing any previous one.
    pub fn on_event<F>(&mut self, mut handler: F)
    where
        F: FnMut(EventKind, &[u8]) + 'static,
    {
        self.dispatcher.set(move |_, kind, payload| handler(kind, payload));
    }

    /// Turn the ping/pong keepalive on, or off with `None`.
    pub fn set_heartbeat(&mut self, heartbeat: Option<HeartbeatConfig>) {
        let now = self.clock.now_ms();
        self.config.heartbeat = heartbeat;
        self.heartbeat = heartbeat.map(|hb| Heartbeat::new(hb, now));
    }

    /// Upgrade completed and not torn down since.
    pub fn is_connected(&self) -> bool {
        matches!(self.link.as_ref().map(|link| &link.state), Some(LinkState::Open))
    }

    pub fn send(&mut self, kind: MessageKind, payload: &[u8]) -> Result<()> {
        let max_frame = self.config.max_frame_payload;
        self.write_open(|stream| channel::write_message(stream, Role::Client, kind, payload, max_frame))
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(MessageKind::Text, text.as_bytes())
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.send(MessageKind::Binary, data)
    }

    pub fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLarge(payload.len()).into());
        }
        self.write_open(|stream| channel::write_frame(stream, Role::Client, Opcode::Ping, payload))
    }

    /// Close with code 1000. The next attempt waits a full reconnect interval.
    pub fn disconnect(&mut self) {
        self.teardown(Teardown::Local);
    }

    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        if self.link.is_none() {
            self.try_connect(now);
            return;
        }
        if let Err(cause) = self.service(now) {
            self.teardown(cause);
        }
    }

    fn try_connect(&mut self, now: u64) {
        if let Some(last) = self.last_attempt {
            if now.saturating_sub(last) < self.config.reconnect_interval_ms {
                return;
            }
        }
        self.last_attempt = Some(now);

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut stream = match self.connector.connect(timeout) {
            Ok(stream) => stream,
            Err(_e) => {
                trace_debug!("connect to {}:{} failed: {}", self.config.host, self.config.port, _e);
                return;
            }
        };

        let config = &self.config;
        let handshake = ClientHandshake::new();
        let protocol = (!config.protocol.is_empty()).then_some(config.protocol.as_str());
        let request = handshake.request(&config.host, config.port, &config.path, protocol, &config.extra_headers);
        if let Err(_e) = stream.write(request.as_bytes()) {
            trace_warn!("upgrade request not sent: {}", _e);
            stream.close();
            return;
        }

        trace_debug!("upgrade requested for {}", config.path);
        self.link = Some(ClientLink {
            stream,
            state: LinkState::Handshake { handshake, response: ResponseState::default() },
            channel: Channel::default(),
            opened_at: now,
        });
    }

    fn service(&mut self, now: u64) -> std::result::Result<(), Teardown> {
        let Self { link, config, dispatcher, heartbeat, .. } = self;
        let Some(link) = link.as_mut() else {
            return Ok(());
        };
        if !link.stream.is_connected() {
            return Err(Teardown::TransportLost);
        }

        if let LinkState::Handshake { handshake, response } = &mut link.state {
            if now.saturating_sub(link.opened_at) >= config.handshake_timeout_ms {
                return Err(Teardown::Timeout);
            }
            let Some(raw) = link.stream.read_line(b'\n') else {
                return Ok(());
            };
            if response.feed_line(&String::from_utf8_lossy(&raw)) == LineResult::Header {
                return Ok(());
            }
            response.validate(handshake.key()).map_err(Teardown::HandshakeRejected)?;

            link.state = LinkState::Open;
            if let Some(hb) = heartbeat.as_mut() {
                hb.reset(now);
            }
            trace_info!("connected to {}:{}{}", config.host, config.port, config.path);
            dispatcher.emit(0, EventKind::Connected, config.path.as_bytes());
            return Ok(());
        }

        link.channel.fill(&mut link.stream, config.read_chunk)?;
        let mut pong = false;
        link.channel.pump(&mut link.stream, Role::Client, config.max_message, &mut |kind, payload| {
            pong |= kind == EventKind::Pong;
            dispatcher.emit(0, kind, payload);
        })?;

        let Some(hb) = heartbeat.as_mut() else {
            return Ok(());
        };
        if pong {
            hb.on_pong();
        }
        match hb.poll(now) {
            Beat::Idle => Ok(()),
            Beat::SendPing => channel::write_frame(&mut link.stream, Role::Client, Opcode::Ping, &[])
                .map_err(|_| Teardown::TransportLost),
            Beat::Expired => {
                trace_warn!("no pong after {} pings", hb.missed());
                Err(Teardown::Timeout)
            }
        }
    }

    fn write_open<F>(&mut self, write: F) -> Result<()>
    where
        F: FnOnce(&mut C::Stream) -> std::io::Result<()>,
    {
        let link = match self.link.as_mut() {
            Some(link) if matches!(link.state, LinkState::Open) => link,
            _ => return Err(WsError::NotConnected),
        };
        if let Err(err) = write(&mut link.stream) {
            self.teardown(Teardown::TransportLost);
            return Err(err.into());
        }
        Ok(())
    }

    /// Drop the current link, if any, reporting Disconnected exactly once.
    fn teardown(&mut self, cause: Teardown) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        trace_info!("client disconnected: {:?}", cause);
        self.last_attempt = Some(self.clock.now_ms());

        if let Some(reason) = cause.error_reason() {
            self.dispatcher.emit(0, EventKind::Error, reason.as_bytes());
        }
        if matches!(link.state, LinkState::Open) {
            if let Some(body) = cause.close_body() {
                let _ = channel::write_frame(&mut link.stream, Role::Client, Opcode::Close, &body);
            }
        }
        link.stream.close();
        self.dispatcher.emit(0, EventKind::Disconnected, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::TcpConnector;

    #[test]
    fn test_unreachable_server_stays_disconnected() {
        // discard port: nothing there answers with a 101
        let connector = TcpConnector::new("127.0.0.1:9");
        let mut client = WsClient::new(connector, ClientConfig::new("127.0.0.1", 9, "/"));
        client.tick();
        assert!(!client.is_connected());
        assert!(matches!(client.send_text("x"), Err(WsError::NotConnected)));
        client.disconnect();
    }
}
