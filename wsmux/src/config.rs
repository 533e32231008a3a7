//! Server and client configuration.

/// Default number of connection slots.
pub const DEFAULT_CAPACITY: usize = 5;
/// Time a new connection gets to finish its upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2000;
/// Time a half-received frame may sit without new bytes.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2000;
/// Longest accepted request header line.
pub const DEFAULT_MAX_HEADER_LINE: usize = 1024;
/// Largest accepted message (single frame or reassembled).
pub const DEFAULT_MAX_MESSAGE: usize = 1024 * 1024;
/// Bytes read from one connection per tick.
pub const DEFAULT_READ_CHUNK: usize = 4096;
/// Delay between client connection attempts.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 500;
/// Longest a client `tick()` may wait for the transport to connect.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of slots. Fixed for the lifetime of the server.
    pub capacity: usize,
    /// Value of the `Server:` response header.
    pub server_name: String,
    /// Sub-protocol announced when the client requests one.
    pub protocol: String,
    /// `Access-Control-Allow-Origin` value, omitted when `None`.
    pub origin: Option<String>,
    pub handshake_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_header_line: usize,
    pub max_message: usize,
    pub read_chunk: usize,
    /// Split outbound messages into frames of at most this many bytes.
    pub max_frame_payload: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            server_name: "wsmux-server".to_string(),
            protocol: "arduino".to_string(),
            origin: None,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_header_line: DEFAULT_MAX_HEADER_LINE,
            max_message: DEFAULT_MAX_MESSAGE,
            read_chunk: DEFAULT_READ_CHUNK,
            max_frame_payload: None,
        }
    }
}

impl ServerConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    pub fn with_read_timeout_ms(mut self, ms: u64) -> Self {
        self.read_timeout_ms = ms;
        self
    }

    pub fn with_max_header_line(mut self, len: usize) -> Self {
        self.max_header_line = len;
        self
    }

    pub fn with_max_message(mut self, len: usize) -> Self {
        self.max_message = len;
        self
    }

    pub fn with_read_chunk(mut self, len: usize) -> Self {
        self.read_chunk = len.max(1);
        self
    }

    pub fn with_max_frame_payload(mut self, len: usize) -> Self {
        self.max_frame_payload = Some(len);
        self
    }
}

/// WebSocket-level keepalive.
///
/// A ping goes out every `ping_interval_ms`. A pong that does not arrive within
/// `pong_timeout_ms` counts as a miss; after `disconnect_after` misses in a row the
/// connection is dropped. Any pong resets the count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub ping_interval_ms: u64,
    pub pong_timeout_ms: u64,
    pub disconnect_after: u32,
}

impl HeartbeatConfig {
    pub const fn new(ping_interval_ms: u64, pong_timeout_ms: u64, disconnect_after: u32) -> Self {
        Self { ping_interval_ms, pong_timeout_ms, disconnect_after }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Used for the `Host:` header.
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Requested sub-protocol, omitted when empty.
    pub protocol: String,
    /// Extra request headers (Origin, Authorization, cookies, ...).
    pub extra_headers: Vec<(String, String)>,
    pub reconnect_interval_ms: u64,
    /// Bound on the dial inside `tick()`.
    pub connect_timeout_ms: u64,
    /// Time the server gets to answer the upgrade request.
    pub handshake_timeout_ms: u64,
    pub heartbeat: Option<HeartbeatConfig>,
    pub max_message: usize,
    pub read_chunk: usize,
    pub max_frame_payload: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 80,
            path: "/".to_string(),
            protocol: "arduino".to_string(),
            extra_headers: Vec::new(),
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            heartbeat: None,
            max_message: DEFAULT_MAX_MESSAGE,
            read_chunk: DEFAULT_READ_CHUNK,
            max_frame_payload: None,
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self { host: host.into(), port, path: path.into(), ..Self::default() }
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Send `Authorization: Basic base64(user:password)`.
    pub fn with_basic_auth(self, user: &str, password: &str) -> Self {
        let credential = crate::handshake::basic_credential(user, password);
        self.with_header("Authorization", format!("Basic {}", credential))
    }

    pub fn with_reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.reconnect_interval_ms = ms;
        self
    }

    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    pub fn with_handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn with_max_message(mut self, len: usize) -> Self {
        self.max_message = len;
        self
    }

    pub fn with_max_frame_payload(mut self, len: usize) -> Self {
        self.max_frame_payload = Some(len);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.protocol, "arduino");
        assert!(config.origin.is_none());
        assert!(config.max_frame_payload.is_none());
    }

    #[test]
    fn test_server_builder() {
        let config = ServerConfig::default()
            .with_capacity(2)
            .with_origin("*")
            .with_read_chunk(0)
            .with_max_frame_payload(512);
        assert_eq!(config.capacity, 2);
        assert_eq!(config.origin.as_deref(), Some("*"));
        assert_eq!(config.read_chunk, 1);
        assert_eq!(config.max_frame_payload, Some(512));
    }

    #[test]
    fn test_client_builder() {
        let config = ClientConfig::new("example.com", 8080, "/ws")
            .with_basic_auth("Aladdin", "open sesame")
            .with_heartbeat(HeartbeatConfig::new(15_000, 3_000, 2))
            .with_connect_timeout_ms(250);
        assert_eq!(config.port, 8080);
        assert_eq!(config.connect_timeout_ms, 250);
        assert_eq!(ClientConfig::default().connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
        assert_eq!(
            config.extra_headers,
            vec![("Authorization".to_string(), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==".to_string())]
        );
        assert_eq!(config.heartbeat.unwrap().disconnect_after, 2);
    }
}
