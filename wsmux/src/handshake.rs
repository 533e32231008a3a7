//! HTTP upgrade negotiation (RFC 6455 section 4).
//!
//! Server side: [`RequestState`] accumulates one header line at a time and
//! [`RequestState::evaluate`] decides the upgrade once the blank line arrives.
//! Client side: [`ClientHandshake`] builds the request and [`ResponseState`]
//! checks the server's answer.

use base64::engine::general_purpose::STANDARD as Base64Standard;
use base64::Engine;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;
use crate::validator::HeaderValidator;
use crate::WEBSOCKET_VERSION;

/// RFC 6455 GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const NEW_LINE: &str = "\r\n";

/// `base64(sha1(key ++ GUID))`, the value of `Sec-WebSocket-Accept`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    Base64Standard.encode(hasher.finalize())
}

/// Base64 of `user:password`, as carried after `Basic ` in `Authorization`.
pub fn basic_credential(user: &str, password: &str) -> String {
    Base64Standard.encode(format!("{}:{}", user, password))
}

/// Random 16-byte nonce, Base64 encoded, for `Sec-WebSocket-Key`.
pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    Base64Standard.encode(nonce)
}

/// Split `Name: value`, dropping the single leading space of the value (RFC 2616).
fn split_header(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let name = &line[..colon];
    let value = &line[colon + 1..];
    Some((name, value.strip_prefix(' ').unwrap_or(value)))
}

/// Outcome of feeding one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineResult {
    /// More headers expected.
    Header,
    /// Blank line: the header block is complete.
    End,
}

/// Per-connection upgrade request accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestState {
    pub path: String,
    pub protocol: String,
    pub extensions: String,
    pub version: u32,
    pub key: String,
    pub authorization: String,
    pub saw_upgrade_token: bool,
    pub saw_websocket_token: bool,
    pub mandatory_seen: usize,
    pub headers_valid: bool,
}

impl Default for RequestState {
    fn default() -> Self {
        Self {
            path: String::new(),
            protocol: String::new(),
            extensions: String::new(),
            version: 0,
            key: String::new(),
            authorization: String::new(),
            saw_upgrade_token: false,
            saw_websocket_token: false,
            mandatory_seen: 0,
            headers_valid: true,
        }
    }
}

impl RequestState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Consume one raw header line (terminator may still be attached).
    pub fn feed_line(&mut self, line: &str, validator: &HeaderValidator) -> LineResult {
        let line = line.trim();
        if line.is_empty() {
            return LineResult::End;
        }

        if let Some(rest) = line.strip_prefix("GET ") {
            self.path = rest.split(' ').next().unwrap_or_default().to_string();
            // custom header validation restarts with each request line
            self.headers_valid = true;
            self.mandatory_seen = 0;
            return LineResult::Header;
        }

        let Some((name, value)) = split_header(line) else {
            trace_debug!("ignoring malformed header line: {}", line);
            return LineResult::Header;
        };

        if name.eq_ignore_ascii_case("Connection") {
            if value.to_ascii_lowercase().contains("upgrade") {
                self.saw_upgrade_token = true;
            }
        } else if name.eq_ignore_ascii_case("Upgrade") {
            if value.eq_ignore_ascii_case("websocket") {
                self.saw_websocket_token = true;
            }
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
            self.version = value.trim().parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            self.key = value.trim().to_string();
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
            self.protocol = value.to_string();
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Extensions") {
            self.extensions = value.to_string();
        } else if name.eq_ignore_ascii_case("Authorization") {
            self.authorization = value.to_string();
        } else {
            self.headers_valid &= validator.validate(name, value);
            if validator.is_mandatory(name) {
                self.mandatory_seen += 1;
            }
        }
        LineResult::Header
    }

    /// Decide the upgrade.
    ///
    /// `expected_auth` is the Base64 credential configured on the server. It is
    /// checked before anything else, so a request that is both unauthenticated and
    /// malformed reports `AuthFailed`.
    pub fn evaluate(
        &self,
        validator: &HeaderValidator,
        expected_auth: Option<&str>,
    ) -> Result<(), HandshakeError> {
        if let Some(credential) = expected_auth {
            let expected = format!("Basic {}", credential);
            if self.authorization != expected {
                return Err(HandshakeError::AuthFailed);
            }
        }

        if !self.saw_upgrade_token {
            return Err(HandshakeError::Rejected("Connection header lacks upgrade"));
        }
        if !self.saw_websocket_token {
            return Err(HandshakeError::Rejected("Upgrade header is not websocket"));
        }
        if self.path.is_empty() {
            return Err(HandshakeError::Rejected("empty request path"));
        }
        if self.key.is_empty() {
            return Err(HandshakeError::Rejected("missing Sec-WebSocket-Key"));
        }
        if self.version != WEBSOCKET_VERSION {
            return Err(HandshakeError::Rejected("unsupported Sec-WebSocket-Version"));
        }
        if !self.headers_valid {
            return Err(HandshakeError::Rejected("custom header validation failed"));
        }
        if self.mandatory_seen != validator.mandatory_count() {
            return Err(HandshakeError::Rejected("mandatory header count mismatch"));
        }
        Ok(())
    }
}

/// `101 Switching Protocols` response.
pub fn switching_protocols(
    accept: &str,
    server_name: &str,
    origin: Option<&str>,
    protocol: Option<&str>,
) -> String {
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Server: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Version: 13\r\n\
         Sec-WebSocket-Accept: {}\r\n",
        server_name, accept
    );
    if let Some(origin) = origin {
        response.push_str("Access-Control-Allow-Origin: ");
        response.push_str(origin);
        response.push_str(NEW_LINE);
    }
    if let Some(protocol) = protocol {
        response.push_str("Sec-WebSocket-Protocol: ");
        response.push_str(protocol);
        response.push_str(NEW_LINE);
    }
    response.push_str(NEW_LINE);
    response
}

fn plain_response(status: &str, server_name: &str, extra: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\n\
         Server: {}\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Sec-WebSocket-Version: 13\r\n\
         {}\r\n\
         {}",
        status,
        server_name,
        body.len(),
        extra,
        body
    )
}

/// Plain rejection for anything that is not a valid upgrade.
pub fn bad_request(server_name: &str) -> String {
    plain_response("400 Bad Request", server_name, "", "This is a Websocket server only!")
}

/// Rejection for a missing or wrong Basic credential.
pub fn unauthorized(server_name: &str) -> String {
    plain_response(
        "401 Unauthorized",
        server_name,
        "WWW-Authenticate: Basic realm=\"WebSocket Server\"\r\n",
        "This Websocket server requires Authorization!",
    )
}

/// Client-side upgrade request.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    key: String,
}

impl ClientHandshake {
    pub fn new() -> Self {
        Self { key: generate_key() }
    }

    pub fn with_key(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Render the `GET` request.
    pub fn request(
        &self,
        host: &str,
        port: u16,
        path: &str,
        protocol: Option<&str>,
        extra_headers: &[(String, String)],
    ) -> String {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}:{}\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {}\r\n",
            path, host, port, self.key
        );
        if let Some(protocol) = protocol {
            request.push_str("Sec-WebSocket-Protocol: ");
            request.push_str(protocol);
            request.push_str(NEW_LINE);
        }
        for (name, value) in extra_headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str(NEW_LINE);
        }
        request.push_str(NEW_LINE);
        request
    }
}

impl Default for ClientHandshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulator for the server's answer on the client side.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseState {
    pub status: Option<u16>,
    pub status_line: String,
    pub saw_upgrade_token: bool,
    pub saw_websocket_token: bool,
    pub accept: String,
    pub protocol: String,
}

impl ResponseState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn feed_line(&mut self, line: &str) -> LineResult {
        let line = line.trim();
        if line.is_empty() {
            return LineResult::End;
        }

        if self.status.is_none() && line.starts_with("HTTP/") {
            self.status_line = line.to_string();
            self.status = line.split(' ').nth(1).and_then(|code| code.parse().ok());
            return LineResult::Header;
        }

        if let Some((name, value)) = split_header(line) {
            if name.eq_ignore_ascii_case("Connection") {
                self.saw_upgrade_token |= value.to_ascii_lowercase().contains("upgrade");
            } else if name.eq_ignore_ascii_case("Upgrade") {
                self.saw_websocket_token |= value.eq_ignore_ascii_case("websocket");
            } else if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
                self.accept = value.trim().to_string();
            } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
                self.protocol = value.to_string();
            }
        }
        LineResult::Header
    }

    pub fn validate(&self, key: &str) -> Result<(), HandshakeError> {
        if self.status != Some(101) {
            return Err(HandshakeError::BadStatus(self.status_line.clone()));
        }
        if !self.saw_upgrade_token {
            return Err(HandshakeError::Rejected("Connection header lacks upgrade"));
        }
        if !self.saw_websocket_token {
            return Err(HandshakeError::Rejected("Upgrade header is not websocket"));
        }
        let expected = accept_key(key);
        if self.accept != expected {
            return Err(HandshakeError::InvalidAccept { expected, actual: self.accept.clone() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn feed(state: &mut RequestState, validator: &HeaderValidator, lines: &[&str]) -> LineResult {
        let mut last = LineResult::Header;
        for line in lines {
            last = state.feed_line(line, validator);
        }
        last
    }

    fn valid_lines() -> Vec<&'static str> {
        vec![
            "GET /chat HTTP/1.1\r\n",
            "Host: example.com\r\n",
            "Connection: keep-alive, Upgrade\r\n",
            "Upgrade: WebSocket\r\n",
            "Sec-WebSocket-Version: 13\r\n",
            "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
            "\r\n",
        ]
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(accept_key(SAMPLE_KEY), accept_key(SAMPLE_KEY));
    }

    #[test]
    fn test_basic_credential() {
        assert_eq!(basic_credential("Aladdin", "open sesame"), "QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_generate_key_is_16_bytes() {
        let key = generate_key();
        assert_eq!(Base64Standard.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_request_parsing() {
        let validator = HeaderValidator::new();
        let mut state = RequestState::default();
        let result = feed(
            &mut state,
            &validator,
            &[
                "GET /chat?room=1 HTTP/1.1\r\n",
                "connection: Upgrade\r\n",
                "UPGRADE: websocket\r\n",
                "Sec-WebSocket-Version: 13\r\n",
                "Sec-WebSocket-Key:   abc==  \r\n",
                "Sec-WebSocket-Protocol: chat\r\n",
                "Sec-WebSocket-Extensions: permessage-deflate\r\n",
                "Authorization: Basic Zm9vOmJhcg==\r\n",
                "no colon here\r\n",
            ],
        );
        assert_eq!(result, LineResult::Header);
        assert_eq!(state.path, "/chat?room=1");
        assert!(state.saw_upgrade_token);
        assert!(state.saw_websocket_token);
        assert_eq!(state.version, 13);
        assert_eq!(state.key, "abc==");
        assert_eq!(state.protocol, "chat");
        assert_eq!(state.extensions, "permessage-deflate");
        assert_eq!(state.authorization, "Basic Zm9vOmJhcg==");
        assert_eq!(state.feed_line("\r\n", &validator), LineResult::End);
    }

    #[test]
    fn test_unparsable_version_is_zero() {
        let mut state = RequestState::default();
        state.feed_line("Sec-WebSocket-Version: thirteen", &HeaderValidator::new());
        assert_eq!(state.version, 0);
    }

    #[test]
    fn test_valid_request_accepted() {
        let validator = HeaderValidator::new();
        let mut state = RequestState::default();
        assert_eq!(feed(&mut state, &validator, &valid_lines()), LineResult::End);
        assert_eq!(state.evaluate(&validator, None), Ok(()));
    }

    #[test]
    fn test_each_condition_flip_rejects() {
        let validator = HeaderValidator::new();
        let flips: [(&str, &str); 5] = [
            ("Connection: keep-alive, Upgrade\r\n", "Connection: keep-alive\r\n"),
            ("Upgrade: WebSocket\r\n", "Upgrade: h2c\r\n"),
            ("Sec-WebSocket-Version: 13\r\n", "Sec-WebSocket-Version: 8\r\n"),
            ("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n", "Sec-WebSocket-Key: \r\n"),
            ("GET /chat HTTP/1.1\r\n", "GET  HTTP/1.1\r\n"),
        ];
        for (from, to) in flips {
            let lines: Vec<&str> = valid_lines().into_iter().map(|l| if l == from { to } else { l }).collect();
            let mut state = RequestState::default();
            feed(&mut state, &validator, &lines);
            assert!(
                matches!(state.evaluate(&validator, None), Err(HandshakeError::Rejected(_))),
                "flip {:?} should reject",
                to
            );
        }
    }

    #[test]
    fn test_mandatory_count_must_match_exactly() {
        let validator = HeaderValidator::new().with_mandatory(["X-Device"]);

        let mut missing = RequestState::default();
        feed(&mut missing, &validator, &valid_lines());
        assert!(missing.evaluate(&validator, None).is_err());

        let mut present = RequestState::default();
        let mut lines = valid_lines();
        lines.insert(1, "x-device: sensor-7\r\n");
        feed(&mut present, &validator, &lines);
        assert_eq!(present.mandatory_seen, 1);
        assert_eq!(present.evaluate(&validator, None), Ok(()));

        let mut twice = RequestState::default();
        lines.insert(1, "X-Device: sensor-8\r\n");
        feed(&mut twice, &validator, &lines);
        assert_eq!(twice.mandatory_seen, 2);
        assert!(twice.evaluate(&validator, None).is_err());
    }

    #[test]
    fn test_validity_is_and_folded() {
        let validator = HeaderValidator::new().with_predicate(|name, _| name != "X-Bad");
        let mut state = RequestState::default();
        let mut lines = valid_lines();
        lines.insert(1, "X-Bad: 1\r\n");
        lines.insert(2, "X-Good: 1\r\n");
        feed(&mut state, &validator, &lines);
        assert!(!state.headers_valid);
        assert!(state.evaluate(&validator, None).is_err());
    }

    #[test]
    fn test_request_line_resets_header_validity() {
        let validator = HeaderValidator::new()
            .with_predicate(|name, value| !(name.eq_ignore_ascii_case("X-Token") && value == "bad"))
            .with_mandatory(["X-Token"]);
        let mut state = RequestState::default();
        feed(&mut state, &validator, &["X-Token: good\r\n", "X-Token: bad\r\n"]);
        assert!(!state.headers_valid);
        assert_eq!(state.mandatory_seen, 2);

        let mut lines = valid_lines();
        lines.insert(1, "X-Token: good\r\n");
        assert_eq!(feed(&mut state, &validator, &lines), LineResult::End);
        assert!(state.headers_valid);
        assert_eq!(state.mandatory_seen, 1);
        assert_eq!(state.evaluate(&validator, None), Ok(()));
    }

    #[test]
    fn test_auth_checked_first() {
        let validator = HeaderValidator::new();
        let credential = basic_credential("user", "pass");

        let mut malformed = RequestState::default();
        feed(&mut malformed, &validator, &["GET / HTTP/1.1", ""]);
        assert_eq!(malformed.evaluate(&validator, Some(&credential)), Err(HandshakeError::AuthFailed));

        let mut good = RequestState::default();
        let header = format!("Authorization: Basic {}", credential);
        let mut lines: Vec<&str> = valid_lines();
        lines.insert(1, header.as_str());
        feed(&mut good, &validator, &lines);
        assert_eq!(good.evaluate(&validator, Some(&credential)), Ok(()));

        let mut wrong = RequestState::default();
        let mut lines = valid_lines();
        lines.insert(1, "Authorization: Basic d3Jvbmc6d3Jvbmc=");
        feed(&mut wrong, &validator, &lines);
        assert_eq!(wrong.evaluate(&validator, Some(&credential)), Err(HandshakeError::AuthFailed));
    }

    #[test]
    fn test_switching_protocols_response() {
        let response = switching_protocols("abc=", "wsmux-server", Some("*"), Some("arduino"));
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: abc=\r\n"));
        assert!(response.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(response.contains("Sec-WebSocket-Protocol: arduino\r\n"));
        assert!(response.ends_with("\r\n\r\n"));

        let bare = switching_protocols("abc=", "wsmux-server", None, None);
        assert!(!bare.contains("Access-Control-Allow-Origin"));
        assert!(!bare.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_rejection_responses() {
        let body = "This is a Websocket server only!";
        let response = bad_request("srv");
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains(&format!("Content-Length: {}\r\n", body.len())));
        assert!(response.ends_with(&format!("\r\n\r\n{}", body)));

        let response = unauthorized("srv");
        assert!(response.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(response.contains("WWW-Authenticate: Basic realm=\"WebSocket Server\"\r\n\r\n"));
    }

    #[test]
    fn test_client_request_and_response() {
        let handshake = ClientHandshake::with_key(SAMPLE_KEY);
        let request = handshake.request(
            "example.com",
            80,
            "/socket.io/?EIO=3&transport=websocket",
            Some("arduino"),
            &[("Origin".to_string(), "file://".to_string())],
        );
        assert!(request.starts_with("GET /socket.io/?EIO=3&transport=websocket HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com:80\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(request.contains("Sec-WebSocket-Protocol: arduino\r\n"));
        assert!(request.contains("Origin: file://\r\n"));
        assert!(request.ends_with("\r\n\r\n"));

        // the server-side accumulator must accept what the client sends
        let validator = HeaderValidator::new();
        let mut state = RequestState::default();
        for line in request.split_inclusive('\n') {
            state.feed_line(line, &validator);
        }
        assert_eq!(state.evaluate(&validator, None), Ok(()));

        let response = switching_protocols(&accept_key(SAMPLE_KEY), "srv", None, Some("arduino"));
        let mut answer = ResponseState::default();
        let mut last = LineResult::Header;
        for line in response.split_inclusive('\n') {
            last = answer.feed_line(line);
        }
        assert_eq!(last, LineResult::End);
        assert_eq!(answer.status, Some(101));
        assert_eq!(answer.protocol, "arduino");
        assert_eq!(answer.validate(SAMPLE_KEY), Ok(()));
    }

    #[test]
    fn test_client_rejects_bad_answers() {
        let mut answer = ResponseState::default();
        for line in bad_request("srv").split_inclusive('\n') {
            if answer.feed_line(line) == LineResult::End {
                break;
            }
        }
        assert!(matches!(answer.validate(SAMPLE_KEY), Err(HandshakeError::BadStatus(_))));

        let mut answer = ResponseState::default();
        for line in switching_protocols("bogus=", "srv", None, None).split_inclusive('\n') {
            answer.feed_line(line);
        }
        assert!(matches!(answer.validate(SAMPLE_KEY), Err(HandshakeError::InvalidAccept { .. })));
    }
}
