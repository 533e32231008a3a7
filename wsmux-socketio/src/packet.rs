//! Engine.IO and Socket.IO type bytes.
//!
//! An Engine.IO text packet is one ASCII digit followed by its data. A `message`
//! packet carries a Socket.IO packet, which again starts with one ASCII digit:
//!
//! ```text
//! "4" "2" ["chat","hi"]
//!  │   │   └─ application payload
//!  │   └─ Socket.IO type (event)
//!  └─ Engine.IO type (message)
//! ```

/// Engine.IO packet type, the first byte of every text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineIoType {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Upgrade,
    Noop,
}

impl EngineIoType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'0' => Some(Self::Open),
            b'1' => Some(Self::Close),
            b'2' => Some(Self::Ping),
            b'3' => Some(Self::Pong),
            b'4' => Some(Self::Message),
            b'5' => Some(Self::Upgrade),
            b'6' => Some(Self::Noop),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Open => b'0',
            Self::Close => b'1',
            Self::Ping => b'2',
            Self::Pong => b'3',
            Self::Message => b'4',
            Self::Upgrade => b'5',
            Self::Noop => b'6',
        }
    }
}

/// Socket.IO packet type, the second byte of an Engine.IO `message`.
///
/// Unknown bytes are kept rather than dropped so the application still sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketIoType {
    Connect,
    Disconnect,
    Event,
    Ack,
    Error,
    BinaryEvent,
    BinaryAck,
    Unknown(u8),
}

impl SocketIoType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'0' => Self::Connect,
            b'1' => Self::Disconnect,
            b'2' => Self::Event,
            b'3' => Self::Ack,
            b'4' => Self::Error,
            b'5' => Self::BinaryEvent,
            b'6' => Self::BinaryAck,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Connect => b'0',
            Self::Disconnect => b'1',
            Self::Event => b'2',
            Self::Ack => b'3',
            Self::Error => b'4',
            Self::BinaryEvent => b'5',
            Self::BinaryAck => b'6',
            Self::Unknown(byte) => byte,
        }
    }
}

/// A text frame split into its Engine.IO parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Socket.IO packet inside an Engine.IO `message`.
    Message(SocketIoType, &'a [u8]),
    /// Any other Engine.IO packet, with whatever followed the type byte.
    Control(EngineIoType, &'a [u8]),
    /// Empty frame, unknown Engine.IO type, or a `message` too short to carry a Socket.IO type.
    Invalid,
}

pub fn parse(data: &[u8]) -> Packet<'_> {
    let Some((&first, rest)) = data.split_first() else {
        return Packet::Invalid;
    };
    match EngineIoType::from_byte(first) {
        Some(EngineIoType::Message) => match rest.split_first() {
            Some((&io_type, payload)) => Packet::Message(SocketIoType::from_byte(io_type), payload),
            None => Packet::Invalid,
        },
        Some(eio) => Packet::Control(eio, rest),
        None => Packet::Invalid,
    }
}

/// `"4" + type + payload`.
pub fn encode_message(io_type: SocketIoType, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(EngineIoType::Message.as_byte());
    out.push(io_type.as_byte());
    out.extend_from_slice(payload);
    out
}

/// Echo of an Engine.IO ping with the type byte turned into pong.
pub fn pong_for(ping: &[u8]) -> Vec<u8> {
    let mut pong = ping.to_vec();
    if let Some(first) = pong.first_mut() {
        *first = EngineIoType::Pong.as_byte();
    }
    pong
}
