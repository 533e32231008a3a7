//! Error types for wsmux.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WsError>;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Connection closed")]
    NotConnected,

    #[error("no slot with index {0}")]
    InvalidSlot(usize),
}

/// Failures of the frame codec.
///
/// `Incomplete` is not a failure of the peer: the caller keeps the buffered bytes
/// and tries again once more data arrived.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("incomplete frame")]
    Incomplete,

    #[error("reserved bits set")]
    ReservedBits,

    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),

    #[error("64-bit payload length with high bit set")]
    LengthOverflow,

    #[error("fragmented control frame")]
    FragmentedControl,

    #[error("control frame payload of {0} bytes")]
    ControlTooLarge(usize),

    #[error("continuation without a message in progress")]
    UnexpectedContinuation,

    #[error("new data frame while a fragmented message is in progress")]
    InterleavedMessage,

    #[error("masking rule violated")]
    Masking,

    #[error("close code {0} not allowed on the wire")]
    InvalidCloseCode(u16),

    #[error("one-byte close body")]
    TruncatedClose,

    #[error("payload of {size} bytes exceeds limit of {max}")]
    TooLarge { size: u64, max: usize },
}

impl FrameError {
    /// Close code sent to the peer before tearing down the connection.
    pub fn close_code(&self) -> u16 {
        match self {
            FrameError::TooLarge { .. } => 1009,
            _ => 1002,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("upgrade rejected: {0}")]
    Rejected(&'static str),

    #[error("authorization failed")]
    AuthFailed,

    #[error("header line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("unexpected status line: {0}")]
    BadStatus(String),

    #[error("invalid Sec-WebSocket-Accept (expected {expected}, got {actual})")]
    InvalidAccept { expected: String, actual: String },
}
