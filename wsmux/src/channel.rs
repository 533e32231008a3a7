//! Post-upgrade frame pump shared by the server and client roles.
//!
//! A [`Channel`] owns the bytes a connection has received but not yet decoded and
//! the reassembly state of a fragmented message. Each tick the owner calls
//! [`Channel::fill`] and then [`Channel::pump`], which decodes every complete frame,
//! answers pings and closes, and maps the rest onto [`EventKind`]s.

use std::io;

use crate::error::{FrameError, HandshakeError};
use crate::event::{EventKind, MessageKind};
use crate::frame::{self, Frame, Opcode};
use crate::transport::Stream;

/// Which end of the connection we are. Decides the masking rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Server,
    Client,
}

impl Role {
    /// Clients mask every frame with a fresh key, servers never mask.
    fn outbound_mask(self) -> Option<[u8; 4]> {
        match self {
            Role::Client => Some(rand::random()),
            Role::Server => None,
        }
    }

    fn check_inbound(self, frame: &Frame) -> Result<(), FrameError> {
        match (self, frame.mask.is_some()) {
            (Role::Server, false) | (Role::Client, true) => Err(FrameError::Masking),
            _ => Ok(()),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// Transport reported disconnect or a read/write failed.
    TransportLost,
    /// Peer sent a close frame (code, when it carried one).
    PeerClosed(Option<u16>),
    Protocol(FrameError),
    HandshakeRejected(HandshakeError),
    AuthFailed,
    Timeout,
    /// `disconnect()` from the application.
    Local,
    /// Server `close()`.
    Shutdown,
}

impl Teardown {
    /// Close frame body to send before dropping an upgraded connection.
    pub fn close_body(&self) -> Option<Vec<u8>> {
        match self {
            Teardown::Protocol(err) => Some(frame::close_payload(err.close_code(), &err.to_string())),
            Teardown::Local | Teardown::Shutdown => Some(frame::close_payload(1000, "")),
            _ => None,
        }
    }

    /// Reason text delivered with the `Error` event, for causes that have one.
    pub fn error_reason(&self) -> Option<String> {
        match self {
            Teardown::Protocol(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

/// Write one unfragmented frame.
pub(crate) fn write_frame<S: Stream>(
    stream: &mut S,
    role: Role,
    opcode: Opcode,
    payload: &[u8],
) -> io::Result<()> {
    stream.write(&frame::encode(opcode, payload, true, role.outbound_mask()))
}

/// Write a data message, fragmented when `max_frame_payload` asks for it.
pub(crate) fn write_message<S: Stream>(
    stream: &mut S,
    role: Role,
    kind: MessageKind,
    payload: &[u8],
    max_frame_payload: Option<usize>,
) -> io::Result<()> {
    let bytes = frame::encode_message(kind.opcode(), payload, max_frame_payload, || role.outbound_mask());
    stream.write(&bytes)
}

#[derive(Debug, Default)]
pub(crate) struct Channel {
    rx: Vec<u8>,
    message: Vec<u8>,
    message_kind: Option<MessageKind>,
}

impl Channel {
    pub fn reset(&mut self) {
        self.rx.clear();
        self.message.clear();
        self.message_kind = None;
    }

    /// Undecoded bytes are waiting for the rest of their frame.
    pub fn has_partial(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Append whatever the transport has ready, at most `read_chunk` bytes.
    ///
    /// Returns whether anything arrived.
    pub fn fill<S: Stream>(&mut self, stream: &mut S, read_chunk: usize) -> Result<bool, Teardown> {
        let available = stream.bytes_available();
        if available == 0 {
            return Ok(false);
        }
        let bytes = stream
            .read_available(available.min(read_chunk))
            .map_err(|_| Teardown::TransportLost)?;
        self.rx.extend_from_slice(&bytes);
        Ok(!bytes.is_empty())
    }

    /// Decode and dispatch every complete frame in the buffer.
    ///
    /// A trailing partial frame stays buffered for the next call.
    pub fn pump<S: Stream>(
        &mut self,
        stream: &mut S,
        role: Role,
        max_message: usize,
        emit: &mut dyn FnMut(EventKind, &[u8]),
    ) -> Result<(), Teardown> {
        let mut consumed = 0;
        let result = loop {
            match frame::decode(&self.rx[consumed..], max_message) {
                Ok((frame, used)) => {
                    consumed += used;
                    if let Err(cause) = self.handle(frame, stream, role, max_message, emit) {
                        break Err(cause);
                    }
                }
                Err(FrameError::Incomplete) => break Ok(()),
                Err(err) => break Err(Teardown::Protocol(err)),
            }
        };
        self.rx.drain(..consumed);
        result
    }

    fn handle<S: Stream>(
        &mut self,
        frame: Frame,
        stream: &mut S,
        role: Role,
        max_message: usize,
        emit: &mut dyn FnMut(EventKind, &[u8]),
    ) -> Result<(), Teardown> {
        role.check_inbound(&frame).map_err(Teardown::Protocol)?;

        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.message_kind.is_some() {
                    return Err(Teardown::Protocol(FrameError::InterleavedMessage));
                }
                let kind = if frame.opcode == Opcode::Text { MessageKind::Text } else { MessageKind::Binary };
                if frame.fin {
                    emit(kind.event(), &frame.payload);
                } else {
                    emit(kind.fragment_start(), &frame.payload);
                    self.message_kind = Some(kind);
                    self.message = frame.payload;
                }
            }
            Opcode::Continuation => {
                let Some(kind) = self.message_kind else {
                    return Err(Teardown::Protocol(FrameError::UnexpectedContinuation));
                };
                let size = self.message.len() + frame.payload.len();
                if size > max_message {
                    return Err(Teardown::Protocol(FrameError::TooLarge { size: size as u64, max: max_message }));
                }
                self.message.extend_from_slice(&frame.payload);
                if frame.fin {
                    emit(EventKind::FragmentFin, &frame.payload);
                    let message = std::mem::take(&mut self.message);
                    self.message_kind = None;
                    emit(kind.event(), &message);
                } else {
                    emit(EventKind::Fragment, &frame.payload);
                }
            }
            Opcode::Ping => {
                write_frame(stream, role, Opcode::Pong, &frame.payload).map_err(|_| Teardown::TransportLost)?;
                emit(EventKind::Ping, &frame.payload);
            }
            Opcode::Pong => emit(EventKind::Pong, &frame.payload),
            Opcode::Close => {
                let code = match frame::parse_close_payload(&frame.payload) {
                    Some((code, _)) if !frame::is_valid_close_code(code) => {
                        return Err(Teardown::Protocol(FrameError::InvalidCloseCode(code)));
                    }
                    Some((code, _)) => Some(code),
                    None if frame.payload.len() == 1 => return Err(Teardown::Protocol(FrameError::TruncatedClose)),
                    None => None,
                };
                let reply = code.map(|code| frame::close_payload(code, "")).unwrap_or_default();
                if write_frame(stream, role, Opcode::Close, &reply).is_err() {
                    trace_debug!("close reply not delivered");
                }
                return Err(Teardown::PeerClosed(code));
            }
        }
        Ok(())
    }
}
