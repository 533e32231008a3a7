//! WebSocket frame codec (RFC 6455 section 5).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! The codec has no notion of a connection. [`decode`] works on whatever bytes the
//! caller has buffered so far and reports [`FrameError::Incomplete`] until a whole
//! frame is present.

use crate::error::FrameError;

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Longest possible header: 2 + 8 (length) + 4 (mask).
pub const MAX_HEADER_SIZE: usize = 14;

/// Frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Close, Ping and Pong.
    #[inline]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A decoded frame. The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Encode this frame, masking with `mask` when given.
    pub fn to_bytes(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        encode(self.opcode, &self.payload, self.fin, mask)
    }
}

/// Encode one frame.
///
/// Client-role callers pass a fresh random key per frame; servers pass `None`.
pub fn encode(opcode: Opcode, payload: &[u8], fin: bool, mask: Option<[u8; 4]>) -> Vec<u8> {
    let len = payload.len();
    let mut out = Vec::with_capacity(MAX_HEADER_SIZE + len);

    let mut first = opcode as u8;
    if fin {
        first |= 0x80;
    }
    out.push(first);

    let mask_bit = if mask.is_some() { 0x80 } else { 0 };
    if len <= 125 {
        out.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Encode a whole data message, split into frames of at most `max_frame_payload` bytes.
///
/// `mask` is called once per frame so each fragment gets its own key.
pub fn encode_message<F>(
    opcode: Opcode,
    payload: &[u8],
    max_frame_payload: Option<usize>,
    mut mask: F,
) -> Vec<u8>
where
    F: FnMut() -> Option<[u8; 4]>,
{
    let chunk = match max_frame_payload {
        Some(n) if n > 0 && payload.len() > n => n,
        _ => return encode(opcode, payload, true, mask()),
    };

    let mut out = Vec::with_capacity(payload.len() + MAX_HEADER_SIZE * (payload.len() / chunk + 1));
    let mut pieces = payload.chunks(chunk).peekable();
    let mut first = true;
    while let Some(piece) = pieces.next() {
        let op = if first { opcode } else { Opcode::Continuation };
        let fin = pieces.peek().is_none();
        out.extend_from_slice(&encode(op, piece, fin, mask()));
        first = false;
    }
    out
}

/// Decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied. `max_payload` bounds the
/// declared length before anything is buffered for it.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<(Frame, usize), FrameError> {
    if buf.len() < 2 {
        return Err(FrameError::Incomplete);
    }

    let first = buf[0];
    let second = buf[1];

    if first & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let fin = first & 0x80 != 0;
    let opcode = Opcode::from_u8(first & 0x0F).ok_or(FrameError::UnknownOpcode(first & 0x0F))?;
    let masked = second & 0x80 != 0;
    let len7 = second & 0x7F;

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if len7 as usize > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlTooLarge(len7 as usize));
        }
    }

    let mut pos = 2;
    let payload_len: u64 = match len7 {
        126 => {
            if buf.len() < pos + 2 {
                return Err(FrameError::Incomplete);
            }
            let len = u16::from_be_bytes([buf[pos], buf[pos + 1]]) as u64;
            pos += 2;
            len
        }
        127 => {
            if buf.len() < pos + 8 {
                return Err(FrameError::Incomplete);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[pos..pos + 8]);
            let len = u64::from_be_bytes(raw);
            if len & (1 << 63) != 0 {
                return Err(FrameError::LengthOverflow);
            }
            pos += 8;
            len
        }
        n => n as u64,
    };

    if payload_len > max_payload as u64 {
        return Err(FrameError::TooLarge { size: payload_len, max: max_payload });
    }

    let mask = if masked {
        if buf.len() < pos + 4 {
            return Err(FrameError::Incomplete);
        }
        let key = [buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]];
        pos += 4;
        Some(key)
    } else {
        None
    };

    let payload_len = payload_len as usize;
    if buf.len() - pos < payload_len {
        return Err(FrameError::Incomplete);
    }

    let mut payload = buf[pos..pos + payload_len].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok((Frame { fin, opcode, mask, payload }, pos + payload_len))
}

/// XOR `payload` with the 4-byte key in place. Masking and unmasking are the same operation.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i & 3];
    }
}

/// Build a close frame body: big-endian code followed by a UTF-8 reason.
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let reason = &reason.as_bytes()[..reason.len().min(MAX_CONTROL_PAYLOAD - 2)];
    let mut out = Vec::with_capacity(2 + reason.len());
    out.extend_from_slice(&code.to_be_bytes());
    out.extend_from_slice(reason);
    out
}

/// Codes a peer may put in a close frame (RFC 6455 section 7.4).
///
/// 1004-1006 and 1015 are reserved for local use, 1012-2999 are unassigned.
pub fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
}

/// Split a close frame body. An empty body carries no code.
pub fn parse_close_payload(payload: &[u8]) -> Option<(u16, &[u8])> {
    if payload.len() < 2 {
        return None;
    }
    Some((u16::from_be_bytes([payload[0], payload[1]]), &payload[2..]))
}
