//! WebSocket frame codec (RFC 6455 §5.2).
//!
//! Stateless translation between wire bytes and [`Frame`]s.
//!
//! ```text
//!  byte 0      byte 1       [2 or 8 bytes]     [4 bytes]   payload
//! ┌─┬───┬────┬─┬───────┐ ┌────────────────┐ ┌──────────┐ ┌─────────┐
//! │F│RSV│ op │M│ len7  │ │ extended len   │ │ mask key │ │  data   │
//! └─┴───┴────┴─┴───────┘ └────────────────┘ └──────────┘ └─────────┘
//! ```
//!
//! Messages must fit in a single frame: continuation frames and frames with
//! FIN cleared are rejected rather than reassembled.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Frame opcodes understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

/// One decoded frame. The payload is always unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload: Bytes,
}

/// Close status codes sent by the gateway.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED: u16 = 1003;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const TOO_BIG: u16 = 1009;
    pub const INTERNAL_ERROR: u16 = 1011;

    /// The code to answer a peer's close with.
    ///
    /// Codes that must never appear on the wire (1004-1006, 1015) become
    /// [`NORMAL`]; codes outside the registered and application ranges
    /// become [`PROTOCOL_ERROR`].
    pub fn reply_to(code: u16) -> u16 {
        match code {
            1004..=1006 | 1015 => NORMAL,
            1000..=1014 | 3000..=4999 => code,
            _ => PROTOCOL_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame payload of {declared} bytes exceeds the {max} byte limit")]
    FrameTooLarge { declared: u64, max: usize },
    #[error("fragmented messages are not supported")]
    Fragmented,
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("reserved bits set")]
    ReservedBits,
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlTooLong(u64),
}

impl CodecError {
    /// Close code matching this failure.
    pub fn close_code(&self) -> u16 {
        match self {
            CodecError::FrameTooLarge { .. } => close_code::TOO_BIG,
            CodecError::Fragmented => close_code::UNSUPPORTED,
            _ => close_code::PROTOCOL_ERROR,
        }
    }
}

/// Largest payload that fits the 16-bit extended length form.
const MAX_U16_PAYLOAD: usize = u16::MAX as usize;

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame, and
/// otherwise the frame together with the number of bytes it occupied.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<Option<(Frame, usize)>, CodecError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        return Err(CodecError::ReservedBits);
    }
    let raw_opcode = buf[0] & 0x0F;
    let opcode = Opcode::from_u8(raw_opcode).ok_or(CodecError::UnknownOpcode(raw_opcode))?;
    if opcode == Opcode::Continuation || !fin {
        return Err(CodecError::Fragmented);
    }

    let masked = buf[1] & 0x80 != 0;
    let base_len = buf[1] & 0x7F;
    let mut offset = 2;

    let declared: u64 = match base_len {
        126 => {
            if buf.len() < offset + 2 {
                return Ok(None);
            }
            let len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
            offset += 2;
            len
        }
        127 => {
            if buf.len() < offset + 8 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            offset += 8;
            u64::from_be_bytes(raw)
        }
        n => n as u64,
    };

    if opcode.is_control() && declared > 125 {
        return Err(CodecError::ControlTooLong(declared));
    }
    if declared > max_payload as u64 {
        return Err(CodecError::FrameTooLarge { declared, max: max_payload });
    }
    let len = declared as usize;

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    if buf.len() < offset + len {
        return Ok(None);
    }

    let raw = &buf[offset..offset + len];
    let payload = match mask_key {
        Some(key) => Bytes::from(apply_mask(raw, key)),
        None => Bytes::copy_from_slice(raw),
    };

    Ok(Some((
        Frame {
            fin,
            opcode,
            masked,
            payload,
        },
        offset + len,
    )))
}

/// Encode `payload` as a single unmasked text frame.
pub fn encode(payload: &[u8]) -> Bytes {
    encode_frame(Opcode::Text, payload)
}

/// Encode a single unmasked server frame with the given opcode.
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Bytes {
    let len = payload.len();
    let mut out = BytesMut::with_capacity(len + 10);
    out.put_u8(0x80 | opcode as u8);

    if len < 126 {
        out.put_u8(len as u8);
    } else if len <= MAX_U16_PAYLOAD {
        out.put_u8(126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(127);
        out.put_u64(len as u64);
    }

    out.extend_from_slice(payload);
    out.freeze()
}

/// Encode a close frame carrying `code` and a short reason.
pub fn encode_close(code: u16, reason: &str) -> Bytes {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    // Control payloads are capped at 125 bytes
    let reason = truncate_utf8(reason, 123);
    payload.extend_from_slice(reason.as_bytes());
    encode_frame(Opcode::Close, &payload)
}

/// Split a close payload into its status code and reason.
pub fn parse_close(payload: &[u8]) -> Option<(u16, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    Some((code, String::from_utf8_lossy(&payload[2..]).into_owned()))
}

/// XOR `data` with the repeating 4-byte `key`. Masking and unmasking are the
/// same operation.
pub fn apply_mask(data: &[u8], key: [u8; 4]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % 4])
        .collect()
}

/// Encode a masked client frame. Used by tests and tooling that speak to the
/// gateway as a client.
pub fn encode_masked(opcode: Opcode, payload: &[u8], key: [u8; 4]) -> Bytes {
    let unmasked = encode_frame(opcode, payload);
    let header_len = unmasked.len() - payload.len();

    let mut out = BytesMut::with_capacity(unmasked.len() + 4);
    out.extend_from_slice(&unmasked[..header_len]);
    out[1] |= 0x80;
    out.extend_from_slice(&key);
    out.extend_from_slice(&apply_mask(payload, key));
    out.freeze()
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
