use crate::error::Error;
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Control frames may not carry more than 125 payload bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

// Incoming pings above the control limit are still echoed, up to this
// many bytes. Anything larger tears the connection down.
pub(crate) const MAX_LENIENT_PING_PAYLOAD: usize = 64 * 1024;

// Close status used when the peer sent a close frame without a code.
pub(crate) const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continue,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn from(byte: u8) -> Result<Self, Error> {
        match byte {
            0x0 => Ok(OpCode::Continue),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            _ => Err(Error::InvalidOpcode),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            OpCode::Continue => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(&self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// The kind of frame surfaced to the caller by `next_frame`.
///
/// Pong only appears when `expose_pong_frames` is enabled in the
/// connection config; by default pongs are consumed by the keepalive
/// bookkeeping and never reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Text,
    Binary,
    Pong,
}

/// Decoded close frame payload: a two byte big-endian status code
/// followed by a UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// A parsed frame header. The payload itself is never part of this
/// struct, it is streamed separately by the read and write paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub final_fragment: bool,
    pub opcode: OpCode,
    pub length: u64,
    pub mask_key: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Reads and decodes a frame header from the stream.
    ///
    /// The first byte carries the FIN bit, the three reserved bits and the
    /// opcode; the second byte carries the mask bit and a 7-bit length
    /// prefix. A prefix of 126 or 127 switches to a 16 or 64-bit
    /// big-endian extended length. When the mask bit is set, a 4-byte
    /// masking key follows.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, Error> {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header).await?;

        let final_fragment = (header[0] & 0b1000_0000) != 0;

        // The reserved bits are only meaningful when an extension was
        // negotiated, and this endpoint negotiates none. Receiving them
        // set means the peer is talking a dialect we don't speak.
        if header[0] & 0b0111_0000 != 0 {
            return Err(Error::RSVNotZero);
        }

        let opcode = OpCode::from(header[0] & 0b0000_1111)?;

        // Control frames can't be split between multiple frames.
        if !final_fragment && opcode.is_control() {
            return Err(Error::ControlFramesFragmented);
        }

        let masked = (header[1] & 0b1000_0000) != 0;
        let mut length = (header[1] & 0b0111_1111) as u64;

        if length == 126 {
            let mut be_bytes = [0u8; 2];
            reader.read_exact(&mut be_bytes).await?;
            length = u16::from_be_bytes(be_bytes) as u64;
        } else if length == 127 {
            let mut be_bytes = [0u8; 8];
            reader.read_exact(&mut be_bytes).await?;
            length = u64::from_be_bytes(be_bytes);
        }

        let mask_key = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        Ok(FrameHeader {
            final_fragment,
            opcode,
            length,
            mask_key,
        })
    }

    /// Encodes the header into `buf`, picking the shortest length form
    /// that fits the payload size.
    pub fn encode(&self, buf: &mut BytesMut) {
        let first_byte = (self.final_fragment as u8) << 7 | self.opcode.as_u8();
        buf.put_u8(first_byte);

        let mask_bit = if self.mask_key.is_some() { 0b1000_0000 } else { 0 };
        if self.length <= 125 {
            buf.put_u8(mask_bit | self.length as u8);
        } else if self.length <= 65535 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(self.length as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(self.length);
        }

        if let Some(key) = self.mask_key {
            buf.put_slice(&key);
        }
    }
}

/// XOR masking cursor. The key index rolls over the whole fragment, so
/// the same cursor must be reused across partial reads or writes of one
/// frame's payload.
pub(crate) struct MaskCursor {
    key: [u8; 4],
    offset: usize,
}

impl MaskCursor {
    pub(crate) fn new(key: [u8; 4]) -> Self {
        Self { key, offset: 0 }
    }

    pub(crate) fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            *byte ^= self.key[self.offset % 4];
            self.offset = self.offset.wrapping_add(1);
        }
    }
}

/// Builds a close frame payload. The reason is truncated so the whole
/// payload never exceeds the control frame limit; truncation keeps the
/// first 120 reason bytes and appends an ellipsis.
pub(crate) fn encode_close_payload(code: u16, reason: &str) -> Vec<u8> {
    let reason = reason.as_bytes();
    let mut payload = Vec::with_capacity(2 + reason.len().min(MAX_CONTROL_PAYLOAD - 2));
    payload.extend_from_slice(&code.to_be_bytes());
    if reason.len() <= MAX_CONTROL_PAYLOAD - 2 {
        payload.extend_from_slice(reason);
    } else {
        payload.extend_from_slice(&reason[..120]);
        payload.extend_from_slice(b"...");
    }
    payload
}

pub(crate) fn decode_close_payload(payload: &[u8]) -> CloseFrame {
    if payload.len() < 2 {
        return CloseFrame {
            code: NO_STATUS_RECEIVED,
            reason: String::new(),
        };
    }
    CloseFrame {
        code: u16::from_be_bytes([payload[0], payload[1]]),
        reason: String::from_utf8_lossy(&payload[2..]).into_owned(),
    }
}
