//! RFC 6455 frame codec: binary decode/encode, masked and unmasked
//! (spec.md §4.4).

use rand::RngCore;

use crate::error::StormError;
use crate::ws::close::CloseCode;

/// WebSocket frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    fn from_nibble(nibble: u8) -> Result<Self, StormError> {
        match nibble {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(StormError::Protocol(
                CloseCode::ProtocolError,
                format!("unknown opcode 0x{other:x}"),
            )),
        }
    }

    fn to_nibble(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }
}

/// A single RFC 6455 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsFrame {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl WsFrame {
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Binary,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Ping,
            masked: false,
            payload: payload.into(),
        }
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Pong,
            masked: false,
            payload: payload.into(),
        }
    }

    /// A Close frame whose payload is `[status:u16 big-endian]`
    /// (no reason text is emitted by the core).
    pub fn close(status: CloseCode) -> Self {
        let status = status.coerced_for_wire();
        Self {
            fin: true,
            opcode: OpCode::Close,
            masked: false,
            payload: status.code().to_be_bytes().to_vec(),
        }
    }

    /// Extracts the status code from a received Close frame's payload,
    /// defaulting to `NormalClosure` when absent (spec.md §4.10:
    /// "echo a Close with the peer's status (or 1000 if absent)").
    pub fn close_status(&self) -> CloseCode {
        if self.payload.len() >= 2 {
            let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
            CloseCode::from(code)
        } else {
            CloseCode::NormalClosure
        }
    }
}

/// Attempts to decode one frame from the front of `buffer`. On success
/// the consumed bytes are drained and the frame returned. `Ok(None)`
/// means more bytes are needed; `buffer` is left untouched in that
/// case.
pub fn decode(buffer: &mut Vec<u8>, max_frame_size: usize) -> Result<Option<WsFrame>, StormError> {
    if buffer.len() < 2 {
        return Ok(None);
    }

    let b0 = buffer[0];
    let b1 = buffer[1];

    let fin = b0 & 0b1000_0000 != 0;
    let rsv = b0 & 0b0111_0000;
    if rsv != 0 {
        return Err(StormError::Protocol(
            CloseCode::ProtocolError,
            "RSV bits must be zero".into(),
        ));
    }

    let opcode = OpCode::from_nibble(b0 & 0b0000_1111)?;
    let masked = b1 & 0b1000_0000 != 0;
    let length_code = b1 & 0b0111_1111;

    if opcode.is_control() && !fin {
        return Err(StormError::Protocol(
            CloseCode::ProtocolError,
            "control frames must not be fragmented".into(),
        ));
    }

    let (len_field_size, min_header) = match length_code {
        126 => (2usize, 2 + 2),
        127 => (8usize, 2 + 8),
        _ => (0usize, 2),
    };
    if buffer.len() < min_header {
        return Ok(None);
    }

    let payload_len: usize = match length_code {
        126 => u16::from_be_bytes(buffer[2..4].try_into().unwrap()) as usize,
        127 => {
            let raw = u64::from_be_bytes(buffer[2..10].try_into().unwrap());
            raw as usize
        }
        small => small as usize,
    };

    if opcode.is_control() && payload_len > 125 {
        return Err(StormError::Protocol(
            CloseCode::ProtocolError,
            "control frame payload exceeds 125 bytes".into(),
        ));
    }

    if payload_len > max_frame_size {
        return Err(StormError::Protocol(
            CloseCode::MessageTooBig,
            format!("frame of {payload_len} bytes exceeds max_frame_size of {max_frame_size}"),
        ));
    }

    let mask_offset = 2 + len_field_size;
    let mask_size = if masked { 4 } else { 0 };
    let header_len = mask_offset + mask_size;
    let total_len = header_len + payload_len;

    if buffer.len() < total_len {
        return Ok(None);
    }

    let mask_key: Option<[u8; 4]> = if masked {
        Some(buffer[mask_offset..mask_offset + 4].try_into().unwrap())
    } else {
        None
    };

    let mut rest = buffer.split_off(total_len);
    let mut payload = buffer.split_off(header_len);
    std::mem::swap(buffer, &mut rest);

    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    Ok(Some(WsFrame {
        fin,
        opcode,
        masked,
        payload,
    }))
}

/// Encodes `frame` into `out`. Server-originated frames are unmasked;
/// client-originated frames are masked with a fresh, cryptographically
/// random key (spec.md §4.4 "Encode").
pub fn encode(frame: &WsFrame, mask: bool, out: &mut Vec<u8>) {
    let first_byte = 0b1000_0000 | frame.opcode.to_nibble();
    out.push(first_byte);

    let len = frame.payload.len();
    let mask_bit = if mask { 0b1000_0000 } else { 0 };

    if len <= 125 {
        out.push(mask_bit | (len as u8));
    } else if len <= u16::MAX as usize {
        out.push(mask_bit | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }

    if mask {
        let mut key = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut key);
        out.extend_from_slice(&key);
        let start = out.len();
        out.extend_from_slice(&frame.payload);
        for (i, byte) in out[start..].iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    } else {
        out.extend_from_slice(&frame.payload);
    }
}
