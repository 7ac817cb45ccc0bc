// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The RFC 6455 frame codec.
//!
//! # References
//! * [RFC 6455 Section 5.2](https://www.rfc-editor.org/rfc/rfc6455.html#section-5.2)

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::WebSocketError;

/// Close code: normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code: endpoint is going away (also used for idle timeouts).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code: protocol error.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Close code: unexpected condition on the server.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Control frames carry at most 125 payload bytes and must not be
/// fragmented.
const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    #[must_use]
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Some(match nibble {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_nibble(&self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A single (possibly partial) frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Text,
            payload: payload.into().into_bytes(),
        }
    }

    #[must_use]
    pub fn binary(payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Binary,
            payload,
        }
    }

    #[must_use]
    pub fn pong(payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Pong,
            payload,
        }
    }

    /// A close frame carrying a status code.
    #[must_use]
    pub fn close(code: u16) -> Self {
        Self {
            fin: true,
            opcode: OpCode::Close,
            payload: code.to_be_bytes().to_vec(),
        }
    }

    /// The status code of a close frame, when one was supplied.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }
}

/// Read one frame. `require_masked` enforces the client-to-server masking
/// rule; `max_payload` bounds a single frame's payload.
pub async fn read_frame<R>(reader: &mut R, require_masked: bool, max_payload: usize) -> Result<Frame, WebSocketError>
        where R: AsyncReadExt + Unpin {
    let first = reader.read_u8().await?;
    let fin = first & 0x80 != 0;

    if first & 0x70 != 0 {
        return Err(WebSocketError::Protocol("reserved bits set"));
    }

    let Some(opcode) = OpCode::from_nibble(first & 0x0F) else {
        return Err(WebSocketError::Protocol("unknown opcode"));
    };

    let second = reader.read_u8().await?;
    let masked = second & 0x80 != 0;
    let length = match second & 0x7F {
        126 => reader.read_u16().await? as u64,
        127 => reader.read_u64().await?,
        short => short as u64,
    };

    if opcode.is_control() {
        if !fin {
            return Err(WebSocketError::Protocol("fragmented control frame"));
        }
        if length as usize > MAX_CONTROL_PAYLOAD {
            return Err(WebSocketError::Protocol("oversized control frame"));
        }
    }

    if length > max_payload as u64 {
        return Err(WebSocketError::MessageTooLarge);
    }

    if require_masked && !masked {
        return Err(WebSocketError::Protocol("client frame was not masked"));
    }

    let masking_key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;

    if let Some(key) = masking_key {
        for (index, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[index % 4];
        }
    }

    Ok(Frame { fin, opcode, payload })
}

/// Write one frame, unmasked (server-to-client frames are never masked).
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), std::io::Error>
        where W: AsyncWriteExt + Unpin {
    let mut head = Vec::with_capacity(10);
    let fin_bit: u8 = if frame.fin { 0x80 } else { 0x00 };
    head.push(fin_bit | frame.opcode.as_nibble());

    let length = frame.payload.len();
    if length < 126 {
        head.push(length as u8);
    } else if length <= u16::MAX as usize {
        head.push(126);
        head.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        head.push(127);
        head.extend_from_slice(&(length as u64).to_be_bytes());
    }

    writer.write_all(&head).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await
}

/// Write one masked frame, as a client would. Only exercised from tests and
/// diagnostic tooling; the server side never masks.
pub async fn write_masked_frame<W>(writer: &mut W, frame: &Frame, key: [u8; 4]) -> Result<(), std::io::Error>
        where W: AsyncWriteExt + Unpin {
    let mut head = Vec::with_capacity(14);
    let fin_bit: u8 = if frame.fin { 0x80 } else { 0x00 };
    head.push(fin_bit | frame.opcode.as_nibble());

    let length = frame.payload.len();
    if length < 126 {
        head.push(0x80 | length as u8);
    } else if length <= u16::MAX as usize {
        head.push(0x80 | 126);
        head.extend_from_slice(&(length as u16).to_be_bytes());
    } else {
        head.push(0x80 | 127);
        head.extend_from_slice(&(length as u64).to_be_bytes());
    }
    head.extend_from_slice(&key);

    let mut masked: Vec<u8> = frame.payload.clone();
    for (index, byte) in masked.iter_mut().enumerate() {
        *byte ^= key[index % 4];
    }

    writer.write_all(&head).await?;
    writer.write_all(&masked).await?;
    writer.flush().await
}
