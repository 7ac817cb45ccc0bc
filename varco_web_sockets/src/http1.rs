// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The message-level adapter driven over an upgraded HTTP/1.1 connection.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;

use std::time::Duration;

use base64::Engine;

use crate::frame::{
    self,
    Frame,
    OpCode,
    CLOSE_GOING_AWAY,
    CLOSE_NORMAL,
    CLOSE_PROTOCOL_ERROR,
};
use crate::WebSocketError;

/// The protocol GUID mixed into the accept key.
///
/// # References
/// * [RFC 6455 Section 1.3](https://www.rfc-editor.org/rfc/rfc6455.html#section-1.3)
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Compute the `Sec-WebSocket-Accept` value for a client's
/// `Sec-WebSocket-Key`.
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut sha1 = sha1_smol::Sha1::new();
    sha1.update(client_key.trim().as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(sha1.digest().bytes())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WebSocketState {
    Open,
    /// We sent a close frame and are waiting for the echo.
    Closing,
    Closed,
}

/// A reassembled data message.
#[derive(Debug, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// A server-side WebSocket over an upgraded duplex stream.
pub struct WebSocket<S> {
    stream: S,
    state: WebSocketState,
    idle_timeout: Duration,
    max_message_size: usize,
}

impl<S> std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("state", &self.state)
            .field("idle_timeout", &self.idle_timeout)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}

impl<S> WebSocket<S>
        where S: AsyncRead + AsyncWrite + Unpin + Send {
    /// Wrap a connection on which the 101 handshake has already been
    /// written.
    #[must_use]
    pub fn after_upgrade(stream: S) -> Self {
        Self {
            stream,
            state: WebSocketState::Open,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    #[must_use]
    pub fn state(&self) -> WebSocketState {
        self.state
    }

    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), WebSocketError> {
        if self.state == WebSocketState::Closed {
            return Err(WebSocketError::Protocol("send on closed connection"));
        }
        frame::write_frame(&mut self.stream, frame).await?;
        Ok(())
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), WebSocketError> {
        self.send_frame(&Frame::text(text)).await
    }

    pub async fn send_binary(&mut self, data: &[u8]) -> Result<(), WebSocketError> {
        self.send_frame(&Frame::binary(data.to_vec())).await
    }

    /// Read one raw frame, applying the idle timeout and the
    /// client-must-mask rule. Most callers want
    /// [`WebSocket::receive_message`] instead.
    pub async fn receive_frame(&mut self) -> Result<Frame, WebSocketError> {
        match timeout(self.idle_timeout, frame::read_frame(&mut self.stream, true, self.max_message_size)).await {
            Ok(result) => result,
            Err(_) => {
                _ = self.close(CLOSE_GOING_AWAY).await;
                Err(WebSocketError::Protocol("idle timeout"))
            }
        }
    }

    /// Receive the next data message, transparently answering pings and the
    /// close handshake. Returns `None` once the connection is closed.
    pub async fn receive_message(&mut self) -> Result<Option<Message>, WebSocketError> {
        if self.state == WebSocketState::Closed {
            return Ok(None);
        }

        let mut fragments: Option<(OpCode, Vec<u8>)> = None;

        loop {
            let frame = self.receive_frame().await?;

            match frame.opcode {
                OpCode::Ping => {
                    frame::write_frame(&mut self.stream, &Frame::pong(frame.payload)).await?;
                }
                OpCode::Pong => {}
                OpCode::Close => {
                    let code = frame.close_code().unwrap_or(CLOSE_NORMAL);
                    if self.state == WebSocketState::Open {
                        _ = frame::write_frame(&mut self.stream, &Frame::close(code)).await;
                    }
                    self.state = WebSocketState::Closed;
                    return Ok(None);
                }

                OpCode::Text | OpCode::Binary => {
                    if fragments.is_some() {
                        _ = self.close(CLOSE_PROTOCOL_ERROR).await;
                        return Err(WebSocketError::Protocol("data frame interleaved into fragmented message"));
                    }
                    if frame.fin {
                        return Ok(Some(assemble_message(frame.opcode, frame.payload)?));
                    }
                    fragments = Some((frame.opcode, frame.payload));
                }

                OpCode::Continuation => {
                    let Some((opcode, mut payload)) = fragments.take() else {
                        _ = self.close(CLOSE_PROTOCOL_ERROR).await;
                        return Err(WebSocketError::Protocol("continuation without a started message"));
                    };
                    if payload.len() + frame.payload.len() > self.max_message_size {
                        return Err(WebSocketError::MessageTooLarge);
                    }
                    payload.extend_from_slice(&frame.payload);
                    if frame.fin {
                        return Ok(Some(assemble_message(opcode, payload)?));
                    }
                    fragments = Some((opcode, payload));
                }
            }
        }
    }

    /// Initiate (or acknowledge) the close handshake. Idempotent.
    pub async fn close(&mut self, code: u16) -> Result<(), WebSocketError> {
        match self.state {
            WebSocketState::Open => {
                self.state = WebSocketState::Closing;
                frame::write_frame(&mut self.stream, &Frame::close(code)).await?;
                Ok(())
            }
            WebSocketState::Closing | WebSocketState::Closed => Ok(()),
        }
    }
}

fn assemble_message(opcode: OpCode, payload: Vec<u8>) -> Result<Message, WebSocketError> {
    match opcode {
        OpCode::Text => match String::from_utf8(payload) {
            Ok(text) => Ok(Message::Text(text)),
            Err(_) => Err(WebSocketError::Protocol("text message was not valid UTF-8")),
        },
        _ => Ok(Message::Binary(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::write_masked_frame;
    use tokio::io::AsyncReadExt;

    const KEY: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

    #[test]
    fn accept_key_matches_the_rfc_sample() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[tokio::test]
    async fn receives_a_text_message() {
        let (client, server) = tokio::io::duplex(4096);
        let mut socket = WebSocket::after_upgrade(server);

        let mut client = client;
        write_masked_frame(&mut client, &Frame::text("hi there"), KEY).await.unwrap();

        let message = socket.receive_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("hi there".to_string())));
    }

    #[tokio::test]
    async fn reassembles_fragments() {
        let (client, server) = tokio::io::duplex(4096);
        let mut socket = WebSocket::after_upgrade(server);

        let mut client = client;
        let first = Frame { fin: false, opcode: OpCode::Text, payload: b"Hello, ".to_vec() };
        let middle = Frame { fin: false, opcode: OpCode::Continuation, payload: b"wo".to_vec() };
        let last = Frame { fin: true, opcode: OpCode::Continuation, payload: b"rld!".to_vec() };
        write_masked_frame(&mut client, &first, KEY).await.unwrap();
        write_masked_frame(&mut client, &middle, KEY).await.unwrap();
        write_masked_frame(&mut client, &last, KEY).await.unwrap();

        let message = socket.receive_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("Hello, world!".to_string())));
    }

    #[tokio::test]
    async fn pings_are_answered_with_pongs() {
        let (client, server) = tokio::io::duplex(4096);
        let mut socket = WebSocket::after_upgrade(server);

        let mut client = client;
        let ping = Frame { fin: true, opcode: OpCode::Ping, payload: b"tick".to_vec() };
        write_masked_frame(&mut client, &ping, KEY).await.unwrap();
        write_masked_frame(&mut client, &Frame::text("after"), KEY).await.unwrap();

        let message = socket.receive_message().await.unwrap();
        assert_eq!(message, Some(Message::Text("after".to_string())));

        // The pong must precede any later server frame.
        let mut first = [0u8; 2];
        client.read_exact(&mut first).await.unwrap();
        assert_eq!(first[0], 0x80 | OpCode::Pong.as_nibble());
        assert_eq!(first[1] as usize, b"tick".len());
    }

    #[tokio::test]
    async fn close_is_echoed_and_state_transitions() {
        let (client, server) = tokio::io::duplex(4096);
        let mut socket = WebSocket::after_upgrade(server);

        let mut client = client;
        write_masked_frame(&mut client, &Frame::close(CLOSE_NORMAL), KEY).await.unwrap();

        assert_eq!(socket.receive_message().await.unwrap(), None);
        assert_eq!(socket.state(), WebSocketState::Closed);

        // The echoed close frame arrives on the client side.
        let mut head = [0u8; 2];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], 0x80 | OpCode::Close.as_nibble());

        // Closing again is a no-op.
        socket.close(CLOSE_NORMAL).await.unwrap();
    }

    #[tokio::test]
    async fn idle_timeout_closes_with_going_away() {
        let (client, server) = tokio::io::duplex(4096);
        let mut socket = WebSocket::after_upgrade(server)
            .with_idle_timeout(Duration::from_millis(20));

        let error = socket.receive_message().await.unwrap_err();
        assert!(matches!(error, WebSocketError::Protocol("idle timeout")));
        assert_eq!(socket.state(), WebSocketState::Closing);

        let mut client = client;
        let mut head = [0u8; 4];
        client.read_exact(&mut head).await.unwrap();
        assert_eq!(head[0], 0x80 | OpCode::Close.as_nibble());
        assert_eq!(u16::from_be_bytes([head[2], head[3]]), CLOSE_GOING_AWAY);
    }
}
