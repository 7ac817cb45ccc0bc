// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! WebSocket support for upgraded HTTP/1.1 connections.
//!
//! The wire layer performs the `Upgrade: websocket` handshake and then hands
//! the raw duplex stream to [`WebSocket::after_upgrade`]. From there the
//! adapter speaks RFC 6455 framing: client frames must be masked, control
//! frames are answered automatically, and fragmented messages are
//! reassembled.

pub mod frame;
pub mod http1;

pub use frame::{Frame, OpCode};
pub use http1::{accept_key, Message, WebSocket, WebSocketState};

use async_trait::async_trait;

use std::io;

#[derive(Debug)]
pub enum WebSocketError {
    Io(io::Error),

    /// The peer violated the framing rules; the connection is unusable.
    Protocol(&'static str),

    /// A reassembled message exceeded the configured maximum.
    MessageTooLarge,

    /// The application-side message handler failed.
    Handler(anyhow::Error),
}

impl From<io::Error> for WebSocketError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "i/o error: {error}"),
            Self::Protocol(message) => write!(f, "protocol violation: {message}"),
            Self::MessageTooLarge => f.write_str("message too large"),
            Self::Handler(error) => write!(f, "handler error: {error}"),
        }
    }
}

impl std::error::Error for WebSocketError {}

/// Application-side message callbacks for [`drive`].
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle_text(&mut self, socket_text: String) -> Result<(), anyhow::Error>;

    async fn handle_binary(&mut self, data: Vec<u8>) -> Result<(), anyhow::Error>;

    /// Invoked once, after the close handshake completed or the peer went
    /// away.
    async fn handle_close(&mut self) {}
}

/// Pump messages from the socket into the handler until the connection
/// closes.
pub async fn drive<S, H>(socket: &mut WebSocket<S>, handler: &mut H) -> Result<(), WebSocketError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    H: MessageHandler,
{
    loop {
        let result = match socket.receive_message().await {
            Ok(Some(Message::Text(text))) => handler.handle_text(text).await,
            Ok(Some(Message::Binary(data))) => handler.handle_binary(data).await,
            Ok(None) => {
                handler.handle_close().await;
                return Ok(());
            }
            Err(error) => {
                handler.handle_close().await;
                return Err(error);
            }
        };

        if let Err(error) = result {
            socket.close(frame::CLOSE_INTERNAL_ERROR).await?;
            handler.handle_close().await;
            return Err(WebSocketError::Handler(error));
        }
    }
}
