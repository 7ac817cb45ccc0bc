// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use tokio::io::{AsyncRead, AsyncWrite, BufStream};

/// Any duplex byte stream a connection can run over: plain TCP, a
/// TLS-wrapped stream, or an in-memory pipe in tests. The engine never
/// learns which.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// The buffered connection stream a request context borrows for its
/// lifetime. Reads (body framing) and writes (interim responses, hijacked
/// streaming) both go through here, which is what makes the single-task
/// per-connection model safe: there is exactly one owner at any time.
pub type ExchangeStream = BufStream<Box<dyn Transport>>;

/// Wrap a raw transport into the buffered exchange stream.
pub fn exchange_stream(transport: impl Transport + 'static) -> ExchangeStream {
    BufStream::new(Box::new(transport))
}
