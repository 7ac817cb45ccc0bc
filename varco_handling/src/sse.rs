// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Server-Sent Events over a hijacked exchange.
//!
//! Acquiring the channel writes the response head straight away: status
//! 200, `Content-Type: text/event-stream`, proxy buffering disabled, and
//! chunked framing with keep-alive off. Every `send` emits one complete
//! frame as one chunk, so a frame can never be interleaved with another.
//!
//! # References
//! * [HTML Standard, Server-sent events](https://html.spec.whatwg.org/multipage/server-sent-events.html)

use tokio::io::AsyncWriteExt;

use std::io;
use std::time::SystemTime;

use crate::stream::ExchangeStream;

/// One outgoing event under construction.
#[derive(Clone, Debug, Default)]
pub struct Event<'a> {
    pub event: Option<&'a str>,
    pub data: &'a str,
    pub id: Option<&'a str>,
    pub retry_ms: Option<u64>,
}

/// The server side of an event stream.
pub struct EventSource<'conn> {
    stream: &'conn mut ExchangeStream,
    closed: bool,
}

impl<'conn> EventSource<'conn> {
    /// Write the response head and hand over the channel.
    pub(crate) async fn start(stream: &'conn mut ExchangeStream) -> Result<Self, io::Error> {
        let head = format!(
            "HTTP/1.1 200 OK\r\n\
             Content-Type: text/event-stream\r\n\
             Cache-Control: no-store\r\n\
             X-Accel-Buffering: no\r\n\
             Transfer-Encoding: chunked\r\n\
             Connection: close\r\n\
             Date: {}\r\n\
             Server: varco\r\n\
             \r\n",
            httpdate::fmt_http_date(SystemTime::now()),
        );
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await?;

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Send a full event. Multi-line data is split into one `data:` line
    /// per input line, as the wire format requires.
    pub async fn send(&mut self, event: Event<'_>) -> Result<(), io::Error> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "event source closed"));
        }

        let mut frame = String::new();
        if let Some(name) = event.event {
            frame.push_str("event: ");
            frame.push_str(name);
            frame.push('\n');
        }
        if let Some(id) = event.id {
            frame.push_str("id: ");
            frame.push_str(id);
            frame.push('\n');
        }
        if let Some(retry_ms) = event.retry_ms {
            frame.push_str("retry: ");
            frame.push_str(&retry_ms.to_string());
            frame.push('\n');
        }
        for line in event.data.split('\n') {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');

        self.write_chunk(frame.as_bytes()).await
    }

    /// Send a bare data event.
    pub async fn send_data(&mut self, data: &str) -> Result<(), io::Error> {
        self.send(Event {
            data,
            ..Event::default()
        })
        .await
    }

    /// A comment frame, used to keep intermediaries from timing the
    /// connection out.
    pub async fn ping(&mut self) -> Result<(), io::Error> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "event source closed"));
        }
        self.write_chunk(b": ping\n\n").await
    }

    /// Terminate the stream with the final zero-sized chunk. Idempotent.
    pub async fn close(&mut self) -> Result<(), io::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.write_all(b"0\r\n\r\n").await?;
        self.stream.flush().await
    }

    /// One SSE frame becomes exactly one chunk on the wire.
    async fn write_chunk(&mut self, payload: &[u8]) -> Result<(), io::Error> {
        let mut chunk = format!("{:X}\r\n", payload.len()).into_bytes();
        chunk.extend_from_slice(payload);
        chunk.extend_from_slice(b"\r\n");
        self.stream.write_all(&chunk).await?;
        self.stream.flush().await
    }
}
