// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The response serializer.
//!
//! The head replays the application's headers in insertion order, then
//! appends the engine-managed `Date`, `Server` and `Connection` fields.
//! Framing follows the content: a known length gets `Content-Length`, an
//! unknown (or explicitly chunk-flagged) body gets
//! `Transfer-Encoding: chunked`, and a HEAD exchange gets the headers of
//! the equivalent GET with the body suppressed.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use std::io;
use std::time::SystemTime;

use varco_http::{
    Content,
    HeaderName,
    HeaderValue,
    Payload,
    Response,
    StatusCode,
    StatusCodeClass,
};

/// The chosen wire framing for a response body.
enum TransferStrategy {
    /// No body bytes follow the head.
    Empty,
    /// `Content-Length`-framed bytes.
    Buffered(Vec<u8>),
    /// `Content-Length`-framed stream of a known size.
    MeasuredStream(Box<dyn tokio::io::AsyncRead + Send + Unpin>),
    /// Chunked transfer of a stream of unknown size.
    ChunkedStream(Box<dyn tokio::io::AsyncRead + Send + Unpin>),
    /// Chunked transfer of already-buffered bytes (explicit chunk flag).
    ChunkedBuffered(Vec<u8>),
}

/// Serialize a response. Returns the number of bytes put on the wire.
///
/// `suppress_body` implements HEAD semantics: the head (including the
/// framing headers) is that of the full response, the body is omitted.
pub async fn send_response<W>(
    writer: &mut W,
    mut response: Response,
    keep_alive: bool,
    suppress_body: bool,
) -> Result<u64, io::Error>
        where W: AsyncWriteExt + Unpin {
    let strategy = determine_transfer_strategy(&mut response);

    let mut head = String::with_capacity(256);
    head.push_str("HTTP/1.1 ");
    head.push_str(&response.status.to_string());
    head.push_str("\r\n");

    for (name, value) in response.headers.iter() {
        head.push_str(name.as_str());
        head.push_str(": ");
        value.append_to_message(&mut head);
        head.push_str("\r\n");
    }

    if !response.headers.contains(&HeaderName::Date) {
        head.push_str("Date: ");
        head.push_str(&httpdate::fmt_http_date(SystemTime::now()));
        head.push_str("\r\n");
    }
    if !response.headers.contains(&HeaderName::Server) {
        head.push_str("Server: varco\r\n");
    }
    if !response.headers.contains(&HeaderName::Connection) {
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n"
        } else {
            "Connection: close\r\n"
        });
    }

    head.push_str("\r\n");

    let mut written = head.len() as u64;
    writer.write_all(head.as_bytes()).await?;

    if !suppress_body {
        written += match strategy {
            TransferStrategy::Empty => 0,
            TransferStrategy::Buffered(data) => {
                writer.write_all(&data).await?;
                data.len() as u64
            }
            TransferStrategy::MeasuredStream(mut reader) => {
                transfer_body_full(writer, &mut reader).await?
            }
            TransferStrategy::ChunkedStream(mut reader) => {
                transfer_body_chunked(writer, &mut reader).await?
            }
            TransferStrategy::ChunkedBuffered(data) => {
                let mut reader = std::io::Cursor::new(data);
                transfer_body_chunked(writer, &mut reader).await?
            }
        };
    }

    writer.flush().await?;
    Ok(written)
}

/// Decide the framing and stamp the matching headers. `Content-Length` and
/// `Transfer-Encoding: chunked` are mutually exclusive; whichever the
/// engine picks, the other is removed.
fn determine_transfer_strategy(response: &mut Response) -> TransferStrategy {
    let Some(content) = response.content.take() else {
        if !matches!(response.status.class(), StatusCodeClass::Informational)
            && response.status != StatusCode::NoContent
            && response.status != StatusCode::NotModified
        {
            response.headers.set_content_length(0);
        }
        return TransferStrategy::Empty;
    };

    if !response.headers.contains(&HeaderName::ContentType) {
        response.headers.append(HeaderName::ContentType, HeaderValue::String(content.media_type()));
    }

    if response.chunked {
        response.headers.remove(&HeaderName::ContentLength);
        response.headers.set(HeaderName::TransferEncoding, "chunked".into());
        return match content.into_payload() {
            Payload::Buffered(data) => TransferStrategy::ChunkedBuffered(data),
            Payload::Streamed { reader, .. } => TransferStrategy::ChunkedStream(reader),
        };
    }

    match content.into_payload() {
        Payload::Buffered(data) => {
            response.headers.remove(&HeaderName::TransferEncoding);
            response.headers.set_content_length(data.len() as u64);
            TransferStrategy::Buffered(data)
        }
        Payload::Streamed { reader, length: Some(length) } => {
            response.headers.remove(&HeaderName::TransferEncoding);
            response.headers.set_content_length(length);
            TransferStrategy::MeasuredStream(reader)
        }
        Payload::Streamed { reader, length: None } => {
            response.headers.remove(&HeaderName::ContentLength);
            response.headers.set(HeaderName::TransferEncoding, "chunked".into());
            TransferStrategy::ChunkedStream(reader)
        }
    }
}

/// Copy a length-framed body to the wire.
async fn transfer_body_full<O, I>(output: &mut O, input: &mut I) -> Result<u64, io::Error>
        where O: AsyncWriteExt + Unpin,
              I: AsyncReadExt + Unpin {
    let mut buf = [0u8; 16384];
    let mut written = 0u64;
    loop {
        let len = input.read(&mut buf).await?;
        if len == 0 {
            return Ok(written);
        }
        output.write_all(&buf[..len]).await?;
        written += len as u64;
    }
}

/// Transfer the body using the `Transfer-Encoding: chunked` algorithm: a
/// hex size line per chunk, a zero-sized chunk at the end, never a
/// zero-sized chunk in between.
async fn transfer_body_chunked<O, I>(output: &mut O, input: &mut I) -> Result<u64, io::Error>
        where O: AsyncWriteExt + Unpin,
              I: AsyncReadExt + Unpin {
    let mut buf = [0u8; 16384];
    let mut written = 0u64;

    loop {
        let len = input.read(&mut buf).await?;
        if len == 0 {
            break;
        }

        let size_line = format!("{len:X}\r\n");
        output.write_all(size_line.as_bytes()).await?;
        output.write_all(&buf[..len]).await?;
        output.write_all(b"\r\n").await?;

        // Flush per chunk: streamed producers expect their output to
        // leave the process as it is produced.
        output.flush().await?;
        written += size_line.len() as u64 + len as u64 + 2;
    }

    output.write_all(b"0\r\n\r\n").await?;
    Ok(written + 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serialize(response: Response, keep_alive: bool, suppress_body: bool) -> (Vec<u8>, u64) {
        let mut wire = Vec::new();
        let written = send_response(&mut wire, response, keep_alive, suppress_body).await.unwrap();
        (wire, written)
    }

    fn head_and_body(wire: &[u8]) -> (String, Vec<u8>) {
        let split = wire.windows(4).position(|window| window == b"\r\n\r\n").unwrap();
        (
            String::from_utf8_lossy(&wire[..split + 4]).into_owned(),
            wire[split + 4..].to_vec(),
        )
    }

    #[tokio::test]
    async fn text_body_gets_a_content_length() {
        let (wire, written) = serialize(Response::ok("Hello, world!"), true, false).await;
        let (head, body) = head_and_body(&wire);

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/plain; charset=utf-8\r\n"));
        assert!(head.contains("Content-Length: 13\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.contains("Date: "));
        assert!(head.contains("Server: varco\r\n"));
        assert_eq!(body, b"Hello, world!");
        assert_eq!(written, wire.len() as u64);
    }

    #[tokio::test]
    async fn user_headers_keep_their_order_and_duplicates() {
        let response = Response::ok("x")
            .with_header("X-First", "1")
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2");

        let (wire, _) = serialize(response, true, false).await;
        let (head, _) = head_and_body(&wire);

        let first = head.find("X-First: 1\r\n").unwrap();
        let cookie_a = head.find("Set-Cookie: a=1\r\n").unwrap();
        let cookie_b = head.find("Set-Cookie: b=2\r\n").unwrap();
        assert!(first < cookie_a && cookie_a < cookie_b);
    }

    #[tokio::test]
    async fn stream_without_length_is_chunked() {
        let content = Content::stream(Box::new(std::io::Cursor::new(b"streamed-data".to_vec())), None);
        let (wire, _) = serialize(Response::with_status_and_content(StatusCode::Ok, content), false, false).await;
        let (head, body) = head_and_body(&wire);

        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));
        assert!(head.contains("Connection: close\r\n"));
        assert_eq!(body, b"D\r\nstreamed-data\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn stream_with_known_length_uses_content_length() {
        let content = Content::stream(Box::new(std::io::Cursor::new(b"12345".to_vec())), Some(5));
        let (wire, _) = serialize(Response::with_status_and_content(StatusCode::Ok, content), true, false).await;
        let (head, body) = head_and_body(&wire);

        assert!(head.contains("Content-Length: 5\r\n"));
        assert!(!head.contains("Transfer-Encoding"));
        assert_eq!(body, b"12345");
    }

    #[tokio::test]
    async fn explicit_chunk_flag_forces_chunked_framing() {
        let response = Response::ok("abc").with_chunked_transfer();
        let (wire, _) = serialize(response, true, false).await;
        let (head, body) = head_and_body(&wire);

        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));
        assert_eq!(body, b"3\r\nabc\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn head_semantics_suppress_the_body() {
        let (wire, _) = serialize(Response::ok("Hello, world!"), true, true).await;
        let (head, body) = head_and_body(&wire);

        assert!(head.contains("Content-Length: 13\r\n"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn empty_response_declares_zero_length() {
        let (wire, _) = serialize(Response::with_status(StatusCode::Ok), true, false).await;
        let (head, body) = head_and_body(&wire);
        assert!(head.contains("Content-Length: 0\r\n"));
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn no_content_has_no_length_header() {
        let (wire, _) = serialize(Response::with_status(StatusCode::NoContent), true, false).await;
        let (head, _) = head_and_body(&wire);
        assert!(!head.contains("Content-Length"));
    }

    #[tokio::test]
    async fn form_content_round_trips_through_the_wire() {
        let content = Content::form(vec![
            ("name".to_string(), "value one".to_string()),
            ("name".to_string(), "value/two".to_string()),
        ]);
        let (wire, _) = serialize(Response::with_status_and_content(StatusCode::Ok, content), true, false).await;
        let (head, body) = head_and_body(&wire);

        assert!(head.contains("Content-Type: application/x-www-form-urlencoded\r\n"));
        let decoded = varco_http::urlencoded::parse_pairs(std::str::from_utf8(&body).unwrap());
        assert_eq!(decoded, vec![
            ("name".to_string(), "value one".to_string()),
            ("name".to_string(), "value/two".to_string()),
        ]);

        let declared: usize = {
            let start = head.find("Content-Length: ").unwrap() + "Content-Length: ".len();
            let end = head[start..].find('\r').unwrap();
            head[start..start + end].parse().unwrap()
        };
        assert_eq!(declared, body.len());
    }
}
