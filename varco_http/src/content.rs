// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use tokio::io::AsyncRead;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::multipart::{serialize_parts, Part};
use crate::urlencoded;

/// The body of an outgoing response.
///
/// Every variant knows its default media type and whether its byte length is
/// known up front; the wire layer uses that to choose between
/// `Content-Length` and `Transfer-Encoding: chunked` framing. Variants that
/// require an encoding pass (`Form`, `Multipart`) are encoded exactly once,
/// when the body is turned into its payload.
pub enum Content {
    Bytes(Vec<u8>, Option<String>),
    Text(String, Option<String>),
    Html(String),
    Form(Vec<(String, String)>),
    Multipart(MultipartContent),
    Stream(StreamContent),
}

pub struct StreamContent {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// `None` when the producer cannot know the length; the response is then
    /// transferred chunked.
    pub length: Option<u64>,
    pub media_type: Option<String>,
}

pub struct MultipartContent {
    pub boundary: String,
    pub parts: Vec<Part>,
}

/// The realized transfer form of a [`Content`].
pub enum Payload {
    Buffered(Vec<u8>),
    Streamed {
        reader: Box<dyn AsyncRead + Send + Unpin>,
        length: Option<u64>,
    },
}

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Produce a boundary that will not occur in well-behaved part content.
#[must_use]
pub fn generate_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.subsec_nanos() as u64)
        .unwrap_or(0);
    let counter = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("varco-{:08x}{:08x}", nanos, counter)
}

impl Content {
    #[must_use]
    pub fn bytes(data: Vec<u8>) -> Self {
        Self::Bytes(data, None)
    }

    #[must_use]
    pub fn bytes_with_type(data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self::Bytes(data, Some(media_type.into()))
    }

    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into(), None)
    }

    #[must_use]
    pub fn text_with_type(text: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::Text(text.into(), Some(media_type.into()))
    }

    #[must_use]
    pub fn html(text: impl Into<String>) -> Self {
        Self::Html(text.into())
    }

    #[must_use]
    pub fn form(fields: Vec<(String, String)>) -> Self {
        Self::Form(fields)
    }

    #[must_use]
    pub fn multipart(parts: Vec<Part>) -> Self {
        Self::Multipart(MultipartContent {
            boundary: generate_boundary(),
            parts,
        })
    }

    /// A body streamed from a reader. When `length` is unknown the response
    /// is transferred chunked.
    #[must_use]
    pub fn stream(reader: Box<dyn AsyncRead + Send + Unpin>, length: Option<u64>) -> Self {
        Self::Stream(StreamContent {
            reader,
            length,
            media_type: None,
        })
    }

    /// The media type sent when the response doesn't carry an explicit
    /// `Content-Type` header.
    #[must_use]
    pub fn media_type(&self) -> String {
        match self {
            Self::Bytes(_, media_type) => media_type.clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            Self::Text(_, media_type) => media_type.clone()
                .unwrap_or_else(|| "text/plain; charset=utf-8".to_string()),
            Self::Html(_) => "text/html; charset=utf-8".to_string(),
            Self::Form(_) => "application/x-www-form-urlencoded".to_string(),
            Self::Multipart(multipart) => format!("multipart/form-data; boundary={}", multipart.boundary),
            Self::Stream(stream) => stream.media_type.clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
        }
    }

    /// The byte length of the encoded body, when it can be known without
    /// draining a stream.
    #[must_use]
    pub fn length(&self) -> Option<u64> {
        match self {
            Self::Bytes(data, _) => Some(data.len() as u64),
            Self::Text(text, _) => Some(text.len() as u64),
            Self::Html(text) => Some(text.len() as u64),
            Self::Form(fields) => Some(urlencoded::encode_form(fields).len() as u64),
            Self::Multipart(multipart) => Some(serialize_parts(&multipart.boundary, &multipart.parts).len() as u64),
            Self::Stream(stream) => stream.length,
        }
    }

    /// Realize the content into the bytes (or reader) that go on the wire.
    /// Buffered variants are encoded exactly once here.
    #[must_use]
    pub fn into_payload(self) -> Payload {
        match self {
            Self::Bytes(data, _) => Payload::Buffered(data),
            Self::Text(text, _) => Payload::Buffered(text.into_bytes()),
            Self::Html(text) => Payload::Buffered(text.into_bytes()),
            Self::Form(fields) => Payload::Buffered(urlencoded::encode_form(&fields).into_bytes()),
            Self::Multipart(multipart) => {
                Payload::Buffered(serialize_parts(&multipart.boundary, &multipart.parts))
            }
            Self::Stream(stream) => Payload::Streamed {
                reader: stream.reader,
                length: stream.length,
            },
        }
    }
}

impl std::fmt::Debug for Content {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(data, media_type) => f.debug_struct("Bytes")
                .field("len", &data.len())
                .field("media_type", media_type)
                .finish(),
            Self::Text(text, media_type) => f.debug_struct("Text")
                .field("len", &text.len())
                .field("media_type", media_type)
                .finish(),
            Self::Html(text) => f.debug_struct("Html").field("len", &text.len()).finish(),
            Self::Form(fields) => f.debug_struct("Form").field("fields", &fields.len()).finish(),
            Self::Multipart(multipart) => f.debug_struct("Multipart")
                .field("boundary", &multipart.boundary)
                .field("parts", &multipart.parts.len())
                .finish(),
            Self::Stream(stream) => f.debug_struct("Stream")
                .field("length", &stream.length)
                .finish(),
        }
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Self::Text(value, None)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string(), None)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_media_types() {
        assert_eq!(Content::bytes(vec![1]).media_type(), "application/octet-stream");
        assert_eq!(Content::text("x").media_type(), "text/plain; charset=utf-8");
        assert_eq!(Content::html("<p>x</p>").media_type(), "text/html; charset=utf-8");
        assert_eq!(Content::form(vec![]).media_type(), "application/x-www-form-urlencoded");
    }

    #[test]
    fn lengths_match_payloads() {
        let contents = [
            Content::text("Hello, world!"),
            Content::bytes(vec![0, 1, 2]),
            Content::form(vec![("a".into(), "b c".into()), ("a".into(), "d".into())]),
        ];
        for content in contents {
            let length = content.length().unwrap();
            match content.into_payload() {
                Payload::Buffered(bytes) => assert_eq!(bytes.len() as u64, length),
                Payload::Streamed { .. } => panic!("expected buffered payload"),
            }
        }
    }

    #[test]
    fn stream_without_length_reports_unknown() {
        let content = Content::stream(Box::new(std::io::Cursor::new(vec![1, 2, 3])), None);
        assert_eq!(content.length(), None);
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(generate_boundary(), generate_boundary());
    }
}
