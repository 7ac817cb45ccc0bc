// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! A streaming `multipart/form-data` parser.
//!
//! The parser walks a fully framed body, yielding one [`Part`] at a time:
//! bytes up to the first boundary are preamble and discarded, then each part
//! consists of its own header section and a raw content window that ends
//! right before the CRLF preceding the next boundary delimiter.
//!
//! # References
//! * [RFC 7578](https://www.rfc-editor.org/rfc/rfc7578.html)

use strum_macros::AsRefStr;

use crate::{
    HeaderMap,
    HeaderName,
    HeaderValue,
    syntax,
};

/// A single part of a `multipart/form-data` payload.
#[derive(Debug)]
pub struct Part {
    /// The `name` parameter of the `Content-Disposition` header.
    pub name: String,

    /// The `filename` (or decoded `filename*`) parameter, for file parts.
    pub filename: Option<String>,

    /// All headers of the part, preserved verbatim.
    pub headers: HeaderMap,

    /// The raw content window. Boundary bytes never occur inside it.
    pub data: Vec<u8>,
}

impl Part {
    /// A convenience constructor for a text field part.
    #[must_use]
    pub fn field(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            headers: HeaderMap::new(),
            data: value.into().into_bytes(),
        }
    }

    /// A convenience constructor for a file part.
    #[must_use]
    pub fn file(name: impl Into<String>, filename: impl Into<String>, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.append(HeaderName::ContentType, HeaderValue::String(content_type.into()));
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            headers,
            data,
        }
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get_str(&HeaderName::ContentType)
    }

    /// The content interpreted as UTF-8, for text fields.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

impl PartialEq for Part {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.filename == other.filename && self.data == other.data
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, AsRefStr)]
pub enum MultipartError {
    /// The `Content-Type` header carried no `boundary` parameter.
    MissingBoundary,

    /// The body ended before the first boundary delimiter.
    MissingOpeningBoundary,

    /// A part header line was not a valid `name: value` field.
    MalformedPartHeader,

    /// The `Content-Disposition` header of a part carried no `name`.
    MissingPartName,

    /// The body ended before the closing `--boundary--` sentinel.
    UnterminatedStream,
}

impl std::fmt::Display for MultipartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::error::Error for MultipartError {}

/// Extract the `boundary` parameter from a `multipart/form-data` media type.
#[must_use]
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let (media_type, parameters) = content_type.split_once(';')?;
    if !media_type.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }

    for parameter in parameters.split(';') {
        let Some((name, value)) = parameter.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("boundary") {
            let value = value.trim();
            let value = value.strip_prefix('"')
                .and_then(|value| value.strip_suffix('"'))
                .unwrap_or(value);
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }

    None
}

/// A pull-based parser over a framed multipart body.
pub struct MultipartReader<'body> {
    body: &'body [u8],
    delimiter: Vec<u8>,
    position: usize,
    finished: bool,
}

impl<'body> MultipartReader<'body> {
    pub fn new(body: &'body [u8], boundary: &str) -> Result<Self, MultipartError> {
        let delimiter = format!("--{boundary}").into_bytes();

        // Preamble before the first delimiter is discarded.
        let Some(start) = find_subslice(body, &delimiter) else {
            return Err(MultipartError::MissingOpeningBoundary);
        };

        let mut reader = Self {
            body,
            position: start,
            delimiter,
            finished: false,
        };
        reader.consume_delimiter()?;
        Ok(reader)
    }

    /// Yield the next part, or `None` after the closing sentinel.
    pub fn next_part(&mut self) -> Result<Option<Part>, MultipartError> {
        if self.finished {
            return Ok(None);
        }

        let headers = self.read_part_headers()?;

        // Content runs up to the CRLF that precedes the next delimiter; that
        // CRLF belongs to the delimiter, not the content.
        let mut closing = Vec::with_capacity(self.delimiter.len() + 2);
        closing.extend_from_slice(b"\r\n");
        closing.extend_from_slice(&self.delimiter);
        let Some(relative) = find_subslice(&self.body[self.position..], &closing) else {
            return Err(MultipartError::UnterminatedStream);
        };

        let data = self.body[self.position..self.position + relative].to_vec();
        self.position += relative + 2;
        self.consume_delimiter()?;

        let disposition = headers.get_str(&HeaderName::ContentDisposition)
            .map(parse_content_disposition)
            .unwrap_or_default();
        let Some(name) = disposition.name else {
            return Err(MultipartError::MissingPartName);
        };

        Ok(Some(Part {
            name,
            filename: disposition.filename,
            headers,
            data,
        }))
    }

    /// Collect all remaining parts, preserving their order.
    pub fn collect_parts(mut self) -> Result<Vec<Part>, MultipartError> {
        let mut parts = Vec::new();
        while let Some(part) = self.next_part()? {
            parts.push(part);
        }
        Ok(parts)
    }

    /// The cursor sits at the start of a delimiter. Consume it together with
    /// its line ending, detecting the `--` closing sentinel.
    fn consume_delimiter(&mut self) -> Result<(), MultipartError> {
        self.position += self.delimiter.len();

        if self.body[self.position..].starts_with(b"--") {
            self.finished = true;
            return Ok(());
        }

        if self.body[self.position..].starts_with(b"\r\n") {
            self.position += 2;
            return Ok(());
        }

        Err(MultipartError::UnterminatedStream)
    }

    fn read_part_headers(&mut self) -> Result<HeaderMap, MultipartError> {
        let mut headers = HeaderMap::new();

        loop {
            let rest = &self.body[self.position..];
            let Some(line_end) = find_subslice(rest, b"\r\n") else {
                return Err(MultipartError::UnterminatedStream);
            };
            let line = &rest[..line_end];
            self.position += line_end + 2;

            if line.is_empty() {
                return Ok(headers);
            }

            let Ok(line) = std::str::from_utf8(line) else {
                return Err(MultipartError::MalformedPartHeader);
            };
            let Some((name, value)) = line.split_once(':') else {
                return Err(MultipartError::MalformedPartHeader);
            };
            let name = name.trim();
            if syntax::validate_token(name).is_err() {
                return Err(MultipartError::MalformedPartHeader);
            }

            headers.append(HeaderName::from(name), HeaderValue::String(value.trim().to_string()));
        }
    }
}

#[derive(Default)]
struct ContentDisposition {
    name: Option<String>,
    filename: Option<String>,
}

/// Pull `name` and `filename` out of a `Content-Disposition` header. A
/// `filename*=UTF-8''…` parameter wins over a plain `filename="…"` one.
fn parse_content_disposition(value: &str) -> ContentDisposition {
    let mut disposition = ContentDisposition::default();
    let mut extended_filename = None;

    for parameter in value.split(';').skip(1) {
        let Some((name, value)) = parameter.split_once('=') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        let unquoted = value.strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .unwrap_or(value);

        if name.eq_ignore_ascii_case("name") {
            disposition.name = Some(unquoted.to_string());
        } else if name.eq_ignore_ascii_case("filename") {
            disposition.filename = Some(unquoted.to_string());
        } else if name.eq_ignore_ascii_case("filename*") {
            if let Some(encoded) = value.strip_prefix("UTF-8''") {
                if let Ok(decoded) = urlencoding::decode(encoded) {
                    extended_filename = Some(decoded.into_owned());
                }
            }
        }
    }

    if extended_filename.is_some() {
        disposition.filename = extended_filename;
    }
    disposition
}

/// Serialize parts into a framed multipart body with the given boundary.
#[must_use]
pub fn serialize_parts(boundary: &str, parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();

    for part in parts {
        body.extend_from_slice(b"--");
        body.extend_from_slice(boundary.as_bytes());
        body.extend_from_slice(b"\r\n");

        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(filename) = &part.filename {
            if filename.is_ascii() {
                disposition.push_str(&format!("; filename=\"{filename}\""));
            } else {
                disposition.push_str(&format!("; filename*=UTF-8''{}", urlencoding::encode(filename)));
            }
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");

        for (name, value) in part.headers.iter() {
            if *name == HeaderName::ContentDisposition {
                continue;
            }
            body.extend_from_slice(name.as_str().as_bytes());
            body.extend_from_slice(b": ");
            body.extend_from_slice(value.to_string().as_bytes());
            body.extend_from_slice(b"\r\n");
        }

        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(b"--");
    body.extend_from_slice(boundary.as_bytes());
    body.extend_from_slice(b"--\r\n");
    body
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const SIMPLE: &[u8] = b"--XX\r\n\
        Content-Disposition: form-data; name=\"f\"\r\n\
        \r\n\
        v\r\n\
        --XX\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
        Content-Type: text/plain\r\n\
        \r\n\
        abc\r\n\
        --XX--\r\n";

    #[test]
    fn parses_fields_and_files() {
        let parts = MultipartReader::new(SIMPLE, "XX").unwrap().collect_parts().unwrap();
        assert_eq!(parts.len(), 2);

        assert_eq!(parts[0].name, "f");
        assert_eq!(parts[0].filename, None);
        assert_eq!(parts[0].text(), Some("v"));

        assert_eq!(parts[1].name, "file");
        assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(parts[1].content_type(), Some("text/plain"));
        assert_eq!(parts[1].data, b"abc");
    }

    #[test]
    fn preamble_is_discarded() {
        let mut body = b"this is ignored preamble\r\n".to_vec();
        body.extend_from_slice(SIMPLE);
        let parts = MultipartReader::new(&body, "XX").unwrap().collect_parts().unwrap();
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn content_may_contain_crlf() {
        let body = b"--B\r\n\
            Content-Disposition: form-data; name=\"blob\"\r\n\
            \r\n\
            line one\r\nline two\r\n\
            --B--\r\n";
        let parts = MultipartReader::new(body, "B").unwrap().collect_parts().unwrap();
        assert_eq!(parts[0].data, b"line one\r\nline two");
    }

    #[test]
    fn extended_filename_wins() {
        let body = "--B\r\n\
            Content-Disposition: form-data; name=\"f\"; filename=\"fallback.txt\"; filename*=UTF-8''na%C3%AFve.txt\r\n\
            \r\n\
            x\r\n\
            --B--\r\n".as_bytes();
        let parts = MultipartReader::new(body, "B").unwrap().collect_parts().unwrap();
        assert_eq!(parts[0].filename.as_deref(), Some("naïve.txt"));
    }

    #[rstest]
    #[case(b"no boundary in sight", MultipartError::MissingOpeningBoundary)]
    #[case(b"--XX\r\nContent-Disposition: form-data; name=\"f\"\r\n\r\nv", MultipartError::UnterminatedStream)]
    #[case(b"--XX\r\nnot-a-header\r\n\r\nv\r\n--XX--\r\n", MultipartError::MalformedPartHeader)]
    #[case(b"--XX\r\nContent-Disposition: form-data\r\n\r\nv\r\n--XX--\r\n", MultipartError::MissingPartName)]
    fn hard_failures(#[case] body: &[u8], #[case] expected: MultipartError) {
        let result = MultipartReader::new(body, "XX")
            .and_then(|reader| reader.collect_parts());
        assert_eq!(result.unwrap_err(), expected);
    }

    #[test]
    fn round_trip_preserves_parts() {
        let parts = vec![
            Part::field("f", "v"),
            Part::file("file", "a.txt", "text/plain", b"abc".to_vec()),
            Part::field("multi\nline", "x\r\ny"),
        ];
        let body = serialize_parts("round-trip-boundary", &parts);
        let reparsed = MultipartReader::new(&body, "round-trip-boundary")
            .unwrap()
            .collect_parts()
            .unwrap();
        assert_eq!(reparsed, parts);
    }
}
