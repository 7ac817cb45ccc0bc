// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The request-line and header reader.
//!
//! Reads are byte-oriented over a buffered stream. Input is lenient about a
//! lone LF terminating a line (output never is), and hard limits on the
//! request-line, individual header lines, the whole header section and the
//! field count are enforced as the bytes arrive, not after.

use tokio::io::{AsyncBufReadExt, AsyncReadExt};

use varco_http::{
    Error,
    HeaderMap,
    HeaderName,
    HeaderValue,
    HttpVersion,
    Method,
    ParseError,
    RequestHead,
    RequestTarget,
    syntax,
};

use varco_handling::{BodyFraming, Settings};

/// A parsed request head plus everything the connection loop needs to know
/// that was captured during the parse.
#[derive(Debug)]
pub struct ParsedHead {
    pub head: RequestHead,
    pub framing: BodyFraming,
    pub expect_continue: bool,
    pub connection_close: bool,
    pub upgrade_websocket: bool,

    /// Bytes consumed by the request-line and header section.
    pub head_bytes: u64,
}

/// Read one request head. `Ok(None)` means the peer closed the connection
/// cleanly before sending anything.
pub async fn read_request_head<R>(stream: &mut R, settings: &Settings) -> Result<Option<ParsedHead>, Error>
        where R: AsyncBufReadExt + Unpin {
    let mut counter = 0u64;

    let Some(method) = read_method(stream, settings, &mut counter).await? else {
        return Ok(None);
    };
    let target = read_request_target(stream, settings, &mut counter).await?;
    let version = read_http_version(stream, &mut counter).await?;

    let mut captured = CapturedHeaders::default();
    let headers = read_headers(stream, settings, &mut counter, &mut captured).await?;

    let framing = if captured.chunked {
        BodyFraming::Chunked
    } else {
        match captured.content_length {
            Some(0) | None => BodyFraming::Empty,
            Some(length) => BodyFraming::ContentLength(length),
        }
    };

    Ok(Some(ParsedHead {
        head: RequestHead {
            method,
            target,
            version,
            headers,
        },
        framing,
        expect_continue: captured.expect_continue,
        connection_close: captured.connection_close,
        upgrade_websocket: captured.upgrade_websocket,
        head_bytes: counter,
    }))
}

/// Headers with wire-level meaning, captured while the header section is
/// parsed rather than re-scanned afterwards.
#[derive(Default)]
struct CapturedHeaders {
    content_length: Option<u64>,
    chunked: bool,
    connection_close: bool,
    expect_continue: bool,
    upgrade_websocket: bool,
}

/// Read the method: bytes up to the first space.
///
/// Returns `None` when the stream ends before the first byte, which is how
/// a keep-alive peer signals it is done with the connection.
async fn read_method<R>(stream: &mut R, settings: &Settings, counter: &mut u64) -> Result<Option<Method>, Error>
        where R: AsyncBufReadExt + Unpin {
    let mut name = String::new();

    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof && name.is_empty() => {
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        *counter += 1;

        if byte == b' ' {
            if name.is_empty() {
                return Err(ParseError::InvalidOctetInMethod.into());
            }
            return Ok(Some(Method::from(name)));
        }

        if !syntax::is_token_character(byte) {
            return Err(ParseError::InvalidOctetInMethod.into());
        }

        name.push(byte as char);
        if name.len() > MAX_METHOD_LENGTH || name.len() > settings.max_request_line_bytes {
            return Err(ParseError::MethodTooLarge.into());
        }
    }
}

const MAX_METHOD_LENGTH: usize = 32;

/// Read the request-target: bytes up to the next space.
async fn read_request_target<R>(stream: &mut R, settings: &Settings, counter: &mut u64) -> Result<RequestTarget, Error>
        where R: AsyncBufReadExt + Unpin {
    let mut target = String::new();

    loop {
        let byte = stream.read_u8().await?;
        *counter += 1;

        if byte == b' ' {
            return RequestTarget::parse(target).ok_or(ParseError::InvalidRequestTarget.into());
        }

        if !syntax::is_request_target_character(byte) {
            return Err(ParseError::InvalidOctetInRequestTarget.into());
        }

        target.push(byte as char);
        if target.len() > settings.max_request_line_bytes {
            return Err(ParseError::RequestLineTooLarge.into());
        }
    }
}

/// Read the HTTP-version token and the line ending.
async fn read_http_version<R>(stream: &mut R, counter: &mut u64) -> Result<HttpVersion, Error>
        where R: AsyncBufReadExt + Unpin {
    let mut token = [0u8; 8];
    stream.read_exact(&mut token).await?;
    *counter += 8;

    let version = match &token {
        b"HTTP/1.0" => HttpVersion::Http10,
        b"HTTP/1.1" => HttpVersion::Http11,
        _ => return Err(ParseError::InvalidHttpVersion.into()),
    };

    consume_line_ending(stream, counter).await?;
    Ok(version)
}

/// Read the header section, capturing the fields the wire layer acts on.
async fn read_headers<R>(
    stream: &mut R,
    settings: &Settings,
    counter: &mut u64,
    captured: &mut CapturedHeaders,
) -> Result<HeaderMap, Error>
        where R: AsyncBufReadExt + Unpin {
    let mut headers = HeaderMap::new();
    let mut section_bytes = 0usize;

    loop {
        let line = read_header_line(stream, settings, counter).await?;
        if line.is_empty() {
            return Ok(headers);
        }

        section_bytes += line.len() + 2;
        if section_bytes > settings.max_header_bytes {
            return Err(ParseError::HeaderSectionTooLarge.into());
        }
        if headers.len() == settings.max_header_count {
            return Err(ParseError::TooManyHeaders.into());
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(ParseError::HeaderDoesNotContainColon.into());
        };
        let name = name.trim();
        let value = value.strip_prefix(' ').unwrap_or(value).trim_end();

        syntax::validate_token(name)?;
        syntax::validate_field_content(value.as_bytes())?;

        let name = HeaderName::from(name);
        capture_special_header(&name, value, settings, captured)?;
        headers.append(name, HeaderValue::String(value.to_string()));
    }
}

fn capture_special_header(
    name: &HeaderName,
    value: &str,
    settings: &Settings,
    captured: &mut CapturedHeaders,
) -> Result<(), ParseError> {
    match name {
        HeaderName::ContentLength => {
            let length: u64 = value.trim().parse().map_err(|_| ParseError::InvalidContentLength)?;
            if let Some(previous) = captured.content_length {
                if previous != length {
                    return Err(ParseError::InvalidContentLength);
                }
            }
            if length > settings.max_content_length {
                return Err(ParseError::ContentTooLarge);
            }
            captured.content_length = Some(length);
        }

        HeaderName::TransferEncoding => {
            if syntax::list_contains_token(value, "chunked") {
                captured.chunked = true;
            }
        }

        HeaderName::Connection => {
            if syntax::list_contains_token(value, "close") {
                captured.connection_close = true;
            }
        }

        HeaderName::Expect => {
            if value.trim().eq_ignore_ascii_case("100-continue") {
                captured.expect_continue = true;
            }
        }

        HeaderName::Upgrade => {
            if syntax::list_contains_token(value, "websocket") {
                captured.upgrade_websocket = true;
            }
        }

        _ => {}
    }

    Ok(())
}

/// Read one header line, lenient about a lone LF terminator.
async fn read_header_line<R>(stream: &mut R, settings: &Settings, counter: &mut u64) -> Result<String, Error>
        where R: AsyncBufReadExt + Unpin {
    let mut line = String::new();

    loop {
        let byte = stream.read_u8().await?;
        *counter += 1;

        match byte {
            b'\n' => return Ok(line),
            b'\r' => {
                let byte = stream.read_u8().await?;
                *counter += 1;
                if byte != b'\n' {
                    return Err(ParseError::InvalidCRLF.into());
                }
                return Ok(line);
            }
            byte => line.push(byte as char),
        }

        if line.len() > settings.max_header_line_bytes {
            return Err(ParseError::HeaderTooLarge.into());
        }
    }
}

async fn consume_line_ending<R>(stream: &mut R, counter: &mut u64) -> Result<(), Error>
        where R: AsyncBufReadExt + Unpin {
    let byte = stream.read_u8().await?;
    *counter += 1;
    if byte == b'\n' {
        return Ok(());
    }
    if byte == b'\r' {
        let byte = stream.read_u8().await?;
        *counter += 1;
        if byte == b'\n' {
            return Ok(());
        }
    }
    Err(ParseError::InvalidCRLF.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn settings() -> Settings {
        Settings::default()
    }

    async fn parse(input: &[u8]) -> Result<Option<ParsedHead>, Error> {
        let mut stream = std::io::Cursor::new(input.to_vec());
        read_request_head(&mut stream, &settings()).await
    }

    fn parse_error(result: Result<Option<ParsedHead>, Error>) -> ParseError {
        match result {
            Err(Error::ParseError(error)) => error,
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn plain_get() {
        let parsed = parse(b"GET /plaintext HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap().unwrap();
        assert_eq!(parsed.head.method, Method::Get);
        assert_eq!(parsed.head.target.path(), "/plaintext");
        assert_eq!(parsed.head.version, HttpVersion::Http11);
        assert_eq!(parsed.head.headers.get_str(&HeaderName::Host), Some("h"));
        assert_eq!(parsed.framing, BodyFraming::Empty);
        assert!(!parsed.connection_close);
        assert_eq!(parsed.head_bytes, b"GET /plaintext HTTP/1.1\r\nHost: h\r\n\r\n".len() as u64);
    }

    #[tokio::test]
    async fn lone_lf_line_endings_are_accepted() {
        let parsed = parse(b"GET / HTTP/1.1\nHost: h\n\n").await.unwrap().unwrap();
        assert_eq!(parsed.head.headers.get_str(&HeaderName::Host), Some("h"));
    }

    #[tokio::test]
    async fn clean_end_of_stream_is_not_an_error() {
        assert!(parse(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_length_framing_is_captured() {
        let parsed = parse(b"POST /u HTTP/1.1\r\nContent-Length: 12\r\n\r\n").await.unwrap().unwrap();
        assert_eq!(parsed.framing, BodyFraming::ContentLength(12));
    }

    #[tokio::test]
    async fn chunked_framing_wins_over_content_length() {
        let parsed = parse(b"POST /u HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parsed.framing, BodyFraming::Chunked);
    }

    #[tokio::test]
    async fn expectation_and_close_are_captured() {
        let parsed = parse(
            b"POST /u HTTP/1.1\r\nExpect: 100-Continue\r\nConnection: close\r\nContent-Length: 1\r\n\r\n",
        )
        .await
        .unwrap()
        .unwrap();
        assert!(parsed.expect_continue);
        assert!(parsed.connection_close);
    }

    #[tokio::test]
    async fn websocket_upgrade_is_captured() {
        let parsed = parse(b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\n\r\n").await.unwrap().unwrap();
        assert!(parsed.upgrade_websocket);
    }

    #[rstest]
    #[case(b"GE T / HTTP/1.1\r\n\r\n".as_slice(), ParseError::InvalidOctetInMethod)]
    #[case(b"GET /x REST/1.1\r\n\r\n".as_slice(), ParseError::InvalidHttpVersion)]
    #[case(b"GET not-a-target HTTP/1.1\r\n\r\n".as_slice(), ParseError::InvalidRequestTarget)]
    #[case(b"GET / HTTP/1.1\r\nNo-Colon-Header\r\n\r\n".as_slice(), ParseError::HeaderDoesNotContainColon)]
    #[case(b"GET / HTTP/1.1\r\nBad\rLine: x\r\n\r\n".as_slice(), ParseError::InvalidCRLF)]
    #[case(b"POST / HTTP/1.1\r\nContent-Length: twelve\r\n\r\n".as_slice(), ParseError::InvalidContentLength)]
    #[case(b"POST / HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n".as_slice(), ParseError::InvalidContentLength)]
    #[tokio::test]
    async fn malformed_requests(#[case] input: &[u8], #[case] expected: ParseError) {
        assert_eq!(parse_error(parse(input).await), expected);
    }

    #[tokio::test]
    async fn oversized_declared_body_is_rejected_at_parse_time() {
        let request = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", u64::MAX / 2);
        assert_eq!(parse_error(parse(request.as_bytes()).await), ParseError::ContentTooLarge);
    }

    #[tokio::test]
    async fn header_count_limit_is_exact() {
        let mut settings = settings();
        settings.max_header_count = 3;

        let mut at_limit = String::from("GET / HTTP/1.1\r\n");
        for index in 0..3 {
            at_limit.push_str(&format!("X-H{index}: v\r\n"));
        }
        at_limit.push_str("\r\n");
        let mut stream = std::io::Cursor::new(at_limit.clone().into_bytes());
        assert!(read_request_head(&mut stream, &settings).await.unwrap().is_some());

        let over_limit = at_limit.replace("\r\n\r\n", "\r\nX-H3: v\r\n\r\n");
        let mut stream = std::io::Cursor::new(over_limit.into_bytes());
        match read_request_head(&mut stream, &settings).await {
            Err(Error::ParseError(ParseError::TooManyHeaders)) => {}
            other => panic!("expected TooManyHeaders, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_header_line_limit() {
        let mut settings = settings();
        settings.max_header_line_bytes = 64;

        let request = format!("GET / HTTP/1.1\r\nX-Long: {}\r\n\r\n", "v".repeat(128));
        let mut stream = std::io::Cursor::new(request.into_bytes());
        match read_request_head(&mut stream, &settings).await {
            Err(Error::ParseError(ParseError::HeaderTooLarge)) => {}
            other => panic!("expected HeaderTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_line_limit() {
        let mut settings = settings();
        settings.max_request_line_bytes = 32;

        let request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(64));
        let mut stream = std::io::Cursor::new(request.into_bytes());
        match read_request_head(&mut stream, &settings).await {
            Err(Error::ParseError(ParseError::RequestLineTooLarge)) => {}
            other => panic!("expected RequestLineTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn header_values_keep_internal_spacing() {
        let parsed = parse(b"GET / HTTP/1.1\r\nUser-Agent: a  b\r\n\r\n").await.unwrap().unwrap();
        assert_eq!(parsed.head.headers.get_str(&HeaderName::from("User-Agent")), Some("a  b"));
    }
}
