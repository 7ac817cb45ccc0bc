// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The per-request context handed to request-handlers and actions.
//!
//! A context is created once the request head has been framed and lives
//! until the response has been serialized (or the connection faulted). It
//! borrows the connection's stream for its whole lifetime: body reads,
//! interim `100 Continue` writes and hijacked streaming (SSE, WebSocket)
//! all go through that one borrow.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;

use hashbrown::HashMap;

use std::any::{Any, TypeId};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use varco_http::{
    boundary_from_content_type,
    CookieJar,
    HeaderMap,
    HeaderName,
    HeaderValue,
    Method,
    MultipartError,
    MultipartReader,
    ParseError,
    Part,
    RequestHead,
    RequestTarget,
    syntax,
    urlencoded,
    HttpVersion,
};

use varco_web_sockets::{accept_key, WebSocket};

use crate::sse::EventSource;
use crate::stream::ExchangeStream;

/// How the request body is framed on the wire, decided during head parsing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    ContentLength(u64),
    Chunked,
}

#[derive(Copy, Clone, Debug)]
enum ChunkPhase {
    /// Expecting a chunk-size line.
    Size,
    /// Inside a chunk's data, `remaining` bytes plus the trailing CRLF to go.
    Data { remaining: u64 },
}

#[derive(Copy, Clone, Debug)]
enum BodyProgress {
    Untouched,
    Sized { remaining: u64 },
    Chunked(ChunkPhase),
    /// Fully read, including any chunked trailers.
    Finished,
    /// A helper consumed the body; any further access is a programming
    /// error.
    Consumed,
}

#[derive(Debug)]
pub enum BodyError {
    /// The body was already consumed by an earlier read.
    AlreadyConsumed,

    /// The body exceeded the imposed length cap.
    TooLarge,

    /// The request's media type doesn't match what the helper expects.
    WrongMediaType(&'static str),

    Parse(ParseError),
    Multipart(MultipartError),
    Json(serde_json::Error),
    Io(io::Error),
}

impl From<ParseError> for BodyError {
    fn from(value: ParseError) -> Self {
        Self::Parse(value)
    }
}

impl From<MultipartError> for BodyError {
    fn from(value: MultipartError) -> Self {
        Self::Multipart(value)
    }
}

impl From<serde_json::Error> for BodyError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<io::Error> for BodyError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::fmt::Display for BodyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyConsumed => f.write_str("the request body was already consumed"),
            Self::TooLarge => f.write_str("the request body exceeds the configured maximum"),
            Self::WrongMediaType(expected) => write!(f, "expected a {expected} request body"),
            Self::Parse(error) => write!(f, "malformed request body: {}", error.as_ref()),
            Self::Multipart(error) => write!(f, "malformed multipart body: {error}"),
            Self::Json(error) => write!(f, "malformed JSON body: {error}"),
            Self::Io(error) => write!(f, "i/o error while reading the body: {error}"),
        }
    }
}

impl std::error::Error for BodyError {}

/// A cancellation signal fused from server shutdown and the per-request
/// timeout.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    shutdown: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelSignal {
    #[must_use]
    pub fn new(shutdown: watch::Receiver<bool>, deadline: Option<Instant>) -> Self {
        Self {
            shutdown: Some(shutdown),
            deadline,
        }
    }

    /// A signal that never fires, for tests and detached tooling.
    #[must_use]
    pub fn inert() -> Self {
        Self {
            shutdown: None,
            deadline: None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if let Some(shutdown) = &self.shutdown {
            if *shutdown.borrow() {
                return true;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        false
    }

    /// Wait until the signal fires. Long-running handlers are expected to
    /// select on this next to their own work.
    pub async fn cancelled(&mut self) {
        let deadline = self.deadline;
        match (&mut self.shutdown, deadline) {
            (Some(shutdown), Some(deadline)) => {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            (Some(shutdown), None) => {
                _ = shutdown.wait_for(|stop| *stop).await;
            }
            (None, Some(deadline)) => tokio::time::sleep_until(deadline).await,
            (None, None) => std::future::pending().await,
        }
    }
}

/// A type-keyed bag middleware can use to pass values down the pipeline.
/// The engine itself never reads it.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|previous| previous.downcast().ok())
            .map(|previous| *previous)
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|value| value.downcast_ref())
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.map.get_mut(&TypeId::of::<T>()).and_then(|value| value.downcast_mut())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast().ok())
            .map(|value| *value)
    }
}

/// What a hijacking endpoint took the connection over for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Hijack {
    EventSource,
    WebSocket,
}

#[derive(Debug)]
pub enum UpgradeError {
    /// The request is not a `websocket` upgrade.
    NotAnUpgrade,

    /// The upgrade request carries no `Sec-WebSocket-Key`.
    MissingKey,

    Io(io::Error),
}

impl From<io::Error> for UpgradeError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::fmt::Display for UpgradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnUpgrade => f.write_str("the request is not a websocket upgrade"),
            Self::MissingKey => f.write_str("the upgrade request carries no Sec-WebSocket-Key"),
            Self::Io(error) => write!(f, "i/o error during the upgrade: {error}"),
        }
    }
}

impl std::error::Error for UpgradeError {}

/// Everything the wire layer knows about an exchange before user code runs.
pub struct ExchangeParts {
    pub head: RequestHead,
    pub framing: BodyFraming,
    pub expect_continue: bool,
    pub remote_addr: SocketAddr,
    pub scheme: String,
    pub cancel: CancelSignal,
    pub max_content_length: u64,
}

static TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An opaque per-request identifier: 32 hex characters mixing the request
/// timestamp with a process-wide counter.
#[must_use]
pub fn next_trace_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos() as u64)
        .unwrap_or(0);
    let counter = TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{nanos:016x}{:016x}", counter.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

pub struct RequestContext<'conn> {
    head: RequestHead,
    remote_addr: SocketAddr,
    scheme: String,
    started_at: SystemTime,
    started_instant: Instant,
    trace_id: String,

    authority_override: Option<String>,
    params: Vec<(String, String)>,
    query_cache: Option<Vec<(String, String)>>,
    cookie_cache: Option<CookieJar>,
    extensions: Extensions,
    cancel: CancelSignal,

    stream: &'conn mut ExchangeStream,
    framing: BodyFraming,
    progress: BodyProgress,
    body_bytes_read: u64,
    body_complete: bool,
    expect_continue: bool,
    continue_sent: bool,
    max_content_length: u64,

    hijack: Option<Hijack>,
}

impl<'conn> RequestContext<'conn> {
    #[must_use]
    pub fn new(parts: ExchangeParts, stream: &'conn mut ExchangeStream) -> Self {
        let body_complete = parts.framing == BodyFraming::Empty;
        Self {
            head: parts.head,
            remote_addr: parts.remote_addr,
            scheme: parts.scheme,
            started_at: SystemTime::now(),
            started_instant: Instant::now(),
            trace_id: next_trace_id(),
            authority_override: None,
            params: Vec::new(),
            query_cache: None,
            cookie_cache: None,
            extensions: Extensions::default(),
            cancel: parts.cancel,
            stream,
            framing: parts.framing,
            progress: BodyProgress::Untouched,
            body_bytes_read: 0,
            body_complete,
            expect_continue: parts.expect_continue,
            continue_sent: false,
            max_content_length: parts.max_content_length,
            hijack: None,
        }
    }

    //
    // Request metadata
    //

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    #[must_use]
    pub fn target(&self) -> &RequestTarget {
        &self.head.target
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.head.target.path()
    }

    #[must_use]
    pub fn version(&self) -> HttpVersion {
        self.head.version
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn set_remote_ip(&mut self, ip: std::net::IpAddr) {
        self.remote_addr = SocketAddr::new(ip, self.remote_addr.port());
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: String) {
        self.scheme = scheme;
    }

    /// The request authority: a forwarded-host override when a resolver
    /// set one, else the `Host` header.
    #[must_use]
    pub fn authority(&self) -> Option<&str> {
        if let Some(authority) = &self.authority_override {
            return Some(authority);
        }
        self.head.headers.get_str(&HeaderName::Host)
    }

    pub fn set_authority_override(&mut self, authority: String) {
        self.authority_override = Some(authority);
    }

    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Milliseconds since the context was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.started_instant.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    //
    // Routing data
    //

    pub(crate) fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params;
    }

    /// The value a route placeholder was bound to.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(param_name, _)| param_name == name)
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    //
    // Query, cookies, extensions
    //

    /// The decoded query parameters, parsed on first access. Duplicates are
    /// preserved in order of appearance.
    pub fn query(&mut self) -> &[(String, String)] {
        if self.query_cache.is_none() {
            self.query_cache = Some(urlencoded::parse_pairs(self.head.target.query()));
        }
        self.query_cache.as_deref().unwrap_or(&[])
    }

    /// The first query value under `name`.
    pub fn query_get(&mut self, name: &str) -> Option<&str> {
        self.query()
            .iter()
            .find(|(query_name, _)| query_name == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every query value under `name`, in order of appearance.
    pub fn query_get_all(&mut self, name: &str) -> Vec<&str> {
        self.query()
            .iter()
            .filter(|(query_name, _)| query_name == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    /// The request cookies, parsed on first access.
    pub fn cookies(&mut self) -> &CookieJar {
        if self.cookie_cache.is_none() {
            let jar = self.head.headers.get_str(&HeaderName::Cookie)
                .map(CookieJar::parse)
                .unwrap_or_default();
            self.cookie_cache = Some(jar);
        }
        self.cookie_cache.as_ref().unwrap()
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    //
    // Cancellation
    //

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A clone of the fused cancellation signal, to select on.
    #[must_use]
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    //
    // Body access
    //

    #[must_use]
    pub fn body_framing(&self) -> BodyFraming {
        self.framing
    }

    /// Read the next slice of the raw request body. Returns `Ok(0)` at the
    /// end of the body. The first read triggers the deferred
    /// `100 Continue` interim response when the client asked for one.
    pub async fn read_body_chunk(&mut self, buf: &mut [u8]) -> Result<usize, BodyError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.begin_streaming()?;
        self.ensure_continue_sent().await?;

        loop {
            match self.progress {
                BodyProgress::Finished => return Ok(0),

                BodyProgress::Sized { remaining } => {
                    if remaining == 0 {
                        self.finish_body();
                        return Ok(0);
                    }
                    let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                    let read = self.stream.read(&mut buf[..want]).await?;
                    if read == 0 {
                        return Err(ParseError::UnexpectedEndOfBody.into());
                    }
                    self.body_bytes_read += read as u64;
                    let remaining = remaining - read as u64;
                    if remaining == 0 {
                        self.finish_body();
                    } else {
                        self.progress = BodyProgress::Sized { remaining };
                    }
                    return Ok(read);
                }

                BodyProgress::Chunked(ChunkPhase::Size) => {
                    let line = read_wire_line(self.stream, MAX_CHUNK_SIZE_LINE).await
                        .map_err(|error| match error {
                            BodyError::Io(error) => BodyError::Io(error),
                            _ => ParseError::InvalidChunkSize.into(),
                        })?;
                    let size_token = line.split(';').next().unwrap_or("").trim();
                    let size = u64::from_str_radix(size_token, 16)
                        .map_err(|_| BodyError::from(ParseError::InvalidChunkSize))?;

                    if size == 0 {
                        self.read_trailers().await?;
                        self.finish_body();
                        return Ok(0);
                    }
                    if self.body_bytes_read + size > self.max_content_length {
                        return Err(ParseError::ContentTooLarge.into());
                    }
                    self.progress = BodyProgress::Chunked(ChunkPhase::Data { remaining: size });
                }

                BodyProgress::Chunked(ChunkPhase::Data { remaining }) => {
                    let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
                    let read = self.stream.read(&mut buf[..want]).await?;
                    if read == 0 {
                        return Err(ParseError::UnexpectedEndOfBody.into());
                    }
                    self.body_bytes_read += read as u64;
                    let remaining = remaining - read as u64;
                    if remaining == 0 {
                        consume_line_ending(self.stream).await?;
                        self.progress = BodyProgress::Chunked(ChunkPhase::Size);
                    } else {
                        self.progress = BodyProgress::Chunked(ChunkPhase::Data { remaining });
                    }
                    return Ok(read);
                }

                BodyProgress::Untouched | BodyProgress::Consumed => unreachable!("begin_streaming resolved these"),
            }
        }
    }

    /// Read the whole body, capped at `max_length` bytes. Marks the body as
    /// consumed.
    pub async fn read_body_bytes(&mut self, max_length: u64) -> Result<Vec<u8>, BodyError> {
        if !matches!(self.progress, BodyProgress::Untouched) {
            return Err(BodyError::AlreadyConsumed);
        }

        let mut data = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let read = self.read_body_chunk(&mut buf).await?;
            if read == 0 {
                break;
            }
            if data.len() as u64 + read as u64 > max_length {
                self.progress = BodyProgress::Consumed;
                return Err(BodyError::TooLarge);
            }
            data.extend_from_slice(&buf[..read]);
        }

        self.progress = BodyProgress::Consumed;
        Ok(data)
    }

    /// Read the body as text. The `charset` parameter of the request's
    /// `Content-Type` is honored when it names UTF-8 (or a subset of it);
    /// anything else falls back to a lossy UTF-8 decode.
    pub async fn read_body_text(&mut self) -> Result<String, BodyError> {
        let data = self.read_body_bytes(self.max_content_length).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Read and decode an `application/x-www-form-urlencoded` body.
    pub async fn read_body_form(&mut self) -> Result<Vec<(String, String)>, BodyError> {
        let content_type = self.head.headers.get_str(&HeaderName::ContentType).unwrap_or("");
        if !content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        {
            return Err(BodyError::WrongMediaType("application/x-www-form-urlencoded"));
        }

        let data = self.read_body_bytes(self.max_content_length).await?;
        Ok(urlencoded::parse_pairs(&String::from_utf8_lossy(&data)))
    }

    /// Read and parse a `multipart/form-data` body into its parts.
    pub async fn read_body_multipart(&mut self) -> Result<Vec<Part>, BodyError> {
        let content_type = self.head.headers.get_str(&HeaderName::ContentType).unwrap_or("").to_string();
        let Some(boundary) = boundary_from_content_type(&content_type) else {
            return Err(BodyError::WrongMediaType("multipart/form-data with a boundary"));
        };

        let data = self.read_body_bytes(self.max_content_length).await?;
        let parts = MultipartReader::new(&data, &boundary)?.collect_parts()?;
        Ok(parts)
    }

    /// Read and decode a JSON body.
    pub async fn read_body_json(&mut self) -> Result<serde_json::Value, BodyError> {
        let data = self.read_body_bytes(self.max_content_length).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    //
    // Streaming endpoints
    //

    /// Take the connection over for Server-Sent Events. Writes the response
    /// head immediately; the returned channel then owns the stream for the
    /// rest of the exchange, and keep-alive is off.
    pub async fn event_source(&mut self) -> Result<EventSource<'_>, io::Error> {
        self.hijack = Some(Hijack::EventSource);
        EventSource::start(&mut *self.stream).await
    }

    /// Accept a WebSocket upgrade: validates the handshake, writes the
    /// `101 Switching Protocols` response and hands back the framed socket.
    pub async fn accept_web_socket(&mut self) -> Result<WebSocket<&mut ExchangeStream>, UpgradeError> {
        let upgrade = self.head.headers.get_str(&HeaderName::Upgrade).unwrap_or("");
        if !syntax::list_contains_token(upgrade, "websocket") {
            return Err(UpgradeError::NotAnUpgrade);
        }
        let Some(key) = self.head.headers.get_str(&HeaderName::SecWebSocketKey) else {
            return Err(UpgradeError::MissingKey);
        };

        let accept = accept_key(key);
        let head = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n",
        );
        self.stream.write_all(head.as_bytes()).await?;
        self.stream.flush().await?;

        self.hijack = Some(Hijack::WebSocket);
        Ok(WebSocket::after_upgrade(&mut *self.stream))
    }

    //
    // Wire-layer bookkeeping
    //

    #[must_use]
    pub fn hijacked(&self) -> Option<Hijack> {
        self.hijack
    }

    #[must_use]
    pub fn expects_continue(&self) -> bool {
        self.expect_continue
    }

    #[must_use]
    pub fn continue_sent(&self) -> bool {
        self.continue_sent
    }

    /// Whether the body was read through to its end.
    #[must_use]
    pub fn body_complete(&self) -> bool {
        self.body_complete
    }

    #[must_use]
    pub fn body_bytes_read(&self) -> u64 {
        self.body_bytes_read
    }

    /// Read and discard the remainder of the body so the connection can be
    /// reused. Gives up (returning `false`) after `max_bytes`.
    pub async fn drain_body(&mut self, max_bytes: u64) -> Result<bool, BodyError> {
        if matches!(self.progress, BodyProgress::Consumed) || self.body_complete {
            return Ok(true);
        }

        let mut drained = 0u64;
        let mut buf = [0u8; 8192];
        while drained <= max_bytes {
            let read = self.read_body_chunk(&mut buf).await?;
            if read == 0 {
                return Ok(true);
            }
            drained += read as u64;
        }
        Ok(false)
    }

    fn begin_streaming(&mut self) -> Result<(), BodyError> {
        match self.progress {
            BodyProgress::Untouched => {
                self.progress = match self.framing {
                    BodyFraming::Empty => BodyProgress::Finished,
                    BodyFraming::ContentLength(length) => BodyProgress::Sized { remaining: length },
                    BodyFraming::Chunked => BodyProgress::Chunked(ChunkPhase::Size),
                };
                Ok(())
            }
            BodyProgress::Consumed => Err(BodyError::AlreadyConsumed),
            _ => Ok(()),
        }
    }

    fn finish_body(&mut self) {
        self.progress = BodyProgress::Finished;
        self.body_complete = true;
    }

    async fn ensure_continue_sent(&mut self) -> Result<(), io::Error> {
        if self.expect_continue && !self.continue_sent {
            self.continue_sent = true;
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await?;
            self.stream.flush().await?;
        }
        Ok(())
    }

    /// Trailing header fields after the terminal chunk are appended to the
    /// request's header map, observable through the normal header API.
    async fn read_trailers(&mut self) -> Result<(), BodyError> {
        loop {
            let line = read_wire_line(self.stream, MAX_TRAILER_LINE).await?;
            if line.is_empty() {
                return Ok(());
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(ParseError::HeaderDoesNotContainColon.into());
            };
            let name = name.trim();
            syntax::validate_token(name).map_err(BodyError::Parse)?;
            self.head.headers.append(
                HeaderName::from(name),
                HeaderValue::String(value.trim().to_string()),
            );
        }
    }
}

const MAX_CHUNK_SIZE_LINE: usize = 128;
const MAX_TRAILER_LINE: usize = 8 * 1024;

/// Read a line terminated by CRLF (or, leniently, a lone LF).
async fn read_wire_line(stream: &mut ExchangeStream, max_length: usize) -> Result<String, BodyError> {
    let mut line = String::new();
    loop {
        let byte = stream.read_u8().await?;
        match byte {
            b'\n' => return Ok(line),
            b'\r' => {
                let byte = stream.read_u8().await?;
                if byte != b'\n' {
                    return Err(ParseError::InvalidCRLF.into());
                }
                return Ok(line);
            }
            byte => line.push(byte as char),
        }

        if line.len() > max_length {
            return Err(ParseError::HeaderTooLarge.into());
        }
    }
}

/// Consume the CRLF that terminates a chunk's data.
async fn consume_line_ending(stream: &mut ExchangeStream) -> Result<(), BodyError> {
    let byte = stream.read_u8().await?;
    if byte == b'\n' {
        return Ok(());
    }
    if byte == b'\r' && stream.read_u8().await? == b'\n' {
        return Ok(());
    }
    Err(ParseError::InvalidCRLF.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::exchange_stream;
    use tokio::io::DuplexStream;

    fn parts(framing: BodyFraming, headers: HeaderMap) -> ExchangeParts {
        ExchangeParts {
            head: RequestHead {
                method: Method::Post,
                target: RequestTarget::parse("/upload?tag=a&tag=b&mode=fast%20path".to_string()).unwrap(),
                version: HttpVersion::Http11,
                headers,
            },
            framing,
            expect_continue: false,
            remote_addr: "127.0.0.1:4000".parse().unwrap(),
            scheme: "http".to_string(),
            cancel: CancelSignal::inert(),
            max_content_length: 1024,
        }
    }

    fn pipe() -> (DuplexStream, ExchangeStream) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        (client, exchange_stream(server))
    }

    #[tokio::test]
    async fn sized_body_reads_once() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut stream) = pipe();
        client.write_all(b"hello body").await.unwrap();

        let mut context = RequestContext::new(parts(BodyFraming::ContentLength(10), HeaderMap::new()), &mut stream);
        let data = context.read_body_bytes(1024).await.unwrap();
        assert_eq!(data, b"hello body");
        assert!(context.body_complete());

        let error = context.read_body_bytes(1024).await.unwrap_err();
        assert!(matches!(error, BodyError::AlreadyConsumed));
    }

    #[tokio::test]
    async fn chunked_body_reassembles_and_keeps_trailers() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut stream) = pipe();
        client
            .write_all(b"4\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Checksum: abc123\r\n\r\n")
            .await
            .unwrap();

        let mut context = RequestContext::new(parts(BodyFraming::Chunked, HeaderMap::new()), &mut stream);
        let data = context.read_body_bytes(1024).await.unwrap();
        assert_eq!(data, b"Wikipedia");
        assert!(context.body_complete());
        assert_eq!(context.headers().get_str(&HeaderName::from("X-Checksum")), Some("abc123"));
    }

    #[tokio::test]
    async fn body_cap_is_enforced() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut stream) = pipe();
        client.write_all(&[b'x'; 64]).await.unwrap();

        let mut context = RequestContext::new(parts(BodyFraming::ContentLength(64), HeaderMap::new()), &mut stream);
        let error = context.read_body_bytes(16).await.unwrap_err();
        assert!(matches!(error, BodyError::TooLarge));
    }

    #[tokio::test]
    async fn form_helper_validates_the_media_type() {
        use tokio::io::AsyncWriteExt;

        let body = b"a=1&b=two%20words&a=3";

        let mut headers = HeaderMap::new();
        headers.append(HeaderName::ContentType, "application/x-www-form-urlencoded".into());
        let (mut client, mut stream) = pipe();
        client.write_all(body).await.unwrap();

        let mut context = RequestContext::new(
            parts(BodyFraming::ContentLength(body.len() as u64), headers),
            &mut stream,
        );
        let form = context.read_body_form().await.unwrap();
        assert_eq!(form, vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "two words".to_string()),
            ("a".to_string(), "3".to_string()),
        ]);

        let (mut client, mut stream) = pipe();
        client.write_all(body).await.unwrap();
        let mut context = RequestContext::new(
            parts(BodyFraming::ContentLength(body.len() as u64), HeaderMap::new()),
            &mut stream,
        );
        assert!(matches!(
            context.read_body_form().await.unwrap_err(),
            BodyError::WrongMediaType(_),
        ));
    }

    #[tokio::test]
    async fn multipart_helper_requires_a_boundary() {
        let mut headers = HeaderMap::new();
        headers.append(HeaderName::ContentType, "multipart/form-data".into());

        let (_client, mut stream) = pipe();
        let mut context = RequestContext::new(parts(BodyFraming::Empty, headers), &mut stream);
        assert!(matches!(
            context.read_body_multipart().await.unwrap_err(),
            BodyError::WrongMediaType(_),
        ));
    }

    #[tokio::test]
    async fn json_helper_decodes() {
        use tokio::io::AsyncWriteExt;

        let body = br#"{"answer": 42}"#;
        let (mut client, mut stream) = pipe();
        client.write_all(body).await.unwrap();

        let mut context = RequestContext::new(
            parts(BodyFraming::ContentLength(body.len() as u64), HeaderMap::new()),
            &mut stream,
        );
        let value = context.read_body_json().await.unwrap();
        assert_eq!(value["answer"], 42);
    }

    #[tokio::test]
    async fn hundred_continue_is_written_lazily_and_once() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut client, mut stream) = pipe();
        client.write_all(b"hi").await.unwrap();

        let mut exchange_parts = parts(BodyFraming::ContentLength(2), HeaderMap::new());
        exchange_parts.expect_continue = true;
        let mut context = RequestContext::new(exchange_parts, &mut stream);
        assert!(!context.continue_sent());

        let data = context.read_body_bytes(1024).await.unwrap();
        assert_eq!(data, b"hi");
        assert!(context.continue_sent());

        let mut interim = [0u8; 25];
        client.read_exact(&mut interim).await.unwrap();
        assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");
    }

    #[tokio::test]
    async fn query_parsing_is_lazy_and_preserves_duplicates() {
        let (_client, mut stream) = pipe();
        let mut context = RequestContext::new(parts(BodyFraming::Empty, HeaderMap::new()), &mut stream);

        assert_eq!(context.query_get("mode"), Some("fast path"));
        assert_eq!(context.query_get("tag"), Some("a"));
        assert_eq!(context.query_get_all("tag"), vec!["a", "b"]);
        assert_eq!(context.query_get("missing"), None);
    }

    #[tokio::test]
    async fn cookies_parse_from_the_header() {
        let mut headers = HeaderMap::new();
        headers.append(HeaderName::Cookie, "session=abc; theme=dark".into());

        let (_client, mut stream) = pipe();
        let mut context = RequestContext::new(parts(BodyFraming::Empty, headers), &mut stream);
        assert_eq!(context.cookies().get("session"), Some("abc"));
        assert_eq!(context.cookies().get("theme"), Some("dark"));
    }

    #[tokio::test]
    async fn extension_bag_is_type_keyed() {
        #[derive(Debug, PartialEq)]
        struct Marker(u32);

        let (_client, mut stream) = pipe();
        let mut context = RequestContext::new(parts(BodyFraming::Empty, HeaderMap::new()), &mut stream);

        context.extensions_mut().insert(Marker(7));
        assert_eq!(context.extensions().get::<Marker>(), Some(&Marker(7)));
        assert_eq!(context.extensions_mut().remove::<Marker>(), Some(Marker(7)));
        assert_eq!(context.extensions().get::<Marker>(), None);
    }

    #[tokio::test]
    async fn web_socket_upgrade_writes_the_accept_key() {
        use tokio::io::AsyncReadExt;

        let mut headers = HeaderMap::new();
        headers.append(HeaderName::Upgrade, "websocket".into());
        headers.append(HeaderName::SecWebSocketKey, "dGhlIHNhbXBsZSBub25jZQ==".into());

        let (mut client, mut stream) = pipe();
        let mut context = RequestContext::new(parts(BodyFraming::Empty, headers), &mut stream);
        let socket = context.accept_web_socket().await.unwrap();
        drop(socket);
        assert_eq!(context.hijacked(), Some(Hijack::WebSocket));

        let mut buffer = vec![0u8; 1024];
        let read = client.read(&mut buffer).await.unwrap();
        let response = String::from_utf8_lossy(&buffer[..read]).into_owned();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[tokio::test]
    async fn upgrade_requires_websocket_headers() {
        let (_client, mut stream) = pipe();
        let mut context = RequestContext::new(parts(BodyFraming::Empty, HeaderMap::new()), &mut stream);
        assert!(matches!(context.accept_web_socket().await.unwrap_err(), UpgradeError::NotAnUpgrade));
        assert_eq!(context.hijacked(), None);
    }

    #[test]
    fn trace_ids_are_opaque_and_unique() {
        let first = next_trace_id();
        let second = next_trace_id();
        assert_eq!(first.len(), 32);
        assert_ne!(first, second);
        assert!(first.bytes().all(|byte| byte.is_ascii_hexdigit()));
    }
}
