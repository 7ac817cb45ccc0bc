// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::time::Duration;

/// Engine-wide tunables. The typed schema mirrors the recognized
/// configuration keys; loading a configuration file is the embedder's
/// concern.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Hard cap on request body sizes, enforced both against the declared
    /// `Content-Length` and against chunked bodies as they stream in.
    pub max_content_length: u64,

    /// Maximum size of the request-line (method + target + version).
    pub max_request_line_bytes: usize,

    /// Maximum size of a single header line.
    pub max_header_line_bytes: usize,

    /// Maximum combined size of all header lines.
    pub max_header_bytes: usize,

    /// Maximum number of header fields.
    pub max_header_count: usize,

    /// Emit an `X-Request-Id` header on every response.
    pub include_request_id_header: bool,

    /// Re-throw handler failures to the host instead of rendering a 500.
    pub throw_exceptions: bool,

    /// Match literal path segments case-insensitively.
    pub case_insensitive_routing: bool,

    /// Render error diagnostics into error response bodies.
    pub verbose_error_bodies: bool,

    /// If the client doesn't transmit the full request-line and headers
    /// within this time, the exchange is terminated.
    pub read_headers_timeout: Duration,

    /// Budget for one whole exchange (headers excluded); handlers observe
    /// expiry through the context's cancellation signal.
    pub per_request_timeout: Option<Duration>,

    /// Close connections idling between requests longer than this.
    pub idle_connection_timeout: Duration,

    /// How long shutdown waits for in-flight exchanges to drain.
    pub grace_period: Duration,

    /// How many unread request-body bytes the engine is willing to drain
    /// to keep a connection reusable; beyond that it closes instead.
    pub max_drain_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_content_length: 16 * 1024 * 1024,
            max_request_line_bytes: 8 * 1024,
            max_header_line_bytes: 8 * 1024,
            max_header_bytes: 64 * 1024,
            max_header_count: 100,
            include_request_id_header: false,
            throw_exceptions: false,
            case_insensitive_routing: false,
            verbose_error_bodies: false,
            read_headers_timeout: Duration::from_secs(10),
            per_request_timeout: None,
            idle_connection_timeout: Duration::from_secs(75),
            grace_period: Duration::from_secs(10),
            max_drain_bytes: 1024 * 1024,
        }
    }
}
