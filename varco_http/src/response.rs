// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    Content,
    HeaderMap,
    HeaderName,
    HeaderValue,
    SetCookie,
    StatusCode,
};

/// An outgoing response under construction.
///
/// Headers added by application code are replayed on the wire in insertion
/// order; the engine appends `Date`, `Server` and `Connection` itself when
/// the head is serialized. Once the first byte has been flushed the response
/// object is gone — it is consumed by serialization, so post-flush mutation
/// is unrepresentable.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content: Option<Content>,

    /// Force `Transfer-Encoding: chunked` regardless of whether the content
    /// length is known.
    pub chunked: bool,
}

impl Response {
    #[must_use]
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            content: None,
            chunked: false,
        }
    }

    #[must_use]
    pub fn with_status_and_content(status: StatusCode, content: Content) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            content: Some(content),
            chunked: false,
        }
    }

    /// A `200 OK` with a plain-text body.
    #[must_use]
    pub fn ok(text: impl Into<String>) -> Self {
        Self::with_status_and_content(StatusCode::Ok, Content::text(text))
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_status_and_content(StatusCode::BadRequest, Content::text(message))
    }

    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_status_and_content(StatusCode::Forbidden, Content::text(message))
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status_and_content(StatusCode::NotFound, Content::text(message))
    }

    #[must_use]
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::with_status_and_content(StatusCode::InternalServerError, Content::text(message))
    }

    /// A `301 Moved Permanently` pointing at `location`.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        let mut response = Self::with_status(StatusCode::MovedPermanently);
        response.headers.set(HeaderName::Location, HeaderValue::String(location.into()));
        response
    }

    /// Switch this response to chunked transfer framing even when the
    /// content length would be known.
    #[must_use]
    pub fn with_chunked_transfer(mut self) -> Self {
        self.chunked = true;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<HeaderName>, value: impl Into<HeaderValue>) -> Self {
        self.headers.append(name.into(), value.into());
        self
    }

    /// Append a `Set-Cookie` field. May be called multiple times; every call
    /// emits a separate header line.
    pub fn set_cookie(&mut self, cookie: SetCookie) {
        self.headers.append(HeaderName::SetCookie, HeaderValue::String(cookie.to_header_value()));
    }
}
