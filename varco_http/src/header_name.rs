// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use phf::phf_map;
use unicase::UniCase;

/// A header (field) name.
///
/// Field names are case-insensitive; names the engine cares about are
/// interned as variants, everything else is carried in [`HeaderName::Other`]
/// and compared ASCII-case-insensitively.
///
/// # References
/// * [RFC 9110 Section 5.1](https://www.rfc-editor.org/rfc/rfc9110.html#name-field-names)
#[derive(Clone, Debug, Eq)]
pub enum HeaderName {
    Other(String),

    AccessControlAllowCredentials,
    AccessControlAllowHeaders,
    AccessControlAllowMethods,
    AccessControlAllowOrigin,
    AccessControlExposeHeaders,
    AccessControlMaxAge,
    AccessControlRequestHeaders,
    AccessControlRequestMethod,
    Allow,
    CacheControl,
    Connection,
    ContentDisposition,
    ContentEncoding,
    ContentLength,
    ContentType,
    Cookie,
    Date,
    Expect,
    Forwarded,
    Host,
    Location,
    Origin,
    SecWebSocketAccept,
    SecWebSocketKey,
    SecWebSocketVersion,
    Server,
    SetCookie,
    Trailer,
    TransferEncoding,
    Upgrade,
    Vary,
    XAccelBuffering,
    XForwardedFor,
    XForwardedHost,
    XForwardedProto,
    XRequestId,
}

impl HeaderName {
    /// The canonical spelling used when serializing a message.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Other(name) => name,
            Self::AccessControlAllowCredentials => "Access-Control-Allow-Credentials",
            Self::AccessControlAllowHeaders => "Access-Control-Allow-Headers",
            Self::AccessControlAllowMethods => "Access-Control-Allow-Methods",
            Self::AccessControlAllowOrigin => "Access-Control-Allow-Origin",
            Self::AccessControlExposeHeaders => "Access-Control-Expose-Headers",
            Self::AccessControlMaxAge => "Access-Control-Max-Age",
            Self::AccessControlRequestHeaders => "Access-Control-Request-Headers",
            Self::AccessControlRequestMethod => "Access-Control-Request-Method",
            Self::Allow => "Allow",
            Self::CacheControl => "Cache-Control",
            Self::Connection => "Connection",
            Self::ContentDisposition => "Content-Disposition",
            Self::ContentEncoding => "Content-Encoding",
            Self::ContentLength => "Content-Length",
            Self::ContentType => "Content-Type",
            Self::Cookie => "Cookie",
            Self::Date => "Date",
            Self::Expect => "Expect",
            Self::Forwarded => "Forwarded",
            Self::Host => "Host",
            Self::Location => "Location",
            Self::Origin => "Origin",
            Self::SecWebSocketAccept => "Sec-WebSocket-Accept",
            Self::SecWebSocketKey => "Sec-WebSocket-Key",
            Self::SecWebSocketVersion => "Sec-WebSocket-Version",
            Self::Server => "Server",
            Self::SetCookie => "Set-Cookie",
            Self::Trailer => "Trailer",
            Self::TransferEncoding => "Transfer-Encoding",
            Self::Upgrade => "Upgrade",
            Self::Vary => "Vary",
            Self::XAccelBuffering => "X-Accel-Buffering",
            Self::XForwardedFor => "X-Forwarded-For",
            Self::XForwardedHost => "X-Forwarded-Host",
            Self::XForwardedProto => "X-Forwarded-Proto",
            Self::XRequestId => "X-Request-Id",
        }
    }
}

impl PartialEq for HeaderName {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Other(lhs), Self::Other(rhs)) => lhs.eq_ignore_ascii_case(rhs),
            (lhs, rhs) => std::mem::discriminant(lhs) == std::mem::discriminant(rhs),
        }
    }
}

static HEADER_NAME_MAP: phf::Map<UniCase<&'static str>, HeaderName> = phf_map!(
    UniCase::ascii("access-control-allow-credentials") => HeaderName::AccessControlAllowCredentials,
    UniCase::ascii("access-control-allow-headers") => HeaderName::AccessControlAllowHeaders,
    UniCase::ascii("access-control-allow-methods") => HeaderName::AccessControlAllowMethods,
    UniCase::ascii("access-control-allow-origin") => HeaderName::AccessControlAllowOrigin,
    UniCase::ascii("access-control-expose-headers") => HeaderName::AccessControlExposeHeaders,
    UniCase::ascii("access-control-max-age") => HeaderName::AccessControlMaxAge,
    UniCase::ascii("access-control-request-headers") => HeaderName::AccessControlRequestHeaders,
    UniCase::ascii("access-control-request-method") => HeaderName::AccessControlRequestMethod,
    UniCase::ascii("allow") => HeaderName::Allow,
    UniCase::ascii("cache-control") => HeaderName::CacheControl,
    UniCase::ascii("connection") => HeaderName::Connection,
    UniCase::ascii("content-disposition") => HeaderName::ContentDisposition,
    UniCase::ascii("content-encoding") => HeaderName::ContentEncoding,
    UniCase::ascii("content-length") => HeaderName::ContentLength,
    UniCase::ascii("content-type") => HeaderName::ContentType,
    UniCase::ascii("cookie") => HeaderName::Cookie,
    UniCase::ascii("date") => HeaderName::Date,
    UniCase::ascii("expect") => HeaderName::Expect,
    UniCase::ascii("forwarded") => HeaderName::Forwarded,
    UniCase::ascii("host") => HeaderName::Host,
    UniCase::ascii("location") => HeaderName::Location,
    UniCase::ascii("origin") => HeaderName::Origin,
    UniCase::ascii("sec-websocket-accept") => HeaderName::SecWebSocketAccept,
    UniCase::ascii("sec-websocket-key") => HeaderName::SecWebSocketKey,
    UniCase::ascii("sec-websocket-version") => HeaderName::SecWebSocketVersion,
    UniCase::ascii("server") => HeaderName::Server,
    UniCase::ascii("set-cookie") => HeaderName::SetCookie,
    UniCase::ascii("trailer") => HeaderName::Trailer,
    UniCase::ascii("transfer-encoding") => HeaderName::TransferEncoding,
    UniCase::ascii("upgrade") => HeaderName::Upgrade,
    UniCase::ascii("vary") => HeaderName::Vary,
    UniCase::ascii("x-accel-buffering") => HeaderName::XAccelBuffering,
    UniCase::ascii("x-forwarded-for") => HeaderName::XForwardedFor,
    UniCase::ascii("x-forwarded-host") => HeaderName::XForwardedHost,
    UniCase::ascii("x-forwarded-proto") => HeaderName::XForwardedProto,
    UniCase::ascii("x-request-id") => HeaderName::XRequestId,
);

impl From<String> for HeaderName {
    fn from(value: String) -> Self {
        match HEADER_NAME_MAP.get(&UniCase::ascii(&value)) {
            Some(name) => name.clone(),
            None => HeaderName::Other(value),
        }
    }
}

impl From<&str> for HeaderName {
    fn from(value: &str) -> Self {
        match HEADER_NAME_MAP.get(&UniCase::ascii(value)) {
            Some(name) => name.clone(),
            None => HeaderName::Other(value.to_string()),
        }
    }
}
