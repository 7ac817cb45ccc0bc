// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use strum_macros::AsRefStr;

use std::io;

use crate::StatusCode;

#[derive(Debug)]
pub enum Error {
    ParseError(ParseError),
    Other(io::Error),
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::ParseError(error)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Error::Other(error)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(error) => write!(f, "parse error: {}", error.as_ref()),
            Self::Other(error) => write!(f, "i/o error: {error}"),
        }
    }
}

impl std::error::Error for Error {}

/// An error that can occur while parsing an HTTP request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, AsRefStr)]
pub enum ParseError {
    /// The header didn't contain a colon, it's only the name.
    HeaderDoesNotContainColon,

    /// A single header line (name + value) exceeded the configured limit.
    HeaderTooLarge,

    /// The combined size of all header lines exceeded the configured limit.
    HeaderSectionTooLarge,

    /// More header lines than the configured limit.
    TooManyHeaders,

    /// The `Content-Length` field was malformed: non-numeric characters,
    /// negative, empty, or contradicting another `Content-Length` field.
    InvalidContentLength,

    /// The declared or transferred body size exceeds the configured maximum.
    ContentTooLarge,

    /// The line ended with a CR that was not followed by an LF.
    InvalidCRLF,

    /// The HTTP version was not `HTTP/1.0` or `HTTP/1.1`.
    InvalidHttpVersion,

    /// The request-target format is unknown.
    ///
    /// ```text
    /// request-target = origin-form
    ///                / absolute-form
    ///                / authority-form
    ///                / asterisk-form
    /// ```
    InvalidRequestTarget,

    /// The method was too long.
    MethodTooLarge,

    /// The request-line (method + target + version) was too long.
    RequestLineTooLarge,

    /// A chunk-size line of a chunked body wasn't valid hexadecimal.
    InvalidChunkSize,

    /// The stream ended in the middle of a framed body.
    UnexpectedEndOfBody,

    TokenContainsDelimiter,
    TokenContainsNonVisibleAscii,
    TokenContainsWhitespace,
    TokenEmpty,

    FieldValueContainsInvalidCharacters,

    InvalidOctetInMethod,
    InvalidOctetInRequestTarget,
}

impl ParseError {
    /// The status code rendered to the client for this kind of error. The
    /// connection is closed afterwards in every case.
    #[must_use]
    pub fn response_status(&self) -> StatusCode {
        match self {
            Self::HeaderTooLarge
            | Self::HeaderSectionTooLarge
            | Self::TooManyHeaders => StatusCode::RequestHeaderFieldsTooLarge,

            Self::ContentTooLarge => StatusCode::ContentTooLarge,

            Self::RequestLineTooLarge => StatusCode::URITooLong,

            Self::InvalidHttpVersion => StatusCode::HTTPVersionNotSupported,

            _ => StatusCode::BadRequest,
        }
    }
}
