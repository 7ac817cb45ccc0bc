// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use std::time::SystemTime;

/// A header (field) value.
///
/// Values that the engine computes itself (sizes, dates) are kept in their
/// typed form until the message is serialized, avoiding intermediate string
/// allocations on the hot path.
#[derive(Clone, Debug)]
pub enum HeaderValue {
    StaticString(&'static str),
    String(String),
    Size(u64),
    DateTime(SystemTime),
}

impl HeaderValue {
    /// The value as a string slice, without converting typed values.
    #[must_use]
    pub fn as_str_no_convert(&self) -> Option<&str> {
        match self {
            Self::StaticString(str) => Some(str),
            Self::String(string) => Some(string),
            _ => None,
        }
    }

    /// Append the serialized form of this value to an outgoing message.
    pub fn append_to_message(&self, message: &mut String) {
        match self {
            Self::StaticString(str) => message.push_str(str),
            Self::String(string) => message.push_str(string),
            Self::Size(size) => message.push_str(&size.to_string()),
            Self::DateTime(time) => message.push_str(&httpdate::fmt_http_date(*time)),
        }
    }

    /// Parse the value as a non-negative decimal number.
    #[must_use]
    pub fn parse_number(&self) -> Option<u64> {
        match self {
            Self::Size(size) => Some(*size),
            _ => self.as_str_no_convert()?.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut message = String::new();
        self.append_to_message(&mut message);
        f.write_str(&message)
    }
}

impl PartialEq for HeaderValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl From<&'static str> for HeaderValue {
    fn from(value: &'static str) -> Self {
        Self::StaticString(value)
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<u64> for HeaderValue {
    fn from(value: u64) -> Self {
        Self::Size(value)
    }
}

impl From<usize> for HeaderValue {
    fn from(value: usize) -> Self {
        Self::Size(value as u64)
    }
}

impl From<SystemTime> for HeaderValue {
    fn from(value: SystemTime) -> Self {
        Self::DateTime(value)
    }
}
