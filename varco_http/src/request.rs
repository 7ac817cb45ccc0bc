// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::{
    HeaderMap,
    HttpVersion,
    Method,
};

/// The request-line and header section of a request, read before any of the
/// body is touched.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: RequestTarget,
    pub version: HttpVersion,
    pub headers: HeaderMap,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestTarget {
    Origin {
        path: String,
        query: String,
    },
    Absolute(String),
    Authority(String),
    Asterisk,
}

impl RequestTarget {
    /// Parse a request-target.
    ///
    /// ### References
    /// * [RFC 9112, Section 3.2. Request Target](https://www.rfc-editor.org/rfc/rfc9112.html#name-request-target)
    #[must_use]
    pub fn parse(target: String) -> Option<Self> {
        if target == "*" {
            return Some(Self::Asterisk);
        }

        if target.starts_with('/') {
            return Some(match target.split_once('?') {
                Some((path, query)) => Self::Origin {
                    path: path.to_string(),
                    query: query.to_string(),
                },
                None => Self::Origin {
                    path: target,
                    query: String::new(),
                },
            });
        }

        if target.contains("://") {
            return Some(Self::Absolute(target));
        }

        // authority-form is only meaningful for CONNECT; require a port to
        // distinguish it from a stray token.
        if let Some((host, port)) = target.rsplit_once(':') {
            if !host.is_empty() && port.bytes().all(|byte| byte.is_ascii_digit()) && !port.is_empty() {
                return Some(Self::Authority(target));
            }
        }

        None
    }

    /// The path portion as a string, e.g. `/items/42`.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            RequestTarget::Origin { path, .. } => path,
            RequestTarget::Absolute(string) => string,
            RequestTarget::Authority(string) => string,
            RequestTarget::Asterisk => "*",
        }
    }

    /// The raw (still percent-encoded) query string, without the `?`.
    #[must_use]
    pub fn query(&self) -> &str {
        match self {
            RequestTarget::Origin { query, .. } => query,
            _ => "",
        }
    }

    /// The full request-target as it appeared on the request-line.
    #[must_use]
    pub fn as_string(&self) -> String {
        match self {
            RequestTarget::Origin { path, query } if query.is_empty() => path.clone(),
            RequestTarget::Origin { path, query } => format!("{path}?{query}"),
            RequestTarget::Absolute(string) => string.clone(),
            RequestTarget::Authority(string) => string.clone(),
            RequestTarget::Asterisk => "*".to_string(),
        }
    }
}
