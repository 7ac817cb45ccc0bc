// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Cross-Origin Resource Sharing, evaluated per listening host.
//!
//! Preflights are answered by the engine without invoking user code. For
//! ordinary requests the applicable response headers are appended after the
//! action returned, never overwriting headers the action set itself.
//!
//! # References
//! * [Fetch Standard, CORS protocol](https://fetch.spec.whatwg.org/#http-cors-protocol)

use itertools::Itertools;

use varco_http::{
    HeaderMap,
    HeaderName,
    HeaderValue,
    Response,
    StatusCode,
};

#[derive(Clone, Debug, Default)]
pub struct CorsPolicy {
    /// Allowed origins, compared case-insensitively; the single element
    /// `"*"` allows every origin.
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u64>,
}

impl CorsPolicy {
    /// A policy allowing a single origin.
    #[must_use]
    pub fn allow_origin(origin: impl Into<String>) -> Self {
        Self {
            allow_origins: vec![origin.into()],
            ..Self::default()
        }
    }

    /// The `Access-Control-Allow-Origin` value to echo for this request
    /// origin, or `None` when the origin is not permitted.
    #[must_use]
    pub fn echo_origin(&self, origin: &str) -> Option<String> {
        if self.allow_origins.iter().any(|allowed| allowed == "*") {
            // Credentialed responses must name the origin explicitly.
            if self.allow_credentials {
                return Some(origin.to_string());
            }
            return Some("*".to_string());
        }

        self.allow_origins
            .iter()
            .find(|allowed| allowed.eq_ignore_ascii_case(origin))
            .map(|allowed| allowed.clone())
    }

    fn method_allowed(&self, method: &str) -> bool {
        self.allow_methods.is_empty()
            || self.allow_methods.iter().any(|allowed| allowed.eq_ignore_ascii_case(method))
    }

    /// Answer an `OPTIONS` preflight. `204 No Content` with the computed
    /// headers when the origin and requested method pass, `403 Forbidden`
    /// otherwise.
    #[must_use]
    pub fn preflight_response(&self, request_headers: &HeaderMap) -> Response {
        let origin = request_headers.get_str(&HeaderName::Origin).unwrap_or("");
        let requested_method = request_headers
            .get_str(&HeaderName::AccessControlRequestMethod)
            .unwrap_or("");

        let Some(echo) = self.echo_origin(origin) else {
            return Response::with_status(StatusCode::Forbidden);
        };
        if !self.method_allowed(requested_method) {
            return Response::with_status(StatusCode::Forbidden);
        }

        let mut response = Response::with_status(StatusCode::NoContent);
        response.headers.set(HeaderName::AccessControlAllowOrigin, HeaderValue::String(echo));

        if !self.allow_methods.is_empty() {
            response.headers.set(
                HeaderName::AccessControlAllowMethods,
                HeaderValue::String(self.allow_methods.iter().join(", ")),
            );
        }
        if !self.allow_headers.is_empty() {
            response.headers.set(
                HeaderName::AccessControlAllowHeaders,
                HeaderValue::String(self.allow_headers.iter().join(", ")),
            );
        }
        if self.allow_credentials {
            response.headers.set(HeaderName::AccessControlAllowCredentials, "true".into());
        }
        if let Some(max_age) = self.max_age {
            response.headers.set(HeaderName::AccessControlMaxAge, HeaderValue::Size(max_age));
        }

        response
    }

    /// Append the applicable headers to an ordinary (non-preflight)
    /// response. Headers the action already set win.
    pub fn apply(&self, origin: Option<&str>, response: &mut Response) {
        let Some(origin) = origin else {
            return;
        };
        let Some(echo) = self.echo_origin(origin) else {
            return;
        };

        response.headers.append_if_absent(HeaderName::AccessControlAllowOrigin, HeaderValue::String(echo));

        if !self.expose_headers.is_empty() {
            response.headers.append_if_absent(
                HeaderName::AccessControlExposeHeaders,
                HeaderValue::String(self.expose_headers.iter().join(", ")),
            );
        }
        if self.allow_credentials {
            response.headers.append_if_absent(HeaderName::AccessControlAllowCredentials, "true".into());
        }
    }
}

/// Is this request a CORS preflight?
#[must_use]
pub fn is_preflight(method: &varco_http::Method, headers: &HeaderMap) -> bool {
    *method == varco_http::Method::Options
        && headers.contains(&HeaderName::Origin)
        && headers.contains(&HeaderName::AccessControlRequestMethod)
}
