// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use crate::cors::CorsPolicy;

/// The per-listening-host context a connection runs under: the scheme its
/// prefix was bound with, the base path shared by the host's prefixes, and
/// the host's CORS policy.
#[derive(Clone, Debug)]
pub struct HostBinding {
    pub label: String,
    pub scheme: &'static str,
    pub base_path: String,
    pub cors: Option<CorsPolicy>,

    /// The host names this binding answers for. `+` and `*` accept any
    /// host; an empty list does too. A request whose authority matches
    /// none of the names is misdirected.
    pub hostnames: Vec<String>,
}

impl HostBinding {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            scheme: "http",
            base_path: "/".to_string(),
            cors: None,
            hostnames: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostnames.push(hostname.into());
        self
    }

    /// Whether a request with this authority belongs on this binding.
    #[must_use]
    pub fn accepts_authority(&self, authority: Option<&str>) -> bool {
        if self.hostnames.is_empty() {
            return true;
        }

        let Some(authority) = authority else {
            return false;
        };
        let host = authority.rsplit_once(':')
            .filter(|(_, port)| !port.is_empty() && port.bytes().all(|byte| byte.is_ascii_digit()))
            .map(|(host, _)| host)
            .unwrap_or(authority);

        self.hostnames.iter().any(|name| {
            name == "+" || name == "*" || name.eq_ignore_ascii_case(host)
        })
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: &'static str) -> Self {
        self.scheme = scheme;
        self
    }

    #[must_use]
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    #[must_use]
    pub fn with_cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = Some(cors);
        self
    }

    /// The request path relative to this host's base path, or `None` when
    /// the request falls outside of it.
    #[must_use]
    pub fn relative_path<'p>(&self, path: &'p str) -> Option<&'p str> {
        let base = self.base_path.trim_end_matches('/');
        if base.is_empty() {
            return Some(path);
        }

        let rest = path.strip_prefix(base)?;
        if rest.is_empty() {
            return Some("/");
        }
        if rest.starts_with('/') {
            return Some(rest);
        }
        None
    }
}

impl Default for HostBinding {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, true)]
    #[case(Some("api.example"), true)]
    #[case(Some("API.EXAMPLE:8080"), true)]
    #[case(Some("other.example"), false)]
    fn authority_matching(#[case] authority: Option<&str>, #[case] expected: bool) {
        let open = HostBinding::new("open");
        assert!(open.accepts_authority(authority.or(Some("anything"))));

        let constrained = HostBinding::new("constrained").with_hostname("api.example");
        if authority.is_none() {
            assert!(!constrained.accepts_authority(None));
        } else {
            assert_eq!(constrained.accepts_authority(authority), expected);
        }
    }

    #[rstest]
    #[case("/", "/items/42", Some("/items/42"))]
    #[case("/api/", "/api/items", Some("/items"))]
    #[case("/api/", "/api", Some("/"))]
    #[case("/api/", "/apix/items", None)]
    #[case("/api/", "/other", None)]
    fn base_path_stripping(#[case] base: &str, #[case] path: &str, #[case] expected: Option<&str>) {
        let host = HostBinding::new("test").with_base_path(base);
        assert_eq!(host.relative_path(path), expected);
    }
}
