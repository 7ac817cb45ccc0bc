// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use strum_macros::AsRefStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    #[must_use]
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, AsRefStr)]
pub enum PrefixParseError {
    MissingScheme,
    UnsupportedScheme,
    MissingHost,
    MissingPort,
    InvalidPort,

    /// The prefix must end with `/`.
    MissingTrailingSlash,
}

impl std::fmt::Display for PrefixParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::error::Error for PrefixParseError {}

/// One scheme + host + port + base-path tuple the server binds to.
///
/// Written as `<scheme>://<host>:<port>/<basePath>/`. The host may be a
/// literal name, `+` (any) or `*` (wildcard); the closing `/` is required.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListeningPrefix {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl ListeningPrefix {
    pub fn parse(prefix: &str) -> Result<Self, PrefixParseError> {
        let (scheme, rest) = prefix.split_once("://").ok_or(PrefixParseError::MissingScheme)?;
        let scheme = match scheme {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(PrefixParseError::UnsupportedScheme),
        };

        let Some(rest) = rest.strip_suffix('/') else {
            return Err(PrefixParseError::MissingTrailingSlash);
        };

        let (authority, base_path) = match rest.split_once('/') {
            Some((authority, base_path)) => (authority, format!("/{base_path}/")),
            None => (rest, "/".to_string()),
        };

        let (host, port) = authority.split_once(':').ok_or(PrefixParseError::MissingPort)?;
        if host.is_empty() {
            return Err(PrefixParseError::MissingHost);
        }

        // Port 0 ("let the OS pick") is tolerated for embedded and test
        // setups; published prefixes use 1-65535.
        let port: u16 = port.parse().map_err(|_| PrefixParseError::InvalidPort)?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            base_path: if base_path == "//" { "/".to_string() } else { base_path },
        })
    }

    /// Whether the prefix accepts connections on any interface.
    #[must_use]
    pub fn is_wildcard_host(&self) -> bool {
        self.host == "+" || self.host == "*"
    }

    /// The address this prefix binds its listener to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        if self.is_wildcard_host() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for ListeningPrefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let base = self.base_path.trim_matches('/');
        if base.is_empty() {
            write!(f, "{}://{}:{}/", self.scheme.as_str(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}/{}/", self.scheme.as_str(), self.host, self.port, base)
        }
    }
}
