// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The typed configuration schema.
//!
//! Embedders deserialize this from whatever source they keep configuration
//! in (a JSON file, environment plumbing, a database row) and apply it to a
//! server under construction. Unknown keys are ignored by design, so a
//! configuration written for a newer release still loads.

use serde::Deserialize;

use std::collections::HashMap;

use varco_handling::{CorsPolicy, Settings};
use varco_logging::LogStream;

use crate::prefix::{ListeningPrefix, PrefixParseError};
use crate::server::ListeningHost;

/// The literal stream target meaning "write to standard output".
pub const CONSOLE_STREAM: &str = "console";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    pub server: ServerSection,
    pub listening_host: ListeningHostSection,

    /// Free-form string parameters exposed to the application.
    pub parameters: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSection {
    pub maximum_content_length: Option<u64>,
    pub include_request_id_header: Option<bool>,
    pub throw_exceptions: Option<bool>,
    pub access_logs_stream: Option<String>,
    pub errors_logs_stream: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListeningHostSection {
    pub label: Option<String>,
    pub ports: Vec<String>,
    pub cross_origin_resource_sharing_policy: Option<CorsSection>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsSection {
    pub allow_origin: Option<String>,
    pub allow_origins: Vec<String>,
    pub allow_methods: Vec<String>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age: Option<u64>,
}

#[derive(Debug)]
pub enum OptionsError {
    /// A required section or field is absent; carries its path.
    MissingSection(&'static str),

    InvalidPrefix {
        prefix: String,
        error: PrefixParseError,
    },
}

impl std::fmt::Display for OptionsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSection(path) => write!(f, "required configuration section is missing: {path}"),
            Self::InvalidPrefix { prefix, error } => write!(f, "invalid listening prefix {prefix:?}: {error}"),
        }
    }
}

impl std::error::Error for OptionsError {}

impl ServerOptions {
    /// Parse the options from their JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Fold the `server.*` keys into engine settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(maximum) = self.server.maximum_content_length {
            settings.max_content_length = maximum;
        }
        if let Some(include) = self.server.include_request_id_header {
            settings.include_request_id_header = include;
        }
        if let Some(throw) = self.server.throw_exceptions {
            settings.throw_exceptions = throw;
        }
    }

    /// Build the listening host described by the `listeningHost.*` keys.
    pub fn listening_host(&self) -> Result<ListeningHost, OptionsError> {
        if self.listening_host.ports.is_empty() {
            return Err(OptionsError::MissingSection("listeningHost.ports"));
        }

        let mut prefixes = Vec::with_capacity(self.listening_host.ports.len());
        for prefix in &self.listening_host.ports {
            match ListeningPrefix::parse(prefix) {
                Ok(parsed) => prefixes.push(parsed),
                Err(error) => {
                    return Err(OptionsError::InvalidPrefix {
                        prefix: prefix.clone(),
                        error,
                    })
                }
            }
        }

        let mut host = ListeningHost::new(
            self.listening_host.label.clone().unwrap_or_else(|| "default".to_string()),
            prefixes,
        );
        if let Some(cors) = &self.listening_host.cross_origin_resource_sharing_policy {
            host = host.with_cors(cors.to_policy());
        }
        Ok(host)
    }

    /// Open the configured access-log stream, honoring the `"console"`
    /// sentinel.
    #[must_use]
    pub fn open_access_log(&self) -> Option<LogStream> {
        self.server.access_logs_stream.as_deref().map(open_stream)
    }

    /// Open the configured error-log stream.
    #[must_use]
    pub fn open_errors_log(&self) -> Option<LogStream> {
        self.server.errors_logs_stream.as_deref().map(open_stream)
    }
}

fn open_stream(target: &str) -> LogStream {
    if target == CONSOLE_STREAM {
        LogStream::to_console()
    } else {
        LogStream::to_file(target)
    }
}

impl CorsSection {
    fn to_policy(&self) -> CorsPolicy {
        let mut allow_origins = self.allow_origins.clone();
        if let Some(origin) = &self.allow_origin {
            if !allow_origins.contains(origin) {
                allow_origins.insert(0, origin.clone());
            }
        }

        CorsPolicy {
            allow_origins,
            allow_methods: self.allow_methods.clone(),
            allow_headers: self.allow_headers.clone(),
            expose_headers: self.expose_headers.clone(),
            allow_credentials: self.allow_credentials,
            max_age: self.max_age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "server": {
            "maximumContentLength": 1048576,
            "includeRequestIdHeader": true,
            "accessLogsStream": "console",
            "unknownFutureKey": "ignored"
        },
        "listeningHost": {
            "label": "public",
            "ports": ["http://+:8080/", "http://+:8081/api/"],
            "crossOriginResourceSharingPolicy": {
                "allowOrigin": "https://a.example",
                "allowMethods": ["GET", "POST"],
                "maxAge": 3600
            }
        },
        "parameters": {
            "motd": "hello"
        }
    }"#;

    #[test]
    fn sample_configuration_loads() {
        let options = ServerOptions::from_json(SAMPLE).unwrap();

        let mut settings = Settings::default();
        options.apply_to_settings(&mut settings);
        assert_eq!(settings.max_content_length, 1048576);
        assert!(settings.include_request_id_header);
        assert!(!settings.throw_exceptions);

        let host = options.listening_host().unwrap();
        assert_eq!(host.label, "public");
        assert_eq!(host.prefixes.len(), 2);
        assert_eq!(host.prefixes[1].base_path, "/api/");

        let cors = host.cors.unwrap();
        assert_eq!(cors.allow_origins, vec!["https://a.example"]);
        assert_eq!(cors.max_age, Some(3600));

        assert_eq!(options.parameters.get("motd").map(String::as_str), Some("hello"));
    }

    #[test]
    fn missing_ports_identify_their_path() {
        let options = ServerOptions::from_json("{}").unwrap();
        let error = options.listening_host().unwrap_err();
        assert!(error.to_string().contains("listeningHost.ports"));
    }

    #[test]
    fn malformed_prefixes_are_reported() {
        let options = ServerOptions::from_json(
            r#"{"listeningHost": {"ports": ["http://+:8080"]}}"#,
        ).unwrap();
        assert!(matches!(options.listening_host(), Err(OptionsError::InvalidPrefix { .. })));
    }
}
