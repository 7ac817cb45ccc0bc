// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The access-log line formatter.
//!
//! A format string expands `%`-prefixed tokens against a finished exchange;
//! unknown tokens pass through verbatim so application-supplied formats
//! degrade gracefully.

use std::time::SystemTime;

use crate::clock;

/// Everything a finished exchange exposes to the access log.
#[derive(Clone, Debug)]
pub struct AccessLogEvent {
    pub time: SystemTime,
    pub remote_ip: String,
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
    pub status_code: u16,
    pub status_description: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed_ms: u64,
    pub execution_result: String,
    /// Request headers, first occurrence per name, for `%{Name}` lookups.
    pub headers: Vec<(String, String)>,
}

impl AccessLogEvent {
    fn header(&self, name: &str) -> &str {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }
}

/// The default format, mirroring common combined-log layouts.
pub const DEFAULT_ACCESS_LOG_FORMAT: &str = "%dy-%dm-%dd %tH:%ti:%ts +0000 %ri \"%rm %rz%rq\" %sc %lin %lou %lmsms";

/// Expand `format` against the given event.
///
/// Tokens are matched longest-first; `%{Header-Name}` expands to the first
/// occurrence of that request header. An unrecognized token is emitted
/// verbatim, `%` included.
#[must_use]
pub fn format_access_log(format: &str, event: &AccessLogEvent) -> String {
    let civil = clock::civil_utc(event.time);
    let mut output = String::with_capacity(format.len() + 64);
    let mut rest = format;

    while let Some(position) = rest.find('%') {
        output.push_str(&rest[..position]);
        rest = &rest[position..];

        if let Some(header_rest) = rest.strip_prefix("%{") {
            match header_rest.split_once('}') {
                Some((name, after)) => {
                    output.push_str(event.header(name));
                    rest = after;
                    continue;
                }
                None => {
                    output.push_str(rest);
                    break;
                }
            }
        }

        let mut matched = None;
        for length in [3, 2] {
            if rest.len() < 1 + length {
                continue;
            }
            let token = &rest[1..1 + length];
            if let Some(expansion) = expand_token(token, event, &civil) {
                matched = Some((expansion, 1 + length));
                break;
            }
        }

        match matched {
            Some((expansion, consumed)) => {
                output.push_str(&expansion);
                rest = &rest[consumed..];
            }
            None => {
                output.push('%');
                rest = &rest[1..];
            }
        }
    }

    output.push_str(rest);
    output
}

fn expand_token(token: &str, event: &AccessLogEvent, civil: &clock::CivilTime) -> Option<String> {
    Some(match token {
        "lin" => humanize_bytes(event.bytes_in),
        "lou" => humanize_bytes(event.bytes_out),
        "lms" => event.elapsed_ms.to_string(),

        "dd" => format!("{:02}", civil.day),
        "dm" => format!("{:02}", civil.month),
        "dy" => format!("{:04}", civil.year),

        "tH" => format!("{:02}", civil.hour),
        "ti" => format!("{:02}", civil.minute),
        "ts" => format!("{:02}", civil.second),
        "tm" => format!("{:03}", civil.millisecond),
        "tz" => "+0000".to_string(),

        "ri" => event.remote_ip.clone(),
        "rm" => event.method.clone(),
        "rs" => event.scheme.clone(),
        "ra" => event.authority.clone(),
        "rh" => event.host.clone(),
        "rp" => event.port.to_string(),
        "rz" => event.path.clone(),
        "rq" => if event.query.is_empty() {
            String::new()
        } else {
            format!("?{}", event.query)
        },

        "sc" => event.status_code.to_string(),
        "sd" => event.status_description.clone(),

        "ls" => event.execution_result.clone(),

        _ => return None,
    })
}

/// Render a byte count with a binary-magnitude unit, one decimal place.
#[must_use]
pub fn humanize_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn sample_event() -> AccessLogEvent {
        AccessLogEvent {
            // 2023-03-07 13:29:31 UTC
            time: SystemTime::UNIX_EPOCH + Duration::from_secs(1678195771),
            remote_ip: "203.0.113.9".into(),
            method: "GET".into(),
            scheme: "http".into(),
            authority: "example.com:8080".into(),
            host: "example.com".into(),
            port: 8080,
            path: "/items/42".into(),
            query: "full=1".into(),
            status_code: 200,
            status_description: "OK".into(),
            bytes_in: 0,
            bytes_out: 1536,
            elapsed_ms: 12,
            execution_result: "Executed".into(),
            headers: vec![
                ("User-Agent".into(), "collaudatrice/0.1".into()),
                ("Accept".into(), "*/*".into()),
            ],
        }
    }

    #[rstest]
    #[case("%dy-%dm-%dd", "2023-03-07")]
    #[case("%tH:%ti:%ts%tz", "13:29:31+0000")]
    #[case("%rm %rz%rq", "GET /items/42?full=1")]
    #[case("%sc %sd", "200 OK")]
    #[case("%lin / %lou", "0 B / 1.5 kB")]
    #[case("%lms ms, %ls", "12 ms, Executed")]
    #[case("%ri@%rh:%rp (%rs, %ra)", "203.0.113.9@example.com:8080 (http, example.com:8080)")]
    fn token_expansion(#[case] format: &str, #[case] expected: &str) {
        assert_eq!(format_access_log(format, &sample_event()), expected);
    }

    #[test]
    fn header_tokens_read_the_first_occurrence() {
        assert_eq!(
            format_access_log("ua=%{User-Agent}", &sample_event()),
            "ua=collaudatrice/0.1",
        );
        assert_eq!(format_access_log("missing=[%{X-None}]", &sample_event()), "missing=[]");
    }

    #[test]
    fn unknown_tokens_pass_through() {
        assert_eq!(format_access_log("100%% or %xy", &sample_event()), "100%% or %xy");
    }

    #[rstest]
    #[case(0, "0 B")]
    #[case(1023, "1023 B")]
    #[case(1536, "1.5 kB")]
    #[case(5 * 1024 * 1024, "5.0 MB")]
    fn humanized_sizes(#[case] bytes: u64, #[case] expected: &str) {
        assert_eq!(humanize_bytes(bytes), expected);
    }
}
