// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Pluggable resolution of the effective client address behind proxies.
//!
//! The engine never trusts `X-Forwarded-*` or `Forwarded` headers on its
//! own: a resolver has to be configured explicitly, and a resolver failure
//! surfaces as a `400 Bad Request` with a diagnostic, never as a silently
//! wrong peer address.

use std::net::{IpAddr, SocketAddr};

use varco_http::{HeaderMap, HeaderName};

/// What a resolver derived from the proxy headers. `None` fields leave the
/// connection-level value untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ForwardedInfo {
    pub remote_ip: Option<IpAddr>,
    pub host: Option<String>,
    pub scheme: Option<String>,
}

pub trait ForwardedResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap, remote_addr: SocketAddr) -> Result<ForwardedInfo, anyhow::Error>;
}

/// The standard `X-Forwarded-For` / `X-Forwarded-Host` /
/// `X-Forwarded-Proto` resolver. The *first* `X-Forwarded-For` element is
/// the original client.
#[derive(Clone, Copy, Debug, Default)]
pub struct XForwardedResolver;

impl ForwardedResolver for XForwardedResolver {
    fn resolve(&self, headers: &HeaderMap, _remote_addr: SocketAddr) -> Result<ForwardedInfo, anyhow::Error> {
        let mut info = ForwardedInfo::default();

        if let Some(forwarded_for) = headers.get_str(&HeaderName::XForwardedFor) {
            let first = forwarded_for.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                let ip: IpAddr = first
                    .parse()
                    .map_err(|_| anyhow::anyhow!("malformed X-Forwarded-For element: {first:?}"))?;
                info.remote_ip = Some(ip);
            }
        }

        if let Some(host) = headers.get_str(&HeaderName::XForwardedHost) {
            let host = host.trim();
            if !host.is_empty() {
                info.host = Some(host.to_string());
            }
        }

        if let Some(scheme) = headers.get_str(&HeaderName::XForwardedProto) {
            let scheme = scheme.trim().to_ascii_lowercase();
            match scheme.as_str() {
                "http" | "https" => info.scheme = Some(scheme),
                other => anyhow::bail!("unsupported X-Forwarded-Proto value: {other:?}"),
            }
        }

        Ok(info)
    }
}
