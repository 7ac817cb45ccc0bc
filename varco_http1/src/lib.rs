// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! The HTTP/1.1 wire engine: one cooperative task per accepted connection,
//! strictly serial request handling within a connection, keep-alive reuse
//! between exchanges.
//!
//! The loop reads a request head, builds a request context around the
//! connection stream, hands it to the dispatcher, serializes the produced
//! response, and then decides whether the connection may be reused.

pub mod read;
pub mod write;

pub use read::{read_request_head, ParsedHead};
pub use write::send_response;

use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use varco_http::{
    Error,
    HeaderName,
    Method,
    StatusCode,
    syntax,
};

use varco_handling::{
    dispatch,
    exchange_stream,
    BodyFraming,
    CancelSignal,
    Engine,
    ExchangeParts,
    ExecutionResult,
    Hijack,
    HostBinding,
    RequestContext,
    Transport,
};

use varco_logging::access::AccessLogEvent;

/// Serve one accepted connection until it closes. Never panics out; every
/// failure path ends with the connection being dropped.
pub async fn serve_connection(
    transport: impl Transport + 'static,
    remote_addr: SocketAddr,
    host: Arc<HostBinding>,
    engine: Arc<Engine>,
    shutdown: watch::Receiver<bool>,
) {
    engine.metrics.connection_opened();

    let mut stream = exchange_stream(transport);
    let mut first_request = true;

    loop {
        if *shutdown.borrow() {
            break;
        }

        // The idle timeout governs waiting between keep-alive requests;
        // the (shorter) header timeout governs the first request of a
        // connection.
        let head_timeout = if first_request {
            engine.settings.read_headers_timeout
        } else {
            engine.settings.idle_connection_timeout
        };

        let parsed = match timeout(head_timeout, read_request_head(&mut stream, &engine.settings)).await {
            Err(_elapsed) => {
                // Idle connections are closed silently.
                log::debug!("closing connection to {remote_addr}: request head timeout");
                break;
            }
            Ok(Err(Error::ParseError(error))) => {
                log::debug!("malformed request from {remote_addr}: {}", error.as_ref());
                let response = engine.error_pages.render(
                    error.response_status(),
                    Some(error.as_ref()),
                    engine.settings.verbose_error_bodies,
                );
                _ = send_response(&mut stream, response, false, false).await;
                break;
            }
            Ok(Err(Error::Other(error))) => {
                log::debug!("i/o error reading request from {remote_addr}: {error}");
                break;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(parsed))) => parsed,
        };
        first_request = false;

        if !serve_exchange(&mut stream, parsed, remote_addr, &host, &engine, &shutdown).await {
            break;
        }
    }

    engine.metrics.connection_closed();
}

/// Run one exchange over an established connection. Returns whether the
/// connection may be reused for another request.
async fn serve_exchange(
    stream: &mut varco_handling::ExchangeStream,
    parsed: ParsedHead,
    remote_addr: SocketAddr,
    host: &Arc<HostBinding>,
    engine: &Arc<Engine>,
    shutdown: &watch::Receiver<bool>,
) -> bool {
    let started_at = SystemTime::now();

    let mut effective_remote = remote_addr;
    let mut scheme = host.scheme.to_string();
    let mut authority_override = None;

    // Proxy headers are only honored through an explicitly configured
    // resolver, and a resolver failure is a client error, not a fallback.
    if let Some(resolver) = &engine.forwarded_resolver {
        match resolver.resolve(&parsed.head.headers, remote_addr) {
            Ok(info) => {
                if let Some(ip) = info.remote_ip {
                    effective_remote = SocketAddr::new(ip, remote_addr.port());
                }
                if let Some(forwarded_scheme) = info.scheme {
                    scheme = forwarded_scheme;
                }
                authority_override = info.host;
            }
            Err(error) => {
                let response = engine.error_pages.render(
                    StatusCode::BadRequest,
                    Some(&format!("forwarded header rejected: {error}")),
                    engine.settings.verbose_error_bodies,
                );
                _ = send_response(stream, response, false, false).await;
                return false;
            }
        }
    }

    let method = parsed.head.method.clone();
    let version = parsed.head.version;
    let framing = parsed.framing;
    let connection_close = parsed.connection_close;
    let head_bytes = parsed.head_bytes;

    let deadline = engine.settings.per_request_timeout.map(|duration| Instant::now() + duration);
    let cancel = CancelSignal::new(shutdown.clone(), deadline);

    let parts = ExchangeParts {
        head: parsed.head,
        framing,
        expect_continue: parsed.expect_continue,
        remote_addr: effective_remote,
        scheme,
        cancel,
        max_content_length: engine.settings.max_content_length,
    };

    let mut context = RequestContext::new(parts, stream);
    if let Some(authority) = authority_override {
        context.set_authority_override(authority);
    }

    // A request aimed at a host this binding does not answer for is
    // misdirected.
    if !host.accepts_authority(context.authority()) {
        let response = engine.error_pages.render(
            StatusCode::MisdirectedRequest,
            context.authority(),
            engine.settings.verbose_error_bodies,
        );
        drop(context);
        _ = send_response(stream, response, false, method.suppresses_response_body()).await;
        return false;
    }

    // The request budget closes the connection on expiry. Handlers see the
    // same deadline through the context's cancellation signal, so a
    // well-behaved handler ends early instead of being cut off here.
    let dispatched = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, dispatch(engine, host, &mut context)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                log::debug!("request budget exhausted for {remote_addr}; closing the connection");
                return false;
            }
        },
        None => dispatch(engine, host, &mut context).await,
    };

    let outcome = match dispatched {
        Ok(outcome) => outcome,
        Err(error) => {
            // `throw_exceptions` is on: surface the failure to the host's
            // error stream and abort the connection.
            engine.log_error(error.as_ref());
            log::error!("handler failure aborted connection to {remote_addr}: {error:#}");
            return false;
        }
    };

    let mut event = access_event_template(&context, started_at, head_bytes);
    let hijacked = context.hijacked();
    let expects_continue = context.expects_continue();
    let continue_sent = context.continue_sent();
    let body_complete = context.body_complete();

    let mut keep_alive = version.keep_alive_by_default()
        && !connection_close
        && hijacked.is_none()
        && !*shutdown.borrow();

    // A client still waiting for `100 Continue` has not sent its body;
    // responding and then reusing the connection would desynchronize it.
    if keep_alive && expects_continue && !continue_sent && framing != BodyFraming::Empty {
        keep_alive = false;
    }

    if keep_alive && !body_complete {
        keep_alive = match framing {
            BodyFraming::Empty => true,
            // A length-framed remainder can be drained deterministically.
            BodyFraming::ContentLength(_) => {
                match timeout(engine.settings.read_headers_timeout, context.drain_body(engine.settings.max_drain_bytes)).await {
                    Ok(Ok(drained)) => drained,
                    _ => false,
                }
            }
            // An unread chunked body terminates the connection.
            BodyFraming::Chunked => false,
        };
    }

    event.bytes_in = head_bytes + context.body_bytes_read();
    event.elapsed_ms = context.elapsed_ms();
    drop(context);

    let reusable = match outcome.response {
        Some(response) => {
            if let Some(connection) = response.headers.get_str(&HeaderName::Connection) {
                if syntax::list_contains_token(connection, "close") {
                    keep_alive = false;
                }
            }

            event.status_code = response.status.code();
            event.status_description = response.status.reason_phrase().to_string();

            let suppress_body = method.suppresses_response_body();
            match send_response(stream, response, keep_alive, suppress_body).await {
                Ok(bytes_out) => {
                    event.bytes_out = bytes_out;
                    keep_alive
                }
                Err(error) => {
                    log::debug!("i/o error writing response to {remote_addr}: {error}");
                    false
                }
            }
        }
        None => {
            // A streaming endpoint wrote its own output; the exchange owns
            // the connection until it ends.
            let status = match hijacked {
                Some(Hijack::WebSocket) => StatusCode::SwitchingProtocols,
                _ => StatusCode::Ok,
            };
            event.status_code = status.code();
            event.status_description = status.reason_phrase().to_string();
            false
        }
    };

    event.execution_result = outcome.result.as_str().to_string();
    engine.metrics.record_exchange(event.bytes_in, event.bytes_out, event.elapsed_ms);
    engine.log_access(&event);

    if outcome.result == ExecutionResult::HandlerError {
        log::debug!("request {} {} from {remote_addr} failed in a handler", event.method, event.path);
    }

    reusable
}

/// Pre-fill an access-log event with the request-side fields; the
/// response-side fields are stamped once the exchange finishes.
fn access_event_template(context: &RequestContext<'_>, started_at: SystemTime, head_bytes: u64) -> AccessLogEvent {
    let authority = context.authority().unwrap_or("").to_string();
    let (event_host, event_port) = match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|byte| byte.is_ascii_digit()) && !port.is_empty() => {
            (host.to_string(), port.parse().unwrap_or(0))
        }
        _ => {
            let default_port = if context.scheme() == "https" { 443 } else { 80 };
            (authority.clone(), default_port)
        }
    };

    AccessLogEvent {
        time: started_at,
        remote_ip: context.remote_addr().ip().to_string(),
        method: context.method().as_string().to_string(),
        scheme: context.scheme().to_string(),
        authority,
        host: event_host,
        port: event_port,
        path: context.path().to_string(),
        query: context.target().query().to_string(),
        status_code: 0,
        status_description: String::new(),
        bytes_in: head_bytes,
        bytes_out: 0,
        elapsed_ms: 0,
        execution_result: String::new(),
        headers: context.headers()
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), value.to_string()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_method_suppresses_the_response_body() {
        assert!(Method::Head.suppresses_response_body());
        assert!(!Method::Get.suppresses_response_body());
    }
}
