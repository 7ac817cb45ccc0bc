// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! Request dispatching: route matching, the request-handler pipeline, the
//! action-result conversion registry, CORS, and the per-request context.
//!
//! The wire layer (the `varco_http1` crate) frames a request, builds a
//! [`RequestContext`] around the connection stream, and calls [`dispatch`];
//! everything between "head parsed" and "response ready to serialize"
//! happens here.

pub mod config;
pub mod context;
pub mod cors;
pub mod forwarded;
pub mod handler;
pub mod host;
pub mod metrics;
pub mod pattern;
pub mod router;
pub mod sse;
pub mod stream;

pub use config::Settings;
pub use context::{BodyError, BodyFraming, CancelSignal, ExchangeParts, Extensions, Hijack, RequestContext, UpgradeError};
pub use cors::CorsPolicy;
pub use handler::{Action, ActionRegistry, ActionValue, Deferred, HandlerOutcome, HandlerPhase, RequestHandler};
pub use host::HostBinding;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use pattern::{PathPattern, PatternError};
pub use router::{MatchOutcome, Route, Router, RouterError};
pub use stream::{exchange_stream, ExchangeStream, Transport};

use std::sync::Arc;

use hashbrown::HashMap;

use varco_http::{
    Content,
    HeaderName,
    HeaderValue,
    Response,
    StatusCode,
};

use varco_logging::access::{format_access_log, AccessLogEvent, DEFAULT_ACCESS_LOG_FORMAT};
use varco_logging::LogStream;

use crate::forwarded::ForwardedResolver;
use crate::handler::Deferred as DeferredValue;

/// How an exchange was resolved, exposed to the access log as `%ls`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExecutionResult {
    Executed,
    ShortCircuited,
    CorsPreflight,
    CorsRejected,
    RouteNotFound,
    MethodNotAllowed,
    UnregisteredActionType,
    HandlerError,
    Hijacked,
}

impl ExecutionResult {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "Executed",
            Self::ShortCircuited => "ShortCircuited",
            Self::CorsPreflight => "CorsPreflight",
            Self::CorsRejected => "CorsRejected",
            Self::RouteNotFound => "RouteNotFound",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::UnregisteredActionType => "UnregisteredActionType",
            Self::HandlerError => "HandlerError",
            Self::Hijacked => "Hijacked",
        }
    }
}

/// What [`dispatch`] produced. `response` is `None` when a streaming
/// endpoint hijacked the connection and already wrote its own output.
pub struct DispatchOutcome {
    pub response: Option<Response>,
    pub result: ExecutionResult,
}

type ErrorPage = Box<dyn Fn(StatusCode, Option<&str>) -> Response + Send + Sync>;

/// The status-code → response mapping used for engine-generated errors.
/// Applications may override individual codes.
#[derive(Default)]
pub struct ErrorPages {
    custom: HashMap<u16, ErrorPage>,
}

impl ErrorPages {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, status: StatusCode, page: impl Fn(StatusCode, Option<&str>) -> Response + Send + Sync + 'static) {
        self.custom.insert(status.code(), Box::new(page));
    }

    /// Render an error response. The diagnostic `detail` only reaches the
    /// body when `verbose` is set; the response is always syntactically
    /// valid HTTP either way.
    #[must_use]
    pub fn render(&self, status: StatusCode, detail: Option<&str>, verbose: bool) -> Response {
        if let Some(page) = self.custom.get(&status.code()) {
            return page(status, detail);
        }

        let mut body = format!("{} {}", status.code(), status.reason_phrase());
        if verbose {
            if let Some(detail) = detail {
                body.push('\n');
                body.push_str(detail);
            }
        }
        Response::with_status_and_content(status, Content::text(body))
    }
}

/// Everything shared between connections: the frozen route table, the
/// engine settings, log streams, error pages and metrics.
pub struct Engine {
    pub router: Router,
    pub settings: Settings,
    pub access_log: Option<Arc<LogStream>>,
    pub error_log: Option<Arc<LogStream>>,
    pub access_log_format: String,
    pub error_pages: ErrorPages,
    pub forwarded_resolver: Option<Arc<dyn ForwardedResolver>>,
    pub metrics: ServerMetrics,
}

impl Engine {
    #[must_use]
    pub fn new(mut router: Router, settings: Settings) -> Self {
        if settings.case_insensitive_routing {
            router = router.with_case_insensitive_matching();
        }
        Self {
            router,
            settings,
            access_log: None,
            error_log: None,
            access_log_format: DEFAULT_ACCESS_LOG_FORMAT.to_string(),
            error_pages: ErrorPages::new(),
            forwarded_resolver: None,
            metrics: ServerMetrics::new(),
        }
    }

    pub fn log_access(&self, event: &AccessLogEvent) {
        if let Some(stream) = &self.access_log {
            stream.write_line(format_access_log(&self.access_log_format, event));
        }
    }

    pub fn log_error(&self, error: &dyn std::error::Error) {
        if let Some(stream) = &self.error_log {
            stream.write_exception(error);
        }
    }

    fn render_error(&self, status: StatusCode, detail: Option<&str>) -> Response {
        self.error_pages.render(status, detail, self.settings.verbose_error_bodies)
    }
}

/// Run one framed request through the engine.
///
/// The only `Err` this returns is a handler/action failure while
/// `throw_exceptions` is enabled; the caller is then expected to abort the
/// connection after surfacing the error.
pub async fn dispatch(
    engine: &Engine,
    host: &HostBinding,
    context: &mut RequestContext<'_>,
) -> Result<DispatchOutcome, anyhow::Error> {
    // CORS preflights are answered without entering user code.
    if let Some(cors) = &host.cors {
        if cors::is_preflight(context.method(), context.headers()) {
            let response = cors.preflight_response(context.headers());
            let result = if response.status == StatusCode::Forbidden {
                log::debug!("rejected CORS preflight from {:?}", context.headers().get_str(&HeaderName::Origin));
                ExecutionResult::CorsRejected
            } else {
                ExecutionResult::CorsPreflight
            };
            return Ok(DispatchOutcome {
                response: Some(finish(engine, context, response)),
                result,
            });
        }
    }

    let Some(relative_path) = host.relative_path(context.path()).map(str::to_string) else {
        let response = engine.render_error(StatusCode::NotFound, Some("outside the host base path"));
        return Ok(DispatchOutcome {
            response: Some(finish(engine, context, response)),
            result: ExecutionResult::RouteNotFound,
        });
    };

    let (route, params) = match engine.router.match_route(context.method(), &relative_path, context.authority()) {
        MatchOutcome::Matched { route, params } => (route, params),
        MatchOutcome::NotFound => {
            let response = engine.render_error(StatusCode::NotFound, None);
            return Ok(DispatchOutcome {
                response: Some(finish(engine, context, response)),
                result: ExecutionResult::RouteNotFound,
            });
        }
        MatchOutcome::MethodNotAllowed { allow } => {
            let mut response = engine.render_error(StatusCode::MethodNotAllowed, None);
            if !allow.is_empty() {
                use itertools::Itertools;
                let allow = allow.iter().map(|method| method.as_string()).join(", ");
                response.headers.set(HeaderName::Allow, HeaderValue::String(allow));
            }
            return Ok(DispatchOutcome {
                response: Some(finish(engine, context, response)),
                result: ExecutionResult::MethodNotAllowed,
            });
        }
    };

    context.set_params(params);

    let mut result = ExecutionResult::Executed;
    let mut response: Option<Response> = None;

    // Pre phase: global handlers first, then the route's own.
    let pre_handlers = engine.router.global_handlers()
        .iter()
        .chain(route.pre_handlers.iter())
        .filter(|handler| handler.phase() == handler::HandlerPhase::Before);

    for entry in pre_handlers {
        match invoke_handler(entry, context, None).await {
            Ok(HandlerOutcome::Continue) => {}
            Ok(HandlerOutcome::ShortCircuit(handler_response)) => {
                response = Some(handler_response);
                result = ExecutionResult::ShortCircuited;
                break;
            }
            Err(error) => {
                return handler_failure(engine, host, context, error, route).await;
            }
        }
    }

    // The action, unless a pre handler already produced the response.
    if response.is_none() {
        match route.action.invoke(context).await {
            Ok(mut value) => {
                // Deferred results are awaited, then re-dispatched on the
                // inner value.
                value = loop {
                    value = match value.downcast::<DeferredValue>() {
                        Ok(deferred) => deferred.0.await,
                        Err(value) => break value,
                    };
                };

                if context.hijacked().is_some() {
                    run_after_response_handlers(engine, route, context, None).await;
                    return Ok(DispatchOutcome {
                        response: None,
                        result: ExecutionResult::Hijacked,
                    });
                }

                match engine.router.registry().convert(value) {
                    Ok(converted) => response = Some(converted),
                    Err(_unconvertible) => {
                        log::error!("route '{}' returned a value with no registered action converter", route.name);
                        response = Some(engine.render_error(
                            StatusCode::InternalServerError,
                            Some("unregistered action type"),
                        ));
                        result = ExecutionResult::UnregisteredActionType;
                    }
                }
            }
            Err(error) => {
                return handler_failure(engine, host, context, error, route).await;
            }
        }
    }

    let mut response = response.expect("either a handler short-circuited or the action produced a response");

    // Post phase (after the action, before serialization): the route's
    // handlers first, then the global ones.
    if result != ExecutionResult::ShortCircuited {
        let post_handlers = route.post_handlers
            .iter()
            .chain(engine.router.global_handlers().iter())
            .filter(|handler| handler.phase() == handler::HandlerPhase::After);

        for entry in post_handlers {
            match invoke_handler(entry, context, Some(&mut response)).await {
                Ok(HandlerOutcome::Continue) => {}
                Ok(HandlerOutcome::ShortCircuit(handler_response)) => {
                    response = handler_response;
                }
                Err(error) => {
                    return handler_failure(engine, host, context, error, route).await;
                }
            }
        }
    }

    // CORS response headers never overwrite what the action set.
    if let Some(cors) = &host.cors {
        let origin = context.headers().get_str(&HeaderName::Origin).map(str::to_string);
        cors.apply(origin.as_deref(), &mut response);
    }

    let mut response = finish(engine, context, response);
    run_after_response_handlers(engine, route, context, Some(&mut response)).await;

    Ok(DispatchOutcome {
        response: Some(response),
        result,
    })
}

/// Stamp engine-level response headers that apply to every exchange.
fn finish(engine: &Engine, context: &RequestContext<'_>, mut response: Response) -> Response {
    if engine.settings.include_request_id_header {
        response.headers.set(HeaderName::XRequestId, HeaderValue::String(context.trace_id().to_string()));
    }
    response
}

async fn invoke_handler(
    handler: &Arc<dyn RequestHandler>,
    context: &mut RequestContext<'_>,
    response: Option<&mut Response>,
) -> Result<HandlerOutcome, anyhow::Error> {
    // Handlers may carry per-invocation state; every exchange works on its
    // own copy, like the rest of the pipeline.
    let mut handler = Arc::clone(handler);
    let handler = dyn_clone::arc_make_mut(&mut handler);
    handler.handle(context, response).await
}

/// `AfterResponse`-phase handlers always run, even after a short-circuit, a
/// hijack or an error response. Their outcome is ignored; a failure is
/// logged and does not affect the exchange.
async fn run_after_response_handlers(
    engine: &Engine,
    route: &Route,
    context: &mut RequestContext<'_>,
    mut response: Option<&mut Response>,
) {
    let handlers = route.post_handlers
        .iter()
        .chain(engine.router.global_handlers().iter())
        .filter(|handler| handler.phase() == handler::HandlerPhase::AfterResponse);

    for entry in handlers {
        if let Err(error) = invoke_handler(entry, context, response.as_deref_mut()).await {
            log::warn!("after-response handler failed: {error:#}");
        }
    }
}

async fn handler_failure(
    engine: &Engine,
    host: &HostBinding,
    context: &mut RequestContext<'_>,
    error: anyhow::Error,
    route: &Route,
) -> Result<DispatchOutcome, anyhow::Error> {
    if engine.settings.throw_exceptions {
        return Err(error);
    }

    engine.log_error(error.as_ref());

    // Body-access failures carry their own status mapping.
    let status = match error.downcast_ref::<BodyError>() {
        Some(BodyError::TooLarge) => StatusCode::ContentTooLarge,
        Some(BodyError::WrongMediaType(_))
        | Some(BodyError::Parse(_))
        | Some(BodyError::Multipart(_))
        | Some(BodyError::Json(_)) => StatusCode::BadRequest,
        _ => StatusCode::InternalServerError,
    };

    let detail = error.to_string();
    let mut response = engine.render_error(status, Some(&detail));

    if let Some(cors) = &host.cors {
        let origin = context.headers().get_str(&HeaderName::Origin).map(str::to_string);
        cors.apply(origin.as_deref(), &mut response);
    }

    let mut response = finish(engine, context, response);
    run_after_response_handlers(engine, route, context, Some(&mut response)).await;

    Ok(DispatchOutcome {
        response: Some(response),
        result: ExecutionResult::HandlerError,
    })
}
