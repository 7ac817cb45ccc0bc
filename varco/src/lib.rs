// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

//! varco is an HTTP/1.1 server framework: applications declare named
//! routes with pattern-matched paths and method sets, the engine accepts
//! connections, frames requests, runs the handler pipeline and serializes
//! responses — including streamed and chunked bodies, multipart ingestion,
//! Server-Sent Events and WebSocket upgrades.
//!
//! ```no_run
//! use std::sync::Arc;
//! use varco::{Engine, ListeningHost, ListeningPrefix, Method, MethodSet, Route, Router, Server, Settings};
//!
//! # struct Hello;
//! # #[async_trait::async_trait]
//! # impl varco::Action for Hello {
//! #     async fn invoke(&self, _context: &mut varco::RequestContext<'_>) -> Result<varco::ActionValue, anyhow::Error> {
//! #         Ok(Box::new("Hello, world!"))
//! #     }
//! # }
//! # async fn run() -> anyhow::Result<()> {
//! let mut router = Router::new();
//! router.map(Route::new("hello", MethodSet::single(Method::Get), "/hello", Arc::new(Hello))?)?;
//!
//! let mut server = Server::new(Engine::new(router, Settings::default()));
//! server.add_host(ListeningHost::new("public", vec![ListeningPrefix::parse("http://+:8080/")?]));
//! server.bind().await?;
//! server.start();
//! # Ok(()) }
//! ```

pub mod options;
pub mod prefix;
pub mod server;

pub use options::{OptionsError, ServerOptions, CONSOLE_STREAM};
pub use prefix::{ListeningPrefix, PrefixParseError, Scheme};
pub use server::{ListeningHost, Server};

pub use varco_handling::{
    dispatch,
    Action,
    ActionRegistry,
    ActionValue,
    BodyError,
    BodyFraming,
    CancelSignal,
    CorsPolicy,
    Deferred,
    DispatchOutcome,
    Engine,
    ErrorPages,
    ExecutionResult,
    Extensions,
    HandlerOutcome,
    HandlerPhase,
    Hijack,
    HostBinding,
    MetricsSnapshot,
    PathPattern,
    PatternError,
    RequestContext,
    RequestHandler,
    Route,
    Router,
    RouterError,
    ServerMetrics,
    Settings,
    UpgradeError,
};

pub use varco_handling::forwarded::{ForwardedInfo, ForwardedResolver, XForwardedResolver};
pub use varco_handling::sse::{Event, EventSource};

pub use varco_http::{
    Content,
    CookieJar,
    HeaderMap,
    HeaderName,
    HeaderValue,
    Method,
    MethodSet,
    MultipartError,
    MultipartReader,
    Part,
    RequestHead,
    RequestTarget,
    Response,
    SetCookie,
    StatusCode,
    StatusCodeClass,
};

pub use varco_logging::{
    access::AccessLogEvent,
    LogStream,
    LogStreamError,
    RotationPolicy,
};

pub use varco_web_sockets::{Message, WebSocket, WebSocketError, WebSocketState};
