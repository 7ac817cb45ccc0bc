// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use strum_macros::AsRefStr;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use varco_http::{Method, MethodSet};

use crate::handler::{Action, ActionRegistry, RequestHandler};
use crate::pattern::{PathPattern, PatternError, Segment};

/// A fully specified endpoint.
pub struct Route {
    pub name: String,
    pub methods: MethodSet,
    pub pattern: PathPattern,
    pub action: Arc<dyn Action>,

    /// Handlers that run before the action, in registration order.
    pub pre_handlers: Vec<Arc<dyn RequestHandler>>,

    /// Handlers that run after the action (including the always-running
    /// after-response phase), in registration order.
    pub post_handlers: Vec<Arc<dyn RequestHandler>>,

    /// Restrict the route to requests whose `Host` matches.
    pub host: Option<String>,

    /// A free-form grouping label, used only for diagnostics.
    pub group: Option<String>,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        methods: impl Into<MethodSet>,
        pattern: &str,
        action: Arc<dyn Action>,
    ) -> Result<Self, PatternError> {
        Ok(Self {
            name: name.into(),
            methods: methods.into(),
            pattern: PathPattern::parse(pattern)?,
            action,
            pre_handlers: Vec::new(),
            post_handlers: Vec::new(),
            host: None,
            group: None,
        })
    }

    #[must_use]
    pub fn with_pre_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.pre_handlers.push(handler);
        self
    }

    #[must_use]
    pub fn with_post_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.post_handlers.push(handler);
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, AsRefStr)]
pub enum RouterError {
    /// The server already started; the route table is read-only.
    RouterFrozen,

    InvalidPattern(PatternError),
}

impl From<PatternError> for RouterError {
    fn from(value: PatternError) -> Self {
        Self::InvalidPattern(value)
    }
}

impl std::fmt::Display for RouterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RouterFrozen => f.write_str("the router is frozen once the server has started"),
            Self::InvalidPattern(error) => write!(f, "invalid route pattern: {error}"),
        }
    }
}

impl std::error::Error for RouterError {}

/// The result of matching one request against the route table.
pub enum MatchOutcome<'router> {
    Matched {
        route: &'router Route,
        params: Vec<(String, String)>,
    },

    NotFound,

    /// At least one pattern matched the path, but none matched the method.
    /// Carries the union of the matching routes' methods for `Allow`.
    MethodNotAllowed { allow: Vec<Method> },
}

/// The route table plus the global handler chain and the action-result
/// conversion registry. Registration is only possible until the server
/// starts; afterwards the router is frozen and shared read-only between
/// connections.
pub struct Router {
    routes: Vec<Route>,
    global_handlers: Vec<Arc<dyn RequestHandler>>,
    registry: ActionRegistry,
    case_insensitive: bool,
    frozen: AtomicBool,
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            global_handlers: Vec::new(),
            registry: ActionRegistry::new(),
            case_insensitive: false,
            frozen: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_case_insensitive_matching(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    /// Register a route. Collisions (an earlier route with an equal method
    /// set and pattern shape) are legal but deterministic — the earlier
    /// registration wins — and are logged on registration.
    pub fn map(&mut self, route: Route) -> Result<(), RouterError> {
        self.check_unfrozen()?;

        for existing in &self.routes {
            if existing.pattern.shape() == route.pattern.shape()
                && existing.methods == route.methods
                && existing.host == route.host
            {
                log::warn!(
                    "route '{}' collides with earlier route '{}' ({}); the earlier route wins",
                    route.name,
                    existing.name,
                    existing.pattern.shape(),
                );
            }
        }

        self.routes.push(route);
        Ok(())
    }

    /// Register a global request-handler; it applies to every route.
    pub fn add_handler(&mut self, handler: Arc<dyn RequestHandler>) -> Result<(), RouterError> {
        self.check_unfrozen()?;
        self.global_handlers.push(handler);
        Ok(())
    }

    pub fn registry_mut(&mut self) -> Result<&mut ActionRegistry, RouterError> {
        self.check_unfrozen()?;
        Ok(&mut self.registry)
    }

    #[must_use]
    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn global_handlers(&self) -> &[Arc<dyn RequestHandler>] {
        &self.global_handlers
    }

    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Make the table read-only. Called when the server starts.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn check_unfrozen(&self) -> Result<(), RouterError> {
        if self.is_frozen() {
            return Err(RouterError::RouterFrozen);
        }
        Ok(())
    }

    /// The concrete path of a named route, usable as a redirect target.
    /// Only literal-pattern routes that answer to `GET` have one.
    #[must_use]
    pub fn path_of(&self, route_name: &str) -> Option<String> {
        let route = self.routes.iter().find(|route| {
            route.name == route_name && route.methods.contains(&Method::Get)
        })?;

        let PathPattern::Segments(segments) = &route.pattern else {
            return None;
        };

        let mut path = String::new();
        for segment in segments {
            let Segment::Literal(literal) = segment else {
                return None;
            };
            path.push('/');
            path.push_str(literal);
        }
        if path.is_empty() {
            path.push('/');
        }
        Some(path)
    }

    /// Match a request. Method-specific routes are considered before
    /// `any`-method routes; within each class the first registered match
    /// wins.
    #[must_use]
    pub fn match_route(&self, method: &Method, path: &str, host: Option<&str>) -> MatchOutcome<'_> {
        let mut any_method_match: Option<(&Route, Vec<(String, String)>)> = None;
        let mut allow: Vec<Method> = Vec::new();
        let mut path_matched = false;

        for route in &self.routes {
            if let Some(required_host) = &route.host {
                let Some(host) = host else { continue };
                if !host_matches(required_host, host) {
                    continue;
                }
            }

            let Some(params) = route.pattern.matches(path, self.case_insensitive) else {
                continue;
            };
            path_matched = true;

            if route.methods.contains(method) {
                if route.methods.is_any() {
                    if any_method_match.is_none() {
                        any_method_match = Some((route, params));
                    }
                    continue;
                }
                return MatchOutcome::Matched { route, params };
            }

            for allowed in route.methods.members() {
                if !allow.contains(allowed) {
                    allow.push(allowed.clone());
                }
            }
        }

        if let Some((route, params)) = any_method_match {
            return MatchOutcome::Matched { route, params };
        }

        if path_matched {
            return MatchOutcome::MethodNotAllowed { allow };
        }

        MatchOutcome::NotFound
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare a route's host constraint to the request authority, ignoring any
/// port in the authority.
fn host_matches(required: &str, authority: &str) -> bool {
    let host = authority.rsplit_once(':')
        .map(|(host, port)| if port.bytes().all(|byte| byte.is_ascii_digit()) { host } else { authority })
        .unwrap_or(authority);
    required.eq_ignore_ascii_case(host)
}
