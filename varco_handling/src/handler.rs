// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use async_trait::async_trait;
use dyn_clone::DynClone;

use hashbrown::HashMap;

use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;

use varco_http::{Content, Response, StatusCode};

use crate::context::RequestContext;

/// When, relative to the route action, a request-handler runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandlerPhase {
    /// Before the action. May short-circuit with a response of its own.
    Before,

    /// After the action, with mutable access to the produced response.
    After,

    /// After the response has been determined. Always runs, even when an
    /// earlier handler short-circuited; meant for logging and metrics.
    AfterResponse,
}

/// Whether a handler produced a response of its own.
#[derive(Debug)]
pub enum HandlerOutcome {
    Continue,
    ShortCircuit(Response),
}

/// A middleware-style step in the handling of a request.
///
/// Handlers must be clone'able so that multiple requests can run through
/// them concurrently: each exchange works on its own copy.
#[async_trait]
pub trait RequestHandler: DynClone + Send + Sync {
    /// The name used to identify the source of errors in diagnostics.
    fn debug_identifier(&self) -> &str {
        "request-handler"
    }

    fn phase(&self) -> HandlerPhase {
        HandlerPhase::Before
    }

    /// Invoke the handler. `response` carries the response produced so far
    /// for `After`/`AfterResponse` phases, and is `None` before the action
    /// ran.
    async fn handle(
        &mut self,
        context: &mut RequestContext<'_>,
        response: Option<&mut Response>,
    ) -> Result<HandlerOutcome, anyhow::Error>;
}

dyn_clone::clone_trait_object!(RequestHandler);

/// The function producing the primary response of a route.
///
/// Actions return any value; a [`ActionRegistry`] converter turns it into a
/// [`Response`] after the fact.
#[async_trait]
pub trait Action: Send + Sync {
    async fn invoke(&self, context: &mut RequestContext<'_>) -> Result<ActionValue, anyhow::Error>;
}

/// The type-erased value an action produced.
pub type ActionValue = Box<dyn Any + Send>;

/// An action result that still needs awaiting; the dispatcher awaits it and
/// re-dispatches on the inner value.
pub struct Deferred(pub Pin<Box<dyn Future<Output = ActionValue> + Send>>);

impl Deferred {
    #[must_use]
    pub fn new(future: impl Future<Output = ActionValue> + Send + 'static) -> Self {
        Self(Box::pin(future))
    }
}

type Converter = Box<dyn Fn(ActionValue) -> Response + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    /// The identity conversion for `Response` is built in and cannot be
    /// replaced.
    ResponseConverterReserved,
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("the Response conversion is built-in and cannot be replaced")
    }
}

impl std::error::Error for RegistryError {}

/// Maps the concrete type of an action's return value to the conversion
/// that yields a wire response.
pub struct ActionRegistry {
    converters: HashMap<TypeId, Converter>,
}

impl ActionRegistry {
    /// A registry with the built-in conversions: `Response` (identity),
    /// `String` and `&'static str` (plain text), `Vec<u8>` (octet stream)
    /// and [`Content`].
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            converters: HashMap::new(),
        };

        registry.insert::<String>(|text| Response::with_status_and_content(StatusCode::Ok, Content::text(text)));
        registry.insert::<&'static str>(|text| Response::with_status_and_content(StatusCode::Ok, Content::text(text)));
        registry.insert::<Vec<u8>>(|data| Response::with_status_and_content(StatusCode::Ok, Content::bytes(data)));
        registry.insert::<Content>(|content| Response::with_status_and_content(StatusCode::Ok, content));

        registry
    }

    /// Register a conversion for action results of type `T`, replacing any
    /// previous one. Registering a converter for [`Response`] itself is
    /// forbidden.
    pub fn register<T: Send + 'static>(
        &mut self,
        convert: impl Fn(T) -> Response + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        if TypeId::of::<T>() == TypeId::of::<Response>() {
            return Err(RegistryError::ResponseConverterReserved);
        }
        self.insert(convert);
        Ok(())
    }

    fn insert<T: Send + 'static>(&mut self, convert: impl Fn(T) -> Response + Send + Sync + 'static) {
        self.converters.insert(
            TypeId::of::<T>(),
            Box::new(move |value| {
                // The registry key guarantees the downcast succeeds.
                let value = value.downcast::<T>().expect("converter registered under wrong TypeId");
                convert(*value)
            }),
        );
    }

    /// Turn an action value into a response. `Err` carries the value back
    /// when its type has no registered conversion.
    pub fn convert(&self, value: ActionValue) -> Result<Response, ActionValue> {
        let value = match value.downcast::<Response>() {
            Ok(response) => return Ok(*response),
            Err(value) => value,
        };

        let type_id = value.as_ref().type_id();
        match self.converters.get(&type_id) {
            Some(converter) => Ok(converter(value)),
            None => Err(value),
        }
    }

    /// Whether values of this type can be converted.
    #[must_use]
    pub fn supports(&self, type_id: TypeId) -> bool {
        type_id == TypeId::of::<Response>() || self.converters.contains_key(&type_id)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_conversions() {
        let registry = ActionRegistry::new();

        let response = registry.convert(Box::new("static text")).unwrap();
        assert_eq!(response.status, StatusCode::Ok);

        let response = registry.convert(Box::new(String::from("owned"))).unwrap();
        assert_eq!(response.content.as_ref().unwrap().length(), Some(5));

        let response = registry.convert(Box::new(vec![0u8, 1, 2])).unwrap();
        assert_eq!(response.content.as_ref().unwrap().media_type(), "application/octet-stream");
    }

    #[test]
    fn response_identity_is_builtin() {
        let registry = ActionRegistry::new();
        let response = registry
            .convert(Box::new(Response::with_status(StatusCode::Accepted)))
            .unwrap();
        assert_eq!(response.status, StatusCode::Accepted);
    }

    #[test]
    fn response_converter_cannot_be_replaced() {
        let mut registry = ActionRegistry::new();
        let result = registry.register::<Response>(|response| response);
        assert_eq!(result, Err(RegistryError::ResponseConverterReserved));
    }

    #[test]
    fn custom_types_convert_after_registration() {
        struct Report {
            summary: &'static str,
        }

        let mut registry = ActionRegistry::new();
        assert!(registry.convert(Box::new(Report { summary: "x" })).is_err());

        registry.register::<Report>(|report| Response::ok(report.summary)).unwrap();
        let response = registry.convert(Box::new(Report { summary: "fine" })).unwrap();
        assert_eq!(response.status, StatusCode::Ok);
    }
}
