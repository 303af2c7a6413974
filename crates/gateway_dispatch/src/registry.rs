//! Handler registration and lookup.
//!
//! Handlers are registered while the gateway starts. Building a
//! [`Dispatcher`](crate::Dispatcher) moves the registry behind an `Arc`, after
//! which it is read-only, so every request sees the same set of handlers.

use log::warn;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Error raised by a handler. Clients only ever see `handler_call_failed`;
/// the reason is logged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct HandlerError {
    reason: String,
}

impl HandlerError {
    /// Create a handler error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// The failure reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A named operation invoked with the envelope's `data`.
///
/// Handlers run on a blocking worker thread and may read the live artefact.
pub trait Handler: Send + Sync {
    /// Produce a response value for `data`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the input cannot be processed.
    fn call(&self, data: Value) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Value) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, data: Value) -> Result<Value, HandlerError> {
        self(data)
    }
}

/// Reasons an envelope cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    /// The envelope named no handler.
    #[error("envelope names no handler")]
    MissingHandler,

    /// The named handler is not registered.
    #[error("handler `{name}` is not registered")]
    UnknownHandler {
        /// Requested handler name.
        name: String,
    },
}

/// Maps handler names to handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        let name = name.into();
        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            warn!("handler `{name}` registered twice; the later registration wins");
        }
        self
    }

    /// Look up the handler for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when `name` is absent or unregistered.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Handler>, RouteError> {
        let name = name.ok_or(RouteError::MissingHandler)?;
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| RouteError::UnknownHandler {
                name: name.to_owned(),
            })
    }

    /// Registered handler names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
