//! Per-message dispatch: authenticate, decode, route, invoke.
//!
//! Every failure is turned into a [`ResponseEnvelope`] here; nothing a client
//! sends can end the dispatch loop. Handler panics are caught at the
//! [`Invocation::invoke`] boundary.

use crate::auth::{AuthContext, AuthError, RequestAuth};
use crate::envelope::{DecodeError, decode_envelope};
use crate::registry::{Handler, HandlerError, HandlerRegistry, RouteError};
use crate::responses::{ErrorCode, ResponseEnvelope};
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a message did not produce a handler result.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The caller failed the credential check.
    #[error("unauthorised: {0}")]
    Auth(#[from] AuthError),
    /// The payload was not a valid envelope.
    #[error("invalid payload: {0}")]
    Decode(#[from] DecodeError),
    /// No registered handler matches the envelope.
    #[error("unroutable: {0}")]
    Route(#[from] RouteError),
    /// The handler failed.
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// Wire code reported to the client.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(_) => ErrorCode::Unauthorized,
            Self::Decode(_) => ErrorCode::InvalidJsonPayload,
            Self::Route(_) => ErrorCode::HandlerNotSupported,
            Self::Handler(_) => ErrorCode::HandlerCallFailed,
        }
    }
}

/// Outcome counters for everything the dispatcher has answered.
#[derive(Debug, Default)]
pub struct DispatchStats {
    succeeded: AtomicU64,
    unauthorized: AtomicU64,
    invalid_payload: AtomicU64,
    unsupported_handler: AtomicU64,
    handler_failed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Messages answered with handler data.
    pub succeeded: u64,
    /// Messages or sessions rejected for credentials.
    pub unauthorized: u64,
    /// Messages that were not valid envelopes.
    pub invalid_payload: u64,
    /// Messages naming no registered handler.
    pub unsupported_handler: u64,
    /// Messages whose handler failed or panicked.
    pub handler_failed: u64,
}

impl StatsSnapshot {
    /// Total messages answered.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.succeeded
            + self.unauthorized
            + self.invalid_payload
            + self.unsupported_handler
            + self.handler_failed
    }
}

impl DispatchStats {
    /// Count one response.
    pub fn record(&self, response: &ResponseEnvelope) {
        let counter = match response.error_code() {
            None => &self.succeeded,
            Some(ErrorCode::Unauthorized) => &self.unauthorized,
            Some(ErrorCode::InvalidJsonPayload) => &self.invalid_payload,
            Some(ErrorCode::HandlerNotSupported) => &self.unsupported_handler,
            Some(_) => &self.handler_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counts.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            unauthorized: self.unauthorized.load(Ordering::Relaxed),
            invalid_payload: self.invalid_payload.load(Ordering::Relaxed),
            unsupported_handler: self.unsupported_handler.load(Ordering::Relaxed),
            handler_failed: self.handler_failed.load(Ordering::Relaxed),
        }
    }
}

/// A routed message ready to run.
pub struct Invocation {
    handler_name: String,
    handler: Arc<dyn Handler>,
    data: Value,
}

impl Invocation {
    /// Name of the resolved handler.
    #[must_use]
    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    /// Run the handler, converting a panic into a [`HandlerError`].
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or a [`HandlerError`] describing the
    /// panic.
    pub fn invoke(self) -> Result<Value, HandlerError> {
        let Self {
            handler_name,
            handler,
            data,
        } = self;
        panic::catch_unwind(AssertUnwindSafe(|| handler.call(data))).unwrap_or_else(|payload| {
            Err(HandlerError::new(format!(
                "handler `{handler_name}` panicked: {}",
                panic_message(payload.as_ref())
            )))
        })
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("handler_name", &self.handler_name)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Authenticates, decodes, routes and invokes messages against a frozen
/// handler registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    auth: AuthContext,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Freeze `registry` and build a dispatcher checking `auth`.
    #[must_use]
    pub fn new(registry: HandlerRegistry, auth: AuthContext) -> Self {
        Self {
            registry: Arc::new(registry),
            auth,
            stats: DispatchStats::default(),
        }
    }

    /// The credential requirements.
    #[must_use]
    pub const fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// The frozen handler registry.
    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Outcome counters.
    #[must_use]
    pub const fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Check the headers presented by a request or session.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Auth`] when the headers fail the check.
    pub fn authorize(&self, request: &RequestAuth) -> Result<(), DispatchError> {
        self.auth.verify_request(request).map_err(DispatchError::from)
    }

    /// Decode, check body credentials, and route one already-authorised
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`] encountered. No handler runs on
    /// error.
    pub fn prepare_message(&self, raw: &[u8]) -> Result<Invocation, DispatchError> {
        let envelope = decode_envelope(raw)?;
        self.auth.verify_envelope(&envelope)?;
        let handler = self.registry.resolve(envelope.handler())?;
        let handler_name = envelope.handler().unwrap_or_default().to_owned();
        Ok(Invocation {
            handler_name,
            handler,
            data: envelope.into_data(),
        })
    }

    /// Run the full check chain for a one-shot request.
    ///
    /// # Errors
    ///
    /// Returns the first [`DispatchError`] encountered. No handler runs on
    /// error.
    pub fn prepare(&self, raw: &[u8], request: &RequestAuth) -> Result<Invocation, DispatchError> {
        self.authorize(request)?;
        self.prepare_message(raw)
    }

    /// Dispatch a one-shot request on the calling thread.
    pub fn dispatch_blocking(&self, raw: &[u8], request: &RequestAuth) -> ResponseEnvelope {
        let result = self
            .prepare(raw, request)
            .and_then(|invocation| invocation.invoke().map_err(DispatchError::from));
        self.respond(result)
    }

    /// Dispatch a one-shot request, running the handler on the blocking pool
    /// so slow handlers do not stall other sessions.
    pub async fn dispatch(&self, raw: &[u8], request: &RequestAuth) -> ResponseEnvelope {
        match self.prepare(raw, request) {
            Ok(invocation) => self.run(invocation).await,
            Err(err) => self.respond(Err(err)),
        }
    }

    /// Run a prepared invocation on the blocking pool and build the
    /// response.
    pub async fn run(&self, invocation: Invocation) -> ResponseEnvelope {
        let name = invocation.handler_name().to_owned();
        let result = match tokio::task::spawn_blocking(move || invocation.invoke()).await {
            Ok(result) => result.map_err(DispatchError::from),
            Err(join) => Err(DispatchError::Handler(HandlerError::new(format!(
                "handler `{name}` did not complete: {join}"
            )))),
        };
        self.respond(result)
    }

    /// Turn a dispatch result into the response envelope, logging and
    /// counting it.
    pub fn respond(&self, result: Result<Value, DispatchError>) -> ResponseEnvelope {
        let response = match result {
            Ok(data) => ResponseEnvelope::success(data),
            Err(err) => {
                match &err {
                    DispatchError::Auth(_) => warn!("rejected caller: {err}"),
                    DispatchError::Handler(_) => error!("{err}"),
                    DispatchError::Decode(_) | DispatchError::Route(_) => debug!("{err}"),
                }
                ResponseEnvelope::failure(err.code())
            }
        };
        self.stats.record(&response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CredentialSource;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        dispatcher: Dispatcher,
        calls: Arc<AtomicUsize>,
    }

    #[fixture]
    fn guarded() -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        let counter = Arc::clone(&calls);
        registry
            .register("predict", move |data: Value| -> Result<Value, HandlerError> {
                counter.fetch_add(1, Ordering::SeqCst);
                if data == json!({"x": 1}) {
                    Ok(json!({"label": "cat"}))
                } else {
                    Ok(json!({"label": "unknown"}))
                }
            })
            .register("fail", |_: Value| -> Result<Value, HandlerError> {
                Err(HandlerError::new("model file unreadable"))
            })
            .register("explode", |_: Value| -> Result<Value, HandlerError> {
                panic!("index out of range")
            });
        let auth = AuthContext::new(CredentialSource::Headers)
            .require("Gateway-Client-ID", "client-1")
            .require("Gateway-Client-Secret", "s3cr3t");
        Fixture {
            dispatcher: Dispatcher::new(registry, auth),
            calls,
        }
    }

    fn authorised() -> RequestAuth {
        RequestAuth::from_pairs([
            ("Gateway-Client-ID", "client-1"),
            ("Gateway-Client-Secret", "s3cr3t"),
        ])
    }

    #[rstest]
    fn registered_handler_returns_its_value(guarded: Fixture) {
        let response = guarded
            .dispatcher
            .dispatch_blocking(br#"{"handler":"predict","data":{"x":1}}"#, &authorised());

        assert_eq!(response.to_json(), r#"{"ok":true,"data":{"label":"cat"}}"#);
        assert_eq!(guarded.calls.load(Ordering::SeqCst), 1);
    }

    #[rstest]
    #[case::missing(br#"{"data":{}}"#.as_slice())]
    #[case::unknown(br#"{"handler":"train"}"#.as_slice())]
    #[case::non_string(br#"{"handler":["predict"]}"#.as_slice())]
    #[case::null(b"null".as_slice())]
    fn unroutable_envelopes_are_unsupported(guarded: Fixture, #[case] raw: &[u8]) {
        let response = guarded.dispatcher.dispatch_blocking(raw, &authorised());
        assert_eq!(response, ResponseEnvelope::failure(ErrorCode::HandlerNotSupported));
    }

    #[rstest]
    #[case::garbage(b"{not json".as_slice())]
    #[case::array(b"[]".as_slice())]
    fn malformed_payloads_are_invalid(guarded: Fixture, #[case] raw: &[u8]) {
        let response = guarded.dispatcher.dispatch_blocking(raw, &authorised());
        assert_eq!(response.status(), 400);
        assert_eq!(response.error_code(), Some(ErrorCode::InvalidJsonPayload));
    }

    #[rstest]
    #[case::none(RequestAuth::none())]
    #[case::wrong_secret(RequestAuth::from_pairs([("Gateway-Client-ID", "client-1"), ("Gateway-Client-Secret", "guess")]))]
    fn failed_credentials_never_reach_the_handler(guarded: Fixture, #[case] request: RequestAuth) {
        let response = guarded
            .dispatcher
            .dispatch_blocking(br#"{"handler":"predict","data":{"x":1}}"#, &request);

        assert_eq!(response, ResponseEnvelope::failure(ErrorCode::Unauthorized));
        assert_eq!(response.status(), 401);
        assert_eq!(guarded.calls.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case::error("fail")]
    #[case::panic("explode")]
    fn handler_failures_are_contained(guarded: Fixture, #[case] name: &str) {
        let raw = format!(r#"{{"handler":"{name}"}}"#);
        let response = guarded.dispatcher.dispatch_blocking(raw.as_bytes(), &authorised());
        assert_eq!(response, ResponseEnvelope::failure(ErrorCode::HandlerCallFailed));

        let next = guarded
            .dispatcher
            .dispatch_blocking(br#"{"handler":"predict","data":{"x":1}}"#, &authorised());
        assert!(next.is_ok());
    }

    #[rstest]
    fn stats_count_each_outcome(guarded: Fixture) {
        let dispatcher = &guarded.dispatcher;
        dispatcher.dispatch_blocking(br#"{"handler":"predict"}"#, &authorised());
        dispatcher.dispatch_blocking(b"nope", &authorised());
        dispatcher.dispatch_blocking(br#"{"handler":"train"}"#, &authorised());
        dispatcher.dispatch_blocking(br#"{"handler":"fail"}"#, &authorised());
        dispatcher.dispatch_blocking(br#"{"handler":"predict"}"#, &RequestAuth::none());

        let stats = dispatcher.stats().snapshot();
        assert_eq!(
            stats,
            StatsSnapshot {
                succeeded: 1,
                unauthorized: 1,
                invalid_payload: 1,
                unsupported_handler: 1,
                handler_failed: 1,
            }
        );
        assert_eq!(stats.total(), 5);
    }

    #[rstest]
    #[tokio::test]
    async fn async_dispatch_runs_handlers_off_the_runtime(guarded: Fixture) {
        let response = guarded
            .dispatcher
            .dispatch(br#"{"handler":"predict","data":{"x":1}}"#, &authorised())
            .await;
        assert_eq!(response, ResponseEnvelope::success(json!({"label": "cat"})));

        let panicked = guarded
            .dispatcher
            .dispatch(br#"{"handler":"explode"}"#, &authorised())
            .await;
        assert_eq!(panicked.error_code(), Some(ErrorCode::HandlerCallFailed));
    }

    #[test]
    fn body_credentials_are_checked_per_message() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |data: Value| -> Result<Value, HandlerError> { Ok(data) });
        let auth = AuthContext::new(CredentialSource::Body {
            field: "auth".to_owned(),
        })
        .require("client_id", "client-1");
        let dispatcher = Dispatcher::new(registry, auth);

        let ok = dispatcher.dispatch_blocking(
            br#"{"handler":"echo","data":3,"auth":{"client_id":"client-1"}}"#,
            &RequestAuth::none(),
        );
        let rejected =
            dispatcher.dispatch_blocking(br#"{"handler":"echo","data":3}"#, &RequestAuth::none());

        assert_eq!(ok, ResponseEnvelope::success(json!(3)));
        assert_eq!(rejected.error_code(), Some(ErrorCode::Unauthorized));
    }
}
