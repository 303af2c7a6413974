//! Authenticated request dispatch.
//!
//! Clients send envelopes `{"handler": <name>, "data": <any>}` over a
//! one-shot HTTP request or a persistent WebSocket session. The
//! [`Dispatcher`] checks static credentials, decodes the envelope, routes it
//! to a registered [`Handler`], and answers with a [`ResponseEnvelope`].
//! Failures of any kind become fixed error envelopes; nothing a client sends
//! can stop the gateway serving.
//!
//! # Modules
//!
//! - [`auth`] - Static header or body credentials
//! - [`control`] - Operator reload and status routes
//! - [`dispatcher`] - Per-message dispatch and outcome counters
//! - [`envelope`] - Envelope decoding
//! - [`registry`] - Handler registration and lookup
//! - [`responses`] - Response envelopes and error codes
//! - [`session`] - Persistent session state machine
//! - [`transport`] - axum routes for HTTP, WebSocket and control traffic

pub mod auth;
pub mod control;
pub mod dispatcher;
pub mod envelope;
pub mod registry;
pub mod responses;
pub mod session;
pub mod transport;

pub use auth::{AuthContext, AuthError, CredentialSource, RequestAuth};
pub use control::{CONTROL_SECRET_HEADER, ControlPlane};
pub use dispatcher::{DispatchError, DispatchStats, Dispatcher, Invocation, StatsSnapshot};
pub use envelope::{DecodeError, Envelope, decode_envelope};
pub use registry::{Handler, HandlerError, HandlerRegistry, RouteError};
pub use responses::{ErrorCode, ResponseEnvelope};
pub use session::{ChannelError, Inbound, MessageChannel, ScriptedChannel, SessionState, run_session};
pub use transport::{GatewayState, router};
