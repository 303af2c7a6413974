//! Persistent session loop.
//!
//! A session moves `Opened → Authenticating → {Authenticated, Rejected}` and
//! ends `Closed` (or stays `Rejected`). A rejected session receives a single
//! `unauthorized` envelope. An authenticated session answers every message
//! until the peer closes the channel or the channel fails; a bad message
//! never ends it. With body credentials each message is checked and one
//! failure rejects the whole session.

use crate::auth::RequestAuth;
use crate::dispatcher::{DispatchError, Dispatcher};
use crate::responses::ErrorCode;
use async_trait::async_trait;
use log::{debug, warn};

/// Lifecycle of one persistent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// The channel is open and nothing has been checked.
    Opened,
    /// Credentials are being checked.
    Authenticating,
    /// The caller passed and messages are being served.
    Authenticated,
    /// The caller failed the credential check. Terminal.
    Rejected,
    /// The channel closed after serving. Terminal.
    Closed,
}

impl SessionState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Closed)
    }
}

/// One inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text message.
    Text(String),
    /// A binary message, treated as raw JSON bytes.
    Binary(Vec<u8>),
    /// A transport-level frame with no payload (ping, pong).
    Control,
    /// The peer closed the channel.
    Close,
}

/// Transport failure on a persistent channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("channel failure: {reason}")]
pub struct ChannelError {
    reason: String,
}

impl ChannelError {
    /// Create a channel error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A bidirectional message channel carrying JSON text.
#[async_trait]
pub trait MessageChannel: Send {
    /// Wait for the next inbound frame; `None` once the channel is gone.
    async fn recv(&mut self) -> Option<Result<Inbound, ChannelError>>;

    /// Send one text message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the write fails.
    async fn send(&mut self, text: String) -> Result<(), ChannelError>;

    /// Close the channel from this side. Failures are ignored.
    async fn close(&mut self);
}

/// Serve one persistent session on `channel` and return its final state.
pub async fn run_session<C>(dispatcher: &Dispatcher, channel: &mut C, request: &RequestAuth) -> SessionState
where
    C: MessageChannel + ?Sized,
{
    let mut state = SessionState::Opened;
    debug!("session {state:?}");

    state = SessionState::Authenticating;
    debug!("session {state:?}");
    if let Err(err) = dispatcher.authorize(request) {
        return reject(dispatcher, channel, err).await;
    }
    state = SessionState::Authenticated;
    debug!("session {state:?}");

    while let Some(frame) = channel.recv().await {
        let raw = match frame {
            Ok(Inbound::Text(text)) => text.into_bytes(),
            Ok(Inbound::Binary(bytes)) => bytes,
            Ok(Inbound::Control) => continue,
            Ok(Inbound::Close) => break,
            Err(err) => {
                warn!("ending session: {err}");
                break;
            }
        };

        let response = match dispatcher.prepare_message(&raw) {
            Ok(invocation) => dispatcher.run(invocation).await,
            Err(err @ DispatchError::Auth(_)) => return reject(dispatcher, channel, err).await,
            Err(err) => dispatcher.respond(Err(err)),
        };

        if let Err(err) = channel.send(response.to_json()).await {
            warn!("ending session: {err}");
            break;
        }
    }

    state = SessionState::Closed;
    debug!("session {state:?}");
    state
}

async fn reject<C>(dispatcher: &Dispatcher, channel: &mut C, err: DispatchError) -> SessionState
where
    C: MessageChannel + ?Sized,
{
    let response = dispatcher.respond(Err(err));
    debug_assert_eq!(response.error_code(), Some(ErrorCode::Unauthorized));
    if let Err(send_err) = channel.send(response.to_json()).await {
        debug!("could not deliver rejection: {send_err}");
    }
    channel.close().await;
    SessionState::Rejected
}

/// An in-memory [`MessageChannel`] fed from a script of inbound frames.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    inbound: std::collections::VecDeque<Result<Inbound, ChannelError>>,
    sent: Vec<String>,
    closed: bool,
}

impl ScriptedChannel {
    /// Create a channel that yields `frames` and then reports end of stream.
    pub fn new(frames: impl IntoIterator<Item = Result<Inbound, ChannelError>>) -> Self {
        Self {
            inbound: frames.into_iter().collect(),
            sent: Vec::new(),
            closed: false,
        }
    }

    /// Create a channel that yields each string as a text frame.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|text| Ok(Inbound::Text(text.into()))))
    }

    /// Messages sent so far.
    #[must_use]
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Whether this side closed the channel.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

#[async_trait]
impl MessageChannel for ScriptedChannel {
    async fn recv(&mut self) -> Option<Result<Inbound, ChannelError>> {
        if self.closed {
            return None;
        }
        self.inbound.pop_front()
    }

    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::new("channel closed"));
        }
        self.sent.push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthContext, CredentialSource};
    use crate::registry::{HandlerError, HandlerRegistry};
    use rstest::{fixture, rstest};
    use serde_json::Value;

    const UNAUTHORIZED: &str = r#"{"ok":false,"status":401,"error":"unauthorized"}"#;
    const INVALID: &str = r#"{"ok":false,"status":400,"error":"invalid_json_payload"}"#;
    const UNSUPPORTED: &str = r#"{"ok":false,"status":400,"error":"handler_not_supported"}"#;

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |data: Value| -> Result<Value, HandlerError> { Ok(data) });
        registry
    }

    #[fixture]
    fn header_dispatcher() -> Dispatcher {
        let auth = AuthContext::new(CredentialSource::Headers).require("Gateway-Client-ID", "c1");
        Dispatcher::new(registry(), auth)
    }

    #[rstest]
    #[tokio::test]
    async fn rejected_session_gets_one_envelope(header_dispatcher: Dispatcher) {
        let mut channel = ScriptedChannel::from_texts([r#"{"handler":"echo","data":1}"#]);

        let state = run_session(&header_dispatcher, &mut channel, &RequestAuth::none()).await;

        assert_eq!(state, SessionState::Rejected);
        assert_eq!(channel.sent(), [UNAUTHORIZED]);
        assert!(channel.is_closed());
    }

    #[rstest]
    #[tokio::test]
    async fn bad_messages_do_not_end_the_session(header_dispatcher: Dispatcher) {
        let mut channel = ScriptedChannel::from_texts([
            "{oops",
            r#"{"handler":"missing"}"#,
            r#"{"handler":"echo","data":{"x":1}}"#,
        ]);
        let request = RequestAuth::from_pairs([("Gateway-Client-ID", "c1")]);

        let state = run_session(&header_dispatcher, &mut channel, &request).await;

        assert_eq!(state, SessionState::Closed);
        assert!(state.is_terminal());
        assert_eq!(
            channel.sent(),
            [INVALID, UNSUPPORTED, r#"{"ok":true,"data":{"x":1}}"#]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn control_frames_are_skipped_and_close_ends(header_dispatcher: Dispatcher) {
        let mut channel = ScriptedChannel::new([
            Ok(Inbound::Control),
            Ok(Inbound::Binary(br#"{"handler":"echo","data":2}"#.to_vec())),
            Ok(Inbound::Close),
            Ok(Inbound::Text(r#"{"handler":"echo","data":3}"#.to_owned())),
        ]);
        let request = RequestAuth::from_pairs([("Gateway-Client-ID", "c1")]);

        let state = run_session(&header_dispatcher, &mut channel, &request).await;

        assert_eq!(state, SessionState::Closed);
        assert_eq!(channel.sent(), [r#"{"ok":true,"data":2}"#]);
    }

    #[rstest]
    #[tokio::test]
    async fn channel_errors_close_the_session(header_dispatcher: Dispatcher) {
        let mut channel = ScriptedChannel::new([
            Err(ChannelError::new("connection reset")),
            Ok(Inbound::Text(r#"{"handler":"echo","data":3}"#.to_owned())),
        ]);
        let request = RequestAuth::from_pairs([("Gateway-Client-ID", "c1")]);

        let state = run_session(&header_dispatcher, &mut channel, &request).await;

        assert_eq!(state, SessionState::Closed);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn body_credentials_reject_on_first_bad_message() {
        let auth = AuthContext::new(CredentialSource::Body {
            field: "auth".to_owned(),
        })
        .require("client_id", "c1");
        let dispatcher = Dispatcher::new(registry(), auth);
        let mut channel = ScriptedChannel::from_texts([
            r#"{"handler":"echo","data":1,"auth":{"client_id":"c1"}}"#,
            r#"{"handler":"echo","data":2,"auth":{"client_id":"c2"}}"#,
            r#"{"handler":"echo","data":3,"auth":{"client_id":"c1"}}"#,
        ]);

        let state = run_session(&dispatcher, &mut channel, &RequestAuth::none()).await;

        assert_eq!(state, SessionState::Rejected);
        assert_eq!(channel.sent(), [r#"{"ok":true,"data":1}"#, UNAUTHORIZED]);
        assert_eq!(dispatcher.stats().snapshot().unauthorized, 1);
    }

    #[test]
    fn only_rejected_and_closed_are_terminal() {
        assert!(!SessionState::Opened.is_terminal());
        assert!(!SessionState::Authenticating.is_terminal());
        assert!(!SessionState::Authenticated.is_terminal());
    }
}
