//! Persistent WebSocket transport.

use super::GatewayState;
use crate::auth::RequestAuth;
use crate::session::{ChannelError, Inbound, MessageChannel, run_session};
use async_trait::async_trait;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use log::debug;

/// [`MessageChannel`] over an upgraded WebSocket.
#[derive(Debug)]
pub struct WsChannel {
    socket: WebSocket,
}

impl WsChannel {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl MessageChannel for WsChannel {
    async fn recv(&mut self) -> Option<Result<Inbound, ChannelError>> {
        let frame = self.socket.recv().await?;
        Some(match frame {
            Ok(Message::Text(text)) => Ok(Inbound::Text(text)),
            Ok(Message::Binary(bytes)) => Ok(Inbound::Binary(bytes)),
            Ok(Message::Ping(_) | Message::Pong(_)) => Ok(Inbound::Control),
            Ok(Message::Close(_)) => Ok(Inbound::Close),
            Err(e) => Err(ChannelError::new(e.to_string())),
        })
    }

    async fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| ChannelError::new(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            debug!("close frame not delivered: {e}");
        }
    }
}

/// `GET /ws`: upgrade and serve a persistent session. Headers presented
/// with the upgrade request are the session's credentials.
pub async fn upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let request = RequestAuth::from(&headers);
    ws.on_upgrade(move |socket| async move {
        let mut channel = WsChannel::new(socket);
        let outcome = run_session(state.dispatcher(), &mut channel, &request).await;
        debug!("websocket session ended {outcome:?}");
    })
}
