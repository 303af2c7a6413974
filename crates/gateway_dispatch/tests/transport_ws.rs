//! WebSocket sessions against a router served on a real socket.

use futures_util::{SinkExt, StreamExt};
use gateway_dispatch::{
    AuthContext, CredentialSource, Dispatcher, GatewayState, HandlerError, HandlerRegistry, router,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const PREDICT: &str = r#"{"handler":"predict","data":{"x":1}}"#;

fn state() -> GatewayState {
    let mut registry = HandlerRegistry::new();
    registry.register("predict", |data: Value| -> Result<Value, HandlerError> {
        Ok(json!({"label": "cat", "input": data}))
    });
    let auth = AuthContext::new(CredentialSource::Headers)
        .require("Gateway-Client-ID", "client-1")
        .require("Gateway-Client-Secret", "s3cr3t");
    GatewayState::new(Arc::new(Dispatcher::new(registry, auth)))
}

async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local address");
    tokio::spawn(async move {
        axum::serve(listener, router(state())).await.expect("serve");
    });
    addr
}

async fn connect(addr: SocketAddr, credentials: bool) -> Client {
    let mut request = format!("ws://{addr}/ws")
        .into_client_request()
        .expect("client request");
    if credentials {
        let headers = request.headers_mut();
        headers.insert("gateway-client-id", HeaderValue::from_static("client-1"));
        headers.insert("gateway-client-secret", HeaderValue::from_static("s3cr3t"));
    }
    let (socket, _) = connect_async(request).await.expect("handshake");
    socket
}

async fn next_envelope(socket: &mut Client) -> Value {
    loop {
        match socket.next().await.expect("frame").expect("readable frame") {
            Message::Text(text) => return serde_json::from_str(&text).expect("JSON envelope"),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn send(socket: &mut Client, text: &str) {
    socket
        .send(Message::Text(text.to_owned()))
        .await
        .expect("send frame");
}

#[tokio::test]
async fn authenticated_session_answers_every_message() {
    let addr = serve().await;
    let mut socket = connect(addr, true).await;

    send(&mut socket, PREDICT).await;
    assert_eq!(
        next_envelope(&mut socket).await,
        json!({"ok": true, "data": {"label": "cat", "input": {"x": 1}}})
    );

    send(&mut socket, r#"{"handler":"train"}"#).await;
    assert_eq!(
        next_envelope(&mut socket).await,
        json!({"ok": false, "status": 400, "error": "handler_not_supported"})
    );

    send(&mut socket, PREDICT).await;
    assert_eq!(next_envelope(&mut socket).await["ok"], true);
    socket.close(None).await.expect("close");
}

#[tokio::test]
async fn session_without_credentials_is_rejected_then_closed() {
    let addr = serve().await;
    let mut socket = connect(addr, false).await;

    assert_eq!(
        next_envelope(&mut socket).await,
        json!({"ok": false, "status": 401, "error": "unauthorized"})
    );
    let frame = socket.next().await;
    assert!(
        matches!(frame, Some(Ok(Message::Close(_))) | None),
        "expected close, got {frame:?}"
    );
}

#[tokio::test]
async fn malformed_message_does_not_end_the_session() {
    let addr = serve().await;
    let mut socket = connect(addr, true).await;

    send(&mut socket, "{").await;
    assert_eq!(
        next_envelope(&mut socket).await,
        json!({"ok": false, "status": 400, "error": "invalid_json_payload"})
    );

    send(&mut socket, PREDICT).await;
    assert_eq!(
        next_envelope(&mut socket).await["data"]["label"],
        "cat"
    );
    socket.close(None).await.expect("close");
}
