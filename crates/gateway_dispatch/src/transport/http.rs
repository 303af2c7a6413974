//! One-shot HTTP transport.

use super::GatewayState;
use crate::auth::RequestAuth;
use crate::responses::ResponseEnvelope;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

impl IntoResponse for ResponseEnvelope {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// `POST /invoke`: dispatch the request body as one envelope.
pub async fn invoke(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> ResponseEnvelope {
    let request = RequestAuth::from(&headers);
    state.dispatcher().dispatch(&body, &request).await
}
