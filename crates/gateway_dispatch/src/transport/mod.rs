//! Network transports over the dispatcher.
//!
//! - `POST /invoke`: one envelope per HTTP request, answered with one
//!   envelope and the matching status code.
//! - `GET /ws`: a WebSocket session carrying many envelopes.
//! - `POST /control/reload`, `GET /control/status`: operator routes, mounted
//!   only when a [`ControlPlane`] is configured.

pub mod http;
pub mod ws;

use crate::control::{self, ControlPlane};
use crate::dispatcher::Dispatcher;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Shared state handed to every route.
#[derive(Debug, Clone)]
pub struct GatewayState {
    dispatcher: Arc<Dispatcher>,
    control: Option<Arc<ControlPlane>>,
}

impl GatewayState {
    /// State serving client traffic only.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            control: None,
        }
    }

    /// Enable the control routes.
    #[must_use]
    pub fn with_control(mut self, control: Arc<ControlPlane>) -> Self {
        self.control = Some(control);
        self
    }

    /// The dispatcher answering client messages.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The control plane, when enabled.
    #[must_use]
    pub fn control(&self) -> Option<&Arc<ControlPlane>> {
        self.control.as_ref()
    }
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    let mut router = Router::new()
        .route("/invoke", post(http::invoke))
        .route("/ws", get(ws::upgrade));
    if state.control.is_some() {
        router = router
            .route("/control/reload", post(control::reload_route))
            .route("/control/status", get(control::status_route));
    }
    router.with_state(state)
}
