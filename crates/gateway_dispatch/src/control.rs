//! Operator control interface.
//!
//! `POST /control/reload` re-runs the fetch pipeline for the configured
//! artefact and `GET /control/status` reports what is installed, what is
//! loaded and how many messages have been answered. Both authenticate with a
//! shared secret separate from client credentials. Reload triggers are
//! serialised by the installer's fetch slot: a trigger arriving while a fetch
//! runs is answered `reload_in_progress`.

use crate::auth::{AuthContext, AuthError, CredentialSource, RequestAuth};
use crate::responses::{ErrorCode, ResponseEnvelope};
use crate::transport::GatewayState;
use axum::extract::State;
use axum::http::HeaderMap;
use gateway_fetch::{ArtefactInstaller, ArtefactReloader, FetchError, FetchOutcome, RetryPolicy};
use log::{error, info, warn};
use serde_json::{Value, json};
use std::sync::Arc;

/// Default header carrying the control secret.
pub const CONTROL_SECRET_HEADER: &str = "Gateway-Control-Secret";

/// Reload and status operations for one artefact.
pub struct ControlPlane {
    auth: AuthContext,
    installer: Arc<ArtefactInstaller>,
    reloader: Arc<dyn ArtefactReloader + Send + Sync>,
    retry: RetryPolicy,
}

impl ControlPlane {
    /// Create a control plane guarded by `secret` in
    /// [`CONTROL_SECRET_HEADER`].
    #[must_use]
    pub fn new(
        secret: impl Into<String>,
        installer: Arc<ArtefactInstaller>,
        reloader: Arc<dyn ArtefactReloader + Send + Sync>,
    ) -> Self {
        Self {
            auth: AuthContext::new(CredentialSource::Headers).require(CONTROL_SECRET_HEADER, secret),
            installer,
            reloader,
            retry: RetryPolicy::once(),
        }
    }

    /// Retry transient fetch failures during a reload with `retry`.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The installer reloads run through.
    #[must_use]
    pub fn installer(&self) -> &ArtefactInstaller {
        &self.installer
    }

    /// Check the control secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the secret header is absent or wrong.
    pub fn authorize(&self, request: &RequestAuth) -> Result<(), AuthError> {
        self.auth.verify_request(request)
    }

    /// Run the fetch pipeline on the calling thread and describe the result.
    pub fn reload_blocking(&self) -> ResponseEnvelope {
        let reloader: &dyn ArtefactReloader = self.reloader.as_ref();
        let result = self
            .retry
            .run(|| self.installer.fetch_and_install(Some(reloader)));
        match result {
            Ok(outcome) => {
                info!("control reload {}: {}", outcome.label(), outcome.artefact().digest);
                ResponseEnvelope::success(describe_outcome(&outcome))
            }
            Err(err @ FetchError::InProgress { .. }) => {
                warn!("control reload rejected: {err}");
                ResponseEnvelope::failure(ErrorCode::ReloadInProgress)
            }
            Err(err) => {
                error!("control reload failed; previous artefact keeps serving: {err}");
                ResponseEnvelope::failure(ErrorCode::ReloadFailed)
            }
        }
    }

    /// Run [`reload_blocking`](Self::reload_blocking) on the blocking pool.
    pub async fn reload(self: Arc<Self>) -> ResponseEnvelope {
        match tokio::task::spawn_blocking(move || self.reload_blocking()).await {
            Ok(response) => response,
            Err(join) => {
                error!("control reload task failed: {join}");
                ResponseEnvelope::failure(ErrorCode::ReloadFailed)
            }
        }
    }

    /// Installed and loaded digests plus fetch activity.
    #[must_use]
    pub fn artefact_status(&self) -> Value {
        let status = self.installer.status();
        json!({
            "path": self.installer.plan().live_path(),
            "installed": status.installed,
            "loaded": status.loaded,
            "diverged": status.is_diverged(),
            "fetching": self.installer.is_fetching(),
        })
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("artefact", &self.installer.plan().live_path())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn describe_outcome(outcome: &FetchOutcome) -> Value {
    let artefact = outcome.artefact();
    json!({
        "outcome": outcome.label(),
        "path": artefact.path,
        "digest": artefact.digest,
        "size_bytes": artefact.size_bytes,
    })
}

/// `POST /control/reload`.
pub async fn reload_route(State(state): State<GatewayState>, headers: HeaderMap) -> ResponseEnvelope {
    let Some(control) = state.control() else {
        return ResponseEnvelope::failure(ErrorCode::HandlerNotSupported);
    };
    if let Err(err) = control.authorize(&RequestAuth::from(&headers)) {
        warn!("control reload refused: {err}");
        return ResponseEnvelope::failure(ErrorCode::Unauthorized);
    }
    Arc::clone(control).reload().await
}

/// `GET /control/status`.
pub async fn status_route(State(state): State<GatewayState>, headers: HeaderMap) -> ResponseEnvelope {
    let Some(control) = state.control() else {
        return ResponseEnvelope::failure(ErrorCode::HandlerNotSupported);
    };
    if let Err(err) = control.authorize(&RequestAuth::from(&headers)) {
        warn!("control status refused: {err}");
        return ResponseEnvelope::failure(ErrorCode::Unauthorized);
    }
    let dispatcher = state.dispatcher();
    ResponseEnvelope::success(json!({
        "artefact": control.artefact_status(),
        "dispatch": dispatcher.stats().snapshot(),
        "handlers": dispatcher.registry().names().collect::<Vec<_>>(),
    }))
}
