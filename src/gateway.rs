//! Process wiring.
//!
//! [`Gateway::build`] assembles the fetch pipeline, the artefact state, the
//! dispatcher and the control interface from validated settings. Nothing is
//! fetched or bound until [`Gateway::boot`] and [`Gateway::serve`] run.

use crate::artefact_state::ArtefactState;
use crate::config::{ConfigError, GatewayConfig, Secrets};
use crate::handlers::build_registry;
use gateway_dispatch::{ControlPlane, Dispatcher, GatewayState, router};
use gateway_fetch::{
    ArtefactDescriptor, ArtefactInstaller, ArtefactReloader, BlobStore, DescriptorError,
    DirectoryBlobStore, FetchError, FetchOutcome, HttpBlobStore, RetryPolicy,
};
use log::info;
use std::future::Future;
use std::sync::Arc;

/// Errors that stop the gateway from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The artefact path and key do not describe an installable artefact.
    #[error("invalid artefact description: {0}")]
    Descriptor(#[from] DescriptorError),

    /// The boot fetch failed; there is nothing to serve.
    #[error("boot fetch failed: {0}")]
    Boot(#[from] FetchError),

    /// The listening socket could not be bound or served.
    #[error("failed to serve on {bind}: {source}")]
    Serve {
        /// Configured bind address.
        bind: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for gateway wiring.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Build the blob store the settings point at.
#[must_use]
pub fn blob_store(config: &GatewayConfig, secrets: &Secrets) -> Arc<dyn BlobStore + Send + Sync> {
    let storage = &config.storage;
    if let Some(root) = storage.local_root() {
        info!("serving blobs from local directory {root}");
        return Arc::new(DirectoryBlobStore::new(root, &storage.bucket));
    }
    let store = HttpBlobStore::new(&storage.endpoint, &storage.bucket, storage.timeout());
    match &secrets.storage_token {
        Some(token) => Arc::new(store.with_token(token.as_str())),
        None => Arc::new(store),
    }
}

/// A fully wired gateway.
pub struct Gateway {
    bind: String,
    retry: RetryPolicy,
    installer: Arc<ArtefactInstaller>,
    state: Arc<ArtefactState>,
    dispatcher: Arc<Dispatcher>,
    control: Option<Arc<ControlPlane>>,
}

impl Gateway {
    /// Wire the gateway against `store`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when no object key is available or the
    /// artefact cannot be described.
    pub fn build(
        config: &GatewayConfig,
        secrets: &Secrets,
        store: Arc<dyn BlobStore + Send + Sync>,
    ) -> Result<Self> {
        let key = config.storage_key(secrets)?;
        let descriptor = ArtefactDescriptor::derive(&config.artefact.path, key)?;
        info!(
            "artefact {} from {}/{}",
            descriptor.local_path(),
            config.storage.bucket,
            descriptor.remote_key()
        );
        let installer = Arc::new(ArtefactInstaller::new(
            store,
            descriptor,
            &config.artefact.root,
        ));
        let state = Arc::new(ArtefactState::new());
        let reloader: Arc<dyn ArtefactReloader + Send + Sync> = state.clone();
        let retry = config.retry.policy();

        let registry = build_registry(&config.handlers, &state);
        let dispatcher = Arc::new(Dispatcher::new(registry, config.client_auth(secrets)));
        let control = match secrets.control_secret.as_deref() {
            Some(secret) => Some(Arc::new(
                ControlPlane::new(secret, Arc::clone(&installer), reloader).with_retry(retry),
            )),
            None => {
                info!("no control secret configured; /control routes are disabled");
                None
            }
        };

        Ok(Self {
            bind: config.server.bind.clone(),
            retry,
            installer,
            state,
            dispatcher,
            control,
        })
    }

    /// Install the artefact and load it, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Boot`] when the artefact could not be
    /// installed or loaded.
    pub fn boot(&self) -> Result<FetchOutcome> {
        let reloader: &dyn ArtefactReloader = &*self.state;
        let outcome = self
            .retry
            .run(|| self.installer.fetch_and_install(Some(reloader)))?;
        info!(
            "boot fetch {}: {} ({} bytes)",
            outcome.label(),
            outcome.artefact().path,
            outcome.artefact().size_bytes
        );
        Ok(outcome)
    }

    /// The axum router serving `/invoke`, `/ws` and, when a control secret
    /// is configured, `/control/*`.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        let state = GatewayState::new(Arc::clone(&self.dispatcher));
        let state = match &self.control {
            Some(control) => state.with_control(Arc::clone(control)),
            None => state,
        };
        router(state)
    }

    /// Serve until `shutdown` resolves, then log the dispatch counters.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Serve`] when the socket cannot be bound or the
    /// server fails.
    pub async fn serve(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let serve_err = |source| GatewayError::Serve {
            bind: self.bind.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&self.bind)
            .await
            .map_err(serve_err)?;
        info!("listening on {}", self.bind);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(serve_err)?;

        let stats = self.dispatcher.stats().snapshot();
        info!(
            "shutting down after {} messages ({} succeeded, {} unauthorised, {} invalid, {} unsupported, {} failed)",
            stats.total(),
            stats.succeeded,
            stats.unauthorized,
            stats.invalid_payload,
            stats.unsupported_handler,
            stats.handler_failed
        );
        Ok(())
    }

    /// Artefact state shared with handlers.
    #[must_use]
    pub fn state(&self) -> &ArtefactState {
        &self.state
    }

    /// Installer driving fetches.
    #[must_use]
    pub fn installer(&self) -> &ArtefactInstaller {
        &self.installer
    }

    /// Dispatcher serving client messages.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}
