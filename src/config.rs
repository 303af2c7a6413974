//! Gateway configuration.
//!
//! Non-secret settings come from a TOML file; every section is optional and
//! falls back to defaults. Credentials come from the environment under a
//! configurable prefix (default `GATEWAY_`) so they never live in the file.
//! Everything is validated once, before any part of the gateway is built.

use crate::handlers::BuiltinHandler;
use camino::{Utf8Path, Utf8PathBuf};
use gateway_dispatch::{AuthContext, CredentialSource};
use gateway_fetch::RetryPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default prefix for credential environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "GATEWAY_";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from {path}: {source}")]
    Read {
        /// File that was read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`GatewayConfig`].
    #[error("failed to parse configuration from {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: Utf8PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A required environment variable is unset or blank.
    #[error("required environment variable {name} is not set")]
    MissingEnv {
        /// Full variable name, prefix included.
        name: String,
    },

    /// A setting has an unusable value.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

/// Result alias for configuration loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Settings read from the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listening socket.
    pub server: ServerConfig,
    /// Remote blob storage.
    pub storage: StorageConfig,
    /// Where the artefact is installed.
    pub artefact: ArtefactConfig,
    /// Retry policy for fetches.
    pub retry: RetryConfig,
    /// Client credential placement.
    pub auth: AuthConfig,
    /// Handler name to built-in handler bindings.
    pub handlers: BTreeMap<String, BuiltinHandler>,
}

/// Listening socket settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Socket address to bind, for example `0.0.0.0:8080`.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_owned(),
        }
    }
}

/// Blob storage settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Store endpoint. `file://` endpoints serve a local directory.
    pub endpoint: String,
    /// Bucket holding the artefact.
    pub bucket: String,
    /// Object key without the archive extension. Overridden by the
    /// `STORAGE_KEY` environment variable.
    pub key: String,
    /// Per-request timeout in seconds. It bounds the connection and the
    /// entire body download, so it must cover the largest artefact at the
    /// slowest expected transfer rate.
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000".to_owned(),
            bucket: "models".to_owned(),
            key: String::new(),
            timeout_secs: 300,
        }
    }
}

impl StorageConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Directory behind a `file://` endpoint, if this is one.
    #[must_use]
    pub fn local_root(&self) -> Option<&Utf8Path> {
        self.endpoint.strip_prefix("file://").map(Utf8Path::new)
    }
}

/// Artefact placement.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ArtefactConfig {
    /// Path of the artefact relative to `root`. A trailing `/` or a missing
    /// extension marks a directory artefact shipped as an archive.
    pub path: String,
    /// Directory the artefact and its staging area live under.
    pub root: Utf8PathBuf,
}

impl Default for ArtefactConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            root: Utf8PathBuf::from("."),
        }
    }
}

/// Fetch retry settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Build the fetch retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

/// Where clients present their credentials.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialPlacement {
    /// Request headers, checked once per request or session.
    #[default]
    Headers,
    /// An object inside every envelope.
    Body,
}

/// Client credential settings. The values come from the environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Where credentials are read from.
    pub placement: CredentialPlacement,
    /// Header carrying the client id.
    pub client_id_header: String,
    /// Header carrying the client secret.
    pub client_secret_header: String,
    /// Envelope field holding `{client_id, client_secret}` in body mode.
    pub body_field: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            placement: CredentialPlacement::Headers,
            client_id_header: "Gateway-Client-ID".to_owned(),
            client_secret_header: "Gateway-Client-Secret".to_owned(),
            body_field: "auth".to_owned(),
        }
    }
}

impl GatewayConfig {
    /// Read, parse and validate `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or
    /// fails validation.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })?;
        log::debug!("loaded configuration from {path}");
        Ok(config)
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed text and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: Utf8PathBuf::from("<inline>"),
            source: Box::new(source),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings the gateway cannot start without.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.artefact.path.trim().is_empty() {
            return Err(invalid("artefact.path must name the artefact to serve"));
        }
        if !self.handlers.contains_key("predict") {
            return Err(invalid("a `predict` handler must be configured"));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry.attempts must be at least 1"));
        }
        if self.storage.bucket.trim().is_empty() {
            return Err(invalid("storage.bucket must not be empty"));
        }
        if self.storage.timeout_secs == 0 {
            return Err(invalid("storage.timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// The object key, preferring the environment override.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when neither source supplies a key.
    pub fn storage_key<'a>(&'a self, secrets: &'a Secrets) -> Result<&'a str> {
        let key = secrets
            .storage_key
            .as_deref()
            .unwrap_or(self.storage.key.as_str());
        if key.trim().is_empty() {
            return Err(invalid(
                "storage.key (or the STORAGE_KEY environment variable) must be set",
            ));
        }
        Ok(key)
    }

    /// Client credential check built from these settings and `secrets`.
    #[must_use]
    pub fn client_auth(&self, secrets: &Secrets) -> AuthContext {
        match self.auth.placement {
            CredentialPlacement::Headers => AuthContext::new(CredentialSource::Headers)
                .require(self.auth.client_id_header.as_str(), secrets.client_id.as_str())
                .require(
                    self.auth.client_secret_header.as_str(),
                    secrets.client_secret.as_str(),
                ),
            CredentialPlacement::Body => AuthContext::new(CredentialSource::Body {
                field: self.auth.body_field.clone(),
            })
            .require("client_id", secrets.client_id.as_str())
            .require("client_secret", secrets.client_secret.as_str()),
        }
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

/// Credentials read from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Secrets {
    /// Expected client id.
    pub client_id: String,
    /// Expected client secret.
    pub client_secret: String,
    /// Shared secret for the control interface, sent in
    /// [`gateway_dispatch::CONTROL_SECRET_HEADER`]. Without it the
    /// `/control` routes are not mounted.
    pub control_secret: Option<String>,
    /// Bearer token for the blob store.
    pub storage_token: Option<String>,
    /// Object key override.
    pub storage_key: Option<String>,
}

impl Secrets {
    /// Read credentials from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] for the first required variable
    /// that is unset or blank.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnv`] for the first required variable
    /// that is absent or blank.
    pub fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let optional = |suffix: &str| {
            lookup(&format!("{prefix}{suffix}")).filter(|value| !value.trim().is_empty())
        };
        let required = |suffix: &str| {
            optional(suffix).ok_or_else(|| ConfigError::MissingEnv {
                name: format!("{prefix}{suffix}"),
            })
        };
        Ok(Self {
            client_id: required("CLIENT_ID")?,
            client_secret: required("CLIENT_SECRET")?,
            control_secret: optional("CONTROL_SECRET"),
            storage_token: optional("STORAGE_TOKEN"),
            storage_key: optional("STORAGE_KEY"),
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("storage_token", &self.storage_token.as_ref().map(|_| "<redacted>"))
            .field("storage_key", &self.storage_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_dispatch::RequestAuth;
    use rstest::rstest;

    const MINIMAL: &str = r#"
        [storage]
        key = "projects/p1/model"

        [artefact]
        path = "model.pkl"

        [handlers]
        predict = "artefact_info"
    "#;

    fn secrets() -> Secrets {
        Secrets {
            client_id: "client-1".to_owned(),
            client_secret: "s3cr3t".to_owned(),
            control_secret: Some("ops".to_owned()),
            storage_token: None,
            storage_key: None,
        }
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let config = GatewayConfig::from_toml(MINIMAL).expect("valid config");

        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.storage.bucket, "models");
        assert_eq!(config.artefact.root, Utf8PathBuf::from("."));
        assert_eq!(config.retry.policy().attempts(), 3);
        assert_eq!(config.handlers.get("predict"), Some(&BuiltinHandler::ArtefactInfo));
    }

    #[rstest]
    #[case::no_path("[handlers]\npredict = \"echo\"\n", "artefact.path")]
    #[case::no_predict("[artefact]\npath = \"m.pkl\"\n[handlers]\necho = \"echo\"\n", "predict")]
    #[case::zero_attempts(
        "[artefact]\npath = \"m.pkl\"\n[handlers]\npredict = \"echo\"\n[retry]\nattempts = 0\n",
        "retry.attempts"
    )]
    #[case::zero_timeout(
        "[artefact]\npath = \"m.pkl\"\n[handlers]\npredict = \"echo\"\n[storage]\ntimeout_secs = 0\n",
        "storage.timeout_secs"
    )]
    fn invalid_settings_are_rejected(#[case] text: &str, #[case] mention: &str) {
        let err = GatewayConfig::from_toml(text).expect_err("invalid config");
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert!(err.to_string().contains(mention), "{err}");
    }

    #[rstest]
    #[case::unknown_builtin("[artefact]\npath = \"m.pkl\"\n[handlers]\npredict = \"train_model\"\n")]
    #[case::unknown_field("[artefact]\npath = \"m.pkl\"\nsize = 3\n[handlers]\npredict = \"echo\"\n")]
    fn unknown_names_are_parse_errors(#[case] text: &str) {
        let err = GatewayConfig::from_toml(text).expect_err("parse failure");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn load_reports_the_file_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = Utf8PathBuf::try_from(dir.path().join("gateway.toml")).expect("UTF-8 path");
        std::fs::write(&path, "[artefact\n").expect("write config");

        let err = GatewayConfig::load(&path).expect_err("parse failure");

        assert!(err.to_string().contains(path.as_str()));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = GatewayConfig::load(Utf8Path::new("/nonexistent/gateway.toml"))
            .expect_err("read failure");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn secrets_come_from_prefixed_variables() {
        temp_env::with_vars(
            [
                ("TEST_GW_CLIENT_ID", Some("client-1")),
                ("TEST_GW_CLIENT_SECRET", Some("s3cr3t")),
                ("TEST_GW_CONTROL_SECRET", Some("ops")),
                ("TEST_GW_STORAGE_TOKEN", None),
                ("TEST_GW_STORAGE_KEY", Some("projects/p2/model")),
            ],
            || {
                let secrets = Secrets::from_env("TEST_GW_").expect("secrets");
                assert_eq!(secrets.client_id, "client-1");
                assert_eq!(secrets.control_secret.as_deref(), Some("ops"));
                assert_eq!(secrets.storage_token, None);
                assert_eq!(secrets.storage_key.as_deref(), Some("projects/p2/model"));
            },
        );
    }

    #[rstest]
    #[case::unset(None)]
    #[case::blank(Some("  "))]
    fn missing_required_secret_names_the_variable(#[case] value: Option<&str>) {
        temp_env::with_vars(
            [
                ("TEST_GW2_CLIENT_ID", Some("client-1")),
                ("TEST_GW2_CLIENT_SECRET", value),
                ("TEST_GW2_CONTROL_SECRET", Some("ops")),
            ],
            || {
                let err = Secrets::from_env("TEST_GW2_").expect_err("missing secret");
                assert_eq!(err.to_string(), "required environment variable TEST_GW2_CLIENT_SECRET is not set");
            },
        );
    }

    #[test]
    fn control_secret_is_optional() {
        temp_env::with_vars(
            [
                ("TEST_GW3_CLIENT_ID", Some("client-1")),
                ("TEST_GW3_CLIENT_SECRET", Some("s3cr3t")),
                ("TEST_GW3_CONTROL_SECRET", None),
            ],
            || {
                let secrets = Secrets::from_env("TEST_GW3_").expect("secrets");
                assert_eq!(secrets.control_secret, None);
            },
        );
    }

    #[test]
    fn environment_key_overrides_file_key() {
        let config = GatewayConfig::from_toml(MINIMAL).expect("valid config");
        let mut overridden = secrets();
        overridden.storage_key = Some("projects/p9/model".to_owned());

        assert_eq!(config.storage_key(&secrets()).expect("key"), "projects/p1/model");
        assert_eq!(config.storage_key(&overridden).expect("key"), "projects/p9/model");
    }

    #[test]
    fn header_placement_uses_configured_header_names() {
        let config = GatewayConfig::from_toml(MINIMAL).expect("valid config");
        let auth = config.client_auth(&secrets());

        let request = RequestAuth::from_pairs([
            ("gateway-client-id", "client-1"),
            ("gateway-client-secret", "s3cr3t"),
        ]);
        assert!(auth.verify_request(&request).is_ok());
        assert!(auth.verify_request(&RequestAuth::none()).is_err());
    }

    #[test]
    fn body_placement_reads_the_auth_field() {
        let text = format!("{MINIMAL}\n[auth]\nplacement = \"body\"\nbody_field = \"creds\"\n");
        let config = GatewayConfig::from_toml(&text).expect("valid config");
        let auth = config.client_auth(&secrets());

        assert_eq!(
            auth.source(),
            &CredentialSource::Body {
                field: "creds".to_owned()
            }
        );
    }

    #[test]
    fn file_endpoints_resolve_to_local_roots() {
        let mut storage = StorageConfig::default();
        assert_eq!(storage.local_root(), None);
        storage.endpoint = "file:///srv/blobs".to_owned();
        assert_eq!(storage.local_root(), Some(Utf8Path::new("/srv/blobs")));
    }

    #[test]
    fn secrets_debug_hides_credentials() {
        let rendered = format!("{:?}", secrets());
        assert!(!rendered.contains("s3cr3t"));
        assert!(!rendered.contains("ops"));
    }
}
