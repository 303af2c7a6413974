//! Static credential checks.
//!
//! An [`AuthContext`] holds the name/value pairs a caller must present. They
//! are read either from request headers or from an object embedded in the
//! envelope body. A context with no pairs authenticates everyone.

use crate::envelope::Envelope;
use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

/// Where credentials are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Request headers; checked once per one-shot request or persistent
    /// session.
    Headers,
    /// An object stored under `field` in every envelope.
    Body {
        /// Top-level envelope field holding the credential object.
        field: String,
    },
}

/// Why a caller was rejected. Messages name the credential, never its value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// A required credential was not presented.
    #[error("credential `{name}` is missing")]
    Missing {
        /// Credential name.
        name: String,
    },

    /// A credential was presented with the wrong value.
    #[error("credential `{name}` does not match")]
    Mismatch {
        /// Credential name.
        name: String,
    },
}

/// Credentials a caller must present.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    required: Vec<(String, String)>,
    source: CredentialSource,
}

impl AuthContext {
    /// A context that accepts every caller.
    #[must_use]
    pub const fn open() -> Self {
        Self {
            required: Vec::new(),
            source: CredentialSource::Headers,
        }
    }

    /// An empty context reading credentials from `source`; add pairs with
    /// [`require`](Self::require).
    #[must_use]
    pub const fn new(source: CredentialSource) -> Self {
        Self {
            required: Vec::new(),
            source,
        }
    }

    /// Require `name` to carry `value`. Header names compare
    /// case-insensitively; values compare exactly.
    #[must_use]
    pub fn require(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.required.push((name.into(), value.into()));
        self
    }

    /// Whether no credentials are required.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.required.is_empty()
    }

    /// Where credentials are read from.
    #[must_use]
    pub const fn source(&self) -> &CredentialSource {
        &self.source
    }

    /// Check request headers. A body-credential context accepts any headers.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for the first required pair that is absent or
    /// wrong.
    pub fn verify_request(&self, request: &RequestAuth) -> Result<(), AuthError> {
        if !matches!(self.source, CredentialSource::Headers) {
            return Ok(());
        }
        self.verify_pairs(|name| request.header(name))
    }

    /// Check the credential object embedded in `envelope`. A header
    /// context accepts any body.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for the first required pair that is absent or
    /// wrong.
    pub fn verify_envelope(&self, envelope: &Envelope) -> Result<(), AuthError> {
        let CredentialSource::Body { field } = &self.source else {
            return Ok(());
        };
        let credentials = envelope.field(field);
        self.verify_pairs(|name| {
            credentials
                .and_then(|object| object.get(name))
                .and_then(Value::as_str)
        })
    }

    fn verify_pairs<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> Result<(), AuthError> {
        for (name, expected) in &self.required {
            match lookup(name.as_str()) {
                None => return Err(AuthError::Missing { name: name.clone() }),
                Some(presented) if presented != expected.as_str() => {
                    return Err(AuthError::Mismatch { name: name.clone() });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::open()
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.required.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("AuthContext")
            .field("required", &names)
            .field("source", &self.source)
            .finish()
    }
}

/// Headers presented by one request or one persistent session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAuth {
    headers: HashMap<String, String>,
}

impl RequestAuth {
    /// A request presenting no headers.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Build from name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            headers: pairs
                .into_iter()
                .map(|(name, value)| (name.as_ref().to_ascii_lowercase(), value.into()))
                .collect(),
        }
    }

    /// Value of header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

impl From<&HeaderMap> for RequestAuth {
    fn from(headers: &HeaderMap) -> Self {
        Self::from_pairs(headers.iter().filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str(), value.to_owned()))
        }))
    }
}
