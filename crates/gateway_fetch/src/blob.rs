//! Blob store access for remote artefacts.
//!
//! The pipeline only needs two operations from storage: the size of an
//! object and a download into a local file. [`BlobStore`] captures that seam
//! so the pipeline can be exercised against a local directory or a mock,
//! while [`HttpBlobStore`] talks to an S3-compatible HTTP endpoint.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::Duration;

/// Default network timeout for blob requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read access to a bucket of remote objects.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait BlobStore {
    /// Return the size in bytes of the object stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`BlobError::NotFound`] when the object does not exist, and
    /// other [`BlobError`] variants for access or transport failures.
    fn head_size(&self, key: &str) -> Result<u64, BlobError>;

    /// Download the object stored under `key` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns a [`BlobError`] when the request or the file write fails.
    fn download(&self, key: &str, dest: &Utf8Path) -> Result<(), BlobError>;
}

/// Errors arising from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// The object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// Requested key.
        key: String,
    },

    /// Credentials were missing or refused.
    #[error("access to {key} denied (HTTP {status})")]
    Denied {
        /// Requested key.
        key: String,
        /// HTTP status returned by the store.
        status: u16,
    },

    /// The store refused the request for a reason retrying will not fix.
    #[error("request for {key} rejected: {reason}")]
    Rejected {
        /// Requested key.
        key: String,
        /// Description of the rejection.
        reason: String,
    },

    /// The store was unreachable, timed out, or reported a server error.
    #[error("store unavailable for {key}: {reason}")]
    Unavailable {
        /// Requested key.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// Streaming the object to disk failed part-way.
    #[error("I/O error while downloading {key}: {source}")]
    Io {
        /// Requested key.
        key: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl BlobError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io { .. })
    }
}

/// S3-compatible store reached over plain HTTP(S).
///
/// Objects are addressed as `{endpoint}/{bucket}/{key}`. When a token is
/// configured it is sent as a bearer credential on every request.
pub struct HttpBlobStore {
    endpoint: String,
    bucket: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpBlobStore {
    /// Create a store for `bucket` under `endpoint`.
    #[must_use]
    pub fn new(endpoint: &str, bucket: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            bucket: bucket.trim_matches('/').to_owned(),
            token: None,
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// Attach a bearer token to every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Construct the URL for an object key.
    ///
    /// # Examples
    ///
    /// ```
    /// use gateway_fetch::blob::{DEFAULT_TIMEOUT, HttpBlobStore};
    ///
    /// let store = HttpBlobStore::new("https://blobs.example.test/", "models", DEFAULT_TIMEOUT);
    /// assert_eq!(
    ///     store.object_url("/projects/p1/model.zip"),
    ///     "https://blobs.example.test/models/projects/p1/model.zip"
    /// );
    /// ```
    #[must_use]
    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }

    fn bearer(&self) -> Option<String> {
        self.token.as_ref().map(|token| format!("Bearer {token}"))
    }
}

impl BlobStore for HttpBlobStore {
    fn head_size(&self, key: &str) -> Result<u64, BlobError> {
        let url = self.object_url(key);
        let mut request = self.agent.head(&url);
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", bearer);
        }
        let response = request.call().map_err(|e| map_ureq_error(key, &e))?;
        response
            .headers()
            .get("content-length")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| BlobError::Rejected {
                key: key.to_owned(),
                reason: "response carried no usable content-length".to_owned(),
            })
    }

    fn download(&self, key: &str, dest: &Utf8Path) -> Result<(), BlobError> {
        let url = self.object_url(key);
        let mut request = self.agent.get(&url);
        if let Some(bearer) = self.bearer() {
            request = request.header("Authorization", bearer);
        }
        let response = request.call().map_err(|e| map_ureq_error(key, &e))?;
        let io_error = |source| BlobError::Io {
            key: key.to_owned(),
            source,
        };
        let mut file = fs::File::create(dest).map_err(io_error)?;
        std::io::copy(&mut response.into_body().as_reader(), &mut file).map_err(io_error)?;
        file.sync_all().map_err(io_error)
    }
}

/// Map a ureq error onto the transient/permanent split.
fn map_ureq_error(key: &str, err: &ureq::Error) -> BlobError {
    let key = key.to_owned();
    match err {
        ureq::Error::StatusCode(404) => BlobError::NotFound { key },
        ureq::Error::StatusCode(status @ (401 | 403)) => BlobError::Denied {
            key,
            status: *status,
        },
        ureq::Error::StatusCode(status) if *status == 408 || *status == 429 || *status >= 500 => {
            BlobError::Unavailable {
                key,
                reason: format!("HTTP {status}"),
            }
        }
        ureq::Error::StatusCode(status) => BlobError::Rejected {
            key,
            reason: format!("HTTP {status}"),
        },
        other => BlobError::Unavailable {
            key,
            reason: other.to_string(),
        },
    }
}

/// A local directory served as a bucket: `{root}/{bucket}/{key}`.
///
/// Used for `file://` endpoints and for exercising the pipeline without a
/// network.
#[derive(Debug, Clone)]
pub struct DirectoryBlobStore {
    bucket_dir: Utf8PathBuf,
}

impl DirectoryBlobStore {
    /// Create a store rooted at `root` for `bucket`.
    #[must_use]
    pub fn new(root: &Utf8Path, bucket: &str) -> Self {
        Self {
            bucket_dir: root.join(bucket.trim_matches('/')),
        }
    }

    /// Return the local path backing `key`.
    #[must_use]
    pub fn object_path(&self, key: &str) -> Utf8PathBuf {
        self.bucket_dir.join(key.trim_start_matches('/'))
    }
}

impl BlobStore for DirectoryBlobStore {
    fn head_size(&self, key: &str) -> Result<u64, BlobError> {
        let path = self.object_path(key);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Ok(metadata.len()),
            Ok(_) => Err(BlobError::NotFound {
                key: key.to_owned(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound {
                key: key.to_owned(),
            }),
            Err(source) => Err(BlobError::Io {
                key: key.to_owned(),
                source,
            }),
        }
    }

    fn download(&self, key: &str, dest: &Utf8Path) -> Result<(), BlobError> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(BlobError::NotFound {
                key: key.to_owned(),
            });
        }
        fs::copy(&path, dest)
            .map(|_| ())
            .map_err(|source| BlobError::Io {
                key: key.to_owned(),
                source,
            })
    }
}
