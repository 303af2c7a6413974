//! Error types for the fetch and hot-swap pipeline.
//!
//! Variants distinguish failures that leave the previous artefact serving
//! (`Transient`, `Permanent`, `EmptyObject`, `InProgress`, `Staging`, `Io`)
//! from failures that happen after the new artefact is already installed
//! (`ExtractFailed`, `ReloadFailed`). Only transient failures are worth
//! retrying.

use crate::blob::BlobError;
use camino::Utf8PathBuf;
use gateway_common::{ArchiveError, StagingError};
use thiserror::Error;

/// Errors raised by [`ArtefactInstaller::fetch_and_install`](crate::ArtefactInstaller::fetch_and_install).
#[derive(Debug, Error)]
pub enum FetchError {
    /// A failure that may clear up on retry (timeouts, 5xx, truncated body).
    #[error("transient failure fetching {key}: {reason}")]
    Transient {
        /// Remote key being fetched.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// A failure retrying cannot fix (missing object, refused credentials).
    #[error("permanent failure fetching {key}: {reason}")]
    Permanent {
        /// Remote key being fetched.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// The remote object has no content.
    #[error("remote object {key} is empty")]
    EmptyObject {
        /// Remote key being fetched.
        key: String,
    },

    /// Another fetch for the same artefact is running.
    #[error("a fetch for {path} is already in progress")]
    InProgress {
        /// Artefact path guarded by the fetch slot.
        path: Utf8PathBuf,
    },

    /// Preparing directories or promoting the staged file failed.
    #[error("staging failed: {0}")]
    Staging(#[from] StagingError),

    /// Local filesystem access failed outside staging and extraction.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being operated on.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The archive was installed but could not be unpacked. The archive
    /// stays at `path` and the previous unpacked directory keeps serving.
    #[error("archive installed at {path} but extraction failed: {source}")]
    ExtractFailed {
        /// Installed archive path.
        path: Utf8PathBuf,
        /// Extraction error.
        #[source]
        source: ArchiveError,
    },

    /// The artefact was installed but the host could not reload it. The
    /// artefact on disk and the in-memory state now differ.
    #[error("artefact {digest} installed at {path} but reload failed: {reason}")]
    ReloadFailed {
        /// Live artefact path.
        path: Utf8PathBuf,
        /// Digest of the installed content.
        digest: String,
        /// Reason reported by the reload hook.
        reason: String,
    },
}

impl FetchError {
    /// Whether a caller's retry policy should try again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the new artefact reached disk despite the error.
    #[must_use]
    pub fn artefact_installed(&self) -> bool {
        matches!(self, Self::ExtractFailed { .. } | Self::ReloadFailed { .. })
    }
}

impl From<BlobError> for FetchError {
    fn from(err: BlobError) -> Self {
        let reason = err.to_string();
        match err {
            BlobError::Unavailable { key, .. } | BlobError::Io { key, .. } => {
                Self::Transient { key, reason }
            }
            BlobError::NotFound { key }
            | BlobError::Denied { key, .. }
            | BlobError::Rejected { key, .. } => Self::Permanent { key, reason },
        }
    }
}

/// Result type alias using [`FetchError`].
pub type Result<T> = std::result::Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::unavailable(BlobError::Unavailable { key: "k".to_owned(), reason: "HTTP 503".to_owned() }, true)]
    #[case::io(BlobError::Io { key: "k".to_owned(), source: std::io::Error::other("reset") }, true)]
    #[case::not_found(BlobError::NotFound { key: "k".to_owned() }, false)]
    #[case::denied(BlobError::Denied { key: "k".to_owned(), status: 403 }, false)]
    #[case::rejected(BlobError::Rejected { key: "k".to_owned(), reason: "HTTP 400".to_owned() }, false)]
    fn blob_errors_keep_their_class(#[case] blob: BlobError, #[case] transient: bool) {
        let err = FetchError::from(blob);
        assert_eq!(err.is_transient(), transient, "{err}");
        assert!(!err.artefact_installed());
    }

    #[test]
    fn reload_failure_reports_installed_artefact() {
        let err = FetchError::ReloadFailed {
            path: Utf8PathBuf::from("/srv/app/models/current"),
            digest: "abc123".to_owned(),
            reason: "model refused to load".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abc123"));
        assert!(msg.contains("model refused to load"));
        assert!(err.artefact_installed());
        assert!(!err.is_transient());
    }

    #[test]
    fn not_found_message_names_the_key() {
        let err = FetchError::from(BlobError::NotFound {
            key: "p1/model.zip".to_owned(),
        });
        assert!(err.to_string().contains("p1/model.zip"));
    }
}
