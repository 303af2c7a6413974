//! Artefact descriptors derived from the configured artefact path.
//!
//! A configured path that ends in a separator or has no extension names a
//! directory. Directories are shipped as zip archives: `models/current/` is
//! installed as `models/current.zip` and unpacked into `models/current/`.
//! Any other path names a single file installed as-is.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::fmt;

/// Archive formats the pipeline can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// A zip archive.
    Zip,
}

impl ArchiveFormat {
    /// File extension used for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Errors raised while deriving a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// The configured artefact path is blank.
    #[error("artefact path is empty")]
    EmptyPath,

    /// The remote key is blank.
    #[error("remote key is empty")]
    EmptyKey,

    /// The artefact path must stay inside the artefact root.
    #[error("artefact path {path} must be relative and must not contain `..`")]
    EscapesRoot {
        /// The rejected path.
        path: String,
    },
}

/// What to fetch and where to install it. Immutable once derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtefactDescriptor {
    remote_key: String,
    local_path: Utf8PathBuf,
    archive_format: Option<ArchiveFormat>,
}

impl ArtefactDescriptor {
    /// Derive a descriptor from a relative artefact path and the remote key
    /// prefix of the object in storage.
    ///
    /// The remote key gains the resolved extension: the file's own extension,
    /// or the archive extension for directories.
    ///
    /// # Errors
    ///
    /// Returns a [`DescriptorError`] for blank inputs or paths that would
    /// escape the artefact root.
    ///
    /// # Examples
    ///
    /// ```
    /// use gateway_fetch::descriptor::ArtefactDescriptor;
    ///
    /// let dir = ArtefactDescriptor::derive("models/current/", "projects/p1/model").unwrap();
    /// assert!(dir.is_archive());
    /// assert_eq!(dir.local_path().as_str(), "models/current.zip");
    /// assert_eq!(dir.remote_key(), "projects/p1/model.zip");
    /// assert_eq!(dir.live_path(), "models/current");
    ///
    /// let file = ArtefactDescriptor::derive("models/model.pkl", "projects/p1/model").unwrap();
    /// assert!(!file.is_archive());
    /// assert_eq!(file.remote_key(), "projects/p1/model.pkl");
    /// ```
    pub fn derive(relative_path: &str, remote_key: &str) -> Result<Self, DescriptorError> {
        let trimmed = relative_path.trim();
        let key = remote_key.trim().trim_end_matches('/');
        if trimmed.trim_end_matches('/').is_empty() {
            return Err(DescriptorError::EmptyPath);
        }
        if key.is_empty() {
            return Err(DescriptorError::EmptyKey);
        }

        let path = Utf8Path::new(trimmed);
        let escapes = path
            .components()
            .any(|component| !matches!(component, Utf8Component::Normal(_) | Utf8Component::CurDir));
        if escapes {
            return Err(DescriptorError::EscapesRoot {
                path: trimmed.to_owned(),
            });
        }

        let is_directory = trimmed.ends_with('/') || path.extension().is_none();
        if is_directory {
            let format = ArchiveFormat::Zip;
            let base = trimmed.trim_end_matches('/');
            return Ok(Self {
                remote_key: format!("{key}.{format}"),
                local_path: Utf8PathBuf::from(format!("{base}.{format}")),
                archive_format: Some(format),
            });
        }

        let extension = path.extension().unwrap_or_default();
        Ok(Self {
            remote_key: format!("{key}.{extension}"),
            local_path: path.to_owned(),
            archive_format: None,
        })
    }

    /// Key of the object in the bucket.
    #[must_use]
    pub fn remote_key(&self) -> &str {
        &self.remote_key
    }

    /// Path the downloaded object is installed at, relative to the artefact
    /// root. For archives this is the archive file.
    #[must_use]
    pub fn local_path(&self) -> &Utf8Path {
        &self.local_path
    }

    /// Whether the object is an archive to unpack after installation.
    #[must_use]
    pub fn is_archive(&self) -> bool {
        self.archive_format.is_some()
    }

    /// Archive format, when the object is an archive.
    #[must_use]
    pub fn archive_format(&self) -> Option<ArchiveFormat> {
        self.archive_format
    }

    /// Path handlers read from: the unpacked directory for archives, the
    /// installed file otherwise.
    #[must_use]
    pub fn live_path(&self) -> Utf8PathBuf {
        if self.is_archive() {
            self.local_path.with_extension("")
        } else {
            self.local_path.clone()
        }
    }
}
