//! Directory preparation and atomic promotion of staged files.
//!
//! A staged file is written somewhere private and only becomes visible at its
//! final path through a single `rename`. Readers of the final path therefore
//! see either the previous complete file or the new complete file.

use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use std::fs;

/// Errors raised while preparing or promoting staged files.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    /// An ancestor directory could not be created.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The staged file could not be moved into place.
    #[error("failed to move {from} to {to}: {source}")]
    Promote {
        /// Staged source path.
        from: Utf8PathBuf,
        /// Final destination path.
        to: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Create every missing ancestor directory of `path`.
///
/// Directories that already exist are left alone, so calling this twice with
/// the same path yields the same end state. A path without a parent (a bare
/// file name) needs no directories and succeeds immediately.
///
/// # Errors
///
/// Returns [`StagingError::CreateDirectory`] when a directory cannot be
/// created, for example because a regular file occupies one of the ancestor
/// positions.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use gateway_common::ensure_parent_directories;
///
/// let temp = tempfile::tempdir().unwrap();
/// let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
/// let file = root.join("models/v1/model.bin");
/// ensure_parent_directories(&file).unwrap();
/// assert!(root.join("models/v1").is_dir());
/// ```
pub fn ensure_parent_directories(path: &Utf8Path) -> Result<(), StagingError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent.is_dir() {
        return Ok(());
    }

    debug!("creating parent directories for {path}");
    fs::create_dir_all(parent).map_err(|source| StagingError::CreateDirectory {
        path: parent.to_owned(),
        source,
    })
}

/// Move `temp_path` onto `final_path` with a single rename.
///
/// Both paths must live on the same filesystem; the gateway keeps its scratch
/// subtree under the artefact root for that reason. An existing file at
/// `final_path` is replaced.
///
/// # Errors
///
/// Returns [`StagingError::Promote`] when the rename fails. The staged file is
/// left where it was.
pub fn atomic_replace(temp_path: &Utf8Path, final_path: &Utf8Path) -> Result<(), StagingError> {
    fs::rename(temp_path, final_path).map_err(|source| StagingError::Promote {
        from: temp_path.to_owned(),
        to: final_path.to_owned(),
        source,
    })?;
    debug!("promoted {temp_path} to {final_path}");
    Ok(())
}
