//! In-place extraction of zip artefacts.
//!
//! `models/current.zip` unpacks into `models/current/` and the archive is
//! removed afterwards. Entries are written into a hidden sibling directory
//! first; the previously extracted directory is only swapped out once the
//! new tree is complete, so a corrupt archive never leaves the artefact root
//! without a usable directory.

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Component, Path};

/// Errors arising from archive extraction.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The archive could not be parsed as a zip file.
    #[error("archive {path} is corrupt: {source}")]
    Corrupt {
        /// Archive path.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: zip::result::ZipError,
    },

    /// An entry attempts to escape the extraction directory.
    #[error("path traversal detected in {path}: {entry}")]
    PathTraversal {
        /// Archive path.
        path: Utf8PathBuf,
        /// The offending entry name.
        entry: String,
    },

    /// The archive contains no files.
    #[error("archive {path} contains no files")]
    EmptyArchive {
        /// Archive path.
        path: Utf8PathBuf,
    },

    /// The archive path has no extension to strip.
    #[error("archive {path} has no extension")]
    MissingExtension {
        /// Archive path.
        path: Utf8PathBuf,
    },

    /// Filesystem operation failed during extraction.
    #[error("extraction I/O error at {path}: {source}")]
    Io {
        /// Path being operated on.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    fn io(path: &Utf8Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_owned(),
            source,
        }
    }
}

/// Return the directory an archive unpacks into: the archive path with its
/// final extension stripped.
///
/// # Errors
///
/// Returns [`ArchiveError::MissingExtension`] for paths such as `models/current`.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use gateway_common::extracted_dir_for;
///
/// let dir = extracted_dir_for(Utf8Path::new("models/current.zip")).unwrap();
/// assert_eq!(dir, "models/current");
/// ```
pub fn extracted_dir_for(archive_path: &Utf8Path) -> Result<Utf8PathBuf, ArchiveError> {
    match (archive_path.extension(), archive_path.file_stem()) {
        (Some(_), Some(stem)) => Ok(archive_path.with_file_name(stem)),
        _ => Err(ArchiveError::MissingExtension {
            path: archive_path.to_owned(),
        }),
    }
}

/// Unpack `archive_path` beside itself and delete the archive.
///
/// Returns the extracted directory. Any directory already at that location is
/// replaced (last write wins), but only after the new contents are fully
/// written. On failure the archive and the previous directory are left in
/// place for inspection.
///
/// # Errors
///
/// Returns [`ArchiveError::Corrupt`] when the archive cannot be parsed,
/// [`ArchiveError::PathTraversal`] or [`ArchiveError::EmptyArchive`] when its
/// entries are unacceptable, and [`ArchiveError::Io`] on filesystem failures.
pub fn extract_in_place(archive_path: &Utf8Path) -> Result<Utf8PathBuf, ArchiveError> {
    let extract_dir = extracted_dir_for(archive_path)?;
    let scratch_dir = sibling(&extract_dir, "extracting");

    remove_if_present(&scratch_dir)?;
    if let Err(err) = unpack_into(archive_path, &scratch_dir) {
        if let Err(cleanup) = remove_if_present(&scratch_dir) {
            warn!("could not clean up {scratch_dir}: {cleanup}");
        }
        return Err(err);
    }

    swap_into_place(&scratch_dir, &extract_dir)?;
    fs::remove_file(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;

    info!("extracted {archive_path} into {extract_dir}");
    Ok(extract_dir)
}

fn unpack_into(archive_path: &Utf8Path, dest_dir: &Utf8Path) -> Result<(), ArchiveError> {
    let file = fs::File::open(archive_path).map_err(|e| ArchiveError::io(archive_path, e))?;
    let corrupt = |source| ArchiveError::Corrupt {
        path: archive_path.to_owned(),
        source,
    };
    let mut archive = zip::ZipArchive::new(file).map_err(corrupt)?;
    fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::io(dest_dir, e))?;

    let mut file_count = 0_usize;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(corrupt)?;
        let relative = entry
            .enclosed_name()
            .filter(|name| is_contained(name))
            .ok_or_else(|| ArchiveError::PathTraversal {
                path: archive_path.to_owned(),
                entry: entry.name().to_owned(),
            })?;
        let target = dest_dir.as_std_path().join(relative);
        let target_utf8 = Utf8PathBuf::try_from(target.clone())
            .map_err(|e| ArchiveError::io(dest_dir, io::Error::other(e)))?;

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| ArchiveError::io(&target_utf8, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ArchiveError::io(&target_utf8, e))?;
        }
        let mut out = fs::File::create(&target).map_err(|e| ArchiveError::io(&target_utf8, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::io(&target_utf8, e))?;
        file_count += 1;
        debug!("unpacked {target_utf8}");
    }

    if file_count == 0 {
        return Err(ArchiveError::EmptyArchive {
            path: archive_path.to_owned(),
        });
    }
    Ok(())
}

/// Reject absolute paths and `..` components even when the zip reader has
/// already sanitised the name.
fn is_contained(path: &Path) -> bool {
    !path.is_absolute()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn swap_into_place(fresh: &Utf8Path, extract_dir: &Utf8Path) -> Result<(), ArchiveError> {
    if !extract_dir.exists() {
        return fs::rename(fresh, extract_dir).map_err(|e| ArchiveError::io(extract_dir, e));
    }

    let previous = sibling(extract_dir, "previous");
    remove_if_present(&previous)?;
    fs::rename(extract_dir, &previous).map_err(|e| ArchiveError::io(extract_dir, e))?;
    if let Err(source) = fs::rename(fresh, extract_dir) {
        // Put the old tree back so the artefact root is never left empty.
        if let Err(restore) = fs::rename(&previous, extract_dir) {
            warn!("could not restore {extract_dir} from {previous}: {restore}");
        }
        return Err(ArchiveError::io(extract_dir, source));
    }
    remove_if_present(&previous)
}

fn sibling(dir: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let name = dir.file_name().unwrap_or("artefact");
    dir.with_file_name(format!(".{name}.{suffix}"))
}

fn remove_if_present(path: &Utf8Path) -> Result<(), ArchiveError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return Ok(());
    };
    result.map_err(|e| ArchiveError::io(path, e))
}
