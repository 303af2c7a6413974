//! In-memory view of the live artefact.
//!
//! Handlers read the artefact through [`ArtefactState::current`]. A reload
//! builds the new [`LoadedArtefact`] completely before swapping it in, so a
//! handler sees either the old version or the new one, never a mix. When
//! loading fails the previous version keeps serving and the installer
//! reports the divergence.

use camino::{Utf8Path, Utf8PathBuf};
use gateway_fetch::{ArtefactReloader, InstalledArtefact, ReloadError};
use log::info;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// One loaded artefact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedArtefact {
    /// Live path the version was loaded from.
    pub path: Utf8PathBuf,
    /// SHA-256 of the fetched object.
    pub digest: String,
    /// Size in bytes of the fetched object.
    pub size_bytes: u64,
    /// Files inside a directory artefact, relative and sorted. Empty for a
    /// single-file artefact.
    pub files: Vec<String>,
}

impl LoadedArtefact {
    /// Read the artefact described by `artefact` from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] when the live path is missing, has the wrong
    /// kind, or cannot be listed.
    pub fn load(artefact: &InstalledArtefact) -> Result<Self, ReloadError> {
        let metadata = std::fs::metadata(&artefact.path).map_err(|err| {
            ReloadError::new(format!("cannot read {}: {err}", artefact.path))
        })?;
        let files = if artefact.unpacked {
            if !metadata.is_dir() {
                return Err(ReloadError::new(format!(
                    "{} should be a directory",
                    artefact.path
                )));
            }
            let mut files = Vec::new();
            list_files(&artefact.path, &artefact.path, &mut files)?;
            files.sort();
            files
        } else {
            if !metadata.is_file() {
                return Err(ReloadError::new(format!("{} should be a file", artefact.path)));
            }
            Vec::new()
        };
        Ok(Self {
            path: artefact.path.clone(),
            digest: artefact.digest.clone(),
            size_bytes: artefact.size_bytes,
            files,
        })
    }
}

fn list_files(base: &Utf8Path, dir: &Utf8Path, out: &mut Vec<String>) -> Result<(), ReloadError> {
    let entries = dir
        .read_dir_utf8()
        .map_err(|err| ReloadError::new(format!("cannot list {dir}: {err}")))?;
    for entry in entries {
        let entry = entry.map_err(|err| ReloadError::new(format!("cannot list {dir}: {err}")))?;
        let path = entry.path();
        if path.is_dir() {
            list_files(base, path, out)?;
        } else if let Ok(relative) = path.strip_prefix(base) {
            out.push(relative.as_str().replace('\\', "/"));
        }
    }
    Ok(())
}

/// Holds the loaded artefact version and swaps it on reload.
#[derive(Debug, Default)]
pub struct ArtefactState {
    current: RwLock<Option<Arc<LoadedArtefact>>>,
}

impl ArtefactState {
    /// Create a state with nothing loaded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The version handlers should serve, if one is loaded.
    #[must_use]
    pub fn current(&self) -> Option<Arc<LoadedArtefact>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ArtefactReloader for ArtefactState {
    fn reload(&self, artefact: &InstalledArtefact) -> Result<(), ReloadError> {
        let loaded = Arc::new(LoadedArtefact::load(artefact)?);
        info!(
            "loaded artefact {} ({} bytes, {} files)",
            loaded.digest,
            loaded.size_bytes,
            loaded.files.len()
        );
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(loaded);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::fs;
    use tempfile::TempDir;

    struct Dir {
        _temp: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn dir() -> Dir {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).expect("UTF-8 path");
        Dir { _temp: temp, root }
    }

    fn installed(path: Utf8PathBuf, digest: &str, unpacked: bool) -> InstalledArtefact {
        InstalledArtefact {
            path,
            digest: digest.to_owned(),
            size_bytes: 7,
            unpacked,
        }
    }

    #[rstest]
    fn single_file_reload_replaces_current(dir: Dir) {
        let path = dir.root.join("model.pkl");
        fs::write(&path, b"weights").expect("write");
        let state = ArtefactState::new();
        assert!(state.current().is_none());

        state.reload(&installed(path.clone(), "d1", false)).expect("reload");

        let current = state.current().expect("loaded");
        assert_eq!(current.path, path);
        assert_eq!(current.digest, "d1");
        assert!(current.files.is_empty());
    }

    #[rstest]
    fn directory_reload_lists_nested_files(dir: Dir) {
        let path = dir.root.join("model");
        fs::create_dir_all(path.join("layers")).expect("mkdir");
        fs::write(path.join("config.json"), b"{}").expect("write");
        fs::write(path.join("layers/0.bin"), b"0").expect("write");
        let state = ArtefactState::new();

        state.reload(&installed(path, "d2", true)).expect("reload");

        let current = state.current().expect("loaded");
        assert_eq!(current.files, ["config.json", "layers/0.bin"]);
    }

    #[rstest]
    fn failed_reload_keeps_previous_version(dir: Dir) {
        let path = dir.root.join("model.pkl");
        fs::write(&path, b"weights").expect("write");
        let state = ArtefactState::new();
        state.reload(&installed(path, "d1", false)).expect("first reload");

        let err = state
            .reload(&installed(dir.root.join("gone.pkl"), "d2", false))
            .expect_err("missing file");

        assert!(err.to_string().contains("gone.pkl"));
        assert_eq!(state.current().expect("still loaded").digest, "d1");
    }

    #[rstest]
    fn kind_mismatch_is_rejected(dir: Dir) {
        let path = dir.root.join("model.pkl");
        fs::write(&path, b"weights").expect("write");

        let err = LoadedArtefact::load(&installed(path, "d1", true)).expect_err("not a dir");

        assert!(err.to_string().contains("should be a directory"));
    }
}
