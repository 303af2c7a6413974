//! Fetch and hot-swap orchestration.
//!
//! [`ArtefactInstaller::fetch_and_install`] runs the pipeline:
//! claim slot → stage → download → validate → promote → extract → reload.
//! The previously live artefact is untouched until the single promotion
//! rename, so any failure before that point leaves it serving.

use crate::blob::BlobStore;
use crate::descriptor::ArtefactDescriptor;
use crate::error::{FetchError, Result};
use crate::plan::StagingPlan;
use crate::slot::FetchSlot;
use camino::{Utf8Path, Utf8PathBuf};
use gateway_common::{atomic_replace, ensure_parent_directories, extract_in_place, sha256_file};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

/// The artefact as installed on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledArtefact {
    /// Path handlers read from: the unpacked directory or the file.
    pub path: Utf8PathBuf,
    /// SHA-256 of the downloaded object.
    pub digest: String,
    /// Size in bytes of the downloaded object.
    pub size_bytes: u64,
    /// Whether the object was an unpacked archive.
    pub unpacked: bool,
}

/// What a successful fetch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New content was promoted to the live path.
    Installed(InstalledArtefact),
    /// The remote object matches what is already live; nothing was replaced.
    Unchanged(InstalledArtefact),
}

impl FetchOutcome {
    /// The live artefact after the fetch.
    #[must_use]
    pub fn artefact(&self) -> &InstalledArtefact {
        match self {
            Self::Installed(artefact) | Self::Unchanged(artefact) => artefact,
        }
    }

    /// Short label for logs and responses.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Installed(_) => "installed",
            Self::Unchanged(_) => "unchanged",
        }
    }
}

/// Digests of what is on disk versus what the host has loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallStatus {
    /// Digest of the installed artefact, if any.
    pub installed: Option<String>,
    /// Digest of the artefact the host last reloaded successfully.
    pub loaded: Option<String>,
}

impl InstallStatus {
    /// Whether the host is serving something other than what is on disk.
    #[must_use]
    pub fn is_diverged(&self) -> bool {
        self.installed.is_some() && self.installed != self.loaded
    }
}

/// Error reported by a host reload hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct ReloadError {
    reason: String,
}

impl ReloadError {
    /// Create a reload error with a human-readable reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Host hook refreshing in-memory state after a new artefact lands.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
pub trait ArtefactReloader {
    /// Load `artefact` into memory.
    ///
    /// # Errors
    ///
    /// Returns a [`ReloadError`] when the artefact cannot be loaded. The
    /// installed artefact stays in place.
    fn reload(&self, artefact: &InstalledArtefact) -> std::result::Result<(), ReloadError>;
}

/// Owns the fetch pipeline for one artefact.
pub struct ArtefactInstaller {
    store: Arc<dyn BlobStore + Send + Sync>,
    descriptor: ArtefactDescriptor,
    plan: StagingPlan,
    slot: FetchSlot,
    status: Mutex<InstallStatus>,
}

impl ArtefactInstaller {
    /// Create an installer for `descriptor` beneath the artefact `root`.
    ///
    /// A digest marker left by a previous run is honoured as long as the
    /// live artefact it describes still exists.
    #[must_use]
    pub fn new(
        store: Arc<dyn BlobStore + Send + Sync>,
        descriptor: ArtefactDescriptor,
        root: &Utf8Path,
    ) -> Self {
        let plan = StagingPlan::for_descriptor(root, &descriptor);
        let slot = FetchSlot::new(plan.lock_path());
        let installed = read_marker(&plan);
        Self {
            store,
            descriptor,
            plan,
            slot,
            status: Mutex::new(InstallStatus {
                installed,
                loaded: None,
            }),
        }
    }

    /// The descriptor this installer fetches.
    #[must_use]
    pub fn descriptor(&self) -> &ArtefactDescriptor {
        &self.descriptor
    }

    /// Staging locations for this artefact.
    #[must_use]
    pub fn plan(&self) -> &StagingPlan {
        &self.plan
    }

    /// Snapshot of installed versus loaded digests.
    #[must_use]
    pub fn status(&self) -> InstallStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a fetch is currently running in this process.
    #[must_use]
    pub fn is_fetching(&self) -> bool {
        self.slot.is_busy()
    }

    /// Fetch the remote object and install it as the live artefact.
    ///
    /// When the downloaded content matches the installed artefact nothing is
    /// replaced and [`FetchOutcome::Unchanged`] is returned. The reloader
    /// runs whenever the host has not yet loaded the live content.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InProgress`] if another fetch holds the slot.
    /// - [`FetchError::Transient`] / [`FetchError::Permanent`] for storage
    ///   failures, [`FetchError::EmptyObject`] for empty objects. The
    ///   previous artefact is untouched.
    /// - [`FetchError::ExtractFailed`] / [`FetchError::ReloadFailed`] after
    ///   the new artefact reached disk.
    pub fn fetch_and_install(&self, reloader: Option<&dyn ArtefactReloader>) -> Result<FetchOutcome> {
        let _guard = self.slot.try_acquire()?;
        let key = self.descriptor.remote_key();

        ensure_parent_directories(self.plan.temp_path())?;
        ensure_parent_directories(self.plan.final_path())?;

        let size_bytes = self.download(key)?;
        let digest = match sha256_file(self.plan.temp_path()) {
            Ok(digest) => digest,
            Err(source) => {
                self.discard_temp();
                return Err(FetchError::Io {
                    path: self.plan.temp_path().to_owned(),
                    source,
                });
            }
        };

        let artefact = InstalledArtefact {
            path: self.plan.live_path().to_owned(),
            digest,
            size_bytes,
            unpacked: self.descriptor.is_archive(),
        };

        if self.is_duplicate(&artefact.digest) {
            self.discard_temp();
            info!(
                "{key} unchanged ({}); keeping {}",
                artefact.digest, artefact.path
            );
            self.reload_if_stale(&artefact, reloader)?;
            return Ok(FetchOutcome::Unchanged(artefact));
        }

        if let Err(err) = self.clear_marker() {
            self.discard_temp();
            return Err(err);
        }
        if let Err(err) = atomic_replace(self.plan.temp_path(), self.plan.final_path()) {
            self.discard_temp();
            return Err(err.into());
        }
        info!("installed {key} at {}", self.plan.final_path());

        if self.descriptor.is_archive() {
            extract_in_place(self.plan.final_path()).map_err(|source| {
                error!(
                    "extracting {} failed; previous directory keeps serving: {source}",
                    self.plan.final_path()
                );
                FetchError::ExtractFailed {
                    path: self.plan.final_path().to_owned(),
                    source,
                }
            })?;
        }

        self.record_installed(&artefact.digest);
        self.reload_if_stale(&artefact, reloader)?;
        Ok(FetchOutcome::Installed(artefact))
    }

    /// Download into the temp path and validate size; returns the size.
    fn download(&self, key: &str) -> Result<u64> {
        let expected = self.store.head_size(key)?;
        if expected == 0 {
            return Err(FetchError::EmptyObject {
                key: key.to_owned(),
            });
        }

        debug!("downloading {key} ({expected} bytes) to {}", self.plan.temp_path());
        if let Err(err) = self.store.download(key, self.plan.temp_path()) {
            self.discard_temp();
            return Err(err.into());
        }

        let actual = match fs::metadata(self.plan.temp_path()) {
            Ok(metadata) => metadata.len(),
            Err(source) => {
                return Err(FetchError::Io {
                    path: self.plan.temp_path().to_owned(),
                    source,
                });
            }
        };
        if actual == 0 {
            self.discard_temp();
            return Err(FetchError::EmptyObject {
                key: key.to_owned(),
            });
        }
        if actual != expected {
            self.discard_temp();
            return Err(FetchError::Transient {
                key: key.to_owned(),
                reason: format!("downloaded {actual} bytes, expected {expected}"),
            });
        }
        Ok(actual)
    }

    fn is_duplicate(&self, digest: &str) -> bool {
        self.plan.live_path().exists()
            && read_marker(&self.plan).is_some_and(|installed| installed == digest)
    }

    /// Forget the installed digest before the live path changes, so a crash
    /// mid-promotion never leaves an old marker beside new content.
    fn clear_marker(&self) -> Result<()> {
        let marker = self.plan.marker_path();
        match fs::remove_file(marker) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FetchError::Io {
                path: marker.to_owned(),
                source,
            }),
        }
    }

    fn record_installed(&self, digest: &str) {
        if let Err(e) = fs::write(self.plan.marker_path(), digest) {
            warn!("could not record digest at {}: {e}", self.plan.marker_path());
        }
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .installed = Some(digest.to_owned());
    }

    fn reload_if_stale(
        &self,
        artefact: &InstalledArtefact,
        reloader: Option<&dyn ArtefactReloader>,
    ) -> Result<()> {
        let Some(reloader) = reloader else {
            return Ok(());
        };
        let previously_loaded = {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.installed = Some(artefact.digest.clone());
            if status.loaded.as_deref() == Some(artefact.digest.as_str()) {
                debug!("host already serves {}", artefact.digest);
                return Ok(());
            }
            status.loaded.clone()
        };

        // The fetch slot serialises reloads, so the status lock is not held
        // while the host loads.
        match reloader.reload(artefact) {
            Ok(()) => {
                info!("host reloaded {} ({})", artefact.path, artefact.digest);
                self.status
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .loaded = Some(artefact.digest.clone());
                Ok(())
            }
            Err(err) => {
                error!(
                    "reload of {} failed; disk has {} but host serves {}: {err}",
                    artefact.path,
                    artefact.digest,
                    previously_loaded.as_deref().unwrap_or("nothing")
                );
                Err(FetchError::ReloadFailed {
                    path: artefact.path.clone(),
                    digest: artefact.digest.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    fn discard_temp(&self) {
        let temp = self.plan.temp_path();
        if temp.exists() {
            if let Err(e) = fs::remove_file(temp) {
                warn!("could not remove staged file {temp}: {e}");
            }
        }
    }
}

fn read_marker(plan: &StagingPlan) -> Option<String> {
    if !plan.live_path().exists() {
        return None;
    }
    fs::read_to_string(plan.marker_path())
        .ok()
        .map(|digest| digest.trim().to_owned())
        .filter(|digest| !digest.is_empty())
}

#[cfg(test)]
#[path = "installer_tests.rs"]
mod tests;
