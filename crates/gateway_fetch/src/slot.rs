//! Single-slot guard allowing one in-flight fetch per artefact.
//!
//! The slot combines an in-process flag with an exclusive advisory lock on a
//! file in the scratch subtree, so a second trigger is rejected whether it
//! comes from another task or another process sharing the artefact root.

use crate::error::{FetchError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use gateway_common::ensure_parent_directories;
use log::debug;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

/// Guards the single in-flight fetch for one artefact.
#[derive(Debug)]
pub struct FetchSlot {
    lock_path: Utf8PathBuf,
    busy: AtomicBool,
}

impl FetchSlot {
    /// Create a slot backed by the lock file at `lock_path`.
    #[must_use]
    pub fn new(lock_path: &Utf8Path) -> Self {
        Self {
            lock_path: lock_path.to_owned(),
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a fetch currently holds this slot in this process.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the slot, or fail immediately if it is taken.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InProgress`] when another fetch holds the slot,
    /// and [`FetchError::Io`] or [`FetchError::Staging`] when the lock file
    /// cannot be created.
    pub fn try_acquire(&self) -> Result<FetchGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(self.in_progress());
        }

        match self.lock_file() {
            Ok(file) => {
                debug!("acquired fetch slot {}", self.lock_path);
                Ok(FetchGuard { slot: self, file })
            }
            Err(err) => {
                self.busy.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn lock_file(&self) -> Result<fs::File> {
        ensure_parent_directories(&self.lock_path)?;
        let io_error = |source| FetchError::Io {
            path: self.lock_path.clone(),
            source,
        };
        let file = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(io_error)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(file),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(self.in_progress()),
            Err(source) => Err(io_error(source)),
        }
    }

    fn in_progress(&self) -> FetchError {
        FetchError::InProgress {
            path: self.lock_path.clone(),
        }
    }
}

/// Held for the duration of one fetch; releases the slot when dropped.
#[derive(Debug)]
pub struct FetchGuard<'a> {
    slot: &'a FetchSlot,
    file: fs::File,
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("failed to unlock {}: {e}", self.slot.lock_path);
        }
        self.slot.busy.store(false, Ordering::Release);
    }
}
