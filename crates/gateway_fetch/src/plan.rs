//! Per-fetch staging locations.
//!
//! Downloads land in a scratch subtree under the artefact root
//! (`<root>/.staging/`). Keeping scratch and live paths on one filesystem is
//! what lets promotion be a single rename.

use crate::descriptor::ArtefactDescriptor;
use camino::{Utf8Path, Utf8PathBuf};

/// Name of the scratch subtree beneath the artefact root.
pub const SCRATCH_DIR: &str = ".staging";

/// Where one fetch stages its download and where it ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingPlan {
    temp_path: Utf8PathBuf,
    final_path: Utf8PathBuf,
    live_path: Utf8PathBuf,
    marker_path: Utf8PathBuf,
    lock_path: Utf8PathBuf,
}

impl StagingPlan {
    /// Lay out the staging paths for `descriptor` beneath `root`.
    ///
    /// # Examples
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use gateway_fetch::descriptor::ArtefactDescriptor;
    /// use gateway_fetch::plan::StagingPlan;
    ///
    /// let descriptor = ArtefactDescriptor::derive("models/current/", "p1/model").unwrap();
    /// let plan = StagingPlan::for_descriptor(Utf8Path::new("/srv/app"), &descriptor);
    /// assert_eq!(plan.final_path().as_str(), "/srv/app/models/current.zip");
    /// assert_eq!(plan.temp_path().as_str(), "/srv/app/.staging/models/current.zip.part");
    /// assert_eq!(plan.live_path().as_str(), "/srv/app/models/current");
    /// ```
    #[must_use]
    pub fn for_descriptor(root: &Utf8Path, descriptor: &ArtefactDescriptor) -> Self {
        let local = descriptor.local_path();
        let scratch = root.join(SCRATCH_DIR);
        let scratch_file = |suffix: &str| scratch.join(format!("{local}.{suffix}"));
        Self {
            temp_path: scratch_file("part"),
            final_path: root.join(local),
            live_path: root.join(descriptor.live_path()),
            marker_path: scratch_file("sha256"),
            lock_path: scratch_file("lock"),
        }
    }

    /// Scratch file the download is written to.
    #[must_use]
    pub fn temp_path(&self) -> &Utf8Path {
        &self.temp_path
    }

    /// Location the staged file is promoted to.
    #[must_use]
    pub fn final_path(&self) -> &Utf8Path {
        &self.final_path
    }

    /// Location handlers read from once installation completes.
    #[must_use]
    pub fn live_path(&self) -> &Utf8Path {
        &self.live_path
    }

    /// File recording the digest of the installed content.
    #[must_use]
    pub fn marker_path(&self) -> &Utf8Path {
        &self.marker_path
    }

    /// Lock file guarding the single in-flight fetch.
    #[must_use]
    pub fn lock_path(&self) -> &Utf8Path {
        &self.lock_path
    }
}
