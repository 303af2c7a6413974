//! Artefact fetch and hot-swap pipeline.
//!
//! This crate downloads an artefact (a single file or a zip archive of a
//! directory) from blob storage, stages it beside the live location, promotes
//! it with one atomic rename, unpacks archives, and asks the host to reload.
//! A request in flight keeps reading either the old or the new artefact,
//! never a partial one.
//!
//! # Modules
//!
//! - [`blob`] - Blob store seam with HTTP and directory-backed stores
//! - [`descriptor`] - Deriving what to fetch from the configured path
//! - [`error`] - Fetch error taxonomy
//! - [`installer`] - The fetch-and-install pipeline and reload hook
//! - [`plan`] - Staging locations for one fetch
//! - [`retry`] - Caller-side retry policy for transient failures
//! - [`slot`] - Single in-flight fetch guard

pub mod blob;
pub mod descriptor;
pub mod error;
pub mod installer;
pub mod plan;
pub mod retry;
pub mod slot;

pub use blob::{BlobError, BlobStore, DirectoryBlobStore, HttpBlobStore};
pub use descriptor::{ArchiveFormat, ArtefactDescriptor, DescriptorError};
pub use error::FetchError;
pub use installer::{
    ArtefactInstaller, ArtefactReloader, FetchOutcome, InstallStatus, InstalledArtefact,
    ReloadError,
};
pub use plan::StagingPlan;
pub use retry::RetryPolicy;

#[cfg(any(test, feature = "test-support"))]
pub use blob::MockBlobStore;
#[cfg(any(test, feature = "test-support"))]
pub use installer::MockArtefactReloader;
