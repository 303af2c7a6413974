//! Filesystem helpers shared by the artefact gateway: staging directories,
//! atomic promotion, in-place archive extraction, and content digests.

pub mod archive;
pub mod digest;
pub mod staging;

pub use archive::{ArchiveError, extract_in_place, extracted_dir_for};
pub use digest::sha256_file;
pub use staging::{StagingError, atomic_replace, ensure_parent_directories};
