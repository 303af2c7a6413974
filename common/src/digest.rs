//! Streaming SHA-256 digests of artefact files.

use camino::Utf8Path;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read};

/// Compute the lowercase hex SHA-256 digest of the file at `path`.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be opened or read.
///
/// # Examples
///
/// ```
/// use camino::Utf8PathBuf;
/// use gateway_common::sha256_file;
///
/// let temp = tempfile::tempdir().unwrap();
/// let path = Utf8PathBuf::try_from(temp.path().join("empty.bin")).unwrap();
/// std::fs::write(&path, b"").unwrap();
/// assert_eq!(
///     sha256_file(&path).unwrap(),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn sha256_file(path: &Utf8Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }
    Ok(format!("{:x}", hasher.finalize()))
}
