//! SHA256 checksums for backed-up artifacts.

use keyrot_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// Calculates the SHA256 checksum of a file.
pub fn calculate_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| Error::io_at(path, e))?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| Error::io_at(path, e))?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Calculates the SHA256 checksum of in-memory bytes.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
