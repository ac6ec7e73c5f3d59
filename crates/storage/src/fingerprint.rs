//! Content fingerprints.
//!
//! A fingerprint is a BLAKE3 hex digest of the raw bytes. It's used for
//! change detection (and surfaced as a WebDAV entity tag), not integrity.

use crate::error::{ErrorKind, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 64 * 1024;

/// Fingerprint of an in-memory buffer.
pub fn of_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Incremental fingerprint for data hashed while it streams elsewhere.
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    hasher: blake3::Hasher,
    bytes: u64,
}
impl Fingerprinter {
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finish(&self) -> String {
        self.hasher.finalize().to_hex().to_string()
    }
}

/// Fingerprint of a file on disk, read in chunks.
pub async fn of_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await.map_err(ErrorKind::Io)?;
    let mut fingerprinter = Fingerprinter::default();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(ErrorKind::Io)?;
        if read == 0 {
            break;
        }
        fingerprinter.update(&buffer[..read]);
    }
    Ok(fingerprinter.finish())
}
