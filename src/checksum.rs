//! File checksum and stat signature utilities.
//!
//! Pure leaf module: computes SHA-256 content hashes and cheap
//! size/modification-time signatures used by the scanner to decide when a
//! full re-hash is actually necessary.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Read buffer size for streaming checksum computation.
const HASH_BUF_SIZE: usize = 8192;

/// Computes the SHA-256 checksum of a file, returned as lowercase hex.
///
/// Streams the file in 8KB chunks so large package archives don't get
/// loaded into memory.
pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_BUF_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Computes the SHA-256 checksum of an in-memory buffer as lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Cheap per-file signature: modification time (epoch millis) and size.
///
/// Equality is exact. The scanner trusts a matching signature as "unchanged"
/// and only falls back to checksums when one of these fields differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime_ms: i64,
    /// File size in bytes.
    pub size: u64,
}

impl FileSignature {
    /// Reads the signature for a file from its metadata.
    pub fn probe(path: &Path) -> io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta.modified()?;
        Ok(Self {
            mtime_ms: epoch_millis(mtime),
            size: meta.len(),
        })
    }
}

/// Converts a `SystemTime` to milliseconds since the Unix epoch.
///
/// Times before the epoch map to negative values.
pub fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_sha256_known_vector() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let sum = file_sha256(&path).unwrap();
        assert_eq!(
            sum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_file_sha256_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let sum = file_sha256(&path).unwrap();
        assert_eq!(
            sum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_hex_matches_file_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let payload = vec![7u8; 100_000];
        std::fs::write(&path, &payload).unwrap();

        assert_eq!(file_sha256(&path).unwrap(), sha256_hex(&payload));
    }

    #[test]
    fn test_signature_tracks_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sig");
        std::fs::write(&path, b"1234").unwrap();

        let sig = FileSignature::probe(&path).unwrap();
        assert_eq!(sig.size, 4);
        assert!(sig.mtime_ms > 0);
    }

    #[test]
    fn test_signature_equality_is_exact() {
        let a = FileSignature {
            mtime_ms: 1_700_000_000_001,
            size: 10,
        };
        let b = FileSignature {
            mtime_ms: 1_700_000_000_002,
            size: 10,
        };
        assert_ne!(a, b);
        assert_eq!(a, a);
    }
}
