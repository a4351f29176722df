//! Content hashing
//!
//! Streams file content in 1 MiB chunks so memory stays flat regardless
//! of file size. SHA-256 is the default; BLAKE3 is selectable for large
//! libraries where hashing dominates.

use crate::config::HashAlgorithm;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 1024 * 1024;

/// Hash a file's content, hex-encoded. Blocking; call from the blocking
/// pool in async contexts.
pub fn hash_file_sync(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];

    match algorithm {
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            let mut hasher = Sha256::new();
            loop {
                let bytes_read = file.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let bytes_read = file.read(&mut buffer)?;
                if bytes_read == 0 {
                    break;
                }
                hasher.update(&buffer[..bytes_read]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}

/// Async wrapper over the blocking pool
pub async fn hash_file(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path, algorithm))
        .await
        .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[tokio::test]
    async fn test_sha256_matches_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        std::fs::write(&path, b"cratekeeper test content").unwrap();

        let hash = hash_file(&path, HashAlgorithm::Sha256).await.unwrap();
        let expected = format!("{:x}", Sha256::digest(b"cratekeeper test content"));
        assert_eq!(hash, expected);
        assert_eq!(hash.len(), 64);
    }

    #[tokio::test]
    async fn test_blake3_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.bin");
        std::fs::write(&path, b"same bytes").unwrap();

        let a = hash_file(&path, HashAlgorithm::Blake3).await.unwrap();
        let b = hash_file(&path, HashAlgorithm::Blake3).await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, hash_file(&path, HashAlgorithm::Sha256).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        assert!(hash_file(Path::new("/no/such/file"), HashAlgorithm::Sha256)
            .await
            .is_err());
    }
}
