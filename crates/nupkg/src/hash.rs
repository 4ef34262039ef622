//! Content hashing for package archives.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256, Sha512};
use std::io::Read;

/// Digest algorithm for package content hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashAlgorithm {
    Sha256,
    #[default]
    Sha512,
}

impl HashAlgorithm {
    /// Canonical algorithm name as stored in package records.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
        }
    }

    /// Sidecar file extension for this algorithm (`sha512` → `*.sha512`).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Digest a byte slice, returning the base64-encoded hash.
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => BASE64.encode(Sha256::digest(data)),
            Self::Sha512 => BASE64.encode(Sha512::digest(data)),
        }
    }

    /// Digest a reader in fixed-size chunks, returning the base64-encoded
    /// hash. Never buffers the whole input.
    pub fn digest_reader<R: Read>(&self, mut reader: R) -> std::io::Result<String> {
        fn stream<D: Digest, R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
            let mut hasher = D::new();
            let mut chunk = [0u8; 64 * 1024];
            loop {
                let n = reader.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                hasher.update(&chunk[..n]);
            }
            Ok(hasher.finalize().to_vec())
        }
        let digest = match self {
            Self::Sha256 => stream::<Sha256, R>(&mut reader)?,
            Self::Sha512 => stream::<Sha512, R>(&mut reader)?,
        };
        Ok(BASE64.encode(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable() {
        let a = HashAlgorithm::Sha512.digest(b"hello");
        let b = HashAlgorithm::Sha512.digest(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, HashAlgorithm::Sha512.digest(b"other"));
        assert_ne!(a, HashAlgorithm::Sha256.digest(b"hello"));
    }

    #[test]
    fn test_streamed_digest_matches_buffered() {
        let data = vec![0xAB; 200_000];
        let buffered = HashAlgorithm::Sha512.digest(&data);
        let streamed = HashAlgorithm::Sha512.digest_reader(&data[..]).unwrap();
        assert_eq!(buffered, streamed);
    }

    #[test]
    fn test_names() {
        assert_eq!(HashAlgorithm::default().name(), "SHA512");
        assert_eq!(HashAlgorithm::default().extension(), "sha512");
        assert_eq!(HashAlgorithm::Sha256.name(), "SHA256");
    }
}
