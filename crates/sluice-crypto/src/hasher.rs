use sha1::{Digest as _, Sha1};
use sluice_types::{Digest, DIGEST_LEN};

/// Incremental SHA-1 content hasher.
///
/// Feed bytes with [`update`](Self::update) as they pass through and call
/// [`finalize`](Self::finalize) once the stream has ended. Never holds more
/// than the caller's current chunk.
#[derive(Clone, Default)]
pub struct ContentHasher {
    inner: Sha1,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb the next chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes absorbed so far.
    pub fn bytes_hashed(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher and produce the digest.
    pub fn finalize(self) -> Digest {
        let out = self.inner.finalize();
        let mut raw = [0u8; DIGEST_LEN];
        raw.copy_from_slice(&out);
        Digest::from_raw(raw)
    }

    /// Digest of an in-memory buffer.
    pub fn digest_bytes(data: &[u8]) -> Digest {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Verify that data produces the expected digest.
    pub fn verify(data: &[u8], expected: &Digest) -> bool {
        Self::digest_bytes(data) == *expected
    }
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHasher")
            .field("bytes", &self.bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(
            ContentHasher::digest_bytes(b"").to_hex(),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            ContentHasher::digest_bytes(b"abc").to_hex(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut h = ContentHasher::new();
        h.update(b"hello ");
        h.update(b"world");
        assert_eq!(h.bytes_hashed(), 11);
        assert_eq!(h.finalize(), ContentHasher::digest_bytes(b"hello world"));
    }

    #[test]
    fn verify_detects_tampering() {
        let d = ContentHasher::digest_bytes(b"original");
        assert!(ContentHasher::verify(b"original", &d));
        assert!(!ContentHasher::verify(b"tampered", &d));
    }
}
