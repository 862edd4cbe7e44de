//! Content-derived chunk identity.

use sha2::{Digest, Sha256};

/// SHA-256 convenience wrapper used for file identity.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Deterministic backend key for one chunk of one file.
///
/// `hex(sha256(filename || index_be_u32 || file_hash))`, lower-case. The
/// same (filename, index, file hash) triple maps to the same key in every
/// session, which is what makes compensating deletes possible after a
/// partial upload.
pub fn chunk_id(filename: &str, index: u32, file_hash: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update(index.to_be_bytes());
    hasher.update(file_hash);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_is_deterministic() {
        let hash = sha256(b"content");
        assert_eq!(chunk_id("file", 0, &hash), chunk_id("file", 0, &hash));
    }

    #[test]
    fn chunk_id_varies_with_each_input() {
        let hash = sha256(b"content");
        let other = sha256(b"other content");
        let base = chunk_id("file", 0, &hash);

        assert_ne!(base, chunk_id("file2", 0, &hash));
        assert_ne!(base, chunk_id("file", 1, &hash));
        assert_ne!(base, chunk_id("file", 0, &other));
    }

    #[test]
    fn chunk_id_matches_manual_construction() {
        let file_hash = sha256(b"hello world");
        let mut preimage = Vec::new();
        preimage.extend_from_slice(b"file");
        preimage.extend_from_slice(&[0, 0, 0, 2]);
        preimage.extend_from_slice(&file_hash);

        assert_eq!(chunk_id("file", 2, &file_hash), hex::encode(sha256(&preimage)));
    }

    #[test]
    fn chunk_id_is_lowercase_hex() {
        let id = chunk_id("file", 0, &sha256(b"x"));
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
