//! sbx-refs: the reference artifact.
//!
//! A reference is the only thing an owner keeps after an upload: a small
//! descriptor naming every chunk, the key material to open them and the
//! tags to authenticate them. It is serialised as self-describing JSON
//! (struct-ordered keys, so re-encoding a decoded reference is
//! byte-stable) and always travels PGP-encrypted to its owner.
//!
//! Decoding is fail-closed: unknown fields and any structural violation
//! are rejected.

use serde::{Deserialize, Serialize};

use sbx_core::{SbxError, SbxResult};
use sbx_crypto::{chunk_id, HMAC_SIZE, KEY_SIZE, MIN_ITERATIONS, SALT_SIZE};

/// One chunk entry: backend key plus HMAC-SHA256 over the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkRef {
    pub id: String,
    #[serde(with = "hex::serde")]
    pub hmac: Vec<u8>,
}

/// The persisted descriptor of a sharded file.
///
/// `chunks` is ordered: entry `i` holds chunk `i` of the plaintext, and
/// its `id` is re-derivable from `(filename, i, file_hash)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceFile {
    pub filename: String,
    pub size: u64,
    pub chunk_size: u64,
    #[serde(with = "hex::serde")]
    pub file_hash: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub master_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub chunks: Vec<ChunkRef>,
}

impl ReferenceFile {
    /// Number of chunks a file of `size` splits into.
    pub fn expected_chunks(size: u64, chunk_size: u64) -> u64 {
        if chunk_size == 0 {
            return 0;
        }
        size.div_ceil(chunk_size)
    }

    /// Canonical encoding. Encoding is deterministic for a given value.
    pub fn to_bytes(&self) -> SbxResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SbxError::MalformedReference(format!("encode: {e}")))
    }

    /// Decode and validate. A reference that decodes but violates any
    /// structural invariant is rejected.
    pub fn from_bytes(data: &[u8]) -> SbxResult<Self> {
        let reference: Self = serde_json::from_slice(data)
            .map_err(|e| SbxError::MalformedReference(format!("decode: {e}")))?;
        reference.validate()?;
        Ok(reference)
    }

    /// Check every structural invariant of the reference.
    pub fn validate(&self) -> SbxResult<()> {
        if self.chunk_size == 0 {
            return Err(SbxError::MalformedReference(
                "chunk_size must be positive".into(),
            ));
        }
        if self.file_hash.len() != 32 {
            return Err(SbxError::MalformedReference(format!(
                "file_hash must be 32 bytes, got {}",
                self.file_hash.len()
            )));
        }
        if self.master_key.len() != KEY_SIZE {
            return Err(SbxError::MalformedReference(format!(
                "master_key must be {KEY_SIZE} bytes, got {}",
                self.master_key.len()
            )));
        }
        if self.salt.len() != SALT_SIZE {
            return Err(SbxError::MalformedReference(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                self.salt.len()
            )));
        }
        if self.iterations < MIN_ITERATIONS {
            return Err(SbxError::MalformedReference(format!(
                "iterations must be at least {MIN_ITERATIONS}, got {}",
                self.iterations
            )));
        }

        let expected = Self::expected_chunks(self.size, self.chunk_size);
        if self.chunks.len() as u64 != expected {
            return Err(SbxError::MalformedReference(format!(
                "{} chunk(s) listed, {expected} expected for {} bytes at chunk_size {}",
                self.chunks.len(),
                self.size,
                self.chunk_size
            )));
        }

        for (index, chunk) in self.chunks.iter().enumerate() {
            if chunk.hmac.len() != HMAC_SIZE {
                return Err(SbxError::MalformedReference(format!(
                    "chunk {index}: hmac must be {HMAC_SIZE} bytes, got {}",
                    chunk.hmac.len()
                )));
            }
            let derived = chunk_id(&self.filename, index as u32, &self.file_hash);
            if chunk.id != derived {
                return Err(SbxError::MalformedReference(format!(
                    "chunk {index}: id does not derive from (filename, index, file_hash)"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_crypto::sha256;

    fn sample() -> ReferenceFile {
        let filename = "notes.txt".to_string();
        let file_hash = sha256(b"eleven bytes").to_vec();
        let chunks = (0..3)
            .map(|i| ChunkRef {
                id: chunk_id(&filename, i, &file_hash),
                hmac: vec![i as u8; HMAC_SIZE],
            })
            .collect();
        ReferenceFile {
            filename,
            size: 12,
            chunk_size: 4,
            file_hash,
            master_key: vec![0xAB; KEY_SIZE],
            salt: vec![1, 2, 3, 4, 5, 6, 7, 8],
            iterations: MIN_ITERATIONS,
            chunks,
        }
    }

    #[test]
    fn roundtrip_is_bit_stable() {
        let reference = sample();
        let bytes = reference.to_bytes().unwrap();
        let decoded = ReferenceFile::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, reference);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn field_names_are_part_of_the_format() {
        let bytes = sample().to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        for field in [
            "filename", "size", "chunk_size", "file_hash", "master_key", "salt", "iterations",
            "chunks", "id", "hmac",
        ] {
            assert!(text.contains(&format!("\"{field}\"")), "missing {field}");
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut value: serde_json::Value =
            serde_json::from_slice(&sample().to_bytes().unwrap()).unwrap();
        value["surprise"] = serde_json::json!(true);
        let bytes = serde_json::to_vec(&value).unwrap();

        let err = ReferenceFile::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), "MalformedReference");
    }

    #[test]
    fn chunk_count_must_match_size() {
        let mut reference = sample();
        reference.chunks.pop();
        assert_eq!(reference.validate().unwrap_err().kind(), "MalformedReference");
    }

    #[test]
    fn chunk_ids_must_derive_from_inputs() {
        let mut reference = sample();
        reference.chunks[1].id = reference.chunks[2].id.clone();
        assert_eq!(reference.validate().unwrap_err().kind(), "MalformedReference");
    }

    #[test]
    fn low_iteration_count_rejected() {
        let mut reference = sample();
        reference.iterations = MIN_ITERATIONS - 1;
        assert_eq!(reference.validate().unwrap_err().kind(), "MalformedReference");
    }

    #[test]
    fn wrong_salt_length_rejected() {
        let mut reference = sample();
        reference.salt = vec![0; 4];
        assert_eq!(reference.validate().unwrap_err().kind(), "MalformedReference");
    }

    #[test]
    fn wrong_hmac_length_rejected() {
        let mut reference = sample();
        reference.chunks[0].hmac = vec![0; 16];
        assert_eq!(reference.validate().unwrap_err().kind(), "MalformedReference");
    }

    #[test]
    fn empty_file_has_zero_chunks() {
        let reference = ReferenceFile {
            filename: "empty".into(),
            size: 0,
            chunk_size: 4096,
            file_hash: sha256(b"").to_vec(),
            master_key: vec![0; KEY_SIZE],
            salt: vec![0; SALT_SIZE],
            iterations: MIN_ITERATIONS,
            chunks: vec![],
        };
        reference.validate().unwrap();
    }

    #[test]
    fn expected_chunks_rounds_up() {
        assert_eq!(ReferenceFile::expected_chunks(0, 4), 0);
        assert_eq!(ReferenceFile::expected_chunks(1, 4), 1);
        assert_eq!(ReferenceFile::expected_chunks(4, 4), 1);
        assert_eq!(ReferenceFile::expected_chunks(5, 4), 2);
        assert_eq!(ReferenceFile::expected_chunks(11, 4), 3);
    }
}
