//! Key derivation and key material types.
//!
//! PBKDF2-HMAC-SHA1 is kept for bit-compatibility with already-stored
//! artifacts; the reference format does not record the PRF, so decoders
//! assume SHA-1.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use zeroize::Zeroize;

use sbx_core::{SbxError, SbxResult};

use crate::KEY_SIZE;

/// Random per-file secret. Stored inside the PGP-encrypted reference and
/// never written anywhere in clear.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// 32-byte AES key produced by [`derive_key`]. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2-HMAC-SHA1 key derivation, output sized for AES-256.
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> SbxResult<DerivedKey> {
    if password.is_empty() {
        return Err(SbxError::InvalidArgument(
            "password must not be empty".into(),
        ));
    }
    if salt.is_empty() {
        return Err(SbxError::InvalidArgument("salt must not be empty".into()));
    }
    if iterations == 0 {
        return Err(SbxError::InvalidArgument(
            "iteration count must be positive".into(),
        ));
    }
    let mut bytes = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut bytes);
    Ok(DerivedKey { bytes })
}

/// XOR a set of equal-length keys into one. A single key returns a copy.
pub fn xor_keys(keys: &[&[u8]], required_len: usize) -> SbxResult<Vec<u8>> {
    if keys.is_empty() {
        return Err(SbxError::InvalidArgument(
            "at least one key is required".into(),
        ));
    }
    let mut out = vec![0u8; required_len];
    for key in keys {
        if key.len() != required_len {
            return Err(SbxError::InvalidArgument(format!(
                "all keys must be {required_len} bytes, got {}",
                key.len()
            )));
        }
        for (o, k) in out.iter_mut().zip(key.iter()) {
            *o ^= k;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key(b"password", b"salty", 10_000).unwrap();
        let b = derive_key(b"password", b"salty", 10_000).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derive_key_depends_on_all_inputs() {
        let base = derive_key(b"password", b"salty", 10_000).unwrap();
        let other_pw = derive_key(b"passwore", b"salty", 10_000).unwrap();
        let other_salt = derive_key(b"password", b"saltz", 10_000).unwrap();
        let other_iter = derive_key(b"password", b"salty", 10_001).unwrap();

        assert_ne!(base.as_bytes(), other_pw.as_bytes());
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        assert_ne!(base.as_bytes(), other_iter.as_bytes());
    }

    #[test]
    fn derive_key_known_vector() {
        // RFC 6070 case: PBKDF2-HMAC-SHA1("password", "salt", 2), first 20 bytes
        let key = derive_key(b"password", b"salt", 2).unwrap();
        assert_eq!(
            &key.as_bytes()[..20],
            &hex::decode("ea6c014dc72d6f8ccd1ed92ace1d41f0d8de8957").unwrap()[..]
        );
    }

    #[test]
    fn derive_key_rejects_empty_inputs() {
        assert!(derive_key(b"", b"salt", 1).is_err());
        assert!(derive_key(b"pw", b"", 1).is_err());
        assert!(derive_key(b"pw", b"salt", 0).is_err());
    }

    #[test]
    fn xor_single_key_is_a_copy() {
        let k = [0x5Au8; 32];
        let out = xor_keys(&[&k], 32).unwrap();
        assert_eq!(out, k);
    }

    #[test]
    fn xor_key_with_itself_is_zero() {
        let k = [0x5Au8; 32];
        let out = xor_keys(&[&k, &k], 32).unwrap();
        assert_eq!(out, vec![0u8; 32]);
    }

    #[test]
    fn xor_rejects_length_mismatch() {
        let a = [0u8; 32];
        let b = [0u8; 16];
        let err = xor_keys(&[&a, &b], 32).unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn master_key_debug_is_redacted() {
        let key = MasterKey::generate();
        assert!(!format!("{key:?}").contains(&hex::encode(key.as_bytes())));
    }

    #[test]
    fn generated_master_keys_differ() {
        assert_ne!(
            MasterKey::generate().as_bytes(),
            MasterKey::generate().as_bytes()
        );
    }
}
