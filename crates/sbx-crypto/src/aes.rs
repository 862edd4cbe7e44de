//! AES-256-CBC chunk envelope with PKCS#5 padding.
//!
//! Encrypted blob layout (binary):
//! ```text
//! [16 bytes: random IV][8 bytes: salt][N*16 bytes: CBC(PKCS#5(plaintext))]
//! ```
//!
//! IV and salt ride in clear at the front of the blob, so a blob is
//! self-describing: possession of the derived key is enough to open it.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use sbx_core::{SbxError, SbxResult};

use crate::{BLOCK_SIZE, KEY_SIZE, SALT_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Cipher mode for the chunk envelope. CBC is the only mode the stored
/// artifact format defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesMode {
    Cbc,
}

/// Minimum length of a well-formed blob: IV + salt + one padded block.
pub const MIN_CIPHERTEXT_LEN: usize = BLOCK_SIZE + SALT_SIZE + BLOCK_SIZE;

/// Encrypt `plaintext` under AES-256-CBC with a fresh random IV.
///
/// The salt is not used by the cipher itself; it is carried in the blob so
/// the decrypting side can re-derive the key without extra context.
pub fn aes_encrypt(key: &[u8], salt: &[u8], plaintext: &[u8], mode: AesMode) -> SbxResult<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(SbxError::InvalidArgument(format!(
            "key must be {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    if plaintext.is_empty() {
        return Err(SbxError::InvalidArgument(
            "plaintext must not be empty".into(),
        ));
    }
    if salt.len() != SALT_SIZE {
        return Err(SbxError::InvalidArgument(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    let AesMode::Cbc = mode;

    let mut iv = [0u8; BLOCK_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key, &iv)
        .map_err(|e| SbxError::InvalidArgument(format!("cipher init: {e}")))?;
    let body = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(BLOCK_SIZE + SALT_SIZE + body.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(salt);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decrypt a blob produced by [`aes_encrypt`] and strip the PKCS#5 padding.
pub fn aes_decrypt(key: &[u8], ciphertext: &[u8], mode: AesMode) -> SbxResult<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(SbxError::InvalidArgument(format!(
            "key must be {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    if ciphertext.len() < MIN_CIPHERTEXT_LEN {
        return Err(SbxError::MalformedCiphertext(format!(
            "{} bytes, minimum is {MIN_CIPHERTEXT_LEN}",
            ciphertext.len()
        )));
    }
    let AesMode::Cbc = mode;

    let (iv, rest) = ciphertext.split_at(BLOCK_SIZE);
    let (_salt, body) = rest.split_at(SALT_SIZE);
    if body.len() % BLOCK_SIZE != 0 {
        return Err(SbxError::MalformedCiphertext(format!(
            "body of {} bytes is not a multiple of the block size",
            body.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| SbxError::InvalidArgument(format!("cipher init: {e}")))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| SbxError::MalformedPadding)
}

/// Extract the clear salt embedded in an encrypted blob.
pub fn salt_from_ciphertext(ciphertext: &[u8]) -> SbxResult<[u8; SALT_SIZE]> {
    if ciphertext.len() < BLOCK_SIZE + SALT_SIZE {
        return Err(SbxError::MalformedCiphertext(format!(
            "{} bytes, too short to carry a salt",
            ciphertext.len()
        )));
    }
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&ciphertext[BLOCK_SIZE..BLOCK_SIZE + SALT_SIZE]);
    Ok(salt)
}
