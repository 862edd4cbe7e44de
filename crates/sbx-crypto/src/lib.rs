//! sbx-crypto: the cryptographic floor the shardbox pipeline stands on.
//!
//! Chunk envelope: AES-256-CBC with PKCS#5 padding, keyed by
//! PBKDF2-HMAC-SHA1 over a per-file master key, authenticated with
//! HMAC-SHA256 over the ciphertext.
//!
//! ```text
//! master_key (32 random bytes, lives inside the PGP-encrypted reference)
//!   └── derived_key = PBKDF2-SHA1(master_key, salt, iterations)
//!         ├── AES-256-CBC per chunk:  [16B IV][8B salt][PKCS#5 ciphertext]
//!         └── HMAC-SHA256(ciphertext) per chunk
//! ```
//!
//! The reference artifact itself is encrypted to the owner's OpenPGP key
//! and wrapped in ASCII armor with a fixed version header.

pub mod aes;
pub mod armor;
pub mod ident;
pub mod kdf;
pub mod mac;
pub mod openpgp;

pub use aes::{aes_decrypt, aes_encrypt, salt_from_ciphertext, AesMode};
pub use armor::{decode_armored, encode_armored, is_armored};
pub use ident::{chunk_id, sha256};
pub use kdf::{derive_key, xor_keys, DerivedKey, MasterKey};
pub use mac::{hmac_sha256, hmac_verify};
pub use openpgp::{
    generate_keypair, new_pgp_keypair, pgp_decrypt, pgp_encrypt, pgp_sign, pgp_verify,
    read_armored_keyring, Keyring,
};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// PBKDF2 salt size in bytes; the salt travels in clear inside each chunk.
pub const SALT_SIZE: usize = 8;

/// Symmetric key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// HMAC-SHA256 tag size in bytes.
pub const HMAC_SIZE: usize = 32;

/// Floor for the PBKDF2 iteration count.
pub const MIN_ITERATIONS: u32 = 10_000;

/// Armor block label used for handshake blobs and encrypted references.
pub const ARMOR_BLOCK_TYPE: &str = "EN1GM4 HANDSHAKE";

/// Armor `Version:` header, fixed for cross-tool interop.
pub const ARMOR_VERSION: &str = "En1gm4 v1.0.0 (GnuPG v1.4.10)";
