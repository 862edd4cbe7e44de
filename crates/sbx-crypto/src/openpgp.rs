//! OpenPGP envelope for reference artifacts: encrypt/decrypt, detached
//! signatures, keyring parsing and keypair generation.
//!
//! Packet preferences follow the stored-artifact convention: RSA-4096
//! primary + encryption subkey, AES-256, ZLIB compression, SHA-256.

use pgp::composed::{
    Deserializable, Message, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
    StandaloneSignature, SubkeyParamsBuilder,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::ser::Serialize;
use pgp::types::{CompressionAlgorithm, SecretKeyTrait};
use smallvec::smallvec;

use sbx_core::{SbxError, SbxResult};

pub use pgp::composed::KeyType;

fn perr(e: pgp::errors::Error) -> SbxError {
    SbxError::Pgp(e.to_string())
}

/// Parsed key material plus the passphrase that unlocks its secret parts.
pub struct Keyring {
    secret: Vec<SignedSecretKey>,
    public: Vec<SignedPublicKey>,
    passphrase: Option<String>,
}

impl Keyring {
    /// Assemble a keyring from already-parsed keys.
    pub fn from_keys(
        secret: Vec<SignedSecretKey>,
        public: Vec<SignedPublicKey>,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            secret,
            public,
            passphrase,
        }
    }

    pub fn secret_keys(&self) -> Vec<&SignedSecretKey> {
        self.secret.iter().collect()
    }

    pub fn public_keys(&self) -> Vec<&SignedPublicKey> {
        self.public.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.secret.is_empty() && self.public.is_empty()
    }

    fn passphrase_fn(&self) -> impl Fn() -> String + Clone + '_ {
        move || self.passphrase.clone().unwrap_or_default()
    }

    /// Look a public key up by the email part of its user id.
    pub fn key_by_email(&self, email: &str) -> Option<&SignedPublicKey> {
        let needle = format!("<{email}>");
        self.public.iter().find(|key| {
            key.details
                .users
                .iter()
                .any(|user| String::from_utf8_lossy(user.id.id()).contains(&needle))
        })
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("secret", &self.secret.len())
            .field("public", &self.public.len())
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Parse an armored key block (public or private) into a [`Keyring`].
///
/// When a passphrase is given it is validated against every encrypted
/// secret key up front, so later decrypt calls cannot fail half-way on a
/// wrong password.
pub fn read_armored_keyring(data: &[u8], passphrase: Option<&str>) -> SbxResult<Keyring> {
    let mut secret = Vec::new();
    let mut public = Vec::new();

    match SignedSecretKey::from_armor_many(data) {
        Ok((keys, _headers)) => {
            for key in keys {
                secret.push(key.map_err(perr)?);
            }
        }
        Err(_) => {
            let (keys, _headers) = SignedPublicKey::from_armor_many(data).map_err(perr)?;
            for key in keys {
                public.push(key.map_err(perr)?);
            }
        }
    }

    if secret.is_empty() && public.is_empty() {
        return Err(SbxError::Pgp("keyring contains no keys".into()));
    }

    if let Some(pass) = passphrase {
        for key in &secret {
            key.unlock(|| pass.to_string(), |_| Ok(()))
                .map_err(|e| SbxError::AuthFailure(format!("keyring passphrase: {e}")))?;
        }
    }

    Ok(Keyring {
        secret,
        public,
        passphrase: passphrase.map(str::to_string),
    })
}

/// Encrypt `data` to every recipient, optionally signing it first.
///
/// Output is the binary OpenPGP message; armor it separately when a text
/// representation is needed.
pub fn pgp_encrypt(
    data: &[u8],
    recipients: &[&SignedPublicKey],
    signer: Option<&SignedSecretKey>,
) -> SbxResult<Vec<u8>> {
    if recipients.is_empty() {
        return Err(SbxError::InvalidArgument(
            "at least one recipient is required".into(),
        ));
    }
    let mut rng = rand::thread_rng();

    let msg = Message::new_literal_bytes("", data);
    let msg = match signer {
        Some(key) => msg
            .sign(key, String::new, HashAlgorithm::SHA2_256)
            .map_err(perr)?,
        None => msg,
    };
    let msg = msg.compress(CompressionAlgorithm::ZLIB).map_err(perr)?;
    let encrypted = msg
        .encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES256, recipients)
        .map_err(perr)?;

    encrypted.to_bytes().map_err(perr)
}

/// Decrypt a binary OpenPGP message with the keyring's secret keys.
pub fn pgp_decrypt(data: &[u8], keyring: &Keyring) -> SbxResult<Vec<u8>> {
    let secret_keys = keyring.secret_keys();
    if secret_keys.is_empty() {
        return Err(SbxError::Pgp("keyring contains no secret keys".into()));
    }

    let msg = Message::from_bytes(data).map_err(perr)?;
    let (decrypted, _key_ids) = msg
        .decrypt(keyring.passphrase_fn(), &secret_keys)
        .map_err(perr)?;
    decrypted
        .get_content()
        .map_err(perr)?
        .ok_or_else(|| SbxError::Pgp("message carries no content".into()))
}

/// Produce a standalone binary signature over `msg`.
pub fn pgp_sign(msg: &[u8], signer: &SignedSecretKey) -> SbxResult<Vec<u8>> {
    let signed = Message::new_literal_bytes("", msg)
        .sign(signer, String::new, HashAlgorithm::SHA2_256)
        .map_err(perr)?;
    signed.into_signature().to_bytes().map_err(perr)
}

/// Verify a standalone signature against `msg` and a public key.
pub fn pgp_verify(signature: &[u8], msg: &[u8], public: &SignedPublicKey) -> SbxResult<()> {
    let sig = StandaloneSignature::from_bytes(signature).map_err(perr)?;
    sig.verify(public, msg)
        .map_err(|e| SbxError::IntegrityFailure(format!("signature: {e}")))
}

/// Generate a signed keypair of the given type. Split out from
/// [`new_pgp_keypair`] so callers that need typed keys (or smaller test
/// keys) skip the serialize/parse hop.
pub fn generate_keypair(
    key_type: KeyType,
    name: &str,
    comment: &str,
    email: &str,
) -> SbxResult<(SignedSecretKey, SignedPublicKey)> {
    let user_id = if comment.is_empty() {
        format!("{name} <{email}>")
    } else {
        format!("{name} ({comment}) <{email}>")
    };

    let subkey = SubkeyParamsBuilder::default()
        .key_type(key_type.clone())
        .can_encrypt(true)
        .build()
        .map_err(|e| SbxError::Pgp(format!("subkey params: {e}")))?;

    let params = SecretKeyParamsBuilder::default()
        .key_type(key_type)
        .can_certify(true)
        .can_sign(true)
        .primary_user_id(user_id)
        .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
        .preferred_hash_algorithms(smallvec![HashAlgorithm::SHA2_256])
        .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
        .subkeys(vec![subkey])
        .build()
        .map_err(|e| SbxError::Pgp(format!("key params: {e}")))?;

    let secret = params.generate().map_err(perr)?;
    let signed_secret = secret.sign(String::new).map_err(perr)?;
    let signed_public = signed_secret
        .public_key()
        .sign(&signed_secret, String::new)
        .map_err(perr)?;

    Ok((signed_secret, signed_public))
}

/// Create an RSA-4096 keypair and serialize both halves to binary packets.
pub fn new_pgp_keypair(name: &str, comment: &str, email: &str) -> SbxResult<(Vec<u8>, Vec<u8>)> {
    let (secret, public) = generate_keypair(KeyType::Rsa(4096), name, comment, email)?;
    Ok((secret.to_bytes().map_err(perr)?, public.to_bytes().map_err(perr)?))
}

/// Armor a key for on-disk storage with the standard OpenPGP labels, so
/// external tools can import it.
pub fn armor_secret_key(key: &SignedSecretKey) -> SbxResult<String> {
    key.to_armored_string(None.into()).map_err(perr)
}

pub fn armor_public_key(key: &SignedPublicKey) -> SbxResult<String> {
    key.to_armored_string(None.into()).map_err(perr)
}
