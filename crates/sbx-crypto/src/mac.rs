//! HMAC-SHA256 chunk authentication.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::HMAC_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Authenticate `message` under `key`.
pub fn hmac_sha256(message: &[u8], key: &[u8]) -> [u8; HMAC_SIZE] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Constant-time verification of an HMAC-SHA256 tag.
pub fn hmac_verify(message: &[u8], tag: &[u8], key: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_verifies() {
        let tag = hmac_sha256(b"message", b"key");
        assert!(hmac_verify(b"message", &tag, b"key"));
    }

    #[test]
    fn flipped_message_bit_fails() {
        let tag = hmac_sha256(b"message", b"key");
        assert!(!hmac_verify(b"messagf", &tag, b"key"));
    }

    #[test]
    fn flipped_tag_bit_fails() {
        let mut tag = hmac_sha256(b"message", b"key");
        tag[0] ^= 0x01;
        assert!(!hmac_verify(b"message", &tag, b"key"));
    }

    #[test]
    fn flipped_key_bit_fails() {
        let tag = hmac_sha256(b"message", b"key");
        assert!(!hmac_verify(b"message", &tag, b"kez"));
    }

    #[test]
    fn truncated_tag_fails() {
        let tag = hmac_sha256(b"message", b"key");
        assert!(!hmac_verify(b"message", &tag[..16], b"key"));
    }

    #[test]
    fn rfc_4231_case_2() {
        let tag = hmac_sha256(b"what do ya want for nothing?", b"Jefe");
        assert_eq!(
            tag.to_vec(),
            hex::decode("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
                .unwrap()
        );
    }
}
