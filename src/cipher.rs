//! Reversible pseudonymization of platform user ids.
//!
//! The platform's numeric user id is encrypted with AES-256-CBC under a key
//! derived from the deployment's identity secret, and the ciphertext is
//! hex-encoded into an [`OpaqueUserId`].
//!
//! # Determinism
//!
//! The IV is fixed, so the same id always produces the same ciphertext. The
//! opaque id is the join key for local user records and must be stable.
//! This is a pseudonymization scheme, not general-purpose encryption: anyone
//! observing two opaque ids learns whether they belong to the same user.
//! Changing the IV or the secret invalidates every stored user key.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};
use crate::types::OpaqueUserId;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Fixed initialization vector shared by every encryption.
const FIXED_IV: [u8; BLOCK_SIZE] = *b"1234567890123456";

/// Encrypts platform user ids into opaque ids and back.
///
/// Construct once at startup and share by reference; the key is immutable.
#[derive(Clone)]
pub struct IdentityCipher {
    key: [u8; 32],
}

impl IdentityCipher {
    /// Derive the cipher key as SHA-256 of `secret`.
    pub fn new(secret: &str) -> Self {
        let key: [u8; 32] = Sha256::digest(secret.as_bytes()).into();
        Self { key }
    }

    /// Encrypt a platform user id.
    pub fn encrypt(&self, platform_id: i64) -> OpaqueUserId {
        OpaqueUserId::new(self.seal(platform_id.to_string().as_bytes()))
    }

    /// Decrypt an opaque id back to the platform user id.
    ///
    /// Fails with [`AuthError::Format`] on invalid hex, a ciphertext that is
    /// not a whole number of blocks, corrupt padding, or a non-numeric
    /// plaintext.
    pub fn decrypt(&self, opaque: &str) -> AuthResult<i64> {
        let ciphertext =
            hex::decode(opaque).map_err(|e| AuthError::Format(format!("invalid hex: {}", e)))?;

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(AuthError::Format(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let plaintext = Aes256CbcDec::new(&self.key.into(), &FIXED_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| AuthError::Format("invalid padding".to_string()))?;

        let digits = std::str::from_utf8(&plaintext)
            .map_err(|_| AuthError::Format("plaintext is not utf-8".to_string()))?;

        digits
            .parse::<i64>()
            .map_err(|e| AuthError::Format(format!("plaintext is not an integer: {}", e)))
    }

    fn seal(&self, plaintext: &[u8]) -> String {
        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &FIXED_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        hex::encode(ciphertext)
    }
}

impl std::fmt::Debug for IdentityCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::block_padding::NoPadding;
    use proptest::prelude::*;

    fn cipher() -> IdentityCipher {
        IdentityCipher::new("test-identity-secret")
    }

    /// Encrypt raw blocks without adding padding.
    fn seal_raw(cipher: &IdentityCipher, block: &[u8]) -> String {
        let ciphertext = Aes256CbcEnc::new(&cipher.key.into(), &FIXED_IV.into())
            .encrypt_padded_vec_mut::<NoPadding>(block);
        hex::encode(ciphertext)
    }

    #[test]
    fn test_roundtrip() {
        let cipher = cipher();
        for id in [0i64, 1, 12345, 777_000, i64::MAX] {
            let opaque = cipher.encrypt(id);
            assert_eq!(cipher.decrypt(opaque.as_str()).unwrap(), id);
        }
    }

    #[test]
    fn test_encryption_is_deterministic() {
        let a = cipher().encrypt(12345);
        let b = cipher().encrypt(12345);
        assert_eq!(a, b);
        assert_ne!(a, cipher().encrypt(12346));
    }

    #[test]
    fn test_output_is_lowercase_hex_blocks() {
        let opaque = cipher().encrypt(12345);
        // "12345" pads to one block
        assert_eq!(opaque.as_str().len(), BLOCK_SIZE * 2);
        assert!(opaque
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));

        // 16 digits fill a block, so padding takes a whole second one
        let long = cipher().encrypt(1_000_000_000_000_000);
        assert_eq!(long.as_str().len(), BLOCK_SIZE * 4);
        let sixteen = cipher().encrypt(1_000_000_000_000_000 / 1000 + 1);
        assert_eq!(sixteen.as_str().len(), BLOCK_SIZE * 4);
    }

    #[test]
    fn test_secret_changes_ciphertext() {
        let other = IdentityCipher::new("another-secret");
        assert_ne!(cipher().encrypt(12345), other.encrypt(12345));
    }

    #[test]
    fn test_decrypt_invalid_hex() {
        let result = cipher().decrypt("not-hex!");
        assert!(matches!(result, Err(AuthError::Format(_))));

        let result = cipher().decrypt("abc");
        assert!(matches!(result, Err(AuthError::Format(_))));
    }

    #[test]
    fn test_decrypt_bad_length() {
        assert!(matches!(cipher().decrypt(""), Err(AuthError::Format(_))));
        assert!(matches!(cipher().decrypt("00ff"), Err(AuthError::Format(_))));
    }

    #[test]
    fn test_decrypt_zero_padding_byte() {
        let cipher = cipher();
        let block = *b"123456789012345\0";
        let opaque = seal_raw(&cipher, &block);
        assert!(matches!(cipher.decrypt(&opaque), Err(AuthError::Format(_))));
    }

    #[test]
    fn test_decrypt_padding_larger_than_block() {
        let cipher = cipher();
        let mut block = [b'1'; BLOCK_SIZE];
        block[15] = (BLOCK_SIZE + 1) as u8;
        let opaque = seal_raw(&cipher, &block);
        assert!(matches!(cipher.decrypt(&opaque), Err(AuthError::Format(_))));
    }

    #[test]
    fn test_decrypt_non_numeric_plaintext() {
        let cipher = cipher();
        let opaque = cipher.seal(b"not-a-number");
        assert!(matches!(cipher.decrypt(&opaque), Err(AuthError::Format(_))));
    }

    #[test]
    fn test_decrypt_with_wrong_secret_fails_or_differs() {
        let opaque = cipher().encrypt(12345);
        let other = IdentityCipher::new("another-secret");
        match other.decrypt(opaque.as_str()) {
            Ok(id) => assert_ne!(id, 12345),
            Err(e) => assert!(matches!(e, AuthError::Format(_))),
        }
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", cipher());
        assert!(debug.starts_with("IdentityCipher"));
        assert!(!debug.contains("key"));
    }

    proptest! {
        #[test]
        fn prop_decrypt_inverts_encrypt(id in 0i64..=i64::MAX) {
            let cipher = cipher();
            let opaque = cipher.encrypt(id);
            prop_assert_eq!(cipher.decrypt(opaque.as_str()).unwrap(), id);
        }
    }
}
