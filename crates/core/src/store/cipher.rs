//! Encryption of remote credentials at rest.
//!
//! Credentials are sealed with AES-256-GCM under a fresh random nonce and
//! stored as base64 of `nonce || ciphertext`.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("Invalid credential key: {0}")]
    InvalidKey(String),

    #[error("Credential could not be decrypted")]
    Decrypt,

    #[error("Credential could not be encrypted")]
    Encrypt,
}

/// Seals and opens stored credentials.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialCipher(..)")
    }
}

impl CredentialCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Cipher keyed from base64 of exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
            CipherError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self::new(&key))
    }

    /// Cipher with a key that only lives as long as the process.
    ///
    /// Credentials sealed with it cannot be opened after a restart.
    pub fn ephemeral() -> Self {
        Self {
            cipher: Aes256Gcm::new(&Aes256Gcm::generate_key(OsRng)),
        }
    }

    /// A new random key, base64 encoded, suitable for `credentials.key`.
    pub fn generate_key() -> String {
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let sealed = STANDARD.decode(encoded).map_err(|_| CipherError::Decrypt)?;
        if sealed.len() <= NONCE_LEN {
            return Err(CipherError::Decrypt);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_then_decrypt() {
        let cipher = CredentialCipher::ephemeral();
        let sealed = cipher.encrypt("secret-token").unwrap();

        assert!(!sealed.contains("secret-token"));
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "secret-token");
    }

    #[test]
    fn test_nonce_differs_per_encryption() {
        let cipher = CredentialCipher::ephemeral();
        assert_ne!(
            cipher.encrypt("token").unwrap(),
            cipher.encrypt("token").unwrap()
        );
    }

    #[test]
    fn test_other_key_cannot_decrypt() {
        let sealed = CredentialCipher::ephemeral().encrypt("token").unwrap();
        let other = CredentialCipher::ephemeral();
        assert_eq!(other.decrypt(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_tampered_ciphertext_is_rejected() {
        let cipher = CredentialCipher::ephemeral();
        let sealed = cipher.encrypt("token").unwrap();
        let mut bytes = STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        assert_eq!(
            cipher.decrypt(&STANDARD.encode(bytes)),
            Err(CipherError::Decrypt)
        );
        assert_eq!(cipher.decrypt("not base64!"), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_key_from_base64() {
        let key = CredentialCipher::generate_key();
        let first = CredentialCipher::from_base64(&key).unwrap();
        let second = CredentialCipher::from_base64(&key).unwrap();

        let sealed = first.encrypt("token").unwrap();
        assert_eq!(second.decrypt(&sealed).unwrap(), "token");
    }

    #[test]
    fn test_short_key_is_rejected() {
        let short = STANDARD.encode([7u8; 16]);
        assert!(matches!(
            CredentialCipher::from_base64(&short),
            Err(CipherError::InvalidKey(_))
        ));
        assert!(matches!(
            CredentialCipher::from_base64("%%%"),
            Err(CipherError::InvalidKey(_))
        ));
    }
}
