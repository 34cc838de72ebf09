//! Symmetric sealing of token payloads and random token generation.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::{
    general_purpose::{STANDARD, URL_SAFE},
    Engine,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("entropy source failure: {0}")]
    Entropy(#[from] rand::Error),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("ciphertext is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// AES-256-GCM cipher. Output is `base64(nonce || ciphertext || tag)`.
#[derive(Clone)]
pub struct PayloadCipher {
    cipher: Aes256Gcm,
}

impl PayloadCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce_bytes)?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD.decode(sealed)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Decrypt);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

/// `len` random bytes from the OS, URL-safe base64 encoded.
pub fn random_token(len: usize) -> Result<String, CryptoError> {
    let mut bytes = vec![0u8; len];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn seal_then_open_returns_plaintext() {
        let cipher = PayloadCipher::new(KEY);
        let sealed = cipher.seal(b"{\"role\":3}").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"{\"role\":3}");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let cipher = PayloadCipher::new(KEY);
        assert_ne!(cipher.seal(b"same").unwrap(), cipher.seal(b"same").unwrap());
    }

    #[test]
    fn wrong_key_or_tampering_fails() {
        let sealed = PayloadCipher::new(KEY).seal(b"secret").unwrap();
        let other = PayloadCipher::new(b"ffffffffffffffffffffffffffffffff");
        assert!(matches!(other.open(&sealed), Err(CryptoError::Decrypt)));

        let mut raw = STANDARD.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = STANDARD.encode(raw);
        assert!(PayloadCipher::new(KEY).open(&tampered).is_err());
        assert!(PayloadCipher::new(KEY).open("not base64!").is_err());
    }

    #[test]
    fn random_tokens_are_url_safe_and_sized() {
        let token = random_token(32).unwrap();
        assert_eq!(token.len(), 44);
        assert!(!token.contains('+') && !token.contains('/'));
        assert_ne!(token, random_token(32).unwrap());
        assert_eq!(random_token(16).unwrap().len(), 24);
    }
}
