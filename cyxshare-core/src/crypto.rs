//! Encryption capability for CyxShare
//!
//! Provides:
//! - The `Cipher` capability the transfer pipeline encrypts through
//! - AES-256-GCM implementation (authenticated encryption)
//! - Key derivation from passphrases using Argon2
//!
//! The pipeline never looks inside a cipher: it hands over plaintext and a
//! key, stores the returned IV in the pointer record, and gives both back
//! on download.

use crate::error::{CyxShareError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits), used as the record IV
pub const IV_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Salt size for passphrase-derived keys
pub const SALT_SIZE: usize = 16;

/// Symmetric encryption capability
pub trait Cipher: Send + Sync {
    /// Encrypt `plaintext`, returning the ciphertext and the IV used
    fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> Result<(Vec<u8>, Iv)>;

    /// Decrypt `ciphertext` produced with `key` and `iv`
    fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey, iv: &Iv) -> Result<Vec<u8>>;
}

/// Per-encryption initialization vector
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Generate a new random IV
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        Self(iv)
    }

    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| CyxShareError::Decryption(format!("Invalid IV encoding: {}", e)))?;
        if bytes.len() != IV_SIZE {
            return Err(CyxShareError::Decryption(format!(
                "Invalid IV length: expected {}, got {}",
                IV_SIZE,
                bytes.len()
            )));
        }
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes);
        Ok(Self(iv))
    }
}

impl fmt::Debug for Iv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iv({})", hex::encode(self.0))
    }
}

/// AES-256-GCM encryption key
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != KEY_SIZE {
            return Err(CyxShareError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(slice);
        Ok(Self(key))
    }

    /// Derive key from password using Argon2
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> Result<Self> {
        use argon2::password_hash::SaltString;
        use argon2::{Argon2, PasswordHasher};

        // Create salt string (must be base64-encoded)
        let salt_b64 =
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD_NO_PAD, salt);
        let salt_string = SaltString::from_b64(&salt_b64)
            .map_err(|e| CyxShareError::Encryption(e.to_string()))?;

        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password, &salt_string)
            .map_err(|e| CyxShareError::Encryption(e.to_string()))?;

        let hash_bytes = password_hash
            .hash
            .ok_or_else(|| CyxShareError::Encryption("No hash output".to_string()))?;

        Self::from_slice(hash_bytes.as_bytes())
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Encode for display or embedding in a pointer record
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parse a key previously produced by [`EncryptionKey::to_base64`]
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| CyxShareError::Decryption(format!("Invalid key encoding: {}", e)))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey([REDACTED])")
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        // Zeroize key on drop
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Generate a random salt for passphrase key derivation
pub fn generate_salt() -> [u8; SALT_SIZE] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// AES-256-GCM cipher
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256GcmCipher;

impl Cipher for Aes256GcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &EncryptionKey) -> Result<(Vec<u8>, Iv)> {
        let iv = Iv::generate();
        let nonce = Nonce::from_slice(iv.as_bytes());

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CyxShareError::Encryption(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CyxShareError::Encryption(e.to_string()))?;

        Ok((ciphertext, iv))
    }

    fn decrypt(&self, ciphertext: &[u8], key: &EncryptionKey, iv: &Iv) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CyxShareError::Decryption(
                "Data too short for encrypted content".to_string(),
            ));
        }

        let nonce = Nonce::from_slice(iv.as_bytes());

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CyxShareError::Decryption(e.to_string()))?;

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CyxShareError::Decryption("Authentication failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_roundtrip() {
        let cipher = Aes256GcmCipher;
        let key = EncryptionKey::generate();
        let plaintext = b"secret message";

        let (ciphertext, iv) = cipher.encrypt(plaintext, &key).unwrap();
        let decrypted = cipher.decrypt(&ciphertext, &key, &iv).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let cipher = Aes256GcmCipher;
        let key = EncryptionKey::generate();

        let (ciphertext, iv) = cipher.encrypt(&[], &key).unwrap();
        assert_eq!(ciphertext.len(), TAG_SIZE);
        assert!(cipher.decrypt(&ciphertext, &key, &iv).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher = Aes256GcmCipher;
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();

        let (ciphertext, iv) = cipher.encrypt(b"secret", &key1).unwrap();
        let result = cipher.decrypt(&ciphertext, &key2, &iv);

        assert!(matches!(result, Err(CyxShareError::Decryption(_))));
    }

    #[test]
    fn test_wrong_iv_fails() {
        let cipher = Aes256GcmCipher;
        let key = EncryptionKey::generate();

        let (ciphertext, _) = cipher.encrypt(b"secret", &key).unwrap();
        assert!(cipher.decrypt(&ciphertext, &key, &Iv::generate()).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = Aes256GcmCipher;
        let key = EncryptionKey::generate();

        let (mut ciphertext, iv) = cipher.encrypt(b"secret", &key).unwrap();
        ciphertext[0] ^= 0xFF;

        assert!(cipher.decrypt(&ciphertext, &key, &iv).is_err());
    }

    #[test]
    fn test_encryption_overhead() {
        let cipher = Aes256GcmCipher;
        let key = EncryptionKey::generate();
        let plaintext = vec![0u8; 1000];

        let (ciphertext, _) = cipher.encrypt(&plaintext, &key).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_key_and_iv_base64_roundtrip() {
        let key = EncryptionKey::generate();
        let restored = EncryptionKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_bytes(), restored.as_bytes());

        let iv = Iv::generate();
        assert_eq!(Iv::from_base64(&iv.to_base64()).unwrap(), iv);
        assert!(Iv::from_base64("AAAA").is_err());
    }

    #[test]
    fn test_password_derivation_is_deterministic() {
        let salt = generate_salt();
        let a = EncryptionKey::derive_from_password(b"correct horse", &salt).unwrap();
        let b = EncryptionKey::derive_from_password(b"correct horse", &salt).unwrap();
        let c = EncryptionKey::derive_from_password(b"battery staple", &salt).unwrap();

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = EncryptionKey::generate();
        assert_eq!(format!("{:?}", key), "EncryptionKey([REDACTED])");
    }
}
