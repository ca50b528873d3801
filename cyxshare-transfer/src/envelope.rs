//! Crypto envelope
//!
//! Orders encryption around the transfer pipeline: files are sealed before
//! the root digest is computed, and opened only from a [`VerifiedPayload`],
//! so decryption can never run ahead of the integrity check.

use crate::executor::VerifiedPayload;
use bytes::Bytes;
use cyxshare_core::crypto::{generate_salt, SALT_SIZE};
use cyxshare_core::{Aes256GcmCipher, Cipher, EncryptionKey, Iv, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Where the key of an encrypted upload ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyCustody {
    /// The key goes back to the uploader only
    #[default]
    SelfCustody,
    /// The key is written into the pointer record
    EmbedInRecord,
}

/// Ciphertext ready for upload
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Bytes,
    pub iv: Iv,
}

/// Key material for a new encrypted upload
pub struct SealingKey {
    pub key: EncryptionKey,
    /// Set when the key was derived from a passphrase
    pub salt: Option<[u8; SALT_SIZE]>,
}

impl SealingKey {
    /// Fresh random key
    pub fn random() -> Self {
        Self {
            key: EncryptionKey::generate(),
            salt: None,
        }
    }

    /// Key derived from a passphrase with a fresh salt
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        let salt = generate_salt();
        let key = EncryptionKey::derive_from_password(passphrase.as_bytes(), &salt)?;
        Ok(Self {
            key,
            salt: Some(salt),
        })
    }
}

/// Sequences encryption before upload and decryption after verification
#[derive(Clone)]
pub struct CryptoEnvelope {
    cipher: Arc<dyn Cipher>,
}

impl Default for CryptoEnvelope {
    fn default() -> Self {
        Self::new(Arc::new(Aes256GcmCipher))
    }
}

impl CryptoEnvelope {
    pub fn new(cipher: Arc<dyn Cipher>) -> Self {
        Self { cipher }
    }

    /// Encrypt a plaintext file before it reaches the uploader
    pub fn seal(&self, plaintext: &[u8], key: &EncryptionKey) -> Result<Sealed> {
        let (ciphertext, iv) = self.cipher.encrypt(plaintext, key)?;
        debug!(
            plaintext = plaintext.len(),
            ciphertext = ciphertext.len(),
            "Sealed file"
        );
        Ok(Sealed {
            ciphertext: Bytes::from(ciphertext),
            iv,
        })
    }

    /// Decrypt a verified download
    pub fn open(&self, payload: VerifiedPayload, key: &EncryptionKey, iv: &Iv) -> Result<Bytes> {
        let root = *payload.root();
        let plaintext = self.cipher.decrypt(payload.as_bytes(), key, iv)?;
        debug!(root = %root, plaintext = plaintext.len(), "Opened file");
        Ok(Bytes::from(plaintext))
    }

    /// Hand back a verified plaintext download unchanged
    pub fn pass_through(&self, payload: VerifiedPayload) -> Bytes {
        payload.into_bytes()
    }
}
