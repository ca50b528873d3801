//! Pointer record schema
//!
//! A [`PointerRecord`] is the durable metadata object that maps a share code
//! to the root digest of the stored bytes plus the attributes needed to hand
//! the file back to a downloader. It is built once per successful upload and
//! never updated in place.

use crate::crypto::{EncryptionKey, Iv};
use crate::digest::RootDigest;
use crate::error::{CyxShareError, Result};
use crate::share_code::ShareCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current pointer record schema version
pub const RECORD_VERSION: u32 = 1;

/// Attributes of a file being uploaded, discarded once the record is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    pub display_name: String,
    pub byte_length: u64,
    pub mime_type: String,
}

impl FileHandle {
    pub fn new(display_name: impl Into<String>, byte_length: u64) -> Self {
        Self {
            display_name: display_name.into(),
            byte_length,
            mime_type: "application/octet-stream".to_string(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// Durable code -> content mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerRecord {
    pub version: u32,
    pub share_code: ShareCode,
    pub root_digest: RootDigest,
    pub file_name: String,
    /// Plaintext size in bytes
    pub file_size: u64,
    pub mime_type: String,
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// Present only when the uploader chose to store the key with the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Argon2 salt for passphrase-derived keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_salt: Option<String>,
    pub uploader: String,
    pub upload_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
}

impl PointerRecord {
    /// Start a plaintext record for `file` stored under `root_digest`
    pub fn new(share_code: ShareCode, root_digest: RootDigest, file: &FileHandle) -> Self {
        Self {
            version: RECORD_VERSION,
            share_code,
            root_digest,
            file_name: file.display_name.clone(),
            file_size: file.byte_length,
            mime_type: file.mime_type.clone(),
            is_encrypted: false,
            iv: None,
            encryption_key: None,
            key_salt: None,
            uploader: String::new(),
            upload_time: Utc::now(),
            transaction_ref: None,
        }
    }

    /// Mark the record encrypted with `iv`
    pub fn with_encryption(mut self, iv: &Iv) -> Self {
        self.is_encrypted = true;
        self.iv = Some(iv.to_base64());
        self
    }

    /// Embed the key itself (explicit opt-in)
    pub fn with_embedded_key(mut self, key: &EncryptionKey) -> Self {
        self.encryption_key = Some(key.to_base64());
        self
    }

    pub fn with_key_salt(mut self, salt: &[u8]) -> Self {
        self.key_salt = Some(STANDARD.encode(salt));
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }

    pub fn with_transaction_ref(mut self, transaction_ref: Option<String>) -> Self {
        self.transaction_ref = transaction_ref;
        self
    }

    pub fn with_upload_time(mut self, upload_time: DateTime<Utc>) -> Self {
        self.upload_time = upload_time;
        self
    }

    /// Structural checks a record must pass before it is trusted
    pub fn validate(&self) -> Result<()> {
        if self.version != RECORD_VERSION {
            return Err(CyxShareError::InvalidRecord(format!(
                "unsupported record version {}",
                self.version
            )));
        }
        if self.is_encrypted {
            if self.iv.is_none() {
                return Err(CyxShareError::InvalidRecord(
                    "encrypted record without IV".to_string(),
                ));
            }
            self.parsed_iv()?;
        } else if self.iv.is_some() || self.encryption_key.is_some() || self.key_salt.is_some() {
            return Err(CyxShareError::InvalidRecord(
                "plaintext record carries key material".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize to canonical JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a record
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: PointerRecord = serde_json::from_slice(bytes)
            .map_err(|e| CyxShareError::InvalidRecord(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    /// The record's IV; a malformed field is an invalid record
    pub fn parsed_iv(&self) -> Result<Option<Iv>> {
        self.iv
            .as_deref()
            .map(|s| {
                Iv::from_base64(s)
                    .map_err(|e| CyxShareError::InvalidRecord(format!("invalid iv: {}", e)))
            })
            .transpose()
    }

    pub fn embedded_key(&self) -> Result<Option<EncryptionKey>> {
        self.encryption_key
            .as_deref()
            .map(|s| {
                EncryptionKey::from_base64(s).map_err(|e| {
                    CyxShareError::InvalidRecord(format!("invalid embedded key: {}", e))
                })
            })
            .transpose()
    }

    pub fn parsed_key_salt(&self) -> Result<Option<Vec<u8>>> {
        self.key_salt
            .as_deref()
            .map(|s| {
                STANDARD
                    .decode(s)
                    .map_err(|e| CyxShareError::InvalidRecord(format!("invalid key salt: {}", e)))
            })
            .transpose()
    }
}

/// Where a published record lives on the storage network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPointer {
    pub record_root: RootDigest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::compute_root_digest;
    use crate::share_code::ShareCodeFormat;

    fn sample() -> PointerRecord {
        let code = ShareCodeFormat::default()
            .parse("cyx://share-ab12-cd34-ef56-gh78")
            .unwrap();
        let file = FileHandle::new("report.pdf", 1234).with_mime_type("application/pdf");
        PointerRecord::new(code, compute_root_digest(b"report"), &file)
            .with_uploader("alice")
            .with_transaction_ref(Some("tx-42".to_string()))
    }

    #[test]
    fn test_json_uses_camel_case() {
        let json = String::from_utf8(sample().to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"shareCode\":\"cyx://share-ab12-cd34-ef56-gh78\""));
        assert!(json.contains("\"rootDigest\":\"0x"));
        assert!(json.contains("\"isEncrypted\":false"));
        assert!(json.contains("\"transactionRef\":\"tx-42\""));
        assert!(!json.contains("encryptionKey"));
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let record = sample();
        let parsed = PointerRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_encrypted_record_carries_iv() {
        let iv = Iv::generate();
        let key = EncryptionKey::generate();
        let record = sample().with_encryption(&iv).with_embedded_key(&key);

        let parsed = PointerRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert!(parsed.is_encrypted);
        assert_eq!(parsed.parsed_iv().unwrap(), Some(iv));
        assert_eq!(
            parsed.embedded_key().unwrap().unwrap().as_bytes(),
            key.as_bytes()
        );
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut record = sample();
        record.version = 99;
        let err = PointerRecord::from_bytes(&record.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, CyxShareError::InvalidRecord(_)));
    }

    #[test]
    fn test_encrypted_without_iv_rejected() {
        let mut record = sample();
        record.is_encrypted = true;
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_malformed_iv_is_invalid_record() {
        let mut record = sample().with_encryption(&Iv::generate());
        record.iv = Some("not-base64!".to_string());
        let err = PointerRecord::from_bytes(&record.to_bytes().unwrap()).unwrap_err();
        assert!(matches!(err, CyxShareError::InvalidRecord(_)));
        assert_eq!(err.stage(), crate::error::Stage::Pointer);

        record.iv = Some(STANDARD.encode([0u8; 5]));
        assert!(matches!(
            record.parsed_iv(),
            Err(CyxShareError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_malformed_embedded_key_is_invalid_record() {
        let mut record = sample().with_encryption(&Iv::generate());
        record.encryption_key = Some(STANDARD.encode([1u8; 7]));
        assert!(matches!(
            record.embedded_key(),
            Err(CyxShareError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_plaintext_with_key_rejected() {
        let record = sample().with_embedded_key(&EncryptionKey::generate());
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let err = PointerRecord::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, CyxShareError::InvalidRecord(_)));
    }

    #[test]
    fn test_published_pointer_json() {
        let pointer = PublishedPointer {
            record_root: compute_root_digest(b"record"),
            transaction_ref: None,
        };
        let json = serde_json::to_string(&pointer).unwrap();
        assert!(json.contains("recordRoot"));
        let back: PublishedPointer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pointer);
    }
}
