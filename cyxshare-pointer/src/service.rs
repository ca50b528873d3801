//! Share service
//!
//! Wires the uploader, retrieval executor, crypto envelope and share-code
//! protocol into the two user-facing flows:
//!
//! ```text
//! share: [seal] -> upload -> mint code -> build record -> publish
//! fetch: resolve -> retrieve + verify root -> [open] -> plaintext
//! ```

use crate::cache::PointerCache;
use crate::index::PointerIndex;
use crate::protocol::{ProtocolConfig, ShareCodeProtocol};
use bytes::Bytes;
use cyxshare_core::{
    CyxShareError, EncryptionKey, FileHandle, PointerRecord, PublishedPointer, Result, ShareCode,
    Stage,
};
use cyxshare_transfer::{
    CancellationToken, CryptoEnvelope, DownloadReport, KeyCustody, RetrievalExecutor, SealingKey,
    StorageNetwork, TransferConfig, Uploader,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// How a shared file is encrypted
#[derive(Debug, Clone, Default)]
pub enum Encryption {
    #[default]
    None,
    /// Fresh random key
    RandomKey,
    /// Key derived from a passphrase; the salt goes into the record
    Passphrase(String),
}

/// Options for [`ShareService::share`]
#[derive(Debug, Clone, Default)]
pub struct ShareOptions {
    pub encryption: Encryption,
    pub custody: KeyCustody,
    /// Free-form uploader identity stored in the record
    pub uploader: String,
}

impl ShareOptions {
    pub fn plaintext() -> Self {
        Self::default()
    }

    pub fn encrypted(encryption: Encryption) -> Self {
        Self {
            encryption,
            ..Self::default()
        }
    }

    pub fn with_custody(mut self, custody: KeyCustody) -> Self {
        self.custody = custody;
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = uploader.into();
        self
    }
}

/// Result of a successful share
#[derive(Debug)]
pub struct SharedFile {
    pub code: ShareCode,
    pub record: PointerRecord,
    pub pointer: PublishedPointer,
    /// The key, returned to the uploader for encrypted shares
    pub key: Option<EncryptionKey>,
}

/// Key material supplied by whoever fetches an encrypted file
pub enum DecryptionKey {
    Key(EncryptionKey),
    Passphrase(String),
}

/// Result of a successful fetch
#[derive(Debug)]
pub struct FetchedFile {
    pub record: PointerRecord,
    pub data: Bytes,
    pub report: DownloadReport,
}

/// End-to-end share and fetch
pub struct ShareService {
    uploader: Arc<Uploader>,
    executor: Arc<RetrievalExecutor>,
    envelope: CryptoEnvelope,
    protocol: ShareCodeProtocol,
}

impl ShareService {
    pub fn new(
        network: Arc<dyn StorageNetwork>,
        transfer: TransferConfig,
        protocol: ProtocolConfig,
    ) -> Self {
        let uploader = Arc::new(Uploader::new(network.clone(), transfer.layout));
        let executor = Arc::new(RetrievalExecutor::new(network, transfer));
        let protocol = ShareCodeProtocol::new(uploader.clone(), executor.clone(), protocol);
        Self {
            uploader,
            executor,
            envelope: CryptoEnvelope::default(),
            protocol,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn PointerCache>) -> Self {
        self.protocol = self.protocol.with_cache(cache);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn PointerIndex>) -> Self {
        self.protocol = self.protocol.with_index(index);
        self
    }

    pub fn with_envelope(mut self, envelope: CryptoEnvelope) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn protocol(&self) -> &ShareCodeProtocol {
        &self.protocol
    }

    pub fn executor(&self) -> &RetrievalExecutor {
        &self.executor
    }

    /// Upload `data` and publish a share code for it
    #[instrument(skip(self, file, data, options, cancel), fields(file = %file.display_name, size = data.len()))]
    pub async fn share(
        &self,
        file: FileHandle,
        data: Bytes,
        options: ShareOptions,
        cancel: &CancellationToken,
    ) -> Result<SharedFile> {
        if file.byte_length != data.len() as u64 {
            return Err(CyxShareError::InvalidRecord(format!(
                "file handle says {} bytes, got {}",
                file.byte_length,
                data.len()
            )));
        }

        let sealing = match &options.encryption {
            Encryption::None => None,
            Encryption::RandomKey => Some(SealingKey::random()),
            Encryption::Passphrase(passphrase) => Some(SealingKey::from_passphrase(passphrase)?),
        };

        let (payload, iv) = match &sealing {
            Some(sealing) => {
                let sealed = self.envelope.seal(&data, &sealing.key)?;
                (sealed.ciphertext, Some(sealed.iv))
            }
            None => (data, None),
        };

        let receipt = self.uploader.upload_with_cancel(payload, cancel).await?;
        let code = self.protocol.mint().await?;

        let mut record = PointerRecord::new(code.clone(), receipt.root, &file)
            .with_uploader(options.uploader.clone())
            .with_transaction_ref(receipt.transaction_ref.clone());
        if let Some(iv) = &iv {
            record = record.with_encryption(iv);
        }
        if let Some(sealing) = &sealing {
            if let Some(salt) = &sealing.salt {
                record = record.with_key_salt(salt);
            }
            if options.custody == KeyCustody::EmbedInRecord {
                record = record.with_embedded_key(&sealing.key);
            }
        }

        if cancel.is_cancelled() {
            return Err(CyxShareError::Cancelled {
                stage: Stage::Pointer,
            });
        }
        let pointer = self.protocol.publish(&record, cancel).await?;

        info!(
            code = %code,
            root = %receipt.root,
            encrypted = record.is_encrypted,
            "File shared"
        );
        Ok(SharedFile {
            code,
            record,
            pointer,
            key: sealing.map(|s| s.key),
        })
    }

    /// Resolve `code`, download the file and decrypt it if needed
    #[instrument(skip(self, key, cancel))]
    pub async fn fetch(
        &self,
        code: &str,
        key: Option<DecryptionKey>,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile> {
        let record = self.protocol.resolve(code, cancel).await?;
        let retrieval = self.executor.retrieve(&record.root_digest, cancel).await?;
        debug!(summary = %retrieval.report.summary(), "Retrieved file");

        let data = if record.is_encrypted {
            let iv = record.parsed_iv()?.ok_or_else(|| {
                CyxShareError::InvalidRecord("encrypted record without IV".to_string())
            })?;
            let key = decryption_key(&record, key)?;
            self.envelope.open(retrieval.payload, &key, &iv)?
        } else {
            self.envelope.pass_through(retrieval.payload)
        };

        if data.len() as u64 != record.file_size {
            return Err(CyxShareError::InvalidRecord(format!(
                "record says {} bytes, file has {}",
                record.file_size,
                data.len()
            )));
        }

        info!(code = %record.share_code, size = data.len(), "File fetched");
        Ok(FetchedFile {
            record,
            data,
            report: retrieval.report,
        })
    }
}

/// Pick the key for an encrypted record: caller key, then passphrase, then
/// the key embedded in the record.
fn decryption_key(record: &PointerRecord, supplied: Option<DecryptionKey>) -> Result<EncryptionKey> {
    match supplied {
        Some(DecryptionKey::Key(key)) => Ok(key),
        Some(DecryptionKey::Passphrase(passphrase)) => {
            let salt = record.parsed_key_salt()?.ok_or_else(|| {
                CyxShareError::Decryption("record has no passphrase salt".to_string())
            })?;
            EncryptionKey::derive_from_password(passphrase.as_bytes(), &salt)
        }
        None => record.embedded_key()?.ok_or_else(|| {
            CyxShareError::Decryption(
                "file is encrypted and no key was supplied or embedded".to_string(),
            )
        }),
    }
}
