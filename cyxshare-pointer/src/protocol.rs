//! Share-Code Protocol
//!
//! Mints share codes and moves pointer records to and from storage.
//!
//! A pointer record is published as a small file on the same
//! content-addressed network as the data it points to. Content addressing
//! only finds bytes by digest, so resolving a code needs either a local
//! cache entry or a keyed [`PointerIndex`]. Without both, resolution fails
//! with [`CyxShareError::UnresolvedShareCode`] rather than guessing.

use crate::cache::PointerCache;
use crate::index::PointerIndex;
use bytes::Bytes;
use cyxshare_core::{
    CyxShareError, PointerRecord, PublishedPointer, Result, ShareCode, ShareCodeFormat, Stage,
};
use cyxshare_transfer::{CancellationToken, RetrievalExecutor, Uploader};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Protocol configuration
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    pub format: ShareCodeFormat,
    /// Re-mint codes that the index already holds
    pub check_collisions: bool,
    /// Mint attempts before giving up when collision checks are on
    pub max_mint_attempts: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            format: ShareCodeFormat::default(),
            check_collisions: false,
            max_mint_attempts: 8,
        }
    }
}

impl ProtocolConfig {
    pub fn with_format(mut self, format: ShareCodeFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_collision_check(mut self, check_collisions: bool) -> Self {
        self.check_collisions = check_collisions;
        self
    }
}

/// Share-code protocol
pub struct ShareCodeProtocol {
    config: ProtocolConfig,
    uploader: Arc<Uploader>,
    executor: Arc<RetrievalExecutor>,
    cache: Option<Arc<dyn PointerCache>>,
    index: Option<Arc<dyn PointerIndex>>,
}

impl ShareCodeProtocol {
    pub fn new(
        uploader: Arc<Uploader>,
        executor: Arc<RetrievalExecutor>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            config,
            uploader,
            executor,
            cache: None,
            index: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn PointerCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_index(mut self, index: Arc<dyn PointerIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Mint a random code. Collisions are not checked.
    pub fn generate(&self) -> ShareCode {
        self.config.format.generate()
    }

    /// Pure grammar check
    pub fn validate(&self, code: &str) -> bool {
        self.config.format.validate(code)
    }

    /// Mint a code, re-minting on index collisions when enabled
    pub async fn mint(&self) -> Result<ShareCode> {
        let index = match (&self.index, self.config.check_collisions) {
            (Some(index), true) => index,
            _ => return Ok(self.generate()),
        };

        for attempt in 1..=self.config.max_mint_attempts {
            let code = self.generate();
            if !index.contains(code.as_str()).await? {
                return Ok(code);
            }
            warn!(code = %code, attempt = attempt, "Share code already indexed, re-minting");
        }

        Err(CyxShareError::Index(format!(
            "no free share code after {} attempts",
            self.config.max_mint_attempts
        )))
    }

    /// Store `record` on the network and make it resolvable by its code
    #[instrument(skip(self, record, cancel), fields(code = %record.share_code))]
    pub async fn publish(
        &self,
        record: &PointerRecord,
        cancel: &CancellationToken,
    ) -> Result<PublishedPointer> {
        let code = self.config.format.parse(record.share_code.as_str())?;
        record.validate()?;

        let bytes = Bytes::from(record.to_bytes()?);
        let receipt = self.uploader.upload_with_cancel(bytes, cancel).await?;
        let pointer = PublishedPointer {
            record_root: receipt.root,
            transaction_ref: receipt.transaction_ref,
        };

        if let Some(index) = &self.index {
            index.put(&code, &pointer).await?;
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&code, record) {
                warn!(code = %code, error = %e, "Failed to cache pointer record");
            }
        }

        info!(
            code = %code,
            record_root = %pointer.record_root,
            file_root = %record.root_digest,
            "Published pointer record"
        );
        Ok(pointer)
    }

    /// Find the pointer record for `code`
    #[instrument(skip(self, cancel))]
    pub async fn resolve(&self, code: &str, cancel: &CancellationToken) -> Result<PointerRecord> {
        let code = self.config.format.parse(code)?;

        if let Some(cache) = &self.cache {
            match cache.get(code.as_str()) {
                Ok(Some(record)) if record.share_code == code => {
                    debug!(code = %code, "Resolved from local cache");
                    return Ok(record);
                }
                Ok(Some(record)) => {
                    warn!(
                        code = %code,
                        cached = %record.share_code,
                        "Cached pointer record belongs to another code, dropping it"
                    );
                    evict(cache.as_ref(), &code);
                }
                Ok(None) => {}
                Err(e @ CyxShareError::InvalidRecord(_)) => {
                    warn!(code = %code, error = %e, "Cached pointer record is unreadable, dropping it");
                    evict(cache.as_ref(), &code);
                }
                Err(e) => warn!(code = %code, error = %e, "Pointer cache lookup failed"),
            }
        }

        let Some(index) = &self.index else {
            return Err(CyxShareError::UnresolvedShareCode {
                code: code.into_string(),
                reason: "no local cache entry and no pointer index configured".to_string(),
            });
        };

        let pointer = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(CyxShareError::Cancelled { stage: Stage::Pointer });
            }
            pointer = index.get(code.as_str()) => pointer?,
        };
        let Some(pointer) = pointer else {
            return Err(CyxShareError::UnresolvedShareCode {
                code: code.into_string(),
                reason: "share code not found in pointer index".to_string(),
            });
        };

        let retrieval = self.executor.retrieve(&pointer.record_root, cancel).await?;
        let record = PointerRecord::from_bytes(retrieval.payload.as_bytes())?;
        if record.share_code != code {
            return Err(CyxShareError::InvalidRecord(format!(
                "record at {} belongs to {}, not {}",
                pointer.record_root, record.share_code, code
            )));
        }

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.put(&code, &record) {
                warn!(code = %code, error = %e, "Failed to warm pointer cache");
            }
        }

        info!(code = %code, record_root = %pointer.record_root, "Resolved through index");
        Ok(record)
    }
}

fn evict(cache: &dyn PointerCache, code: &ShareCode) {
    if let Err(e) = cache.remove(code.as_str()) {
        warn!(code = %code, error = %e, "Failed to evict pointer record");
    }
}
