//! Local pointer cache
//!
//! Same-device, best-effort map from share code to pointer record. A cache
//! hit lets `resolve` skip the index and the network entirely; a miss or a
//! cache failure is never fatal on its own.

use cyxshare_core::{CyxShareError, PointerRecord, Result, ShareCode};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Local code -> record store
pub trait PointerCache: Send + Sync {
    fn put(&self, code: &ShareCode, record: &PointerRecord) -> Result<()>;

    fn get(&self, code: &str) -> Result<Option<PointerRecord>>;

    /// Drop the entry for `code`, if any
    fn remove(&self, code: &str) -> Result<()>;

    /// Number of cached records
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Sled-backed pointer cache
pub struct SledPointerCache {
    records: sled::Tree,
}

impl SledPointerCache {
    const TREE: &'static str = "pointers";

    /// Open or create a cache at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!(path = ?path.as_ref(), "Opening pointer cache");

        let db = sled::open(path.as_ref())
            .map_err(|e| CyxShareError::Cache(format!("Failed to open Sled: {}", e)))?;
        Self::from_db(&db)
    }

    /// Open an in-memory cache (for testing)
    pub fn open_temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| CyxShareError::Cache(format!("Failed to open Sled: {}", e)))?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self> {
        let records = db
            .open_tree(Self::TREE)
            .map_err(|e| CyxShareError::Cache(e.to_string()))?;
        Ok(Self { records })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.records
            .flush()
            .map_err(|e| CyxShareError::Cache(e.to_string()))?;
        Ok(())
    }
}

impl PointerCache for SledPointerCache {
    fn put(&self, code: &ShareCode, record: &PointerRecord) -> Result<()> {
        let encoded = record.to_bytes()?;
        self.records
            .insert(code.as_str().as_bytes(), encoded)
            .map_err(|e| CyxShareError::Cache(e.to_string()))?;
        debug!(code = %code, "Cached pointer record");
        Ok(())
    }

    fn get(&self, code: &str) -> Result<Option<PointerRecord>> {
        match self
            .records
            .get(code.as_bytes())
            .map_err(|e| CyxShareError::Cache(e.to_string()))?
        {
            Some(bytes) => Ok(Some(PointerRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn remove(&self, code: &str) -> Result<()> {
        self.records
            .remove(code.as_bytes())
            .map_err(|e| CyxShareError::Cache(e.to_string()))?;
        debug!(code = %code, "Evicted pointer record");
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

/// In-memory pointer cache
#[derive(Default)]
pub struct MemoryPointerCache {
    records: RwLock<HashMap<String, PointerRecord>>,
}

impl MemoryPointerCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PointerCache for MemoryPointerCache {
    fn put(&self, code: &ShareCode, record: &PointerRecord) -> Result<()> {
        self.records
            .write()
            .insert(code.as_str().to_string(), record.clone());
        Ok(())
    }

    fn get(&self, code: &str) -> Result<Option<PointerRecord>> {
        Ok(self.records.read().get(code).cloned())
    }

    fn remove(&self, code: &str) -> Result<()> {
        self.records.write().remove(code);
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }
}
